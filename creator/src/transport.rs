use std::{future::Future, pin::Pin, time::Duration};

use log::debug;
use reqwest::Client;
use thiserror::Error;

/// A GET request. The service only ever serves pages, so there is no body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: vec![],
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Final URL after redirects.
    pub url: String,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turns a non-2xx response into an error carrying the body.
    pub fn error_for_status(self) -> Result<Self, TransportError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(TransportError::Status {
                status: self.status,
                body: self.body,
            })
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send + 'a>>;

/// Whatever actually talks HTTP. Cookies and other auth material travel in
/// the request headers, so implementations can stay stateless.
pub trait Transport: Send + Sync {
    fn send<'a>(&'a self, req: HttpRequest) -> TransportFuture<'a>;
}

#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
        })
    }
}

impl Transport for ReqwestTransport {
    fn send<'a>(&'a self, req: HttpRequest) -> TransportFuture<'a> {
        Box::pin(async move {
            let HttpRequest { url, headers } = req;

            let mut request = self.client.get(&url);
            for (name, value) in headers {
                request = request.header(name, value);
            }

            debug!("GET {url}");
            let resp = request.send().await?;
            let status = resp.status().as_u16();
            let url = resp.url().to_string();
            let body = resp.text().await?;

            Ok(HttpResponse { status, url, body })
        })
    }
}
