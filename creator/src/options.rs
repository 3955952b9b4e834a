use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_HOST: &str = "https://www.bing.com";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Origin of the service. Also used to absolutize links in rewritten pages.
    pub host: String,
    /// Root of the creation endpoint, `{host}/images/create` when unset.
    pub base_url: Option<String>,
    /// A fixed IPv4 address or a CIDR range sent as `x-forwarded-for`.
    pub x_forwarded_for: Option<String>,
    /// Value of the `_U` auth cookie.
    pub user_token: Option<String>,
    /// Complete cookie header. Takes precedence over `user_token`.
    pub cookies: Option<String>,
    pub user_agent: String,
    pub polling_interval_ms: u64,
    pub polling_timeout_ms: u64,
    pub max_poll_retries: u32,
    pub request_timeout_ms: u64,
    pub debug: bool,
    pub signatures: Signatures,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            base_url: None,
            x_forwarded_for: None,
            user_token: None,
            cookies: None,
            user_agent: DEFAULT_USER_AGENT.into(),
            polling_interval_ms: 3_000,
            polling_timeout_ms: 200_000,
            max_poll_retries: 3,
            request_timeout_ms: 60_000,
            debug: false,
            signatures: Signatures::default(),
        }
    }
}

impl Options {
    pub fn api_url(&self) -> String {
        match &self.base_url {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("{}/images/create", self.host.trim_end_matches('/')),
        }
    }

    /// The cookie header to send, if any auth material is configured.
    pub fn cookie_header(&self) -> Option<String> {
        match (&self.cookies, &self.user_token) {
            (Some(cookies), _) if !cookies.is_empty() => Some(cookies.clone()),
            (_, Some(token)) if !token.is_empty() => Some(format!("_U={token}")),
            _ => None,
        }
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    pub fn polling_timeout(&self) -> Duration {
        Duration::from_millis(self.polling_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Markup fingerprints of the service. They change whenever the service
/// changes its pages, so they are configuration rather than constants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Signatures {
    /// Regex whose first capture group is the (entity encoded) polling URL.
    pub polling_url_pattern: String,
    /// Present in a polling response once the images are ready.
    pub complete_marker: String,
    /// Present in the creation page when the prompt was refused.
    pub rejection_marker: String,
    /// Id of the element holding the human readable refusal text.
    pub rejection_message_id: String,
    /// Class carried by every result image.
    pub image_class: String,
    /// Id of the loading placeholder in the creation page.
    pub loader_id: String,
    /// Id of the element the results get rendered into.
    pub results_id: String,
}

impl Default for Signatures {
    fn default() -> Self {
        Self {
            polling_url_pattern: r#"data-c="([^"]*/images/create/async/results/[^"]*)""#.into(),
            complete_marker: "gir_async".into(),
            rejection_marker: "gil_err".into(),
            rejection_message_id: "gilen_son".into(),
            image_class: "mimg".into(),
            loader_id: "giloader".into(),
            results_id: "gir".into(),
        }
    }
}
