use log::{Level, debug, log, warn};
use regex::Regex;
use url::Url;

use crate::{
    address::AddressSpec,
    error::{CreatorError, Result},
    extract::extract_image_urls,
    html::{decode_html_lite, find_open_tag_end},
    iframe,
    options::Options,
    polling::{PollSettings, PollingEngine, ProgressContext},
    telemetry::Telemetry,
    transport::{HttpRequest, ReqwestTransport, Transport, TransportError},
};

/// Outcome of the initial creation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreationResult {
    /// The creation page, as finally served after redirects.
    pub content_url: String,
    pub polling_url: String,
    pub content_html: String,
    pub prompt: String,
    pub iframe_id: String,
}

/// Client for the Bing Image Creator web pages.
///
/// One instance owns one set of rotating telemetry tokens. It can be shared
/// between tasks, every workflow only borrows it.
pub struct BingImageCreator<T: Transport = ReqwestTransport> {
    options: Options,
    polling_url_re: Regex,
    address: Option<AddressSpec>,
    telemetry: Telemetry,
    transport: T,
}

impl BingImageCreator<ReqwestTransport> {
    pub fn new(options: Options) -> Result<Self> {
        let transport = ReqwestTransport::new(options.request_timeout())
            .map_err(|e| CreatorError::Config(format!("Couldn't build HTTP client: {e}")))?;
        Self::with_transport(options, transport)
    }
}

impl<T: Transport> BingImageCreator<T> {
    pub fn with_transport(options: Options, transport: T) -> Result<Self> {
        let (polling_url_re, address) = validate(&options)?;
        Ok(Self {
            options,
            polling_url_re,
            address,
            telemetry: Telemetry::new(),
            transport,
        })
    }

    /// Replaces the options. The telemetry counters keep running.
    pub fn set_options(&mut self, options: Options) -> Result<()> {
        let (polling_url_re, address) = validate(&options)?;
        self.options = options;
        self.polling_url_re = polling_url_re;
        self.address = address;
        Ok(())
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Headers for one outbound request. The forwarded address is drawn anew
    /// on every call.
    pub fn fetch_headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            (
                "accept".to_string(),
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
            ),
            ("accept-language".into(), "en-US,en;q=0.9".into()),
            ("user-agent".into(), self.options.user_agent.clone()),
            ("referer".into(), self.options.api_url()),
        ];
        if let Some(cookie) = self.options.cookie_header() {
            headers.push(("cookie".into(), cookie));
        }
        if let Some(address) = &self.address {
            headers.push(("x-forwarded-for".into(), address.resolve().to_string()));
        }
        headers
    }

    fn request(&self, url: &str) -> HttpRequest {
        HttpRequest {
            headers: self.fetch_headers(),
            ..HttpRequest::get(url)
        }
    }

    fn creation_url(&self, prompt: &str, message_id: &str) -> Result<Url> {
        let api_url = self.options.api_url();
        let mut url = Url::parse(&api_url).map_err(|e| {
            CreatorError::CreationRequest(TransportError::InvalidUrl(format!("{api_url}: {e}")))
        })?;
        url.query_pairs_mut()
            .append_pair("partner", "sydney")
            .append_pair("re", "1")
            .append_pair("showselective", "1")
            .append_pair("sude", "1")
            .append_pair("kseed", &self.telemetry.next_kseed().to_string())
            .append_pair("SFX", &self.telemetry.next_inst_suffix())
            .append_pair("IG", self.telemetry.ig())
            .append_pair("q", prompt)
            .append_pair("iframeid", message_id);
        Ok(url)
    }

    fn log_body(&self, what: &str, body: &str) {
        let level = if self.options.debug {
            Level::Info
        } else {
            Level::Debug
        };
        log!(level, "{what}:\n{body}");
    }

    /// Asks the service to start generating images for `prompt`.
    pub async fn gen_image_page(&self, prompt: &str, message_id: &str) -> Result<CreationResult> {
        let url = self.creation_url(prompt, message_id)?;
        debug!("Creation request: {url}");

        let resp = self
            .transport
            .send(self.request(url.as_str()))
            .await
            .and_then(|r| r.error_for_status())
            .map_err(CreatorError::CreationRequest)?;
        self.log_body("Creation page", &resp.body);

        let signatures = &self.options.signatures;
        if resp.body.contains(&signatures.rejection_marker) {
            return Err(CreatorError::UnexpectedResponse {
                reason: rejection_reason(&resp.body, &signatures.rejection_message_id),
            });
        }

        let raw_polling_url = self
            .polling_url_re
            .captures(&resp.body)
            .and_then(|c| c.get(1))
            .ok_or_else(|| CreatorError::UnexpectedResponse {
                reason: "no polling URL in the creation page".into(),
            })?
            .as_str();
        let polling_url = self
            .origin_url()?
            .join(&decode_html_lite(raw_polling_url))
            .map_err(|e| CreatorError::UnexpectedResponse {
                reason: format!("unusable polling URL {raw_polling_url}: {e}"),
            })?;

        let content_url = if resp.url.is_empty() {
            url.into()
        } else {
            resp.url
        };

        Ok(CreationResult {
            content_url,
            polling_url: polling_url.into(),
            content_html: resp.body,
            prompt: prompt.into(),
            iframe_id: message_id.into(),
        })
    }

    /// Polls until the images are ready and returns the result fragment.
    /// See [`PollingEngine::run`] for how `on_progress` is used.
    pub async fn polling_img_request<F>(&self, polling_url: &str, on_progress: F) -> Result<String>
    where
        F: FnMut(&ProgressContext) -> bool,
    {
        let settings = PollSettings {
            interval: self.options.polling_interval(),
            timeout: self.options.polling_timeout(),
            max_retries: self.options.max_poll_retries,
        };
        let mut engine =
            PollingEngine::new(&self.transport, settings, &self.options.signatures.complete_marker);

        let html = engine
            .run(|| self.request(polling_url), on_progress)
            .await?;
        self.log_body("Polling result", &html);
        Ok(html)
    }

    /// Generates images and returns their URLs. With `remove_size_limit` the
    /// URLs point at the full resolution images instead of thumbnails.
    pub async fn gen_image_list<F>(
        &self,
        prompt: &str,
        message_id: &str,
        remove_size_limit: bool,
        on_progress: F,
    ) -> Result<Vec<String>>
    where
        F: FnMut(&ProgressContext) -> bool,
    {
        let page = self.gen_image_page(prompt, message_id).await?;
        let html = self.polling_img_request(&page.polling_url, on_progress).await?;
        extract_image_urls(
            &html,
            &self.options.signatures.image_class,
            &self.options.host,
            remove_size_limit,
        )
    }

    pub fn create_image_iframe(&self, src: &str, is_doc: bool) -> String {
        iframe::create_image_iframe(src, is_doc)
    }

    pub fn rewrite_html(&self, html: &str) -> String {
        iframe::rewrite_html(html, &self.options.host)
    }

    pub fn render_image_iframe(&self, container_html: &str, result_html: &str) -> String {
        iframe::render_image_iframe(
            container_html,
            result_html,
            &self.options.host,
            &self.options.signatures,
        )
    }

    /// Server side render of the full creation page with the results in
    /// place, like the browser client shows it.
    ///
    /// `on_progress` first receives an iframe of the live creation page, then
    /// the polling ticks.
    pub async fn gen_image_iframe_ssr<F>(
        &self,
        prompt: &str,
        message_id: &str,
        mut on_progress: F,
    ) -> Result<String>
    where
        F: FnMut(&ProgressContext) -> bool,
    {
        let page = self.gen_image_page(prompt, message_id).await?;

        let ctx = ProgressContext {
            content_iframe: Some(self.create_image_iframe(&page.content_url, false)),
            polling_start_time: None,
        };
        if on_progress(&ctx) {
            return Err(CreatorError::PollingCancelled);
        }

        let result = self
            .polling_img_request(&page.polling_url, &mut on_progress)
            .await?;
        Ok(self.render_image_iframe(&page.content_html, &result))
    }

    /// Server side render of just the result fragment.
    pub async fn gen_image_iframe_ssr_lite<F>(
        &self,
        prompt: &str,
        message_id: &str,
        on_progress: F,
    ) -> Result<String>
    where
        F: FnMut(&ProgressContext) -> bool,
    {
        let page = self.gen_image_page(prompt, message_id).await?;
        let result = self.polling_img_request(&page.polling_url, on_progress).await?;
        Ok(self.create_image_iframe(&self.rewrite_html(&result), true))
    }

    /// An iframe pointing at the creation page. Nothing is requested here, the
    /// viewer's browser does the generation and needs to be logged in to Bing.
    pub fn gen_image_iframe_csr(&self, prompt: &str, message_id: &str) -> Result<String> {
        let url = self.creation_url(prompt, message_id)?;
        Ok(self.create_image_iframe(url.as_str(), false))
    }

    fn origin_url(&self) -> Result<Url> {
        Url::parse(&self.options.host)
            .map_err(|e| CreatorError::Config(format!("host {}: {e}", self.options.host)))
    }
}

fn validate(options: &Options) -> Result<(Regex, Option<AddressSpec>)> {
    Url::parse(&options.host)
        .map_err(|e| CreatorError::Config(format!("host {}: {e}", options.host)))?;
    let api_url = options.api_url();
    Url::parse(&api_url).map_err(|e| CreatorError::Config(format!("base_url {api_url}: {e}")))?;

    let signatures = &options.signatures;
    let re = Regex::new(&signatures.polling_url_pattern)
        .map_err(|e| CreatorError::Config(format!("polling_url_pattern: {e}")))?;
    if re.captures_len() < 2 {
        return Err(CreatorError::Config(
            "polling_url_pattern needs a capture group".into(),
        ));
    }
    for (name, value) in [
        ("complete_marker", &signatures.complete_marker),
        ("rejection_marker", &signatures.rejection_marker),
        ("image_class", &signatures.image_class),
    ] {
        if value.is_empty() {
            return Err(CreatorError::Config(format!("{name} must not be empty")));
        }
    }

    let address = options.x_forwarded_for.as_deref().and_then(|spec| {
        let parsed = AddressSpec::parse(spec);
        if parsed.is_none() {
            warn!("Ignoring invalid x_forwarded_for: {spec}");
        }
        parsed
    });

    Ok((re, address))
}

fn rejection_reason(html: &str, message_id: &str) -> String {
    find_open_tag_end(html, "div", message_id)
        .and_then(|start| {
            let text = &html[start..];
            let text = &text[..text.find('<').unwrap_or(text.len())];
            let text = decode_html_lite(text.trim());
            (!text.is_empty()).then_some(text)
        })
        .unwrap_or_else(|| "the prompt was rejected".into())
}

#[cfg(test)]
mod test {
    use std::net::Ipv4Addr;

    use expect_test::expect;
    use indoc::indoc;

    use crate::transport::fake::FakeTransport;

    use super::*;

    const CREATION_PAGE: &str = indoc! {r#"
        <html><head><link href="/rp/c.css" rel="stylesheet"></head><body>
        <div id="giloader"><div class="spinner"><div></div></div>Creating...</div>
        <div id="gir" data-c="/images/create/async/results/1-abc?q=a+red+fox&amp;IG=0123&amp;IID=images.as" data-mc="/images/create/async/mycreation?requestId=1-abc"></div>
        </body></html>
    "#};

    const RESULT: &str = indoc! {r#"
        <div id="gir_async" class="giric">
        <a class="iusc"><img class="mimg" src="https://th.bing.com/th/id/OIG.1?w=270&amp;h=270&amp;c=6&amp;pid=ImgGn" alt="fox's den"></a>
        <a class="iusc"><img class="mimg" src="https://th.bing.com/th/id/OIG.2?w=270&amp;h=270&amp;c=6&amp;pid=ImgGn"></a>
        </div>
    "#};

    const CONTENT_URL: &str = "https://www.bing.com/images/create/a-red-fox/1-abc?FORM=GENCRE";

    fn options() -> Options {
        Options {
            user_token: Some("token".into()),
            x_forwarded_for: Some("10.1.2.0/24".into()),
            polling_interval_ms: 1_000,
            polling_timeout_ms: 30_000,
            ..Default::default()
        }
    }

    fn creator(transport: FakeTransport) -> BingImageCreator<FakeTransport> {
        BingImageCreator::with_transport(options(), transport).unwrap()
    }

    #[tokio::test]
    async fn creation_page_yields_polling_url() {
        let bic = creator(FakeTransport::new().ok_at(CONTENT_URL, CREATION_PAGE));

        let page = bic.gen_image_page("a red fox", "msg-1").await.unwrap();

        assert_eq!(page.content_url, CONTENT_URL);
        assert_eq!(
            page.polling_url,
            "https://www.bing.com/images/create/async/results/1-abc?q=a+red+fox&IG=0123&IID=images.as"
        );
        assert_eq!(page.content_html, CREATION_PAGE);
        assert_eq!(page.prompt, "a red fox");
        assert_eq!(page.iframe_id, "msg-1");

        let requests = bic.transport().requests.lock().unwrap();
        let req = &requests[0];
        let ig = bic.telemetry().ig();
        assert_eq!(ig.len(), 32);
        expect![[r#"https://www.bing.com/images/create?partner=sydney&re=1&showselective=1&sude=1&kseed=7500&SFX=1&IG=<ig>&q=a+red+fox&iframeid=msg-1"#]]
            .assert_eq(&req.url.replace(ig, "<ig>"));
        assert_eq!(req.header("cookie"), Some("_U=token"));
        let forwarded: Ipv4Addr = req.header("x-forwarded-for").unwrap().parse().unwrap();
        assert!(forwarded > Ipv4Addr::new(10, 1, 2, 0) && forwarded < Ipv4Addr::new(10, 1, 2, 255));
    }

    #[tokio::test]
    async fn content_url_falls_back_to_request_url() {
        let bic = creator(FakeTransport::new().ok(200, CREATION_PAGE));
        let page = bic.gen_image_page("fox", "m").await.unwrap();
        assert!(page.content_url.starts_with("https://www.bing.com/images/create?partner=sydney"));
    }

    #[tokio::test]
    async fn http_errors_are_creation_errors() {
        let bic = creator(FakeTransport::new().ok(500, "oops"));
        let err = bic.gen_image_page("fox", "m").await.unwrap_err();
        assert!(matches!(
            err,
            CreatorError::CreationRequest(TransportError::Status { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn rejected_prompt_is_an_unexpected_response() {
        let page = indoc! {r#"
            <div id="gil_err_cont"><div id="gilen_son" class="gil_err_tc">This prompt has been blocked. Our system automatically flagged this prompt.</div></div>
        "#};
        let bic = creator(FakeTransport::new().ok(200, page));

        let err = bic.gen_image_page("bad", "m").await.unwrap_err();

        let CreatorError::UnexpectedResponse { reason } = err else {
            panic!("expected an unexpected response error");
        };
        assert!(reason.starts_with("This prompt has been blocked."), "{reason}");
    }

    #[tokio::test]
    async fn missing_polling_url_is_an_unexpected_response() {
        let bic = creator(FakeTransport::new().ok(200, "<html><body>new layout</body></html>"));
        let err = bic.gen_image_page("fox", "m").await.unwrap_err();
        assert!(matches!(err, CreatorError::UnexpectedResponse { .. }), "{err:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn image_list_end_to_end() {
        let bic = creator(
            FakeTransport::new()
                .ok_at(CONTENT_URL, CREATION_PAGE)
                .ok(200, "")
                .ok(200, RESULT),
        );
        let mut ticks = 0;

        let urls = bic
            .gen_image_list("a red fox", "msg-1", true, |ctx| {
                assert!(ctx.polling_start_time.is_some());
                ticks += 1;
                false
            })
            .await
            .unwrap();

        assert_eq!(ticks, 1);
        assert_eq!(
            urls,
            [
                "https://th.bing.com/th/id/OIG.1?pid=ImgGn",
                "https://th.bing.com/th/id/OIG.2?pid=ImgGn",
            ]
        );
        let requests = bic.transport().requests.lock().unwrap();
        assert_eq!(requests.len(), 3);
        let polling_url =
            "https://www.bing.com/images/create/async/results/1-abc?q=a+red+fox&IG=0123&IID=images.as";
        assert!(requests[1..].iter().all(|r| r.url == polling_url));
    }

    #[tokio::test(start_paused = true)]
    async fn ssr_reports_content_iframe_first() {
        let bic = creator(
            FakeTransport::new()
                .ok_at(CONTENT_URL, CREATION_PAGE)
                .ok(200, "")
                .ok(200, RESULT),
        );
        let mut seen = vec![];

        let iframe = bic
            .gen_image_iframe_ssr("a red fox", "msg-1", |ctx| {
                seen.push(ctx.clone());
                false
            })
            .await
            .unwrap();

        assert_eq!(seen.len(), 2);
        assert_eq!(
            seen[0].content_iframe.as_deref(),
            Some(bic.create_image_iframe(CONTENT_URL, false).as_str())
        );
        assert_eq!(seen[0].polling_start_time, None);
        assert_eq!(seen[1].content_iframe, None);
        assert!(seen[1].polling_start_time.is_some());

        assert!(iframe.starts_with("<iframe"));
        assert_eq!(iframe.matches("<iframe").count(), 1);
        assert!(!iframe.contains("giloader"));
        assert!(iframe.contains("href=\"https://www.bing.com/rp/c.css\""));
        assert!(iframe.contains("alt=\"fox&#39;s den\""));
        assert!(iframe.contains("<div id=\"gir_async\""));
    }

    #[tokio::test(start_paused = true)]
    async fn ssr_can_be_cancelled_before_polling() {
        let bic = creator(FakeTransport::new().ok_at(CONTENT_URL, CREATION_PAGE));

        let err = bic
            .gen_image_iframe_ssr("a red fox", "msg-1", |ctx| ctx.content_iframe.is_some())
            .await
            .unwrap_err();

        assert!(matches!(err, CreatorError::PollingCancelled));
        assert_eq!(bic.transport().request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ssr_lite_embeds_only_the_result() {
        let bic = creator(
            FakeTransport::new()
                .ok_at(CONTENT_URL, CREATION_PAGE)
                .ok(200, RESULT),
        );

        let iframe = bic
            .gen_image_iframe_ssr_lite("a red fox", "msg-1", |_| false)
            .await
            .unwrap();

        assert!(iframe.contains("srcdoc='<div id=\"gir_async\""));
        assert!(!iframe.contains("rp/c.css"));
    }

    #[tokio::test(start_paused = true)]
    async fn polling_timeout_surfaces_through_workflow() {
        let bic = creator(FakeTransport::new().ok_at(CONTENT_URL, CREATION_PAGE));
        let err = bic
            .gen_image_list("fox", "m", false, |_| false)
            .await
            .unwrap_err();
        assert!(matches!(err, CreatorError::PollingTimedOut { .. }), "{err:?}");
    }

    #[test]
    fn csr_points_at_creation_page_and_rotates_tokens() {
        let bic = creator(FakeTransport::new());

        let first = bic.gen_image_iframe_csr("a red fox", "msg-1").unwrap();
        let second = bic.gen_image_iframe_csr("a red fox", "msg-2").unwrap();

        expect![[r#"<iframe role="presentation" style="border:none;width:100%;height:100%;min-height:620px;" src='https://www.bing.com/images/create?partner=sydney&re=1&showselective=1&sude=1&kseed=7500&SFX=1&IG=<ig>&q=a+red+fox&iframeid=msg-1'></iframe>"#]]
            .assert_eq(&first.replace(bic.telemetry().ig(), "<ig>"));
        assert!(second.contains(&format!("kseed=8000&SFX=2&IG={}&", bic.telemetry().ig())));
        assert_eq!(bic.transport().request_count(), 0);
    }

    #[test]
    fn set_options_keeps_telemetry() {
        let mut bic = creator(FakeTransport::new());
        bic.telemetry().next_kseed();
        bic.set_options(Options {
            host: "https://cn.bing.com".into(),
            ..options()
        })
        .unwrap();
        assert_eq!(bic.telemetry().next_kseed(), 8000);
        assert_eq!(bic.options().api_url(), "https://cn.bing.com/images/create");
    }

    #[test]
    fn invalid_options_are_rejected() {
        let mut bad_regex = options();
        bad_regex.signatures.polling_url_pattern = "data-c=\"(".into();
        assert!(matches!(
            BingImageCreator::with_transport(bad_regex, FakeTransport::new()),
            Err(CreatorError::Config(_))
        ));

        let mut no_group = options();
        no_group.signatures.polling_url_pattern = "results".into();
        assert!(matches!(
            BingImageCreator::with_transport(no_group, FakeTransport::new()),
            Err(CreatorError::Config(_))
        ));

        let bad_host = Options {
            host: "not a url".into(),
            ..options()
        };
        assert!(matches!(
            BingImageCreator::with_transport(bad_host, FakeTransport::new()),
            Err(CreatorError::Config(_))
        ));
    }

    #[test]
    fn invalid_forwarded_address_means_no_header() {
        let bic = BingImageCreator::with_transport(
            Options {
                x_forwarded_for: Some("nope".into()),
                ..options()
            },
            FakeTransport::new(),
        )
        .unwrap();
        assert!(bic.fetch_headers().iter().all(|(n, _)| n != "x-forwarded-for"));
    }
}
