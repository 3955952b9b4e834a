use crate::{
    html::{absolutize_urls, escape_single_quotes, find_open_tag_end, remove_html_tag_lite},
    options::Signatures,
};

const IFRAME_STYLE: &str = "border:none;width:100%;height:100%;min-height:620px;";

/// An iframe that either loads `src` or, with `is_doc`, renders `src` as its
/// document.
pub fn create_image_iframe(src: &str, is_doc: bool) -> String {
    let attr = if is_doc { "srcdoc" } else { "src" };
    format!(
        r#"<iframe role="presentation" style="{IFRAME_STYLE}" {attr}='{}'></iframe>"#,
        escape_single_quotes(src)
    )
}

/// Makes a page body embeddable: absolute links and escaped single quotes.
pub fn rewrite_html(html: &str, origin: &str) -> String {
    escape_single_quotes(&absolutize_urls(html, origin))
}

/// Drops the loader from the creation page, puts the result fragment where
/// the browser client would, and wraps the whole thing into a `srcdoc`
/// iframe.
pub fn render_image_iframe(
    container_html: &str,
    result_html: &str,
    origin: &str,
    signatures: &Signatures,
) -> String {
    let container = remove_html_tag_lite(container_html, "div", &signatures.loader_id);
    let at = find_open_tag_end(&container, "div", &signatures.results_id)
        .or_else(|| container.to_ascii_lowercase().rfind("</body>"))
        .unwrap_or(container.len());

    let mut combined = String::with_capacity(container.len() + result_html.len());
    combined.push_str(&container[..at]);
    combined.push_str(result_html);
    combined.push_str(&container[at..]);

    create_image_iframe(&rewrite_html(&combined, origin), true)
}
