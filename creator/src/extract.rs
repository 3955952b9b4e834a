use url::Url;

use crate::{
    error::{CreatorError, Result},
    html::{TagKind, decode_html_lite, tags},
};

/// Query parameters that make the service scale or crop an image.
pub const SIZE_PARAMS: &[&str] = &["w", "h", "c", "r", "o"];

/// Collects the `src` of every `<img>` carrying `image_class`, in document
/// order. Relative sources are resolved against `base`.
///
/// No matching image is not an error, an image without a usable `src` is.
pub fn extract_image_urls(
    html: &str,
    image_class: &str,
    base: &str,
    remove_size_limit: bool,
) -> Result<Vec<String>> {
    let base = Url::parse(base).map_err(|e| CreatorError::Parse(format!("{base}: {e}")))?;

    tags(html)
        .filter(|t| t.kind != TagKind::Close && t.name.eq_ignore_ascii_case("img"))
        .filter(|t| {
            t.attr("class")
                .is_some_and(|c| c.split_ascii_whitespace().any(|c| c == image_class))
        })
        .map(|t| -> Result<String> {
            let src = t
                .attr("src")
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| {
                    CreatorError::Parse(format!("image without src at byte {}", t.start))
                })?;
            let src = decode_html_lite(src.trim());
            let mut url = base
                .join(&src)
                .map_err(|e| CreatorError::Parse(format!("{src}: {e}")))?;
            if remove_size_limit {
                strip_size_params(&mut url);
            }
            Ok(String::from(url))
        })
        .collect()
}

/// Drops the size params and leaves the remaining segments byte for byte as
/// they were.
fn strip_size_params(url: &mut Url) {
    let Some(query) = url.query() else {
        return;
    };
    let kept = query
        .split('&')
        .filter(|segment| {
            let key = segment.split_once('=').map_or(*segment, |(k, _)| k);
            !segment.is_empty() && !SIZE_PARAMS.contains(&key)
        })
        .collect::<Vec<_>>()
        .join("&");

    url.set_query((!kept.is_empty()).then_some(kept.as_str()));
}
