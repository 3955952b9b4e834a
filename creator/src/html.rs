//! Small string helpers for the markup the image creator serves.
//!
//! None of this is a real HTML parser. Tags are recognised by a little state
//! machine that knows about quoted attribute values and comments, which is
//! enough for the fixed vocabulary of the pages we touch.

use std::sync::LazyLock;

use regex::{Captures, Regex};

/// Decodes the handful of entities the service's templates produce, plus
/// numeric references. Anything else is left as is.
pub fn decode_html_lite(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        match decode_entity(rest) {
            Some((ch, len)) => {
                out.push(ch);
                rest = &rest[len..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// `s` starts with `&`. Returns the decoded char and the length of the entity.
fn decode_entity(s: &str) -> Option<(char, usize)> {
    const MAX_ENTITY_LEN: usize = 10;

    let end = s[1..]
        .char_indices()
        .take(MAX_ENTITY_LEN)
        .find(|&(_, c)| c == ';')?
        .0
        + 1;
    let name = &s[1..end];
    let ch = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        _ => {
            let num = name.strip_prefix('#')?;
            let code = match num.strip_prefix(['x', 'X']) {
                Some(hex) if !hex.is_empty() && hex.bytes().all(|b| b.is_ascii_hexdigit()) => {
                    u32::from_str_radix(hex, 16).ok()?
                }
                None if !num.is_empty() && num.bytes().all(|b| b.is_ascii_digit()) => {
                    num.parse().ok()?
                }
                _ => return None,
            };
            char::from_u32(code)?
        }
    };
    Some((ch, end + 1))
}

/// Removes the first `<tag id="tag_id">` element together with everything up
/// to its balancing close tag. Nested elements with the same tag name are
/// depth counted. If there is no such element, or it never closes, `html` is
/// returned unchanged.
pub fn remove_html_tag_lite(html: &str, tag: &str, tag_id: &str) -> String {
    let mut start = None;
    let mut depth = 0usize;

    for t in tags(html).filter(|t| t.name.eq_ignore_ascii_case(tag)) {
        match (start, t.kind) {
            (None, TagKind::Open) if t.attr("id") == Some(tag_id) => {
                start = Some(t.start);
                depth = 1;
            }
            (None, TagKind::SelfClosing) if t.attr("id") == Some(tag_id) => {
                return format!("{}{}", &html[..t.start], &html[t.end..]);
            }
            (None, _) | (Some(_), TagKind::SelfClosing) => {}
            (Some(_), TagKind::Open) => depth += 1,
            (Some(s), TagKind::Close) => {
                depth -= 1;
                if depth == 0 {
                    return format!("{}{}", &html[..s], &html[t.end..]);
                }
            }
        }
    }

    html.to_string()
}

/// Byte offset right behind the opening tag of the first `<tag id="tag_id">`.
pub fn find_open_tag_end(html: &str, tag: &str, tag_id: &str) -> Option<usize> {
    tags(html)
        .find(|t| {
            t.kind == TagKind::Open
                && t.name.eq_ignore_ascii_case(tag)
                && t.attr("id") == Some(tag_id)
        })
        .map(|t| t.end)
}

static RELATIVE_URL: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = r#"(?i)((?:\b(?:src|href|action|poster|data-src)\s*=\s*|url\(\s*)["']?)(//|/)"#;
    Regex::new(pattern).expect("relative url regex")
});

/// Turns root-relative (`/x`) references into `{origin}/x` and scheme-relative
/// ones (`//host/x`) into `https://host/x`.
pub fn absolutize_urls(html: &str, origin: &str) -> String {
    let origin = origin.trim_end_matches('/');
    RELATIVE_URL
        .replace_all(html, |caps: &Captures| {
            let lead = &caps[1];
            match &caps[2] {
                "//" => format!("{lead}https://"),
                _ => format!("{lead}{origin}/"),
            }
        })
        .into_owned()
}

/// Makes `s` safe to place inside a single-quoted attribute. Applying it
/// twice is the same as applying it once.
pub fn escape_single_quotes(s: &str) -> String {
    s.replace('\'', "&#39;")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TagKind {
    Open,
    Close,
    SelfClosing,
}

#[derive(Debug)]
pub(crate) struct Tag<'a> {
    pub kind: TagKind,
    pub name: &'a str,
    attrs: &'a str,
    pub start: usize,
    pub end: usize,
}

impl<'a> Tag<'a> {
    /// Raw (still entity encoded) value of attribute `name`.
    pub fn attr(&self, name: &str) -> Option<&'a str> {
        Attrs { rest: self.attrs }
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }
}

const RAW_TEXT_TAGS: &[&str] = &["script", "style"];

pub(crate) fn tags(html: &str) -> Tags<'_> {
    Tags { html, pos: 0 }
}

pub(crate) struct Tags<'a> {
    html: &'a str,
    pos: usize,
}

impl<'a> Iterator for Tags<'a> {
    type Item = Tag<'a>;

    fn next(&mut self) -> Option<Tag<'a>> {
        loop {
            let start = self.pos + self.html.get(self.pos..)?.find('<')?;
            let rest = &self.html[start..];

            if rest.starts_with("<!--") {
                self.pos = rest.find("-->").map_or(self.html.len(), |i| start + i + 3);
                continue;
            }

            let first = rest[1..].chars().next();
            if !first.is_some_and(|c| c.is_ascii_alphabetic() || c == '/') {
                self.pos = start + 1;
                continue;
            }

            let Some(close) = find_tag_end(rest) else {
                self.pos = self.html.len();
                return None;
            };
            let end = start + close + 1;
            self.pos = end;

            let inner = &self.html[start + 1..end - 1];
            let (kind, inner) = if let Some(i) = inner.strip_prefix('/') {
                (TagKind::Close, i)
            } else if let Some(i) = inner.strip_suffix('/') {
                (TagKind::SelfClosing, i)
            } else {
                (TagKind::Open, inner)
            };

            let name_len = inner
                .find(|c: char| c.is_ascii_whitespace() || c == '/')
                .unwrap_or(inner.len());
            if name_len == 0 {
                continue;
            }
            let name = &inner[..name_len];

            // script and style bodies are raw text, resume at their close tag
            let raw_text = RAW_TEXT_TAGS.iter().any(|t| name.eq_ignore_ascii_case(t));
            if kind == TagKind::Open && raw_text {
                let close = format!("</{}", name.to_ascii_lowercase());
                self.pos = self.html[end..]
                    .to_ascii_lowercase()
                    .find(&close)
                    .map_or(self.html.len(), |i| end + i);
            }

            return Some(Tag {
                kind,
                name,
                attrs: &inner[name_len..],
                start,
                end,
            });
        }
    }
}

/// Index of the `>` closing the tag that `s` starts with, skipping quoted
/// attribute values.
fn find_tag_end(s: &str) -> Option<usize> {
    enum State {
        Tag,
        Quoted(u8),
    }

    let mut state = State::Tag;
    for (i, b) in s.bytes().enumerate() {
        state = match (state, b) {
            (State::Tag, b'>') => return Some(i),
            (State::Tag, q @ (b'"' | b'\'')) => State::Quoted(q),
            (State::Quoted(q), b) if b == q => State::Tag,
            (s, _) => s,
        };
    }
    None
}

/// Iterates `name=value` pairs of a tag's attribute section. Valueless
/// attributes yield an empty value.
struct Attrs<'a> {
    rest: &'a str,
}

impl<'a> Iterator for Attrs<'a> {
    type Item = (&'a str, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.rest.trim_start_matches(|c: char| c.is_ascii_whitespace() || c == '/');
        if rest.is_empty() {
            self.rest = rest;
            return None;
        }

        let name_len = rest
            .find(|c: char| c.is_ascii_whitespace() || c == '=' || c == '/')
            .unwrap_or(rest.len());
        let name = &rest[..name_len];
        let after_name = rest[name_len..].trim_start();

        let Some(value_part) = after_name.strip_prefix('=') else {
            self.rest = after_name;
            return Some((name, ""));
        };
        let value_part = value_part.trim_start();

        let (value, remaining) = match value_part.as_bytes().first() {
            Some(&q @ (b'"' | b'\'')) => {
                let body = &value_part[1..];
                match body.find(q as char) {
                    Some(i) => (&body[..i], &body[i + 1..]),
                    None => (body, ""),
                }
            }
            _ => {
                let len = value_part
                    .find(|c: char| c.is_ascii_whitespace())
                    .unwrap_or(value_part.len());
                (&value_part[..len], &value_part[len..])
            }
        };
        self.rest = remaining;
        Some((name, value))
    }
}
