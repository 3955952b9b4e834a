//! Detection of inline image requests inside chat messages.
//!
//! Bing has been seen, very rarely, to answer with a markdown image like
//! `![a red fox](#generative_image)` in the middle or at the end of a message,
//! meaning "generate this image here". It could not be reproduced since, so
//! treat this as best effort: the format may be gone or may change.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

pub static INLINE_IMAGE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!\[([^\]\n]+)\]\(#generative_image\)").expect("inline image regex")
});

/// A chat message, either raw text or the message object as sent by the
/// chat service.
#[derive(Debug, Clone, Copy)]
pub enum Message<'a> {
    Text(&'a str),
    Object(&'a Value),
}

impl<'a> From<&'a str> for Message<'a> {
    fn from(text: &'a str) -> Self {
        Message::Text(text)
    }
}

impl<'a> From<&'a String> for Message<'a> {
    fn from(text: &'a String) -> Self {
        Message::Text(text)
    }
}

impl<'a> From<&'a Value> for Message<'a> {
    fn from(value: &'a Value) -> Self {
        Message::Object(value)
    }
}

impl<'a> Message<'a> {
    /// Every text the message carries: the plain `text` field first, then
    /// the text blocks of its adaptive cards.
    fn texts(self) -> Vec<&'a str> {
        match self {
            Message::Text(text) => vec![text],
            Message::Object(value) => value
                .get("text")
                .and_then(Value::as_str)
                .into_iter()
                .chain(adaptive_card_texts(value))
                .collect(),
        }
    }
}

fn adaptive_card_texts(value: &Value) -> impl Iterator<Item = &str> {
    value
        .get("adaptiveCards")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|card| card.get("body")?.as_array())
        .flatten()
        .filter_map(|block| block.get("text")?.as_str())
}

/// The prompt of the first inline image request in `message`, if any.
pub fn parse_inline_generative_image<'a>(message: impl Into<Message<'a>>) -> Option<String> {
    message.into().texts().into_iter().find_map(|text| {
        let caps = INLINE_IMAGE_PATTERN.captures(text)?;
        let prompt = caps[1].trim();
        (!prompt.is_empty()).then(|| prompt.to_string())
    })
}
