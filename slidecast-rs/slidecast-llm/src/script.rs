use serde_json::{Map, Value};
use slidecast_utils::{MAX_SLIDES, Slide};
use thiserror::Error;

use crate::ChatResponse;

/// The language model answered, but not with a usable slide script.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("completion envelope is not valid JSON: {0}")]
    Envelope(#[source] serde_json::Error),
    #[error("response contained no completion choices")]
    NoChoices,
    #[error("completion content is empty")]
    EmptyContent,
    #[error("slide script is not valid JSON: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("slide script must be a JSON array or an object with a `slides` array")]
    UnexpectedShape,
    #[error("slide script contains no slides")]
    NoSlides,
    #[error("slide script contains {count} slides, more than the supported {max}")]
    TooManySlides { count: usize, max: usize },
    #[error("slide {index} is not a JSON object")]
    NotAnObject { index: usize },
    #[error("slide {index} is missing required field `{field}`")]
    MissingField { index: usize, field: &'static str },
}

/// Decode the first completion choice into slides.
pub fn parse_completion(response: &ChatResponse) -> Result<Vec<Slide>, FormatError> {
    let choice = response.choices.first().ok_or(FormatError::NoChoices)?;
    let content = choice
        .message
        .content
        .as_deref()
        .filter(|content| !content.trim().is_empty())
        .ok_or(FormatError::EmptyContent)?;
    parse_slides(content)
}

/// Decode a slide script, keeping the order the model wrote the slides in.
pub fn parse_slides(content: &str) -> Result<Vec<Slide>, FormatError> {
    let value: Value = serde_json::from_str(strip_code_fence(content)).map_err(FormatError::Decode)?;

    let entries = match value {
        Value::Array(entries) => entries,
        Value::Object(mut object) => match object.remove("slides") {
            Some(Value::Array(entries)) => entries,
            _ => return Err(FormatError::UnexpectedShape),
        },
        _ => return Err(FormatError::UnexpectedShape),
    };

    if entries.is_empty() {
        return Err(FormatError::NoSlides);
    }
    if entries.len() > MAX_SLIDES {
        return Err(FormatError::TooManySlides {
            count: entries.len(),
            max: MAX_SLIDES,
        });
    }

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let object = entry.as_object().ok_or(FormatError::NotAnObject { index })?;
            Ok(Slide {
                index,
                title: required_text(object, index, "title")?,
                body: required_text(object, index, "body")?,
                narration: required_text(object, index, "narration")?,
                image_prompt: optional_text(object, &["image", "image_prompt"]),
            })
        })
        .collect()
}

fn required_text(
    object: &Map<String, Value>,
    index: usize,
    field: &'static str,
) -> Result<String, FormatError> {
    object
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
        .ok_or(FormatError::MissingField { index, field })
}

fn optional_text(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| object.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|text| !text.is_empty())
        .map(str::to_string)
}

/// Models like to wrap JSON in Markdown fences even when told not to.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().trim_end_matches("```").trim()
}
