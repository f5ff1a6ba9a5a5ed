// src/reasoning/extract.rs
//
// Reasoning models answer in prose and often wrap structured output in a
// fenced block. All JSON-in-text extraction goes through here so the rest of
// the crate never does its own string splitting.

use crate::domain::errors::{ReasoningError, ReasoningResult};
use serde_json::Value;

/// Extract and parse the JSON object embedded in a model response.
///
/// Handles responses wrapped in ```json fences, bare ``` fences, and raw
/// JSON, in that order. Anything before the first `{` or after the matching
/// last `}` is discarded.
pub fn extract_json_object(text: &str) -> ReasoningResult<Value> {
    let candidate = if let Some(start) = text.find("```json") {
        let after = &text[start + "```json".len()..];
        after.split("```").next().unwrap_or(after)
    } else if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        after.split("```").next().unwrap_or(after)
    } else {
        text
    };

    let open = candidate.find('{').ok_or(ReasoningError::NoJsonFound)?;
    let close = candidate.rfind('}').ok_or(ReasoningError::NoJsonFound)?;
    if close < open {
        return Err(ReasoningError::NoJsonFound);
    }

    let value: Value = serde_json::from_str(candidate[open..=close].trim())
        .map_err(|e| ReasoningError::MalformedJson(e.to_string()))?;

    if !value.is_object() {
        return Err(ReasoningError::NoJsonFound);
    }
    Ok(value)
}

/// Required string field.
pub fn field_str(value: &Value, key: &'static str) -> ReasoningResult<String> {
    match value.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) if !other.is_null() => Ok(other.to_string()),
        _ => Err(ReasoningError::MissingField(key)),
    }
}

/// Required numeric field, accepting numbers, numeric strings, and strings
/// with a trailing percent sign (models are inconsistent about all three).
pub fn field_f64(value: &Value, key: &'static str) -> ReasoningResult<f64> {
    let field = value.get(key).ok_or(ReasoningError::MissingField(key))?;
    coerce_f64(field).ok_or(ReasoningError::MissingField(key))
}

/// Like [`field_f64`] but falls back to a default instead of failing.
pub fn field_f64_or(value: &Value, key: &'static str, default: f64) -> f64 {
    value.get(key).and_then(coerce_f64).unwrap_or(default)
}

/// Required 0-10 score; out-of-range values are clamped, not rejected.
pub fn field_score(value: &Value, key: &'static str) -> ReasoningResult<u8> {
    let raw = field_f64(value, key)?;
    Ok(raw.clamp(0.0, 10.0).round() as u8)
}

fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    }
}

/// Parse a bare scalar score from a response that should contain only a
/// number (sentiment, risk score prompts). Falls back to scanning the first
/// numeric token when the model adds words anyway.
pub fn parse_scalar(text: &str) -> ReasoningResult<f64> {
    if let Ok(v) = text.trim().parse::<f64>() {
        return Ok(v);
    }
    text.split(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
        .filter(|t| !t.is_empty())
        .find_map(|t| t.parse::<f64>().ok())
        .ok_or(ReasoningError::NoJsonFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn extracts_from_json_fence() {
        let text = "Here is my decision:\n```json\n{\"action\": \"hold\"}\n```\nGood luck.";
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["action"], "hold");
    }

    #[test]
    fn extracts_from_bare_fence() {
        let text = "```\n{\"confidence\": 7}\n```";
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["confidence"], 7);
    }

    #[test]
    fn extracts_raw_json_with_surrounding_prose() {
        let text = "Sure. {\"action\": \"close\", \"reason\": \"risk\"} Hope that helps!";
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["action"], "close");
    }

    #[test]
    fn missing_object_is_an_error() {
        assert!(matches!(
            extract_json_object("no structure here"),
            Err(ReasoningError::NoJsonFound)
        ));
    }

    #[test]
    fn malformed_object_is_an_error() {
        assert!(matches!(
            extract_json_object("{\"action\": }"),
            Err(ReasoningError::MalformedJson(_))
        ));
    }

    #[test]
    fn numeric_fields_coerce_strings_and_percents() {
        let value = extract_json_object(
            "{\"quantity\": \"0.5\", \"size\": \"25%\", \"stop_loss\": 101.5}",
        )
        .unwrap();
        assert_relative_eq!(field_f64(&value, "quantity").unwrap(), 0.5);
        assert_relative_eq!(field_f64(&value, "size").unwrap(), 25.0);
        assert_relative_eq!(field_f64(&value, "stop_loss").unwrap(), 101.5);
        assert!(field_f64(&value, "absent").is_err());
        assert_relative_eq!(field_f64_or(&value, "absent", 3.0), 3.0);
    }

    #[test]
    fn scores_clamp_to_ten() {
        let value = extract_json_object("{\"confidence\": \"15\", \"risk\": 6.4}").unwrap();
        assert_eq!(field_score(&value, "confidence").unwrap(), 10);
        assert_eq!(field_score(&value, "risk").unwrap(), 6);
    }

    #[test]
    fn scalar_parses_bare_and_embedded_numbers() {
        assert_relative_eq!(parse_scalar(" -0.4 ").unwrap(), -0.4);
        assert_relative_eq!(parse_scalar("Sentiment score: 0.75").unwrap(), 0.75);
        assert!(parse_scalar("no numbers").is_err());
    }
}
