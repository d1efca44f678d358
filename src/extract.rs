//! JSON extraction from free-form provider output.
//!
//! Providers return chat text that is *expected* to contain a JSON object,
//! usually wrapped in Markdown code fences. Extraction is a two-stage
//! pipeline: (1) strip fence markers with a narrow regex, (2) typed parse.
//! A stage-2 failure is a [`GenerationError::Parse`], never a panic — the
//! caller decides whether to skip the item or surface the error.

use regex::Regex;
use serde::de::DeserializeOwned;
use std::sync::LazyLock;

use crate::error::GenerationError;

static OPENING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*```[A-Za-z0-9_-]*[ \t]*\r?\n?").unwrap());
static CLOSING_FENCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\r?\n?[ \t]*```\s*$").unwrap());

/// Remove a leading ```` ```json ```` (or bare ```` ``` ````) marker and a
/// trailing ```` ``` ```` marker. Text without fences passes through
/// unchanged, so the operation is idempotent.
pub fn strip_code_fences(raw: &str) -> String {
    let without_open = OPENING_FENCE.replace(raw, "");
    CLOSING_FENCE.replace(&without_open, "").into_owned()
}

/// Parse provider output into a typed payload after fence stripping.
pub fn parse_generated<T: DeserializeOwned>(raw: &str) -> Result<T, GenerationError> {
    let cleaned = strip_code_fences(raw);
    serde_json::from_str(cleaned.trim()).map_err(|e| GenerationError::Parse {
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Entry {
        twi: String,
    }

    #[test]
    fn fenced_and_bare_payloads_parse_identically() {
        let bare: Entry = parse_generated("{\"twi\":\"X\"}").unwrap();
        let fenced: Entry = parse_generated("```json\n{\"twi\":\"X\"}\n```").unwrap();
        assert_eq!(bare, fenced);
    }

    #[test]
    fn fence_without_language_tag_is_stripped() {
        let parsed: Entry = parse_generated("```\n{\"twi\":\"aane\"}\n```").unwrap();
        assert_eq!(parsed.twi, "aane");
    }

    #[test]
    fn stripping_is_idempotent_and_lossless() {
        let payload = "{\"twi\":\"nsuo\"}";
        let once = strip_code_fences(payload);
        let twice = strip_code_fences(&once);
        assert_eq!(once, payload);
        assert_eq!(twice, payload);

        let fenced = format!("```json\n{}\n```", payload);
        let stripped = strip_code_fences(&fenced);
        assert_eq!(stripped, payload);
        assert_eq!(strip_code_fences(&stripped), payload);
    }

    #[test]
    fn surrounding_whitespace_is_tolerated() {
        let parsed: Entry = parse_generated("  ```json  \n{\"twi\":\"kasa\"}\n```  ").unwrap();
        assert_eq!(parsed.twi, "kasa");
    }

    #[test]
    fn invalid_json_becomes_a_typed_parse_error() {
        let err = parse_generated::<Entry>("```json\nthis is not json\n```").unwrap_err();
        assert!(matches!(err, GenerationError::Parse { .. }));
    }

    #[test]
    fn missing_required_field_becomes_a_typed_parse_error() {
        let err = parse_generated::<Entry>("{\"english\":\"water\"}").unwrap_err();
        assert!(matches!(err, GenerationError::Parse { .. }));
    }
}
