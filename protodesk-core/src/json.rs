//! # JSON Formatting
//!
//! Pretty-printing and minification of user-typed JSON. A parse failure is reported in the
//! returned [`JsonFormatResult`] with the input echoed back untouched, so an editor can keep
//! showing what the user wrote.
use serde::Serialize;
use serde_json::Value;
use serde_json::ser::{PrettyFormatter, Serializer};

pub const DEFAULT_INDENT: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JsonFormatResult {
    pub success: bool,
    pub formatted: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JsonFormatResult {
    fn unchanged(input: &str) -> Self {
        Self {
            success: true,
            formatted: input.to_string(),
            error: None,
        }
    }

    fn failed(input: &str, error: impl ToString) -> Self {
        Self {
            success: false,
            formatted: input.to_string(),
            error: Some(error.to_string()),
        }
    }
}

/// Re-indents `input` with `indent` spaces per level.
///
/// Blank input is returned as-is and counts as a success.
pub fn format_json(input: &str, indent: usize) -> JsonFormatResult {
    if input.trim().is_empty() {
        return JsonFormatResult::unchanged(input);
    }

    let value: Value = match serde_json::from_str(input) {
        Ok(value) => value,
        Err(err) => return JsonFormatResult::failed(input, err),
    };

    let indent = " ".repeat(indent);
    let mut out = Vec::new();
    let mut serializer =
        Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(indent.as_bytes()));

    if let Err(err) = value.serialize(&mut serializer) {
        return JsonFormatResult::failed(input, err);
    }

    match String::from_utf8(out) {
        Ok(formatted) => JsonFormatResult {
            success: true,
            formatted,
            error: None,
        },
        Err(err) => JsonFormatResult::failed(input, err),
    }
}

/// Strips all insignificant whitespace from `input`.
pub fn minify_json(input: &str) -> JsonFormatResult {
    if input.trim().is_empty() {
        return JsonFormatResult::unchanged(input);
    }

    match serde_json::from_str::<Value>(input) {
        Ok(value) => JsonFormatResult {
            success: true,
            formatted: value.to_string(),
            error: None,
        },
        Err(err) => JsonFormatResult::failed(input, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_input_is_returned_unchanged() {
        for input in ["", "   ", "\n\t "] {
            let result = format_json(input, DEFAULT_INDENT);
            assert!(result.success);
            assert_eq!(result.formatted, input);
            assert!(result.error.is_none());

            assert_eq!(minify_json(input).formatted, input);
        }
    }

    #[test]
    fn test_format_with_custom_indent() {
        let result = format_json(r#"{"a":[1,2]}"#, 4);

        assert!(result.success);
        assert_eq!(result.formatted, "{\n    \"a\": [\n        1,\n        2\n    ]\n}");
    }

    #[test]
    fn test_minify() {
        let result = minify_json("{ \"a\" : 1 ,\n \"b\": [ true ] }");

        assert!(result.success);
        assert_eq!(result.formatted, r#"{"a":1,"b":[true]}"#);
    }

    #[test]
    fn test_invalid_json_echoes_input() {
        let input = "{ not json";
        let result = format_json(input, DEFAULT_INDENT);

        assert!(!result.success);
        assert_eq!(result.formatted, input);
        assert!(result.error.is_some());

        let result = minify_json(input);
        assert!(!result.success);
        assert_eq!(result.formatted, input);
    }
}
