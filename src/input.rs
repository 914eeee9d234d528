//! Loosely typed stream inputs and the value inspection used in their
//! validation messages.

use serde_json::Value;

use crate::error::GlobError;
use crate::options::Options;

/// Byte inputs longer than this are shown truncated.
const MAX_INSPECTED_BYTES: usize = 50;

/// A glob pattern as handed to [`glob_stream`](crate::glob_stream).
///
/// Only text is a pattern. Bytes and non-string JSON values are accepted so
/// the mistake surfaces as a validation error at subscribe time.
#[derive(Debug, Clone, PartialEq)]
pub enum PatternInput {
    Text(String),
    Bytes(Vec<u8>),
    Value(Value),
}

impl PatternInput {
    pub(crate) fn validate(&self) -> Result<String, GlobError> {
        match self {
            Self::Text(s) if s.is_empty() => Err(GlobError::EmptyPattern),
            Self::Text(s) => Ok(s.clone()),
            Self::Value(Value::String(s)) => Self::Text(s.clone()).validate(),
            Self::Value(v) => Err(GlobError::InvalidPatternType(inspect(v))),
            Self::Bytes(b) => Err(GlobError::InvalidPatternType(inspect_bytes(b))),
        }
    }
}

impl From<&str> for PatternInput {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for PatternInput {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&String> for PatternInput {
    fn from(s: &String) -> Self {
        Self::Text(s.clone())
    }
}

impl From<&[u8]> for PatternInput {
    fn from(b: &[u8]) -> Self {
        Self::Bytes(b.to_vec())
    }
}

impl From<Vec<u8>> for PatternInput {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

impl From<Value> for PatternInput {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

/// Options as handed to [`GlobStream::with_options`](crate::GlobStream::with_options).
#[derive(Debug, Clone, PartialEq)]
pub enum OptionsInput {
    Typed(Options),
    Value(Value),
}

impl OptionsInput {
    pub(crate) fn validate(&self) -> Result<Options, GlobError> {
        match self {
            Self::Typed(opts) => {
                opts.check()?;
                Ok(opts.clone())
            }
            Self::Value(v) => Options::from_value(v),
        }
    }
}

impl From<Options> for OptionsInput {
    fn from(o: Options) -> Self {
        Self::Typed(o)
    }
}

impl From<Value> for OptionsInput {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

// ---------------------------------------------------------------------------
// Inspection
// ---------------------------------------------------------------------------

/// Render a value the way it appears in validation messages:
/// `'text'`, `[ 1, 2 ]`, `{ a: true }`.
pub(crate) fn inspect(value: &Value) -> String {
    match value {
        Value::Null => "null".into(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "\\'")),
        Value::Array(items) if items.is_empty() => "[]".into(),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(inspect).collect();
            format!("[ {} ]", inner.join(", "))
        }
        Value::Object(map) if map.is_empty() => "{}".into(),
        Value::Object(map) => {
            let inner: Vec<String> = map.iter().map(|(k, v)| format!("{k}: {}", inspect(v))).collect();
            format!("{{ {} }}", inner.join(", "))
        }
    }
}

/// Type name plus inspected value, e.g. `an array [ 1, 2 ]`.
pub(crate) fn describe(value: &Value) -> String {
    let kind = match value {
        Value::Null => return "null".into(),
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    };
    format!("{kind} {}", inspect(value))
}

fn inspect_bytes(bytes: &[u8]) -> String {
    let shown: Vec<String> = bytes
        .iter()
        .take(MAX_INSPECTED_BYTES)
        .map(|b| format!("{b:02x}"))
        .collect();
    let mut out = format!("<Buffer {}", shown.join(" "));
    if bytes.len() > MAX_INSPECTED_BYTES {
        out.push_str(&format!(" ... {} more bytes", bytes.len() - MAX_INSPECTED_BYTES));
    }
    out.push('>');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn bytes_are_never_a_pattern() {
        let err = PatternInput::from(&b"hi"[..]).validate().unwrap_err();
        assert_eq!(err.to_string(), "Expected a glob pattern string, but got <Buffer 68 69>.");
    }

    #[test]
    fn long_byte_inputs_are_truncated() {
        let text = inspect_bytes(&[0u8; 52]);
        assert!(text.ends_with(" ... 2 more bytes>"), "{text}");
    }

    #[test]
    fn empty_text_is_rejected() {
        let err = PatternInput::from("").validate().unwrap_err();
        assert!(matches!(err, GlobError::EmptyPattern));
    }

    #[test]
    fn json_strings_are_patterns() {
        assert_eq!(PatternInput::from(json!("*.rs")).validate().unwrap(), "*.rs");
        let err = PatternInput::from(json!(42)).validate().unwrap_err();
        assert_eq!(err.to_string(), "Expected a glob pattern string, but got 42.");
    }

    #[rstest]
    #[case(json!(null), "null")]
    #[case(json!("it's"), "a string 'it\\'s'")]
    #[case(json!([1, 2]), "an array [ 1, 2 ]")]
    #[case(json!([]), "an array []")]
    #[case(json!({ "a": true }), "an object { a: true }")]
    fn describes_values(#[case] value: Value, #[case] expected: &str) {
        assert_eq!(describe(&value), expected);
    }
}
