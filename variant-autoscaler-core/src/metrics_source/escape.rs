//! Parameter escaping for templated query rendering.
//!
//! Every value interpolated into a query template MUST pass through
//! [`escape_label_value`] first; this is the only defense against a
//! variant/namespace/model name containing a quote or backslash corrupting
//! the rendered query. Namespace values carry an additional character-class
//! restriction since they also appear unescaped in some back-ends' label
//! matchers.

use thiserror::Error;

/// A value failed the additional restriction [`validate_namespace`] applies
/// on top of escaping.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid namespace value: {0}")]
pub struct EscapeError(pub String);

/// Escapes `value` for safe interpolation inside a double-quoted label
/// value in a rendered query: backslashes are doubled first, then double
/// quotes are escaped, so the result can never terminate the surrounding
/// quotes or introduce a stray escape sequence.
///
/// Order matters: escaping quotes before backslashes would double-escape
/// the backslash just inserted in front of each quote.
pub fn escape_label_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Validates that `namespace` matches `[a-zA-Z0-9_-]+`, as required before
/// substitution into a query template. Returns the validated value
/// unchanged so call sites can chain it directly into rendering.
pub fn validate_namespace(namespace: &str) -> Result<&str, EscapeError> {
    if !namespace.is_empty()
        && namespace
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        Ok(namespace)
    } else {
        Err(EscapeError(namespace.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_backslash_before_quote() {
        let escaped = escape_label_value(r#"a\b"c"#);
        assert_eq!(escaped, r#"a\\b\"c"#);
    }

    #[test]
    fn escapes_quote_only_value() {
        assert_eq!(escape_label_value(r#"""#), r#"\""#);
    }

    #[test]
    fn escapes_control_characters_unchanged_but_quotes_escaped() {
        let escaped = escape_label_value("line1\nline2\"");
        assert_eq!(escaped, "line1\nline2\\\"");
    }

    #[test]
    fn plain_value_is_unchanged() {
        assert_eq!(escape_label_value("llama-70b-a100"), "llama-70b-a100");
    }

    #[test]
    fn namespace_validation_accepts_expected_charset() {
        assert_eq!(validate_namespace("prod-llm_1").unwrap(), "prod-llm_1");
    }

    #[test]
    fn namespace_validation_rejects_injection_attempt() {
        assert!(validate_namespace("prod\" or 1=1 --").is_err());
        assert!(validate_namespace("").is_err());
        assert!(validate_namespace("prod/ns").is_err());
    }
}
