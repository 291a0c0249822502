//! Non-streaming body collection
//!
//! Unlike the streaming path, a malformed line here fails the whole call: a
//! partial non-streaming result is indistinguishable from a complete one and
//! would silently corrupt output.

use serde_json::Value;

use crate::error::{GatewayError, Result};

/// Concatenate the content fields of a newline-delimited JSON body
///
/// Blank lines are skipped, and so is any parsed line without a string
/// `content`. A line that fails to parse as JSON aborts collection with
/// [`GatewayError::MalformedUpstreamBody`] and no partial result.
pub fn collect_content(body: &str) -> Result<String> {
    let mut out = String::new();

    for (idx, line) in body.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let parsed: Value = serde_json::from_str(trimmed).map_err(|e| {
            GatewayError::MalformedUpstreamBody {
                line: idx + 1,
                reason: e.to_string(),
            }
        })?;

        if let Some(content) = parsed.get("content").and_then(|c| c.as_str()) {
            out.push_str(content);
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_concatenates_in_order() {
        let body = "{\"content\":\"x\"}\n{\"content\":\"y\"}\n";
        assert_eq!(collect_content(body).unwrap(), "xy");
    }

    #[test]
    fn test_collect_skips_blank_lines() {
        let body = "{\"content\":\"a\"}\n\n   \n{\"content\":\"b\"}\n";
        assert_eq!(collect_content(body).unwrap(), "ab");
    }

    #[test]
    fn test_collect_tolerates_missing_content_field() {
        let body = "{\"kind\":\"meta\"}\n{\"content\":\"z\"}\n";
        assert_eq!(collect_content(body).unwrap(), "z");
    }

    #[test]
    fn test_collect_skips_non_string_content() {
        let body = "{\"content\":5}\n{\"content\":null}\n{\"content\":\"x\"}\n";
        assert_eq!(collect_content(body).unwrap(), "x");
    }

    #[test]
    fn test_collect_fails_atomically_on_malformed_line() {
        let body = "{\"content\":\"x\"}\n{bad json}\n{\"content\":\"y\"}\n";
        match collect_content(body) {
            Err(GatewayError::MalformedUpstreamBody { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected MalformedUpstreamBody, got {:?}", other),
        }
    }

    #[test]
    fn test_collect_empty_body() {
        assert_eq!(collect_content("").unwrap(), "");
    }
}
