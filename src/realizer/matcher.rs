//! Expected-vs-received comparison for `recv` actions.
//!
//! A received message matches its template when:
//! - the kind is the same;
//! - every intro field is equal;
//! - every template header is present in the received message with an
//!   equal value (names compared case-insensitively, order ignored, extra
//!   received headers allowed);
//! - the body is equal line by line, unless the template body is empty.
//!   Line endings are not compared: the codec re-joins body lines with CRLF,
//!   so a template written with `\n` still matches its own encoding.

use crate::scenario::MessageTemplate;
use crate::sip::{SipMessage, StartLine};

/// Compare `actual` against `template`. Returns every mismatch found.
pub fn compare(template: &MessageTemplate, actual: &SipMessage) -> Vec<String> {
    let mut mismatches = Vec::new();

    match (&template.start, &actual.start) {
        (
            StartLine::Request {
                method,
                uri,
                version,
            },
            StartLine::Request {
                method: got_method,
                uri: got_uri,
                version: got_version,
            },
        ) => {
            check(&mut mismatches, "method", method, got_method);
            check(&mut mismatches, "uri", uri, got_uri);
            check(&mut mismatches, "version", version, got_version);
        },
        (
            StartLine::Response {
                version,
                code,
                reason,
            },
            StartLine::Response {
                version: got_version,
                code: got_code,
                reason: got_reason,
            },
        ) => {
            check(&mut mismatches, "version", version, got_version);
            check(&mut mismatches, "code", code, got_code);
            check(&mut mismatches, "reason", reason, got_reason);
        },
        _ => {
            mismatches.push(format!(
                "kind: expected {}, got {}",
                template.kind(),
                actual.kind()
            ));
            return mismatches;
        },
    }

    for expected in &template.headers {
        let mut values = actual.headers_named(&expected.name).peekable();
        if values.peek().is_none() {
            mismatches.push(format!("header {}: missing", expected.name));
        } else if !values.any(|value| value == expected.value) {
            mismatches.push(format!(
                "header {}: no value equal to {:?}",
                expected.name, expected.value
            ));
        }
    }

    if !template.content.is_empty() && !template.content.lines().eq(actual.body.lines()) {
        mismatches.push(format!(
            "content: expected {:?}, got {:?}",
            template.content, actual.body
        ));
    }

    mismatches
}

fn check<T: PartialEq + std::fmt::Display>(out: &mut Vec<String>, field: &str, expected: &T, got: &T) {
    if expected != got {
        out.push(format!("{field}: expected {expected}, got {got}"));
    }
}
