//! SIP-like messages: intro line, headers, body.

use std::fmt::{self, Write as _};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::header::Header;
use super::NEW_LINE;
use crate::error::SipError;

/// Message kind discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// `METHOD URI VERSION`
    Request,
    /// `VERSION CODE REASON`
    Response,
}

impl MessageKind {
    /// Get descriptive name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Request => "REQUEST",
            Self::Response => "RESPONSE",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The intro line, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StartLine {
    /// Request intro.
    Request {
        /// Method token (e.g. `INVITE`).
        method: String,
        /// Target URI.
        uri: String,
        /// Protocol version (e.g. `SIP/2.0`).
        version: String,
    },
    /// Response intro.
    Response {
        /// Protocol version.
        version: String,
        /// Status code.
        code: u16,
        /// Reason phrase.
        reason: String,
    },
}

impl StartLine {
    /// Classify and build from the three intro tokens.
    ///
    /// A response intro has a protocol version first and a numeric status
    /// code second; anything else is a request.
    fn from_tokens(first: &str, second: &str, third: &str) -> Self {
        match second.parse::<u16>() {
            Ok(code) if first.contains('/') => Self::Response {
                version: first.to_string(),
                code,
                reason: third.to_string(),
            },
            _ => Self::Request {
                method: first.to_string(),
                uri: second.to_string(),
                version: third.to_string(),
            },
        }
    }
}

impl fmt::Display for StartLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request {
                method,
                uri,
                version,
            } => write!(f, "{method} {uri} {version}"),
            Self::Response {
                version,
                code,
                reason,
            } => write!(f, "{version} {code} {reason}"),
        }
    }
}

/// A decoded or to-be-encoded message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SipMessage {
    /// Intro line.
    pub start: StartLine,
    /// Headers in wire order.
    pub headers: Vec<Header>,
    /// Opaque body.
    pub body: String,
}

impl SipMessage {
    /// Create a request with no headers and an empty body.
    pub fn request(
        method: impl Into<String>,
        uri: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            start: StartLine::Request {
                method: method.into(),
                uri: uri.into(),
                version: version.into(),
            },
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Create a response with no headers and an empty body.
    pub fn response(version: impl Into<String>, code: u16, reason: impl Into<String>) -> Self {
        Self {
            start: StartLine::Response {
                version: version.into(),
                code,
                reason: reason.into(),
            },
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Append a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_header(name, value);
        self
    }

    /// Set the body.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Append a header in place.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push(Header::new(name, value));
    }

    /// Get the message kind.
    pub fn kind(&self) -> MessageKind {
        match self.start {
            StartLine::Request { .. } => MessageKind::Request,
            StartLine::Response { .. } => MessageKind::Response,
        }
    }

    /// Protocol version from the intro line.
    pub fn version(&self) -> &str {
        match &self.start {
            StartLine::Request { version, .. } | StartLine::Response { version, .. } => version,
        }
    }

    /// First header with `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.is_named(name))
            .map(|h| h.value.as_str())
    }

    /// All values of headers named `name` (case-insensitive), in order.
    pub fn headers_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |h| h.is_named(name))
            .map(|h| h.value.as_str())
    }

    /// Serialize to wire text.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.start.to_string());
        out.push_str(NEW_LINE);
        for header in &self.headers {
            out.push_str(&header.to_string());
            out.push_str(NEW_LINE);
        }
        out.push_str(NEW_LINE);
        out.push_str(&self.body);
        out.push_str(NEW_LINE);
        out
    }

    /// Parse wire text. Returns `None` when the input is not decodable:
    /// empty input, or an intro line that is not exactly three tokens.
    pub fn decode(content: &str) -> Option<Self> {
        let mut lines = content.lines().skip_while(|line| line.trim().is_empty());

        let intro: Vec<&str> = lines.next()?.split_whitespace().collect();
        let [first, second, third] = intro.as_slice() else {
            return None;
        };
        let start = StartLine::from_tokens(first, second, third);

        let mut headers = Vec::new();
        for line in lines.by_ref() {
            if line.trim().is_empty() {
                break;
            }
            if let Some(header) = Header::parse(line) {
                headers.push(header);
            }
        }

        let body = lines.collect::<Vec<_>>().join(NEW_LINE);

        Some(Self {
            start,
            headers,
            body,
        })
    }

    /// Parse raw bytes received from a transport.
    pub fn decode_bytes(raw: &[u8]) -> crate::Result<Self> {
        let content = std::str::from_utf8(raw)
            .map_err(|e| SipError::Decode(format!("payload is not UTF-8: {e}")))?;
        content.parse()
    }

    /// Structured multi-line description.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "*** {} ***", self.kind());
        match &self.start {
            StartLine::Request {
                method,
                uri,
                version,
            } => {
                describe_field(&mut out, "METHOD", method);
                describe_field(&mut out, "URI", uri);
                describe_field(&mut out, "SIP VERSION", version);
            },
            StartLine::Response {
                version,
                code,
                reason,
            } => {
                describe_field(&mut out, "SIP VERSION", version);
                describe_field(&mut out, "RESPONSE CODE", &code.to_string());
                describe_field(&mut out, "REASON PHRASE", reason);
            },
        }
        let _ = writeln!(out, "--- HEADERS ({}) ---", self.headers.len());
        for header in &self.headers {
            let _ = writeln!(out, "--- {} ---", header.name);
            let _ = writeln!(out, "{}", header.value);
        }
        describe_field(&mut out, "CONTENT", &self.body);
        out.push_str("*** END ***\n");
        out
    }
}

fn describe_field(out: &mut String, name: &str, value: &str) {
    let _ = writeln!(out, "### {name} ###");
    let _ = writeln!(out, "{value}");
}

impl fmt::Display for SipMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for SipMessage {
    type Err = SipError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::decode(s).ok_or_else(|| {
            let intro = s.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
            SipError::Decode(format!("invalid sip content, intro line: {intro:?}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_request() {
        let msg = SipMessage::request("INVITE", "sip:bob@127.0.0.1", "SIP/2.0")
            .with_header("CSeq", "1")
            .with_body("v=0");

        assert_eq!(
            msg.encode(),
            "INVITE sip:bob@127.0.0.1 SIP/2.0\r\nCSeq: 1\r\n\r\nv=0\r\n"
        );
    }

    #[test]
    fn test_encode_response_intro() {
        let msg = SipMessage::response("SIP/2.0", 200, "OK");
        assert!(msg.encode().starts_with("SIP/2.0 200 OK\r\n"));
        assert_eq!(msg.kind(), MessageKind::Response);
    }

    #[test]
    fn test_decode_request() {
        let raw = "INVITE sip:bob@host SIP/2.0\r\nVia: SIP/2.0/TCP 10.0.0.1:5060\r\nCSeq: 102 INVITE\r\n\r\nHello, World!";
        let msg = SipMessage::decode(raw).unwrap();

        assert_eq!(msg.kind(), MessageKind::Request);
        assert_eq!(
            msg.start,
            StartLine::Request {
                method: "INVITE".to_string(),
                uri: "sip:bob@host".to_string(),
                version: "SIP/2.0".to_string(),
            }
        );
        assert_eq!(msg.headers.len(), 2);
        assert_eq!(msg.header("cseq"), Some("102 INVITE"));
        assert_eq!(msg.body, "Hello, World!");
    }

    #[test]
    fn test_decode_response() {
        let msg = SipMessage::decode("SIP/2.0 180 Ringing\r\nCSeq: 1\r\n\r\n").unwrap();
        assert_eq!(
            msg.start,
            StartLine::Response {
                version: "SIP/2.0".to_string(),
                code: 180,
                reason: "Ringing".to_string(),
            }
        );
        assert_eq!(msg.version(), "SIP/2.0");
    }

    #[test]
    fn test_decode_not_decodable() {
        assert!(SipMessage::decode("").is_none());
        assert!(SipMessage::decode("\r\n\r\n").is_none());
        assert!(SipMessage::decode("INVITE sip:bob@host").is_none());
        assert!(SipMessage::decode("SIP/2.0 404 Not Found\r\n\r\n").is_none());
        assert!(matches!(
            "garbage".parse::<SipMessage>(),
            Err(SipError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_skips_leading_blank_lines_and_bad_headers() {
        let msg = SipMessage::decode("\r\nBYE sip:a@b SIP/2.0\r\nno colon here\r\nTo: <sip:a@b>\r\n\r\n")
            .unwrap();
        assert_eq!(msg.headers, vec![Header::new("To", "<sip:a@b>")]);
    }

    #[test]
    fn test_duplicate_headers_keep_order() {
        let msg = SipMessage::decode("OPTIONS sip:x SIP/2.0\r\nVia: a\r\nTo: t\r\nVia: b\r\n\r\n")
            .unwrap();
        assert_eq!(msg.headers_named("via").collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(msg.headers[1].name, "To");
    }

    #[test]
    fn test_body_keeps_inner_and_trailing_blank_lines() {
        let msg = SipMessage::request("MESSAGE", "sip:x", "SIP/2.0").with_body("a\r\n\r\nb\r\n");
        let decoded = SipMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded.body, "a\r\n\r\nb\r\n");
    }

    #[test]
    fn test_roundtrip_empty_body() {
        let msg = SipMessage::response("SIP/2.0", 486, "Busy").with_header("Retry-After", "5");
        assert_eq!(SipMessage::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn test_decode_bytes_rejects_invalid_utf8() {
        assert!(matches!(
            SipMessage::decode_bytes(&[0xff, 0xfe, 0x00]),
            Err(SipError::Decode(_))
        ));
    }

    #[test]
    fn test_describe_lists_fields() {
        let text = SipMessage::request("INVITE", "sip:bob@host", "SIP/2.0")
            .with_header("CSeq", "1")
            .describe();
        assert!(text.starts_with("*** REQUEST ***"));
        assert!(text.contains("### METHOD ###\nINVITE"));
        assert!(text.contains("--- HEADERS (1) ---"));
    }
}
