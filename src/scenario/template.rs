//! Message actions and templates.

use std::fmt::{self, Write as _};
use std::str::FromStr;

use serde::Serialize;
use serde_json::Value;

use super::fields::Fields;
use crate::error::{Result, SipError};
use crate::sip::{Header, MessageKind, SipMessage, StartLine};

/// What the realizer does with a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Build, encode and transmit the message
    Send,
    /// Receive a message and compare it against the template
    Recv,
}

impl Action {
    /// Get descriptive name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Send => "send",
            Self::Recv => "recv",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Action {
    type Err = SipError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "send" => Ok(Self::Send),
            "recv" => Ok(Self::Recv),
            _ => Err(SipError::ProtocolMismatch(format!("unknown action: {s}"))),
        }
    }
}

/// Template of one message: intro fields, headers and content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    /// Intro line fields
    pub start: StartLine,
    /// Headers in order
    pub headers: Vec<Header>,
    /// Body, empty when absent
    pub content: String,
}

impl MessageTemplate {
    /// Message kind
    pub fn kind(&self) -> MessageKind {
        match self.start {
            StartLine::Request { .. } => MessageKind::Request,
            StartLine::Response { .. } => MessageKind::Response,
        }
    }

    /// Build the concrete message.
    pub fn build(&self) -> SipMessage {
        SipMessage {
            start: self.start.clone(),
            headers: self.headers.clone(),
            body: self.content.clone(),
        }
    }
}

/// One scripted step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageAction {
    /// Send or receive
    pub action: Action,
    /// Message template
    pub template: MessageTemplate,
}

impl MessageAction {
    /// Validate `messages[index]`.
    pub(crate) fn parse(value: &Value, index: usize) -> Result<Self> {
        let fields = Fields::object(value, format!("messages[{index}]"))?;

        let kind = fields.str("type")?;
        let action: Action = fields.str("action")?.parse()?;
        let version = fields.token("version")?.to_string();

        let start = match kind {
            "request" => StartLine::Request {
                method: fields.token("method")?.to_string(),
                uri: fields.token("uri")?.to_string(),
                version,
            },
            "response" => {
                // A peer reads an intro line as a response only when its
                // first token carries a '/'.
                if !version.contains('/') {
                    return Err(SipError::field(
                        fields.path("version"),
                        "must be a protocol version like SIP/2.0",
                    ));
                }
                StartLine::Response {
                    version,
                    code: fields.int("code")?,
                    reason: fields.token("reason")?.to_string(),
                }
            },
            other => {
                return Err(SipError::ProtocolMismatch(format!(
                    "unknown message type: {other}"
                )))
            },
        };

        let mut headers = Vec::new();
        for (i, header) in fields.opt_array("headers")?.iter().enumerate() {
            let header = Fields::object(header, fields.path(&format!("headers[{i}]")))?;
            let name = header.token("name")?;
            if name.contains(crate::sip::SPLITTER) {
                return Err(SipError::field(header.path("name"), "must not contain ':'"));
            }
            headers.push(Header::new(name, header.line("value")?.trim()));
        }

        let content = fields.opt_str("content")?.unwrap_or_default().to_string();

        Ok(Self {
            action,
            template: MessageTemplate {
                start,
                headers,
                content,
            },
        })
    }

    pub(crate) fn describe_into(&self, out: &mut String) {
        let _ = writeln!(out, "### {} MESSAGE ###", self.template.kind().name().to_lowercase());
        match &self.template.start {
            StartLine::Request {
                method,
                uri,
                version,
            } => {
                describe_field(out, "version", version);
                describe_field(out, "action", self.action.name());
                describe_field(out, "method", method);
                describe_field(out, "uri", uri);
            },
            StartLine::Response {
                version,
                code,
                reason,
            } => {
                describe_field(out, "version", version);
                describe_field(out, "action", self.action.name());
                describe_field(out, "code", &code.to_string());
                describe_field(out, "reason", reason);
            },
        }
        for header in &self.template.headers {
            let _ = writeln!(out, "$$$ {} $$$", header.name);
            let _ = writeln!(out, "{}", header.value);
        }
        describe_field(out, "content", &self.template.content);
        out.push_str("###\n");
    }
}

pub(crate) fn describe_field(out: &mut String, name: &str, value: &str) {
    let _ = writeln!(out, "--- {name} ---");
    let _ = writeln!(out, "{value}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_template_intro() {
        let value = json!({
            "type": "response",
            "action": "send",
            "version": "SIP/2.0",
            "code": 200,
            "reason": "OK"
        });
        let action = MessageAction::parse(&value, 0).unwrap();
        assert_eq!(action.action, Action::Send);

        let wire = action.template.build().encode();
        assert!(wire.starts_with("SIP/2.0 200 OK\r\n"));
    }

    #[test]
    fn test_response_version_needs_slash() {
        let value = json!({
            "type": "response",
            "action": "send",
            "version": "2.0",
            "code": 200,
            "reason": "OK"
        });
        match MessageAction::parse(&value, 3) {
            Err(SipError::InvalidField { field, .. }) => assert_eq!(field, "messages[3].version"),
            other => panic!("expected field error, got {other:?}"),
        }

        // Requests carry the version last, so any token is accepted.
        let value = json!({
            "type": "request",
            "action": "send",
            "version": "2.0",
            "method": "OPTIONS",
            "uri": "sip:127.0.0.1"
        });
        assert!(MessageAction::parse(&value, 0).is_ok());
    }

    #[test]
    fn test_unknown_type_and_action() {
        let value = json!({ "type": "notify", "action": "send", "version": "SIP/2.0" });
        assert!(matches!(
            MessageAction::parse(&value, 0),
            Err(SipError::ProtocolMismatch(_))
        ));

        let value = json!({ "type": "request", "action": "wait", "version": "SIP/2.0" });
        assert!(matches!(
            MessageAction::parse(&value, 0),
            Err(SipError::ProtocolMismatch(_))
        ));
    }

    #[test]
    fn test_header_errors_name_path() {
        let value = json!({
            "type": "request",
            "action": "send",
            "version": "SIP/2.0",
            "method": "INVITE",
            "uri": "sip:bob@127.0.0.1",
            "headers": [{ "name": "CSeq", "value": "1" }, { "name": "Via" }]
        });
        match MessageAction::parse(&value, 3) {
            Err(SipError::InvalidField { field, .. }) => {
                assert_eq!(field, "messages[3].headers[1].value");
            },
            other => panic!("expected field error, got {other:?}"),
        }
    }

    #[test]
    fn test_code_must_be_integer() {
        let value = json!({
            "type": "response",
            "action": "recv",
            "version": "SIP/2.0",
            "code": "200",
            "reason": "OK"
        });
        match MessageAction::parse(&value, 0) {
            Err(SipError::InvalidField { field, reason }) => {
                assert_eq!(field, "messages[0].code");
                assert!(reason.contains("integer"));
            },
            other => panic!("expected field error, got {other:?}"),
        }
    }
}
