//! SIP-like text message codec.
//!
//! # Wire Format
//!
//! ```text
//! <intro-token1> <intro-token2> <intro-token3>\r\n
//! <header-name>: <header-value>\r\n
//! ...
//! \r\n
//! <body>\r\n
//! ```
//!
//! | Kind     | Intro line                      | Example                            |
//! |----------|---------------------------------|------------------------------------|
//! | Request  | `METHOD URI VERSION`            | `INVITE sip:bob@host SIP/2.0`      |
//! | Response | `VERSION CODE REASON`           | `SIP/2.0 200 OK`                   |
//!
//! # Decoding Rules
//!
//! - The first non-empty line is the intro and must split into exactly
//!   three whitespace-separated tokens, otherwise the input is not
//!   decodable ([`decode`] returns `None`).
//! - Header lines run up to the first blank line and split on the first
//!   colon only; lines without a colon are skipped.
//! - Everything after the blank line is the body, rejoined with `\r\n`.
//!   The trailing separator added by the encoder is not part of the body.
//!
//! # Usage
//!
//! ```rust,ignore
//! use sipsock::sip::{self, SipMessage};
//!
//! let invite = SipMessage::request("INVITE", "sip:bob@127.0.0.1", "SIP/2.0")
//!     .with_header("CSeq", "1")
//!     .with_body("v=0");
//!
//! let wire = invite.encode();
//! let decoded = sip::decode(&wire).expect("well-formed");
//! assert_eq!(decoded, invite);
//! ```

mod header;
mod message;

pub use header::{Header, SPLITTER};
pub use message::{MessageKind, SipMessage, StartLine};

/// Line separator on the wire.
pub const NEW_LINE: &str = "\r\n";

/// Default protocol version.
pub const SIP_VERSION: &str = "SIP/2.0";

/// Decode wire text into a message, or `None` if it is not decodable.
pub fn decode(content: &str) -> Option<SipMessage> {
    SipMessage::decode(content)
}

/// Encode a message to wire text.
pub fn encode(message: &SipMessage) -> String {
    message.encode()
}
