//! Message header lines.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Name/value separator on the wire.
pub const SPLITTER: char = ':';

/// One `name: value` header. Names are not required to be unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Header name, case preserved.
    pub name: String,
    /// Header value, surrounding whitespace trimmed.
    pub value: String,
}

impl Header {
    /// Create a header.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Parse a header line, splitting on the first colon only.
    ///
    /// Returns `None` for a line without a colon.
    pub fn parse(line: &str) -> Option<Self> {
        let (name, value) = line.split_once(SPLITTER)?;
        Some(Self::new(name.trim(), value.trim()))
    }

    /// Case-insensitive name comparison.
    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{} {}", self.name, SPLITTER, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_splits_on_first_colon() {
        let header = Header::parse("X: a:b:c").unwrap();
        assert_eq!(header.name, "X");
        assert_eq!(header.value, "a:b:c");
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let header = Header::parse("  Via :   SIP/2.0/UDP 10.0.0.1:5060  ").unwrap();
        assert_eq!(header.name, "Via");
        assert_eq!(header.value, "SIP/2.0/UDP 10.0.0.1:5060");
    }

    #[test]
    fn test_parse_without_colon() {
        assert!(Header::parse("not a header").is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(Header::new("CSeq", "1 INVITE").to_string(), "CSeq: 1 INVITE");
        assert!(Header::new("Call-ID", "x").is_named("call-id"));
    }
}
