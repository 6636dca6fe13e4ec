//! Field-by-field validation of a parsed scenario document.
//!
//! Every accessor reports failures as [`SipError::InvalidField`] carrying the
//! dotted path of the field, e.g. `messages[2].code`.

use serde_json::{Map, Value};

use crate::error::{Result, SipError};

/// A JSON object together with its path in the document.
pub(crate) struct Fields<'a> {
    path: String,
    map: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    /// View `value` at `path` as an object.
    pub fn object(value: &'a Value, path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        match value.as_object() {
            Some(map) => Ok(Self { path, map }),
            None => Err(SipError::field(display_path(&path), "must be an object")),
        }
    }

    /// Dotted path of `key` inside this object.
    pub fn path(&self, key: &str) -> String {
        if self.path.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", self.path, key)
        }
    }

    fn get(&self, key: &str) -> Option<&'a Value> {
        self.map.get(key).filter(|v| !v.is_null())
    }

    /// Required value of any type.
    pub fn require(&self, key: &str) -> Result<&'a Value> {
        self.get(key)
            .ok_or_else(|| SipError::field(self.path(key), "is required"))
    }

    /// Required string.
    pub fn str(&self, key: &str) -> Result<&'a str> {
        self.require(key)?
            .as_str()
            .ok_or_else(|| SipError::field(self.path(key), "must be a string"))
    }

    /// Optional string.
    pub fn opt_str(&self, key: &str) -> Result<Option<&'a str>> {
        match self.get(key) {
            Some(_) => self.str(key).map(Some),
            None => Ok(None),
        }
    }

    /// Required non-empty string without whitespace.
    pub fn token(&self, key: &str) -> Result<&'a str> {
        let value = self.str(key)?;
        if value.is_empty() {
            return Err(SipError::field(self.path(key), "must not be empty"));
        }
        if value.chars().any(char::is_whitespace) {
            return Err(SipError::field(self.path(key), "must not contain whitespace"));
        }
        Ok(value)
    }

    /// Required string that fits on one line.
    pub fn line(&self, key: &str) -> Result<&'a str> {
        let value = self.str(key)?;
        if value.contains(['\r', '\n']) {
            return Err(SipError::field(self.path(key), "must not contain line breaks"));
        }
        Ok(value)
    }

    /// Required integer converted to `T`.
    pub fn int<T: TryFrom<u64>>(&self, key: &str) -> Result<T> {
        let value = self.require(key)?;
        let raw = value.as_u64().ok_or_else(|| {
            let reason = if value.is_number() {
                "must be a non-negative integer"
            } else {
                "must be an integer"
            };
            SipError::field(self.path(key), reason)
        })?;
        T::try_from(raw).map_err(|_| SipError::field(self.path(key), format!("is out of range: {raw}")))
    }

    /// Optional integer converted to `T`.
    pub fn opt_int<T: TryFrom<u64>>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            Some(_) => self.int(key).map(Some),
            None => Ok(None),
        }
    }

    /// Required array.
    pub fn array(&self, key: &str) -> Result<&'a [Value]> {
        self.require(key)?
            .as_array()
            .map(Vec::as_slice)
            .ok_or_else(|| SipError::field(self.path(key), "must be a list"))
    }

    /// Optional array, empty when absent.
    pub fn opt_array(&self, key: &str) -> Result<&'a [Value]> {
        match self.get(key) {
            Some(_) => self.array(key),
            None => Ok(&[]),
        }
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "<root>"
    } else {
        path
    }
}
