//! Form fields, query parameters and the bodies built from them.
//!
//! # Design
//! `FieldSet` keeps keys unique and preserves insertion order so multipart
//! part order and query-string order are deterministic. Setting an existing
//! key overwrites its value in place; the key keeps its original position.

use uuid::Uuid;

use crate::codec;

/// Ordered name/value pairs with unique names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSet {
    fields: Vec<(String, String)>,
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `key`, or overwrite its value if already present.
    pub fn set(&mut self, key: &str, value: &str) {
        match self.fields.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.to_string(),
            None => self.fields.push((key.to_string(), value.to_string())),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn clear(&mut self) {
        self.fields.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Render a `multipart/form-data` body (RFC 7578) delimited by `boundary`.
    pub fn to_multipart(&self, boundary: &str) -> String {
        let mut body = String::new();
        for (key, value) in self.iter() {
            body.push_str("--");
            body.push_str(boundary);
            body.push_str("\r\n");
            body.push_str("Content-Disposition: form-data; name=\"");
            body.push_str(key);
            body.push_str("\"\r\n\r\n");
            body.push_str(value);
            body.push_str("\r\n");
        }
        body.push_str("--");
        body.push_str(boundary);
        body.push_str("--\r\n");
        body
    }

    /// Render an `application/x-www-form-urlencoded` body. Keys and values are
    /// encoded individually so the `=` and `&` delimiters survive.
    pub fn to_urlencoded(&self) -> String {
        self.iter()
            .map(|(k, v)| format!("{}={}", codec::encode(k.as_bytes()), codec::encode(v.as_bytes())))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Append the fields to `base` as a query string.
    ///
    /// Returns an empty string when there are no fields, meaning "use `base`
    /// unchanged". Keys and values are inserted verbatim, not percent-encoded.
    pub fn decorate_url(&self, base: &str) -> String {
        if self.is_empty() {
            return String::new();
        }
        let query = self
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        format!("{base}?{query}")
    }
}

/// A fresh multipart boundary token: a random v4 UUID in hyphenated form.
pub fn new_boundary() -> String {
    Uuid::new_v4().to_string()
}
