//! Ordered property lists.
//!
//! Text form, one property per line:
//!
//! ```text
//! # optional comment
//! /version=1
//! .=<namespace>:<file>:<serial>
//! ```
//!
//! Keys are kept sorted. Backslash escapes `\\`, `\=`, `\#`, `\n` and `\r`
//! keep separators and line breaks out of the raw text.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{ObjectError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyList(BTreeMap<String, String>);

impl PropertyList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copy every property of `other` into `self`, replacing duplicates.
    pub fn extend(&mut self, other: &PropertyList) {
        for (k, v) in other.iter() {
            self.set(k, v);
        }
    }

    /// Parse the value stored under `key`. `Ok(None)` when absent.
    pub fn parse<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw.parse::<T>().map(Some).map_err(|_| ObjectError::MalformedProperties {
                line: 0,
                reason: format!("property {:?} has unparsable value {:?}", key, raw),
            }),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        self.encode_with_comment(None)
    }

    pub fn encode_with_comment(&self, comment: Option<&str>) -> Vec<u8> {
        let mut out = String::new();
        if let Some(comment) = comment {
            for line in comment.lines() {
                out.push_str("# ");
                out.push_str(line);
                out.push('\n');
            }
        }
        for (key, value) in &self.0 {
            escape_into(&mut out, key, true);
            out.push('=');
            escape_into(&mut out, value, false);
            out.push('\n');
        }
        out.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes).map_err(|e| ObjectError::MalformedProperties {
            line: 0,
            reason: format!("not UTF-8: {}", e),
        })?;

        let mut props = PropertyList::new();
        for (index, line) in text.split('\n').enumerate() {
            let line_no = index + 1;
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = split_line(line).map_err(|reason| ObjectError::MalformedProperties {
                line: line_no,
                reason,
            })?;
            props.set(key, value);
        }
        Ok(props)
    }
}

impl FromIterator<(String, String)> for PropertyList {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn escape_into(out: &mut String, text: &str, is_key: bool) {
    for (i, c) in text.chars().enumerate() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '=' if is_key => out.push_str("\\="),
            '#' if is_key && i == 0 => out.push_str("\\#"),
            c => out.push(c),
        }
    }
}

fn split_line(line: &str) -> std::result::Result<(String, String), String> {
    let mut key = String::new();
    let mut chars = line.chars();
    loop {
        match chars.next() {
            None => return Err("missing '='".to_string()),
            Some('=') => break,
            Some('\\') => key.push(unescape(chars.next())?),
            Some(c) => key.push(c),
        }
    }
    let mut value = String::new();
    while let Some(c) = chars.next() {
        match c {
            '\\' => value.push(unescape(chars.next())?),
            c => value.push(c),
        }
    }
    Ok((key, value))
}

fn unescape(c: Option<char>) -> std::result::Result<char, String> {
    match c {
        Some('\\') => Ok('\\'),
        Some('n') => Ok('\n'),
        Some('r') => Ok('\r'),
        Some('=') => Ok('='),
        Some('#') => Ok('#'),
        Some(other) => Err(format!("unknown escape '\\{}'", other)),
        None => Err("dangling escape".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_is_sorted() {
        let mut props = PropertyList::new();
        props.set("b", "2");
        props.set("a", "1");
        props.set("/version", "1");
        let text = String::from_utf8(props.encode()).unwrap();
        assert_eq!(text, "/version=1\na=1\nb=2\n");
    }

    #[test]
    fn test_awkward_keys_and_values() {
        let mut props = PropertyList::new();
        props.set("a=b", "x=y");
        props.set("#hash", "multi\nline\r\nvalue");
        props.set("back\\slash", "\\");
        props.set("empty", "");
        let decoded = PropertyList::decode(&props.encode()).unwrap();
        assert_eq!(decoded, props);
    }

    #[test]
    fn test_comments_and_blank_lines() {
        let decoded = PropertyList::decode(b"# Directory Contents v1\n\nname=value\r\n").unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded.get("name"), Some("value"));

        let mut props = PropertyList::new();
        props.set("k", "v");
        let encoded = props.encode_with_comment(Some("header"));
        assert!(encoded.starts_with(b"# header\n"));
        assert_eq!(PropertyList::decode(&encoded).unwrap(), props);
    }

    #[test]
    fn test_malformed_input() {
        let err = PropertyList::decode(b"ok=1\nno separator\n").unwrap_err();
        match err {
            ObjectError::MalformedProperties { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(PropertyList::decode(b"k=\\q").is_err());
        assert!(PropertyList::decode(&[0xff, b'=', b'1']).is_err());
    }

    #[test]
    fn test_parse_values() {
        let mut props = PropertyList::new();
        props.set("n", "42");
        props.set("bad", "x");
        assert_eq!(props.parse::<u64>("n").unwrap(), Some(42));
        assert_eq!(props.parse::<u64>("missing").unwrap(), None);
        assert!(props.parse::<u64>("bad").is_err());
    }
}
