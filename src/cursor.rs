//! The page location, carrying the ids of records last shown by named
//! queries.
//!
//! A cursor entry is the query parameter `hn.<logical id>=<event id>`;
//! everything else in the URL is kept as is.

use std::fmt;
use pct_str::{InvalidPctString, PctStr, PctString, URIReserved};

pub const CURSOR_PREFIX: &str = "hn.";

pub fn url_encode(s: &str) -> String {
    PctString::encode(s.chars(), URIReserved).to_string()
}

/// Owns its message, unlike `InvalidPctString<&str>`, so it can be
/// kept in errors that outlive the input.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid percent encoding: {0}")]
pub struct UrlDecodingError(String);

impl From<InvalidPctString<&str>> for UrlDecodingError {
    fn from(e: InvalidPctString<&str>) -> Self {
        UrlDecodingError(e.to_string())
    }
}

pub fn url_decode(s: &str) -> Result<String, UrlDecodingError> {
    Ok(PctStr::new(s)?.decode())
}

/// The cursor key for a logical id (a leading `#` is ignored).
fn cursor_key(id: &str) -> String {
    format!("{CURSOR_PREFIX}{}", id.trim_start_matches('#'))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageLocation {
    /// Everything before the `?`.
    pub base: String,
    /// Decoded query parameters, in order.
    pub params: Vec<(String, String)>,
    /// Without the `#`.
    pub fragment: Option<String>,
}

impl PageLocation {
    pub fn parse(url: &str) -> Result<PageLocation, UrlDecodingError> {
        let (rest, fragment) = match url.split_once('#') {
            Some((r, f)) => (r, Some(f.to_string())),
            None => (url, None)
        };
        let (base, query) = match rest.split_once('?') {
            Some((b, q)) => (b, q),
            None => (rest, "")
        };
        let mut params = Vec::new();
        for part in query.split('&').filter(|p| !p.is_empty()) {
            let (k, v) = part.split_once('=').unwrap_or((part, ""));
            params.push((url_decode(k)?, url_decode(v)?));
        }
        Ok(PageLocation { base: base.to_string(), params, fragment })
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Replaces the first parameter `key`, or appends one.
    pub fn set_param(&mut self, key: &str, value: &str) {
        match self.params.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value.to_string(),
            None => self.params.push((key.to_string(), value.to_string())),
        }
    }

    pub fn cursor_get(&self, id: &str) -> Option<&str> {
        self.param(&cursor_key(id))
    }

    pub fn cursor_set(&mut self, id: &str, event_id: &str) {
        self.set_param(&cursor_key(id), event_id)
    }

    /// All cursor entries as (logical id, event id).
    pub fn cursors(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().filter_map(|(k, v)| {
            Some((k.strip_prefix(CURSOR_PREFIX)?, v.as_str()))
        })
    }

    pub fn to_url(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base)?;
        for (i, (k, v)) in self.params.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{sep}{}={}", url_encode(k), url_encode(v))?;
        }
        if let Some(frag) = &self.fragment {
            write!(f, "#{frag}")?;
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn t_parse() {
        let loc = PageLocation::parse("https://x.org/p?a=1&b=two%20words&flag#top").unwrap();
        assert_eq!(loc.base, "https://x.org/p");
        assert_eq!(loc.param("b"), Some("two words"));
        assert_eq!(loc.param("flag"), Some(""));
        assert_eq!(loc.fragment.as_deref(), Some("top"));
        assert!(PageLocation::parse("/p?a=%zz").is_err());
    }

    #[test]
    fn t_cursor() {
        let mut loc = PageLocation::parse("/page?x=1#frag").unwrap();
        assert_eq!(loc.cursor_get("results"), None);
        loc.cursor_set("#results", "abc123");
        assert_eq!(loc.cursor_get("results"), Some("abc123"));
        loc.cursor_set("results", "def");
        assert_eq!(loc.cursor_get("#results"), Some("def"));
        assert_eq!(loc.cursors().collect::<Vec<_>>(), vec![("results", "def")]);

        let url = loc.to_url();
        assert_eq!(url, "/page?x=1&hn.results=def#frag");
        let back = PageLocation::parse(&url).unwrap();
        assert_eq!(back, loc);
    }

    #[test]
    fn t_encoding() {
        let mut loc = PageLocation::parse("/").unwrap();
        loc.cursor_set("a&b", "v=1 2");
        let back = PageLocation::parse(&loc.to_url()).unwrap();
        assert_eq!(back.cursor_get("a&b"), Some("v=1 2"));
    }
}
