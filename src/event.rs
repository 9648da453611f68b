//! Nostr event model.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wrapper for a Nostr tag expressed as an array of strings.
///
/// Tags appear as small arrays where the first element denotes the type and the
/// following elements hold data. Common examples include:
///
/// - `p` – references another author's public key
/// - `e` – links to another event ID
/// - `d` – unique identifier for addressable events
/// - `a` – coordinate `kind:pubkey:d` of an addressable event
///
/// Keys may repeat; lookups by key take the first match in order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag(pub Vec<String>);

impl Tag {
    pub fn new<S: Into<String>>(items: impl IntoIterator<Item = S>) -> Tag {
        Tag(items.into_iter().map(Into::into).collect())
    }

    pub fn key(&self) -> Option<&str> {
        self.get(0)
    }

    /// The first data element.
    pub fn value(&self) -> Option<&str> {
        self.get(1)
    }

    pub fn get(&self, i: usize) -> Option<&str> {
        self.0.get(i).map(|s| s.as_str())
    }
}

/// A signed Nostr event as fetched from a store.
///
/// ```json
/// {
///   "id": "aa11",
///   "pubkey": "bb22",
///   "kind": 1,
///   "created_at": 1700000000,
///   "tags": [["p", "cc33"], ["d", "slug"]],
///   "content": "hello",
///   "sig": "deadbeef"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    /// Event identifier (hex of SHA-256 hash).
    pub id: String,
    /// Author public key (hex).
    pub pubkey: String,
    pub kind: u32,
    /// Unix timestamp of creation.
    pub created_at: u64,
    #[serde(default)]
    pub tags: Vec<Tag>,
    /// May itself be JSON, see `parsed_content`.
    #[serde(default)]
    pub content: String,
    /// Schnorr signature over the event hash.
    #[serde(default)]
    pub sig: String,
}

/// An event before signing; the signer adds pubkey, id and sig.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnsignedEvent {
    pub kind: u32,
    pub created_at: u64,
    pub tags: Vec<Tag>,
    pub content: String,
}

/// The content of an event, parsed as JSON if possible.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    Json(Value),
    Raw(String),
}

impl Content {
    /// Value at `key` if the content is a JSON object.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Content::Json(Value::Object(m)) => m.get(key),
            _ => None
        }
    }
}

impl Event {
    pub fn from_json(s: &str) -> Result<Event> {
        Ok(serde_json::from_str(s)?)
    }

    /// Compact JSON, as carried in `hn-event-data` attributes.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("serializing plain data can't fail")
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).expect("serializing plain data can't fail")
    }

    /// Never fails: content that isn't valid JSON is returned
    /// verbatim.
    pub fn parsed_content(&self) -> Content {
        match serde_json::from_str(&self.content) {
            Ok(v) => Content::Json(v),
            Err(_) => Content::Raw(self.content.clone()),
        }
    }

    /// The first tag with key `key`.
    pub fn tag(&self, key: &str) -> Option<&Tag> {
        self.tags.iter().find(|t| t.key() == Some(key))
    }

    /// The first data element of every tag with key `key`, in order.
    pub fn tag_values(&self, key: &str) -> Vec<&str> {
        self.tags.iter()
            .filter(|t| t.key() == Some(key))
            .filter_map(|t| t.value())
            .collect()
    }

    pub fn d_tag(&self) -> Option<&str> {
        self.tag("d").and_then(|t| t.value())
    }

    /// Top-level attributes by name (`createdAt` is accepted as an
    /// alias for `created_at`); `tags` is given as JSON.
    pub fn attribute(&self, name: &str) -> Option<String> {
        match name {
            "id" => Some(self.id.clone()),
            "pubkey" => Some(self.pubkey.clone()),
            "kind" => Some(self.kind.to_string()),
            "created_at" | "createdAt" => Some(self.created_at.to_string()),
            "content" => Some(self.content.clone()),
            "sig" => Some(self.sig.clone()),
            "tags" => serde_json::to_string(&self.tags).ok(),
            _ => None
        }
    }

    /// Kinds 30000..40000 are addressable: only the newest per
    /// (pubkey, kind, d tag) counts.
    pub fn is_addressable(&self) -> bool {
        (30000..40000).contains(&self.kind)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Event {
        Event::from_json(
            r#"{"id":"aa11","pubkey":"bb22","kind":30023,"created_at":1700000000,
                "tags":[["p","u1"],["d","slug"],["p","u2"],["t"]],
                "content":"{\"name\":\"Alice\",\"age\":3}","sig":"cc"}"#).unwrap()
    }

    #[test]
    fn t_tags() {
        let ev = sample();
        assert_eq!(ev.tag("p").unwrap().value(), Some("u1"));
        assert_eq!(ev.tag_values("p"), vec!["u1", "u2"]);
        assert_eq!(ev.tag_values("t"), Vec::<&str>::new());
        assert_eq!(ev.d_tag(), Some("slug"));
        assert!(ev.is_addressable());
    }

    #[test]
    fn t_content() {
        let ev = sample();
        let content = ev.parsed_content();
        assert_eq!(content.get("name"), Some(&Value::from("Alice")));
        let raw = Event { content: "{not json".into(), ..ev };
        assert_eq!(raw.parsed_content(), Content::Raw("{not json".into()));
        assert_eq!(raw.parsed_content().get("name"), None);
    }

    #[test]
    fn t_attribute() {
        let ev = sample();
        assert_eq!(ev.attribute("createdAt").as_deref(), Some("1700000000"));
        assert_eq!(ev.attribute("kind").as_deref(), Some("30023"));
        assert_eq!(ev.attribute("nope"), None);
    }

    #[test]
    fn t_json_roundtrip_with_defaults() {
        let ev = Event::from_json(r#"{"id":"a","pubkey":"b","kind":1,"created_at":5}"#).unwrap();
        assert_eq!(ev.content, "");
        assert!(ev.tags.is_empty());
        assert_eq!(Event::from_json(&ev.to_json()).unwrap(), ev);
    }
}
