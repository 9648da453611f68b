//! Looking up a value in a record by field path.
//!
//! Paths are `<attribute>` (a top-level event attribute), `content.<key>`
//! (a key of the JSON content) and `tag.<name>[.<index>]`. Whatever
//! misses falls back to the first tag whose key is the whole path.

use serde_json::Value;

use crate::event::{Content, Event};

fn json_to_string(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(_) | Value::Number(_) | Value::Array(_) | Value::Object(_) =>
            Some(v.to_string()),
    }
}

fn direct(event: &Event, content: &Content, path: &str) -> Option<String> {
    let mut parts = path.splitn(3, '.');
    let first = parts.next()?;
    match (first, parts.next(), parts.next()) {
        (_, None, _) => event.attribute(first),
        ("content", Some(key), None) => content.get(key).and_then(json_to_string),
        ("tag", Some(name), index) => {
            let index = match index {
                None => 1,
                Some(i) => i.parse().ok()?,
            };
            event.tag(name)?.get(index).map(String::from)
        }
        _ => None
    }
}

/// The value at `path` in `event` (with `content` being its parsed
/// content), or None.
pub fn resolve(event: &Event, content: &Content, path: &str) -> Option<String> {
    direct(event, content, path).or_else(
        || event.tag(path)?.value().map(String::from))
}


#[cfg(test)]
mod tests {
    use super::*;

    fn ev(content: &str, tags: serde_json::Value) -> Event {
        Event::from_json(&serde_json::json!({
            "id": "i1", "pubkey": "pk", "kind": 1, "created_at": 1700000000,
            "tags": tags, "content": content,
        }).to_string()).unwrap()
    }

    fn r(e: &Event, path: &str) -> Option<String> {
        resolve(e, &e.parsed_content(), path)
    }

    #[test]
    fn t_attributes() {
        let e = ev("hello", serde_json::json!([["title", "T"], ["id", "shadowed"]]));
        assert_eq!(r(&e, "id").as_deref(), Some("i1"));
        assert_eq!(r(&e, "createdAt").as_deref(), Some("1700000000"));
        assert_eq!(r(&e, "content").as_deref(), Some("hello"));
        assert_eq!(r(&e, "title").as_deref(), Some("T"));
        assert_eq!(r(&e, "missing"), None);
    }

    #[test]
    fn t_content() {
        let e = ev(r#"{"name":"Bob","n":3,"ok":true,"list":[1,2],"nil":null}"#,
                   serde_json::json!([["p", "xyz"], ["content.nick", "bobby"], ["nick", "no"]]));
        assert_eq!(r(&e, "content.name").as_deref(), Some("Bob"));
        assert_eq!(r(&e, "content.n").as_deref(), Some("3"));
        assert_eq!(r(&e, "content.ok").as_deref(), Some("true"));
        assert_eq!(r(&e, "content.list").as_deref(), Some("[1,2]"));
        assert_eq!(r(&e, "content.nil"), None);
        assert_eq!(r(&e, "p").as_deref(), Some("xyz"));
        // the fallback tag key is the full path
        assert_eq!(r(&e, "content.nick").as_deref(), Some("bobby"));
    }

    #[test]
    fn t_raw_content() {
        let e = ev("just text", serde_json::json!([]));
        assert_eq!(r(&e, "content.name"), None);
    }

    #[test]
    fn t_tag_paths() {
        let e = ev("", serde_json::json!([["i", "a", "b"], ["i", "c"], ["x"]]));
        assert_eq!(r(&e, "tag.i").as_deref(), Some("a"));
        assert_eq!(r(&e, "tag.i.2").as_deref(), Some("b"));
        assert_eq!(r(&e, "tag.i.0").as_deref(), Some("i"));
        assert_eq!(r(&e, "tag.i.9"), None);
        assert_eq!(r(&e, "tag.x"), None);
        assert_eq!(r(&e, "tag.i.z"), None);
    }
}
