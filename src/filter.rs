//! Turning the attributes of an `hn-query` declaration into a relay
//! filter.

use std::fmt;
use hn_dom::{HtmlDom, NodeId};
use hn_util::warn;
use serde::{Deserialize, Serialize};

use crate::error::HnError;
use crate::event::Event;
use crate::identifier::decode_identifier;

/// The attributes of an `hn-query` element relevant to fetching, as
/// declared (not normalized yet).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryDescriptor {
    pub kind: Option<String>,
    pub authors: Option<String>,
    pub limit: Option<String>,
    pub d: Option<String>,
    pub a: Option<String>,
    pub e: Option<String>,
    /// Tag key that fetched records must carry; applied after the
    /// fetch.
    pub require: Option<String>,
    /// Direct fetch by id; overrides everything else.
    pub event: Option<String>,
}

pub const QUERY_ATTRIBUTES: &[&str] = &["kind", "authors", "limit", "d", "a", "e", "require", "event"];

impl QueryDescriptor {
    pub fn from_attributes<'a>(attrs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut desc = QueryDescriptor::default();
        for (k, v) in attrs {
            let v = Some(v.to_string());
            match k {
                "kind" => desc.kind = v,
                "authors" => desc.authors = v,
                "limit" => desc.limit = v,
                "d" => desc.d = v,
                "a" => desc.a = v,
                "e" => desc.e = v,
                "require" => desc.require = v,
                "event" => desc.event = v,
                _ => ()
            }
        }
        desc
    }

    pub fn from_element(dom: &HtmlDom, id: NodeId) -> Self {
        Self::from_attributes(
            dom.attributes(id).iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    /// The first attribute holding a deferred reference, if any.
    pub fn placeholder(&self) -> Option<(&'static str, &str)> {
        if self.event.is_some() {
            return None
        }
        [("authors", &self.authors), ("e", &self.e)].into_iter().find_map(
            |(name, v)| v.as_deref().filter(|v| is_placeholder(v)).map(|v| (name, v)))
    }
}

/// Whether an attribute value is a reference to be resolved from the
/// parent query's result.
pub fn is_placeholder(v: &str) -> bool {
    v.starts_with('#')
}

/// A relay filter (NIP-01 REQ), with at most one value per tag
/// constraint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(rename = "#d", skip_serializing_if = "Option::is_none")]
    pub d: Option<Vec<String>>,
    #[serde(rename = "#a", skip_serializing_if = "Option::is_none")]
    pub a: Option<Vec<String>>,
    #[serde(rename = "#e", skip_serializing_if = "Option::is_none")]
    pub e: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

fn has_tag(ev: &Event, key: &str, values: &[String]) -> bool {
    ev.tags.iter().any(|t| {
        t.key() == Some(key) && t.value().map_or(false, |v| values.iter().any(|x| x == v))
    })
}

impl Filter {
    /// Whether `ev` satisfies all constraints (`limit` is not a
    /// constraint on a single event).
    pub fn matches(&self, ev: &Event) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.contains(&ev.id) {
                return false
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&ev.kind) {
                return false
            }
        }
        if let Some(authors) = &self.authors {
            if !authors.contains(&ev.pubkey) {
                return false
            }
        }
        for (key, values) in [("d", &self.d), ("a", &self.a), ("e", &self.e)] {
            if let Some(values) = values {
                if !has_tag(ev, key, values) {
                    return false
                }
            }
        }
        true
    }

    /// Whether the single-record fetch path applies.
    pub fn wants_one(&self) -> bool {
        self.ids.is_some() || self.limit.unwrap_or(1) <= 1
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(s) => f.write_str(&s),
            Err(_) => write!(f, "{self:?}")
        }
    }
}

fn decode(attribute: &str, v: &str) -> Result<String, HnError> {
    decode_identifier(v).map_err(
        |e| HnError::InvalidDescriptor(format!("{attribute}: {e}")))
}

/// Authors as given: a single identifier, or a JSON array of them.
fn parse_authors(v: &str) -> Result<Vec<String>, HnError> {
    let v = v.trim();
    let raw: Vec<String> = if v.starts_with('[') {
        serde_json::from_str(v).map_err(
            |e| HnError::InvalidDescriptor(format!("authors {v:?}: {e}")))?
    } else if v.is_empty() {
        Vec::new()
    } else {
        vec![v.to_string()]
    };
    raw.iter()
        .filter(|a| !a.trim().is_empty())
        .map(|a| decode("authors", a))
        .collect()
}

fn parse_limit(v: Option<&str>) -> usize {
    match v {
        None => 1,
        Some(s) => match s.trim().parse::<usize>() {
            Ok(n) if n >= 1 => n,
            _ => {
                warn!("invalid limit {s:?}, using 1");
                1
            }
        }
    }
}

/// Normalize a descriptor into a filter, refusing descriptors that
/// still hold a placeholder.
pub fn build_filter(desc: &QueryDescriptor) -> Result<Filter, HnError> {
    if let Some(event) = &desc.event {
        let id = decode("event", event)?;
        return Ok(Filter {
            ids: Some(vec![id]),
            limit: Some(1),
            ..Filter::default()
        })
    }
    if let Some((attribute, value)) = desc.placeholder() {
        return Err(HnError::UnresolvedPlaceholder {
            attribute, value: value.to_string()
        })
    }
    let kind = match &desc.kind {
        None => return Err(HnError::InvalidKind(None)),
        Some(k) => k.trim().parse::<u32>().map_err(
            |_| HnError::InvalidKind(Some(k.clone())))?
    };
    let authors = match &desc.authors {
        None => None,
        Some(v) => {
            let authors = parse_authors(v)?;
            if authors.is_empty() {
                warn!("empty author list, not constraining authors");
                None
            } else {
                Some(authors)
            }
        }
    };
    Ok(Filter {
        ids: None,
        kinds: Some(vec![kind]),
        authors,
        d: desc.d.clone().map(|v| vec![v]),
        a: desc.a.as_deref().map(|v| decode("a", v)).transpose()?.map(|v| vec![v]),
        e: desc.e.as_deref().map(|v| decode("e", v)).transpose()?.map(|v| vec![v]),
        limit: Some(parse_limit(desc.limit.as_deref())),
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::encode_npub;
    use hn_util::warn::capture;

    const PK: &str = "3bf0c63fcb93463407af97a5e5ee64fa883d107ef9e558472c4eb9aaaefa459d";

    fn desc(attrs: &[(&'static str, &'static str)]) -> QueryDescriptor {
        QueryDescriptor::from_attributes(attrs.iter().copied())
    }

    #[test]
    fn t_basic() {
        let f = build_filter(&desc(&[("kind", "1"), ("authors", "abc"), ("d", "x")])).unwrap();
        assert_eq!(f.kinds, Some(vec![1]));
        assert_eq!(f.authors, Some(vec!["abc".to_string()]));
        assert_eq!(f.limit, Some(1));
        assert!(f.wants_one());
        assert_eq!(f.to_string(),
                   r##"{"kinds":[1],"authors":["abc"],"#d":["x"],"limit":1}"##);
    }

    #[test]
    fn t_kind() {
        assert_eq!(build_filter(&desc(&[("authors", "abc")])),
                   Err(HnError::InvalidKind(None)));
        assert_eq!(build_filter(&desc(&[("kind", "note")])),
                   Err(HnError::InvalidKind(Some("note".into()))));
        // event overrides everything, kind not needed
        let f = build_filter(&desc(&[("event", "ee"), ("authors", "#"), ("limit", "9")])).unwrap();
        assert_eq!(f, Filter { ids: Some(vec!["ee".into()]), limit: Some(1), ..Filter::default() });
    }

    #[test]
    fn t_authors_array() {
        let npub = encode_npub(PK).unwrap();
        let json = format!(r#"["{npub}", "{PK}", "abc"]"#);
        let d = QueryDescriptor { kind: Some("1".into()), authors: Some(json), ..Default::default() };
        let f = build_filter(&d).unwrap();
        assert_eq!(f.authors, Some(vec![PK.to_string(), PK.to_string(), "abc".to_string()]));
        // normalizing the normalized form changes nothing
        let again = QueryDescriptor {
            authors: Some(serde_json::to_string(f.authors.as_ref().unwrap()).unwrap()),
            ..d
        };
        assert_eq!(build_filter(&again).unwrap().authors, f.authors);
    }

    #[test]
    fn t_authors_errors() {
        assert!(matches!(build_filter(&desc(&[("kind", "1"), ("authors", "[\"a\",")])),
                         Err(HnError::InvalidDescriptor(_))));
        let (f, msgs) = capture(|| build_filter(&desc(&[("kind", "1"), ("authors", "[]")])));
        assert_eq!(f.unwrap().authors, None);
        assert_eq!(msgs.len(), 1);
    }

    #[test]
    fn t_placeholder() {
        assert_eq!(build_filter(&desc(&[("kind", "1"), ("authors", "#")])),
                   Err(HnError::UnresolvedPlaceholder { attribute: "authors", value: "#".into() }));
        assert_eq!(build_filter(&desc(&[("kind", "1"), ("e", "#e")])),
                   Err(HnError::UnresolvedPlaceholder { attribute: "e", value: "#e".into() }));
    }

    #[test]
    fn t_limit() {
        let (f, msgs) = capture(|| build_filter(&desc(&[("kind", "1"), ("limit", "0")])));
        assert_eq!(f.unwrap().limit, Some(1));
        assert_eq!(msgs.len(), 1);
        let f = build_filter(&desc(&[("kind", "1"), ("limit", "x")])).unwrap();
        assert_eq!(f.limit, Some(1));
        let f = build_filter(&desc(&[("kind", "1"), ("limit", "5")])).unwrap();
        assert_eq!(f.limit, Some(5));
        assert!(!f.wants_one());
    }

    #[test]
    fn t_matches() {
        let ev = Event::from_json(
            r#"{"id":"i1","pubkey":"abc","kind":1,"created_at":1,"tags":[["e","x"],["d","s"]]}"#
        ).unwrap();
        let f = build_filter(&desc(&[("kind", "1"), ("authors", "abc"), ("e", "x")])).unwrap();
        assert!(f.matches(&ev));
        let f = build_filter(&desc(&[("kind", "1"), ("d", "other")])).unwrap();
        assert!(!f.matches(&ev));
        let f = build_filter(&desc(&[("kind", "2")])).unwrap();
        assert!(!f.matches(&ev));
    }
}
