//! Element templates, and the cache holding them by logical id.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use anyhow::Result;
use hn_dom::{HtmlDom, NodeId};
use kstring::KString;

use crate::config::HnConfig;
use crate::error::HnError;
use crate::event::{Event, Tag, UnsignedEvent};
use crate::filter::Filter;
use crate::identifier::TemplateCoordinate;
use crate::store::{fetch_events, EventStore};
use crate::util::unixtime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    /// Markup that was present on the page.
    Inline,
    /// The content of a fetched record.
    Record { event_id: String, created_at: u64 },
}

/// A template fragment in a tree of its own.
pub struct Template {
    pub dom: HtmlDom,
    pub source: TemplateSource,
}

impl Template {
    /// Parse markup; a single `<template>` element wrapping everything
    /// is unwrapped.
    pub fn from_markup(markup: &str, source: TemplateSource) -> Result<Template> {
        let mut dom = HtmlDom::parse_document(markup)?;
        let root = dom.root();
        let elements = dom.child_elements(root);
        let only_whitespace_besides = dom.children(root).iter().all(|c| {
            elements.contains(c) || dom.text_content(*c).trim().is_empty()
        });
        if let [single] = *elements.as_slice() {
            if only_whitespace_besides && dom.tag_name(single) == Some("template") {
                let frag = dom.new_fragment();
                dom.move_children(single, frag)?;
                dom.replace_children(root, [frag])?;
            }
        }
        Ok(Template { dom, source })
    }

    /// Copy the children of `node` in `dom`.
    pub fn from_node(dom: &HtmlDom, node: NodeId) -> Template {
        Template { dom: dom.extract(node), source: TemplateSource::Inline }
    }

    /// A detached fragment in `target` holding a copy of the template.
    pub fn instantiate(&self, target: &mut HtmlDom) -> NodeId {
        target.import(&self.dom, self.dom.root())
    }

    pub fn to_html(&self) -> String {
        self.dom.inner_html(self.dom.root())
    }
}

/// Templates by logical id. The first registration of an id wins;
/// later ones are ignored until the id is invalidated.
#[derive(Default)]
pub struct TemplateCache {
    templates: HashMap<KString, Template>,
}

impl TemplateCache {
    pub fn new() -> TemplateCache {
        TemplateCache::default()
    }

    /// Returns whether `template` was stored.
    pub fn register(&mut self, id: &str, template: Template) -> bool {
        match self.templates.entry(KString::from_ref(id)) {
            Entry::Occupied(_) => false,
            Entry::Vacant(e) => {
                e.insert(template);
                true
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&Template> {
        self.templates.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.templates.contains_key(id)
    }

    /// Drop the entry for `id` so that the next registration is
    /// taken.
    pub fn invalidate(&mut self, id: &str) -> Option<Template> {
        self.templates.remove(id)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn instantiate(&self, id: &str, target: &mut HtmlDom) -> Option<NodeId> {
        Some(self.get(id)?.instantiate(target))
    }
}

/// The newest template record at `coord`.
pub async fn fetch_template<S>(
    store: &S, config: &HnConfig, coord: &TemplateCoordinate
) -> Result<Event, HnError>
where S: EventStore + ?Sized
{
    let filter = Filter {
        kinds: Some(vec![config.template_kind]),
        authors: Some(vec![coord.author.clone()]),
        d: Some(vec![coord.name.clone()]),
        limit: Some(1),
        ..Filter::default()
    };
    let mut events = fetch_events(store, &filter).await.map_err(|e| match e {
        HnError::NotFound(_) => HnError::TemplateMissing(coord.logical_id()),
        e => e
    })?;
    events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(events.swap_remove(0))
}

/// Sign and publish `markup` as the template record `name` of the
/// store's signer; later records with the same name replace it.
pub async fn publish_template<S>(
    store: &S, config: &HnConfig, name: &str, markup: &str
) -> Result<TemplateCoordinate, HnError>
where S: EventStore + ?Sized
{
    let name = name.trim();
    let markup = markup.trim();
    if name.is_empty() || name.contains('/') {
        return Err(HnError::PublishFailure(format!("invalid template name {name:?}")))
    }
    if markup.is_empty() {
        return Err(HnError::PublishFailure(format!("template {name:?} has no content")))
    }
    let unsigned = UnsignedEvent {
        kind: config.template_kind,
        created_at: unixtime(),
        tags: vec![Tag::new(["d", name])],
        content: markup.to_string(),
    };
    let published = async {
        let ev = store.sign(unsigned).await?;
        store.publish(&ev).await?;
        Ok::<_, anyhow::Error>(ev)
    }.await;
    let ev = published.map_err(|e| HnError::PublishFailure(format!("{e:#}")))?;
    Ok(TemplateCoordinate { author: ev.pubkey, name: name.to_string() })
}
