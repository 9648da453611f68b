//! The rendering context: a page tree plus everything needed to
//! hydrate it.

use std::collections::HashMap;
use std::rc::Rc;
use anyhow::Result;
use hn_dom::{HtmlDom, NodeId};
use hn_util::warn;
use kstring::KString;

use crate::config::HnConfig;
use crate::cursor::PageLocation;
use crate::error::HnError;
use crate::event::Event;
use crate::identifier::TemplateCoordinate;
use crate::query::{QueryNode, QueryState};
use crate::renderers::RendererKind;
use crate::store::EventStore;
use crate::template::{self, Template, TemplateCache};

pub struct Page<S: EventStore> {
    pub(crate) dom: HtmlDom,
    pub(crate) templates: TemplateCache,
    pub(crate) store: S,
    pub(crate) config: HnConfig,
    pub(crate) location: PageLocation,
    pub(crate) queries: HashMap<NodeId, QueryNode>,
    /// Template logical id of each element instance.
    pub(crate) instance_templates: HashMap<NodeId, KString>,
    pub(crate) notices: Vec<String>,
    pub(crate) anonymous_templates: u32,
    source: String,
}

/// Whether `name` is an element that hydrates its own subtree.
pub(crate) fn is_hydration_unit(name: &str) -> bool {
    name == "hn-query" || name == "hn-element"
}

impl<S: EventStore> Page<S> {
    pub fn new(markup: &str, store: S, config: HnConfig, location: PageLocation)
               -> Result<Page<S>> {
        Ok(Page {
            dom: HtmlDom::parse_document(markup)?,
            templates: TemplateCache::new(),
            store,
            config,
            location,
            queries: HashMap::new(),
            instance_templates: HashMap::new(),
            notices: Vec::new(),
            anonymous_templates: 0,
            source: markup.to_string(),
        })
    }

    pub fn dom(&self) -> &HtmlDom {
        &self.dom
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &HnConfig {
        &self.config
    }

    pub fn templates(&self) -> &TemplateCache {
        &self.templates
    }

    pub fn location(&self) -> &PageLocation {
        &self.location
    }

    /// Messages meant for the user, oldest first.
    pub fn notices(&self) -> &[String] {
        &self.notices
    }

    pub(crate) fn notice(&mut self, msg: String) {
        warn!("notice: {msg}");
        self.notices.push(msg);
    }

    /// Publish `markup` as the template record `name`. A cached copy
    /// of an earlier version is dropped; failures become notices.
    pub async fn publish_template(&mut self, name: &str, markup: &str)
                                  -> Result<TemplateCoordinate, HnError> {
        match template::publish_template(&self.store, &self.config, name, markup).await {
            Ok(coord) => {
                self.templates.invalidate(&coord.logical_id());
                Ok(coord)
            }
            Err(e) => {
                self.notice(e.to_string());
                Err(e)
            }
        }
    }

    pub fn to_html(&self) -> String {
        self.dom.to_document_string()
    }

    pub fn query_state(&self, node: NodeId) -> Option<QueryState> {
        Some(self.queries.get(&node)?.state())
    }

    pub fn query_result(&self, node: NodeId) -> Option<Rc<Vec<Event>>> {
        self.queries.get(&node)?.result()
    }

    /// Elements named `name`, in document order.
    pub fn elements_by_tag(&self, name: &str) -> Vec<NodeId> {
        self.dom.find_elements(self.dom.root(), |e| e.name == name)
    }

    /// The `hn-query` elements with id `id`, in document order.
    pub fn find_queries(&self, id: &str) -> Vec<NodeId> {
        self.dom.find_elements(self.dom.root(), |e| {
            e.name == "hn-query" && e.attribute("id") == Some(id)
        })
    }

    /// Whether `node` is inside an `hn-query` or `hn-element` (which
    /// hydrate it), or inside a `<template>` (which stays inert).
    fn is_nested(&self, node: NodeId) -> bool {
        self.dom.ancestors(node).into_iter().any(|a| {
            self.dom.tag_name(a).map_or(false, |n| n == "template" || is_hydration_unit(n))
        })
    }

    /// Drop bookkeeping of nodes that were removed from the tree.
    pub(crate) fn forget_removed(&mut self) {
        let dom = &self.dom;
        self.queries.retain(|n, _| dom.contains(*n));
        self.instance_templates.retain(|n, _| dom.contains(*n));
    }

    /// Register every `<template id>` of the page.
    fn register_page_templates(&mut self) {
        for t in self.elements_by_tag("template") {
            if self.is_nested(t) {
                continue
            }
            if let Some(id) = self.dom.attribute(t, "id").map(String::from) {
                let template = Template::from_node(&self.dom, t);
                if !self.templates.register(&id, template) {
                    warn!("template {id:?} is defined more than once, keeping the first");
                }
            }
        }
    }

    /// Hydrate the page: top-level queries in document order, then
    /// standalone elements and renderers.
    pub async fn attach(&mut self) {
        self.register_page_templates();

        let top_queries: Vec<NodeId> = self.elements_by_tag("hn-query").into_iter()
            .filter(|q| !self.is_nested(*q))
            .collect();
        for q in top_queries {
            self.drive_query(q, None).await;
        }

        let standalone: Vec<NodeId> = self.elements_by_tag("hn-element").into_iter()
            .filter(|e| !self.is_nested(*e))
            .collect();
        for e in standalone {
            self.hydrate_element(e).await;
        }

        let root = self.dom.root();
        let renderers: Vec<NodeId> = self.dom.find_elements(
            root, |e| RendererKind::from_tag_name(&e.name).is_some());
        for r in renderers {
            if self.dom.contains(r) && !self.is_nested(r) {
                if let Err(e) = self.render_renderer(r, None) {
                    warn!("rendering {:?}: {e:#}", self.dom.tag_name(r));
                }
            }
        }
    }

    /// Start over from the page source: fresh content, template cache
    /// and query state. The location (with its cursors) is kept. The
    /// tree is refilled in place, so node ids from before the reload
    /// stay invalid instead of naming new nodes.
    pub async fn reload(&mut self) {
        let parsed = self.dom.parse_fragment(&self.source);
        match parsed {
            Ok(frag) => {
                let root = self.dom.root();
                self.dom.clear_children(root);
                if let Err(e) = self.dom.append_child(root, frag) {
                    warn!("reload: {e:#}");
                    return
                }
                self.templates = TemplateCache::new();
                self.queries.clear();
                self.instance_templates.clear();
                self.attach().await;
            }
            Err(e) => warn!("reload: {e:#}")
        }
    }
}
