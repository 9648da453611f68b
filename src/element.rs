//! `hn-element` instances: filling a template copy from a record.

use std::rc::Rc;
use anyhow::{anyhow, bail, Result};
use futures::future::{FutureExt, LocalBoxFuture};
use hn_dom::NodeId;
use hn_util::warn;
use kstring::KString;

use crate::event::{Content, Event};
use crate::field::resolve;
use crate::filter::Filter;
use crate::identifier::decode_identifier;
use crate::page::{is_hydration_unit, Page};
use crate::query::{ContextScope, QueryContext, TemplateRef};
use crate::renderers::{self, RenderContext, RendererKind};
use crate::store::{fetch_events, EventStore};

/// Nested units found while filling an element.
#[derive(Default)]
struct Nested {
    queries: Vec<NodeId>,
    elements: Vec<NodeId>,
}

fn record_of(data: &str) -> Result<Event> {
    Event::from_json(data).map_err(|e| anyhow!("invalid hn-event-data: {e:#}"))
}

impl<S: EventStore> Page<S> {
    /// The descendants of `node` in document order, not descending into
    /// nested queries and elements (those are included themselves).
    fn scoped_descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut res = Vec::new();
        let mut stack: Vec<NodeId> = self.dom.children(node).iter().rev().copied().collect();
        while let Some(n) = stack.pop() {
            res.push(n);
            if self.dom.tag_name(n).map_or(false, is_hydration_unit) {
                continue
            }
            stack.extend(self.dom.children(n).iter().rev().copied());
        }
        res
    }

    /// Whether `node` has element children or non-blank text.
    pub(crate) fn has_content(&self, node: NodeId) -> bool {
        self.dom.children(node).iter().any(|c| {
            self.dom.is_element(*c) || !self.dom.text_content(*c).trim().is_empty()
        })
    }

    /// The record of `instance`, fetching it by `hn-event` if needed.
    async fn element_record(&mut self, instance: NodeId) -> Option<Event> {
        if let Some(data) = self.dom.attribute(instance, "hn-event-data") {
            return match record_of(data) {
                Ok(ev) => Some(ev),
                Err(e) => {
                    warn!("{e:#}");
                    None
                }
            }
        }
        let reference = match self.dom.attribute(instance, "hn-event") {
            Some(r) => r.to_string(),
            None => {
                warn!("hn-element without hn-event-data or hn-event");
                return None
            }
        };
        let id = match decode_identifier(&reference) {
            Ok(id) => id,
            Err(e) => {
                warn!("hn-event {reference:?}: {e}");
                return None
            }
        };
        let filter = Filter { ids: Some(vec![id]), limit: Some(1), ..Filter::default() };
        let ev = match fetch_events(&self.store, &filter).await {
            Ok(mut events) => events.swap_remove(0),
            Err(e) => {
                warn!("hn-element: {e}");
                return None
            }
        };
        if let Err(e) = self.dom.set_attribute(instance, "hn-event-data", ev.to_json()) {
            warn!("hn-element: {e:#}");
        }
        Some(ev)
    }

    /// Instantiate the `hn-template` of an empty standalone element.
    async fn instantiate_own_template(&mut self, instance: NodeId) -> Result<()> {
        let t = match self.dom.attribute(instance, "hn-template") {
            Some(t) if !self.has_content(instance) => TemplateRef::parse(t),
            _ => return Ok(())
        };
        if !self.ensure_template(&t).await {
            bail!("no template {:?}", t.key)
        }
        if let Some(frag) = self.templates.instantiate(&t.key, &mut self.dom) {
            self.dom.append_child(instance, frag)?;
        }
        self.instance_templates.insert(instance, KString::from_string(t.key));
        Ok(())
    }

    /// Resolve `path` in `event`, for a plain field attribute.
    fn field_value(event: &Event, content: &Content, attribute: &str, path: &str)
                   -> Option<String> {
        let v = resolve(event, content, path);
        if v.is_none() {
            warn!("{attribute}: no value at {path:?}");
        }
        v
    }

    /// Fill slots, plain fields and renderers of `instance` from
    /// `event`.
    fn hydrate_fields(&mut self, instance: NodeId, event: &Event) -> Result<Nested> {
        let content = event.parsed_content();
        let mut nested = Nested::default();
        for n in self.scoped_descendants(instance) {
            if !self.dom.contains(n) || !self.dom.is_element(n) {
                continue
            }
            let name = self.dom.tag_name(n).unwrap_or("").to_string();
            match name.as_str() {
                "hn-query" => {
                    nested.queries.push(n);
                    continue
                }
                "hn-element" => {
                    nested.elements.push(n);
                    continue
                }
                "slot" => if let Some(path) = self.dom.attribute(n, "name") {
                    match resolve(event, &content, path) {
                        Some(v) => self.dom.set_text(n, v)?,
                        None => warn!("slot {path:?}: no value, keeping the fallback"),
                    }
                },
                _ => ()
            }

            if let Some(path) = self.dom.attribute(n, "hn-field") {
                if let Some(v) = Self::field_value(event, &content, "hn-field", path) {
                    let frag = self.dom.parse_fragment(&v)?;
                    self.dom.replace_children(n, [frag])?;
                }
            }
            if let Some(path) = self.dom.attribute(n, "hn-src") {
                if let Some(v) = Self::field_value(event, &content, "hn-src", path) {
                    self.dom.set_attribute(n, "src", v)?;
                }
            }
            if let Some(path) = self.dom.attribute(n, "hn-ref") {
                if let Some(v) = Self::field_value(event, &content, "hn-ref", path) {
                    let href = self.config.viewer_link(&v);
                    self.dom.set_attribute(n, "href", href)?;
                }
            }

            if RendererKind::from_tag_name(&name).is_some() {
                if let Err(e) = self.render_renderer(n, Some(event)) {
                    warn!("rendering {name}: {e:#}");
                }
            }
        }
        Ok(nested)
    }

    fn prepend_debug(&mut self, instance: NodeId, event: &Event) -> Result<()> {
        let old: Vec<NodeId> = self.dom.children(instance).iter().copied().filter(|c| {
            self.dom.tag_name(*c) == Some("pre")
                && self.dom.attribute(*c, "class") == Some("hn-debug")
        }).collect();
        for c in old {
            self.dom.remove(c);
        }
        let pre = self.dom.new_element("pre", [("class", "hn-debug")]);
        self.dom.set_text(pre, event.to_json_pretty())?;
        match self.dom.children(instance).first().copied() {
            Some(first) => self.dom.insert_before(instance, pre, first),
            None => self.dom.append_child(instance, pre),
        }
    }

    /// Fill `instance` from its record, then hydrate what is nested in
    /// it with the record as context.
    pub fn hydrate_element(&mut self, instance: NodeId) -> LocalBoxFuture<'_, ()> {
        async move {
            if !self.dom.contains(instance) {
                return
            }
            let event = match self.element_record(instance).await {
                Some(ev) => ev,
                None => return
            };
            if let Err(e) = self.instantiate_own_template(instance).await {
                warn!("hn-element: {e:#}");
                return
            }
            let nested = match self.hydrate_fields(instance, &event) {
                Ok(nested) => nested,
                Err(e) => {
                    warn!("hn-element: {e:#}");
                    return
                }
            };
            if self.dom.has_attribute(instance, "debug") {
                if let Err(e) = self.prepend_debug(instance, &event) {
                    warn!("hn-element: {e:#}");
                }
            }

            let ctx = QueryContext { rows: Rc::new(vec![event]), scope: ContextScope::Element };
            for q in nested.queries {
                self.drive_query(q, Some(ctx.clone())).await;
            }
            for e in nested.elements {
                if self.dom.contains(e) && (self.dom.has_attribute(e, "hn-event-data")
                                            || self.dom.has_attribute(e, "hn-event")) {
                    self.hydrate_element(e).await;
                }
            }
        }.boxed_local()
    }

    /// Render the renderer element `node`, first resolving its `value`
    /// path against its own record, or against `host`.
    pub(crate) fn render_renderer(&mut self, node: NodeId, host: Option<&Event>) -> Result<()> {
        if !self.dom.contains(node) {
            bail!("renderer is no longer in the page")
        }
        let name = self.dom.tag_name(node).unwrap_or("");
        let kind = match RendererKind::from_tag_name(name) {
            Some(k) => k,
            None => bail!("<{name}> is not a renderer")
        };
        if kind.takes_value() {
            let own = match self.dom.attribute(node, "hn-event-data") {
                Some(data) => Some(record_of(data)?),
                None => None
            };
            let record = own.as_ref().or(host);
            let path = self.dom.attribute(node, "value").map(String::from);
            if let (Some(ev), Some(path)) = (record, path) {
                if kind != RendererKind::Qr || path.starts_with("tag.") {
                    match resolve(ev, &ev.parsed_content(), &path) {
                        Some(v) => self.dom.set_attribute(node, "value", v)?,
                        None => warn!("{}: no value at {path:?}, keeping it as a literal",
                                      kind.tag_name())
                    }
                }
            }
        }
        renderers::render(kind, &mut self.dom, node, &RenderContext { config: &self.config })
    }

    /// Change the `value` of a renderer and render it again. Paths are
    /// resolved against the renderer's own `hn-event-data`, if any.
    pub async fn set_renderer_value(&mut self, node: NodeId, value: &str) {
        if !self.dom.contains(node) {
            warn!("set_renderer_value: node is no longer in the page");
            return
        }
        if self.dom.attribute(node, "value") == Some(value) {
            return
        }
        if let Err(e) = self.dom.set_attribute(node, "value", KString::from_ref(value)) {
            warn!("set_renderer_value: {e:#}");
            return
        }
        if let Err(e) = self.render_renderer(node, None) {
            warn!("rendering {:?}: {e:#}", self.dom.tag_name(node));
        }
    }

    /// Replace the record of `instance`, start over from a fresh copy
    /// of its template and hydrate again.
    pub async fn set_element_data(&mut self, instance: NodeId, event: &Event) {
        if !self.dom.contains(instance) {
            warn!("set_element_data: node is no longer in the page");
            return
        }
        if let Err(e) = self.dom.set_attribute(instance, "hn-event-data", event.to_json()) {
            warn!("set_element_data: {e:#}");
            return
        }
        match self.instance_templates.get(&instance).cloned() {
            Some(key) => {
                self.dom.clear_children(instance);
                self.forget_removed();
                if let Some(frag) = self.templates.instantiate(&key, &mut self.dom) {
                    if let Err(e) = self.dom.append_child(instance, frag) {
                        warn!("set_element_data: {e:#}");
                        return
                    }
                }
            }
            None => warn!("set_element_data: template of the element is not known, \
                           hydrating the current content")
        }
        self.hydrate_element(instance).await;
    }
}
