//! `hn-query`: fetching records and rendering them.
//!
//! Each query element gets a `QueryNode` the first time it is driven.
//! Driving runs the state machine to completion: apply a cursor entry,
//! resolve placeholders from the context handed down by the parent,
//! build the filter, fetch, render. Rendering drives a nested child
//! query with this query's result, or instantiates the element
//! template once per row and hydrates the instances.

use std::rc::Rc;
use anyhow::Result;
use futures::future::{FutureExt, LocalBoxFuture};
use hn_dom::NodeId;
use hn_util::warn;
use itertools::Itertools;
use kstring::KString;
use serde_json::Value;

use crate::error::HnError;
use crate::event::Event;
use crate::filter::{build_filter, is_placeholder, QueryDescriptor, QUERY_ATTRIBUTES};
use crate::identifier::{parse_template_coordinate, TemplateCoordinate};
use crate::page::Page;
use crate::store::{fetch_events, EventStore};
use crate::template::{fetch_template, Template, TemplateSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Idle,
    /// Waiting for a parent result to resolve `authors`/`e` from.
    PlaceholderPending,
    Fetching,
    Rendered,
    /// Left only via an explicit attribute change.
    Error,
}

/// Where a context row comes from; decides what an `authors`
/// placeholder resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextScope {
    /// The result of a parent query: the first row's `p` tags.
    Query,
    /// The record of an enclosing element: its author.
    Element,
}

/// What a query hands down to its children.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub rows: Rc<Vec<Event>>,
    pub scope: ContextScope,
}

/// Template reference: the cache key, plus where to fetch the template
/// from if it isn't cached.
#[derive(Debug, Clone)]
pub(crate) struct TemplateRef {
    pub key: String,
    pub coordinate: Option<TemplateCoordinate>,
}

impl TemplateRef {
    /// From an `hn-template` attribute: a `nostr:<npub>/<name>`
    /// coordinate, or the id of a template on the page.
    pub fn parse(value: &str) -> TemplateRef {
        if value.contains('/') {
            match parse_template_coordinate(value) {
                Ok(c) => return TemplateRef { key: c.logical_id(), coordinate: Some(c) },
                Err(e) => warn!("{e}"),
            }
        }
        TemplateRef { key: value.trim_start_matches('#').to_string(), coordinate: None }
    }
}

/// The single declared child of a query, as found on first drive.
#[derive(Debug, Clone)]
pub(crate) enum ChildDecl {
    Query(NodeId),
    Element {
        template: TemplateRef,
        /// Copied to every instance.
        attr: Vec<(KString, KString)>,
    },
    RawDump,
    Unrecognized(String),
}

pub struct QueryNode {
    state: QueryState,
    /// Attributes that were declared as placeholders, with their
    /// declared value.
    declared: Vec<(&'static str, String)>,
    result: Option<Rc<Vec<Event>>>,
    context: Option<QueryContext>,
    child: ChildDecl,
    /// Nodes inserted by the last rendering.
    rendered: Vec<NodeId>,
    cursor_checked: bool,
}

impl QueryNode {
    fn new(child: ChildDecl) -> QueryNode {
        QueryNode {
            state: QueryState::Idle,
            declared: Vec::new(),
            result: None,
            context: None,
            child,
            rendered: Vec::new(),
            cursor_checked: false,
        }
    }

    pub fn state(&self) -> QueryState {
        self.state
    }

    pub fn result(&self) -> Option<Rc<Vec<Event>>> {
        self.result.clone()
    }

    /// Track whether `attribute` (now `value`) is a placeholder.
    fn note_attribute(&mut self, attribute: &str, value: &str) {
        let attribute = match attribute {
            "authors" => "authors",
            "e" => "e",
            _ => return
        };
        self.declared.retain(|(a, _)| *a != attribute);
        if is_placeholder(value) {
            self.declared.push((attribute, value.to_string()));
        }
    }
}

/// What a placeholder on `attribute` resolves to given a context row.
fn resolve_placeholder(attribute: &str, row: &Event, scope: ContextScope) -> Option<String> {
    match (attribute, scope) {
        ("e", _) => Some(row.id.clone()),
        ("authors", ContextScope::Element) => Some(row.pubkey.clone()),
        ("authors", ContextScope::Query) => {
            let p = row.tag_values("p");
            if p.is_empty() {
                Some(row.pubkey.clone())
            } else {
                Some(Value::from(p).to_string())
            }
        }
        _ => None
    }
}

impl<S: EventStore> Page<S> {
    fn query_node(&mut self, node: NodeId) -> &mut QueryNode {
        self.queries.get_mut(&node).expect("query nodes are created before use")
    }

    fn set_query_state(&mut self, node: NodeId, state: QueryState) {
        self.query_node(node).state = state;
    }

    /// Find the declared child of `node`; an element declaration
    /// registers its template and is removed from the tree.
    fn classify_child(&mut self, node: NodeId) -> ChildDecl {
        let children = self.dom.child_elements(node);
        let first = match children.first() {
            Some(c) => *c,
            None => return ChildDecl::RawDump
        };
        if children.len() > 1 {
            warn!("hn-query has {} element children, using the first", children.len());
        }
        match self.dom.tag_name(first) {
            Some("hn-query") => ChildDecl::Query(first),
            Some("hn-element") => {
                let template = match (self.dom.attribute(first, "hn-template"),
                                      self.dom.attribute(first, "id")) {
                    (Some(t), _) => TemplateRef::parse(t),
                    (None, Some(id)) => TemplateRef { key: id.to_string(), coordinate: None },
                    (None, None) => {
                        self.anonymous_templates += 1;
                        TemplateRef {
                            key: format!("hn-element-{}", self.anonymous_templates),
                            coordinate: None
                        }
                    }
                };
                if self.has_content(first) && template.coordinate.is_none() {
                    let t = Template::from_node(&self.dom, first);
                    self.templates.register(&template.key, t);
                }
                let attr = self.dom.attributes(first).iter()
                    .filter(|(k, _)| k.as_str() != "hn-template")
                    .cloned()
                    .collect();
                self.dom.remove(first);
                ChildDecl::Element { template, attr }
            }
            Some(other) => ChildDecl::Unrecognized(other.to_string()),
            None => ChildDecl::RawDump,
        }
    }

    /// Set the `event` attribute from the page cursor, once.
    fn apply_cursor(&mut self, node: NodeId) {
        let qn = self.query_node(node);
        if qn.cursor_checked {
            return
        }
        qn.cursor_checked = true;
        let id = match self.dom.attribute(node, "id") {
            Some(id) => id,
            None => return
        };
        if let Some(event_id) = self.location.cursor_get(id).map(String::from) {
            if let Err(e) = self.dom.set_attribute(node, "event", event_id) {
                warn!("applying cursor: {e:#}");
            }
        }
    }

    /// Rewrite placeholder attributes from the context. False if
    /// there is nothing to resolve them from yet.
    fn resolve_placeholders(&mut self, node: NodeId) -> bool {
        let declared_now: Vec<(&'static str, String)> = ["authors", "e"].into_iter()
            .filter_map(|a| Some((a, self.dom.attribute(node, a)?.to_string())))
            .filter(|(_, v)| is_placeholder(v))
            .collect();
        let has_event = self.dom.has_attribute(node, "event");
        let qn = self.query_node(node);
        for (a, v) in declared_now {
            qn.note_attribute(a, &v);
        }
        if has_event || qn.declared.is_empty() {
            return true
        }
        let (row, scope) = match &qn.context {
            Some(ctx) => match ctx.rows.first() {
                Some(row) => (row.clone(), ctx.scope),
                None => return false
            },
            None => return false
        };
        for (attribute, _) in qn.declared.clone() {
            if let Some(value) = resolve_placeholder(attribute, &row, scope) {
                if let Err(e) = self.dom.set_attribute(node, attribute, value) {
                    warn!("resolving placeholder: {e:#}");
                    return false
                }
            }
        }
        true
    }

    /// Run the state machine of the query at `node`. `ctx` replaces
    /// the stored context if given.
    pub(crate) fn drive_query(&mut self, node: NodeId, ctx: Option<QueryContext>)
                              -> LocalBoxFuture<'_, ()> {
        async move {
            if !self.dom.contains(node) {
                return
            }
            if !self.queries.contains_key(&node) {
                let child = self.classify_child(node);
                self.queries.insert(node, QueryNode::new(child));
            }
            {
                let qn = self.query_node(node);
                if let Some(ctx) = ctx {
                    qn.context = Some(ctx);
                }
                if qn.state == QueryState::Error {
                    return
                }
            }
            self.apply_cursor(node);

            self.set_query_state(node, QueryState::PlaceholderPending);
            if !self.resolve_placeholders(node) {
                return
            }

            let desc = QueryDescriptor::from_element(&self.dom, node);
            let filter = match build_filter(&desc) {
                Ok(f) => f,
                Err(HnError::UnresolvedPlaceholder { .. }) => return,
                Err(e) => {
                    warn!("hn-query: {e}");
                    self.set_query_state(node, QueryState::Error);
                    return
                }
            };

            self.set_query_state(node, QueryState::Fetching);
            let fetched = fetch_events(&self.store, &filter).await;
            let rows = match fetched {
                Ok(mut events) => {
                    if let Some(key) = &desc.require {
                        events.retain(|e| e.tag(key).is_some());
                    }
                    Rc::new(events)
                }
                Err(HnError::NotFound(_)) => Rc::new(Vec::new()),
                Err(e) => {
                    warn!("hn-query: {e}");
                    self.query_node(node).result.clone().unwrap_or_default()
                }
            };
            self.query_node(node).result = Some(rows.clone());
            self.render_query(node, rows).await;
        }.boxed_local()
    }

    /// Remove what the last rendering of `node` inserted.
    fn clear_rendered(&mut self, node: NodeId) {
        for n in std::mem::take(&mut self.query_node(node).rendered) {
            if self.dom.contains(n) {
                self.dom.remove(n);
            }
        }
        self.forget_removed();
    }

    /// Where rendered output goes: `node` itself, or with `debug` a
    /// wrapper showing the query parameters.
    fn output_container(&mut self, node: NodeId, rows: usize) -> Result<NodeId> {
        if !self.dom.has_attribute(node, "debug") {
            return Ok(node)
        }
        let attrs = QUERY_ATTRIBUTES.iter()
            .filter_map(|a| Some(format!("{a}={}", self.dom.attribute(node, a)?)))
            .join(" ");
        let banner = format!("hn-query: {attrs} ({rows} rows)");
        let wrapper = self.dom.new_element("div", [("class", "hn-debug")]);
        let b = self.dom.new_element("div", [("class", "hn-debug-banner")]);
        self.dom.set_text(b, banner)?;
        self.dom.append_child(wrapper, b)?;
        self.dom.append_child(node, wrapper)?;
        self.query_node(node).rendered.push(wrapper);
        Ok(wrapper)
    }

    /// Make sure the template `t` is in the cache, fetching it if
    /// necessary.
    pub(crate) async fn ensure_template(&mut self, t: &TemplateRef) -> bool {
        if self.templates.contains(&t.key) {
            return true
        }
        let coord = match &t.coordinate {
            Some(c) => c,
            None => {
                warn!("{}", HnError::TemplateMissing(t.key.clone()));
                return false
            }
        };
        let ev = match fetch_template(&self.store, &self.config, coord).await {
            Ok(ev) => ev,
            Err(e) => {
                warn!("{e}");
                return false
            }
        };
        let source = TemplateSource::Record { event_id: ev.id.clone(), created_at: ev.created_at };
        match Template::from_markup(&ev.content, source) {
            Ok(template) => {
                self.templates.register(&t.key, template);
                true
            }
            Err(e) => {
                warn!("template {:?}: {e:#}", t.key);
                false
            }
        }
    }

    /// One `hn-element` per row in `container`, each with its record
    /// and a copy of the template.
    fn instantiate_rows(
        &mut self,
        node: NodeId,
        container: NodeId,
        template: &TemplateRef,
        attr: &[(KString, KString)],
        rows: &[Event],
    ) -> Result<Vec<NodeId>> {
        let mut instances = Vec::new();
        for row in rows {
            let inst = self.dom.new_element("hn-element", attr.iter().cloned());
            self.dom.set_attribute(inst, "hn-event-data", row.to_json())?;
            if let Some(frag) = self.templates.instantiate(&template.key, &mut self.dom) {
                self.dom.append_child(inst, frag)?;
            }
            self.dom.append_child(container, inst)?;
            if container == node {
                self.query_node(node).rendered.push(inst);
            }
            self.instance_templates.insert(inst, KString::from_ref(&template.key));
            instances.push(inst);
        }
        Ok(instances)
    }

    fn dump_rows(&mut self, node: NodeId, container: NodeId, rows: &[Event]) -> Result<()> {
        for row in rows {
            let pre = self.dom.new_empty_element("pre");
            self.dom.set_text(pre, row.to_json_pretty())?;
            self.dom.append_child(container, pre)?;
            if container == node {
                self.query_node(node).rendered.push(pre);
            }
        }
        Ok(())
    }

    async fn render_query(&mut self, node: NodeId, rows: Rc<Vec<Event>>) {
        let child = self.query_node(node).child.clone();
        match child {
            ChildDecl::Query(c) => {
                self.set_query_state(node, QueryState::Rendered);
                let ctx = QueryContext { rows, scope: ContextScope::Query };
                self.drive_query(c, Some(ctx)).await;
            }
            ChildDecl::Element { template, attr } => {
                self.clear_rendered(node);
                if !rows.is_empty() && !self.ensure_template(&template).await {
                    self.set_query_state(node, QueryState::Error);
                    return
                }
                let instances = match self.output_container(node, rows.len()).and_then(
                    |container| self.instantiate_rows(node, container, &template, &attr, &rows))
                {
                    Ok(instances) => instances,
                    Err(e) => {
                        warn!("hn-query: rendering: {e:#}");
                        self.set_query_state(node, QueryState::Error);
                        return
                    }
                };
                self.set_query_state(node, QueryState::Rendered);
                for inst in instances {
                    self.hydrate_element(inst).await;
                }
            }
            ChildDecl::RawDump => {
                self.clear_rendered(node);
                let res = self.output_container(node, rows.len()).and_then(
                    |container| self.dump_rows(node, container, &rows));
                match res {
                    Ok(()) => self.set_query_state(node, QueryState::Rendered),
                    Err(e) => {
                        warn!("hn-query: rendering: {e:#}");
                        self.set_query_state(node, QueryState::Error);
                    }
                }
            }
            ChildDecl::Unrecognized(name) => {
                warn!("{}", HnError::TemplateMissing(format!("unexpected child <{name}>")));
                self.set_query_state(node, QueryState::Error);
            }
        }
    }

    /// Set an attribute of a query element, the way page code would.
    /// `e` and `event` changes, and replacing a placeholder, drive the
    /// query again; other changes are only stored. Any change leaves
    /// the `Error` state.
    pub async fn set_query_attribute(&mut self, node: NodeId, name: &str, value: &str) {
        if !self.dom.contains(node) {
            warn!("set_query_attribute: node is no longer in the page");
            return
        }
        let old = self.dom.attribute(node, name).map(String::from);
        if old.as_deref() == Some(value) {
            return
        }
        if let Err(e) = self.dom.set_attribute(node, KString::from_ref(name), KString::from_ref(value)) {
            warn!("set_query_attribute: {e:#}");
            return
        }
        let qn = match self.queries.get_mut(&node) {
            Some(qn) => qn,
            // Not driven yet; attaching will pick the value up.
            None => return
        };
        qn.note_attribute(name, value);
        if qn.state == QueryState::Error {
            qn.state = QueryState::Idle;
        }
        let retrigger = name == "e" || name == "event"
            || old.as_deref().map_or(false, is_placeholder);
        if retrigger {
            self.drive_query(node, None).await;
        }
    }

    /// Set `attribute` of the query at `node` and drive it again,
    /// whatever changed.
    pub(crate) async fn retarget_query(&mut self, node: NodeId, attribute: &str, value: &str) {
        if !self.dom.contains(node) {
            warn!("retargeting query: node is no longer in the page");
            return
        }
        if let Err(e) = self.dom.set_attribute(node, KString::from_ref(attribute), KString::from_ref(value)) {
            warn!("retargeting query: {e:#}");
            return
        }
        if let Some(qn) = self.queries.get_mut(&node) {
            qn.note_attribute(attribute, value);
            qn.state = QueryState::Idle;
        }
        self.drive_query(node, None).await;
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HnConfig;
    use crate::cursor::PageLocation;
    use crate::event::Tag;
    use crate::store::MemoryStore;
    use futures::executor::block_on;
    use hn_util::warn::capture;

    fn ev(id: &str, pubkey: &str, kind: u32, created_at: u64, tags: Vec<Tag>, content: &str) -> Event {
        Event {
            id: id.into(),
            pubkey: pubkey.into(),
            kind,
            created_at,
            tags,
            content: content.into(),
            sig: "sig".into(),
        }
    }

    fn page(markup: &str, events: Vec<Event>) -> Page<MemoryStore> {
        Page::new(markup, MemoryStore::with_events(events), HnConfig::default(),
                  PageLocation::parse("/").unwrap()).unwrap()
    }

    fn query(p: &Page<MemoryStore>, i: usize) -> NodeId {
        p.elements_by_tag("hn-query")[i]
    }

    #[test]
    fn t_single_row() {
        let mut p = page(
            "<hn-query kind=\"1\" authors=\"abc\"><hn-element id=\"note\">\
             <slot name=\"content\"></slot></hn-element></hn-query>",
            vec![ev("n1", "abc", 1, 10, vec![], "hello")]);
        block_on(p.attach());
        let q = query(&p, 0);
        assert_eq!(p.query_state(q), Some(QueryState::Rendered));
        assert_eq!(p.elements_by_tag("hn-element").len(), 1);
        assert!(p.to_html().contains("<slot name=\"content\">hello</slot>"));
        assert!(p.templates().contains("note"));
    }

    #[test]
    fn t_raw_dump() {
        let mut p = page("<hn-query kind=\"1\" limit=\"3\"></hn-query>",
                         vec![ev("n1", "abc", 1, 10, vec![], ""),
                              ev("n2", "abc", 1, 20, vec![], "")]);
        block_on(p.attach());
        assert_eq!(p.elements_by_tag("pre").len(), 2);
        let html = p.to_html();
        assert!(html.find("n2").unwrap() < html.find("n1").unwrap());
    }

    #[test]
    fn t_require() {
        let mut p = page("<hn-query kind=\"1\" limit=\"5\" require=\"t\"></hn-query>",
                         vec![ev("n1", "abc", 1, 10, vec![Tag::new(["t", "x"])], ""),
                              ev("n2", "abc", 1, 20, vec![], "")]);
        block_on(p.attach());
        let q = query(&p, 0);
        let ids: Vec<_> = p.query_result(q).unwrap().iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids, vec!["n1"]);
    }

    #[test]
    fn t_invalid_kind() {
        let (p, msgs) = capture(|| {
            let mut p = page("<hn-query kind=\"note\"><hn-element id=\"x\">a</hn-element></hn-query>",
                             vec![]);
            block_on(p.attach());
            p
        });
        assert_eq!(p.query_state(query(&p, 0)), Some(QueryState::Error));
        assert!(msgs.iter().any(|m| m.contains("invalid or missing kind")));
        assert!(p.store().requests().is_empty());
    }

    #[test]
    fn t_unrecognized_child() {
        let ((), msgs) = capture(|| {
            let mut p = page("<hn-query kind=\"1\"><div>x</div></hn-query>",
                             vec![ev("n1", "abc", 1, 10, vec![], "")]);
            block_on(p.attach());
            assert_eq!(p.query_state(query(&p, 0)), Some(QueryState::Error));
            assert_eq!(p.to_html(), "<hn-query kind=\"1\"><div>x</div></hn-query>");
        });
        assert!(msgs.iter().any(|m| m.contains("template missing")));
    }

    #[test]
    fn t_nested_placeholder() {
        let mut p = page(
            "<hn-query kind=\"3\" authors=\"me\">\
               <hn-query kind=\"1\" authors=\"#\" limit=\"5\">\
                 <hn-element id=\"n\"><slot name=\"content\"></slot></hn-element>\
               </hn-query>\
             </hn-query>",
            vec![
                ev("contacts", "me", 3, 1, vec![Tag::new(["p", "u1"]), Tag::new(["p", "u2"])], ""),
                ev("a", "u1", 1, 5, vec![], "from u1"),
                ev("b", "u2", 1, 6, vec![], "from u2"),
                ev("c", "u3", 1, 7, vec![], "from u3"),
            ]);
        block_on(p.attach());
        let inner = query(&p, 1);
        assert_eq!(p.dom().attribute(inner, "authors"), Some(r#"["u1","u2"]"#));
        assert_eq!(p.query_state(inner), Some(QueryState::Rendered));
        let html = p.to_html();
        assert!(html.contains("from u1") && html.contains("from u2"));
        assert!(!html.contains("from u3"));
    }

    #[test]
    fn t_placeholder_pending_without_parent_rows() {
        let mut p = page(
            "<hn-query kind=\"3\" authors=\"nobody\">\
               <hn-query kind=\"1\" authors=\"#\"></hn-query>\
             </hn-query>",
            vec![ev("a", "u1", 1, 5, vec![], "x")]);
        block_on(p.attach());
        let inner = query(&p, 1);
        assert_eq!(p.query_state(inner), Some(QueryState::PlaceholderPending));
        assert_eq!(p.dom().attribute(inner, "authors"), Some("#"));
        // only the outer query fetched
        assert_eq!(p.store().requests().len(), 1);
    }

    #[test]
    fn t_set_query_attribute() {
        let mut p = page("<hn-query kind=\"1\" authors=\"u1\"></hn-query>",
                         vec![ev("a", "u1", 1, 5, vec![], "x"),
                              ev("b", "u2", 1, 6, vec![], "y")]);
        block_on(p.attach());
        let q = query(&p, 0);
        assert_eq!(p.store().requests().len(), 1);
        // literal change of authors: stored, no refetch
        block_on(p.set_query_attribute(q, "authors", "u2"));
        assert_eq!(p.store().requests().len(), 1);
        assert_eq!(p.query_result(q).unwrap()[0].id, "a");
        // event always refetches
        block_on(p.set_query_attribute(q, "event", "b"));
        assert_eq!(p.store().requests().len(), 2);
        assert_eq!(p.query_result(q).unwrap()[0].id, "b");
    }

    #[test]
    fn t_stale_nested_query() {
        let mut p = page("<hn-query kind=\"1\" e=\"x1\"><hn-element id=\"t\">\
                          <hn-query kind=\"0\" authors=\"#\"></hn-query>\
                          </hn-element></hn-query>",
                         vec![ev("n1", "u1", 1, 5, vec![Tag::new(["e", "x1"])], ""),
                              ev("n2", "u2", 1, 6, vec![Tag::new(["e", "x2"])], ""),
                              ev("p1", "u1", 0, 1, vec![], "{}"),
                              ev("p2", "u2", 0, 1, vec![], "{}")]);
        block_on(p.attach());
        let parent = query(&p, 0);
        let nested = query(&p, 1);
        assert_eq!(p.query_state(nested), Some(QueryState::Rendered));
        block_on(p.set_query_attribute(parent, "e", "x2"));
        assert!(!p.dom().contains(nested));
        assert_eq!(p.query_state(nested), None);

        let ((), msgs) = capture(|| block_on(p.set_query_attribute(nested, "authors", "zzz")));
        assert!(msgs.iter().any(|m| m.contains("no longer in the page")), "{msgs:?}");
        let fresh = query(&p, 1);
        assert_eq!(p.dom().attribute(fresh, "authors"), Some("u2"));
        assert_eq!(p.query_result(fresh).unwrap()[0].id, "p2");
    }

    #[test]
    fn t_debug_wrapper() {
        let mut p = page("<hn-query kind=\"1\" debug><hn-element id=\"x\"><b>i</b></hn-element></hn-query>",
                         vec![ev("a", "u1", 1, 5, vec![], "x")]);
        block_on(p.attach());
        let html = p.to_html();
        assert!(html.contains("<div class=\"hn-debug\"><div class=\"hn-debug-banner\">hn-query: kind=1 (1 rows)</div><hn-element"), "{html}");
        // driving again replaces the output
        let q = query(&p, 0);
        block_on(p.set_query_attribute(q, "e", "zz"));
        assert_eq!(p.elements_by_tag("hn-element").len(), 0);
        assert_eq!(p.query_state(q), Some(QueryState::Rendered));
    }
}
