//! Publishing from `hn-form`, and refreshing named queries afterwards.
//!
//! A form with `target="#results"` doesn't reload the page: the id of
//! the new record goes into the page cursor under `results`, and every
//! `hn-query id="results"` is pointed at it (via its `event` attribute,
//! or the one named by `target-attr`) and driven again. `hn-refresh`
//! replays the same from the cursor.

use hn_dom::NodeId;
use hn_util::warn;

use crate::error::HnError;
use crate::event::{Tag, UnsignedEvent};
use crate::page::Page;
use crate::store::EventStore;
use crate::util::unixtime;

/// Named form values, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormData(pub Vec<(String, String)>);

impl FormData {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, name: &str, value: &str) {
        match self.0.iter_mut().find(|(k, _)| k == name) {
            Some(slot) => slot.1 = value.to_string(),
            None => self.0.push((name.to_string(), value.to_string())),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Nothing to publish.
    Rejected,
    Failed(HnError),
    /// Published; the queries named by `target` were driven again.
    Refreshed { event_id: String, targets: Vec<NodeId> },
    /// Published; the page was reloaded.
    Reloaded { event_id: String },
}

/// The tag values of an `a` field: a JSON array, or a single value.
fn a_values(v: &str) -> Vec<String> {
    match serde_json::from_str::<Vec<String>>(v) {
        Ok(values) => values,
        Err(_) => vec![v.to_string()],
    }
}

impl<S: EventStore> Page<S> {
    /// `name` on `form`, or on the `hn-form` containing it.
    fn form_attribute(&self, form: NodeId, name: &str) -> Option<String> {
        let host = self.dom.ancestors(form).into_iter()
            .find(|n| self.dom.tag_name(*n) == Some("hn-form"));
        self.dom.attribute(form, name)
            .or_else(|| self.dom.attribute(host?, name))
            .map(String::from)
    }

    fn form_fields(&self, form: NodeId) -> Vec<NodeId> {
        self.dom.find_elements(form, |e| {
            (e.name == "input" || e.name == "textarea") && e.attribute("name").is_some()
        })
    }

    /// The values a browser would submit for `form`.
    pub fn form_data(&self, form: NodeId) -> FormData {
        let mut data = FormData::default();
        if !self.dom.contains(form) {
            warn!("form_data: node is no longer in the page");
            return data
        }
        for field in self.form_fields(form) {
            let name = self.dom.attribute(field, "name").unwrap_or("").to_string();
            if self.dom.tag_name(field) == Some("textarea") {
                data.0.push((name, self.dom.text_content(field)));
                continue
            }
            let ty = self.dom.attribute(field, "type").unwrap_or("text");
            match ty {
                "submit" | "button" | "reset" => continue,
                "checkbox" | "radio" if !self.dom.has_attribute(field, "checked") => continue,
                _ => ()
            }
            let value = self.dom.attribute(field, "value").unwrap_or("").to_string();
            data.0.push((name, value));
        }
        data
    }

    /// Set the field `name` of `form`, as if typed in.
    pub fn set_form_field(&mut self, form: NodeId, name: &str, value: &str) -> bool {
        if !self.dom.contains(form) {
            warn!("set_form_field: node is no longer in the page");
            return false
        }
        let field = match self.form_fields(form).into_iter()
            .find(|f| self.dom.attribute(*f, "name") == Some(name))
        {
            Some(f) => f,
            None => return false
        };
        let res = if self.dom.tag_name(field) == Some("textarea") {
            self.dom.set_text(field, value.to_string())
        } else {
            self.dom.set_attribute(field, "value", value.to_string())
        };
        if let Err(e) = res {
            warn!("set_form_field: {e:#}");
            return false
        }
        true
    }

    fn record_from(&self, form: NodeId, data: &FormData) -> Result<UnsignedEvent, HnError> {
        let kind = match self.form_attribute(form, "kind") {
            Some(k) => k.trim().parse::<u32>().map_err(|_| HnError::InvalidKind(Some(k)))?,
            None => self.config.note_kind,
        };
        let mut tags = Vec::new();
        if let Some(p) = data.get("p").filter(|p| !p.is_empty()) {
            tags.push(Tag::new(["p", p]));
        }
        if let Some(a) = data.get("a").filter(|a| !a.is_empty()) {
            let values = a_values(a);
            if !values.is_empty() {
                tags.push(Tag(std::iter::once("a".to_string()).chain(values).collect()));
            }
        }
        if let Some(i) = data.get("i").filter(|i| !i.is_empty()) {
            tags.push(Tag::new(["i", i]));
        }
        Ok(UnsignedEvent {
            kind,
            created_at: unixtime(),
            tags,
            content: data.get("content").unwrap_or("").to_string(),
        })
    }

    /// Publish a record made from `data`, then refresh the form's
    /// target (or reload the page).
    pub async fn submit_form(&mut self, form: NodeId, data: FormData) -> SubmitOutcome {
        if !self.dom.contains(form) {
            warn!("submit: form is no longer in the page");
            return SubmitOutcome::Rejected
        }
        let blank = |name: &str| data.get(name).map_or(true, |v| v.trim().is_empty());
        if blank("content") && blank("i") {
            self.notice("Please enter some content".into());
            return SubmitOutcome::Rejected
        }
        let unsigned = match self.record_from(form, &data) {
            Ok(u) => u,
            Err(e) => {
                self.notice(e.to_string());
                return SubmitOutcome::Failed(e)
            }
        };
        let published = async {
            let ev = self.store.sign(unsigned).await?;
            self.store.publish(&ev).await?;
            Ok::<_, anyhow::Error>(ev)
        }.await;
        let ev = match published {
            Ok(ev) => ev,
            Err(e) => {
                let e = HnError::PublishFailure(format!("{e:#}"));
                self.notice(e.to_string());
                return SubmitOutcome::Failed(e)
            }
        };

        match self.form_attribute(form, "target") {
            Some(target) => {
                let attr = self.form_attribute(form, "target-attr")
                    .unwrap_or_else(|| "event".into());
                let logical = target.trim_start_matches('#').to_string();
                self.location.cursor_set(&logical, &ev.id);
                let targets = self.retarget(&logical, &attr, &ev.id).await;
                SubmitOutcome::Refreshed { event_id: ev.id, targets }
            }
            None => {
                self.reload().await;
                SubmitOutcome::Reloaded { event_id: ev.id }
            }
        }
    }

    /// Submit `form` with its current field values.
    pub async fn submit(&mut self, form: NodeId) -> SubmitOutcome {
        let data = self.form_data(form);
        self.submit_form(form, data).await
    }

    /// Point every query with id `logical` at `event_id` and drive
    /// them one after another, in document order.
    async fn retarget(&mut self, logical: &str, attr: &str, event_id: &str) -> Vec<NodeId> {
        let targets = self.find_queries(logical);
        if targets.is_empty() {
            warn!("no hn-query with id {logical:?} to refresh");
        }
        for q in &targets {
            // An earlier one may have re-rendered this one away.
            if self.dom.contains(*q) {
                self.retarget_query(*q, attr, event_id).await;
            }
        }
        targets.into_iter().filter(|q| self.dom.contains(*q)).collect()
    }

    async fn replay_cursor(&mut self, target: &str, attr: &str) -> Vec<NodeId> {
        let logical = target.trim_start_matches('#').to_string();
        let event_id = match self.location.cursor_get(&logical) {
            Some(id) => id.to_string(),
            None => {
                warn!("no cursor for {logical:?}, nothing to refresh");
                return Vec::new()
            }
        };
        self.retarget(&logical, attr, &event_id).await
    }

    /// Drive the queries with id `target` again, at the record the
    /// cursor holds for them.
    pub async fn refresh(&mut self, target: &str) -> Vec<NodeId> {
        self.replay_cursor(target, "event").await
    }

    /// What clicking the `hn-refresh` element `node` does.
    pub async fn click_refresh(&mut self, node: NodeId) -> Vec<NodeId> {
        if !self.dom.contains(node) {
            warn!("hn-refresh is no longer in the page");
            return Vec::new()
        }
        let target = match self.dom.attribute(node, "target") {
            Some(t) => t.to_string(),
            None => {
                warn!("hn-refresh without target");
                return Vec::new()
            }
        };
        let attr = self.dom.attribute(node, "target-attr").unwrap_or("event").to_string();
        self.replay_cursor(&target, &attr).await
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HnConfig;
    use crate::cursor::PageLocation;
    use crate::event::Event;
    use crate::store::{KeySigner, MemoryStore};
    use futures::executor::block_on;
    use hn_util::warn::capture;

    const SECRET: &str = "0000000000000000000000000000000000000000000000000000000000000003";

    fn page(markup: &str, signed: bool) -> Page<MemoryStore> {
        let mut store = MemoryStore::new();
        if signed {
            store = store.with_signer(KeySigner::from_secret(SECRET).unwrap());
        }
        Page::new(markup, store, HnConfig::default(),
                  PageLocation::parse("/page").unwrap()).unwrap()
    }

    fn form(p: &Page<MemoryStore>) -> NodeId {
        p.elements_by_tag("hn-form")[0]
    }

    #[test]
    fn t_form_data() {
        let mut p = page("<hn-form><input name=\"content\" value=\"hi\">\
                          <input type=\"checkbox\" name=\"x\" value=\"1\">\
                          <input type=\"checkbox\" name=\"y\" value=\"2\" checked>\
                          <textarea name=\"t\">long</textarea>\
                          <input type=\"submit\" name=\"go\" value=\"Go\"></hn-form>", false);
        block_on(p.attach());
        let f = form(&p);
        let data = p.form_data(f);
        assert_eq!(data.0, vec![("content".to_string(), "hi".to_string()),
                                ("y".to_string(), "2".to_string()),
                                ("t".to_string(), "long".to_string())]);
        assert!(p.set_form_field(f, "t", "changed"));
        assert!(!p.set_form_field(f, "nope", ""));
        assert_eq!(p.form_data(f).get("t"), Some("changed"));
    }

    #[test]
    fn t_rejected() {
        let mut p = page("<hn-form><input name=\"content\" value=\"  \"></hn-form>", true);
        block_on(p.attach());
        let f = form(&p);
        assert_eq!(block_on(p.submit(f)), SubmitOutcome::Rejected);
        assert_eq!(p.notices().to_vec(), vec!["Please enter some content".to_string()]);
        assert!(p.store().events().is_empty());
    }

    #[test]
    fn t_record() {
        let mut p = page("<hn-form kind=\"1111\"><input name=\"content\" value=\"c\">\
                          <input name=\"p\" value=\"pk\">\
                          <input name=\"a\" value='[\"30023:pk:x\",\"wss://r\"]'></hn-form>", true);
        block_on(p.attach());
        let f = form(&p);
        let out = block_on(p.submit(f));
        assert!(matches!(out, SubmitOutcome::Reloaded { .. }), "{out:?}");
        let events = p.store().events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, 1111);
        assert_eq!(events[0].tags, vec![Tag::new(["p", "pk"]),
                                        Tag::new(["a", "30023:pk:x", "wss://r"])]);
    }

    #[test]
    fn t_publish_failure() {
        let mut p = page("<hn-form target=\"#r\"><input name=\"content\" value=\"c\"></hn-form>", false);
        block_on(p.attach());
        let f = form(&p);
        match block_on(p.submit(f)) {
            SubmitOutcome::Failed(HnError::PublishFailure(_)) => (),
            other => panic!("{other:?}")
        }
        assert_eq!(p.notices().len(), 1);
        assert_eq!(p.location().cursor_get("r"), None);
    }

    #[test]
    fn t_stale_form_in_instance() {
        let mut p = page("<hn-query id=\"q\" kind=\"1\"><hn-element id=\"c\">\
                          <hn-form target=\"#q\"><input name=\"content\" value=\"x\"></hn-form>\
                          <hn-refresh target=\"#q\"></hn-refresh>\
                          </hn-element></hn-query>", true);
        p.store().add(Event {
            id: "n1".into(),
            pubkey: "abc".into(),
            kind: 1,
            created_at: 1,
            tags: vec![],
            content: "first".into(),
            sig: "sig".into(),
        });
        block_on(p.attach());
        let q = p.find_queries("q")[0];
        let f = form(&p);
        let r = p.elements_by_tag("hn-refresh")[0];
        block_on(p.set_query_attribute(q, "event", "none"));
        assert!(!p.dom().contains(f));
        assert!(!p.dom().contains(r));
        let published = p.store().events().len();

        let (outcomes, msgs) = capture(|| {
            let data = p.form_data(f);
            let set = p.set_form_field(f, "content", "y");
            let submitted = block_on(p.submit(f));
            let refreshed = block_on(p.click_refresh(r));
            (data, set, submitted, refreshed)
        });
        assert_eq!(outcomes, (FormData::default(), false, SubmitOutcome::Rejected, vec![]));
        assert!(!msgs.is_empty());
        assert!(msgs.iter().all(|m| m.contains("no longer in the page")), "{msgs:?}");
        assert_eq!(p.store().events().len(), published);
    }

    #[test]
    fn t_refresh_without_cursor() {
        let mut p = page("<hn-refresh target=\"#r\"></hn-refresh>", false);
        block_on(p.attach());
        let r = p.elements_by_tag("hn-refresh")[0];
        assert!(block_on(p.click_refresh(r)).is_empty());
        assert!(p.store().requests().is_empty());
    }
}
