//! The arena holding all nodes of a tree.

use std::cell::RefCell;
use anyhow::{bail, Result};
use kstring::KString;

/// Reference to a node in an `HtmlDom`. Only meaningful together
/// with the tree that handed it out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize { self.0 as usize }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(KString),
    Comment(KString),
    /// A container without markup of its own; the document root, and
    /// what parsing a fragment yields. Appending a fragment moves its
    /// children instead.
    Fragment,
}

impl Node {
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(e) => Some(e),
            _ => None
        }
    }
    fn can_have_children(&self) -> bool {
        match self {
            Node::Element(_) | Node::Fragment => true,
            Node::Text(_) | Node::Comment(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub name: KString,
    /// In source order; names are unique.
    pub attr: Vec<(KString, KString)>,
}

impl Element {
    pub fn new(name: impl Into<KString>) -> Element {
        Element { name: name.into(), attr: Vec::new() }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attr.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    pub fn set_attribute(&mut self, name: impl Into<KString>, value: impl Into<KString>) {
        let name = name.into();
        let value = value.into();
        if let Some(slot) = self.attr.iter_mut().find(|(k, _)| *k == name) {
            slot.1 = value;
        } else {
            self.attr.push((name, value));
        }
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<KString> {
        let i = self.attr.iter().position(|(k, _)| k == name)?;
        Some(self.attr.remove(i).1)
    }
}

#[derive(Debug)]
struct Slot {
    node: Node,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// A mutable HTML tree. Nodes live in an arena and are addressed via
/// `NodeId`; removed subtrees free their slots, using an id of a
/// removed node panics (check with `contains` first).
///
/// Ids are never handed out twice: the slot of a removed node stays
/// empty, so `contains` keeps reporting a stale id as removed instead
/// of it naming some newer node. The arena only grows. A tree is meant
/// to live as long as one page view; re-rendering a page for a long
/// time keeps adding slots, start a new tree to get rid of them.
pub struct HtmlDom {
    slots: Vec<Option<Slot>>,
    root: NodeId,
    // Temporary storage for serialisation:
    pub(crate) html_escape_tmp: RefCell<Vec<u8>>,
}

impl HtmlDom {
    /// A tree holding just an empty root fragment.
    pub fn new() -> HtmlDom {
        HtmlDom {
            slots: vec![Some(Slot {
                node: Node::Fragment,
                parent: None,
                children: Vec::new(),
            })],
            root: NodeId(0),
            html_escape_tmp: RefCell::new(Vec::new()),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    fn slot(&self, id: NodeId) -> &Slot {
        self.slots.get(id.index()).and_then(|s| s.as_ref()).unwrap_or_else(
            || panic!("invalid or removed {id:?}"))
    }

    fn slot_mut(&mut self, id: NodeId) -> &mut Slot {
        self.slots.get_mut(id.index()).and_then(|s| s.as_mut()).unwrap_or_else(
            || panic!("invalid or removed {id:?}"))
    }

    /// Whether `id` still refers to a node (i.e. it wasn't removed).
    pub fn contains(&self, id: NodeId) -> bool {
        matches!(self.slots.get(id.index()), Some(Some(_)))
    }

    // Always a fresh slot, see the type docs.
    fn allocate(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.slots.len() as u32);
        self.slots.push(Some(Slot { node, parent: None, children: Vec::new() }));
        id
    }

    // ---- construction ------------------------------------------------

    pub fn new_element<K, V>(
        &mut self,
        name: &str,
        attr: impl IntoIterator<Item = (K, V)>
    ) -> NodeId
    where K: Into<KString>, V: Into<KString>
    {
        let mut elt = Element::new(KString::from_ref(name));
        for (k, v) in attr {
            elt.set_attribute(k, v);
        }
        self.allocate(Node::Element(elt))
    }

    pub fn new_empty_element(&mut self, name: &str) -> NodeId {
        self.allocate(Node::Element(Element::new(KString::from_ref(name))))
    }

    pub fn new_text(&mut self, s: impl Into<KString>) -> NodeId {
        self.allocate(Node::Text(s.into()))
    }

    pub fn new_comment(&mut self, s: impl Into<KString>) -> NodeId {
        self.allocate(Node::Comment(s.into()))
    }

    pub fn new_fragment(&mut self) -> NodeId {
        self.allocate(Node::Fragment)
    }

    // ---- access ------------------------------------------------------

    pub fn node(&self, id: NodeId) -> &Node {
        &self.slot(id).node
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        self.slot(id).node.as_element()
    }

    fn element_mut(&mut self, id: NodeId) -> Result<&mut Element> {
        match &mut self.slot_mut(id).node {
            Node::Element(e) => Ok(e),
            node => bail!("not an element: {node:?}")
        }
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        self.element(id).is_some()
    }

    pub fn tag_name(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|e| e.name.as_str())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.slot(id).parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.slot(id).children
    }

    pub fn child_elements(&self, id: NodeId) -> Vec<NodeId> {
        self.children(id).iter().copied().filter(|c| self.is_element(*c)).collect()
    }

    pub fn first_element_child(&self, id: NodeId) -> Option<NodeId> {
        self.children(id).iter().copied().find(|c| self.is_element(*c))
    }

    /// All nodes below `id` in document order (pre-order), not
    /// including `id` itself.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut res = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(n) = stack.pop() {
            res.push(n);
            stack.extend(self.children(n).iter().rev());
        }
        res
    }

    /// The element descendants of `id` for which `pred` holds, in
    /// document order.
    pub fn find_elements(&self, id: NodeId, pred: impl Fn(&Element) -> bool) -> Vec<NodeId> {
        self.descendants(id).into_iter().filter(
            |n| self.element(*n).map_or(false, |e| pred(e))).collect()
    }

    /// Parent, grandparent etc. of `id`, nearest first.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut res = Vec::new();
        let mut cur = self.parent(id);
        while let Some(p) = cur {
            res.push(p);
            cur = self.parent(p);
        }
        res
    }

    pub fn is_ancestor_of(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut cur = self.parent(id);
        while let Some(p) = cur {
            if p == ancestor {
                return true
            }
            cur = self.parent(p);
        }
        false
    }

    /// Whether `id` is (still) reachable from the root.
    pub fn is_connected(&self, id: NodeId) -> bool {
        id == self.root || self.is_ancestor_of(self.root, id)
    }

    pub fn get_element_by_id(&self, scope: NodeId, idval: &str) -> Option<NodeId> {
        self.descendants(scope).into_iter().find(
            |n| self.attribute(*n, "id") == Some(idval))
    }

    // ---- attributes --------------------------------------------------

    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id)?.attribute(name)
    }

    pub fn has_attribute(&self, id: NodeId, name: &str) -> bool {
        self.attribute(id, name).is_some()
    }

    /// Empty for non-elements.
    pub fn attributes(&self, id: NodeId) -> &[(KString, KString)] {
        match self.element(id) {
            Some(e) => &e.attr,
            None => &[]
        }
    }

    pub fn set_attribute(
        &mut self,
        id: NodeId,
        name: impl Into<KString>,
        value: impl Into<KString>
    ) -> Result<()> {
        self.element_mut(id)?.set_attribute(name, value);
        Ok(())
    }

    pub fn remove_attribute(&mut self, id: NodeId, name: &str) -> Option<KString> {
        self.element_mut(id).ok()?.remove_attribute(name)
    }

    // ---- structure changes -------------------------------------------

    fn check_insertion(&self, parent: NodeId, child: NodeId) -> Result<()> {
        if ! self.slot(parent).node.can_have_children() {
            bail!("can't add children to {:?}", self.slot(parent).node)
        }
        if child == parent || self.is_ancestor_of(child, parent) {
            bail!("inserting {child:?} into {parent:?} would create a cycle")
        }
        if child == self.root {
            bail!("can't move the root node")
        }
        Ok(())
    }

    /// Unlink `id` from its parent; it stays allocated and can be
    /// inserted elsewhere.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(p) = self.slot_mut(id).parent.take() {
            self.slot_mut(p).children.retain(|c| *c != id);
        }
    }

    /// Detach `id` and free it with all of its descendants.
    pub fn remove(&mut self, id: NodeId) {
        if id == self.root {
            self.clear_children(id);
            return
        }
        self.detach(id);
        let mut ids = self.descendants(id);
        ids.push(id);
        for n in ids {
            self.slots[n.index()] = None;
        }
    }

    pub fn clear_children(&mut self, id: NodeId) {
        let children = self.slot(id).children.clone();
        for c in children {
            self.remove(c);
        }
    }

    /// The nodes to actually insert when inserting `child`: its
    /// children if it is a fragment (which is then freed).
    fn take_insertable(&mut self, child: NodeId) -> Vec<NodeId> {
        if let Node::Fragment = self.slot(child).node {
            self.detach(child);
            let children = std::mem::take(&mut self.slot_mut(child).children);
            self.slots[child.index()] = None;
            children
        } else {
            self.detach(child);
            vec![child]
        }
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.check_insertion(parent, child)?;
        for c in self.take_insertable(child) {
            self.slot_mut(c).parent = Some(parent);
            self.slot_mut(parent).children.push(c);
        }
        Ok(())
    }

    /// Insert `child` into `parent` right before `reference`, which
    /// must be a child of `parent`.
    pub fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: NodeId)
                         -> Result<()> {
        self.check_insertion(parent, child)?;
        if child == reference {
            return Ok(())
        }
        if self.parent(reference) != Some(parent) {
            bail!("{reference:?} is not a child of {parent:?}")
        }
        for c in self.take_insertable(child) {
            let pos = self.children(parent).iter().position(|x| *x == reference)
                .expect("checked above");
            self.slot_mut(c).parent = Some(parent);
            self.slot_mut(parent).children.insert(pos, c);
        }
        Ok(())
    }

    pub fn insert_after(&mut self, parent: NodeId, child: NodeId, reference: NodeId)
                        -> Result<()> {
        let next = {
            let siblings = self.children(parent);
            match siblings.iter().position(|x| *x == reference) {
                Some(i) => siblings.get(i + 1).copied(),
                None => bail!("{reference:?} is not a child of {parent:?}")
            }
        };
        match next {
            Some(n) => self.insert_before(parent, child, n),
            None => self.append_child(parent, child),
        }
    }

    /// Free all children of `parent` and insert `children` instead.
    pub fn replace_children(
        &mut self,
        parent: NodeId,
        children: impl IntoIterator<Item = NodeId>
    ) -> Result<()> {
        self.clear_children(parent);
        for c in children {
            self.append_child(parent, c)?;
        }
        Ok(())
    }

    /// Replace `old` (which is freed) by `new` at the same position.
    pub fn replace_with(&mut self, old: NodeId, new: NodeId) -> Result<()> {
        let parent = match self.parent(old) {
            Some(p) => p,
            None => bail!("{old:?} has no parent")
        };
        self.insert_before(parent, new, old)?;
        self.remove(old);
        Ok(())
    }

    /// Move the children of `from` to the end of `to`.
    pub fn move_children(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        let children = self.children(from).to_vec();
        for c in children {
            self.append_child(to, c)?;
        }
        Ok(())
    }

    /// Replace the children of `id` with a single text node.
    pub fn set_text(&mut self, id: NodeId, s: impl Into<KString>) -> Result<()> {
        let t = self.new_text(s);
        self.replace_children(id, [t])
    }

    /// The concatenated text of all text nodes below `id` (or the
    /// text itself for a text node).
    pub fn text_content(&self, id: NodeId) -> String {
        let mut res = String::new();
        if let Node::Text(s) = self.node(id) {
            res.push_str(s);
        }
        for n in self.descendants(id) {
            if let Node::Text(s) = self.node(n) {
                res.push_str(s);
            }
        }
        res
    }

    // ---- copying -----------------------------------------------------

    /// A detached copy of the subtree at `id`.
    pub fn deep_clone(&mut self, id: NodeId) -> NodeId {
        let node = self.node(id).clone();
        let children = self.children(id).to_vec();
        let new = self.allocate(node);
        for c in children {
            let c2 = self.deep_clone(c);
            self.slot_mut(c2).parent = Some(new);
            self.slot_mut(new).children.push(c2);
        }
        new
    }

    /// A detached copy, in this tree, of the subtree at `id` in
    /// `other`. Importing the root of `other` yields a fragment.
    pub fn import(&mut self, other: &HtmlDom, id: NodeId) -> NodeId {
        let new = self.allocate(other.node(id).clone());
        for c in other.children(id) {
            let c2 = self.import(other, *c);
            self.slot_mut(c2).parent = Some(new);
            self.slot_mut(new).children.push(c2);
        }
        new
    }

    /// A new tree holding a copy of the children of `id`.
    pub fn extract(&self, id: NodeId) -> HtmlDom {
        let mut dom = HtmlDom::new();
        let root = dom.root();
        for c in self.children(id) {
            let c2 = dom.import(self, *c);
            dom.slot_mut(c2).parent = Some(root);
            dom.slot_mut(root).children.push(c2);
        }
        dom
    }
}

impl Default for HtmlDom {
    fn default() -> Self {
        HtmlDom::new()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (HtmlDom, NodeId, NodeId, NodeId) {
        let mut dom = HtmlDom::new();
        let div = dom.new_element("div", [("id", "a")]);
        let p = dom.new_empty_element("p");
        let t = dom.new_text("hi");
        dom.append_child(dom.root(), div).unwrap();
        dom.append_child(div, p).unwrap();
        dom.append_child(p, t).unwrap();
        (dom, div, p, t)
    }

    #[test]
    fn t_structure() {
        let (mut dom, div, p, t) = sample();
        assert_eq!(dom.descendants(dom.root()), vec![div, p, t]);
        assert_eq!(dom.parent(t), Some(p));
        assert_eq!(dom.ancestors(t), vec![p, div, dom.root()]);
        assert!(dom.is_connected(t));
        assert_eq!(dom.text_content(div), "hi");
        assert!(dom.append_child(p, div).is_err());
        assert!(dom.append_child(t, div).is_err());
        dom.detach(p);
        assert!(! dom.is_connected(t));
        assert!(dom.children(div).is_empty());
        dom.remove(p);
        assert!(! dom.contains(t));
    }

    #[test]
    fn t_removed_ids_stay_removed() {
        let (mut dom, div, p, t) = sample();
        dom.remove(p);
        let fresh: Vec<NodeId> = (0..4).map(|i| dom.new_text(format!("n{i}"))).collect();
        for id in &fresh {
            dom.append_child(div, *id).unwrap();
        }
        assert!(! dom.contains(p));
        assert!(! dom.contains(t));
        assert!(! fresh.contains(&p) && ! fresh.contains(&t));
        assert_eq!(dom.text_content(div), "n0n1n2n3");
    }

    #[test]
    fn t_attributes() {
        let (mut dom, div, p, t) = sample();
        assert_eq!(dom.attribute(div, "id"), Some("a"));
        dom.set_attribute(div, "id", "b").unwrap();
        dom.set_attribute(div, "class", "c").unwrap();
        assert_eq!(dom.attributes(div).len(), 2);
        assert_eq!(dom.attribute(div, "id"), Some("b"));
        assert_eq!(dom.remove_attribute(div, "class"), Some("c".into()));
        assert!(! dom.has_attribute(div, "class"));
        assert!(dom.set_attribute(t, "x", "y").is_err());
        assert_eq!(dom.get_element_by_id(dom.root(), "b"), Some(div));
        assert_eq!(dom.get_element_by_id(dom.root(), "a"), None);
        assert_eq!(dom.tag_name(p), Some("p"));
    }

    #[test]
    fn t_insert_and_fragments() {
        let (mut dom, div, p, _t) = sample();
        let frag = dom.new_fragment();
        let a = dom.new_empty_element("a");
        let b = dom.new_empty_element("b");
        dom.append_child(frag, a).unwrap();
        dom.append_child(frag, b).unwrap();
        dom.insert_before(div, frag, p).unwrap();
        assert_eq!(dom.children(div), &[a, b, p]);
        assert!(! dom.contains(frag));
        let c = dom.new_empty_element("c");
        dom.insert_after(div, c, a).unwrap();
        assert_eq!(dom.children(div), &[a, c, b, p]);
        let x = dom.new_text("x");
        dom.replace_with(c, x).unwrap();
        assert_eq!(dom.children(div), &[a, x, b, p]);
        assert!(! dom.contains(c));
    }

    #[test]
    fn t_clone_and_import() {
        let (mut dom, div, _p, _t) = sample();
        let copy = dom.deep_clone(div);
        assert_eq!(dom.parent(copy), None);
        assert_eq!(dom.text_content(copy), "hi");
        assert_ne!(dom.children(copy), dom.children(div));

        let mut other = HtmlDom::new();
        let imported = other.import(&dom, div);
        assert_eq!(other.attribute(imported, "id"), Some("a"));
        assert_eq!(other.text_content(imported), "hi");

        let extracted = dom.extract(div);
        assert_eq!(extracted.children(extracted.root()).len(), 1);
    }

    #[test]
    fn t_set_text() {
        let (mut dom, div, _p, t) = sample();
        dom.set_text(div, "new").unwrap();
        assert_eq!(dom.text_content(div), "new");
        assert!(! dom.contains(t));
    }
}
