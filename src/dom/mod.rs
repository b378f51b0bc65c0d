//! An arena-allocated DOM with out-of-band node metadata.
//!
//! Nodes are owned by their [`Document`] and addressed by [`NodeId`]. Removing
//! a node only detaches it; ids stay valid for the lifetime of the document,
//! and cloning a document preserves every id, which lets two versions of the
//! same tree be compared node-for-node.

use indexmap::IndexMap;
use std::collections::HashMap;

pub use data::{
    AttribText, DataMw, DataMwAttrib, DataMwBody, DataMwError, DataParsoid, DiffMarks,
    Invocation, NodeData, ParamInfo, ParamKey, Syntax, TempFlags, TemplateInfo, TemplatePart,
    TemplateTarget,
};

pub mod data;
pub mod serialize;

/// The identity of a node within its document.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NodeId(usize);

/// An element.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Element {
    /// The lowercase tag name.
    pub name: String,
    /// The attributes, in source order.
    pub attrs: IndexMap<String, String>,
}

/// The kind and content of a node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NodeKind {
    /// The document root.
    Document,
    /// An element.
    Element(Element),
    /// A text node.
    Text(String),
    /// A comment.
    Comment(String),
    /// A processing instruction. These never come out of wikitext.
    ProcessingInstruction {
        /// The target.
        target: String,
        /// The data.
        data: String,
    },
}

/// A node in the arena.
#[derive(Clone, Debug)]
struct Node {
    /// The kind and content.
    kind: NodeKind,
    /// The parent, if attached.
    parent: Option<NodeId>,
    /// The children, in order.
    children: Vec<NodeId>,
}

/// A document tree.
#[derive(Clone, Debug)]
pub struct Document {
    /// All nodes ever created in this document.
    nodes: Vec<Node>,
    /// Node metadata, keyed by node identity.
    data: HashMap<NodeId, NodeData>,
    /// The `<body>` element.
    body: NodeId,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Creates a document containing only an empty body.
    #[must_use]
    pub fn new() -> Self {
        let mut doc = Self {
            nodes: vec![Node {
                kind: NodeKind::Document,
                parent: None,
                children: Vec::new(),
            }],
            data: HashMap::new(),
            body: NodeId(0),
        };
        let body = doc.create_element("body");
        doc.append_child(doc.root(), body);
        doc.body = body;
        doc
    }

    /// The document root.
    #[must_use]
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// The body element.
    #[must_use]
    pub fn body(&self) -> NodeId {
        self.body
    }

    /// Creates a detached node.
    pub fn create_node(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    /// Creates a detached element with no attributes.
    pub fn create_element(&mut self, name: &str) -> NodeId {
        self.create_node(NodeKind::Element(Element {
            name: name.to_ascii_lowercase(),
            attrs: IndexMap::new(),
        }))
    }

    /// Creates a detached text node.
    pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
        self.create_node(NodeKind::Text(text.into()))
    }

    /// Creates a detached comment.
    pub fn create_comment(&mut self, text: impl Into<String>) -> NodeId {
        self.create_node(NodeKind::Comment(text.into()))
    }

    /// The kind of a node.
    #[must_use]
    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    /// The kind of a node, mutably.
    pub fn kind_mut(&mut self, id: NodeId) -> &mut NodeKind {
        &mut self.nodes[id.0].kind
    }

    /// The element data of a node, if it is an element.
    #[must_use]
    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match self.kind(id) {
            NodeKind::Element(el) => Some(el),
            _ => None,
        }
    }

    /// The element data of a node, mutably, if it is an element.
    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        match self.kind_mut(id) {
            NodeKind::Element(el) => Some(el),
            _ => None,
        }
    }

    /// Returns true if the node is an element.
    #[must_use]
    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.kind(id), NodeKind::Element(_))
    }

    /// Returns true if the node is an element with the given name.
    #[must_use]
    pub fn is_element_named(&self, id: NodeId, name: &str) -> bool {
        self.name(id) == Some(name)
    }

    /// The tag name of an element.
    #[must_use]
    pub fn name(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|el| el.name.as_str())
    }

    /// The content of a text node.
    #[must_use]
    pub fn text(&self, id: NodeId) -> Option<&str> {
        match self.kind(id) {
            NodeKind::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Returns true if the node is a text node.
    #[must_use]
    pub fn is_text(&self, id: NodeId) -> bool {
        matches!(self.kind(id), NodeKind::Text(_))
    }

    /// Returns true if the node is a comment.
    #[must_use]
    pub fn is_comment(&self, id: NodeId) -> bool {
        matches!(self.kind(id), NodeKind::Comment(_))
    }

    /// An attribute value of an element.
    #[must_use]
    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id)
            .and_then(|el| el.attrs.get(name))
            .map(String::as_str)
    }

    /// Returns true if an element has the given attribute.
    #[must_use]
    pub fn has_attr(&self, id: NodeId, name: &str) -> bool {
        self.attr(id, name).is_some()
    }

    /// Sets an attribute of an element. Does nothing for other nodes.
    pub fn set_attr(&mut self, id: NodeId, name: &str, value: impl Into<String>) {
        if let Some(el) = self.element_mut(id) {
            el.attrs.insert(name.to_string(), value.into());
        }
    }

    /// Removes an attribute of an element, returning its value.
    pub fn remove_attr(&mut self, id: NodeId, name: &str) -> Option<String> {
        self.element_mut(id)
            .and_then(|el| el.attrs.shift_remove(name))
    }

    /// Returns true if the space-separated `typeof` attribute of an element
    /// contains `ty`.
    #[must_use]
    pub fn has_type_of(&self, id: NodeId, ty: &str) -> bool {
        self.attr(id, "typeof")
            .is_some_and(|types| types.split_ascii_whitespace().any(|t| t == ty))
    }

    /// Returns the first `typeof` entry of an element that starts with
    /// `prefix`.
    #[must_use]
    pub fn type_of_with_prefix(&self, id: NodeId, prefix: &str) -> Option<&str> {
        self.attr(id, "typeof")
            .and_then(|types| types.split_ascii_whitespace().find(|t| t.starts_with(prefix)))
    }

    /// Adds `ty` to the `typeof` attribute of an element.
    pub fn add_type_of(&mut self, id: NodeId, ty: &str) {
        let value = match self.attr(id, "typeof") {
            Some(types) if types.split_ascii_whitespace().any(|t| t == ty) => return,
            Some(types) if !types.is_empty() => format!("{types} {ty}"),
            _ => ty.to_string(),
        };
        self.set_attr(id, "typeof", value);
    }

    /// The parent of a node.
    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    /// The children of a node.
    #[must_use]
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    /// The first child of a node.
    #[must_use]
    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.children(id).first().copied()
    }

    /// The last child of a node.
    #[must_use]
    pub fn last_child(&self, id: NodeId) -> Option<NodeId> {
        self.children(id).last().copied()
    }

    /// The position of a node within its parent.
    #[must_use]
    pub fn index(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.children(parent).iter().position(|c| *c == id)
    }

    /// The next sibling of a node.
    #[must_use]
    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let index = self.index(id)?;
        self.children(parent).get(index + 1).copied()
    }

    /// The previous sibling of a node.
    #[must_use]
    pub fn previous_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let index = self.index(id)?;
        index
            .checked_sub(1)
            .and_then(|index| self.children(parent).get(index).copied())
    }

    /// Returns true if `ancestor` is `id` or one of its ancestors.
    #[must_use]
    pub fn is_inclusive_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut node = Some(id);
        while let Some(n) = node {
            if n == ancestor {
                return true;
            }
            node = self.parent(n);
        }
        false
    }

    /// Detaches a node from its parent.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent.take() {
            self.nodes[parent.0].children.retain(|c| *c != id);
        }
    }

    /// Appends `child` to `parent`, detaching it from any previous parent.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.insert_before(parent, child, None);
    }

    /// Inserts `child` into `parent` before `reference`, or at the end if
    /// `reference` is `None` or is not a child of `parent`.
    pub fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: Option<NodeId>) {
        debug_assert!(!self.is_inclusive_ancestor(child, parent));
        self.detach(child);
        let siblings = &mut self.nodes[parent.0].children;
        let index = reference
            .and_then(|r| siblings.iter().position(|c| *c == r))
            .unwrap_or(siblings.len());
        siblings.insert(index, child);
        self.nodes[child.0].parent = Some(parent);
    }

    /// Inserts `node` immediately before `reference` in the same parent.
    pub fn insert_sibling_before(&mut self, reference: NodeId, node: NodeId) {
        if let Some(parent) = self.parent(reference) {
            self.insert_before(parent, node, Some(reference));
        }
    }

    /// Replaces `old` with `new` in the tree.
    pub fn replace(&mut self, old: NodeId, new: NodeId) {
        if let Some(parent) = self.parent(old) {
            self.insert_before(parent, new, Some(old));
            self.detach(old);
        }
    }

    /// Moves all children of `from` into `to`, before `reference`.
    pub fn migrate_children(&mut self, from: NodeId, to: NodeId, reference: Option<NodeId>) {
        for child in self.children(from).to_vec() {
            self.insert_before(to, child, reference);
        }
    }

    /// Returns all descendants of a node in document order, not including
    /// the node itself.
    #[must_use]
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = self.children(id).iter().rev().copied().collect::<Vec<_>>();
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(self.children(node).iter().rev().copied());
        }
        out
    }

    /// The concatenated text of a node and its descendants.
    #[must_use]
    pub fn text_content(&self, id: NodeId) -> String {
        match self.kind(id) {
            NodeKind::Text(text) => text.clone(),
            NodeKind::Comment(_) | NodeKind::ProcessingInstruction { .. } => String::new(),
            NodeKind::Document | NodeKind::Element(_) => self
                .descendants(id)
                .into_iter()
                .filter_map(|d| self.text(d))
                .collect(),
        }
    }

    /// The metadata of a node, if any has been attached.
    #[must_use]
    pub fn data(&self, id: NodeId) -> Option<&NodeData> {
        self.data.get(&id)
    }

    /// The metadata of a node, attaching an empty record if there is none.
    pub fn data_mut(&mut self, id: NodeId) -> &mut NodeData {
        self.data.entry(id).or_default()
    }

    /// Replaces the metadata of a node.
    pub fn set_data(&mut self, id: NodeId, data: NodeData) {
        self.data.insert(id, data);
    }

    /// Detaches and returns the metadata of a node.
    pub fn take_data(&mut self, id: NodeId) -> Option<NodeData> {
        self.data.remove(&id)
    }

    /// The provenance data of a node.
    #[must_use]
    pub fn data_parsoid(&self, id: NodeId) -> Option<&DataParsoid> {
        self.data(id).map(|d| &d.parsoid)
    }

    /// The provenance data of a node, mutably.
    pub fn data_parsoid_mut(&mut self, id: NodeId) -> &mut DataParsoid {
        &mut self.data_mut(id).parsoid
    }

    /// The editing metadata of a node.
    #[must_use]
    pub fn data_mw(&self, id: NodeId) -> Option<&DataMw> {
        self.data(id).and_then(|d| d.mw.as_deref())
    }

    /// The editing metadata of a node, mutably, creating it if needed.
    pub fn data_mw_mut(&mut self, id: NodeId) -> &mut DataMw {
        self.data_mut(id).mw.get_or_insert_with(Box::default)
    }

    /// The DOM source range of a node.
    #[must_use]
    pub fn dsr(&self, id: NodeId) -> Option<crate::wikitext::DomSourceRange> {
        self.data_parsoid(id).and_then(|dp| dp.dsr)
    }

    /// Deep-copies `node` from `other` into this document, including all
    /// metadata. The copy is detached.
    pub fn import(&mut self, other: &Document, node: NodeId) -> NodeId {
        let copy = self.create_node(other.kind(node).clone());
        if let Some(data) = other.data(node) {
            self.data.insert(copy, data.clone());
        }
        for child in other.children(node) {
            let child = self.import(other, *child);
            self.append_child(copy, child);
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_mutation() {
        let mut doc = Document::new();
        let body = doc.body();
        let p = doc.create_element("P");
        let a = doc.create_text("a");
        let b = doc.create_text("b");
        doc.append_child(body, p);
        doc.append_child(p, b);
        doc.insert_before(p, a, Some(b));
        assert_eq!(doc.name(p), Some("p"));
        assert_eq!(doc.children(p), &[a, b]);
        assert_eq!(doc.next_sibling(a), Some(b));
        assert_eq!(doc.previous_sibling(a), None);
        assert_eq!(doc.text_content(body), "ab");

        doc.detach(a);
        assert_eq!(doc.children(p), &[b]);
        assert_eq!(doc.parent(a), None);

        let span = doc.create_element("span");
        doc.replace(b, span);
        doc.append_child(span, b);
        assert_eq!(doc.descendants(body), vec![p, span, b]);
    }

    #[test]
    fn type_of() {
        let mut doc = Document::new();
        let span = doc.create_element("span");
        doc.add_type_of(span, "mw:Transclusion");
        doc.add_type_of(span, "mw:Error");
        doc.add_type_of(span, "mw:Error");
        assert_eq!(doc.attr(span, "typeof"), Some("mw:Transclusion mw:Error"));
        assert!(doc.has_type_of(span, "mw:Error"));
        assert!(!doc.has_type_of(span, "mw:Err"));
        assert_eq!(doc.type_of_with_prefix(span, "mw:Trans"), Some("mw:Transclusion"));
    }

    #[test]
    fn clone_keeps_ids_and_copies_data() {
        let mut doc = Document::new();
        let b = doc.create_element("b");
        doc.append_child(doc.body(), b);
        doc.data_parsoid_mut(b).src = Some("'''".into());
        doc.data_mw_mut(b).name = Some("x".into());

        let mut copy = doc.clone();
        copy.data_parsoid_mut(b).src = Some("<b>".into());
        copy.data_mw_mut(b).name = None;
        assert_eq!(doc.data_parsoid(b).unwrap().src.as_deref(), Some("'''"));
        assert_eq!(doc.data_mw(b).unwrap().name.as_deref(), Some("x"));
        assert_eq!(copy.name(b), Some("b"));
    }

    #[test]
    fn import_subtree() {
        let mut other = Document::new();
        let div = other.create_element("div");
        let text = other.create_text("hi");
        other.append_child(other.body(), div);
        other.append_child(div, text);
        other.data_parsoid_mut(div).src = Some("x".into());

        let mut doc = Document::new();
        let copy = doc.import(&other, div);
        doc.append_child(doc.body(), copy);
        assert_eq!(doc.text_content(doc.body()), "hi");
        assert_eq!(doc.data_parsoid(copy).unwrap().src.as_deref(), Some("x"));
    }
}
