//! Diff mark queries and updates.
//!
//! Diff marks live in the metadata of elements. Nodes which cannot carry
//! metadata (text and comments), and places where a node was removed, are
//! marked by inserting a `<meta typeof="mw:DiffMarker/…">` element before
//! them.

use crate::{
    common::is_block_element,
    dom::{DataMw, DataParsoid, DiffMarks, Document, NodeId, NodeKind},
};
use std::{collections::BTreeMap, sync::LazyLock};

/// The `typeof` prefix of diff marker elements.
const MARKER_PREFIX: &str = "mw:DiffMarker/";

/// The value of an attribute being compared, including the out-of-band
/// metadata which is compared as if it were an attribute.
#[derive(Clone, Copy, Debug)]
pub enum AttribValue<'a> {
    /// A plain attribute.
    Text(&'a str),
    /// The provenance data of the node.
    DataParsoid(&'a DataParsoid),
    /// The editing metadata of the node.
    DataMw(&'a DataMw),
}

impl AttribValue<'_> {
    /// Returns true if the value counts as empty for a specialised
    /// comparison.
    fn is_falsy(self) -> bool {
        match self {
            Self::Text(text) => text.is_empty() || text == "0",
            Self::DataParsoid(_) | Self::DataMw(_) => false,
        }
    }
}

impl PartialEq for AttribValue<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::DataParsoid(a), Self::DataParsoid(b)) => {
                DataParsoid { tmp: b.tmp, ..(*a).clone() } == **b
            }
            (Self::DataMw(a), Self::DataMw(b)) => a == b,
            _ => false,
        }
    }
}

/// A specialised equality function for one attribute.
pub type AttribComparator = fn(AttribValue<'_>, AttribValue<'_>) -> bool;

/// Returns the diff marks of a node.
#[must_use]
pub fn diff_mark(doc: &Document, node: NodeId) -> DiffMarks {
    doc.data(node).and_then(|data| data.diff).unwrap_or_default()
}

/// Returns true if the node has any diff marks.
#[must_use]
pub fn has_diff_markers(doc: &Document, node: NodeId) -> bool {
    !diff_mark(doc, node).is_empty()
}

/// Returns true if the node has the diff mark `mark`.
///
/// Deletions are recorded by a marker element before the node, as are
/// insertions of nodes that are not elements.
#[must_use]
pub fn has_diff_mark(doc: &Document, node: NodeId, mark: DiffMarks) -> bool {
    if mark == DiffMarks::DELETED || (mark == DiffMarks::INSERTED && !doc.is_element(node)) {
        doc.previous_sibling(node)
            .is_some_and(|prev| is_diff_marker(doc, prev, Some(mark)))
    } else {
        diff_mark(doc, node).contains(mark)
    }
}

/// Returns true if the node was inserted.
#[must_use]
pub fn has_inserted_diff_mark(doc: &Document, node: NodeId) -> bool {
    has_diff_mark(doc, node, DiffMarks::INSERTED)
}

/// Returns true if a node was deleted right before this node.
#[must_use]
pub fn maybe_deleted_node(doc: &Document, node: Option<NodeId>) -> bool {
    node.is_some_and(|node| is_diff_marker(doc, node, Some(DiffMarks::DELETED)))
}

/// Returns true if the node is a marker for a deleted block element.
#[must_use]
pub fn is_deleted_block_node(doc: &Document, node: Option<NodeId>) -> bool {
    maybe_deleted_node(doc, node)
        && node.is_some_and(|node| doc.has_attr(node, "data-is-block"))
}

/// Returns true if the children of the node were changed.
#[must_use]
pub fn direct_children_changed(doc: &Document, node: NodeId) -> bool {
    has_diff_mark(doc, node, DiffMarks::CHILDREN_CHANGED)
}

/// Returns true if the only changes to the node are below it.
#[must_use]
pub fn only_subtree_changed(doc: &Document, node: NodeId) -> bool {
    let marks = diff_mark(doc, node);
    !marks.is_empty()
        && (DiffMarks::SUBTREE_CHANGED | DiffMarks::CHILDREN_CHANGED).contains(marks)
}

/// Returns true if nothing below the node changed. The attributes of the node
/// itself may have changed.
#[must_use]
pub fn subtree_unchanged(doc: &Document, node: NodeId) -> bool {
    DiffMarks::MODIFIED_WRAPPER.contains(diff_mark(doc, node))
}

/// Returns true if the node is a diff marker element, optionally of a
/// specific kind.
#[must_use]
pub fn is_diff_marker(doc: &Document, node: NodeId, mark: Option<DiffMarks>) -> bool {
    if !doc.is_element_named(node, "meta") {
        return false;
    }
    match mark {
        Some(mark) => mark
            .marker_name()
            .is_some_and(|name| doc.has_type_of(node, &format!("{MARKER_PREFIX}{name}"))),
        None => doc.type_of_with_prefix(node, MARKER_PREFIX).is_some(),
    }
}

/// Creates a diff marker element. Markers for deleted block elements carry
/// `data-is-block` so the serialiser knows a line was removed.
pub(crate) fn create_marker(
    doc: &mut Document,
    mark: DiffMarks,
    deleted: Option<&str>,
) -> NodeId {
    let meta = doc.create_element("meta");
    doc.set_attr(
        meta,
        "typeof",
        format!("{MARKER_PREFIX}{}", mark.marker_name().unwrap_or("unknown")),
    );
    if deleted.is_some_and(is_block_element) {
        doc.set_attr(meta, "data-is-block", "true");
    }
    meta
}

/// Adds the diff mark `mark` to a node. Returns the marker element, if one
/// was needed.
///
/// `deleted` is the name of the removed element when marking a deletion.
pub fn add_diff_mark(
    doc: &mut Document,
    node: NodeId,
    mark: DiffMarks,
    deleted: Option<&str>,
) -> Option<NodeId> {
    if mark == DiffMarks::DELETED || mark == DiffMarks::MOVED {
        let meta = create_marker(doc, mark, deleted);
        doc.insert_sibling_before(node, meta);
        return Some(meta);
    }

    match doc.kind(node) {
        NodeKind::Text(_) | NodeKind::Comment(_) => {
            if mark != DiffMarks::INSERTED {
                log::error!("bad diff mark {mark:?} on a text or comment node");
            }
            let meta = create_marker(doc, mark, None);
            doc.insert_sibling_before(node, meta);
            Some(meta)
        }
        NodeKind::Element(_) => {
            *doc.data_mut(node).diff.get_or_insert_default() |= mark;
            None
        }
        NodeKind::Document => None,
        NodeKind::ProcessingInstruction { .. } => {
            log::error!("unhandled node type in diff: processing instruction");
            None
        }
    }
}

/// Returns the attributes of an element for comparison, keyed and sorted by
/// name, without the attributes named in `ignore`.
fn get_attributes<'a>(
    doc: &'a Document,
    node: NodeId,
    ignore: &[&str],
) -> BTreeMap<&'a str, AttribValue<'a>> {
    static EMPTY: LazyLock<DataParsoid> = LazyLock::new(DataParsoid::default);

    let mut attrs = doc
        .element(node)
        .map(|element| {
            element
                .attrs
                .iter()
                .filter(|(name, _)| !ignore.contains(&name.as_str()))
                .map(|(name, value)| (name.as_str(), AttribValue::Text(value.as_str())))
                .collect::<BTreeMap<_, _>>()
        })
        .unwrap_or_default();

    if !ignore.contains(&"data-parsoid") {
        let dp = doc.data_parsoid(node).unwrap_or(&EMPTY);
        attrs.insert("data-parsoid", AttribValue::DataParsoid(dp));
    }
    if !ignore.contains(&"data-mw")
        && let Some(mw) = doc.data_mw(node).filter(|mw| !mw.is_empty())
    {
        attrs.insert("data-mw", AttribValue::DataMw(mw));
    }
    attrs
}

/// Returns true if two elements have the same attributes, ignoring the names
/// in `ignore`. Attributes with an entry in `comparators` are compared by
/// that function, which is never called with an empty value.
#[must_use]
pub fn attribs_equals(
    doc_a: &Document,
    a: NodeId,
    doc_b: &Document,
    b: NodeId,
    ignore: &[&str],
    comparators: &[(&str, AttribComparator)],
) -> bool {
    let attrs_a = get_attributes(doc_a, a, ignore);
    let attrs_b = get_attributes(doc_b, b, ignore);
    if attrs_a.len() != attrs_b.len() {
        return false;
    }

    attrs_a.iter().zip(&attrs_b).all(|((name_a, value_a), (name_b, value_b))| {
        if name_a != name_b {
            return false;
        }
        match comparators.iter().find(|(name, _)| name == name_a) {
            Some((_, compare)) => {
                !value_a.is_falsy() && !value_b.is_falsy() && compare(*value_a, *value_b)
            }
            None => value_a == value_b,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_divs() -> (Document, NodeId, NodeId) {
        let mut doc = Document::new();
        let body = doc.body();
        let a = doc.create_element("div");
        let b = doc.create_element("div");
        doc.append_child(body, a);
        doc.append_child(body, b);
        (doc, a, b)
    }

    #[test]
    fn marks_on_elements() {
        let (mut doc, a, _) = two_divs();
        assert!(!has_diff_markers(&doc, a));
        assert!(subtree_unchanged(&doc, a));
        assert_eq!(add_diff_mark(&mut doc, a, DiffMarks::SUBTREE_CHANGED, None), None);
        add_diff_mark(&mut doc, a, DiffMarks::CHILDREN_CHANGED, None);
        assert!(only_subtree_changed(&doc, a));
        assert!(direct_children_changed(&doc, a));
        assert!(!subtree_unchanged(&doc, a));
        add_diff_mark(&mut doc, a, DiffMarks::MODIFIED_WRAPPER, None);
        assert!(!only_subtree_changed(&doc, a));
    }

    #[test]
    fn marks_on_text() {
        let mut doc = Document::new();
        let body = doc.body();
        let text = doc.create_text("x");
        doc.append_child(body, text);
        let meta = add_diff_mark(&mut doc, text, DiffMarks::INSERTED, None).unwrap();
        assert_eq!(doc.previous_sibling(text), Some(meta));
        assert!(has_inserted_diff_mark(&doc, text));
        assert!(is_diff_marker(&doc, meta, None));
        assert!(!is_diff_marker(&doc, meta, Some(DiffMarks::DELETED)));
    }

    #[test]
    fn deleted_blocks() {
        let (mut doc, a, b) = two_divs();
        let meta = add_diff_mark(&mut doc, b, DiffMarks::DELETED, Some("p")).unwrap();
        assert!(has_diff_mark(&doc, b, DiffMarks::DELETED));
        assert!(is_deleted_block_node(&doc, Some(meta)));
        assert!(maybe_deleted_node(&doc, doc.previous_sibling(b)));

        let meta = add_diff_mark(&mut doc, a, DiffMarks::DELETED, Some("b")).unwrap();
        assert!(maybe_deleted_node(&doc, Some(meta)));
        assert!(!is_deleted_block_node(&doc, Some(meta)));
        assert!(!is_deleted_block_node(&doc, None));
    }

    #[test]
    fn attribute_equality() {
        let (mut doc, a, b) = two_divs();
        doc.set_attr(a, "class", "x y");
        doc.set_attr(b, "class", "y x");
        assert!(!attribs_equals(&doc, a, &doc, b, &[], &[]));
        assert!(attribs_equals(&doc, a, &doc, b, &["class"], &[]));

        fn same_classes(a: AttribValue<'_>, b: AttribValue<'_>) -> bool {
            let (AttribValue::Text(a), AttribValue::Text(b)) = (a, b) else {
                return false;
            };
            let mut a = a.split_whitespace().collect::<Vec<_>>();
            let mut b = b.split_whitespace().collect::<Vec<_>>();
            a.sort_unstable();
            b.sort_unstable();
            a == b
        }
        let comparators: &[(&str, AttribComparator)] = &[("class", same_classes)];
        assert!(attribs_equals(&doc, a, &doc, b, &[], comparators));

        doc.set_attr(a, "class", "");
        doc.set_attr(b, "class", "");
        assert!(!attribs_equals(&doc, a, &doc, b, &[], comparators));
        assert!(attribs_equals(&doc, a, &doc, b, &[], &[]));
    }

    #[test]
    fn metadata_equality() {
        let (mut doc, a, b) = two_divs();
        doc.data_parsoid_mut(a).src = Some("x".into());
        assert!(!attribs_equals(&doc, a, &doc, b, &[], &[]));
        assert!(attribs_equals(&doc, a, &doc, b, &["data-parsoid"], &[]));
        doc.data_parsoid_mut(b).src = Some("x".into());
        doc.data_parsoid_mut(b).tmp = crate::dom::TempFlags::PROCESSED;
        assert!(attribs_equals(&doc, a, &doc, b, &[], &[]));

        doc.data_mw_mut(a).name = Some("poem".into());
        assert!(!attribs_equals(&doc, a, &doc, b, &[], &[]));
        assert!(attribs_equals(&doc, a, &doc, b, &["data-mw"], &[]));
    }
}
