//! Structural diff between an original document and an edited copy.
//!
//! The diff walks both trees in parallel and records what changed as diff
//! marks on the edited tree. Insertions and deletions are found by looking a
//! few siblings ahead for a node which matches exactly.

use super::diff_utils::{
    AttribComparator, AttribValue, add_diff_mark, attribs_equals, create_marker,
};
use crate::dom::{DataMw, DiffMarks, Document, NodeId, NodeKind};

/// Compares `data-mw` without the errors, which are generated output rather
/// than anything an editor can change.
fn data_mw_equals(a: AttribValue<'_>, b: AttribValue<'_>) -> bool {
    match (a, b) {
        (AttribValue::DataMw(a), AttribValue::DataMw(b)) => {
            DataMw {
                errors: None,
                ..a.clone()
            } == DataMw {
                errors: None,
                ..b.clone()
            }
        }
        _ => a == b,
    }
}

/// Attributes which are compared by a special function.
static COMPARATORS: &[(&str, AttribComparator)] = &[("data-mw", data_mw_equals)];

/// A diff against an original document.
#[derive(Debug)]
pub struct DomDiff<'a> {
    /// The original document.
    base: &'a Document,
    /// How many siblings to look ahead for a match.
    lookahead: usize,
}

impl<'a> DomDiff<'a> {
    /// Creates a diff against `base`.
    #[must_use]
    pub fn new(base: &'a Document, lookahead: usize) -> Self {
        Self { base, lookahead }
    }

    /// Marks the differences between the base document and `edited` on
    /// `edited`. Returns true if anything changed.
    pub fn diff(&self, edited: &mut Document) -> bool {
        let body = edited.body();
        let changed = self.diff_children(self.base.body(), edited, body);
        if changed {
            add_diff_mark(edited, body, DiffMarks::SUBTREE_CHANGED, None);
        }
        log::debug!("diff: changed = {changed}");
        changed
    }

    /// Returns true if two nodes are equal. Elements are equal if they have
    /// the same name and attributes and, if `deep`, the same descendants.
    fn tree_equals(&self, base: NodeId, doc: &Document, node: NodeId, deep: bool) -> bool {
        match (self.base.kind(base), doc.kind(node)) {
            (NodeKind::Text(a), NodeKind::Text(b)) | (NodeKind::Comment(a), NodeKind::Comment(b)) => {
                a == b
            }
            (NodeKind::Element(a), NodeKind::Element(b)) => {
                a.name == b.name
                    && attribs_equals(self.base, base, doc, node, &[], COMPARATORS)
                    && (!deep || {
                        let base_children = self.base.children(base);
                        let children = doc.children(node);
                        base_children.len() == children.len()
                            && base_children
                                .iter()
                                .zip(children)
                                .all(|(a, b)| self.tree_equals(*a, doc, *b, true))
                    })
            }
            (NodeKind::Document, NodeKind::Document) => true,
            (NodeKind::ProcessingInstruction { .. }, _) | (_, NodeKind::ProcessingInstruction { .. }) => {
                log::error!("unhandled node type in diff: processing instruction");
                true
            }
            _ => false,
        }
    }

    /// Looks ahead of `node` in the edited tree for a node matching `base`.
    fn find_in_edited(&self, base: NodeId, doc: &Document, node: NodeId) -> Option<NodeId> {
        core::iter::successors(doc.next_sibling(node), |n| doc.next_sibling(*n))
            .take(self.lookahead)
            .find(|n| self.tree_equals(base, doc, *n, true))
    }

    /// Looks ahead of `base` in the base tree for a node matching `node`.
    fn find_in_base(&self, base: NodeId, doc: &Document, node: NodeId) -> Option<NodeId> {
        core::iter::successors(self.base.next_sibling(base), |n| self.base.next_sibling(*n))
            .take(self.lookahead)
            .find(|b| self.tree_equals(*b, doc, node, true))
    }

    /// Diffs the children of `base_parent` against the children of
    /// `parent`. Returns true if anything below `parent` changed.
    fn diff_children(&self, base_parent: NodeId, doc: &mut Document, parent: NodeId) -> bool {
        let mut base_node = self.base.first_child(base_parent);
        let mut node = doc.first_child(parent);
        let mut children_changed = false;
        let mut subtree_changed = false;

        while let (Some(base), Some(current)) = (base_node, node) {
            if self.tree_equals(base, doc, current, false) {
                if doc.is_element(current) && self.diff_children(base, doc, current) {
                    add_diff_mark(doc, current, DiffMarks::SUBTREE_CHANGED, None);
                    subtree_changed = true;
                }
            } else if let Some(found) = self.find_in_edited(base, doc, current) {
                let mut inserted = Some(current);
                while let Some(n) = inserted.filter(|n| *n != found) {
                    inserted = doc.next_sibling(n);
                    add_diff_mark(doc, n, DiffMarks::INSERTED, None);
                }
                node = Some(found);
                children_changed = true;
                continue;
            } else if let Some(found) = self.find_in_base(base, doc, current) {
                add_diff_mark(doc, current, DiffMarks::DELETED, self.base.name(base));
                base_node = Some(found);
                children_changed = true;
                continue;
            } else if doc.is_element(current) && self.base.name(base) == doc.name(current) {
                if !attribs_equals(self.base, base, doc, current, &[], COMPARATORS) {
                    add_diff_mark(doc, current, DiffMarks::MODIFIED_WRAPPER, None);
                }
                if self.diff_children(base, doc, current) {
                    add_diff_mark(doc, current, DiffMarks::SUBTREE_CHANGED, None);
                }
                children_changed = true;
            } else {
                add_diff_mark(doc, current, DiffMarks::INSERTED, None);
                children_changed = true;
            }

            base_node = self.base.next_sibling(base);
            node = doc.next_sibling(current);
        }

        while let Some(current) = node {
            node = doc.next_sibling(current);
            add_diff_mark(doc, current, DiffMarks::INSERTED, None);
            children_changed = true;
        }

        if let Some(base) = base_node {
            let meta = create_marker(doc, DiffMarks::DELETED, self.base.name(base));
            doc.append_child(parent, meta);
            children_changed = true;
        }

        if children_changed {
            add_diff_mark(
                doc,
                parent,
                DiffMarks::CHILDREN_CHANGED | DiffMarks::SUBTREE_CHANGED,
                None,
            );
        }
        children_changed || subtree_changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        html2wt::diff_utils::{diff_mark, has_diff_mark, is_diff_marker},
        wikitext::DomSourceRange,
    };

    /// Builds `<body><p>one</p><p>two <b>three</b></p></body>`.
    fn base() -> (Document, [NodeId; 4]) {
        let mut doc = Document::new();
        let body = doc.body();
        let p1 = doc.create_element("p");
        let t1 = doc.create_text("one");
        let p2 = doc.create_element("p");
        let t2 = doc.create_text("two ");
        let b = doc.create_element("b");
        let t3 = doc.create_text("three");
        doc.append_child(body, p1);
        doc.append_child(p1, t1);
        doc.append_child(body, p2);
        doc.append_child(p2, t2);
        doc.append_child(p2, b);
        doc.append_child(b, t3);
        doc.data_parsoid_mut(p1).dsr = Some(DomSourceRange::new(0, 3, 0, 0));
        doc.data_parsoid_mut(p2).dsr = Some(DomSourceRange::new(5, 26, 0, 0));
        (doc, [p1, p2, b, t3])
    }

    fn all_marks(doc: &Document) -> Vec<DiffMarks> {
        doc.descendants(doc.root())
            .into_iter()
            .map(|node| diff_mark(doc, node))
            .filter(|marks| !marks.is_empty())
            .collect()
    }

    #[test]
    fn no_change() {
        let (base, _) = base();
        let mut edited = base.clone();
        assert!(!DomDiff::new(&base, 5).diff(&mut edited));
        assert!(all_marks(&edited).is_empty());
        assert_eq!(edited.descendants(edited.root()).len(), base.descendants(base.root()).len());
    }

    #[test]
    fn changed_text_marks_ancestors() {
        let (base, [p1, p2, b, t3]) = base();
        let mut edited = base.clone();
        if let NodeKind::Text(text) = edited.kind_mut(t3) {
            *text = "four".into();
        }
        assert!(DomDiff::new(&base, 5).diff(&mut edited));

        let text = edited.children(b)[1];
        assert!(has_diff_mark(&edited, text, DiffMarks::INSERTED));
        assert!(diff_mark(&edited, b).contains(DiffMarks::CHILDREN_CHANGED));
        assert_eq!(diff_mark(&edited, p2), DiffMarks::SUBTREE_CHANGED);
        assert!(diff_mark(&edited, edited.body()).contains(DiffMarks::SUBTREE_CHANGED));
        assert!(diff_mark(&edited, p1).is_empty());
    }

    #[test]
    fn inserted_and_deleted() {
        let (base, [p1, ..]) = base();

        let mut edited = base.clone();
        let body = edited.body();
        let hr = edited.create_element("hr");
        edited.insert_before(body, hr, Some(p1));
        assert!(DomDiff::new(&base, 5).diff(&mut edited));
        assert_eq!(diff_mark(&edited, hr), DiffMarks::INSERTED);
        assert!(diff_mark(&edited, p1).is_empty());

        let mut edited = base.clone();
        edited.detach(p1);
        assert!(DomDiff::new(&base, 5).diff(&mut edited));
        let marker = edited.first_child(edited.body()).unwrap();
        assert!(is_diff_marker(&edited, marker, Some(DiffMarks::DELETED)));
        assert!(edited.has_attr(marker, "data-is-block"));
    }

    #[test]
    fn trailing_deletion() {
        let (base, [_, p2, ..]) = base();
        let mut edited = base.clone();
        edited.detach(p2);
        assert!(DomDiff::new(&base, 5).diff(&mut edited));
        let marker = edited.last_child(edited.body()).unwrap();
        assert!(is_diff_marker(&edited, marker, Some(DiffMarks::DELETED)));
    }

    #[test]
    fn modified_wrapper() {
        let (base, [_, _, b, _]) = base();
        let mut edited = base.clone();
        edited.set_attr(b, "class", "x");
        assert!(DomDiff::new(&base, 5).diff(&mut edited));
        assert_eq!(diff_mark(&edited, b), DiffMarks::MODIFIED_WRAPPER);
    }

    #[test]
    fn errors_are_not_edits() {
        let (base, [p1, ..]) = base();
        let mut edited = base.clone();
        edited
            .data_mw_mut(p1)
            .errors
            .get_or_insert_with(Vec::new)
            .push(crate::dom::DataMwError::new("x", "y"));
        edited.data_mw_mut(p1).name = Some("n".into());
        let mut base = base;
        base.data_mw_mut(p1).name = Some("n".into());
        assert!(!DomDiff::new(&base, 5).diff(&mut edited));
    }
}
