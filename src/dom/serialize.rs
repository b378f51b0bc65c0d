//! HTML output and transport of node metadata.
//!
//! Node metadata normally lives out of band in [`Document`]. Before a document
//! leaves the process it is stored into HTML attributes, either inline as JSON
//! (`data-parsoid`, `data-mw`) or in a separate [`PageBundle`] keyed by element
//! id, and loaded back when the document returns.

use super::{DataMw, DataParsoid, DiffMarks, Document, NodeData, NodeId, NodeKind};
use crate::{Error, common::is_void_element};
use html_escape::{encode_double_quoted_attribute, encode_text};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Where node metadata is written when a document is stored.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataAttribMode {
    /// JSON in `data-parsoid` and `data-mw` attributes.
    #[default]
    Inline,
    /// A separate [`PageBundle`], referenced by element `id`.
    PageBundle,
}

/// Options for [`store_data_attribs`].
#[derive(Clone, Copy, Debug, Default)]
pub struct StoreOptions {
    /// Where to write the metadata.
    pub mode: DataAttribMode,
    /// Also write diff marks into `data-parsoid-diff`.
    pub store_diff_mark: bool,
}

/// One half of a page bundle.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct BundleSection<T> {
    /// The number of ids generated so far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter: Option<usize>,
    /// Metadata by element id.
    pub ids: IndexMap<String, T>,
}

impl<T> Default for BundleSection<T> {
    fn default() -> Self {
        Self {
            counter: None,
            ids: IndexMap::new(),
        }
    }
}

/// Out-of-band node metadata for a document.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct PageBundle {
    /// Provenance data.
    pub parsoid: BundleSection<DataParsoid>,
    /// Editing data.
    pub mw: BundleSection<DataMw>,
}

/// The attribute carrying provenance data.
pub const DATA_PARSOID: &str = "data-parsoid";
/// The attribute carrying editing data.
pub const DATA_MW: &str = "data-mw";
/// The attribute carrying diff marks.
pub const DATA_PARSOID_DIFF: &str = "data-parsoid-diff";

/// The shape of a stored diff mark.
#[derive(Deserialize, Serialize)]
struct StoredDiff {
    /// The mark names.
    diff: Vec<String>,
}

/// Moves the metadata of every element under `root` (inclusive) into HTML
/// attributes or, in page bundle mode, into the returned bundle.
///
/// The metadata is detached from the elements, so the document must be
/// loaded with [`load_data_attribs`] before it is processed again.
pub fn store_data_attribs(
    doc: &mut Document,
    root: NodeId,
    options: StoreOptions,
) -> Result<Option<PageBundle>, Error> {
    let mut bundle = (options.mode == DataAttribMode::PageBundle).then(PageBundle::default);
    let mut counter = 0;
    let nodes = core::iter::once(root)
        .chain(doc.descendants(root))
        .filter(|node| doc.is_element(*node))
        .collect::<Vec<_>>();

    for node in nodes {
        let Some(NodeData { parsoid, mw, diff }) = doc.take_data(node) else {
            continue;
        };

        if options.store_diff_mark
            && let Some(diff) = diff.filter(|diff| !diff.is_empty())
        {
            let stored = StoredDiff {
                diff: diff.marker_names().map(str::to_string).collect(),
            };
            doc.set_attr(node, DATA_PARSOID_DIFF, serde_json::to_string(&stored)?);
        }

        let mw = mw.filter(|mw| !mw.is_empty());
        match &mut bundle {
            None => {
                if !parsoid.is_empty() {
                    doc.set_attr(node, DATA_PARSOID, serde_json::to_string(&parsoid)?);
                }
                if let Some(mw) = mw {
                    doc.set_attr(node, DATA_MW, serde_json::to_string(&mw)?);
                }
            }
            Some(bundle) => {
                let id = if let Some(id) = doc.attr(node, "id") {
                    id.to_string()
                } else {
                    let id = loop {
                        let id = counter_id(counter);
                        counter += 1;
                        if !bundle.parsoid.ids.contains_key(&id) {
                            break id;
                        }
                    };
                    doc.set_attr(node, "id", id.clone());
                    id
                };
                bundle.parsoid.ids.insert(id.clone(), parsoid);
                if let Some(mw) = mw {
                    bundle.mw.ids.insert(id, *mw);
                }
            }
        }
    }

    if let Some(bundle) = &mut bundle {
        bundle.parsoid.counter = Some(counter);
    }

    Ok(bundle)
}

/// Moves metadata from HTML attributes, and from `bundle` if one is given,
/// back onto the elements under `root` (inclusive).
pub fn load_data_attribs(
    doc: &mut Document,
    root: NodeId,
    bundle: Option<&PageBundle>,
) -> Result<(), Error> {
    let nodes = core::iter::once(root)
        .chain(doc.descendants(root))
        .filter(|node| doc.is_element(*node))
        .collect::<Vec<_>>();

    for node in nodes {
        let mut data = doc.take_data(node).unwrap_or_default();

        if let Some(json) = doc.remove_attr(node, DATA_PARSOID) {
            data.parsoid = serde_json::from_str(&json)?;
        }
        if let Some(json) = doc.remove_attr(node, DATA_MW) {
            data.mw = Some(Box::new(serde_json::from_str(&json)?));
        }
        if let Some(json) = doc.remove_attr(node, DATA_PARSOID_DIFF) {
            let stored = serde_json::from_str::<StoredDiff>(&json)?;
            let diff = stored
                .diff
                .iter()
                .filter_map(|name| DiffMarks::from_marker_name(name))
                .collect::<DiffMarks>();
            data.diff = Some(diff);
        }

        if let Some(bundle) = bundle
            && let Some(id) = doc.attr(node, "id").map(str::to_string)
        {
            match bundle.parsoid.ids.get(&id) {
                Some(dp) => data.parsoid = dp.clone(),
                None if is_generated_id(&id) => return Err(Error::MissingData { id }),
                None => {}
            }
            if let Some(mw) = bundle.mw.ids.get(&id) {
                data.mw = Some(Box::new(mw.clone()));
            }
            if is_generated_id(&id) {
                doc.remove_attr(node, "id");
            }
        }

        if data != NodeData::default() {
            doc.set_data(node, data);
        }
    }

    Ok(())
}

/// Stores the metadata of the whole document into a page bundle.
pub fn extract_page_bundle(doc: &mut Document) -> Result<PageBundle, Error> {
    let options = StoreOptions {
        mode: DataAttribMode::PageBundle,
        store_diff_mark: false,
    };
    let body = doc.body();
    Ok(store_data_attribs(doc, body, options)?.unwrap_or_default())
}

/// Removes `<section>` wrappers added by section wrapping, keeping their
/// content, and removes fallback id spans.
pub fn strip_section_tags_and_fallback_ids(doc: &mut Document, node: NodeId) {
    for child in doc.children(node).to_vec() {
        if !doc.is_element(child) {
            continue;
        }

        strip_section_tags_and_fallback_ids(doc, child);

        if is_section_tag(doc, child) {
            doc.migrate_children(child, node, Some(child));
            doc.detach(child);
        } else if doc.is_element_named(child, "span") && doc.has_type_of(child, "mw:FallbackId") {
            doc.detach(child);
        }
    }
}

/// Returns true if the node is a section wrapper.
#[must_use]
pub fn is_section_tag(doc: &Document, node: NodeId) -> bool {
    doc.is_element_named(node, "section") && doc.has_attr(node, "data-mw-section-id")
}

/// Renders a copy of `node` and its descendants with all metadata inlined, for
/// debug output.
#[must_use]
pub fn dump_dom(doc: &Document, node: NodeId, title: &str) -> String {
    let mut copy = doc.clone();
    let options = StoreOptions {
        mode: DataAttribMode::Inline,
        store_diff_mark: true,
    };
    let html = match store_data_attribs(&mut copy, node, options) {
        Ok(_) => to_html(&copy, node),
        Err(err) => format!("<!-- {err} -->"),
    };
    let rule = "-".repeat(title.len() + 12);
    format!("----- {title} -----\n{html}\n{rule}")
}

/// Serialises a node and its descendants as HTML.
#[must_use]
pub fn to_html(doc: &Document, node: NodeId) -> String {
    let mut out = String::new();
    write_node(doc, node, &mut out);
    out
}

/// Serialises the children of a node as HTML.
#[must_use]
pub fn inner_html(doc: &Document, node: NodeId) -> String {
    let mut out = String::new();
    for child in doc.children(node) {
        write_node(doc, *child, &mut out);
    }
    out
}

/// Serialises a whole document as HTML.
#[must_use]
pub fn document_to_html(doc: &Document) -> String {
    let mut out = String::from("<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"/></head>");
    write_node(doc, doc.body(), &mut out);
    out += "</html>";
    out
}

/// Writes a node as HTML.
fn write_node(doc: &Document, node: NodeId, out: &mut String) {
    match doc.kind(node) {
        NodeKind::Document => {
            for child in doc.children(node) {
                write_node(doc, *child, out);
            }
        }
        NodeKind::Element(el) => {
            out.push('<');
            out.push_str(&el.name);
            for (key, value) in &el.attrs {
                let _ = write!(out, " {key}=\"{}\"", encode_double_quoted_attribute(value));
            }
            out.push('>');
            if is_void_element(&el.name) && doc.children(node).is_empty() {
                return;
            }
            for child in doc.children(node) {
                write_node(doc, *child, out);
            }
            let _ = write!(out, "</{}>", el.name);
        }
        NodeKind::Text(text) => out.push_str(&encode_text(text)),
        NodeKind::Comment(text) => {
            let _ = write!(out, "<!--{text}-->");
        }
        NodeKind::ProcessingInstruction { target, data } => {
            let _ = write!(out, "<?{target} {data}>");
        }
    }
}

/// The alphabet used by generated element ids.
const ID_ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Generates the element id for the given counter value.
fn counter_id(mut counter: usize) -> String {
    let mut id = String::from("mw");
    loop {
        id.push(char::from(ID_ALPHABET[counter % 64]));
        counter /= 64;
        if counter == 0 {
            break id;
        }
    }
}

/// Returns true if the id looks like one generated by [`counter_id`].
fn is_generated_id(id: &str) -> bool {
    id.strip_prefix("mw").is_some_and(|rest| {
        !rest.is_empty() && rest.bytes().all(|b| ID_ALPHABET.contains(&b))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wikitext::DomSourceRange;

    fn sample() -> (Document, NodeId, NodeId) {
        let mut doc = Document::new();
        let b = doc.create_element("b");
        let text = doc.create_text("a < b");
        let br = doc.create_element("br");
        doc.append_child(doc.body(), b);
        doc.append_child(b, text);
        doc.append_child(doc.body(), br);
        doc.data_parsoid_mut(b).dsr = Some(DomSourceRange::new(0, 11, 3, 3));
        doc.data_mw_mut(br).name = Some("x".into());
        (doc, b, br)
    }

    #[test]
    fn html_output() {
        let (mut doc, b, _) = sample();
        doc.set_attr(b, "title", "\"q\"");
        assert_eq!(
            inner_html(&doc, doc.body()),
            "<b title=\"&quot;q&quot;\">a &lt; b</b><br>"
        );
    }

    #[test]
    fn inline_round_trip() {
        let (mut doc, b, br) = sample();
        doc.data_mut(b).diff = Some(DiffMarks::MODIFIED_WRAPPER);
        let options = StoreOptions {
            mode: DataAttribMode::Inline,
            store_diff_mark: true,
        };
        let body = doc.body();
        assert!(store_data_attribs(&mut doc, body, options).unwrap().is_none());
        assert_eq!(
            inner_html(&doc, body),
            "<b data-parsoid-diff=\"{&quot;diff&quot;:[&quot;modified-wrapper&quot;]}\" \
             data-parsoid=\"{&quot;dsr&quot;:[0,11,3,3]}\">a &lt; b</b>\
             <br data-mw=\"{&quot;name&quot;:&quot;x&quot;}\">"
        );
        assert!(doc.data(b).is_none());

        load_data_attribs(&mut doc, body, None).unwrap();
        assert_eq!(doc.dsr(b), Some(DomSourceRange::new(0, 11, 3, 3)));
        assert_eq!(doc.data(b).unwrap().diff, Some(DiffMarks::MODIFIED_WRAPPER));
        assert_eq!(doc.data_mw(br).unwrap().name.as_deref(), Some("x"));
        assert!(!doc.has_attr(b, DATA_PARSOID));
    }

    #[test]
    fn page_bundle_round_trip() {
        let (mut doc, b, br) = sample();
        doc.set_attr(br, "id", "mine");
        let bundle = extract_page_bundle(&mut doc).unwrap();
        assert_eq!(doc.attr(doc.body(), "id"), None);
        assert_eq!(doc.attr(b, "id"), Some("mwA"));
        assert_eq!(bundle.parsoid.ids["mwA"].dsr, Some(DomSourceRange::new(0, 11, 3, 3)));
        assert_eq!(bundle.mw.ids["mine"].name.as_deref(), Some("x"));

        let json = serde_json::to_value(&bundle).unwrap();
        assert_eq!(json["parsoid"]["counter"], 1);
        let bundle: PageBundle = serde_json::from_value(json).unwrap();

        let body = doc.body();
        load_data_attribs(&mut doc, body, Some(&bundle)).unwrap();
        assert_eq!(doc.dsr(b), Some(DomSourceRange::new(0, 11, 3, 3)));
        assert!(!doc.has_attr(b, "id"));
        assert_eq!(doc.attr(br, "id"), Some("mine"));
        assert_eq!(doc.data_mw(br).unwrap().name.as_deref(), Some("x"));
    }

    #[test]
    fn missing_bundle_data() {
        let mut doc = Document::new();
        let span = doc.create_element("span");
        doc.append_child(doc.body(), span);
        doc.set_attr(span, "id", "mwZ");
        let body = doc.body();
        let err = load_data_attribs(&mut doc, body, Some(&PageBundle::default())).unwrap_err();
        assert!(matches!(err, Error::MissingData { id } if id == "mwZ"));
    }

    #[test]
    fn strip_sections() {
        let mut doc = Document::new();
        let section = doc.create_element("section");
        doc.set_attr(section, "data-mw-section-id", "0");
        let text = doc.create_text("lead");
        let fallback = doc.create_element("span");
        doc.set_attr(fallback, "typeof", "mw:FallbackId");
        doc.append_child(doc.body(), section);
        doc.append_child(section, fallback);
        doc.append_child(section, text);

        let body = doc.body();
        strip_section_tags_and_fallback_ids(&mut doc, body);
        assert_eq!(doc.children(body), &[text]);
    }

    #[test]
    fn dump_leaves_original_alone() {
        let (doc, b, _) = sample();
        let dump = dump_dom(&doc, b, "test");
        assert_eq!(
            dump,
            "----- test -----\n<b data-parsoid=\"{&quot;dsr&quot;:[0,11,3,3]}\">a &lt; b</b>\n----------------"
        );
        assert!(doc.data(b).is_some());
    }
}
