//! Out-of-band node metadata.
//!
//! Every DOM node may have a [`NodeData`] record attached to it by node
//! identity. The record holds the parse-time provenance of the node
//! ([`DataParsoid`]), its editing metadata ([`DataMw`]), and any diff marks
//! applied by the diff engine. These are only written into HTML attributes
//! when a document is stored for transport.

use crate::wikitext::{DomSourceRange, SourceRange};
use bitflags::bitflags;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// All the metadata attached to a single node.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeData {
    /// Parse-time provenance.
    pub parsoid: DataParsoid,
    /// Editing metadata, only present on nodes that need it.
    pub mw: Option<Box<DataMw>>,
    /// Diff marks applied by the diff engine.
    pub diff: Option<DiffMarks>,
}

/// The syntax used to write an element in wikitext, when it is not implied by
/// the element name.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Syntax {
    /// An HTML tag, `<b>`.
    Html,
    /// A bare URL link.
    Url,
    /// A link with explicit text, `[[a|b]]`.
    Piped,
    /// A link without explicit text, `[[a]]`.
    Simple,
    /// A table cell or definition written on the same line as the previous
    /// one, `||` or `; a : b`.
    Row,
}

bitflags! {
    /// Flags that only live for the duration of a pipeline run.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct TempFlags: u8 {
        /// The node is a placeholder that has not been expanded yet.
        const PENDING_EXPANSION = 1 << 0;
        /// The node was rewritten by an extension post-processor.
        const PROCESSED = 1 << 1;
        /// The node was created from wikitext inside a nested frame.
        const FROM_NESTED_FRAME = 1 << 2;
    }
}

/// Parse-time provenance data for a token or node.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DataParsoid {
    /// The token source range.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tsr: Option<SourceRange>,
    /// The DOM source range.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dsr: Option<DomSourceRange>,
    /// The original source of the node, when it cannot be recovered from its
    /// content (e.g. entities, templates).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    /// The wikitext syntax variant used for the node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stx: Option<Syntax>,
    /// Normalised attribute values.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub a: Option<IndexMap<String, Option<String>>>,
    /// Original attribute values, for attributes that were normalised.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sa: Option<IndexMap<String, String>>,
    /// The start tag was inserted by the tree builder.
    #[serde(skip_serializing_if = "core::ops::Not::not")]
    pub auto_inserted_start: bool,
    /// The end tag was inserted by the tree builder.
    #[serde(skip_serializing_if = "core::ops::Not::not")]
    pub auto_inserted_end: bool,
    /// The element was written with self-closing syntax, `<br/>`.
    #[serde(skip_serializing_if = "core::ops::Not::not")]
    pub self_close: bool,
    /// The comment was not terminated before the end of the input.
    #[serde(skip_serializing_if = "core::ops::Not::not")]
    pub unclosed_comment: bool,
    /// The number of dashes in a horizontal rule beyond the required four.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_dashes: Option<usize>,
    /// The original text of a behavior switch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub magic_src: Option<String>,
    /// Pipeline-only flags.
    #[serde(skip)]
    pub tmp: TempFlags,
    /// Unrecognised keys, kept for round-tripping.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DataParsoid {
    /// Creates provenance data with the given token source range.
    #[must_use]
    pub fn with_tsr(tsr: SourceRange) -> Self {
        Self {
            tsr: Some(tsr),
            ..Default::default()
        }
    }

    /// Returns true if either the start or end tag of the element was
    /// inserted by the tree builder.
    #[must_use]
    pub fn auto_inserted(&self) -> bool {
        self.auto_inserted_start || self.auto_inserted_end
    }

    /// Returns true if the node did not come from source text.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.tsr.is_none() && self.dsr.is_none()
    }

    /// Returns true if every field is unset.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let Self { tmp, .. } = self;
        *self
            == Self {
                tmp: *tmp,
                ..Default::default()
            }
    }
}

/// Template invocation data.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct TemplateInfo {
    /// The invocation target.
    pub target: TemplateTarget,
    /// The invocation parameters, in source order.
    pub params: IndexMap<String, ParamInfo>,
    /// The index of this invocation within its transclusion.
    pub i: usize,
}

/// The target of a template invocation.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct TemplateTarget {
    /// The wikitext of the target.
    pub wt: String,
    /// The resolved link to the target page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

/// A template parameter value.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct ParamInfo {
    /// The wikitext of the value.
    pub wt: String,
    /// The original wikitext of the key, when it differs from the map key
    /// (e.g. `| name = value`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<ParamKey>,
}

/// The original wikitext of a parameter key.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct ParamKey {
    /// The wikitext.
    pub wt: String,
}

/// One part of a transclusion.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TemplatePart {
    /// Literal wikitext between invocations.
    Text(String),
    /// An invocation, in its legacy wrapped encoding.
    Invocation(Invocation),
}

/// An invocation inside a transclusion, encoded as a single-key object whose
/// key names the kind of invocation.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Invocation {
    /// `{{Template}}`
    Template(TemplateInfo),
    /// `{{{arg}}}`
    TemplateArg(TemplateInfo),
    /// `{{#function:}}`
    ParserFunction(TemplateInfo),
}

impl Invocation {
    /// The invocation data, regardless of kind.
    #[must_use]
    pub fn info(&self) -> &TemplateInfo {
        match self {
            Invocation::Template(info)
            | Invocation::TemplateArg(info)
            | Invocation::ParserFunction(info) => info,
        }
    }
}

/// The text and/or HTML form of an expanded attribute key or value.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct AttribText {
    /// The plain text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txt: Option<String>,
    /// The rendered HTML.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
}

/// An extended attribute of an HTML tag, encoded as a `[key, value]` pair.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(from = "(AttribText, AttribText)", into = "(AttribText, AttribText)")]
pub struct DataMwAttrib {
    /// The key.
    pub key: AttribText,
    /// The value.
    pub value: AttribText,
}

impl From<(AttribText, AttribText)> for DataMwAttrib {
    fn from((key, value): (AttribText, AttribText)) -> Self {
        Self { key, value }
    }
}

impl From<DataMwAttrib> for (AttribText, AttribText) {
    fn from(value: DataMwAttrib) -> Self {
        (value.key, value.value)
    }
}

/// A localisable error attached to a node.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct DataMwError {
    /// The message key.
    pub key: String,
    /// A fallback message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// The message parameters.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Value>,
}

impl DataMwError {
    /// Creates an error with the given key and fallback message.
    #[must_use]
    pub fn new(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            message: Some(message.into()),
            params: Vec::new(),
        }
    }
}

impl core::fmt::Display for DataMwError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if let Some(message) = &self.message {
            write!(f, "{}: {message}", self.key)
        } else {
            f.write_str(&self.key)
        }
    }
}

/// The body of an extension tag.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct DataMwBody {
    /// The original source of the body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extsrc: Option<String>,
    /// The body as HTML.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    /// The id of a node holding the body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Extension-specific keys.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Editing metadata for a node.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DataMw {
    /// The parts of a transclusion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parts: Option<Vec<TemplatePart>>,
    /// The name of an extension tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Wikitext emitted before an extension tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext_prefix: Option<String>,
    /// Wikitext emitted after an extension tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext_suffix: Option<String>,
    /// Extended attributes of an HTML tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribs: Option<Vec<DataMwAttrib>>,
    /// The original source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    /// A media caption.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    /// Errors rendered in place of content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<DataMwError>>,
    /// The body of an extension tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<DataMwBody>,
    /// Opaque HTML payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<Value>,
    /// The id of an annotation range.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range_id: Option<String>,
    /// The wikitext offsets of an annotation range.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wt_offsets: Option<SourceRange>,
    /// The attributes of an extension tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attrs: Option<IndexMap<String, String>>,
    /// Unrecognised keys.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DataMw {
    /// Returns true if no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

bitflags! {
    /// The set of diff marks on a node.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct DiffMarks: u8 {
        /// The node is new.
        const INSERTED = 1 << 0;
        /// A node was removed here.
        const DELETED = 1 << 1;
        /// The node's own attributes changed.
        const MODIFIED_WRAPPER = 1 << 2;
        /// A direct child was inserted, removed, moved, or replaced.
        const CHILDREN_CHANGED = 1 << 3;
        /// Something below this node changed.
        const SUBTREE_CHANGED = 1 << 4;
        /// The node was moved here from elsewhere among its siblings.
        const MOVED = 1 << 5;
    }
}

/// The names of the single diff marks.
const DIFF_MARK_NAMES: [(DiffMarks, &str); 6] = [
    (DiffMarks::INSERTED, "inserted"),
    (DiffMarks::DELETED, "deleted"),
    (DiffMarks::MODIFIED_WRAPPER, "modified-wrapper"),
    (DiffMarks::CHILDREN_CHANGED, "children-changed"),
    (DiffMarks::SUBTREE_CHANGED, "subtree-changed"),
    (DiffMarks::MOVED, "moved"),
];

impl DiffMarks {
    /// The name used in `mw:DiffMarker/<name>` and in stored diff data.
    ///
    /// Returns `None` unless exactly one mark is set.
    #[must_use]
    pub fn marker_name(self) -> Option<&'static str> {
        DIFF_MARK_NAMES
            .iter()
            .find(|(mark, _)| *mark == self)
            .map(|(_, name)| *name)
    }

    /// Parses a single mark from its name.
    #[must_use]
    pub fn from_marker_name(name: &str) -> Option<Self> {
        DIFF_MARK_NAMES
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(mark, _)| *mark)
    }

    /// The names of all set marks.
    pub fn marker_names(self) -> impl Iterator<Item = &'static str> {
        self.iter().filter_map(DiffMarks::marker_name)
    }
}
