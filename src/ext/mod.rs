//! Extension tags.
//!
//! An extension tag like `<poem>` is not parsed by the tokenizer. Its body is
//! handed to an [`Extension`] by the post-processor, which replaces the
//! placeholder node with whatever the extension returns.

use crate::{
    Error,
    config::Configuration,
    dom::{DataMwError, Document, NodeId},
    wikitext::{DomSourceRange, Kv},
    wt2html::{self, Env, Frame},
};
use indexmap::IndexMap;

mod poem;
mod pre;

pub use poem::Poem;
pub use pre::Pre;

/// An extension tag error.
#[derive(Debug, thiserror::Error)]
pub enum ExtensionError {
    /// The extension failed and conversion cannot continue.
    #[error("{0}")]
    Failed(String),

    /// The content of the extension tag is invalid. The error is shown in the
    /// document in place of the content.
    #[error("{0}")]
    Content(DataMwError),

    /// Converting the content of the extension tag failed.
    #[error(transparent)]
    Pipeline(Box<Error>),
}

impl From<Error> for ExtensionError {
    fn from(err: Error) -> Self {
        Self::Pipeline(Box::new(err))
    }
}

/// An extension tag implementation.
pub trait Extension: Send + Sync {
    /// The lowercase tag name.
    fn name(&self) -> &'static str;

    /// Converts the body of the tag into a document. The first child of the
    /// body of the returned document replaces the tag.
    fn to_dom(
        &self,
        api: &ExtensionApi<'_>,
        content: &str,
        args: &[Kv],
    ) -> Result<Document, ExtensionError>;

    /// Maps the source range of a node generated from the content of the tag
    /// into the source range of the page. Returning `None` drops the range.
    ///
    /// The given range is already offset to the start of the content.
    fn shift_dsr(&self, dsr: DomSourceRange) -> Option<DomSourceRange> {
        Some(dsr)
    }

    /// Post-processes the whole document after all extension tags are
    /// expanded.
    fn run(&self, _doc: &mut Document, _body: NodeId, _at_top_level: bool) {}
}

/// The services available to an extension while it converts a tag.
#[derive(Clone, Copy, Debug)]
pub struct ExtensionApi<'a> {
    /// The conversion environment.
    env: &'a Env<'a>,
    /// The frame containing the tag.
    frame: &'a Frame<'a>,
    /// The name of the tag.
    name: &'a str,
}

impl<'a> ExtensionApi<'a> {
    /// Creates the services for a tag named `name` in `frame`.
    pub(crate) fn new(env: &'a Env<'a>, frame: &'a Frame<'a>, name: &'a str) -> Self {
        Self { env, frame, name }
    }

    /// The name of the tag being converted.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name
    }

    /// The site configuration.
    #[must_use]
    pub fn config(&self) -> &Configuration {
        self.env.config
    }

    /// Returns true if the tag is in the page itself, rather than in a
    /// template or the content of another extension tag.
    #[must_use]
    pub fn at_top_level(&self) -> bool {
        self.frame.is_top_level()
    }

    /// Converts `content` as Wikitext in a new frame and wraps the result in
    /// a `wrapper_tag` element with the attributes `args`.
    ///
    /// Source ranges of the generated nodes are relative to `content`.
    pub fn parse_ext_tag_to_dom(
        &self,
        args: &[Kv],
        wrapper_tag: &str,
        content: &str,
    ) -> Result<Document, Error> {
        let title = format!("{}$<{}>", self.frame.title, self.name);
        let frame = self.frame.child(&title, content);
        let inner = wt2html::parse(self.env, &frame)?;

        let mut doc = Document::new();
        let wrapper = doc.create_element(wrapper_tag);
        for Kv { k, v, .. } in args {
            doc.set_attr(wrapper, k, v.clone());
        }
        doc.data_parsoid_mut(wrapper).dsr = inner.dsr(inner.body());
        for child in inner.children(inner.body()) {
            let copy = doc.import(&inner, *child);
            doc.append_child(wrapper, copy);
        }
        let body = doc.body();
        doc.append_child(body, wrapper);
        Ok(doc)
    }
}

/// The set of registered extension tags.
pub struct ExtensionRegistry {
    /// Extensions by tag name.
    tags: IndexMap<&'static str, Box<dyn Extension>>,
}

impl ExtensionRegistry {
    /// Creates a registry with no extensions.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            tags: IndexMap::new(),
        }
    }

    /// Registers an extension, replacing any extension with the same name.
    pub fn register(&mut self, extension: Box<dyn Extension>) {
        self.tags.insert(extension.name(), extension);
    }

    /// Returns the extension for the tag `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&dyn Extension> {
        self.tags.get(name).map(Box::as_ref)
    }

    /// Iterates over the registered extensions in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn Extension> {
        self.tags.values().map(Box::as_ref)
    }
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(Poem));
        registry.register(Box::new(Pre));
        registry
    }
}

impl core::fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.tags.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Shout;

    impl Extension for Shout {
        fn name(&self) -> &'static str {
            "poem"
        }

        fn to_dom(
            &self,
            _api: &ExtensionApi<'_>,
            content: &str,
            _args: &[Kv],
        ) -> Result<Document, ExtensionError> {
            let mut doc = Document::new();
            let text = doc.create_text(content.to_uppercase());
            let body = doc.body();
            doc.append_child(body, text);
            Ok(doc)
        }
    }

    #[test]
    fn registry() {
        let mut registry = ExtensionRegistry::default();
        assert_eq!(registry.iter().map(|e| e.name()).collect::<Vec<_>>(), ["poem", "pre"]);
        assert!(registry.get("gallery").is_none());
        registry.register(Box::new(Shout));
        assert_eq!(registry.iter().count(), 2);
        assert_eq!(format!("{registry:?}"), r#"["poem", "pre"]"#);
    }

    #[test]
    fn pipeline_error_converts() {
        let err = ExtensionError::from(Error::MissingData { id: "x".into() });
        assert!(matches!(err, ExtensionError::Pipeline(_)));
        assert_eq!(err.to_string(), "page bundle has no data for id 'x'");
    }
}
