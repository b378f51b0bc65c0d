//! Conversion of Wikitext into annotated HTML and back again.
//!
//! Parsing ([`wt2html`]) produces a [`Document`](dom::Document) where every
//! node remembers which part of the source text it came from. Serialising
//! ([`html2wt`]) an edited copy of that document compares it against the
//! original and reuses the original source text for everything that did not
//! change, so that an edit to one paragraph does not reformat the rest of the
//! page.
//!
//! ```text
//! wikitext ─ tokenizer ─ token transforms ─ tree builder ─ post-processor ─► DOM
//! DOM ─ diff ─ selective serialiser ─► wikitext
//! ```

pub mod common;
pub mod config;
pub mod data_access;
pub mod dom;
pub mod ext;
pub mod html2wt;
pub mod wikitext;
pub mod wt2html;

use crate::{
    config::Configuration,
    data_access::DataAccess,
    dom::Document,
    ext::ExtensionRegistry,
    html2wt::Selser,
    wt2html::Env,
};
pub use ext::ExtensionError;

/// A conversion error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An extension tag failed in a way that cannot be shown in the document.
    #[error("extension <{name}> failed: {message}")]
    Extension {
        /// The name of the extension tag.
        name: String,
        /// What went wrong.
        message: String,
    },

    /// Node metadata could not be encoded or decoded.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// A page bundle did not contain data for a node which referenced it.
    #[error("page bundle has no data for id '{id}'")]
    MissingData {
        /// The id of the node.
        id: String,
    },

    /// The Wikitext could not be tokenized.
    #[error(transparent)]
    Syntax(#[from] wikitext::Error),

    /// A token violated an invariant.
    #[error(transparent)]
    Token(#[from] wikitext::TokenError),

    /// The Wikitext is larger than the configured limit.
    #[error("wikitext is {size} bytes, which is more than the limit of {limit} bytes")]
    TooLarge {
        /// The size of the input.
        size: usize,
        /// The configured limit.
        limit: usize,
    },
}

/// The standard result type used by all fallible conversion functions.
pub type Result<T = (), E = Error> = core::result::Result<T, E>;

/// A converter bound to one wiki.
pub struct Converter<'a> {
    /// The site configuration and limits.
    config: Configuration,
    /// The interface to the wiki.
    data_access: &'a dyn DataAccess,
    /// The registered extension tags.
    extensions: ExtensionRegistry,
}

impl<'a> Converter<'a> {
    /// Creates a converter with the default set of extension tags.
    pub fn new(config: Configuration, data_access: &'a dyn DataAccess) -> Self {
        Self {
            config,
            data_access,
            extensions: ExtensionRegistry::default(),
        }
    }

    /// Replaces the registered extension tags.
    #[must_use]
    pub fn with_extensions(mut self, extensions: ExtensionRegistry) -> Self {
        self.extensions = extensions;
        self
    }

    /// The configuration used by this converter.
    #[must_use]
    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Converts the Wikitext of the page `title` into a document.
    pub fn wt2html(&self, title: &str, source: &str) -> Result<Document> {
        let env = self.env();
        wt2html::wt2html(&env, title, source)
    }

    /// Converts a document into Wikitext.
    ///
    /// If `selser` is given, the document is treated as an edited copy of
    /// `selser.original`, and source text is reused for everything which was
    /// not edited.
    pub fn html2wt(&self, doc: &Document, selser: Option<Selser<'_>>) -> Result<String> {
        let env = self.env();
        html2wt::html2wt(&env, doc, selser)
    }

    /// Creates the environment for a single conversion.
    fn env(&self) -> Env<'_> {
        Env::new(&self.config, self.data_access, &self.extensions)
    }
}

impl core::fmt::Debug for Converter<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Converter")
            .field("config", &self.config)
            .field("extensions", &self.extensions)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data_access::MockDataAccess,
        dom::{
            NodeKind,
            serialize::{extract_page_bundle, load_data_attribs},
        },
    };

    #[test]
    fn edit_through_page_bundle() {
        let _ = env_logger::try_init();
        let wiki = MockDataAccess::new().with_page("Template:Sig", "~ {{{1}}}");
        let converter = Converter::new(Configuration::default(), &wiki);
        let source = "==  Intro  ==\nSome   text {{sig|me}}\n\n* keep  this\n";
        let original = converter.wt2html("Page", source).unwrap();

        let mut edited = original.clone();
        let bundle = extract_page_bundle(&mut edited).unwrap();
        let body = edited.body();
        load_data_attribs(&mut edited, body, Some(&bundle)).unwrap();

        let text = edited
            .descendants(body)
            .into_iter()
            .find(|node| edited.text(*node).is_some_and(|text| text.contains("Some")))
            .unwrap();
        if let NodeKind::Text(text) = edited.kind_mut(text) {
            *text = text.replace("Some   text", "Other text");
        }

        let out = converter
            .html2wt(
                &edited,
                Some(Selser {
                    original: &original,
                    source,
                }),
            )
            .unwrap();
        assert_eq!(out, "==  Intro  ==\nOther text {{sig|me}}\n\n* keep  this\n");
    }

    #[test]
    fn limits() {
        let wiki = MockDataAccess::new();
        let config = Configuration::default().with_limits(config::Limits {
            max_wikitext_size: 4,
            ..Default::default()
        });
        let converter = Converter::new(config, &wiki);
        let err = converter.wt2html("Page", "12345").unwrap_err();
        assert!(matches!(err, Error::TooLarge { size: 5, limit: 4 }));
        assert!(converter.wt2html("Page", "1234").is_ok());
    }
}
