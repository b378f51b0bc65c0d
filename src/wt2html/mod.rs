//! Wikitext to DOM conversion.
//!
//! The pipeline for one frame of Wikitext is:
//!
//! 1. Tokenize the source ([`crate::wikitext::Parser`]).
//! 2. Balance quotes and build lists ([`transforms`]).
//! 3. Build a tree from the tokens ([`builder`]).
//! 4. Run the post-processing passes ([`pp`]), which expand templates and
//!    extension tags by running this same pipeline in nested frames.

use crate::{
    Error, Result,
    config::Configuration,
    data_access::DataAccess,
    dom::{Document, serialize::dump_dom},
    ext::ExtensionRegistry,
    wikitext::Parser,
};
use builder::TreeBuilder;
use core::cell::Cell;

mod builder;
pub(crate) mod pp;
mod transforms;

/// Everything shared by all frames of a single conversion.
pub struct Env<'a> {
    /// The site configuration and limits.
    pub config: &'a Configuration,
    /// The interface to the wiki.
    pub data_access: &'a dyn DataAccess,
    /// The registered extension tags.
    pub extensions: &'a ExtensionRegistry,
    /// The last about id handed out.
    about_counter: Cell<usize>,
}

impl<'a> Env<'a> {
    /// Creates a new environment.
    pub fn new(
        config: &'a Configuration,
        data_access: &'a dyn DataAccess,
        extensions: &'a ExtensionRegistry,
    ) -> Self {
        Self {
            config,
            data_access,
            extensions,
            about_counter: Cell::new(0),
        }
    }

    /// Returns a new `about` id, used to group the sibling nodes generated by
    /// one template.
    pub fn new_about_id(&self) -> String {
        let id = self.about_counter.get();
        self.about_counter.set(id + 1);
        format!("#mwt{id}")
    }
}

impl core::fmt::Debug for Env<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Env")
            .field("config", &self.config)
            .field("extensions", &self.extensions)
            .field("about_counter", &self.about_counter)
            .finish_non_exhaustive()
    }
}

/// One level of Wikitext being converted: the page itself, a transcluded
/// template, or the content of an extension tag.
#[derive(Clone, Debug)]
pub struct Frame<'s> {
    /// The title of the page the source belongs to.
    pub title: String,
    /// The source text. Source ranges of nodes built in this frame are offsets
    /// into this string.
    pub source: &'s str,
    /// How many frames are above this one.
    pub depth: usize,
}

impl<'s> Frame<'s> {
    /// Creates the frame for a page.
    #[must_use]
    pub fn top(title: &str, source: &'s str) -> Self {
        Self {
            title: title.to_string(),
            source,
            depth: 0,
        }
    }

    /// Creates a frame for content nested inside this one.
    #[must_use]
    pub fn child<'c>(&self, title: &str, source: &'c str) -> Frame<'c> {
        Frame {
            title: title.to_string(),
            source,
            depth: self.depth + 1,
        }
    }

    /// Returns true if this is the frame of the page itself.
    #[must_use]
    pub fn is_top_level(&self) -> bool {
        self.depth == 0
    }
}

/// Converts the Wikitext of the page `title` into a document.
pub fn wt2html(env: &Env<'_>, title: &str, source: &str) -> Result<Document> {
    parse(env, &Frame::top(title, source))
}

/// Converts the source of `frame` into a document.
pub(crate) fn parse(env: &Env<'_>, frame: &Frame<'_>) -> Result<Document> {
    let limit = env.config.limits.max_wikitext_size;
    if frame.source.len() > limit {
        return Err(Error::TooLarge {
            size: frame.source.len(),
            limit,
        });
    }

    let tokens = Parser::new(env.config).tokenize(frame.source)?;
    let tokens = transforms::quotes(tokens, frame.source);
    let tokens = transforms::lists(tokens, frame.source);
    let mut doc = TreeBuilder::new(frame.source).build(tokens);
    if log::log_enabled!(log::Level::Trace) {
        log::trace!("{}", dump_dom(&doc, doc.body(), &format!("built {}", frame.title)));
    }

    pp::run(&mut doc, env, frame)?;
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Limits, data_access::MockDataAccess};

    #[test]
    fn about_ids() {
        let config = Configuration::default();
        let data_access = MockDataAccess::new();
        let extensions = ExtensionRegistry::default();
        let env = Env::new(&config, &data_access, &extensions);
        assert_eq!(env.new_about_id(), "#mwt0");
        assert_eq!(env.new_about_id(), "#mwt1");
    }

    #[test]
    fn frames() {
        let top = Frame::top("Main Page", "{{x}}");
        assert!(top.is_top_level());
        let child = top.child("Template:X", "hi");
        assert_eq!(child.depth, 1);
        assert!(!child.is_top_level());
        assert_eq!(child.source, "hi");
    }

    #[test]
    fn too_large() {
        let config = Configuration::default().with_limits(Limits {
            max_wikitext_size: 4,
            ..Limits::default()
        });
        let data_access = MockDataAccess::new();
        let extensions = ExtensionRegistry::default();
        let env = Env::new(&config, &data_access, &extensions);
        let err = wt2html(&env, "Test", "hello").unwrap_err();
        assert!(matches!(err, Error::TooLarge { size: 5, limit: 4 }));
    }
}
