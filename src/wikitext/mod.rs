//! Wikitext tokenizer.
//!
//! The tokenizer turns a Wikitext document into a flat stream of
//! [`Token`]s. Every token records the range of the source it was created
//! from, and those ranges cover the whole document in order.

use crate::config::Configuration;
pub use codemap::{DomSourceRange, FileMap, KvSourceRange, SourceRange, Spanned};
pub(crate) use parser::template_title;
pub(crate) use token::shadow_info;
pub use peg::str::LineCol;
pub use token::{Kv, ShadowInfo, TagToken, TextToken, Token, TokenError};

mod codemap;
mod parser;
pub mod testfile;
#[cfg(test)]
mod tests;
mod token;

/// A tokenizer error.
pub type Error = peg::error::ParseError<LineCol>;

/// A Wikitext tokenizer.
#[derive(Clone, Copy, Debug)]
pub struct Parser<'a> {
    /// The configuration for the tokenizer.
    config: &'a Configuration,
}

impl<'a> Parser<'a> {
    /// Creates a new tokenizer with the given configuration.
    #[must_use]
    pub fn new(config: &'a Configuration) -> Self {
        Self { config }
    }

    /// Tokenizes Wikitext from `source`. The last token is always
    /// [`Token::EndOfInput`].
    pub fn tokenize(&self, source: &str) -> Result<Vec<Token>, Error> {
        let tokens = parser::wikitext::start(source, self)?;
        log::trace!("tokenized {} bytes into {} tokens", source.len(), tokens.len());
        Ok(tokens)
    }
}
