//! The token stream produced by the tokenizer.
//!
//! Tokens are short-lived: the tree builder consumes them and moves their
//! metadata onto DOM nodes. Cloning a token deep-copies its attributes and
//! metadata, so a clone can be edited without affecting the original.

use super::codemap::{KvSourceRange, SourceRange};
use crate::dom::{DataMw, DataParsoid};
use serde::{Deserialize, Serialize};

/// A token invariant violation.
#[derive(Debug, thiserror::Error, Eq, PartialEq)]
pub enum TokenError {
    /// The token has no source range.
    #[error("expected token to have tsr info")]
    MissingTsr,
    /// The token source range ends before it starts or lies outside the
    /// source text.
    #[error("bad tsr {0:?}")]
    BadTsr(SourceRange),
}

/// A key-value pair, used for tag attributes and extension arguments.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Kv {
    /// The key.
    pub k: String,
    /// The value, with entities decoded.
    pub v: String,
    /// The source ranges of the key and value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_offsets: Option<KvSourceRange>,
    /// The raw source of the key, when it differs from `k`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ksrc: Option<String>,
    /// The raw source of the value, when it differs from `v`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vsrc: Option<String>,
}

impl Kv {
    /// Creates a key-value pair without source information.
    pub fn new(k: impl Into<String>, v: impl Into<String>) -> Self {
        Self {
            k: k.into(),
            v: v.into(),
            ..Default::default()
        }
    }

    /// Returns the first pair in `kvs` whose key matches `name`
    /// case-insensitively.
    pub fn lookup<'a>(kvs: &'a [Kv], name: &str) -> Option<&'a Kv> {
        kvs.iter().find(|kv| kv.k.eq_ignore_ascii_case(name))
    }
}

/// The result of [`TagToken::attribute_shadow_info`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ShadowInfo {
    /// The value to serialise.
    pub value: Option<String>,
    /// The value differs from what was parsed.
    pub modified: bool,
    /// The value is the original source text.
    pub from_src: bool,
}

/// A start, end, or self-closing tag.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagToken {
    /// The lowercase tag name.
    pub name: String,
    /// The attributes, in source order.
    pub attribs: Vec<Kv>,
    /// Provenance data.
    #[serde(default)]
    pub data_parsoid: DataParsoid,
    /// Editing data, only allocated when needed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_mw: Option<Box<DataMw>>,
}

impl TagToken {
    /// Creates a tag with the given name and source range.
    pub fn new(name: impl Into<String>, tsr: SourceRange) -> Self {
        Self {
            name: name.into(),
            attribs: Vec::new(),
            data_parsoid: DataParsoid::with_tsr(tsr),
            data_mw: None,
        }
    }

    /// Adds the given attributes.
    #[must_use]
    pub fn with_attribs(mut self, attribs: Vec<Kv>) -> Self {
        self.attribs.extend(attribs);
        self
    }

    /// Appends an attribute, even if one with the same name exists.
    pub fn add_attribute(&mut self, name: &str, value: impl Into<String>, src_offsets: Option<KvSourceRange>) {
        self.attribs.push(Kv {
            src_offsets,
            ..Kv::new(name, value)
        });
    }

    /// Appends an attribute whose value was normalised from `orig_value`,
    /// recording the original for round-tripping.
    pub fn add_normalized_attribute(&mut self, name: &str, value: &str, orig_value: Option<&str>) {
        self.add_attribute(name, value, None);
        self.set_shadow_info(name, value, orig_value);
    }

    /// The value of the first attribute named `name`.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attribute_kv(name).map(|kv| kv.v.as_str())
    }

    /// The first attribute named `name`.
    #[must_use]
    pub fn attribute_kv(&self, name: &str) -> Option<&Kv> {
        Kv::lookup(&self.attribs, name)
    }

    /// Returns true if an attribute named `name` exists.
    #[must_use]
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attribute_kv(name).is_some()
    }

    /// Changes the value of the last attribute named `name`, or appends a new
    /// attribute if there is none.
    pub fn set_attribute(&mut self, name: &str, value: impl Into<String>) {
        if let Some(kv) = self
            .attribs
            .iter_mut()
            .rev()
            .find(|kv| kv.k.to_lowercase() == name)
        {
            kv.v = value.into();
        } else {
            self.add_attribute(name, value, None);
        }
    }

    /// Records that attribute `name` was normalised to `value` from
    /// `orig_value`. Nothing is recorded if the value did not change or the
    /// original is unknown.
    pub fn set_shadow_info(&mut self, name: &str, value: &str, orig_value: Option<&str>) {
        if let Some(orig_value) = orig_value
            && value != orig_value
        {
            self.data_parsoid
                .a
                .get_or_insert_default()
                .insert(name.to_string(), Some(value.to_string()));
            self.data_parsoid
                .sa
                .get_or_insert_default()
                .insert(name.to_string(), orig_value.to_string());
        }
    }

    /// Returns the value of attribute `name` to use when serialising, which
    /// is the original source text if the attribute is unchanged since it
    /// was normalised.
    #[must_use]
    pub fn attribute_shadow_info(&self, name: &str) -> ShadowInfo {
        let current = self.attribute(name).map(str::to_string);
        shadow_info(&self.data_parsoid, name, current)
    }

    /// Removes every attribute named `name`.
    pub fn remove_attribute(&mut self, name: &str) {
        self.attribs.retain(|kv| kv.k.to_lowercase() != name);
    }

    /// Adds `value` to the space-separated attribute `name`, unless it is
    /// already present.
    pub fn add_space_separated_attribute(&mut self, name: &str, value: &str) {
        if let Some(kv) = self.attribute_kv(name) {
            if kv.v.split(' ').any(|v| v == value) {
                return;
            }
            let k = kv.k.to_lowercase();
            let v = format!("{} {value}", kv.v);
            self.set_attribute(&k, v);
        } else {
            self.add_attribute(name, value, None);
        }
    }

    /// Returns the HTML of the expanded attribute `key`, if this token has
    /// templated attributes.
    #[must_use]
    pub fn fetch_expanded_attr_value(&self, key: &str) -> Option<&str> {
        if !self
            .attribute("typeof")
            .is_some_and(|t| t.contains("mw:ExpandedAttrs"))
        {
            return None;
        }
        self.data_mw
            .as_ref()?
            .attribs
            .as_ref()?
            .iter()
            .find(|attr| attr.key.txt.as_deref() == Some(key))
            .and_then(|attr| attr.value.html.as_deref())
    }
}

/// Computes serialisation info for an attribute from its shadow data.
pub(crate) fn shadow_info(dp: &DataParsoid, name: &str, current: Option<String>) -> ShadowInfo {
    match dp.a.as_ref().and_then(|a| a.get(name)) {
        None => ShadowInfo {
            value: current,
            // A new element is always modified
            modified: dp.is_modified(),
            from_src: false,
        },
        Some(normalized) if *normalized != current => ShadowInfo {
            value: current,
            modified: true,
            from_src: false,
        },
        Some(_) => match dp.sa.as_ref().and_then(|sa| sa.get(name)) {
            None => ShadowInfo {
                value: current,
                modified: false,
                from_src: false,
            },
            Some(orig) => ShadowInfo {
                value: Some(orig.clone()),
                modified: false,
                from_src: true,
            },
        },
    }
}

/// A text, comment, or newline token.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextToken {
    /// The text.
    pub value: String,
    /// Provenance data.
    #[serde(default)]
    pub data_parsoid: DataParsoid,
}

impl TextToken {
    /// Creates a text token with the given source range.
    pub fn new(value: impl Into<String>, tsr: Option<SourceRange>) -> Self {
        Self {
            value: value.into(),
            data_parsoid: DataParsoid {
                tsr,
                ..Default::default()
            },
        }
    }
}

/// A token.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Token {
    /// `<tag>`
    #[serde(rename = "TagTk")]
    StartTag(TagToken),
    /// `</tag>`
    #[serde(rename = "EndTagTk")]
    EndTag(TagToken),
    /// `<tag/>`, and tokens that stand alone (links placeholders, templates,
    /// extension tags).
    #[serde(rename = "SelfclosingTagTk")]
    SelfClosingTag(TagToken),
    /// Plain text.
    #[serde(rename = "Text")]
    Text(TextToken),
    /// `<!-- comment -->`
    #[serde(rename = "CommentTk")]
    Comment(TextToken),
    /// A line break.
    #[serde(rename = "NlTk")]
    Newline(TextToken),
    /// The end of the input.
    #[serde(rename = "EOFTk")]
    EndOfInput,
}

impl Token {
    /// The tag data, for tag tokens.
    #[must_use]
    pub fn tag(&self) -> Option<&TagToken> {
        match self {
            Token::StartTag(tag) | Token::EndTag(tag) | Token::SelfClosingTag(tag) => Some(tag),
            _ => None,
        }
    }

    /// The tag name, for tag tokens.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.tag().map(|tag| tag.name.as_str())
    }

    /// Provenance data, if the token has any.
    #[must_use]
    pub fn data_parsoid(&self) -> Option<&DataParsoid> {
        match self {
            Token::StartTag(tag) | Token::EndTag(tag) | Token::SelfClosingTag(tag) => {
                Some(&tag.data_parsoid)
            }
            Token::Text(text) | Token::Comment(text) | Token::Newline(text) => {
                Some(&text.data_parsoid)
            }
            Token::EndOfInput => None,
        }
    }

    /// Provenance data, mutably, if the token has any.
    pub fn data_parsoid_mut(&mut self) -> Option<&mut DataParsoid> {
        match self {
            Token::StartTag(tag) | Token::EndTag(tag) | Token::SelfClosingTag(tag) => {
                Some(&mut tag.data_parsoid)
            }
            Token::Text(text) | Token::Comment(text) | Token::Newline(text) => {
                Some(&mut text.data_parsoid)
            }
            Token::EndOfInput => None,
        }
    }

    /// The token source range.
    #[must_use]
    pub fn tsr(&self) -> Option<SourceRange> {
        self.data_parsoid().and_then(|dp| dp.tsr)
    }

    /// The source text of this token within `source`.
    pub fn wt_source<'a>(&self, source: &'a str) -> Result<&'a str, TokenError> {
        let tsr = self.tsr().ok_or(TokenError::MissingTsr)?;
        tsr.substr(source).ok_or(TokenError::BadTsr(tsr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{AttribText, DataMwAttrib};

    fn link() -> TagToken {
        let mut tag = TagToken::new("a", SourceRange::new(0, 8));
        tag.add_normalized_attribute("href", "./Foo_bar", Some("foo bar"));
        tag.add_attribute("class", "x", None);
        tag
    }

    #[test]
    fn clone_is_deep() {
        let original = Token::StartTag(link());
        let mut copy = original.clone();
        let Token::StartTag(tag) = &mut copy else {
            unreachable!()
        };
        tag.set_attribute("class", "y");
        tag.data_parsoid.tsr = None;
        tag.data_parsoid.sa.as_mut().unwrap().clear();
        tag.data_mw.get_or_insert_default().name = Some("changed".into());

        let Token::StartTag(tag) = &original else {
            unreachable!()
        };
        assert_eq!(tag.attribute("class"), Some("x"));
        assert_eq!(tag.data_parsoid.tsr, Some(SourceRange::new(0, 8)));
        assert_eq!(tag.data_parsoid.sa.as_ref().unwrap().len(), 1);
        assert!(tag.data_mw.is_none());
    }

    #[test]
    fn shadow_info() {
        let mut tag = link();
        assert_eq!(
            tag.attribute_shadow_info("href"),
            ShadowInfo {
                value: Some("foo bar".into()),
                modified: false,
                from_src: true
            }
        );
        assert_eq!(
            tag.attribute_shadow_info("class"),
            ShadowInfo {
                value: Some("x".into()),
                modified: false,
                from_src: false
            }
        );
        tag.set_attribute("href", "./Baz");
        assert_eq!(
            tag.attribute_shadow_info("href"),
            ShadowInfo {
                value: Some("./Baz".into()),
                modified: true,
                from_src: false
            }
        );

        let mut fresh = TagToken::default();
        fresh.add_attribute("href", "x", None);
        assert!(fresh.attribute_shadow_info("href").modified);
    }

    #[test]
    fn unchanged_values_are_not_shadowed() {
        let mut tag = TagToken::default();
        tag.add_normalized_attribute("href", "same", Some("same"));
        tag.add_normalized_attribute("title", "t", None);
        assert!(tag.data_parsoid.a.is_none());
        assert!(tag.data_parsoid.sa.is_none());
    }

    #[test]
    fn attribute_editing() {
        let mut tag = TagToken::default();
        tag.add_attribute("Class", "a", None);
        tag.add_attribute("class", "b", None);
        tag.set_attribute("class", "c");
        assert_eq!(tag.attribs[0].v, "a");
        assert_eq!(tag.attribs[1].v, "c");
        assert_eq!(tag.attribute("CLASS"), Some("a"));

        tag.remove_attribute("class");
        assert!(!tag.has_attribute("class"));

        tag.add_space_separated_attribute("class", "x");
        tag.add_space_separated_attribute("class", "y");
        tag.add_space_separated_attribute("class", "x");
        assert_eq!(tag.attribute("class"), Some("x y"));
    }

    #[test]
    fn expanded_attr_value() {
        let mut tag = TagToken::default();
        tag.add_attribute("typeof", "mw:ExpandedAttrs", None);
        tag.data_mw.get_or_insert_default().attribs = Some(vec![DataMwAttrib {
            key: AttribText {
                txt: Some("title".into()),
                html: None,
            },
            value: AttribText {
                txt: None,
                html: Some("<b>x</b>".into()),
            },
        }]);
        assert_eq!(tag.fetch_expanded_attr_value("title"), Some("<b>x</b>"));
        assert_eq!(tag.fetch_expanded_attr_value("alt"), None);
    }

    #[test]
    fn wt_source() {
        let src = "ab<b>cd";
        let tag = Token::StartTag(TagToken::new("b", SourceRange::new(2, 5)));
        assert_eq!(tag.wt_source(src), Ok("<b>"));
        let bad = Token::StartTag(TagToken::new("b", SourceRange::new(5, 2)));
        assert_eq!(bad.wt_source(src), Err(TokenError::BadTsr(SourceRange::new(5, 2))));
        assert_eq!(Token::EndOfInput.wt_source(src), Err(TokenError::MissingTsr));
    }

    #[test]
    fn json_shape() {
        let token = Token::EndTag(TagToken::new("b", SourceRange::new(1, 5)));
        let json = serde_json::to_value(&token).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "EndTagTk",
                "name": "b",
                "attribs": [],
                "dataParsoid": { "tsr": [1, 5] }
            })
        );
        let back: Token = serde_json::from_value(json).unwrap();
        assert_eq!(back, token);
    }
}
