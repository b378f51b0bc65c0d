//! Conversion configuration.
//!
//! Wikitext documents are not self-encapsulated and cannot be parsed without
//! out-of-band configuration data. The site-specific part of it is a static
//! [`ConfigurationSource`]; the runtime part is a set of [`Limits`]. Both are
//! carried by [`Configuration`], which is passed explicitly to every stage.

use crate::dom::serialize::DataAttribMode;
use phf::Set;
use serde::Deserialize;

/// Site specific configuration of a wiki.
#[derive(Debug)]
pub struct ConfigurationSource {
    /// Words that can appear between `__` and `__`, lowercased.
    pub behavior_switch_words: Set<&'static str>,

    /// Tag names of registered extension tags, lowercased.
    pub extension_tags: Set<&'static str>,

    /// Protocols that can be used for external links, lowercased.
    pub protocols: Set<&'static str>,
}

/// The built-in site configuration, matching a default MediaWiki
/// installation.
pub static CONFIG_SOURCE: ConfigurationSource = ConfigurationSource {
    behavior_switch_words: phf::phf_set! {
        "notoc", "nogallery", "forcetoc", "toc", "noeditsection", "newsectionlink",
        "nonewsectionlink", "hiddencat", "expectunusedcategory", "expectunusedtemplate",
        "index", "noindex", "staticredirect", "notitleconvert", "nocontentconvert",
        "disambiguation",
    },
    extension_tags: phf::phf_set! {
        "pre", "nowiki", "gallery", "indicator", "ref", "references", "poem",
        "syntaxhighlight", "source", "math", "templatestyles", "templatedata",
        "section", "timeline", "hiero", "score",
    },
    protocols: phf::phf_set! {
        "bitcoin:", "ftp://", "ftps://", "geo:", "git://", "gopher://", "http://",
        "https://", "irc://", "ircs://", "magnet:", "mailto:", "matrix:", "mms://",
        "news:", "nntp://", "redis://", "sftp://", "sip:", "sips:", "sms:", "ssh://",
        "svn://", "tel:", "telnet://", "urn:", "worldwind://", "xmpp:", "//",
    },
};

/// HTML tags which may be written literally in Wikitext.
pub(crate) static HTML5_TAGS: Set<&str> = phf::phf_set! {
    "abbr", "b", "bdi", "bdo", "big", "blockquote", "br", "caption", "center",
    "cite", "code", "data", "dd", "del", "dfn", "div", "dl", "dt", "em", "font",
    "h1", "h2", "h3", "h4", "h5", "h6", "hr", "i", "ins", "kbd", "li", "mark",
    "ol", "p", "pre", "q", "rb", "rp", "rt", "rtc", "ruby", "s", "samp",
    "small", "span", "strike", "strong", "sub", "sup", "table", "td", "th",
    "time", "tr", "tt", "u", "ul", "var", "wbr",
};

/// Runtime limits and output policy.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Limits {
    /// The largest wikitext input accepted, in bytes.
    pub max_wikitext_size: usize,
    /// The deepest template nesting expanded before an error marker is
    /// emitted instead.
    pub max_template_depth: usize,
    /// How many siblings the diff engine looks ahead to find a moved or
    /// inserted node.
    pub diff_lookahead: usize,
    /// Where node metadata is written when a document is stored.
    pub data_attrib_mode: DataAttribMode,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_wikitext_size: 2 * 1024 * 1024,
            max_template_depth: 40,
            diff_lookahead: 5,
            data_attrib_mode: DataAttribMode::Inline,
        }
    }
}

/// Processed configuration data for the converter.
#[derive(Clone, Debug)]
pub struct Configuration {
    /// Configuration source.
    source: &'static ConfigurationSource,
    /// Runtime limits.
    pub limits: Limits,
}

impl core::ops::Deref for Configuration {
    type Target = ConfigurationSource;

    fn deref(&self) -> &Self::Target {
        self.source
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new(&CONFIG_SOURCE)
    }
}

impl Configuration {
    /// Creates a new configuration based on the given site specific
    /// configuration, with default limits.
    #[must_use]
    pub fn new(source: &'static ConfigurationSource) -> Self {
        Self {
            source,
            limits: Limits::default(),
        }
    }

    /// Replaces the runtime limits.
    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Returns true if `name` is a registered extension tag.
    #[must_use]
    pub fn is_extension_tag(&self, name: &str) -> bool {
        contains_ignore_case(&self.extension_tags, name)
    }

    /// Returns true if `word` is a behavior switch.
    #[must_use]
    pub fn is_behavior_switch(&self, word: &str) -> bool {
        contains_ignore_case(&self.behavior_switch_words, word)
    }

    /// Returns the length of the URL protocol at the start of `text`, if there
    /// is one.
    #[must_use]
    pub fn protocol_len(&self, text: &str) -> Option<usize> {
        // Longest protocol is `worldwind://`
        (2..=12)
            .rev()
            .filter_map(|len| text.get(..len))
            .find(|prefix| contains_ignore_case(&self.protocols, prefix))
            .map(str::len)
    }
}

/// Performs a case-insensitive lookup of `value` in a lowercase `set`.
pub(crate) fn contains_ignore_case(set: &Set<&'static str>, value: &str) -> bool {
    if value.bytes().any(|b| b.is_ascii_uppercase()) {
        set.contains(&*value.to_ascii_lowercase())
    } else {
        set.contains(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups() {
        let config = Configuration::default();
        assert!(config.is_extension_tag("Poem"));
        assert!(!config.is_extension_tag("b"));
        assert!(config.is_behavior_switch("NOTOC"));
        assert_eq!(config.protocol_len("https://example.com"), Some(8));
        assert_eq!(config.protocol_len("MAILTO:x@y"), Some(7));
        assert_eq!(config.protocol_len("//example.com"), Some(2));
        assert_eq!(config.protocol_len("example.com"), None);
    }

    #[test]
    fn limits_from_json() {
        let limits: Limits = serde_json::from_str(r#"{ "maxTemplateDepth": 3 }"#).unwrap();
        assert_eq!(limits.max_template_depth, 3);
        assert_eq!(limits.diff_lookahead, 5);
        let limits: Limits = serde_json::from_str(r#"{ "dataAttribMode": "pagebundle" }"#).unwrap();
        assert_eq!(limits.data_attrib_mode, DataAttribMode::PageBundle);
    }
}
