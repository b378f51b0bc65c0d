//! Escaping of text so that it round-trips through the tokenizer as text.

use crate::{common::decode_entity, config::Configuration};
use bitflags::bitflags;
use regex::Regex;
use std::{borrow::Cow, sync::LazyLock};

bitflags! {
    /// Where the text being escaped is written.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct EscapeContext: u8 {
        /// Inside a heading.
        const HEADING = 1 << 0;
        /// Inside the label of a wikilink.
        const LINK = 1 << 1;
        /// Inside a table cell or caption.
        const TABLE_CELL = 1 << 2;
        /// Inside the label of an external link.
        const EXTLINK = 1 << 3;
    }
}

/// Wikitext syntax which is significant anywhere in a line.
static INLINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"''|\[\[|\]\]|\{\{|\}\}|~~~|__[A-Za-z]+__|-\{|\}-|<[A-Za-z/!]").unwrap()
});

/// Something which looks like an entity.
static ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(?:#[0-9]+|#[xX][0-9a-fA-F]+|[A-Za-z][A-Za-z0-9]*);").unwrap());

/// Wikitext syntax which is only significant at the start of a line.
fn starts_line_syntax(line: &str, ctx: EscapeContext) -> bool {
    line.starts_with(['*', '#', ':', ';', '='])
        || line.starts_with("----")
        || line.starts_with("{|")
        || (ctx.contains(EscapeContext::TABLE_CELL) && line.starts_with(['|', '!']))
}

/// Returns true if the text contains something which would not be read back
/// as plain text.
fn needs_nowiki(config: &Configuration, text: &str, sol: bool, ctx: EscapeContext) -> bool {
    if INLINE.is_match(text) {
        return true;
    }

    let mut lines = text.split('\n');
    if let Some(first) = lines.next()
        && sol
        && starts_line_syntax(first, ctx)
    {
        return true;
    }
    if lines.any(|line| starts_line_syntax(line, ctx)) {
        return true;
    }

    if ctx.contains(EscapeContext::HEADING) && text.contains('=') {
        return true;
    }
    if ctx.contains(EscapeContext::LINK) && text.contains('|') {
        return true;
    }
    if ctx.contains(EscapeContext::EXTLINK) && text.contains(']') {
        return true;
    }
    if ctx.contains(EscapeContext::TABLE_CELL) && (text.contains("||") || text.contains("!!")) {
        return true;
    }

    // Free external links
    text.char_indices().any(|(index, c)| {
        c.is_ascii_alphabetic()
            && (index == 0 || !text.as_bytes()[index - 1].is_ascii_alphanumeric())
            && config
                .protocol_len(&text[index..])
                .is_some_and(|len| !text[index..index + len].starts_with("//"))
    }) || (text.contains('[') && text.contains(']'))
}

/// Escapes the characters which would be read back as markup inside
/// `<nowiki>` or HTML, `&` starting an entity and `<` starting a tag.
fn escape_entities(text: &str) -> Cow<'_, str> {
    let text = if text.contains('&') {
        ENTITY.replace_all(text, |caps: &regex::Captures<'_>| {
            let entity = &caps[0];
            if decode_entity(entity).is_some() {
                format!("&amp;{}", &entity[1..])
            } else {
                entity.to_string()
            }
        })
    } else {
        Cow::Borrowed(text)
    };
    if text.contains("</nowiki") {
        Cow::Owned(text.replace("</nowiki", "&lt;/nowiki"))
    } else {
        text
    }
}

/// Escapes `text` so it is read back as the same text when written at the
/// current position. `sol` is true if the text starts a line.
///
/// Only the lines which contain markup are wrapped in `<nowiki>`.
pub(crate) fn escape_text<'a>(
    config: &Configuration,
    text: &'a str,
    sol: bool,
    ctx: EscapeContext,
) -> Cow<'a, str> {
    let text = escape_entities(text);
    if !needs_nowiki(config, &text, sol, ctx) {
        return text;
    }

    let mut out = String::with_capacity(text.len() + 17);
    for (index, line) in text.split('\n').enumerate() {
        if index != 0 {
            out.push('\n');
        }
        if needs_nowiki(config, line, sol || index != 0, ctx) {
            log::trace!("escaping {line:?}");
            out += "<nowiki>";
            out += line;
            out += "</nowiki>";
        } else {
            out += line;
        }
    }
    Cow::Owned(out)
}

/// Escapes the text of a `<nowiki>` element.
pub(crate) fn escape_nowiki(text: &str) -> Cow<'_, str> {
    escape_entities(text)
}

/// Escapes an attribute value for a double-quoted HTML attribute.
pub(crate) fn escape_attr(value: &str) -> Cow<'_, str> {
    if value.contains(['"', '&', '<']) {
        Cow::Owned(html_escape::encode_double_quoted_attribute(value).into_owned())
    } else {
        Cow::Borrowed(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[track_caller]
    fn esc(text: &str, sol: bool, ctx: EscapeContext) -> String {
        escape_text(&Configuration::default(), text, sol, ctx).into_owned()
    }

    #[test]
    fn plain_text() {
        assert_eq!(esc("hello, world", true, EscapeContext::empty()), "hello, world");
        assert_eq!(esc("a = b | c", false, EscapeContext::empty()), "a = b | c");
        assert_eq!(esc("5 * 4", false, EscapeContext::empty()), "5 * 4");
    }

    #[test]
    fn inline_syntax() {
        assert_eq!(esc("''x''", false, EscapeContext::empty()), "<nowiki>''x''</nowiki>");
        assert_eq!(esc("[[x]]", false, EscapeContext::empty()), "<nowiki>[[x]]</nowiki>");
        assert_eq!(esc("{{x}}", false, EscapeContext::empty()), "<nowiki>{{x}}</nowiki>");
        assert_eq!(esc("__TOC__", false, EscapeContext::empty()), "<nowiki>__TOC__</nowiki>");
        assert_eq!(
            esc("see http://example.com", false, EscapeContext::empty()),
            "<nowiki>see http://example.com</nowiki>"
        );
        assert_eq!(esc("a // b", false, EscapeContext::empty()), "a // b");
    }

    #[test]
    fn line_start() {
        assert_eq!(esc("* x", true, EscapeContext::empty()), "<nowiki>* x</nowiki>");
        assert_eq!(esc("* x", false, EscapeContext::empty()), "* x");
        assert_eq!(esc("a\n# x", false, EscapeContext::empty()), "a\n<nowiki># x</nowiki>");
        assert_eq!(
            esc("x\n* y\nz ''w''", true, EscapeContext::empty()),
            "x\n<nowiki>* y</nowiki>\n<nowiki>z ''w''</nowiki>"
        );
        assert_eq!(esc("----", true, EscapeContext::empty()), "<nowiki>----</nowiki>");
        assert_eq!(esc("|x", true, EscapeContext::empty()), "|x");
        assert_eq!(esc("|x", true, EscapeContext::TABLE_CELL), "<nowiki>|x</nowiki>");
    }

    #[test]
    fn contexts() {
        assert_eq!(esc("a=b", false, EscapeContext::HEADING), "<nowiki>a=b</nowiki>");
        assert_eq!(esc("a|b", false, EscapeContext::LINK), "<nowiki>a|b</nowiki>");
        assert_eq!(esc("a]b", false, EscapeContext::EXTLINK), "<nowiki>a]b</nowiki>");
        assert_eq!(esc("a||b", false, EscapeContext::TABLE_CELL), "<nowiki>a||b</nowiki>");
    }

    #[test]
    fn entities() {
        assert_eq!(esc("&amp; &bogus; &", false, EscapeContext::empty()), "&amp;amp; &bogus; &");
        assert_eq!(esc("a < b", false, EscapeContext::empty()), "a < b");
        assert_eq!(esc("<b>", false, EscapeContext::empty()), "<nowiki><b></nowiki>");
        assert_eq!(escape_nowiki("</nowiki>"), "&lt;/nowiki>");
        assert_eq!(escape_attr(r#"a "b""#), "a &quot;b&quot;");
    }
}
