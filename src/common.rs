//! Text and link helpers shared by both conversion directions.

use html_escape::NAMED_ENTITIES;
use phf::{Set, phf_set};
use std::borrow::Cow;

/// Elements which never have content.
static VOID_ELEMENTS: Set<&str> = phf_set! {
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta",
    "param", "source", "track", "wbr",
};

/// Elements which start a new block in wikitext output.
static BLOCK_ELEMENTS: Set<&str> = phf_set! {
    "blockquote", "body", "caption", "center", "dd", "div", "dl", "dt",
    "figure", "h1", "h2", "h3", "h4", "h5", "h6", "hr", "li", "ol", "p", "pre",
    "section", "table", "tbody", "td", "tfoot", "th", "thead", "tr", "ul",
};

/// Returns true if the element named `name` is a void element.
#[inline]
#[must_use]
pub fn is_void_element(name: &str) -> bool {
    VOID_ELEMENTS.contains(name)
}

/// Returns true if the element named `name` is a block element.
#[inline]
#[must_use]
pub fn is_block_element(name: &str) -> bool {
    BLOCK_ELEMENTS.contains(name)
}

/// Encodes section heading text into a format suitable for use as a URL anchor.
#[must_use]
pub fn anchor_encode(s: &str) -> String {
    let s = decode_html(s.trim_ascii());
    let id = normalize_title(&s);
    let end = id.floor_char_boundary(1024);
    strtr(&id[..end], &[(" ", "_")]).into_owned()
}

/// Decodes HTML entities according to the Wikitext rules.
#[must_use]
pub fn decode_html(text: &str) -> Cow<'_, str> {
    const MAX_LEN: usize = {
        let mut max = 0;
        let mut entities = NAMED_ENTITIES.as_slice();
        while let [(name, _), rest @ ..] = entities {
            if name.len() > max {
                max = name.len();
            }
            entities = rest;
        }
        max + b";".len()
    };

    let bytes = text.as_bytes();
    let entity_ranges = memchr::memchr_iter(b'&', bytes).filter_map(|start| {
        let next = start + "&".len();
        memchr::memchr(b';', &bytes[next..(next + MAX_LEN).min(bytes.len())])
            .map(|len| start..(next + len + b";".len()))
    });

    let mut flushed = 0;
    let mut out = String::new();
    for range in entity_ranges {
        if range.start < flushed {
            continue;
        }
        let Some(value) = decode_entity(&text[range.clone()]) else {
            continue;
        };
        out += &text[flushed..range.start];
        out += &value;
        flushed = range.end;
    }

    if flushed != 0 {
        out += &text[flushed..];
        Cow::Owned(out)
    } else {
        Cow::Borrowed(text)
    }
}

/// Decodes a single complete entity like `&amp;` or `&#x41;`.
#[must_use]
pub fn decode_entity(entity: &str) -> Option<Cow<'static, str>> {
    let name = entity.strip_prefix('&')?.strip_suffix(';')?;
    if let Some(name) = name.strip_prefix('#') {
        if let Some(name) = name.strip_prefix(['X', 'x']) {
            u32::from_str_radix(name, 16)
        } else {
            name.parse::<u32>()
        }
        .ok()
        .and_then(char::from_u32)
        .map(|c| Cow::Owned(c.to_string()))
    } else {
        NAMED_ENTITIES
            .binary_search_by(|(t_name, _)| t_name.cmp(&name.as_bytes()))
            .ok()
            .map(|index| Cow::Borrowed(NAMED_ENTITIES[index].1))
    }
}

/// Replaces substrings like PHP `strtr`, preferring the longest match at each
/// position.
#[must_use]
pub fn strtr<'a>(input: &'a str, replacements: &[(&str, &str)]) -> Cow<'a, str> {
    let replacements = if replacements.is_sorted_by(|(a, _), (b, _)| a.len() >= b.len()) {
        Cow::Borrowed(replacements)
    } else {
        let mut replacements = Vec::from(replacements);
        replacements.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()));
        Cow::Owned(replacements)
    };

    let mut iter = input.char_indices();
    let mut out = String::new();
    let mut flushed = 0;
    'next: while iter.offset() != input.len() {
        for (find, replace) in replacements.iter() {
            if !find.is_empty() && iter.as_str().starts_with(find) {
                out += &input[flushed..iter.offset()];
                out += *replace;
                flushed = iter.offset() + find.len();
                for _ in 0..find.chars().count() {
                    iter.next();
                }
                continue 'next;
            }
        }
        iter.next();
    }

    if flushed == 0 {
        Cow::Borrowed(input)
    } else {
        out += &input[flushed..];
        Cow::Owned(out)
    }
}

/// Returns true if the character `c` is a bidirectional text marker.
fn bidi(c: char) -> bool {
    ('\u{200e}'..='\u{200f}').contains(&c) || ('\u{202a}'..='\u{202e}').contains(&c)
}

/// Returns true if the character `c` is considered like whitespace in title
/// text.
fn spacelike(c: char) -> bool {
    c == '_' || c.is_whitespace()
}

/// Returns true if the character `c` is trimmable in title text.
fn trimmable(c: char) -> bool {
    bidi(c) || spacelike(c)
}

/// Normalises a title by decoding HTML entities and converting runs of
/// whitespace and underscores to a single space character.
#[must_use]
pub fn normalize_title(text: &str) -> Cow<'_, str> {
    let decoded = decode_html(text);
    let mut out = String::new();
    let mut flushed = 0;
    let mut iter = decoded.char_indices().peekable();

    while let Some((index, c)) = iter.next() {
        // A single space is already normal
        if trimmable(c) && (c != ' ' || matches!(iter.peek(), Some((_, c)) if trimmable(*c))) {
            while iter.next_if(|(_, c)| trimmable(*c)).is_some() {}

            if let Some((next_index, _)) = iter.peek() {
                out += &decoded[flushed..index];
                flushed = *next_index;
                if index != 0 && spacelike(c) {
                    out.push(' ');
                }
            }
        }
    }

    if flushed == 0 {
        match decoded {
            Cow::Borrowed(b) => Cow::Borrowed(b.trim_matches(trimmable)),
            Cow::Owned(o) => Cow::Owned(o.trim_matches(trimmable).to_string()),
        }
    } else {
        out += decoded[flushed..].trim_end_matches(trimmable);
        Cow::Owned(out)
    }
}

/// The alphabet of characters to percent-encode in link targets.
const ALPHABET: percent_encoding::AsciiSet = percent_encoding::CONTROLS
    .add(b'%')
    .add(b'#')
    .add(b'\'')
    .add(b'"')
    .add(b'&')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b']')
    .add(b' ');

/// Percent-decodes a URL part.
#[inline]
#[must_use]
pub fn url_decode(input: &str) -> Cow<'_, str> {
    percent_encoding::percent_decode_str(input).decode_utf8_lossy()
}

/// Percent-encodes a URL part.
#[inline]
#[must_use]
pub fn url_encode(input: &str) -> percent_encoding::PercentEncode<'_> {
    percent_encoding::utf8_percent_encode(input, &ALPHABET)
}

/// Converts a link target to its canonical database key form, with the first
/// letter uppercased and spaces replaced by underscores.
#[must_use]
pub fn title_key(target: &str) -> String {
    let title = normalize_title(target);
    let title = title.trim_start_matches(':');
    let mut chars = title.chars();
    let mut key = chars
        .next()
        .map(|c| c.to_uppercase().collect::<String>())
        .unwrap_or_default();
    key += chars.as_str();
    strtr(&key, &[(" ", "_")]).into_owned()
}

/// Converts a wikilink target to the relative `href` used in HTML output,
/// like `./Main_Page#Section`.
#[must_use]
pub fn title_to_href(target: &str) -> String {
    let (title, fragment) = match target.split_once('#') {
        Some((title, fragment)) => (title, Some(fragment)),
        None => (target, None),
    };
    let mut href = format!("./{}", url_encode(&title_key(title)));
    if let Some(fragment) = fragment {
        href.push('#');
        href += &anchor_encode(fragment);
    }
    href
}

/// Converts a relative `href` back into a link target.
#[must_use]
pub fn href_to_title(href: &str) -> Option<String> {
    let title = href.strip_prefix("./")?;
    Some(strtr(&url_decode(title), &[("_", " ")]).into_owned())
}
