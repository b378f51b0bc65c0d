//! Token stream transforms which run between the tokenizer and the tree
//! builder.
//!
//! The tokenizer emits bold/italic markers and list bullets as placeholder
//! tokens because their meaning depends on the rest of the line (quotes) or
//! the previous line (lists). These transforms replace them with balanced
//! start and end tags.

use crate::{
    dom::Syntax,
    wikitext::{SourceRange, TagToken, TextToken, Token},
};

/// Replaces `mw-quote` tokens with balanced `<b>` and `<i>` tags, one line at
/// a time.
pub(crate) fn quotes(tokens: Vec<Token>, source: &str) -> Vec<Token> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut line = Vec::new();
    for token in tokens {
        let ends_line = matches!(token, Token::Newline(_) | Token::EndOfInput)
            || matches!(&token, Token::StartTag(tag) if matches!(tag.name.as_str(), "td" | "th" | "caption"));
        if ends_line {
            let pos = token.tsr().map_or(source.len(), |tsr| tsr.start);
            quote_line(&mut out, core::mem::take(&mut line), source, pos);
            out.push(token);
        } else {
            line.push(token);
        }
    }
    quote_line(&mut out, line, source, source.len());
    out
}

/// The kind of a quote marker.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Quote {
    /// `''`
    Italic,
    /// `'''`
    Bold,
    /// `'''''`
    BoldItalic,
}

impl Quote {
    /// Classifies a quote marker token.
    fn from_token(token: &Token) -> Option<Self> {
        match token {
            Token::SelfClosingTag(tag) if tag.name == "mw-quote" => {
                match tag.attribute("value").map_or(0, str::len) {
                    2 => Some(Self::Italic),
                    3 => Some(Self::Bold),
                    5 => Some(Self::BoldItalic),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

/// The currently open text styles.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
enum TextStyle {
    /// No current style.
    #[default]
    None,
    /// Current style is bold.
    B,
    /// Current style is italic nested in bold.
    BI,
    /// Current style is italic.
    I,
    /// Current style is bold nested in italic.
    IB,
}

/// A tag to emit for a quote marker. Tags with a width consume that many
/// apostrophes of the marker, in order; the rest are zero-width and flagged
/// as inserted by the tree builder.
#[derive(Clone, Copy, Debug)]
enum Emit {
    /// A start tag.
    Start(&'static str, usize),
    /// An end tag.
    End(&'static str, usize),
}

impl TextStyle {
    /// Returns the tags needed to move from this state to the next one for the
    /// given `quote`, and the next state.
    fn transition(self, quote: Quote) -> (&'static [Emit], Self) {
        use Emit::{End, Start};
        match (quote, self) {
            (Quote::Bold, Self::B) => (&[End("b", 3)], Self::None),
            (Quote::Bold, Self::BI) => (&[End("i", 0), End("b", 3), Start("i", 0)], Self::I),
            (Quote::Bold, Self::None) => (&[Start("b", 3)], Self::B),
            (Quote::Bold, Self::I) => (&[Start("b", 3)], Self::IB),
            (Quote::Bold, Self::IB) => (&[End("b", 3)], Self::I),
            (Quote::Italic, Self::None) => (&[Start("i", 2)], Self::I),
            (Quote::Italic, Self::B) => (&[Start("i", 2)], Self::BI),
            (Quote::Italic, Self::BI) => (&[End("i", 2)], Self::B),
            (Quote::Italic, Self::I) => (&[End("i", 2)], Self::None),
            (Quote::Italic, Self::IB) => (&[End("b", 0), End("i", 2), Start("b", 0)], Self::B),
            (Quote::BoldItalic, Self::None) => (&[Start("b", 3), Start("i", 2)], Self::BI),
            (Quote::BoldItalic, Self::B) => (&[End("b", 3), Start("i", 2)], Self::I),
            (Quote::BoldItalic, Self::BI) => (&[End("i", 2), End("b", 3)], Self::None),
            (Quote::BoldItalic, Self::I) => (&[End("i", 2), Start("b", 3)], Self::B),
            (Quote::BoldItalic, Self::IB) => (&[End("b", 3), End("i", 2)], Self::None),
        }
    }

    /// Returns the tags needed to close every open style.
    fn finish(self) -> &'static [Emit] {
        use Emit::End;
        match self {
            Self::None => &[],
            Self::B => &[End("b", 0)],
            Self::BI => &[End("i", 0), End("b", 0)],
            Self::I => &[End("i", 0)],
            Self::IB => &[End("b", 0), End("i", 0)],
        }
    }
}

/// Balances the quotes of a single line and appends the result to `out`.
/// `eol` is the position of the end of the line.
fn quote_line(out: &mut Vec<Token>, mut line: Vec<Token>, source: &str, eol: usize) {
    if !line.iter().any(|token| Quote::from_token(token).is_some()) {
        out.extend(line);
        return;
    }

    fix_odd_quotes(&mut line, source);

    let mut state = TextStyle::default();
    for token in line {
        let Some(quote) = Quote::from_token(&token) else {
            out.push(token);
            continue;
        };

        let tsr = token.tsr().unwrap_or(SourceRange::new(eol, eol));
        let (emits, next) = state.transition(quote);
        emit_quote_tags(out, emits, tsr);
        state = next;
    }
    emit_quote_tags(out, state.finish(), SourceRange::new(eol, eol));
}

/// Appends the tags for a quote marker covering `tsr`.
fn emit_quote_tags(out: &mut Vec<Token>, emits: &[Emit], tsr: SourceRange) {
    let mut pos = tsr.start;
    for emit in emits {
        let (name, width) = match *emit {
            Emit::Start(name, width) | Emit::End(name, width) => (name, width),
        };
        let mut tag = TagToken::new(name, SourceRange::new(pos, pos + width));
        pos += width;
        out.push(match emit {
            Emit::Start(..) => {
                tag.data_parsoid.auto_inserted_start = width == 0;
                Token::StartTag(tag)
            }
            Emit::End(..) => {
                tag.data_parsoid.auto_inserted_end = width == 0;
                Token::EndTag(tag)
            }
        });
    }
}

/// If a line has an odd number of both bold and italic markers, converts one
/// bold marker into an apostrophe followed by an italic marker.
///
/// The bold marker picked is the first one after a single-letter word, then
/// the first one after a multi-letter word, then the first one after a space.
///
/// ```wikitext
/// l'''amour'' ''x''
///  ^ becomes an apostrophe
/// ```
fn fix_odd_quotes(line: &mut Vec<Token>, source: &str) {
    let (mut bold, mut italic) = (0, 0);
    for quote in line.iter().filter_map(Quote::from_token) {
        match quote {
            Quote::Italic => italic += 1,
            Quote::Bold => bold += 1,
            Quote::BoldItalic => {
                italic += 1;
                bold += 1;
            }
        }
    }

    if bold % 2 == 0 || italic % 2 == 0 {
        return;
    }

    let (mut single_letter, mut multi_letter, mut space) = (None, None, None);
    for (index, token) in line.iter().enumerate() {
        if Quote::from_token(token) != Some(Quote::Bold) {
            continue;
        }
        let Some(tsr) = token.tsr() else { continue };
        let mut before = source[..tsr.start].chars().rev();
        match (before.next(), before.next()) {
            (Some(' '), _) => {
                space.get_or_insert(index);
            }
            (Some(_), Some(' ')) => {
                single_letter.get_or_insert(index);
                break;
            }
            _ => {
                multi_letter.get_or_insert(index);
            }
        }
    }

    let Some(index) = single_letter.or(multi_letter).or(space) else {
        return;
    };

    let Some(tsr) = line[index].tsr() else {
        return;
    };
    let mut tag = TagToken::new("mw-quote", SourceRange::new(tsr.start + 1, tsr.end));
    tag.add_attribute("value", "''", None);
    line.splice(
        index..=index,
        [
            Token::Text(TextToken::new(
                "'",
                Some(SourceRange::new(tsr.start, tsr.start + 1)),
            )),
            Token::SelfClosingTag(tag),
        ],
    );
}

/// A list kind.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ListKind {
    /// Ordered list.
    ///
    /// ```wikitext
    /// # Ordered list
    /// ```
    Ordered,
    /// Unordered list.
    ///
    /// ```wikitext
    /// * Unordered list
    /// ```
    Unordered,
    /// Definition list term.
    ///
    /// ```wikitext
    /// ; Definition term
    /// ```
    Term,
    /// Definition list detail.
    ///
    /// ```wikitext
    /// ; Term : Detail
    ///        ^^^^^^^^
    /// : Definition detail
    /// ^^^^^^^^^^^^^^^^^^^
    /// ```
    Detail,
}

impl ListKind {
    /// Converts a bullet character to a list kind.
    fn from_bullet(bullet: u8) -> Option<Self> {
        Some(match bullet {
            b'*' => Self::Unordered,
            b'#' => Self::Ordered,
            b';' => Self::Term,
            b':' => Self::Detail,
            _ => return None,
        })
    }

    /// Returns true if `self` is a definition list item.
    #[inline]
    fn is_definition_list(self) -> bool {
        matches!(self, ListKind::Term | ListKind::Detail)
    }

    /// Returns true if `self` has the same parent element as `other`.
    #[inline]
    fn same_parent(self, other: Self) -> bool {
        match self {
            ListKind::Ordered | ListKind::Unordered => self == other,
            ListKind::Term | ListKind::Detail => other.is_definition_list(),
        }
    }

    /// The HTML tag for the list containing this kind of item.
    #[inline]
    fn list_tag_name(self) -> &'static str {
        match self {
            ListKind::Ordered => "ol",
            ListKind::Unordered => "ul",
            ListKind::Term | ListKind::Detail => "dl",
        }
    }

    /// The HTML tag for this kind of list item.
    #[inline]
    fn item_tag_name(self) -> &'static str {
        match self {
            ListKind::Ordered | ListKind::Unordered => "li",
            ListKind::Term => "dt",
            ListKind::Detail => "dd",
        }
    }
}

/// Builds list and list item tags from `listItem` tokens.
#[derive(Debug, Default)]
struct ListBuilder {
    /// The stack of currently open list items.
    stack: Vec<ListKind>,
    /// A newline seen while a list is open, held until it is known whether the
    /// list continues on the next line.
    newline: Option<Token>,
}

impl ListBuilder {
    /// Closes open items from `depth` onwards. End tags are zero-width at
    /// `pos`.
    fn close(&mut self, out: &mut Vec<Token>, depth: usize, pos: usize) {
        for item in self.stack.drain(depth..).rev() {
            end_tag(out, item.item_tag_name(), pos);
            end_tag(out, item.list_tag_name(), pos);
        }
    }

    /// Emits tags to match the new state given by the list item token `tag`.
    fn item(&mut self, out: &mut Vec<Token>, tag: &TagToken) {
        let bullets = tag
            .attribute("bullets")
            .unwrap_or_default()
            .bytes()
            .filter_map(ListKind::from_bullet)
            .collect::<Vec<_>>();
        let tsr = tag.data_parsoid.tsr.unwrap_or_default();
        let close_pos = self
            .newline
            .as_ref()
            .and_then(Token::tsr)
            .map_or(tsr.start, |nl| nl.start);

        // There are four possible states here:
        //
        // 1. transition between dt and dd (new list item)
        // 2. no changes (new list item)
        // 3. more bullets (new list inside last list item)
        // 4. fewer bullets (new list item outside last list)
        let common_end = self
            .stack
            .iter()
            .zip(&bullets)
            .take_while(|(lhs, rhs)| lhs.same_parent(**rhs))
            .count();

        self.close(out, common_end, close_pos);

        let new_item = common_end != 0 && common_end == bullets.len();
        if new_item {
            end_tag(out, self.stack[common_end - 1].item_tag_name(), close_pos);
        }

        if let Some(newline) = self.newline.take() {
            out.push(newline);
        }

        if new_item {
            let kind = bullets[common_end - 1];
            out.push(list_item_tag(kind, tsr, tag.data_parsoid.stx));
            self.stack[common_end - 1] = kind;
            return;
        }

        let last = bullets.len().saturating_sub(1);
        for (index, kind) in bullets.iter().copied().enumerate().skip(common_end) {
            out.push(Token::StartTag(TagToken::new(
                kind.list_tag_name(),
                SourceRange::new(tsr.start, tsr.start),
            )));
            if index == last {
                out.push(list_item_tag(kind, tsr, tag.data_parsoid.stx));
            } else {
                out.push(list_item_tag(
                    kind,
                    SourceRange::new(tsr.start, tsr.start),
                    None,
                ));
            }
            self.stack.push(kind);
        }
    }
}

/// Creates the start tag of a list item.
fn list_item_tag(kind: ListKind, tsr: SourceRange, stx: Option<Syntax>) -> Token {
    let mut item = TagToken::new(kind.item_tag_name(), tsr);
    item.data_parsoid.stx = stx;
    Token::StartTag(item)
}

/// Appends a zero-width end tag.
fn end_tag(out: &mut Vec<Token>, name: &str, pos: usize) {
    out.push(Token::EndTag(TagToken::new(name, SourceRange::new(pos, pos))));
}

/// Replaces `listItem` tokens with nested list tags.
pub(crate) fn lists(tokens: Vec<Token>, source: &str) -> Vec<Token> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut lists = ListBuilder::default();
    for token in tokens {
        match token {
            Token::SelfClosingTag(tag) if tag.name == "listItem" => {
                lists.item(&mut out, &tag);
            }
            Token::Newline(_) if !lists.stack.is_empty() => {
                if let Some(newline) = lists.newline.replace(token) {
                    // A blank line ends the list
                    let pos = newline.tsr().map_or(source.len(), |tsr| tsr.start);
                    lists.close(&mut out, 0, pos);
                    out.push(newline);
                    out.extend(lists.newline.take());
                }
            }
            token => {
                if let Some(newline) = lists.newline.take() {
                    let pos = newline.tsr().map_or(source.len(), |tsr| tsr.start);
                    lists.close(&mut out, 0, pos);
                    out.push(newline);
                } else if matches!(token, Token::EndOfInput) {
                    lists.close(&mut out, 0, source.len());
                }
                out.push(token);
            }
        }
    }
    out
}
