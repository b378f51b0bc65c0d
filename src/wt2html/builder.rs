//! The tree builder.
//!
//! Tokens are adopted one at a time into a [`Document`] using an explicit
//! stack of open elements. Wikitext is frequently unbalanced, so the builder
//! never fails: unmatched end tags become text and elements which are still
//! open at the end of the input are closed and flagged as such.

use crate::{
    common::is_void_element,
    dom::{DataMw, DataParsoid, Document, NodeData, NodeId, Syntax, TempFlags},
    wikitext::{DomSourceRange, Kv, SourceRange, TagToken, TextToken, Token},
};

/// Elements which end the search for a matching end tag.
const SCOPE_BOUNDARIES: &[&str] = &["table", "td", "th", "caption"];

/// Table elements whose end is implied by wikitext table syntax.
const TABLE_PARTS: &[&str] = &["td", "th", "tr", "caption"];

/// An open element.
#[derive(Debug)]
struct Open {
    /// The element.
    node: NodeId,
    /// The lowercase tag name.
    name: String,
    /// The start of the element in the source.
    start: usize,
    /// The width of the start tag in the source.
    open_width: usize,
}

/// A tree builder.
#[derive(Debug)]
pub(crate) struct TreeBuilder<'s> {
    /// The document being built.
    doc: Document,
    /// The source text of the tokens.
    source: &'s str,
    /// The stack of open elements, excluding the body.
    stack: Vec<Open>,
    /// A newline held until it is known which element it belongs to.
    newline: Option<TextToken>,
}

impl<'s> TreeBuilder<'s> {
    /// Creates a new tree builder for tokens created from `source`.
    pub fn new(source: &'s str) -> Self {
        let mut doc = Document::new();
        let body = doc.body();
        doc.data_parsoid_mut(body).dsr = Some(DomSourceRange::new(0, source.len(), 0, 0));
        Self {
            doc,
            source,
            stack: Vec::new(),
            newline: None,
        }
    }

    /// Builds a document from the given tokens.
    pub fn build(mut self, tokens: impl IntoIterator<Item = Token>) -> Document {
        for token in tokens {
            self.adopt(token);
        }
        self.finish()
    }

    /// The current insertion point.
    fn current(&self) -> NodeId {
        self.stack.last().map_or(self.doc.body(), |open| open.node)
    }

    /// Adopts one token into the tree.
    fn adopt(&mut self, token: Token) {
        if let Some(name) = table_structure(&token) {
            self.table_structure(token, name);
            return;
        }

        self.flush_newline();
        match token {
            Token::StartTag(tag) => self.start_tag(tag),
            Token::EndTag(tag) => self.end_tag(tag),
            Token::SelfClosingTag(tag) => self.self_closing_tag(tag),
            Token::Text(text) => self.text(text),
            Token::Comment(comment) => self.comment(comment),
            Token::Newline(newline) => self.newline = Some(newline),
            Token::EndOfInput => {}
        }
    }

    /// Finishes the tree, closing any elements which are still open.
    fn finish(mut self) -> Document {
        self.flush_newline();
        let end = self.source.len();
        while let Some(open) = self.stack.pop() {
            let implied = self.is_implied_end(&open);
            self.close(open, end, 0, !implied);
        }
        self.doc
    }

    /// Appends a pending newline to the current element.
    fn flush_newline(&mut self) {
        if let Some(newline) = self.newline.take() {
            self.text(newline);
        }
    }

    /// Appends a node to the current element.
    fn append(&mut self, node: NodeId) {
        let parent = self.current();
        self.doc.append_child(parent, node);
    }

    /// Creates an element from a tag token, moving its metadata onto the node.
    fn element(&mut self, tag: TagToken) -> NodeId {
        let TagToken {
            name,
            attribs,
            data_parsoid,
            data_mw,
        } = tag;
        let node = self.doc.create_element(&name);
        for Kv { k, v, .. } in attribs {
            if !k.is_empty() {
                self.doc.set_attr(node, &k, v);
            }
        }
        self.doc.set_data(
            node,
            NodeData {
                parsoid: data_parsoid,
                mw: data_mw,
                diff: None,
            },
        );
        node
    }

    /// Opens an element.
    fn start_tag(&mut self, tag: TagToken) {
        let tsr = tag.data_parsoid.tsr.unwrap_or_default();
        let name = tag.name.clone();
        if is_void_element(&name) {
            self.self_closing_tag(tag);
            return;
        }

        let node = self.element(tag);
        self.append(node);
        self.stack.push(Open {
            node,
            name,
            start: tsr.start,
            open_width: tsr.len(),
        });
    }

    /// Closes the innermost open element matching the end tag, or converts
    /// the end tag to text if there is none.
    fn end_tag(&mut self, tag: TagToken) {
        let tsr = tag.data_parsoid.tsr.unwrap_or_default();
        let matched = self
            .stack
            .iter()
            .rev()
            .take_while(|open| open.name == tag.name || !SCOPE_BOUNDARIES.contains(&&*open.name))
            .position(|open| open.name == tag.name)
            .map(|from_top| self.stack.len() - 1 - from_top);

        let Some(index) = matched else {
            if !tsr.is_empty() {
                log::debug!("stray </{}> at {}", tag.name, tsr.start);
                let source = self.source;
                let text = &source[tsr.into_range()];
                self.text(TextToken::new(text, Some(tsr)));
            }
            return;
        };

        for open in self.stack.drain(index + 1..).rev().collect::<Vec<_>>() {
            let implied = self.is_implied_end(&open);
            self.close(open, tsr.start, 0, !implied);
        }
        if let Some(open) = self.stack.pop() {
            self.close(
                open,
                tsr.end,
                tsr.len(),
                tag.data_parsoid.auto_inserted_end,
            );
        }
    }

    /// Adds a closed element for a self-closing tag or placeholder.
    fn self_closing_tag(&mut self, tag: TagToken) {
        let tsr = tag.data_parsoid.tsr.unwrap_or_default();
        match tag.name.as_str() {
            "template" => self.placeholder(tag, "mw:Transclusion", tsr),
            "extension" => {
                let name = tag
                    .data_mw
                    .as_ref()
                    .and_then(|mw| mw.name.clone())
                    .unwrap_or_default();
                self.placeholder(tag, &format!("mw:Extension/{name}"), tsr);
            }
            "listItem" | "mw-quote" => {
                log::warn!("untransformed {} token at {}", tag.name, tsr.start);
                let source = self.source;
                let text = &source[tsr.into_range()];
                self.text(TextToken::new(text, Some(tsr)));
            }
            _ => {
                let self_close = tag.data_parsoid.self_close;
                let node = self.element(tag);
                let dp = self.doc.data_parsoid_mut(node);
                dp.dsr = Some(DomSourceRange::new(tsr.start, tsr.end, tsr.len(), 0));
                dp.tsr = None;
                dp.self_close = self_close;
                self.append(node);
            }
        }
    }

    /// Adds a placeholder for content which is expanded after the tree is
    /// built.
    fn placeholder(&mut self, tag: TagToken, type_of: &str, tsr: SourceRange) {
        let TagToken {
            data_parsoid,
            data_mw,
            ..
        } = tag;
        let node = self.doc.create_element("span");
        self.doc.add_type_of(node, type_of);
        let dsr = data_parsoid
            .dsr
            .unwrap_or(DomSourceRange::new(tsr.start, tsr.end, 0, 0));
        self.doc.set_data(
            node,
            NodeData {
                parsoid: DataParsoid {
                    dsr: Some(dsr),
                    src: data_parsoid.src,
                    tmp: TempFlags::PENDING_EXPANSION,
                    ..Default::default()
                },
                mw: data_mw.or_else(|| Some(Box::new(DataMw::default()))),
                diff: None,
            },
        );
        self.append(node);
    }

    /// Appends text, merging it into a preceding text node.
    fn text(&mut self, text: TextToken) {
        if text.value.is_empty() {
            return;
        }

        let parent = self.current();
        let tsr = text.data_parsoid.tsr;
        if let Some(last) = self.doc.last_child(parent)
            && self.doc.is_text(last)
        {
            let merged = {
                let prev = self.doc.dsr(last);
                match (prev, tsr) {
                    (Some(prev), Some(tsr)) if prev.end == tsr.start => {
                        Some(DomSourceRange::new(prev.start, tsr.end, 0, 0))
                    }
                    _ => None,
                }
            };
            if let crate::dom::NodeKind::Text(value) = self.doc.kind_mut(last) {
                value.push_str(&text.value);
            }
            self.doc.data_parsoid_mut(last).dsr = merged;
            return;
        }

        let node = self.doc.create_text(text.value);
        if let Some(tsr) = tsr {
            self.doc.data_parsoid_mut(node).dsr = Some(DomSourceRange::from(tsr));
        }
        self.doc.append_child(parent, node);
    }

    /// Appends a comment.
    fn comment(&mut self, comment: TextToken) {
        let node = self.doc.create_comment(comment.value);
        let dp = self.doc.data_parsoid_mut(node);
        if let Some(tsr) = comment.data_parsoid.tsr {
            dp.dsr = Some(DomSourceRange::from(tsr));
        }
        dp.unclosed_comment = comment.data_parsoid.unclosed_comment;
        self.append(node);
    }

    /// Handles a token which is part of wikitext table syntax.
    ///
    /// ```wikitext
    /// {| class="wikitable"
    /// |+ Caption
    /// |-
    /// ! Heading
    /// |-
    /// | Cell || Cell
    /// |}
    /// ```
    fn table_structure(&mut self, token: Token, name: &'static str) {
        let Some(table) = self.stack.iter().rposition(|open| open.name == "table") else {
            if name == "table" && matches!(token, Token::StartTag(_)) {
                self.flush_newline();
                if let Token::StartTag(tag) = token {
                    self.start_tag(tag);
                }
            } else {
                // Table syntax outside of a table is just text
                self.flush_newline();
                if let Some(tsr) = token.tsr() {
                    let source = self.source;
                    let text = &source[tsr.into_range()];
                    self.text(TextToken::new(text, Some(tsr)));
                }
            }
            return;
        };

        let tsr = token.tsr().unwrap_or_default();
        let close_at = self
            .newline
            .as_ref()
            .and_then(|nl| nl.data_parsoid.tsr)
            .map_or(tsr.start, |nl| nl.start);

        // Cells close the open cell; rows, captions, and the end of the table
        // also close the open row
        let keep_row = matches!(name, "td" | "th");
        let is_end = matches!(token, Token::EndTag(_));
        let nested_table = name == "table" && !is_end;
        if !nested_table {
            while self.stack.len() > table + 1 {
                let top = &self.stack[self.stack.len() - 1];
                if keep_row && top.name == "tr" {
                    break;
                }
                if let Some(open) = self.stack.pop() {
                    let implied = self.is_implied_end(&open);
                    self.close(open, close_at, 0, !implied);
                }
            }
        }
        self.flush_newline();

        match token {
            Token::StartTag(tag) => self.start_tag(tag),
            Token::EndTag(tag) => self.end_tag(tag),
            _ => {}
        }
    }

    /// Returns true if the end of `open` is implied by wikitext syntax, so it
    /// has no end tag in the source without being an error.
    fn is_implied_end(&self, open: &Open) -> bool {
        TABLE_PARTS.contains(&&*open.name)
            && self
                .doc
                .data_parsoid(open.node)
                .is_none_or(|dp| dp.stx != Some(Syntax::Html))
    }

    /// Records the source range of a closed element.
    fn close(&mut self, open: Open, end: usize, close_width: usize, auto_inserted_end: bool) {
        let dp = self.doc.data_parsoid_mut(open.node);
        dp.dsr = Some(DomSourceRange::new(
            open.start,
            end.max(open.start + open.open_width),
            open.open_width,
            close_width,
        ));
        dp.tsr = None;
        dp.auto_inserted_end |= auto_inserted_end;
    }
}

/// Returns the tag name of a token which is part of wikitext (not HTML) table
/// syntax.
fn table_structure(token: &Token) -> Option<&'static str> {
    let tag = match token {
        Token::StartTag(tag) | Token::EndTag(tag) => tag,
        _ => return None,
    };
    if tag.data_parsoid.stx == Some(Syntax::Html) {
        return None;
    }
    ["table", "tr", "td", "th", "caption"]
        .into_iter()
        .find(|name| tag.name == *name)
}
