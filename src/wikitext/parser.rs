//! A parsing expression grammar for Wikitext documents.
//!
//! This grammar converts a Wikitext document into a flat token stream which
//! requires additional context-aware processing later (quote balancing, list
//! building, tree construction). Every byte of the input is covered by the
//! source range of exactly one token, in order, which is what lets later
//! stages compute source ranges for every node.

// Clippy: Most of the arguments are hidden. It is not possible to apply
// this annotation directly to the parser because rust-peg does not understand
// it.
#![allow(clippy::too_many_arguments)]

use super::{
    Parser,
    codemap::{DomSourceRange, KvSourceRange, SourceRange},
    token::{Kv, TagToken, TextToken, Token},
};
use crate::{
    common::{decode_entity, decode_html, strtr, title_key, title_to_href, url_encode},
    config::{Configuration, HTML5_TAGS},
    dom::{
        DataMw, DataMwBody, Invocation, ParamInfo, ParamKey, Syntax, TemplateInfo, TemplatePart,
        TemplateTarget,
    },
};
use indexmap::IndexMap;
use peg::RuleResult;

peg::parser! { pub(super) grammar wikitext(state: &Parser<'_>) for str {
    /// The top-level start rule.
    pub rule start() -> Vec<Token>
    = ctx:({ Context::default() })
      t:block(&ctx)*
      eof()
    { finish(t.into_iter().flatten()) }

    ////////////////
    // Block flow //
    ////////////////

    /// A document is a sequence of blocks. Items anchored to the start of a
    /// line are tried first, then newlines, then inline content.
    rule block(ctx: &Context) -> Vec<Token>
    = sol() t:block_line(ctx) { t }
    / t:newline_token() { vec![t] }
    / inline_element(ctx)

    /// A block item that is anchored to the start of a line (headings, list
    /// items, horizontal rules, tables).
    rule block_line(ctx: &Context) -> Vec<Token>
    = heading(ctx)
    / t:hr() { vec![t] }
    / list_item(ctx)
    / table_line(ctx)

    /// A zero-width assertion that the input is at the start of a line.
    rule sol()
    = #{|input, pos| {
        if pos == 0 || input.as_bytes()[pos - 1] == b'\n' {
            RuleResult::Matched(pos, ())
        } else {
            RuleResult::Failed
        }
    }}

    /// A heading. Surplus `=` on either side become part of the content.
    ///
    /// ```wikitext
    /// =h1=
    /// ==h2==
    /// ===h3==
    ///      ^  extra `=` in the content
    /// ```
    rule heading(ctx: &Context) -> Vec<Token>
    = &"="
      s:position!()
      open:$("="+)
      c:inline_element(&ctx.with_h())*
      cs:position!()
      close:$("="+)
      ts:position!()
      trail:$([' '|'\t']*)
      &eolf()
    {
        heading(s, open, c.into_iter().flatten().collect(), cs, close, (!trail.is_empty()).then(|| text(trail, ts)))
    }
    / s:position!()
      run:$("="*<3,>)
      ts:position!()
      trail:$([' '|'\t']*)
      &eolf()
    {
        // `===` is a level 1 heading containing `=`
        let level = (run.len() - 1) / 2;
        let content = text(&run[level..run.len() - level], s + level);
        heading(s, &run[..level], vec![content], s + run.len() - level, &run[run.len() - level..], (!trail.is_empty()).then(|| text(trail, ts)))
    }

    /// A horizontal rule.
    ///
    /// ```wikitext
    /// ------
    ///     ^^ extra dashes
    /// ```
    rule hr() -> Token
    = s:position!() "----" dashes:$("-"*) e:position!()
    {
        let mut tag = TagToken::new("hr", SourceRange::new(s, e));
        if !dashes.is_empty() {
            tag.data_parsoid.extra_dashes = Some(dashes.len());
        }
        Token::SelfClosingTag(tag)
    }

    ///////////
    // Lists //
    ///////////

    /// An unordered, ordered, or definition list item marker. The content of
    /// the item is the rest of the line.
    ///
    /// ```wikitext
    /// * Unordered
    /// # Ordered
    /// : Detail
    /// ; Term : Detail
    /// ```
    rule list_item(ctx: &Context) -> Vec<Token>
    = dtdd(ctx)
    / s:position!() bullets:$(list_char()+) e:position!()
    { vec![list_item(bullets, SourceRange::new(s, e), None)] }

    /// A definition list term and detail on the same line.
    ///
    /// ```wikitext
    /// ;; Term : Detail
    /// ^^      ^
    /// ```
    rule dtdd(ctx: &Context) -> Vec<Token>
    = s:position!()
      bullets:$((!(";" !list_char()) list_char())* ";")
      e:position!()
      c:inline_element(&ctx.with_dt())*
      cs:position!() ":" ce:position!()
    {
        let dd = format!("{}:", &bullets[..bullets.len() - 1]);
        let mut out = vec![list_item(bullets, SourceRange::new(s, e), None)];
        out.extend(c.into_iter().flatten());
        out.push(list_item(&dd, SourceRange::new(cs, ce), Some(Syntax::Row)));
        out
    }

    /// A list bullet character.
    rule list_char() = ['*'|'#'|':'|';']

    ////////////
    // Tables //
    ////////////

    /// A line of table syntax, optionally indented.
    rule table_line(ctx: &Context) -> Vec<Token>
    = s:position!()
      [' '|'\t']*
      t:(
          table_start(s)
        / table_end(s)
        / table_row(s)
        / table_caption(s, ctx)
        / table_heading_cells(s, ctx)
        / table_data_cells(s, ctx)
      )
    { t }

    /// The start of a table.
    ///
    /// ```wikitext
    /// {| class="wikitable"
    /// ```
    rule table_start(s: usize) -> Vec<Token>
    = "{|" a:table_attributes() rest_of_line() e:position!()
    { vec![Token::StartTag(TagToken::new("table", SourceRange::new(s, e)).with_attribs(a))] }

    /// The end of a table.
    rule table_end(s: usize) -> Vec<Token>
    = "|}" e:position!()
    { vec![Token::EndTag(TagToken::new("table", SourceRange::new(s, e)))] }

    /// A table row separator.
    ///
    /// ```wikitext
    /// |- style="color: red"
    /// ```
    rule table_row(s: usize) -> Vec<Token>
    = "|-" "-"* a:table_attributes() rest_of_line() e:position!()
    { vec![Token::StartTag(TagToken::new("tr", SourceRange::new(s, e)).with_attribs(a))] }

    /// A table caption.
    ///
    /// ```wikitext
    /// |+ class="caption" | Caption
    /// ```
    rule table_caption(s: usize, ctx: &Context) -> Vec<Token>
    = "|+" t:table_cell(s, "caption", None, &ctx.with_table_cell())
    { t }

    /// A line of table heading cells.
    ///
    /// ```wikitext
    /// ! Heading 1 !! Heading 2 || Heading 3
    /// ```
    rule table_heading_cells(s: usize, ctx: &Context) -> Vec<Token>
    = "!"
      first:table_cell(s, "th", None, &ctx.with_table_head())
      rest:(cs:position!() ("!!" / "||") t:table_cell(cs, "th", Some(Syntax::Row), &ctx.with_table_head()) { t })*
    { first.into_iter().chain(rest.into_iter().flatten()).collect() }

    /// A line of table data cells.
    ///
    /// ```wikitext
    /// | Cell 1 || style="color: red" | Cell 2
    /// ```
    rule table_data_cells(s: usize, ctx: &Context) -> Vec<Token>
    = "|" !['}'|'-'|'+']
      first:table_cell(s, "td", None, &ctx.with_table_cell())
      rest:(cs:position!() "||" t:table_cell(cs, "td", Some(Syntax::Row), &ctx.with_table_cell()) { t })*
    { first.into_iter().chain(rest.into_iter().flatten()).collect() }

    /// A single table cell, with optional attributes, after its delimiter.
    rule table_cell(s: usize, name: &'static str, stx: Option<Syntax>, ctx: &Context) -> Vec<Token>
    = a:(a:table_attributes() "|" !"|" { a })?
      e:position!()
      c:inline_element(ctx)*
    {
        let mut tag = TagToken::new(name, SourceRange::new(s, e)).with_attribs(a.unwrap_or_default());
        tag.data_parsoid.stx = stx;
        let mut out = vec![Token::StartTag(tag)];
        out.extend(c.into_iter().flatten());
        out
    }

    /// A run of table attributes on a single line.
    rule table_attributes() -> Vec<Kv>
    = a:generic_attribute(true)* [' '|'\t']*
    { a }

    /// The junk at the end of a table start or row line.
    rule rest_of_line()
    = [^'\r'|'\n']*

    ////////////
    // Inline //
    ////////////

    /// A single inline item.
    rule inline_element(ctx: &Context) -> Vec<Token>
    = !inline_breaks(ctx)
      t:(
          t:plain_text() { vec![t] }
        / t:comment() { vec![t] }
        / &"<" t:xmlish_tag() { t }
        / &"{{" t:template_or_arg() { t }
        / &"[[" t:wikilink(ctx) { t }
        / &"[" t:extlink(ctx) { t }
        / autourl(ctx)
        / &"&" t:htmlentity() { t }
        / &"__" t:behavior_switch() { vec![t] }
        / &"''" t:quote() { t }
        / s:position!() c:$(!newline() [_]) { vec![text(c, s)] }
      )
    { t }

    /// A lookahead that matches if the input is at a terminator for whatever
    /// inline item is currently being parsed.
    rule inline_breaks(ctx: &Context)
    = #{|input, pos| inline_breaks(input, pos, ctx)}

    /// A run of text containing no Wikitext syntax.
    ///
    /// ```wikitext
    /// Lorem ipsum dolor https://example.com sit amet
    /// ^^^^^^^^^^^^^^^^^^
    /// ```
    rule plain_text() -> Token
    = #{|input, pos| {
        let end = plain_text_end(state.config, input, pos);
        if end > pos {
            RuleResult::Matched(end, text(&input[pos..end], pos))
        } else {
            RuleResult::Failed
        }
    }}

    /// A bold or italic text style marker. Runs of four quotes start with an
    /// apostrophe, and runs longer than five start with apostrophes.
    ///
    /// ```wikitext
    /// ''italic'' '''bold''' '''''bold and italic'''''
    /// ^^      ^^ ^^^    ^^^ ^^^^^               ^^^^^
    /// ```
    rule quote() -> Vec<Token>
    = s:position!() q:$("''" "'"*)
    { quote(q, s) }

    /// An HTML comment.
    #[cache]
    rule comment() -> Token
    = s:position!()
      "<!--"
      c:$((!"-->" [_])*)
      end:$("-->" / eof())
      e:position!()
    {
        let mut t = TextToken::new(c, Some(SourceRange::new(s, e)));
        t.data_parsoid.unclosed_comment = end.is_empty();
        Token::Comment(t)
    }

    /// A valid HTML entity.
    rule htmlentity() -> Vec<Token>
    = s:position!()
      m:$("&" ['#'|'0'..='9'|'a'..='z'|'A'..='Z']+ ";")
      e:position!()
    {? decode_entity(m).map(|value| entity(m, &value, SourceRange::new(s, e))).ok_or("html entity") }

    /// A behavior switch.
    ///
    /// ```wikitext
    /// __NOTOC__
    /// ```
    rule behavior_switch() -> Token
    = s:position!()
      "__" word:$((!"__" [c if c.is_alphanumeric() || c == '_'])+) "__"
      e:position!()
    {?
        if state.config.is_behavior_switch(word) {
            Ok(behavior_switch(word, SourceRange::new(s, e)))
        } else {
            Err("behavior switch")
        }
    }

    ///////////////////////////
    // Generic XML-like tags //
    ///////////////////////////

    /// Any XML-tag-like item.
    rule xmlish_tag() -> Vec<Token>
    = nowiki()
    / t:extension_tag() { vec![t] }
    / t:html_tag() { vec![t] }

    /// A `<nowiki>` section, whose content is literal text.
    ///
    /// ```wikitext
    /// <nowiki>''not italic''</nowiki>
    /// ```
    rule nowiki() -> Vec<Token>
    = s:position!() "<" i("nowiki") space_or_newline()* "/>" e:position!()
    { nowiki(SourceRange::new(s, e), None) }
    / s:position!() "<" i("nowiki") space_or_newline()* ">" oe:position!()
      body:end_tag_search("nowiki")
      e:position!()
    { nowiki(SourceRange::new(s, e), Some((body.0, oe))) }

    /// An extension tag. Its content is found by searching for the matching
    /// end tag, and is not parsed here.
    ///
    /// ```wikitext
    /// <poem class="x">content</poem>
    /// ```
    rule extension_tag() -> Token
    = s:position!()
      "<" name:$(tag_name())
      &assert(state.config.is_extension_tag(name), "extension tag")
      attribs:generic_attribute(false)*
      space_or_newline()*
      self_close:"/"? ">"
      oe:position!()
      body:(
          &assert(self_close.is_some(), "self-closing tag") { None }
        / b:end_tag_search(name) { Some(b) }
      )
      src:source_from(s)
      e:position!()
    { extension(name, attribs, src, SourceRange::new(s, e), oe - s, body) }

    /// A supported HTML5 start, end, or self-closing tag.
    ///
    /// ```wikitext
    /// <span class="a">text</span> <br/>
    /// ```
    rule html_tag() -> Token
    = s:position!()
      "<" end:"/"? name:$(tag_name())
      &assert(HTML5_TAGS.contains(&*name.to_ascii_lowercase()), "html5 tag")
      attribs:generic_attribute(false)*
      space_or_newline()*
      self_close:"/"? ">"
      e:position!()
    { html_tag(name, attribs, end.is_some(), self_close.is_some(), SourceRange::new(s, e)) }

    /// The tag name part of an XML-like tag.
    rule tag_name()
    = ['A'..='Z'|'a'..='z'] ['A'..='Z'|'a'..='z'|'0'..='9'|'-']*

    /// Searches for the end tag `name`, returning the content before it and
    /// the width of the end tag.
    rule end_tag_search(name: &str) -> (&'input str, usize)
    = #{|input, pos| match find_end_tag(&input[pos..], name) {
        Some((len, end)) => RuleResult::Matched(pos + end, (&input[pos..pos + len], end - len)),
        None => RuleResult::Failed,
    }}

    /// An attribute of a tag or table item.
    ///
    /// ```wikitext
    /// <tag-name attr="value" attr2=value2 attr3>
    ///           ^^^^^^^^^^^^ ^^^^^^^^^^^^ ^^^^^
    /// ```
    rule generic_attribute(table: bool) -> Kv
    = attribute_space(table)+
      ks:position!() name:$(attribute_name_char()+) ke:position!()
      value:(
          attribute_space(table)* "=" attribute_space(table)*
          vs:position!() v:attribute_value(table) ve:position!()
          { (v, SourceRange::new(vs, ve)) }
      )?
    { attribute(name, SourceRange::new(ks, ke), value) }

    /// Whitespace between attributes. Table attributes cannot span lines.
    rule attribute_space(table: bool)
    = [' '|'\t']
    / &assert(!table, "multi-line attributes") space_or_newline()

    /// A character which can appear in an attribute name.
    rule attribute_name_char()
    = [^' '|'\t'|'\r'|'\n'|'\0'|'/'|'>'|'='|'"'|'\''|'<'|'|'|'!'|'['|']'|'{'|'}']

    /// The value of an attribute, returning the raw source of the value
    /// without quotes.
    rule attribute_value(table: bool) -> &'input str
    = "\"" v:$([c if c != '"' && !(table && c == '\n')]*) "\"" { v }
    / "'" v:$([c if c != '\'' && !(table && c == '\n')]*) "'" { v }
    / v:$((!"/>" [^' '|'\t'|'\r'|'\n'|'\0'|'>'|'"'|'\''|'|'])+) { v }

    ///////////////
    // Templates //
    ///////////////

    /// A template invocation, or a template argument which is literal text
    /// outside of a template.
    ///
    /// ```wikitext
    /// {{Template name|positional|key=value}}
    /// {{{argument|default}}}
    /// ```
    rule template_or_arg() -> Vec<Token>
    = s:position!() "{{{" tpl_chunk(false)* ("|" tpl_chunk(false)*)* "}}}" src:source_from(s)
    { vec![text(src, s)] }
    / t:template() { vec![t] }

    /// A template invocation.
    #[cache]
    rule template() -> Token
    = s:position!()
      "{{"
      target:$(tpl_chunk(false)*)
      params:tpl_param()*
      "}}"
      src:source_from(s)
      e:position!()
    {? template(target, params, src, SourceRange::new(s, e)) }

    /// A template parameter, returning the optional name and the value.
    ///
    /// ```wikitext
    /// {{Template name|positional|key=value}}
    ///                ^^^^^^^^^^^^^^^^^^^^^^
    /// ```
    rule tpl_param() -> (Option<&'input str>, &'input str)
    = "|" k:$(tpl_chunk(true)*) "=" v:$(tpl_chunk(false)*) { (Some(k), v) }
    / "|" v:$(tpl_chunk(false)*) { (None, v) }

    /// A balanced piece of template source.
    rule tpl_chunk(no_equals: bool)
    = "{{{" tpl_chunk(false)* ("|" tpl_chunk(false)*)* "}}}"
    / "{{" tpl_chunk(false)* ("|" tpl_chunk(false)*)* "}}"
    / "[[" ([^']'] / "]" !"]")* "]]"
    / comment()
    / "=" assert(!no_equals, "not a parameter name")
    / [^'|'|'{'|'}'|'['|'=']
    / "{" !"{"
    / "}" !"}"
    / "["

    ///////////
    // Links //
    ///////////

    /// A wikilink, or a category link.
    ///
    /// ```wikitext
    /// [[Target]] [[Target|Label]] [[Category:Name|Sort key]]
    /// ```
    rule wikilink(ctx: &Context) -> Vec<Token>
    = s:position!()
      "[["
      ts:position!()
      target:$(link_target_char()+)
      &assert(is_valid_link_target(state.config, target), "link target")
      t:(
          cs:position!() "]]" e:position!()
          { wikilink(target, ts, None, SourceRange::new(s, ts), SourceRange::new(cs, e)) }
        / "|" ps:position!()
          c:inline_element(&ctx.with_link_text())*
          label:source_from(ps)
          cs:position!() "]]" e:position!()
          {
              wikilink(
                  target, ts, Some((label, c.into_iter().flatten().collect())),
                  SourceRange::new(s, ps), SourceRange::new(cs, e),
              )
          }
      )
    { t }

    /// A character which can appear in a link target.
    rule link_target_char()
    = [^'|'|'['|']'|'{'|'}'|'<'|'>'|'\n'|'\r']

    /// An external link.
    ///
    /// ```wikitext
    /// [https://example.com Example] [https://example.com]
    /// ```
    rule extlink(ctx: &Context) -> Vec<Token>
    = &assert(!ctx.extlink, "non-extlink")
      s:position!()
      "["
      url:url()
      [' '|'\t']*
      os:position!()
      c:inline_element(&ctx.with_extlink())*
      cs:position!() "]" e:position!()
    { extlink(url, c.into_iter().flatten().collect(), SourceRange::new(s, os), SourceRange::new(cs, e)) }

    /// A URL inside an external link.
    rule url() -> &'input str
    = #{|input, pos| match url_end(state.config, input, pos) {
        Some(end) => RuleResult::Matched(end, &input[pos..end]),
        None => RuleResult::Failed,
    }}

    /// A plain text URL which is automatically converted to a link.
    ///
    /// ```wikitext
    /// see https://example.com.
    ///     ^^^^^^^^^^^^^^^^^^^
    /// ```
    rule autourl(ctx: &Context) -> Vec<Token>
    = &assert(!ctx.extlink, "autolink outside external link")
      s:position!()
      url:#{|input, pos| match autourl_end(state.config, input, pos) {
          Some(end) => RuleResult::Matched(end, &input[pos..end]),
          None => RuleResult::Failed,
      }}
    { autourl(url, s) }

    //////////
    // Text //
    //////////

    /// A newline.
    rule newline_token() -> Token
    = s:position!() n:$(newline())
    { Token::Newline(TextToken::new(n, Some(SourceRange::new(s, s + n.len())))) }

    /// Captures the source text from `start` to the current position.
    rule source_from(start: usize) -> &'input str
    = #{|input, pos| RuleResult::Matched(pos, &input[start..pos])}

    /// A newline.
    rule newline() = "\r"? "\n"

    /// Characters that match the PCRE "\s" class.
    rule space_or_newline() = [' '|'\t'|'\n'|'\r'|'\x0c']

    /// The end of the input.
    rule eof() = ![_]

    /// Any newline or end of file.
    rule eolf() = newline() / eof()

    /// Asserts that `cond` is true.
    rule assert(cond: bool, msg: &'static str)
    = {? if cond { Ok(()) } else { Err(msg) } }

    /// Matches a literal case-insensitively.
    rule i(lit: &'static str)
    = quiet!{
        input:$([_]*<{lit.chars().count()}>)
        {? if input.eq_ignore_ascii_case(lit) { Ok(()) } else { Err(lit) } }
    } / expected!(lit)
}}

/// The syntactic context of the production being parsed.
#[derive(Clone, Copy, Debug, Default)]
struct Context {
    /// In a definition list term, where `:` starts the detail.
    dt: bool,
    /// In the label of an external link.
    extlink: bool,
    /// In a heading.
    h: bool,
    /// In the label of a wikilink.
    link_text: bool,
    /// In a table data cell.
    table_cell: bool,
    /// In a table heading cell.
    table_head: bool,
}

impl Context {
    /// In a definition list term.
    fn with_dt(&self) -> Self {
        Self { dt: true, ..*self }
    }

    /// In an external link label.
    fn with_extlink(&self) -> Self {
        Self {
            extlink: true,
            ..*self
        }
    }

    /// In a heading.
    fn with_h(&self) -> Self {
        Self { h: true, ..*self }
    }

    /// In a wikilink label.
    fn with_link_text(&self) -> Self {
        Self {
            link_text: true,
            ..*self
        }
    }

    /// In a table data cell.
    fn with_table_cell(&self) -> Self {
        Self {
            table_cell: true,
            ..*self
        }
    }

    /// In a table heading cell.
    fn with_table_head(&self) -> Self {
        Self {
            table_head: true,
            ..*self
        }
    }
}

/// Characters which may start some Wikitext syntax or terminate an inline
/// item.
pub(super) const STOP_CHAR: &str = "'<[{\n\r:]}|!=&";

/// A lookahead that matches if the input is at a terminator for whatever
/// inline item is currently being parsed, according to `ctx`.
fn inline_breaks(input: &str, pos: usize, ctx: &Context) -> RuleResult<()> {
    let rest = &input[pos..];
    let at_terminator = match rest.as_bytes().first() {
        // `==heading== ␤`
        //  ^^
        Some(b'=') => ctx.h && is_heading_end(rest),
        // `[[target|label]]`
        //                ^^
        // `[https://example.com label]`
        //                            ^
        Some(b']') => ctx.extlink || (ctx.link_text && rest.starts_with("]]")),
        // `; term : detail`
        //         ^
        Some(b':') => ctx.dt,
        // `| cell || cell`
        //         ^^
        Some(b'|') => (ctx.table_cell || ctx.table_head) && rest.starts_with("||"),
        // `! heading !! heading`
        //            ^^
        Some(b'!') => ctx.table_head && rest.starts_with("!!"),
        _ => false,
    };

    if at_terminator {
        RuleResult::Matched(pos, ())
    } else {
        RuleResult::Failed
    }
}

/// Returns true if `rest` starts with a run of `=` which ends a heading.
fn is_heading_end(rest: &str) -> bool {
    let rest = rest.trim_start_matches('=').trim_start_matches([' ', '\t']);
    rest.is_empty() || rest.starts_with('\n') || rest.starts_with("\r\n")
}

/// Returns true if the character `c` is part of a word for the purposes of
/// autolink boundaries.
fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Returns the end of the run of plain text starting at `pos`. The run stops
/// before any character which might start Wikitext syntax and before any
/// URL which could be autolinked.
fn plain_text_end(config: &Configuration, input: &str, pos: usize) -> usize {
    let mut prev = input[..pos].chars().next_back();
    for (offset, c) in input[pos..].char_indices() {
        let at = pos + offset;
        if STOP_CHAR.contains(c)
            || (c == '_' && input[at..].starts_with("__"))
            || (c.is_ascii_alphabetic()
                && !prev.is_some_and(is_word_char)
                && autourl_end(config, input, at).is_some())
        {
            return at;
        }
        prev = Some(c);
    }
    input.len()
}

/// Returns the end of a URL starting at `pos` inside an external link.
fn url_end(config: &Configuration, input: &str, pos: usize) -> Option<usize> {
    let rest = &input[pos..];
    let proto = config.protocol_len(rest)?;
    let len = rest[proto..]
        .find(|c: char| {
            matches!(
                c,
                ' ' | '\t' | '\r' | '\n' | '[' | ']' | '<' | '>' | '"' | '{' | '}' | '|'
                    | '\u{00A0}'
            )
        })
        .unwrap_or(rest.len() - proto);
    (len != 0).then_some(pos + proto + len)
}

/// Returns the end of a plain text URL starting at `pos`, excluding any
/// trailing punctuation.
fn autourl_end(config: &Configuration, input: &str, pos: usize) -> Option<usize> {
    // Autolinks must start on a word boundary
    if input[..pos].chars().next_back().is_some_and(is_word_char) {
        return None;
    }

    let rest = &input[pos..];
    // protocol-relative autolinks not allowed (T32269)
    if rest.starts_with("//") {
        return None;
    }
    let proto = config.protocol_len(rest)?;

    let mut end = proto;
    for (offset, c) in rest[proto..].char_indices() {
        let at = proto + offset;
        let stop = matches!(
            c,
            ' ' | '\t' | '\r' | '\n' | '[' | ']' | '<' | '>' | '"' | '{' | '}' | '|'
                | '\u{00A0}'
        ) || (c == '\'' && rest[at..].starts_with("''"))
            || (c == '&' && (rest[at..].starts_with("&lt;") || rest[at..].starts_with("&gt;")));
        if stop {
            break;
        }
        end = at + c.len_utf8();
    }

    let url = &rest[..end];
    let include_bracket = url.contains('(');
    let trimmed = url.trim_end_matches(|c: char| {
        matches!(c, ',' | ';' | '.' | ':' | '!' | '?') || (!include_bracket && c == ')')
    });

    (trimmed.len() > proto).then_some(pos + trimmed.len())
}

/// Returns true if `target` can be the target of a wikilink.
fn is_valid_link_target(config: &Configuration, target: &str) -> bool {
    let target = target.trim();
    let title = target.strip_prefix(':').unwrap_or(target);
    !title.trim().is_empty() && config.protocol_len(title).is_none()
}

/// Finds the first matching end tag in `input`, returning the offset of the
/// start of the end tag and the offset of the end of the end tag.
fn find_end_tag(input: &str, tag_name: &str) -> Option<(usize, usize)> {
    let mut iter = input.char_indices().peekable();

    let max_start = input.len().saturating_sub(tag_name.len() + 3);
    loop {
        let mut start = None;
        while let Some((pos, c)) = iter.next() {
            if pos > max_start {
                return None;
            }

            if c == '<'
                && let Some((next, _)) = iter.next_if(|(_, c)| *c == '/')
                && input.is_char_boundary(next + 1 + tag_name.len())
                && input[next + 1..next + 1 + tag_name.len()].eq_ignore_ascii_case(tag_name)
            {
                start = Some(pos);
                iter.nth(tag_name.len() - 1);
                break;
            }
        }
        if let Some(start) = start {
            while iter.next_if(|(_, b)| b.is_ascii_whitespace()).is_some() {}
            if let Some((pos, '>')) = iter.peek() {
                break Some((start, pos + 1));
            }
        } else {
            break None;
        }
    }
}

/// Creates a text token for `value`, which is the source text at `start`.
fn text(value: &str, start: usize) -> Token {
    Token::Text(TextToken::new(
        value,
        Some(SourceRange::new(start, start + value.len())),
    ))
}

/// Merges adjacent text tokens and terminates the stream.
fn finish(tokens: impl IntoIterator<Item = Token>) -> Vec<Token> {
    let mut out = Vec::<Token>::new();
    for token in tokens {
        if let Token::Text(next) = &token
            && let Some(Token::Text(prev)) = out.last_mut()
            && let (Some(prev_tsr), Some(next_tsr)) = (prev.data_parsoid.tsr, next.data_parsoid.tsr)
            && prev_tsr.end == next_tsr.start
        {
            prev.value += &next.value;
            prev.data_parsoid.tsr = Some(prev_tsr.merge(next_tsr));
        } else {
            out.push(token);
        }
    }
    out.push(Token::EndOfInput);
    out
}

/// Creates the tokens for a heading.
fn heading(
    start: usize,
    open: &str,
    content: Vec<Token>,
    close_start: usize,
    close: &str,
    trail: Option<Token>,
) -> Vec<Token> {
    let level = open.len().min(close.len()).min(6);
    let name = format!("h{level}");
    let close_end = close_start + close.len();

    let mut out = vec![Token::StartTag(TagToken::new(
        &name,
        SourceRange::new(start, start + level),
    ))];
    if open.len() > level {
        out.push(text(&open[level..], start + level));
    }
    out.extend(content);
    if close.len() > level {
        out.push(text(&close[level..], close_start));
    }
    out.push(Token::EndTag(TagToken::new(
        name,
        SourceRange::new(close_end - level, close_end),
    )));
    out.extend(trail);
    out
}

/// Creates a list item marker token.
fn list_item(bullets: &str, tsr: SourceRange, stx: Option<Syntax>) -> Token {
    let mut tag = TagToken::new("listItem", tsr);
    tag.add_attribute("bullets", bullets, None);
    tag.data_parsoid.stx = stx;
    Token::SelfClosingTag(tag)
}

/// Creates the tokens for a run of apostrophes.
fn quote(quotes: &str, start: usize) -> Vec<Token> {
    let (len, extra) = match quotes.len() {
        4 => (3, 1),
        len if len > 5 => (5, len - 5),
        len => (len, 0),
    };

    let mut out = Vec::with_capacity(2);
    if extra != 0 {
        out.push(text(&quotes[..extra], start));
    }
    let mut tag = TagToken::new(
        "mw-quote",
        SourceRange::new(start + extra, start + extra + len),
    );
    tag.add_attribute("value", &quotes[extra..], None);
    out.push(Token::SelfClosingTag(tag));
    out
}

/// Creates the tokens for an HTML entity, which is wrapped so that it
/// round-trips as written.
fn entity(src: &str, value: &str, tsr: SourceRange) -> Vec<Token> {
    let mut open = TagToken::new("span", SourceRange::new(tsr.start, tsr.start));
    open.add_attribute("typeof", "mw:Entity", None);
    open.data_parsoid.src = Some(src.to_string());
    vec![
        Token::StartTag(open),
        Token::Text(TextToken::new(value, Some(tsr))),
        Token::EndTag(TagToken::new("span", SourceRange::new(tsr.end, tsr.end))),
    ]
}

/// Creates the token for a behavior switch.
fn behavior_switch(word: &str, tsr: SourceRange) -> Token {
    let mut tag = TagToken::new("meta", tsr);
    tag.add_attribute(
        "property",
        format!("mw:PageProp/{}", word.to_lowercase()),
        None,
    );
    tag.data_parsoid.magic_src = Some(format!("__{word}__"));
    Token::SelfClosingTag(tag)
}

/// Creates a key-value pair for a tag attribute.
fn attribute(name: &str, key_range: SourceRange, value: Option<(&str, SourceRange)>) -> Kv {
    let k = name.to_ascii_lowercase();
    let (v, value_range) = value.map_or((String::new(), SourceRange::new(key_range.end, key_range.end)), |(raw, range)| {
        (decode_html(raw).into_owned(), range)
    });
    Kv {
        ksrc: (k != name).then(|| name.to_string()),
        vsrc: value.and_then(|(raw, _)| (raw != v).then(|| raw.to_string())),
        src_offsets: Some(KvSourceRange {
            key: key_range,
            value: value_range,
        }),
        k,
        v,
    }
}

/// Creates the token for an HTML tag.
fn html_tag(name: &str, attribs: Vec<Kv>, end: bool, self_close: bool, tsr: SourceRange) -> Token {
    let name = name.to_ascii_lowercase();
    let void = crate::common::is_void_element(&name);
    let mut tag = TagToken::new(name, tsr).with_attribs(attribs);
    tag.data_parsoid.stx = Some(Syntax::Html);
    if end {
        Token::EndTag(tag)
    } else if self_close || void {
        tag.data_parsoid.self_close = self_close;
        Token::SelfClosingTag(tag)
    } else {
        Token::StartTag(tag)
    }
}

/// Creates the placeholder token for an extension tag. The extension is
/// invoked later, by the post-processor.
fn extension(
    name: &str,
    attribs: Vec<Kv>,
    src: &str,
    tsr: SourceRange,
    open_width: usize,
    body: Option<(&str, usize)>,
) -> Token {
    let name = name.to_ascii_lowercase();
    let attrs = attribs
        .iter()
        .map(|kv| (kv.k.clone(), kv.v.clone()))
        .collect::<IndexMap<_, _>>();
    let close_width = body.map_or(0, |(_, width)| width);

    let mut tag = TagToken::new("extension", tsr).with_attribs(attribs);
    tag.data_parsoid.src = Some(src.to_string());
    tag.data_parsoid.dsr = Some(DomSourceRange::new(
        tsr.start,
        tsr.end,
        open_width,
        close_width,
    ));
    tag.data_mw = Some(Box::new(DataMw {
        name: Some(name),
        attrs: Some(attrs),
        body: body.map(|(body, _)| DataMwBody {
            extsrc: Some(body.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }));
    Token::SelfClosingTag(tag)
}

/// Creates the tokens for a `<nowiki>` section. `body` is the content and its
/// start position.
fn nowiki(tsr: SourceRange, body: Option<(&str, usize)>) -> Vec<Token> {
    let (open_end, close_start) = match body {
        Some((body, start)) => (start, start + body.len()),
        None => (tsr.end, tsr.end),
    };
    let mut open = TagToken::new("span", SourceRange::new(tsr.start, open_end));
    open.add_attribute("typeof", "mw:Nowiki", None);

    let mut out = vec![Token::StartTag(open)];
    if let Some((body, start)) = body
        && !body.is_empty()
    {
        out.push(Token::Text(TextToken::new(
            decode_html(body),
            Some(SourceRange::new(start, start + body.len())),
        )));
    }
    out.push(Token::EndTag(TagToken::new(
        "span",
        SourceRange::new(close_start, tsr.end),
    )));
    out
}

/// Creates the placeholder token for a template invocation. The template is
/// expanded later, by the post-processor.
fn template(
    target: &str,
    params: Vec<(Option<&str>, &str)>,
    src: &str,
    tsr: SourceRange,
) -> Result<Token, &'static str> {
    let name = target.trim();
    if name.is_empty() || name.contains(['{', '}', '[', ']', '<', '>', '\n']) {
        return Err("template target");
    }

    let mut positional = 0;
    let params = params
        .into_iter()
        .map(|(key, wt)| {
            let (name, key) = if let Some(key) = key {
                let name = key.trim().to_string();
                let key = (name != key).then(|| ParamKey { wt: key.to_string() });
                (name, key)
            } else {
                positional += 1;
                (positional.to_string(), None)
            };
            (
                name,
                ParamInfo {
                    wt: wt.to_string(),
                    key,
                },
            )
        })
        .collect::<IndexMap<_, _>>();

    let info = TemplateInfo {
        target: TemplateTarget {
            wt: target.to_string(),
            href: (!name.starts_with('#')).then(|| title_to_href(&template_title(name))),
        },
        params,
        i: 0,
    };
    let invocation = if name.starts_with('#') {
        Invocation::ParserFunction(info)
    } else {
        Invocation::Template(info)
    };

    let mut tag = TagToken::new("template", tsr);
    tag.data_parsoid.src = Some(src.to_string());
    tag.data_mw = Some(Box::new(DataMw {
        parts: Some(vec![TemplatePart::Invocation(invocation)]),
        ..Default::default()
    }));
    Ok(Token::SelfClosingTag(tag))
}

/// Returns the full title of the page transcluded by `target`.
pub(crate) fn template_title(target: &str) -> String {
    let target = target.trim();
    if let Some(main) = target.strip_prefix(':') {
        main.to_string()
    } else if target.contains(':') {
        target.to_string()
    } else {
        let mut chars = target.chars();
        let first = chars
            .next()
            .map(|c| c.to_uppercase().collect::<String>())
            .unwrap_or_default();
        format!("Template:{first}{}", chars.as_str())
    }
}

/// Creates the tokens for a wikilink or category link. `label` is the source
/// and tokens of the text after the pipe, if there is one.
fn wikilink(
    target: &str,
    target_start: usize,
    label: Option<(&str, Vec<Token>)>,
    open: SourceRange,
    close: SourceRange,
) -> Vec<Token> {
    if !target.trim_start().starts_with(':')
        && title_key(target).to_ascii_lowercase().starts_with("category:")
    {
        let mut href = title_to_href(target.trim());
        if let Some((sort_key, _)) = label {
            href.push('#');
            href += &url_encode(&strtr(sort_key, &[(" ", "_")])).to_string();
        }
        let mut tag = TagToken::new("link", open.merge(close));
        tag.add_attribute("rel", "mw:PageProp/Category", None);
        tag.add_normalized_attribute("href", &href, Some(target));
        return vec![Token::SelfClosingTag(tag)];
    }

    let mut tag = TagToken::new("a", open);
    tag.add_attribute("rel", "mw:WikiLink", None);
    tag.add_normalized_attribute("href", &title_to_href(target.trim()), Some(target));
    tag.add_attribute("title", title_key(target).replace('_', " "), None);

    let mut out = Vec::new();
    if let Some((_, content)) = label {
        tag.data_parsoid.stx = Some(Syntax::Piped);
        out.push(Token::StartTag(tag));
        out.extend(content);
    } else {
        tag.data_parsoid.stx = Some(Syntax::Simple);
        out.push(Token::StartTag(tag));
        out.push(Token::Text(TextToken::new(
            decode_html(target),
            Some(SourceRange::new(target_start, target_start + target.len())),
        )));
    }
    out.push(Token::EndTag(TagToken::new("a", close)));
    out
}

/// Creates the tokens for an external link.
fn extlink(url: &str, content: Vec<Token>, open: SourceRange, close: SourceRange) -> Vec<Token> {
    let mut tag = TagToken::new("a", open);
    tag.add_attribute("rel", "mw:ExtLink", None);
    tag.add_normalized_attribute("href", &decode_html(url), Some(url));
    tag.add_attribute(
        "class",
        if content.is_empty() {
            "external autonumber"
        } else {
            "external text"
        },
        None,
    );

    let mut out = vec![Token::StartTag(tag)];
    out.extend(content);
    out.push(Token::EndTag(TagToken::new("a", close)));
    out
}

/// Creates the tokens for a plain text URL.
fn autourl(url: &str, start: usize) -> Vec<Token> {
    let end = start + url.len();
    let mut tag = TagToken::new("a", SourceRange::new(start, start));
    tag.add_attribute("rel", "mw:ExtLink", None);
    tag.add_normalized_attribute("href", &decode_html(url), Some(url));
    tag.add_attribute("class", "external free", None);
    tag.data_parsoid.stx = Some(Syntax::Url);
    vec![
        Token::StartTag(tag),
        text(url, start),
        Token::EndTag(TagToken::new("a", SourceRange::new(end, end))),
    ]
}
