//! The Wikitext serialiser.
//!
//! Without an original source, every node is regenerated from the DOM. With
//! one, any node that the diff did not mark is written by copying its source
//! range, so unchanged parts of the page keep their exact original text.

use super::{
    diff_utils::{
        has_diff_mark, has_inserted_diff_mark, is_deleted_block_node, is_diff_marker,
        only_subtree_changed, subtree_unchanged,
    },
    escape::{EscapeContext, escape_attr, escape_nowiki, escape_text},
};
use crate::{
    common::{decode_html, href_to_title, is_void_element, url_decode},
    config::Configuration,
    dom::{DataParsoid, DiffMarks, Document, Invocation, NodeId, NodeKind, Syntax, TemplatePart},
    wikitext::{DomSourceRange, SourceRange, shadow_info},
};

/// Attributes which are generated by conversion and never written back.
const GENERATED_ATTRS: &[&str] = &["about", "data-mw-section-id"];

/// A Wikitext serialiser.
pub(crate) struct WikitextSerializer<'a> {
    /// The site configuration.
    config: &'a Configuration,
    /// The original source, when serialising selectively.
    source: Option<&'a str>,
    /// The output.
    out: String,
    /// A newline must be written before any more content.
    need_eol: bool,
    /// A block was deleted, so the next newline in the output is redundant.
    collapse_newline: bool,
    /// The syntax the current text is nested in.
    ctx: EscapeContext,
}

impl<'a> WikitextSerializer<'a> {
    /// Creates a serialiser. If `source` is given, unmarked nodes are copied
    /// from it.
    pub fn new(config: &'a Configuration, source: Option<&'a str>) -> Self {
        Self {
            config,
            source,
            out: String::new(),
            need_eol: false,
            collapse_newline: false,
            ctx: EscapeContext::empty(),
        }
    }

    /// Serialises the body of `doc`.
    pub fn serialize(mut self, doc: &Document) -> String {
        let body = doc.body();
        self.children(doc, body, self.source.is_some());
        self.out
    }

    /// Returns true if the output is at the start of a line.
    fn at_sol(&self) -> bool {
        self.out.is_empty() || self.out.ends_with('\n')
    }

    /// Writes a chunk of output.
    fn emit(&mut self, chunk: &str) {
        let mut chunk = chunk;
        if chunk.is_empty() {
            return;
        }

        if self.collapse_newline {
            self.collapse_newline = false;
            if self.at_sol()
                && let Some(rest) = chunk.strip_prefix('\n')
            {
                chunk = rest;
                if chunk.is_empty() {
                    return;
                }
            }
        }

        if self.need_eol {
            self.need_eol = false;
            if !chunk.starts_with('\n') {
                self.out.push('\n');
            }
        }
        self.out += chunk;
    }

    /// Moves the output to the start of a new line, if it is not already at
    /// one.
    fn start_line(&mut self) {
        self.need_eol = false;
        if !self.at_sol() {
            self.out.push('\n');
        }
    }

    /// Returns the source range of a node, if it can be used to copy the
    /// original source.
    fn source_dsr(&self, doc: &Document, node: NodeId) -> Option<DomSourceRange> {
        let source = self.source?;
        let dsr = doc.dsr(node)?;
        (dsr.is_valid() && dsr.end <= source.len()).then_some(dsr)
    }

    /// Returns a part of the original source.
    fn slice(&self, range: SourceRange) -> Option<&'a str> {
        self.source?.get(range.into_range())
    }

    /// Serialises the children of a node.
    fn children(&mut self, doc: &Document, node: NodeId, reuse: bool) {
        let mut skip_about = None;
        for child in doc.children(node) {
            let child = *child;
            if let Some(about) = skip_about {
                if doc.attr(child, "about") == Some(about) || is_diff_marker(doc, child, None) {
                    continue;
                }
                skip_about = None;
            }

            self.node(doc, child, reuse);

            if is_encapsulated(doc, child) {
                skip_about = doc.attr(child, "about");
            }
        }
    }

    /// Serialises the children of a node nested inside syntax `ctx`.
    fn children_in(&mut self, doc: &Document, node: NodeId, reuse: bool, ctx: EscapeContext) {
        let saved = self.ctx;
        self.ctx |= ctx;
        self.children(doc, node, reuse);
        self.ctx = saved;
    }

    /// Serialises one node.
    fn node(&mut self, doc: &Document, node: NodeId, reuse: bool) {
        match doc.kind(node) {
            NodeKind::Text(text) => {
                if reuse
                    && !has_inserted_diff_mark(doc, node)
                    && let Some(src) = self
                        .source_dsr(doc, node)
                        .and_then(|dsr| self.slice(dsr.outer()))
                {
                    self.emit(src);
                } else {
                    let sol = self.at_sol() || self.need_eol;
                    let text = escape_text(self.config, text, sol, self.ctx);
                    self.emit(&text);
                }
            }
            NodeKind::Comment(text) => {
                if reuse
                    && !has_inserted_diff_mark(doc, node)
                    && let Some(src) = self
                        .source_dsr(doc, node)
                        .and_then(|dsr| self.slice(dsr.outer()))
                {
                    self.emit(src);
                } else {
                    let close = if doc
                        .data_parsoid(node)
                        .is_some_and(|dp| dp.unclosed_comment)
                    {
                        ""
                    } else {
                        "-->"
                    };
                    self.emit(&format!("<!--{}{close}", text.replace("-->", "--&gt;")));
                }
            }
            NodeKind::Element(_) => self.element(doc, node, reuse),
            NodeKind::Document => self.children(doc, node, reuse),
            NodeKind::ProcessingInstruction { .. } => {
                log::warn!("cannot serialise a processing instruction");
            }
        }
    }

    /// Serialises an element, reusing as much of its original source as the
    /// diff marks allow.
    fn element(&mut self, doc: &Document, node: NodeId, reuse: bool) {
        if is_diff_marker(doc, node, None) {
            if is_deleted_block_node(doc, Some(node)) {
                self.collapse_newline = true;
            }
            return;
        }

        let reuse = reuse && !has_inserted_diff_mark(doc, node);
        let dsr = if reuse {
            self.source_dsr(doc, node)
        } else {
            None
        };

        if is_encapsulated(doc, node) {
            self.encapsulated(doc, node, dsr);
            return;
        }

        if let Some(dsr) = dsr {
            if subtree_unchanged(doc, node) && !has_diff_mark(doc, node, DiffMarks::MODIFIED_WRAPPER)
            {
                if let Some(src) = self.slice(dsr.outer()) {
                    self.emit(src);
                    return;
                }
            } else if only_subtree_changed(doc, node)
                && reuses_tags(doc, node)
                && let (Some(open), Some(close)) =
                    (self.slice(dsr.open_range()), self.slice(dsr.close_range()))
            {
                self.emit(open);
                self.children_in(doc, node, reuse, syntax_context(doc, node));
                self.emit(close);
                return;
            }
        }

        self.regenerate(doc, node, reuse);
    }

    /// Serialises a transclusion or extension tag.
    fn encapsulated(&mut self, doc: &Document, node: NodeId, dsr: Option<DomSourceRange>) {
        if let Some(dsr) = dsr
            && !has_diff_mark(doc, node, DiffMarks::MODIFIED_WRAPPER)
            && let Some(src) = self.slice(dsr.outer())
        {
            self.emit(src);
            return;
        }

        let dp = doc.data_parsoid(node);
        let src = match (doc.data_mw(node), dp.and_then(|dp| dp.src.as_deref())) {
            (Some(mw), _) if mw.parts.is_some() => {
                mw.parts.iter().flatten().map(part_source).collect()
            }
            (Some(mw), _) if mw.name.is_some() => extension_source(mw),
            (_, Some(src)) => src.to_string(),
            _ => {
                log::warn!("encapsulated content without a source");
                String::new()
            }
        };
        self.emit(&src);
    }

    /// Serialises an element from its DOM.
    fn regenerate(&mut self, doc: &Document, node: NodeId, reuse: bool) {
        let name = doc.name(node).unwrap_or_default();
        let default = DataParsoid::default();
        let dp = doc.data_parsoid(node).unwrap_or(&default);

        if dp.stx == Some(Syntax::Html) {
            self.html_tag(doc, node, reuse);
            return;
        }

        match name {
            "body" | "section" | "ul" | "ol" | "dl" | "tbody" | "thead" | "tfoot" => {
                self.children(doc, node, reuse);
            }
            "b" | "i" => {
                let quotes = if name == "b" { "'''" } else { "''" };
                if !dp.auto_inserted_start {
                    self.emit(quotes);
                }
                self.children(doc, node, reuse);
                if !dp.auto_inserted_end {
                    self.emit(quotes);
                }
            }
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = usize::from(name.as_bytes()[1] - b'0');
                let marks = "=".repeat(level);
                self.start_line();
                self.emit(&marks);
                self.children_in(doc, node, reuse, EscapeContext::HEADING);
                self.emit(&marks);
                self.need_eol = true;
            }
            "hr" => {
                self.start_line();
                self.emit(&format!("----{}", "-".repeat(dp.extra_dashes.unwrap_or(0))));
                self.need_eol = true;
            }
            "li" | "dt" | "dd" => {
                if dp.stx == Some(Syntax::Row) {
                    self.emit(":");
                } else if !doc
                    .first_child(node)
                    .is_some_and(|child| matches!(doc.name(child), Some("ul" | "ol" | "dl")))
                {
                    self.start_line();
                    self.emit(&bullets(doc, node));
                }
                self.children(doc, node, reuse);
            }
            "table" => {
                self.start_line();
                self.emit(&format!("{{|{}", attributes(doc, node)));
                self.need_eol = true;
                self.children(doc, node, reuse);
                if !dp.auto_inserted_end {
                    self.start_line();
                    self.emit("|}");
                    self.need_eol = true;
                }
            }
            "tr" => {
                if !dp.auto_inserted_start {
                    self.start_line();
                    self.emit(&format!("|-{}", attributes(doc, node)));
                    self.need_eol = true;
                }
                self.children(doc, node, reuse);
            }
            "td" | "th" | "caption" => {
                let marker = match name {
                    "td" => "|",
                    "th" => "!",
                    _ => "|+",
                };
                if dp.stx == Some(Syntax::Row) {
                    self.emit(&marker.repeat(2));
                } else {
                    self.start_line();
                    self.emit(marker);
                }
                let attrs = attributes(doc, node);
                if !attrs.is_empty() {
                    self.emit(&format!("{attrs} |"));
                }
                self.children_in(doc, node, reuse, EscapeContext::TABLE_CELL);
            }
            "a" if doc.attr(node, "rel") == Some("mw:WikiLink") => {
                self.wikilink(doc, node, dp, reuse);
            }
            "a" if doc.attr(node, "rel") == Some("mw:ExtLink") => {
                self.extlink(doc, node, dp, reuse);
            }
            "link" if doc.attr(node, "rel") == Some("mw:PageProp/Category") => {
                self.category(doc, node, dp);
            }
            "meta"
                if doc
                    .attr(node, "property")
                    .is_some_and(|p| p.starts_with("mw:PageProp/")) =>
            {
                let src = dp.magic_src.clone().unwrap_or_else(|| {
                    let word = doc
                        .attr(node, "property")
                        .and_then(|p| p.strip_prefix("mw:PageProp/"))
                        .unwrap_or_default();
                    format!("__{}__", word.to_uppercase())
                });
                self.emit(&src);
            }
            "span" if doc.has_type_of(node, "mw:Entity") => {
                let text = doc.text_content(node);
                match dp.src.as_deref() {
                    Some(src) if decode_html(src) == text => self.emit(src),
                    _ => {
                        let sol = self.at_sol();
                        let text = escape_text(self.config, &text, sol, self.ctx);
                        self.emit(&text);
                    }
                }
            }
            "span" if doc.has_type_of(node, "mw:Nowiki") => {
                let text = doc.text_content(node);
                if text.is_empty() {
                    self.emit("<nowiki/>");
                } else {
                    self.emit(&format!("<nowiki>{}</nowiki>", escape_nowiki(&text)));
                }
            }
            _ => self.html_tag(doc, node, reuse),
        }
    }

    /// Serialises an element as an HTML tag.
    fn html_tag(&mut self, doc: &Document, node: NodeId, reuse: bool) {
        let name = doc.name(node).unwrap_or_default();
        let dp = doc.data_parsoid(node);
        let auto_start = dp.is_some_and(|dp| dp.auto_inserted_start);
        let auto_end = dp.is_some_and(|dp| dp.auto_inserted_end);
        let self_close = dp.is_some_and(|dp| dp.self_close);

        if !auto_start {
            let slash = if self_close { "/" } else { "" };
            self.emit(&format!("<{name}{}{slash}>", attributes(doc, node)));
        }
        if is_void_element(name) || (self_close && doc.children(node).is_empty()) {
            return;
        }
        self.children(doc, node, reuse);
        if !auto_end {
            self.emit(&format!("</{name}>"));
        }
    }

    /// Serialises a wikilink.
    fn wikilink(&mut self, doc: &Document, node: NodeId, dp: &DataParsoid, reuse: bool) {
        let href = doc.attr(node, "href").map(str::to_string);
        let shadow = shadow_info(dp, "href", href.clone());
        let target = if shadow.from_src {
            shadow.value.unwrap_or_default()
        } else {
            href.as_deref()
                .and_then(href_to_title)
                .or(href)
                .unwrap_or_default()
        };

        let children = doc.children(node);
        let is_simple = matches!(children, [only] if doc.text(*only)
            .is_some_and(|text| text == decode_html(target.trim())));
        if is_simple {
            self.emit(&format!("[[{target}]]"));
        } else {
            self.emit(&format!("[[{target}|"));
            self.children_in(doc, node, reuse, EscapeContext::LINK);
            self.emit("]]");
        }
    }

    /// Serialises an external link.
    fn extlink(&mut self, doc: &Document, node: NodeId, dp: &DataParsoid, reuse: bool) {
        let href = doc.attr(node, "href").map(str::to_string);
        let url = shadow_info(dp, "href", href).value.unwrap_or_default();
        if dp.stx == Some(Syntax::Url) {
            self.emit(&url);
        } else if doc.children(node).is_empty() {
            self.emit(&format!("[{url}]"));
        } else {
            self.emit(&format!("[{url} "));
            self.children_in(doc, node, reuse, EscapeContext::EXTLINK);
            self.emit("]");
        }
    }

    /// Serialises a category link.
    fn category(&mut self, doc: &Document, node: NodeId, dp: &DataParsoid) {
        let href = doc.attr(node, "href").unwrap_or_default();
        let (page, sort_key) = match href.split_once('#') {
            Some((page, sort_key)) => (page, Some(sort_key)),
            None => (href, None),
        };
        let shadow = shadow_info(dp, "href", Some(href.to_string()));
        let target = if shadow.from_src {
            shadow.value.unwrap_or_default()
        } else {
            href_to_title(page).unwrap_or_else(|| page.to_string())
        };
        match sort_key {
            Some(sort_key) => {
                let sort_key = url_decode(sort_key).replace('_', " ");
                self.emit(&format!("[[{}|{sort_key}]]", target.trim()));
            }
            None => self.emit(&format!("[[{target}]]")),
        }
    }
}

/// Returns true if a node is the first node of a transclusion or extension
/// tag.
fn is_encapsulated(doc: &Document, node: NodeId) -> bool {
    doc.type_of_with_prefix(node, "mw:Transclusion").is_some()
        || doc.type_of_with_prefix(node, "mw:Extension/").is_some()
}

/// Returns true if the original source of the start and end tags of an
/// element can be reused around regenerated content.
fn reuses_tags(doc: &Document, node: NodeId) -> bool {
    let stx = doc.data_parsoid(node).and_then(|dp| dp.stx);
    match doc.name(node) {
        // The link target is the content
        Some("a") => !matches!(stx, Some(Syntax::Simple | Syntax::Url)),
        Some("span") => {
            !doc.has_type_of(node, "mw:Entity") && !doc.has_type_of(node, "mw:Nowiki")
        }
        _ => true,
    }
}

/// Returns the escaping context of the content of an element.
fn syntax_context(doc: &Document, node: NodeId) -> EscapeContext {
    match doc.name(node) {
        Some("h1" | "h2" | "h3" | "h4" | "h5" | "h6") => EscapeContext::HEADING,
        Some("td" | "th" | "caption") => EscapeContext::TABLE_CELL,
        Some("a") if doc.attr(node, "rel") == Some("mw:WikiLink") => EscapeContext::LINK,
        Some("a") if doc.attr(node, "rel") == Some("mw:ExtLink") => EscapeContext::EXTLINK,
        _ => EscapeContext::empty(),
    }
}

/// Returns the list bullets for a list item, including those of the lists it
/// is nested in.
fn bullets(doc: &Document, node: NodeId) -> String {
    let mut out = Vec::new();
    let mut item = node;
    while let Some(list) = doc.parent(item) {
        out.push(match doc.name(list) {
            Some("ul") => '*',
            Some("ol") => '#',
            Some("dl") if doc.is_element_named(item, "dt") => ';',
            Some("dl") => ':',
            _ => break,
        });
        match doc.parent(list) {
            Some(parent) if matches!(doc.name(parent), Some("li" | "dt" | "dd")) => {
                item = parent;
            }
            _ => break,
        }
    }
    out.iter().rev().collect()
}

/// Returns the attributes of an element as Wikitext, with a leading space.
fn attributes(doc: &Document, node: NodeId) -> String {
    let Some(element) = doc.element(node) else {
        return String::new();
    };
    let default = DataParsoid::default();
    let dp = doc.data_parsoid(node).unwrap_or(&default);

    let mut out = String::new();
    for (name, value) in &element.attrs {
        if GENERATED_ATTRS.contains(&name.as_str()) {
            continue;
        }
        let value = if name == "typeof" {
            let rest = value
                .split_ascii_whitespace()
                .filter(|ty| !ty.starts_with("mw:"))
                .collect::<Vec<_>>()
                .join(" ");
            if rest.is_empty() {
                continue;
            }
            rest
        } else {
            shadow_info(dp, name, Some(value.clone()))
                .value
                .unwrap_or_default()
        };

        if value.is_empty() {
            out += &format!(" {name}");
        } else {
            out += &format!(" {name}=\"{}\"", escape_attr(&value));
        }
    }
    out
}

/// Returns the Wikitext of one part of a transclusion.
fn part_source(part: &TemplatePart) -> String {
    match part {
        TemplatePart::Text(text) => text.clone(),
        TemplatePart::Invocation(invocation) => {
            let (open, close) = match invocation {
                Invocation::TemplateArg(_) => ("{{{", "}}}"),
                Invocation::Template(_) | Invocation::ParserFunction(_) => ("{{", "}}"),
            };
            let info = invocation.info();
            let mut out = format!("{open}{}", info.target.wt);
            let mut next_index = 1;
            for (key, param) in &info.params {
                out.push('|');
                if param.key.is_none() && *key == next_index.to_string() && !param.wt.contains('=')
                {
                    next_index += 1;
                } else {
                    out += param.key.as_ref().map_or(key.as_str(), |key| key.wt.as_str());
                    out.push('=');
                }
                out += &param.wt;
            }
            out + close
        }
    }
}

/// Returns the Wikitext of an extension tag.
fn extension_source(mw: &crate::dom::DataMw) -> String {
    let name = mw.name.as_deref().unwrap_or_default();
    let mut out = format!("<{name}");
    for (key, value) in mw.attrs.iter().flatten() {
        out += &format!(" {key}=\"{}\"", escape_attr(value));
    }
    match mw.body.as_ref().and_then(|body| body.extsrc.as_deref()) {
        Some(src) => out += &format!(">{src}</{name}>"),
        None => out += "/>",
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{DataMw, ParamInfo, ParamKey, TemplateInfo, TemplateTarget};
    use indexmap::IndexMap;

    fn regenerate(doc: &Document) -> String {
        WikitextSerializer::new(&Configuration::default(), None).serialize(doc)
    }

    #[test]
    fn new_document() {
        let mut doc = Document::new();
        let body = doc.body();
        let h2 = doc.create_element("h2");
        let title = doc.create_text(" Title ");
        doc.append_child(h2, title);
        let text = doc.create_text("''not italic''");
        let ul = doc.create_element("ul");
        for item in ["a", "b"] {
            let li = doc.create_element("li");
            let text = doc.create_text(item);
            doc.append_child(li, text);
            doc.append_child(ul, li);
        }
        doc.append_child(body, h2);
        doc.append_child(body, text);
        doc.append_child(body, ul);
        assert_eq!(
            regenerate(&doc),
            "== Title ==\n<nowiki>''not italic''</nowiki>\n*a\n*b"
        );
    }

    #[test]
    fn nested_list_bullets() {
        let mut doc = Document::new();
        let body = doc.body();
        let ol = doc.create_element("ol");
        let li = doc.create_element("li");
        let dl = doc.create_element("dl");
        let dd = doc.create_element("dd");
        doc.append_child(body, ol);
        doc.append_child(ol, li);
        doc.append_child(li, dl);
        doc.append_child(dl, dd);
        assert_eq!(bullets(&doc, dd), "#:");
        assert_eq!(bullets(&doc, li), "#");
    }

    #[test]
    fn transclusion_parts() {
        let info = TemplateInfo {
            target: TemplateTarget {
                wt: "echo".into(),
                href: None,
            },
            params: IndexMap::from([
                ("1".to_string(), ParamInfo { wt: "a".into(), key: None }),
                (
                    "name".to_string(),
                    ParamInfo {
                        wt: "b".into(),
                        key: Some(ParamKey { wt: " name ".into() }),
                    },
                ),
                ("3".to_string(), ParamInfo { wt: "c".into(), key: None }),
            ]),
            i: 0,
        };
        assert_eq!(
            part_source(&TemplatePart::Invocation(Invocation::Template(info))),
            "{{echo|a| name =b|3=c}}"
        );
    }

    #[test]
    fn extension_tags() {
        let mw = DataMw {
            name: Some("poem".into()),
            attrs: Some(IndexMap::from([("class".to_string(), "x".to_string())])),
            body: Some(crate::dom::DataMwBody {
                extsrc: Some("a\nb".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(extension_source(&mw), "<poem class=\"x\">a\nb</poem>");
        let empty = DataMw {
            name: Some("references".into()),
            ..Default::default()
        };
        assert_eq!(extension_source(&empty), "<references/>");
    }

    #[test]
    fn attributes_skip_generated() {
        let mut doc = Document::new();
        let div = doc.create_element("div");
        doc.set_attr(div, "class", "a");
        doc.set_attr(div, "about", "#mwt1");
        doc.set_attr(div, "typeof", "mw:Transclusion foo");
        doc.set_attr(div, "hidden", "");
        assert_eq!(attributes(&doc, div), r#" class="a" typeof="foo" hidden"#);
    }
}
