//! The `<poem>` extension tag.
//! <https://www.mediawiki.org/wiki/Extension:Poem>

use super::{Extension, ExtensionApi, ExtensionError};
use crate::{
    dom::{Document, NodeId, TempFlags},
    wikitext::{DomSourceRange, Kv},
};
use regex::Regex;
use std::sync::LazyLock;

/// The `<poem>` extension tag, which keeps line breaks and indentation.
#[derive(Clone, Copy, Debug, Default)]
pub struct Poem;

impl Extension for Poem {
    fn name(&self) -> &'static str {
        "poem"
    }

    fn to_dom(
        &self,
        api: &ExtensionApi<'_>,
        content: &str,
        args: &[Kv],
    ) -> Result<Document, ExtensionError> {
        let content = munge(content);

        let mut args = args.to_vec();
        if let Some(class) = args.iter_mut().find(|kv| kv.k.eq_ignore_ascii_case("class")) {
            class.v = if class.v.is_empty() {
                "poem".to_string()
            } else {
                format!("poem {}", class.v)
            };
        } else {
            args.push(Kv::new("class", "poem"));
        }

        // The content does not literally appear in the page any more, so it
        // goes into a new frame
        Ok(api.parse_ext_tag_to_dom(&args, "div", &content)?)
    }

    fn shift_dsr(&self, _dsr: DomSourceRange) -> Option<DomSourceRange> {
        // The munged content has no mapping back to the original source
        None
    }

    fn run(&self, doc: &mut Document, body: NodeId, at_top_level: bool) {
        if at_top_level {
            post_process(doc, body);
        }
    }
}

/// Rewrites the content of a poem into Wikitext which renders the same way
/// without the tag:
///
/// 1. Strip one leading and one trailing newline.
/// 2. Replace a leading space with `&nbsp;` so it is not preformatted text.
/// 3. Replace leading colons with an indented span.
/// 4. Add `<br/>` to the end of each line, except after a horizontal rule or
///    inside `<nowiki>`.
fn munge(content: &str) -> String {
    static NOWIKI: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"<nowiki>[\s\S]*?</nowiki>").unwrap());
    static HR_END: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^(----+)\n").unwrap());
    static HR_RESTORE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^(-+)</poem>").unwrap());

    if content.is_empty() {
        return String::new();
    }

    let content = content.strip_prefix('\n').unwrap_or(content);
    let content = content.strip_suffix('\n').unwrap_or(content);

    let content = content
        .split('\n')
        .map(|line| {
            let colons = line.len() - line.trim_start_matches(':').len();
            if colons > 0 && colons < line.len() {
                format!(
                    r#"<span class="mw-poem-indented" style="display: inline-block; margin-left: {colons}em;">{}</span>"#,
                    html_escape::encode_text(&line[colons..])
                )
            } else if let Some(rest) = line.strip_prefix(' ') {
                format!("&nbsp;{rest}")
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    // Newlines inside nowiki are handled by the post-processor, since a
    // `<br/>` here would be escaped
    let mut out = String::with_capacity(content.len());
    let mut last = 0;
    let add_breaks = |out: &mut String, part: &str| {
        // `</poem>` cannot appear in the content, so it is safe to use as a
        // temporary marker for a rule which must not get a break
        let part = HR_END.replace_all(part, "$1</poem>");
        let part = part.replace('\n', "<br/>\n");
        *out += &HR_RESTORE.replace_all(&part, "$1\n");
    };
    for nowiki in NOWIKI.find_iter(&content) {
        add_breaks(&mut out, &content[last..nowiki.start()]);
        out += nowiki.as_str();
        last = nowiki.end();
    }
    add_breaks(&mut out, &content[last..]);
    out
}

/// Finds the poems generated at the top level of the page and processes the
/// nowikis inside them.
fn post_process(doc: &mut Document, node: NodeId) {
    for child in doc.children(node).to_vec() {
        if !doc.is_element(child) {
            continue;
        }
        if doc.has_type_of(child, "mw:Extension/poem") {
            process_nowikis(doc, child);
        } else {
            post_process(doc, child);
        }
    }
}

/// Replaces newlines in the text of nowikis with `<br>`.
fn process_nowikis(doc: &mut Document, node: NodeId) {
    for child in doc.children(node).to_vec() {
        if !doc.is_element(child) {
            continue;
        }
        if !doc.has_type_of(child, "mw:Nowiki") {
            process_nowikis(doc, child);
            continue;
        }

        let dp = doc.data_parsoid_mut(child);
        if dp.tmp.contains(TempFlags::PROCESSED) {
            continue;
        }
        dp.tmp |= TempFlags::PROCESSED;

        for text in doc.children(child).to_vec() {
            let Some(value) = doc.text(text).map(str::to_string) else {
                continue;
            };
            let mut nl = "";
            let mut pieces = value.split('\n').peekable();
            while let Some(piece) = pieces.next() {
                let node = doc.create_text(format!("{nl}{piece}"));
                doc.insert_before(child, node, Some(text));
                if pieces.peek().is_some() {
                    let br = doc.create_element("br");
                    doc.insert_before(child, br, Some(text));
                    nl = "\n";
                }
            }
            doc.detach(text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn munging() {
        assert_eq!(munge(""), "");
        assert_eq!(munge("\na\nb\n"), "a<br/>\nb");
        assert_eq!(munge(" lead"), "&nbsp;lead");
        assert_eq!(
            munge("::in"),
            r#"<span class="mw-poem-indented" style="display: inline-block; margin-left: 2em;">in</span>"#
        );
        assert_eq!(munge("::"), "::");
        assert_eq!(munge("a\n----\nb"), "a<br/>\n----\nb");
        assert_eq!(
            munge("a\n<nowiki>x\ny</nowiki>\nb"),
            "a<br/>\n<nowiki>x\ny</nowiki><br/>\nb"
        );
    }

    #[test]
    fn nowiki_breaks() {
        let mut doc = Document::new();
        let div = doc.create_element("div");
        doc.set_attr(div, "typeof", "mw:Extension/poem");
        let span = doc.create_element("span");
        doc.set_attr(span, "typeof", "mw:Nowiki");
        let text = doc.create_text("x\ny");
        let body = doc.body();
        doc.append_child(body, div);
        doc.append_child(div, span);
        doc.append_child(span, text);

        Poem.run(&mut doc, body, false);
        assert_eq!(doc.children(span), &[text]);

        Poem.run(&mut doc, body, true);
        let children = doc.children(span).to_vec();
        assert_eq!(children.len(), 3);
        assert_eq!(doc.text(children[0]), Some("x"));
        assert!(doc.is_element_named(children[1], "br"));
        assert_eq!(doc.text(children[2]), Some("\ny"));

        Poem.run(&mut doc, body, true);
        assert_eq!(doc.children(span).len(), 3);
    }
}
