//! DOM to Wikitext conversion.
//!
//! When the original document and source are available, the edited document
//! is first diffed against the original ([`dom_diff`]) and then serialised
//! selectively, copying the source of every unchanged node. Otherwise the
//! whole document is regenerated.

use crate::{Result, dom::Document, wt2html::Env};
use dom_diff::DomDiff;
use serializer::WikitextSerializer;

pub mod diff_utils;
pub mod dom_diff;
mod escape;
mod serializer;

pub use escape::EscapeContext;

/// The original version of an edited document.
#[derive(Clone, Copy, Debug)]
pub struct Selser<'a> {
    /// The document produced from `source`.
    pub original: &'a Document,
    /// The original Wikitext.
    pub source: &'a str,
}

/// Converts `doc` into Wikitext.
pub fn html2wt(env: &Env<'_>, doc: &Document, selser: Option<Selser<'_>>) -> Result<String> {
    let Some(Selser { original, source }) = selser else {
        log::debug!("html2wt: regenerating everything");
        return Ok(WikitextSerializer::new(env.config, None).serialize(doc));
    };

    if original
        .dsr(original.body())
        .is_some_and(|dsr| dsr.end != source.len())
    {
        log::warn!("original document was not built from the original source, regenerating");
        return Ok(WikitextSerializer::new(env.config, None).serialize(doc));
    }

    let mut edited = doc.clone();
    let diff = DomDiff::new(original, env.config.limits.diff_lookahead);
    if !diff.diff(&mut edited) {
        log::debug!("html2wt: no changes");
        return Ok(source.to_string());
    }

    Ok(WikitextSerializer::new(env.config, Some(source)).serialize(&edited))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Configuration,
        data_access::MockDataAccess,
        dom::{NodeId, NodeKind},
        ext::ExtensionRegistry,
        wt2html::wt2html,
    };

    struct Fixture {
        config: Configuration,
        wiki: MockDataAccess,
        extensions: ExtensionRegistry,
    }

    impl Fixture {
        fn new() -> Self {
            let _ = env_logger::try_init();
            Self {
                config: Configuration::default(),
                wiki: MockDataAccess::new()
                    .with_page("Template:Echo", "{{{1}}}")
                    .with_page("Template:H", "x\n== h ==\ny")
                    .with_page("Exists", ""),
                extensions: ExtensionRegistry::default(),
            }
        }

        fn env(&self) -> Env<'_> {
            Env::new(&self.config, &self.wiki, &self.extensions)
        }

        /// Parses `source`, edits a copy of the result with `edit`, and
        /// serialises it selectively.
        #[track_caller]
        fn edit(&self, source: &str, edit: impl FnOnce(&mut Document)) -> String {
            let env = self.env();
            let original = wt2html(&env, "Test", source).unwrap();
            let mut edited = original.clone();
            edit(&mut edited);
            html2wt(
                &env,
                &edited,
                Some(Selser {
                    original: &original,
                    source,
                }),
            )
            .unwrap()
        }

        #[track_caller]
        fn regenerate(&self, source: &str) -> String {
            let env = self.env();
            let doc = wt2html(&env, "Test", source).unwrap();
            html2wt(&env, &doc, None).unwrap()
        }
    }

    /// Finds the first text node containing `needle`.
    fn find_text(doc: &Document, needle: &str) -> NodeId {
        doc.descendants(doc.body())
            .into_iter()
            .find(|node| doc.text(*node).is_some_and(|text| text.contains(needle)))
            .unwrap()
    }

    /// Replaces `from` with `to` in the first text node containing `from`.
    fn replace_text(doc: &mut Document, from: &str, to: &str) {
        let node = find_text(doc, from);
        if let NodeKind::Text(text) = doc.kind_mut(node) {
            *text = text.replace(from, to);
        }
    }

    #[test]
    fn unchanged_round_trip() {
        let fixture = Fixture::new();
        for source in [
            "<b>x",
            "{{echo|hi}}",
            "a  ''b'''c'''''\n\n== h ==\n* x\n*# y\n",
            "{|  class=\"t\"\n|a||b\n|-\n!c\n|}\n[[exists|E]] [[Missing]] [http://x.org y]",
            "<poem>\n a\n:b\n</poem>\n__NOTOC__ &amp; <!-- c --> [[Category:X|k]]",
        ] {
            assert_eq!(fixture.edit(source, |_| {}), source);
        }
    }

    #[test]
    fn edit_keeps_other_lines() {
        let fixture = Fixture::new();
        let source = "== a ==\nkeep  this ''odd'' text\n* one\n*  two\n";
        let out = fixture.edit(source, |doc| replace_text(doc, "one", "uno"));
        assert_eq!(out, "== a ==\nkeep  this ''odd'' text\n* uno\n*  two\n");
    }

    #[test]
    fn edit_needing_escape() {
        let fixture = Fixture::new();
        let out = fixture.edit("a\nb [[c]]", |doc| replace_text(doc, "b ", "[[b]] "));
        assert_eq!(out, "a\n<nowiki>[[b]] </nowiki>[[c]]");

        let out = fixture.edit("x\ny", |doc| replace_text(doc, "y", "* y"));
        assert_eq!(out, "x\n<nowiki>* y</nowiki>");
    }

    #[test]
    fn inserted_heading() {
        let fixture = Fixture::new();
        let out = fixture.edit("a\nb", |doc| {
            let text = find_text(doc, "a");
            let parent = doc.parent(text).unwrap();
            let h2 = doc.create_element("h2");
            let title = doc.create_text(" New ");
            doc.append_child(h2, title);
            doc.append_child(parent, h2);
        });
        assert_eq!(out, "a\nb\n== New ==");
    }

    #[test]
    fn deleted_heading() {
        let fixture = Fixture::new();
        let out = fixture.edit("a\n== h ==\nb", |doc| {
            let h2 = doc
                .descendants(doc.body())
                .into_iter()
                .find(|node| doc.is_element_named(*node, "h2"))
                .unwrap();
            doc.detach(h2);
        });
        assert_eq!(out, "a\nb");
    }

    #[test]
    fn edited_template_params() {
        let fixture = Fixture::new();
        let out = fixture.edit("x {{echo|hi}} y", |doc| {
            let span = doc
                .descendants(doc.body())
                .into_iter()
                .find(|node| doc.has_type_of(*node, "mw:Transclusion"))
                .unwrap();
            let Some(crate::dom::TemplatePart::Invocation(invocation)) = doc
                .data_mw_mut(span)
                .parts
                .as_mut()
                .and_then(|parts| parts.first_mut())
            else {
                panic!("no invocation");
            };
            let crate::dom::Invocation::Template(info) = invocation else {
                panic!("not a template");
            };
            info.params.get_mut("1").unwrap().wt = "bye".into();
        });
        assert_eq!(out, "x {{echo|bye}} y");
    }

    #[test]
    fn edit_next_to_block_template() {
        let fixture = Fixture::new();
        let out = fixture.edit("{{h}}\n== a ==\nb", |doc| replace_text(doc, "b", "c"));
        assert_eq!(out, "{{h}}\n== a ==\nc");
    }

    #[test]
    fn unedited_template_output_from_source() {
        let fixture = Fixture::new();
        let env = fixture.env();
        for source in ["{{h}}\n== a ==\nb", "a {{h}} {{echo|b}}\n* c"] {
            let doc = wt2html(&env, "Test", source).unwrap();
            let out = WikitextSerializer::new(env.config, Some(source)).serialize(&doc);
            assert_eq!(out, source);
        }
    }

    #[test]
    fn full_regeneration() {
        let fixture = Fixture::new();
        assert_eq!(fixture.regenerate("== h ==\ntext"), "== h ==\ntext");
        assert_eq!(fixture.regenerate("* a\n** b"), "* a\n** b");
        assert_eq!(fixture.regenerate("[[exists|E]] [[Exists]]"), "[[exists|E]] [[Exists]]");
        assert_eq!(fixture.regenerate("{{echo|hi}}"), "{{echo|hi}}");
        assert_eq!(fixture.regenerate("'''b''' &lt;"), "'''b''' &lt;");
    }

    #[test]
    fn mismatched_source_regenerates() {
        let fixture = Fixture::new();
        let env = fixture.env();
        let original = wt2html(&env, "Test", "''a''").unwrap();
        let out = html2wt(
            &env,
            &original,
            Some(Selser {
                original: &original,
                source: "something else",
            }),
        )
        .unwrap();
        assert_eq!(out, "''a''");
    }
}
