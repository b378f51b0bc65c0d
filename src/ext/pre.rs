//! The `<pre>` extension tag.

use super::{Extension, ExtensionApi, ExtensionError};
use crate::{common::decode_html, dom::Document, wikitext::Kv};
use regex::{Regex, RegexBuilder};
use std::sync::LazyLock;

/// The `<pre>` extension tag, which shows its content as preformatted text.
/// With `format="wikitext"`, the content is parsed as Wikitext instead.
#[derive(Clone, Copy, Debug, Default)]
pub struct Pre;

impl Extension for Pre {
    fn name(&self) -> &'static str {
        "pre"
    }

    fn to_dom(
        &self,
        api: &ExtensionApi<'_>,
        content: &str,
        args: &[Kv],
    ) -> Result<Document, ExtensionError> {
        // “Backwards-compatibility hack”
        static STRIP_NOWIKI: LazyLock<Regex> = LazyLock::new(|| {
            RegexBuilder::new("<nowiki>(.*?)</nowiki>")
                .case_insensitive(true)
                .build()
                .unwrap()
        });

        let attrs = args
            .iter()
            .filter(|kv| !kv.k.eq_ignore_ascii_case("format"))
            .cloned()
            .collect::<Vec<_>>();

        let is_wikitext =
            Kv::lookup(args, "format").is_some_and(|kv| kv.v.eq_ignore_ascii_case("wikitext"));
        if is_wikitext {
            return Ok(api.parse_ext_tag_to_dom(&attrs, "pre", content)?);
        }

        let mut doc = Document::new();
        let pre = doc.create_element("pre");
        for Kv { k, v, .. } in attrs {
            doc.set_attr(pre, &k, v);
        }
        let text = STRIP_NOWIKI.replace_all(content, "$1");
        let text = doc.create_text(decode_html(&text));
        doc.append_child(pre, text);
        let body = doc.body();
        doc.append_child(body, pre);
        Ok(doc)
    }
}
