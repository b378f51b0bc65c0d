use super::*;
use crate::{
    data_access::MockDataAccess,
    dom::{Invocation, TemplatePart, serialize::{inner_html, strip_section_tags_and_fallback_ids}},
    ext::ExtensionRegistry,
    html2wt::{Selser, html2wt},
    wt2html::{Env, wt2html},
};
use testfile::{Chunk, Testfile};

const PARSER_TESTS: &str = include_str!("parser_tests.txt");

#[track_caller]
fn tokenize(source: &str) -> Vec<Token> {
    let _ = env_logger::try_init();
    Parser::new(&Configuration::default())
        .tokenize(source)
        .unwrap()
}

/// Asserts that the source ranges of the tokens cover `source` exactly, in
/// order.
#[track_caller]
fn assert_tiles(source: &str, tokens: &[Token]) {
    let mut pos = 0;
    let mut rebuilt = String::new();
    for token in tokens {
        if let Token::EndOfInput = token {
            continue;
        }
        let tsr = token.tsr().unwrap_or_else(|| panic!("no tsr on {token:?}"));
        assert_eq!(tsr.start, pos, "gap or overlap before {token:?} in {source:?}");
        rebuilt += token.wt_source(source).unwrap();
        pos = tsr.end;
    }
    assert_eq!(pos, source.len(), "{source:?} not fully covered");
    assert_eq!(rebuilt, source);
}

#[test]
fn tokens_tile_the_source() {
    for source in [
        "",
        "plain text",
        "== a ==  \nb\n=== c ==\n===\n",
        "----- x\n* a\n*# b\n; t : d\n",
        "{|  class=\"t\"\n|+ cap\n! h !! i\n|-\n| style=\"x\" | a || b\n|}",
        "[[a]] [[b|''c'']] [[Category:X|k]] [http://x.org y] [//x.org] see https://x.org.",
        "''a'''b''''c'''''d''''''",
        "<b class=x>y</b> <br/> </i> <nowiki>[[x]]</nowiki> <nowiki/>",
        "<poem class=\"a\">\nx\n</poem> <ref name=y/>",
        "{{t|a|b=c}} {{{arg|def}}} &amp; &bogus; __NOTOC__ __BOGUS__",
        "a <!-- c --> b <!-- unclosed",
        "\r\nx\r\n",
    ] {
        assert_tiles(source, &tokenize(source));
    }
}

#[test]
fn ends_with_end_of_input() {
    assert_eq!(tokenize(""), vec![Token::EndOfInput]);
    assert!(matches!(tokenize("x").last(), Some(Token::EndOfInput)));
}

#[test]
fn headings() {
    let tokens = tokenize("== a ==");
    assert_eq!(tokens[0].name(), Some("h2"));
    assert_eq!(tokens[0].tsr(), Some(SourceRange::new(0, 2)));
    assert!(matches!(&tokens[1], Token::Text(t) if t.value == " a "));
    assert_eq!(tokens[2].name(), Some("h2"));
    assert_eq!(tokens[2].tsr(), Some(SourceRange::new(5, 7)));

    // The shorter run decides the level
    let tokens = tokenize("=== a ==");
    assert_eq!(tokens[0].name(), Some("h2"));
    assert!(matches!(&tokens[1], Token::Text(t) if t.value == "= a "));

    let tokens = tokenize("===");
    assert_eq!(tokens[0].name(), Some("h1"));
    assert!(matches!(&tokens[1], Token::Text(t) if t.value == "="));
}

#[test]
fn horizontal_rules() {
    let tokens = tokenize("------");
    let Token::SelfClosingTag(hr) = &tokens[0] else {
        panic!("not a tag: {:?}", tokens[0]);
    };
    assert_eq!(hr.name, "hr");
    assert_eq!(hr.data_parsoid.extra_dashes, Some(2));
}

#[test]
fn quotes() {
    let tokens = tokenize("''''x");
    assert!(matches!(&tokens[0], Token::Text(t) if t.value == "'"));
    let Token::SelfClosingTag(quote) = &tokens[1] else {
        panic!("not a quote: {:?}", tokens[1]);
    };
    assert_eq!(quote.name, "mw-quote");
    assert_eq!(quote.attribute("value"), Some("'''"));
    assert_eq!(quote.data_parsoid.tsr, Some(SourceRange::new(1, 4)));
}

#[test]
fn templates() {
    let tokens = tokenize("{{echo|a| b =c}}");
    assert_eq!(tokens.len(), 2);
    let Token::SelfClosingTag(tag) = &tokens[0] else {
        panic!("not a template: {:?}", tokens[0]);
    };
    assert_eq!(tag.name, "template");
    assert_eq!(tag.data_parsoid.src.as_deref(), Some("{{echo|a| b =c}}"));

    let parts = tag.data_mw.as_ref().and_then(|mw| mw.parts.as_ref()).unwrap();
    let [TemplatePart::Invocation(Invocation::Template(info))] = parts.as_slice() else {
        panic!("not a template invocation: {parts:?}");
    };
    assert_eq!(info.target.wt, "echo");
    assert_eq!(info.target.href.as_deref(), Some("./Template:Echo"));
    assert_eq!(info.params["1"].wt, "a");
    assert_eq!(info.params["b"].wt, "c");
    assert_eq!(info.params["b"].key.as_ref().map(|k| k.wt.as_str()), Some(" b "));

    let tokens = tokenize("{{#if:x|y}}");
    let parts = tokens[0].tag().and_then(|t| t.data_mw.as_ref()).and_then(|mw| mw.parts.as_ref()).unwrap();
    assert!(matches!(
        parts.as_slice(),
        [TemplatePart::Invocation(Invocation::ParserFunction(_))]
    ));

    // Arguments outside of a template are text
    let tokens = tokenize("{{{1|x}}}");
    assert!(matches!(&tokens[0], Token::Text(t) if t.value == "{{{1|x}}}"));
}

#[test]
fn extension_tags() {
    let tokens = tokenize("<poem a=b>x</poem>");
    let Token::SelfClosingTag(tag) = &tokens[0] else {
        panic!("not an extension: {:?}", tokens[0]);
    };
    assert_eq!(tag.name, "extension");
    assert_eq!(tag.data_parsoid.dsr, Some(DomSourceRange::new(0, 18, 10, 7)));
    let mw = tag.data_mw.as_ref().unwrap();
    assert_eq!(mw.name.as_deref(), Some("poem"));
    assert_eq!(mw.attrs.as_ref().unwrap()["a"], "b");
    assert_eq!(
        mw.body.as_ref().and_then(|body| body.extsrc.as_deref()),
        Some("x")
    );

    // Without an end tag, the tag is plain text
    let tokens = tokenize("<poem>x");
    assert!(matches!(&tokens[0], Token::Text(t) if t.value == "<poem>x"));
}

#[test]
fn links() {
    let tokens = tokenize("[[foo bar|baz]]");
    let Token::StartTag(a) = &tokens[0] else {
        panic!("not a link: {:?}", tokens[0]);
    };
    assert_eq!(a.attribute("rel"), Some("mw:WikiLink"));
    assert_eq!(a.attribute("href"), Some("./Foo_bar"));
    assert_eq!(a.attribute_shadow_info("href").value.as_deref(), Some("foo bar"));
    assert_eq!(a.data_parsoid.tsr, Some(SourceRange::new(0, 10)));

    let tokens = tokenize("[[Category:X|k]]");
    assert_eq!(tokens[0].name(), Some("link"));
    assert_eq!(tokens[0].tag().and_then(|t| t.attribute("href")), Some("./Category:X#k"));

    let tokens = tokenize("see https://example.com.");
    let Token::StartTag(a) = &tokens[1] else {
        panic!("not an autolink: {:?}", tokens[1]);
    };
    assert_eq!(a.attribute("href"), Some("https://example.com"));
    assert!(matches!(tokens.last(), Some(Token::EndOfInput)));
    assert!(matches!(&tokens[tokens.len() - 2], Token::Text(t) if t.value == "."));
}

#[test]
fn comments() {
    let tokens = tokenize("a<!-- b");
    let Token::Comment(comment) = &tokens[1] else {
        panic!("not a comment: {:?}", tokens[1]);
    };
    assert_eq!(comment.value, " b");
    assert!(comment.data_parsoid.unclosed_comment);
}

#[test]
fn behavior_switches() {
    let tokens = tokenize("__NOTOC__ __BOGUS__");
    assert_eq!(
        tokens[0].tag().and_then(|t| t.attribute("property")),
        Some("mw:PageProp/notoc")
    );
    assert!(matches!(&tokens[1], Token::Text(t) if t.value == " __BOGUS__"));
}

#[test]
fn token_json() {
    let tokens = tokenize("[[a]]\n");
    let json = serde_json::to_value(&tokens).unwrap();
    assert_eq!(json[0]["type"], "TagTk");
    assert_eq!(json[3]["type"], "NlTk");
    assert_eq!(json[4]["type"], "EOFTk");
    let back: Vec<Token> = serde_json::from_value(json).unwrap();
    assert_eq!(back, tokens);
}

#[test]
fn parser_tests_file() {
    let _ = env_logger::try_init();
    let file = Testfile::parse(PARSER_TESTS).unwrap();

    let mut wiki = MockDataAccess::new();
    for chunk in &file.chunks {
        if let Chunk::Article { title, text } = chunk.node {
            wiki = wiki.with_page(title.trim(), text.trim_end());
        }
    }
    let config = Configuration::default();
    let extensions = ExtensionRegistry::default();
    let env = Env::new(&config, &wiki, &extensions);

    let mut ran = 0;
    for test in file.tests() {
        let name = test.name.trim();
        let Some(wikitext) = test.text("wikitext") else {
            log::warn!("{name}: no wikitext");
            continue;
        };
        let wikitext = wikitext.strip_suffix('\n').unwrap_or(wikitext);
        log::info!("Running {name} ...");

        let doc = wt2html(&env, "Parser test", wikitext)
            .unwrap_or_else(|err| panic!("{name}: {err}"));

        if test.runs_in_mode("wt2html")
            && let Some(expected) = test.text("html/parsoid")
        {
            let mut copy = doc.clone();
            let body = copy.body();
            strip_section_tags_and_fallback_ids(&mut copy, body);
            assert_eq!(inner_html(&copy, body).trim(), expected.trim(), "{name}: wt2html");
        }

        if test.runs_in_mode("wt2wt") {
            let out = html2wt(&env, &doc, None).unwrap();
            assert_eq!(out, wikitext, "{name}: wt2wt");
        }

        if test.runs_in_mode("selser") {
            let edited = doc.clone();
            let out = html2wt(
                &env,
                &edited,
                Some(Selser {
                    original: &doc,
                    source: wikitext,
                }),
            )
            .unwrap();
            assert_eq!(out, wikitext, "{name}: selser");
        }

        ran += 1;
    }
    assert_eq!(ran, 11);
}
