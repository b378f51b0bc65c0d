//! A reader for the parser-tests file format.
//!
//! A parser-tests file is a sequence of `!!`-delimited chunks:
//!
//! ```text
//! !! test
//! Simple link
//! !! options
//! parsoid=wt2html,wt2wt
//! !! wikitext
//! [[Foo]]
//! !! html/parsoid
//! <p><a rel="mw:WikiLink" href="./Foo">Foo</a></p>
//! !! end
//! ```

use super::codemap::Spanned;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::borrow::Cow;

/// A parser-tests file error.
pub type Error = peg::error::ParseError<peg::str::LineCol>;

/// A parsed parser-tests file.
#[derive(Debug)]
pub struct Testfile<'input> {
    /// The declared format version, if any.
    pub version: Option<u8>,
    /// File-wide options.
    pub options: IndexMap<Cow<'input, str>, Value>,
    /// The chunks of the file, in source order.
    pub chunks: Vec<Spanned<Chunk<'input>>>,
}

impl<'input> Testfile<'input> {
    /// Parses a parser-tests file.
    pub fn parse(code: &'input str) -> Result<Self, Error> {
        testfile::parse(code)
    }

    /// Returns an iterator over all test cases in the file.
    pub fn tests(&self) -> impl Iterator<Item = &TestCase<'input>> {
        self.chunks.iter().filter_map(|chunk| match &chunk.node {
            Chunk::Test(test) => Some(test),
            _ => None,
        })
    }

    /// Returns an iterator over all articles in the file, as `(title, text)`.
    pub fn articles(&self) -> impl Iterator<Item = (&'input str, &'input str)> {
        self.chunks.iter().filter_map(|chunk| match chunk.node {
            Chunk::Article { title, text } => Some((title, text)),
            _ => None,
        })
    }
}

/// A top-level item in a parser-tests file.
#[derive(Debug)]
pub enum Chunk<'input> {
    /// A `#` comment.
    Comment,
    /// A blank line, or garbage between items.
    Line,
    /// A page which exists in the mock wiki during tests.
    Article {
        /// The title of the page.
        title: &'input str,
        /// The wikitext of the page.
        text: &'input str,
    },
    /// A list of parser function hooks required by later tests.
    FunctionHooks,
    /// A test case.
    Test(TestCase<'input>),
    /// A list of tag hooks required by later tests.
    Hooks,
}

/// A single test case.
#[derive(Debug)]
pub struct TestCase<'input> {
    /// The name of the test.
    pub name: &'input str,
    /// The sections of the test, keyed by section name.
    pub sections: IndexMap<&'input str, SectionText<'input>>,
}

impl TestCase<'_> {
    /// Returns the text of the section `name`.
    #[must_use]
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.sections.get(name) {
            Some(SectionText::Text(text)) => Some(text),
            _ => None,
        }
    }

    /// Returns the value of the option `name`.
    #[must_use]
    pub fn option(&self, name: &str) -> Option<&Value> {
        match self.sections.get("options") {
            Some(SectionText::Kv(options)) => options.get(name),
            _ => None,
        }
    }

    /// Returns true if the test should run in the given Parsoid test mode,
    /// like `wt2wt`. Tests with no `parsoid` option run in every mode.
    #[must_use]
    pub fn runs_in_mode(&self, mode: &str) -> bool {
        match self.option("parsoid").and_then(|p| p.get("modes")) {
            Some(Value::Array(modes)) => modes.is_empty() || modes.iter().any(|m| m == mode),
            _ => true,
        }
    }
}

/// A section of a test case.
#[derive(Debug)]
struct Section<'input> {
    /// The name of the section.
    name: &'input str,
    /// The content of the section.
    text: SectionText<'input>,
}

/// The content of a test case section.
#[derive(Debug)]
pub enum SectionText<'input> {
    /// Verbatim text.
    Text(Cow<'input, str>),
    /// Key-value options.
    Kv(IndexMap<Cow<'input, str>, Value>),
}

/// Expands the shorthand forms of the `parsoid` option into an object with a
/// `modes` list.
///
/// ```text
/// option                         value
/// parsoid                        {"modes":[]}
/// parsoid=wt2html                {"modes":["wt2html"]}
/// parsoid=wt2html,wt2wt          {"modes":["wt2html","wt2wt"]}
/// parsoid={"modes":["wt2wt"]}    {"modes":["wt2wt"]}
/// parsoid={"wt2wt":true}         {"modes":{"wt2wt":true}}
/// ```
fn expand_parsoid_option(options: &mut IndexMap<Cow<'_, str>, Value>) {
    let Some(parsoid) = options.get_mut("parsoid") else {
        return;
    };

    let modes = match parsoid {
        Value::String(s) if s.is_empty() => Value::Array(vec![]),
        Value::String(s) => Value::Array(vec![Value::String(core::mem::take(s))]),
        Value::Array(list) => Value::Array(core::mem::take(list)),
        Value::Object(map) if !map.contains_key("modes") => Value::Object(core::mem::take(map)),
        _ => return,
    };

    let mut map = Map::with_capacity(1);
    map.insert("modes".to_string(), modes);
    *parsoid = Value::Object(map);
}

peg::parser! {grammar testfile() for str {
  pub rule parse() -> Testfile<'input>
  = comment_or_blank_line()*
    version:format()?
    comment_or_blank_line()*
    options:(sec:option_section() end(<>) { sec })?
    chunks:spanned(<chunk()>)+
  {
    let options = match options {
        Some(Section { text: SectionText::Kv(options), .. }) => options,
        _ => IndexMap::new(),
    };
    Testfile { version, options, chunks }
  }

  rule format() -> u8
  = "!!" ws()? i("version") ws()+ v:$(['0'..='9']+) rest_of_line()
  {? v.parse().map_err(|_| "version number") }

  rule option_section() -> Section<'input>
  = start(<i("options")>) opts:option_list()?
  {
    let mut opts = opts.unwrap_or_default();
    expand_parsoid_option(&mut opts);
    Section { name: "options", text: SectionText::Kv(opts) }
  }

  rule option_list() -> IndexMap<Cow<'input, str>, Value>
  = o:(t:an_option() (([' '|'\t'] / eol())+) { t })+
  { o.into_iter().collect() }

  rule chunk() -> Chunk<'input>
  = comment_or_blank_line()
  / article()
  / test()
  / hooks()
  / functionhooks()
    // Some old files have garbage text between tests
  / line()
    { Chunk::Line }

  rule comment_or_blank_line() -> Chunk<'input>
  = comment()
  / ws()? eol()
  { Chunk::Line }

  rule comment() -> Chunk<'input>
  = "#" rest_of_line()
  { Chunk::Comment }

  rule article() -> Chunk<'input>
  = start(<i("article")>)
    title:line()
    start(<i("text")>)
    text:text()
    end(<i("article")>)
  { Chunk::Article { title: title.trim(), text } }

  rule test() -> Chunk<'input>
  = start(<i("test")>)
    name:text()
    sections:(section() / config_section() / option_section())*
    end(<>)
  {
    let sections = sections.into_iter().map(|section| {
        (section.name, section.text)
    }).collect::<IndexMap<_, _>>();
    Chunk::Test(TestCase { name: name.trim_end(), sections })
  }

  rule config_section() -> Section<'input>
  = start(<i("config")>) items:config_list()?
  { Section { name: "config", text: SectionText::Kv(items.unwrap_or_default()) } }

  rule config_list() -> IndexMap<Cow<'input, str>, Value>
  = c:(t:a_config_line() eol()+ { t })+
  { c.into_iter().collect() }

  rule hooks() -> Chunk<'input>
  = start(<i("hooks") ":"?>)
    text()
    end(<i("hooks")>)
  { Chunk::Hooks }

  rule functionhooks() -> Chunk<'input>
  = start(<i("functionhooks") ":"?>)
    text()
    end(<i("functionhooks") ":"?>)
  { Chunk::FunctionHooks }

  /////////////
  // Section //
  /////////////

  rule section() -> Section<'input>
  = "!!" ws()?
    !i("test") !i("end") !i("options") !i("config")
    name:$([^' '|'\t'|'\r'|'\n']+)
    rest_of_line()
    text:text()
  { Section { name, text: SectionText::Text(text.into()) } }

  rule a_config_line() -> (Cow<'input, str>, Value)
  = k:option_name() v:config_value()
  { (Cow::Borrowed(k), v) }

  rule config_value() -> Value
  = ws()? "=" ws()? t:valid_json_value() { t }

  //   foo
  //   foo=bar
  //   foo="bar baz"
  //   foo=[[bar baz]]
  //   foo={...json...}
  //   foo=bar,"baz quux",[[bat]]
  rule an_option() -> (Cow<'input, str>, Value)
  = k:option_name() v:option_value()?
  { (k.to_ascii_lowercase().into(), v.unwrap_or_else(|| Value::String(String::new()))) }

  rule option_name() -> &'input str
  = $([^' '|'\t'|'\n'|'='|'!']+)

  rule option_value() -> Value
  = ws()? "=" ws()? ovl:option_value_list()
  { ovl }

  rule option_value_list() -> Value
  = v:an_option_value() ++ (ws()? "," ws()?)
  {
    let mut v = v;
    if v.len() == 1 { v.swap_remove(0) } else { Value::Array(v) }
  }

  rule an_option_value() -> Value
  = "[[" v:$([^']'|'\n']*) "]]" { Value::String(v.to_string()) }
  / v:$(quoted_value() / json_value())
    {? serde_json::from_str(v).map_err(|_| "valid json") }
  / v:plain_value() { Value::String(v.to_string()) }

  rule valid_json_value() -> Value
  = v:$(quoted_value() / plain_value() / array_value() / json_value())
  {? serde_json::from_str(v).map_err(|_| "valid json") }

  rule quoted_value() -> &'input str
  = $("\"" ([^'\\'|'"'|'\n'] / "\\" [^'\n'])* "\"")

  rule plain_value() -> &'input str
  = $([^' '|'\t'|'\n'|'"'|'\''|'['|']'|'='|','|'!'|'{']+)

  rule array_value() -> &'input str
  = $("[" ([^'"'|'['|']'|'\n'] / quoted_value() / array_value() / eol())* "]")

  rule json_value() -> &'input str
  = $("{" ([^'"'|'{'|'}'|'\n'] / quoted_value() / json_value() / eol())* "}")

  rule spanned<T>(r: rule<T>) -> Spanned<T>
  = start:position!() node:r() end:position!()
  { Spanned::new(node, start, end) }

  rule i(lit: &'static str) -> ()
  = quiet!{
    input:$([_]*<{lit.chars().count()}>)
    {? if input.eq_ignore_ascii_case(lit) { Ok(()) } else { Err(lit) } }
  } / expected!(lit)

  rule start<T>(r: rule<T>)
  = "!!" ws()? r() ws()? eol()

  rule end<T>(r: rule<T>)
  = "!!" ws()? (i("end") r()?) ws()? eolf()

  rule eol()
  = "\n"

  rule eolf()
  = "\n" / ![_]

  rule ws()
  = [' '|'\t']+

  rule rest_of_line() -> &'input str
  = t:$([^'\n']*) eol()
  { t }

  rule line() -> &'input str
  = !"!!" t:rest_of_line()
  { t }

  rule text() -> &'input str
  = $(line()*)
}}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE: &str = "\
!! Version 2
# a comment

!! article
Template:Echo
!! text
{{{1}}}
!! endarticle

!! test
Simple link
!! options
parsoid=wt2html,wt2wt title=[[Main Page]]
!! wikitext
[[Foo]]
!! html/parsoid
<a rel=\"mw:WikiLink\" href=\"./Foo\">Foo</a>
!! end

!! test
Bare option
!! options
parsoid
!! wikitext
x
!! end
";

    #[test]
    fn parse_file() {
        let file = Testfile::parse(FILE).unwrap();
        assert_eq!(file.version, Some(2));
        assert_eq!(
            file.articles().collect::<Vec<_>>(),
            vec![("Template:Echo", "{{{1}}}\n")]
        );

        let tests = file.tests().collect::<Vec<_>>();
        assert_eq!(tests.len(), 2);
        assert_eq!(tests[0].name, "Simple link");
        assert_eq!(tests[0].text("wikitext"), Some("[[Foo]]\n"));
        assert_eq!(
            tests[0].option("title"),
            Some(&Value::String("Main Page".into()))
        );
        assert!(tests[0].runs_in_mode("wt2wt"));
        assert!(!tests[0].runs_in_mode("html2wt"));
    }

    #[test]
    fn parsoid_shorthand() {
        let file = Testfile::parse(FILE).unwrap();
        let tests = file.tests().collect::<Vec<_>>();
        assert_eq!(
            tests[0].option("parsoid"),
            Some(&serde_json::json!({ "modes": ["wt2html", "wt2wt"] }))
        );
        assert_eq!(
            tests[1].option("parsoid"),
            Some(&serde_json::json!({ "modes": [] }))
        );
        assert!(tests[1].runs_in_mode("selser"));
    }

    #[test]
    fn unterminated_test() {
        let err = Testfile::parse("!! test\nBroken\n!! wikitext\nx\n").unwrap_err();
        assert_eq!(err.location.line, 5);
        assert_eq!(err.location.column, 1);
        assert!(err.expected.tokens().any(|token| token == "\"!!\""));
    }

    #[test]
    fn parsoid_option_forms() {
        let mut options = IndexMap::new();
        options.insert(Cow::Borrowed("parsoid"), Value::String("wt2html".into()));
        expand_parsoid_option(&mut options);
        assert_eq!(options["parsoid"], serde_json::json!({ "modes": ["wt2html"] }));

        let mut options = IndexMap::new();
        options.insert(
            Cow::Borrowed("parsoid"),
            serde_json::json!({ "modes": ["wt2wt"], "normalizePhp": true }),
        );
        expand_parsoid_option(&mut options);
        assert_eq!(
            options["parsoid"],
            serde_json::json!({ "modes": ["wt2wt"], "normalizePhp": true })
        );

        let mut options = IndexMap::new();
        options.insert(Cow::Borrowed("parsoid"), serde_json::json!({ "wt2wt": true }));
        expand_parsoid_option(&mut options);
        assert_eq!(
            options["parsoid"],
            serde_json::json!({ "modes": { "wt2wt": true } })
        );
    }
}
