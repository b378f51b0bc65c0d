//! DOM post-processing passes.
//!
//! Each pass rewrites the tree in place. Every pass is a no-op when it is run
//! again on its own output, so a document can be post-processed twice without
//! changing it.

use super::{Env, Frame};
use crate::{
    Error, Result,
    common::{href_to_title, title_to_href},
    dom::{
        DataMwError, Document, Invocation, NodeData, NodeId, NodeKind, ParamInfo, TempFlags,
        TemplatePart,
        serialize::{dump_dom, is_section_tag},
    },
    ext::{ExtensionApi, ExtensionError},
    wikitext::{DomSourceRange, Kv, template_title},
};
use indexmap::IndexMap;
use regex::Regex;
use std::sync::LazyLock;

/// A post-processing pass.
struct Pass {
    /// The name of the pass, for logging.
    name: &'static str,
    /// The pass only runs on the page itself, not on nested frames.
    top_level_only: bool,
    /// The pass.
    run: fn(&mut Document, &Env<'_>, &Frame<'_>) -> Result,
}

/// All passes, in the order they run.
static PASSES: &[Pass] = &[
    Pass {
        name: "normalize",
        top_level_only: false,
        run: normalize,
    },
    Pass {
        name: "expand_templates",
        top_level_only: false,
        run: expand_templates,
    },
    Pass {
        name: "expand_extensions",
        top_level_only: false,
        run: expand_extensions,
    },
    Pass {
        name: "table_fixups",
        top_level_only: false,
        run: table_fixups,
    },
    Pass {
        name: "red_links",
        top_level_only: true,
        run: red_links,
    },
    Pass {
        name: "extension_hooks",
        top_level_only: false,
        run: extension_hooks,
    },
    Pass {
        name: "wrap_sections",
        top_level_only: true,
        run: wrap_sections,
    },
];

/// Runs all post-processing passes that apply to `frame`.
pub(crate) fn run(doc: &mut Document, env: &Env<'_>, frame: &Frame<'_>) -> Result {
    for pass in PASSES {
        if pass.top_level_only && !frame.is_top_level() {
            continue;
        }
        log::debug!("{}: {}", frame.title, pass.name);
        (pass.run)(doc, env, frame)?;
        if log::log_enabled!(log::Level::Trace) {
            log::trace!("{}", dump_dom(doc, doc.body(), pass.name));
        }
    }
    Ok(())
}

/// Merges adjacent text nodes and removes empty ones.
fn normalize(doc: &mut Document, _env: &Env<'_>, _frame: &Frame<'_>) -> Result {
    let body = doc.body();
    normalize_children(doc, body);
    Ok(())
}

/// Normalises the children of `node`, recursively.
fn normalize_children(doc: &mut Document, node: NodeId) {
    let mut prev: Option<NodeId> = None;
    for child in doc.children(node).to_vec() {
        let Some(text) = doc.text(child).map(str::to_string) else {
            normalize_children(doc, child);
            prev = None;
            continue;
        };

        if text.is_empty() {
            doc.detach(child);
            continue;
        }

        if let Some(prev) = prev {
            let dsr = match (doc.dsr(prev), doc.dsr(child)) {
                (Some(a), Some(b)) if a.end == b.start => {
                    Some(DomSourceRange::new(a.start, b.end, 0, 0))
                }
                _ => None,
            };
            if let NodeKind::Text(value) = doc.kind_mut(prev) {
                value.push_str(&text);
            }
            doc.data_parsoid_mut(prev).dsr = dsr;
            doc.detach(child);
        } else {
            prev = Some(child);
        }
    }
}

/// Returns the nodes with a pending placeholder whose `typeof` starts with
/// `prefix`, and clears the pending flag.
fn take_pending(doc: &mut Document, prefix: &str) -> Vec<NodeId> {
    let pending = doc
        .descendants(doc.body())
        .into_iter()
        .filter(|node| {
            doc.type_of_with_prefix(*node, prefix).is_some()
                && doc
                    .data_parsoid(*node)
                    .is_some_and(|dp| dp.tmp.contains(TempFlags::PENDING_EXPANSION))
        })
        .collect::<Vec<_>>();
    for node in &pending {
        doc.data_parsoid_mut(*node).tmp -= TempFlags::PENDING_EXPANSION;
    }
    pending
}

/// Replaces template placeholders with the expanded content of the template.
fn expand_templates(doc: &mut Document, env: &Env<'_>, frame: &Frame<'_>) -> Result {
    for placeholder in take_pending(doc, "mw:Transclusion") {
        let Some(invocation) = doc
            .data_mw(placeholder)
            .and_then(|mw| mw.parts.as_ref())
            .and_then(|parts| {
                parts.iter().find_map(|part| match part {
                    TemplatePart::Invocation(invocation) => Some(invocation.clone()),
                    TemplatePart::Text(_) => None,
                })
            })
        else {
            log::warn!("transclusion without an invocation in {}", frame.title);
            continue;
        };

        let info = match &invocation {
            Invocation::Template(info) => info,
            Invocation::ParserFunction(info) | Invocation::TemplateArg(info) => {
                let error = DataMwError::new(
                    "unsupported-parser-function",
                    format!("'{}' cannot be expanded", info.target.wt.trim()),
                );
                error_marker(doc, placeholder, error);
                continue;
            }
        };

        let limit = env.config.limits.max_template_depth;
        if frame.depth >= limit {
            let error = DataMwError::new(
                "template-depth-exceeded",
                format!("Template depth limit of {limit} exceeded"),
            );
            error_marker(doc, placeholder, error);
            continue;
        }

        let title = template_title(&info.target.wt);
        let Some(source) = env.data_access.fetch_page_content(&title, None) else {
            log::debug!("missing template {title}");
            let link = red_link(doc, &title);
            doc.append_child(placeholder, link);
            let about = env.new_about_id();
            doc.set_attr(placeholder, "about", about);
            continue;
        };

        let source = substitute_args(&source, &info.params);
        let child = frame.child(&title, &source);
        let inner = super::parse(env, &child)?;

        let nodes = inner
            .children(inner.body())
            .iter()
            .map(|node| {
                let copy = doc.import(&inner, *node);
                strip_dsr(doc, copy);
                doc.data_parsoid_mut(copy).tmp |= TempFlags::FROM_NESTED_FRAME;
                copy
            })
            .collect::<Vec<_>>();
        encapsulate(doc, env, placeholder, nodes, "mw:Transclusion");
    }
    Ok(())
}

/// Replaces template argument references in `source` with the values given
/// in `params`, or their defaults.
///
/// ```wikitext
/// {{{1}}} {{{name|default}}}
/// ```
fn substitute_args(source: &str, params: &IndexMap<String, ParamInfo>) -> String {
    static ARG: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\{\{\{([^{}|]*)(?:\|([^{}]*))?\}\}\}").unwrap());

    let mut source = source.to_string();
    // Defaults can contain other arguments, which are only visible once the
    // outer reference is replaced
    for _ in 0..8 {
        let next = ARG.replace_all(&source, |caps: &regex::Captures<'_>| {
            let name = caps[1].trim();
            if let Some(param) = params.get(name) {
                if name.bytes().all(|b| b.is_ascii_digit()) {
                    param.wt.clone()
                } else {
                    param.wt.trim().to_string()
                }
            } else if let Some(default) = caps.get(2) {
                default.as_str().to_string()
            } else {
                caps[0].to_string()
            }
        });
        if next == source {
            break;
        }
        source = next.into_owned();
    }
    source
}

/// Removes the source ranges of a node and its descendants, which were
/// computed against a different source text.
fn strip_dsr(doc: &mut Document, node: NodeId) {
    for node in core::iter::once(node).chain(doc.descendants(node)) {
        if doc.data(node).is_some() {
            let dp = doc.data_parsoid_mut(node);
            dp.dsr = None;
            dp.tsr = None;
        }
    }
}

/// Creates a link to a page which does not exist.
fn red_link(doc: &mut Document, title: &str) -> NodeId {
    let link = doc.create_element("a");
    doc.set_attr(link, "rel", "mw:WikiLink");
    doc.set_attr(link, "href", title_to_href(title));
    doc.set_attr(link, "title", title);
    doc.set_attr(link, "class", "new");
    let text = doc.create_text(title);
    doc.append_child(link, text);
    link
}

/// Turns a placeholder into an error marker.
fn error_marker(doc: &mut Document, placeholder: NodeId, error: DataMwError) {
    log::warn!("{error}");
    doc.add_type_of(placeholder, "mw:Error");
    if let Some(src) = doc.data_parsoid(placeholder).and_then(|dp| dp.src.clone()) {
        let text = doc.create_text(src);
        doc.append_child(placeholder, text);
    }
    doc.data_mw_mut(placeholder)
        .errors
        .get_or_insert_with(Vec::new)
        .push(error);
}

/// Replaces `placeholder` with `nodes`, moving the metadata of the
/// placeholder onto the first node and grouping all nodes under a new about
/// id. Nodes which cannot carry attributes are wrapped in spans.
fn encapsulate(
    doc: &mut Document,
    env: &Env<'_>,
    placeholder: NodeId,
    nodes: Vec<NodeId>,
    type_of: &str,
) {
    if nodes.is_empty() {
        doc.set_attr(placeholder, "about", env.new_about_id());
        return;
    }

    let about = env.new_about_id();
    let mut first = None;
    for node in nodes {
        let needs_span = !doc.is_element(node)
            || (first.is_none() && doc.has_attr(node, "typeof"));
        doc.insert_sibling_before(placeholder, node);
        let node = if needs_span {
            let span = doc.create_element("span");
            doc.insert_sibling_before(node, span);
            doc.append_child(span, node);
            let tmp = doc.data_parsoid(node).map(|dp| dp.tmp).unwrap_or_default();
            doc.data_parsoid_mut(span).tmp |= tmp;
            span
        } else {
            node
        };
        doc.set_attr(node, "about", about.clone());
        first.get_or_insert(node);
    }

    if let Some(first) = first {
        doc.add_type_of(first, type_of);
        if let Some(NodeData { parsoid, mw, .. }) = doc.take_data(placeholder) {
            let dp = doc.data_parsoid_mut(first);
            dp.dsr = parsoid.dsr;
            dp.src = parsoid.src;
            dp.tsr = None;
            doc.data_mut(first).mw = mw;
        }
    }
    doc.detach(placeholder);
}

/// Replaces extension tag placeholders with the output of the extension.
fn expand_extensions(doc: &mut Document, env: &Env<'_>, frame: &Frame<'_>) -> Result {
    for placeholder in take_pending(doc, "mw:Extension/") {
        let (name, args, content) = {
            let mw = doc.data_mw(placeholder);
            let name = mw.and_then(|mw| mw.name.clone()).unwrap_or_default();
            let args = mw
                .and_then(|mw| mw.attrs.as_ref())
                .map(|attrs| attrs.iter().map(|(k, v)| Kv::new(k, v)).collect::<Vec<_>>())
                .unwrap_or_default();
            let content = mw
                .and_then(|mw| mw.body.as_ref())
                .and_then(|body| body.extsrc.clone())
                .unwrap_or_default();
            (name, args, content)
        };

        let Some(extension) = env.extensions.get(&name) else {
            log::warn!("TODO: <{name}> extension tag");
            if !content.is_empty() {
                let text = doc.create_text(content);
                doc.append_child(placeholder, text);
            }
            doc.set_attr(placeholder, "about", env.new_about_id());
            continue;
        };

        let api = ExtensionApi::new(env, frame, &name);
        let ext_doc = match extension.to_dom(&api, &content, &args) {
            Ok(ext_doc) => ext_doc,
            Err(ExtensionError::Content(error)) => {
                error_marker(doc, placeholder, error);
                continue;
            }
            Err(ExtensionError::Failed(message)) => {
                return Err(Error::Extension { name, message });
            }
            Err(ExtensionError::Pipeline(err)) => return Err(*err),
        };

        let content_start = doc.dsr(placeholder).map(|dsr| dsr.start + dsr.open_width);
        let nodes = ext_doc
            .children(ext_doc.body())
            .iter()
            .map(|node| {
                let copy = doc.import(&ext_doc, *node);
                for node in core::iter::once(copy).chain(doc.descendants(copy)) {
                    let Some(dsr) = doc.dsr(node) else {
                        continue;
                    };
                    doc.data_parsoid_mut(node).dsr =
                        content_start.and_then(|start| extension.shift_dsr(dsr.offset(start)));
                }
                copy
            })
            .collect::<Vec<_>>();
        encapsulate(doc, env, placeholder, nodes, &format!("mw:Extension/{name}"));
    }
    Ok(())
}

/// Adds the implicit `<tbody>` and `<tr>` elements which the HTML parsing
/// algorithm would add to a table.
fn table_fixups(doc: &mut Document, _env: &Env<'_>, _frame: &Frame<'_>) -> Result {
    let tables = doc
        .descendants(doc.body())
        .into_iter()
        .filter(|node| doc.is_element_named(*node, "table"))
        .collect::<Vec<_>>();
    for table in tables {
        fix_table(doc, table);
    }
    Ok(())
}

/// Returns true if a node is whitespace or a comment, which may appear
/// between table parts.
fn is_inter_element(doc: &Document, node: NodeId) -> bool {
    doc.is_comment(node) || doc.text(node).is_some_and(|text| text.trim().is_empty())
}

/// Returns true if a node is a table section.
fn is_table_section(doc: &Document, node: NodeId) -> bool {
    matches!(doc.name(node), Some("tbody" | "thead" | "tfoot"))
}

/// Returns true if a node is a table cell.
fn is_table_cell(doc: &Document, node: NodeId) -> bool {
    matches!(doc.name(node), Some("td" | "th"))
}

/// Wraps the rows of a table in a `<tbody>`.
fn fix_table(doc: &mut Document, table: NodeId) {
    let children = doc.children(table).to_vec();
    let Some(start) = children
        .iter()
        .position(|node| !doc.is_element_named(*node, "caption") && !is_inter_element(doc, *node))
    else {
        return;
    };
    let rows = &children[start..];

    if rows
        .iter()
        .all(|node| is_table_section(doc, *node) || is_inter_element(doc, *node))
    {
        let sections = rows
            .iter()
            .copied()
            .filter(|node| is_table_section(doc, *node))
            .collect::<Vec<_>>();
        for section in sections {
            wrap_cells(doc, section);
        }
        return;
    }

    let tbody = implicit_element(doc, "tbody", rows);
    doc.insert_before(table, tbody, Some(rows[0]));
    for row in rows {
        doc.append_child(tbody, *row);
    }
    wrap_cells(doc, tbody);
}

/// Wraps runs of cells which are not in a row in an implicit `<tr>`.
fn wrap_cells(doc: &mut Document, section: NodeId) {
    let children = doc.children(section).to_vec();
    let mut index = 0;
    while index < children.len() {
        if !is_table_cell(doc, children[index]) {
            index += 1;
            continue;
        }

        let mut end = index + 1;
        let mut last_cell = index;
        while end < children.len()
            && (is_table_cell(doc, children[end]) || is_inter_element(doc, children[end]))
        {
            if is_table_cell(doc, children[end]) {
                last_cell = end;
            }
            end += 1;
        }

        let cells = &children[index..=last_cell];
        let tr = implicit_element(doc, "tr", cells);
        doc.insert_before(section, tr, Some(cells[0]));
        for cell in cells {
            doc.append_child(tr, *cell);
        }
        index = last_cell + 1;
    }
}

/// Creates an element whose start and end tags are implied by `content`.
fn implicit_element(doc: &mut Document, name: &str, content: &[NodeId]) -> NodeId {
    let dsr = match (
        content.first().and_then(|node| doc.dsr(*node)),
        content.last().and_then(|node| doc.dsr(*node)),
    ) {
        (Some(first), Some(last)) if first.start <= last.end => {
            Some(DomSourceRange::new(first.start, last.end, 0, 0))
        }
        _ => None,
    };
    let node = doc.create_element(name);
    let dp = doc.data_parsoid_mut(node);
    dp.auto_inserted_start = true;
    dp.auto_inserted_end = true;
    dp.dsr = dsr;
    node
}

/// Marks links to pages which do not exist.
fn red_links(doc: &mut Document, env: &Env<'_>, _frame: &Frame<'_>) -> Result {
    let links = doc
        .descendants(doc.body())
        .into_iter()
        .filter(|node| {
            doc.is_element_named(*node, "a")
                && doc.attr(*node, "rel") == Some("mw:WikiLink")
                && !has_class(doc, *node, "new")
        })
        .filter_map(|node| {
            let title = doc
                .attr(node, "title")
                .map(str::to_string)
                .or_else(|| doc.attr(node, "href").and_then(href_to_title))?;
            Some((node, title))
        })
        .collect::<Vec<_>>();
    if links.is_empty() {
        return Ok(());
    }

    let titles = links
        .iter()
        .map(|(_, title)| title.as_str())
        .collect::<Vec<_>>();
    let info = env.data_access.page_info(&titles);
    for (node, title) in &links {
        if info.get(title).is_some_and(|info| info.missing && !info.known) {
            add_class(doc, *node, "new");
        }
    }
    Ok(())
}

/// Returns true if the `class` attribute of an element contains `class`.
fn has_class(doc: &Document, node: NodeId, class: &str) -> bool {
    doc.attr(node, "class")
        .is_some_and(|classes| classes.split_ascii_whitespace().any(|c| c == class))
}

/// Adds `class` to the `class` attribute of an element.
fn add_class(doc: &mut Document, node: NodeId, class: &str) {
    let value = match doc.attr(node, "class") {
        Some(classes) if !classes.is_empty() => format!("{classes} {class}"),
        _ => class.to_string(),
    };
    doc.set_attr(node, "class", value);
}

/// Runs the post-processors of all registered extensions.
fn extension_hooks(doc: &mut Document, env: &Env<'_>, frame: &Frame<'_>) -> Result {
    let body = doc.body();
    for extension in env.extensions.iter() {
        extension.run(doc, body, frame.is_top_level());
    }
    Ok(())
}

/// Returns the level of a heading element.
fn heading_level(doc: &Document, node: NodeId) -> Option<usize> {
    let name = doc.name(node)?;
    let level = name.strip_prefix('h')?.parse::<usize>().ok()?;
    (1..=6).contains(&level).then_some(level)
}

/// Wraps each heading and the content following it in a `<section>`, nested
/// by heading level.
///
/// Headings generated by a template or extension stay in the current section,
/// so encapsulated content is never split across sections.
fn wrap_sections(doc: &mut Document, _env: &Env<'_>, _frame: &Frame<'_>) -> Result {
    let body = doc.body();
    let children = doc.children(body).to_vec();
    if children.iter().any(|child| is_section_tag(doc, *child)) {
        return Ok(());
    }

    let mut stack = Vec::<(usize, NodeId)>::new();
    let mut current = None;
    let mut next_id = 0;
    for child in children {
        if let Some(level) = heading_level(doc, child)
            && !doc.has_attr(child, "about")
        {
            while stack.last().is_some_and(|(open, _)| *open >= level) {
                stack.pop();
            }
            next_id += 1;
            let section = new_section(doc, next_id);
            let parent = stack.last().map_or(body, |(_, section)| *section);
            doc.append_child(parent, section);
            stack.push((level, section));
            current = Some(section);
        }

        let section = *current.get_or_insert_with(|| {
            let lead = new_section(doc, 0);
            doc.append_child(body, lead);
            lead
        });
        doc.append_child(section, child);
    }
    Ok(())
}

/// Creates a section wrapper.
fn new_section(doc: &mut Document, id: usize) -> NodeId {
    let section = doc.create_element("section");
    doc.set_attr(section, "data-mw-section-id", id.to_string());
    section
}
