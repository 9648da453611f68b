//! Convert markdown to nodes in an `HtmlDom`.

use std::{collections::HashSet, fmt::Display};
use anyhow::{Result, bail};
use hn_dom::{HtmlDom, NodeId};
use hn_util::warn;
use html5gum::Token;
use kstring::KString;
use pulldown_cmark::{Parser, Options, Event, Tag, HeadingLevel, LinkType, CodeBlockKind};

fn heading_tag_name(level: HeadingLevel) -> &'static str {
    match level {
        HeadingLevel::H1 => "h1",
        HeadingLevel::H2 => "h2",
        HeadingLevel::H3 => "h3",
        HeadingLevel::H4 => "h4",
        HeadingLevel::H5 => "h5",
        HeadingLevel::H6 => "h6",
    }
}

fn text_to_anchor(s: &str, res: &mut String) {
    let mut last_was_space = false;
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            res.push(c.to_ascii_lowercase());
            last_was_space = false;
        } else if c.is_whitespace() {
            if !last_was_space {
                res.push('-');
            }
            last_was_space = true;
        } else {
            res.push('_');
            last_was_space = false;
        }
    }
}

/// Anchor names handed out so far.
#[derive(Default)]
struct Anchors(HashSet<KString>);

impl Anchors {
    /// A name derived from `text` that wasn't handed out before
    /// (appending "-N" if necessary).
    fn allocate(&mut self, text: &str) -> KString {
        let mut name = String::new();
        text_to_anchor(text, &mut name);
        if name.is_empty() {
            name.push_str("section");
        }
        let base = name.clone();
        let mut counter = 1;
        while self.0.contains(name.as_str()) {
            counter += 1;
            name = format!("{base}-{counter}");
        }
        let name = KString::from_string(name);
        self.0.insert(name.clone());
        name
    }
}

#[derive(Debug, PartialEq)]
enum ContextTag<'t> {
    Markdown(Tag<'t>),
    Html(KString),
}

impl<'t> Display for ContextTag<'t> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextTag::Markdown(tag) =>
                f.write_fmt(format_args!("Markdown {:?} scope", tag)),
            ContextTag::Html(name) =>
                f.write_fmt(format_args!("HTML {:?} element", name.as_str())),
        }
    }
}

struct ContextFrame<'t> {
    tag: ContextTag<'t>,
    /// Where the children of this scope go.
    elt: NodeId,
}

/// Converts markdown text into a detached `<div>` holding the
/// resulting HTML. Headings get `id` attributes derived from their
/// text (unique within the document) unless they carry an explicit
/// `{#id}`. Inline HTML is kept; non-balanced HTML tags are closed
/// or dropped with a warning.
pub fn markdown_to_dom(dom: &mut HtmlDom, s: &str) -> Result<NodeId> {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    options.insert(Options::ENABLE_HEADING_ATTRIBUTES);
    let mut parser = Parser::new_ext(s, options);

    let base = dom.new_empty_element("div");
    let mut context: Vec<ContextFrame> = vec![ContextFrame {
        tag: ContextTag::Markdown(Tag::Paragraph), // fake
        elt: base,
    }];
    let mut anchors = Anchors::default();
    let mut in_table_head = false;

    macro_rules! current {
        () => {
            context.last().expect("at least base frame").elt
        }
    }
    // Create an element inside the current scope and open a scope
    // for it.
    macro_rules! open {
        ($tag:expr, $name:expr) => {{
            let elt = dom.new_empty_element($name);
            dom.append_child(current!(), elt)?;
            context.push(ContextFrame { tag: $tag, elt });
            elt
        }}
    }
    macro_rules! mdopen {
        ($tag:expr, $name:expr) => {
            open!(ContextTag::Markdown($tag), $name)
        }
    }
    // Leave a markdown scope, returning its element; implicitly
    // closes HTML elements that were left open inside.
    macro_rules! mdclose {
        ($tag:expr) => {{
            let tag = ContextTag::Markdown($tag);
            loop {
                if context.len() < 2 {
                    bail!("non-balanced markup: {} without start", tag)
                }
                let frame = context.pop().expect("checked len");
                if frame.tag == tag {
                    break frame.elt
                }
                match frame.tag {
                    ContextTag::Html(_) =>
                        warn!("closing {} implicitly at end of {}", frame.tag, tag),
                    ContextTag::Markdown(_) =>
                        bail!("non-balanced markup: {} ending as {}", frame.tag, tag),
                }
            }
        }}
    }

    while let Some(item) = parser.next() {
        match item {
            Event::Start(tag) => {
                match tag {
                    Tag::Paragraph => { mdopen!(tag, "p"); }
                    Tag::Heading(level, _, _) => {
                        mdopen!(tag, heading_tag_name(level));
                    }
                    Tag::BlockQuote => { mdopen!(tag, "blockquote"); }
                    Tag::CodeBlock(ref kind) => {
                        let pre = dom.new_empty_element("pre");
                        dom.append_child(current!(), pre)?;
                        let code = dom.new_empty_element("code");
                        if let CodeBlockKind::Fenced(lang) = kind {
                            if ! lang.is_empty() {
                                dom.set_attribute(code, "class", format!("language-{lang}"))?;
                            }
                        }
                        dom.append_child(pre, code)?;
                        context.push(ContextFrame { tag: ContextTag::Markdown(tag), elt: code });
                    }
                    Tag::List(firstitemnum) => {
                        let elt = mdopen!(tag, if firstitemnum.is_some() { "ol" } else { "ul" });
                        if let Some(n) = firstitemnum {
                            if n != 1 {
                                dom.set_attribute(elt, "start", n.to_string())?;
                            }
                        }
                    }
                    Tag::Item => { mdopen!(tag, "li"); }
                    Tag::FootnoteDefinition(_) => {
                        let elt = mdopen!(tag, "div");
                        dom.set_attribute(elt, "class", "footnote-definition")?;
                    }
                    Tag::Table(_) => { mdopen!(tag, "table"); }
                    Tag::TableHead => {
                        in_table_head = true;
                        let thead = dom.new_empty_element("thead");
                        dom.append_child(current!(), thead)?;
                        let tr = dom.new_empty_element("tr");
                        dom.append_child(thead, tr)?;
                        context.push(ContextFrame { tag: ContextTag::Markdown(tag), elt: tr });
                    }
                    Tag::TableRow => { mdopen!(tag, "tr"); }
                    Tag::TableCell => {
                        mdopen!(tag, if in_table_head { "th" } else { "td" });
                    }
                    Tag::Emphasis => { mdopen!(tag, "em"); }
                    Tag::Strong => { mdopen!(tag, "strong"); }
                    Tag::Strikethrough => { mdopen!(tag, "s"); }
                    Tag::Link(linktype, ref url, ref title) => {
                        let href = match linktype {
                            LinkType::Email => format!("mailto:{url}"),
                            _ => url.to_string(),
                        };
                        let title = title.to_string();
                        let a = mdopen!(tag, "a");
                        dom.set_attribute(a, "href", href)?;
                        if ! title.is_empty() {
                            dom.set_attribute(a, "title", title)?;
                        }
                    }
                    Tag::Image(_, ref url, ref title) => {
                        // The body collected in this scope becomes the alt
                        // text when closing.
                        let (url, title) = (url.to_string(), title.to_string());
                        let img = mdopen!(tag, "img");
                        dom.set_attribute(img, "src", url)?;
                        if ! title.is_empty() {
                            dom.set_attribute(img, "title", title)?;
                        }
                    }
                }
            }
            Event::End(tag) => {
                match tag {
                    Tag::Heading(_, fragmentid, _) => {
                        let fragmentid = fragmentid.map(KString::from_ref);
                        let elt = mdclose!(tag);
                        let anchor = match fragmentid {
                            Some(id) => id,
                            None => anchors.allocate(&dom.text_content(elt)),
                        };
                        dom.set_attribute(elt, "id", anchor)?;
                    }
                    Tag::TableHead => {
                        in_table_head = false;
                        mdclose!(tag);
                    }
                    Tag::Image(..) => {
                        let img = mdclose!(tag);
                        let alt = dom.text_content(img);
                        dom.clear_children(img);
                        dom.set_attribute(img, "alt", alt)?;
                    }
                    _ => {
                        mdclose!(tag);
                    }
                }
            }
            Event::Text(s) => {
                let t = dom.new_text(KString::from_ref(&s));
                dom.append_child(current!(), t)?;
            }
            Event::Code(s) => {
                let code = dom.new_empty_element("code");
                dom.append_child(current!(), code)?;
                dom.set_text(code, KString::from_ref(&s))?;
            }
            Event::Html(s) => {
                for token in html5gum::Tokenizer::new(&*s).infallible() {
                    match token {
                        Token::StartTag(starttag) => {
                            let name: &str = std::str::from_utf8(&**starttag.name)?;
                            let mut attr = Vec::new();
                            for (k, v) in starttag.attributes {
                                attr.push((String::from_utf8(k.0)?, String::from_utf8(v.0)?));
                            }
                            let elt = dom.new_element(name, attr);
                            dom.append_child(current!(), elt)?;
                            if ! starttag.self_closing
                                && hn_dom::meta::has_closing_tag(name)
                            {
                                context.push(ContextFrame {
                                    tag: ContextTag::Html(KString::from_ref(name)),
                                    elt
                                });
                            }
                        }
                        Token::EndTag(endtag) => {
                            let name: &str = std::str::from_utf8(&**endtag.name)?;
                            let top_matches = match &context.last().expect("base").tag {
                                ContextTag::Html(n) => n == name,
                                ContextTag::Markdown(_) => false,
                            };
                            if top_matches {
                                context.pop();
                            } else if hn_dom::meta::has_closing_tag(name) {
                                warn!("dropping non-balanced end tag {name:?}");
                            }
                        }
                        Token::String(s) => {
                            let t = dom.new_text(KString::from_string(String::from_utf8(s.0)?));
                            dom.append_child(current!(), t)?;
                        }
                        Token::Comment(_) => (),
                        Token::Doctype(_) => (),
                        Token::Error(e) =>
                            if s.starts_with("<!--") {
                                // A comment spanning several markdown
                                // events; slurp them until it ends.
                                while let Some(item) = parser.next() {
                                    if let Event::Html(s) = item {
                                        if s.contains("-->") {
                                            break
                                        }
                                    }
                                }
                                break
                            } else {
                                warn!("HTML5 parsing error: {e} for {s:?}")
                            }
                    }
                }
            }
            Event::FootnoteReference(label) => {
                let sup = dom.new_empty_element("sup");
                dom.append_child(current!(), sup)?;
                dom.set_text(sup, KString::from_ref(&label))?;
            }
            Event::SoftBreak => {
                // a single \n in the input
                let t = dom.new_text("\n");
                dom.append_child(current!(), t)?;
            }
            Event::HardBreak => {
                let br = dom.new_empty_element("br");
                dom.append_child(current!(), br)?;
            }
            Event::Rule => {
                let hr = dom.new_empty_element("hr");
                dom.append_child(current!(), hr)?;
            }
            Event::TaskListMarker(checked) => {
                let input = dom.new_element(
                    "input", [("type", "checkbox"), ("disabled", "")]);
                if checked {
                    dom.set_attribute(input, "checked", "")?;
                }
                dom.append_child(current!(), input)?;
            }
        }
    }

    if context.len() > 1 {
        warn!("{} non-closed context(s) at end of markdown document: {}",
              context.len() - 1,
              context[1..].iter().map(|c| c.tag.to_string())
              .collect::<Vec<String>>()
              .join(", "));
    }
    Ok(base)
}


#[cfg(test)]
mod tests {
    use super::*;

    fn md(s: &str) -> String {
        let mut dom = HtmlDom::new();
        let div = markdown_to_dom(&mut dom, s).unwrap();
        dom.to_html_string(div)
    }

    #[test]
    fn t_text_to_anchor() {
        let mut s = String::new();
        text_to_anchor("Hello  World!", &mut s);
        assert_eq!(s, "hello-world_");
    }

    #[test]
    fn t_basic() {
        assert_eq!(md("Hello *world*"), "<div><p>Hello <em>world</em></p></div>");
        assert_eq!(md("# Title\n\n## Title\n"),
                   "<div><h1 id=\"title\">Title</h1><h2 id=\"title-2\">Title</h2></div>");
        assert_eq!(md("- a\n- b\n"), "<div><ul><li>a</li><li>b</li></ul></div>");
    }

    #[test]
    fn t_links_and_images() {
        assert_eq!(md("[x](https://example.com)"),
                   "<div><p><a href=\"https://example.com\">x</a></p></div>");
        assert_eq!(md("![alt text](a.png)"),
                   "<div><p><img src=\"a.png\" alt=\"alt text\"></p></div>");
    }

    #[test]
    fn t_code() {
        assert_eq!(md("`a<b`"), "<div><p><code>a&lt;b</code></p></div>");
        assert_eq!(md("```rust\nfn x() {}\n```\n"),
                   "<div><pre><code class=\"language-rust\">fn x() {}\n</code></pre></div>");
    }

    #[test]
    fn t_inline_html() {
        assert_eq!(md("a <b>bold</b> c"), "<div><p>a <b>bold</b> c</p></div>");
    }
}
