//! Building trees from HTML text via the html5gum tokenizer.
//!
//! This is not a full HTML5 tree builder: there's no implicit
//! opening of elements, and unbalanced end tags close up to the
//! nearest open element of the same name (or are dropped). Attribute
//! order follows the tokenizer, which sorts them by name. The content
//! of `script`, `style`, `textarea` and similar elements is text; a
//! `<` in there doesn't start a tag.

use anyhow::Result;
use html5gum::{DefaultEmitter, Token, Tokenizer, HtmlString};
use hn_util::warn;
use kstring::KString;

use crate::{dom::{HtmlDom, NodeId}, meta};

/// This can fail on invalid UTF-8.
fn kstring(s: HtmlString) -> Result<KString> {
    Ok(KString::from_string(String::from_utf8(s.0)?))
}

impl HtmlDom {
    /// Parse `s` into a new, detached fragment node.
    pub fn parse_fragment(&mut self, s: &str) -> Result<NodeId> {
        let frag = self.new_fragment();
        // Open elements, innermost last:
        let mut context: Vec<NodeId> = vec![frag];
        macro_rules! current {
            () => {
                *context.last().expect("at least base frame")
            }
        }
        let mut emitter = DefaultEmitter::default();
        emitter.switch_states(true);
        for token in Tokenizer::new_with_emitter(s, emitter).infallible() {
            match token {
                Token::StartTag(starttag) => {
                    let name: &str = std::str::from_utf8(&**starttag.name)?;
                    let mut attr = Vec::new();
                    for (k, v) in starttag.attributes {
                        attr.push((kstring(k)?, kstring(v)?));
                    }
                    let elt = self.new_element(name, attr);
                    self.append_child(current!(), elt)?;
                    if ! starttag.self_closing && meta::has_closing_tag(name) {
                        context.push(elt);
                    }
                }
                Token::EndTag(endtag) => {
                    let name: &str = std::str::from_utf8(&**endtag.name)?;
                    if let Some(i) = context.iter().rposition(
                        |n| self.tag_name(*n) == Some(name))
                    {
                        if i + 1 != context.len() {
                            warn!("end tag {name:?} closes {} unclosed element(s)",
                                  context.len() - i - 1);
                        }
                        context.truncate(i);
                    } else if meta::has_closing_tag(name) {
                        warn!("dropping end tag {name:?} without start tag");
                    }
                }
                Token::String(s) => {
                    let t = self.new_text(kstring(s)?);
                    self.append_child(current!(), t)?;
                }
                Token::Comment(s) => {
                    let c = self.new_comment(kstring(s)?);
                    self.append_child(current!(), c)?;
                }
                Token::Doctype(_) => (),
                Token::Error(e) => {
                    warn!("HTML5 parsing error: {e}");
                }
            }
        }
        if context.len() > 1 {
            warn!("{} non-closed element(s) at end of HTML input",
                  context.len() - 1);
        }
        Ok(frag)
    }

    /// Parse `s` into a fresh tree.
    pub fn parse_document(s: &str) -> Result<HtmlDom> {
        let mut dom = HtmlDom::new();
        let frag = dom.parse_fragment(s)?;
        dom.append_child(dom.root(), frag)?;
        Ok(dom)
    }
}


#[cfg(test)]
mod tests {
    use crate::HtmlDom;

    #[test]
    fn t_parse() {
        let src = "<hn-query kind=\"1\" limit=\"2\"><hn-element>\
                   <slot name=\"content\"></slot><img src=\"a.png\"></hn-element>\
                   </hn-query><p>a &amp; b</p>";
        let dom = HtmlDom::parse_document(src).unwrap();
        let root = dom.root();
        let q = dom.first_element_child(root).unwrap();
        assert_eq!(dom.tag_name(q), Some("hn-query"));
        assert_eq!(dom.attribute(q, "limit"), Some("2"));
        let elt = dom.first_element_child(q).unwrap();
        assert_eq!(dom.child_elements(elt).len(), 2);
        assert_eq!(dom.to_document_string(),
                   "<hn-query kind=\"1\" limit=\"2\"><hn-element>\
                    <slot name=\"content\"></slot><img src=\"a.png\"></hn-element>\
                    </hn-query><p>a &amp; b</p>");
    }

    #[test]
    fn t_parse_lenient() {
        let dom = HtmlDom::parse_document("<div><p>x</div><span/>y</b>").unwrap();
        assert_eq!(dom.to_document_string(),
                   "<div><p>x</p></div><span></span>y");
    }

    #[test]
    fn t_parse_raw_text() {
        let src = "<script>if (a<b && c>d) { x(\"</p>\") }</script>\
                   <style>p > b { color: red }</style><p>after</p>";
        let dom = HtmlDom::parse_document(src).unwrap();
        let root = dom.root();
        let elements = dom.child_elements(root);
        assert_eq!(elements.len(), 3);
        let script = elements[0];
        assert_eq!(dom.children(script).len(), 1);
        assert_eq!(dom.text_content(script), "if (a<b && c>d) { x(\"</p>\") }");
        assert_eq!(dom.text_content(elements[1]), "p > b { color: red }");
        assert_eq!(dom.to_document_string(), src);
    }

    #[test]
    fn t_parse_textarea() {
        let dom = HtmlDom::parse_document("<textarea name=\"t\">a <b>c</b> &amp;</textarea>")
            .unwrap();
        let ta = dom.first_element_child(dom.root()).unwrap();
        assert_eq!(dom.children(ta).len(), 1);
        assert_eq!(dom.text_content(ta), "a <b>c</b> &");
        assert_eq!(dom.to_document_string(),
                   "<textarea name=\"t\">a &lt;b&gt;c&lt;/b&gt; &amp;</textarea>");
    }

    #[test]
    fn t_parse_comment() {
        let dom = HtmlDom::parse_document("a<!-- c -->b").unwrap();
        assert_eq!(dom.to_document_string(), "a<!-- c -->b");
        assert_eq!(dom.text_content(dom.root()), "ab");
    }
}
