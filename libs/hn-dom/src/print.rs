//! Serialisation to HTML text.

use std::{cell::RefMut, io::Write};
use anyhow::Result;

use crate::{dom::{HtmlDom, Node, NodeId}, meta};

impl HtmlDom {
    /// `bytes` must represent proper UTF-8,
    /// e.g. string.as_bytes(). The resulting reference must be
    /// dropped before calling html_escape again, or there will be a
    /// panic.
    pub fn html_escape(&self, bytes: &[u8]) -> RefMut<Vec<u8>> {
        let mut bufref = self.html_escape_tmp.borrow_mut();
        let buf = &mut *bufref;
        buf.clear();
        for b in bytes {
            match b {
                b'&' => buf.extend_from_slice(b"&amp;"),
                b'<' => buf.extend_from_slice(b"&lt;"),
                b'>' => buf.extend_from_slice(b"&gt;"),
                b'"' => buf.extend_from_slice(b"&quot;"),
                b'\'' => buf.extend_from_slice(b"&#39;"),
                _=> buf.push(*b)
            }
        }
        bufref
    }

    /// Print `id` including its own markup.
    pub fn print_html_fragment(&self, id: NodeId, out: &mut impl Write) -> Result<()> {
        match self.node(id) {
            Node::Element(e) => {
                out.write_all(b"<")?;
                out.write_all(e.name.as_bytes())?;
                for (k, v) in &e.attr {
                    out.write_all(b" ")?;
                    out.write_all(k.as_bytes())?;
                    out.write_all(b"=\"")?;
                    out.write_all(&self.html_escape(v.as_bytes()))?;
                    out.write_all(b"\"")?;
                }
                out.write_all(b">")?;
                if meta::has_closing_tag(&e.name) {
                    if meta::is_raw_text(&e.name) {
                        for c in self.children(id) {
                            if let Node::Text(s) = self.node(*c) {
                                out.write_all(s.as_bytes())?;
                            }
                        }
                    } else {
                        self.print_inner_html(id, out)?;
                    }
                    out.write_all(b"</")?;
                    out.write_all(e.name.as_bytes())?;
                    out.write_all(b">")?;
                }
            }
            Node::Text(s) => out.write_all(&self.html_escape(s.as_bytes()))?,
            Node::Comment(s) => {
                out.write_all(b"<!--")?;
                out.write_all(s.as_bytes())?;
                out.write_all(b"-->")?;
            }
            Node::Fragment => self.print_inner_html(id, out)?,
        }
        Ok(())
    }

    /// Print the children of `id`.
    pub fn print_inner_html(&self, id: NodeId, out: &mut impl Write) -> Result<()> {
        for c in self.children(id) {
            self.print_html_fragment(*c, out)?;
        }
        Ok(())
    }

    pub fn to_html_string(&self, id: NodeId) -> String {
        let mut v = Vec::new();
        self.print_html_fragment(id, &mut v).expect("no I/O errors can happen");
        // Safe because v was filled from bytes derived from
        // String/str values and byte string literals that were simply
        // concatenated together.
        unsafe { String::from_utf8_unchecked(v) }
    }

    pub fn inner_html(&self, id: NodeId) -> String {
        let mut v = Vec::new();
        self.print_inner_html(id, &mut v).expect("no I/O errors can happen");
        unsafe { String::from_utf8_unchecked(v) }
    }

    /// The whole tree.
    pub fn to_document_string(&self) -> String {
        self.to_html_string(self.root())
    }
}
