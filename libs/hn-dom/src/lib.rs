//! Mutable HTML trees, for hydrating markup in place.

pub mod meta;
pub mod dom;
pub mod print;
pub mod parse;

pub use dom::{HtmlDom, NodeId, Node, Element};

// https://www.w3.org/International/questions/qa-byte-order-mark#problems
pub const BOM: &str = "\u{FEFF}";

#[cfg(test)]
#[test]
fn t_file_encoding() {
    assert_eq!(BOM.as_bytes(), &[0xEF, 0xBB, 0xBF]);
}
