//! What the serialiser and parser need to know about HTML elements.

use std::collections::HashSet;
use lazy_static::lazy_static;

// https://html.spec.whatwg.org/multipage/syntax.html#void-elements
const VOID_ELEMENT_NAMES: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link",
    "meta", "source", "track", "wbr",
];

// Their content is tokenized as text (the tokenizer's script data and
// raw text states), and not escaped when serialising.
const RAW_TEXT_ELEMENT_NAMES: &[&str] = &[
    "script", "style", "iframe", "xmp", "noembed", "noframe", "noscript",
];

lazy_static!{
    static ref VOID_ELEMENTS: HashSet<&'static str> =
        VOID_ELEMENT_NAMES.iter().copied().collect();
    static ref RAW_TEXT_ELEMENTS: HashSet<&'static str> =
        RAW_TEXT_ELEMENT_NAMES.iter().copied().collect();
}

/// False for void elements like `img`, which never have a body nor
/// an end tag.
pub fn has_closing_tag(tag_name: &str) -> bool {
    ! VOID_ELEMENTS.contains(tag_name)
}

pub fn is_raw_text(tag_name: &str) -> bool {
    RAW_TEXT_ELEMENTS.contains(tag_name)
}
