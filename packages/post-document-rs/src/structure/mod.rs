//! Conversion between body text and the structural tree edited by the visual view.
//!
//! `to_text(to_structure(t))` is the canonical form of `t`; two bodies are
//! semantically equal when their canonical forms match.

mod emit;
mod node;
mod parse;

pub use node::{ImageNode, Node};

use crate::options::DEFAULT_IMAGE_ROUTE_PREFIX;

const SAME_DIR_MARKER: &str = "./";

/// Parses body text, resolving `./` image references against `context_path`
/// through the default image route.
pub fn to_structure(body: &str, context_path: Option<&str>) -> Node {
    to_structure_with_prefix(body, context_path, DEFAULT_IMAGE_ROUTE_PREFIX)
}

pub fn to_structure_with_prefix(body: &str, context_path: Option<&str>, route_prefix: &str) -> Node {
    parse::TreeBuilder::new(context_path, route_prefix).build(body)
}

/// Writes a tree back as body text. Images emit their body-text reference.
pub fn to_text(tree: &Node) -> String {
    emit::write_document(tree)
}

pub fn canonical_text(body: &str) -> String {
    to_text(&to_structure(body, None))
}

pub fn semantically_equal(a: &str, b: &str) -> bool {
    a == b || canonical_text(a) == canonical_text(b)
}

/// Directory part of a document path, with a trailing `/` when non-empty.
pub fn document_dir(context_path: &str) -> &str {
    let trimmed = context_path.trim_start_matches('/');
    match trimmed.rfind('/') {
        Some(index) => &trimmed[..=index],
        None => "",
    }
}

/// Display reference for a same-directory image, or `None` when the reference is
/// used verbatim.
pub fn resolve_display_src(src: &str, context_path: Option<&str>, route_prefix: &str) -> Option<String> {
    let relative = src.strip_prefix(SAME_DIR_MARKER)?;
    let context_path = context_path?;
    Some(format!("{route_prefix}{}{relative}", document_dir(context_path)))
}
