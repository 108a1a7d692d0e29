//! Tony is a human-friendly configuration format that round-trips through
//! three surface syntaxes: Tony itself, YAML, and JSON. All three are parsed
//! into one neutral in-memory tree (the IR), and the IR encodes back into any
//! of them.
//!
//! The pipeline is: bytes -> [`Scanner`] -> raw tokens -> [`balance`] ->
//! bracketed tokens -> [`Builder`] -> IR -> [`associate`] -> final IR, and in
//! reverse through [`Encoder`]. The [`snapshot`] module adds a random-access
//! archive codec for large trees.
//!
//! ```
//! let tree = tony::parse(b"a: 1\nb:\n  c: 2\n").unwrap();
//! let out = tony::encode(&tree, &tony::EncodeOptions::default()).unwrap();
//! assert_eq!(out, "a: 1\nb:\n  c: 2\n");
//! ```
#![warn(clippy::pedantic)]
#![allow(
    clippy::cast_lossless,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::manual_range_contains,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::needless_pass_by_value,
    clippy::struct_excessive_bools,
    clippy::too_many_lines,
    clippy::match_wildcard_for_single_variants
)]
#![deny(unsafe_code)]

#[macro_use]
mod macros;

mod api;
mod balancer;
mod builder;
mod comment;
mod encoder;
mod error;
mod node;
mod position;
mod scanner;
pub mod snapshot;
pub mod tag;
mod token;

pub use crate::api::*;
pub use crate::balancer::balance;
pub use crate::builder::{Builder, PositionMap};
pub use crate::comment::associate;
pub use crate::encoder::{ColorAttr, Encoder, Span};
pub use crate::error::*;
pub use crate::node::*;
pub use crate::position::{Position, PositionDoc};
pub use crate::scanner::{tokenize, ScanBatch, ScanStatus, Scanner};
pub use crate::token::*;

/// The tag marking a container that was written in bracketed form.
pub const BRACKET_TAG: &str = "!bracket";
/// The tag marking an integer-keyed object that stands for a sparse array.
pub const SPARSE_ARRAY_TAG: &str = "!sparsearray";
/// The snapshot-index tag for an `[offset, size]` leaf.
pub const SNAP_LOC_TAG: &str = "!snap-loc";
/// The snapshot-index tag for a chunked run of container children.
pub const SNAP_RANGE_TAG: &str = "!snap-range";
/// The tag composed onto a container whose snapshot index is chunked.
pub const SNAP_CHUNKS_TAG: &str = "!snap-chunks";
/// The tag naming the identifying field of array elements.
pub const KEY_TAG: &str = "!key";

/// The surface syntax a scanner or encoder speaks.
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[non_exhaustive]
pub enum Format {
    /// The Tony surface: strict two-space indentation, tags, comments.
    #[default]
    Tony = 0,
    /// The YAML surface: variable indentation, a pragmatic YAML subset.
    Yaml = 1,
    /// The JSON surface: explicit brackets only.
    Json = 2,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanity() {
        const SANITY_INPUT: &str = "\
name: sanity
counts:
  - 1
  - 2
settings:
  quoted: 'single'
  flag: true
";
        let tree = parse(SANITY_INPUT.as_bytes()).unwrap();
        let root = tree.root.expect("non-empty document");
        let keys = tree.object_keys(root).unwrap();
        assert_eq!(keys.len(), 3);
    }

    #[test]
    fn empty_input_is_null() {
        let tree = parse(b"").unwrap();
        let root = tree.root.unwrap();
        assert!(matches!(tree.get(root).data, NodeData::Null));
    }

    #[test]
    fn lone_comment_document() {
        let tree = parse(b"# just a note\n").unwrap();
        let root = tree.root.unwrap();
        match &tree.get(root).data {
            NodeData::Comment { lines, values, .. } => {
                assert_eq!(lines, &["just a note"]);
                assert!(values.is_empty());
            }
            other => panic!("expected comment node, got {other:?}"),
        }
    }

    #[test]
    fn nullable_is_a_literal() {
        let tree = parse(b"nullable\n").unwrap();
        let root = tree.root.unwrap();
        match &tree.get(root).data {
            NodeData::Str(s) => assert_eq!(s, "nullable"),
            other => panic!("expected string, got {other:?}"),
        }
    }
}
