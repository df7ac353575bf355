//! Host-side seams: class lookup and byte-level codec.

use crate::node::ClassNode;

/// Failure at the tree/bytes boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    /// The byte stream could not be parsed into a class tree.
    #[error("malformed class {name}: {reason}")]
    MalformedClass {
        /// Binary name the host asked to parse.
        name: String,
        /// Host-provided diagnostic.
        reason: String,
    },
    /// The tree could not be serialized.
    #[error("unemittable class {name}: {reason}")]
    Unemittable {
        /// Internal name of the failing tree.
        name: String,
        /// Host-provided diagnostic.
        reason: String,
    },
}

/// Provides class trees for dependency lookups during hierarchy queries.
///
/// Implementations typically front a class loader or a class-path scanner.
/// Returning `None` is an expected outcome for runtime-absent classes and
/// is cached by the metadata layer.
pub trait ClassSource {
    /// The tree for an internal class name, if the class can be found.
    fn class_node(&self, internal_name: &str) -> Option<ClassNode>;
}

/// Parses and emits class bytes at the transformer boundary.
pub trait TreeCodec {
    /// Parse class bytes into a tree.
    fn parse(&self, name: &str, bytes: &[u8]) -> Result<ClassNode, TreeError>;

    /// Serialize a tree back to class bytes.
    fn emit(&self, node: &ClassNode) -> Result<Vec<u8>, TreeError>;
}

/// A source that knows no classes. Useful for tests exercising the
/// missing-class paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSource;

impl ClassSource for NullSource {
    fn class_node(&self, _internal_name: &str) -> Option<ClassNode> {
        None
    }
}
