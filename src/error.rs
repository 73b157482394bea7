//! Error type shared by graph construction, symbolic re-derivation and the sweep driver.

use thiserror::Error;

/// Errors raised while building or sweeping an expression graph.
///
/// Every variant signals a programming error in graph construction. They are
/// raised synchronously at the offending call and are never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// A length or dimension did not match what the receiver declared.
    #[error("shape mismatch in {context}: expected {expected}, got {got}")]
    ShapeMismatch {
        context: &'static str,
        expected: usize,
        got: usize,
    },

    /// A sparsity coordinate lies outside the matrix shape.
    #[error("invalid coordinate ({row}, {col}) for a {rows}-by-{cols} matrix")]
    InvalidCoordinate {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    /// A coordinate was repeated where duplicates are rejected.
    #[error("duplicate coordinate ({row}, {col})")]
    DuplicateCoordinate { row: usize, col: usize },

    /// A mapping table refers to a nonzero the source does not have.
    #[error("nonzero index {index} out of range for a pattern with {nnz} nonzeros")]
    NonzeroOutOfRange { index: usize, nnz: usize },

    /// A dependency was required but none was supplied.
    #[error("dangling dependency: a node with a nonempty mapping needs a dependency")]
    DanglingDependency,

    /// The request cannot be represented by the receiving node or driver.
    #[error("unsupported configuration: {0}")]
    UnsupportedConfiguration(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GraphError>;
