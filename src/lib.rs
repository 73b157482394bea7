pub mod codegen;
pub mod error;
pub mod expr;
pub mod float;
pub mod function;
pub mod grouping;
pub mod hooks;
#[cfg(feature = "parallel")]
mod parallel;
pub mod scatter;
pub mod selection;
pub mod sparsity;

pub use codegen::{BufferId, CodegenOptions, ConstHandle, ConstantPool, Program, Statement};
pub use error::{GraphError, Result};
pub use expr::{simplify_all, Expr, Op};
pub use float::Float;
pub use function::Function;
pub use grouping::IndexGrouping;
pub use hooks::{AdjointBuffers, SymbolicRequest, SymbolicResult, TaintBits, TangentBuffers};
pub use scatter::{ScatterAdd, ScatterTerm};
pub use selection::Selection;
pub use sparsity::{DuplicatePolicy, Sparsity};
