//! Argument bundles passed from a sweep driver to the per-node hooks.
//!
//! Buffers are addressed by nonzero index. An absent buffer (`None`) means the
//! quantity is not needed on this path and the node skips it silently.

use crate::expr::Expr;

/// Bit-packed dependency taint. Each bit is an independent direction; a set
/// bit means "depends on the seeded quantity".
pub type TaintBits = u64;

/// Buffers for one forward tangent direction.
pub struct TangentBuffers<'a, T> {
    /// Tangent of the dependency.
    pub seed: Option<&'a [T]>,
    /// Tangent of the node's output, overwritten.
    pub sens: Option<&'a mut [T]>,
}

/// Buffers for one reverse adjoint direction.
///
/// `seed` is the adjoint of the node's output. It is consumed: after the hook
/// returns it is zero. `sens` is the dependency adjoint, accumulated into.
pub struct AdjointBuffers<'a, T> {
    pub seed: Option<&'a mut [T]>,
    pub sens: Option<&'a mut [T]>,
}

/// Input to a node's symbolic derivative hook.
///
/// Dependency-indexed vectors have one entry per node dependency;
/// direction-indexed vectors one entry per requested direction.
#[derive(Clone, Debug, Default)]
pub struct SymbolicRequest {
    /// Concrete expression standing in for each dependency (`None` = absent).
    pub inputs: Vec<Option<Expr>>,
    /// Whether the node's output (and hence its forward sensitivities) is needed.
    pub output_wanted: bool,
    /// The caller already has the output and does not want it rebuilt.
    pub output_given: bool,
    /// `fwd_seeds[d][i]`: tangent of dependency `i` in direction `d`.
    pub fwd_seeds: Vec<Vec<Expr>>,
    /// `adj_seeds[d]`: adjoint of the output in direction `d`. Reset to the
    /// structural zero once consumed.
    pub adj_seeds: Vec<Expr>,
    /// `adj_sens[d][i]`: adjoint of dependency `i` in direction `d`, added to.
    pub adj_sens: Vec<Vec<Expr>>,
}

impl SymbolicRequest {
    /// Request for a node whose dependencies are the given expressions,
    /// with the output already known.
    pub fn given(inputs: Vec<Expr>) -> Self {
        SymbolicRequest {
            inputs: inputs.into_iter().map(Some).collect(),
            output_wanted: true,
            output_given: true,
            ..Default::default()
        }
    }
}

/// Output of a node's symbolic derivative hook.
#[derive(Clone, Debug, Default)]
pub struct SymbolicResult {
    /// Rebuilt output, when requested and not given.
    pub output: Option<Expr>,
    /// Forward sensitivity per direction (empty if the output was not wanted).
    pub fwd_sens: Vec<Expr>,
}
