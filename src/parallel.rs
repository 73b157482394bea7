use rayon::prelude::*;

use crate::error::Result;
use crate::float::Float;
use crate::function::Function;

impl Function {
    /// Parallel forward tangents: one independent sweep per direction.
    ///
    /// `seeds[d][i]` is the tangent of input `i` in direction `d`. Each sweep
    /// owns its buffers, so directions share nothing but the node tables.
    pub fn fwd_par<F: Float>(&self, seeds: &[Vec<Vec<F>>]) -> Result<Vec<Vec<Vec<F>>>> {
        seeds
            .par_iter()
            .map(|dir| self.fwd(&Self::seeds_as_slices(dir)))
            .collect()
    }

    /// Parallel adjoints: one reverse sweep per direction.
    ///
    /// `seeds[d][o]` is the adjoint of output `o` in direction `d`.
    pub fn adj_par<F: Float>(&self, seeds: &[Vec<Vec<F>>]) -> Result<Vec<Vec<Vec<F>>>> {
        seeds
            .par_iter()
            .map(|dir| self.adj(&Self::seeds_as_slices(dir)))
            .collect()
    }

    /// Parallel primal evaluation at many points.
    pub fn eval_par<F: Float>(&self, points: &[Vec<Vec<F>>]) -> Result<Vec<Vec<Vec<F>>>> {
        points
            .par_iter()
            .map(|args| self.eval(&Self::seeds_as_slices(args)))
            .collect()
    }
}
