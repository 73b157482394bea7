//! The selection (gather) node.
//!
//! Output nonzero `k` reads nonzero `assigns[k]` of the single dependency.
//! Several outputs may read the same input (fan-out). All numeric modes work
//! on flat buffers addressed by nonzero index:
//!
//! - primal and tangent: `out[k] = in[assigns[k]]`
//! - adjoint: `in_adj[assigns[k]] += out_adj[k]; out_adj[k] = 0`
//! - taint: forward copy, reverse OR-accumulate then clear
//!
//! When the graph is still symbolic, [`Selection::eval_symbolic`] builds new
//! nodes instead of numbers.

use std::fmt::{self, Write};
use std::sync::OnceLock;

use log::trace;
use num_traits::Zero;

use crate::codegen::{self, BufferId, CodegenOptions, ConstantPool, Statement};
use crate::error::{GraphError, Result};
use crate::expr::Expr;
use crate::grouping::IndexGrouping;
use crate::hooks::{AdjointBuffers, SymbolicRequest, SymbolicResult, TaintBits, TangentBuffers};
use crate::scatter;
use crate::sparsity::{DuplicatePolicy, Sparsity};

/// Gather node with one dependency and a validated source table.
pub struct Selection {
    dep: Expr,
    sparsity: Sparsity,
    assigns: Vec<usize>,
    grouping: OnceLock<IndexGrouping>,
}

impl Selection {
    pub(crate) fn new(dep: Expr, sparsity: Sparsity, assigns: Vec<usize>) -> Result<Self> {
        if assigns.len() != sparsity.nnz() {
            return Err(GraphError::ShapeMismatch {
                context: "selection table",
                expected: sparsity.nnz(),
                got: assigns.len(),
            });
        }
        let nnz = dep.nnz();
        if let Some(&index) = assigns.iter().find(|&&a| a >= nnz) {
            return Err(GraphError::NonzeroOutOfRange { index, nnz });
        }
        Ok(Selection {
            dep,
            sparsity,
            assigns,
            grouping: OnceLock::new(),
        })
    }

    /// Same table over a replacement dependency with an identical pattern.
    pub(crate) fn with_dependency(&self, dep: Expr) -> Self {
        debug_assert_eq!(dep.sparsity(), self.dep.sparsity());
        Selection {
            dep,
            sparsity: self.sparsity.clone(),
            assigns: self.assigns.clone(),
            grouping: self.grouping.clone(),
        }
    }

    #[inline]
    pub fn dependency(&self) -> &Expr {
        &self.dep
    }

    #[inline]
    pub fn sparsity(&self) -> &Sparsity {
        &self.sparsity
    }

    /// Source nonzero of each output nonzero.
    #[inline]
    pub fn assigns(&self) -> &[usize] {
        &self.assigns
    }

    /// Grouping of the table by source nonzero, built on first use.
    pub fn grouping(&self) -> &IndexGrouping {
        self.grouping
            .get_or_init(|| IndexGrouping::build(&self.assigns, self.dep.nnz()))
    }

    /// Output pattern equals the dependency's and every nonzero maps to itself.
    pub fn is_identity(&self) -> bool {
        self.sparsity == *self.dep.sparsity()
            && self.assigns.iter().enumerate().all(|(k, &a)| a == k)
    }

    /// Dense row-major view: for each output element, the dependency nonzero
    /// it reads, or `None` where the output stores nothing.
    pub fn mapping(&self) -> Vec<Option<usize>> {
        let mut dense = vec![None; self.sparsity.numel()];
        for (k, &a) in self.assigns.iter().enumerate() {
            dense[self.sparsity.element(k)] = Some(a);
        }
        dense
    }

    fn gather<T: Clone>(&self, src: Option<&[T]>, dst: Option<&mut [T]>) {
        if let (Some(src), Some(dst)) = (src, dst) {
            for (k, &a) in self.assigns.iter().enumerate() {
                dst[k] = src[a].clone();
            }
        }
    }

    /// Primal gather. Skipped when either buffer is absent.
    pub fn eval_primal<T: Clone>(&self, input: Option<&[T]>, output: Option<&mut [T]>) {
        self.gather(input, output);
    }

    /// Forward tangent for one direction: the same gather on the seed.
    pub fn eval_tangent<T: Clone>(&self, seed: Option<&[T]>, sens: Option<&mut [T]>) {
        self.gather(seed, sens);
    }

    /// Reverse adjoint for one direction.
    ///
    /// Accumulates the output adjoint into the dependency adjoint and zeroes
    /// the output adjoint, so revisiting the same buffer cannot double count.
    /// `seed` and `sens` must be distinct buffers.
    pub fn eval_adjoint<T: Clone + Zero>(&self, seed: Option<&mut [T]>, sens: Option<&mut [T]>) {
        if let (Some(seed), Some(sens)) = (seed, sens) {
            for (k, &a) in self.assigns.iter().enumerate() {
                sens[a] = sens[a].clone() + seed[k].clone();
                seed[k] = T::zero();
            }
        }
    }

    /// Primal, all forward directions and all adjoint directions in one call.
    pub fn evaluate<T: Clone + Zero>(
        &self,
        input: Option<&[T]>,
        output: Option<&mut [T]>,
        fwd: &mut [TangentBuffers<'_, T>],
        adj: &mut [AdjointBuffers<'_, T>],
    ) {
        self.eval_primal(input, output);
        for dir in fwd.iter_mut() {
            self.eval_tangent(dir.seed, dir.sens.as_deref_mut());
        }
        for dir in adj.iter_mut() {
            self.eval_adjoint(dir.seed.as_deref_mut(), dir.sens.as_deref_mut());
        }
    }

    /// Dependency propagation. Forward copies taint to the outputs; reverse
    /// ORs output taint into the inputs and clears it.
    pub fn propagate_taint(
        &self,
        input: Option<&mut [TaintBits]>,
        output: Option<&mut [TaintBits]>,
        forward: bool,
    ) {
        let (Some(input), Some(output)) = (input, output) else {
            return;
        };
        if forward {
            for (k, &a) in self.assigns.iter().enumerate() {
                output[k] = input[a];
            }
        } else {
            for (k, &a) in self.assigns.iter().enumerate() {
                input[a] |= output[k];
                output[k] = 0;
            }
        }
    }

    /// Symbolic evaluation and differentiation.
    ///
    /// Forward directions (and the output, unless given) become new
    /// selections over the concrete seeds, keeping only the entries each seed
    /// actually stores. Each adjoint direction becomes one scatter-accumulate
    /// node added onto `adj_sens[d][0]`. Every adjoint seed is reset to the
    /// structural zero afterwards.
    pub fn eval_symbolic(&self, req: &mut SymbolicRequest) -> Result<SymbolicResult> {
        if req.inputs.len() != 1 {
            return Err(GraphError::ShapeMismatch {
                context: "selection inputs",
                expected: 1,
                got: req.inputs.len(),
            });
        }
        if req.adj_sens.len() != req.adj_seeds.len() {
            return Err(GraphError::ShapeMismatch {
                context: "adjoint sensitivity directions",
                expected: req.adj_seeds.len(),
                got: req.adj_sens.len(),
            });
        }
        for seeds in &req.fwd_seeds {
            check_single(seeds.len(), "forward seed dependencies")?;
        }
        for sens in &req.adj_sens {
            check_single(sens.len(), "adjoint sensitivity dependencies")?;
        }

        let (rows, cols) = self.sparsity.shape();
        let mut result = SymbolicResult::default();

        if req.output_wanted {
            match req.inputs[0].as_ref() {
                Some(input) => {
                    let isp = self.dep.sparsity();
                    let el_known: Vec<usize> = self
                        .grouping()
                        .inputs()
                        .iter()
                        .map(|&i| isp.element(i))
                        .collect();

                    if !req.output_given {
                        result.output = Some(self.rebuild_gather(input, &el_known)?);
                    }

                    for (d, seeds) in req.fwd_seeds.iter().enumerate() {
                        let sens = self.rebuild_gather(&seeds[0], &el_known)?;
                        trace!(
                            "selection forward direction {}: {} of {} nonzeros kept",
                            d,
                            sens.nnz(),
                            self.sparsity.nnz()
                        );
                        result.fwd_sens.push(sens);
                    }

                    for d in 0..req.adj_seeds.len() {
                        if let Some(contribution) = self.scatter_adjoint(&req.adj_seeds[d])? {
                            trace!(
                                "selection adjoint direction {}: scatter onto {} nonzeros",
                                d,
                                contribution.nnz()
                            );
                            req.adj_sens[d][0] = req.adj_sens[d][0].add(&contribution)?;
                        }
                    }
                }
                None => {
                    if !req.output_given {
                        result.output = Some(Expr::zeros(rows, cols));
                    }
                    result.fwd_sens = req.fwd_seeds.iter().map(|_| Expr::zeros(rows, cols)).collect();
                }
            }
        }

        for seed in req.adj_seeds.iter_mut() {
            *seed = Expr::zeros(seed.rows(), seed.cols());
        }
        Ok(result)
    }

    /// New selection reading from `source`, restricted to the entries of
    /// `source` that exist. `el_known[j]` is the dependency element of grouped
    /// pair `j`.
    fn rebuild_gather(&self, source: &Expr, el_known: &[usize]) -> Result<Expr> {
        self.dep
            .sparsity()
            .check_same_shape(source.sparsity(), "selection input")?;
        let osp = &self.sparsity;
        let outputs = self.grouping().outputs();
        let matches = source.sparsity().nonzeros_of_elements(el_known);

        let mut rows = Vec::new();
        let mut cols = Vec::new();
        let mut src_nz = Vec::new();
        for (j, m) in matches.into_iter().enumerate() {
            if let Some(nz) = m {
                let (r, c) = osp.coordinates(outputs[j]);
                rows.push(r);
                cols.push(c);
                src_nz.push(nz);
            }
        }
        if src_nz.is_empty() {
            return Ok(Expr::zeros(osp.rows(), osp.cols()));
        }

        let (sp, mapping) =
            Sparsity::from_triplets_mapped(osp.rows(), osp.cols(), &rows, &cols, DuplicatePolicy::Reject)?;
        let mut assigns = vec![0usize; sp.nnz()];
        for (t, &nz) in mapping.iter().enumerate() {
            assigns[nz] = src_nz[t];
        }
        Expr::select(Some(source), sp, assigns)
    }

    /// Scatter of an output-shaped adjoint seed onto the dependency shape.
    fn scatter_adjoint(&self, seed: &Expr) -> Result<Option<Expr>> {
        self.sparsity
            .check_same_shape(seed.sparsity(), "selection adjoint seed")?;
        let isp = self.dep.sparsity();
        let el_wanted: Vec<usize> = (0..self.sparsity.nnz())
            .map(|k| self.sparsity.element(k))
            .collect();
        let matches = seed.sparsity().nonzeros_of_elements(&el_wanted);

        let mut sources = Vec::new();
        let mut rows = Vec::new();
        let mut cols = Vec::new();
        for (k, m) in matches.into_iter().enumerate() {
            if let Some(onz) = m {
                let (r, c) = isp.coordinates(self.assigns[k]);
                sources.push(onz);
                rows.push(r);
                cols.push(c);
            }
        }
        scatter::scatter_onto(seed, isp.shape(), sources, &rows, &cols)
    }

    /// Emit a zero fill of the output followed by the grouped accumulation.
    pub fn emit(
        &self,
        stmts: &mut Vec<Statement>,
        pool: &mut ConstantPool,
        arg: BufferId,
        res: BufferId,
        options: &CodegenOptions,
    ) {
        let out_len = self.sparsity.nnz();
        stmts.push(Statement::Clear { dst: res, len: out_len });
        let g = self.grouping();
        codegen::emit_accumulate(
            stmts,
            pool,
            options,
            (arg, self.dep.nnz()),
            (res, out_len),
            g.inputs(),
            g.outputs(),
        );
    }

    /// Debug rendering, including the dependency.
    pub fn describe(&self, out: &mut dyn Write) -> fmt::Result {
        let sp = &self.sparsity;
        if sp.numel() == 1 && sp.nnz() == 1 {
            if self.dep.sparsity().numel() > 1 {
                return write!(out, "{}[{}]", self.dep, self.assigns[0]);
            }
            return write!(out, "{}", self.dep);
        }
        write!(out, "mapping({} matrix, dependencies: [{}], nonzeros: [", sp, self.dep)?;
        for (k, a) in self.assigns.iter().enumerate() {
            if k > 0 {
                out.write_char(',')?;
            }
            write!(out, "{}", a)?;
        }
        out.write_str("])")
    }
}

fn check_single(got: usize, context: &'static str) -> Result<()> {
    if got != 1 {
        return Err(GraphError::ShapeMismatch {
            context,
            expected: 1,
            got,
        });
    }
    Ok(())
}

impl fmt::Debug for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selection")
            .field("sparsity", &self.sparsity)
            .field("assigns", &self.assigns)
            .field("dependency_nnz", &self.dep.nnz())
            .finish()
    }
}
