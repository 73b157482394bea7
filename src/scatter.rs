//! The scatter-accumulate node, dual of [`Selection`](crate::selection::Selection).
//!
//! Each term reads nonzeros `sources[j]` of its dependency and adds them into
//! output nonzeros `targets[j]`. Targets may repeat, within a term and across
//! terms; repeated targets are summed. The output is zero-filled first.

use std::fmt::{self, Write};

use log::trace;
use num_traits::Zero;

use crate::codegen::{self, BufferId, CodegenOptions, ConstantPool, Statement};
use crate::error::{GraphError, Result};
use crate::expr::Expr;
use crate::hooks::{SymbolicRequest, SymbolicResult, TaintBits};
use crate::sparsity::{DuplicatePolicy, Sparsity};

/// One dependency of a [`ScatterAdd`] with its source/target tables.
#[derive(Clone, Debug)]
pub struct ScatterTerm {
    dep: Expr,
    sources: Vec<usize>,
    targets: Vec<usize>,
}

impl ScatterTerm {
    /// Tables are validated when the term is attached to a node.
    pub fn new(dep: Expr, sources: Vec<usize>, targets: Vec<usize>) -> Self {
        ScatterTerm {
            dep,
            sources,
            targets,
        }
    }

    #[inline]
    pub fn dependency(&self) -> &Expr {
        &self.dep
    }

    #[inline]
    pub fn sources(&self) -> &[usize] {
        &self.sources
    }

    #[inline]
    pub fn targets(&self) -> &[usize] {
        &self.targets
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Scatter-accumulate node over one or more dependencies.
#[derive(Debug)]
pub struct ScatterAdd {
    sparsity: Sparsity,
    terms: Vec<ScatterTerm>,
}

impl ScatterAdd {
    pub(crate) fn new(sparsity: Sparsity, terms: Vec<ScatterTerm>) -> Result<Self> {
        let nnz = sparsity.nnz();
        for term in &terms {
            if term.sources.len() != term.targets.len() {
                return Err(GraphError::ShapeMismatch {
                    context: "scatter target table",
                    expected: term.sources.len(),
                    got: term.targets.len(),
                });
            }
            let dep_nnz = term.dep.nnz();
            if let Some(&index) = term.sources.iter().find(|&&s| s >= dep_nnz) {
                return Err(GraphError::NonzeroOutOfRange { index, nnz: dep_nnz });
            }
            if let Some(&index) = term.targets.iter().find(|&&t| t >= nnz) {
                return Err(GraphError::NonzeroOutOfRange { index, nnz });
            }
        }
        Ok(ScatterAdd { sparsity, terms })
    }

    /// Same tables over replacement dependencies with identical patterns.
    pub(crate) fn with_dependencies(&self, deps: Vec<Expr>) -> Self {
        let terms = self
            .terms
            .iter()
            .zip(deps)
            .map(|(t, dep)| ScatterTerm::new(dep, t.sources.clone(), t.targets.clone()))
            .collect();
        ScatterAdd {
            sparsity: self.sparsity.clone(),
            terms,
        }
    }

    #[inline]
    pub fn sparsity(&self) -> &Sparsity {
        &self.sparsity
    }

    #[inline]
    pub fn terms(&self) -> &[ScatterTerm] {
        &self.terms
    }

    fn scatter<T: Clone + Zero>(&self, inputs: &[Option<&[T]>], output: Option<&mut [T]>) {
        let Some(output) = output else {
            return;
        };
        for v in output.iter_mut() {
            *v = T::zero();
        }
        for (term, input) in self.terms.iter().zip(inputs) {
            if let Some(input) = input {
                accumulate_term(term, input, output);
            }
        }
    }

    /// Primal scatter. Absent inputs contribute nothing; an absent output skips.
    pub fn eval_primal<T: Clone + Zero>(&self, inputs: &[Option<&[T]>], output: Option<&mut [T]>) {
        self.scatter(inputs, output);
    }

    /// Forward tangent for one direction.
    pub fn eval_tangent<T: Clone + Zero>(&self, seeds: &[Option<&[T]>], sens: Option<&mut [T]>) {
        self.scatter(seeds, sens);
    }

    /// Adjoint of term `i` only, without clearing the seed.
    ///
    /// Drivers whose dependencies may coincide call this per term and clear
    /// the seed themselves.
    pub fn accumulate_adjoint_term<T: Clone + Zero>(&self, i: usize, seed: &[T], sens: &mut [T]) {
        let term = &self.terms[i];
        for (&s, &t) in term.sources.iter().zip(&term.targets) {
            sens[s] = sens[s].clone() + seed[t].clone();
        }
    }

    /// Reverse adjoint for one direction. `sens` holds one buffer per term;
    /// the seed is zeroed once every term has read it.
    pub fn eval_adjoint<T: Clone + Zero>(&self, seed: Option<&mut [T]>, sens: &mut [Option<&mut [T]>]) {
        let Some(seed) = seed else {
            return;
        };
        for (i, s) in sens.iter_mut().enumerate().take(self.terms.len()) {
            if let Some(s) = s.as_deref_mut() {
                self.accumulate_adjoint_term(i, seed, s);
            }
        }
        for v in seed.iter_mut() {
            *v = T::zero();
        }
    }

    /// Forward taint of one term, ORed into the output.
    pub fn taint_forward_term(&self, i: usize, input: &[TaintBits], output: &mut [TaintBits]) {
        let term = &self.terms[i];
        for (&s, &t) in term.sources.iter().zip(&term.targets) {
            output[t] |= input[s];
        }
    }

    /// Reverse taint of one term, ORed into the input. The output is not cleared.
    pub fn taint_reverse_term(&self, i: usize, input: &mut [TaintBits], output: &[TaintBits]) {
        let term = &self.terms[i];
        for (&s, &t) in term.sources.iter().zip(&term.targets) {
            input[s] |= output[t];
        }
    }

    /// Dependency propagation over all terms. Forward resets then ORs into
    /// the output; reverse ORs into each input and clears the output.
    pub fn propagate_taint(
        &self,
        inputs: &mut [Option<&mut [TaintBits]>],
        output: Option<&mut [TaintBits]>,
        forward: bool,
    ) {
        let Some(output) = output else {
            return;
        };
        if forward {
            output.fill(0);
            for (i, input) in inputs.iter().enumerate().take(self.terms.len()) {
                if let Some(input) = input.as_deref() {
                    self.taint_forward_term(i, input, output);
                }
            }
        } else {
            for (i, input) in inputs.iter_mut().enumerate().take(self.terms.len()) {
                if let Some(input) = input.as_deref_mut() {
                    self.taint_reverse_term(i, input, output);
                }
            }
            output.fill(0);
        }
    }

    /// Symbolic evaluation and differentiation, same contract as
    /// [`Selection::eval_symbolic`](crate::selection::Selection::eval_symbolic)
    /// with one entry per term in every dependency-indexed vector.
    pub fn eval_symbolic(&self, req: &mut SymbolicRequest) -> Result<SymbolicResult> {
        let nterms = self.terms.len();
        if req.inputs.len() != nterms {
            return Err(GraphError::ShapeMismatch {
                context: "scatter inputs",
                expected: nterms,
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
            check_terms(seeds.len(), nterms, "forward seed dependencies")?;
        }
        for sens in &req.adj_sens {
            check_terms(sens.len(), nterms, "adjoint sensitivity dependencies")?;
        }

        let mut result = SymbolicResult::default();
        if req.output_wanted {
            if !req.output_given {
                let inputs: Vec<Option<&Expr>> = req.inputs.iter().map(Option::as_ref).collect();
                result.output = Some(self.rebuild(&inputs)?);
            }
            for seeds in &req.fwd_seeds {
                let present: Vec<Option<&Expr>> = seeds
                    .iter()
                    .zip(&req.inputs)
                    .map(|(s, input)| input.as_ref().map(|_| s))
                    .collect();
                result.fwd_sens.push(self.rebuild(&present)?);
            }

            for d in 0..req.adj_seeds.len() {
                for i in 0..nterms {
                    if req.inputs[i].is_none() {
                        continue;
                    }
                    if let Some(contribution) = self.gather_adjoint(i, &req.adj_seeds[d])? {
                        trace!(
                            "scatter adjoint direction {} term {}: {} nonzeros",
                            d,
                            i,
                            contribution.nnz()
                        );
                        req.adj_sens[d][i] = req.adj_sens[d][i].add(&contribution)?;
                    }
                }
            }
        }

        for seed in req.adj_seeds.iter_mut() {
            *seed = Expr::zeros(seed.rows(), seed.cols());
        }
        Ok(result)
    }

    /// New scatter over the concrete sources, keeping only entries they store.
    fn rebuild(&self, sources: &[Option<&Expr>]) -> Result<Expr> {
        let osp = &self.sparsity;
        let mut rows = Vec::new();
        let mut cols = Vec::new();
        let mut parts: Vec<(Expr, Vec<usize>, usize)> = Vec::new();

        for (term, source) in self.terms.iter().zip(sources) {
            let Some(source) = source else {
                continue;
            };
            let isp = term.dep.sparsity();
            isp.check_same_shape(source.sparsity(), "scatter input")?;
            let el_known: Vec<usize> = term.sources.iter().map(|&s| isp.element(s)).collect();
            let matches = source.sparsity().nonzeros_of_elements(&el_known);

            let start = rows.len();
            let mut src_nz = Vec::new();
            for (j, m) in matches.into_iter().enumerate() {
                if let Some(nz) = m {
                    let (r, c) = osp.coordinates(term.targets[j]);
                    rows.push(r);
                    cols.push(c);
                    src_nz.push(nz);
                }
            }
            if !src_nz.is_empty() {
                parts.push(((*source).clone(), src_nz, start));
            }
        }
        if parts.is_empty() {
            return Ok(Expr::zeros(osp.rows(), osp.cols()));
        }

        let (sp, mapping) =
            Sparsity::from_triplets_mapped(osp.rows(), osp.cols(), &rows, &cols, DuplicatePolicy::Accumulate)?;
        let terms = parts
            .into_iter()
            .map(|(dep, src_nz, start)| {
                let targets = mapping[start..start + src_nz.len()].to_vec();
                ScatterTerm::new(dep, src_nz, targets)
            })
            .collect();
        Expr::scatter_add(sp, terms)
    }

    /// Adjoint of term `i`: read the seed at each target, accumulate onto the
    /// dependency pattern at the matching source.
    fn gather_adjoint(&self, i: usize, seed: &Expr) -> Result<Option<Expr>> {
        self.sparsity
            .check_same_shape(seed.sparsity(), "scatter adjoint seed")?;
        let term = &self.terms[i];
        let isp = term.dep.sparsity();
        let el_wanted: Vec<usize> = term.targets.iter().map(|&t| self.sparsity.element(t)).collect();
        let matches = seed.sparsity().nonzeros_of_elements(&el_wanted);

        let mut sources = Vec::new();
        let mut rows = Vec::new();
        let mut cols = Vec::new();
        for (j, m) in matches.into_iter().enumerate() {
            if let Some(onz) = m {
                let (r, c) = isp.coordinates(term.sources[j]);
                sources.push(onz);
                rows.push(r);
                cols.push(c);
            }
        }
        scatter_onto(seed, isp.shape(), sources, &rows, &cols)
    }

    /// Emit a zero fill of the output followed by one accumulation per term.
    ///
    /// `args[i]` is the buffer of term `i`'s dependency.
    pub fn emit(
        &self,
        stmts: &mut Vec<Statement>,
        pool: &mut ConstantPool,
        args: &[BufferId],
        res: BufferId,
        options: &CodegenOptions,
    ) {
        let out_len = self.sparsity.nnz();
        stmts.push(Statement::Clear { dst: res, len: out_len });
        for (term, &arg) in self.terms.iter().zip(args) {
            codegen::emit_accumulate(
                stmts,
                pool,
                options,
                (arg, term.dep.nnz()),
                (res, out_len),
                &term.sources,
                &term.targets,
            );
        }
    }

    /// Debug rendering, including the dependencies.
    pub fn describe(&self, out: &mut dyn Write) -> fmt::Result {
        write!(out, "scatter({} matrix, dependencies: [", self.sparsity)?;
        for (i, term) in self.terms.iter().enumerate() {
            if i > 0 {
                out.write_str(", ")?;
            }
            write!(out, "{}", term.dep)?;
        }
        out.write_str("])")
    }
}

fn accumulate_term<T: Clone + Zero>(term: &ScatterTerm, input: &[T], output: &mut [T]) {
    for (&s, &t) in term.sources.iter().zip(&term.targets) {
        output[t] = output[t].clone() + input[s].clone();
    }
}

fn check_terms(got: usize, expected: usize, context: &'static str) -> Result<()> {
    if got != expected {
        return Err(GraphError::ShapeMismatch {
            context,
            expected,
            got,
        });
    }
    Ok(())
}

/// Scatter-accumulate nonzeros `sources[j]` of `seed` onto coordinates
/// `(rows[j], cols[j])` of a `shape` matrix. `None` when nothing survives.
pub(crate) fn scatter_onto(
    seed: &Expr,
    shape: (usize, usize),
    sources: Vec<usize>,
    rows: &[usize],
    cols: &[usize],
) -> Result<Option<Expr>> {
    if sources.is_empty() {
        return Ok(None);
    }
    let (sp, targets) =
        Sparsity::from_triplets_mapped(shape.0, shape.1, rows, cols, DuplicatePolicy::Accumulate)?;
    Expr::scatter_add(sp, vec![ScatterTerm::new(seed.clone(), sources, targets)]).map(Some)
}
