//! Reference sweep driver over an expression DAG.
//!
//! A [`Function`] fixes a list of input symbols and output expressions,
//! orders every reachable node topologically once, and sizes one buffer per
//! node from its nonzero count (the static capacity pass). Each sweep then
//! allocates its own buffer set and calls the node hooks in order (forward
//! sweeps) or in reverse order (adjoint and reverse-taint sweeps). Sweeps hold
//! no state in the function, so independent sweeps may run concurrently.

use std::collections::HashMap;

use log::debug;
use num_traits::Zero;

use crate::codegen::{CodegenOptions, ConstantPool, Program, Statement};
use crate::error::{GraphError, Result};
use crate::expr::{self, Expr, Op};
use crate::float::Float;
use crate::hooks::{SymbolicRequest, TaintBits};

/// Input symbols, output expressions and the sorted node list between them.
#[derive(Clone, Debug)]
pub struct Function {
    inputs: Vec<Expr>,
    outputs: Vec<Expr>,
    /// Every reachable node, dependencies first.
    nodes: Vec<Expr>,
    /// `deps[p]`: positions of the dependencies of node `p`, in hook order.
    deps: Vec<Vec<usize>>,
    input_pos: Vec<usize>,
    output_pos: Vec<usize>,
    /// Buffer length of every node.
    capacity: Vec<usize>,
}

impl Function {
    /// Build a function. Every input must be a distinct symbol and every
    /// symbol reachable from the outputs must be an input.
    pub fn new(inputs: Vec<Expr>, outputs: Vec<Expr>) -> Result<Self> {
        for input in &inputs {
            if !input.is_symbolic() {
                return Err(GraphError::UnsupportedConfiguration(format!(
                    "function input {} is not a symbol",
                    input
                )));
            }
        }

        let mut nodes = expr::topological_order(&outputs);
        let position: HashMap<usize, usize> = nodes
            .iter()
            .enumerate()
            .map(|(p, n)| (n.id(), p))
            .collect();

        let mut input_ids: HashMap<usize, usize> = HashMap::new();
        for (i, input) in inputs.iter().enumerate() {
            if input_ids.insert(input.id(), i).is_some() {
                return Err(GraphError::UnsupportedConfiguration(format!(
                    "symbol {} listed twice as a function input",
                    input
                )));
            }
        }
        for node in &nodes {
            if node.is_symbolic() && !input_ids.contains_key(&node.id()) {
                return Err(GraphError::UnsupportedConfiguration(format!(
                    "free symbol {} is not a function input",
                    node
                )));
            }
        }

        let mut deps: Vec<Vec<usize>> = nodes
            .iter()
            .map(|n| n.dependencies().iter().map(|d| position[&d.id()]).collect())
            .collect();
        let mut capacity: Vec<usize> = nodes.iter().map(Expr::nnz).collect();
        // Inputs unreachable from the outputs still get a (detached) slot.
        let mut input_pos = Vec::with_capacity(inputs.len());
        for input in &inputs {
            let p = match position.get(&input.id()) {
                Some(&p) => p,
                None => {
                    nodes.push(input.clone());
                    capacity.push(input.nnz());
                    deps.push(Vec::new());
                    nodes.len() - 1
                }
            };
            input_pos.push(p);
        }
        let output_pos = outputs.iter().map(|o| position[&o.id()]).collect();

        debug!(
            "function with {} inputs, {} outputs: {} nodes, {} buffer entries",
            inputs.len(),
            outputs.len(),
            nodes.len(),
            capacity.iter().sum::<usize>()
        );

        Ok(Function {
            inputs,
            outputs,
            nodes,
            deps,
            input_pos,
            output_pos,
            capacity,
        })
    }

    #[inline]
    pub fn inputs(&self) -> &[Expr] {
        &self.inputs
    }

    #[inline]
    pub fn outputs(&self) -> &[Expr] {
        &self.outputs
    }

    /// Number of nodes in the sorted list.
    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Buffer length of every node, in sweep order.
    #[inline]
    pub fn capacity(&self) -> &[usize] {
        &self.capacity
    }

    /// Same function with identity selections removed.
    pub fn simplified(&self) -> Result<Function> {
        Function::new(self.inputs.clone(), expr::simplify_all(&self.outputs))
    }

    fn alloc<T: Clone + Zero>(&self) -> Vec<Vec<T>> {
        self.capacity.iter().map(|&n| vec![T::zero(); n]).collect()
    }

    fn check_args<T>(&self, args: &[&[T]], context: &'static str) -> Result<()> {
        check_lens(args, &self.inputs, context)
    }

    /// Load per-input data into the input buffers.
    fn load_inputs<T: Clone>(&self, bufs: &mut [Vec<T>], args: &[&[T]]) {
        for (&p, arg) in self.input_pos.iter().zip(args) {
            bufs[p].clone_from_slice(arg);
        }
    }

    /// Forward pass shared by primal and tangent sweeps: the node hooks are
    /// linear, so a tangent sweep is a primal sweep over seed data.
    fn forward_sweep<T: Clone + Zero>(&self, args: &[&[T]], tangent: bool) -> Vec<Vec<T>> {
        let mut bufs = self.alloc::<T>();
        self.load_inputs(&mut bufs, args);

        for (p, node) in self.nodes.iter().enumerate() {
            let (before, after) = bufs.split_at_mut(p);
            let out = &mut after[0];
            match node.op() {
                Op::Symbol(_) => {}
                Op::Zeros => out.fill(T::zero()),
                Op::Select(sel) => {
                    let input = Some(before[self.deps[p][0]].as_slice());
                    if tangent {
                        sel.eval_tangent(input, Some(out.as_mut_slice()));
                    } else {
                        sel.eval_primal(input, Some(out.as_mut_slice()));
                    }
                }
                Op::Scatter(sc) => {
                    let inputs: Vec<Option<&[T]>> = self.deps[p]
                        .iter()
                        .map(|&d| Some(before[d].as_slice()))
                        .collect();
                    if tangent {
                        sc.eval_tangent(&inputs, Some(out.as_mut_slice()));
                    } else {
                        sc.eval_primal(&inputs, Some(out.as_mut_slice()));
                    }
                }
            }
        }
        bufs
    }

    fn collect_outputs<T: Clone>(&self, bufs: &[Vec<T>]) -> Vec<Vec<T>> {
        self.output_pos.iter().map(|&p| bufs[p].clone()).collect()
    }

    /// Numeric evaluation. `args[i]` holds the nonzeros of input `i`.
    pub fn eval<F: Float>(&self, args: &[&[F]]) -> Result<Vec<Vec<F>>> {
        self.check_args(args, "input values")?;
        let bufs = self.forward_sweep(args, false);
        Ok(self.collect_outputs(&bufs))
    }

    /// Forward tangent for one direction. `seeds[i]` is the tangent of input `i`.
    pub fn fwd<F: Float>(&self, seeds: &[&[F]]) -> Result<Vec<Vec<F>>> {
        self.check_args(seeds, "forward seeds")?;
        let bufs = self.forward_sweep(seeds, true);
        Ok(self.collect_outputs(&bufs))
    }

    /// Reverse adjoint for one direction. `seeds[o]` is the adjoint of output
    /// `o`; the result holds the adjoint of every input.
    pub fn adj<F: Float>(&self, seeds: &[&[F]]) -> Result<Vec<Vec<F>>> {
        check_lens(seeds, &self.outputs, "adjoint seeds")?;
        let mut bufs = self.alloc::<F>();
        for (&p, seed) in self.output_pos.iter().zip(seeds) {
            for (b, &s) in bufs[p].iter_mut().zip(seed.iter()) {
                *b = *b + s;
            }
        }

        for p in (0..self.nodes.len()).rev() {
            let (before, after) = bufs.split_at_mut(p);
            let seed = &mut after[0];
            match self.nodes[p].op() {
                Op::Symbol(_) => {}
                Op::Zeros => seed.fill(F::zero()),
                Op::Select(sel) => {
                    let sens = &mut before[self.deps[p][0]];
                    sel.eval_adjoint(Some(seed.as_mut_slice()), Some(sens.as_mut_slice()));
                }
                Op::Scatter(sc) => {
                    for (i, &d) in self.deps[p].iter().enumerate() {
                        sc.accumulate_adjoint_term(i, seed.as_slice(), before[d].as_mut_slice());
                    }
                    seed.fill(F::zero());
                }
            }
        }
        Ok(self.input_pos.iter().map(|&p| bufs[p].clone()).collect())
    }

    /// Forward dependency propagation: which output entries depend on the
    /// seeded input entries (one bit per direction).
    pub fn taint_fwd(&self, args: &[&[TaintBits]]) -> Result<Vec<Vec<TaintBits>>> {
        self.check_args(args, "input taint")?;
        let mut bufs = self.alloc::<TaintBits>();
        self.load_inputs(&mut bufs, args);

        for (p, node) in self.nodes.iter().enumerate() {
            let (before, after) = bufs.split_at_mut(p);
            let out = &mut after[0];
            match node.op() {
                Op::Symbol(_) => {}
                Op::Zeros => out.fill(0),
                Op::Select(sel) => {
                    let input = &mut before[self.deps[p][0]];
                    sel.propagate_taint(Some(input.as_mut_slice()), Some(out.as_mut_slice()), true);
                }
                Op::Scatter(sc) => {
                    out.fill(0);
                    for (i, &d) in self.deps[p].iter().enumerate() {
                        sc.taint_forward_term(i, before[d].as_slice(), out.as_mut_slice());
                    }
                }
            }
        }
        Ok(self.collect_outputs(&bufs))
    }

    /// Reverse dependency propagation: which input entries the seeded output
    /// entries depend on.
    pub fn taint_rev(&self, seeds: &[&[TaintBits]]) -> Result<Vec<Vec<TaintBits>>> {
        check_lens(seeds, &self.outputs, "output taint")?;
        let mut bufs = self.alloc::<TaintBits>();
        for (&p, seed) in self.output_pos.iter().zip(seeds) {
            for (b, &s) in bufs[p].iter_mut().zip(seed.iter()) {
                *b |= s;
            }
        }

        for p in (0..self.nodes.len()).rev() {
            let (before, after) = bufs.split_at_mut(p);
            let out = &mut after[0];
            match self.nodes[p].op() {
                Op::Symbol(_) => {}
                Op::Zeros => out.fill(0),
                Op::Select(sel) => {
                    let input = &mut before[self.deps[p][0]];
                    sel.propagate_taint(Some(input.as_mut_slice()), Some(out.as_mut_slice()), false);
                }
                Op::Scatter(sc) => {
                    for (i, &d) in self.deps[p].iter().enumerate() {
                        sc.taint_reverse_term(i, before[d].as_mut_slice(), out.as_slice());
                    }
                    out.fill(0);
                }
            }
        }
        Ok(self.input_pos.iter().map(|&p| bufs[p].clone()).collect())
    }

    /// Symbolic forward derivatives.
    ///
    /// `seeds[d][i]` is the tangent expression of input `i` in direction `d`;
    /// the result holds `[d][o]`, the tangent of output `o`.
    pub fn fwd_symbolic(&self, seeds: &[Vec<Expr>]) -> Result<Vec<Vec<Expr>>> {
        let nfwd = seeds.len();
        for dir in seeds {
            check_count(dir.len(), self.inputs.len(), "forward seed inputs")?;
            for (seed, input) in dir.iter().zip(&self.inputs) {
                input.sparsity().check_same_shape(seed.sparsity(), "forward seed")?;
            }
        }

        let mut tangents: Vec<Vec<Expr>> = self
            .nodes
            .iter()
            .map(|n| vec![Expr::zeros(n.rows(), n.cols()); nfwd])
            .collect();
        for (i, &p) in self.input_pos.iter().enumerate() {
            for d in 0..nfwd {
                tangents[p][d] = seeds[d][i].clone();
            }
        }

        for (p, node) in self.nodes.iter().enumerate() {
            if matches!(node.op(), Op::Symbol(_) | Op::Zeros) {
                continue;
            }
            let deps = &self.deps[p];
            let mut req = SymbolicRequest::given(deps.iter().map(|&d| self.nodes[d].clone()).collect());
            req.fwd_seeds = (0..nfwd)
                .map(|d| deps.iter().map(|&q| tangents[q][d].clone()).collect())
                .collect();
            let res = match node.op() {
                Op::Select(sel) => sel.eval_symbolic(&mut req)?,
                Op::Scatter(sc) => sc.eval_symbolic(&mut req)?,
                Op::Symbol(_) | Op::Zeros => continue,
            };
            tangents[p] = res.fwd_sens;
        }

        Ok((0..nfwd)
            .map(|d| self.output_pos.iter().map(|&p| tangents[p][d].clone()).collect())
            .collect())
    }

    /// Symbolic reverse derivatives.
    ///
    /// `seeds[d][o]` is the adjoint expression of output `o` in direction `d`;
    /// the result holds `[d][i]`, the adjoint of input `i`.
    pub fn adj_symbolic(&self, seeds: &[Vec<Expr>]) -> Result<Vec<Vec<Expr>>> {
        let nadj = seeds.len();
        for dir in seeds {
            check_count(dir.len(), self.outputs.len(), "adjoint seed outputs")?;
        }

        let mut adjoints: Vec<Vec<Expr>> = self
            .nodes
            .iter()
            .map(|n| vec![Expr::zeros(n.rows(), n.cols()); nadj])
            .collect();
        for (o, &p) in self.output_pos.iter().enumerate() {
            for d in 0..nadj {
                adjoints[p][d] = adjoints[p][d].add(&seeds[d][o])?;
            }
        }

        for p in (0..self.nodes.len()).rev() {
            let node = &self.nodes[p];
            let deps = &self.deps[p];
            let mut req = SymbolicRequest::given(deps.iter().map(|&d| self.nodes[d].clone()).collect());
            req.adj_seeds = std::mem::take(&mut adjoints[p]);
            // Fresh per-term sensitivities: a dependency may appear in more
            // than one term, so contributions are summed back afterwards.
            req.adj_sens = (0..nadj)
                .map(|_| {
                    deps.iter()
                        .map(|&q| Expr::zeros(self.nodes[q].rows(), self.nodes[q].cols()))
                        .collect()
                })
                .collect();
            match node.op() {
                Op::Symbol(_) => {
                    adjoints[p] = req.adj_seeds;
                    continue;
                }
                Op::Zeros => {}
                Op::Select(sel) => {
                    sel.eval_symbolic(&mut req)?;
                }
                Op::Scatter(sc) => {
                    sc.eval_symbolic(&mut req)?;
                }
            }
            adjoints[p] = req
                .adj_seeds
                .iter()
                .map(|s| Expr::zeros(s.rows(), s.cols()))
                .collect();
            for (d, sens) in req.adj_sens.into_iter().enumerate() {
                for (&q, s) in deps.iter().zip(sens) {
                    adjoints[q][d] = adjoints[q][d].add(&s)?;
                }
            }
        }

        Ok((0..nadj)
            .map(|d| self.input_pos.iter().map(|&p| adjoints[p][d].clone()).collect())
            .collect())
    }

    /// Generate the instruction stream for numeric evaluation.
    ///
    /// Buffer `p` of the program is the buffer of node `p`.
    pub fn generate(&self, options: &CodegenOptions) -> Program {
        let mut statements = Vec::new();
        let mut pool = ConstantPool::new();
        for (p, node) in self.nodes.iter().enumerate() {
            match node.op() {
                Op::Symbol(_) => {}
                Op::Zeros => statements.push(Statement::Clear {
                    dst: p,
                    len: node.nnz(),
                }),
                Op::Select(sel) => sel.emit(&mut statements, &mut pool, self.deps[p][0], p, options),
                Op::Scatter(sc) => sc.emit(&mut statements, &mut pool, &self.deps[p], p, options),
            }
        }
        debug!(
            "generated {} statements with {} pooled tables",
            statements.len(),
            pool.len()
        );
        Program {
            statements,
            pool,
            buffer_lens: self.capacity.clone(),
            inputs: self.input_pos.clone(),
            outputs: self.output_pos.clone(),
            real_type: options.real_type.clone(),
        }
    }

    pub(crate) fn seeds_as_slices<F>(seeds: &[Vec<F>]) -> Vec<&[F]> {
        seeds.iter().map(Vec::as_slice).collect()
    }

    /// Forward tangents for many directions, one sweep per direction.
    pub fn fwd_many<F: Float>(&self, seeds: &[Vec<Vec<F>>]) -> Result<Vec<Vec<Vec<F>>>> {
        seeds
            .iter()
            .map(|dir| self.fwd(&Self::seeds_as_slices(dir)))
            .collect()
    }

    /// Adjoints for many directions, one sweep per direction.
    pub fn adj_many<F: Float>(&self, seeds: &[Vec<Vec<F>>]) -> Result<Vec<Vec<Vec<F>>>> {
        seeds
            .iter()
            .map(|dir| self.adj(&Self::seeds_as_slices(dir)))
            .collect()
    }
}

fn check_count(got: usize, expected: usize, context: &'static str) -> Result<()> {
    if got != expected {
        return Err(GraphError::ShapeMismatch {
            context,
            expected,
            got,
        });
    }
    Ok(())
}

fn check_lens<T>(data: &[&[T]], exprs: &[Expr], context: &'static str) -> Result<()> {
    check_count(data.len(), exprs.len(), context)?;
    for (d, e) in data.iter().zip(exprs) {
        check_count(d.len(), e.nnz(), context)?;
    }
    Ok(())
}
