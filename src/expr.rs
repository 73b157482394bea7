//! Shared symbolic expression handles.
//!
//! An [`Expr`] is a reference-counted node of a DAG: the same subexpression
//! can feed many parents and is never deep-copied. Nodes are immutable once
//! built; rewriting (see [`simplify_all`]) produces new nodes and reuses the
//! untouched ones.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use log::debug;

use crate::error::{GraphError, Result};
use crate::scatter::{ScatterAdd, ScatterTerm};
use crate::selection::Selection;
use crate::sparsity::{DuplicatePolicy, Sparsity};

/// Node kinds known to the sweep driver.
#[derive(Debug)]
pub enum Op {
    /// Free input variable.
    Symbol(String),
    /// All stored entries are zero. With an empty pattern this is the
    /// structural zero.
    Zeros,
    /// Gather from one dependency.
    Select(Selection),
    /// Scatter-accumulate from one or more dependencies.
    Scatter(ScatterAdd),
}

#[derive(Debug)]
struct Node {
    op: Op,
    sparsity: Sparsity,
}

/// Reference-counted handle to an immutable expression node.
#[derive(Clone)]
pub struct Expr(Arc<Node>);

impl Expr {
    fn from_op(op: Op, sparsity: Sparsity) -> Self {
        Expr(Arc::new(Node { op, sparsity }))
    }

    /// Free variable with the given pattern.
    pub fn symbol(name: impl Into<String>, sparsity: Sparsity) -> Self {
        Self::from_op(Op::Symbol(name.into()), sparsity)
    }

    /// Structural zero of shape `rows × cols`.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self::from_op(Op::Zeros, Sparsity::empty(rows, cols))
    }

    /// Explicit zeros stored on `sparsity`.
    pub fn zeros_with(sparsity: Sparsity) -> Self {
        Self::from_op(Op::Zeros, sparsity)
    }

    /// Gather node: output nonzero `k` reads nonzero `assigns[k]` of `dep`.
    ///
    /// An empty table yields the structural zero of the output shape. A
    /// nonempty table without a dependency is a [`GraphError::DanglingDependency`].
    pub fn select(dep: Option<&Expr>, sparsity: Sparsity, assigns: Vec<usize>) -> Result<Expr> {
        if assigns.len() != sparsity.nnz() {
            return Err(GraphError::ShapeMismatch {
                context: "selection table",
                expected: sparsity.nnz(),
                got: assigns.len(),
            });
        }
        if assigns.is_empty() {
            return Ok(Expr::zeros(sparsity.rows(), sparsity.cols()));
        }
        let dep = dep.ok_or(GraphError::DanglingDependency)?;
        let node = Selection::new(dep.clone(), sparsity.clone(), assigns)?;
        Ok(Self::from_op(Op::Select(node), sparsity))
    }

    /// Scatter-accumulate node over `sparsity`. Empty terms are dropped; with
    /// no terms left the result is explicit zeros on `sparsity`.
    pub fn scatter_add(sparsity: Sparsity, terms: Vec<ScatterTerm>) -> Result<Expr> {
        let terms: Vec<ScatterTerm> = terms.into_iter().filter(|t| !t.is_empty()).collect();
        if terms.is_empty() {
            return Ok(Expr::zeros_with(sparsity));
        }
        let node = ScatterAdd::new(sparsity.clone(), terms)?;
        Ok(Self::from_op(Op::Scatter(node), sparsity))
    }

    /// Dense column vector of the listed nonzeros.
    pub fn get_nonzeros(&self, indices: &[usize]) -> Result<Expr> {
        Expr::select(Some(self), Sparsity::column(indices.len()), indices.to_vec())
    }

    /// Submatrix at the given row and column lists. Entries not stored in
    /// `self` stay unstored in the result.
    pub fn submatrix(&self, rows: &[usize], cols: &[usize]) -> Result<Expr> {
        let sp = self.sparsity();
        let mut out_rows = Vec::new();
        let mut out_cols = Vec::new();
        let mut sources = Vec::new();
        for (i, &r) in rows.iter().enumerate() {
            for (j, &c) in cols.iter().enumerate() {
                if r >= sp.rows() || c >= sp.cols() {
                    return Err(GraphError::InvalidCoordinate {
                        row: r,
                        col: c,
                        rows: sp.rows(),
                        cols: sp.cols(),
                    });
                }
                if let Some(nz) = sp.nonzero_index(r, c) {
                    out_rows.push(i);
                    out_cols.push(j);
                    sources.push(nz);
                }
            }
        }
        let (out_sp, mapping) = Sparsity::from_triplets_mapped(
            rows.len(),
            cols.len(),
            &out_rows,
            &out_cols,
            DuplicatePolicy::Reject,
        )?;
        let mut assigns = vec![0usize; out_sp.nnz()];
        for (t, &nz) in mapping.iter().enumerate() {
            assigns[nz] = sources[t];
        }
        Expr::select(Some(self), out_sp, assigns)
    }

    /// Elementwise sum over the union pattern. Structural zeros vanish.
    pub fn add(&self, other: &Expr) -> Result<Expr> {
        self.sparsity().check_same_shape(other.sparsity(), "addition operand")?;
        if other.is_structural_zero() {
            return Ok(self.clone());
        }
        if self.is_structural_zero() {
            return Ok(other.clone());
        }
        let (sp, map_a, map_b) = self.sparsity().union(other.sparsity())?;
        let terms = vec![
            ScatterTerm::new(self.clone(), (0..self.nnz()).collect(), map_a),
            ScatterTerm::new(other.clone(), (0..other.nnz()).collect(), map_b),
        ];
        Expr::scatter_add(sp, terms)
    }

    #[inline]
    pub fn op(&self) -> &Op {
        &self.0.op
    }

    #[inline]
    pub fn sparsity(&self) -> &Sparsity {
        &self.0.sparsity
    }

    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        self.0.sparsity.shape()
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.0.sparsity.rows()
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.0.sparsity.cols()
    }

    #[inline]
    pub fn nnz(&self) -> usize {
        self.0.sparsity.nnz()
    }

    /// Symbol name, if this is a free variable.
    pub fn name(&self) -> Option<&str> {
        match &self.0.op {
            Op::Symbol(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_symbolic(&self) -> bool {
        matches!(self.0.op, Op::Symbol(_))
    }

    /// Known to be zero in every stored entry.
    pub fn is_zero(&self) -> bool {
        matches!(self.0.op, Op::Zeros)
    }

    /// Known zero with no stored entries at all.
    pub fn is_structural_zero(&self) -> bool {
        self.is_zero() && self.nnz() == 0
    }

    pub fn as_selection(&self) -> Option<&Selection> {
        match &self.0.op {
            Op::Select(sel) => Some(sel),
            _ => None,
        }
    }

    pub fn as_scatter(&self) -> Option<&ScatterAdd> {
        match &self.0.op {
            Op::Scatter(sc) => Some(sc),
            _ => None,
        }
    }

    /// Direct dependencies, in hook order.
    pub fn dependencies(&self) -> Vec<&Expr> {
        match &self.0.op {
            Op::Symbol(_) | Op::Zeros => Vec::new(),
            Op::Select(sel) => vec![sel.dependency()],
            Op::Scatter(sc) => sc.terms().iter().map(|t| t.dependency()).collect(),
        }
    }

    /// Pointer identity.
    #[inline]
    pub fn is_same(&self, other: &Expr) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Stable identity key, valid while the node is alive.
    #[inline]
    pub(crate) fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    /// This expression with identity selections replaced by their dependency.
    pub fn simplify(&self) -> Expr {
        simplify_all(std::slice::from_ref(self))
            .pop()
            .unwrap_or_else(|| self.clone())
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.op {
            Op::Symbol(name) => f.write_str(name),
            Op::Zeros if self.nnz() == 0 => write!(f, "sparse({},{})", self.rows(), self.cols()),
            Op::Zeros => write!(f, "zeros({})", self.sparsity()),
            Op::Select(sel) => sel.describe(f),
            Op::Scatter(sc) => sc.describe(f),
        }
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Expr").field(&format_args!("{}", self)).finish()
    }
}

/// All nodes reachable from `roots`, dependencies before dependents.
pub(crate) fn topological_order(roots: &[Expr]) -> Vec<Expr> {
    let mut visited: HashSet<usize> = HashSet::new();
    let mut order = Vec::new();
    let mut stack: Vec<(Expr, bool)> = roots.iter().rev().map(|r| (r.clone(), false)).collect();

    while let Some((node, expanded)) = stack.pop() {
        if expanded {
            order.push(node);
            continue;
        }
        if !visited.insert(node.id()) {
            continue;
        }
        let deps: Vec<Expr> = node.dependencies().into_iter().cloned().collect();
        stack.push((node, true));
        for dep in deps.into_iter().rev() {
            if !visited.contains(&dep.id()) {
                stack.push((dep, false));
            }
        }
    }
    order
}

fn resolve(rewritten: &HashMap<usize, Expr>, e: &Expr) -> Expr {
    rewritten.get(&e.id()).cloned().unwrap_or_else(|| e.clone())
}

/// Rewrite a set of roots, replacing every identity selection by a direct
/// reference to its dependency.
///
/// Shared subexpressions are rewritten once; unchanged nodes are reused.
pub fn simplify_all(roots: &[Expr]) -> Vec<Expr> {
    let order = topological_order(roots);
    let mut rewritten: HashMap<usize, Expr> = HashMap::with_capacity(order.len());
    let mut removed = 0usize;

    for node in &order {
        let new = match node.op() {
            Op::Symbol(_) | Op::Zeros => node.clone(),
            Op::Select(sel) => {
                let dep = resolve(&rewritten, sel.dependency());
                if sel.is_identity() {
                    removed += 1;
                    dep
                } else if dep.is_same(sel.dependency()) {
                    node.clone()
                } else {
                    Expr::from_op(Op::Select(sel.with_dependency(dep)), node.sparsity().clone())
                }
            }
            Op::Scatter(sc) => {
                let deps: Vec<Expr> = sc
                    .terms()
                    .iter()
                    .map(|t| resolve(&rewritten, t.dependency()))
                    .collect();
                let unchanged = deps
                    .iter()
                    .zip(sc.terms())
                    .all(|(d, t)| d.is_same(t.dependency()));
                if unchanged {
                    node.clone()
                } else {
                    Expr::from_op(Op::Scatter(sc.with_dependencies(deps)), node.sparsity().clone())
                }
            }
        };
        rewritten.insert(node.id(), new);
    }

    if removed > 0 {
        debug!(
            "simplification removed {} identity selections out of {} nodes",
            removed,
            order.len()
        );
    }

    roots.iter().map(|r| resolve(&rewritten, r)).collect()
}
