//! Target-agnostic instruction stream for ahead-of-time code generation.
//!
//! Nodes transliterate their gather/scatter tables into [`Statement`]s that
//! address work buffers by nonzero offset only, with explicit bounds. Index
//! tables live in a [`ConstantPool`] interned by content, so two nodes with
//! identical tables share one emitted array. Nothing here evaluates anything.

use std::collections::HashMap;
use std::fmt;

use num_traits::Zero;

use crate::error::{GraphError, Result};
use crate::float::Float;

/// Index of a work buffer in a generated program.
pub type BufferId = usize;

/// Opaque handle of an interned index table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConstHandle(usize);

impl ConstHandle {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Content-interned pool of integer index tables.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(from = "Vec<Vec<usize>>", into = "Vec<Vec<usize>>")
)]
pub struct ConstantPool {
    tables: Vec<Vec<usize>>,
    lookup: HashMap<Vec<usize>, ConstHandle>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle of `table`, adding it if no identical table is pooled yet.
    pub fn intern(&mut self, table: &[usize]) -> ConstHandle {
        if let Some(&h) = self.lookup.get(table) {
            return h;
        }
        let h = ConstHandle(self.tables.len());
        self.tables.push(table.to_vec());
        self.lookup.insert(table.to_vec(), h);
        h
    }

    /// Table behind `handle`.
    ///
    /// # Panics
    ///
    /// Panics if `handle` was not issued by this pool.
    #[inline]
    pub fn get(&self, handle: ConstHandle) -> &[usize] {
        &self.tables[handle.index()]
    }

    /// Table behind `handle`, or `None` for a foreign handle.
    #[inline]
    pub fn try_get(&self, handle: ConstHandle) -> Option<&[usize]> {
        self.tables.get(handle.index()).map(Vec::as_slice)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ConstHandle, &[usize])> + '_ {
        self.tables
            .iter()
            .enumerate()
            .map(|(i, t)| (ConstHandle(i), t.as_slice()))
    }
}

impl From<Vec<Vec<usize>>> for ConstantPool {
    fn from(tables: Vec<Vec<usize>>) -> Self {
        let mut pool = ConstantPool::new();
        for (i, t) in tables.iter().enumerate() {
            pool.lookup.entry(t.clone()).or_insert(ConstHandle(i));
        }
        pool.tables = tables;
        pool
    }
}

impl From<ConstantPool> for Vec<Vec<usize>> {
    fn from(pool: ConstantPool) -> Self {
        pool.tables
    }
}

/// One primitive instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Statement {
    /// `dst[0..len] = 0`
    Clear { dst: BufferId, len: usize },
    /// `dst[dst_offset] += src[src_offset]`
    Accumulate {
        dst: BufferId,
        dst_offset: usize,
        dst_len: usize,
        src: BufferId,
        src_offset: usize,
        src_len: usize,
    },
    /// `for i in 0..count: dst[T_dst[i]] += src[T_src[i]]`
    AccumulateIndexed {
        dst: BufferId,
        dst_table: ConstHandle,
        dst_len: usize,
        src: BufferId,
        src_table: ConstHandle,
        src_len: usize,
        count: usize,
    },
}

/// Code generation settings.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CodegenOptions {
    /// Tables with at most this many pairs are unrolled into one
    /// [`Statement::Accumulate`] per pair instead of an indexed loop.
    pub unroll_limit: usize,
    /// Element type name used when rendering.
    pub real_type: String,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        Self::for_element::<f64>()
    }
}

impl CodegenOptions {
    /// Options rendering buffers with `F`'s C element type.
    pub fn for_element<F: Float>() -> Self {
        CodegenOptions {
            unroll_limit: 0,
            real_type: F::C_TYPE.to_string(),
        }
    }

    pub fn with_unroll_limit(mut self, limit: usize) -> Self {
        self.unroll_limit = limit;
        self
    }

    pub fn with_real_type(mut self, real_type: impl Into<String>) -> Self {
        self.real_type = real_type.into();
        self
    }
}

/// Emit `dst[dst_idx[j]] += src[src_idx[j]]` for every `j`.
///
/// `src` and `dst` are `(buffer, bound)` pairs.
pub(crate) fn emit_accumulate(
    stmts: &mut Vec<Statement>,
    pool: &mut ConstantPool,
    options: &CodegenOptions,
    src: (BufferId, usize),
    dst: (BufferId, usize),
    src_idx: &[usize],
    dst_idx: &[usize],
) {
    debug_assert_eq!(src_idx.len(), dst_idx.len());
    if src_idx.is_empty() {
        return;
    }
    if src_idx.len() <= options.unroll_limit {
        for (&s, &d) in src_idx.iter().zip(dst_idx) {
            stmts.push(Statement::Accumulate {
                dst: dst.0,
                dst_offset: d,
                dst_len: dst.1,
                src: src.0,
                src_offset: s,
                src_len: src.1,
            });
        }
        return;
    }
    let src_table = pool.intern(src_idx);
    let dst_table = pool.intern(dst_idx);
    stmts.push(Statement::AccumulateIndexed {
        dst: dst.0,
        dst_table,
        dst_len: dst.1,
        src: src.0,
        src_table,
        src_len: src.1,
        count: src_idx.len(),
    });
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Statement::Clear { dst, len } => {
                write!(f, "for (i=0; i<{}; ++i) w{}[i] = 0;", len, dst)
            }
            Statement::Accumulate {
                dst,
                dst_offset,
                src,
                src_offset,
                ..
            } => write!(f, "w{}[{}] += w{}[{}];", dst, dst_offset, src, src_offset),
            Statement::AccumulateIndexed {
                dst,
                dst_table,
                src,
                src_table,
                count,
                ..
            } => write!(
                f,
                "for (i=0; i<{}; ++i) w{}[s{}[i]] += w{}[s{}[i]];",
                count,
                dst,
                dst_table.index(),
                src,
                src_table.index()
            ),
        }
    }
}

/// A complete generated program: statements, constants and buffer layout.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Program {
    pub statements: Vec<Statement>,
    pub pool: ConstantPool,
    /// Length (nonzero count) of every work buffer.
    pub buffer_lens: Vec<usize>,
    /// Buffers filled by the caller, one per function input.
    pub inputs: Vec<BufferId>,
    /// Buffers read back, one per function output.
    pub outputs: Vec<BufferId>,
    pub real_type: String,
}

impl Program {
    /// Check buffer ids, declared lengths, handles and loop counts against
    /// the layout and the pool.
    ///
    /// Offsets stored in index tables are only bounded by the declared
    /// lengths, so they are checked while running.
    pub fn validate(&self) -> Result<()> {
        for &id in self.inputs.iter().chain(&self.outputs) {
            self.buffer_len(id)?;
        }
        for stmt in &self.statements {
            match *stmt {
                Statement::Clear { dst, len } => self.check_declared(dst, len)?,
                Statement::Accumulate {
                    dst,
                    dst_len,
                    src,
                    src_len,
                    ..
                } => {
                    self.check_declared(dst, dst_len)?;
                    self.check_declared(src, src_len)?;
                }
                Statement::AccumulateIndexed {
                    dst,
                    dst_table,
                    dst_len,
                    src,
                    src_table,
                    src_len,
                    count,
                } => {
                    self.check_declared(dst, dst_len)?;
                    self.check_declared(src, src_len)?;
                    for handle in [dst_table, src_table] {
                        let table = self.pool.try_get(handle).ok_or(GraphError::ShapeMismatch {
                            context: "constant handle",
                            expected: self.pool.len(),
                            got: handle.index(),
                        })?;
                        if count > table.len() {
                            return Err(GraphError::ShapeMismatch {
                                context: "indexed loop count",
                                expected: table.len(),
                                got: count,
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn buffer_len(&self, id: BufferId) -> Result<usize> {
        self.buffer_lens
            .get(id)
            .copied()
            .ok_or(GraphError::ShapeMismatch {
                context: "buffer id",
                expected: self.buffer_lens.len(),
                got: id,
            })
    }

    fn check_declared(&self, id: BufferId, len: usize) -> Result<()> {
        let actual = self.buffer_len(id)?;
        if len > actual {
            return Err(GraphError::ShapeMismatch {
                context: "declared buffer length",
                expected: actual,
                got: len,
            });
        }
        Ok(())
    }

    /// Reference interpreter for the instruction stream.
    ///
    /// The program is validated first; table offsets are then checked
    /// against each statement's declared lengths.
    pub fn run<T: Clone + Zero>(&self, args: &[&[T]]) -> Result<Vec<Vec<T>>> {
        self.validate()?;
        if args.len() != self.inputs.len() {
            return Err(GraphError::ShapeMismatch {
                context: "program arguments",
                expected: self.inputs.len(),
                got: args.len(),
            });
        }
        let mut work: Vec<Vec<T>> = self
            .buffer_lens
            .iter()
            .map(|&n| vec![T::zero(); n])
            .collect();
        for (&id, arg) in self.inputs.iter().zip(args) {
            if arg.len() != work[id].len() {
                return Err(GraphError::ShapeMismatch {
                    context: "program argument length",
                    expected: work[id].len(),
                    got: arg.len(),
                });
            }
            work[id].clone_from_slice(arg);
        }

        for stmt in &self.statements {
            match *stmt {
                Statement::Clear { dst, len } => {
                    for v in &mut work[dst][..len] {
                        *v = T::zero();
                    }
                }
                Statement::Accumulate {
                    dst,
                    dst_offset,
                    dst_len,
                    src,
                    src_offset,
                    src_len,
                } => {
                    check_bound(dst_offset, dst_len)?;
                    check_bound(src_offset, src_len)?;
                    let v = work[src][src_offset].clone();
                    work[dst][dst_offset] = work[dst][dst_offset].clone() + v;
                }
                Statement::AccumulateIndexed {
                    dst,
                    dst_table,
                    dst_len,
                    src,
                    src_table,
                    src_len,
                    count,
                } => {
                    let (dt, st) = (self.pool.get(dst_table), self.pool.get(src_table));
                    for i in 0..count {
                        check_bound(dt[i], dst_len)?;
                        check_bound(st[i], src_len)?;
                        let v = work[src][st[i]].clone();
                        work[dst][dt[i]] = work[dst][dt[i]].clone() + v;
                    }
                }
            }
        }

        Ok(self.outputs.iter().map(|&id| work[id].clone()).collect())
    }
}

fn check_bound(index: usize, len: usize) -> Result<()> {
    if index >= len {
        return Err(GraphError::NonzeroOutOfRange { index, nnz: len });
    }
    Ok(())
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (h, table) in self.pool.iter() {
            write!(f, "static const int s{}[{}] = {{", h.index(), table.len())?;
            for (i, v) in table.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}", v)?;
            }
            writeln!(f, "}};")?;
        }
        for (id, len) in self.buffer_lens.iter().enumerate() {
            writeln!(f, "{} w{}[{}];", self.real_type, id, len)?;
        }
        writeln!(f, "int i;")?;
        for stmt in &self.statements {
            writeln!(f, "  {}", stmt)?;
        }
        Ok(())
    }
}
