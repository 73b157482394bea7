//! Immutable sparsity patterns in compressed-row form.
//!
//! A [`Sparsity`] describes which entries of a `rows × cols` matrix are
//! stored. Stored entries ("nonzeros") are numbered in row-major order; that
//! position is the nonzero index every propagation buffer is addressed by.
//! Patterns are shared by reference count and compared structurally.

use std::fmt;
use std::sync::Arc;

use crate::error::{GraphError, Result};

#[derive(PartialEq, Eq, Hash)]
struct Pattern {
    rows: usize,
    cols: usize,
    /// `row_offsets[r]..row_offsets[r + 1]` spans the nonzeros of row `r`.
    row_offsets: Vec<usize>,
    /// Column of each nonzero, increasing within a row.
    col_indices: Vec<usize>,
    /// Row of each nonzero, so coordinate lookup is O(1).
    row_of_nz: Vec<usize>,
}

/// Shared immutable sparsity pattern.
///
/// Cloning is cheap (reference count bump). Equality is structural, with a
/// pointer fast path for patterns that share storage.
#[derive(Clone)]
pub struct Sparsity(Arc<Pattern>);

/// How [`Sparsity::from_triplets_mapped`] treats repeated coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Repeated coordinates collapse onto one nonzero; every triplet that
    /// named it maps to that nonzero (scatter-accumulate reconstruction).
    Accumulate,
    /// A repeated coordinate is an error.
    Reject,
}

impl Sparsity {
    fn from_parts(rows: usize, cols: usize, row_offsets: Vec<usize>, col_indices: Vec<usize>) -> Self {
        let mut row_of_nz = Vec::with_capacity(col_indices.len());
        for r in 0..rows {
            let len = row_offsets[r + 1] - row_offsets[r];
            row_of_nz.extend(std::iter::repeat(r).take(len));
        }
        Sparsity(Arc::new(Pattern {
            rows,
            cols,
            row_offsets,
            col_indices,
            row_of_nz,
        }))
    }

    /// Build a pattern from raw compressed-row arrays, validating them.
    pub fn from_compressed(
        rows: usize,
        cols: usize,
        row_offsets: Vec<usize>,
        col_indices: Vec<usize>,
    ) -> Result<Self> {
        let expected = rows.checked_add(1).ok_or(GraphError::ShapeMismatch {
            context: "row count",
            expected: usize::MAX - 1,
            got: rows,
        })?;
        if row_offsets.len() != expected {
            return Err(GraphError::ShapeMismatch {
                context: "row offset table",
                expected,
                got: row_offsets.len(),
            });
        }
        if row_offsets[0] != 0 || row_offsets[rows] != col_indices.len() {
            return Err(GraphError::ShapeMismatch {
                context: "row offset table end",
                expected: col_indices.len(),
                got: row_offsets[rows],
            });
        }
        for r in 0..rows {
            let (start, end) = (row_offsets[r], row_offsets[r + 1]);
            if start > end || end > col_indices.len() {
                return Err(GraphError::ShapeMismatch {
                    context: "row offset ordering",
                    expected: start,
                    got: end,
                });
            }
            for k in start..end {
                let c = col_indices[k];
                if c >= cols {
                    return Err(GraphError::InvalidCoordinate { row: r, col: c, rows, cols });
                }
                if k > start && col_indices[k - 1] >= c {
                    return Err(GraphError::DuplicateCoordinate { row: r, col: c });
                }
            }
        }
        Ok(Self::from_parts(rows, cols, row_offsets, col_indices))
    }

    /// A pattern with no stored entries (the structural zero).
    pub fn empty(rows: usize, cols: usize) -> Self {
        Self::from_parts(rows, cols, vec![0; rows + 1], Vec::new())
    }

    /// A fully dense pattern.
    pub fn dense(rows: usize, cols: usize) -> Self {
        let row_offsets = (0..=rows).map(|r| r * cols).collect();
        let col_indices = (0..rows).flat_map(|_| 0..cols).collect();
        Self::from_parts(rows, cols, row_offsets, col_indices)
    }

    /// A dense column vector of length `n`.
    pub fn column(n: usize) -> Self {
        Self::dense(n, 1)
    }

    /// The `n × n` diagonal pattern.
    pub fn diagonal(n: usize) -> Self {
        Self::from_parts(n, n, (0..=n).collect(), (0..n).collect())
    }

    /// Build a pattern from coordinate lists. Duplicates are merged.
    pub fn from_triplets(rows: usize, cols: usize, row_list: &[usize], col_list: &[usize]) -> Result<Self> {
        Self::from_triplets_mapped(rows, cols, row_list, col_list, DuplicatePolicy::Accumulate)
            .map(|(sp, _)| sp)
    }

    /// Build a pattern from coordinate lists and report where each triplet landed.
    ///
    /// Returns `(pattern, mapping)` where `mapping[t]` is the nonzero index of
    /// `(row_list[t], col_list[t])` in the new pattern.
    pub fn from_triplets_mapped(
        rows: usize,
        cols: usize,
        row_list: &[usize],
        col_list: &[usize],
        policy: DuplicatePolicy,
    ) -> Result<(Self, Vec<usize>)> {
        if row_list.len() != col_list.len() {
            return Err(GraphError::ShapeMismatch {
                context: "triplet column list",
                expected: row_list.len(),
                got: col_list.len(),
            });
        }
        for (&row, &col) in row_list.iter().zip(col_list) {
            if row >= rows || col >= cols {
                return Err(GraphError::InvalidCoordinate { row, col, rows, cols });
            }
        }

        let mut order: Vec<usize> = (0..row_list.len()).collect();
        order.sort_by_key(|&t| (row_list[t], col_list[t]));

        let mut row_offsets = vec![0usize; rows + 1];
        let mut col_indices = Vec::with_capacity(order.len());
        let mut mapping = vec![0usize; order.len()];
        let mut last: Option<(usize, usize)> = None;
        for &t in &order {
            let coord = (row_list[t], col_list[t]);
            if last == Some(coord) {
                if policy == DuplicatePolicy::Reject {
                    return Err(GraphError::DuplicateCoordinate { row: coord.0, col: coord.1 });
                }
            } else {
                col_indices.push(coord.1);
                row_offsets[coord.0 + 1] += 1;
                last = Some(coord);
            }
            mapping[t] = col_indices.len() - 1;
        }
        for r in 0..rows {
            row_offsets[r + 1] += row_offsets[r];
        }

        Ok((Self::from_parts(rows, cols, row_offsets, col_indices), mapping))
    }

    /// Union of two equally shaped patterns.
    ///
    /// Returns `(union, map_a, map_b)` where `map_a[k]` is the union nonzero
    /// of nonzero `k` of `self`, likewise for `other`.
    pub fn union(&self, other: &Sparsity) -> Result<(Sparsity, Vec<usize>, Vec<usize>)> {
        self.check_same_shape(other, "union operand")?;
        let (mut rows, mut cols) = self.triplets();
        let (rows_b, cols_b) = other.triplets();
        rows.extend_from_slice(&rows_b);
        cols.extend_from_slice(&cols_b);
        let (sp, mut mapping) =
            Self::from_triplets_mapped(self.rows(), self.cols(), &rows, &cols, DuplicatePolicy::Accumulate)?;
        let map_b = mapping.split_off(self.nnz());
        Ok((sp, mapping, map_b))
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.0.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.0.cols
    }

    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.0.rows, self.0.cols)
    }

    /// Number of stored entries.
    #[inline]
    pub fn nnz(&self) -> usize {
        self.0.col_indices.len()
    }

    /// Number of matrix elements, `rows * cols`.
    #[inline]
    pub fn numel(&self) -> usize {
        self.0.rows * self.0.cols
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.col_indices.is_empty()
    }

    #[inline]
    pub fn is_scalar(&self) -> bool {
        self.0.rows == 1 && self.0.cols == 1
    }

    /// Every element is stored.
    #[inline]
    pub fn is_dense(&self) -> bool {
        self.nnz() == self.numel()
    }

    /// Square, with exactly the diagonal stored.
    pub fn is_diagonal(&self) -> bool {
        let p = &*self.0;
        if p.rows != p.cols || p.col_indices.len() != p.rows {
            return false;
        }
        p.col_indices.iter().enumerate().all(|(k, &c)| p.row_of_nz[k] == c)
    }

    #[inline]
    pub fn row_offsets(&self) -> &[usize] {
        &self.0.row_offsets
    }

    #[inline]
    pub fn col_indices(&self) -> &[usize] {
        &self.0.col_indices
    }

    /// Column indices of the nonzeros in `row`.
    #[inline]
    pub fn row(&self, row: usize) -> &[usize] {
        let p = &*self.0;
        &p.col_indices[p.row_offsets[row]..p.row_offsets[row + 1]]
    }

    /// `(row, col)` of nonzero `k`.
    #[inline]
    pub fn coordinates(&self, k: usize) -> (usize, usize) {
        (self.0.row_of_nz[k], self.0.col_indices[k])
    }

    /// Dense row-major element index of nonzero `k`.
    #[inline]
    pub fn element(&self, k: usize) -> usize {
        self.0.row_of_nz[k] * self.0.cols + self.0.col_indices[k]
    }

    /// Nonzero index of `(row, col)`, or `None` if the entry is not stored.
    pub fn nonzero_index(&self, row: usize, col: usize) -> Option<usize> {
        if row >= self.0.rows || col >= self.0.cols {
            return None;
        }
        let start = self.0.row_offsets[row];
        self.row(row).binary_search(&col).ok().map(|pos| start + pos)
    }

    /// Look up a batch of dense element indices (`row * cols + col`).
    pub fn nonzeros_of_elements(&self, elements: &[usize]) -> Vec<Option<usize>> {
        let cols = self.0.cols;
        if cols == 0 {
            return vec![None; elements.len()];
        }
        elements
            .iter()
            .map(|&el| self.nonzero_index(el / cols, el % cols))
            .collect()
    }

    /// Coordinate lists `(rows, cols)` of all nonzeros in nonzero order.
    pub fn triplets(&self) -> (Vec<usize>, Vec<usize>) {
        (self.0.row_of_nz.clone(), self.0.col_indices.clone())
    }

    /// Whether both handles share the same storage.
    #[inline]
    pub fn is_same(&self, other: &Sparsity) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn check_same_shape(&self, other: &Sparsity, context: &'static str) -> Result<()> {
        if self.rows() != other.rows() {
            return Err(GraphError::ShapeMismatch {
                context,
                expected: self.rows(),
                got: other.rows(),
            });
        }
        if self.cols() != other.cols() {
            return Err(GraphError::ShapeMismatch {
                context,
                expected: self.cols(),
                got: other.cols(),
            });
        }
        Ok(())
    }

    /// `"dense"`, `"diagonal"` or `"sparse"`.
    pub fn kind(&self) -> &'static str {
        if self.is_dense() {
            "dense"
        } else if self.is_diagonal() {
            "diagonal"
        } else {
            "sparse"
        }
    }
}

impl PartialEq for Sparsity {
    fn eq(&self, other: &Self) -> bool {
        self.is_same(other) || *self.0 == *other.0
    }
}

impl Eq for Sparsity {}

impl std::hash::Hash for Sparsity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl fmt::Debug for Sparsity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sparsity")
            .field("rows", &self.rows())
            .field("cols", &self.cols())
            .field("row_offsets", &self.row_offsets())
            .field("col_indices", &self.col_indices())
            .finish()
    }
}

impl fmt::Display for Sparsity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}-by-{}", self.kind(), self.rows(), self.cols())
    }
}

#[cfg(feature = "serde")]
mod serde_support {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::Sparsity;

    #[derive(Serialize)]
    struct PatternRef<'a> {
        rows: usize,
        cols: usize,
        row_offsets: &'a [usize],
        col_indices: &'a [usize],
    }

    #[derive(Deserialize)]
    struct PatternData {
        rows: usize,
        cols: usize,
        row_offsets: Vec<usize>,
        col_indices: Vec<usize>,
    }

    impl Serialize for Sparsity {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            PatternRef {
                rows: self.rows(),
                cols: self.cols(),
                row_offsets: self.row_offsets(),
                col_indices: self.col_indices(),
            }
            .serialize(serializer)
        }
    }

    impl<'de> Deserialize<'de> for Sparsity {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            let data = PatternData::deserialize(deserializer)?;
            Sparsity::from_compressed(data.rows, data.cols, data.row_offsets, data.col_indices)
                .map_err(serde::de::Error::custom)
        }
    }
}
