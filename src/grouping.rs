//! Bucket-sorted grouping of a gather table by source nonzero.
//!
//! A selection node stores, per output nonzero `k`, the input nonzero
//! `assigns[k]` it reads. Reverse propagation and code generation want the
//! inverse view: for each input nonzero, the outputs it feeds. The grouping
//! is built once per node by a counting pass and a placement pass, so it is
//! O(n) in the table length with no comparison sort and no hashing.

use log::debug;

/// `(input, output)` pairs of a gather table, grouped by input ascending.
///
/// Within a group, outputs keep their original (ascending) order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexGrouping {
    /// `offsets[i]..offsets[i + 1]` is the slice of pairs with input `i`.
    offsets: Vec<usize>,
    inputs: Vec<usize>,
    outputs: Vec<usize>,
}

impl IndexGrouping {
    /// Group `assigns` (output → input) by input nonzero.
    ///
    /// # Panics
    ///
    /// Panics if any `assigns[k] >= input_nnz`. Node constructors validate
    /// their tables before a grouping is ever built.
    pub fn build(assigns: &[usize], input_nnz: usize) -> Self {
        let n = assigns.len();

        // Histogram shifted by one so the prefix sum yields group starts.
        let mut offsets = vec![0usize; input_nnz + 1];
        for &i in assigns {
            offsets[i + 1] += 1;
        }
        for i in 0..input_nnz {
            offsets[i + 1] += offsets[i];
        }

        // Stable placement in original output order.
        let mut cursor = offsets[..input_nnz].to_vec();
        let mut inputs = vec![0usize; n];
        let mut outputs = vec![0usize; n];
        for (k, &i) in assigns.iter().enumerate() {
            let pos = cursor[i];
            inputs[pos] = i;
            outputs[pos] = k;
            cursor[i] += 1;
        }

        debug!(
            "built index grouping: {} pairs over {} input nonzeros",
            n, input_nnz
        );

        IndexGrouping {
            offsets,
            inputs,
            outputs,
        }
    }

    /// Number of pairs (the gather table length).
    #[inline]
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Number of input nonzeros the grouping was built over.
    #[inline]
    pub fn input_count(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Input side of every pair, ascending.
    #[inline]
    pub fn inputs(&self) -> &[usize] {
        &self.inputs
    }

    /// Output side of every pair, in grouped order.
    #[inline]
    pub fn outputs(&self) -> &[usize] {
        &self.outputs
    }

    /// Group start offsets, length `input_count() + 1`.
    #[inline]
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// Outputs fed by input nonzero `i`.
    #[inline]
    pub fn group(&self, i: usize) -> &[usize] {
        &self.outputs[self.offsets[i]..self.offsets[i + 1]]
    }

    /// Iterate `(input, output)` pairs in grouped order.
    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.inputs.iter().copied().zip(self.outputs.iter().copied())
    }
}
