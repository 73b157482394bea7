#![allow(dead_code)]

use nzgraph::{Expr, Function, Sparsity};

// ─── Tables ────────────────────────────────────────────────────────────────

/// Deterministic pseudo-random gather table (LCG), `len` entries over `domain`.
pub fn scrambled_table(len: usize, domain: usize, seed: u64) -> Vec<usize> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((state >> 33) as usize) % domain
        })
        .collect()
}

// ─── Graphs ────────────────────────────────────────────────────────────────

/// `depth` chained gathers over a length-`n` column, each summed with the
/// previous stage so every layer carries a scatter as well.
pub fn gather_chain(n: usize, depth: usize) -> Function {
    let x = Expr::symbol("x", Sparsity::column(n));
    let mut cur = x.clone();
    for layer in 0..depth {
        let table = scrambled_table(n, n, layer as u64 + 1);
        let g = cur.get_nonzeros(&table).unwrap();
        cur = g.add(&cur).unwrap();
    }
    Function::new(vec![x], vec![cur]).unwrap()
}

pub fn ramp(n: usize) -> Vec<f64> {
    (0..n).map(|i| 0.5 + 0.01 * i as f64).collect()
}
