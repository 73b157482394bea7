#![allow(dead_code)]

use std::sync::Once;

use nzgraph::{Expr, Sparsity};

static INIT: Once = Once::new();

/// Route `log` output through env_logger once per test binary.
pub fn init() {
    INIT.call_once(|| {
        let env = env_logger::Env::default().default_filter_or("debug");
        let _ = env_logger::Builder::from_env(env).is_test(true).try_init();
    });
}

/// Dense column symbol of length `n`.
pub fn column(name: &str, n: usize) -> Expr {
    Expr::symbol(name, Sparsity::column(n))
}

/// Deterministic non-trivial data of length `n`.
pub fn ramp(n: usize, scale: f64) -> Vec<f64> {
    (0..n).map(|i| scale * (i as f64 + 1.0) + 0.25 * (i % 3) as f64).collect()
}

/// Dense row-major copy of nonzero data stored on `e`'s pattern.
pub fn densify(e: &Expr, values: &[f64]) -> Vec<f64> {
    let sp = e.sparsity();
    let mut dense = vec![0.0; sp.numel()];
    for k in 0..sp.nnz() {
        dense[sp.element(k)] = values[k];
    }
    dense
}

/// Evaluate a closed expression over the single symbol `input`.
pub fn eval_over(input: &Expr, e: &Expr, data: &[f64]) -> Vec<f64> {
    let f = nzgraph::Function::new(vec![input.clone()], vec![e.clone()]).unwrap();
    let out = f.eval(&[data]).unwrap();
    densify(e, &out[0])
}
