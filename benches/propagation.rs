use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use nzgraph::CodegenOptions;

mod common;
use common::{gather_chain, ramp};

/// Primal, tangent and adjoint sweeps over a gather/scatter chain.
fn bench_sweeps(c: &mut Criterion) {
    let mut group = c.benchmark_group("sweeps");
    for n in [16, 1024, 65_536] {
        let f = gather_chain(n, 8);
        let x = ramp(n);

        group.bench_with_input(BenchmarkId::new("eval", n), &x, |b, x| {
            b.iter(|| black_box(f.eval(&[black_box(x.as_slice())]).unwrap()))
        });
        group.bench_with_input(BenchmarkId::new("fwd", n), &x, |b, x| {
            b.iter(|| black_box(f.fwd(&[black_box(x.as_slice())]).unwrap()))
        });
        group.bench_with_input(BenchmarkId::new("adj", n), &x, |b, x| {
            b.iter(|| black_box(f.adj(&[black_box(x.as_slice())]).unwrap()))
        });
    }
    group.finish();
}

/// Generated program vs the driver, and the cost of generation itself.
fn bench_codegen(c: &mut Criterion) {
    let mut group = c.benchmark_group("codegen");
    let n = 4096;
    let f = gather_chain(n, 8);
    let x = ramp(n);
    let program = f.generate(&CodegenOptions::default());

    group.bench_function("generate", |b| {
        b.iter(|| black_box(f.generate(&CodegenOptions::default())))
    });
    group.bench_function("program_run", |b| {
        b.iter(|| black_box(program.run(&[black_box(x.as_slice())]).unwrap()))
    });
    group.bench_function("driver_eval", |b| {
        b.iter(|| black_box(f.eval(&[black_box(x.as_slice())]).unwrap()))
    });
    group.finish();
}

/// Symbolic reverse sweep: builds one scatter per node.
fn bench_symbolic(c: &mut Criterion) {
    let mut group = c.benchmark_group("symbolic");
    for n in [16, 256] {
        let f = gather_chain(n, 4);
        let w = nzgraph::Expr::symbol("w", nzgraph::Sparsity::column(n));
        group.bench_with_input(BenchmarkId::new("adj_symbolic", n), &w, |b, w| {
            b.iter(|| black_box(f.adj_symbolic(&[vec![w.clone()]]).unwrap()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_sweeps, bench_codegen, bench_symbolic);
criterion_main!(benches);
