mod common;

use common::{column, init};
use nzgraph::{AdjointBuffers, Expr, GraphError, Sparsity, TaintBits, TangentBuffers};

#[test]
fn gather_then_adjoint_end_to_end() {
    init();
    let x = column("x", 4);
    let y = Expr::select(Some(&x), Sparsity::dense(1, 2), vec![3, 1]).unwrap();
    let sel = y.as_selection().unwrap();

    let input = [10.0_f64, 20.0, 30.0, 40.0];
    let mut out = [0.0; 2];
    sel.eval_primal(Some(&input[..]), Some(&mut out[..]));
    assert_eq!(out, [40.0, 20.0]);

    let mut seed = [5.0_f64, 7.0];
    let mut sens = [0.0; 4];
    sel.eval_adjoint(Some(&mut seed[..]), Some(&mut sens[..]));
    assert_eq!(sens, [0.0, 7.0, 0.0, 5.0]);
    assert_eq!(seed, [0.0, 0.0]);
}

#[test]
fn adjoint_twice_equals_once() {
    let x = column("x", 3);
    let y = Expr::select(Some(&x), Sparsity::column(3), vec![2, 2, 0]).unwrap();
    let sel = y.as_selection().unwrap();

    let mut seed = [1.5_f64, -2.0, 4.0];
    let mut sens = [0.0; 3];
    sel.eval_adjoint(Some(&mut seed[..]), Some(&mut sens[..]));
    let once = sens;
    sel.eval_adjoint(Some(&mut seed[..]), Some(&mut sens[..]));
    assert_eq!(sens, once);
    assert_eq!(once, [4.0, 0.0, -0.5]);
}

#[test]
fn fan_out_accumulates() {
    let x = column("x", 1);
    let y = Expr::select(Some(&x), Sparsity::column(3), vec![0, 0, 0]).unwrap();
    let sel = y.as_selection().unwrap();

    let mut seed = [1.0_f64, 2.0, 3.0];
    let mut sens = [0.0];
    sel.eval_adjoint(Some(&mut seed[..]), Some(&mut sens[..]));
    assert_eq!(sens, [6.0]);
}

#[test]
fn adjoint_accumulates_into_existing_sensitivity() {
    let x = column("x", 2);
    let y = Expr::select(Some(&x), Sparsity::column(1), vec![1]).unwrap();
    let sel = y.as_selection().unwrap();

    let mut seed = [3.0_f64];
    let mut sens = [1.0, 1.0];
    sel.eval_adjoint(Some(&mut seed[..]), Some(&mut sens[..]));
    assert_eq!(sens, [1.0, 4.0]);
}

#[test]
fn absent_buffers_skip() {
    let x = column("x", 2);
    let y = Expr::select(Some(&x), Sparsity::column(2), vec![1, 0]).unwrap();
    let sel = y.as_selection().unwrap();

    let mut out = [9.0_f64, 9.0];
    sel.eval_primal(None, Some(&mut out[..]));
    assert_eq!(out, [9.0, 9.0]);

    let input = [1.0_f64, 2.0];
    sel.eval_primal(Some(&input[..]), None);

    let mut seed = [1.0_f64, 1.0];
    sel.eval_adjoint(Some(&mut seed[..]), None);
    assert_eq!(seed, [1.0, 1.0]);
}

#[test]
fn tangent_is_the_same_gather() {
    let x = column("x", 3);
    let y = Expr::select(Some(&x), Sparsity::column(2), vec![2, 0]).unwrap();
    let sel = y.as_selection().unwrap();

    let seed = [0.5_f64, 1.5, 2.5];
    let mut sens = [0.0; 2];
    sel.eval_tangent(Some(&seed[..]), Some(&mut sens[..]));
    assert_eq!(sens, [2.5, 0.5]);
}

#[test]
fn evaluate_runs_every_direction() {
    let x = column("x", 3);
    let y = Expr::select(Some(&x), Sparsity::column(2), vec![1, 1]).unwrap();
    let sel = y.as_selection().unwrap();

    let input = [1.0_f64, 2.0, 3.0];
    let mut out = [0.0; 2];
    let (t0, t1) = ([1.0, 0.0, 0.0], [0.0, 1.0, 0.0]);
    let (mut s0, mut s1) = ([9.0; 2], [9.0; 2]);
    let mut a_seed = [1.0, 2.0];
    let mut a_sens = [0.0; 3];

    let mut fwd = [
        TangentBuffers {
            seed: Some(&t0[..]),
            sens: Some(&mut s0[..]),
        },
        TangentBuffers {
            seed: Some(&t1[..]),
            sens: Some(&mut s1[..]),
        },
    ];
    let mut adj = [AdjointBuffers {
        seed: Some(&mut a_seed[..]),
        sens: Some(&mut a_sens[..]),
    }];
    sel.evaluate(Some(&input[..]), Some(&mut out[..]), &mut fwd, &mut adj);

    assert_eq!(out, [2.0, 2.0]);
    assert_eq!(s0, [0.0, 0.0]);
    assert_eq!(s1, [1.0, 1.0]);
    assert_eq!(a_sens, [0.0, 3.0, 0.0]);
    assert_eq!(a_seed, [0.0, 0.0]);
}

#[test]
fn taint_forward_copies_and_reverse_clears() {
    let x = column("x", 4);
    let y = Expr::select(Some(&x), Sparsity::column(3), vec![3, 0, 3]).unwrap();
    let sel = y.as_selection().unwrap();

    let mut input: [TaintBits; 4] = [0b001, 0b010, 0b100, 0b1000];
    let mut out: [TaintBits; 3] = [0; 3];
    sel.propagate_taint(Some(&mut input[..]), Some(&mut out[..]), true);
    assert_eq!(out, [0b1000, 0b001, 0b1000]);

    let mut input: [TaintBits; 4] = [0; 4];
    let mut out: [TaintBits; 3] = [0b01, 0b10, 0b100];
    sel.propagate_taint(Some(&mut input[..]), Some(&mut out[..]), false);
    assert_eq!(input, [0b10, 0, 0, 0b101]);
    assert_eq!(out, [0, 0, 0]);
}

#[test]
fn identity_detection() {
    let x = column("x", 3);
    let id = Expr::select(Some(&x), Sparsity::column(3), vec![0, 1, 2]).unwrap();
    assert!(id.as_selection().unwrap().is_identity());

    let perm = Expr::select(Some(&x), Sparsity::column(3), vec![1, 0, 2]).unwrap();
    assert!(!perm.as_selection().unwrap().is_identity());

    let subset = Expr::select(Some(&x), Sparsity::column(2), vec![0, 1]).unwrap();
    assert!(!subset.as_selection().unwrap().is_identity());

    // Same nonzero count, different pattern.
    let reshaped = Expr::select(Some(&x), Sparsity::dense(1, 3), vec![0, 1, 2]).unwrap();
    assert!(!reshaped.as_selection().unwrap().is_identity());
}

#[test]
fn identity_gather_reproduces_input() {
    let sp = Sparsity::from_triplets(3, 3, &[0, 1, 2, 2], &[2, 1, 0, 2]).unwrap();
    let x = Expr::symbol("x", sp.clone());
    let id = Expr::select(Some(&x), sp, vec![0, 1, 2, 3]).unwrap();
    let sel = id.as_selection().unwrap();
    assert!(sel.is_identity());

    let input = [1.25_f64, -3.0, 7.5, 0.125];
    let mut out = [0.0; 4];
    sel.eval_primal(Some(&input[..]), Some(&mut out[..]));
    assert_eq!(out, input);
}

#[test]
fn construction_errors() {
    let x = column("x", 4);

    let err = Expr::select(Some(&x), Sparsity::column(2), vec![0, 1, 2]).unwrap_err();
    assert_eq!(
        err,
        GraphError::ShapeMismatch {
            context: "selection table",
            expected: 2,
            got: 3
        }
    );

    let err = Expr::select(Some(&x), Sparsity::column(1), vec![4]).unwrap_err();
    assert_eq!(err, GraphError::NonzeroOutOfRange { index: 4, nnz: 4 });

    let err = Expr::select(None, Sparsity::column(1), vec![0]).unwrap_err();
    assert_eq!(err, GraphError::DanglingDependency);
}

#[test]
fn empty_table_is_structural_zero() {
    let z = Expr::select(None, Sparsity::empty(2, 3), Vec::new()).unwrap();
    assert!(z.is_structural_zero());
    assert_eq!(z.shape(), (2, 3));
    assert_eq!(z.to_string(), "sparse(2,3)");
}

#[test]
fn dense_mapping_view() {
    let x = column("x", 3);
    let y = Expr::select(Some(&x), Sparsity::diagonal(2), vec![0, 2]).unwrap();
    assert_eq!(y.as_selection().unwrap().mapping(), vec![Some(0), None, None, Some(2)]);
}

#[test]
fn grouping_is_built_once_and_shared() {
    let x = column("x", 3);
    let y = Expr::select(Some(&x), Sparsity::column(4), vec![2, 0, 2, 1]).unwrap();
    let sel = y.as_selection().unwrap();
    let first = sel.grouping() as *const _;
    let second = sel.grouping() as *const _;
    assert_eq!(first, second);
    assert_eq!(sel.grouping().inputs(), &[0, 1, 2, 2]);
    assert_eq!(sel.grouping().outputs(), &[1, 3, 0, 2]);
}

#[test]
fn describe_forms() {
    let x = column("x", 4);

    let general = Expr::select(Some(&x), Sparsity::dense(1, 2), vec![3, 1]).unwrap();
    assert_eq!(
        general.to_string(),
        "mapping(dense 1-by-2 matrix, dependencies: [x], nonzeros: [3,1])"
    );

    let diag = Expr::select(Some(&x), Sparsity::diagonal(2), vec![0, 2]).unwrap();
    assert_eq!(
        diag.to_string(),
        "mapping(diagonal 2-by-2 matrix, dependencies: [x], nonzeros: [0,2])"
    );

    assert_eq!(x.get_nonzeros(&[2]).unwrap().to_string(), "x[2]");

    let s = Expr::symbol("s", Sparsity::dense(1, 1));
    let copy = Expr::select(Some(&s), Sparsity::dense(1, 1), vec![0]).unwrap();
    assert_eq!(copy.to_string(), "s");
}

#[test]
fn submatrix_keeps_only_stored_entries() {
    let sp = Sparsity::from_triplets(3, 3, &[0, 0, 1, 2], &[0, 2, 1, 2]).unwrap();
    let a = Expr::symbol("a", sp);
    let sub = a.submatrix(&[2, 0], &[2, 0]).unwrap();
    assert_eq!(sub.shape(), (2, 2));
    assert_eq!(sub.nnz(), 3);
    // (0,0) <- a(2,2), (1,0) <- a(0,2), (1,1) <- a(0,0)
    assert_eq!(sub.as_selection().unwrap().assigns(), &[3, 1, 0]);

    let err = a.submatrix(&[3], &[0]).unwrap_err();
    assert!(matches!(err, GraphError::InvalidCoordinate { row: 3, .. }));
}
