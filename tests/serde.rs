#![cfg(feature = "serde")]

mod common;

use common::{column, ramp};
use nzgraph::{CodegenOptions, ConstantPool, Function, Program, Sparsity};

#[test]
fn sparsity_roundtrips_through_json() {
    let sp = Sparsity::from_triplets(3, 4, &[2, 0, 1, 0], &[1, 3, 0, 0]).unwrap();
    let json = serde_json::to_string(&sp).unwrap();
    let back: Sparsity = serde_json::from_str(&json).unwrap();
    assert_eq!(back, sp);
}

#[test]
fn malformed_sparsity_is_rejected() {
    let json = r#"{"rows":1,"cols":2,"row_offsets":[0,2],"col_indices":[1,0]}"#;
    assert!(serde_json::from_str::<Sparsity>(json).is_err());

    let json = r#"{"rows":18446744073709551615,"cols":1,"row_offsets":[],"col_indices":[]}"#;
    assert!(serde_json::from_str::<Sparsity>(json).is_err());
}

#[test]
fn malformed_program_is_rejected_before_running() {
    let json = r#"{"statements":[{"Clear":{"dst":1,"len":5}}],"pool":[],"buffer_lens":[1,2],"inputs":[0],"outputs":[1],"real_type":"double"}"#;
    let program: Program = serde_json::from_str(json).unwrap();
    assert!(program.run(&[&[1.0][..]]).is_err());
}

#[test]
fn pool_serializes_as_table_list() {
    let mut pool = ConstantPool::new();
    pool.intern(&[1, 3]);
    pool.intern(&[0]);
    assert_eq!(serde_json::to_string(&pool).unwrap(), "[[1,3],[0]]");

    let back: ConstantPool = serde_json::from_str("[[1,3],[0]]").unwrap();
    assert_eq!(back, pool);
}

#[test]
fn program_roundtrip_runs_identically() {
    let x = column("x", 4);
    let y = x.get_nonzeros(&[3, 1, 1]).unwrap();
    let sum = y.add(&x.get_nonzeros(&[0, 0, 2]).unwrap()).unwrap();
    let f = Function::new(vec![x], vec![sum]).unwrap();
    let program = f.generate(&CodegenOptions::default());

    let json = serde_json::to_string(&program).unwrap();
    let back: Program = serde_json::from_str(&json).unwrap();
    assert_eq!(back, program);

    let data = ramp(4, 1.0);
    assert_eq!(back.run(&[&data[..]]).unwrap(), program.run(&[&data[..]]).unwrap());
}
