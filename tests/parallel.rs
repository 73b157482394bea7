#![cfg(feature = "parallel")]

mod common;

use approx::assert_relative_eq;
use common::{column, ramp};
use nzgraph::Function;

fn chain() -> Function {
    let x = column("x", 6);
    let a = x.get_nonzeros(&[5, 4, 3, 2, 1, 0]).unwrap();
    let b = a.get_nonzeros(&[0, 0, 2, 4]).unwrap();
    let c = x.get_nonzeros(&[1, 1, 1, 1]).unwrap();
    let out = b.add(&c).unwrap();
    Function::new(vec![x], vec![out]).unwrap()
}

#[test]
fn fwd_par_matches_serial() {
    let f = chain();
    let seeds: Vec<Vec<Vec<f64>>> = (0..16).map(|d| vec![ramp(6, d as f64 - 4.0)]).collect();
    let serial = f.fwd_many(&seeds).unwrap();
    let parallel = f.fwd_par(&seeds).unwrap();
    for (s, p) in serial.iter().zip(&parallel) {
        for (a, b) in s[0].iter().zip(&p[0]) {
            assert_relative_eq!(*a, *b);
        }
    }
}

#[test]
fn adj_par_matches_serial() {
    let f = chain();
    let seeds: Vec<Vec<Vec<f64>>> = (0..16).map(|d| vec![ramp(4, 0.5 * d as f64)]).collect();
    assert_eq!(f.adj_par(&seeds).unwrap(), f.adj_many(&seeds).unwrap());
}

#[test]
fn eval_par_reports_bad_points() {
    let f = chain();
    let points = vec![vec![ramp(6, 1.0)], vec![ramp(5, 1.0)]];
    assert!(f.eval_par(&points).is_err());
    let good = vec![vec![ramp(6, 1.0)]; 3];
    let values = f.eval_par(&good).unwrap();
    assert_eq!(values[0], f.eval(&[&good[0][0][..]]).unwrap());
}
