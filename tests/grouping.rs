use nzgraph::IndexGrouping;
use proptest::prelude::*;

#[test]
fn groups_by_input_stably() {
    let g = IndexGrouping::build(&[2, 0, 2, 1, 0], 4);
    assert_eq!(g.len(), 5);
    assert_eq!(g.input_count(), 4);
    assert_eq!(g.offsets(), &[0, 2, 3, 5, 5]);
    assert_eq!(g.inputs(), &[0, 0, 1, 2, 2]);
    assert_eq!(g.outputs(), &[1, 4, 3, 0, 2]);
    assert_eq!(g.group(2), &[0, 2]);
    assert!(g.group(3).is_empty());
}

#[test]
fn empty_table() {
    let g = IndexGrouping::build(&[], 3);
    assert!(g.is_empty());
    assert_eq!(g.offsets(), &[0, 0, 0, 0]);
    assert_eq!(g.pairs().count(), 0);
}

#[test]
fn fan_out_keeps_output_order() {
    let g = IndexGrouping::build(&[0, 0, 0], 1);
    assert_eq!(g.pairs().collect::<Vec<_>>(), vec![(0, 0), (0, 1), (0, 2)]);
}

fn table() -> impl Strategy<Value = (Vec<usize>, usize)> {
    (1usize..=1000).prop_flat_map(|domain| (prop::collection::vec(0..domain, 0..=10_000), Just(domain)))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// The grouping equals a stable sort of `(assigns[k], k)` by input.
    #[test]
    fn grouping_is_stable_sorted_permutation((assigns, domain) in table()) {
        let g = IndexGrouping::build(&assigns, domain);

        let mut expected: Vec<(usize, usize)> = assigns.iter().copied().zip(0..).collect();
        expected.sort_by_key(|&(i, _)| i);
        let pairs: Vec<(usize, usize)> = g.pairs().collect();
        prop_assert_eq!(pairs, expected);

        prop_assert_eq!(g.offsets().len(), domain + 1);
        for i in 0..domain {
            for &k in g.group(i) {
                prop_assert_eq!(assigns[k], i);
            }
        }
    }
}
