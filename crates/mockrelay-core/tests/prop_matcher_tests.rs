//! Property-based tests for the mock matcher's similarity primitives.
//!
//! These don't exercise the full exact -> fuzzy -> CAS loop (that's
//! covered by the in-module unit tests alongside the code it tests);
//! they instead pin down the mathematical properties `jaccard_similarity`
//! and `shingle_k` must hold for every input, not just the handful of
//! examples a unit test can enumerate.

use mockrelay_core::matcher::{jaccard_similarity, shingle_k};
use proptest::prelude::*;

proptest! {
    #[test]
    fn jaccard_similarity_is_bounded(a in prop::collection::vec(any::<u8>(), 0..64),
                                      b in prop::collection::vec(any::<u8>(), 0..64)) {
        let sim = jaccard_similarity(&a, &b);
        prop_assert!((0.0..=1.0).contains(&sim), "similarity {sim} out of range");
    }

    // Symmetry only holds when both slices share a length: the shingle
    // width `k` is derived from the *second* argument alone, so swapping
    // unequal-length slices can change `k` and the result along with it.
    #[test]
    fn jaccard_similarity_is_symmetric_for_equal_length_inputs(data in prop::collection::vec((any::<u8>(), any::<u8>()), 0..64)) {
        let a: Vec<u8> = data.iter().map(|(x, _)| *x).collect();
        let b: Vec<u8> = data.iter().map(|(_, y)| *y).collect();
        prop_assert!((jaccard_similarity(&a, &b) - jaccard_similarity(&b, &a)).abs() < f64::EPSILON);
    }

    #[test]
    fn identical_inputs_are_maximally_similar(a in prop::collection::vec(any::<u8>(), 0..64)) {
        prop_assert!((jaccard_similarity(&a, &a) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn shingle_k_never_leaves_the_clamp_range(len in 0usize..10_000) {
        let k = shingle_k(len);
        prop_assert!((3..=8).contains(&k));
    }
}
