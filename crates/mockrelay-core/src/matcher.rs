//! Mock matcher: exact match first, Jaccard-similarity fuzzy match second.

use crate::mock::{Chunk, Mock};
use crate::store::MockStore;
use std::collections::HashSet;

const FUZZY_THRESHOLD_FRESH: f64 = 0.9;
const FUZZY_THRESHOLD_STALE: f64 = 0.4;

/// Run the full exact -> fuzzy -> CAS-retry match algorithm against a
/// store for the given live request chunks. Returns the recorded response
/// chunks on a hit, `None` on a miss.
pub fn match_request(store: &MockStore, request_chunks: &[Vec<u8>]) -> Option<Vec<Chunk>> {
    loop {
        let filtered = store.filtered();

        let idx = exact_match(&filtered, request_chunks)
            .or_else(|| fuzzy_match(&filtered, request_chunks, FUZZY_THRESHOLD_FRESH).map(|(i, _)| i));

        if let Some(i) = idx {
            let mock = &filtered[i];
            let responses = mock.spec.responses.clone();
            if store.update_unfiltered(&mock.id).is_some() {
                return Some(responses);
            }
            continue; // lost the CAS race, restart from the top
        }

        let unfiltered = store.unfiltered();
        if let Some(i) = exact_match(&unfiltered, request_chunks) {
            return Some(unfiltered[i].spec.responses.clone());
        }

        let mut combined: Vec<Mock> = filtered.clone();
        combined.extend(unfiltered.clone());
        if let Some((i, _)) = fuzzy_match(&combined, request_chunks, FUZZY_THRESHOLD_STALE) {
            let mock = &combined[i];
            let is_filtered = filtered.iter().any(|m| m.id == mock.id);
            if is_filtered {
                if store.update_unfiltered(&mock.id).is_some() {
                    return Some(mock.spec.responses.clone());
                }
                continue; // restart on a lost race
            }
            return Some(mock.spec.responses.clone());
        }

        return None;
    }
}

/// Exact match: same chunk count, each chunk's stored representation
/// equal to the live chunk's canonical representation (raw UTF-8 if
/// ASCII, base64 otherwise). Returns the index of the first match,
/// preferring earlier insertion order (mocks are already insertion-ordered).
pub fn exact_match(mocks: &[Mock], request_chunks: &[Vec<u8>]) -> Option<usize> {
    'outer: for (i, mock) in mocks.iter().enumerate() {
        if mock.spec.requests.len() != request_chunks.len() {
            continue;
        }
        for (recorded, live) in mock.spec.requests.iter().zip(request_chunks) {
            let live_chunk = Chunk::from_bytes(live);
            if recorded.data != live_chunk.data || recorded.binary != live_chunk.binary {
                continue 'outer;
            }
        }
        return Some(i);
    }
    None
}

/// Fuzzy match via per-chunk Jaccard similarity over k-shingles, combined
/// by max across chunk pairs (a single-chunk request, the common case,
/// decides the whole mock). Returns `(index, similarity)` for the highest
/// similarity above `threshold`, preferring filtered-over-unfiltered
/// ordering already encoded in `mocks`, then higher similarity, then
/// earlier insertion order (stable scan order).
pub fn fuzzy_match(mocks: &[Mock], request_chunks: &[Vec<u8>], threshold: f64) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (i, mock) in mocks.iter().enumerate() {
        let mut max_sim = 0.0f64;
        for (recorded, live) in mock.spec.requests.iter().zip(request_chunks) {
            let recorded_bytes = recorded.to_bytes();
            let sim = jaccard_similarity(&recorded_bytes, live);
            if sim > max_sim {
                max_sim = sim;
            }
        }
        if max_sim > threshold {
            let better = match best {
                Some((_, best_sim)) => max_sim > best_sim,
                None => true,
            };
            if better {
                best = Some((i, max_sim));
            }
        }
    }
    best
}

/// Jaccard similarity of k-shingles between two byte slices.
/// `k = clamp(len(b) / 5, 3, 8)`, where `b` is the live payload.
pub fn jaccard_similarity(a: &[u8], b: &[u8]) -> f64 {
    let k = shingle_k(b.len());
    let shingles_a = shingles(a, k);
    let shingles_b = shingles(b, k);

    if shingles_a.is_empty() && shingles_b.is_empty() {
        return if a == b { 1.0 } else { 0.0 };
    }

    let intersection = shingles_a.intersection(&shingles_b).count();
    let union = shingles_a.union(&shingles_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// The shingle width used for a payload of `len` bytes.
pub fn shingle_k(len: usize) -> usize {
    (len / 5).clamp(3, 8)
}

fn shingles(data: &[u8], k: usize) -> HashSet<&[u8]> {
    if k == 0 || data.len() < k {
        return HashSet::new();
    }
    data.windows(k).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s5_fuzzy_over_binary() {
        // Recorded "ABCD" vs live "ABCE"; k = clamp(4/5,3,8) = 3.
        let sim = jaccard_similarity(b"ABCD", b"ABCE");
        assert!((sim - (1.0 / 3.0)).abs() < 1e-9);
        assert!(sim < 0.4); // miss at threshold 0.4
        assert!(sim > 0.3); // hit at threshold 0.3
    }

    #[test]
    fn exact_match_requires_same_chunk_count() {
        let now = chrono::Utc::now();
        let mock = Mock::new(
            crate::mock::Kind::Http,
            crate::mock::Spec {
                requests: vec![Chunk::from_bytes(b"GET /")],
                responses: vec![Chunk::from_bytes(b"200")],
                req_ts: now,
                res_ts: now,
                metadata: Default::default(),
            },
            "c",
            "s",
            false,
        )
        .unwrap();

        assert_eq!(exact_match(&[mock.clone()], &[b"GET /".to_vec()]), Some(0));
        assert_eq!(
            exact_match(&[mock], &[b"GET /".to_vec(), b"extra".to_vec()]),
            None
        );
    }

    #[test]
    fn shingle_k_is_clamped() {
        assert_eq!(shingle_k(4), 3);
        assert_eq!(shingle_k(100), 8);
        assert_eq!(shingle_k(25), 5);
    }
}
