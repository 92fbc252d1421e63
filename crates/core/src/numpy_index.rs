//! `NumpyIndex` — brute-force flat inner-product search over a row-normalized
//! `f32` matrix (spec.md §4.5). No ANN structure: every query scores every row.

/// L2-normalize `v` in place. A zero vector is left as-is (its score against
/// anything is 0, which is the correct answer for a degenerate embedding).
fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub struct NumpyIndex {
    dim: usize,
    rows: Vec<Vec<f32>>,
}

impl NumpyIndex {
    /// Build the index, row-normalizing every vector so inner product is
    /// equivalent to cosine similarity.
    pub fn build(dim: usize, mut rows: Vec<Vec<f32>>) -> Self {
        for row in rows.iter_mut() {
            normalize(row);
        }
        Self { dim, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// The (already row-normalized) backing matrix, exposed so callers that
    /// need to republish a filtered subset don't have to re-normalize.
    pub fn rows(&self) -> &[Vec<f32>] {
        &self.rows
    }

    /// Return up to `k` `(score, row_index)` pairs, sorted by score
    /// descending. Empty index or `k == 0` short-circuits to an empty
    /// result. If `k` exceeds the number of rows, the result is padded to
    /// length `k` with `(f32::NEG_INFINITY, -1)` sentinels so callers can
    /// always index `result[..k]` uniformly.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(f32, i64)> {
        if self.rows.is_empty() || k == 0 {
            return Vec::new();
        }
        let mut q = query.to_vec();
        normalize(&mut q);

        let mut scored: Vec<(f32, i64)> =
            self.rows.iter().enumerate().map(|(i, row)| (dot(&q, row), i as i64)).collect();

        let n = scored.len();
        let take = k.min(n);
        if take < n {
            scored.select_nth_unstable_by(take - 1, |a, b| b.0.total_cmp(&a.0));
            scored.truncate(take);
        }
        scored.sort_unstable_by(|a, b| b.0.total_cmp(&a.0));

        while scored.len() < k {
            scored.push((f32::NEG_INFINITY, -1));
        }
        scored
    }
}
