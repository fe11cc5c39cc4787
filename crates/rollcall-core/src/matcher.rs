//! Nearest-identity search over the enrolled gallery.

use crate::store::{EmbeddingStore, StoreError};
use crate::types::{Embedding, EmbeddingError, MatchResult, StudentId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("invalid query embedding: {0}")]
    Query(#[from] EmbeddingError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("threshold must be a non-negative number, got {0}")]
    InvalidThreshold(f32),
}

/// Strategy for resolving a probe embedding against the enrolled gallery.
pub trait Matcher {
    fn compare(
        &self,
        probe: &Embedding,
        store: &dyn EmbeddingStore,
        threshold: f32,
    ) -> Result<MatchResult, MatchError>;
}

/// Squared Euclidean distance between unit vectors (`2 - 2·cos θ`).
///
/// Always visits every gallery entry; a closer match later in the snapshot
/// is never skipped. Exact ties at the best distance are reported as
/// ambiguous and resolve to "unknown".
pub struct UnitSphereMatcher;

impl Matcher for UnitSphereMatcher {
    fn compare(
        &self,
        probe: &Embedding,
        store: &dyn EmbeddingStore,
        threshold: f32,
    ) -> Result<MatchResult, MatchError> {
        if threshold.is_nan() || threshold < 0.0 {
            return Err(MatchError::InvalidThreshold(threshold));
        }

        let query = probe.normalized()?;
        if let Some(expected) = store.dimension() {
            query.check_dim(expected)?;
        }

        let snapshot = store.all()?;
        let mut best: Option<(&StudentId, f64)> = None;
        let mut tied = 0usize;
        let mut runner_up = f64::INFINITY;

        for (id, stored) in &snapshot {
            let stored = match stored.normalized() {
                Ok(unit) => unit,
                Err(err) => {
                    tracing::warn!(student = %id, error = %err, "skipping unusable enrolled embedding");
                    continue;
                }
            };
            let d = query.squared_distance(&stored)?;

            match best {
                None => {
                    best = Some((id, d));
                    tied = 1;
                }
                Some((_, best_d)) if d < best_d => {
                    runner_up = best_d;
                    best = Some((id, d));
                    tied = 1;
                }
                Some((_, best_d)) if d == best_d => {
                    runner_up = d;
                    tied += 1;
                }
                Some(_) => {
                    if d < runner_up {
                        runner_up = d;
                    }
                }
            }
        }

        let Some((best_id, best_d)) = best else {
            tracing::debug!("empty gallery; query is unknown");
            return Ok(MatchResult::unknown());
        };

        let ambiguous = tied > 1;
        let margin = (runner_up - best_d) as f32;
        let accepted = !ambiguous && best_d <= f64::from(threshold);

        tracing::debug!(
            candidate = %best_id,
            distance = best_d,
            margin,
            ambiguous,
            accepted,
            gallery = snapshot.len(),
            "match evaluated"
        );

        Ok(MatchResult {
            identity: accepted.then(|| best_id.clone()),
            distance: best_d as f32,
            margin,
            ambiguous,
        })
    }
}

/// Resolve `query` against `store` with the default metric.
pub fn match_embedding(
    query: &Embedding,
    threshold: f32,
    store: &dyn EmbeddingStore,
) -> Result<MatchResult, MatchError> {
    UnitSphereMatcher.compare(query, store, threshold)
}
