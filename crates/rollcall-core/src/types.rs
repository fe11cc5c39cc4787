use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Norms at or below this are treated as degenerate (no usable direction).
pub const MIN_NORM: f32 = 1e-6;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbeddingError {
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("degenerate embedding: norm {norm} is too close to zero")]
    Degenerate { norm: f32 },
    #[error("embedding is empty")]
    Empty,
    #[error("embedding contains non-finite values")]
    NonFinite,
}

/// Opaque student identifier, the primary key of the external student record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentId(String);

impl StudentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StudentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for StudentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Face embedding vector. Dimensionality is fixed by the extractor (128, 512, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean norm, accumulated in f64.
    pub fn norm(&self) -> f32 {
        self.values
            .iter()
            .map(|&v| f64::from(v) * f64::from(v))
            .sum::<f64>()
            .sqrt() as f32
    }

    /// Reject empty or non-finite vectors.
    pub fn validate(&self) -> Result<(), EmbeddingError> {
        if self.values.is_empty() {
            return Err(EmbeddingError::Empty);
        }
        if self.values.iter().any(|v| !v.is_finite()) {
            return Err(EmbeddingError::NonFinite);
        }
        Ok(())
    }

    /// Fail with `DimensionMismatch` unless this embedding has `expected` components.
    pub fn check_dim(&self, expected: usize) -> Result<(), EmbeddingError> {
        if self.dim() != expected {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: self.dim(),
            });
        }
        Ok(())
    }

    /// Return this embedding scaled to unit length.
    pub fn normalized(&self) -> Result<Embedding, EmbeddingError> {
        self.validate()?;
        let norm = self
            .values
            .iter()
            .map(|&v| f64::from(v) * f64::from(v))
            .sum::<f64>()
            .sqrt();
        if norm <= f64::from(MIN_NORM) {
            return Err(EmbeddingError::Degenerate { norm: norm as f32 });
        }
        Ok(Embedding {
            values: self
                .values
                .iter()
                .map(|&v| (f64::from(v) / norm) as f32)
                .collect(),
        })
    }

    /// Squared Euclidean distance. For unit vectors this is `2 - 2·cos θ`.
    pub fn squared_distance(&self, other: &Embedding) -> Result<f64, EmbeddingError> {
        other.check_dim(self.dim())?;
        Ok(self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(&a, &b)| {
                let d = f64::from(a) - f64::from(b);
                d * d
            })
            .sum())
    }

    /// Cosine similarity in [-1, 1]; 0.0 when either side has zero norm.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f64;
        let mut norm_a = 0.0f64;
        let mut norm_b = 0.0f64;

        for (&a, &b) in self.values.iter().zip(other.values.iter()) {
            let (a, b) = (f64::from(a), f64::from(b));
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            (dot / denom) as f32
        } else {
            0.0
        }
    }
}

/// Result of resolving a query embedding against the enrolled gallery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Matched student, or `None` for "unknown".
    pub identity: Option<StudentId>,
    /// Squared unit-sphere distance of the best candidate (+inf on an empty gallery).
    pub distance: f32,
    /// Gap between the runner-up and the best candidate.
    pub margin: f32,
    /// True when two or more students tied exactly at the best distance.
    pub ambiguous: bool,
}

impl MatchResult {
    pub fn unknown() -> Self {
        Self {
            identity: None,
            distance: f32::INFINITY,
            margin: 0.0,
            ambiguous: false,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.identity.is_none()
    }

    /// Cosine similarity equivalent of `distance`.
    pub fn similarity(&self) -> f32 {
        1.0 - self.distance / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    #[test]
    fn test_normalized_is_unit_length() {
        let e = emb(&[3.0, 4.0]).normalized().unwrap();
        assert!((e.values[0] - 0.6).abs() < 1e-6);
        assert!((e.values[1] - 0.8).abs() < 1e-6);
        assert!((e.norm() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_idempotent() {
        let once = emb(&[0.3, -1.7, 2.2, 0.01, 5.5]).normalized().unwrap();
        let twice = once.normalized().unwrap();
        for (a, b) in once.values.iter().zip(twice.values.iter()) {
            assert!((a - b).abs() < 1e-6, "{a} vs {b}");
        }
    }

    #[test]
    fn test_normalize_zero_vector_is_degenerate() {
        let err = emb(&[0.0, 0.0, 0.0]).normalized().unwrap_err();
        assert!(matches!(err, EmbeddingError::Degenerate { .. }));
    }

    #[test]
    fn test_normalize_rejects_empty_and_nan() {
        assert_eq!(emb(&[]).normalized().unwrap_err(), EmbeddingError::Empty);
        assert_eq!(
            emb(&[1.0, f32::NAN]).normalized().unwrap_err(),
            EmbeddingError::NonFinite
        );
    }

    #[test]
    fn test_squared_distance_matches_cosine_identity() {
        let a = emb(&[1.0, 2.0, -0.5]).normalized().unwrap();
        let b = emb(&[-0.3, 1.0, 2.0]).normalized().unwrap();
        let d = a.squared_distance(&b).unwrap();
        let cos = f64::from(a.similarity(&b));
        assert!((d - (2.0 - 2.0 * cos)).abs() < 1e-6);
    }

    #[test]
    fn test_squared_distance_dimension_mismatch() {
        let err = emb(&[1.0, 0.0]).squared_distance(&emb(&[1.0, 0.0, 0.0])).unwrap_err();
        assert_eq!(
            err,
            EmbeddingError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        );
    }

    #[test]
    fn test_cosine_similarity_orthogonal_and_zero() {
        assert!(emb(&[1.0, 0.0]).similarity(&emb(&[0.0, 1.0])).abs() < 1e-6);
        assert_eq!(emb(&[0.0, 0.0]).similarity(&emb(&[1.0, 0.0])), 0.0);
    }

    #[test]
    fn test_match_result_similarity_tracks_distance() {
        let exact = MatchResult {
            identity: Some("A".into()),
            distance: 0.0,
            margin: 1.0,
            ambiguous: false,
        };
        assert_eq!(exact.similarity(), 1.0);

        let orthogonal = MatchResult {
            distance: 2.0,
            ..exact.clone()
        };
        assert_eq!(orthogonal.similarity(), 0.0);
        assert_eq!(MatchResult::unknown().similarity(), f32::NEG_INFINITY);
    }

    #[test]
    fn test_student_id_serializes_as_plain_string() {
        let id = StudentId::from("42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"42\"");
        assert_eq!(id.to_string(), "42");
    }
}
