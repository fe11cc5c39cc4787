//! Enrollment: many face samples in, one representative unit vector stored.

use crate::extractor::{ExtractError, FaceExtractor};
use crate::store::{EmbeddingStore, StoreError};
use crate::types::{Embedding, EmbeddingError, StudentId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("enrollment failed for {student}: no usable face in any of {} samples", .failures.len())]
    EnrollmentFailed {
        student: StudentId,
        failures: Vec<SampleFailure>,
    },
    #[error("sample {index} has {actual} dimensions, earlier samples have {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },
    #[error("representative embedding is degenerate: {0}")]
    Degenerate(EmbeddingError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Why one sample was dropped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SampleError {
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampleFailure {
    pub index: usize,
    pub error: SampleError,
}

/// Outcome of a successful enrollment.
#[derive(Debug, Clone)]
pub struct Enrollment {
    pub student: StudentId,
    /// The stored unit-length representative.
    pub embedding: Embedding,
    /// Number of samples that contributed.
    pub used: usize,
    /// Samples that were dropped, with the reason.
    pub skipped: Vec<SampleFailure>,
}

/// Extract every image and enroll the result.
pub fn enroll<'i, I, E>(
    store: &dyn EmbeddingStore,
    student: &StudentId,
    images: impl IntoIterator<Item = &'i I>,
    extractor: &mut E,
) -> Result<Enrollment, EnrollError>
where
    I: ?Sized + 'i,
    E: FaceExtractor<I> + ?Sized,
{
    let samples: Vec<_> = images
        .into_iter()
        .map(|image| extractor.extract(image))
        .collect();
    enroll_samples(store, student, samples)
}

/// Enroll from already-extracted samples.
///
/// Failed samples are skipped. If none survive, the store is left untouched.
pub fn enroll_samples(
    store: &dyn EmbeddingStore,
    student: &StudentId,
    samples: impl IntoIterator<Item = Result<Embedding, ExtractError>>,
) -> Result<Enrollment, EnrollError> {
    let mut usable: Vec<Embedding> = Vec::new();
    let mut skipped = Vec::new();

    for (index, sample) in samples.into_iter().enumerate() {
        let unit = sample
            .map_err(SampleError::from)
            .and_then(|raw| raw.normalized().map_err(SampleError::from));
        match unit {
            Ok(unit) => {
                if let Some(first) = usable.first() {
                    if first.dim() != unit.dim() {
                        return Err(EnrollError::DimensionMismatch {
                            index,
                            expected: first.dim(),
                            actual: unit.dim(),
                        });
                    }
                }
                usable.push(unit);
            }
            Err(error) => {
                tracing::warn!(student = %student, index, error = %error, "skipping enrollment sample");
                skipped.push(SampleFailure { index, error });
            }
        }
    }

    if usable.is_empty() {
        return Err(EnrollError::EnrollmentFailed {
            student: student.clone(),
            failures: skipped,
        });
    }

    let embedding = mean_direction(&usable).map_err(EnrollError::Degenerate)?;
    store.put(student, &embedding)?;

    tracing::info!(
        student = %student,
        used = usable.len(),
        skipped = skipped.len(),
        dim = embedding.dim(),
        "enrolled"
    );

    Ok(Enrollment {
        student: student.clone(),
        embedding,
        used: usable.len(),
        skipped,
    })
}

/// Component-wise mean of unit vectors, renormalized onto the unit sphere.
fn mean_direction(units: &[Embedding]) -> Result<Embedding, EmbeddingError> {
    let dim = units.first().map(Embedding::dim).unwrap_or(0);
    let mut sum = vec![0.0f64; dim];
    for unit in units {
        for (acc, &v) in sum.iter_mut().zip(unit.values.iter()) {
            *acc += f64::from(v);
        }
    }
    let n = units.len().max(1) as f64;
    Embedding::new(sum.into_iter().map(|s| (s / n) as f32).collect()).normalized()
}
