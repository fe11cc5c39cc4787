//! Boundary to the face-embedding model.

use crate::types::Embedding;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractError {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("extraction timed out after {0:?}")]
    Timeout(Duration),
    #[error("unreadable image: {0}")]
    Unreadable(String),
}

/// Turns one image into one raw (not necessarily normalized) embedding.
///
/// Implementations may be slow; callers that need a bound impose their own
/// timeout and report it as [`ExtractError::Timeout`].
pub trait FaceExtractor<I: ?Sized> {
    fn extract(&mut self, image: &I) -> Result<Embedding, ExtractError>;
}

/// Adapter for plain closures.
pub struct FnExtractor<F>(F);

pub fn from_fn<I, F>(f: F) -> FnExtractor<F>
where
    I: ?Sized,
    F: FnMut(&I) -> Result<Embedding, ExtractError>,
{
    FnExtractor(f)
}

impl<I, F> FaceExtractor<I> for FnExtractor<F>
where
    I: ?Sized,
    F: FnMut(&I) -> Result<Embedding, ExtractError>,
{
    fn extract(&mut self, image: &I) -> Result<Embedding, ExtractError> {
        (self.0)(image)
    }
}

impl<I: ?Sized, E: FaceExtractor<I> + ?Sized> FaceExtractor<I> for Box<E> {
    fn extract(&mut self, image: &I) -> Result<Embedding, ExtractError> {
        (**self).extract(image)
    }
}
