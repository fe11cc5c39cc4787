//! Precomputed embeddings on disk: a JSON float array, or `null` for "no face".
//!
//! Lets a face model running in another process hand vectors to the engine.

use rollcall_core::{Embedding, ExtractError, FaceExtractor};
use std::path::Path;

#[derive(Debug, Default)]
pub struct EmbeddingFileExtractor;

impl EmbeddingFileExtractor {
    pub fn parse(raw: &[u8]) -> Result<Embedding, ExtractError> {
        let values: Option<Vec<f32>> =
            serde_json::from_slice(raw).map_err(|e| ExtractError::Unreadable(e.to_string()))?;
        values
            .map(Embedding::new)
            .ok_or(ExtractError::NoFaceDetected)
    }
}

impl FaceExtractor<Path> for EmbeddingFileExtractor {
    fn extract(&mut self, path: &Path) -> Result<Embedding, ExtractError> {
        let raw = std::fs::read(path)
            .map_err(|e| ExtractError::Unreadable(format!("{}: {e}", path.display())))?;
        Self::parse(&raw)
    }
}
