//! rollcall-extract — Reference face extractors.
//!
//! The production face model runs elsewhere; these extractors cover the
//! cases the engine still has to handle on its own: a cheap grayscale
//! thumbnail embedding and precomputed embeddings read from disk.

pub mod embedding_file;
pub mod frame;
pub mod thumbnail;

pub use embedding_file::EmbeddingFileExtractor;
pub use thumbnail::{ThumbnailExtractor, MAX_THUMBNAIL_SIZE};
