//! rollcall-core — Face embedding enrollment, matching, and attendance sessions.
//!
//! Embeddings come from an external face model. This crate owns what happens
//! after: reducing enrollment samples to one unit vector per student,
//! persisting it, resolving camera captures to students under a distance
//! threshold, and deduplicating marks within a session.

pub mod enroll;
pub mod extractor;
pub mod file_store;
pub mod matcher;
pub mod session;
pub mod sqlite_store;
pub mod store;
pub mod types;

pub use enroll::{enroll, enroll_samples, EnrollError, Enrollment};
pub use extractor::{ExtractError, FaceExtractor};
pub use file_store::FileStore;
pub use matcher::{match_embedding, MatchError, Matcher, UnitSphereMatcher};
pub use session::{
    AttendanceSession, AttendanceTally, CaptureOutcome, SessionError, SessionReport,
};
pub use sqlite_store::SqliteStore;
pub use store::{CachedStore, EmbeddingStore, MemoryStore, Snapshot, StoreError};
pub use types::{Embedding, EmbeddingError, MatchResult, StudentId};
