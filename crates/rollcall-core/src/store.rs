//! Embedding persistence: one representative vector per student.
//!
//! Every backing hands out snapshots from `all()` that reflect the state
//! before iteration started. A `put` racing with an iteration is not visible
//! to that snapshot, and readers never observe a half-written vector.

use crate::types::{Embedding, EmbeddingError, StudentId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("embedding dimension mismatch: store holds {expected}-dim vectors, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("no embedding enrolled for student {0}")]
    NotFound(StudentId),
    #[error("invalid embedding: {0}")]
    InvalidEmbedding(EmbeddingError),
    #[error("corrupt embedding record at {location}: {reason}")]
    Corrupt { location: String, reason: String },
    #[error("store lock poisoned")]
    Poisoned,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<EmbeddingError> for StoreError {
    fn from(err: EmbeddingError) -> Self {
        match err {
            EmbeddingError::DimensionMismatch { expected, actual } => {
                StoreError::DimensionMismatch { expected, actual }
            }
            other => StoreError::InvalidEmbedding(other),
        }
    }
}

/// Point-in-time view of every enrolled `(student, embedding)` pair, ordered by id.
///
/// Cloning is cheap; the entries are shared.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    entries: Arc<[(StudentId, Embedding)]>,
}

impl Snapshot {
    pub fn new(mut entries: Vec<(StudentId, Embedding)>) -> Self {
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Self {
            entries: entries.into(),
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, (StudentId, Embedding)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &StudentId> {
        self.entries.iter().map(|(id, _)| id)
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a (StudentId, Embedding);
    type IntoIter = std::slice::Iter<'a, (StudentId, Embedding)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Key → vector persistence for enrolled faces.
///
/// Each call is atomic on its own. Sequences of calls (read, then write) are
/// not: concurrent enrollments for the same student resolve last-writer-wins.
pub trait EmbeddingStore: Send + Sync {
    /// Insert or overwrite. The first successful `put` fixes the dimensionality
    /// until the store is `clear`ed.
    fn put(&self, id: &StudentId, embedding: &Embedding) -> Result<(), StoreError>;

    fn get(&self, id: &StudentId) -> Result<Embedding, StoreError>;

    /// Fresh snapshot of the whole store.
    fn all(&self) -> Result<Snapshot, StoreError>;

    /// Idempotent removal.
    fn delete(&self, id: &StudentId) -> Result<(), StoreError>;

    /// Remove everything and forget the established dimensionality.
    fn clear(&self) -> Result<(), StoreError>;

    /// Established dimensionality, if any embedding has been stored.
    fn dimension(&self) -> Option<usize>;

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.all()?.len())
    }

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

/// Shared admission check for `put`: well-formed and matching the store's dimensionality.
pub(crate) fn admit(embedding: &Embedding, dimension: Option<usize>) -> Result<(), StoreError> {
    embedding.validate()?;
    if let Some(expected) = dimension {
        embedding.check_dim(expected)?;
    }
    Ok(())
}

#[derive(Default)]
struct MemoryInner {
    dimension: Option<usize>,
    entries: HashMap<StudentId, Embedding>,
}

/// In-process store. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EmbeddingStore for MemoryStore {
    fn put(&self, id: &StudentId, embedding: &Embedding) -> Result<(), StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        admit(embedding, inner.dimension)?;
        inner.dimension = Some(embedding.dim());
        inner.entries.insert(id.clone(), embedding.clone());
        Ok(())
    }

    fn get(&self, id: &StudentId) -> Result<Embedding, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        inner
            .entries
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    fn all(&self) -> Result<Snapshot, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(Snapshot::new(
            inner
                .entries
                .iter()
                .map(|(id, e)| (id.clone(), e.clone()))
                .collect(),
        ))
    }

    fn delete(&self, id: &StudentId) -> Result<(), StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        inner.entries.remove(id);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        inner.entries.clear();
        inner.dimension = None;
        Ok(())
    }

    fn dimension(&self) -> Option<usize> {
        self.inner.read().ok().and_then(|inner| inner.dimension)
    }

    fn len(&self) -> Result<usize, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.entries.len())
    }
}

struct CacheSlot {
    generation: u64,
    snapshot: Option<Snapshot>,
}

/// Read-through snapshot cache in front of a durable backing.
///
/// Any mutation bumps the generation and drops the cached snapshot. A reader
/// that loaded from the backing only installs its snapshot if no mutation
/// happened in the meantime.
pub struct CachedStore<S> {
    inner: S,
    slot: RwLock<CacheSlot>,
}

impl<S: EmbeddingStore> CachedStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            slot: RwLock::new(CacheSlot {
                generation: 0,
                snapshot: None,
            }),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn invalidate(&self) -> Result<(), StoreError> {
        let mut slot = self.slot.write().map_err(|_| StoreError::Poisoned)?;
        slot.generation = slot.generation.wrapping_add(1);
        slot.snapshot = None;
        Ok(())
    }
}

impl<S: EmbeddingStore> EmbeddingStore for CachedStore<S> {
    fn put(&self, id: &StudentId, embedding: &Embedding) -> Result<(), StoreError> {
        let result = self.inner.put(id, embedding);
        self.invalidate()?;
        result
    }

    fn get(&self, id: &StudentId) -> Result<Embedding, StoreError> {
        self.inner.get(id)
    }

    fn all(&self) -> Result<Snapshot, StoreError> {
        let generation = {
            let slot = self.slot.read().map_err(|_| StoreError::Poisoned)?;
            if let Some(snapshot) = &slot.snapshot {
                return Ok(snapshot.clone());
            }
            slot.generation
        };

        let snapshot = self.inner.all()?;
        let mut slot = self.slot.write().map_err(|_| StoreError::Poisoned)?;
        if slot.generation == generation {
            slot.snapshot = Some(snapshot.clone());
        } else {
            tracing::debug!("embedding cache invalidated during load; not caching");
        }
        Ok(snapshot)
    }

    fn delete(&self, id: &StudentId) -> Result<(), StoreError> {
        let result = self.inner.delete(id);
        self.invalidate()?;
        result
    }

    fn clear(&self) -> Result<(), StoreError> {
        let result = self.inner.clear();
        self.invalidate()?;
        result
    }

    fn dimension(&self) -> Option<usize> {
        self.inner.dimension()
    }

    fn len(&self) -> Result<usize, StoreError> {
        self.inner.len()
    }
}
