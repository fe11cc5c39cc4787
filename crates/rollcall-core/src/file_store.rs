//! One JSON file per student in a directory.
//!
//! Files are named by the SHA-256 of the student id so arbitrary ids map to
//! safe file names. Writes land in a temp file and are renamed into place.

use crate::store::{admit, EmbeddingStore, Snapshot, StoreError};
use crate::types::{Embedding, StudentId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

const RECORD_EXTENSION: &str = "emb";

#[derive(Debug, Serialize, Deserialize)]
struct EmbeddingRecord {
    student_id: StudentId,
    embedding: Embedding,
}

/// Directory-backed store.
///
/// The lock serializes writers against readers within this process, so
/// `all()` always reads a state no `put` was halfway through.
pub struct FileStore {
    dir: PathBuf,
    dimension: RwLock<Option<usize>>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir` and recover its dimensionality.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let mut dimension = None;
        for (path, record) in read_records(&dir)? {
            match dimension {
                None => dimension = Some(record.embedding.dim()),
                Some(dim) if dim != record.embedding.dim() => {
                    return Err(StoreError::Corrupt {
                        location: path.display().to_string(),
                        reason: format!(
                            "{}-dim vector in a store of {dim}-dim vectors",
                            record.embedding.dim()
                        ),
                    });
                }
                Some(_) => {}
            }
        }

        tracing::info!(dir = %dir.display(), ?dimension, "opened embedding directory");
        Ok(Self {
            dir,
            dimension: RwLock::new(dimension),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &StudentId) -> PathBuf {
        self.dir
            .join(format!("{}.{RECORD_EXTENSION}", key_digest(id)))
    }
}

/// Lowercase hex SHA-256 of the student id.
fn key_digest(id: &StudentId) -> String {
    let digest = Sha256::digest(id.as_str().as_bytes());
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

fn is_record(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(RECORD_EXTENSION)
}

fn read_record(path: &Path) -> Result<EmbeddingRecord, StoreError> {
    let raw = std::fs::read(path)?;
    let record: EmbeddingRecord =
        serde_json::from_slice(&raw).map_err(|e| StoreError::Corrupt {
            location: path.display().to_string(),
            reason: e.to_string(),
        })?;
    record
        .embedding
        .validate()
        .map_err(|e| StoreError::Corrupt {
            location: path.display().to_string(),
            reason: e.to_string(),
        })?;
    Ok(record)
}

fn read_records(dir: &Path) -> Result<Vec<(PathBuf, EmbeddingRecord)>, StoreError> {
    let mut records = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !is_record(&path) {
            continue;
        }
        let record = read_record(&path)?;
        records.push((path, record));
    }
    Ok(records)
}

impl EmbeddingStore for FileStore {
    fn put(&self, id: &StudentId, embedding: &Embedding) -> Result<(), StoreError> {
        let mut dimension = self.dimension.write().map_err(|_| StoreError::Poisoned)?;
        admit(embedding, *dimension)?;

        let record = EmbeddingRecord {
            student_id: id.clone(),
            embedding: embedding.clone(),
        };
        let data = serde_json::to_vec(&record)?;

        let path = self.record_path(id);
        let tmp = self.dir.join(format!(".{}.tmp", key_digest(id)));
        std::fs::write(&tmp, data)?;
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }

        *dimension = Some(embedding.dim());
        tracing::debug!(student = %id, path = %path.display(), "embedding written");
        Ok(())
    }

    fn get(&self, id: &StudentId) -> Result<Embedding, StoreError> {
        let _guard = self.dimension.read().map_err(|_| StoreError::Poisoned)?;
        let path = self.record_path(id);
        let record = match read_record(&path) {
            Ok(record) => record,
            Err(StoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.clone()));
            }
            Err(e) => return Err(e),
        };
        if &record.student_id != id {
            return Err(StoreError::Corrupt {
                location: path.display().to_string(),
                reason: format!("record belongs to {}, expected {id}", record.student_id),
            });
        }
        Ok(record.embedding)
    }

    fn all(&self) -> Result<Snapshot, StoreError> {
        let _guard = self.dimension.read().map_err(|_| StoreError::Poisoned)?;
        let entries = read_records(&self.dir)?
            .into_iter()
            .map(|(_, record)| (record.student_id, record.embedding))
            .collect();
        Ok(Snapshot::new(entries))
    }

    fn delete(&self, id: &StudentId) -> Result<(), StoreError> {
        let _guard = self.dimension.write().map_err(|_| StoreError::Poisoned)?;
        match std::fs::remove_file(self.record_path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut dimension = self.dimension.write().map_err(|_| StoreError::Poisoned)?;
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if is_record(&path) {
                std::fs::remove_file(&path)?;
            }
        }
        *dimension = None;
        Ok(())
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension.read().ok().and_then(|dim| *dim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("rollcall-files-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_round_trip_within_tolerance() {
        let dir = scratch_dir();
        let store = FileStore::open(&dir).unwrap();
        assert_eq!(store.dir(), dir.as_path());
        let e = Embedding::new(vec![0.1, -0.333_333_34, 1e-7, 0.987_654_3]);
        store.put(&"s1".into(), &e).unwrap();

        let back = store.get(&"s1".into()).unwrap();
        for (a, b) in e.values.iter().zip(back.values.iter()) {
            assert!((a - b).abs() <= 1e-6);
        }
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_reopen_recovers_dimension_and_entries() {
        let dir = scratch_dir();
        {
            let store = FileStore::open(&dir).unwrap();
            store.put(&"a".into(), &Embedding::new(vec![1.0, 0.0, 0.0])).unwrap();
            store.put(&"b".into(), &Embedding::new(vec![0.0, 1.0, 0.0])).unwrap();
        }
        let store = FileStore::open(&dir).unwrap();
        assert_eq!(store.dimension(), Some(3));
        assert_eq!(store.len().unwrap(), 2);
        assert!(matches!(
            store.put(&"c".into(), &Embedding::new(vec![1.0])),
            Err(StoreError::DimensionMismatch { expected: 3, actual: 1 })
        ));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_file_name_is_content_addressed() {
        let dir = scratch_dir();
        let store = FileStore::open(&dir).unwrap();
        store.put(&"../../etc/passwd".into(), &Embedding::new(vec![1.0])).unwrap();

        let names: Vec<String> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert_eq!(names[0].len(), 64 + 1 + RECORD_EXTENSION.len());
        assert!(names[0].ends_with(".emb"));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_delete_missing_and_get_missing() {
        let dir = scratch_dir();
        let store = FileStore::open(&dir).unwrap();
        store.delete(&"ghost".into()).unwrap();
        assert!(matches!(
            store.get(&"ghost".into()),
            Err(StoreError::NotFound(_))
        ));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_overwrite_replaces_previous() {
        let dir = scratch_dir();
        let store = FileStore::open(&dir).unwrap();
        store.put(&"a".into(), &Embedding::new(vec![1.0, 0.0])).unwrap();
        store.put(&"a".into(), &Embedding::new(vec![0.0, 1.0])).unwrap();
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(store.get(&"a".into()).unwrap().values, vec![0.0, 1.0]);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_clear_resets_dimension() {
        let dir = scratch_dir();
        let store = FileStore::open(&dir).unwrap();
        store.put(&"a".into(), &Embedding::new(vec![1.0, 0.0])).unwrap();
        store.clear().unwrap();
        assert_eq!(store.dimension(), None);
        assert!(store.is_empty().unwrap());
        store.put(&"a".into(), &Embedding::new(vec![1.0, 0.0, 0.0, 0.0])).unwrap();
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_corrupt_record_is_reported() {
        let dir = scratch_dir();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("deadbeef.emb"), b"{not json").unwrap();
        assert!(matches!(
            FileStore::open(&dir),
            Err(StoreError::Corrupt { .. })
        ));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
