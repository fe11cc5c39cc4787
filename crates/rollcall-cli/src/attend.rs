use crate::engine::EngineHandle;
use anyhow::{bail, Result};
use rollcall_core::{
    AttendanceSession, AttendanceTally, CaptureOutcome, EmbeddingStore, SessionError,
    SessionReport, StudentId,
};
use std::path::PathBuf;

/// Result of one capture: the frames it used and what the session made of them.
pub struct Capture {
    pub label: String,
    pub outcome: Result<CaptureOutcome, SessionError>,
}

/// Everything one attendance run produced.
pub struct Attendance {
    pub captures: Vec<Capture>,
    pub report: SessionReport,
    pub tally: AttendanceTally,
}

/// One session over `images`, `burst` frames per capture, then the tally
/// against every enrolled student.
///
/// A single-frame capture is matched directly; larger ones go through the
/// majority vote. Per-capture failures are recorded and the run continues.
pub async fn run_session(
    engine: &EngineHandle,
    store: &dyn EmbeddingStore,
    images: &[PathBuf],
    burst: usize,
    threshold: f32,
) -> Result<Attendance> {
    let mut session = AttendanceSession::open();
    let mut captures = Vec::new();

    for frames in images.chunks(burst.max(1)) {
        let label = frames
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let mut samples = engine.extract_all(frames).await?;

        let outcome = if samples.len() == 1 {
            match samples.remove(0) {
                Ok(query) => session.record(&query, store, threshold),
                Err(err) => Err(SessionError::Extract(err)),
            }
        } else {
            session.record_burst(samples, store, threshold)
        };

        match &outcome {
            Err(SessionError::SessionClosed) => bail!("attendance session closed unexpectedly"),
            Err(err) => tracing::warn!(frames = %label, error = %err, "capture failed"),
            Ok(_) => {}
        }
        captures.push(Capture { label, outcome });
    }

    let report = session.close()?;
    let roster: Vec<StudentId> = store.all()?.ids().cloned().collect();
    let tally = report.tally(&roster);
    Ok(Attendance {
        captures,
        report,
        tally,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{spawn_engine, BoxedExtractor};
    use rollcall_core::extractor::from_fn;
    use rollcall_core::{Embedding, ExtractError, MemoryStore};
    use std::path::Path;
    use std::time::Duration;

    /// Faces are chosen by the first letter of the file name.
    fn by_initial() -> BoxedExtractor {
        Box::new(from_fn(|path: &Path| {
            let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
            match name.chars().next() {
                Some('a') => Ok(Embedding::new(vec![1.0, 0.0, 0.0])),
                Some('b') => Ok(Embedding::new(vec![0.0, 1.0, 0.0])),
                Some('z') => Ok(Embedding::new(vec![0.0, 0.0, 1.0])),
                _ => Err(ExtractError::NoFaceDetected),
            }
        }))
    }

    fn roster() -> MemoryStore {
        let store = MemoryStore::new();
        store.put(&"A".into(), &Embedding::new(vec![1.0, 0.0, 0.0])).unwrap();
        store.put(&"B".into(), &Embedding::new(vec![0.0, 1.0, 0.0])).unwrap();
        store
    }

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[tokio::test]
    async fn test_single_frame_captures() {
        let engine = spawn_engine(by_initial(), Duration::from_secs(5)).unwrap();
        let store = roster();
        let images = paths(&["a.png", "blank.png", "a2.png", "z.png"]);

        let run = run_session(&engine, &store, &images, 1, 0.6).await.unwrap();
        let outcomes: Vec<_> = run.captures.iter().map(|c| &c.outcome).collect();
        assert!(matches!(outcomes[0], Ok(CaptureOutcome::Marked(id)) if id.as_str() == "A"));
        assert!(matches!(
            outcomes[1],
            Err(SessionError::Extract(ExtractError::NoFaceDetected))
        ));
        assert!(matches!(outcomes[2], Ok(CaptureOutcome::AlreadyMarked(id)) if id.as_str() == "A"));
        assert!(matches!(outcomes[3], Ok(CaptureOutcome::Unrecognized)));

        assert_eq!(run.report.marks.len(), 1);
        assert_eq!(run.tally.present, vec![StudentId::from("A")]);
        assert_eq!(run.tally.absent, vec![StudentId::from("B")]);
    }

    #[tokio::test]
    async fn test_bursts_are_chunked_and_voted() {
        let engine = spawn_engine(by_initial(), Duration::from_secs(5)).unwrap();
        let store = roster();
        // [a1 a2 x1]: A wins 2 of 3. [b1 x2 z1]: no majority. [b3]: single frame.
        let images = paths(&["a1", "a2", "x1", "b1", "x2", "z1", "b3"]);

        let run = run_session(&engine, &store, &images, 3, 0.6).await.unwrap();
        assert_eq!(run.captures.len(), 3);
        assert_eq!(run.captures[0].label, "a1, a2, x1");
        assert!(matches!(
            &run.captures[0].outcome,
            Ok(CaptureOutcome::Marked(id)) if id.as_str() == "A"
        ));
        assert!(matches!(
            &run.captures[1].outcome,
            Ok(CaptureOutcome::Unrecognized)
        ));
        assert_eq!(run.captures[2].label, "b3");
        assert!(matches!(
            &run.captures[2].outcome,
            Ok(CaptureOutcome::Marked(id)) if id.as_str() == "B"
        ));

        assert_eq!(run.tally.present_count(), 2);
        assert_eq!(run.tally.absent_count(), 0);
    }

    #[tokio::test]
    async fn test_zero_burst_is_one_frame_per_capture() {
        let engine = spawn_engine(by_initial(), Duration::from_secs(5)).unwrap();
        let store = roster();
        let run = run_session(&engine, &store, &paths(&["a", "b"]), 0, 0.6)
            .await
            .unwrap();
        assert_eq!(run.captures.len(), 2);
        assert_eq!(run.tally.present_count(), 2);
    }
}
