//! Attendance sessions: repeated captures, each student marked at most once.
//!
//! A session is plain owned state. Mutating methods take `&mut self`; callers
//! that share one session across threads wrap it in their own mutex.

use crate::extractor::{ExtractError, FaceExtractor};
use crate::matcher::{match_embedding, MatchError};
use crate::store::EmbeddingStore;
use crate::types::{Embedding, MatchResult, StudentId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("attendance session is closed")]
    SessionClosed,
    #[error("burst capture needs at least one frame")]
    EmptyBurst,
    #[error("extraction failed: {0}")]
    Extract(#[from] ExtractError),
    #[error("match failed: {0}")]
    Match(#[from] MatchError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Open,
    Closed,
}

/// What one capture means for attendance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CaptureOutcome {
    /// First recognition in this session: write one attendance record.
    Marked(StudentId),
    /// Already marked earlier in this session; nothing to write.
    AlreadyMarked(StudentId),
    Unrecognized,
}

/// One attendance record emitted by the session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceMark {
    pub student_id: StudentId,
    pub marked_at: DateTime<Utc>,
    pub distance: f32,
    pub margin: f32,
}

/// Everything a closed session produced.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub marks: Vec<AttendanceMark>,
}

/// Present/absent split of a roster.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AttendanceTally {
    pub present: Vec<StudentId>,
    pub absent: Vec<StudentId>,
    /// Marked students that were not on the roster.
    pub unlisted: Vec<StudentId>,
}

impl AttendanceTally {
    pub fn present_count(&self) -> usize {
        self.present.len()
    }

    pub fn absent_count(&self) -> usize {
        self.absent.len()
    }
}

impl SessionReport {
    /// Split `roster` into present and absent students.
    pub fn tally<'a>(&self, roster: impl IntoIterator<Item = &'a StudentId>) -> AttendanceTally {
        let marked: BTreeSet<&StudentId> = self.marks.iter().map(|m| &m.student_id).collect();
        let roster: BTreeSet<&StudentId> = roster.into_iter().collect();

        AttendanceTally {
            present: roster.intersection(&marked).map(|id| (*id).clone()).collect(),
            absent: roster.difference(&marked).map(|id| (*id).clone()).collect(),
            unlisted: marked.difference(&roster).map(|id| (*id).clone()).collect(),
        }
    }
}

pub struct AttendanceSession {
    id: Uuid,
    state: SessionState,
    opened_at: DateTime<Utc>,
    marked: HashSet<StudentId>,
    marks: Vec<AttendanceMark>,
}

impl Default for AttendanceSession {
    fn default() -> Self {
        Self::open()
    }
}

impl AttendanceSession {
    pub fn open() -> Self {
        let session = Self {
            id: Uuid::new_v4(),
            state: SessionState::Open,
            opened_at: Utc::now(),
            marked: HashSet::new(),
            marks: Vec::new(),
        };
        tracing::info!(session = %session.id, "attendance session opened");
        session
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    pub fn is_marked(&self, student: &StudentId) -> bool {
        self.marked.contains(student)
    }

    pub fn marked_count(&self) -> usize {
        self.marked.len()
    }

    pub fn marks(&self) -> &[AttendanceMark] {
        &self.marks
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(SessionError::SessionClosed)
        }
    }

    /// Extract a face from `image`, resolve it, and mark attendance.
    pub fn capture<I, E>(
        &mut self,
        image: &I,
        extractor: &mut E,
        store: &dyn EmbeddingStore,
        threshold: f32,
    ) -> Result<CaptureOutcome, SessionError>
    where
        I: ?Sized,
        E: FaceExtractor<I> + ?Sized,
    {
        self.ensure_open()?;
        let query = extractor.extract(image)?;
        self.record(&query, store, threshold)
    }

    /// Resolve an already-extracted embedding and mark attendance.
    pub fn record(
        &mut self,
        query: &Embedding,
        store: &dyn EmbeddingStore,
        threshold: f32,
    ) -> Result<CaptureOutcome, SessionError> {
        self.ensure_open()?;
        let result = match_embedding(query, threshold, store)?;
        Ok(self.apply(result))
    }

    /// Capture several frames of the same subject and accept an identity only
    /// if it wins a strict majority of them. Frames with no usable face vote
    /// "unknown".
    pub fn capture_burst<'i, I, E>(
        &mut self,
        images: impl IntoIterator<Item = &'i I>,
        extractor: &mut E,
        store: &dyn EmbeddingStore,
        threshold: f32,
    ) -> Result<CaptureOutcome, SessionError>
    where
        I: ?Sized + 'i,
        E: FaceExtractor<I> + ?Sized,
    {
        self.ensure_open()?;
        let samples: Vec<_> = images
            .into_iter()
            .map(|image| extractor.extract(image))
            .collect();
        self.record_burst(samples, store, threshold)
    }

    /// Majority vote over already-extracted samples.
    pub fn record_burst(
        &mut self,
        samples: impl IntoIterator<Item = Result<Embedding, ExtractError>>,
        store: &dyn EmbeddingStore,
        threshold: f32,
    ) -> Result<CaptureOutcome, SessionError> {
        self.ensure_open()?;

        let mut frames = 0usize;
        let mut votes: HashMap<Option<StudentId>, usize> = HashMap::new();
        let mut best: HashMap<StudentId, MatchResult> = HashMap::new();

        for sample in samples {
            frames += 1;
            let query = match sample {
                Ok(query) => query,
                Err(err) => {
                    tracing::debug!(frame = frames - 1, error = %err, "burst frame has no usable face");
                    *votes.entry(None).or_default() += 1;
                    continue;
                }
            };
            let result = match_embedding(&query, threshold, store)?;
            *votes.entry(result.identity.clone()).or_default() += 1;
            if let Some(id) = result.identity.clone() {
                let keep = best
                    .get(&id)
                    .map_or(true, |prev| result.distance < prev.distance);
                if keep {
                    best.insert(id, result);
                }
            }
        }

        if frames == 0 {
            return Err(SessionError::EmptyBurst);
        }

        let winner = votes
            .iter()
            .find(|(id, count)| id.is_some() && **count * 2 > frames)
            .and_then(|(id, _)| id.clone());

        tracing::debug!(frames, ?winner, candidates = votes.len(), "burst vote");

        match winner.and_then(|id| best.remove(&id)) {
            Some(result) => Ok(self.apply(result)),
            None => Ok(CaptureOutcome::Unrecognized),
        }
    }

    fn apply(&mut self, result: MatchResult) -> CaptureOutcome {
        let Some(student) = result.identity else {
            tracing::debug!(
                session = %self.id,
                distance = result.distance,
                ambiguous = result.ambiguous,
                "capture unrecognized"
            );
            return CaptureOutcome::Unrecognized;
        };

        if !self.marked.insert(student.clone()) {
            tracing::debug!(session = %self.id, student = %student, "already marked");
            return CaptureOutcome::AlreadyMarked(student);
        }

        tracing::info!(
            session = %self.id,
            student = %student,
            distance = result.distance,
            margin = result.margin,
            "attendance marked"
        );
        self.marks.push(AttendanceMark {
            student_id: student.clone(),
            marked_at: Utc::now(),
            distance: result.distance,
            margin: result.margin,
        });
        CaptureOutcome::Marked(student)
    }

    /// Close the session. Further captures fail with `SessionClosed`.
    pub fn close(&mut self) -> Result<SessionReport, SessionError> {
        self.ensure_open()?;
        self.state = SessionState::Closed;
        let report = SessionReport {
            session_id: self.id,
            opened_at: self.opened_at,
            closed_at: Utc::now(),
            marks: std::mem::take(&mut self.marks),
        };
        tracing::info!(session = %self.id, marked = report.marks.len(), "attendance session closed");
        Ok(report)
    }
}
