use rollcall_core::{Embedding, ExtractError, FaceExtractor};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to spawn extraction thread: {0}")]
    Spawn(std::io::Error),
    #[error("extraction thread exited")]
    ChannelClosed,
}

/// Extractors the engine thread can own.
pub type BoxedExtractor = Box<dyn FaceExtractor<std::path::Path> + Send>;

/// Messages sent from command handlers to the extraction thread.
struct ExtractRequest {
    path: PathBuf,
    /// Fired when the thread picks the request up.
    started: oneshot::Sender<()>,
    reply: oneshot::Sender<Result<Embedding, ExtractError>>,
}

/// Clone-safe handle to the extraction thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<ExtractRequest>,
    timeout: Duration,
}

impl EngineHandle {
    /// Extract one image. The outer error means the engine is gone; the inner
    /// one is a per-sample failure, including [`ExtractError::Timeout`].
    ///
    /// The timeout covers the extraction itself, not the wait behind earlier
    /// requests still running on the thread.
    pub async fn extract(
        &self,
        path: impl Into<PathBuf>,
    ) -> Result<Result<Embedding, ExtractError>, EngineError> {
        let path = path.into();
        let (started_tx, started_rx) = oneshot::channel();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ExtractRequest {
                path: path.clone(),
                started: started_tx,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        started_rx.await.map_err(|_| EngineError::ChannelClosed)?;

        match tokio::time::timeout(self.timeout, reply_rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(EngineError::ChannelClosed),
            Err(_) => {
                tracing::warn!(path = %path.display(), timeout = ?self.timeout, "extraction timed out");
                Ok(Err(ExtractError::Timeout(self.timeout)))
            }
        }
    }

    /// Extract every image in order.
    pub async fn extract_all(
        &self,
        paths: &[PathBuf],
    ) -> Result<Vec<Result<Embedding, ExtractError>>, EngineError> {
        let mut samples = Vec::with_capacity(paths.len());
        for path in paths {
            samples.push(self.extract(path.clone()).await?);
        }
        Ok(samples)
    }
}

/// Spawn the extractor on a dedicated OS thread.
///
/// Extraction is blocking and may be slow; the thread keeps it off the async
/// runtime. A timed-out request keeps running on the thread and its reply is
/// dropped. Requests whose caller has gone away are skipped.
pub fn spawn_engine(
    mut extractor: BoxedExtractor,
    timeout: Duration,
) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<ExtractRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-extract".into())
        .spawn(move || {
            tracing::info!("extraction thread started");
            while let Some(req) = rx.blocking_recv() {
                if req.reply.is_closed() {
                    tracing::debug!(path = %req.path.display(), "dropping abandoned request");
                    continue;
                }
                let _ = req.started.send(());
                let result = extractor.extract(req.path.as_path());
                if let Err(err) = &result {
                    tracing::debug!(path = %req.path.display(), error = %err, "extraction failed");
                }
                let _ = req.reply.send(result);
            }
            tracing::info!("extraction thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx, timeout })
}
