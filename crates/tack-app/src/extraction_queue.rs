//! Background extraction: writers enqueue a job after a successful commit and a
//! tokio worker runs the pass on the blocking pool.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use tack_core::event::Actor;
use tack_core::model::ContentRef;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::extractor::RelationshipExtractor;
use crate::store::CardStore;

/// One pending extraction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionJob {
    /// Actor the pass runs on behalf of.
    pub actor: Actor,
    /// Content to scan.
    pub source: ContentRef,
    /// Scan even when the content digest is unchanged.
    pub force: bool,
}

impl ExtractionJob {
    /// Job that skips unchanged content.
    #[must_use]
    pub const fn new(actor: Actor, source: ContentRef) -> Self {
        Self {
            actor,
            source,
            force: false,
        }
    }
}

/// Handle to the extraction worker.
#[derive(Debug)]
pub struct ExtractionQueue {
    sender: mpsc::UnboundedSender<ExtractionJob>,
    worker: JoinHandle<usize>,
}

impl ExtractionQueue {
    /// Start the worker on the current tokio runtime.
    ///
    /// # Panics
    /// Panics when called outside a tokio runtime.
    pub fn spawn<S>(extractor: RelationshipExtractor<S>) -> Self
    where
        S: CardStore + Send + Sync + 'static,
    {
        let (sender, mut receiver) = mpsc::unbounded_channel::<ExtractionJob>();
        let extractor = Arc::new(extractor);
        let worker = tokio::spawn(async move {
            let mut processed = 0;
            while let Some(job) = receiver.recv().await {
                let extractor = Arc::clone(&extractor);
                let outcome = tokio::task::spawn_blocking(move || {
                    if job.force {
                        extractor.extract_forced(&job.actor, job.source)
                    } else {
                        extractor.extract(&job.actor, job.source)
                    }
                })
                .await;
                match outcome {
                    Ok(Ok(report)) => {
                        debug!(source = %job.source, skipped = report.skipped, "Extraction job finished");
                    }
                    Ok(Err(err)) => warn!(source = %job.source, "Extraction job failed: {err}"),
                    Err(err) => error!(source = %job.source, "Extraction job panicked: {err}"),
                }
                processed += 1;
            }
            processed
        });
        Self { sender, worker }
    }

    /// Queue a pass.
    ///
    /// # Errors
    /// Returns an error when the worker has stopped.
    pub fn enqueue(&self, job: ExtractionJob) -> Result<()> {
        self.sender
            .send(job)
            .map_err(|err| anyhow!("extraction worker stopped; dropped job for {}", err.0.source))
    }

    /// Stop accepting jobs, drain the queue and return how many jobs ran.
    ///
    /// # Errors
    /// Returns an error when the worker task failed.
    pub async fn shutdown(self) -> Result<usize> {
        drop(self.sender);
        self.worker
            .await
            .map_err(|err| anyhow!("extraction worker join error: {err}"))
    }
}
