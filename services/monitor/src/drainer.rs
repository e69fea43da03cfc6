//! Inference drainer.
//!
//! Labs that arrive before their patient's admit cannot be scored at ingest
//! time; they wait on the pending-inference queue. This worker ticks every
//! second over an independent read-only store handle and re-attempts each
//! entry, removing the ones that produce a verdict. Entries whose
//! demographics are still missing stay queued until shutdown persists them.

use crate::metrics::Metrics;
use crate::pager::PagerClient;
use crate::predictor::Predictor;
use crate::scoring::{ScoreOutcome, score_observation};
use crate::storage::{PatientStore, PendingInference, PendingQueues, StoreError};
use hl7_core::Hl7Timestamp;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, warn};

pub const DRAIN_INTERVAL: Duration = Duration::from_secs(1);

/// Background worker re-scoring queued labs once demographics appear.
pub struct InferenceDrainer {
    store: PatientStore,
    predictor: Arc<dyn Predictor + Send + Sync>,
    pager: PagerClient,
    queues: PendingQueues,
    metrics: Arc<Metrics>,
    shutdown: watch::Receiver<bool>,
}

impl InferenceDrainer {
    /// `store` must be a read-only handle: the pipeline is the single writer.
    pub fn new(
        store: PatientStore,
        predictor: Arc<dyn Predictor + Send + Sync>,
        pager: PagerClient,
        queues: PendingQueues,
        metrics: Arc<Metrics>,
        shutdown: watch::Receiver<bool>,
    ) -> InferenceDrainer {
        InferenceDrainer {
            store,
            predictor,
            pager,
            queues,
            metrics,
            shutdown,
        }
    }

    /// Run until the shutdown token flips.
    pub async fn begin(mut self) {
        loop {
            tokio::select! {
                () = tokio::time::sleep(DRAIN_INTERVAL) => {}
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        return;
                    }
                }
            }
            if let Err(e) = self.drain_once().await {
                // Read errors here are not fatal to ingest; log and retry
                // next tick.
                error!(error = %e, "inference drain failed");
            }
        }
    }

    async fn drain_once(&mut self) -> Result<(), StoreError> {
        let pending: Vec<PendingInference> = self.queues.inference().clone();
        if pending.is_empty() {
            return Ok(());
        }

        let mut resolved = Vec::new();
        for entry in pending {
            let Ok(Some(timestamp)) = Hl7Timestamp::parse(&entry.timestamp) else {
                warn!(mrn = %entry.mrn, timestamp = %entry.timestamp, "dropping unparseable queue entry");
                resolved.push(entry);
                continue;
            };
            let outcome = score_observation(
                &self.store,
                &self.predictor,
                &self.pager,
                &self.queues,
                &self.metrics,
                &entry.mrn,
                &timestamp,
            )
            .await?;
            if outcome != ScoreOutcome::MissingDemographics {
                resolved.push(entry);
            }
        }

        if !resolved.is_empty() {
            self.queues
                .inference()
                .retain(|entry| !resolved.contains(entry));
        }
        Ok(())
    }
}
