//! One creatinine observation through the inference path.
//!
//! Shared by the pipeline (scoring a lab as it arrives) and the inference
//! drainer (re-scoring labs that beat their patient's admit). The snapshot is
//! always bounded at the observation timestamp: later labs must not leak into
//! an earlier observation's verdict.

use crate::features;
use crate::metrics::{Metrics, inc};
use crate::pager::PagerClient;
use crate::predictor::Predictor;
use crate::storage::{PatientStore, PendingPage, PendingQueues, StoreError};
use hl7_core::Hl7Timestamp;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What happened to the observation.
#[derive(Debug, PartialEq, Eq)]
pub enum ScoreOutcome {
    /// No demographics yet: the caller queues or keeps a `PendingInference`.
    MissingDemographics,
    /// Scored negative; nothing to page.
    Negative,
    /// Scored positive and the page was accepted.
    Paged,
    /// Scored positive but delivery failed; the page is queued for retry.
    PageQueued,
}

/// Score `(mrn, timestamp)` against the store and page on a positive verdict.
///
/// Only `NotFound` maps to `MissingDemographics`; other store errors are
/// fatal and propagate.
pub async fn score_observation(
    store: &PatientStore,
    predictor: &Arc<dyn Predictor + Send + Sync>,
    pager: &PagerClient,
    queues: &PendingQueues,
    metrics: &Arc<Metrics>,
    mrn: &str,
    timestamp: &Hl7Timestamp,
) -> Result<ScoreOutcome, StoreError> {
    let view = match store.snapshot(mrn, Some(timestamp)) {
        Ok(view) => view,
        Err(e) if e.is_not_found() => return Ok(ScoreOutcome::MissingDemographics),
        Err(e) => return Err(e),
    };

    let Ok(vector) = features::extract(&view, timestamp) else {
        // Unreachable from the pipeline (the triggering lab is in the view),
        // but a drained entry can predate every stored lab.
        warn!(mrn, "no observations at or before the pending timestamp");
        return Ok(ScoreOutcome::Negative);
    };

    let verdict = predictor.predict(&vector);
    debug!(mrn, verdict, "prediction made");
    if verdict == 0 {
        return Ok(ScoreOutcome::Negative);
    }

    inc(&metrics.pos_predictions);
    let compact = timestamp.compact();
    match pager.page(mrn, &compact).await {
        Ok(()) => {
            info!(mrn, timestamp = %compact, "positive prediction paged");
            Ok(ScoreOutcome::Paged)
        }
        Err(e) => {
            inc(&metrics.failed_http);
            warn!(mrn, error = %e, "page failed, queued for retry");
            queues.pages().push(PendingPage {
                mrn: mrn.to_owned(),
                timestamp: compact,
            });
            Ok(ScoreOutcome::PageQueued)
        }
    }
}
