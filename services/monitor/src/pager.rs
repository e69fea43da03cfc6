//! Pager dispatch.
//!
//! Positive verdicts become a `POST /page` with body `"<mrn>,<timestamp>"`
//! and a hard 1-second timeout. Any non-2xx outcome (including the timeout)
//! counts as a failed attempt: the payload goes on the pending queue and the
//! drainer keeps retrying with 1-second spacing until the endpoint accepts.

use crate::metrics::{Metrics, inc};
use crate::storage::{PendingPage, PendingQueues};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

pub const PAGE_TIMEOUT: Duration = Duration::from_secs(1);
pub const RETRY_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum PagerError {
    #[error("pager request: {0}")]
    Http(#[from] reqwest::Error),
    #[error("pager rejected page: HTTP {0}")]
    Status(u16),
}

/// HTTP client for the pager endpoint.
#[derive(Clone)]
pub struct PagerClient {
    client: reqwest::Client,
    url: String,
}

impl PagerClient {
    /// `pager` is the `host:port` from `PAGER_ADDRESS`.
    pub fn new(pager: &str) -> Result<PagerClient, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(PAGE_TIMEOUT).build()?;
        Ok(PagerClient {
            client,
            url: format!("http://{pager}/page"),
        })
    }

    /// One delivery attempt. Success is any 2xx.
    pub async fn page(&self, mrn: &str, timestamp: &str) -> Result<(), PagerError> {
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(format!("{mrn},{timestamp}"))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(PagerError::Status(response.status().as_u16()))
        }
    }
}

/// Retry loop for pages whose first delivery failed.
///
/// Runs until the shutdown token flips; whatever is still queued at that
/// point is persisted by the caller.
pub async fn run_pager_drainer(
    client: PagerClient,
    queues: PendingQueues,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            () = tokio::time::sleep(RETRY_INTERVAL) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }

        // Snapshot under the lock, retry outside it.
        let pending: Vec<PendingPage> = queues.pages().clone();
        if pending.is_empty() {
            continue;
        }

        let mut delivered = Vec::new();
        for page in pending {
            match client.page(&page.mrn, &page.timestamp).await {
                Ok(()) => {
                    info!(mrn = %page.mrn, "queued page delivered");
                    delivered.push(page);
                }
                Err(e) => {
                    inc(&metrics.failed_http);
                    warn!(mrn = %page.mrn, error = %e, "page retry failed");
                }
            }
        }

        if !delivered.is_empty() {
            queues
                .pages()
                .retain(|entry| !delivered.contains(entry));
        }
    }
}
