//! Pending-work queues shared between the pipeline and the drainers.
//!
//! Two queues: labs that arrived before their patient's demographics
//! (`PendingInference`) and positive pages whose HTTP delivery has not yet
//! succeeded (`PendingPage`). Both survive graceful shutdown as JSON files in
//! the state directory and are re-loaded (and the files removed) on startup.
//!
//! # Lock order
//! Always inference before pages. Nothing holds both for long; the order is
//! fixed to rule out deadlock.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

const INFERENCE_FILE: &str = "pending_inference.json";
const PAGES_FILE: &str = "pending_pages.json";

/// A lab observation waiting for its patient's demographics.
///
/// The timestamp is the 14-digit compact form, same as the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingInference {
    pub mrn: String,
    pub timestamp: String,
}

/// A positive verdict whose page has not been accepted yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPage {
    pub mrn: String,
    pub timestamp: String,
}

/// Shared handles to both queues. Clone freely; clones share state.
#[derive(Debug, Clone, Default)]
pub struct PendingQueues {
    inference: Arc<Mutex<Vec<PendingInference>>>,
    pages: Arc<Mutex<Vec<PendingPage>>>,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl PendingQueues {
    pub fn new() -> PendingQueues {
        PendingQueues::default()
    }

    pub fn inference(&self) -> MutexGuard<'_, Vec<PendingInference>> {
        self.inference.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn pages(&self) -> MutexGuard<'_, Vec<PendingPage>> {
        self.pages.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Load queues persisted by a previous graceful shutdown.
    ///
    /// The files are consumed: they are removed once read so a crash after
    /// startup cannot double-load them.
    pub fn load(state_dir: &Path) -> Result<PendingQueues, QueueError> {
        let queues = PendingQueues::new();
        if let Some(entries) = read_and_remove::<Vec<PendingInference>>(
            &state_dir.join(INFERENCE_FILE),
        )? {
            *queues.inference() = entries;
        }
        if let Some(entries) =
            read_and_remove::<Vec<PendingPage>>(&state_dir.join(PAGES_FILE))?
        {
            *queues.pages() = entries;
        }
        Ok(queues)
    }

    /// Serialize both queues for restart recovery.
    pub fn persist(&self, state_dir: &Path) -> Result<(), QueueError> {
        let inference = self.inference().clone();
        let pages = self.pages().clone();
        std::fs::write(
            state_dir.join(INFERENCE_FILE),
            serde_json::to_vec(&inference)?,
        )?;
        std::fs::write(state_dir.join(PAGES_FILE), serde_json::to_vec(&pages)?)?;
        Ok(())
    }
}

fn read_and_remove<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<Option<T>, QueueError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read(path)?;
    let value = serde_json::from_slice(&contents)?;
    std::fs::remove_file(path)?;
    Ok(Some(value))
}
