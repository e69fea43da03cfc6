//! The ingest pipeline.
//!
//! Owns the MLLP connection and the read-write store handle, and drives the
//! receive → frame → parse → dispatch → infer → ack loop. Connection failures
//! reconnect with a 1-second backoff; a reconnect discards any partially
//! framed bytes (the producer restarts its stream). Exactly one ACK is sent
//! per framed message, in receive order, before the next read.
//!
//! Parse failures are acknowledged `AE` and dropped — the producer does not
//! resend. Store write failures are fatal and bubble out of `begin`.

use crate::config::Endpoint;
use crate::metrics::{Metrics, inc};
use crate::pager::PagerClient;
use crate::predictor::Predictor;
use crate::scoring::{ScoreOutcome, score_observation};
use crate::storage::{PatientStore, PendingInference, PendingQueues, StoreError};
use hl7_core::{AckCode, MllpFramer, ParsedEvent, ack_frame, parse_event};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Matches the producer's send granularity; the framer handles any chunking.
pub const MLLP_BUFFER_SIZE: usize = 1024;
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

pub struct Pipeline {
    mllp: Endpoint,
    store: PatientStore,
    predictor: Arc<dyn Predictor + Send + Sync>,
    pager: PagerClient,
    queues: PendingQueues,
    metrics: Arc<Metrics>,
    shutdown: watch::Receiver<bool>,
}

impl Pipeline {
    pub fn new(
        mllp: Endpoint,
        store: PatientStore,
        predictor: Arc<dyn Predictor + Send + Sync>,
        pager: PagerClient,
        queues: PendingQueues,
        metrics: Arc<Metrics>,
        shutdown: watch::Receiver<bool>,
    ) -> Pipeline {
        Pipeline {
            mllp,
            store,
            predictor,
            pager,
            queues,
            metrics,
            shutdown,
        }
    }

    /// Run the ingest loop until shutdown. `Err` only on a fatal store write
    /// failure.
    pub async fn begin(mut self) -> Result<(), StoreError> {
        let mut framer = MllpFramer::new();
        let mut buf = vec![0u8; MLLP_BUFFER_SIZE];

        let Some(mut stream) = self.connect().await else {
            return Ok(());
        };

        loop {
            let n = tokio::select! {
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        info!("shutdown requested, closing MLLP connection");
                        return Ok(());
                    }
                    continue;
                }
                result = stream.read(&mut buf) => match result {
                    Ok(0) => {
                        warn!("MLLP connection closed by peer, reconnecting");
                        framer.reset();
                        match self.connect().await {
                            Some(s) => stream = s,
                            None => return Ok(()),
                        }
                        continue;
                    }
                    Ok(n) => n,
                    Err(e) => {
                        warn!(error = %e, "MLLP read failed, reconnecting");
                        framer.reset();
                        match self.connect().await {
                            Some(s) => stream = s,
                            None => return Ok(()),
                        }
                        continue;
                    }
                },
            };

            framer.extend(&buf[..n]);
            while let Some(payload) = framer.next_payload() {
                inc(&self.metrics.messages_received);
                let ack = self.handle_message(&payload).await?;

                // ACKs are idempotent to the producer: on a send failure,
                // reconnect and re-send the same code, freshly dated.
                loop {
                    let frame = ack_frame(ack, &now_compact());
                    match stream.write_all(&frame).await {
                        Ok(()) => break,
                        Err(e) => {
                            warn!(error = %e, "ACK send failed, reconnecting");
                            framer.reset();
                            match self.connect().await {
                                Some(s) => stream = s,
                                None => return Ok(()),
                            }
                        }
                    }
                }
            }
        }
    }

    /// Connect with 1-second retries. `None` means shutdown arrived first.
    async fn connect(&mut self) -> Option<TcpStream> {
        loop {
            if *self.shutdown.borrow() {
                return None;
            }
            inc(&self.metrics.mllp_connections_made);
            match TcpStream::connect((self.mllp.host.as_str(), self.mllp.port)).await {
                Ok(stream) => {
                    info!(address = %self.mllp, "connected to MLLP producer");
                    return Some(stream);
                }
                Err(e) => {
                    warn!(address = %self.mllp, error = %e, "MLLP connect failed, retrying");
                    tokio::select! {
                        () = tokio::time::sleep(RECONNECT_INTERVAL) => {}
                        _ = self.shutdown.changed() => {}
                    }
                }
            }
        }
    }

    /// Parse and dispatch one framed message; the returned code is what the
    /// producer hears. Inference and paging failures never surface beyond it.
    async fn handle_message(&mut self, payload: &[u8]) -> Result<AckCode, StoreError> {
        let Ok(text) = std::str::from_utf8(payload) else {
            warn!("dropping non-UTF-8 MLLP payload");
            return Ok(AckCode::Error);
        };
        let event = match parse_event(text) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e.kind, "dropping unparseable message");
                return Ok(AckCode::Error);
            }
        };

        match event {
            ParsedEvent::Admit { mrn, dob, sex } => {
                self.store.upsert_demographics(&mrn, &dob, sex)?;
                debug!(%mrn, "demographics recorded");
            }
            ParsedEvent::Discharge { mrn } => {
                // Observed but state is untouched: discharged patients stay
                // scoreable.
                debug!(%mrn, "discharge observed");
            }
            ParsedEvent::LabResult { mrn, observations } => {
                inc(&self.metrics.blood_test_received);
                for obs in observations {
                    self.store.append_lab(&mrn, &obs.timestamp, obs.value)?;
                    let outcome = score_observation(
                        &self.store,
                        &self.predictor,
                        &self.pager,
                        &self.queues,
                        &self.metrics,
                        &mrn,
                        &obs.timestamp,
                    )
                    .await?;
                    if outcome == ScoreOutcome::MissingDemographics {
                        debug!(%mrn, "lab before admit, queued for the drainer");
                        self.queues.inference().push(PendingInference {
                            mrn: mrn.clone(),
                            timestamp: obs.timestamp.compact(),
                        });
                    }
                }
            }
        }
        Ok(AckCode::Accept)
    }
}

/// Current wall clock in the 14-digit HL7 form, for ACK MSH-7.
fn now_compact() -> String {
    chrono::Local::now().format("%Y%m%d%H%M%S").to_string()
}
