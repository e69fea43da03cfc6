//! Scriptable MLLP producer.
//!
//! Plays the upstream hospital integration engine in tests: accepts TCP
//! connections, sends scripted bytes, and records the ACK codes the consumer
//! sends back. Each accepted connection runs one script and then closes, so a
//! test can exercise reconnect behavior by providing several scripts.

use hl7_core::{MllpFramer, mllp};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// One action in a connection's script.
#[derive(Debug, Clone)]
pub enum ProducerStep {
    /// Write raw bytes to the socket (not necessarily a whole frame).
    Send(Vec<u8>),
    /// Read until `n` ACK frames have arrived, recording their MSA codes.
    AwaitAcks(usize),
}

impl ProducerStep {
    /// Convenience: a complete MLLP-framed HL7 message.
    pub fn send_message(message: &str) -> ProducerStep {
        ProducerStep::Send(mllp::frame(message.as_bytes()))
    }
}

/// Handle to the running producer.
pub struct MllpProducer {
    addr: SocketAddr,
    acks: Arc<Mutex<Vec<String>>>,
}

impl MllpProducer {
    /// Bind an ephemeral port and serve `scripts`, one per accepted
    /// connection, in order. The listener stops after the last script.
    pub async fn start(scripts: Vec<Vec<ProducerStep>>) -> std::io::Result<MllpProducer> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let acks = Arc::new(Mutex::new(Vec::new()));

        let recorded = acks.clone();
        tokio::spawn(async move {
            for script in scripts {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                run_script(&mut stream, script, &recorded).await;
            }
        });

        Ok(MllpProducer { addr, acks })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The MSA codes received so far, in arrival order.
    pub fn ack_codes(&self) -> Vec<String> {
        self.acks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Poll until at least `n` ACKs have been recorded. Callers wrap this in
    /// a timeout.
    pub async fn wait_for_acks(&self, n: usize) {
        loop {
            if self.ack_codes().len() >= n {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    }
}

async fn run_script(stream: &mut TcpStream, script: Vec<ProducerStep>, acks: &Mutex<Vec<String>>) {
    let mut framer = MllpFramer::new();
    let mut buf = [0u8; 1024];

    for step in script {
        match step {
            ProducerStep::Send(bytes) => {
                if stream.write_all(&bytes).await.is_err() {
                    return;
                }
            }
            ProducerStep::AwaitAcks(count) => {
                let mut remaining = count;
                'read: while remaining > 0 {
                    while let Some(payload) = framer.next_payload() {
                        if let Some(code) = extract_msa_code(&payload) {
                            acks.lock()
                                .unwrap_or_else(std::sync::PoisonError::into_inner)
                                .push(code);
                        }
                        remaining -= 1;
                        if remaining == 0 {
                            break 'read;
                        }
                    }
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => framer.extend(&buf[..n]),
                    }
                }
            }
        }
    }
}

/// Pull the code out of the MSA segment of an ACK payload.
fn extract_msa_code(payload: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(payload).ok()?;
    text.split('\r')
        .find(|segment| segment.starts_with("MSA|"))
        .and_then(|segment| segment.split('|').nth(1))
        .map(str::to_owned)
}
