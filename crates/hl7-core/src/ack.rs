//! MLLP acknowledgement frames.
//!
//! Exactly one ACK is sent per message consumed, in receive order:
//! `MSH|^~\&|||||<now>||ACK|||2.5` followed by `MSA|<code>`, MLLP-framed.

use crate::mllp;
use std::fmt;

/// HL7 acknowledgement codes. `AR` is part of the table but the monitor
/// never sends it.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum AckCode {
    /// Application accept (`AA`).
    Accept,
    /// Application error (`AE`) — the message failed to parse.
    Error,
    /// Application reject (`AR`) — reserved, unused.
    Reject,
}

impl AckCode {
    pub fn as_str(self) -> &'static str {
        match self {
            AckCode::Accept => "AA",
            AckCode::Error => "AE",
            AckCode::Reject => "AR",
        }
    }
}

impl fmt::Display for AckCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Build a framed acknowledgement. `now` is the wall clock in
/// `YYYYMMDDHHMMSS` form; the caller dates each frame freshly.
pub fn ack_frame(code: AckCode, now: &str) -> Vec<u8> {
    let segments = [
        format!("MSH|^~\\&|||||{now}||ACK|||2.5"),
        format!("MSA|{code}"),
    ];
    let mut payload = segments.join("\r");
    payload.push('\r');
    mllp::frame(payload.as_bytes())
}
