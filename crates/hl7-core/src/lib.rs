//! HL7 v2.5 wire-format handling for the AKI monitor.
//!
//! This crate contains the pure (I/O-free) pieces of the ingest path: MLLP
//! frame extraction, HL7 message parsing into typed events, HL7 timestamp
//! decoding, and acknowledgement frame construction. It is shared between the
//! monitor service and the test utilities so both sides speak exactly the
//! same dialect.

pub mod ack;
pub mod message;
pub mod mllp;
pub mod timestamp;

pub use ack::{AckCode, ack_frame};
pub use message::{Observation, ParseError, ParseErrorKind, ParsedEvent, Sex, parse_event};
pub use mllp::MllpFramer;
pub use timestamp::{Hl7Timestamp, TimestampError};
