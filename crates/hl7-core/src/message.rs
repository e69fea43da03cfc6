//! HL7 v2.5 message parsing.
//!
//! A message is a sequence of segments separated by `CR`; fields within a
//! segment are separated by `|`. Only the three message types in the upstream
//! contract are accepted (`ADT^A01`, `ADT^A03`, `ORU^R01`); everything else
//! is a parse error. Parsing is all-or-nothing: a `ParseError` carries the
//! offending payload and no partial event is ever returned.

use crate::timestamp::{Hl7Timestamp, TimestampError};
use serde::{Deserialize, Serialize};
use std::fmt;

// Field indices, counted the HL7 way (segment id is index 0).
const MSH_MESSAGE_TYPE: usize = 8;
const PID_MRN: usize = 3;
const PID_DOB: usize = 7;
const PID_SEX: usize = 8;
const OBR_OBSERVED_AT: usize = 7;
const OBX_TEST_ID: usize = 3;
const OBX_VALUE: usize = 5;

const CREATININE: &str = "CREATININE";

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// Patient sex as encoded for the model (`M` = 0, `F` = 1).
#[derive(Debug, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum Sex {
    Male,
    Female,
}

impl Sex {
    pub fn as_flag(self) -> i64 {
        match self {
            Sex::Male => 0,
            Sex::Female => 1,
        }
    }

    pub fn from_flag(flag: i64) -> Option<Sex> {
        match flag {
            0 => Some(Sex::Male),
            1 => Some(Sex::Female),
            _ => None,
        }
    }
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Sex::Male => write!(f, "M"),
            Sex::Female => write!(f, "F"),
        }
    }
}

/// A single creatinine result with the timestamp inherited from the nearest
/// preceding OBR segment.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: Hl7Timestamp,
    pub value: f64,
}

/// A validated, typed HL7 event.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub enum ParsedEvent {
    Admit {
        mrn: String,
        dob: Hl7Timestamp,
        sex: Sex,
    },
    Discharge {
        mrn: String,
    },
    LabResult {
        mrn: String,
        observations: Vec<Observation>,
    },
}

impl ParsedEvent {
    pub fn mrn(&self) -> &str {
        match self {
            ParsedEvent::Admit { mrn, .. }
            | ParsedEvent::Discharge { mrn }
            | ParsedEvent::LabResult { mrn, .. } => mrn,
        }
    }

    /// Render the event in the producer's canonical segment layout.
    ///
    /// `message_time` fills MSH-7. Used by the emulated producer in tests;
    /// `parse_event` inverts it for every representable event.
    pub fn to_hl7(&self, message_time: &Hl7Timestamp) -> String {
        let msh = |message_type: &str| {
            format!(
                "MSH|^~\\&|||||{}||{}|||2.5\r",
                message_time.compact(),
                message_type
            )
        };
        match self {
            ParsedEvent::Admit { mrn, dob, sex } => {
                format!("{}PID|1||{}||||{}|{}\r", msh("ADT^A01"), mrn, dob.compact(), sex)
            }
            ParsedEvent::Discharge { mrn } => {
                format!("{}PID|1||{}\r", msh("ADT^A03"), mrn)
            }
            ParsedEvent::LabResult { mrn, observations } => {
                let mut message = format!("{}PID|1||{}\r", msh("ORU^R01"), mrn);
                for (i, obs) in observations.iter().enumerate() {
                    message.push_str(&format!("OBR|{}||||||{}\r", i + 1, obs.timestamp.compact()));
                    message.push_str(&format!("OBX|{}|SN|CREATININE||{}\r", i + 1, obs.value));
                }
                message
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A parse failure, carrying the payload that caused it.
#[derive(Debug, thiserror::Error)]
#[error("{kind}; message: {payload:?}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub payload: String,
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ParseErrorKind {
    #[error("missing {0} segment")]
    MissingSegment(&'static str),
    #[error("missing field {0}")]
    MissingField(&'static str),
    #[error("unsupported message type {0:?}")]
    UnknownMessageType(String),
    #[error("invalid sex {0:?}")]
    InvalidSex(String),
    #[error("bad timestamp in {field}: {source}")]
    Timestamp {
        field: &'static str,
        source: TimestampError,
    },
    #[error("creatinine result without a preceding observation time")]
    MissingObservationTime,
    #[error("invalid creatinine value {0:?}")]
    InvalidValue(String),
    #[error("no creatinine result in ORU message")]
    NoCreatinine,
}

// ---------------------------------------------------------------------------
// Segment view
// ---------------------------------------------------------------------------

/// A borrowed view of one segment: id plus `|`-separated fields.
struct Segment<'a> {
    id: &'a str,
    fields: Vec<&'a str>,
}

impl<'a> Segment<'a> {
    fn split(line: &'a str) -> Segment<'a> {
        let fields: Vec<&str> = line.split('|').collect();
        Segment {
            id: fields[0],
            fields,
        }
    }

    /// Field by HL7 index; absent trailing fields read as empty.
    fn field(&self, index: usize) -> &'a str {
        self.fields.get(index).copied().unwrap_or("")
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parse one decoded MLLP payload into a typed event.
pub fn parse_event(payload: &str) -> Result<ParsedEvent, ParseError> {
    parse_segments(payload).map_err(|kind| ParseError {
        kind,
        payload: payload.to_owned(),
    })
}

fn parse_segments(payload: &str) -> Result<ParsedEvent, ParseErrorKind> {
    let segments: Vec<Segment> = payload
        .split('\r')
        .filter(|line| !line.is_empty())
        .map(Segment::split)
        .collect();

    let msh = segments
        .iter()
        .find(|s| s.id == "MSH")
        .ok_or(ParseErrorKind::MissingSegment("MSH"))?;
    let pid = segments
        .iter()
        .find(|s| s.id == "PID")
        .ok_or(ParseErrorKind::MissingSegment("PID"))?;

    let mrn = pid.field(PID_MRN);
    if mrn.is_empty() {
        return Err(ParseErrorKind::MissingField("PID-3"));
    }
    let mrn = mrn.to_owned();

    match msh.field(MSH_MESSAGE_TYPE) {
        "ADT^A01" => parse_admit(pid, mrn),
        "ADT^A03" => Ok(ParsedEvent::Discharge { mrn }),
        "ORU^R01" => parse_lab_result(&segments, mrn),
        other => Err(ParseErrorKind::UnknownMessageType(other.to_owned())),
    }
}

fn parse_admit(pid: &Segment, mrn: String) -> Result<ParsedEvent, ParseErrorKind> {
    let dob = Hl7Timestamp::parse(pid.field(PID_DOB))
        .map_err(|source| ParseErrorKind::Timestamp {
            field: "PID-7",
            source,
        })?
        .ok_or(ParseErrorKind::MissingField("PID-7"))?;

    let sex = match pid.field(PID_SEX) {
        "M" => Sex::Male,
        "F" => Sex::Female,
        other => return Err(ParseErrorKind::InvalidSex(other.to_owned())),
    };

    Ok(ParsedEvent::Admit { mrn, dob, sex })
}

fn parse_lab_result(segments: &[Segment], mrn: String) -> Result<ParsedEvent, ParseErrorKind> {
    let mut observations = Vec::new();
    // The active observation time: the most recent OBR-7 seen so far.
    let mut observed_at: Option<Hl7Timestamp> = None;

    for segment in segments {
        match segment.id {
            "OBR" => {
                observed_at = Hl7Timestamp::parse(segment.field(OBR_OBSERVED_AT)).map_err(
                    |source| ParseErrorKind::Timestamp {
                        field: "OBR-7",
                        source,
                    },
                )?;
            }
            "OBX" if segment.field(OBX_TEST_ID) == CREATININE => {
                let timestamp = observed_at.ok_or(ParseErrorKind::MissingObservationTime)?;
                let raw = segment.field(OBX_VALUE);
                let value = raw
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite() && *v > 0.0)
                    .ok_or_else(|| ParseErrorKind::InvalidValue(raw.to_owned()))?;
                observations.push(Observation { timestamp, value });
            }
            _ => {}
        }
    }

    if observations.is_empty() {
        return Err(ParseErrorKind::NoCreatinine);
    }

    Ok(ParsedEvent::LabResult { mrn, observations })
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
