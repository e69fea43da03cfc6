//! MLLP frame extraction and construction.
//!
//! MLLP wraps each HL7 message as `<VT> payload <FS><CR>`. The framer owns a
//! rolling byte buffer fed from `recv` and yields complete payloads as they
//! become available, so it is insensitive to how the TCP stream is chunked.
//!
//! Bytes arriving before a `VT` are producer framing noise and are silently
//! discarded.

/// Start-of-block sentinel.
pub const VT: u8 = 0x0b;
/// End-of-block sentinel.
pub const FS: u8 = 0x1c;
/// Trailing carriage return after the end-of-block.
pub const CR: u8 = 0x0d;

/// Incremental MLLP deframer over a rolling buffer.
#[derive(Debug, Default)]
pub struct MllpFramer {
    buffer: Vec<u8>,
}

impl MllpFramer {
    pub fn new() -> MllpFramer {
        MllpFramer { buffer: Vec::new() }
    }

    /// Append freshly received bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Extract the next complete payload, if one is buffered.
    ///
    /// Consumes through the frame's trailing `CR`; the unconsumed suffix is
    /// retained for subsequent calls.
    pub fn next_payload(&mut self) -> Option<Vec<u8>> {
        // Drop noise before the first start-of-block.
        match self.buffer.iter().position(|&b| b == VT) {
            Some(0) => {}
            Some(start) => {
                self.buffer.drain(..start);
            }
            None => {
                self.buffer.clear();
                return None;
            }
        }

        // Find the earliest FS CR pair after the VT.
        let end = self.buffer[1..]
            .windows(2)
            .position(|w| w == [FS, CR])
            .map(|i| i + 1)?;

        let payload = self.buffer[1..end].to_vec();
        self.buffer.drain(..end + 2);
        Some(payload)
    }

    /// Discard any partially buffered frame (used when the connection drops:
    /// the producer will restart its stream on reconnect).
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

/// Wrap a payload in an MLLP frame.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(payload.len() + 3);
    framed.push(VT);
    framed.extend_from_slice(payload);
    framed.push(FS);
    framed.push(CR);
    framed
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
