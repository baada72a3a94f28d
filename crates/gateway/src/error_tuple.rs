//! Decoder for the gateway's asynchronous error channel.
//!
//! After a failed notification the gateway writes a single 6-byte tuple and
//! closes the connection:
//!
//! ```text
//! [command: u8][status: u8][notification id: u32 big-endian]
//! ```

/// Size of an error tuple on the wire.
pub const ERROR_TUPLE_BYTES: usize = 6;

/// Description used for any status code missing from the table.
pub const UNKNOWN_STATUS_DESCRIPTION: &str = "Unknown error. Possible protocol bug?";

/// A decoded error tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorTuple {
    /// Framing marker, not used for classification.
    pub command: u8,
    pub status: u8,
    /// The identifier the gateway was given on the wire, not the local record id.
    pub notification_id: u32,
}

impl ErrorTuple {
    pub fn decode(buffer: &[u8; ERROR_TUPLE_BYTES]) -> Self {
        Self {
            command: buffer[0],
            status: buffer[1],
            notification_id: u32::from_be_bytes([buffer[2], buffer[3], buffer[4], buffer[5]]),
        }
    }

    pub fn description(&self) -> &'static str {
        describe_status(self.status)
    }
}

/// Map a gateway status code to its description.
pub fn describe_status(status: u8) -> &'static str {
    match status {
        1 => "Processing error",
        2 => "Missing device token",
        3 => "Missing topic",
        4 => "Missing payload",
        5 => "Missing token size",
        6 => "Missing topic size",
        7 => "Missing payload size",
        8 => "Invalid token",
        255 => "None (unknown error)",
        _ => UNKNOWN_STATUS_DESCRIPTION,
    }
}
