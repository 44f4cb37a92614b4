//! Error types for the protocol layer.
//!
//! Every variant here is a *soft* failure: the router treats a decode
//! error as "no message" and drops the frame. A single corrupted packet
//! must never take the session down.

/// Errors that can occur while encoding or decoding wire messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization of the JSON body failed.
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// The JSON body was malformed or didn't match the catalogue.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The envelope checksum didn't match the body. Expected on the
    /// relay path occasionally — the tunnel may re-wrap bytes through a
    /// textual intermediate and corrupt them.
    #[error("checksum mismatch: expected {expected:#010x}, found {found:#010x}")]
    ChecksumMismatch { expected: u32, found: u32 },

    /// The leading type tag is not one the binary fast path knows.
    #[error("unknown binary type tag {0:#04x}")]
    UnknownTag(u8),

    /// The frame is shorter than its fixed layout requires.
    #[error("truncated frame: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },
}
