//! Wire protocol for craftnet.
//!
//! This crate defines the "language" that peers speak:
//!
//! - **Types** ([`WireMessage`], [`MessageBody`], [`Recipient`], etc.) —
//!   the message structures that travel on the wire.
//! - **Codec** ([`encode`], [`decode`], [`decode_text`]) — the two
//!   encodings: a fixed-layout binary fast path for the high-frequency
//!   movement messages, and a CRC-32-guarded JSON envelope for the rest.
//! - **Errors** ([`ProtocolError`]) — what can go wrong during
//!   encoding/decoding. Every decode failure is a soft error: the router
//!   drops the frame, it never takes the session down.
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw bytes) and the session
//! router (peer context). It doesn't know about connections or roles —
//! it only knows how to serialize and deserialize messages.
//!
//! ```text
//! Transport (bytes) → Protocol (WireMessage) → Router (peer context)
//! ```

mod codec;
mod crc;
mod error;
mod types;

pub use codec::{
    decode, decode_text, encode, dequantize_angle, quantize_angle,
    TAG_ENVELOPE, TAG_MOVE, TAG_PLAYER_MOVE,
};
pub use crc::crc32;
pub use error::ProtocolError;
pub use types::{
    EndpointId, MessageBody, NumericId, PlayerSnapshot, Recipient,
    WireMessage,
};
