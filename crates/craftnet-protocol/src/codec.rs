//! The two wire encodings.
//!
//! - **Binary fast path** for the two highest-frequency kinds: the
//!   self-move report (tag `0x01`) and the host's per-player position
//!   broadcast (tag `0x02`). Fixed layouts, big-endian numeric fields,
//!   angles quantized to a signed byte.
//! - **CRC-32 envelope** (tag `0x00`) for everything else: a 4-byte
//!   big-endian checksum of the UTF-8 JSON body, then the body. The
//!   checksum guards against relay-tunnel corruption.
//!
//! [`decode_text`] additionally accepts a bare JSON body with no
//! envelope — the relay's signaling path is natively textual.

use std::f32::consts::PI;

use crate::crc::crc32;
use crate::{MessageBody, NumericId, ProtocolError, WireMessage};

/// Envelope type tag.
pub const TAG_ENVELOPE: u8 = 0x00;
/// Binary self-move type tag.
pub const TAG_MOVE: u8 = 0x01;
/// Binary per-player broadcast type tag.
pub const TAG_PLAYER_MOVE: u8 = 0x02;

/// `0x01` layout: tag + u32 timestamp + 3×f32 + yaw + pitch + health.
const MOVE_LEN: usize = 1 + 4 + 12 + 1 + 1 + 1;
/// `0x02` layout: `0x01` layout plus a u16 numeric id and a u8 latency.
const PLAYER_MOVE_LEN: usize = 1 + 4 + 2 + 12 + 1 + 1 + 1 + 1;

/// Quantizes a radian angle to a signed byte: `round(rad * 127/π)`.
///
/// ±π maps to ±127 exactly; values outside ±π clamp rather than wrap,
/// callers are expected to normalize first.
pub fn quantize_angle(rad: f32) -> i8 {
    (rad * 127.0 / PI).round().clamp(-127.0, 127.0) as i8
}

/// Reverses [`quantize_angle`]: `byte * π/127`.
pub fn dequantize_angle(byte: i8) -> f32 {
    byte as f32 * PI / 127.0
}

/// Encodes a message for transmission.
///
/// `Move` and `PlayerMove` take the binary fast path; every other kind
/// gets the checksummed JSON envelope.
pub fn encode(msg: &WireMessage) -> Result<Vec<u8>, ProtocolError> {
    match &msg.body {
        MessageBody::Move {
            position,
            yaw,
            pitch,
            health,
        } => {
            let mut buf = Vec::with_capacity(MOVE_LEN);
            buf.push(TAG_MOVE);
            buf.extend((msg.timestamp as u32).to_be_bytes());
            for axis in position {
                buf.extend(axis.to_be_bytes());
            }
            buf.push(quantize_angle(*yaw) as u8);
            buf.push(quantize_angle(*pitch) as u8);
            buf.push(*health);
            Ok(buf)
        }
        MessageBody::PlayerMove {
            nid,
            position,
            yaw,
            pitch,
            health,
            latency_ms,
        } => {
            let mut buf = Vec::with_capacity(PLAYER_MOVE_LEN);
            buf.push(TAG_PLAYER_MOVE);
            buf.extend((msg.timestamp as u32).to_be_bytes());
            buf.extend(nid.0.to_be_bytes());
            for axis in position {
                buf.extend(axis.to_be_bytes());
            }
            buf.push(quantize_angle(*yaw) as u8);
            buf.push(quantize_angle(*pitch) as u8);
            buf.push(*health);
            buf.push(*latency_ms);
            Ok(buf)
        }
        _ => {
            let body =
                serde_json::to_vec(msg).map_err(ProtocolError::Encode)?;
            let mut buf = Vec::with_capacity(5 + body.len());
            buf.push(TAG_ENVELOPE);
            buf.extend(crc32(&body).to_be_bytes());
            buf.extend(body);
            Ok(buf)
        }
    }
}

/// Decodes a received frame.
///
/// Any malformed input — bad checksum, unknown tag, truncated layout,
/// invalid JSON — is an `Err` the caller drops; none of these are
/// fatal to the session.
pub fn decode(data: &[u8]) -> Result<WireMessage, ProtocolError> {
    let (&tag, rest) = data.split_first().ok_or(ProtocolError::Truncated {
        needed: 1,
        got: 0,
    })?;

    match tag {
        TAG_ENVELOPE => {
            if rest.len() < 4 {
                return Err(ProtocolError::Truncated {
                    needed: 5,
                    got: data.len(),
                });
            }
            let (checksum, body) = rest.split_at(4);
            let expected =
                u32::from_be_bytes([checksum[0], checksum[1], checksum[2], checksum[3]]);
            let found = crc32(body);
            if expected != found {
                return Err(ProtocolError::ChecksumMismatch {
                    expected,
                    found,
                });
            }
            serde_json::from_slice(body).map_err(ProtocolError::Decode)
        }
        TAG_MOVE => {
            if data.len() != MOVE_LEN {
                return Err(ProtocolError::Truncated {
                    needed: MOVE_LEN,
                    got: data.len(),
                });
            }
            let timestamp = read_u32(&data[1..5]) as u64;
            let position = read_vec3(&data[5..17]);
            Ok(WireMessage {
                sequence: None,
                timestamp,
                body: MessageBody::Move {
                    position,
                    yaw: dequantize_angle(data[17] as i8),
                    pitch: dequantize_angle(data[18] as i8),
                    health: data[19],
                },
            })
        }
        TAG_PLAYER_MOVE => {
            if data.len() != PLAYER_MOVE_LEN {
                return Err(ProtocolError::Truncated {
                    needed: PLAYER_MOVE_LEN,
                    got: data.len(),
                });
            }
            let timestamp = read_u32(&data[1..5]) as u64;
            let nid = NumericId(u16::from_be_bytes([data[5], data[6]]));
            let position = read_vec3(&data[7..19]);
            Ok(WireMessage {
                sequence: None,
                timestamp,
                body: MessageBody::PlayerMove {
                    nid,
                    position,
                    yaw: dequantize_angle(data[19] as i8),
                    pitch: dequantize_angle(data[20] as i8),
                    health: data[21],
                    latency_ms: data[22],
                },
            })
        }
        other => Err(ProtocolError::UnknownTag(other)),
    }
}

/// Decodes an already-textual message body with no envelope or CRC.
///
/// Control and signaling paths (relay room broadcasts) deliver bare
/// JSON; they never carry the binary fast path.
pub fn decode_text(text: &str) -> Result<WireMessage, ProtocolError> {
    serde_json::from_str(text).map_err(ProtocolError::Decode)
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn read_vec3(bytes: &[u8]) -> [f32; 3] {
    let mut out = [0f32; 3];
    for (i, chunk) in bytes.chunks_exact(4).enumerate() {
        out[i] = f32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    out
}
