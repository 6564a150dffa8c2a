//! Binary WS frame layout for inbound audio.
//!
//! The media gateway annotates each PCM frame with its sequence number
//! and sample-clock timestamp so the jitter buffer can reorder and
//! conceal. Layout, big-endian:
//!
//! ```text
//! [ seq: u32 ][ timestamp: u64 ][ pcm16 payload ... ]
//! ```

use invorto_domain::audio::AudioFrame;
use invorto_domain::error::{Error, Result};

/// Header size: 4-byte seq + 8-byte timestamp.
pub const FRAME_HEADER_LEN: usize = 12;

/// Encode a frame for the wire.
pub fn encode_frame(seq: u32, timestamp: u64, pcm: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + pcm.len());
    out.extend_from_slice(&seq.to_be_bytes());
    out.extend_from_slice(&timestamp.to_be_bytes());
    out.extend_from_slice(pcm);
    out
}

/// Decode a wire frame. The payload must be PCM16, so an odd byte count
/// is rejected along with anything shorter than the header.
pub fn decode_frame(bytes: &[u8]) -> Result<AudioFrame> {
    if bytes.len() < FRAME_HEADER_LEN {
        return Err(Error::BadRequest(format!(
            "audio frame shorter than header ({} bytes)",
            bytes.len()
        )));
    }
    let seq = u32::from_be_bytes(bytes[0..4].try_into().expect("4 bytes"));
    let timestamp = u64::from_be_bytes(bytes[4..12].try_into().expect("8 bytes"));
    let payload = &bytes[FRAME_HEADER_LEN..];
    if payload.len() % 2 != 0 {
        return Err(Error::BadRequest(
            "audio frame payload is not 16-bit aligned".into(),
        ));
    }
    Ok(AudioFrame::new(seq as u64, timestamp, payload.to_vec()))
}
