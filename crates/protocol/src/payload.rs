//! The `tts.chunk` payload and its three accepted encodings.
//!
//! Legacy SIP bridge clients sent audio as a base64 string, a signed
//! byte array, or an unsigned byte array depending on their runtime.
//! The server accepts all three on input and emits whichever form the
//! client declared at `start` time.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Audio bytes for a `tts.chunk` message.
#[derive(Debug, Clone, PartialEq)]
pub enum TtsPayload {
    /// Base64-encoded string form.
    Base64(String),
    /// Raw byte-array form (serialized as a JSON number array).
    Bytes(Vec<u8>),
}

impl TtsPayload {
    /// Build a payload from raw audio bytes in the client's preferred form.
    pub fn from_bytes(bytes: &[u8], binary: bool) -> Self {
        if binary {
            TtsPayload::Bytes(bytes.to_vec())
        } else {
            TtsPayload::Base64(BASE64.encode(bytes))
        }
    }

    /// Decode back to raw audio bytes.
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        match self {
            TtsPayload::Base64(s) => BASE64.decode(s),
            TtsPayload::Bytes(b) => Ok(b.clone()),
        }
    }

    /// Raw byte length after decoding (0 if the base64 is malformed).
    pub fn byte_len(&self) -> usize {
        match self {
            TtsPayload::Base64(s) => s.len() / 4 * 3,
            TtsPayload::Bytes(b) => b.len(),
        }
    }
}

impl Serialize for TtsPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TtsPayload::Base64(s) => serializer.serialize_str(s),
            TtsPayload::Bytes(bytes) => {
                let mut seq = serializer.serialize_seq(Some(bytes.len()))?;
                for b in bytes {
                    seq.serialize_element(b)?;
                }
                seq.end()
            }
        }
    }
}

struct PayloadVisitor;

impl<'de> Visitor<'de> for PayloadVisitor {
    type Value = TtsPayload;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a base64 string or an array of byte values")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<TtsPayload, E> {
        Ok(TtsPayload::Base64(v.to_owned()))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<TtsPayload, A::Error> {
        let mut bytes = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        // Elements may be unsigned (0..=255) or signed (-128..=127);
        // signed values are reinterpreted as their two's-complement byte.
        while let Some(v) = seq.next_element::<i64>()? {
            let byte = if (0..=255).contains(&v) {
                v as u8
            } else if (-128..=-1).contains(&v) {
                (v as i8) as u8
            } else {
                return Err(de::Error::custom(format!("byte value out of range: {v}")));
            };
            bytes.push(byte);
        }
        Ok(TtsPayload::Bytes(bytes))
    }
}

impl<'de> Deserialize<'de> for TtsPayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(PayloadVisitor)
    }
}
