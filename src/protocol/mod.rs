//! Wire protocol of the TTS pipe.
//!
//! Requests arrive either as a bare UTF-8 JSON object, as a JSON object
//! behind a 4-byte little-endian length prefix, or (newer clients) behind
//! the `TTSP` magic with an explicit version byte. Responses are a bare
//! JSON array of voices or a length-prefixed WAV file; a failed request is
//! answered by closing the connection without writing anything.

pub mod decode;
pub mod encode;

pub use decode::{decode, Framing, Message, Request, RequestArgs, Schema};
pub use encode::{encode, Response};

/// Upper bound of a single read from the pipe; longer requests are truncated.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Marker of the versioned framing.
pub const VERSIONED_MAGIC: &[u8; 4] = b"TTSP";
pub const PROTOCOL_VERSION: u8 = 1;
/// Magic, version byte and u32 length.
pub const VERSIONED_HEADER_LEN: usize = 9;

/// Byte count a partially received request declares for itself.
///
/// `None` means the framing says nothing more is coming: bare JSON, raw
/// text, or a length that cannot fit in one message. A versioned header
/// that is itself incomplete asks for the header first.
pub fn declared_total(received: &[u8]) -> Option<usize> {
    if received.first() == Some(&b'{') {
        return None;
    }

    let (header, declared) = if received.starts_with(VERSIONED_MAGIC) {
        if received.len() < VERSIONED_HEADER_LEN {
            return Some(VERSIONED_HEADER_LEN);
        }
        (VERSIONED_HEADER_LEN, read_u32_le(&received[5..9]))
    } else if received.len() >= 4 {
        (4, read_u32_le(&received[0..4]))
    } else {
        return None;
    };

    let total = header + declared;
    (declared > 0 && total <= MAX_MESSAGE_SIZE).then_some(total)
}

fn read_u32_le(bytes: &[u8]) -> usize {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
}

/// Frame a JSON request body with a little-endian length prefix.
pub fn length_prefixed(json: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(4 + json.len());
    framed.extend_from_slice(&(json.len() as u32).to_le_bytes());
    framed.extend_from_slice(json);
    framed
}

/// Frame a JSON request body with the versioned header.
pub fn versioned(json: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(9 + json.len());
    framed.extend_from_slice(VERSIONED_MAGIC);
    framed.push(PROTOCOL_VERSION);
    framed.extend_from_slice(&(json.len() as u32).to_le_bytes());
    framed.extend_from_slice(json);
    framed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_total_for_partial_frames() {
        let framed = length_prefixed(br#"{"text":"Hi","args":{}}"#);
        assert_eq!(declared_total(&framed[..4]), Some(framed.len()));
        assert_eq!(declared_total(&framed), Some(framed.len()));

        let framed = versioned(br#"{"text":"Hi","args":{}}"#);
        assert_eq!(declared_total(&framed[..6]), Some(VERSIONED_HEADER_LEN));
        assert_eq!(declared_total(&framed[..9]), Some(framed.len()));
    }

    #[test]
    fn test_declared_total_ignores_unframed_input() {
        assert_eq!(declared_total(br#"{"a":1}"#), None);
        assert_eq!(declared_total(b"\x01\x02"), None);
        assert_eq!(declared_total(&[0, 0, 0, 0]), None);
        // Reads as a length far beyond one message.
        assert_eq!(declared_total(b" {\"text\""), None);
    }
}
