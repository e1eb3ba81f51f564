//! Fixed-width 162-byte frame encoding and decoding.
//!
//! ```text
//! CRC(8 hex) | SEQ(8 hex) | TIMESTAMP(26, "YYYY-MM-DD|HH:MM:SS.ffffff") | PAYLOAD(120, space-padded)
//! ```
//!
//! CRC is computed over the 154 bytes following the CRC field, payload
//! padding included. The format is ASCII hex and an ASCII timestamp on
//! purpose: the wire is human-debuggable in a packet capture, endian-free,
//! and requires no negotiation between peers.

use chrono::{Local, NaiveDateTime};

use crate::error::FrameError;

pub const CRC_LEN: usize = 8;
pub const SEQ_LEN: usize = 8;
pub const HEX_LEN: usize = CRC_LEN + SEQ_LEN;
pub const TIMESTAMP_LEN: usize = 26;
pub const HEADER_LEN: usize = HEX_LEN + TIMESTAMP_LEN;
pub const PAYLOAD_LEN: usize = 120;
pub const FRAME_LEN: usize = HEADER_LEN + PAYLOAD_LEN;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d|%H:%M:%S%.6f";

/// A frame decoded off the wire, with the header stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub seq: u32,
    pub timestamp: NaiveDateTime,
    pub payload: String,
}

/// Trim and, if necessary, truncate a payload to [`PAYLOAD_LEN`] bytes.
///
/// Returns the (possibly truncated) payload and whether truncation occurred,
/// so the caller can emit a `message truncated` warning.
pub fn prepare_payload(payload: &str) -> (String, bool) {
    let trimmed = payload.trim();
    if trimmed.len() > PAYLOAD_LEN {
        (trimmed[..PAYLOAD_LEN].to_string(), true)
    } else {
        (trimmed.to_string(), false)
    }
}

/// Encode a (already trimmed/truncated) payload with the given sequence
/// number and the current local time into a 162-byte ASCII frame.
///
/// The CRC covers the full 154-byte `seq || timestamp || payload` body
/// *after* the payload has been right-padded to [`PAYLOAD_LEN`] — i.e. the
/// trailing 154 bytes of the finished frame, not the variable-length
/// pre-padding message.
pub fn encode(payload: &str, seq: u32) -> Vec<u8> {
    debug_assert!(payload.len() <= PAYLOAD_LEN);

    let now = Local::now().naive_local();
    let timestamp = now.format(TIMESTAMP_FORMAT).to_string();
    debug_assert_eq!(timestamp.len(), TIMESTAMP_LEN);

    let body = format!("{seq:08x}{timestamp}{payload:<PAYLOAD_LEN$}");
    debug_assert_eq!(body.len(), FRAME_LEN - CRC_LEN);

    let crc = crc32fast::hash(body.as_bytes());
    let frame = format!("{crc:08x}{body}").into_bytes();
    debug_assert_eq!(frame.len(), FRAME_LEN);
    frame
}

/// Interpret a fixed-width field as ASCII text, or `None` if it contains
/// any byte outside the 7-bit range (corrupt/adversarial input).
fn ascii_field(bytes: &[u8]) -> Option<&str> {
    std::str::from_utf8(bytes).ok().filter(|s| s.is_ascii())
}

/// Decode a 162-byte frame.
///
/// The short-frame check runs against the frame with outer whitespace
/// stripped; the CRC is then recomputed over the *unstripped* 154 bytes
/// following the CRC field, since those bytes (payload padding included)
/// are exactly what the sender checksummed. Timestamp and sequence are
/// parsed from the same fixed offsets; the returned payload is the
/// stripped one with the header removed.
///
/// All fixed fields are read off the raw byte slice rather than a decoded
/// `String`, so a corrupt frame with a non-ASCII byte can never panic on a
/// char-boundary slice — it just fails to parse as hex/ASCII and becomes a
/// soft decode error like any other malformed field.
pub fn decode(wire: &[u8]) -> Result<Decoded, FrameError> {
    let trimmed = wire.trim_ascii();

    if trimmed.len() < HEADER_LEN {
        return Err(FrameError::Short { len: trimmed.len(), header: HEADER_LEN });
    }

    let crc_field = ascii_field(&wire[..CRC_LEN]);
    let received = crc_field
        .and_then(|s| u32::from_str_radix(s, 16).ok())
        .ok_or(FrameError::CrcMismatch { received: 0, computed: 0 })?;
    let computed = crc32fast::hash(&wire[CRC_LEN..]);
    if received != computed {
        return Err(FrameError::CrcMismatch { received, computed });
    }

    let timestamp_field = ascii_field(&wire[HEX_LEN..HEADER_LEN]).ok_or(FrameError::Timestamp)?;
    let timestamp = NaiveDateTime::parse_from_str(timestamp_field, TIMESTAMP_FORMAT)
        .map_err(|_| FrameError::Timestamp)?;

    // A malformed hex sequence can only happen if the CRC happened to match
    // despite corruption; fold it into the same family as a CRC error.
    let seq_field = ascii_field(&wire[CRC_LEN..HEX_LEN]);
    let seq = seq_field
        .and_then(|s| u32::from_str_radix(s, 16).ok())
        .ok_or(FrameError::CrcMismatch { received, computed })?;

    let payload = String::from_utf8_lossy(&trimmed[HEADER_LEN..]).into_owned();
    Ok(Decoded { seq, timestamp, payload })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let wire = encode("ping", 7);
        assert_eq!(wire.len(), FRAME_LEN);
        let decoded = decode(&wire).unwrap();
        assert_eq!(decoded.seq, 7);
        assert_eq!(decoded.payload, "ping");
    }

    #[test]
    fn microseconds_always_rendered() {
        let wire = encode("x", 0);
        let text = std::str::from_utf8(&wire).unwrap();
        let ts = &text[HEX_LEN..HEADER_LEN];
        assert_eq!(ts.len(), TIMESTAMP_LEN);
        assert!(ts.contains('.'));
        let frac = ts.rsplit('.').next().unwrap();
        assert_eq!(frac.len(), 6);
    }

    #[test]
    fn prepare_payload_trims_and_truncates() {
        let (out, truncated) = prepare_payload("  hello  ");
        assert_eq!(out, "hello");
        assert!(!truncated);

        let long = "x".repeat(150);
        let (out, truncated) = prepare_payload(&long);
        assert_eq!(out.len(), PAYLOAD_LEN);
        assert!(truncated);
    }

    #[test]
    fn encode_pads_payload_to_fixed_width() {
        let wire = encode("hi", 1);
        let text = std::str::from_utf8(&wire).unwrap();
        assert_eq!(text.len(), FRAME_LEN);
        let payload_field = &text[HEADER_LEN..];
        assert_eq!(payload_field.len(), PAYLOAD_LEN);
        assert_eq!(payload_field.trim_end(), "hi");
    }

    #[test]
    fn crc_sensitivity_single_bit_flip() {
        let mut wire = encode("payload data", 42);
        // Flip a bit well outside the CRC field (inside the payload).
        let idx = HEADER_LEN + 2;
        wire[idx] ^= 0x01;
        assert!(matches!(decode(&wire), Err(FrameError::CrcMismatch { .. })));
    }

    #[test]
    fn short_frame_detected() {
        let wire = b"tooshort".to_vec();
        assert!(matches!(decode(&wire), Err(FrameError::Short { .. })));
    }

    #[test]
    fn bad_timestamp_detected() {
        // Build the full crc||seq||timestamp||payload body by hand, padded
        // to the same 154 bytes `encode` would checksum, so the CRC we
        // stamp matches what `decode` recomputes.
        // Month "13" keeps the field the right width but is out of range,
        // so parsing (not just CRC validation) is what rejects this frame.
        let body = format!("{:08x}2024-13-01|12:00:00.000000{:<PAYLOAD_LEN$}", 1u32, "x");
        let crc = crc32fast::hash(body.as_bytes());
        let wire = format!("{crc:08x}{body}").into_bytes();

        assert!(matches!(decode(&wire), Err(FrameError::Timestamp)));
    }

    #[test]
    fn non_ascii_byte_in_crc_field_is_a_soft_error_not_a_panic() {
        let mut wire = encode("payload data", 1);
        // A non-ASCII byte straddling the CRC field's char-boundary-free
        // byte offsets must never panic a naive UTF-8 string slice.
        wire[3] = 0xff;
        assert!(matches!(decode(&wire), Err(FrameError::CrcMismatch { .. })));
    }

    #[test]
    fn non_ascii_byte_in_timestamp_field_is_a_soft_error_not_a_panic() {
        let mut wire = encode("payload data", 1);
        wire[HEX_LEN + 3] = 0xff;
        // Recomputed CRC no longer matches the corrupted body either, so
        // this still surfaces as CrcMismatch rather than reaching the
        // timestamp parse — both are soft errors, the point is no panic.
        assert!(decode(&wire).is_err());
    }

    #[test]
    fn sequence_wraps_via_u32() {
        let wire = encode("x", u32::MAX);
        let decoded = decode(&wire).unwrap();
        assert_eq!(decoded.seq, u32::MAX);
    }
}
