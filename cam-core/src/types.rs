//! Shared types, error enums, and the decoded CAM record.

use serde::Serialize;
use thiserror::Error;

/// Why a frame could not be turned into a `CamRecord`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("not an ITS message: {0}")]
    NotAnItsMessage(String),
    #[error("missing mandatory field `{field}`")]
    MissingMandatoryField {
        field: &'static str,
        station_id: Option<StationId>,
    },
}

impl DecodeError {
    pub(crate) fn malformed(what: impl Into<String>) -> Self {
        DecodeError::MalformedFrame(what.into())
    }

    pub(crate) fn not_its(what: impl Into<String>) -> Self {
        DecodeError::NotAnItsMessage(what.into())
    }

    /// Stable short name, used as a log field and stats key.
    pub fn category(&self) -> &'static str {
        match self {
            DecodeError::MalformedFrame(_) => "malformed_frame",
            DecodeError::NotAnItsMessage(_) => "not_an_its_message",
            DecodeError::MissingMandatoryField { .. } => "missing_mandatory_field",
        }
    }

    /// Station id, when decoding got far enough to read it.
    pub fn station_id(&self) -> Option<StationId> {
        match self {
            DecodeError::MissingMandatoryField { station_id, .. } => *station_id,
            _ => None,
        }
    }
}

/// All errors produced by cam-core.
#[derive(Debug, Error)]
pub enum CamError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, CamError>;

// ---------------------------------------------------------------------------
// Station identity
// ---------------------------------------------------------------------------

/// ITS station identifier (`StationID`, 0..=4294967295).
pub type StationId = u32;

// ---------------------------------------------------------------------------
// Fixed-point scaling
// ---------------------------------------------------------------------------

/// Latitude/longitude are carried in tenths of a microdegree.
pub const COORD_SCALE: f64 = 1e7;

/// Speed is carried in centimetres per second.
pub const SPEED_SCALE: f64 = 1e2;

// ---------------------------------------------------------------------------
// Decoded CAM
// ---------------------------------------------------------------------------

/// Fields extracted from one Cooperative Awareness Message.
///
/// Only built once station id, latitude and longitude are all known. The
/// arrival timestamp is not part of the frame; the ingestion side attaches it
/// when recording (see `TrajectoryStore::record`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CamRecord {
    pub station_id: StationId,
    /// Decimal degrees.
    pub latitude: f64,
    /// Decimal degrees.
    pub longitude: f64,
    /// Metres per second, `None` when the sender marked it unavailable.
    pub speed: Option<f64>,
    pub station_type: u8,
    pub generation_delta_time: u16,
}

// ---------------------------------------------------------------------------
// Hex utilities
// ---------------------------------------------------------------------------

/// Decode a hex string into bytes. Case-insensitive, must be even length.
pub fn hex_decode(hex: &str) -> Option<Vec<u8>> {
    let hex = hex.trim();
    if hex.len() % 2 != 0 {
        return None;
    }
    hex.as_bytes()
        .chunks(2)
        .map(|pair| Some((hex_digit(pair[0])? << 4) | hex_digit(pair[1])?))
        .collect()
}

/// Encode bytes as a lowercase hex string (the envelope wire form).
pub fn hex_encode(data: &[u8]) -> String {
    let mut s = String::with_capacity(data.len() * 2);
    for &b in data {
        s.push(HEX_CHARS[(b >> 4) as usize] as char);
        s.push(HEX_CHARS[(b & 0x0F) as usize] as char);
    }
    s
}

const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";

fn hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Current Unix time in whole seconds.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_decode() {
        assert_eq!(hex_decode("88aA03"), Some(vec![0x88, 0xAA, 0x03]));
        assert_eq!(hex_decode("abc"), None);
        assert_eq!(hex_decode("zz"), None);
        assert_eq!(hex_decode(""), Some(vec![]));
    }

    #[test]
    fn test_hex_encode_lowercase() {
        assert_eq!(hex_encode(&[0x89, 0x47, 0x0A]), "89470a");
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(
            DecodeError::malformed("short").category(),
            "malformed_frame"
        );
        assert_eq!(DecodeError::not_its("x").category(), "not_an_its_message");
        let missing = DecodeError::MissingMandatoryField {
            field: "latitude",
            station_id: Some(9),
        };
        assert_eq!(missing.category(), "missing_mandatory_field");
        assert_eq!(missing.station_id(), Some(9));
        assert_eq!(missing.to_string(), "missing mandatory field `latitude`");
    }
}
