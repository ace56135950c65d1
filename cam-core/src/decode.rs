//! Decode CAM payloads into `CamRecord`s.
//!
//! Layout walked (CAM-PDU-Descriptions / ITS-Container, UPER):
//! - ItsPduHeader: protocolVersion, messageID (2 = CAM), stationID
//! - CoopAwareness: generationDeltaTime, CamParameters
//! - BasicContainer: stationType, ReferencePosition (lat, lon, ellipse, altitude)
//! - HighFrequencyContainer: basicVehicleContainerHighFrequency -> heading, speed
//!
//! Everything past the speed field is ignored.

use crate::frame::{self, LinkLayer};
use crate::types::{CamRecord, DecodeError, StationId, COORD_SCALE, SPEED_SCALE};
use crate::uper::BitReader;

/// `messageID` of a Cooperative Awareness Message.
pub const MESSAGE_ID_CAM: u8 = 2;

pub const LATITUDE_MIN: i64 = -900_000_000;
pub const LATITUDE_UNAVAILABLE: i64 = 900_000_001;
pub const LONGITUDE_MIN: i64 = -1_800_000_000;
pub const LONGITUDE_UNAVAILABLE: i64 = 1_800_000_001;
pub const SPEED_UNAVAILABLE: i64 = 16_383;

/// Frame decoder bound to one link-layer framing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Decoder {
    link: LinkLayer,
}

impl Decoder {
    pub fn new(link: LinkLayer) -> Self {
        Decoder { link }
    }

    pub fn link(&self) -> LinkLayer {
        self.link
    }

    /// Dissect a raw link-layer frame and decode the CAM it carries.
    pub fn decode(&self, raw: &[u8]) -> Result<CamRecord, DecodeError> {
        let packet = frame::dissect(raw, self.link)?;
        decode_cam(packet.payload)
    }
}

/// Decode an 802.11 frame (radiotap header optional).
pub fn decode(raw: &[u8]) -> Result<CamRecord, DecodeError> {
    Decoder::default().decode(raw)
}

/// Decode a bare UPER-encoded CAM (the BTP payload).
pub fn decode_cam(payload: &[u8]) -> Result<CamRecord, DecodeError> {
    let mut r = BitReader::new(payload);
    let truncated = |part: &str| DecodeError::malformed(format!("CAM truncated in {part}"));

    // ItsPduHeader
    let _protocol_version = r.read_bits(8).ok_or_else(|| truncated("header"))?;
    let message_id = r.read_bits(8).ok_or_else(|| truncated("header"))? as u8;
    if message_id != MESSAGE_ID_CAM {
        return Err(DecodeError::not_its(format!(
            "ITS message id {message_id} is not a CAM"
        )));
    }
    let station_id = r.read_bits(32).ok_or_else(|| truncated("header"))? as StationId;

    let generation_delta_time = r
        .read_bits(16)
        .ok_or_else(|| truncated("generationDeltaTime"))? as u16;

    // CamParameters: extension marker + 2 OPTIONAL bits, then
    // BasicContainer: extension marker
    r.skip(3 + 1).ok_or_else(|| truncated("camParameters"))?;

    let station_type = r
        .read_constrained(0, 255)
        .ok_or_else(|| truncated("stationType"))? as u8;

    let latitude = read_coordinate(&mut r, "latitude", LATITUDE_MIN, LATITUDE_UNAVAILABLE)?;
    let longitude = read_coordinate(&mut r, "longitude", LONGITUDE_MIN, LONGITUDE_UNAVAILABLE)?;
    // positionConfidenceEllipse (3 x 12) + altitude (20 + 4)
    r.skip(36 + 24).ok_or_else(|| truncated("referencePosition"))?;

    if latitude == LATITUDE_UNAVAILABLE {
        return Err(DecodeError::MissingMandatoryField {
            field: "latitude",
            station_id: Some(station_id),
        });
    }
    if longitude == LONGITUDE_UNAVAILABLE {
        return Err(DecodeError::MissingMandatoryField {
            field: "longitude",
            station_id: Some(station_id),
        });
    }

    Ok(CamRecord {
        station_id,
        latitude: latitude as f64 / COORD_SCALE,
        longitude: longitude as f64 / COORD_SCALE,
        speed: read_speed(&mut r),
        station_type,
        generation_delta_time,
    })
}

/// Latitude or longitude in tenths of a microdegree.
///
/// The field width leaves room above the upper bound; such encodings are
/// malformed, not positions.
fn read_coordinate(
    r: &mut BitReader<'_>,
    field: &str,
    lb: i64,
    ub: i64,
) -> Result<i64, DecodeError> {
    let value = r
        .read_constrained(lb, ub)
        .ok_or_else(|| DecodeError::malformed(format!("CAM truncated in {field}")))?;
    if value > ub {
        return Err(DecodeError::malformed(format!(
            "{field} {value} outside {lb}..={ub}"
        )));
    }
    Ok(value)
}

/// Speed from the high-frequency container.
///
/// `None` for RSU containers, extension alternatives, truncated input and the
/// explicit "unavailable" value.
fn read_speed(r: &mut BitReader<'_>) -> Option<f64> {
    if r.read_bool()? {
        return None; // CHOICE extension
    }
    if r.read_bits(1)? != 0 {
        return None; // rsuContainerHighFrequency
    }
    // 7 OPTIONAL bits, heading (value 12 + confidence 7)
    r.skip(7 + 19)?;
    let value = r.read_constrained(0, SPEED_UNAVAILABLE)?;
    if value == SPEED_UNAVAILABLE {
        None
    } else {
        Some(value as f64 / SPEED_SCALE)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
