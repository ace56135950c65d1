//! Build complete CAM-carrying frames.
//!
//! Produces 802.11 QoS data + LLC/SNAP + GeoNetworking single-hop broadcast +
//! BTP-B + UPER CAM, with every mandatory CAM field present. Fields this crate
//! does not model are sent with their "unavailable" values.

use crate::decode::{
    LATITUDE_MIN, LATITUDE_UNAVAILABLE, LONGITUDE_MIN, LONGITUDE_UNAVAILABLE, MESSAGE_ID_CAM,
    SPEED_UNAVAILABLE,
};
use crate::frame::{BTP_PORT_CAM, ETHERTYPE_GEONET};
use crate::types::{StationId, COORD_SCALE, SPEED_SCALE};
use crate::uper::BitWriter;

const BROADCAST: [u8; 6] = [0xFF; 6];

/// Minimal radiotap header: Flags (no FCS) + Rate (6 Mbit/s).
const RADIOTAP: [u8; 10] = [0x00, 0x00, 0x0A, 0x00, 0x06, 0x00, 0x00, 0x00, 0x00, 0x0C];

/// `StationType` passengerCar.
pub const STATION_TYPE_PASSENGER_CAR: u8 = 5;

/// Builder for a single CAM frame.
#[derive(Debug, Clone)]
pub struct CamFrameBuilder {
    station_id: StationId,
    latitude: Option<f64>,
    longitude: Option<f64>,
    speed: Option<f64>,
    station_type: u8,
    generation_delta_time: u16,
    protocol_version: u8,
    message_id: u8,
    btp_port: u16,
    source: [u8; 6],
    radiotap: bool,
}

impl CamFrameBuilder {
    pub fn new(station_id: StationId, latitude: f64, longitude: f64) -> Self {
        let id = station_id.to_be_bytes();
        CamFrameBuilder {
            station_id,
            latitude: Some(latitude),
            longitude: Some(longitude),
            speed: None,
            station_type: STATION_TYPE_PASSENGER_CAR,
            generation_delta_time: 0,
            protocol_version: 1,
            message_id: MESSAGE_ID_CAM,
            btp_port: BTP_PORT_CAM,
            // locally administered unicast MAC derived from the station id
            source: [0x02, 0x00, id[0], id[1], id[2], id[3]],
            radiotap: false,
        }
    }

    /// Metres per second; `None` sends "unavailable".
    pub fn speed(mut self, speed: Option<f64>) -> Self {
        self.speed = speed;
        self
    }

    pub fn latitude(mut self, latitude: Option<f64>) -> Self {
        self.latitude = latitude;
        self
    }

    pub fn longitude(mut self, longitude: Option<f64>) -> Self {
        self.longitude = longitude;
        self
    }

    pub fn station_type(mut self, station_type: u8) -> Self {
        self.station_type = station_type;
        self
    }

    pub fn generation_delta_time(mut self, gdt: u16) -> Self {
        self.generation_delta_time = gdt;
        self
    }

    pub fn message_id(mut self, message_id: u8) -> Self {
        self.message_id = message_id;
        self
    }

    pub fn btp_port(mut self, port: u16) -> Self {
        self.btp_port = port;
        self
    }

    pub fn source(mut self, mac: [u8; 6]) -> Self {
        self.source = mac;
        self
    }

    /// Prefix the frame with a radiotap capture header.
    pub fn radiotap(mut self, on: bool) -> Self {
        self.radiotap = on;
        self
    }

    fn lat_fixed(&self) -> i64 {
        self.latitude
            .map(|v| (v * COORD_SCALE).round() as i64)
            .unwrap_or(LATITUDE_UNAVAILABLE)
    }

    fn lon_fixed(&self) -> i64 {
        self.longitude
            .map(|v| (v * COORD_SCALE).round() as i64)
            .unwrap_or(LONGITUDE_UNAVAILABLE)
    }

    /// UPER-encoded CAM (BTP payload).
    pub fn cam_payload(&self) -> Vec<u8> {
        let mut w = BitWriter::new();

        // ItsPduHeader
        w.write_constrained(self.protocol_version as i64, 0, 255);
        w.write_constrained(self.message_id as i64, 0, 255);
        w.write_bits(self.station_id as u64, 32);

        w.write_bits(self.generation_delta_time as u64, 16);

        // CamParameters: no extension, no low-frequency / special-vehicle container
        w.write_bits(0, 3);

        // BasicContainer
        w.write_bool(false);
        w.write_constrained(self.station_type as i64, 0, 255);
        w.write_constrained(self.lat_fixed(), LATITUDE_MIN, LATITUDE_UNAVAILABLE);
        w.write_constrained(self.lon_fixed(), LONGITUDE_MIN, LONGITUDE_UNAVAILABLE);
        w.write_constrained(4095, 0, 4095); // semiMajorConfidence
        w.write_constrained(4095, 0, 4095); // semiMinorConfidence
        w.write_constrained(3601, 0, 3601); // semiMajorOrientation
        w.write_constrained(800_001, -100_000, 800_001); // altitudeValue
        w.write_bits(15, 4); // altitudeConfidence: unavailable

        // HighFrequencyContainer: basicVehicleContainerHighFrequency
        w.write_bool(false);
        w.write_bits(0, 1);
        w.write_bits(0, 7); // no OPTIONAL components
        w.write_constrained(3601, 0, 3601); // headingValue
        w.write_constrained(127, 1, 127); // headingConfidence
        let speed = self
            .speed
            .map(|v| ((v * SPEED_SCALE).round() as i64).clamp(0, SPEED_UNAVAILABLE - 1))
            .unwrap_or(SPEED_UNAVAILABLE);
        w.write_constrained(speed, 0, SPEED_UNAVAILABLE);
        w.write_constrained(127, 1, 127); // speedConfidence
        w.write_bits(0, 2); // driveDirection: forward
        w.write_constrained(1023, 1, 1023); // vehicleLengthValue
        w.write_bits(4, 3); // vehicleLengthConfidenceIndication: unavailable
        w.write_constrained(62, 1, 62); // vehicleWidth
        w.write_constrained(161, -160, 161); // longitudinalAccelerationValue
        w.write_constrained(102, 0, 102); // longitudinalAccelerationConfidence
        w.write_constrained(1023, -1023, 1023); // curvatureValue
        w.write_bits(7, 3); // curvatureConfidence: unavailable
        w.write_bool(false);
        w.write_bits(2, 2); // curvatureCalculationMode: unavailable
        w.write_constrained(32767, -32766, 32767); // yawRateValue
        w.write_bool(false);
        w.write_bits(8, 4); // yawRateConfidence: unavailable

        w.into_bytes()
    }

    /// GeoNetworking packet (basic + common + SHB + BTP-B + CAM).
    pub fn gn_payload(&self) -> Vec<u8> {
        let cam = self.cam_payload();
        let payload_len = (cam.len() + 4) as u16;

        let mut out = Vec::with_capacity(40 + payload_len as usize);
        // Basic header: version 1, next header = common; lifetime; hop limit 1
        out.extend([0x11, 0x00, 0x1A, 0x01]);
        // Common header: BTP-B, TSB/single-hop, traffic class 2, stationary flag
        out.extend([0x20, 0x50, 0x02, 0x00]);
        out.extend(payload_len.to_be_bytes());
        out.extend([0x01, 0x00]);
        // Source long position vector
        let st = (self.station_type as u16 & 0x1F) << 10;
        out.extend(st.to_be_bytes());
        out.extend(self.source);
        out.extend(0u32.to_be_bytes()); // timestamp
        let pv_lat = if self.latitude.is_some() { self.lat_fixed() as i32 } else { 0 };
        let pv_lon = if self.longitude.is_some() { self.lon_fixed() as i32 } else { 0 };
        out.extend(pv_lat.to_be_bytes());
        out.extend(pv_lon.to_be_bytes());
        let pv_speed = self
            .speed
            .map(|v| ((v * SPEED_SCALE).round() as i64).clamp(0, 0x3FFF) as u16)
            .unwrap_or(0);
        out.extend((0x8000 | pv_speed).to_be_bytes()); // PAI set
        out.extend(0u16.to_be_bytes()); // heading
        out.extend([0u8; 4]); // reserved
        // BTP-B
        out.extend(self.btp_port.to_be_bytes());
        out.extend(0u16.to_be_bytes());
        out.extend(cam);
        out
    }

    /// Full link-layer frame.
    pub fn build(&self) -> Vec<u8> {
        let frame = wrap_ieee80211(self.source, ETHERTYPE_GEONET, &self.gn_payload());
        if self.radiotap {
            let mut out = RADIOTAP.to_vec();
            out.extend(frame);
            out
        } else {
            frame
        }
    }
}

/// Wrap an EtherType payload in an 802.11 QoS data frame (OCB broadcast).
pub fn wrap_ieee80211(source: [u8; 6], ethertype: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(34 + payload.len());
    out.extend([0x88, 0x00]); // QoS data, no flags
    out.extend([0x00, 0x00]); // duration
    out.extend(BROADCAST);
    out.extend(source);
    out.extend(BROADCAST); // wildcard BSSID
    out.extend([0x00, 0x00]); // sequence control
    out.extend([0x00, 0x00]); // QoS control
    out.extend([0xAA, 0xAA, 0x03, 0x00, 0x00, 0x00]);
    out.extend(ethertype.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cam_payload_size() {
        // 323 bits of mandatory content, padded to whole octets
        let cam = CamFrameBuilder::new(1, 45.0, 7.0).cam_payload();
        assert_eq!(cam.len(), 41);
    }

    #[test]
    fn test_frame_layout() {
        let raw = CamFrameBuilder::new(1, 45.0, 7.0).build();
        assert_eq!(raw.len(), 26 + 8 + 40 + 4 + 41);
        assert_eq!(&raw[..2], &[0x88, 0x00]);
        assert_eq!(&raw[32..34], &[0x89, 0x47]);
    }

    #[test]
    fn test_radiotap_prefix() {
        let raw = CamFrameBuilder::new(1, 45.0, 7.0).radiotap(true).build();
        assert_eq!(&raw[..4], &[0x00, 0x00, 0x0A, 0x00]);
        assert_eq!(raw[10], 0x88);
    }

    #[test]
    fn test_source_mac_from_station_id() {
        let raw = CamFrameBuilder::new(0x0102_0304, 45.0, 7.0).build();
        assert_eq!(&raw[10..16], &[0x02, 0x00, 0x01, 0x02, 0x03, 0x04]);
    }
}
