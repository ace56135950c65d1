//! Capture file input for CAM replay.
//!
//! Input modes:
//! - classic pcap (`.pcap`): microsecond or nanosecond timestamps, either byte
//!   order; link types 802.11, 802.11 + radiotap, Ethernet
//! - hex frames, one per line
//!
//! `select_cam_frames` then keeps CAM-sized frames, drops duplicates and turns
//! Ethernet frames into 802.11 ones.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use thiserror::Error;

use cam_core::encode::wrap_ieee80211;
use cam_core::frame::{parse_link, LinkLayer};
use cam_core::types::{hex_decode, hex_encode};

pub const LINKTYPE_ETHERNET: u32 = 1;
pub const LINKTYPE_IEEE802_11: u32 = 105;
pub const LINKTYPE_IEEE802_11_RADIOTAP: u32 = 127;

const PCAP_MAGIC_MICROS: u32 = 0xA1B2_C3D4;
const PCAP_MAGIC_NANOS: u32 = 0xA1B2_3C4D;
const PCAP_HEADER_LEN: usize = 24;
const RECORD_HEADER_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported pcap magic {0:#010x}")]
    UnsupportedMagic(u32),
    #[error("unsupported pcap link type {0}")]
    UnsupportedLinkType(u32),
    #[error("truncated pcap record at byte {0}")]
    Truncated(usize),
}

/// One frame as read from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedFrame {
    /// Seconds since the epoch; 0.0 for hex input.
    pub timestamp: f64,
    pub data: Vec<u8>,
}

/// Frames plus the framing they were captured with.
#[derive(Debug, Clone)]
pub struct Capture {
    pub link: LinkLayer,
    pub frames: Vec<CapturedFrame>,
}

// ---------------------------------------------------------------------------
// pcap
// ---------------------------------------------------------------------------

fn link_for(link_type: u32) -> Result<LinkLayer, CaptureError> {
    match link_type {
        LINKTYPE_ETHERNET => Ok(LinkLayer::Ethernet),
        LINKTYPE_IEEE802_11 | LINKTYPE_IEEE802_11_RADIOTAP => Ok(LinkLayer::Ieee80211),
        other => Err(CaptureError::UnsupportedLinkType(other)),
    }
}

fn is_pcap(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && {
        let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        [PCAP_MAGIC_MICROS, PCAP_MAGIC_NANOS]
            .iter()
            .any(|m| magic == *m || magic == m.swap_bytes())
    }
}

/// Parse a classic (non-ng) pcap file.
pub fn read_pcap(bytes: &[u8]) -> Result<Capture, CaptureError> {
    if bytes.len() < PCAP_HEADER_LEN {
        return Err(CaptureError::Truncated(0));
    }
    let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let (big_endian, nanos) = match magic {
        PCAP_MAGIC_MICROS => (false, false),
        PCAP_MAGIC_NANOS => (false, true),
        m if m == PCAP_MAGIC_MICROS.swap_bytes() => (true, false),
        m if m == PCAP_MAGIC_NANOS.swap_bytes() => (true, true),
        other => return Err(CaptureError::UnsupportedMagic(other)),
    };
    let read_u32 = |at: usize| {
        let b = [bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]];
        if big_endian {
            u32::from_be_bytes(b)
        } else {
            u32::from_le_bytes(b)
        }
    };

    let link = link_for(read_u32(20))?;
    let frac_scale = if nanos { 1e-9 } else { 1e-6 };

    let mut frames = Vec::new();
    let mut offset = PCAP_HEADER_LEN;
    while offset < bytes.len() {
        if offset + RECORD_HEADER_LEN > bytes.len() {
            return Err(CaptureError::Truncated(offset));
        }
        let ts_sec = read_u32(offset);
        let ts_frac = read_u32(offset + 4);
        let incl_len = read_u32(offset + 8) as usize;
        let start = offset + RECORD_HEADER_LEN;
        let data = bytes
            .get(start..start + incl_len)
            .ok_or(CaptureError::Truncated(offset))?;

        frames.push(CapturedFrame {
            timestamp: ts_sec as f64 + ts_frac as f64 * frac_scale,
            data: data.to_vec(),
        });
        offset = start + incl_len;
    }

    Ok(Capture { link, frames })
}

// ---------------------------------------------------------------------------
// Hex lines
// ---------------------------------------------------------------------------

/// Extract a hex frame from a line, lowercased.
///
/// Handles plain hex, `0x` prefixes, inner whitespace and comments.
pub fn clean_hex_line(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("0x").unwrap_or(line);
    let hex: String = line
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_lowercase())
        .collect();

    hex_decode(&hex).filter(|bytes| !bytes.is_empty())?;
    Some(hex)
}

/// Read hex frames from text, one per line; bad lines are skipped.
pub fn read_hex_lines(text: &str, link: LinkLayer) -> Capture {
    let frames = text
        .lines()
        .filter_map(clean_hex_line)
        .filter_map(|hex| hex_decode(&hex))
        .map(|data| CapturedFrame {
            timestamp: 0.0,
            data,
        })
        .collect();
    Capture { link, frames }
}

/// Read a capture file, detecting pcap by its magic number.
///
/// `text_link` is the framing assumed for hex-line files.
pub fn read_capture(path: &Path, text_link: LinkLayer) -> Result<Capture, CaptureError> {
    let bytes = fs::read(path)?;
    if is_pcap(&bytes) {
        return read_pcap(&bytes);
    }
    let text = String::from_utf8_lossy(&bytes);
    Ok(read_hex_lines(&text, text_link))
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Frames ready to publish plus what was dropped on the way.
#[derive(Debug, Default)]
pub struct Selection {
    pub frames: Vec<Vec<u8>>,
    pub unparseable: usize,
    pub wrong_length: usize,
    pub duplicates: usize,
}

/// Keep frames whose GeoNetworking payload has `payload_len` bytes (any length
/// when `None`), first occurrence only.
///
/// Ethernet frames are rewrapped as 802.11 so the default decoder accepts them.
pub fn select_cam_frames(capture: &Capture, payload_len: Option<usize>) -> Selection {
    let mut selection = Selection::default();
    let mut seen = HashSet::new();

    for frame in &capture.frames {
        let link = match parse_link(&frame.data, capture.link) {
            Ok(link) => link,
            Err(_) => {
                selection.unparseable += 1;
                continue;
            }
        };
        if payload_len.is_some_and(|len| link.payload.len() != len) {
            selection.wrong_length += 1;
            continue;
        }

        let out = match capture.link {
            LinkLayer::Ethernet => wrap_ieee80211(link.source, link.ethertype, link.payload),
            LinkLayer::Ieee80211 => frame.data.clone(),
        };
        if !seen.insert(hex_encode(&out)) {
            selection.duplicates += 1;
            continue;
        }
        selection.frames.push(out);
    }

    selection
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use cam_core::decode::{decode, Decoder};
    use cam_core::encode::CamFrameBuilder;
    use cam_core::frame::ETHERTYPE_GEONET;

    /// GN payload length of a builder frame (headers + 41-byte CAM).
    const BUILDER_GN_LEN: usize = 85;

    fn write_pcap(link_type: u32, frames: &[Vec<u8>], big_endian: bool, nanos: bool) -> Vec<u8> {
        let u32_bytes = |v: u32| {
            if big_endian {
                v.to_be_bytes()
            } else {
                v.to_le_bytes()
            }
        };
        let u16_bytes = |v: u16| {
            if big_endian {
                v.to_be_bytes()
            } else {
                v.to_le_bytes()
            }
        };
        let magic = if nanos { PCAP_MAGIC_NANOS } else { PCAP_MAGIC_MICROS };

        let mut out = Vec::new();
        out.extend(u32_bytes(magic));
        out.extend(u16_bytes(2));
        out.extend(u16_bytes(4));
        out.extend(u32_bytes(0));
        out.extend(u32_bytes(0));
        out.extend(u32_bytes(65535));
        out.extend(u32_bytes(link_type));
        for (i, frame) in frames.iter().enumerate() {
            out.extend(u32_bytes(1_700_000_000 + i as u32));
            out.extend(u32_bytes(500));
            out.extend(u32_bytes(frame.len() as u32));
            out.extend(u32_bytes(frame.len() as u32));
            out.extend(frame);
        }
        out
    }

    fn to_ethernet(wireless: &[u8]) -> Vec<u8> {
        let link = parse_link(wireless, LinkLayer::Ieee80211).unwrap();
        let mut eth = vec![0xFF; 6];
        eth.extend(link.source);
        eth.extend(ETHERTYPE_GEONET.to_be_bytes());
        eth.extend(link.payload);
        eth
    }

    #[test]
    fn test_read_pcap_little_endian_micros() {
        let frame = CamFrameBuilder::new(1, 45.0, 7.6).build();
        let bytes = write_pcap(LINKTYPE_IEEE802_11, &[frame.clone()], false, false);
        let capture = read_pcap(&bytes).unwrap();
        assert_eq!(capture.link, LinkLayer::Ieee80211);
        assert_eq!(capture.frames.len(), 1);
        assert_eq!(capture.frames[0].data, frame);
        assert!((capture.frames[0].timestamp - 1_700_000_000.0005).abs() < 1e-6);
    }

    #[test]
    fn test_read_pcap_big_endian_nanos() {
        let frame = CamFrameBuilder::new(2, 45.0, 7.6).radiotap(true).build();
        let bytes = write_pcap(LINKTYPE_IEEE802_11_RADIOTAP, &[frame.clone()], true, true);
        let capture = read_pcap(&bytes).unwrap();
        assert_eq!(capture.frames[0].data, frame);
        assert!((capture.frames[0].timestamp - 1_700_000_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_read_pcap_errors() {
        assert!(matches!(
            read_pcap(&[0u8; 24]),
            Err(CaptureError::UnsupportedMagic(0))
        ));
        assert!(matches!(
            read_pcap(&write_pcap(228, &[], false, false)),
            Err(CaptureError::UnsupportedLinkType(228))
        ));

        let mut bytes = write_pcap(LINKTYPE_ETHERNET, &[vec![0u8; 60]], false, false);
        bytes.truncate(bytes.len() - 10);
        assert!(matches!(read_pcap(&bytes), Err(CaptureError::Truncated(24))));
    }

    #[test]
    fn test_clean_hex_line() {
        assert_eq!(clean_hex_line("  88AA00  ").as_deref(), Some("88aa00"));
        assert_eq!(clean_hex_line("0x88aa").as_deref(), Some("88aa"));
        assert_eq!(clean_hex_line("88 aa 00").as_deref(), Some("88aa00"));
        assert!(clean_hex_line("# comment").is_none());
        assert!(clean_hex_line("").is_none());
        assert!(clean_hex_line("abc").is_none()); // odd length
        assert!(clean_hex_line("not hex").is_none());
    }

    #[test]
    fn test_select_filters_and_dedups() {
        let a = CamFrameBuilder::new(1, 45.0, 7.6).build();
        let b = CamFrameBuilder::new(2, 45.0, 7.6).build();
        let capture = Capture {
            link: LinkLayer::Ieee80211,
            frames: [a.clone(), a.clone(), b.clone(), vec![0x88, 0x00]]
                .into_iter()
                .map(|data| CapturedFrame { timestamp: 0.0, data })
                .collect(),
        };

        let sel = select_cam_frames(&capture, Some(BUILDER_GN_LEN));
        assert_eq!(sel.frames, vec![a, b]);
        assert_eq!(sel.duplicates, 1);
        assert_eq!(sel.unparseable, 1);
        assert_eq!(sel.wrong_length, 0);

        let sel = select_cam_frames(&capture, Some(89));
        assert!(sel.frames.is_empty());
        assert_eq!(sel.wrong_length, 3);
    }

    #[test]
    fn test_ethernet_capture_is_rewrapped() {
        let wireless = CamFrameBuilder::new(33, 45.2, 7.7).speed(Some(2.5)).build();
        let bytes = write_pcap(LINKTYPE_ETHERNET, &[to_ethernet(&wireless)], false, false);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eth.pcap");
        fs::write(&path, bytes).unwrap();

        let capture = read_capture(&path, LinkLayer::Ieee80211).unwrap();
        assert_eq!(capture.link, LinkLayer::Ethernet);
        let sel = select_cam_frames(&capture, None);
        assert_eq!(sel.frames.len(), 1);

        let rec = decode(&sel.frames[0]).unwrap();
        assert_eq!(rec.station_id, 33);
        assert_eq!(rec.speed, Some(2.5));
        assert!(Decoder::new(LinkLayer::Ethernet).decode(&capture.frames[0].data).is_ok());
    }

    #[test]
    fn test_read_capture_hex_file() {
        let frame = CamFrameBuilder::new(4, 45.0, 7.6).build();
        let text = format!("# replay\n{}\n\nzz\n{}\n", hex_encode(&frame), hex_encode(&frame));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.txt");
        fs::write(&path, text).unwrap();

        let capture = read_capture(&path, LinkLayer::Ieee80211).unwrap();
        assert_eq!(capture.frames.len(), 2);
        let sel = select_cam_frames(&capture, Some(BUILDER_GN_LEN));
        assert_eq!(sel.frames.len(), 1);
        assert_eq!(sel.duplicates, 1);
    }
}
