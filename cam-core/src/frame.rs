//! Dissect raw link-layer frames down to the ITS application payload.
//!
//! Layering handled, outermost first:
//! - optional radiotap capture header (stripped, FCS flag honoured)
//! - IEEE 802.11 data frame + LLC/SNAP, or Ethernet II
//! - GeoNetworking basic + common + extended header
//! - BTP-A / BTP-B transport header
//!
//! Anything shorter than a layer needs is `MalformedFrame`; a well-formed
//! frame that is simply not carrying a CAM is `NotAnItsMessage`.

use crate::types::DecodeError;

/// EtherType of GeoNetworking.
pub const ETHERTYPE_GEONET: u16 = 0x8947;

/// Well-known BTP destination port for CAM.
pub const BTP_PORT_CAM: u16 = 2001;

const LLC_SNAP: [u8; 6] = [0xAA, 0xAA, 0x03, 0x00, 0x00, 0x00];
const IEEE80211_HDR: usize = 24;
const ETHERNET_HDR: usize = 14;
const GN_BASIC_HDR: usize = 4;
const GN_COMMON_HDR: usize = 8;
const BTP_HDR: usize = 4;

/// Smallest frame that could possibly carry an ITS payload over 802.11.
pub const MIN_FRAME_LEN: usize = IEEE80211_HDR + LLC_SNAP.len() + 2 + GN_BASIC_HDR + GN_COMMON_HDR;

// ---------------------------------------------------------------------------
// Link layer
// ---------------------------------------------------------------------------

/// Link-layer framing of the bytes handed to the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkLayer {
    /// 802.11 data frame, optionally preceded by a radiotap header.
    #[default]
    Ieee80211,
    /// Ethernet II, as seen on a wired tap of an ITS router.
    Ethernet,
}

/// Result of stripping the link layer.
#[derive(Debug, Clone)]
pub struct LinkFrame<'a> {
    pub radiotap_len: usize,
    /// Transmitter MAC address.
    pub source: [u8; 6],
    pub ethertype: u16,
    /// Bytes following the LLC/SNAP (or Ethernet) header.
    pub payload: &'a [u8],
}

/// Strip radiotap (if present) and the MAC header.
pub fn parse_link(raw: &[u8], link: LinkLayer) -> Result<LinkFrame<'_>, DecodeError> {
    match link {
        LinkLayer::Ieee80211 => parse_wireless(raw),
        LinkLayer::Ethernet => parse_ethernet(raw),
    }
}

fn parse_wireless(raw: &[u8]) -> Result<LinkFrame<'_>, DecodeError> {
    let (radiotap_len, has_fcs) = radiotap_header(raw)?;
    let mut frame = &raw[radiotap_len..];
    if has_fcs {
        if frame.len() < 4 {
            return Err(DecodeError::malformed("frame shorter than its FCS"));
        }
        frame = &frame[..frame.len() - 4];
    }

    if frame.len() < MIN_FRAME_LEN {
        return Err(DecodeError::malformed(format!(
            "{} bytes after radiotap, need at least {MIN_FRAME_LEN}",
            frame.len()
        )));
    }

    let fc0 = frame[0];
    let fc1 = frame[1];
    let frame_type = (fc0 >> 2) & 0x03;
    let subtype = (fc0 >> 4) & 0x0F;

    if frame_type != 2 {
        return Err(DecodeError::not_its("not an 802.11 data frame"));
    }
    if subtype & 0x04 != 0 {
        return Err(DecodeError::not_its("802.11 null data frame"));
    }
    if fc1 & 0x40 != 0 {
        return Err(DecodeError::not_its("protected 802.11 frame"));
    }

    let mut hdr = IEEE80211_HDR;
    if fc1 & 0x03 == 0x03 {
        hdr += 6; // addr4
    }
    if subtype & 0x08 != 0 {
        hdr += 2; // QoS control
        if fc1 & 0x80 != 0 {
            hdr += 4; // HT control
        }
    }

    let body = frame
        .get(hdr..)
        .ok_or_else(|| DecodeError::malformed("truncated 802.11 header"))?;
    if body.len() < LLC_SNAP.len() + 2 {
        return Err(DecodeError::malformed("truncated LLC/SNAP header"));
    }
    if body[..LLC_SNAP.len()] != LLC_SNAP {
        return Err(DecodeError::not_its("no LLC/SNAP encapsulation"));
    }

    let mut source = [0u8; 6];
    source.copy_from_slice(&frame[10..16]);

    Ok(LinkFrame {
        radiotap_len,
        source,
        ethertype: u16::from_be_bytes([body[6], body[7]]),
        payload: &body[8..],
    })
}

fn parse_ethernet(raw: &[u8]) -> Result<LinkFrame<'_>, DecodeError> {
    if raw.len() < ETHERNET_HDR + GN_BASIC_HDR + GN_COMMON_HDR {
        return Err(DecodeError::malformed(format!(
            "{} bytes is too short for an Ethernet frame",
            raw.len()
        )));
    }
    let mut source = [0u8; 6];
    source.copy_from_slice(&raw[6..12]);

    let mut offset = 12;
    let mut ethertype = u16::from_be_bytes([raw[12], raw[13]]);
    if ethertype == 0x8100 {
        offset += 4; // 802.1Q tag
        ethertype = u16::from_be_bytes([raw[offset], raw[offset + 1]]);
    }

    Ok(LinkFrame {
        radiotap_len: 0,
        source,
        ethertype,
        payload: &raw[offset + 2..],
    })
}

/// Radiotap header length and whether the frame carries a trailing FCS.
///
/// A buffer that does not start with `00 00` has no radiotap header.
fn radiotap_header(raw: &[u8]) -> Result<(usize, bool), DecodeError> {
    if raw.len() < 2 || raw[0] != 0 || raw[1] != 0 {
        return Ok((0, false));
    }
    if raw.len() < 8 {
        return Err(DecodeError::malformed("truncated radiotap header"));
    }
    let len = u16::from_le_bytes([raw[2], raw[3]]) as usize;
    if len < 8 || len > raw.len() {
        return Err(DecodeError::malformed(format!(
            "radiotap length {len} does not fit a {} byte buffer",
            raw.len()
        )));
    }

    let read_u32 = |at: usize| u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]);
    let present = read_u32(4);

    // Extended presence bitmaps follow while bit 31 is set.
    let mut offset = 8;
    let mut word = present;
    while word & 0x8000_0000 != 0 {
        if offset + 4 > len {
            return Err(DecodeError::malformed("radiotap presence bitmap overruns header"));
        }
        word = read_u32(offset);
        offset += 4;
    }

    let mut has_fcs = false;
    if present & 0x02 != 0 {
        if present & 0x01 != 0 {
            // TSFT: u64, 8-byte aligned
            offset = (offset + 7) & !7;
            offset += 8;
        }
        if offset < len {
            has_fcs = raw[offset] & 0x10 != 0;
        }
    }

    Ok((len, has_fcs))
}

// ---------------------------------------------------------------------------
// GeoNetworking + BTP
// ---------------------------------------------------------------------------

/// GeoNetworking common-header packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GnHeaderType {
    Beacon,
    GeoUnicast,
    GeoAnycast,
    GeoBroadcast,
    SingleHopBroadcast,
    TopoBroadcast,
    LocationService,
}

impl GnHeaderType {
    fn from_fields(ht: u8, hst: u8) -> Option<Self> {
        match (ht, hst) {
            (1, _) => Some(GnHeaderType::Beacon),
            (2, _) => Some(GnHeaderType::GeoUnicast),
            (3, _) => Some(GnHeaderType::GeoAnycast),
            (4, _) => Some(GnHeaderType::GeoBroadcast),
            (5, 0) => Some(GnHeaderType::SingleHopBroadcast),
            (5, 1) => Some(GnHeaderType::TopoBroadcast),
            (6, _) => Some(GnHeaderType::LocationService),
            _ => None,
        }
    }

    /// Extended header length, `None` for packets without a transport payload.
    fn extended_len(self) -> Option<usize> {
        match self {
            GnHeaderType::SingleHopBroadcast | GnHeaderType::TopoBroadcast => Some(28),
            GnHeaderType::GeoUnicast => Some(48),
            GnHeaderType::GeoAnycast | GnHeaderType::GeoBroadcast => Some(44),
            GnHeaderType::Beacon | GnHeaderType::LocationService => None,
        }
    }
}

/// BTP header flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Btp {
    /// Interactive: destination + source port.
    A { source_port: u16 },
    /// Non-interactive: destination port + port info.
    B { port_info: u16 },
}

/// A frame dissected down to its BTP payload.
#[derive(Debug, Clone)]
pub struct ItsPacket<'a> {
    pub source: [u8; 6],
    pub gn_version: u8,
    pub header_type: GnHeaderType,
    pub btp: Btp,
    pub destination_port: u16,
    /// Facilities-layer message (UPER-encoded CAM).
    pub payload: &'a [u8],
}

/// Dissect `raw` all the way to the CAM payload.
pub fn dissect(raw: &[u8], link: LinkLayer) -> Result<ItsPacket<'_>, DecodeError> {
    let frame = parse_link(raw, link)?;
    if frame.ethertype != ETHERTYPE_GEONET {
        return Err(DecodeError::not_its(format!(
            "ethertype {:#06x} is not GeoNetworking",
            frame.ethertype
        )));
    }

    let gn = frame.payload;
    if gn.len() < GN_BASIC_HDR + GN_COMMON_HDR {
        return Err(DecodeError::malformed("truncated GeoNetworking header"));
    }

    // Basic header
    let gn_version = gn[0] >> 4;
    let basic_nh = gn[0] & 0x0F;
    if gn_version > 1 {
        return Err(DecodeError::not_its(format!(
            "unsupported GeoNetworking version {gn_version}"
        )));
    }
    match basic_nh {
        1 => {}
        2 => return Err(DecodeError::not_its("secured GeoNetworking packet")),
        other => {
            return Err(DecodeError::not_its(format!(
                "basic header next-header {other} is not a common header"
            )))
        }
    }

    // Common header
    let common = &gn[GN_BASIC_HDR..];
    let common_nh = common[0] >> 4;
    let header_type = GnHeaderType::from_fields(common[1] >> 4, common[1] & 0x0F).ok_or_else(
        || DecodeError::not_its(format!("unknown GeoNetworking header type {:#04x}", common[1])),
    )?;
    let payload_len = u16::from_be_bytes([common[4], common[5]]) as usize;

    let ext_len = header_type.extended_len().ok_or_else(|| {
        DecodeError::not_its(format!("{header_type:?} packet carries no BTP payload"))
    })?;

    let body = gn
        .get(GN_BASIC_HDR + GN_COMMON_HDR + ext_len..)
        .ok_or_else(|| DecodeError::malformed("truncated GeoNetworking extended header"))?;
    if body.len() < payload_len {
        return Err(DecodeError::malformed(format!(
            "GeoNetworking payload length {payload_len} exceeds remaining {} bytes",
            body.len()
        )));
    }
    let body = &body[..payload_len];
    if body.len() < BTP_HDR {
        return Err(DecodeError::malformed("truncated BTP header"));
    }

    let destination_port = u16::from_be_bytes([body[0], body[1]]);
    let second = u16::from_be_bytes([body[2], body[3]]);
    let btp = match common_nh {
        1 => Btp::A {
            source_port: second,
        },
        2 => Btp::B { port_info: second },
        other => {
            return Err(DecodeError::not_its(format!(
                "common header next-header {other} is not BTP"
            )))
        }
    };
    if destination_port != BTP_PORT_CAM {
        return Err(DecodeError::not_its(format!(
            "BTP destination port {destination_port} is not CAM"
        )));
    }

    Ok(ItsPacket {
        source: frame.source,
        gn_version,
        header_type,
        btp,
        destination_port,
        payload: &body[BTP_HDR..],
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
