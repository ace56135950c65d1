//! cam-core: Pure decode + tracking library for ETSI ITS Cooperative Awareness
//! Messages.
//!
//! No async, no I/O beyond the config file. This crate is the shared core used
//! by both `cam-feeder` (capture replay) and `cam-server` (ingest, web map, CLI).

pub mod config;
pub mod decode;
pub mod encode;
pub mod frame;
pub mod store;
pub mod types;
pub mod uper;
pub mod view;

// Re-export commonly used types at crate root
pub use decode::{decode, decode_cam, Decoder};
pub use encode::{wrap_ieee80211, CamFrameBuilder};
pub use frame::{dissect, parse_link, ItsPacket, LinkLayer};
pub use store::{Position, Retention, Snapshot, TrajectoryStore, Vehicle};
pub use types::*;
pub use view::{timestamped_geojson, MapDefaults, MapFeature, MapView, TrajectoryView};
