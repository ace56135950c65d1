//! Per-station trajectory store.
//!
//! One shared instance is written by the ingestion loop and read by the web
//! layer. The station map sits behind an `RwLock`; each station's history has
//! its own `Mutex`, so appends for different stations only contend on the map
//! lookup and appends for one station are applied in call order.
//!
//! History is unbounded unless a `Retention` policy says otherwise.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::Serialize;

use crate::types::{unix_now, CamRecord, StationId};

/// Display colours, indexed by `station_id % PALETTE.len()`.
///
/// More stations than colours means reuse.
pub const PALETTE: [&str; 25] = [
    "red",
    "green",
    "blue",
    "purple",
    "orange",
    "black",
    "pink",
    "cyan",
    "yellow",
    "brown",
    "gray",
    "lime",
    "magenta",
    "navy",
    "teal",
    "gold",
    "silver",
    "maroon",
    "olive",
    "coral",
    "indigo",
    "turquoise",
    "violet",
    "chocolate",
    "deepskyblue",
];

/// Colour assigned to a station for the lifetime of the process.
pub fn color_for(station_id: StationId) -> &'static str {
    PALETTE[station_id as usize % PALETTE.len()]
}

// ---------------------------------------------------------------------------
// Snapshot types
// ---------------------------------------------------------------------------

/// One recorded fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position {
    /// Unix seconds at arrival.
    pub time: u64,
    /// `[longitude, latitude]`, GeoJSON order.
    pub coordinates: [f64; 2],
    /// m/s, `null` when the sender had none.
    pub speed: Option<f64>,
}

impl Position {
    pub fn longitude(&self) -> f64 {
        self.coordinates[0]
    }

    pub fn latitude(&self) -> f64 {
        self.coordinates[1]
    }

    /// Finite and inside WGS-84 bounds.
    pub fn has_valid_coordinates(&self) -> bool {
        let [lon, lat] = self.coordinates;
        lon.is_finite()
            && lat.is_finite()
            && (-180.0..=180.0).contains(&lon)
            && (-90.0..=90.0).contains(&lat)
    }
}

/// Immutable copy of one station's state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Vehicle {
    pub color: &'static str,
    pub positions: Vec<Position>,
}

/// Station id -> vehicle, ordered by station id.
pub type Snapshot = BTreeMap<StationId, Vehicle>;

// ---------------------------------------------------------------------------
// Retention
// ---------------------------------------------------------------------------

/// How much history each station keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Retention {
    #[default]
    Unbounded,
    /// Keep the newest `n` positions.
    MaxPoints(usize),
    /// Keep positions no older than this many seconds behind the newest one.
    MaxAge(u64),
}

impl Retention {
    fn apply(&self, positions: &mut Vec<Position>) {
        match *self {
            Retention::Unbounded => {}
            Retention::MaxPoints(max) => {
                if positions.len() > max {
                    let excess = positions.len() - max;
                    positions.drain(..excess);
                }
            }
            Retention::MaxAge(secs) => {
                if let Some(newest) = positions.last().map(|p| p.time) {
                    let cutoff = newest.saturating_sub(secs);
                    positions.retain(|p| p.time >= cutoff);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

struct Track {
    color: &'static str,
    positions: Mutex<Vec<Position>>,
}

impl Track {
    fn new(station_id: StationId) -> Self {
        Track {
            color: color_for(station_id),
            positions: Mutex::new(Vec::new()),
        }
    }

    fn to_vehicle(&self) -> Vehicle {
        let positions = self
            .positions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Vehicle {
            color: self.color,
            positions,
        }
    }
}

/// Shared, concurrency-safe trajectory state for every observed station.
#[derive(Default)]
pub struct TrajectoryStore {
    tracks: RwLock<HashMap<StationId, Arc<Track>>>,
    retention: Retention,
}

impl TrajectoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: Retention) -> Self {
        TrajectoryStore {
            tracks: RwLock::new(HashMap::new()),
            retention,
        }
    }

    pub fn retention(&self) -> Retention {
        self.retention
    }

    /// Find or create the station's track, then append one position.
    pub fn record_position(
        &self,
        station_id: StationId,
        timestamp: u64,
        longitude: f64,
        latitude: f64,
        speed: Option<f64>,
    ) {
        self.append(station_id, || timestamp, [longitude, latitude], speed);
    }

    /// Record a decoded CAM with its arrival timestamp.
    pub fn record(&self, record: &CamRecord, timestamp: u64) {
        self.record_position(
            record.station_id,
            timestamp,
            record.longitude,
            record.latitude,
            record.speed,
        );
    }

    /// Record a decoded CAM stamped with the current time.
    ///
    /// The clock is read under the station's lock, so each history stays in
    /// non-decreasing time order however many writers race on it. Returns the
    /// timestamp used.
    pub fn record_now(&self, record: &CamRecord) -> u64 {
        self.append(
            record.station_id,
            unix_now,
            [record.longitude, record.latitude],
            record.speed,
        )
    }

    fn append(
        &self,
        station_id: StationId,
        clock: impl FnOnce() -> u64,
        coordinates: [f64; 2],
        speed: Option<f64>,
    ) -> u64 {
        let track = self.track(station_id);
        let mut positions = track
            .positions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let time = clock();
        positions.push(Position {
            time,
            coordinates,
            speed,
        });
        self.retention.apply(&mut positions);
        time
    }

    fn track(&self, station_id: StationId) -> Arc<Track> {
        if let Some(track) = self
            .tracks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&station_id)
        {
            return Arc::clone(track);
        }
        let mut tracks = self.tracks.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            tracks
                .entry(station_id)
                .or_insert_with(|| Arc::new(Track::new(station_id))),
        )
    }

    /// Consistent copy of every station.
    ///
    /// The map lock is held only while cloning track handles; each history is
    /// then copied under its own lock, so a position is either fully present
    /// or absent.
    pub fn snapshot(&self) -> Snapshot {
        let tracks: Vec<(StationId, Arc<Track>)> = self
            .tracks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, track)| (*id, Arc::clone(track)))
            .collect();

        tracks
            .into_iter()
            .map(|(id, track)| (id, track.to_vehicle()))
            .collect()
    }

    /// Copy of a single station, if seen.
    pub fn vehicle(&self, station_id: StationId) -> Option<Vehicle> {
        let track = self
            .tracks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&station_id)
            .cloned()?;
        Some(track.to_vehicle())
    }

    /// Number of stations seen.
    pub fn len(&self) -> usize {
        self.tracks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total positions held across all stations.
    pub fn position_count(&self) -> usize {
        self.snapshot().values().map(|v| v.positions.len()).sum()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
