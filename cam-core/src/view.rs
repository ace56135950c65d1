//! Read-only views over the trajectory store.
//!
//! `current_state` is the raw snapshot; `renderable_features` turns it into an
//! ordered list of map features (trail, last-position marker, timed points)
//! for a web map. Nothing here mutates the store.

use std::sync::Arc;

use serde::Serialize;

use crate::store::{Snapshot, TrajectoryStore, Vehicle};
use crate::types::StationId;

/// Overview centre `[lat, lon]` used when nothing has been received yet.
pub const DEFAULT_CENTER: [f64; 2] = [45.0531764, 7.6578783];
pub const DEFAULT_ZOOM: u8 = 20;

/// Where the map starts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MapDefaults {
    /// `[lat, lon]`
    pub center: [f64; 2],
    pub zoom: u8,
}

impl Default for MapDefaults {
    fn default() -> Self {
        MapDefaults {
            center: DEFAULT_CENTER,
            zoom: DEFAULT_ZOOM,
        }
    }
}

// ---------------------------------------------------------------------------
// Features
// ---------------------------------------------------------------------------

/// One drawable element.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MapFeature {
    /// Whole trail in recorded order, `[lat, lon]` pairs.
    Polyline {
        station_id: StationId,
        color: &'static str,
        path: Vec<[f64; 2]>,
    },
    /// Last valid position.
    Marker {
        station_id: StationId,
        color: &'static str,
        latitude: f64,
        longitude: f64,
        speed: Option<f64>,
    },
    /// One per valid position, for animated playback.
    TimedPoint {
        station_id: StationId,
        color: &'static str,
        /// `[lon, lat]`
        coordinates: [f64; 2],
        time_ms: u64,
        speed: Option<f64>,
    },
}

/// What the map should show.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MapView {
    /// No vehicle has a valid position yet; show the default overview.
    Empty { center: [f64; 2], zoom: u8 },
    Populated {
        center: [f64; 2],
        zoom: u8,
        features: Vec<MapFeature>,
    },
}

impl MapView {
    pub fn is_empty(&self) -> bool {
        matches!(self, MapView::Empty { .. })
    }

    pub fn features(&self) -> &[MapFeature] {
        match self {
            MapView::Empty { .. } => &[],
            MapView::Populated { features, .. } => features,
        }
    }
}

/// Build the map view from a snapshot.
///
/// Vehicles without a single valid coordinate pair are skipped.
pub fn map_view(snapshot: &Snapshot, defaults: MapDefaults) -> MapView {
    let mut features = Vec::new();
    for (&station_id, vehicle) in snapshot {
        push_vehicle_features(station_id, vehicle, &mut features);
    }

    if features.is_empty() {
        MapView::Empty {
            center: defaults.center,
            zoom: defaults.zoom,
        }
    } else {
        MapView::Populated {
            center: defaults.center,
            zoom: defaults.zoom,
            features,
        }
    }
}

fn push_vehicle_features(station_id: StationId, vehicle: &Vehicle, out: &mut Vec<MapFeature>) {
    let valid: Vec<_> = vehicle
        .positions
        .iter()
        .filter(|p| p.has_valid_coordinates())
        .collect();
    let Some(last) = valid.last() else {
        return;
    };

    out.push(MapFeature::Polyline {
        station_id,
        color: vehicle.color,
        path: valid.iter().map(|p| [p.latitude(), p.longitude()]).collect(),
    });
    out.push(MapFeature::Marker {
        station_id,
        color: vehicle.color,
        latitude: last.latitude(),
        longitude: last.longitude(),
        speed: last.speed,
    });
    out.extend(valid.iter().map(|p| MapFeature::TimedPoint {
        station_id,
        color: vehicle.color,
        coordinates: p.coordinates,
        time_ms: p.time.saturating_mul(1000),
        speed: p.speed,
    }));
}

// ---------------------------------------------------------------------------
// GeoJSON (animated playback)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub features: Vec<PointFeature>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointFeature {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub geometry: PointGeometry,
    pub properties: PointProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointGeometry {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub coordinates: [f64; 2],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointProperties {
    /// Milliseconds since the epoch.
    pub time: u64,
    pub popup: String,
    pub icon: &'static str,
    pub iconstyle: IconStyle,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IconStyle {
    pub fill_color: &'static str,
    pub fill_opacity: f64,
    pub stroke: &'static str,
    pub radius: u32,
}

/// Format a speed for popups.
pub fn speed_label(speed: Option<f64>) -> String {
    match speed {
        Some(v) => format!("{v:.2} m/s"),
        None => "n/a".to_string(),
    }
}

/// Timed points as a GeoJSON FeatureCollection.
pub fn timestamped_geojson(features: &[MapFeature]) -> FeatureCollection {
    let points = features
        .iter()
        .filter_map(|f| match f {
            MapFeature::TimedPoint {
                station_id,
                color,
                coordinates,
                time_ms,
                speed,
            } => Some(PointFeature {
                kind: "Feature",
                geometry: PointGeometry {
                    kind: "Point",
                    coordinates: *coordinates,
                },
                properties: PointProperties {
                    time: *time_ms,
                    popup: format!("Vehicle {station_id} - speed: {}", speed_label(*speed)),
                    icon: "circle",
                    iconstyle: IconStyle {
                        fill_color: color,
                        fill_opacity: 0.8,
                        stroke: "true",
                        radius: 5,
                    },
                },
            }),
            _ => None,
        })
        .collect();

    FeatureCollection {
        kind: "FeatureCollection",
        features: points,
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Read handle given to the web layer.
#[derive(Clone)]
pub struct TrajectoryView {
    store: Arc<TrajectoryStore>,
    defaults: MapDefaults,
}

impl TrajectoryView {
    pub fn new(store: Arc<TrajectoryStore>, defaults: MapDefaults) -> Self {
        TrajectoryView { store, defaults }
    }

    pub fn defaults(&self) -> MapDefaults {
        self.defaults
    }

    pub fn store(&self) -> &TrajectoryStore {
        &self.store
    }

    pub fn current_state(&self) -> Snapshot {
        self.store.snapshot()
    }

    pub fn renderable_features(&self) -> MapView {
        map_view(&self.store.snapshot(), self.defaults)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
