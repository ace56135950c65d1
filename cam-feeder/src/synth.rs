//! Synthetic CAM traffic: stations driving circles around a centre point.

use std::f64::consts::PI;

use cam_core::encode::CamFrameBuilder;
use cam_core::types::StationId;

const METRES_PER_DEGREE: f64 = 111_320.0;

#[derive(Debug, Clone)]
pub struct SynthParams {
    pub stations: u32,
    /// `[lat, lon]`
    pub center: [f64; 2],
    pub radius_m: f64,
    /// Messages per station per full lap.
    pub steps_per_lap: u32,
    /// Time between steps, used for the reported speed and generation time.
    pub interval_ms: u64,
}

/// One frame per station for a given step.
pub fn synth_step(params: &SynthParams, step: u64) -> Vec<Vec<u8>> {
    let steps = params.steps_per_lap.max(1) as f64;
    let lap_secs = steps * params.interval_ms as f64 / 1000.0;
    let speed = if lap_secs > 0.0 {
        2.0 * PI * params.radius_m / lap_secs
    } else {
        0.0
    };
    let gdt = ((step * params.interval_ms) % 65_536) as u16;
    let [lat0, lon0] = params.center;

    (0..params.stations)
        .map(|i| {
            // stations spread evenly around the circle, each on its own radius
            let phase = 2.0 * PI * i as f64 / params.stations.max(1) as f64;
            let angle = phase + 2.0 * PI * (step as f64 / steps);
            let radius = params.radius_m * (1.0 + 0.25 * i as f64);

            let lat = lat0 + radius * angle.cos() / METRES_PER_DEGREE;
            let lon = lon0 + radius * angle.sin() / (METRES_PER_DEGREE * lat0.to_radians().cos());

            CamFrameBuilder::new(station_id(i), lat, lon)
                .speed(Some(speed * (1.0 + 0.25 * i as f64)))
                .generation_delta_time(gdt)
                .build()
        })
        .collect()
}

fn station_id(index: u32) -> StationId {
    1000 + index
}

#[cfg(test)]
mod tests {
    use super::*;
    use cam_core::decode::decode;

    fn params() -> SynthParams {
        SynthParams {
            stations: 3,
            center: [45.0531764, 7.6578783],
            radius_m: 20.0,
            steps_per_lap: 40,
            interval_ms: 500,
        }
    }

    #[test]
    fn test_every_synth_frame_decodes() {
        let p = params();
        for step in 0..5 {
            let frames = synth_step(&p, step);
            assert_eq!(frames.len(), 3);
            let ids: Vec<_> = frames.iter().map(|f| decode(f).unwrap().station_id).collect();
            assert_eq!(ids, vec![1000, 1001, 1002]);
        }
    }

    #[test]
    fn test_positions_stay_near_center() {
        let p = params();
        for step in [0, 10, 20, 30] {
            for frame in synth_step(&p, step) {
                let rec = decode(&frame).unwrap();
                let dlat = (rec.latitude - p.center[0]) * METRES_PER_DEGREE;
                let dlon = (rec.longitude - p.center[1])
                    * METRES_PER_DEGREE
                    * p.center[0].to_radians().cos();
                let dist = (dlat * dlat + dlon * dlon).sqrt();
                // largest radius is 1.5x the base radius
                assert!(dist < p.radius_m * 1.5 + 0.1, "{dist}");
                assert!(dist > p.radius_m - 0.1, "{dist}");
            }
        }
    }

    #[test]
    fn test_speed_matches_lap_time() {
        let p = params();
        let rec = decode(&synth_step(&p, 0)[0]).unwrap();
        // 2 * pi * 20 m in 20 s
        assert!((rec.speed.unwrap() - 2.0 * PI).abs() < 0.01);
    }
}
