//! Component G: the route annotator.
//!
//! Converts a node sequence into a GeoJSON feature with sampled elevation
//! profile, climb/descent, difficulty score, and centroid. Ground truth:
//! `loop_generator.py::compute_elevation_profile`, `compute_difficulty`,
//! `_create_properties`, `path_to_geojson`.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::elevation::ElevationOracle;
use crate::geometry::uniform_samples;
use crate::graph_store::RoadGraph;
use crate::loops::LoopCandidate;

/// One row of the sampled elevation profile: `[miles, feet, lat, lng, bearing_deg]`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProfilePoint {
    pub miles: f64,
    pub feet: f64,
    pub lat: f64,
    pub lng: f64,
    pub bearing_deg: f64,
}

#[derive(Debug, Clone)]
pub struct AnnotatedRoute {
    pub nodes: Vec<u32>,
    pub turns: u32,
    pub total_miles: f64,
    pub loop_miles: f64,
    pub loop_ratio: f64,
    pub mask_hex: String,
    pub profile: Vec<ProfilePoint>,
    pub total_climb_ft: f64,
    pub total_descent_ft: f64,
    pub difficulty: f64,
    pub centroid: (f64, f64),
    pub geojson: serde_json::Value,
}

const SAMPLE_SPACING_M: f64 = 50.0;

/// Builds an [`AnnotatedRoute`] from a loop candidate emitted by the
/// enumerator (Component F).
pub fn annotate(graph: &RoadGraph, candidate: &LoopCandidate, oracle: &dyn ElevationOracle) -> AnnotatedRoute {
    let polyline = graph.polyline_for_path(&candidate.nodes);
    let samples = uniform_samples(&polyline, SAMPLE_SPACING_M);

    let mut profile = Vec::with_capacity(samples.len());
    let mut climb_ft = 0.0;
    let mut descent_ft = 0.0;
    let mut prev_elev_ft: Option<f64> = None;
    let mut lat_sum = 0.0;
    let mut lng_sum = 0.0;
    let mut retained = 0usize;

    for s in &samples {
        let Some(elev_m) = oracle.elevation(s.lat, s.lng) else {
            continue; // skip samples with missing elevation
        };
        let elev_ft = elev_m / shared::METERS_PER_FOOT;
        if let Some(prev) = prev_elev_ft {
            let delta = elev_ft - prev;
            if delta > 0.0 {
                climb_ft += delta;
            } else {
                descent_ft += -delta;
            }
        }
        prev_elev_ft = Some(elev_ft);

        lat_sum += s.lat;
        lng_sum += s.lng;
        retained += 1;

        profile.push(ProfilePoint {
            miles: round_to(s.cumulative_m / shared::METERS_PER_MILE, 3),
            feet: round_to(elev_ft, 1),
            lat: round_to(s.lat, 6),
            lng: round_to(s.lng, 6),
            bearing_deg: round_to(s.bearing_deg, 1),
        });
    }

    let centroid = if retained > 0 {
        (lat_sum / retained as f64, lng_sum / retained as f64)
    } else {
        candidate.centroid
    };

    let total_miles = candidate.total_dist_m / shared::METERS_PER_MILE;
    let miles_traveled = total_miles.max(1e-6);
    let difficulty = round_to((1.0 + 9.0 * (climb_ft / miles_traveled) / 200.0).clamp(1.0, 10.0), 1);

    let geometry = json!({
        "type": "LineString",
        "coordinates": polyline.iter().map(|p| vec![p.lng, p.lat]).collect::<Vec<_>>(),
    });

    let properties = json!({
        "turns": candidate.turns,
        "mask": candidate.mask.to_hex(),
        "loop_ratio": candidate.loop_ratio,
        "loop_miles": candidate.loop_dist_m / shared::METERS_PER_MILE,
        "total_miles": total_miles,
        "node_count": candidate.nodes.len(),
        "total_climb_ft": climb_ft,
        "total_descent_ft": descent_ft,
        "difficulty": difficulty,
        "profile": profile,
        "centroid": [centroid.0, centroid.1],
    });

    let geojson = json!({
        "type": "Feature",
        "geometry": geometry,
        "properties": properties,
    });

    AnnotatedRoute {
        nodes: candidate.nodes.clone(),
        turns: candidate.turns,
        total_miles,
        loop_miles: candidate.loop_dist_m / shared::METERS_PER_MILE,
        loop_ratio: candidate.loop_ratio,
        mask_hex: candidate.mask.to_hex(),
        profile,
        total_climb_ft: climb_ft,
        total_descent_ft: descent_ft,
        difficulty,
        centroid,
        geojson,
    }
}

fn round_to(v: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (v * factor).round() / factor
}
