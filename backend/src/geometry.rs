//! Component A: 2D line/polygon ops, WGS84 bearing & geodesic length, uniform
//! arc-length sampling of polylines.
//!
//! All spatial queries elsewhere treat coordinates as WGS84 `(lat, lng)`.
//! Meter distances are approximated by dividing by [`DEGREE_METERS`] only for
//! small buffer radii and coarse filters; route metrics use true geodesic
//! inversion via the `geo` crate.

use geo::{GeodesicBearing, GeodesicDestination, GeodesicDistance};
use geo_types::Point;
use shared::DEGREE_METERS;

/// A WGS84 point, always `(lat, lng)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pt {
    pub lat: f64,
    pub lng: f64,
}

impl Pt {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    fn as_point(self) -> Point<f64> {
        Point::new(self.lng, self.lat)
    }

    /// Construct from a `(lng, lat)` pair, the order edge geometry is stored in.
    pub fn from_lnglat((lng, lat): (f64, f64)) -> Self {
        Self { lat, lng }
    }

    pub fn to_lnglat(self) -> (f64, f64) {
        (self.lng, self.lat)
    }
}

/// WGS84 forward azimuth from `p1` to `p2`, normalized to `[0, 360)`.
pub fn bearing_deg(p1: Pt, p2: Pt) -> f64 {
    let b = p1.as_point().geodesic_bearing(p2.as_point());
    normalize_bearing(b)
}

pub fn normalize_bearing(deg: f64) -> f64 {
    let b = deg % 360.0;
    if b < 0.0 {
        b + 360.0
    } else {
        b
    }
}

/// True geodesic distance in meters.
pub fn geodesic_distance_m(p1: Pt, p2: Pt) -> f64 {
    p1.as_point().geodesic_distance(&p2.as_point())
}

/// Fast approximate distance, degree-based (documented approximation, not for
/// reported mileage).
pub fn haversine_distance_m(p1: Pt, p2: Pt) -> f64 {
    const EARTH_RADIUS_M: f64 = 6_371_000.0;
    let (lat1, lat2) = (p1.lat.to_radians(), p2.lat.to_radians());
    let dlat = (p2.lat - p1.lat).to_radians();
    let dlng = (p2.lng - p1.lng).to_radians();
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().asin()
}

/// Sum of inverse-geodesic distances along a polyline of WGS84 points.
pub fn geodesic_length(polyline: &[Pt]) -> f64 {
    polyline
        .windows(2)
        .map(|w| geodesic_distance_m(w[0], w[1]))
        .sum()
}

/// Forward-geodesic projection: move `distance_m` from `origin` along `bearing_deg`.
pub fn destination_point(origin: Pt, bearing_deg: f64, distance_m: f64) -> Pt {
    let dest = origin.as_point().geodesic_destination(bearing_deg, distance_m);
    Pt::new(dest.y(), dest.x())
}

/// A point on the polyline at `fraction` of its total (projected-metric)
/// length, `fraction` clamped to `[0, 1]`.
pub fn interpolate(polyline: &[Pt], fraction: f64) -> Option<Pt> {
    if polyline.is_empty() {
        return None;
    }
    if polyline.len() == 1 {
        return Some(polyline[0]);
    }
    let fraction = fraction.clamp(0.0, 1.0);
    let total = geodesic_length(polyline);
    let target = total * fraction;
    let mut acc = 0.0;
    for w in polyline.windows(2) {
        let seg_len = geodesic_distance_m(w[0], w[1]);
        if acc + seg_len >= target || seg_len == 0.0 {
            let t = if seg_len > 0.0 {
                (target - acc) / seg_len
            } else {
                0.0
            };
            return Some(Pt::new(
                w[0].lat + (w[1].lat - w[0].lat) * t,
                w[0].lng + (w[1].lng - w[0].lng) * t,
            ));
        }
        acc += seg_len;
    }
    polyline.last().copied()
}

/// One sample along a polyline: cumulative distance, position, and the
/// bearing of the segment the sample falls on.
#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub cumulative_m: f64,
    pub lat: f64,
    pub lng: f64,
    pub bearing_deg: f64,
}

/// Samples along `polyline` at roughly `spacing_m`, at least two samples per
/// edge segment, deduplicating points within 1 m of the previous sample.
pub fn uniform_samples(polyline: &[Pt], spacing_m: f64) -> Vec<Sample> {
    let mut out = Vec::new();
    if polyline.len() < 2 {
        return out;
    }
    let mut cumulative = 0.0;
    let mut last: Option<Pt> = None;
    for w in polyline.windows(2) {
        let (a, b) = (w[0], w[1]);
        let seg_len = geodesic_distance_m(a, b);
        if seg_len <= 0.0 {
            continue;
        }
        let bearing = bearing_deg(a, b);
        let steps = ((seg_len / spacing_m).ceil() as usize).max(1);
        for i in 0..=steps {
            let t = i as f64 / steps as f64;
            let pt = Pt::new(a.lat + (b.lat - a.lat) * t, a.lng + (b.lng - a.lng) * t);
            let d = cumulative + seg_len * t;
            if let Some(prev) = last {
                if haversine_distance_m(prev, pt) < 1.0 {
                    continue;
                }
            }
            out.push(Sample {
                cumulative_m: d,
                lat: pt.lat,
                lng: pt.lng,
                bearing_deg: bearing,
            });
            last = Some(pt);
        }
        cumulative += seg_len;
    }
    out
}

/// Ray-casting point-in-polygon test. `poly` and `point` are `(lat, lng)`.
pub fn polygon_contains(poly: &[Pt], point: Pt) -> bool {
    if poly.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = poly.len() - 1;
    for i in 0..poly.len() {
        let (xi, yi) = (poly[i].lng, poly[i].lat);
        let (xj, yj) = (poly[j].lng, poly[j].lat);
        let intersects =
            ((yi > point.lat) != (yj > point.lat)) && (point.lng < (xj - xi) * (point.lat - yi) / (yj - yi) + xi);
        if intersects {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Degree-approximation buffer distance around a point, for coarse local
/// geometry filters only (never for reported route metrics).
pub fn line_buffer(_line: &[Pt], degrees: f64) -> f64 {
    degrees * DEGREE_METERS
}

/// Distance from `point` to the nearest vertex of `polyline`. An
/// approximation of true point-to-segment distance, adequate for the
/// coarse 25 m buffer query it backs.
pub fn nearest_vertex_distance_m(point: Pt, polyline: &[Pt]) -> f64 {
    polyline
        .iter()
        .map(|&v| geodesic_distance_m(point, v))
        .fold(f64::INFINITY, f64::min)
}

/// Realize a circle boundary as a 64-segment polygon, matching the source's
/// affine scale: `1/69` deg/mile latitude, `1/(69*cos(lat))` deg/mile longitude.
pub fn circle_polygon(center: Pt, radius_miles: f64) -> Vec<Pt> {
    const SEGMENTS: usize = 64;
    let radius_deg_lat = radius_miles / 69.0;
    let radius_deg_lng = radius_miles / (69.0 * center.lat.to_radians().cos());
    (0..SEGMENTS)
        .map(|i| {
            let theta = 2.0 * std::f64::consts::PI * (i as f64) / (SEGMENTS as f64);
            Pt::new(
                center.lat + radius_deg_lat * theta.sin(),
                center.lng + radius_deg_lng * theta.cos(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearing_is_normalized() {
        let p1 = Pt::new(0.0, 0.0);
        let p2 = Pt::new(1.0, 0.0);
        let b = bearing_deg(p1, p2);
        assert!((0.0..360.0).contains(&b));
        assert!(b < 1.0 || b > 359.0);
    }

    #[test]
    fn polygon_contains_center() {
        let square = vec![
            Pt::new(0.0, 0.0),
            Pt::new(0.0, 1.0),
            Pt::new(1.0, 1.0),
            Pt::new(1.0, 0.0),
        ];
        assert!(polygon_contains(&square, Pt::new(0.5, 0.5)));
        assert!(!polygon_contains(&square, Pt::new(2.0, 2.0)));
    }

    #[test]
    fn uniform_samples_cover_polyline() {
        let line = vec![Pt::new(0.0, 0.0), Pt::new(0.0, 0.01)];
        let samples = uniform_samples(&line, 50.0);
        assert!(samples.len() >= 2);
        assert!(samples.windows(2).all(|w| w[1].cumulative_m >= w[0].cumulative_m));
    }

    #[test]
    fn circle_polygon_has_expected_segments() {
        let poly = circle_polygon(Pt::new(40.0, -80.0), 5.0);
        assert_eq!(poly.len(), 64);
    }
}
