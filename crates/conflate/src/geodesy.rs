//! Geodesic helpers: reprojection into WGS84, distances, WKT rendering,
//! representative points and the proximity index used by the matcher.

use std::collections::BTreeSet;
use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

use geo::{Centroid, Coord, GeodesicDistance, InteriorPoint, LineString, MultiLineString, Point, Polygon};
use rstar::{PointDistance, RTree, RTreeObject, AABB};

use crate::error::ConflateError;
use crate::model::Location;

// ---------------------------------------------------------------------------
// Reprojection
// ---------------------------------------------------------------------------

const GRS80_A: f64 = 6_378_137.0;
const GRS80_F: f64 = 1.0 / 298.257_222_101;
const SPHERE_R: f64 = 6_378_137.0;

/// Source coordinate reference systems with a known inverse into WGS84.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Crs {
    /// EPSG:4326, x = longitude, y = latitude.
    Wgs84,
    /// EPSG:3857 spherical web mercator.
    WebMercator,
    /// EPSG:2154 RGF93 / Lambert-93.
    Lambert93,
}

impl Crs {
    pub fn from_srid(srid: u32) -> Result<Self, ConflateError> {
        match srid {
            4326 => Ok(Self::Wgs84),
            3857 | 900913 => Ok(Self::WebMercator),
            2154 => Ok(Self::Lambert93),
            other => Err(ConflateError::UnsupportedCrs(other)),
        }
    }

    pub fn to_wgs84(&self, x: f64, y: f64) -> Location {
        match self {
            Self::Wgs84 => Location::new(x, y),
            Self::WebMercator => Location::new(
                (x / SPHERE_R).to_degrees(),
                (2.0 * (y / SPHERE_R).exp().atan() - FRAC_PI_2).to_degrees(),
            ),
            Self::Lambert93 => LambertConic::lambert93().inverse(x, y),
        }
    }
}

/// Lambert conformal conic, two standard parallels, on the GRS80 ellipsoid.
struct LambertConic {
    e: f64,
    n: f64,
    a_f: f64,
    rho0: f64,
    lon0: f64,
    x0: f64,
    y0: f64,
}

impl LambertConic {
    fn lambert93() -> Self {
        Self::new(49.0, 44.0, 46.5, 3.0, 700_000.0, 6_600_000.0)
    }

    fn new(lat1: f64, lat2: f64, lat0: f64, lon0: f64, x0: f64, y0: f64) -> Self {
        let e = (2.0 * GRS80_F - GRS80_F * GRS80_F).sqrt();
        let m = |phi: f64| phi.cos() / (1.0 - e * e * phi.sin().powi(2)).sqrt();
        let (phi1, phi2, phi0) = (lat1.to_radians(), lat2.to_radians(), lat0.to_radians());
        let (t1, t2, t0) = (iso_t(phi1, e), iso_t(phi2, e), iso_t(phi0, e));
        let n = (m(phi1).ln() - m(phi2).ln()) / (t1.ln() - t2.ln());
        let a_f = GRS80_A * m(phi1) / (n * t1.powf(n));
        Self {
            e,
            n,
            a_f,
            rho0: a_f * t0.powf(n),
            lon0: lon0.to_radians(),
            x0,
            y0,
        }
    }

    fn inverse(&self, x: f64, y: f64) -> Location {
        let dx = x - self.x0;
        let dy = self.rho0 - (y - self.y0);
        let sign = self.n.signum();
        let rho = sign * (dx * dx + dy * dy).sqrt();
        let t = (rho / self.a_f).powf(1.0 / self.n);
        let theta = (sign * dx).atan2(sign * dy);
        let lon = theta / self.n + self.lon0;

        let mut phi = FRAC_PI_2 - 2.0 * t.atan();
        for _ in 0..20 {
            let es = self.e * phi.sin();
            let next = FRAC_PI_2 - 2.0 * (t * ((1.0 - es) / (1.0 + es)).powf(self.e / 2.0)).atan();
            let done = (next - phi).abs() < 1e-12;
            phi = next;
            if done {
                break;
            }
        }
        Location::new(lon.to_degrees(), phi.to_degrees())
    }

    #[cfg(test)]
    fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        let rho = self.a_f * iso_t(lat.to_radians(), self.e).powf(self.n);
        let theta = self.n * (lon.to_radians() - self.lon0);
        (self.x0 + rho * theta.sin(), self.y0 + self.rho0 - rho * theta.cos())
    }
}

fn iso_t(phi: f64, e: f64) -> f64 {
    let es = e * phi.sin();
    (FRAC_PI_4 - phi / 2.0).tan() / ((1.0 - es) / (1.0 + es)).powf(e / 2.0)
}

// ---------------------------------------------------------------------------
// Distance + WKT
// ---------------------------------------------------------------------------

pub fn to_point(loc: &Location) -> Point<f64> {
    Point::new(loc.lon, loc.lat)
}

/// Geodesic separation on the WGS84 ellipsoid, meters.
pub fn distance_m(a: &Location, b: &Location) -> f64 {
    to_point(a).geodesic_distance(&to_point(b))
}

/// `POINT(lon lat)` with the shortest round-tripping number format.
pub fn wkt(loc: &Location) -> String {
    format!("POINT({} {})", loc.lon, loc.lat)
}

/// `POINT(lon lat)` with a fixed number of decimals, stable across runs.
pub fn wkt_fixed(loc: &Location, decimals: usize) -> String {
    format!("POINT({:.*} {:.*})", decimals, loc.lon, decimals, loc.lat)
}

// ---------------------------------------------------------------------------
// Representative points
// ---------------------------------------------------------------------------

/// Map feature geometry as stored, before reduction to a point.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureGeometry {
    Point(Location),
    Line(Vec<Location>),
    Members(Vec<Vec<Location>>),
}

/// Point used for every distance comparison of a feature.
///
/// Closed rings are treated as areas. Falls back to the centroid when no
/// interior point exists; `None` for empty geometry.
pub fn representative_point(geom: &FeatureGeometry) -> Option<Location> {
    let point = match geom {
        FeatureGeometry::Point(loc) => Some(to_point(loc)),
        FeatureGeometry::Line(coords) => {
            let line = line_string(coords);
            if is_ring(coords) {
                let area = Polygon::new(line, vec![]);
                area.interior_point().or_else(|| area.centroid())
            } else {
                line.interior_point().or_else(|| line.centroid())
            }
        }
        FeatureGeometry::Members(members) => {
            if !members.is_empty() && members.iter().all(|m| is_ring(m)) {
                let mut rings = members.iter().map(|m| line_string(m));
                let exterior = rings.next()?;
                let area = Polygon::new(exterior, rings.collect());
                area.interior_point().or_else(|| area.centroid())
            } else {
                let lines = MultiLineString::new(members.iter().map(|m| line_string(m)).collect());
                lines.interior_point().or_else(|| lines.centroid())
            }
        }
    }?;
    Some(Location::new(point.x(), point.y()))
}

fn line_string(coords: &[Location]) -> LineString<f64> {
    LineString::new(coords.iter().map(|c| Coord { x: c.lon, y: c.lat }).collect())
}

fn is_ring(coords: &[Location]) -> bool {
    coords.len() >= 4 && coords.first() == coords.last()
}

// ---------------------------------------------------------------------------
// Proximity index
// ---------------------------------------------------------------------------

/// Meters per degree of latitude, lower bound.
const METERS_PER_DEGREE_MIN: f64 = 110_574.0;
/// Meters per degree of longitude at the equator.
const METERS_PER_DEGREE_LON: f64 = 111_320.0;

struct IndexedPoint {
    slot: usize,
    lonlat: [f64; 2],
}

impl RTreeObject for IndexedPoint {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.lonlat)
    }
}

impl PointDistance for IndexedPoint {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let (dx, dy) = (self.lonlat[0] - point[0], self.lonlat[1] - point[1]);
        dx * dx + dy * dy
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub slot: usize,
    pub distance: f64,
}

/// R-tree over points answering "everything within R meters of".
pub struct ProximityIndex {
    tree: RTree<IndexedPoint>,
    locations: Vec<Location>,
}

impl ProximityIndex {
    /// `slot` of each neighbor is the position in `locations`.
    pub fn new(locations: Vec<Location>) -> Self {
        let points = locations
            .iter()
            .enumerate()
            .map(|(slot, loc)| IndexedPoint { slot, lonlat: [loc.lon, loc.lat] })
            .collect();
        Self {
            tree: RTree::bulk_load(points),
            locations,
        }
    }

    /// Points within `radius_m` (inclusive), ascending distance, then slot.
    pub fn within(&self, center: &Location, radius_m: f64) -> Vec<Neighbor> {
        let radius_deg = search_radius_deg(center, radius_m);
        // Points across the antimeridian sit 360 degrees away in the tree.
        let mut centers = vec![center.lon];
        if center.lon + radius_deg > 180.0 {
            centers.push(center.lon - 360.0);
        }
        if center.lon - radius_deg < -180.0 {
            centers.push(center.lon + 360.0);
        }
        let mut slots: BTreeSet<usize> = BTreeSet::new();
        for lon in centers {
            slots.extend(
                self.tree
                    .locate_within_distance([lon, center.lat], radius_deg * radius_deg)
                    .map(|p| p.slot),
            );
        }
        let mut hits: Vec<Neighbor> = slots
            .into_iter()
            .filter_map(|slot| {
                let distance = distance_m(center, &self.locations[slot]);
                (distance <= radius_m).then_some(Neighbor { slot, distance })
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.slot.cmp(&b.slot)));
        hits
    }

    /// Closest point within `radius_m`, ties by slot.
    pub fn nearest_within(&self, center: &Location, radius_m: f64) -> Option<Neighbor> {
        self.within(center, radius_m).into_iter().next()
    }
}

/// Radius in degree space whose circle contains the geodesic circle of
/// `radius_m` around `center`.
fn search_radius_deg(center: &Location, radius_m: f64) -> f64 {
    let dlat = radius_m / METERS_PER_DEGREE_MIN * 1.01 + 1e-9;
    let max_lat = (center.lat.abs() + dlat).min(89.999_999);
    let dlon = (radius_m / (METERS_PER_DEGREE_LON * max_lat.to_radians().cos()) * 1.01 + 1e-9).min(360.0);
    dlat.max(dlon)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn wgs84_is_identity() {
        let loc = Crs::from_srid(4326).unwrap().to_wgs84(2.0, 48.0);
        assert_eq!(loc, Location::new(2.0, 48.0));
    }

    #[test]
    fn web_mercator_inverse() {
        let crs = Crs::from_srid(3857).unwrap();
        let origin = crs.to_wgs84(0.0, 0.0);
        assert!(close(origin.lon, 0.0, 1e-12));
        assert!(close(origin.lat, 0.0, 1e-12));
        let edge = crs.to_wgs84(20_037_508.342_789_244, 0.0);
        assert!(close(edge.lon, 180.0, 1e-9));
    }

    #[test]
    fn lambert93_origin() {
        let loc = Crs::Lambert93.to_wgs84(700_000.0, 6_600_000.0);
        assert!(close(loc.lon, 3.0, 1e-9), "lon {}", loc.lon);
        assert!(close(loc.lat, 46.5, 1e-9), "lat {}", loc.lat);
    }

    #[test]
    fn lambert93_round_trip() {
        let conic = LambertConic::lambert93();
        for (lon, lat) in [(2.3522, 48.8566), (2.148, 43.928), (-1.55, 47.21), (7.75, 48.57)] {
            let (x, y) = conic.forward(lon, lat);
            let back = conic.inverse(x, y);
            assert!(close(back.lon, lon, 1e-9), "lon {lon} -> {}", back.lon);
            assert!(close(back.lat, lat, 1e-9), "lat {lat} -> {}", back.lat);
        }
    }

    #[test]
    fn unsupported_srid() {
        let err = Crs::from_srid(27572).unwrap_err();
        assert!(err.to_string().contains("27572"));
    }

    #[test]
    fn distance_one_millidegree_latitude() {
        let d = distance_m(&Location::new(2.0, 48.0), &Location::new(2.0, 48.001));
        assert!(d > 110.0 && d < 112.0, "got {d}");
    }

    #[test]
    fn wkt_formats() {
        let loc = Location::new(2.0, 48.5);
        assert_eq!(wkt(&loc), "POINT(2 48.5)");
        assert_eq!(wkt_fixed(&loc, 3), "POINT(2.000 48.500)");
    }

    #[test]
    fn representative_point_of_kinds() {
        let p = representative_point(&FeatureGeometry::Point(Location::new(1.0, 2.0))).unwrap();
        assert_eq!(p, Location::new(1.0, 2.0));

        let square = vec![
            Location::new(0.0, 0.0),
            Location::new(0.002, 0.0),
            Location::new(0.002, 0.002),
            Location::new(0.0, 0.002),
            Location::new(0.0, 0.0),
        ];
        let inside = representative_point(&FeatureGeometry::Line(square.clone())).unwrap();
        assert!(inside.lon > 0.0 && inside.lon < 0.002);
        assert!(inside.lat > 0.0 && inside.lat < 0.002);

        let members = representative_point(&FeatureGeometry::Members(vec![square])).unwrap();
        assert!(members.lon > 0.0 && members.lon < 0.002);

        let line = vec![Location::new(0.0, 0.0), Location::new(0.0, 0.001), Location::new(0.0, 0.002)];
        let on_line = representative_point(&FeatureGeometry::Line(line)).unwrap();
        assert!(close(on_line.lon, 0.0, 1e-12));

        assert!(representative_point(&FeatureGeometry::Line(vec![])).is_none());
    }

    #[test]
    fn index_within_sorted_by_distance() {
        let center = Location::new(2.0, 48.0);
        let index = ProximityIndex::new(vec![
            Location::new(2.0, 48.0003),  // ~33 m
            Location::new(2.0, 48.00005), // ~5.6 m
            Location::new(2.0, 48.01),    // ~1.1 km
        ]);
        let hits = index.within(&center, 50.0);
        assert_eq!(hits.iter().map(|h| h.slot).collect::<Vec<_>>(), vec![1, 0]);
        assert_eq!(index.nearest_within(&center, 50.0).unwrap().slot, 1);
        assert!(index.nearest_within(&center, 1.0).is_none());
    }

    #[test]
    fn index_envelope_covers_longitude_at_high_latitude() {
        // 0.001 degree of longitude at 70N is ~38 m.
        let center = Location::new(10.0, 70.0);
        let index = ProximityIndex::new(vec![Location::new(10.001, 70.0)]);
        assert_eq!(index.within(&center, 40.0).len(), 1);
        assert!(index.within(&center, 30.0).is_empty());
    }

    #[test]
    fn index_reaches_across_antimeridian() {
        // 0.0002 degree of longitude at the equator is ~22 m.
        let index = ProximityIndex::new(vec![
            Location::new(-179.9999, 0.0),
            Location::new(0.0, 0.0),
        ]);
        let hits = index.within(&Location::new(179.9999, 0.0), 50.0);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].slot, 0);
        assert!(hits[0].distance > 20.0 && hits[0].distance < 25.0);

        let back = ProximityIndex::new(vec![Location::new(179.9999, 0.0)]);
        assert_eq!(back.within(&Location::new(-179.9999, 0.0), 50.0).len(), 1);
        assert!(back.within(&Location::new(-179.9999, 0.0), 10.0).is_empty());
    }
}
