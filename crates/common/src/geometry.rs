//! Map feature geometry and route/hazard intersection
//!
//! Features arrive in GeoJSON shape (`{"type": "Feature", "geometry": ...}`)
//! from the application's instrumentation or from fixtures. Two strategies
//! decide whether a pair of geometries intersects:
//! - `BoundingBoxOverlap`: envelope overlap only, fast but approximate
//! - `ExactIntersection`: segment crossing plus point-in-polygon containment
//!
//! `find_intersections` always applies the bounding-box test first and hands
//! only the surviving pairs to the configured strategy.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// A position as `[x, y]` (longitude, latitude for map data)
pub type Coord = [f64; 2];

/// GeoJSON geometry subset used by map routes and hazard zones
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point(Coord),
    LineString(Vec<Coord>),
    Polygon(Vec<Vec<Coord>>),
    MultiLineString(Vec<Vec<Coord>>),
    MultiPolygon(Vec<Vec<Vec<Coord>>>),
}

/// A map feature with an optional id and free-form properties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,

    /// GeoJSON allows `null` here; it reads as an empty map
    #[serde(default, deserialize_with = "null_as_empty")]
    pub properties: Map<String, Value>,

    pub geometry: Geometry,
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Map<String, Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Feature {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            id: None,
            properties: Map::new(),
            geometry,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(Value::String(id.into()));
        self
    }

    /// Human-readable label: the id, else a `name` property, else the index
    pub fn label(&self, index: usize) -> String {
        match &self.id {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => self
                .properties
                .get("name")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| format!("#{}", index)),
        }
    }
}

/// Axis-aligned envelope of a geometry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    fn from_coords<'a>(coords: impl Iterator<Item = &'a Coord>) -> Option<Self> {
        let mut bbox: Option<BoundingBox> = None;
        for c in coords {
            bbox = Some(match bbox {
                None => BoundingBox::new(c[0], c[1], c[0], c[1]),
                Some(b) => BoundingBox::new(
                    b.min_x.min(c[0]),
                    b.min_y.min(c[1]),
                    b.max_x.max(c[0]),
                    b.max_y.max(c[1]),
                ),
            });
        }
        bbox
    }

    /// Closed-interval overlap; touching edges count as overlapping
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }
}

impl Geometry {
    /// Every vertex of the geometry, rings included
    pub fn coords(&self) -> Vec<&Coord> {
        match self {
            Geometry::Point(c) => vec![c],
            Geometry::LineString(line) => line.iter().collect(),
            Geometry::Polygon(rings) | Geometry::MultiLineString(rings) => {
                rings.iter().flatten().collect()
            }
            Geometry::MultiPolygon(polygons) => polygons.iter().flatten().flatten().collect(),
        }
    }

    /// Envelope of the geometry, `None` when it has no coordinates
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        BoundingBox::from_coords(self.coords().into_iter())
    }

    /// Reject non-finite coordinates and degenerate parts
    pub fn validate(&self) -> Result<()> {
        if self.coords().iter().any(|c| !c[0].is_finite() || !c[1].is_finite()) {
            return Err(Error::InvalidGeometry(
                "coordinate is not a finite number".to_string(),
            ));
        }
        match self {
            Geometry::LineString(line) if line.len() < 2 => Err(Error::InvalidGeometry(
                "line string needs at least two positions".to_string(),
            )),
            Geometry::Polygon(rings) if rings.first().map_or(true, |r| r.len() < 3) => Err(
                Error::InvalidGeometry("polygon exterior ring needs at least three positions".to_string()),
            ),
            _ => Ok(()),
        }
    }

    fn segments(&self) -> Vec<(Coord, Coord)> {
        let mut out = Vec::new();
        let mut push_path = |path: &[Coord], closed: bool| {
            for pair in path.windows(2) {
                out.push((pair[0], pair[1]));
            }
            if closed && path.len() > 2 {
                let (first, last) = (path[0], path[path.len() - 1]);
                if first != last {
                    out.push((last, first));
                }
            }
        };
        match self {
            Geometry::Point(_) => {}
            Geometry::LineString(line) => push_path(line, false),
            Geometry::MultiLineString(lines) => lines.iter().for_each(|l| push_path(l, false)),
            Geometry::Polygon(rings) => rings.iter().for_each(|r| push_path(r, true)),
            Geometry::MultiPolygon(polygons) => polygons
                .iter()
                .flatten()
                .for_each(|r| push_path(r, true)),
        }
        out
    }

    fn polygons(&self) -> Vec<&[Vec<Coord>]> {
        match self {
            Geometry::Polygon(rings) => vec![rings.as_slice()],
            Geometry::MultiPolygon(polygons) => polygons.iter().map(Vec::as_slice).collect(),
            _ => Vec::new(),
        }
    }

    /// Whether `p` lies in the geometry's area or on one of its edges
    pub fn covers_point(&self, p: &Coord) -> bool {
        if let Geometry::Point(c) = self {
            return c == p;
        }
        if self.segments().iter().any(|(a, b)| on_segment(a, b, p)) {
            return true;
        }
        self.polygons().iter().any(|rings| polygon_contains(rings, p))
    }
}

/// Decides whether two geometries intersect
pub trait IntersectionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn intersects(&self, a: &Geometry, b: &Geometry) -> bool;
}

/// Envelope overlap only; may report pairs that do not truly touch
#[derive(Debug, Clone, Copy, Default)]
pub struct BoundingBoxOverlap;

impl IntersectionStrategy for BoundingBoxOverlap {
    fn name(&self) -> &'static str {
        "bounding-box"
    }

    fn intersects(&self, a: &Geometry, b: &Geometry) -> bool {
        match (a.bounding_box(), b.bounding_box()) {
            (Some(ba), Some(bb)) => ba.intersects(&bb),
            _ => false,
        }
    }
}

/// Exact test: any edge crossing, or one geometry containing a vertex of the other
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactIntersection;

impl IntersectionStrategy for ExactIntersection {
    fn name(&self) -> &'static str {
        "exact"
    }

    fn intersects(&self, a: &Geometry, b: &Geometry) -> bool {
        let segs_a = a.segments();
        let segs_b = b.segments();
        for (p1, p2) in &segs_a {
            for (q1, q2) in &segs_b {
                if segments_intersect(p1, p2, q1, q2) {
                    return true;
                }
            }
        }
        a.coords().into_iter().any(|p| b.covers_point(p))
            || b.coords().into_iter().any(|p| a.covers_point(p))
    }
}

/// Index pairs `(route, hazard)` whose geometries intersect
pub fn find_intersections(
    routes: &[Feature],
    hazards: &[Feature],
    strategy: &dyn IntersectionStrategy,
) -> Vec<(usize, usize)> {
    let hazard_boxes: Vec<Option<BoundingBox>> =
        hazards.iter().map(|h| h.geometry.bounding_box()).collect();

    let mut hits = Vec::new();
    for (ri, route) in routes.iter().enumerate() {
        let Some(route_box) = route.geometry.bounding_box() else {
            continue;
        };
        for (hi, hazard) in hazards.iter().enumerate() {
            let overlaps = hazard_boxes[hi].map_or(false, |hb| hb.intersects(&route_box));
            if overlaps && strategy.intersects(&route.geometry, &hazard.geometry) {
                hits.push((ri, hi));
            }
        }
    }
    hits
}

fn cross(o: &Coord, a: &Coord, b: &Coord) -> f64 {
    (a[0] - o[0]) * (b[1] - o[1]) - (a[1] - o[1]) * (b[0] - o[0])
}

fn on_segment(a: &Coord, b: &Coord, p: &Coord) -> bool {
    const EPS: f64 = 1e-12;
    cross(a, b, p).abs() <= EPS
        && p[0] >= a[0].min(b[0]) - EPS
        && p[0] <= a[0].max(b[0]) + EPS
        && p[1] >= a[1].min(b[1]) - EPS
        && p[1] <= a[1].max(b[1]) + EPS
}

fn segments_intersect(p1: &Coord, p2: &Coord, q1: &Coord, q2: &Coord) -> bool {
    let d1 = cross(q1, q2, p1);
    let d2 = cross(q1, q2, p2);
    let d3 = cross(p1, p2, q1);
    let d4 = cross(p1, p2, q2);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }

    on_segment(q1, q2, p1) || on_segment(q1, q2, p2) || on_segment(p1, p2, q1) || on_segment(p1, p2, q2)
}

/// Even-odd ray casting over a single ring
fn ring_contains(ring: &[Coord], p: &Coord) -> bool {
    let mut inside = false;
    let n = ring.len();
    if n < 3 {
        return false;
    }
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = (ring[i][0], ring[i][1]);
        let (xj, yj) = (ring[j][0], ring[j][1]);
        if (yi > p[1]) != (yj > p[1]) && p[0] < (xj - xi) * (p[1] - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Inside the exterior ring and outside every hole
fn polygon_contains(rings: &[Vec<Coord>], p: &Coord) -> bool {
    match rings.split_first() {
        Some((exterior, holes)) => {
            ring_contains(exterior, p) && !holes.iter().any(|h| ring_contains(h, p))
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x: f64, y: f64, size: f64) -> Geometry {
        Geometry::Polygon(vec![vec![
            [x, y],
            [x + size, y],
            [x + size, y + size],
            [x, y + size],
            [x, y],
        ]])
    }

    #[test]
    fn test_bounding_box() {
        let line = Geometry::LineString(vec![[0.0, 5.0], [3.0, -1.0], [2.0, 2.0]]);
        assert_eq!(line.bounding_box(), Some(BoundingBox::new(0.0, -1.0, 3.0, 5.0)));
        assert_eq!(Geometry::LineString(vec![]).bounding_box(), None);
    }

    #[test]
    fn test_route_overlapping_hazard() {
        let routes = vec![Feature::new(square(0.0, 0.0, 10.0)).with_id("route-1")];
        let hazards = vec![Feature::new(square(2.0, 2.0, 3.0)).with_id("flood-zone")];

        let hits = find_intersections(&routes, &hazards, &ExactIntersection);
        assert_eq!(hits, vec![(0, 0)]);
        let hits = find_intersections(&routes, &hazards, &BoundingBoxOverlap);
        assert_eq!(hits, vec![(0, 0)]);
    }

    #[test]
    fn test_no_hazards_means_no_intersections() {
        let routes = vec![Feature::new(Geometry::LineString(vec![[0.0, 0.0], [1.0, 1.0]]))];
        assert!(find_intersections(&routes, &[], &ExactIntersection).is_empty());
    }

    #[test]
    fn test_exact_rejects_bbox_false_positive() {
        // Diagonal route whose envelope covers the hazard but whose path misses it
        let route = Geometry::LineString(vec![[0.0, 0.0], [10.0, 10.0]]);
        let hazard = square(7.0, 0.0, 2.0);

        assert!(BoundingBoxOverlap.intersects(&route, &hazard));
        assert!(!ExactIntersection.intersects(&route, &hazard));
    }

    #[test]
    fn test_line_crossing_polygon() {
        let route = Geometry::LineString(vec![[-5.0, 1.0], [5.0, 1.0]]);
        let hazard = square(0.0, 0.0, 2.0);
        assert!(ExactIntersection.intersects(&route, &hazard));
    }

    #[test]
    fn test_route_inside_hole_is_safe() {
        let hazard = Geometry::Polygon(vec![
            vec![[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]],
            vec![[3.0, 3.0], [7.0, 3.0], [7.0, 7.0], [3.0, 7.0]],
        ]);
        let route = Geometry::LineString(vec![[4.0, 4.0], [6.0, 6.0]]);
        assert!(!ExactIntersection.intersects(&route, &hazard));
    }

    #[test]
    fn test_point_on_edge() {
        let hazard = square(0.0, 0.0, 2.0);
        assert!(hazard.covers_point(&[2.0, 1.0]));
        assert!(!hazard.covers_point(&[3.0, 1.0]));
    }

    #[test]
    fn test_parse_geojson_feature() {
        let json = serde_json::json!({
            "type": "Feature",
            "id": 7,
            "properties": { "name": "bridge" },
            "geometry": { "type": "LineString", "coordinates": [[0.0, 0.0], [1.0, 1.0]] }
        });
        let feature: Feature = serde_json::from_value(json).unwrap();
        assert_eq!(feature.label(0), "7");
        assert!(matches!(feature.geometry, Geometry::LineString(ref l) if l.len() == 2));
    }

    #[test]
    fn test_null_properties_read_as_empty() {
        let json = serde_json::json!({
            "type": "Feature",
            "properties": null,
            "geometry": { "type": "Point", "coordinates": [1.0, 2.0] }
        });
        let feature: Feature = serde_json::from_value(json).unwrap();
        assert!(feature.properties.is_empty());
        assert_eq!(feature.label(3), "#3");
    }

    #[test]
    fn test_validate() {
        assert!(Geometry::LineString(vec![[0.0, 0.0]]).validate().is_err());
        assert!(Geometry::Point([f64::NAN, 0.0]).validate().is_err());
        assert!(square(0.0, 0.0, 1.0).validate().is_ok());
    }
}
