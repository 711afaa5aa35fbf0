//! Zone geometry.
//!
//! Zone polygons are stored in image-relative coordinates, so a detection
//! is placed in a zone by testing its normalized box centre.

use crate::models::Zone;

/// Ray-casting point-in-polygon test. Polygons with fewer than three
/// vertices contain nothing.
pub fn point_in_polygon(point: (f64, f64), polygon: &[[f64; 2]]) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    let (x, y) = point;
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let [xi, yi] = polygon[i];
        let [xj, yj] = polygon[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// First zone (in the given order) whose polygon contains `point`.
pub fn zone_for_point<'a>(point: (f64, f64), zones: &'a [Zone]) -> Option<&'a Zone> {
    zones.iter().find(|zone| {
        zone.polygon
            .as_deref()
            .is_some_and(|polygon| point_in_polygon(point, polygon))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> Vec<[f64; 2]> {
        vec![[x0, y0], [x1, y0], [x1, y1], [x0, y1]]
    }

    fn zone(id: i64, name: &str, polygon: Option<Vec<[f64; 2]>>) -> Zone {
        Zone {
            id,
            name: name.to_string(),
            polygon,
            marker_type: None,
            marker_id: None,
            notes: None,
        }
    }

    #[test]
    fn test_point_inside_square() {
        let poly = square(0.0, 0.0, 0.5, 0.5);
        assert!(point_in_polygon((0.25, 0.25), &poly));
        assert!(!point_in_polygon((0.75, 0.25), &poly));
    }

    #[test]
    fn test_concave_polygon() {
        // L-shape: the notch at the top right is outside
        let poly = vec![
            [0.0, 0.0],
            [1.0, 0.0],
            [1.0, 0.5],
            [0.5, 0.5],
            [0.5, 1.0],
            [0.0, 1.0],
        ];
        assert!(point_in_polygon((0.25, 0.75), &poly));
        assert!(point_in_polygon((0.75, 0.25), &poly));
        assert!(!point_in_polygon((0.75, 0.75), &poly));
    }

    #[test]
    fn test_degenerate_polygon() {
        assert!(!point_in_polygon((0.0, 0.0), &[[0.0, 0.0], [1.0, 1.0]]));
        assert!(!point_in_polygon((0.0, 0.0), &[]));
    }

    #[test]
    fn test_zone_for_point_first_match_wins() {
        let zones = vec![
            zone(1, "no-geometry", None),
            zone(2, "left", Some(square(0.0, 0.0, 0.5, 1.0))),
            zone(3, "everything", Some(square(0.0, 0.0, 1.0, 1.0))),
        ];
        assert_eq!(zone_for_point((0.1, 0.5), &zones).unwrap().name, "left");
        assert_eq!(zone_for_point((0.9, 0.5), &zones).unwrap().name, "everything");
        assert!(zone_for_point((1.5, 0.5), &zones).is_none());
    }
}
