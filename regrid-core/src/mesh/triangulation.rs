//! Planar Delaunay triangulation (Bowyer-Watson)
//!
//! Unstructured source points are triangulated in longitude/latitude. Longitudes are unwrapped
//! around the mean direction of the points so that regional sets crossing the anti-meridian
//! stay contiguous. Triangles are kept in a `BTreeMap` so that the result depends only on the
//! input order.
//!
//! Known limit: every insertion scans all live triangles for circumcircle containment, so
//! triangulating `n` points is O(n²). Large unstructured sets should be meshed once and shared
//! through the [`Registry`](crate::registry::Registry).

use crate::spatial::Point3;
use std::collections::{BTreeMap, BTreeSet};

/// Map points to planar (longitude, latitude) coordinates
pub(crate) fn planar_coordinates(points: &[Point3]) -> Vec<[f64; 2]> {
    let (mut x, mut y) = (0.0, 0.0);
    for p in points {
        x += p.x();
        y += p.y();
    }
    let centre = if x.hypot(y) > 1e-12 {
        y.atan2(x).to_degrees()
    } else {
        0.0
    };

    points
        .iter()
        .map(|p| {
            let (lat, lon) = p.to_lat_lon();
            let mut lon = lon - centre;
            while lon > 180.0 {
                lon -= 360.0;
            }
            while lon <= -180.0 {
                lon += 360.0;
            }
            [lon, lat]
        })
        .collect()
}

/// Twice the signed area of `(a, b, c)`; positive for counter-clockwise
fn orientation(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> f64 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}

/// Whether `d` lies strictly inside the circumcircle of the counter-clockwise triangle `(a, b, c)`
fn in_circumcircle(a: [f64; 2], b: [f64; 2], c: [f64; 2], d: [f64; 2]) -> bool {
    let (adx, ady) = (a[0] - d[0], a[1] - d[1]);
    let (bdx, bdy) = (b[0] - d[0], b[1] - d[1]);
    let (cdx, cdy) = (c[0] - d[0], c[1] - d[1]);
    let ad = adx * adx + ady * ady;
    let bd = bdx * bdx + bdy * bdy;
    let cd = cdx * cdx + cdy * cdy;
    let det = adx * (bdy * cd - bd * cdy) - ady * (bdx * cd - bd * cdx) + ad * (bdx * cdy - bdy * cdx);
    det > 0.0
}

/// Delaunay triangles over `coordinates`, as counter-clockwise index triples
///
/// Exact duplicate coordinates are skipped (the first occurrence is used). Fewer than three
/// distinct points, or all points collinear, give no triangles.
pub(crate) fn delaunay(coordinates: &[[f64; 2]]) -> Vec<[usize; 3]> {
    let mut seen = BTreeSet::new();
    let unique: Vec<usize> = (0..coordinates.len())
        .filter(|&i| seen.insert((coordinates[i][0].to_bits(), coordinates[i][1].to_bits())))
        .collect();
    if unique.len() < 3 {
        return Vec::new();
    }

    let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
    let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for &i in &unique {
        let [x, y] = coordinates[i];
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }
    let span = (max_x - min_x).max(max_y - min_y).max(1.0);
    let (mid_x, mid_y) = (0.5 * (min_x + max_x), 0.5 * (min_y + max_y));

    // Vertices 0..n are the input, n..n+3 the enclosing super-triangle
    let n = coordinates.len();
    let mut vertices: Vec<[f64; 2]> = coordinates.to_vec();
    vertices.push([mid_x - 20.0 * span, mid_y - span]);
    vertices.push([mid_x + 20.0 * span, mid_y - span]);
    vertices.push([mid_x, mid_y + 20.0 * span]);

    let mut triangles: BTreeMap<usize, [usize; 3]> = BTreeMap::new();
    triangles.insert(0, [n, n + 1, n + 2]);
    let mut next_id = 1;

    for &p in &unique {
        let point = vertices[p];
        let bad: Vec<usize> = triangles
            .iter()
            .filter(|(_, t)| in_circumcircle(vertices[t[0]], vertices[t[1]], vertices[t[2]], point))
            .map(|(&id, _)| id)
            .collect();
        if bad.is_empty() {
            // On an existing circumcircle boundary only; nothing to re-triangulate
            continue;
        }

        let mut edges: Vec<(usize, usize)> = Vec::with_capacity(3 * bad.len());
        for id in &bad {
            let t = triangles[id];
            edges.extend([(t[0], t[1]), (t[1], t[2]), (t[2], t[0])]);
        }
        let directed: BTreeSet<(usize, usize)> = edges.iter().copied().collect();
        let boundary: Vec<(usize, usize)> = edges
            .into_iter()
            .filter(|&(a, b)| !directed.contains(&(b, a)))
            .collect();

        for id in bad {
            triangles.remove(&id);
        }
        for (a, b) in boundary {
            if orientation(vertices[a], vertices[b], point) > 0.0 {
                triangles.insert(next_id, [a, b, p]);
                next_id += 1;
            }
        }
    }

    triangles
        .into_values()
        .filter(|t| t.iter().all(|&v| v < n))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn area(coordinates: &[[f64; 2]], t: &[usize; 3]) -> f64 {
        0.5 * orientation(coordinates[t[0]], coordinates[t[1]], coordinates[t[2]])
    }

    #[test]
    fn square_gives_two_triangles() {
        let coordinates = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];
        let triangles = delaunay(&coordinates);
        assert_eq!(triangles.len(), 2);
        let total: f64 = triangles.iter().map(|t| area(&coordinates, t)).sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert!(triangles.iter().all(|t| area(&coordinates, t) > 0.0));
    }

    #[test]
    fn grid_covers_hull() {
        let mut coordinates = Vec::new();
        for j in 0..5 {
            for i in 0..6 {
                coordinates.push([i as f64 + 0.01 * j as f64, j as f64]);
            }
        }
        let triangles = delaunay(&coordinates);
        let total: f64 = triangles.iter().map(|t| area(&coordinates, t)).sum();
        assert!((total - 20.0).abs() < 1e-9);
    }

    #[test]
    fn delaunay_property() {
        let coordinates: Vec<[f64; 2]> = (0..40)
            .map(|i| {
                let t = i as f64;
                [(t * 7.31) % 10.0, (t * 3.17) % 6.0]
            })
            .collect();
        let triangles = delaunay(&coordinates);
        assert!(!triangles.is_empty());
        for t in &triangles {
            for (k, &c) in coordinates.iter().enumerate() {
                if t.contains(&k) {
                    continue;
                }
                assert!(!in_circumcircle(
                    coordinates[t[0]],
                    coordinates[t[1]],
                    coordinates[t[2]],
                    c
                ));
            }
        }
    }

    #[test]
    fn duplicates_and_degenerate_input() {
        assert!(delaunay(&[[0.0, 0.0], [1.0, 0.0]]).is_empty());
        assert!(delaunay(&[[0.0, 0.0], [1.0, 0.0], [2.0, 0.0]]).is_empty());

        let with_duplicate = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 0.0]];
        let triangles = delaunay(&with_duplicate);
        assert_eq!(triangles, vec![[0, 1, 2]]);
    }

    #[test]
    fn anti_meridian_is_contiguous() {
        let points: Vec<Point3> = [(0.0, 179.0), (0.0, -179.0), (1.0, 179.0), (1.0, -179.0)]
            .iter()
            .map(|&(lat, lon)| Point3::from_lat_lon(lat, lon))
            .collect();
        let planar = planar_coordinates(&points);
        let width = planar.iter().map(|c| c[0]).fold(f64::NEG_INFINITY, f64::max)
            - planar.iter().map(|c| c[0]).fold(f64::INFINITY, f64::min);
        assert!((width - 2.0).abs() < 1e-9);
    }
}
