use super::{Element, Mesh};
use crate::spatial::Point3;

/// Tolerance on parametric coordinates when testing element containment
const PARAMETRIC_TOLERANCE: f64 = 1e-10;

/// How a target point was placed in the mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionKind {
    Triangle,
    Quad,
    /// No element contained the point; all weight went to the closest vertex
    NearestVertex,
}

/// Weights of one target point over source vertices
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    /// `(source index, weight)` pairs, one per element vertex
    pub weights: Vec<(usize, f64)>,
    pub kind: ProjectionKind,
}

impl Projection {
    pub fn is_extrapolated(&self) -> bool {
        self.kind == ProjectionKind::NearestVertex
    }
}

/// Intersect the ray from the sphere centre through `p` with triangle `(v0, v1, v2)`
///
/// Returns parametric coordinates `(u, v)` such that the intersection is
/// `v0 + u (v1 − v0) + v (v2 − v0)`.
fn intersect_triangle(p: &Point3, v0: &Point3, v1: &Point3, v2: &Point3) -> Option<(f64, f64)> {
    let e1 = *v1 - *v0;
    let e2 = *v2 - *v0;
    let h = p.cross(&e2);
    let a = e1.dot(&h);
    if a.abs() <= 1e-14 * e1.norm() * e2.norm() * p.norm() {
        // Ray parallel to the plane, or a degenerate element
        return None;
    }
    let f = 1.0 / a;
    let s = Point3::new(0.0, 0.0, 0.0) - *v0;
    let u = f * s.dot(&h);
    let q = s.cross(&e1);
    let v = f * p.dot(&q);
    let t = f * e2.dot(&q);

    let inside = u >= -PARAMETRIC_TOLERANCE
        && v >= -PARAMETRIC_TOLERANCE
        && u + v <= 1.0 + PARAMETRIC_TOLERANCE
        && t > 0.0;
    if !inside {
        return None;
    }
    let (u, v) = (u.clamp(0.0, 1.0), v.clamp(0.0, 1.0));
    let excess = u + v;
    Some(if excess > 1.0 {
        (u / excess, v / excess)
    } else {
        (u, v)
    })
}

impl Mesh {
    /// Weights of the element containing `p`
    fn element_weights(&self, p: &Point3, element: &Element) -> Option<Projection> {
        let pt = |i: usize| &self.points[i];
        match *element {
            Element::Triangle([a, b, c]) => {
                let (u, v) = intersect_triangle(p, pt(a), pt(b), pt(c))?;
                Some(Projection {
                    weights: vec![(a, 1.0 - u - v), (b, u), (c, v)],
                    kind: ProjectionKind::Triangle,
                })
            }
            Element::Quad([v00, v10, v11, v01]) => {
                // Split along the v10-v01 diagonal; the second half is parametrised from v11
                let (s, t) = intersect_triangle(p, pt(v00), pt(v10), pt(v01))
                    .or_else(|| {
                        intersect_triangle(p, pt(v11), pt(v01), pt(v10)).map(|(u, v)| (1.0 - u, 1.0 - v))
                    })?;
                Some(Projection {
                    weights: vec![
                        (v00, (1.0 - s) * (1.0 - t)),
                        (v10, s * (1.0 - t)),
                        (v11, s * t),
                        (v01, (1.0 - s) * t),
                    ],
                    kind: ProjectionKind::Quad,
                })
            }
        }
    }

    /// Locate `p` in the mesh and return its interpolation weights
    ///
    /// The `max_seed_elements` elements with the closest centroids are tested in order of
    /// distance. If none contains the point, the closest mesh vertex takes all the weight
    /// and the projection is flagged as extrapolated.
    pub fn project(&self, p: &Point3, max_seed_elements: usize) -> Projection {
        if let Some(centroids) = &self.centroids {
            for seed in centroids.k_nearest(p, max_seed_elements) {
                if let Some(projection) = self.element_weights(p, &self.elements[seed.payload]) {
                    return projection;
                }
            }
        }
        let nearest = self.vertices.nearest(p);
        Projection {
            weights: vec![(nearest.payload, 1.0)],
            kind: ProjectionKind::NearestVertex,
        }
    }
}
