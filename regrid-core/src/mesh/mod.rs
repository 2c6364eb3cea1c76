//! Finite-element meshes over source point sets
//!
//! A [`Mesh`] is built once per source identity and reused for every target grid. Structured
//! sources ([`GridStructure`](crate::spatial::GridStructure)) get one quadrilateral per grid
//! cell; unstructured sources are triangulated. Target points are located with
//! [`Mesh::project`], which returns barycentric (triangle) or bilinear (quad) weights.

mod projector;
mod triangulation;

pub use projector::{Projection, ProjectionKind};

use crate::errors::RegridResult;
use crate::search::SpatialIndex;
use crate::spatial::{GridStructure, Point3, PointSet};
use log::debug;

/// A mesh element, as indices into the source points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Element {
    Triangle([usize; 3]),
    /// Vertices in the order `v00, v10, v11, v01`
    Quad([usize; 4]),
}

impl Element {
    pub fn vertices(&self) -> &[usize] {
        match self {
            Element::Triangle(v) => &v[..],
            Element::Quad(v) => &v[..],
        }
    }
}

/// Elements over a source point set, with search structures for locating target points
#[derive(Debug, Clone)]
pub struct Mesh {
    identity: String,
    points: Vec<Point3>,
    elements: Vec<Element>,
    /// Element centroids (payload: element number); absent when there are no elements
    centroids: Option<SpatialIndex>,
    vertices: SpatialIndex,
}

impl Mesh {
    /// Build the mesh for a source point set
    pub fn build(source: &dyn PointSet) -> RegridResult<Self> {
        let points = source.points();
        let elements = match source.structure() {
            Some(structure) if structure.ni * structure.nj == points.len() => quads(structure),
            _ => {
                let planar = triangulation::planar_coordinates(&points);
                triangulation::delaunay(&planar)
                    .into_iter()
                    .map(Element::Triangle)
                    .collect()
            }
        };
        debug!(
            "Mesh::build {}: {} points, {} elements",
            source.identity(),
            points.len(),
            elements.len()
        );
        Self::from_elements(source.identity(), points, elements)
    }

    /// Wrap explicit elements over `points`
    pub fn from_elements(
        identity: impl Into<String>,
        points: Vec<Point3>,
        elements: Vec<Element>,
    ) -> RegridResult<Self> {
        let vertices = SpatialIndex::from_points(points.clone())?;
        let centroids = if elements.is_empty() {
            None
        } else {
            let entries = elements
                .iter()
                .enumerate()
                .map(|(e, element)| (centroid(&points, element), e))
                .collect();
            Some(SpatialIndex::from_entries(entries)?)
        };
        Ok(Self {
            identity: identity.into(),
            points,
            elements,
            centroids,
            vertices,
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn number_of_points(&self) -> usize {
        self.points.len()
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    /// Approximate memory use in bytes
    pub fn footprint(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.points.len() * std::mem::size_of::<Point3>() * 2
            + self.elements.len() * (std::mem::size_of::<Element>() + std::mem::size_of::<Point3>())
    }
}

/// Centroid of an element, pushed out onto the unit sphere
fn centroid(points: &[Point3], element: &Element) -> Point3 {
    let vertices = element.vertices();
    let (mut x, mut y, mut z) = (0.0, 0.0, 0.0);
    for &v in vertices {
        x += points[v].x();
        y += points[v].y();
        z += points[v].z();
    }
    let c = Point3::new(x, y, z);
    let norm = c.norm();
    if norm > 0.0 {
        c.scale(1.0 / norm)
    } else {
        c
    }
}

/// One quadrilateral per cell of a structured grid
fn quads(structure: GridStructure) -> Vec<Element> {
    let GridStructure { ni, nj, periodic } = structure;
    if ni < 2 || nj < 2 {
        return Vec::new();
    }
    let columns = if periodic { ni } else { ni - 1 };
    let mut elements = Vec::with_capacity(columns * (nj - 1));
    for j in 0..nj - 1 {
        for i in 0..columns {
            let i1 = (i + 1) % ni;
            elements.push(Element::Quad([
                j * ni + i,
                j * ni + i1,
                (j + 1) * ni + i1,
                (j + 1) * ni + i,
            ]));
        }
    }
    elements
}
