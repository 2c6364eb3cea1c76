//! Point sets on the unit sphere
//!
//! Every grid that takes part in weight assembly is seen through the [`PointSet`] trait: an
//! ordered sequence of [`Point3`] values together with a stable identity string. The index of a
//! point in the sequence is the row (for targets) or column (for sources) of the weight matrix.
//!
//! Two concrete providers are included:
//!
//! - [`ListOfPoints`]: an arbitrary list of latitude/longitude pairs with a caller-chosen identity
//! - [`RegularLatLon`]: a global or regional regular latitude/longitude grid
//!
//! # Examples
//!
//! ```rust
//! use regrid_core::spatial::{PointSet, RegularLatLon};
//!
//! let grid = RegularLatLon::global(90.0, 90.0).unwrap();
//! assert_eq!(grid.number_of_points(), 3 * 4);
//! assert_eq!(grid.structure().map(|s| (s.ni, s.nj)), Some((4, 3)));
//!
//! // North pole
//! let p = grid.point_at(0);
//! assert!((p.z() - 1.0).abs() < 1e-12);
//! ```

use crate::errors::{RegridError, RegridResult};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::ops::Sub;

/// Mean earth radius (m) used to convert physical lengths into unit-sphere distances
pub const EARTH_RADIUS: f64 = 6_371_229.0;

/// Convert a great-circle length in metres into a chord length on the unit sphere
///
/// All search radii and kernel widths are compared against 3-D chord distances, so physical
/// lengths supplied in configuration go through this conversion once.
pub fn chord_from_metres(length: f64) -> f64 {
    let angle = (length / EARTH_RADIUS).min(std::f64::consts::PI);
    2.0 * (0.5 * angle).sin()
}

/// A point in 3-D Cartesian space
///
/// Points built with [`Point3::from_lat_lon`] lie on the unit sphere.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Point3(Vector3<f64>);

impl Point3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self(Vector3::new(x, y, z))
    }

    /// Project a geographic coordinate (degrees) onto the unit sphere
    pub fn from_lat_lon(lat: f64, lon: f64) -> Self {
        let (sin_lat, cos_lat) = lat.to_radians().sin_cos();
        let (sin_lon, cos_lon) = lon.to_radians().sin_cos();
        Self::new(cos_lat * cos_lon, cos_lat * sin_lon, sin_lat)
    }

    /// Geographic coordinate (degrees) of the direction of this point
    ///
    /// Longitudes are returned in `(-180, 180]`.
    pub fn to_lat_lon(&self) -> (f64, f64) {
        let lat = self.z().atan2(self.x().hypot(self.y())).to_degrees();
        let lon = self.y().atan2(self.x()).to_degrees();
        (lat, lon)
    }

    pub fn x(&self) -> f64 {
        self.0.x
    }

    pub fn y(&self) -> f64 {
        self.0.y
    }

    pub fn z(&self) -> f64 {
        self.0.z
    }

    pub fn coordinates(&self) -> [f64; 3] {
        [self.0.x, self.0.y, self.0.z]
    }

    /// Coordinate along `axis` (0, 1 or 2)
    pub fn axis(&self, axis: usize) -> f64 {
        self.0[axis]
    }

    /// The underlying vector
    pub fn as_vector(&self) -> &Vector3<f64> {
        &self.0
    }

    /// Squared Euclidean distance
    pub fn distance2(&self, other: &Point3) -> f64 {
        (self.0 - other.0).norm_squared()
    }

    /// Euclidean (chord) distance
    pub fn distance(&self, other: &Point3) -> f64 {
        self.distance2(other).sqrt()
    }

    pub fn dot(&self, other: &Point3) -> f64 {
        self.0.dot(&other.0)
    }

    pub fn cross(&self, other: &Point3) -> Point3 {
        Point3(self.0.cross(&other.0))
    }

    pub fn norm(&self) -> f64 {
        self.0.norm()
    }

    pub fn scale(&self, factor: f64) -> Point3 {
        Point3(self.0 * factor)
    }
}

impl Sub for Point3 {
    type Output = Point3;

    fn sub(self, rhs: Point3) -> Point3 {
        Point3(self.0 - rhs.0)
    }
}

/// Logical shape of a structured grid
///
/// Points are numbered row by row: index `j * ni + i` for column `i` of row `j`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridStructure {
    /// Points per row (west to east)
    pub ni: usize,
    /// Number of rows (north to south)
    pub nj: usize,
    /// Whether the last column connects back to the first
    pub periodic: bool,
}

/// An ordered, index-addressable set of points
///
/// Implementations must guarantee that two point sets reporting the same [`identity`]
/// yield the same point sequence, since the identity is used to address cached weights.
///
/// [`identity`]: PointSet::identity
pub trait PointSet: Send + Sync {
    /// Number of points in the set
    fn number_of_points(&self) -> usize;

    /// Point at position `index`
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.number_of_points()`
    fn point_at(&self, index: usize) -> Point3;

    /// Stable identity of the point sequence
    fn identity(&self) -> String;

    /// Row/column structure, if the points form a structured grid
    fn structure(&self) -> Option<GridStructure> {
        None
    }

    /// Collect all points into a vector
    fn points(&self) -> Vec<Point3> {
        (0..self.number_of_points())
            .map(|i| self.point_at(i))
            .collect()
    }
}

/// An unstructured list of geographic points
#[derive(Clone, Debug, PartialEq)]
pub struct ListOfPoints {
    identity: String,
    latitudes: Vec<f64>,
    longitudes: Vec<f64>,
    points: Vec<Point3>,
}

impl ListOfPoints {
    /// Build from parallel latitude and longitude arrays (degrees)
    pub fn new(
        identity: impl Into<String>,
        latitudes: Vec<f64>,
        longitudes: Vec<f64>,
    ) -> RegridResult<Self> {
        if latitudes.len() != longitudes.len() {
            return Err(RegridError::DimensionMismatch {
                what: "longitudes".to_string(),
                expected: latitudes.len(),
                got: longitudes.len(),
            });
        }
        if let Some(lat) = latitudes.iter().find(|lat| !(-90.0..=90.0).contains(*lat)) {
            return Err(RegridError::InvalidConfiguration(format!(
                "latitude {lat} outside [-90, 90]"
            )));
        }
        let points = latitudes
            .iter()
            .zip(longitudes.iter())
            .map(|(&lat, &lon)| Point3::from_lat_lon(lat, lon))
            .collect();
        Ok(Self {
            identity: identity.into(),
            latitudes,
            longitudes,
            points,
        })
    }

    pub fn latitudes(&self) -> &[f64] {
        &self.latitudes
    }

    pub fn longitudes(&self) -> &[f64] {
        &self.longitudes
    }
}

impl PointSet for ListOfPoints {
    fn number_of_points(&self) -> usize {
        self.points.len()
    }

    fn point_at(&self, index: usize) -> Point3 {
        self.points[index]
    }

    fn identity(&self) -> String {
        self.identity.clone()
    }
}

/// A regular latitude/longitude grid
///
/// Rows run from `north` to `south`, columns from `west` to `east`, both bounds inclusive.
/// A grid whose columns cover the full circle is periodic in longitude.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegularLatLon {
    north: f64,
    west: f64,
    south: f64,
    east: f64,
    ni: usize,
    nj: usize,
}

impl RegularLatLon {
    /// A regular grid over a bounding box with `ni` columns and `nj` rows
    pub fn new(
        north: f64,
        west: f64,
        south: f64,
        east: f64,
        ni: usize,
        nj: usize,
    ) -> RegridResult<Self> {
        if ni == 0 || nj == 0 {
            return Err(RegridError::InvalidConfiguration(
                "regular grid needs at least one row and one column".to_string(),
            ));
        }
        if north < south || !(-90.0..=90.0).contains(&north) || !(-90.0..=90.0).contains(&south) {
            return Err(RegridError::InvalidConfiguration(format!(
                "invalid latitude bounds north={north} south={south}"
            )));
        }
        if east < west || east - west >= 360.0 {
            return Err(RegridError::InvalidConfiguration(format!(
                "invalid longitude bounds west={west} east={east}"
            )));
        }
        if (ni == 1) != (east == west) || (nj == 1) != (north == south) {
            return Err(RegridError::InvalidConfiguration(
                "bounds inconsistent with the number of rows and columns".to_string(),
            ));
        }
        Ok(Self {
            north,
            west,
            south,
            east,
            ni,
            nj,
        })
    }

    /// A global grid with the given increments (degrees), including both poles
    pub fn global(increment_lat: f64, increment_lon: f64) -> RegridResult<Self> {
        let nj = Self::divisions(180.0, increment_lat)? + 1;
        let ni = Self::divisions(360.0, increment_lon)?;
        Self::new(90.0, 0.0, -90.0, 360.0 - increment_lon, ni, nj)
    }

    fn divisions(range: f64, increment: f64) -> RegridResult<usize> {
        let n = range / increment;
        if increment <= 0.0 || (n - n.round()).abs() > 1e-9 {
            return Err(RegridError::InvalidConfiguration(format!(
                "increment {increment} does not divide {range} degrees"
            )));
        }
        Ok(n.round() as usize)
    }

    fn increments(&self) -> (f64, f64) {
        let di = if self.ni > 1 {
            (self.east - self.west) / (self.ni - 1) as f64
        } else {
            0.0
        };
        let dj = if self.nj > 1 {
            (self.north - self.south) / (self.nj - 1) as f64
        } else {
            0.0
        };
        (di, dj)
    }

    pub fn latitude(&self, j: usize) -> f64 {
        self.north - j as f64 * self.increments().1
    }

    pub fn longitude(&self, i: usize) -> f64 {
        self.west + i as f64 * self.increments().0
    }

    /// True when the columns wrap around the full circle
    pub fn is_periodic(&self) -> bool {
        let (di, _) = self.increments();
        self.ni > 1 && ((self.east - self.west + di) - 360.0).abs() < 1e-9
    }
}

impl PointSet for RegularLatLon {
    fn number_of_points(&self) -> usize {
        self.ni * self.nj
    }

    fn point_at(&self, index: usize) -> Point3 {
        assert!(index < self.number_of_points(), "point index out of range");
        let (j, i) = (index / self.ni, index % self.ni);
        Point3::from_lat_lon(self.latitude(j), self.longitude(i))
    }

    fn identity(&self) -> String {
        format!(
            "regular-ll-{}x{}-n{}-w{}-s{}-e{}",
            self.ni, self.nj, self.north, self.west, self.south, self.east
        )
    }

    fn structure(&self) -> Option<GridStructure> {
        Some(GridStructure {
            ni: self.ni,
            nj: self.nj,
            periodic: self.is_periodic(),
        })
    }
}
