//! Weight assembly
//!
//! [`assemble`] turns a source and a target point set into a [`WeightMatrix`]:
//!
//! 1. if both point sets have the same identity, the identity matrix is returned directly;
//! 2. otherwise every target point is weighted by the configured [`Strategy`], either from
//!    its nearest source points or from the mesh element containing it;
//! 3. the land-sea adjustment (if any) is applied, small weights are pruned;
//! 4. the result is validated and any violation is reported as
//!    [`RegridError::AssemblyInvariantViolation`].
//!
//! Degenerate neighbourhoods (coincident points, collinear neighbours, points outside the
//! mesh) are handled per row by falling back to the nearest source point and are counted in
//! [`AssemblyStatistics`], never raised as errors.

use crate::config::{MethodConfig, NeighbourFallback};
use crate::errors::{RegridError, RegridResult};
use crate::lsm::LandSeaClasses;
use crate::matrix::{ValidationChecks, WeightMatrix, WeightMatrixBuilder};
use crate::mesh::Mesh;
use crate::method::pseudo_laplace::pseudo_laplace_weights;
use crate::method::weighting::Kernel;
use crate::method::Strategy;
use crate::search::{Neighbour, NeighbourSelector, SpatialIndex};
use crate::spatial::{Point3, PointSet};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Summary of a single assembly
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyStatistics {
    /// Number of target points
    pub rows: usize,
    /// Entries in the final matrix
    pub nonzeros: usize,
    /// Rows whose weighting degenerated and fell back to the nearest source point
    pub fallback_rows: usize,
    /// Rows outside the source mesh, weighted from the closest mesh vertex
    pub extrapolated_rows: usize,
    /// Whether the identity fast path was taken
    pub identity: bool,
}

/// Assemble the interpolation weights from `source` to `target`
///
/// `mesh`, if given, must have been built over `source`; it is only used by mesh-based
/// methods, which otherwise build their own.
pub fn assemble(
    source: &dyn PointSet,
    target: &dyn PointSet,
    config: &MethodConfig,
    lsm: Option<&LandSeaClasses>,
    mesh: Option<&Mesh>,
) -> RegridResult<(WeightMatrix, AssemblyStatistics)> {
    config.validate()?;
    let method = &config.method;
    let strategy = method.strategy()?;

    let n_source = source.number_of_points();
    let n_target = target.number_of_points();
    if source.identity() == target.identity() && n_source == n_target {
        debug!(
            "assemble({}): identical source and target {}, using identity",
            method.name(),
            source.identity()
        );
        let matrix = WeightMatrix::identity(n_target);
        let statistics = AssemblyStatistics {
            rows: n_target,
            nonzeros: matrix.nonzeros(),
            identity: true,
            ..Default::default()
        };
        return Ok((matrix, statistics));
    }

    let start = Instant::now();
    let mut statistics = AssemblyStatistics {
        rows: n_target,
        ..Default::default()
    };

    let builder = match strategy {
        Strategy::Neighbours { selector, kernel } => {
            let index = SpatialIndex::build(source)?;
            debug!(
                "assemble({}): index over {} points built in {:?}",
                method.name(),
                index.len(),
                start.elapsed()
            );
            let (selector, kernel) = degrade_selector(selector, kernel, &index, config)?;
            neighbour_weights(target, &index, &selector, &kernel, n_source, &mut statistics)?
        }
        Strategy::PseudoLaplace { nclosest } => {
            let index = SpatialIndex::build(source)?;
            let requested = NeighbourSelector::FixedCount(nclosest);
            let (selector, kernel) = degrade_selector(requested, Kernel::Mean, &index, config)?;
            let equal_weights = config.insufficient_neighbours == NeighbourFallback::EqualWeights
                && selector != requested;
            if equal_weights {
                neighbour_weights(target, &index, &selector, &kernel, n_source, &mut statistics)?
            } else {
                pseudo_laplace(target, &index, &selector, n_source, &mut statistics)?
            }
        }
        Strategy::Mesh { max_seed_elements } => {
            let built;
            let mesh = match mesh {
                Some(mesh) => {
                    if mesh.number_of_points() != n_source {
                        return Err(RegridError::DimensionMismatch {
                            what: format!("mesh {}", mesh.identity()),
                            expected: n_source,
                            got: mesh.number_of_points(),
                        });
                    }
                    mesh
                }
                None => {
                    built = Mesh::build(source)?;
                    &built
                }
            };
            mesh_weights(target, mesh, max_seed_elements, n_source, &mut statistics)?
        }
    };

    let mut matrix = builder.freeze();
    if let Some(lsm) = lsm {
        matrix = lsm.apply(matrix, config.lsm_weight_adjustment)?;
    }
    let matrix = matrix.cleanup(config.prune_epsilon);
    check(&matrix, config)?;

    statistics.nonzeros = matrix.nonzeros();
    debug!(
        "assemble({}): {} -> {} ({}x{}, {} entries, {} fallback rows, {} extrapolated rows) in {:?}",
        method.name(),
        source.identity(),
        target.identity(),
        matrix.rows(),
        matrix.cols(),
        statistics.nonzeros,
        statistics.fallback_rows,
        statistics.extrapolated_rows,
        start.elapsed()
    );
    Ok((matrix, statistics))
}

/// Apply a land-sea adjustment to weights assembled without one
///
/// Used for masks that are not cached with the weights: the unadjusted matrix is shared and
/// the adjustment is applied to a copy.
pub fn adjust_land_sea(
    matrix: &WeightMatrix,
    lsm: &LandSeaClasses,
    config: &MethodConfig,
) -> RegridResult<WeightMatrix> {
    config.validate()?;
    let adjusted = lsm
        .apply(matrix.clone(), config.lsm_weight_adjustment)?
        .cleanup(config.prune_epsilon);
    check(&adjusted, config)?;
    Ok(adjusted)
}

fn check(matrix: &WeightMatrix, config: &MethodConfig) -> RegridResult<()> {
    let method = &config.method;
    let checks = ValidationChecks::assembly(method.is_bounded());
    match matrix.validate(method.name(), checks).into_iter().next() {
        Some(violation) => Err(RegridError::AssemblyInvariantViolation {
            method: method.name().to_string(),
            row: violation.row,
            reason: violation.reason,
        }),
        None => Ok(()),
    }
}

/// Adapt a fixed-count selector to a source with fewer points than requested
fn degrade_selector(
    selector: NeighbourSelector,
    kernel: Kernel,
    index: &SpatialIndex,
    config: &MethodConfig,
) -> RegridResult<(NeighbourSelector, Kernel)> {
    let available = index.len();
    let NeighbourSelector::FixedCount(requested) = selector else {
        return Ok((selector, kernel));
    };
    if requested <= available {
        return Ok((selector, kernel));
    }

    let degraded = NeighbourSelector::FixedCount(available);
    match config.insufficient_neighbours {
        NeighbourFallback::Fail => Err(RegridError::InsufficientNeighbours {
            requested,
            available,
        }),
        NeighbourFallback::ReduceToAvailable => {
            warn!(
                "{}: {} neighbours requested but the source has {} points, using all of them",
                config.method.name(),
                requested,
                available
            );
            Ok((degraded, kernel))
        }
        NeighbourFallback::EqualWeights => {
            warn!(
                "{}: {} neighbours requested but the source has {} points, averaging all of them",
                config.method.name(),
                requested,
                available
            );
            Ok((degraded, Kernel::Mean))
        }
    }
}

/// Put the whole row on the nearest source point
///
/// `neighbours` may be empty, for instance when a radius search found nothing; the index is
/// then asked for the nearest point directly.
fn nearest_fallback(
    builder: &mut WeightMatrixBuilder,
    row: usize,
    index: &SpatialIndex,
    query: &Point3,
    neighbours: &[Neighbour],
) -> RegridResult<()> {
    // Neighbours are ordered by (distance, payload)
    let nearest = match neighbours.first() {
        Some(nearest) => *nearest,
        None => index.nearest(query),
    };
    builder.push(row, nearest.payload, 1.0)
}

fn neighbour_weights(
    target: &dyn PointSet,
    index: &SpatialIndex,
    selector: &NeighbourSelector,
    kernel: &Kernel,
    n_source: usize,
    statistics: &mut AssemblyStatistics,
) -> RegridResult<WeightMatrixBuilder> {
    let n_target = target.number_of_points();
    let mut builder =
        WeightMatrixBuilder::with_capacity(n_target, n_source, n_target * selector.capacity());

    for r in 0..n_target {
        let p = target.point_at(r);
        let neighbours = selector.select(index, &p)?;
        match kernel.weights(&p, &neighbours) {
            Some(weights) => {
                for (n, w) in neighbours.iter().zip(weights) {
                    builder.push(r, n.payload, w)?;
                }
            }
            None => {
                statistics.fallback_rows += 1;
                nearest_fallback(&mut builder, r, index, &p, &neighbours)?;
            }
        }
    }
    Ok(builder)
}

fn pseudo_laplace(
    target: &dyn PointSet,
    index: &SpatialIndex,
    selector: &NeighbourSelector,
    n_source: usize,
    statistics: &mut AssemblyStatistics,
) -> RegridResult<WeightMatrixBuilder> {
    let n_target = target.number_of_points();
    let mut builder =
        WeightMatrixBuilder::with_capacity(n_target, n_source, n_target * selector.capacity());

    for r in 0..n_target {
        let p = target.point_at(r);
        let neighbours = selector.select(index, &p)?;
        match pseudo_laplace_weights(&p, &neighbours) {
            Some(weights) => {
                for (n, w) in neighbours.iter().zip(weights) {
                    builder.push(r, n.payload, w)?;
                }
            }
            None => {
                statistics.fallback_rows += 1;
                nearest_fallback(&mut builder, r, index, &p, &neighbours)?;
            }
        }
    }
    Ok(builder)
}

fn mesh_weights(
    target: &dyn PointSet,
    mesh: &Mesh,
    max_seed_elements: usize,
    n_source: usize,
    statistics: &mut AssemblyStatistics,
) -> RegridResult<WeightMatrixBuilder> {
    let n_target = target.number_of_points();
    let mut builder = WeightMatrixBuilder::with_capacity(n_target, n_source, n_target * 4);

    for r in 0..n_target {
        let projection = mesh.project(&target.point_at(r), max_seed_elements);
        if projection.is_extrapolated() {
            statistics.extrapolated_rows += 1;
        }
        for (c, w) in projection.weights {
            builder.push(r, c, w)?;
        }
    }
    if statistics.extrapolated_rows > 0 {
        debug!(
            "mesh {}: {} of {} target points projected outside the mesh",
            mesh.identity(),
            statistics.extrapolated_rows,
            n_target
        );
    }
    Ok(builder)
}
