//! Interpolation weights between geographic point sets
//!
//! Weights are assembled once per (source, target, method) combination as a sparse
//! [`matrix::WeightMatrix`] and kept in a two-tier [`cache::WeightCache`]. Fields are then
//! interpolated by applying the cached weights, with optional non-linear treatment of
//! missing values at evaluation time.
//!
//! [`registry::Registry`] is the usual entry point.

pub mod assembly;
pub mod cache;
pub mod config;
pub mod lsm;
pub mod matrix;
pub mod mesh;
pub mod method;
pub mod nonlinear;
pub mod python;
pub mod registry;
pub mod search;
pub mod spatial;

pub mod errors;
pub mod evaluation;
