//! Python bindings for weight assembly and caching
//!
//! Exposed as `regrid._lib.core`:
//! - [`PyWeightMatrix`] wrapping an assembled (possibly cached) matrix
//! - [`PyRegistry`] for weights shared through the cache
//! - `assemble` for one-off assembly without caching
//! - `method_names` listing the supported methods

use crate::assembly::{assemble as assemble_weights, AssemblyStatistics};
use crate::config::{CacheConfig, MethodConfig};
use crate::errors::RegridError;
use crate::evaluation::{apply_weights, Field};
use crate::lsm::LandSeaClasses;
use crate::matrix::WeightMatrix;
use crate::method::METHOD_NAMES;
use crate::nonlinear::NonLinearPolicy;
use crate::registry::Registry;
use crate::spatial::ListOfPoints;
use numpy::{IntoPyArray, PyArray1, PyReadonlyArray1};
use pyo3::exceptions::{PyIOError, PyValueError};
use pyo3::prelude::*;
use std::sync::Arc;

impl From<RegridError> for PyErr {
    fn from(e: RegridError) -> Self {
        match e {
            RegridError::Io(_) => PyIOError::new_err(e.to_string()),
            _ => PyValueError::new_err(e.to_string()),
        }
    }
}

fn method_config(config: Option<&Bound<'_, PyAny>>) -> PyResult<MethodConfig> {
    match config {
        Some(config) => pythonize::depythonize_bound::<MethodConfig>(config.clone())
            .map_err(|e| PyValueError::new_err(format!("Invalid method configuration: {}", e))),
        None => Ok(MethodConfig::default()),
    }
}

fn points(
    identity: &str,
    lat: PyReadonlyArray1<f64>,
    lon: PyReadonlyArray1<f64>,
) -> PyResult<ListOfPoints> {
    Ok(ListOfPoints::new(
        identity,
        lat.as_array().to_vec(),
        lon.as_array().to_vec(),
    )?)
}

/// Sparse interpolation weights (target points x source points)
#[pyclass(name = "WeightMatrix", module = "regrid.core")]
#[derive(Clone)]
pub struct PyWeightMatrix {
    inner: Arc<WeightMatrix>,
    statistics: Option<AssemblyStatistics>,
}

#[pymethods]
impl PyWeightMatrix {
    /// (rows, cols)
    #[getter]
    fn shape(&self) -> (usize, usize) {
        self.inner.shape()
    }

    /// Number of stored weights
    #[getter]
    fn nnz(&self) -> usize {
        self.inner.nonzeros()
    }

    /// Column indices and weights of row `r`
    fn row(&self, r: usize) -> PyResult<(Vec<usize>, Vec<f64>)> {
        if r >= self.inner.rows() {
            return Err(PyValueError::new_err(format!(
                "Row {} out of range for {} rows",
                r,
                self.inner.rows()
            )));
        }
        let row = self.inner.row(r);
        Ok((row.columns.to_vec(), row.values.to_vec()))
    }

    /// Statistics of the assembly, if the matrix was assembled directly
    fn statistics(&self, py: Python<'_>) -> PyResult<PyObject> {
        match &self.statistics {
            Some(s) => pythonize::pythonize(py, s)
                .map_err(|e| PyValueError::new_err(e.to_string())),
            None => Ok(py.None()),
        }
    }

    /// Interpolate `values`, optionally treating `missing_value` with `non_linear` policies
    #[pyo3(signature = (values, missing_value=None, non_linear=None))]
    fn apply<'py>(
        &self,
        py: Python<'py>,
        values: PyReadonlyArray1<'py, f64>,
        missing_value: Option<f64>,
        non_linear: Option<&Bound<'py, PyAny>>,
    ) -> PyResult<Bound<'py, PyArray1<f64>>> {
        let policies: Vec<NonLinearPolicy> = match non_linear {
            Some(p) => pythonize::depythonize_bound(p.clone()).map_err(|e| {
                PyValueError::new_err(format!("Invalid non-linear policy: {}", e))
            })?,
            None => Vec::new(),
        };
        let field = Field {
            values: values.as_array().to_vec(),
            missing_value,
        };
        let out = apply_weights(&self.inner, &policies, &field)?;
        Ok(out.values.into_pyarray_bound(py))
    }

    fn __repr__(&self) -> String {
        let (rows, cols) = self.inner.shape();
        format!("<WeightMatrix {}x{} nnz={}>", rows, cols, self.inner.nonzeros())
    }
}

/// Weight caches and meshes shared between calls
#[pyclass(name = "Registry", module = "regrid.core")]
pub struct PyRegistry {
    inner: Registry,
    cache: CacheConfig,
}

#[pymethods]
impl PyRegistry {
    #[new]
    #[pyo3(signature = (cache=None))]
    fn new(cache: Option<&Bound<'_, PyAny>>) -> PyResult<Self> {
        let cache = match cache {
            Some(c) => pythonize::depythonize_bound::<CacheConfig>(c.clone()).map_err(|e| {
                PyValueError::new_err(format!("Invalid cache configuration: {}", e))
            })?,
            None => CacheConfig::default(),
        };
        Ok(Self {
            inner: Registry::new(),
            cache,
        })
    }

    /// Weights between two lists of points, from the cache when possible
    #[allow(clippy::too_many_arguments)]
    #[pyo3(signature = (source_lat, source_lon, source_id, target_lat, target_lon, target_id, config=None, source_lsm=None, target_lsm=None, lsm_id=None))]
    fn weights(
        &self,
        py: Python<'_>,
        source_lat: PyReadonlyArray1<f64>,
        source_lon: PyReadonlyArray1<f64>,
        source_id: &str,
        target_lat: PyReadonlyArray1<f64>,
        target_lon: PyReadonlyArray1<f64>,
        target_id: &str,
        config: Option<&Bound<'_, PyAny>>,
        source_lsm: Option<Vec<bool>>,
        target_lsm: Option<Vec<bool>>,
        lsm_id: Option<String>,
    ) -> PyResult<PyWeightMatrix> {
        let source = points(source_id, source_lat, source_lon)?;
        let target = points(target_id, target_lat, target_lon)?;
        let config = method_config(config)?;
        let lsm = match (source_lsm, target_lsm) {
            (Some(s), Some(t)) => {
                let cacheable = lsm_id.is_some();
                let identity = lsm_id.unwrap_or_else(|| "user".to_string());
                Some(LandSeaClasses::new(identity, s, t, cacheable))
            }
            (None, None) => None,
            _ => {
                return Err(PyValueError::new_err(
                    "Both source_lsm and target_lsm are required",
                ))
            }
        };

        let inner = py.allow_threads(|| {
            self.inner
                .weights(&source, &target, &config, lsm.as_ref(), &self.cache)
        })?;
        Ok(PyWeightMatrix {
            inner,
            statistics: None,
        })
    }

    /// Cache counters as a dict
    fn statistics(&self, py: Python<'_>) -> PyResult<PyObject> {
        let statistics = self.inner.cache(&self.cache).statistics();
        pythonize::pythonize(py, &statistics)
            .map_err(|e| PyValueError::new_err(e.to_string()))
    }

    fn clear(&self) {
        self.inner.clear();
    }
}

/// Assemble weights between two lists of points, without caching
#[pyfunction]
#[pyo3(signature = (source_lat, source_lon, source_id, target_lat, target_lon, target_id, config=None))]
fn assemble(
    py: Python<'_>,
    source_lat: PyReadonlyArray1<f64>,
    source_lon: PyReadonlyArray1<f64>,
    source_id: &str,
    target_lat: PyReadonlyArray1<f64>,
    target_lon: PyReadonlyArray1<f64>,
    target_id: &str,
    config: Option<&Bound<'_, PyAny>>,
) -> PyResult<PyWeightMatrix> {
    let source = points(source_id, source_lat, source_lon)?;
    let target = points(target_id, target_lat, target_lon)?;
    let config = method_config(config)?;
    let (matrix, statistics) =
        py.allow_threads(|| assemble_weights(&source, &target, &config, None, None))?;
    Ok(PyWeightMatrix {
        inner: Arc::new(matrix),
        statistics: Some(statistics),
    })
}

/// Names of the supported interpolation methods
#[pyfunction]
fn method_names() -> Vec<&'static str> {
    METHOD_NAMES.to_vec()
}

#[pymodule]
pub fn core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyWeightMatrix>()?;
    m.add_class::<PyRegistry>()?;
    m.add_function(wrap_pyfunction!(assemble, m)?)?;
    m.add_function(wrap_pyfunction!(method_names, m)?)?;
    Ok(())
}
