//! Where weight computations run
//!
//! Computing a matrix on a cache miss can be expensive and, for large meshes, fragile.
//! A [`ComputeIsolation`] decides how the computation is executed; whatever it chooses, the
//! result must be identical to running the computation directly.

use crate::config::Isolation;
use crate::errors::{RegridError, RegridResult};
use crate::matrix::WeightMatrix;
use log::debug;
use std::any::Any;
use std::sync::Arc;

/// A weight computation handed to a [`ComputeIsolation`]
pub type Computation<'a> = Box<dyn FnOnce() -> RegridResult<WeightMatrix> + Send + 'a>;

/// Strategy for running weight computations
pub trait ComputeIsolation: Send + Sync {
    /// Run `compute`, blocking until it completes
    ///
    /// `key` identifies the computation in errors and logs.
    fn run(&self, key: &str, compute: Computation<'_>) -> RegridResult<WeightMatrix>;
}

/// Run on the calling thread
#[derive(Debug, Default, Clone, Copy)]
pub struct InProcess;

impl ComputeIsolation for InProcess {
    fn run(&self, _key: &str, compute: Computation<'_>) -> RegridResult<WeightMatrix> {
        compute()
    }
}

/// Run on a dedicated thread and report a panic as [`RegridError::ChildProcessFailure`]
#[derive(Debug, Default, Clone, Copy)]
pub struct WorkerThread;

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

impl ComputeIsolation for WorkerThread {
    fn run(&self, key: &str, compute: Computation<'_>) -> RegridResult<WeightMatrix> {
        debug!("Computing {} on a worker thread", key);
        std::thread::scope(|scope| {
            let worker = std::thread::Builder::new()
                .name("regrid-weights".to_string())
                .spawn_scoped(scope, compute)?;
            worker
                .join()
                .map_err(|payload| RegridError::ChildProcessFailure {
                    key: key.to_string(),
                    reason: panic_message(payload.as_ref()),
                })?
        })
    }
}

impl Isolation {
    /// The strategy selected by this configuration value
    pub fn strategy(&self) -> Arc<dyn ComputeIsolation> {
        match self {
            Isolation::InProcess => Arc::new(InProcess),
            Isolation::WorkerThread => Arc::new(WorkerThread),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_strategies_agree() {
        let input = 7;
        for isolation in [Isolation::InProcess, Isolation::WorkerThread] {
            let compute: Computation = Box::new(move || Ok(WeightMatrix::identity(input)));
            let result = isolation.strategy().run("identity", compute).unwrap();
            assert_eq!(result, WeightMatrix::identity(7));
        }
    }

    #[test]
    fn errors_are_returned_unchanged() {
        let compute: Computation = Box::new(|| Err(RegridError::EmptyIndex));
        let result = WorkerThread.run("empty", compute);
        assert!(matches!(result, Err(RegridError::EmptyIndex)));
    }

    #[test]
    fn worker_panic_is_reported() {
        let compute: Computation = Box::new(|| -> RegridResult<WeightMatrix> {
            panic!("mesh generation failed")
        });
        let result = WorkerThread.run("boom", compute);
        match result {
            Err(RegridError::ChildProcessFailure { key, reason }) => {
                assert_eq!(key, "boom");
                assert_eq!(reason, "mesh generation failed");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }
}
