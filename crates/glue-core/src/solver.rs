//! Seam to the expensive fine-grained physics solver.

use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

use crate::model::{FluidState, TransportProperties, DIFFUSION_LEN, MAX_SPECIES};

/// Failure of a fine-grain solver invocation. Never cached.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SolverError {
    #[error("solver failed to converge: {0}")]
    NonConvergence(String),

    #[error("state outside valid physical regime: {0}")]
    InvalidRegime(String),

    #[error("solver error: {0}")]
    Other(String),
}

/// The fine-grained solver collaborator.
///
/// Invocations are synchronous, potentially very slow (seconds to hours), and
/// have no knowledge of the cache. The dispatch engine is responsible for
/// calling this at most once per distinct state key.
pub trait FineGrainSolver: Send + Sync {
    fn run(&self, state: &FluidState) -> Result<TransportProperties, SolverError>;
}

/// Deterministic stub solver that counts its invocations.
///
/// Produces synthetic but input-dependent transport properties, so tests can
/// both count solver calls and check that distinct states yield distinct
/// results.
#[derive(Debug, Default)]
pub struct CountingSolver {
    calls: AtomicU64,
    fail_with: Option<SolverError>,
}

impl CountingSolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// A stub that always fails with the given error.
    pub fn failing(err: SolverError) -> Self {
        Self {
            calls: AtomicU64::new(0),
            fail_with: Some(err),
        }
    }

    /// Number of times `run` was invoked.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FineGrainSolver for CountingSolver {
    fn run(&self, state: &FluidState) -> Result<TransportProperties, SolverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.fail_with {
            return Err(err.clone());
        }
        let mut diffusion = [0.0; DIFFUSION_LEN];
        for (i, d) in diffusion.iter_mut().enumerate() {
            *d = state.temperature * 1e-6 * (i + 1) as f64;
        }
        let total_density: f64 = state.density.iter().sum();
        let mean_charge: f64 = state.charges.iter().sum::<f64>() / MAX_SPECIES as f64;
        Ok(TransportProperties {
            viscosity: state.temperature * 1e-3 + total_density * 1e-2,
            thermal_conductivity: state.temperature * 1e-2 + mean_charge,
            diffusion,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting_solver_counts_and_is_deterministic() {
        let solver = CountingSolver::new();
        let state = FluidState::new(300.0, [1.0, 0.0, 0.0, 0.0], [1.0, 0.0, 0.0, 0.0]);

        let a = solver.run(&state).unwrap();
        let b = solver.run(&state).unwrap();
        assert_eq!(a, b);
        assert_eq!(solver.calls(), 2);
    }

    #[test]
    fn test_counting_solver_distinguishes_states() {
        let solver = CountingSolver::new();
        let a = solver
            .run(&FluidState::new(300.0, [1.0, 0.0, 0.0, 0.0], [1.0, 0.0, 0.0, 0.0]))
            .unwrap();
        let b = solver
            .run(&FluidState::new(350.0, [1.0, 0.0, 0.0, 0.0], [1.0, 0.0, 0.0, 0.0]))
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_failing_stub_reports_its_error() {
        let solver = CountingSolver::failing(SolverError::NonConvergence("diverged".into()));
        let state = FluidState::new(300.0, [1.0, 0.0, 0.0, 0.0], [1.0, 0.0, 0.0, 0.0]);
        let err = solver.run(&state).unwrap_err();
        assert!(matches!(err, SolverError::NonConvergence(_)));
        assert_eq!(solver.calls(), 1);
    }
}
