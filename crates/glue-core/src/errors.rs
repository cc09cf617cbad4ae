//! Request-level error taxonomy.
//!
//! Lower layers (codec, store) return their own typed errors and never
//! swallow failures; the dispatch engine is the first layer allowed to make
//! policy decisions, and it chooses to propagate rather than degrade.

use std::fmt::{Display, Formatter};

use thiserror::Error;

use crate::model::TransportProperties;
use crate::solver::SolverError;
use crate::store::StoreError;

/// Failure of a single transport-property request.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DispatchError {
    /// Rejected before any solver or store access (NaN/Inf fields,
    /// malformed tag).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Persistence-layer failure, surfaced to the caller; retry policy
    /// belongs to the host system.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The fine-grained solver could not produce a physically valid result.
    /// Never cached.
    #[error("solver failure: {0}")]
    Solver(#[from] SolverError),
}

/// Aggregate failure of a batch request, best-effort: successful elements
/// keep their results, failed elements carry their own error, positions
/// mirror the input order.
#[derive(Debug, Clone)]
pub struct BatchError {
    /// One outcome per input, in input order.
    pub results: Vec<Result<TransportProperties, DispatchError>>,
}

impl BatchError {
    pub(crate) fn new(results: Vec<Result<TransportProperties, DispatchError>>) -> Self {
        Self { results }
    }

    /// Indices of the inputs whose computation failed.
    pub fn failed_indices(&self) -> Vec<usize> {
        self.results
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.is_err().then_some(i))
            .collect()
    }
}

impl Display for BatchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let failed = self.failed_indices();
        write!(
            f,
            "{} of {} batch elements failed (indices {:?})",
            failed.len(),
            self.results.len(),
            failed
        )
    }
}

impl std::error::Error for BatchError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DIFFUSION_LEN;

    fn ok_props() -> TransportProperties {
        TransportProperties {
            viscosity: 1.0,
            thermal_conductivity: 2.0,
            diffusion: [0.0; DIFFUSION_LEN],
        }
    }

    #[test]
    fn test_batch_error_attributes_indices() {
        let err = BatchError::new(vec![
            Ok(ok_props()),
            Err(DispatchError::InvalidInput("non-finite temperature".into())),
            Ok(ok_props()),
            Err(DispatchError::Solver(SolverError::NonConvergence(
                "diverged".into(),
            ))),
        ]);
        assert_eq!(err.failed_indices(), vec![1, 3]);
        let msg = err.to_string();
        assert!(msg.contains("2 of 4"));
        assert!(msg.contains("[1, 3]"));
    }

    #[test]
    fn test_duplicate_key_is_distinct_from_solver_failure() {
        let dup = DispatchError::Store(StoreError::DuplicateKey("abc123".into()));
        let solver = DispatchError::Solver(SolverError::Other("boom".into()));
        assert_ne!(dup, solver);
        assert!(dup.to_string().contains("duplicate"));
    }
}
