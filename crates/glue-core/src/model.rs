//! Value types exchanged with the host simulation and the fine-grained solver.

use serde::{Deserialize, Serialize};

use crate::errors::DispatchError;

/// Maximum number of species a request may carry. Unused slots are zero.
pub const MAX_SPECIES: usize = 4;

/// Length of the linearized upper triangle (diagonal included) of the
/// symmetric `MAX_SPECIES x MAX_SPECIES` diffusion matrix.
pub const DIFFUSION_LEN: usize = MAX_SPECIES * (MAX_SPECIES + 1) / 2;

/// Thermodynamic input state for one transport-property request.
///
/// `density[i]` and `charges[i]` always describe the same species. A
/// zero-valued density slot means the species is absent or present at zero
/// density; the cache key does not distinguish the two.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FluidState {
    pub temperature: f64,
    pub density: [f64; MAX_SPECIES],
    pub charges: [f64; MAX_SPECIES],
}

impl FluidState {
    pub fn new(
        temperature: f64,
        density: [f64; MAX_SPECIES],
        charges: [f64; MAX_SPECIES],
    ) -> Self {
        Self {
            temperature,
            density,
            charges,
        }
    }

    /// Reject NaN/Inf before any key, store, or solver access.
    pub fn validate(&self) -> Result<(), DispatchError> {
        for (name, value) in self.named_fields() {
            if !value.is_finite() {
                return Err(DispatchError::InvalidInput(format!(
                    "non-finite {name}: {value}"
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn named_fields(&self) -> impl Iterator<Item = (String, f64)> + '_ {
        std::iter::once(("temperature".to_string(), self.temperature))
            .chain(
                self.density
                    .iter()
                    .enumerate()
                    .map(|(i, &v)| (format!("density[{i}]"), v)),
            )
            .chain(
                self.charges
                    .iter()
                    .enumerate()
                    .map(|(i, &v)| (format!("charges[{i}]"), v)),
            )
    }
}

/// Transport properties produced by the fine-grained solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransportProperties {
    pub viscosity: f64,
    pub thermal_conductivity: f64,
    /// Upper triangle of the symmetric diffusion matrix, linearized with
    /// [`diffusion_index`].
    pub diffusion: [f64; DIFFUSION_LEN],
}

impl TransportProperties {
    /// Diffusion coefficient for the species pair `(i, j)` in either order.
    pub fn coefficient(&self, i: usize, j: usize) -> f64 {
        self.diffusion[diffusion_index(i, j)]
    }
}

/// Canonical row-major upper-triangular index for the species pair `(i, j)`.
///
/// The pair is sorted first, so `(2, 1)` and `(1, 2)` map to the same slot:
/// (0,0)=0 (0,1)=1 (0,2)=2 (0,3)=3 (1,1)=4 (1,2)=5 (1,3)=6 (2,2)=7 (2,3)=8
/// (3,3)=9. Producer and consumer must agree on this order.
pub fn diffusion_index(i: usize, j: usize) -> usize {
    let (lo, hi) = if i <= j { (i, j) } else { (j, i) };
    assert!(
        hi < MAX_SPECIES,
        "species index out of range: ({i}, {j}), max {MAX_SPECIES}"
    );
    lo * MAX_SPECIES - lo * (lo + 1) / 2 + hi
}

/// How a cache entry came to exist. Stored with the entry, never keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    /// Computed by the fine-grained solver through the dispatch engine.
    FineGrain,
    /// Seeded from outside the dispatch path (e.g. imported training data).
    Imported,
}

impl Provenance {
    pub(crate) fn as_i64(self) -> i64 {
        match self {
            Provenance::FineGrain => 0,
            Provenance::Imported => 1,
        }
    }

    pub(crate) fn from_i64(v: i64) -> Self {
        match v {
            1 => Provenance::Imported,
            _ => Provenance::FineGrain,
        }
    }
}

/// Validate a caller-supplied provenance tag.
///
/// Tags are opaque annotations threaded through requests and stored with
/// entries; they never participate in the lookup key.
pub fn validate_tag(tag: &str, max_len: usize) -> Result<(), DispatchError> {
    if tag.len() > max_len {
        return Err(DispatchError::InvalidInput(format!(
            "tag exceeds {max_len} bytes (got {})",
            tag.len()
        )));
    }
    if tag.contains('\0') {
        return Err(DispatchError::InvalidInput(
            "tag contains interior NUL".to_string(),
        ));
    }
    Ok(())
}
