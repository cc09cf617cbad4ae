//! glue-core: persistent transport-property cache between a coarse-grained
//! host simulation and an expensive fine-grained solver.
//!
//! Each distributed rank owns one [`Store`] (a SQLite-backed table of
//! previously computed results). A [`DispatchEngine`] answers single and
//! batched requests for transport properties: tolerance-equivalent states are
//! served from the cache, genuine misses invoke the [`FineGrainSolver`]
//! exactly once per distinct state and persist the result write-through.

mod batch;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod key;
pub mod model;
pub mod solver;
pub mod store;

pub use config::CacheConfig;
pub use dispatch::DispatchEngine;
pub use errors::{BatchError, DispatchError};
pub use key::StateKey;
pub use model::{
    diffusion_index, FluidState, Provenance, TransportProperties, DIFFUSION_LEN, MAX_SPECIES,
};
pub use solver::{CountingSolver, FineGrainSolver, SolverError};
pub use store::{CacheEntry, Store, StoreError};
