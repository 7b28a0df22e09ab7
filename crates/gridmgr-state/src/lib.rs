//! gridmgr-state — embedded state store for the region grid.
//!
//! Persists the three authoritative record families of the control
//! plane: hosts (address + port slot range), regions (identity,
//! coordinates, host/port assignment, running flag), and jobs
//! (asynchronous maintenance work with a mutable status payload).
//!
//! All values are JSON-serialized into redb `&[u8]` value columns.
//! Invariants that span records (coordinate uniqueness, host removal
//! preconditions, the host/port pair) are enforced inside write
//! transactions so concurrent writers cannot observe half-applied
//! state. The store supports both on-disk and in-memory backends
//! (the latter for testing).

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
