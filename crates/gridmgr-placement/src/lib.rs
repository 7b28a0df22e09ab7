//! gridmgr-placement — region placement and lifecycle engine.
//!
//! Assigns regions to hosts with collision-free ports and drives the
//! running/stopped lifecycle over the remote console protocol. Shared,
//! scarce resources (a host's ports, a region's run state) are guarded
//! by an explicit lock registry so concurrent operations never observe
//! the same free port or interleave a state-machine check with another
//! writer's transition.
//!
//! # Architecture
//!
//! ```text
//! PlacementManager
//!   ├── StateStore (authoritative host/region records)
//!   ├── dyn Console (command channel to host agents)
//!   └── LockRegistry (per-region and per-host mutexes)
//! ```

pub mod allocator;
pub mod error;
pub mod locks;
pub mod manager;

pub use allocator::allocate_port;
pub use error::{PlacementError, PlacementResult};
pub use locks::LockRegistry;
pub use manager::PlacementManager;
