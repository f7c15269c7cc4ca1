//! Application services
//!
//! The session guard and the `ProgressTracker` state container that wires
//! the domain engines to a progress store.

pub mod session;
pub mod tracker;
