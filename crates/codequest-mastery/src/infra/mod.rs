//! Infrastructure layer
//!
//! Persistence port and storage backends.

pub mod progress_store;

pub use progress_store::{Commit, InMemoryStore, ProfileUpdate, ProgressStore, ProgressUpdate, StoreError};
