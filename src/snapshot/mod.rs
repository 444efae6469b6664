//! Resumable, versioned on-disk snapshots of acquisition state.
//!
//! A snapshot is a JSON envelope:
//!
//! ```json
//! { "schema_version": 1, "kind": "twitter", "saved_at": "...",
//!   "params": { ... }, "state": { ... } }
//! ```
//!
//! `params` hold everything needed to rebuild a collector without
//! re-parsing its query. Credentials are recorded by worker name only.

mod error;
mod store;

pub use error::SnapshotError;
pub use store::{SCHEMA_VERSION, Snapshot, SnapshotId, SnapshotStore};
