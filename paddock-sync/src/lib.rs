//! paddock-sync library interface
//!
//! Schedule synchronization and recurrence engine: pulls championship /
//! series / season / schedule data from the upstream racing-data provider,
//! reconciles it into the local entity graph, and computes race occurrences
//! on demand instead of materializing every future occurrence as a row.
//!
//! Module map, leaves first:
//! - [`cache`] — get-or-fetch gateway in front of all upstream calls
//! - [`upstream`] — typed provider client with shared rate gate and retry
//! - [`model`] — entity graph and sync-run state machine
//! - [`db`] — per-entity upsert/load functions
//! - [`reconcile`] — idempotent multi-entity upsert with per-round isolation
//! - [`recurrence`] — lazy occurrence computation for pattern events
//! - [`sync`] — task queue, worker pool, and run orchestration

pub mod cache;
pub mod db;
pub mod model;
pub mod reconcile;
pub mod recurrence;
pub mod sync;
pub mod upstream;
