//! Database access for paddock-sync
//!
//! One module per entity. Write functions take `&mut SqliteConnection` so
//! every write belonging to one reconcile unit can share a single
//! transaction; read functions take the pool.

pub mod classes;
pub mod events;
pub mod refdata;
pub mod seasons;
pub mod series;
pub mod slots;
pub mod sync_runs;

use uuid::Uuid;

/// Result of an upsert: the row guid and whether the row was created
#[derive(Debug, Clone, Copy)]
pub struct Upserted {
    pub guid: Uuid,
    pub created: bool,
}

/// Decode a TEXT guid column written by this crate
pub(crate) fn parse_guid(s: &str) -> Result<Uuid, sqlx::Error> {
    Uuid::parse_str(s).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}
