//! Database session seam
//!
//! The narrow interface the change tailer consumes from the database driver.
//! A [`SessionPool`] hands out dedicated [`SlotSession`]s; the session that
//! holds a stream's replication slot is pinned to that stream for its entire
//! lifetime (temporary slots die with their session) and is returned to the
//! pool when the boxed handle is dropped.
//!
//! The `postgres` feature provides the production implementation over
//! deadpool-postgres; tests substitute in-process mocks.

use crate::error::Result;
use async_trait::async_trait;

/// One `(lsn, payload)` row returned by a change poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotChange {
    /// WAL position of the change, rendered as `X/XXXXXXXX`
    pub lsn: String,
    /// Raw wal2json document listing zero or more row changes
    pub data: String,
}

/// A row of the replication slot catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    /// Slot name
    pub slot_name: String,
    /// Output plugin, if a logical slot
    pub plugin: Option<String>,
    /// `physical` or `logical`
    pub slot_type: String,
    /// Database the slot belongs to, if a logical slot
    pub database: Option<String>,
    /// Whether the slot dies with its session
    pub temporary: bool,
    /// Whether a session currently holds the slot
    pub active: bool,
}

/// A dedicated database session capable of slot operations
///
/// Dropping the boxed session releases the underlying connection back to its
/// pool, taking any temporary slot with it.
#[async_trait]
pub trait SlotSession: Send + Sync {
    /// Create a temporary wal2json logical replication slot
    async fn create_slot(&self, slot_name: &str) -> Result<()>;

    /// Drop a replication slot
    async fn drop_slot(&self, slot_name: &str) -> Result<()>;

    /// Consume pending changes from the slot, filtered to `add_tables`
    /// (a comma-joined list of `schema.table` names)
    async fn get_changes(&self, slot_name: &str, add_tables: &str) -> Result<Vec<SlotChange>>;
}

/// A pool of database sessions
#[async_trait]
pub trait SessionPool: Send + Sync {
    /// Acquire a dedicated session for a stream's lifetime
    async fn acquire(&self) -> Result<Box<dyn SlotSession>>;

    /// List replication slots known to the server
    async fn list_slots(&self) -> Result<Vec<SlotInfo>>;
}
