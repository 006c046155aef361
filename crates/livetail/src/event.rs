//! Row change events
//!
//! The unified event type delivered on a change stream. Inserts and updates
//! carry the full post-image `row`; deletes carry only the `identity` columns
//! declared for the table (see the decoder for the narrowing rules).

use serde::{Deserialize, Serialize};

/// Column-name to value mapping, in the order the decoder emitted the columns
pub type RowMap = serde_json::Map<String, serde_json::Value>;

/// A row-level change captured from the write-ahead log
///
/// Serializes with an `"event"` tag, e.g.
/// `{"event":"insert","table":"widgets","row":{...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ChangeEvent {
    /// A new row; `row` holds every column the decoder emitted
    Insert {
        /// Qualified or bare table name, per the stream's naming mode
        table: String,
        /// Post-image columns
        row: RowMap,
    },
    /// An updated row; `row` holds the post-image columns
    Update {
        /// Qualified or bare table name, per the stream's naming mode
        table: String,
        /// Post-image columns
        row: RowMap,
    },
    /// A deleted row; `identity` holds only the declared identity columns
    Delete {
        /// Qualified or bare table name, per the stream's naming mode
        table: String,
        /// Identity columns of the removed row
        identity: RowMap,
    },
}

/// The kind of change an event describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Row inserted
    Insert,
    /// Row updated
    Update,
    /// Row deleted
    Delete,
}

impl ChangeEvent {
    /// The table this event concerns
    pub fn table(&self) -> &str {
        match self {
            Self::Insert { table, .. } | Self::Update { table, .. } | Self::Delete { table, .. } => {
                table
            }
        }
    }

    /// The kind of change
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Insert { .. } => EventKind::Insert,
            Self::Update { .. } => EventKind::Update,
            Self::Delete { .. } => EventKind::Delete,
        }
    }

    /// The payload-bearing field: `row` for insert/update, `identity` for delete
    pub fn payload(&self) -> &RowMap {
        match self {
            Self::Insert { row, .. } | Self::Update { row, .. } => row,
            Self::Delete { identity, .. } => identity,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Insert => write!(f, "insert"),
            EventKind::Update => write!(f, "update"),
            EventKind::Delete => write!(f, "delete"),
        }
    }
}
