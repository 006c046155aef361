//! wal2json payload decoding
//!
//! Converts the raw JSON documents returned by `pg_logical_slot_get_changes`
//! into typed [`ChangeEvent`]s. Each payload carries a `change` array; each
//! element describes one row change with parallel column-name/value arrays
//! (insert/update) or an `oldkeys` triple (delete).
//!
//! Two policies are fixed when the decoder is built:
//!
//! - **Table naming.** If any configured table name contains a dot, events
//!   carry `schema.table`; otherwise the schema prefix is dropped.
//! - **Delete identity.** Delete events expose exactly the declared identity
//!   columns for the table (default `id`). Columns the record does not carry
//!   are absent, not null.

use crate::config::TailConfig;
use crate::error::{Error, Result};
use crate::event::{ChangeEvent, RowMap};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Identity columns assumed for tables absent from the primary key map.
const DEFAULT_IDENTITY: &[&str] = &["id"];

/// One decoded payload from the slot: zero or more row changes for one or
/// more committed transactions.
#[derive(Debug, Deserialize)]
struct SlotPayload {
    #[serde(default)]
    change: Vec<RawChange>,
}

/// A raw wal2json row change
#[derive(Debug, Deserialize)]
struct RawChange {
    kind: String,
    schema: String,
    table: String,
    #[serde(default)]
    columnnames: Vec<String>,
    #[serde(default)]
    columnvalues: Vec<serde_json::Value>,
    #[serde(default)]
    oldkeys: Option<OldKeys>,
}

/// Replica-identity columns of the pre-image
#[derive(Debug, Deserialize)]
struct OldKeys {
    #[serde(default)]
    keynames: Vec<String>,
    #[serde(default)]
    keyvalues: Vec<serde_json::Value>,
}

/// Decoder for one stream's raw slot payloads
pub(crate) struct EventDecoder {
    qualify: bool,
    allowed: HashSet<String>,
    identity: HashMap<String, Vec<String>>,
}

impl EventDecoder {
    pub(crate) fn new(config: &TailConfig) -> Self {
        let qualify = config.qualified_names();
        let emitted = |name: &str| -> String {
            if qualify {
                config.qualify(name)
            } else {
                name.to_string()
            }
        };

        let allowed = config.tables().iter().map(|t| emitted(t)).collect();
        let identity = config
            .primary_key_map()
            .iter()
            .map(|(table, columns)| (emitted(table), columns.clone()))
            .collect();

        Self {
            qualify,
            allowed,
            identity,
        }
    }

    /// Decode one slot payload into events, in record order
    pub(crate) fn decode(&self, data: &str) -> Result<Vec<ChangeEvent>> {
        let payload: SlotPayload = serde_json::from_str(data)
            .map_err(|e| Error::decode(format!("unexpected wal2json shape: {e}")))?;

        let mut events = Vec::with_capacity(payload.change.len());
        for change in payload.change {
            let table = self.emitted_table(&change);

            // The slot filter restricts the source; verify here as well so a
            // stale filter cannot leak foreign tables to subscribers.
            if !self.allowed.contains(&table) {
                debug!(%table, "dropping change for unconfigured table");
                continue;
            }

            match change.kind.as_str() {
                "insert" => events.push(ChangeEvent::Insert {
                    table,
                    row: zip_columns(&change.columnnames, change.columnvalues),
                }),
                "update" => events.push(ChangeEvent::Update {
                    table,
                    row: zip_columns(&change.columnnames, change.columnvalues),
                }),
                "delete" => {
                    let oldkeys = change.oldkeys.ok_or_else(|| {
                        Error::decode(format!("delete record for {table} is missing oldkeys"))
                    })?;
                    let full = zip_columns(&oldkeys.keynames, oldkeys.keyvalues);
                    let identity = self.narrow_identity(&table, full);
                    events.push(ChangeEvent::Delete { table, identity });
                }
                other => {
                    debug!(kind = other, %table, "ignoring unknown change kind");
                }
            }
        }
        Ok(events)
    }

    fn emitted_table(&self, change: &RawChange) -> String {
        if self.qualify {
            format!("{}.{}", change.schema, change.table)
        } else {
            change.table.clone()
        }
    }

    /// Keep only the declared identity columns, in declaration order.
    /// Columns the record did not carry are omitted.
    fn narrow_identity(&self, table: &str, mut full: RowMap) -> RowMap {
        let columns = self
            .identity
            .get(table)
            .map(|c| c.iter().map(String::as_str).collect::<Vec<_>>())
            .unwrap_or_else(|| DEFAULT_IDENTITY.to_vec());

        let mut narrowed = RowMap::new();
        for column in columns {
            if let Some(value) = full.remove(column) {
                narrowed.insert(column.to_string(), value);
            }
        }
        narrowed
    }
}

/// Zip parallel name/value arrays into a map, preserving source order
fn zip_columns(names: &[String], values: Vec<serde_json::Value>) -> RowMap {
    if names.len() != values.len() {
        warn!(
            names = names.len(),
            values = values.len(),
            "column name/value arrays differ in length, zipping to the shorter"
        );
    }
    names
        .iter()
        .cloned()
        .zip(values)
        .collect()
}
