//! Shared test harness: an in-process mock of the session pool
//!
//! Scripts slot behavior without a server: payload batches are queued per
//! poll, and knobs simulate the failure modes the tailer must handle (slot
//! vanishing, missing decoder plugin, transport errors).

use async_trait::async_trait;
use livetail::{Error, Result, SessionPool, SlotChange, SlotInfo, SlotSession};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("livetail=debug")
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
struct MockState {
    slots: Mutex<HashSet<String>>,
    batches: Mutex<VecDeque<Vec<SlotChange>>>,
    create_calls: AtomicUsize,
    poll_calls: AtomicUsize,
    fail_create_sqlstate: Mutex<Option<String>>,
    vanish_slot_once: AtomicBool,
    transport_error_once: AtomicBool,
}

/// Mock session pool with scripted slot behavior
#[derive(Default)]
pub struct MockDb {
    state: Arc<MockState>,
}

impl MockDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one poll's worth of `(lsn, payload)` rows
    pub fn push_batch(&self, payloads: impl IntoIterator<Item = String>) {
        let rows = payloads
            .into_iter()
            .enumerate()
            .map(|(i, data)| SlotChange {
                lsn: format!("0/{:X}", 0x16B3748 + i),
                data,
            })
            .collect();
        self.state.batches.lock().push_back(rows);
    }

    /// Make every slot creation fail with the given SQLSTATE
    pub fn fail_create_with(&self, sqlstate: &str) {
        *self.state.fail_create_sqlstate.lock() = Some(sqlstate.to_string());
    }

    /// Drop the slot out from under the next poll
    pub fn vanish_slot_once(&self) {
        self.state.vanish_slot_once.store(true, Ordering::SeqCst);
    }

    /// Fail the next poll with a transport error (no SQLSTATE)
    pub fn transport_error_once(&self) {
        self.state.transport_error_once.store(true, Ordering::SeqCst);
    }

    pub fn create_calls(&self) -> usize {
        self.state.create_calls.load(Ordering::SeqCst)
    }

    pub fn poll_calls(&self) -> usize {
        self.state.poll_calls.load(Ordering::SeqCst)
    }

    pub fn has_slot(&self, name: &str) -> bool {
        self.state.slots.lock().contains(name)
    }
}

struct MockSession {
    state: Arc<MockState>,
}

#[async_trait]
impl SessionPool for MockDb {
    async fn acquire(&self) -> Result<Box<dyn SlotSession>> {
        Ok(Box::new(MockSession {
            state: Arc::clone(&self.state),
        }))
    }

    async fn list_slots(&self) -> Result<Vec<SlotInfo>> {
        Ok(self
            .state
            .slots
            .lock()
            .iter()
            .map(|name| SlotInfo {
                slot_name: name.clone(),
                plugin: Some("wal2json".into()),
                slot_type: "logical".into(),
                database: Some("testdb".into()),
                temporary: true,
                active: true,
            })
            .collect())
    }
}

#[async_trait]
impl SlotSession for MockSession {
    async fn create_slot(&self, slot_name: &str) -> Result<()> {
        self.state.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(code) = self.state.fail_create_sqlstate.lock().clone() {
            return Err(Error::db(Some(&code), "could not create replication slot"));
        }
        self.state.slots.lock().insert(slot_name.to_string());
        Ok(())
    }

    async fn drop_slot(&self, slot_name: &str) -> Result<()> {
        if self.state.slots.lock().remove(slot_name) {
            Ok(())
        } else {
            Err(Error::db(
                Some("42704"),
                format!("replication slot \"{slot_name}\" does not exist"),
            ))
        }
    }

    async fn get_changes(&self, slot_name: &str, _add_tables: &str) -> Result<Vec<SlotChange>> {
        self.state.poll_calls.fetch_add(1, Ordering::SeqCst);

        if self.state.transport_error_once.swap(false, Ordering::SeqCst) {
            return Err(Error::db(None, "connection reset by peer"));
        }
        if self.state.vanish_slot_once.swap(false, Ordering::SeqCst) {
            self.state.slots.lock().remove(slot_name);
        }
        if !self.state.slots.lock().contains(slot_name) {
            return Err(Error::db(
                Some("42704"),
                format!("replication slot \"{slot_name}\" does not exist"),
            ));
        }

        Ok(self.state.batches.lock().pop_front().unwrap_or_default())
    }
}

/// wal2json payload with a single insert record
pub fn insert_payload(schema: &str, table: &str, columns: &[(&str, serde_json::Value)]) -> String {
    json!({ "change": [insert_record(schema, table, columns)] }).to_string()
}

/// wal2json payload with several records
pub fn multi_payload(records: Vec<serde_json::Value>) -> String {
    json!({ "change": records }).to_string()
}

pub fn insert_record(
    schema: &str,
    table: &str,
    columns: &[(&str, serde_json::Value)],
) -> serde_json::Value {
    json!({
        "kind": "insert",
        "schema": schema,
        "table": table,
        "columnnames": columns.iter().map(|(n, _)| *n).collect::<Vec<_>>(),
        "columntypes": columns.iter().map(|_| "text").collect::<Vec<_>>(),
        "columnvalues": columns.iter().map(|(_, v)| v.clone()).collect::<Vec<_>>(),
    })
}

pub fn update_payload(schema: &str, table: &str, columns: &[(&str, serde_json::Value)]) -> String {
    json!({
        "change": [{
            "kind": "update",
            "schema": schema,
            "table": table,
            "columnnames": columns.iter().map(|(n, _)| *n).collect::<Vec<_>>(),
            "columntypes": columns.iter().map(|_| "text").collect::<Vec<_>>(),
            "columnvalues": columns.iter().map(|(_, v)| v.clone()).collect::<Vec<_>>(),
            "oldkeys": {
                "keynames": ["id"],
                "keytypes": ["integer"],
                "keyvalues": [0]
            }
        }]
    })
    .to_string()
}

pub fn delete_payload(schema: &str, table: &str, keys: &[(&str, serde_json::Value)]) -> String {
    json!({
        "change": [{
            "kind": "delete",
            "schema": schema,
            "table": table,
            "oldkeys": {
                "keynames": keys.iter().map(|(n, _)| *n).collect::<Vec<_>>(),
                "keytypes": keys.iter().map(|_| "text").collect::<Vec<_>>(),
                "keyvalues": keys.iter().map(|(_, v)| v.clone()).collect::<Vec<_>>(),
            }
        }]
    })
    .to_string()
}
