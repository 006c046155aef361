//! Replication slot lifecycle
//!
//! Creation maps the missing-plugin SQLSTATE to a fatal configuration error.
//! A slot that disappears mid-stream (operator drop, connection churn on the
//! server side) is re-created once on the same session and the failing poll
//! retried; the drop during teardown is best-effort.

use crate::error::{Error, Result, SQLSTATE_UNDEFINED_FILE};
use crate::session::{SlotChange, SlotSession};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Manages one stream's replication slot on its dedicated session
pub(crate) struct SlotManager {
    session: Arc<dyn SlotSession>,
    slot_name: String,
}

impl SlotManager {
    pub(crate) fn new(session: Arc<dyn SlotSession>, slot_name: String) -> Self {
        Self { session, slot_name }
    }

    pub(crate) fn slot_name(&self) -> &str {
        &self.slot_name
    }

    /// Create the temporary slot
    pub(crate) async fn create(&self) -> Result<()> {
        match self.session.create_slot(&self.slot_name).await {
            Ok(()) => {
                info!(slot = %self.slot_name, "created logical replication slot");
                Ok(())
            }
            Err(e) if e.sqlstate() == Some(SQLSTATE_UNDEFINED_FILE) => Err(Error::PluginMissing),
            Err(e) => Err(e),
        }
    }

    /// Pull pending changes, re-creating the slot and retrying exactly once
    /// if the server reports it missing
    pub(crate) async fn get_changes(&self, add_tables: &str) -> Result<Vec<SlotChange>> {
        match self.session.get_changes(&self.slot_name, add_tables).await {
            Err(e) if e.is_slot_missing() => {
                warn!(
                    slot = %self.slot_name,
                    "replication slot disappeared, re-creating and retrying poll"
                );
                self.create().await?;
                self.session.get_changes(&self.slot_name, add_tables).await
            }
            other => other,
        }
    }

    /// Drop the slot, swallowing errors: an already-gone slot still counts
    /// as a successful teardown
    pub(crate) async fn drop_best_effort(&self) {
        if let Err(e) = self.session.drop_slot(&self.slot_name).await {
            debug!(slot = %self.slot_name, error = %e, "ignoring error while dropping slot");
        }
    }
}
