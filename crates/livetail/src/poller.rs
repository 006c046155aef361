//! Periodic change polling
//!
//! One task per stream owns the poll loop: tick, pull decoded changes from
//! the slot, decode, publish. Because the loop is the only reader of the
//! slot's session, polls can never overlap; a tick that fires while the
//! previous poll is still running is skipped and the next tick is the next
//! opportunity (`MissedTickBehavior::Skip`).
//!
//! Transport and decode failures terminate the stream via its error signal;
//! the one-shot slot recovery is handled inside the slot manager.

use crate::decoder::EventDecoder;
use crate::slot::SlotManager;
use crate::stream::ChangeStream;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

pub(crate) async fn run(
    slot: SlotManager,
    decoder: EventDecoder,
    stream: ChangeStream,
    add_tables: String,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!(slot = %slot.slot_name(), "poll loop stopping");
                return;
            }
            _ = ticker.tick() => {
                if let Err(e) = poll_once(&slot, &decoder, &stream, &add_tables).await {
                    stream.error(Arc::new(e));
                    return;
                }
            }
        }
    }
}

async fn poll_once(
    slot: &SlotManager,
    decoder: &EventDecoder,
    stream: &ChangeStream,
    add_tables: &str,
) -> crate::error::Result<()> {
    let rows = slot.get_changes(add_tables).await?;
    if rows.is_empty() {
        return Ok(());
    }

    let mut delivered = 0usize;
    for row in &rows {
        let events = decoder.decode(&row.data)?;
        delivered += events.len();
        for event in events {
            stream.publish(event);
        }
    }
    debug!(
        slot = %slot.slot_name(),
        rows = rows.len(),
        events = delivered,
        "delivered poll batch"
    );
    Ok(())
}
