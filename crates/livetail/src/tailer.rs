//! Change tailer lifecycle
//!
//! [`ChangeTailer::start`] pins a dedicated session from the pool, creates
//! the stream's temporary replication slot on it, and spawns the poll loop.
//! The session stays exclusive to the poll loop for the stream's lifetime;
//! user queries belong on the caller's own pool.
//!
//! [`ChangeTailer::teardown`] is idempotent and ordered: stop the poller and
//! await any in-flight poll, drop the slot (best effort), release the
//! session, then complete the stream. Subscriptions created after teardown
//! observe an immediate `Complete`.

use crate::config::TailConfig;
use crate::decoder::EventDecoder;
use crate::error::Result;
use crate::poller;
use crate::session::{SessionPool, SlotSession};
use crate::slot::SlotManager;
use crate::stream::ChangeStream;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::info;

struct TailerState {
    torn_down: bool,
    shutdown: Option<watch::Sender<bool>>,
    poller: Option<JoinHandle<()>>,
    session: Option<Arc<dyn SlotSession>>,
}

/// Tails one database's write-ahead log into a [`ChangeStream`]
pub struct ChangeTailer {
    stream: ChangeStream,
    slot_name: String,
    state: Mutex<TailerState>,
}

impl std::fmt::Debug for ChangeTailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeTailer")
            .field("slot_name", &self.slot_name)
            .finish_non_exhaustive()
    }
}

impl ChangeTailer {
    /// Create the slot and start polling
    ///
    /// Fails with [`crate::Error::PluginMissing`] when the server cannot load
    /// wal2json; other slot-creation errors propagate unchanged. On failure
    /// the acquired session is released immediately.
    pub async fn start(pool: &dyn SessionPool, config: TailConfig) -> Result<Self> {
        let session: Arc<dyn SlotSession> = Arc::from(pool.acquire().await?);
        let slot_name = config.slot_name();

        let slot = SlotManager::new(Arc::clone(&session), slot_name.clone());
        slot.create().await?;

        let stream = ChangeStream::new();
        let decoder = EventDecoder::new(&config);
        let add_tables = config.add_tables();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            slot = %slot_name,
            tables = %add_tables,
            interval_ms = config.poll_interval().as_millis() as u64,
            "starting change tailer"
        );

        let poller = tokio::spawn(poller::run(
            slot,
            decoder,
            stream.clone(),
            add_tables,
            config.poll_interval(),
            shutdown_rx,
        ));

        Ok(Self {
            stream,
            slot_name,
            state: Mutex::new(TailerState {
                torn_down: false,
                shutdown: Some(shutdown_tx),
                poller: Some(poller),
                session: Some(session),
            }),
        })
    }

    /// The multicast stream of decoded changes
    pub fn stream(&self) -> &ChangeStream {
        &self.stream
    }

    /// The replication slot this tailer owns
    pub fn slot_name(&self) -> &str {
        &self.slot_name
    }

    /// Stop polling, drop the slot, release the session, complete the stream
    ///
    /// Idempotent: repeat calls return immediately.
    pub async fn teardown(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.torn_down {
            return Ok(());
        }
        state.torn_down = true;

        if let Some(shutdown) = state.shutdown.take() {
            let _ = shutdown.send(true);
        }
        if let Some(poller) = state.poller.take() {
            // Waits out an in-flight poll; no new polls are scheduled.
            let _ = poller.await;
        }
        if let Some(session) = state.session.take() {
            SlotManager::new(Arc::clone(&session), self.slot_name.clone())
                .drop_best_effort()
                .await;
            // Last reference: dropping returns the session to the pool.
            drop(session);
        }
        self.stream.complete();

        info!(slot = %self.slot_name, "change tailer torn down");
        Ok(())
    }
}
