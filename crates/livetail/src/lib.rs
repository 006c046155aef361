//! # livetail - live queries over PostgreSQL logical replication
//!
//! Tails a database's write-ahead log through a temporary wal2json
//! replication slot and keeps user queries continuously fresh: row changes
//! are decoded into typed events, fanned out on a multicast stream, and fed
//! through per-table predicates that decide when a query must re-run.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   poll    ┌─────────┐  decode  ┌──────────────┐
//! │ PostgreSQL │──────────▶│ Change  │─────────▶│ ChangeStream │
//! │    WAL     │ wal2json  │ Tailer  │          │  (multicast) │
//! └────────────┘   slot    └─────────┘          └──────┬───────┘
//!                                                      │ events
//!                                            ┌─────────▼─────────┐
//!                                            │     LiveQuery     │
//!                                            │ predicates → runs │
//!                                            └─────────┬─────────┘
//!                                                      ▼
//!                                               fresh results
//! ```
//!
//! The tailer owns one dedicated pooled session for its slot's entire
//! lifetime (temporary slots die with their session). Query re-runs are
//! coalesced: at most one execution in flight, at most one follow-up queued
//! per burst, and every accepted invalidation is covered by a run that starts
//! after it.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! # #[cfg(feature = "postgres")]
//! # async fn example() -> anyhow::Result<()> {
//! use livetail::{ChangeTailer, LiveQuery, PgSessionPool, TailConfig};
//!
//! let pool = PgSessionPool::connect("postgres://app@localhost/shop")?;
//! let config = TailConfig::builder().table("widgets").build()?;
//! let tailer = ChangeTailer::start(&pool, config).await?;
//!
//! let mut live = LiveQuery::new(|| async { Ok(42u32) })
//!     .on_insert("widgets", |_row, _last| async { Ok(true) })
//!     .watch(tailer.stream());
//!
//! while let Some(result) = live.recv().await {
//!     println!("fresh result: {:?}", result?);
//! }
//!
//! tailer.teardown().await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod decoder;
mod error;
mod event;
mod live;
mod poller;
mod session;
mod slot;
mod stream;
mod tailer;

pub use config::{TailConfig, TailConfigBuilder, DEFAULT_POLL_INTERVAL, DEFAULT_SCHEMA, SLOT_NAME_PREFIX};
pub use error::{Error, Result, SQLSTATE_UNDEFINED_FILE, SQLSTATE_UNDEFINED_OBJECT};
pub use event::{ChangeEvent, EventKind, RowMap};
pub use live::{LiveQuery, LiveQueryHandle};
pub use session::{SessionPool, SlotChange, SlotInfo, SlotSession};
pub use stream::{ChangeStream, StreamSignal, Subscription};
pub use tailer::ChangeTailer;

// PostgreSQL backend - feature-gated
#[cfg(feature = "postgres")]
mod postgres;

#[cfg(feature = "postgres")]
pub use postgres::{PgSessionPool, PgSlotSession};
