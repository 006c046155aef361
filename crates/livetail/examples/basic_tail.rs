//! Basic change tailing example
//!
//! Tails a `widgets` table and keeps a count query fresh. Requires a
//! PostgreSQL server with the wal2json plugin and `wal_level = logical`:
//!
//! ```sql
//! create table widgets (id serial primary key, kind text);
//! ```
//!
//! Run with:
//! ```text
//! DATABASE_URL=postgres://postgres@localhost/postgres \
//!     cargo run -p livetail --example basic_tail
//! ```

use livetail::{ChangeTailer, LiveQuery, PgSessionPool, TailConfig};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "livetail=debug,basic_tail=info".into()),
        )
        .init();

    let url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://postgres@localhost/postgres".into());

    let pool = Arc::new(PgSessionPool::connect(&url)?);
    let config = TailConfig::builder()
        .table("widgets")
        .poll_interval(Duration::from_millis(50))
        .build()?;

    let tailer = ChangeTailer::start(pool.as_ref(), config).await?;
    tracing::info!(slot = tailer.slot_name(), "tailing widgets");

    let query_pool = Arc::clone(&pool);
    let mut live = LiveQuery::new(move || {
        let pool = Arc::clone(&query_pool);
        async move {
            let client = pool.pool().get().await?;
            let row = client.query_one("select count(*) from widgets", &[]).await?;
            Ok(row.get::<_, i64>(0))
        }
    })
    .on_insert("widgets", |_row, _last| async { Ok(true) })
    .on_delete("widgets", |_identity, _last| async { Ok(true) })
    .watch(tailer.stream());

    // Insert or delete widgets rows in another session and watch the count.
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = async {
            while let Some(result) = live.recv().await {
                match result {
                    Ok(count) => println!("widgets: {count}"),
                    Err(e) => {
                        eprintln!("live query failed: {e}");
                        break;
                    }
                }
            }
        } => {}
    }

    tailer.teardown().await?;
    Ok(())
}
