//! Live query runner
//!
//! Runs a user-supplied async query, re-running it when changes on the
//! stream are accepted by per-table predicate handlers. Re-runs are
//! coalesced: at most one query execution is in flight, and any burst of
//! invalidations that lands while one is running schedules exactly one
//! follow-up. A queued run starts strictly after the run it follows, so it
//! observes at least every change that was accepted before it started.
//!
//! One task owns the whole state machine, so its transitions never
//! interleave. Handlers are awaited in delivery order; a slow handler delays
//! this runner's own evaluation but never the change stream or its other
//! subscribers.

use crate::error::{Error, Result};
use crate::event::{ChangeEvent, EventKind, RowMap};
use crate::stream::{ChangeStream, StreamSignal, Subscription};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::debug;

type QueryFn<R> = Box<dyn FnMut() -> BoxFuture<'static, anyhow::Result<R>> + Send>;
type Predicate<R> =
    Arc<dyn Fn(RowMap, Option<Arc<R>>) -> BoxFuture<'static, anyhow::Result<bool>> + Send + Sync>;

struct TableHandlers<R> {
    insert: Option<Predicate<R>>,
    update: Option<Predicate<R>>,
    delete: Option<Predicate<R>>,
}

impl<R> Default for TableHandlers<R> {
    fn default() -> Self {
        Self {
            insert: None,
            update: None,
            delete: None,
        }
    }
}

/// Builder for a live query: an async query plus the change predicates that
/// invalidate it
///
/// A table or event kind without a handler is ignored. Each predicate
/// receives the event payload (`row` for insert/update, `identity` for
/// delete) and the last query result, and decides whether the change
/// invalidates that result.
///
/// ```ignore
/// let mut live = LiveQuery::new(move || {
///         let db = db.clone();
///         async move { db.fetch_widgets().await }
///     })
///     .on_insert("widgets", |_row, _last| async { Ok(true) })
///     .on_delete("widgets", |identity, _last| async move {
///         Ok(identity.contains_key("id"))
///     })
///     .watch(tailer.stream());
///
/// while let Some(result) = live.recv().await {
///     println!("fresh: {:?}", result?);
/// }
/// ```
pub struct LiveQuery<R> {
    query: QueryFn<R>,
    handlers: HashMap<String, TableHandlers<R>>,
}

impl<R: Send + Sync + 'static> LiveQuery<R> {
    /// Create a live query from an async thunk
    pub fn new<Q, Fut>(mut query: Q) -> Self
    where
        Q: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        Self {
            query: Box::new(move || -> BoxFuture<'static, anyhow::Result<R>> {
                Box::pin(query())
            }),
            handlers: HashMap::new(),
        }
    }

    /// Invalidate on inserts into `table` accepted by `predicate`
    pub fn on_insert<F, Fut>(self, table: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(RowMap, Option<Arc<R>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        self.on(table, EventKind::Insert, predicate)
    }

    /// Invalidate on updates to `table` accepted by `predicate`
    pub fn on_update<F, Fut>(self, table: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(RowMap, Option<Arc<R>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        self.on(table, EventKind::Update, predicate)
    }

    /// Invalidate on deletes from `table` accepted by `predicate`
    ///
    /// The predicate receives the identity columns, not a full row.
    pub fn on_delete<F, Fut>(self, table: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(RowMap, Option<Arc<R>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        self.on(table, EventKind::Delete, predicate)
    }

    fn on<F, Fut>(mut self, table: impl Into<String>, kind: EventKind, predicate: F) -> Self
    where
        F: Fn(RowMap, Option<Arc<R>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        let predicate: Predicate<R> = Arc::new(
            move |payload, last| -> BoxFuture<'static, anyhow::Result<bool>> {
                Box::pin(predicate(payload, last))
            },
        );
        let entry = self.handlers.entry(table.into()).or_default();
        match kind {
            EventKind::Insert => entry.insert = Some(predicate),
            EventKind::Update => entry.update = Some(predicate),
            EventKind::Delete => entry.delete = Some(predicate),
        }
        self
    }

    /// Subscribe to the stream and start the runner
    ///
    /// The query runs once immediately; its result is the first emission.
    pub fn watch(self, stream: &ChangeStream) -> LiveQueryHandle<R> {
        let changes = stream.subscribe();
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        tokio::spawn(run(
            self.query,
            self.handlers,
            changes,
            results_tx,
            cancel_rx,
        ));

        LiveQueryHandle {
            results: results_rx,
            cancel: cancel_tx,
        }
    }
}

/// Subscriber side of a running live query
///
/// Yields a fresh query result after the initial run and after every
/// coalesced re-run. An error is terminal: no further results follow it.
/// Dropping the handle unsubscribes.
pub struct LiveQueryHandle<R> {
    results: mpsc::UnboundedReceiver<Result<Arc<R>>>,
    cancel: watch::Sender<bool>,
}

impl<R> LiveQueryHandle<R> {
    /// Receive the next query result, or `None` once the runner terminated
    pub async fn recv(&mut self) -> Option<Result<Arc<R>>> {
        self.results.recv().await
    }

    /// Detach from the change stream
    ///
    /// An in-flight query run completes and its result is discarded; no new
    /// run starts and no further handlers are evaluated.
    pub fn unsubscribe(&mut self) {
        self.results.close();
        let _ = self.cancel.send(true);
    }
}

impl<R> Drop for LiveQueryHandle<R> {
    fn drop(&mut self) {
        let _ = self.cancel.send(true);
    }
}

fn lookup<'a, R>(
    handlers: &'a HashMap<String, TableHandlers<R>>,
    event: &ChangeEvent,
) -> Option<&'a Predicate<R>> {
    let table = handlers.get(event.table())?;
    match event.kind() {
        EventKind::Insert => table.insert.as_ref(),
        EventKind::Update => table.update.as_ref(),
        EventKind::Delete => table.delete.as_ref(),
    }
}

/// The runner task. `inflight.is_some()` is the `running` flag of the
/// coalescing state machine; `queued` schedules at most one follow-up run.
async fn run<R: Send + Sync + 'static>(
    mut query: QueryFn<R>,
    handlers: HashMap<String, TableHandlers<R>>,
    mut changes: Subscription,
    results: mpsc::UnboundedSender<Result<Arc<R>>>,
    mut cancel: watch::Receiver<bool>,
) {
    let mut last: Option<Arc<R>> = None;
    let mut queued = false;
    // The initial run starts immediately; changes evaluated while it is in
    // flight see no last result yet.
    let mut inflight: Option<BoxFuture<'static, anyhow::Result<R>>> = Some(query());

    loop {
        tokio::select! {
            biased;

            _ = cancel.changed() => {
                changes.unsubscribe();
                if let Some(run) = inflight.take() {
                    // Cooperative: the run finishes, nobody hears about it.
                    let _ = run.await;
                }
                return;
            }

            finished = async { inflight.as_mut().expect("query in flight").await },
                if inflight.is_some() =>
            {
                inflight = None;
                match finished {
                    Ok(result) => {
                        let result = Arc::new(result);
                        last = Some(Arc::clone(&result));
                        let _ = results.send(Ok(result));
                        if queued {
                            queued = false;
                            inflight = Some(query());
                        }
                    }
                    Err(e) => {
                        let _ = results.send(Err(Error::Query(e)));
                        return;
                    }
                }
            }

            signal = changes.recv() => match signal {
                Some(StreamSignal::Next(event)) => {
                    let Some(predicate) = lookup(&handlers, &event) else {
                        continue;
                    };
                    let verdict = predicate(event.payload().clone(), last.clone()).await;
                    // The handler may have suspended on its own queries; an
                    // unsubscribe during that window must not start a new run.
                    let cancelled = *cancel.borrow();
                    if cancelled {
                        changes.unsubscribe();
                        if let Some(run) = inflight.take() {
                            let _ = run.await;
                        }
                        return;
                    }
                    match verdict {
                        Ok(false) => {}
                        Ok(true) => {
                            if inflight.is_none() {
                                inflight = Some(query());
                            } else if !queued {
                                debug!(table = event.table(), "queueing follow-up query run");
                                queued = true;
                            }
                            // A third state is impossible: a queued run
                            // already covers this invalidation.
                        }
                        Err(e) => {
                            let _ = results.send(Err(Error::Handler(e)));
                            return;
                        }
                    }
                }
                Some(StreamSignal::Complete) | None => {
                    // Upstream finished. Drain: emit the in-flight run and,
                    // if one is queued, the final follow-up, so no accepted
                    // invalidation is dropped.
                    if let Some(run) = inflight.take() {
                        match run.await {
                            Ok(result) => {
                                let _ = results.send(Ok(Arc::new(result)));
                                if queued {
                                    match query().await {
                                        Ok(result) => {
                                            let _ = results.send(Ok(Arc::new(result)));
                                        }
                                        Err(e) => {
                                            let _ = results.send(Err(Error::Query(e)));
                                        }
                                    }
                                }
                            }
                            Err(e) => {
                                let _ = results.send(Err(Error::Query(e)));
                            }
                        }
                    }
                    return;
                }
                Some(StreamSignal::Error(e)) => {
                    let _ = results.send(Err(Error::Upstream(e)));
                    return;
                }
            }
        }
    }
}
