//! Multicast change stream
//!
//! A subject that fans decoded [`ChangeEvent`]s out to zero or more
//! subscribers. Observers are kept in a registration-ordered list guarded by
//! a mutex; delivery pushes into each subscriber's private unbounded channel,
//! so one stalled or dropped subscriber never affects the others or the
//! producing poll. There is no replay: a subscriber sees only events
//! published after it subscribed.
//!
//! `complete` and `error` are terminal. Publishing after a terminal signal is
//! a no-op, and subscriptions created afterwards observe the terminal signal
//! immediately.

use crate::error::Error;
use crate::event::ChangeEvent;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// A signal delivered to a change stream subscriber
#[derive(Debug, Clone)]
pub enum StreamSignal {
    /// A row change
    Next(ChangeEvent),
    /// The stream finished normally; no further signals follow
    Complete,
    /// The stream failed; no further signals follow
    Error(Arc<Error>),
}

enum Terminal {
    Completed,
    Errored(Arc<Error>),
}

struct Observer {
    id: u64,
    tx: mpsc::UnboundedSender<StreamSignal>,
}

struct StreamState {
    observers: Vec<Observer>,
    terminal: Option<Terminal>,
    next_id: u64,
}

/// Multicast subject carrying one stream's decoded row changes
#[derive(Clone)]
pub struct ChangeStream {
    state: Arc<Mutex<StreamState>>,
}

impl ChangeStream {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StreamState {
                observers: Vec::new(),
                terminal: None,
                next_id: 1,
            })),
        }
    }

    /// Subscribe to subsequent events
    ///
    /// A subscription created after the stream terminated receives the
    /// terminal signal immediately and nothing else.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();

        match &state.terminal {
            Some(Terminal::Completed) => {
                let _ = tx.send(StreamSignal::Complete);
                Subscription {
                    id: 0,
                    state: Arc::clone(&self.state),
                    rx,
                }
            }
            Some(Terminal::Errored(e)) => {
                let _ = tx.send(StreamSignal::Error(Arc::clone(e)));
                Subscription {
                    id: 0,
                    state: Arc::clone(&self.state),
                    rx,
                }
            }
            None => {
                let id = state.next_id;
                state.next_id += 1;
                state.observers.push(Observer { id, tx });
                Subscription {
                    id,
                    state: Arc::clone(&self.state),
                    rx,
                }
            }
        }
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.state.lock().observers.len()
    }

    /// Deliver an event to every subscriber, in registration order
    pub(crate) fn publish(&self, event: ChangeEvent) {
        let mut state = self.state.lock();
        if state.terminal.is_some() {
            return;
        }
        // A failed send means the receiver is gone; prune it and keep going.
        state
            .observers
            .retain(|obs| obs.tx.send(StreamSignal::Next(event.clone())).is_ok());
    }

    /// Terminate the stream normally
    pub(crate) fn complete(&self) {
        let mut state = self.state.lock();
        if state.terminal.is_some() {
            return;
        }
        state.terminal = Some(Terminal::Completed);
        for obs in state.observers.drain(..) {
            let _ = obs.tx.send(StreamSignal::Complete);
        }
    }

    /// Terminate the stream with an error
    pub(crate) fn error(&self, err: Arc<Error>) {
        let mut state = self.state.lock();
        if state.terminal.is_some() {
            return;
        }
        debug!(error = %err, "terminating change stream");
        state.terminal = Some(Terminal::Errored(Arc::clone(&err)));
        for obs in state.observers.drain(..) {
            let _ = obs.tx.send(StreamSignal::Error(Arc::clone(&err)));
        }
    }
}

/// A handle to one subscriber's position in a [`ChangeStream`]
///
/// Dropping the subscription unsubscribes.
pub struct Subscription {
    id: u64,
    state: Arc<Mutex<StreamState>>,
    rx: mpsc::UnboundedReceiver<StreamSignal>,
}

impl Subscription {
    /// Receive the next signal, or `None` once unsubscribed and drained
    pub async fn recv(&mut self) -> Option<StreamSignal> {
        self.rx.recv().await
    }

    /// Detach from the stream. Idempotent; other subscribers are unaffected.
    pub fn unsubscribe(&mut self) {
        if self.id == 0 {
            return;
        }
        let mut state = self.state.lock();
        state.observers.retain(|obs| obs.id != self.id);
        self.id = 0;
        self.rx.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
