//! Rate-limited FIFO queue for outbound provider calls.
//!
//! Entries run one at a time, in the order they were enqueued, and the start
//! of each dispatch is spaced at least that entry's spacing after the start
//! of the previous one. Entries default to the queue's `min_spacing`. A single background drain task owns dispatch; it is spawned
//! on the first enqueue into an idle queue and exits once the queue is empty.

use crate::error::GenerateError;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

type Action<T> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T, GenerateError>> + Send>;

/// A deferred unit of work and the channel that settles its caller's future.
struct QueueEntry<T> {
    action: Action<T>,
    settle: oneshot::Sender<Result<T, GenerateError>>,
    spacing: Duration,
}

struct QueueState<T> {
    entries: VecDeque<QueueEntry<T>>,
    draining: bool,
    last_dispatch: Option<Instant>,
}

/// Serializes async work items with a minimum spacing between dispatches.
pub struct RateLimitedQueue<T> {
    state: Arc<Mutex<QueueState<T>>>,
    min_spacing: Duration,
}

impl<T: Send + 'static> RateLimitedQueue<T> {
    pub fn new(min_spacing: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                entries: VecDeque::new(),
                draining: false,
                last_dispatch: None,
            })),
            min_spacing,
        }
    }

    pub fn min_spacing(&self) -> Duration {
        self.min_spacing
    }

    /// Add `action` to the back of the queue.
    ///
    /// The entry is queued immediately; the returned future resolves with the
    /// action's result once it has been dispatched and finished, or with
    /// [`GenerateError::QueueCleared`] if [`cancel_all`](Self::cancel_all)
    /// discards it first. Must be called from within a tokio runtime.
    pub fn enqueue<F, Fut>(
        &self,
        action: F,
    ) -> impl Future<Output = Result<T, GenerateError>> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, GenerateError>> + Send + 'static,
    {
        self.enqueue_spaced(self.min_spacing(), action)
    }

    /// Like [`enqueue`](Self::enqueue), but this entry waits at least
    /// `spacing` after the previous dispatch instead of the queue default.
    pub fn enqueue_spaced<F, Fut>(
        &self,
        spacing: Duration,
        action: F,
    ) -> impl Future<Output = Result<T, GenerateError>> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, GenerateError>> + Send + 'static,
    {
        let (settle, rx) = oneshot::channel();
        let entry = QueueEntry {
            action: Box::new(move || action().boxed()),
            settle,
            spacing,
        };

        let start_drain = {
            let mut state = lock(&self.state);
            state.entries.push_back(entry);
            !std::mem::replace(&mut state.draining, true)
        };
        if start_drain {
            tracing::trace!("Starting queue drain");
            tokio::spawn(drain(self.state.clone()));
        }

        async move { rx.await.unwrap_or(Err(GenerateError::QueueCleared)) }
    }

    /// Number of entries waiting for dispatch (excludes the one executing).
    pub fn size(&self) -> usize {
        lock(&self.state).entries.len()
    }

    /// Discard every entry that has not been dispatched yet.
    ///
    /// Each discarded caller receives [`GenerateError::QueueCleared`]. An entry
    /// that is already executing runs to completion. Returns the number of
    /// entries discarded.
    pub fn cancel_all(&self) -> usize {
        let cleared: Vec<QueueEntry<T>> = lock(&self.state).entries.drain(..).collect();
        let count = cleared.len();
        for entry in cleared {
            let _ = entry.settle.send(Err(GenerateError::QueueCleared));
        }
        if count > 0 {
            tracing::info!("Cleared {count} pending request(s) from the queue");
        }
        count
    }
}

fn lock<T>(state: &Mutex<QueueState<T>>) -> MutexGuard<'_, QueueState<T>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn drain<T: Send + 'static>(state: Arc<Mutex<QueueState<T>>>) {
    loop {
        // The front entry can change while we sleep (cancel_all, then a new
        // enqueue), so its wait is recomputed before every release.
        let (entry, wait) = {
            let mut guard = lock(&state);
            let Some(spacing) = guard.entries.front().map(|e| e.spacing) else {
                guard.draining = false;
                return;
            };
            let wait = guard
                .last_dispatch
                .map(|last| spacing.saturating_sub(last.elapsed()))
                .unwrap_or_default();
            if wait.is_zero() {
                guard.last_dispatch = Some(Instant::now());
                (guard.entries.pop_front(), wait)
            } else {
                (None, wait)
            }
        };
        let Some(entry) = entry else {
            tracing::trace!("Spacing dispatch by {wait:?}");
            tokio::time::sleep(wait).await;
            continue;
        };

        // Spawned so a panicking action cannot take the drain loop down with it.
        match tokio::spawn((entry.action)()).await {
            Ok(result) => {
                if entry.settle.send(result).is_err() {
                    tracing::debug!("Queued request finished after its caller went away");
                }
            }
            Err(e) => {
                tracing::error!("Queued request panicked: {e}");
            }
        }
    }
}
