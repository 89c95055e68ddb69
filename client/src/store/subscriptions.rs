use super::{DocPath, Document, StoreError, StoreResult, Target};
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};
use tokio::sync::watch;

/// Full result set of a watched document or query.
pub type Snapshot = Vec<Document>;

struct Listener {
    target: Target,
    tx: watch::Sender<Snapshot>,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: HashMap<u64, Listener>,
}

/// Live listeners of one store, keyed by subscription id.
#[derive(Clone, Default)]
pub(crate) struct ListenerRegistry {
    inner: Arc<Mutex<Listeners>>,
}

impl ListenerRegistry {
    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, Listeners>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("listener registry lock poisoned".into()))
    }

    /// Register a listener and queue its initial snapshot.
    pub(crate) fn register(&self, target: Target, initial: Snapshot) -> StoreResult<Subscription> {
        let (tx, rx) = watch::channel(Snapshot::new());
        // the receiver has not seen this version, so it is yielded first
        tx.send_replace(initial);

        let mut listeners = self.lock()?;
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.insert(id, Listener { target, tx });

        Ok(Subscription {
            id,
            snapshots: latest_snapshots(rx),
            registry: Arc::downgrade(&self.inner),
        })
    }

    /// Listeners whose target covers any of the changed documents.
    pub(crate) fn affected(&self, changed: &[DocPath]) -> StoreResult<Vec<(u64, Target)>> {
        let listeners = self.lock()?;
        Ok(listeners
            .entries
            .iter()
            .filter(|(_, listener)| changed.iter().any(|path| listener.target.watches(path)))
            .map(|(id, listener)| (*id, listener.target.clone()))
            .collect())
    }

    pub(crate) fn deliver(&self, id: u64, snapshot: Snapshot) -> StoreResult<()> {
        let mut listeners = self.lock()?;
        let closed = match listeners.entries.get(&id) {
            Some(listener) => listener.tx.send(snapshot).is_err(),
            None => false,
        };
        if closed {
            listeners.entries.remove(&id);
        }
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().map(|listeners| listeners.entries.len()).unwrap_or(0)
    }
}

/// Yields the newest unseen snapshot. Snapshots committed while the
/// reader is busy replace each other, so a slow reader holds one at most.
fn latest_snapshots(rx: watch::Receiver<Snapshot>) -> BoxStream<'static, Snapshot> {
    stream::unfold(rx, |mut rx| async move {
        rx.changed().await.ok()?;
        let snapshot = rx.borrow_and_update().clone();
        Some((snapshot, rx))
    })
    .boxed()
}

/// Handle to a live subscription.
///
/// Snapshots arrive in commit order; intermediate ones are skipped when
/// the reader falls behind. Dropping the handle (or calling
/// [`Subscription::close`]) unregisters the listener before returning.
pub struct Subscription {
    id: u64,
    snapshots: BoxStream<'static, Snapshot>,
    registry: Weak<Mutex<Listeners>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next snapshot, or `None` once the store has gone away.
    pub async fn next_snapshot(&mut self) -> Option<Snapshot> {
        self.snapshots.next().await
    }

    pub fn close(self) {}
}

impl Stream for Subscription {
    type Item = Snapshot;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.snapshots.poll_next_unpin(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            if let Ok(mut listeners) = registry.lock() {
                listeners.entries.remove(&self.id);
            }
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
