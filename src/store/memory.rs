//! In-memory state store.
//!
//! Default store for development deployments and the stub used by unit
//! tests. Mirrors the platform store's contract: every write of an
//! externally sourced value is surfaced as a [`StateChange`]
//! notification, and call order plus in-flight depth are recorded so
//! tests can assert the reconciliation pipeline's serialization.

use super::{Descriptor, StateChange, StateStore};
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, mpsc};

#[derive(Default)]
struct Inner {
    objects: HashMap<String, Descriptor>,
    values: HashMap<String, Value>,
    summary: String,
    operations: Vec<String>,
}

/// Shared in-memory store.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    changes: mpsc::UnboundedSender<StateChange>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryStore {
    /// Create a store together with the receiver for change
    /// notifications.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<StateChange>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let store = Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            changes: tx,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        });
        (store, rx)
    }

    /// Ordered log of every store operation, for test assertions.
    pub async fn operations(&self) -> Vec<String> {
        self.inner.lock().await.operations.clone()
    }

    /// Highest number of store operations that were ever in flight at
    /// the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Current connection summary.
    pub async fn connection_summary(&self) -> String {
        self.inner.lock().await.summary.clone()
    }

    async fn record(&self, op: String) -> OpGuard<'_> {
        let depth = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(depth, Ordering::SeqCst);
        self.inner.lock().await.operations.push(op);
        // Give any concurrently issued operation a chance to overlap so
        // serialization violations become observable.
        tokio::task::yield_now().await;
        OpGuard { store: self }
    }
}

struct OpGuard<'a> {
    store: &'a MemoryStore,
}

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        self.store.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn exists(&self, id: &str) -> Result<bool> {
        let _guard = self.record(format!("exists {id}")).await;
        Ok(self.inner.lock().await.objects.contains_key(id))
    }

    async fn create(&self, id: &str, descriptor: Descriptor) -> Result<()> {
        let _guard = self.record(format!("create {id}")).await;
        self.inner
            .lock()
            .await
            .objects
            .insert(id.to_string(), descriptor);
        Ok(())
    }

    async fn extend(&self, id: &str, descriptor: Descriptor) -> Result<()> {
        let _guard = self.record(format!("extend {id}")).await;
        self.inner
            .lock()
            .await
            .objects
            .insert(id.to_string(), descriptor);
        Ok(())
    }

    async fn delete_state(&self, id: &str) -> Result<()> {
        let _guard = self.record(format!("delete {id}")).await;
        let mut inner = self.inner.lock().await;
        inner.objects.remove(id);
        inner.values.remove(id);
        Ok(())
    }

    async fn write_value(&self, id: &str, value: Value, from_device: bool) -> Result<()> {
        let _guard = self.record(format!("write {id}")).await;
        self.inner
            .lock()
            .await
            .values
            .insert(id.to_string(), value.clone());
        // Receiver side may be gone in tests that only exercise writes.
        let _ = self.changes.send(StateChange {
            id: id.to_string(),
            value,
            from_device,
        });
        Ok(())
    }

    async fn read_value(&self, id: &str) -> Result<Option<Value>> {
        let _guard = self.record(format!("read {id}")).await;
        Ok(self.inner.lock().await.values.get(id).cloned())
    }

    async fn read_object_meta(&self, id: &str) -> Result<Option<Descriptor>> {
        let _guard = self.record(format!("meta {id}")).await;
        Ok(self.inner.lock().await.objects.get(id).cloned())
    }

    async fn write_connection_summary(&self, connected: &str) -> Result<()> {
        let _guard = self.record("summary".to_string()).await;
        self.inner.lock().await.summary = connected.to_string();
        Ok(())
    }
}
