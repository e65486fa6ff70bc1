//! Serialized reconciliation task pipeline.
//!
//! The store's existence-check-then-create sequence is not atomic and
//! one decode pass regularly targets the same id several times, so
//! tasks are drained strictly one at a time: dequeue the head, wait for
//! its store operation to complete, then dequeue the next. Failed
//! operations are logged and skipped; nothing is retried.

use crate::error::Result;
use crate::store::{Descriptor, StateStore};
use log::warn;
use std::collections::VecDeque;

/// One idempotent mutation against the external store.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileTask {
    /// Create the object only if it does not exist yet.
    EnsureExists { id: String, descriptor: Descriptor },
    /// Merge descriptor fields without rechecking existence.
    Extend { id: String, descriptor: Descriptor },
    /// Remove the state.
    Delete { id: String },
}

impl ReconcileTask {
    /// Target id of this task.
    pub fn id(&self) -> &str {
        match self {
            ReconcileTask::EnsureExists { id, .. }
            | ReconcileTask::Extend { id, .. }
            | ReconcileTask::Delete { id } => id,
        }
    }
}

/// Array-backed FIFO of reconciliation tasks with an explicit draining
/// flag.
#[derive(Default)]
pub struct Pipeline {
    queue: VecDeque<ReconcileTask>,
    draining: bool,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task. Tasks from one decode pass are applied in the
    /// order they were emitted, parent containers before children.
    pub fn enqueue(&mut self, task: ReconcileTask) {
        self.queue.push_back(task);
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Drain the queue against the store, one task at a time. Entries
    /// enqueued while a drain is in flight are picked up by that drain.
    pub async fn drain(&mut self, store: &dyn StateStore) {
        if self.draining {
            return;
        }
        self.draining = true;
        while let Some(task) = self.queue.pop_front() {
            if let Err(e) = apply(&task, store).await {
                warn!("Store task for \"{}\" failed: {e}", task.id());
            }
        }
        self.draining = false;
    }
}

async fn apply(task: &ReconcileTask, store: &dyn StateStore) -> Result<()> {
    match task {
        ReconcileTask::EnsureExists { id, descriptor } => {
            if !store.exists(id).await? {
                store.create(id, descriptor.clone()).await?;
            }
        }
        ReconcileTask::Extend { id, descriptor } => {
            store.extend(id, descriptor.clone()).await?;
        }
        ReconcileTask::Delete { id } => {
            store.delete_state(id).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ValueKind;
    use crate::store::MemoryStore;

    fn state_descriptor(name: &str) -> Descriptor {
        Descriptor::State {
            kind: ValueKind::Boolean,
            role: "switch".to_string(),
            unit: None,
            readable: true,
            writable: true,
            name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_tasks_apply_in_enqueue_order() {
        let (store, _rx) = MemoryStore::new();
        let mut pipeline = Pipeline::new();
        for i in 0..5 {
            pipeline.enqueue(ReconcileTask::EnsureExists {
                id: format!("ns.dev.S{i}"),
                descriptor: state_descriptor("s"),
            });
        }
        pipeline.drain(&*store).await;

        let ops = store.operations().await;
        let expected: Vec<String> = (0..5)
            .flat_map(|i| [format!("exists ns.dev.S{i}"), format!("create ns.dev.S{i}")])
            .collect();
        assert_eq!(ops, expected);
    }

    #[tokio::test]
    async fn test_store_never_sees_concurrent_tasks() {
        let (store, _rx) = MemoryStore::new();
        let mut pipeline = Pipeline::new();
        for i in 0..20 {
            pipeline.enqueue(ReconcileTask::EnsureExists {
                id: format!("ns.dev.S{i}"),
                descriptor: state_descriptor("s"),
            });
        }
        pipeline.drain(&*store).await;
        assert_eq!(store.max_in_flight(), 1);
        assert!(pipeline.is_empty());
    }

    #[tokio::test]
    async fn test_ensure_exists_is_idempotent() {
        let (store, _rx) = MemoryStore::new();
        let mut pipeline = Pipeline::new();
        let first = state_descriptor("first");
        let second = state_descriptor("second");
        pipeline.enqueue(ReconcileTask::EnsureExists {
            id: "ns.dev.POWER".to_string(),
            descriptor: first.clone(),
        });
        pipeline.enqueue(ReconcileTask::EnsureExists {
            id: "ns.dev.POWER".to_string(),
            descriptor: second,
        });
        pipeline.drain(&*store).await;

        // The second task found the object and left it untouched.
        let meta = store.read_object_meta("ns.dev.POWER").await.unwrap();
        assert_eq!(meta, Some(first));
    }

    #[tokio::test]
    async fn test_extend_overwrites_without_existence_check() {
        let (store, _rx) = MemoryStore::new();
        let mut pipeline = Pipeline::new();
        pipeline.enqueue(ReconcileTask::Extend {
            id: "ns.dev.POWER".to_string(),
            descriptor: state_descriptor("merged"),
        });
        pipeline.drain(&*store).await;
        assert_eq!(store.operations().await, vec!["extend ns.dev.POWER".to_string()]);
        assert!(store.read_object_meta("ns.dev.POWER").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_task() {
        let (store, _rx) = MemoryStore::new();
        store
            .create("ns.dev.old", state_descriptor("old"))
            .await
            .unwrap();
        let mut pipeline = Pipeline::new();
        pipeline.enqueue(ReconcileTask::Delete {
            id: "ns.dev.old".to_string(),
        });
        pipeline.drain(&*store).await;
        assert!(!store.exists("ns.dev.old").await.unwrap());
    }
}
