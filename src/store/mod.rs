//! External hierarchical state store interface.
//!
//! The home-automation platform's storage engine is an external
//! collaborator; the gateway only sees this trait. All calls are
//! asynchronous and absence of an object or value is a normal,
//! non-error outcome the caller must handle.

mod memory;

pub use memory::MemoryStore;

use crate::error::Result;
use crate::registry::ValueKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata persisted for one store object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Descriptor {
    /// Container object grouping one device's states.
    Channel { name: String },
    /// One attribute state.
    State {
        kind: ValueKind,
        role: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        unit: Option<String>,
        readable: bool,
        writable: bool,
        name: String,
    },
}

impl Descriptor {
    /// Role tag of a state descriptor, if this is one.
    pub fn role(&self) -> Option<&str> {
        match self {
            Descriptor::State { role, .. } => Some(role),
            Descriptor::Channel { .. } => None,
        }
    }
}

/// A value update observed by the store.
///
/// `from_device` distinguishes decoded device telemetry from externally
/// requested changes that still have to be routed back to a device.
#[derive(Debug, Clone)]
pub struct StateChange {
    pub id: String,
    pub value: Value,
    pub from_device: bool,
}

/// Asynchronous interface to the hierarchical state store.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Whether an object exists under `id`.
    async fn exists(&self, id: &str) -> Result<bool>;

    /// Create an object. Callers check existence first; see
    /// [`crate::gateway::Pipeline`].
    async fn create(&self, id: &str, descriptor: Descriptor) -> Result<()>;

    /// Merge descriptor fields into an existing object.
    async fn extend(&self, id: &str, descriptor: Descriptor) -> Result<()>;

    /// Remove the state under `id`.
    async fn delete_state(&self, id: &str) -> Result<()>;

    /// Write a value. `from_device` is true for decoded telemetry and
    /// false for externally requested changes.
    async fn write_value(&self, id: &str, value: Value, from_device: bool) -> Result<()>;

    /// Current value under `id`, or `None` when absent.
    async fn read_value(&self, id: &str) -> Result<Option<Value>>;

    /// Object metadata under `id`, or `None` when absent.
    async fn read_object_meta(&self, id: &str) -> Result<Option<Descriptor>>;

    /// Publish the aggregate "connected sessions" summary.
    async fn write_connection_summary(&self, connected: &str) -> Result<()>;
}
