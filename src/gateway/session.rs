//! Per-device session state.

use crate::wire::{ConnId, OutboundFrame, Will};
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Lifecycle of one device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Connected,
    Closing,
    Closed,
}

/// One authenticated device connection and its associated state.
///
/// A session is created on a successful CONNECT, superseded when a new
/// connection presents the same client id, and destroyed on transport
/// close, protocol error or idle timeout.
pub struct Session {
    /// MQTT client identifier, unique per connected device.
    pub client_id: String,
    /// Serial of the transport connection backing this session. Used to
    /// tell a superseded instance from the current holder of the id.
    pub conn: ConnId,
    /// Outbound frames to the device's transport writer.
    pub sink: mpsc::Sender<OutboundFrame>,
    /// Last-will registration, replayed through the decoder on close.
    pub will: Option<Will>,
    /// Attribute name to the live command topic it was observed on.
    pub topic_memo: HashMap<String, String>,
    /// Device-name segment of the first observed topic; used to build
    /// `cmnd/<name>/<attr>` command topics when no memo entry exists.
    pub fallback_name: Option<String>,
    pub state: SessionState,
}

impl Session {
    pub fn new(
        client_id: String,
        conn: ConnId,
        sink: mpsc::Sender<OutboundFrame>,
        will: Option<Will>,
    ) -> Self {
        Self {
            client_id,
            conn,
            sink,
            will,
            topic_memo: HashMap::new(),
            fallback_name: None,
            state: SessionState::Connected,
        }
    }

    /// Command topic for an attribute: memo entry first, conventional
    /// fallback topic second, `None` when neither exists.
    pub fn command_topic(&self, attr: &str) -> Option<String> {
        if let Some(topic) = self.topic_memo.get(attr) {
            return Some(topic.clone());
        }
        self.fallback_name
            .as_ref()
            .map(|name| format!("cmnd/{name}/{attr}"))
    }
}
