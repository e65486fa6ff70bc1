//! Gateway core.
//!
//! Owns every live session, the reconciliation pipeline and the store
//! handle. All mutation happens on the single task driving [`GatewayCore::run`],
//! so none of this state needs locks; transport tasks and the store
//! talk to the core exclusively through channels.

pub mod command;
pub mod decode;
pub mod pipeline;
pub mod session;

pub use pipeline::{Pipeline, ReconcileTask};
pub use session::{Session, SessionState};

use crate::config::GatewayConfig;
use crate::registry::ValueKind;
use crate::store::{Descriptor, StateChange, StateStore};
use crate::wire::{
    CloseReason, ConnAckCode, ConnId, ConnectFrame, InboundFrame, OutboundFrame, PublishFrame,
    SubscribeFrame,
};
use log::{debug, info, warn};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Events fed into the gateway core by the transport layer.
#[derive(Debug)]
pub enum GatewayEvent {
    /// A transport connection was accepted.
    Opened {
        conn: ConnId,
        sink: mpsc::Sender<OutboundFrame>,
        shutdown: CancellationToken,
    },
    /// A decoded frame arrived on a connection.
    Inbound { conn: ConnId, frame: InboundFrame },
    /// The transport connection went away.
    Closed { conn: ConnId, reason: CloseReason },
}

/// Transport handle for one accepted connection.
struct Link {
    sink: mpsc::Sender<OutboundFrame>,
    shutdown: CancellationToken,
    /// Client id once the connection completed its handshake.
    session: Option<String>,
}

/// The gateway instance: session registry, task pipeline and counters.
pub struct GatewayCore {
    config: GatewayConfig,
    store: Arc<dyn StateStore>,
    links: HashMap<ConnId, Link>,
    sessions: HashMap<String, Session>,
    pipeline: Pipeline,
    message_id: u32,
}

impl GatewayCore {
    pub fn new(config: GatewayConfig, store: Arc<dyn StateStore>) -> Self {
        Self {
            config,
            store,
            links: HashMap::new(),
            sessions: HashMap::new(),
            pipeline: Pipeline::new(),
            message_id: 1,
        }
    }

    /// Drive the gateway until the shutdown token fires or the
    /// transport event channel closes.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<GatewayEvent>,
        mut changes: mpsc::UnboundedReceiver<StateChange>,
        shutdown: CancellationToken,
    ) {
        let mut changes_open = true;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
                change = changes.recv(), if changes_open => match change {
                    Some(change) => self.on_state_change(change).await,
                    None => changes_open = false,
                },
            }
        }
        self.shutdown().await;
    }

    pub async fn handle_event(&mut self, event: GatewayEvent) {
        match event {
            GatewayEvent::Opened {
                conn,
                sink,
                shutdown,
            } => {
                self.links.insert(
                    conn,
                    Link {
                        sink,
                        shutdown,
                        session: None,
                    },
                );
            }
            GatewayEvent::Inbound { conn, frame } => match frame {
                InboundFrame::Connect(frame) => self.on_connect(conn, frame).await,
                InboundFrame::Publish(frame) => self.on_publish(conn, frame).await,
                InboundFrame::Subscribe(frame) => self.on_subscribe(conn, frame).await,
                InboundFrame::PingReq => self.on_pingreq(conn).await,
                InboundFrame::Disconnect => self.on_closed(conn, CloseReason::Disconnected).await,
            },
            GatewayEvent::Closed { conn, reason } => self.on_closed(conn, reason).await,
        }
    }

    async fn on_connect(&mut self, conn: ConnId, frame: ConnectFrame) {
        let Some(sink) = self.links.get(&conn).map(|l| l.sink.clone()) else {
            debug!("CONNECT from unknown connection {conn}");
            return;
        };
        let client_id = frame.client_id;

        if let Some(expected_user) = self.config.username.clone() {
            let expected_pass = self.config.password.clone().unwrap_or_default();
            let user_ok = frame.username.as_deref() == Some(expected_user.as_str());
            let pass_ok = frame.password.as_deref().unwrap_or("") == expected_pass;
            if !user_ok || !pass_ok {
                warn!(
                    "Client [{client_id}] has invalid password({:?}) or username({:?})",
                    frame.password, frame.username
                );
                self.send_frame(
                    &sink,
                    OutboundFrame::ConnAck {
                        code: ConnAckCode::BadCredentials,
                    },
                )
                .await;
                if let Some(old) = self.sessions.remove(&client_id) {
                    self.set_alive(&client_id, false).await;
                    self.update_connection_summary().await;
                    self.destroy_conn(old.conn);
                }
                self.destroy_conn(conn);
                return;
            }
        }

        // A device reconnect supersedes its previous session without
        // will delivery; only the new connection keeps the identity.
        if let Some(old) = self.sessions.remove(&client_id) {
            info!("Client [{client_id}] reconnected");
            self.destroy_conn(old.conn);
        } else {
            info!("Client [{client_id}] connected");
        }

        self.send_frame(
            &sink,
            OutboundFrame::ConnAck {
                code: ConnAckCode::Accepted,
            },
        )
        .await;

        if let Some(link) = self.links.get_mut(&conn) {
            link.session = Some(client_id.clone());
        }
        let session = Session::new(client_id.clone(), conn, sink, frame.will);
        self.sessions.insert(client_id.clone(), session);
        self.update_connection_summary().await;
        self.enqueue_device_objects(&client_id);
        self.pipeline.drain(&*self.store).await;
    }

    async fn on_publish(&mut self, conn: ConnId, frame: PublishFrame) {
        let Some(client_id) = self.links.get(&conn).and_then(|l| l.session.clone()) else {
            debug!("PUBLISH on {} before CONNECT", frame.topic);
            return;
        };
        let current = self
            .sessions
            .get(&client_id)
            .is_some_and(|s| s.conn == conn);
        if !current {
            debug!("PUBLISH from superseded connection of [{client_id}]");
            return;
        }
        let Some(mut session) = self.sessions.remove(&client_id) else {
            return;
        };

        self.set_alive(&client_id, true).await;

        // A publish on the registered will topic only refreshes the
        // stored will payload.
        let is_will_update = session
            .will
            .as_ref()
            .is_some_and(|w| w.topic == frame.topic);
        if is_will_update {
            if let Some(will) = session.will.as_mut() {
                will.payload = frame.payload;
            }
            self.sessions.insert(client_id, session);
            return;
        }

        let output = decode::decode_message(
            &mut session,
            &frame.topic,
            &frame.payload,
            &self.config.namespace,
        );
        self.sessions.insert(client_id, session);
        self.apply_decode_output(output).await;
    }

    async fn on_subscribe(&mut self, conn: ConnId, frame: SubscribeFrame) {
        // Devices subscribe to their command topics; every request is
        // granted at the QoS it asked for.
        let granted = frame.filters.iter().map(|(_, qos)| *qos).collect();
        if let Some(sink) = self.links.get(&conn).map(|l| l.sink.clone()) {
            self.send_frame(
                &sink,
                OutboundFrame::SubAck {
                    message_id: frame.message_id,
                    granted,
                },
            )
            .await;
        }
    }

    async fn on_pingreq(&mut self, conn: ConnId) {
        let Some(link) = self.links.get(&conn) else {
            return;
        };
        let client = link.session.clone();
        let current = client
            .as_ref()
            .and_then(|id| self.sessions.get(id))
            .is_some_and(|s| s.conn == conn);
        if current {
            debug!("Client [{}] pingreq", client.as_deref().unwrap_or("?"));
            let sink = link.sink.clone();
            self.send_frame(&sink, OutboundFrame::PingResp).await;
        } else {
            info!(
                "Received pingreq from disconnected client \"{}\"",
                client.as_deref().unwrap_or("?")
            );
        }
    }

    async fn on_closed(&mut self, conn: ConnId, reason: CloseReason) {
        let owner = self
            .sessions
            .iter()
            .find(|(_, s)| s.conn == conn)
            .map(|(id, _)| id.clone());
        match owner {
            Some(client_id) => self.close_session(&client_id, &reason).await,
            None => self.destroy_conn(conn),
        }
    }

    /// Tear one session down: deliver its will through the decoder,
    /// close the transport, then update summary and liveness.
    async fn close_session(&mut self, client_id: &str, reason: &CloseReason) {
        let Some(mut session) = self.sessions.remove(client_id) else {
            return;
        };
        session.state = SessionState::Closing;
        info!("Client [{client_id}] {reason}");

        if let Some(will) = session.will.take() {
            debug!(
                "Delivering will for [{client_id}]: {} (qos {}, retain {})",
                will.topic, will.qos, will.retain
            );
            let output = decode::decode_message(
                &mut session,
                &will.topic,
                &will.payload,
                &self.config.namespace,
            );
            self.apply_decode_output(output).await;
        }

        self.destroy_conn(session.conn);
        self.update_connection_summary().await;
        self.set_alive(client_id, false).await;
        session.state = SessionState::Closed;
    }

    fn destroy_conn(&mut self, conn: ConnId) {
        if let Some(link) = self.links.remove(&conn) {
            link.shutdown.cancel();
        }
    }

    async fn apply_decode_output(&mut self, output: decode::DecodeOutput) {
        for task in output.tasks {
            self.pipeline.enqueue(task);
        }
        self.pipeline.drain(&*self.store).await;
        for (id, value) in output.writes {
            if let Err(e) = self.store.write_value(&id, value, true).await {
                warn!("Failed to write {id}: {e}");
            }
        }
    }

    /// Debounced liveness update: only written when the stored value
    /// differs or is absent.
    async fn set_alive(&mut self, client_id: &str, alive: bool) {
        let id = format!("{}.{client_id}.alive", self.config.namespace);
        let current = match self.store.read_value(&id).await {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to read {id}: {e}");
                None
            }
        };
        if current.as_ref().and_then(Value::as_bool) != Some(alive) {
            if let Err(e) = self.store.write_value(&id, json!(alive), true).await {
                warn!("Failed to write {id}: {e}");
            }
        }
    }

    async fn update_connection_summary(&self) {
        let mut ids: Vec<&str> = self.sessions.keys().map(String::as_str).collect();
        ids.sort_unstable();
        let text = ids.join(",");
        if let Err(e) = self.store.write_connection_summary(&text).await {
            warn!("Failed to update connection summary: {e}");
        }
    }

    /// Channel object and `alive` indicator for a freshly connected
    /// device.
    fn enqueue_device_objects(&mut self, client_id: &str) {
        let channel_id = format!("{}.{client_id}", self.config.namespace);
        self.pipeline.enqueue(ReconcileTask::EnsureExists {
            id: channel_id.clone(),
            descriptor: Descriptor::Channel {
                name: client_id.to_string(),
            },
        });
        self.pipeline.enqueue(ReconcileTask::EnsureExists {
            id: format!("{channel_id}.alive"),
            descriptor: Descriptor::State {
                kind: ValueKind::Boolean,
                role: "indicator.connected".to_string(),
                unit: None,
                readable: true,
                writable: false,
                name: format!("{client_id} alive"),
            },
        });
    }

    async fn send_frame(&self, sink: &mpsc::Sender<OutboundFrame>, frame: OutboundFrame) {
        if sink.send(frame).await.is_err() {
            debug!("Outbound channel closed");
        }
    }

    /// Publish a command to a connected session with the next message
    /// id.
    async fn publish_to_session(&mut self, client_id: &str, topic: String, payload: String) {
        let Some(sink) = self.sessions.get(client_id).map(|s| s.sink.clone()) else {
            return;
        };
        let message_id = self.next_message_id();
        debug!("Send to \"{client_id}\": {topic} = {payload}");
        let frame = OutboundFrame::Publish {
            topic,
            payload: payload.into_bytes(),
            qos: 0,
            retain: false,
            message_id,
        };
        if sink.send(frame).await.is_err() {
            warn!("Outbound channel closed for client: {client_id}");
        }
    }

    fn next_message_id(&mut self) -> u32 {
        let id = self.message_id;
        self.message_id = self.message_id.wrapping_add(1);
        id
    }

    /// Clear liveness for every connected session and tear the
    /// transports down.
    async fn shutdown(mut self) {
        info!("Shutting down gateway");
        let ids: Vec<String> = self.sessions.keys().cloned().collect();
        for id in ids {
            self.set_alive(&id, false).await;
        }
        for (_, link) in self.links.drain() {
            link.shutdown.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::wire::Will;

    fn connect_frame(client_id: &str) -> ConnectFrame {
        ConnectFrame {
            client_id: client_id.to_string(),
            username: None,
            password: None,
            will: None,
            keep_alive: 30,
        }
    }

    async fn open_and_connect(
        core: &mut GatewayCore,
        conn: ConnId,
        frame: ConnectFrame,
    ) -> (mpsc::Receiver<OutboundFrame>, CancellationToken) {
        let (tx, rx) = mpsc::channel(16);
        let token = CancellationToken::new();
        core.handle_event(GatewayEvent::Opened {
            conn,
            sink: tx,
            shutdown: token.clone(),
        })
        .await;
        core.handle_event(GatewayEvent::Inbound {
            conn,
            frame: InboundFrame::Connect(frame),
        })
        .await;
        (rx, token)
    }

    #[tokio::test]
    async fn test_connect_creates_session_and_objects() {
        let (store, _changes) = MemoryStore::new();
        let mut core = GatewayCore::new(GatewayConfig::default(), store.clone());
        let (mut rx, _token) = open_and_connect(&mut core, 1, connect_frame("DVES_1")).await;

        assert_eq!(
            rx.recv().await,
            Some(OutboundFrame::ConnAck {
                code: ConnAckCode::Accepted
            })
        );
        assert!(store.exists("tasmota.0.DVES_1").await.unwrap());
        assert!(store.exists("tasmota.0.DVES_1.alive").await.unwrap());
        assert_eq!(store.connection_summary().await, "DVES_1");
    }

    #[tokio::test]
    async fn test_identity_supersession_destroys_old_transport_once() {
        let (store, _changes) = MemoryStore::new();
        let mut core = GatewayCore::new(GatewayConfig::default(), store);
        let (_rx1, token1) = open_and_connect(&mut core, 1, connect_frame("DVES_1")).await;
        assert!(!token1.is_cancelled());

        let (_rx2, token2) = open_and_connect(&mut core, 2, connect_frame("DVES_1")).await;
        assert!(token1.is_cancelled());
        assert!(!token2.is_cancelled());
        assert_eq!(core.sessions.len(), 1);
        assert_eq!(core.sessions.get("DVES_1").map(|s| s.conn), Some(2));

        // The old transport's late close event must not tear down the
        // new session.
        core.handle_event(GatewayEvent::Closed {
            conn: 1,
            reason: CloseReason::Closed,
        })
        .await;
        assert_eq!(core.sessions.get("DVES_1").map(|s| s.conn), Some(2));
    }

    #[tokio::test]
    async fn test_bad_credentials_rejected() {
        let (store, _changes) = MemoryStore::new();
        let config = GatewayConfig {
            username: Some("admin".to_string()),
            password: Some("secret".to_string()),
            ..Default::default()
        };
        let mut core = GatewayCore::new(config, store);
        let frame = ConnectFrame {
            username: Some("admin".to_string()),
            password: Some("wrong".to_string()),
            ..connect_frame("DVES_1")
        };
        let (mut rx, token) = open_and_connect(&mut core, 1, frame).await;

        assert_eq!(
            rx.recv().await,
            Some(OutboundFrame::ConnAck {
                code: ConnAckCode::BadCredentials
            })
        );
        assert!(token.is_cancelled());
        assert!(core.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_good_credentials_accepted() {
        let (store, _changes) = MemoryStore::new();
        let config = GatewayConfig {
            username: Some("admin".to_string()),
            password: Some("secret".to_string()),
            ..Default::default()
        };
        let mut core = GatewayCore::new(config, store);
        let frame = ConnectFrame {
            username: Some("admin".to_string()),
            password: Some("secret".to_string()),
            ..connect_frame("DVES_1")
        };
        let (mut rx, _token) = open_and_connect(&mut core, 1, frame).await;
        assert_eq!(
            rx.recv().await,
            Some(OutboundFrame::ConnAck {
                code: ConnAckCode::Accepted
            })
        );
        assert_eq!(core.sessions.len(), 1);
    }

    #[tokio::test]
    async fn test_close_clears_liveness_exactly_once() {
        let (store, _changes) = MemoryStore::new();
        let mut core = GatewayCore::new(GatewayConfig::default(), store.clone());
        let (_rx, _token) = open_and_connect(&mut core, 1, connect_frame("DVES_1")).await;

        core.handle_event(GatewayEvent::Inbound {
            conn: 1,
            frame: InboundFrame::Publish(PublishFrame {
                topic: "tele/dev1/STATE".to_string(),
                payload: br#"{"Vcc":3.2}"#.to_vec(),
                qos: 0,
                retain: false,
            }),
        })
        .await;
        assert_eq!(
            store.read_value("tasmota.0.DVES_1.alive").await.unwrap(),
            Some(json!(true))
        );

        core.handle_event(GatewayEvent::Closed {
            conn: 1,
            reason: CloseReason::Timeout,
        })
        .await;
        assert_eq!(
            store.read_value("tasmota.0.DVES_1.alive").await.unwrap(),
            Some(json!(false))
        );
        assert_eq!(store.connection_summary().await, "");

        let ops = store.operations().await;
        let alive_writes = ops
            .iter()
            .filter(|op| *op == "write tasmota.0.DVES_1.alive")
            .count();
        // true on first publish, false on close; the debounce absorbs
        // everything else.
        assert_eq!(alive_writes, 2);

        // A second close event for the same connection is a no-op.
        core.handle_event(GatewayEvent::Closed {
            conn: 1,
            reason: CloseReason::Closed,
        })
        .await;
        let ops = store.operations().await;
        assert_eq!(
            ops.iter()
                .filter(|op| *op == "write tasmota.0.DVES_1.alive")
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn test_will_is_delivered_through_decoder_on_close() {
        let (store, _changes) = MemoryStore::new();
        let mut core = GatewayCore::new(GatewayConfig::default(), store.clone());
        let frame = ConnectFrame {
            will: Some(Will {
                topic: "tele/dev1/SENSOR".to_string(),
                payload: br#"{"Vcc":1.5}"#.to_vec(),
                qos: 0,
                retain: false,
            }),
            ..connect_frame("DVES_1")
        };
        let (_rx, _token) = open_and_connect(&mut core, 1, frame).await;

        core.handle_event(GatewayEvent::Closed {
            conn: 1,
            reason: CloseReason::Closed,
        })
        .await;
        assert_eq!(
            store.read_value("tasmota.0.DVES_1.Vcc").await.unwrap(),
            Some(json!(1.5))
        );
    }

    #[tokio::test]
    async fn test_publish_on_will_topic_updates_payload_without_decoding() {
        let (store, _changes) = MemoryStore::new();
        let mut core = GatewayCore::new(GatewayConfig::default(), store.clone());
        let frame = ConnectFrame {
            will: Some(Will {
                topic: "tele/dev1/LWT".to_string(),
                payload: b"Offline".to_vec(),
                qos: 0,
                retain: false,
            }),
            ..connect_frame("DVES_1")
        };
        let (_rx, _token) = open_and_connect(&mut core, 1, frame).await;

        core.handle_event(GatewayEvent::Inbound {
            conn: 1,
            frame: InboundFrame::Publish(PublishFrame {
                topic: "tele/dev1/LWT".to_string(),
                payload: b"Online".to_vec(),
                qos: 0,
                retain: false,
            }),
        })
        .await;
        assert_eq!(
            core.sessions
                .get("DVES_1")
                .and_then(|s| s.will.as_ref())
                .map(|w| w.payload.clone()),
            Some(b"Online".to_vec())
        );
    }

    #[tokio::test]
    async fn test_subscribe_grants_requested_qos() {
        let (store, _changes) = MemoryStore::new();
        let mut core = GatewayCore::new(GatewayConfig::default(), store);
        let (mut rx, _token) = open_and_connect(&mut core, 1, connect_frame("DVES_1")).await;
        let _connack = rx.recv().await;

        core.handle_event(GatewayEvent::Inbound {
            conn: 1,
            frame: InboundFrame::Subscribe(SubscribeFrame {
                message_id: 7,
                filters: vec![("cmnd/sonoff/#".to_string(), 1), ("cmnd/other/#".to_string(), 0)],
            }),
        })
        .await;
        assert_eq!(
            rx.recv().await,
            Some(OutboundFrame::SubAck {
                message_id: 7,
                granted: vec![1, 0]
            })
        );
    }

    #[tokio::test]
    async fn test_pingreq_answered_only_for_current_holder() {
        let (store, _changes) = MemoryStore::new();
        let mut core = GatewayCore::new(GatewayConfig::default(), store);
        let (mut rx1, _token1) = open_and_connect(&mut core, 1, connect_frame("DVES_1")).await;
        let _connack = rx1.recv().await;
        let (_rx2, _token2) = open_and_connect(&mut core, 2, connect_frame("DVES_1")).await;

        // The superseded connection's pingreq is dropped.
        core.handle_event(GatewayEvent::Inbound {
            conn: 1,
            frame: InboundFrame::PingReq,
        })
        .await;
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_pingreq_current_holder_gets_response() {
        let (store, _changes) = MemoryStore::new();
        let mut core = GatewayCore::new(GatewayConfig::default(), store);
        let (mut rx, _token) = open_and_connect(&mut core, 1, connect_frame("DVES_1")).await;
        let _connack = rx.recv().await;

        core.handle_event(GatewayEvent::Inbound {
            conn: 1,
            frame: InboundFrame::PingReq,
        })
        .await;
        assert_eq!(rx.recv().await, Some(OutboundFrame::PingResp));
    }

    #[tokio::test]
    async fn test_telemetry_publish_reaches_store() {
        let (store, _changes) = MemoryStore::new();
        let mut core = GatewayCore::new(GatewayConfig::default(), store.clone());
        let (_rx, _token) = open_and_connect(&mut core, 1, connect_frame("DVES_1")).await;

        core.handle_event(GatewayEvent::Inbound {
            conn: 1,
            frame: InboundFrame::Publish(PublishFrame {
                topic: "tele/dev1/STATE".to_string(),
                payload: br#"{"Time":"t","Vcc":3.2,"POWER1":"ON"}"#.to_vec(),
                qos: 0,
                retain: false,
            }),
        })
        .await;

        assert_eq!(
            store.read_value("tasmota.0.DVES_1.Vcc").await.unwrap(),
            Some(json!(3.2))
        );
        assert_eq!(
            store.read_value("tasmota.0.DVES_1.POWER1").await.unwrap(),
            Some(json!(true))
        );
        assert!(store.exists("tasmota.0.DVES_1.Vcc").await.unwrap());
        assert!(store.exists("tasmota.0.DVES_1.POWER1").await.unwrap());
    }
}
