//! Transport bridge.
//!
//! Accepts TCP connections from devices, decodes MQTT 3.1.1 packets
//! with the bundled mqttbytes codec and forwards them to the gateway
//! core as [`GatewayEvent`]s. Each connection gets a reader and a
//! writer task; a cancellation token tears both down when the core
//! destroys a session. The reader also enforces the idle timeout as a
//! read deadline, rearmed by every inbound byte.

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::gateway::GatewayEvent;
use crate::wire::{
    CloseReason, ConnAckCode, ConnId, ConnectFrame, InboundFrame, OutboundFrame, PublishFrame,
    SubscribeFrame, Will,
};
use bytes::{Bytes, BytesMut};
use log::{debug, info, warn};
use rumqttc::mqttbytes::{self, QoS, v4};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const MAX_PACKET_SIZE: usize = 1024 * 1024;

/// Bind the MQTT listener socket.
pub async fn bind(config: &GatewayConfig) -> Result<TcpListener> {
    let addr = format!("{}:{}", config.bind, config.port);
    TcpListener::bind(&addr)
        .await
        .map_err(|e| GatewayError::ListenerBindFailed(format!("{addr}: {e}")))
}

/// Accept device connections until the shutdown token fires.
pub async fn run_listener(
    listener: TcpListener,
    config: GatewayConfig,
    events: mpsc::Sender<GatewayEvent>,
    shutdown: CancellationToken,
) {
    info!(
        "Starting MQTT {}server on port {}",
        if config.username.is_some() {
            "authenticated "
        } else {
            ""
        },
        config.port
    );

    let mut next_conn: ConnId = 1;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let conn = next_conn;
                    next_conn += 1;
                    debug!("Accepted connection {conn} from {peer}");
                    let token = shutdown.child_token();
                    let (sink, outbound) = mpsc::channel(64);
                    if events
                        .send(GatewayEvent::Opened { conn, sink, shutdown: token.clone() })
                        .await
                        .is_err()
                    {
                        return;
                    }
                    let (read_half, write_half) = stream.into_split();
                    tokio::spawn(read_loop(
                        conn,
                        read_half,
                        config.idle_window(),
                        events.clone(),
                        token.clone(),
                    ));
                    tokio::spawn(write_loop(conn, write_half, outbound, token));
                }
                Err(e) => warn!("Accept failed: {e}"),
            },
        }
    }
}

async fn read_loop(
    conn: ConnId,
    mut read_half: OwnedReadHalf,
    idle: Option<Duration>,
    events: mpsc::Sender<GatewayEvent>,
    token: CancellationToken,
) {
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        // Drain every complete packet already buffered.
        loop {
            match v4::read(&mut buf, MAX_PACKET_SIZE) {
                Ok(packet) => {
                    if let Some(frame) = convert(packet) {
                        if events
                            .send(GatewayEvent::Inbound { conn, frame })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                }
                Err(mqttbytes::Error::InsufficientBytes(_)) => break,
                Err(e) => {
                    let _ = events
                        .send(GatewayEvent::Closed {
                            conn,
                            reason: CloseReason::Error(e.to_string()),
                        })
                        .await;
                    return;
                }
            }
        }

        let outcome = tokio::select! {
            _ = token.cancelled() => return,
            outcome = read_with_deadline(&mut read_half, &mut buf, idle) => outcome,
        };
        let reason = match outcome {
            Ok(Some(0)) => CloseReason::Closed,
            Ok(Some(_)) => continue,
            Ok(None) => CloseReason::Timeout,
            Err(e) => CloseReason::Error(e.to_string()),
        };
        let _ = events.send(GatewayEvent::Closed { conn, reason }).await;
        return;
    }
}

/// Read more bytes, bounded by the idle window when one is configured.
/// `Ok(None)` means the deadline elapsed without traffic.
async fn read_with_deadline(
    read_half: &mut OwnedReadHalf,
    buf: &mut BytesMut,
    idle: Option<Duration>,
) -> std::io::Result<Option<usize>> {
    match idle {
        Some(window) => match tokio::time::timeout(window, read_half.read_buf(buf)).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        },
        None => read_half.read_buf(buf).await.map(Some),
    }
}

async fn write_loop(
    conn: ConnId,
    mut write_half: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<OutboundFrame>,
    token: CancellationToken,
) {
    let mut buf = BytesMut::with_capacity(1024);
    loop {
        let frame = tokio::select! {
            _ = token.cancelled() => break,
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        buf.clear();
        if let Err(e) = encode(frame, &mut buf) {
            warn!("Failed to encode frame for connection {conn}: {e}");
            continue;
        }
        if let Err(e) = write_half.write_all(&buf).await {
            debug!("Write to connection {conn} failed: {e}");
            break;
        }
    }
    let _ = write_half.shutdown().await;
}

fn convert(packet: v4::Packet) -> Option<InboundFrame> {
    match packet {
        v4::Packet::Connect(c) => Some(InboundFrame::Connect(ConnectFrame {
            client_id: c.client_id,
            username: c.login.as_ref().map(|l| l.username.clone()),
            password: c.login.as_ref().map(|l| l.password.clone()),
            will: c.last_will.map(|w| Will {
                topic: w.topic,
                payload: w.message.to_vec(),
                qos: qos_to_u8(w.qos),
                retain: w.retain,
            }),
            keep_alive: c.keep_alive,
        })),
        v4::Packet::Publish(p) => Some(InboundFrame::Publish(PublishFrame {
            topic: p.topic,
            payload: p.payload.to_vec(),
            qos: qos_to_u8(p.qos),
            retain: p.retain,
        })),
        v4::Packet::Subscribe(s) => Some(InboundFrame::Subscribe(SubscribeFrame {
            message_id: s.pkid,
            filters: s
                .filters
                .into_iter()
                .map(|f| (f.path, qos_to_u8(f.qos)))
                .collect(),
        })),
        v4::Packet::PingReq => Some(InboundFrame::PingReq),
        v4::Packet::Disconnect => Some(InboundFrame::Disconnect),
        other => {
            debug!("Ignoring packet: {other:?}");
            None
        }
    }
}

fn encode(frame: OutboundFrame, buf: &mut BytesMut) -> std::result::Result<(), mqttbytes::Error> {
    match frame {
        OutboundFrame::ConnAck { code } => {
            let code = match code {
                ConnAckCode::Accepted => v4::ConnectReturnCode::Success,
                ConnAckCode::BadCredentials => v4::ConnectReturnCode::BadUserNamePassword,
            };
            v4::ConnAck {
                session_present: false,
                code,
            }
            .write(buf)?;
        }
        OutboundFrame::Publish {
            topic,
            payload,
            qos,
            retain,
            message_id,
        } => {
            v4::Publish {
                dup: false,
                qos: u8_to_qos(qos),
                retain,
                topic,
                // The ascending u32 counter is masked down to the
                // 16-bit on-wire packet id.
                pkid: (message_id & 0xFFFF) as u16,
                payload: Bytes::from(payload),
            }
            .write(buf)?;
        }
        OutboundFrame::SubAck {
            message_id,
            granted,
        } => {
            v4::SubAck {
                pkid: message_id,
                return_codes: granted
                    .into_iter()
                    .map(|qos| v4::SubscribeReasonCode::Success(u8_to_qos(qos)))
                    .collect(),
            }
            .write(buf)?;
        }
        OutboundFrame::PingResp => {
            v4::PingResp.write(buf)?;
        }
    }
    Ok(())
}

fn qos_to_u8(qos: QoS) -> u8 {
    match qos {
        QoS::AtMostOnce => 0,
        QoS::AtLeastOnce => 1,
        QoS::ExactlyOnce => 2,
    }
}

fn u8_to_qos(qos: u8) -> QoS {
    match qos {
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    }
}
