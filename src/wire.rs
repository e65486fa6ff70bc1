//! Decoded MQTT frame model.
//!
//! The gateway core consumes an already-decoded event stream; the
//! actual wire codec lives in the transport bridge (`server`). Keeping
//! these types free of codec details lets the core and its tests build
//! frames directly.

/// Identifies one accepted transport connection. Serials increase
/// monotonically, so a larger id always belongs to a newer connection.
pub type ConnId = u64;

/// Last-will registration carried by a CONNECT frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub retain: bool,
}

/// Decoded CONNECT frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectFrame {
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub will: Option<Will>,
    pub keep_alive: u16,
}

/// Decoded PUBLISH frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishFrame {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub retain: bool,
}

/// Decoded SUBSCRIBE frame; one requested QoS per topic filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeFrame {
    pub message_id: u16,
    pub filters: Vec<(String, u8)>,
}

/// Frames a device can send to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Connect(ConnectFrame),
    Publish(PublishFrame),
    Subscribe(SubscribeFrame),
    PingReq,
    Disconnect,
}

/// CONNACK return codes the gateway emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnAckCode {
    Accepted,
    BadCredentials,
}

/// Frames the gateway sends back to a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    ConnAck {
        code: ConnAckCode,
    },
    Publish {
        topic: String,
        payload: Vec<u8>,
        qos: u8,
        retain: bool,
        message_id: u32,
    },
    SubAck {
        message_id: u16,
        granted: Vec<u8>,
    },
    PingResp,
}

/// Why a transport connection went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    Closed,
    Error(String),
    Timeout,
    Disconnected,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::Closed => write!(f, "closed"),
            CloseReason::Error(e) => write!(f, "closed because of error: {e}"),
            CloseReason::Timeout => write!(f, "timeout"),
            CloseReason::Disconnected => write!(f, "disconnected"),
        }
    }
}
