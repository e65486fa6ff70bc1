//! Gateway configuration.
//!
//! All settings can be supplied as command line flags or environment
//! variables; defaults match the conventions Tasmota devices expect
//! (port 1883, five minute inactivity window).

use clap::Parser;
use std::time::Duration;

/// Configuration for the MQTT gateway.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "tasmota-gateway",
    about = "MQTT gateway bridging Tasmota device telemetry into a hierarchical state store"
)]
pub struct GatewayConfig {
    /// TCP port the MQTT listener binds to.
    #[arg(long, env = "GATEWAY_PORT", default_value_t = 1883)]
    pub port: u16,

    /// Address the MQTT listener binds to.
    #[arg(long, env = "GATEWAY_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    /// Username devices must present on CONNECT. Authentication is
    /// enabled only when this is set.
    #[arg(long, env = "GATEWAY_USER")]
    pub username: Option<String>,

    /// Password devices must present on CONNECT.
    #[arg(long, env = "GATEWAY_PASS")]
    pub password: Option<String>,

    /// Seconds without inbound traffic before a session is closed.
    /// 0 disables the idle timeout.
    #[arg(long, env = "GATEWAY_TIMEOUT", default_value_t = 300)]
    pub timeout: u64,

    /// Namespace prefix under which all state ids are created.
    #[arg(long, env = "GATEWAY_NAMESPACE", default_value = "tasmota.0")]
    pub namespace: String,
}

impl GatewayConfig {
    /// Idle window for device sessions, or `None` when disabled.
    pub fn idle_window(&self) -> Option<Duration> {
        if self.timeout == 0 {
            None
        } else {
            Some(Duration::from_secs(self.timeout))
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 1883,
            bind: "0.0.0.0".to_string(),
            username: None,
            password: None,
            timeout: 300,
            namespace: "tasmota.0".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_window_default() {
        let config = GatewayConfig::default();
        assert_eq!(config.idle_window(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_idle_window_disabled() {
        let config = GatewayConfig {
            timeout: 0,
            ..Default::default()
        };
        assert_eq!(config.idle_window(), None);
    }
}
