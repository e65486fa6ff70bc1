//! Command router: external state changes back to device commands.
//!
//! A change that did not originate from decoded telemetry is resolved
//! to its owning session and command topic. Simple attributes map
//! straight to a command payload; the single-channel color
//! pseudo-attributes first fetch the current composite hex from the
//! store, recompute it through the color engine and then send the full
//! color. The fetch/compose/send sequence is not transactional; a
//! device-sourced color update landing in between wins or loses by
//! arrival order.

use crate::color;
use crate::gateway::GatewayCore;
use crate::gateway::decode::strip_trailing_digit;
use crate::store::{StateChange, StateStore};
use log::{debug, warn};
use serde_json::{Value, json};

/// Command classes, resolved from the state id's base name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandKind {
    Power,
    Dimmer,
    Scheme,
    ColorTemp,
    Speed,
    Wakeup,
    Color,
    Red,
    Green,
    Blue,
    RgbPower,
    Hue,
    Saturation,
    WwPower,
    CwPower,
    WarmWhite,
    ColdWhite,
}

impl CommandKind {
    /// A state name classifies by its base name with an optional single
    /// trailing digit; `POWER` matches all of `POWER`..`POWER8`.
    fn classify(state_id: &str) -> Option<Self> {
        if state_id.starts_with("POWER") {
            return Some(CommandKind::Power);
        }
        match strip_trailing_digit(state_id) {
            "Dimmer" => Some(CommandKind::Dimmer),
            "Scheme" => Some(CommandKind::Scheme),
            "CT" => Some(CommandKind::ColorTemp),
            "Speed" => Some(CommandKind::Speed),
            "Wakeup" => Some(CommandKind::Wakeup),
            "Color" => Some(CommandKind::Color),
            "Red" => Some(CommandKind::Red),
            "Green" => Some(CommandKind::Green),
            "Blue" => Some(CommandKind::Blue),
            "RGB_POWER" => Some(CommandKind::RgbPower),
            "Hue" => Some(CommandKind::Hue),
            "Saturation" => Some(CommandKind::Saturation),
            "WW_POWER" => Some(CommandKind::WwPower),
            "CW_POWER" => Some(CommandKind::CwPower),
            "WW" => Some(CommandKind::WarmWhite),
            "CW" => Some(CommandKind::ColdWhite),
            _ => None,
        }
    }
}

impl GatewayCore {
    /// Route one externally requested state change to the owning
    /// device. Device-sourced writes are acknowledgements and are never
    /// routed back.
    pub(crate) async fn on_state_change(&mut self, change: StateChange) {
        if change.from_device {
            return;
        }
        debug!("State change {} = {:?}", change.id, change.value);

        let prefix = format!("{}.", self.config.namespace);
        let Some(rest) = change.id.strip_prefix(prefix.as_str()) else {
            return;
        };
        let mut segments: Vec<&str> = rest.split('.').collect();
        let Some(state_id) = segments.pop() else {
            return;
        };
        if segments.is_empty() {
            return;
        }
        let channel_id = segments.join(".");
        if !self.sessions.contains_key(&channel_id) {
            warn!("Client \"{channel_id}\" not connected");
            return;
        }
        let device_root = format!("{}.{}", self.config.namespace, segments[0]);

        let Some(kind) = CommandKind::classify(state_id) else {
            warn!("unknown setstate object: {} : {:?}", change.id, change.value);
            return;
        };

        match kind {
            CommandKind::Power => {
                let payload = if truthy(&change.value) { "ON" } else { "OFF" };
                self.send_command(&channel_id, state_id, payload.to_string())
                    .await;
            }
            CommandKind::Dimmer
            | CommandKind::Scheme
            | CommandKind::ColorTemp
            | CommandKind::Speed
            | CommandKind::Wakeup => {
                self.send_command(&channel_id, state_id, command_payload(&change.value))
                    .await;
            }
            CommandKind::Color => {
                self.route_full_color(&channel_id, state_id, &change).await;
            }
            CommandKind::Red => {
                self.route_rgb_channel(&channel_id, &device_root, color::RED_OFFSET, &change.value)
                    .await;
            }
            CommandKind::Green => {
                self.route_rgb_channel(
                    &channel_id,
                    &device_root,
                    color::GREEN_OFFSET,
                    &change.value,
                )
                .await;
            }
            CommandKind::Blue => {
                self.route_rgb_channel(&channel_id, &device_root, color::BLUE_OFFSET, &change.value)
                    .await;
            }
            CommandKind::RgbPower => {
                self.route_rgb_power(&channel_id, &device_root, &change.value)
                    .await;
            }
            CommandKind::Hue => {
                self.route_hue(&device_root, &change.value).await;
            }
            CommandKind::Saturation => {
                self.route_saturation(&device_root, &change.value).await;
            }
            CommandKind::WwPower
            | CommandKind::CwPower
            | CommandKind::WarmWhite
            | CommandKind::ColdWhite => {
                self.route_white_channel(&channel_id, &device_root, kind, &change)
                    .await;
            }
        }
    }

    /// Send the full color string, padding white channels according to
    /// the stored role.
    async fn route_full_color(&mut self, channel_id: &str, state_id: &str, change: &StateChange) {
        let meta = match self.store.read_object_meta(&change.id).await {
            Ok(meta) => meta,
            Err(e) => {
                warn!("Failed to read object {}: {e}", change.id);
                return;
            }
        };
        let Some(meta) = meta else {
            warn!("ill rgbww obj");
            return;
        };
        let role = meta.role().unwrap_or("");
        let raw = command_payload(&change.value);
        let stripped = raw.strip_prefix('#').unwrap_or(&raw);
        let color = if role == "level.color.rgbww" {
            format!("{stripped}00")
        } else if role == "level.color.rgbcwww" {
            format!("{stripped}0000")
        } else {
            stripped.to_string()
        };
        self.send_command(channel_id, state_id, color).await;
    }

    /// Replace one RGB channel byte inside the current color and send
    /// the result. A missing color value seeds an all-zero base state
    /// instead.
    async fn route_rgb_channel(
        &mut self,
        channel_id: &str,
        device_root: &str,
        offset: usize,
        value: &Value,
    ) {
        let Some(level) = value_to_number(value) else {
            debug!("Non-numeric channel level: {value:?}");
            return;
        };
        let byte_hex = color::channel_to_hex(color::percent_to_byte(level));
        let color_id = format!("{device_root}.Color");
        match self.read_color(&color_id).await {
            ColorValue::Missing => {
                self.seed_color(&color_id).await;
            }
            ColorValue::Hex(current) => {
                let out = color::compose_color(&current, offset, &byte_hex);
                self.set_color(channel_id, out).await;
            }
            ColorValue::Unreadable => {}
        }
    }

    /// Slam all RGB channels to full or zero; switching on also powers
    /// the device up.
    async fn route_rgb_power(&mut self, channel_id: &str, device_root: &str, value: &Value) {
        let on = strict_bool(value);
        let color_id = format!("{device_root}.Color");
        match self.read_color(&color_id).await {
            ColorValue::Missing => warn!("ill state Color"),
            ColorValue::Hex(current) => {
                let rgb = if on { "ffffff" } else { "000000" };
                let out = color::compose_color(&current, color::RED_OFFSET, rgb);
                self.set_color(channel_id, out).await;
                if on {
                    self.set_power(channel_id).await;
                }
            }
            ColorValue::Unreadable => {}
        }
    }

    /// Recompute the color from hue + stored saturation and dimmer.
    /// Absent inputs are seeded with a device-sourced default and the
    /// chain stops until the next change.
    async fn route_hue(&mut self, device_root: &str, value: &Value) {
        let Some(hue) = value_to_number(value) else {
            debug!("Non-numeric hue: {value:?}");
            return;
        };
        let hue = hue.min(359.0);
        let Some(dim) = self.read_or_seed_level(&format!("{device_root}.Dimmer")).await else {
            return;
        };
        let Some(sat) = self
            .read_or_seed_level(&format!("{device_root}.Saturation"))
            .await
        else {
            return;
        };
        self.write_hsv_color(device_root, hue, sat, dim).await;
    }

    /// Saturation counterpart of [`route_hue`].
    async fn route_saturation(&mut self, device_root: &str, value: &Value) {
        let Some(sat) = value_to_number(value) else {
            debug!("Non-numeric saturation: {value:?}");
            return;
        };
        let sat = sat.min(100.0);
        let Some(dim) = self.read_or_seed_level(&format!("{device_root}.Dimmer")).await else {
            return;
        };
        let Some(hue) = self.read_or_seed_level(&format!("{device_root}.Hue")).await else {
            return;
        };
        self.write_hsv_color(device_root, hue, sat, dim).await;
    }

    /// White channel updates need the stored color role to know which
    /// hex slice belongs to the warm white byte.
    async fn route_white_channel(
        &mut self,
        channel_id: &str,
        device_root: &str,
        kind: CommandKind,
        change: &StateChange,
    ) {
        let color_id = format!("{device_root}.Color");
        let meta = match self.store.read_object_meta(&color_id).await {
            Ok(meta) => meta,
            Err(e) => {
                warn!("Failed to read object {color_id}: {e}");
                return;
            }
        };
        let Some(meta) = meta else {
            warn!("unknown setstate object: {} : {:?}", change.id, change.value);
            return;
        };
        let ww_offset = color::warm_white_offset_for_role(meta.role().unwrap_or(""));

        match kind {
            CommandKind::WwPower | CommandKind::CwPower => {
                let on = strict_bool(&change.value);
                let offset = if kind == CommandKind::CwPower {
                    color::COLD_WHITE_OFFSET
                } else {
                    ww_offset
                };
                match self.read_color(&color_id).await {
                    ColorValue::Missing => warn!("ill state Color"),
                    ColorValue::Hex(current) => {
                        let white = if on { "ff" } else { "00" };
                        let out = color::compose_color(&current, offset, white);
                        self.set_color(channel_id, out).await;
                        // In case POWER is off, switch it on.
                        if on {
                            if kind == CommandKind::CwPower {
                                let power_id = format!("{device_root}.POWER");
                                if let Err(e) =
                                    self.store.write_value(&power_id, json!(true), false).await
                                {
                                    warn!("Failed to write {power_id}: {e}");
                                }
                            } else {
                                self.set_power(channel_id).await;
                            }
                        }
                    }
                    ColorValue::Unreadable => {}
                }
            }
            CommandKind::WarmWhite | CommandKind::ColdWhite => {
                let Some(level) = value_to_number(&change.value) else {
                    debug!("Non-numeric channel level: {:?}", change.value);
                    return;
                };
                let byte_hex = color::channel_to_hex(color::percent_to_byte(level));
                let offset = if kind == CommandKind::ColdWhite {
                    color::COLD_WHITE_OFFSET
                } else {
                    ww_offset
                };
                match self.read_color(&color_id).await {
                    ColorValue::Missing => {
                        self.seed_color(&color_id).await;
                    }
                    ColorValue::Hex(current) => {
                        let out = color::compose_color(&current, offset, &byte_hex);
                        self.set_color(channel_id, out).await;
                    }
                    ColorValue::Unreadable => {}
                }
            }
            _ => {}
        }
    }

    /// Level read used by the hue/saturation chains: an absent value is
    /// initialized to 100 as a device-sourced write and `None` is
    /// returned so the caller stops.
    async fn read_or_seed_level(&mut self, id: &str) -> Option<f64> {
        match self.store.read_value(id).await {
            Ok(Some(value)) => value_to_number(&value),
            Ok(None) => {
                if let Err(e) = self.store.write_value(id, json!(100), true).await {
                    warn!("Failed to write {id}: {e}");
                }
                None
            }
            Err(e) => {
                warn!("Failed to read {id}: {e}");
                None
            }
        }
    }

    async fn write_hsv_color(&mut self, device_root: &str, hue: f64, sat: f64, dim: f64) {
        let (r, g, b) = color::hsv_to_rgb(hue, sat, dim);
        let hex = format!(
            "{}{}{}",
            color::channel_to_hex(r),
            color::channel_to_hex(g),
            color::channel_to_hex(b)
        );
        // Written as an external change so the full-color route picks
        // it up and commands the device.
        let color_id = format!("{device_root}.Color");
        if let Err(e) = self
            .store
            .write_value(&color_id, json!(format!("#{hex}")), false)
            .await
        {
            warn!("Failed to write {color_id}: {e}");
        }
    }

    async fn read_color(&mut self, color_id: &str) -> ColorValue {
        match self.store.read_value(color_id).await {
            Ok(Some(value)) => match value.as_str() {
                Some(s) => ColorValue::Hex(s.strip_prefix('#').unwrap_or(s).to_string()),
                None => {
                    warn!("ill state Color");
                    ColorValue::Unreadable
                }
            },
            Ok(None) => ColorValue::Missing,
            Err(e) => {
                warn!("Failed to read {color_id}: {e}");
                ColorValue::Unreadable
            }
        }
    }

    /// Establish a consistent base state when a channel update arrives
    /// before any color was ever reported.
    async fn seed_color(&mut self, color_id: &str) {
        if let Err(e) = self
            .store
            .write_value(color_id, json!("#000000"), false)
            .await
        {
            warn!("Failed to write {color_id}: {e}");
        }
    }

    async fn set_color(&mut self, channel_id: &str, hex: String) {
        self.send_command(channel_id, "Color", hex).await;
    }

    async fn set_power(&mut self, channel_id: &str) {
        self.send_command(channel_id, "POWER", "ON".to_string())
            .await;
    }

    /// Resolve the command topic through the session's memo or fallback
    /// name and publish; without either the change is dropped.
    async fn send_command(&mut self, channel_id: &str, state_id: &str, payload: String) {
        let Some(topic) = self
            .sessions
            .get(channel_id)
            .and_then(|s| s.command_topic(state_id))
        else {
            warn!("Unknown mapping for \"{state_id}\"");
            return;
        };
        self.publish_to_session(channel_id, topic, payload).await;
    }
}

enum ColorValue {
    Hex(String),
    Missing,
    Unreadable,
}

fn command_payload(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn value_to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// JS-style truthiness for power toggles, restricted to the values the
/// platform actually sends.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => {
            s.eq_ignore_ascii_case("on") || s == "1" || s.eq_ignore_ascii_case("true")
        }
        _ => false,
    }
}

/// The stricter acceptance set used for channel power toggles.
fn strict_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s == "true" || s == "1",
        Value::Number(n) => n.as_f64() == Some(1.0),
        _ => false,
    }
}
