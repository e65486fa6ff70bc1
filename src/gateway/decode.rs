//! Telemetry decoder.
//!
//! Walks the structured payloads Tasmota devices publish, resolves each
//! leaf field against the attribute registry, synthesizes hierarchical
//! state ids and emits reconciliation tasks plus the decoded values.
//! Composite color strings additionally fan out into per-channel
//! states via the color engine.
//!
//! Examples of what arrives here:
//!
//! ```text
//! tele/sonoff2/STATE  = {"Time":"2017-10-01T12:37:18","Vcc":3.224,"POWER":"ON",
//!                        "Wifi":{"AP":1,"SSId":"...","RSSI":62}}
//! tele/sonoff5/SENSOR = {"Time":"2017-10-03T14:02:25",
//!                        "AM2301-14":{"Temperature":21.6,"Humidity":54.7},"TempUnit":"C"}
//! stat/sonoff/POWER   = ON
//! ```

use crate::color::{self, ColorRole};
use crate::gateway::pipeline::ReconcileTask;
use crate::gateway::session::Session;
use crate::registry::{self, AttrType, ValueKind};
use crate::store::Descriptor;
use log::{debug, warn};
use serde_json::{Map, Value, json};

/// Result of one decode pass: object tasks for the pipeline and value
/// updates to be written as device-sourced.
#[derive(Debug, Default)]
pub struct DecodeOutput {
    pub tasks: Vec<ReconcileTask>,
    pub writes: Vec<(String, Value)>,
}

/// Decode one inbound publish into store mutations.
pub fn decode_message(
    session: &mut Session,
    topic: &str,
    payload: &[u8],
    namespace: &str,
) -> DecodeOutput {
    let mut out = DecodeOutput::default();
    let text = String::from_utf8_lossy(payload);
    debug!("[{}] Received: {} = {}", session.client_id, topic, text);

    let parts: Vec<&str> = topic.split('/').collect();
    if session.fallback_name.is_none() && parts.len() >= 2 {
        session.fallback_name = Some(parts[1].to_string());
    }

    let Some(&leaf) = parts.last() else {
        return out;
    };
    let marker = parts.first().copied().unwrap_or("");

    // Will sentinel; lifecycle handling owns this topic.
    if leaf == "LWT" {
        return out;
    }

    if leaf == "RESULT" {
        // Power acknowledgements echo what the command router just
        // sent; decoding them again would loop.
        let stripped: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        if stripped.starts_with("{\"POWER\":\"ON\"}") || stripped.starts_with("{\"POWER\":\"OFF\"}") {
            return out;
        }
        if marker == "stat" || marker == "tele" {
            walk_payload(session, topic, namespace, None, &text, leaf, &mut out);
        }
        return out;
    }

    if marker == "tele" {
        if let Some(prefix) = group_prefix(leaf) {
            walk_payload(session, topic, namespace, prefix, &text, leaf, &mut out);
            return out;
        }
    }

    if let Some(ty) = registry::lookup(leaf) {
        decode_scalar(session, topic, marker, leaf, &text, ty, namespace, &mut out);
    }
    out
}

/// Group prefix for a telemetry group topic leaf, with an optional
/// single trailing digit (`INFO1`, `ENERGY2`). `Some(None)` means the
/// group nests directly under the device.
fn group_prefix(leaf: &str) -> Option<Option<&'static str>> {
    match strip_trailing_digit(leaf) {
        "STATE" | "SENSOR" | "WAKEUP" => Some(None),
        "INFO" => Some(Some("INFO")),
        "ENERGY" => Some(Some("ENERGY")),
        _ => None,
    }
}

pub(crate) fn strip_trailing_digit(name: &str) -> &str {
    match name.as_bytes().last() {
        Some(b) if b.is_ascii_digit() => &name[..name.len() - 1],
        _ => name,
    }
}

fn walk_payload(
    session: &mut Session,
    topic: &str,
    namespace: &str,
    prefix: Option<&str>,
    text: &str,
    leaf: &str,
    out: &mut DecodeOutput,
) {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(data)) => {
            let mut path = Vec::new();
            walk(session, topic, namespace, prefix, &data, None, &mut path, out);
        }
        Ok(_) => warn!("Cannot parse data \"{leaf}\": _{text}_ - not an object"),
        Err(e) => warn!("Cannot parse data \"{leaf}\": _{text}_ - {e}"),
    }
}

/// Recursive walk over a structured payload with an explicit path
/// accumulator. Nested objects push a sanitized path segment; leaves
/// resolve against the registry and unknown names are skipped.
#[allow(clippy::too_many_arguments)]
fn walk(
    session: &mut Session,
    topic: &str,
    namespace: &str,
    prefix: Option<&str>,
    data: &Map<String, Value>,
    unit: Option<String>,
    path: &mut Vec<String>,
    out: &mut DecodeOutput,
) {
    // A temperature unit anywhere in the document applies to every
    // temperature leaf decoded below it.
    let mut unit = unit;
    if let Some(Value::String(u)) = data.get("TempUnit") {
        unit = Some(normalize_temp_unit(u));
    }

    for (attr, value) in data {
        if let Some(nested) = value.as_object() {
            path.push(sanitize(attr));
            walk(session, topic, namespace, prefix, nested, unit.clone(), path, out);
            path.pop();
        } else if let Some(ty) = registry::lookup(attr) {
            emit_leaf(
                session,
                topic,
                namespace,
                prefix,
                path,
                attr,
                value,
                ty,
                unit.as_deref(),
                out,
            );
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn emit_leaf(
    session: &mut Session,
    topic: &str,
    namespace: &str,
    prefix: Option<&str>,
    path: &[String],
    attr: &str,
    value: &Value,
    ty: &'static AttrType,
    unit: Option<&str>,
    out: &mut DecodeOutput,
) {
    let id = state_id(namespace, &session.client_id, prefix, path, attr);
    let name = object_name(&session.client_id, prefix, path, attr);

    let mut unit_field = ty.unit.map(str::to_string);
    if attr == "Temperature" {
        if let Some(u) = unit {
            unit_field = Some(u.to_string());
        }
    }

    if ty.store_map {
        session
            .topic_memo
            .insert(attr.to_string(), memo_topic(topic, attr));
    }

    if attr == "Color" {
        if let Some(hex) = value.as_str() {
            decode_color(session, namespace, prefix, path, hex, ty, name, &id, out);
            return;
        }
    }

    out.tasks.push(ReconcileTask::EnsureExists {
        id: id.clone(),
        descriptor: state_descriptor(ty, ty.role.to_string(), unit_field, name),
    });

    match ty.kind {
        ValueKind::Number => {
            if let Some(n) = value_to_number(value) {
                out.writes.push((id, json!(n)));
            } else {
                debug!("Dropping non-numeric value for {id}: {value}");
            }
        }
        ValueKind::Boolean => {
            out.writes.push((id, json!(value_to_bool(value))));
        }
        ValueKind::Text | ValueKind::Structured => {
            out.writes.push((id, value.clone()));
        }
    }
}

/// Fan a composite color hex string out into the color state itself
/// plus hue/saturation/channel/channel-power states, all under the same
/// path. The encoding length decides the role and which white channels
/// exist.
#[allow(clippy::too_many_arguments)]
fn decode_color(
    session: &Session,
    namespace: &str,
    prefix: Option<&str>,
    path: &[String],
    hex: &str,
    ty: &'static AttrType,
    name: String,
    id: &str,
    out: &mut DecodeOutput,
) {
    let role = ColorRole::from_hex_len(hex.len());
    out.tasks.push(ReconcileTask::EnsureExists {
        id: id.to_string(),
        descriptor: state_descriptor(ty, role.role_name().to_string(), None, name),
    });

    let channel_object = |attr: &str, out: &mut DecodeOutput| -> String {
        let channel_id = state_id(namespace, &session.client_id, prefix, path, attr);
        if let Some(channel_ty) = registry::lookup(attr) {
            out.tasks.push(ReconcileTask::EnsureExists {
                id: channel_id.clone(),
                descriptor: state_descriptor(
                    channel_ty,
                    channel_ty.role.to_string(),
                    None,
                    object_name(&session.client_id, prefix, path, attr),
                ),
            });
        }
        channel_id
    };

    channel_object("Hue", out);
    channel_object("Saturation", out);

    for (attr, offset) in [
        ("Red", color::RED_OFFSET),
        ("Green", color::GREEN_OFFSET),
        ("Blue", color::BLUE_OFFSET),
    ] {
        let channel_id = channel_object(attr, out);
        if let Some(byte) = color::channel_at(hex, offset) {
            out.writes.push((channel_id, json!(color::byte_to_percent(byte))));
        }
    }

    let rgb_power_id = channel_object("RGB_POWER", out);
    if let Some(rgb) = hex.get(0..6).and_then(|s| u32::from_str_radix(s, 16).ok()) {
        out.writes.push((rgb_power_id, json!(rgb > 0)));
    }

    let white_channel = |attr: &str, power_attr: &str, offset: usize, out: &mut DecodeOutput| {
        let level_id = channel_object(attr, out);
        if let Some(byte) = color::channel_at(hex, offset) {
            out.writes.push((level_id, json!(color::byte_to_percent(byte))));
        }
        let power_id = channel_object(power_attr, out);
        if let Some(byte) = color::channel_at(hex, offset) {
            out.writes.push((power_id, json!(byte > 0)));
        }
    };

    match role {
        ColorRole::Rgb => {}
        ColorRole::RgbWw => {
            white_channel("WW", "WW_POWER", 6, out);
        }
        ColorRole::RgbCwWw => {
            white_channel("CW", "CW_POWER", 6, out);
            white_channel("WW", "WW_POWER", 8, out);
        }
    }

    out.writes
        .push((id.to_string(), Value::String(format!("#{hex}"))));
}

/// Decode a bare scalar published directly under an attribute topic,
/// e.g. `stat/sonoff/POWER = ON`. A `cmnd` echo additionally pins the
/// attribute's command topic in the session memo.
#[allow(clippy::too_many_arguments)]
fn decode_scalar(
    session: &mut Session,
    topic: &str,
    marker: &str,
    leaf: &str,
    text: &str,
    ty: &'static AttrType,
    namespace: &str,
    out: &mut DecodeOutput,
) {
    let id = state_id(namespace, &session.client_id, None, &[], leaf);
    out.tasks.push(ReconcileTask::EnsureExists {
        id: id.clone(),
        descriptor: state_descriptor(
            ty,
            ty.role.to_string(),
            ty.unit.map(str::to_string),
            format!("{} {}", session.client_id, leaf),
        ),
    });

    match ty.kind {
        ValueKind::Number => {
            if let Ok(n) = text.trim().parse::<f64>() {
                out.writes.push((id, json!(n)));
            } else {
                debug!("Dropping non-numeric payload on {topic}: {text}");
            }
        }
        ValueKind::Boolean => {
            let on = text.eq_ignore_ascii_case("on")
                || text == "1"
                || text.eq_ignore_ascii_case("true");
            out.writes.push((id, json!(on)));
        }
        ValueKind::Text | ValueKind::Structured => {
            out.writes.push((id, Value::String(text.to_string())));
        }
    }

    if marker == "cmnd" {
        session
            .topic_memo
            .insert(leaf.to_string(), topic.to_string());
    }
}

fn state_descriptor(
    ty: &AttrType,
    role: String,
    unit: Option<String>,
    name: String,
) -> Descriptor {
    Descriptor::State {
        kind: ty.kind,
        role,
        unit,
        readable: ty.readable,
        writable: ty.writable,
        name,
    }
}

/// Build the hierarchical state id for one attribute. Identical inputs
/// always yield the identical id.
fn state_id(
    namespace: &str,
    client_id: &str,
    prefix: Option<&str>,
    path: &[String],
    attr: &str,
) -> String {
    let mut id = format!("{namespace}.{client_id}.");
    if let Some(p) = prefix {
        id.push_str(p);
        id.push('.');
    }
    if !path.is_empty() {
        id.push_str(&path.join("_"));
        id.push('_');
    }
    id.push_str(&sanitize(attr));
    id
}

fn object_name(client_id: &str, prefix: Option<&str>, path: &[String], attr: &str) -> String {
    let mut words = vec![client_id.to_string()];
    if let Some(p) = prefix {
        words.push(p.to_string());
    }
    words.extend(path.iter().cloned());
    words.push(attr.to_string());
    words.join(" ")
}

/// Normalize unsafe id characters (`- . +` and whitespace) to `_`,
/// collapsing runs.
fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_run = false;
    for c in name.chars() {
        if c == '-' || c == '.' || c == '+' || c.is_whitespace() {
            if !in_run {
                out.push('_');
            }
            in_run = true;
        } else {
            out.push(c);
            in_run = false;
        }
    }
    out
}

/// The command topic remembered for an attribute: marker segment
/// swapped for `cmnd`, leaf segment swapped for the attribute name.
fn memo_topic(topic: &str, attr: &str) -> String {
    let mut parts: Vec<&str> = topic.split('/').collect();
    if let Some(first) = parts.first_mut() {
        *first = "cmnd";
    }
    if parts.len() > 1 {
        if let Some(last) = parts.last_mut() {
            *last = attr;
        }
    }
    parts.join("/")
}

fn normalize_temp_unit(unit: &str) -> String {
    if unit.starts_with('°') {
        unit.to_string()
    } else {
        format!("°{}", unit.trim_start_matches('°'))
    }
}

fn value_to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_to_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => {
            s.eq_ignore_ascii_case("on") || s == "1" || s.eq_ignore_ascii_case("true")
        }
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn session() -> Session {
        let (tx, _rx) = mpsc::channel(8);
        Session::new("DVES_96ABFA".to_string(), 1, tx, None)
    }

    fn find_write<'a>(out: &'a DecodeOutput, id: &str) -> Option<&'a Value> {
        out.writes.iter().find(|(i, _)| i == id).map(|(_, v)| v)
    }

    fn find_task<'a>(out: &'a DecodeOutput, id: &str) -> Option<&'a Descriptor> {
        out.tasks.iter().find_map(|t| match t {
            ReconcileTask::EnsureExists { id: tid, descriptor } if tid == id => Some(descriptor),
            _ => None,
        })
    }

    #[test]
    fn test_state_snapshot_decodes_known_leaves() {
        let mut s = session();
        let out = decode_message(
            &mut s,
            "tele/dev1/STATE",
            br#"{"Time":"t","Vcc":3.2,"POWER1":"ON"}"#,
            "tasmota.0",
        );

        let vcc = find_task(&out, "tasmota.0.DVES_96ABFA.Vcc").unwrap();
        match vcc {
            Descriptor::State { kind, unit, .. } => {
                assert_eq!(*kind, ValueKind::Number);
                assert_eq!(unit.as_deref(), Some("V"));
            }
            _ => panic!("expected state descriptor"),
        }
        let power = find_task(&out, "tasmota.0.DVES_96ABFA.POWER1").unwrap();
        assert_eq!(power.role(), Some("switch"));

        assert_eq!(find_write(&out, "tasmota.0.DVES_96ABFA.Vcc"), Some(&json!(3.2)));
        assert_eq!(find_write(&out, "tasmota.0.DVES_96ABFA.POWER1"), Some(&json!(true)));
        // "Time" is unknown to the registry and must be skipped.
        assert!(find_task(&out, "tasmota.0.DVES_96ABFA.Time").is_none());
    }

    #[test]
    fn test_nested_objects_accumulate_path_segments() {
        let mut s = session();
        let out = decode_message(
            &mut s,
            "tele/dev1/SENSOR",
            br#"{"DS18x20":{"DS1":{"Temperature":12.2}},"TempUnit":"C"}"#,
            "tasmota.0",
        );
        let id = "tasmota.0.DVES_96ABFA.DS18x20_DS1_Temperature";
        assert_eq!(find_write(&out, id), Some(&json!(12.2)));
        match find_task(&out, id).unwrap() {
            Descriptor::State { unit, .. } => assert_eq!(unit.as_deref(), Some("°C")),
            _ => panic!("expected state descriptor"),
        }
    }

    #[test]
    fn test_temp_unit_gets_degree_marker() {
        let mut s = session();
        let out = decode_message(
            &mut s,
            "tele/dev1/SENSOR",
            br#"{"AM2301":{"Temperature":21.6},"TempUnit":"F"}"#,
            "tasmota.0",
        );
        match find_task(&out, "tasmota.0.DVES_96ABFA.AM2301_Temperature").unwrap() {
            Descriptor::State { unit, .. } => assert_eq!(unit.as_deref(), Some("°F")),
            _ => panic!("expected state descriptor"),
        }
    }

    #[test]
    fn test_info_group_uses_prefix() {
        let mut s = session();
        let out = decode_message(
            &mut s,
            "tele/dev1/INFO2",
            br#"{"Hostname":"sonoffpow","IPAddress":"192.168.2.182"}"#,
            "tasmota.0",
        );
        assert!(find_task(&out, "tasmota.0.DVES_96ABFA.INFO.Hostname").is_some());
        assert_eq!(
            find_write(&out, "tasmota.0.DVES_96ABFA.INFO.IPAddress"),
            Some(&json!("192.168.2.182"))
        );
    }

    #[test]
    fn test_energy_group_uses_prefix() {
        let mut s = session();
        let out = decode_message(
            &mut s,
            "tele/dev1/ENERGY",
            br#"{"Total":1.753,"Power":3}"#,
            "tasmota.0",
        );
        assert_eq!(find_write(&out, "tasmota.0.DVES_96ABFA.ENERGY.Total"), Some(&json!(1.753)));
        assert_eq!(find_write(&out, "tasmota.0.DVES_96ABFA.ENERGY.Power"), Some(&json!(3.0)));
    }

    #[test]
    fn test_power_acknowledgement_is_suppressed() {
        let mut s = session();
        let out = decode_message(&mut s, "stat/dev1/RESULT", br#"{"POWER":"ON"}"#, "tasmota.0");
        assert!(out.tasks.is_empty());
        assert!(out.writes.is_empty());
    }

    #[test]
    fn test_other_results_decode() {
        let mut s = session();
        let out = decode_message(&mut s, "stat/dev1/RESULT", br#"{"Dimmer":50}"#, "tasmota.0");
        assert_eq!(find_write(&out, "tasmota.0.DVES_96ABFA.Dimmer"), Some(&json!(50.0)));
    }

    #[test]
    fn test_cmnd_result_is_ignored() {
        let mut s = session();
        let out = decode_message(&mut s, "cmnd/dev1/RESULT", br#"{"Dimmer":50}"#, "tasmota.0");
        assert!(out.writes.is_empty());
    }

    #[test]
    fn test_lwt_topic_is_ignored() {
        let mut s = session();
        let out = decode_message(&mut s, "tele/dev1/LWT", b"Online", "tasmota.0");
        assert!(out.tasks.is_empty());
        assert!(out.writes.is_empty());
    }

    #[test]
    fn test_malformed_payload_is_dropped() {
        let mut s = session();
        let out = decode_message(&mut s, "tele/dev1/STATE", b"{not json", "tasmota.0");
        assert!(out.tasks.is_empty());
        assert!(out.writes.is_empty());
    }

    #[test]
    fn test_direct_scalar_with_cmnd_marker_records_memo() {
        let mut s = session();
        let out = decode_message(&mut s, "cmnd/sonoff/POWER", b"ON", "tasmota.0");
        assert_eq!(find_write(&out, "tasmota.0.DVES_96ABFA.POWER"), Some(&json!(true)));
        assert_eq!(
            s.topic_memo.get("POWER").map(String::as_str),
            Some("cmnd/sonoff/POWER")
        );
    }

    #[test]
    fn test_direct_scalar_boolean_is_case_insensitive() {
        for payload in [&b"on"[..], b"ON", b"1", b"true", b"True"] {
            let mut s = session();
            let out = decode_message(&mut s, "stat/sonoff/POWER", payload, "tasmota.0");
            assert_eq!(
                find_write(&out, "tasmota.0.DVES_96ABFA.POWER"),
                Some(&json!(true)),
                "payload {:?}",
                String::from_utf8_lossy(payload)
            );
        }
        let mut s = session();
        let out = decode_message(&mut s, "stat/sonoff/POWER", b"OFF", "tasmota.0");
        assert_eq!(find_write(&out, "tasmota.0.DVES_96ABFA.POWER"), Some(&json!(false)));
    }

    #[test]
    fn test_structured_memo_rewrites_topic() {
        let mut s = session();
        decode_message(
            &mut s,
            "tele/dev1/STATE",
            br#"{"POWER1":"ON"}"#,
            "tasmota.0",
        );
        assert_eq!(
            s.topic_memo.get("POWER1").map(String::as_str),
            Some("cmnd/dev1/POWER1")
        );
    }

    #[test]
    fn test_fallback_name_from_first_topic() {
        let mut s = session();
        decode_message(&mut s, "tele/sonoff2/STATE", b"{}", "tasmota.0");
        assert_eq!(s.fallback_name.as_deref(), Some("sonoff2"));
        // Later topics do not replace it.
        decode_message(&mut s, "tele/other/STATE", b"{}", "tasmota.0");
        assert_eq!(s.fallback_name.as_deref(), Some("sonoff2"));
    }

    #[test]
    fn test_attribute_names_are_sanitized() {
        let mut s = session();
        let out = decode_message(
            &mut s,
            "tele/dev1/SENSOR",
            br#"{"BM280":{"Approx. Altitude":24}}"#,
            "tasmota.0",
        );
        assert_eq!(
            find_write(&out, "tasmota.0.DVES_96ABFA.BM280_Approx_Altitude"),
            Some(&json!(24.0))
        );
    }

    #[test]
    fn test_rgbww_color_fans_out_channels() {
        let mut s = session();
        let out = decode_message(
            &mut s,
            "tele/dev1/STATE",
            br#"{"Color":"FF00FF00"}"#,
            "tasmota.0",
        );
        let base = "tasmota.0.DVES_96ABFA";

        match find_task(&out, &format!("{base}.Color")).unwrap() {
            Descriptor::State { role, .. } => assert_eq!(role, "level.color.rgbww"),
            _ => panic!("expected state descriptor"),
        }
        assert!(find_task(&out, &format!("{base}.Hue")).is_some());
        assert!(find_task(&out, &format!("{base}.Saturation")).is_some());

        assert_eq!(find_write(&out, &format!("{base}.Red")), Some(&json!(100.0)));
        assert_eq!(find_write(&out, &format!("{base}.Green")), Some(&json!(0.0)));
        assert_eq!(find_write(&out, &format!("{base}.Blue")), Some(&json!(100.0)));
        assert_eq!(find_write(&out, &format!("{base}.RGB_POWER")), Some(&json!(true)));
        assert_eq!(find_write(&out, &format!("{base}.WW")), Some(&json!(0.0)));
        assert_eq!(find_write(&out, &format!("{base}.WW_POWER")), Some(&json!(false)));
        assert_eq!(
            find_write(&out, &format!("{base}.Color")),
            Some(&json!("#FF00FF00"))
        );
    }

    #[test]
    fn test_rgbcwww_color_covers_both_whites() {
        let mut s = session();
        let out = decode_message(
            &mut s,
            "tele/dev1/STATE",
            br#"{"Color":"000000FF80"}"#,
            "tasmota.0",
        );
        let base = "tasmota.0.DVES_96ABFA";
        match find_task(&out, &format!("{base}.Color")).unwrap() {
            Descriptor::State { role, .. } => assert_eq!(role, "level.color.rgbcwww"),
            _ => panic!("expected state descriptor"),
        }
        assert_eq!(find_write(&out, &format!("{base}.CW_POWER")), Some(&json!(true)));
        assert_eq!(find_write(&out, &format!("{base}.RGB_POWER")), Some(&json!(false)));
        let ww = find_write(&out, &format!("{base}.WW")).unwrap().as_f64().unwrap();
        assert!((ww - 100.0 * 128.0 / 255.0).abs() < 1e-9);
    }

    #[test]
    fn test_plain_rgb_color_has_no_white_channels() {
        let mut s = session();
        let out = decode_message(
            &mut s,
            "tele/dev1/STATE",
            br#"{"Color":"112233"}"#,
            "tasmota.0",
        );
        let base = "tasmota.0.DVES_96ABFA";
        match find_task(&out, &format!("{base}.Color")).unwrap() {
            Descriptor::State { role, .. } => assert_eq!(role, "level.color.rgb"),
            _ => panic!("expected state descriptor"),
        }
        assert!(find_task(&out, &format!("{base}.WW")).is_none());
        assert!(find_task(&out, &format!("{base}.CW")).is_none());
    }

    #[test]
    fn test_wakeup_group_decodes_without_prefix() {
        let mut s = session();
        let out = decode_message(
            &mut s,
            "tele/dev1/WAKEUP1",
            br#"{"Wakeup":"Done"}"#,
            "tasmota.0",
        );
        assert_eq!(
            find_write(&out, "tasmota.0.DVES_96ABFA.Wakeup"),
            Some(&json!("Done"))
        );
    }
}
