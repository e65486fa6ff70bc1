//! Static attribute type registry.
//!
//! Maps every Tasmota attribute name the gateway understands to its
//! semantic descriptor: value kind, capability role, unit and access
//! flags. Firmware localizations report some sensors under German
//! names, so those aliases map to the same roles as their English
//! counterparts. Unknown names are skipped by the decoder.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

/// Value kind of a decoded attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Number,
    Boolean,
    Text,
    Structured,
}

/// Semantic descriptor for one attribute name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrType {
    pub kind: ValueKind,
    pub role: &'static str,
    pub unit: Option<&'static str>,
    pub readable: bool,
    pub writable: bool,
    /// Remember the topic this attribute was seen on so the reverse
    /// path knows where to send commands.
    pub store_map: bool,
}

const fn ro_num(role: &'static str, unit: Option<&'static str>) -> AttrType {
    AttrType {
        kind: ValueKind::Number,
        role,
        unit,
        readable: true,
        writable: false,
        store_map: false,
    }
}

const fn rw_num(role: &'static str) -> AttrType {
    AttrType {
        kind: ValueKind::Number,
        role,
        unit: None,
        readable: true,
        writable: true,
        store_map: false,
    }
}

const fn switch() -> AttrType {
    AttrType {
        kind: ValueKind::Boolean,
        role: "switch",
        unit: None,
        readable: true,
        writable: true,
        store_map: true,
    }
}

const fn ro_bool(role: &'static str) -> AttrType {
    AttrType {
        kind: ValueKind::Boolean,
        role,
        unit: None,
        readable: true,
        writable: false,
        store_map: false,
    }
}

const fn ro_str(role: &'static str) -> AttrType {
    AttrType {
        kind: ValueKind::Text,
        role,
        unit: None,
        readable: true,
        writable: false,
        store_map: false,
    }
}

const fn rw_str(role: &'static str) -> AttrType {
    AttrType {
        kind: ValueKind::Text,
        role,
        unit: None,
        readable: true,
        writable: true,
        store_map: false,
    }
}

const fn structured(role: &'static str) -> AttrType {
    AttrType {
        kind: ValueKind::Structured,
        role,
        unit: None,
        readable: true,
        writable: true,
        store_map: false,
    }
}

#[rustfmt::skip]
static TABLE: &[(&str, AttrType)] = &[
    ("Temperature",      ro_num("value.temperature", Some("°C"))),
    ("Humidity",         ro_num("value.humidity", Some("%"))),
    ("Temperatur",       ro_num("value.temperature", Some("°C"))),
    ("Feuchtigkeit",     ro_num("value.humidity", Some("%"))),
    ("Vcc",              ro_num("value.voltage", Some("V"))),
    ("VCC",              ro_num("value.voltage", Some("V"))),
    ("Laufzeit",         ro_num("value.duration", Some("hours"))),
    ("RSSI",             ro_num("value.rssi", None)),
    ("POWER",            switch()),
    ("POWER1",           switch()),
    ("POWER2",           switch()),
    ("POWER3",           switch()),
    ("POWER4",           switch()),
    ("POWER5",           switch()),
    ("POWER6",           switch()),
    ("POWER7",           switch()),
    ("POWER8",           switch()),
    ("Switch1",          ro_bool("switch")),
    ("Switch2",          ro_bool("switch")),
    ("Switch3",          ro_bool("switch")),
    ("Switch4",          ro_bool("switch")),
    ("Total",            ro_num("value.power.consumption", Some("kWh"))),
    ("Today",            ro_num("value.power.consumption", Some("kWh"))),
    ("heute",            ro_num("value.power.consumption", Some("kWh"))),
    ("Yesterday",        ro_num("value.power.consumption", Some("kWh"))),
    ("gestern",          ro_num("value.power.consumption", Some("kWh"))),
    ("Faktor",           ro_num("value", None)),
    ("Factor",           ro_num("value", None)),
    ("Power",            ro_num("value.power.consumption", Some("W"))),
    ("Leistung",         ro_num("value.power.consumption", Some("W"))),
    ("Voltage",          ro_num("value.voltage", Some("V"))),
    ("Spannung",         ro_num("value.voltage", Some("V"))),
    ("Current",          ro_num("value.current", Some("A"))),
    ("Strom",            ro_num("value.current", Some("A"))),
    ("Punkt",            ro_num("value", Some("?"))),
    ("Counter1",         ro_num("value", None)),
    ("Counter2",         ro_num("value", None)),
    ("Counter3",         ro_num("value", None)),
    ("Counter4",         ro_num("value", None)),
    ("Pressure",         ro_num("value.pressure", Some("P"))),
    ("SeaPressure",      ro_num("value.pressure", Some("P"))),
    ("Druck",            ro_num("value.pressure", Some("P"))),
    ("Approx. Altitude", ro_num("value.altitude", Some("m"))),
    ("Module",           ro_str("state")),
    ("Version",          ro_str("state")),
    ("Hostname",         ro_str("state")),
    ("IPAddress",        ro_str("state")),
    ("IPaddress",        ro_str("state")),
    ("RestartReason",    ro_str("state")),
    ("CarbonDioxide",    ro_num("value.CO2", Some("ppm"))),
    ("Illuminance",      ro_num("value.illuminance", Some("lx"))),
    ("Analog0",          ro_num("value", None)),
    ("Analog1",          ro_num("value", None)),
    ("Analog2",          ro_num("value", None)),
    ("Analog3",          ro_num("value", None)),
    ("Light",            ro_num("value", Some("lx"))),
    ("Noise",            ro_num("value", Some("dB"))),
    ("AirQuality",       ro_num("value", Some("%"))),
    ("Total_in",         ro_num("value.power.consumption", Some("kWh"))),
    ("Total_out",        ro_num("value.power.consumption", Some("kWh"))),
    ("Power_curr",       ro_num("value.power.consumption", Some("W"))),
    ("Outsidetemp",      ro_num("value.temperature", Some("°C"))),
    ("Roomtemp",         ro_num("value.temperature", Some("°C"))),
    ("Boiler",           ro_num("value.temperature", Some("°C"))),
    ("Returns",          ro_num("value.temperature", Some("°C"))),
    ("Warmwater",        ro_num("value.temperature", Some("°C"))),
    ("Burner",           ro_num("value", None)),
    ("Status",           ro_num("value", None)),
    ("Solarstorage",     ro_num("value.temperature", Some("°C"))),
    ("Collector",        ro_num("value.temperature", Some("°C"))),
    ("Solarpump",        ro_num("value", None)),
    ("TVOC",             ro_num("value.tvoc", Some("ppb"))),
    ("eCO2",             ro_num("value.eco2", Some("ppm"))),
    ("Dimmer",           rw_num("level.dimmer")),
    ("Color",            rw_str("level.color.rgb")),
    ("Hue",              rw_num("level.color.hue")),
    ("Saturation",       rw_num("level.color.saturation")),
    ("Red",              rw_num("level.color.red")),
    ("Green",            rw_num("level.color.green")),
    ("Blue",             rw_num("level.color.blue")),
    ("WW",               rw_num("level.color.ww")),
    ("WW_POWER",         switch()),
    ("RGB_POWER",        switch()),
    ("CW",               rw_num("level.color.cw")),
    ("CT",               rw_num("level.color.temp")),
    ("CW_POWER",         switch()),
    ("Scheme",           ro_num("value", None)),
    ("Speed",            ro_num("value", None)),
    ("Wakeup",           rw_str("state")),
    ("IrReceived",       structured("state")),
    ("PROTOCOL",         rw_str("state")),
    ("BITS",             ro_num("value", None)),
    ("DATA",             rw_str("state")),
];

static TYPES: LazyLock<HashMap<&'static str, &'static AttrType>> =
    LazyLock::new(|| TABLE.iter().map(|(name, ty)| (*name, ty)).collect());

/// Look up the descriptor for an attribute name. Returns `None` for
/// names the gateway does not understand.
pub fn lookup(name: &str) -> Option<&'static AttrType> {
    TYPES.get(name).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_known_attributes() {
        let power = lookup("POWER1").unwrap();
        assert_eq!(power.kind, ValueKind::Boolean);
        assert_eq!(power.role, "switch");
        assert!(power.store_map);

        let vcc = lookup("Vcc").unwrap();
        assert_eq!(vcc.kind, ValueKind::Number);
        assert_eq!(vcc.unit, Some("V"));
        assert!(!vcc.writable);
    }

    #[test]
    fn test_lookup_unknown_attribute() {
        assert!(lookup("Time").is_none());
        assert!(lookup("Wifi").is_none());
        assert!(lookup("power").is_none());
    }

    #[test]
    fn test_german_aliases_share_roles() {
        assert_eq!(lookup("Temperatur").unwrap().role, lookup("Temperature").unwrap().role);
        assert_eq!(lookup("Spannung").unwrap().role, lookup("Voltage").unwrap().role);
    }

    #[test]
    fn test_table_has_no_duplicate_names() {
        assert_eq!(TABLE.len(), TYPES.len());
    }
}
