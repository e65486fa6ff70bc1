//! Color math for multi-channel Tasmota lights.
//!
//! Devices report their light state as one opaque hex string packing
//! three to five channel bytes, while the state store models every
//! channel as an independently settable state. This module is the single
//! place that keeps the two representations consistent, including the
//! lossy byte ↔ percent round trip used for human-facing channel levels.

/// Hex offset of the red channel byte.
pub const RED_OFFSET: usize = 0;
/// Hex offset of the green channel byte.
pub const GREEN_OFFSET: usize = 2;
/// Hex offset of the blue channel byte.
pub const BLUE_OFFSET: usize = 4;
/// Hex offset of the cold white channel byte (10-char encodings only).
pub const COLD_WHITE_OFFSET: usize = 6;

/// Color role of a device, derived from the length of its reported
/// color encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorRole {
    /// 6 hex chars: red, green, blue.
    Rgb,
    /// 8 hex chars: red, green, blue, warm white.
    RgbWw,
    /// 10 hex chars: red, green, blue, cold white, warm white.
    RgbCwWw,
}

impl ColorRole {
    /// Select the role from the length of a reported color hex string.
    pub fn from_hex_len(len: usize) -> Self {
        match len {
            10 => ColorRole::RgbCwWw,
            8 => ColorRole::RgbWw,
            _ => ColorRole::Rgb,
        }
    }

    /// Role tag as persisted in state object metadata.
    pub fn role_name(&self) -> &'static str {
        match self {
            ColorRole::Rgb => "level.color.rgb",
            ColorRole::RgbWw => "level.color.rgbww",
            ColorRole::RgbCwWw => "level.color.rgbcwww",
        }
    }

    /// Hex offset of the warm white channel byte for this role.
    ///
    /// Plain RGB devices have no white channel; they share the 10-char
    /// offset so that composing against a short string is a no-op append.
    pub fn warm_white_offset(&self) -> usize {
        match self {
            ColorRole::RgbWw => 6,
            _ => 8,
        }
    }
}

/// Warm white offset for a persisted role tag. Unknown roles fall back
/// to the 10-char layout.
pub fn warm_white_offset_for_role(role: &str) -> usize {
    if role == ColorRole::RgbWw.role_name() {
        6
    } else {
        8
    }
}

/// HSV to RGB conversion.
///
/// H runs from 0 to 360 degrees, S and V from 0 to 100. Inputs are
/// clamped to range; results are rounded to the nearest integer.
pub fn hsv_to_rgb(h: f64, s: f64, v: f64) -> (u8, u8, u8) {
    let h = h.clamp(0.0, 360.0);
    let s = s.clamp(0.0, 100.0) / 100.0;
    let v = v.clamp(0.0, 100.0) / 100.0;

    if s == 0.0 {
        // Achromatic (grey)
        let grey = (v * 255.0).round() as u8;
        return (grey, grey, grey);
    }

    let h = h / 60.0; // sector 0 to 5
    let i = h.floor();
    let f = h - i;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));

    let (r, g, b) = match i as u32 {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };

    (
        (r * 255.0).round() as u8,
        (g * 255.0).round() as u8,
        (b * 255.0).round() as u8,
    )
}

/// Format a channel byte as a zero-padded 2-char hex string.
pub fn channel_to_hex(byte: u8) -> String {
    format!("{byte:02x}")
}

/// Channel byte to a human-facing percentage level.
pub fn byte_to_percent(byte: u8) -> f64 {
    100.0 * f64::from(byte) / 255.0
}

/// Percentage level back to a channel byte. Values outside 0..=100 are
/// clamped before conversion.
pub fn percent_to_byte(percent: f64) -> u8 {
    let percent = percent.clamp(0.0, 100.0);
    (255.0 * percent / 100.0).floor() as u8
}

/// Parse the channel byte at `offset` out of a color hex string.
pub fn channel_at(hex: &str, offset: usize) -> Option<u8> {
    let slice = hex.get(offset..offset + 2)?;
    u8::from_str_radix(slice, 16).ok()
}

/// Replace one channel slice of a color hex string, leaving every other
/// slice untouched regardless of encoding length (6/8/10 chars).
///
/// The caller is expected to have fetched the current full hex value;
/// no cross-channel validation happens here.
pub fn compose_color(hex: &str, offset: usize, replacement: &str) -> String {
    format!(
        "{}{}{}",
        clamped_slice(hex, 0, offset),
        replacement,
        clamped_slice(hex, offset + replacement.len(), 10)
    )
}

fn clamped_slice(hex: &str, start: usize, end: usize) -> &str {
    let len = hex.len();
    let start = start.min(len);
    let end = end.min(len);
    &hex[start..end]
}
