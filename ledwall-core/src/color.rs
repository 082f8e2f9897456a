//! Immutable RGB color value.
//!
//! Two colors are equal iff their hex strings match. Opacity is carried for
//! the UI layer only: it takes no part in equality, hashing, or the wire
//! format.
//!
//! Hex strings are always emitted lowercase with a leading `#` (`#ff0000`).

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ColorError {
    #[error("Invalid hex color: {0:?}")]
    InvalidHex(String),
}

/// RGB color with optional opacity.
///
/// Serialized as `{ "red": .., "green": .., "blue": .. }`, the shape the
/// LED API uses. Channels are read through accessors; a color never changes
/// after construction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Color {
    red: u8,
    green: u8,
    blue: u8,
    #[serde(skip)]
    opacity: Option<f32>,
}

impl Color {
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const BLACK: Color = Color::rgb(0, 0, 0);

    pub const fn rgb(red: u8, green: u8, blue: u8) -> Self {
        Self {
            red,
            green,
            blue,
            opacity: None,
        }
    }

    /// Opacity is clamped to `[0, 1]`.
    pub fn rgba(red: u8, green: u8, blue: u8, opacity: f32) -> Self {
        Self {
            red,
            green,
            blue,
            opacity: Some(opacity.clamp(0.0, 1.0)),
        }
    }

    /// Build from floating point channels, clamping to `[0, 255]` and
    /// truncating the fractional part.
    pub fn from_f32_channels(red: f32, green: f32, blue: f32) -> Self {
        fn channel(value: f32) -> u8 {
            if value.is_nan() {
                return 0;
            }
            value.clamp(0.0, 255.0) as u8
        }
        Self::rgb(channel(red), channel(green), channel(blue))
    }

    /// Parse `#rrggbb`, `rrggbb`, `#rgb` or `rgb` (any case).
    pub fn from_hex(input: &str) -> Result<Self, ColorError> {
        let invalid = || ColorError::InvalidHex(input.to_string());
        let trimmed = input.trim();
        let digits = trimmed.strip_prefix('#').unwrap_or(trimmed);
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }

        match digits.len() {
            6 => {
                let byte = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).map_err(|_| invalid());
                Ok(Self::rgb(byte(0)?, byte(2)?, byte(4)?))
            }
            3 => {
                let nibble = |i: usize| {
                    u8::from_str_radix(&digits[i..i + 1], 16)
                        .map(|n| n * 17)
                        .map_err(|_| invalid())
                };
                Ok(Self::rgb(nibble(0)?, nibble(1)?, nibble(2)?))
            }
            _ => Err(invalid()),
        }
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.red, self.green, self.blue)
    }

    pub fn red(&self) -> u8 {
        self.red
    }

    pub fn green(&self) -> u8 {
        self.green
    }

    pub fn blue(&self) -> u8 {
        self.blue
    }

    pub fn to_rgb(&self) -> (u8, u8, u8) {
        (self.red, self.green, self.blue)
    }

    /// HSL lightness in `[0, 1]`.
    pub fn lightness(&self) -> f32 {
        let max = self.red.max(self.green).max(self.blue) as f32;
        let min = self.red.min(self.green).min(self.blue) as f32;
        (max + min) / 2.0 / 255.0
    }

    pub fn opacity(&self) -> Option<f32> {
        self.opacity
    }

    pub fn with_opacity(self, opacity: f32) -> Self {
        Self::rgba(self.red, self.green, self.blue, opacity)
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

impl PartialEq for Color {
    fn eq(&self, other: &Self) -> bool {
        self.to_rgb() == other.to_rgb()
    }
}

impl Eq for Color {}

impl Hash for Color {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_rgb().hash(state);
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Color {
    type Err = ColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<(u8, u8, u8)> for Color {
    fn from((red, green, blue): (u8, u8, u8)) -> Self {
        Self::rgb(red, green, blue)
    }
}

impl From<Color> for [u8; 3] {
    fn from(color: Color) -> Self {
        [color.red, color.green, color.blue]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_is_lowercase_with_hash() {
        assert_eq!(Color::rgb(255, 0, 0).to_hex(), "#ff0000");
        assert_eq!(Color::rgb(0x0a, 0xbc, 0xde).to_hex(), "#0abcde");
        assert_eq!(Color::WHITE.to_hex(), "#ffffff");
    }

    #[test]
    fn test_from_hex_forms() {
        assert_eq!(Color::from_hex("#FF8000").unwrap().to_rgb(), (255, 128, 0));
        assert_eq!(Color::from_hex("ff8000").unwrap().to_rgb(), (255, 128, 0));
        assert_eq!(Color::from_hex("#f80").unwrap().to_rgb(), (255, 136, 0));
        assert_eq!("#00ff00".parse::<Color>().unwrap(), Color::rgb(0, 255, 0));
    }

    #[test]
    fn test_from_hex_rejects_garbage() {
        assert!(Color::from_hex("").is_err());
        assert!(Color::from_hex("#12345").is_err());
        assert!(Color::from_hex("#gg0000").is_err());
        assert!(Color::from_hex("#ff00001").is_err());
        assert!(Color::from_hex("#+f0000").is_err());
    }

    #[test]
    fn test_from_hex_allows_a_single_hash_only() {
        assert!(Color::from_hex("##ff0000").is_err());
        assert!(Color::from_hex("###fff").is_err());
        assert!(Color::from_hex("#").is_err());
    }

    #[test]
    fn test_hex_roundtrip_is_consistent() {
        let color = Color::rgb(18, 52, 86);
        assert_eq!(Color::from_hex(&color.to_hex()).unwrap(), color);
    }

    #[test]
    fn test_equality_ignores_opacity() {
        let opaque = Color::rgb(10, 20, 30);
        let faded = Color::rgba(10, 20, 30, 0.25);
        assert_eq!(opaque, faded);
        assert_eq!(faded.opacity(), Some(0.25));
        assert_ne!(opaque, Color::rgb(10, 20, 31));
    }

    #[test]
    fn test_lightness() {
        assert_eq!(Color::BLACK.lightness(), 0.0);
        assert_eq!(Color::WHITE.lightness(), 1.0);
        assert_eq!(Color::rgb(255, 0, 0).lightness(), 0.5);
        let grey = Color::rgb(51, 51, 51).lightness();
        assert!((grey - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_float_channels_clamp_and_truncate() {
        let color = Color::from_f32_channels(300.0, -4.0, 127.9);
        assert_eq!(color.to_rgb(), (255, 0, 127));
        assert_eq!(Color::from_f32_channels(f32::NAN, 0.0, 0.0).red(), 0);
    }

    #[test]
    fn test_channel_accessors() {
        let color = Color::rgb(12, 34, 56);
        assert_eq!((color.red(), color.green(), color.blue()), color.to_rgb());
        assert_eq!(<[u8; 3]>::from(color), [12, 34, 56]);
    }

    #[test]
    fn test_opacity_clamped() {
        assert_eq!(Color::rgba(0, 0, 0, 3.0).opacity(), Some(1.0));
        assert_eq!(Color::BLACK.with_opacity(-1.0).opacity(), Some(0.0));
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_string(&Color::rgb(1, 2, 3)).unwrap();
        assert_eq!(json, r#"{"red":1,"green":2,"blue":3}"#);
        let parsed: Color = serde_json::from_str(r#"{"red":9,"green":8,"blue":7}"#).unwrap();
        assert_eq!(parsed.to_rgb(), (9, 8, 7));
        assert_eq!(parsed.opacity(), None);
    }
}
