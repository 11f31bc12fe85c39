//! Flat key/value option store and color option parsing.
//!
//! Options are read by key (`Disasm/Syntax`, `Disasm/Color/...`). Color values
//! have the form `"main|background"`, where either half may be empty.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize, Serializer};

use crate::DisassemblyError;

pub const SYNTAX_KEY: &str = "Disasm/Syntax";

/// Read access to option values.
pub trait OptionStore {
    fn get_value(&self, key: &str) -> Option<String>;
}

impl OptionStore for HashMap<String, String> {
    fn get_value(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// In-memory option store, loadable from a JSON object of strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Options {
    values: HashMap<String, String>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `{"Disasm/Syntax": "INTEL", ...}`.
    pub fn from_json(text: &str) -> Result<Self, DisassemblyError> {
        serde_json::from_str(text).map_err(|e| DisassemblyError::ParsingError(format!("options: {}", e)))
    }

    pub fn load(path: &Path) -> Result<Self, DisassemblyError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }
}

impl OptionStore for Options {
    fn get_value(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// 24-bit RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

const NAMED_COLORS: &[(&str, Color)] = &[
    ("black", Color::rgb(0x00, 0x00, 0x00)),
    ("white", Color::rgb(0xff, 0xff, 0xff)),
    ("red", Color::rgb(0xff, 0x00, 0x00)),
    ("green", Color::rgb(0x00, 0x80, 0x00)),
    ("lime", Color::rgb(0x00, 0xff, 0x00)),
    ("blue", Color::rgb(0x00, 0x00, 0xff)),
    ("yellow", Color::rgb(0xff, 0xff, 0x00)),
    ("cyan", Color::rgb(0x00, 0xff, 0xff)),
    ("magenta", Color::rgb(0xff, 0x00, 0xff)),
    ("gray", Color::rgb(0x80, 0x80, 0x80)),
    ("grey", Color::rgb(0x80, 0x80, 0x80)),
    ("orange", Color::rgb(0xff, 0xa5, 0x00)),
    ("purple", Color::rgb(0x80, 0x00, 0x80)),
    ("brown", Color::rgb(0xa5, 0x2a, 0x2a)),
    ("navy", Color::rgb(0x00, 0x00, 0x80)),
    ("maroon", Color::rgb(0x80, 0x00, 0x00)),
    ("olive", Color::rgb(0x80, 0x80, 0x00)),
    ("teal", Color::rgb(0x00, 0x80, 0x80)),
    ("silver", Color::rgb(0xc0, 0xc0, 0xc0)),
    ("darkred", Color::rgb(0x8b, 0x00, 0x00)),
    ("darkgreen", Color::rgb(0x00, 0x64, 0x00)),
    ("darkblue", Color::rgb(0x00, 0x00, 0x8b)),
];

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl FromStr for Color {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        if let Some(hex) = text.strip_prefix('#') {
            let digits: Option<Vec<u8>> = hex.chars().map(|c| c.to_digit(16).map(|d| d as u8)).collect();
            return match digits.as_deref() {
                Some(&[r, g, b]) => Ok(Color::rgb(r * 0x11, g * 0x11, b * 0x11)),
                Some(&[r1, r2, g1, g2, b1, b2]) => Ok(Color::rgb(r1 << 4 | r2, g1 << 4 | g2, b1 << 4 | b2)),
                _ => Err(format!("Invalid color: {}", s)),
            };
        }
        let name = text.to_ascii_lowercase();
        NAMED_COLORS
            .iter()
            .find(|(known, _)| *known == name)
            .map(|(_, color)| *color)
            .ok_or_else(|| format!("Unknown color: {}", s))
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Foreground and background color of one text category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ColorRecord {
    pub main: Option<Color>,
    pub background: Option<Color>,
}

impl ColorRecord {
    /// Parse `"main|background"`. Unparsable halves are left unset.
    pub fn parse(value: &str) -> Self {
        let (main, background) = value.split_once('|').unwrap_or((value, ""));
        let half = |text: &str| if text.trim().is_empty() { None } else { text.parse().ok() };
        Self { main: half(main), background: half(background) }
    }

    /// Read and parse `key` from `store`; a missing key is an empty record.
    pub fn from_store(store: &dyn OptionStore, key: &str) -> Self {
        store.get_value(key).map(|value| Self::parse(&value)).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.main.is_none() && self.background.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    #[rstest]
    #[case("#f00", Color::rgb(0xff, 0, 0))]
    #[case("#1e90ff", Color::rgb(0x1e, 0x90, 0xff))]
    #[case("Blue", Color::rgb(0, 0, 0xff))]
    #[case(" gray ", Color::rgb(0x80, 0x80, 0x80))]
    fn test_parse_color(#[case] text: &str, #[case] expected: Color) {
        assert_eq!(text.parse::<Color>().unwrap(), expected);
    }

    #[rstest]
    #[case("#12")]
    #[case("#gggggg")]
    #[case("chartreuse-ish")]
    fn test_reject_color(#[case] text: &str) {
        assert!(text.parse::<Color>().is_err());
    }

    #[test]
    fn test_color_record_halves() {
        let record = ColorRecord::parse("red|#000");
        assert_eq!(record.main, Some(Color::rgb(0xff, 0, 0)));
        assert_eq!(record.background, Some(Color::rgb(0, 0, 0)));

        let record = ColorRecord::parse("|yellow");
        assert_eq!(record.main, None);
        assert_eq!(record.background, Some(Color::rgb(0xff, 0xff, 0)));

        assert_eq!(ColorRecord::parse("#00ff00").background, None);
        assert!(ColorRecord::parse("").is_empty());
        assert!(ColorRecord::parse("nonsense|").is_empty());
    }

    #[test]
    fn test_options_from_json() {
        let options = Options::from_json(r#"{"Disasm/Syntax": "ATT", "Disasm/Color/Regs": "blue|"}"#).unwrap();
        assert_eq!(options.get_value(SYNTAX_KEY).as_deref(), Some("ATT"));
        assert_eq!(ColorRecord::from_store(&options, "Disasm/Color/Regs").main, Some(Color::rgb(0, 0, 0xff)));
        assert!(ColorRecord::from_store(&options, "Disasm/Color/Refs").is_empty());
        assert!(Options::from_json("[1, 2]").is_err());
    }

    #[test]
    fn test_options_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"Disasm/Syntax": "MASM"}}"#).unwrap();
        let options = Options::load(file.path()).unwrap();
        assert_eq!(options.get_value(SYNTAX_KEY).as_deref(), Some("MASM"));
    }

    #[test]
    fn test_color_display() {
        assert_eq!(Color::rgb(0x1e, 0x90, 0xff).to_string(), "#1e90ff");
        let json = serde_json::to_string(&ColorRecord::parse("#fff|")).unwrap();
        assert_eq!(json, r##"{"main":"#ffffff","background":null}"##);
    }
}
