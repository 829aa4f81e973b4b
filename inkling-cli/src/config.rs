//! TOML layout configuration: which device, what to draw.
//!
//! ```toml
//! [device]
//! address = "AA:BB:CC:DD:EE:FF"
//! protocol = "auto"
//!
//! [display]
//! background = "white"
//! rotate = 90
//!
//! [[content]]
//! type = "text"
//! text = "Hello"
//! x = 10
//! y = 10
//! font_size = 24
//! ```

use std::path::Path;
use std::str::FromStr;

use inkling_ble::{Address, ProtocolId};
use serde::Deserialize;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid TOML syntax: {0}")]
    Syntax(#[from] toml::de::Error),

    #[error("invalid device address '{0}'")]
    Address(String),

    #[error("invalid protocol '{0}', expected 'auto', 'atc' or 'oepl'")]
    Protocol(String),

    #[error("invalid rotation {0}, expected 0, 90, 180 or 270")]
    Rotation(u16),

    #[error("content element {index}: {reason}")]
    Element { index: usize, reason: String },
}

#[derive(Deserialize, Debug)]
pub struct Config {
    pub device: DeviceSection,
    #[serde(default)]
    pub display: DisplaySection,
    #[serde(default)]
    pub content: Vec<Element>,
}

#[derive(Deserialize, Debug)]
pub struct DeviceSection {
    pub address: String,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    "auto".to_string()
}

#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct DisplaySection {
    pub background: Color,
    pub rotate: u16,
}

impl Default for DisplaySection {
    fn default() -> Self {
        Self {
            background: Color::White,
            rotate: 0,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White,
    Black,
    Red,
    Yellow,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Element {
    Text {
        text: String,
        x: i32,
        y: i32,
        #[serde(default = "default_font_size")]
        font_size: u32,
        #[serde(default = "default_color")]
        color: Color,
    },
    Rectangle {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        #[serde(default = "default_color")]
        color: Color,
        #[serde(default = "default_filled")]
        filled: bool,
    },
    Line {
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
        #[serde(default = "default_color")]
        color: Color,
        #[serde(default = "default_line_width")]
        width: u32,
    },
}

fn default_font_size() -> u32 {
    16
}

fn default_color() -> Color {
    Color::Black
}

fn default_filled() -> bool {
    true
}

fn default_line_width() -> u32 {
    1
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// The validated device address, normalized.
    pub fn address(&self) -> Result<Address, ConfigError> {
        Address::from_str(&self.device.address)
            .map_err(|_| ConfigError::Address(self.device.address.clone()))
    }

    /// The requested protocol; `None` means auto-detection.
    pub fn protocol(&self) -> Result<Option<ProtocolId>, ConfigError> {
        if self.device.protocol == "auto" {
            return Ok(None);
        }
        ProtocolId::from_str(&self.device.protocol)
            .map(Some)
            .map_err(|_| ConfigError::Protocol(self.device.protocol.clone()))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.address()?;
        self.protocol()?;

        if !matches!(self.display.rotate, 0 | 90 | 180 | 270) {
            return Err(ConfigError::Rotation(self.display.rotate));
        }

        for (index, element) in self.content.iter().enumerate() {
            validate_element(element).map_err(|reason| ConfigError::Element {
                index: index + 1,
                reason,
            })?;
        }
        Ok(())
    }
}

fn validate_element(element: &Element) -> Result<(), String> {
    match element {
        Element::Text { text, font_size, .. } => {
            if text.is_empty() {
                return Err("text must not be empty".into());
            }
            if *font_size == 0 {
                return Err("font_size must be positive".into());
            }
        }
        Element::Rectangle { width, height, .. } => {
            if *width == 0 || *height == 0 {
                return Err("width and height must be positive".into());
            }
        }
        Element::Line { width, .. } => {
            if *width == 0 {
                return Err("line width must be positive".into());
            }
        }
    }
    Ok(())
}
