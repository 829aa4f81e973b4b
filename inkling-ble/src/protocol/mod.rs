//! Protocol families and the capability-negotiation contract.
//!
//! Two display firmware families are supported. Each advertises a reserved
//! manufacturer code and exposes one GATT service whose single
//! characteristic carries both commands and notification responses:
//!
//! | family | manufacturer code | service |
//! |--------|-------------------|---------|
//! | ATC    | `0x1337`          | `00001337-...` |
//! | OEPL   | `0x2446`          | `00002446-...` |

mod atc;
mod oepl;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::connection::Connection;
use crate::error::{Error, Result};

pub use atc::AtcProtocol;
pub use oepl::OeplProtocol;

/// Manufacturer code reserved by the ATC firmware family.
pub const MANUFACTURER_ATC: u16 = 0x1337;
/// Manufacturer code reserved by the OEPL firmware family.
pub const MANUFACTURER_OEPL: u16 = 0x2446;

/// Identifier of a supported protocol family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolId {
    Atc,
    Oepl,
}

impl ProtocolId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolId::Atc => "atc",
            ProtocolId::Oepl => "oepl",
        }
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolId {
    type Err = Error;

    /// Parses an explicit user/config protocol choice. Unknown names are a
    /// configuration mistake and fail immediately, never retried.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "atc" => Ok(ProtocolId::Atc),
            "oepl" => Ok(ProtocolId::Oepl),
            other => Err(Error::UnsupportedProtocol(other.to_string())),
        }
    }
}

/// Color reproduction a display panel supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorScheme {
    /// Black on white.
    BlackWhite,
    /// Black and red on white.
    BlackWhiteRed,
    /// Black and yellow on white.
    BlackWhiteYellow,
}

impl ColorScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColorScheme::BlackWhite => "bw",
            ColorScheme::BlackWhiteRed => "bwr",
            ColorScheme::BlackWhiteYellow => "bwy",
        }
    }
}

impl fmt::Display for ColorScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Negotiated result of a capability handshake. Produced once per
/// successful handshake and immutable thereafter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub width: u16,
    pub height: u16,
    pub color_scheme: ColorScheme,
    /// Whether the uploader must rotate the pixel buffer 90 degrees before
    /// transfer (panels mounted sideways in the tag housing).
    pub rotate_buffer: bool,
}

/// Capability-negotiation contract of one protocol family.
///
/// `initialize` runs as the last step of connection establishment; a
/// failure there tears the attempt down and is retried by the connection
/// loop. `interrogate` is issued on a ready connection and must not retry
/// internally: malformed framing is a protocol error, and recovery (if
/// any) happens one layer up by re-linking from scratch.
#[async_trait]
pub trait Protocol: Send + Sync {
    fn id(&self) -> ProtocolId;

    /// The GATT service whose characteristic carries this family's
    /// commands and notifications.
    fn service_uuid(&self) -> Uuid;

    /// Default deadline for one request/response exchange.
    fn command_timeout(&self) -> Duration {
        Duration::from_secs(10)
    }

    /// Post-subscribe session setup, if the family needs any.
    async fn initialize(&self, conn: &mut Connection) -> Result<()>;

    /// Query the display's capabilities.
    async fn interrogate(&self, conn: &mut Connection) -> Result<Capabilities>;
}

/// Look up the descriptor for a protocol family.
pub fn describe(id: ProtocolId) -> &'static dyn Protocol {
    match id {
        ProtocolId::Atc => &AtcProtocol,
        ProtocolId::Oepl => &OeplProtocol,
    }
}

/// Map an advertisement's manufacturer code to a protocol family.
///
/// Unknown codes are not an error; the advertisement simply is not a
/// display tag and is absent from discovery results.
pub fn classify(manufacturer_id: u16) -> Option<ProtocolId> {
    match manufacturer_id {
        MANUFACTURER_ATC => Some(ProtocolId::Atc),
        MANUFACTURER_OEPL => Some(ProtocolId::Oepl),
        _ => None,
    }
}
