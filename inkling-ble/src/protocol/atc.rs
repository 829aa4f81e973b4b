//! ATC firmware family: block-uploaded tags behind service `0x1337`.
//!
//! Capability exchange is a single request/response:
//!
//! ```text
//! request:  [0x01]
//! response: [0x01, width_lo, width_hi, height_lo, height_hi, color, flags]
//! ```
//!
//! `color` is 0 (bw), 1 (bwr) or 2 (bwy); `flags` bit 0 set means the
//! pixel buffer must be rotated before transfer.

use async_trait::async_trait;
use uuid::Uuid;

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::protocol::{Capabilities, ColorScheme, Protocol, ProtocolId};

const ATC_SERVICE_UUID: Uuid = Uuid::from_u128(0x00001337_0000_1000_8000_00805f9b34fb);

const CMD_CAPABILITIES: u8 = 0x01;
const FLAG_ROTATE_BUFFER: u8 = 0x01;

pub struct AtcProtocol;

#[async_trait]
impl Protocol for AtcProtocol {
    fn id(&self) -> ProtocolId {
        ProtocolId::Atc
    }

    fn service_uuid(&self) -> Uuid {
        ATC_SERVICE_UUID
    }

    async fn initialize(&self, _conn: &mut Connection) -> Result<()> {
        // ATC tags are ready as soon as notifications are enabled.
        Ok(())
    }

    async fn interrogate(&self, conn: &mut Connection) -> Result<Capabilities> {
        let response = conn
            .send_with_response(&[CMD_CAPABILITIES], self.command_timeout())
            .await?;
        parse_capabilities(&response)
    }
}

fn parse_capabilities(frame: &[u8]) -> Result<Capabilities> {
    if frame.len() < 7 {
        return Err(Error::Protocol(format!(
            "atc capability frame too short: {} bytes",
            frame.len()
        )));
    }
    if frame[0] != CMD_CAPABILITIES {
        return Err(Error::Protocol(format!(
            "atc capability frame has tag 0x{:02x}, expected 0x{CMD_CAPABILITIES:02x}",
            frame[0]
        )));
    }

    let width = u16::from_le_bytes([frame[1], frame[2]]);
    let height = u16::from_le_bytes([frame[3], frame[4]]);
    let color_scheme = match frame[5] {
        0 => ColorScheme::BlackWhite,
        1 => ColorScheme::BlackWhiteRed,
        2 => ColorScheme::BlackWhiteYellow,
        other => {
            return Err(Error::Protocol(format!(
                "atc reported unknown color scheme {other}"
            )));
        }
    };

    Ok(Capabilities {
        width,
        height,
        color_scheme,
        rotate_buffer: frame[6] & FLAG_ROTATE_BUFFER != 0,
    })
}
