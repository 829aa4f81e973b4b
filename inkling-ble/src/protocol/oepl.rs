//! OEPL firmware family: direct-write tags behind service `0x2446`.
//!
//! A no-response sync byte wakes the firmware's command parser after
//! notifications are enabled. The capability exchange:
//!
//! ```text
//! sync:     [0x00]                       (no response)
//! request:  [0xE1]
//! response: [0xE1, width_hi, width_lo, height_hi, height_lo, color, flags]
//! ```
//!
//! Dimensions are big-endian; `color` is 1 (bw), 2 (bwr) or 3 (bwy);
//! `flags` bit 0 requests a rotated pixel buffer.

use async_trait::async_trait;
use uuid::Uuid;

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::protocol::{Capabilities, ColorScheme, Protocol, ProtocolId};

const OEPL_SERVICE_UUID: Uuid = Uuid::from_u128(0x00002446_0000_1000_8000_00805f9b34fb);

const CMD_SYNC: u8 = 0x00;
const CMD_CAPABILITIES: u8 = 0xE1;
const FLAG_ROTATE_BUFFER: u8 = 0x01;

pub struct OeplProtocol;

#[async_trait]
impl Protocol for OeplProtocol {
    fn id(&self) -> ProtocolId {
        ProtocolId::Oepl
    }

    fn service_uuid(&self) -> Uuid {
        OEPL_SERVICE_UUID
    }

    async fn initialize(&self, conn: &mut Connection) -> Result<()> {
        conn.send(&[CMD_SYNC]).await
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
            "oepl capability frame too short: {} bytes",
            frame.len()
        )));
    }
    if frame[0] != CMD_CAPABILITIES {
        return Err(Error::Protocol(format!(
            "oepl capability frame has tag 0x{:02x}, expected 0x{CMD_CAPABILITIES:02x}",
            frame[0]
        )));
    }

    let width = u16::from_be_bytes([frame[1], frame[2]]);
    let height = u16::from_be_bytes([frame[3], frame[4]]);
    let color_scheme = match frame[5] {
        1 => ColorScheme::BlackWhite,
        2 => ColorScheme::BlackWhiteRed,
        3 => ColorScheme::BlackWhiteYellow,
        other => {
            return Err(Error::Protocol(format!(
                "oepl reported unknown color scheme {other}"
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
