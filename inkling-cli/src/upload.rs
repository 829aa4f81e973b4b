//! Transfer implementations for the two firmware families.
//!
//! The core hands a ready [`Connection`] to an [`Uploader`]; everything
//! about the transfer wire format lives here, next to the firmware it
//! talks to.

use std::time::Duration;

use async_trait::async_trait;
use inkling_ble::{Capabilities, Connection, Result, Uploader};
use tracing::debug;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// OEPL direct-write fast path.
///
/// ```text
/// begin:  [0xE2, len_be_u32]          (no response)
/// data:   raw chunks                  (no response)
/// commit: [0xE3] -> [status]          status 0x01 = accepted
/// ```
pub struct DirectWriteUploader {
    chunk_size: usize,
}

impl Default for DirectWriteUploader {
    fn default() -> Self {
        Self { chunk_size: 200 }
    }
}

const OEPL_CMD_BEGIN: u8 = 0xE2;
const OEPL_CMD_COMMIT: u8 = 0xE3;
const OEPL_STATUS_OK: u8 = 0x01;

#[async_trait]
impl Uploader for DirectWriteUploader {
    async fn upload(
        &self,
        conn: &mut Connection,
        payload: &[u8],
        _capabilities: &Capabilities,
    ) -> Result<bool> {
        let mut begin = vec![OEPL_CMD_BEGIN];
        begin.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        conn.send(&begin).await?;

        for chunk in payload.chunks(self.chunk_size) {
            conn.send(chunk).await?;
        }

        let status = conn
            .send_with_response(&[OEPL_CMD_COMMIT], COMMAND_TIMEOUT)
            .await?;
        let accepted = status.first() == Some(&OEPL_STATUS_OK);
        debug!(accepted, bytes = payload.len(), "direct-write transfer finished");
        Ok(accepted)
    }
}

/// ATC block-based path: every block is acknowledged with its index before
/// the next one goes out, so a lost block is caught immediately instead of
/// at the end of the transfer.
///
/// ```text
/// announce: [0x02, len_le_u32, blocks_le_u16] -> [0x02, status]
/// block i:  [0x03, i_le_u16, data]            -> [0x03, i_le_u16]
/// finish:   [0x04]                            -> [0x04, status]
/// ```
pub struct BlockUploader {
    block_size: usize,
}

impl Default for BlockUploader {
    fn default() -> Self {
        Self { block_size: 128 }
    }
}

const ATC_CMD_ANNOUNCE: u8 = 0x02;
const ATC_CMD_BLOCK: u8 = 0x03;
const ATC_CMD_FINISH: u8 = 0x04;
const ATC_STATUS_OK: u8 = 0x01;

#[async_trait]
impl Uploader for BlockUploader {
    async fn upload(
        &self,
        conn: &mut Connection,
        payload: &[u8],
        _capabilities: &Capabilities,
    ) -> Result<bool> {
        let block_count = payload.len().div_ceil(self.block_size) as u16;

        let mut announce = vec![ATC_CMD_ANNOUNCE];
        announce.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        announce.extend_from_slice(&block_count.to_le_bytes());
        let ack = conn.send_with_response(&announce, COMMAND_TIMEOUT).await?;
        if ack.first() != Some(&ATC_CMD_ANNOUNCE) || ack.get(1) != Some(&ATC_STATUS_OK) {
            debug!("device refused transfer announcement");
            return Ok(false);
        }

        for (index, block) in payload.chunks(self.block_size).enumerate() {
            let index = index as u16;
            let mut frame = vec![ATC_CMD_BLOCK];
            frame.extend_from_slice(&index.to_le_bytes());
            frame.extend_from_slice(block);

            let echo = conn.send_with_response(&frame, COMMAND_TIMEOUT).await?;
            let expected = {
                let mut e = vec![ATC_CMD_BLOCK];
                e.extend_from_slice(&index.to_le_bytes());
                e
            };
            if echo != expected {
                debug!(index, "block acknowledgement mismatch");
                return Ok(false);
            }
        }

        let status = conn
            .send_with_response(&[ATC_CMD_FINISH], COMMAND_TIMEOUT)
            .await?;
        let accepted =
            status.first() == Some(&ATC_CMD_FINISH) && status.get(1) == Some(&ATC_STATUS_OK);
        debug!(accepted, blocks = block_count, "block transfer finished");
        Ok(accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkling_ble::mock::{advertisement, MockTransport};
    use inkling_ble::{
        describe, Address, ColorScheme, ProtocolId, RetryPolicy, MANUFACTURER_ATC,
        MANUFACTURER_OEPL,
    };

    fn tag_address() -> Address {
        "AA:BB:CC:DD:EE:FF".parse().unwrap()
    }

    fn caps() -> Capabilities {
        Capabilities {
            width: 296,
            height: 128,
            color_scheme: ColorScheme::BlackWhiteRed,
            rotate_buffer: false,
        }
    }

    async fn open_connection(mock: &MockTransport, protocol: ProtocolId) -> Connection {
        Connection::open(
            mock,
            tag_address(),
            describe(protocol),
            &RetryPolicy::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn direct_write_chunks_and_commits() {
        let mock = MockTransport::new();
        mock.advertise(advertisement(tag_address(), None, MANUFACTURER_OEPL, &[], None));
        // oepl sync byte, begin, two chunks, then the commit status.
        mock.reply_silence();
        mock.reply_silence();
        mock.reply_silence();
        mock.reply_silence();
        mock.reply_with(&[0x01]);

        let mut conn = open_connection(&mock, ProtocolId::Oepl).await;
        let payload = vec![0xAB; 300];
        let ok = DirectWriteUploader::default()
            .upload(&mut conn, &payload, &caps())
            .await
            .unwrap();
        assert!(ok);

        let writes = mock.writes();
        // sync, begin, 200-byte chunk, 100-byte chunk, commit
        assert_eq!(writes.len(), 5);
        assert_eq!(writes[1], vec![0xE2, 0x00, 0x00, 0x01, 0x2C]);
        assert_eq!(writes[2].len(), 200);
        assert_eq!(writes[3].len(), 100);
        assert_eq!(writes[4], vec![0xE3]);
    }

    #[tokio::test]
    async fn direct_write_reports_device_rejection() {
        let mock = MockTransport::new();
        mock.advertise(advertisement(tag_address(), None, MANUFACTURER_OEPL, &[], None));
        mock.reply_silence();
        mock.reply_silence();
        mock.reply_silence();
        mock.reply_with(&[0x00]); // commit refused

        let mut conn = open_connection(&mock, ProtocolId::Oepl).await;
        let ok = DirectWriteUploader::default()
            .upload(&mut conn, &[0x00; 100], &caps())
            .await
            .unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn block_upload_acknowledges_every_block() {
        let mock = MockTransport::new();
        mock.advertise(advertisement(tag_address(), None, MANUFACTURER_ATC, &[], None));
        mock.reply_with(&[0x02, 0x01]); // announce accepted
        mock.reply_with(&[0x03, 0x00, 0x00]); // block 0
        mock.reply_with(&[0x03, 0x01, 0x00]); // block 1
        mock.reply_with(&[0x03, 0x02, 0x00]); // block 2
        mock.reply_with(&[0x04, 0x01]); // finish accepted

        let mut conn = open_connection(&mock, ProtocolId::Atc).await;
        let payload = vec![0xCD; 300]; // 3 blocks of 128/128/44
        let ok = BlockUploader::default()
            .upload(&mut conn, &payload, &caps())
            .await
            .unwrap();
        assert!(ok);

        let writes = mock.writes();
        assert_eq!(writes.len(), 5);
        // announce: tag, 300 LE, 3 blocks LE
        assert_eq!(writes[0], vec![0x02, 0x2C, 0x01, 0x00, 0x00, 0x03, 0x00]);
        assert_eq!(writes[1][..3], [0x03, 0x00, 0x00]);
        assert_eq!(writes[1].len(), 3 + 128);
        assert_eq!(writes[3].len(), 3 + 44);
        assert_eq!(writes[4], vec![0x04]);
    }

    #[tokio::test]
    async fn block_upload_stops_on_echo_mismatch() {
        let mock = MockTransport::new();
        mock.advertise(advertisement(tag_address(), None, MANUFACTURER_ATC, &[], None));
        mock.reply_with(&[0x02, 0x01]);
        mock.reply_with(&[0x03, 0x05, 0x00]); // wrong index echoed

        let mut conn = open_connection(&mock, ProtocolId::Atc).await;
        let ok = BlockUploader::default()
            .upload(&mut conn, &[0x00; 64], &caps())
            .await
            .unwrap();
        assert!(!ok);
        // announce + first block only, no finish
        assert_eq!(mock.writes().len(), 2);
    }

    #[tokio::test]
    async fn block_upload_stops_on_refused_announce() {
        let mock = MockTransport::new();
        mock.advertise(advertisement(tag_address(), None, MANUFACTURER_ATC, &[], None));
        mock.reply_with(&[0x02, 0x00]);

        let mut conn = open_connection(&mock, ProtocolId::Atc).await;
        let ok = BlockUploader::default()
            .upload(&mut conn, &[0x00; 64], &caps())
            .await
            .unwrap();
        assert!(!ok);
        assert_eq!(mock.writes().len(), 1);
    }
}
