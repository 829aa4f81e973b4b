//! Device orchestration: connect-and-interrogate, upload-with-retry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::address::Address;
use crate::connection::Connection;
use crate::discovery::{self, DeviceDescriptor};
use crate::error::{Error, Result};
use crate::protocol::{self, Capabilities, ProtocolId};
use crate::retry::RetryPolicy;
use crate::transport::Transport;

/// Cap on the discovery scan used to auto-detect a device's protocol.
const AUTO_DETECT_SCAN_CAP: Duration = Duration::from_secs(10);

/// What `connect` learned about a device. Information, not a live session.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub address: Address,
    pub protocol: ProtocolId,
    pub name: String,
    pub capabilities: Capabilities,
}

/// Transfers a rendered payload over a ready connection.
///
/// The wire encoding of the transfer is the uploader's business, not this
/// crate's; implementations live with the application. `Ok(false)` means
/// the device reported failure — distinct from a transport error, but both
/// are retried by [`DeviceManager::upload`].
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(
        &self,
        conn: &mut Connection,
        payload: &[u8],
        capabilities: &Capabilities,
    ) -> Result<bool>;
}

/// Composes discovery, connection lifecycle and the protocol registry into
/// the two user-facing operations.
pub struct DeviceManager {
    transport: Arc<dyn Transport>,
    link_policy: RetryPolicy,
    uploaders: HashMap<ProtocolId, Arc<dyn Uploader>>,
}

impl DeviceManager {
    pub fn new(transport: Arc<dyn Transport>, link_policy: RetryPolicy) -> Self {
        Self {
            transport,
            link_policy,
            uploaders: HashMap::new(),
        }
    }

    /// Register the transfer implementation for one protocol family.
    pub fn register_uploader(&mut self, protocol: ProtocolId, uploader: Arc<dyn Uploader>) {
        self.uploaders.insert(protocol, uploader);
    }

    /// List nearby display tags.
    pub async fn discover(&self, timeout: Duration) -> Result<Vec<DeviceDescriptor>> {
        discovery::scan(self.transport.as_ref(), timeout).await
    }

    /// Connect to a device and interrogate its capabilities.
    ///
    /// With no explicit `protocol`, the device is located by a discovery
    /// scan (bounded to `min(timeout, 10s)`) and its classified family is
    /// used; a device that does not show up is a hard error, never a
    /// fallback to some default family. The connection used for the
    /// handshake is closed before returning.
    pub async fn connect(
        &self,
        address: Address,
        protocol: Option<ProtocolId>,
        timeout: Duration,
    ) -> Result<DeviceInfo> {
        info!(%address, "connecting to device");

        let (protocol_id, advertised_name) = match protocol {
            Some(id) => (id, None),
            None => {
                let descriptor = discovery::find_by_address(
                    self.transport.as_ref(),
                    address,
                    timeout.min(AUTO_DETECT_SCAN_CAP),
                )
                .await?
                .ok_or(Error::NotFound { address })?;
                info!(protocol = %descriptor.protocol, "auto-detected protocol");
                (descriptor.protocol, Some(descriptor.name))
            }
        };

        let handler = protocol::describe(protocol_id);
        let mut conn =
            Connection::open(self.transport.as_ref(), address, handler, &self.link_policy)
                .await?;

        debug!(%address, "interrogating device");
        let capabilities = match handler.interrogate(&mut conn).await {
            Ok(capabilities) => capabilities,
            Err(err) => {
                conn.close().await;
                return Err(err);
            }
        };
        conn.close().await;

        info!(
            %address,
            width = capabilities.width,
            height = capabilities.height,
            color_scheme = %capabilities.color_scheme,
            "device interrogated"
        );

        Ok(DeviceInfo {
            address,
            protocol: protocol_id,
            name: advertised_name
                .unwrap_or_else(|| format!("EInk Device ({})", protocol_id.as_str().to_uppercase())),
            capabilities,
        })
    }

    /// Transfer `payload` to the device, retrying whole open-transfer-close
    /// cycles per `policy`.
    ///
    /// Each attempt opens a brand-new connection; a transfer that died
    /// mid-flight must not inherit a link in an unknown state. Exhausting
    /// the budget returns `false` rather than an error, so callers always
    /// get a definitive outcome.
    pub async fn upload(
        &self,
        payload: &[u8],
        info: &DeviceInfo,
        policy: &RetryPolicy,
    ) -> bool {
        let Some(uploader) = self.uploaders.get(&info.protocol) else {
            error!(protocol = %info.protocol, "no uploader registered for protocol");
            return false;
        };
        let handler = protocol::describe(info.protocol);

        info!(address = %info.address, bytes = payload.len(), "uploading image");

        for attempt in 0..policy.max_attempts {
            match Connection::open(
                self.transport.as_ref(),
                info.address,
                handler,
                &self.link_policy,
            )
            .await
            {
                Ok(mut conn) => {
                    let outcome = uploader
                        .upload(&mut conn, payload, &info.capabilities)
                        .await;
                    conn.close().await;
                    match outcome {
                        Ok(true) => {
                            info!(address = %info.address, attempt, "upload succeeded");
                            return true;
                        }
                        Ok(false) => {
                            warn!(address = %info.address, attempt, "device rejected upload");
                        }
                        Err(err) => {
                            warn!(address = %info.address, attempt, error = %err, "upload attempt failed");
                        }
                    }
                }
                Err(err) => {
                    warn!(address = %info.address, attempt, error = %err, "could not open connection for upload");
                }
            }

            if attempt + 1 < policy.max_attempts {
                tokio::time::sleep(policy.transfer_backoff(attempt)).await;
            }
        }

        error!(address = %info.address, attempts = policy.max_attempts, "upload failed, retries exhausted");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{advertisement, MockTransport};
    use crate::protocol::{ColorScheme, MANUFACTURER_ATC, MANUFACTURER_OEPL};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_address() -> Address {
        "AA:BB:CC:DD:EE:FF".parse().unwrap()
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(10),
            scan_timeout: Duration::from_millis(100),
            link_timeout: Duration::from_millis(100),
            link_timeout_cap: Duration::from_millis(200),
        }
    }

    fn manager_with_atc_device() -> (DeviceManager, MockTransport) {
        let mock = MockTransport::new();
        mock.advertise(advertisement(
            test_address(),
            Some("ATC_EEFF"),
            MANUFACTURER_ATC,
            &[0x05],
            Some(-55),
        ));
        let manager = DeviceManager::new(Arc::new(mock.clone()), fast_policy(2));
        (manager, mock)
    }

    fn caps() -> Capabilities {
        Capabilities {
            width: 296,
            height: 128,
            color_scheme: ColorScheme::BlackWhiteRed,
            rotate_buffer: false,
        }
    }

    struct FixedOutcomeUploader {
        outcome: bool,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Uploader for FixedOutcomeUploader {
        async fn upload(
            &self,
            conn: &mut Connection,
            _payload: &[u8],
            _capabilities: &Capabilities,
        ) -> Result<bool> {
            assert!(conn.is_open());
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.outcome)
        }
    }

    #[tokio::test]
    async fn connect_auto_detects_protocol_and_closes_connection() {
        let (manager, mock) = manager_with_atc_device();
        // ATC capability frame: 296x128, bwr, no rotation.
        mock.reply_with(&[0x01, 0x28, 0x01, 0x80, 0x00, 0x01, 0x00]);

        let info = manager
            .connect(test_address(), None, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(info.protocol, ProtocolId::Atc);
        assert_eq!(info.name, "ATC_EEFF");
        assert_eq!(info.capabilities.width, 296);
        assert_eq!(info.capabilities.height, 128);
        // Handshake connection was released before returning.
        assert_eq!(mock.disconnect_calls(), 1);
        assert_eq!(mock.unsubscribe_calls(), 1);
    }

    #[tokio::test]
    async fn connect_with_explicit_protocol_skips_discovery() {
        let (manager, mock) = manager_with_atc_device();
        mock.reply_silence(); // oepl sync byte
        mock.reply_with(&[0xE1, 0x00, 0xFA, 0x00, 0x7A, 0x01, 0x00]);

        let info = manager
            .connect(test_address(), Some(ProtocolId::Oepl), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(info.protocol, ProtocolId::Oepl);
        assert_eq!(info.name, "EInk Device (OEPL)");
        assert_eq!(info.capabilities.width, 250);
        // One scan from Connection::open, none for auto-detection.
        assert_eq!(mock.scan_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_fails_when_device_absent_from_discovery() {
        let mock = MockTransport::new();
        // Another family's tag is around, but not the one we want.
        mock.advertise(advertisement(
            Address::new([1, 2, 3, 4, 5, 6]),
            None,
            MANUFACTURER_OEPL,
            &[],
            None,
        ));
        let manager = DeviceManager::new(Arc::new(mock), fast_policy(2));

        let err = manager
            .connect(test_address(), None, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn connect_propagates_malformed_handshake() {
        let (manager, mock) = manager_with_atc_device();
        mock.reply_with(&[0xFF, 0x00]); // garbage capability frame

        let err = manager
            .connect(test_address(), Some(ProtocolId::Atc), Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Protocol(_)));
        // The failed handshake connection still got torn down.
        assert_eq!(mock.disconnect_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn upload_exhausts_retries_and_returns_false() {
        let (mut manager, mock) = manager_with_atc_device();
        let uploader = Arc::new(FixedOutcomeUploader {
            outcome: false,
            calls: AtomicU32::new(0),
        });
        manager.register_uploader(ProtocolId::Atc, uploader.clone());

        let info = DeviceInfo {
            address: test_address(),
            protocol: ProtocolId::Atc,
            name: "ATC_EEFF".into(),
            capabilities: caps(),
        };

        let ok = manager.upload(&[0u8; 16], &info, &fast_policy(3)).await;

        assert!(!ok);
        assert_eq!(uploader.calls.load(Ordering::SeqCst), 3);
        // A brand-new connection per attempt, each torn down afterwards.
        assert_eq!(mock.link_calls(), 3);
        assert_eq!(mock.disconnect_calls(), 3);
    }

    #[tokio::test]
    async fn upload_succeeds_first_try() {
        let (mut manager, mock) = manager_with_atc_device();
        let uploader = Arc::new(FixedOutcomeUploader {
            outcome: true,
            calls: AtomicU32::new(0),
        });
        manager.register_uploader(ProtocolId::Atc, uploader.clone());

        let info = DeviceInfo {
            address: test_address(),
            protocol: ProtocolId::Atc,
            name: "ATC_EEFF".into(),
            capabilities: caps(),
        };

        assert!(manager.upload(&[0u8; 16], &info, &fast_policy(3)).await);
        assert_eq!(uploader.calls.load(Ordering::SeqCst), 1);
        assert_eq!(mock.link_calls(), 1);
    }

    #[tokio::test]
    async fn upload_without_registered_uploader_returns_false() {
        let (manager, mock) = manager_with_atc_device();
        let info = DeviceInfo {
            address: test_address(),
            protocol: ProtocolId::Atc,
            name: "ATC_EEFF".into(),
            capabilities: caps(),
        };

        assert!(!manager.upload(&[0u8; 16], &info, &fast_policy(3)).await);
        assert_eq!(mock.link_calls(), 0);
    }
}
