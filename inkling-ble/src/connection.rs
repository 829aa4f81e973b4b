//! Connection lifecycle: bounded retry, command/response correlation.
//!
//! One open attempt walks scan -> link -> resolve -> subscribe ->
//! handshake; a failure anywhere tears the partial session down
//! (best-effort, secondary errors swallowed) and either backs off
//! exponentially or reports a terminal error carrying the address and the
//! attempt count. Notifications are funneled into a single-slot channel,
//! so at most one command may be outstanding per connection.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::address::Address;
use crate::error::{Error, Result};
use crate::protocol::Protocol;
use crate::retry::RetryPolicy;
use crate::transport::{Link, Transport};

/// A live, handshake-complete session with one display tag.
///
/// Created fresh for each orchestrated operation and never reused across
/// operations. Commands are strictly sequential: the single-slot response
/// channel has no request correlation beyond "the next thing the
/// transport delivers", so callers must not pipeline.
pub struct Connection {
    address: Address,
    link: Option<Box<dyn Link>>,
    responses: mpsc::Receiver<Vec<u8>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.address)
            .field("open", &self.link.is_some())
            .finish()
    }
}

impl Connection {
    /// Establish a session with `address`, retrying per `policy`.
    ///
    /// Every attempt starts with a fresh scan, even after an earlier
    /// attempt saw the device — a tag that physically disappeared must be
    /// re-observed before we try to link to it. A scan that cannot run at
    /// all aborts immediately without consuming the retry budget.
    pub async fn open(
        transport: &dyn Transport,
        address: Address,
        protocol: &dyn Protocol,
        policy: &RetryPolicy,
    ) -> Result<Self> {
        let mut last_failure = String::from("device never observed in any scan");

        for attempt in 0..policy.max_attempts {
            debug!(%address, attempt, "scanning for device");
            let seen = scan_for(transport, address, policy.scan_timeout(attempt)).await?;

            if !seen {
                debug!(%address, attempt, "device not seen in scan");
                backoff_if_attempts_remain(policy, attempt).await;
                continue;
            }

            match Self::attempt(transport, address, protocol, policy.link_timeout(attempt)).await
            {
                Ok(conn) => {
                    debug!(%address, attempt, "connection ready");
                    return Ok(conn);
                }
                Err(err) => {
                    warn!(%address, attempt, error = %err, "connection attempt failed");
                    last_failure = err.to_string();
                    backoff_if_attempts_remain(policy, attempt).await;
                }
            }
        }

        Err(Error::ConnectionFailed {
            address,
            attempts: policy.max_attempts,
            reason: last_failure,
        })
    }

    /// One link attempt: link + resolve, subscribe, protocol initialize.
    /// Any failure unwinds whatever was acquired so far.
    async fn attempt(
        transport: &dyn Transport,
        address: Address,
        protocol: &dyn Protocol,
        link_timeout: Duration,
    ) -> Result<Self> {
        let mut link = transport
            .open_link(address, protocol.service_uuid(), link_timeout)
            .await?;

        // Single-slot: a second notification while one is pending belongs
        // to no request and gets dropped by the pump.
        let (tx, rx) = mpsc::channel(1);
        if let Err(err) = link.subscribe(tx).await {
            let _ = link.disconnect().await;
            return Err(err);
        }

        let mut conn = Self {
            address,
            link: Some(link),
            responses: rx,
        };

        if let Err(err) = protocol.initialize(&mut conn).await {
            conn.close().await;
            return Err(err);
        }

        Ok(conn)
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn is_open(&self) -> bool {
        self.link.is_some()
    }

    /// Write `payload` and wait up to `timeout` for the answering
    /// notification.
    ///
    /// Anything already sitting in the response slot was delivered before
    /// this command existed and is discarded first. On timeout the
    /// connection stays usable; the caller decides whether to retry or
    /// close.
    pub async fn send_with_response(
        &mut self,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        while self.responses.try_recv().is_ok() {
            debug!(address = %self.address, "discarded stale notification");
        }

        self.write(payload).await?;

        match tokio::time::timeout(timeout, self.responses.recv()).await {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => Err(Error::Transport("notification channel closed".into())),
            Err(_) => Err(Error::Timeout {
                address: self.address,
                timeout,
            }),
        }
    }

    /// Write `payload` without waiting for a reply. The caller must know
    /// the command expects none.
    pub async fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.write(payload).await
    }

    async fn write(&mut self, payload: &[u8]) -> Result<()> {
        match self.link.as_mut() {
            Some(link) => link.write(payload).await,
            None => Err(Error::Protocol(
                "write characteristic not available".into(),
            )),
        }
    }

    /// Release the session: unsubscribe, then disconnect, both
    /// best-effort. Idempotent and infallible, so it is safe to call from
    /// any cleanup or cancellation path, any number of times.
    pub async fn close(&mut self) {
        if let Some(mut link) = self.link.take() {
            if let Err(err) = link.unsubscribe().await {
                debug!(address = %self.address, error = %err, "unsubscribe during close failed");
            }
            if let Err(err) = link.disconnect().await {
                debug!(address = %self.address, error = %err, "disconnect during close failed");
            }
        }
    }
}

/// Whether `address` shows up in one scan window. Scan failure (as opposed
/// to an empty result) propagates as a discovery error.
async fn scan_for(transport: &dyn Transport, address: Address, timeout: Duration) -> Result<bool> {
    let advertisements = transport.scan(timeout).await?;
    Ok(advertisements.iter().any(|adv| adv.address == address))
}

async fn backoff_if_attempts_remain(policy: &RetryPolicy, attempt: u32) {
    if attempt + 1 < policy.max_attempts {
        let delay = policy.backoff(attempt);
        debug!(?delay, attempt, "backing off before next attempt");
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{advertisement, MockTransport};
    use crate::protocol::{describe, ProtocolId, MANUFACTURER_ATC};
    use tokio::time::Instant;

    fn test_address() -> Address {
        "AA:BB:CC:DD:EE:FF".parse().unwrap()
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(100),
            scan_timeout: Duration::from_secs(1),
            link_timeout: Duration::from_secs(2),
            link_timeout_cap: Duration::from_secs(4),
        }
    }

    fn transport_with_device() -> MockTransport {
        let mock = MockTransport::new();
        mock.advertise(advertisement(
            test_address(),
            Some("ATC_EEFF"),
            MANUFACTURER_ATC,
            &[0x01],
            Some(-60),
        ));
        mock
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_last_attempt_after_doubling_backoffs() {
        let mock = transport_with_device();
        mock.miss_scans(2);
        let atc = describe(ProtocolId::Atc);
        let start = Instant::now();

        let conn = Connection::open(&mock, test_address(), atc, &policy(3))
            .await
            .unwrap();

        assert!(conn.is_open());
        assert_eq!(mock.scan_calls(), 3);
        assert_eq!(mock.link_calls(), 1);
        // Two failed attempts, so exactly two backoff sleeps: 100ms + 200ms.
        // Scans return instantly under the mock; the paused clock advances
        // only across the sleeps.
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn never_found_reports_attempt_count() {
        let mock = MockTransport::new();
        let atc = describe(ProtocolId::Atc);

        let err = Connection::open(&mock, test_address(), atc, &policy(3))
            .await
            .unwrap_err();

        match err {
            Error::ConnectionFailed { address, attempts, .. } => {
                assert_eq!(address, test_address());
                assert_eq!(attempts, 3);
            }
            other => panic!("expected ConnectionFailed, got {other:?}"),
        }
        assert_eq!(mock.scan_calls(), 3);
        assert_eq!(mock.link_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn link_failure_is_retried_with_fresh_scan() {
        let mock = transport_with_device();
        mock.fail_links(1);
        let atc = describe(ProtocolId::Atc);

        let conn = Connection::open(&mock, test_address(), atc, &policy(3))
            .await
            .unwrap();

        assert!(conn.is_open());
        assert_eq!(mock.scan_calls(), 2);
        assert_eq!(mock.link_calls(), 2);
    }

    #[tokio::test]
    async fn scan_failure_aborts_without_retrying() {
        let mock = transport_with_device();
        mock.fail_scans(1);
        let atc = describe(ProtocolId::Atc);

        let err = Connection::open(&mock, test_address(), atc, &policy(5))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Discovery(_)));
        assert_eq!(mock.scan_calls(), 1);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_never_panics() {
        let mock = transport_with_device();
        let atc = describe(ProtocolId::Atc);
        let mut conn = Connection::open(&mock, test_address(), atc, &policy(1))
            .await
            .unwrap();

        conn.close().await;
        conn.close().await;
        conn.close().await;

        assert!(!conn.is_open());
        assert_eq!(mock.unsubscribe_calls(), 1);
        assert_eq!(mock.disconnect_calls(), 1);
    }

    #[tokio::test]
    async fn stale_notification_is_drained_before_write() {
        let mock = transport_with_device();
        let atc = describe(ProtocolId::Atc);
        let mut conn = Connection::open(&mock, test_address(), atc, &policy(1))
            .await
            .unwrap();

        mock.push_notification(b"stale");
        mock.reply_with(b"genuine");

        let response = conn
            .send_with_response(&[0x42], Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(response, b"genuine");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_leaves_connection_closable() {
        let mock = transport_with_device();
        let atc = describe(ProtocolId::Atc);
        let mut conn = Connection::open(&mock, test_address(), atc, &policy(1))
            .await
            .unwrap();

        let err = conn
            .send_with_response(&[0x42], Duration::from_millis(500))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));

        // Still usable for a follow-up command...
        mock.reply_with(b"late but answered");
        let response = conn
            .send_with_response(&[0x42], Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(response, b"late but answered");

        // ...and closes cleanly.
        conn.close().await;
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn send_after_close_is_a_protocol_error() {
        let mock = transport_with_device();
        let atc = describe(ProtocolId::Atc);
        let mut conn = Connection::open(&mock, test_address(), atc, &policy(1))
            .await
            .unwrap();

        conn.close().await;
        let err = conn.send(&[0x01]).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
