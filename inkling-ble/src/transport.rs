//! The transport seam: a generic characteristic-based wireless link.
//!
//! Every protocol family exposes exactly one service/characteristic used
//! both for outbound writes and as the sole notification source for
//! inbound responses. [`Transport`] produces raw advertisements and linked
//! [`Link`] handles; everything above this seam (classification, retry,
//! correlation, handshakes) is transport-agnostic, which is also what
//! makes it testable against [`crate::mock::MockTransport`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::address::Address;
use crate::error::Result;

/// One advertisement frame observed during a scan.
#[derive(Debug, Clone)]
pub struct Advertisement {
    pub address: Address,
    pub local_name: Option<String>,
    /// Manufacturer-specific data keyed by the 16-bit manufacturer code.
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    pub rssi: Option<i16>,
}

/// A wireless adapter capable of scanning and linking.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Passively listen for `timeout` and return every advertisement
    /// observed. An empty result means "scanned fine, heard nothing";
    /// failure to scan at all is an [`Error::Discovery`](crate::Error).
    async fn scan(&self, timeout: Duration) -> Result<Vec<Advertisement>>;

    /// Connect to `address` and resolve the write/notify characteristic of
    /// `service`, bounded by `timeout`. Covers both the link and the
    /// characteristic-resolution steps; the caller treats failures of
    /// either identically.
    async fn open_link(
        &self,
        address: Address,
        service: Uuid,
        timeout: Duration,
    ) -> Result<Box<dyn Link>>;
}

/// A live link to one device's protocol characteristic.
#[async_trait]
pub trait Link: Send {
    /// Write a payload to the characteristic.
    async fn write(&mut self, payload: &[u8]) -> Result<()>;

    /// Enable notifications and funnel every notification payload into
    /// `notify_tx`. The channel is single-slot; implementations must drop
    /// (not block on) overflow.
    async fn subscribe(&mut self, notify_tx: mpsc::Sender<Vec<u8>>) -> Result<()>;

    /// Disable notifications. Safe to call when not subscribed.
    async fn unsubscribe(&mut self) -> Result<()>;

    /// Tear the link down. Safe to call more than once.
    async fn disconnect(&mut self) -> Result<()>;
}
