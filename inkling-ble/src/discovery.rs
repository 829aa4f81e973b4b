//! Scan-based discovery of display tags.

use std::time::Duration;

use tracing::{debug, info};

use crate::address::Address;
use crate::error::Result;
use crate::protocol::{self, ProtocolId};
use crate::transport::{Advertisement, Transport};

/// A display tag observed during a scan. Ephemeral: produced by one scan,
/// never persisted, never mutated.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub address: Address,
    pub name: String,
    pub protocol: ProtocolId,
    pub manufacturer_id: u16,
    pub rssi: Option<i16>,
    /// Raw manufacturer-data payload the classification was based on.
    pub adv_data: Vec<u8>,
}

/// One passive listen of `timeout`, keeping only advertisements whose
/// manufacturer code classifies to a known protocol family. Result order
/// follows observation order and is not stable across runs.
pub async fn scan(transport: &dyn Transport, timeout: Duration) -> Result<Vec<DeviceDescriptor>> {
    info!(?timeout, "starting discovery scan");

    let advertisements = transport.scan(timeout).await?;
    let mut tags = Vec::new();
    for advertisement in &advertisements {
        if let Some(descriptor) = parse_advertisement(advertisement) {
            debug!(address = %descriptor.address, protocol = %descriptor.protocol, "found display tag");
            tags.push(descriptor);
        }
    }

    info!(found = tags.len(), "discovery completed");
    Ok(tags)
}

/// Full scan followed by a search for `address`. The scan always runs its
/// whole window; there is no early exit on match.
pub async fn find_by_address(
    transport: &dyn Transport,
    address: Address,
    timeout: Duration,
) -> Result<Option<DeviceDescriptor>> {
    let tags = scan(transport, timeout).await?;
    Ok(tags.into_iter().find(|tag| tag.address == address))
}

fn parse_advertisement(advertisement: &Advertisement) -> Option<DeviceDescriptor> {
    for (&manufacturer_id, data) in &advertisement.manufacturer_data {
        if let Some(protocol) = protocol::classify(manufacturer_id) {
            let name = advertisement.local_name.clone().unwrap_or_else(|| {
                format!("EInk Device ({})", protocol.as_str().to_uppercase())
            });
            return Some(DeviceDescriptor {
                address: advertisement.address,
                name,
                protocol,
                manufacturer_id,
                rssi: advertisement.rssi,
                adv_data: data.clone(),
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{advertisement, MockTransport};
    use crate::protocol::{MANUFACTURER_ATC, MANUFACTURER_OEPL};
    use crate::Error;

    fn addr(last: u8) -> Address {
        Address::new([0x10, 0x20, 0x30, 0x40, 0x50, last])
    }

    #[tokio::test]
    async fn scan_keeps_only_classified_advertisements() {
        let mock = MockTransport::new();
        mock.advertise(advertisement(addr(1), Some("ATC_01"), MANUFACTURER_ATC, &[1], Some(-50)));
        mock.advertise(advertisement(addr(2), None, MANUFACTURER_OEPL, &[2], Some(-70)));
        // Apple continuity beacon: not a display tag.
        mock.advertise(advertisement(addr(3), Some("Beacon"), 0x004C, &[3], Some(-40)));

        let tags = scan(&mock, Duration::from_secs(1)).await.unwrap();

        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].protocol, ProtocolId::Atc);
        assert_eq!(tags[0].name, "ATC_01");
        assert_eq!(tags[1].protocol, ProtocolId::Oepl);
        assert_eq!(tags[1].name, "EInk Device (OEPL)");
        assert_eq!(tags[1].adv_data, vec![2]);
    }

    #[tokio::test]
    async fn find_by_address_matches_normalized_form() {
        let mock = MockTransport::new();
        mock.advertise(advertisement(
            "AA:BB:CC:DD:EE:FF".parse().unwrap(),
            None,
            MANUFACTURER_OEPL,
            &[],
            None,
        ));

        let lower: Address = "aa-bb-cc-dd-ee-ff".parse().unwrap();
        let found = find_by_address(&mock, lower, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(found.is_some());

        let missing = find_by_address(&mock, addr(9), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn scan_failure_is_a_discovery_error() {
        let mock = MockTransport::new();
        mock.fail_scans(1);

        let err = scan(&mock, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, Error::Discovery(_)));
    }
}
