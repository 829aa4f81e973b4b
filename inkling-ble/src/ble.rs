//! Production transport over btleplug.

use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::address::Address;
use crate::error::{Error, Result};
use crate::transport::{Advertisement, Link, Transport};

/// The default system Bluetooth adapter.
pub struct BtleTransport {
    adapter: Adapter,
}

impl BtleTransport {
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|e| Error::Discovery(e.to_string()))?;
        let adapters = manager
            .adapters()
            .await
            .map_err(|e| Error::Discovery(e.to_string()))?;
        let adapter = adapters
            .into_iter()
            .next()
            .ok_or_else(|| Error::Discovery("no Bluetooth adapter found".into()))?;
        Ok(Self { adapter })
    }

    async fn peripheral_by_address(&self, address: Address) -> Result<Peripheral> {
        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        for peripheral in peripherals {
            if Address::from(peripheral.address()) == address {
                return Ok(peripheral);
            }
        }
        Err(Error::Transport(format!(
            "peripheral {address} not in adapter cache"
        )))
    }
}

#[async_trait]
impl Transport for BtleTransport {
    async fn scan(&self, timeout: Duration) -> Result<Vec<Advertisement>> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| Error::Discovery(e.to_string()))?;
        tokio::time::sleep(timeout).await;

        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| Error::Discovery(e.to_string()))?;

        let mut advertisements = Vec::new();
        for peripheral in peripherals {
            let props = peripheral
                .properties()
                .await
                .map_err(|e| Error::Discovery(e.to_string()))?;
            if let Some(props) = props {
                advertisements.push(Advertisement {
                    address: Address::from(peripheral.address()),
                    local_name: props.local_name,
                    manufacturer_data: props.manufacturer_data,
                    rssi: props.rssi,
                });
            }
        }

        if let Err(e) = self.adapter.stop_scan().await {
            debug!(error = %e, "stop_scan failed");
        }
        Ok(advertisements)
    }

    async fn open_link(
        &self,
        address: Address,
        service: Uuid,
        timeout: Duration,
    ) -> Result<Box<dyn Link>> {
        let peripheral = self.peripheral_by_address(address).await?;

        tokio::time::timeout(timeout, peripheral.connect())
            .await
            .map_err(|_| Error::Transport(format!("link to {address} timed out")))?
            .map_err(|e| Error::Transport(e.to_string()))?;

        let characteristic = match resolve_characteristic(&peripheral, service).await {
            Ok(characteristic) => characteristic,
            Err(err) => {
                let _ = peripheral.disconnect().await;
                return Err(err);
            }
        };

        debug!(%address, uuid = %characteristic.uuid, "characteristic resolved");
        Ok(Box::new(BtleLink {
            peripheral,
            characteristic,
            pump: None,
        }))
    }
}

async fn resolve_characteristic(
    peripheral: &Peripheral,
    service: Uuid,
) -> Result<Characteristic> {
    peripheral
        .discover_services()
        .await
        .map_err(|e| Error::Transport(e.to_string()))?;

    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == service || c.service_uuid == service)
        .ok_or_else(|| Error::Protocol(format!("no characteristic for service {service}")))
}

struct BtleLink {
    peripheral: Peripheral,
    characteristic: Characteristic,
    pump: Option<JoinHandle<()>>,
}

#[async_trait]
impl Link for BtleLink {
    async fn write(&mut self, payload: &[u8]) -> Result<()> {
        self.peripheral
            .write(&self.characteristic, payload, WriteType::WithoutResponse)
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }

    async fn subscribe(&mut self, notify_tx: mpsc::Sender<Vec<u8>>) -> Result<()> {
        self.peripheral
            .subscribe(&self.characteristic)
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let mut notifications = self
            .peripheral
            .notifications()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        let uuid = self.characteristic.uuid;
        let address = Address::from(self.peripheral.address());

        self.pump = Some(tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != uuid {
                    continue;
                }
                // Single-slot channel: a frame arriving while one is
                // already pending answers no outstanding command.
                if notify_tx.try_send(notification.value).is_err() {
                    warn!(%address, "response slot full, notification dropped");
                }
            }
        }));
        Ok(())
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.peripheral
            .unsubscribe(&self.characteristic)
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.peripheral
            .disconnect()
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }
}
