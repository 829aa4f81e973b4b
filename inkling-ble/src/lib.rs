//! BLE transport and protocol negotiation for e-paper display tags.
//!
//! Discovers display tags by their advertisement manufacturer code,
//! establishes a session with bounded retry and backoff, negotiates the
//! panel's capabilities through a per-family handshake, and drives image
//! transfers with their own retry loop.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use inkling_ble::{BtleTransport, DeviceManager, RetryPolicy};
//!
//! #[tokio::main]
//! async fn main() -> inkling_ble::Result<()> {
//!     let transport = Arc::new(BtleTransport::new().await?);
//!     let manager = DeviceManager::new(transport, RetryPolicy::default());
//!
//!     // List nearby tags
//!     for tag in manager.discover(Duration::from_secs(10)).await? {
//!         println!("{} - {} ({})", tag.address, tag.name, tag.protocol);
//!     }
//!
//!     // Interrogate one of them
//!     let address = "AA:BB:CC:DD:EE:FF".parse()?;
//!     let info = manager.connect(address, None, Duration::from_secs(30)).await?;
//!     println!("{}x{} {}", info.capabilities.width, info.capabilities.height,
//!              info.capabilities.color_scheme);
//!
//!     Ok(())
//! }
//! ```

mod address;
mod ble;
mod connection;
mod device;
mod discovery;
mod error;
pub mod mock;
mod protocol;
mod retry;
mod transport;

pub use address::Address;
pub use ble::BtleTransport;
pub use connection::Connection;
pub use device::{DeviceInfo, DeviceManager, Uploader};
pub use discovery::{find_by_address, scan, DeviceDescriptor};
pub use error::{Error, Result};
pub use protocol::{
    classify, describe, AtcProtocol, Capabilities, ColorScheme, OeplProtocol, Protocol,
    ProtocolId, MANUFACTURER_ATC, MANUFACTURER_OEPL,
};
pub use retry::RetryPolicy;
pub use transport::{Advertisement, Link, Transport};
