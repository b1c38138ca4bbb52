//! BLE Connection Module
//!
//! Opens a session to one known peripheral and exposes notifications of a
//! single characteristic as a stream of raw frames.

use crate::infrastructure::bluetooth::protocol;
use btleplug::api::{
    BDAddr, Central, Characteristic, Manager as _, ParseBDAddrError, Peripheral as _,
};
use btleplug::platform::{Manager, Peripheral};
use futures::stream::{BoxStream, StreamExt};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BleError {
    #[error("No Bluetooth adapter available")]
    AdapterNotFound,
    #[error("Invalid device address {0:?}: {1}")]
    InvalidAddress(String, ParseBDAddrError),
    #[error("Invalid characteristic UUID {0:?}: {1}")]
    InvalidUuid(String, uuid::Error),
    #[error("Device {0} is not known to the Bluetooth stack (pair it first)")]
    DeviceNotFound(BDAddr),
    #[error("Characteristic {0} not found on device")]
    CharacteristicNotFound(Uuid),
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),
}

/// Configuration for connection behavior
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Hardware address, e.g. "D4:4A:C4:B0:24:03"
    pub device_address: String,
    /// Characteristic to subscribe to
    pub characteristic_uuid: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            device_address: String::new(),
            characteristic_uuid: protocol::HEART_RATE_MEASUREMENT_UUID.to_string(),
        }
    }
}

/// An open session with the peripheral
pub struct BleConnection {
    peripheral: Peripheral,
    characteristic: Characteristic,
}

impl BleConnection {
    /// Connect to a device by Bluetooth address
    ///
    /// The device must already be known to the OS Bluetooth stack; there is
    /// no scanning or pairing here.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self, BleError> {
        let address = BDAddr::from_str(&config.device_address)
            .map_err(|e| BleError::InvalidAddress(config.device_address.clone(), e))?;
        let char_uuid = protocol::parse_uuid(&config.characteristic_uuid)
            .map_err(|e| BleError::InvalidUuid(config.characteristic_uuid.clone(), e))?;

        info!("Connecting to Bluetooth device: {}", address);

        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(BleError::AdapterNotFound)?;
        debug!("Using adapter: {}", adapter.adapter_info().await?);

        let peripheral = adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|p| p.address() == address)
            .ok_or(BleError::DeviceNotFound(address))?;

        peripheral.connect().await?;
        info!("Device connected: {}", address);

        peripheral.discover_services().await?;
        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == char_uuid)
            .ok_or(BleError::CharacteristicNotFound(char_uuid))?;
        debug!(
            "Characteristic properties: {:?}",
            characteristic.properties
        );

        Ok(Self {
            peripheral,
            characteristic,
        })
    }

    /// Enable notifications and return the frames of our characteristic
    pub async fn subscribe(&self) -> Result<BoxStream<'static, Vec<u8>>, BleError> {
        let notifications = self.peripheral.notifications().await?;
        self.peripheral.subscribe(&self.characteristic).await?;
        info!("Notifications enabled for {}", self.characteristic.uuid);

        let uuid = self.characteristic.uuid;
        Ok(notifications
            .filter_map(move |n| futures::future::ready((n.uuid == uuid).then_some(n.value)))
            .boxed())
    }

    pub async fn unsubscribe(&self) -> Result<(), BleError> {
        self.peripheral.unsubscribe(&self.characteristic).await?;
        info!("Notifications disabled for {}", self.characteristic.uuid);
        Ok(())
    }

    /// Close the session, logging rather than failing if the link is already gone
    pub async fn disconnect(self) {
        match self.peripheral.is_connected().await {
            Ok(false) => {
                info!("Device already disconnected");
                return;
            }
            Ok(true) => {}
            Err(e) => warn!("Could not query connection state: {}", e),
        }

        if let Err(e) = self.peripheral.disconnect().await {
            warn!("Disconnect failed: {}", e);
        } else {
            info!("Disconnected from device");
        }
    }
}
