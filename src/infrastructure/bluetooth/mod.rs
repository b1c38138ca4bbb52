//! Bluetooth Module
//!
//! Provides BLE communication with the heart rate sensor.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  frames   ┌──────────────┐
//! │  Connection  │ ────────► │   Protocol   │
//! │              │           │              │
//! │ - btleplug   │           │ - UUIDs      │
//! │ - subscribe  │           │ - 0x2A37     │
//! │              │           │   parsing    │
//! └──────────────┘           └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Heart Rate Measurement definitions and parsing
//! - [`connection`] - Device connection and notification subscription

pub mod connection;
pub mod protocol;
