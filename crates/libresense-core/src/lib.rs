//! # LibreSense Core Library
//!
//! Core functionality for the LibreSense instrument logging software.
//!
//! This library provides:
//! - L2P frame encoding/decoding with CRC-16 checksums
//! - Command/answer catalog for classifying received frames
//! - Device session management with bounded retries
//! - Bulk historical-log download with pagination
//! - UDP broadcast device discovery
//! - A fake device server for protocol testing against recorded traffic
//!
//! ## Supported instruments
//!
//! Environmental measurement devices speaking the L2P framing protocol over
//! TCP port 52015 (temperature / humidity / air pressure / battery loggers).
//!
//! ## Example
//!
//! ```rust,ignore
//! use libresense_core::protocol::{DeviceSession, SessionConfig};
//!
//! // Connect to a device and read the current temperature (channel 100)
//! let mut session = DeviceSession::open(SessionConfig::new("192.168.1.77"))?;
//! let value = session.channel_value(100)?;
//! println!("temperature: {:.2} °C", value);
//! ```

#![warn(missing_docs)]

pub mod channel;
pub mod discovery;
pub mod fakedevice;
pub mod protocol;
pub mod store;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::channel::{channel_info, ChannelInfo};
    pub use crate::discovery::{discover_devices, DiscoveryConfig, DiscoveryEvent};
    pub use crate::fakedevice::FakeDeviceServer;
    pub use crate::protocol::{
        classify, ChannelValue, DeviceSession, Frame, LogRecord, ProtocolError, SessionConfig,
        SessionState,
    };
    pub use crate::store::{JsonStore, LogStore};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
