//! L2P Protocol Communication
//!
//! Implements the L2P framing protocol used by the supported instruments:
//! checksummed frames over TCP for queries, plus a UDP broadcast discovery
//! sub-protocol (see [`crate::discovery`]).

pub mod catalog;
mod crc;
mod error;
mod frame;
mod session;
pub mod status;

pub use catalog::{
    classify, Answer, ChannelProperties, ChannelValue, DiscoveryInfo, FrameKind, LogRecord,
    ValueKind,
};
pub use crc::crc16;
pub use error::{FrameError, ProtocolError};
pub use frame::{Frame, HeaderStyle};
pub use session::{DeviceSession, SessionConfig, SessionState};

/// Default TCP port the instruments listen on
pub const DEFAULT_PORT: u16 = 52015;

/// UDP port discovery requests are broadcast to
pub const DISCOVERY_TARGET_PORT: u16 = 52010;

/// Local UDP port discovery answers arrive on
pub const DISCOVERY_LISTEN_PORT: u16 = 52005;

/// Default timeout for socket operations in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Receive buffer size for a single read
pub const READ_BUFFER_SIZE: usize = 1024;
