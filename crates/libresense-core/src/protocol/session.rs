//! Session management
//!
//! Handles the connection lifecycle and query/answer exchange with one
//! device. A session owns its TCP socket exclusively and issues at most one
//! request at a time; resilience against single dropped or corrupted packets
//! comes from a bounded retry of the whole request plus transparent
//! reconnection when the socket turns out to be dead.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::catalog::{
    decode_available_channels, decode_channel_properties, decode_log_data, decode_multiple_values,
    decode_single_value, format_device_id, ChannelProperties, ChannelValue, LogRecord,
};
use super::error::ProtocolError;
use super::frame::{hex_format, Frame};
use super::{DEFAULT_PORT, DEFAULT_TIMEOUT_MS, READ_BUFFER_SIZE};

/// Queries are attempted at most this many times before giving up
pub const MAX_QUERY_ATTEMPTS: u32 = 3;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Not connected
    Disconnected,
    /// Connection attempt in progress
    Connecting,
    /// Connected and ready
    Connected,
    /// Connection error
    Error,
}

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Hostname or address of the device
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Timeout for socket operations in milliseconds
    pub timeout_ms: u64,
}

impl SessionConfig {
    /// Configuration for `host` with default port and timeout
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

/// Retry `op` up to `attempts` times while it fails with an error the
/// predicate accepts. Non-retryable errors propagate immediately; running
/// out of attempts yields [`ProtocolError::QueryFailed`].
fn retry<T>(
    attempts: u32,
    is_retryable: impl Fn(&ProtocolError) -> bool,
    mut op: impl FnMut() -> Result<T, ProtocolError>,
) -> Result<T, ProtocolError> {
    let mut remaining = attempts;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if is_retryable(&err) => {
                remaining -= 1;
                warn!(error = %err, remaining, "query attempt failed");
                if remaining == 0 {
                    return Err(ProtocolError::QueryFailed { attempts });
                }
            }
            Err(err) => return Err(err),
        }
    }
}

/// A connection to one device, offering the domain operations of the
/// protocol (channel queries, logging control, bulk log download).
pub struct DeviceSession {
    /// TCP socket, present while connected
    stream: Option<TcpStream>,
    /// Current session state
    state: SessionState,
    /// Session configuration
    config: SessionConfig,
    /// Device identifier captured at session start
    device_id: Option<String>,
    /// Channels the device announced at session start
    available_channels: Vec<u16>,
    /// Metrics: cumulative bytes/frames sent & received
    tx_bytes: u64,
    rx_bytes: u64,
    tx_frames: u64,
    rx_frames: u64,
}

impl DeviceSession {
    /// Create a new session (not yet connected)
    pub fn new(config: SessionConfig) -> Self {
        Self {
            stream: None,
            state: SessionState::Disconnected,
            config,
            device_id: None,
            available_channels: Vec::new(),
            tx_bytes: 0,
            rx_bytes: 0,
            tx_frames: 0,
            rx_frames: 0,
        }
    }

    /// Create a session and connect immediately
    pub fn open(config: SessionConfig) -> Result<Self, ProtocolError> {
        let mut session = Self::new(config);
        session.connect()?;
        Ok(session)
    }

    /// Get current session state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Device identifier (after the session handshake)
    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    /// Channels the device announced at session start
    pub fn available_channels(&self) -> &[u16] {
        &self.available_channels
    }

    /// Get cumulative tx/rx byte and frame counters
    pub fn counters(&self) -> (u64, u64, u64, u64) {
        (self.tx_bytes, self.rx_bytes, self.tx_frames, self.rx_frames)
    }

    /// Connect to the device and capture its identity.
    ///
    /// Connection failures (refused, unresolvable host) surface immediately
    /// and are never retried at this layer.
    pub fn connect(&mut self) -> Result<(), ProtocolError> {
        self.state = SessionState::Connecting;

        let stream = match self.open_stream() {
            Ok(stream) => stream,
            Err(err) => {
                self.state = SessionState::Error;
                return Err(err);
            }
        };
        self.stream = Some(stream);

        // handshake: learn what the device can measure and who it is
        match self
            .request_supported_channels()
            .and_then(|_| self.request_device_status())
        {
            Ok(_) => {
                self.state = SessionState::Connected;
                Ok(())
            }
            Err(err) => {
                self.state = SessionState::Error;
                self.stream = None;
                Err(err)
            }
        }
    }

    fn open_stream(&self) -> Result<TcpStream, ProtocolError> {
        let timeout = Duration::from_millis(self.config.timeout_ms);
        let target = (self.config.host.as_str(), self.config.port);
        let connection_failed = |reason: String| ProtocolError::ConnectionFailed {
            host: self.config.host.clone(),
            reason,
        };

        let addrs = target
            .to_socket_addrs()
            .map_err(|e| connection_failed(e.to_string()))?;
        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(timeout))?;
                    stream.set_write_timeout(Some(timeout))?;
                    return Ok(stream);
                }
                Err(e) => last_error = Some(e),
            }
        }
        Err(connection_failed(
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no addresses resolved".into()),
        ))
    }

    /// Disconnect from the device
    pub fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        self.state = SessionState::Disconnected;
    }

    /// Probe whether the socket is still usable without blocking.
    fn is_alive(&self) -> bool {
        let Some(stream) = self.stream.as_ref() else {
            return false;
        };
        if stream.set_nonblocking(true).is_err() {
            return false;
        }
        let mut probe = [0u8; 1];
        let alive = match stream.peek(&mut probe) {
            Ok(0) => false, // peer closed
            Ok(_) => true,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => true,
            Err(_) => false,
        };
        stream.set_nonblocking(false).is_ok() && alive
    }

    fn ensure_connected(&mut self) -> Result<(), ProtocolError> {
        if !self.is_alive() {
            self.disconnect();
            self.connect()?;
        }
        Ok(())
    }

    /// Send a request frame and return the device's validated answer.
    ///
    /// Framing and checksum failures are retried from the send, up to
    /// [`MAX_QUERY_ATTEMPTS`] attempts; an incomplete first read is followed
    /// by exactly one more read before counting as a failed attempt.
    pub fn query(&mut self, request: &Frame) -> Result<Frame, ProtocolError> {
        self.ensure_connected()?;
        debug!(
            len = request.bytes().len(),
            bytes = %hex_format(request.bytes()),
            "sending frame"
        );
        let answer = retry(
            MAX_QUERY_ATTEMPTS,
            |err| matches!(err, ProtocolError::Frame(_)),
            || self.query_once(request),
        )?;
        debug!(
            len = answer.bytes().len(),
            bytes = %hex_format(answer.bytes()),
            "received frame"
        );
        Ok(answer)
    }

    fn query_once(&mut self, request: &Frame) -> Result<Frame, ProtocolError> {
        let stream = self.stream.as_mut().ok_or(ProtocolError::NotConnected)?;

        stream.write_all(request.bytes())?;
        self.tx_bytes = self.tx_bytes.saturating_add(request.bytes().len() as u64);
        self.tx_frames = self.tx_frames.saturating_add(1);

        let mut answer = vec![0u8; READ_BUFFER_SIZE];
        let n = stream.read(&mut answer)?;
        answer.truncate(n);

        let frame = match Frame::parse(&answer) {
            Ok(frame) => frame,
            Err(err) if err.is_incomplete() => {
                // one follow-up read covers answers split across packets
                let mut more = vec![0u8; READ_BUFFER_SIZE];
                let n = stream.read(&mut more)?;
                answer.extend_from_slice(&more[..n]);
                Frame::parse(&answer)?
            }
            Err(err) => return Err(err.into()),
        };
        self.rx_bytes = self.rx_bytes.saturating_add(answer.len() as u64);
        self.rx_frames = self.rx_frames.saturating_add(1);
        Ok(frame)
    }

    /// Ask which channels the device can measure, caching the list.
    pub fn request_supported_channels(&mut self) -> Result<Vec<u16>, ProtocolError> {
        let answer = self.query(&Frame::from_cmd_and_payload(0x31, &[0x16]))?;
        let channels = decode_available_channels(&answer)?;
        self.available_channels = channels.clone();
        Ok(channels)
    }

    /// Read the device status and capture the device identifier.
    pub fn request_device_status(&mut self) -> Result<String, ProtocolError> {
        let answer = self.query(&Frame::from_cmd_and_payload(0x31, &[0x60]))?;
        answer.assert_status()?;
        let payload = answer.payload();
        if answer.command() != 0x31 || payload.len() != 10 || payload[1] != 0x60 {
            return Err(ProtocolError::UnexpectedAnswer(
                "not a device status answer".into(),
            ));
        }
        let device_id = format_device_id(&payload[2..8]);
        info!(device_id = %device_id, "connected to device");
        self.device_id = Some(device_id.clone());
        Ok(device_id)
    }

    /// Read name, unit, kind and value range of one channel.
    pub fn channel_properties(&mut self, channel: u16) -> Result<ChannelProperties, ProtocolError> {
        let mut payload = vec![0x30];
        payload.extend_from_slice(&channel.to_le_bytes());
        let answer = self.query(&Frame::from_cmd_and_payload(0x31, &payload))?;
        decode_channel_properties(&answer)
    }

    /// Read the current value of one channel.
    pub fn channel_value(&mut self, channel: u16) -> Result<f32, ProtocolError> {
        let answer = self.query(&Frame::from_cmd_and_payload(0x23, &channel.to_le_bytes()))?;
        let value = decode_single_value(&answer)?;
        value
            .value
            .ok_or_else(|| ProtocolError::UnexpectedAnswer("answer carried no value".into()))
    }

    /// Read the current values of several channels in one exchange.
    pub fn multi_channel_value(
        &mut self,
        channels: &[u16],
    ) -> Result<Vec<ChannelValue>, ProtocolError> {
        let mut payload = Vec::with_capacity(1 + 2 * channels.len());
        payload.push(channels.len() as u8);
        for channel in channels {
            payload.extend_from_slice(&channel.to_le_bytes());
        }
        let answer = self.query(&Frame::from_cmd_and_payload(0x2F, &payload))?;
        decode_multiple_values(&answer)
    }

    /// Set the device clock.
    ///
    /// Defaults to the current local time and the host's UTC offset.
    pub fn sync_datetime(
        &mut self,
        when: Option<DateTime<Local>>,
        tz_offset_secs: Option<i32>,
    ) -> Result<(), ProtocolError> {
        let now = Local::now();
        let when = when.unwrap_or(now);
        let tz_offset = tz_offset_secs.unwrap_or_else(|| now.offset().local_minus_utc());
        info!(
            timestamp = %when.format("%Y-%m-%dT%H:%M:%S"),
            tz_offset,
            "setting date & time on device"
        );

        let mut payload = [0u8; 8];
        LittleEndian::write_i32(&mut payload[0..4], when.timestamp() as i32);
        LittleEndian::write_i32(&mut payload[4..8], tz_offset);
        let answer = self.query(&Frame::from_cmd_and_payload(0x27, &payload))?;
        if answer.command() != 0x27 {
            return Err(ProtocolError::UnexpectedAnswer(
                "not an update time answer".into(),
            ));
        }
        answer.assert_status()
    }

    /// Erase the device's log history. The device is unresponsive for a few
    /// minutes afterwards.
    pub fn clear_log(&mut self) -> Result<(), ProtocolError> {
        let answer = self.query(&Frame::from_cmd_and_payload(0x46, &[]))?;
        if answer.command() != 0x46 {
            return Err(ProtocolError::UnexpectedAnswer(
                "not a clear log answer".into(),
            ));
        }
        answer.assert_status()
    }

    /// Enable or disable logging altogether.
    pub fn set_logging_state(&mut self, enabled: bool) -> Result<(), ProtocolError> {
        let answer =
            self.query(&Frame::from_cmd_and_payload(0x45, &[0x43, enabled as u8]))?;
        if answer.command() != 0x45 {
            return Err(ProtocolError::UnexpectedAnswer(
                "not a logging state answer".into(),
            ));
        }
        answer.assert_status()
    }

    /// Whether logging is currently enabled.
    pub fn get_logging_state(&mut self) -> Result<bool, ProtocolError> {
        let answer = self.query(&Frame::from_cmd_and_payload(0x44, &[0x43]))?;
        answer.assert_status()?;
        let payload = answer.payload();
        if answer.command() != 0x44 || payload.len() != 3 || payload[1] != 0x43 {
            return Err(ProtocolError::UnexpectedAnswer(
                "not a logging state answer".into(),
            ));
        }
        Ok(payload[2] != 0)
    }

    /// Enable or disable logging of one channel.
    pub fn set_channel_logging_state(
        &mut self,
        channel: u16,
        enabled: bool,
    ) -> Result<u32, ProtocolError> {
        let mut payload = vec![0x22];
        payload.extend_from_slice(&channel.to_le_bytes());
        payload.push(enabled as u8);
        let answer = self.query(&Frame::from_cmd_and_payload(0x45, &payload))?;
        answer.assert_status()?;
        let payload = answer.payload();
        if answer.command() != 0x45 || payload.len() != 6 || payload[1] != 0x22 {
            return Err(ProtocolError::UnexpectedAnswer(
                "not a channel logging state answer".into(),
            ));
        }
        Ok(LittleEndian::read_u32(&payload[2..6]))
    }

    /// Whether logging of one channel is enabled.
    pub fn get_channel_logging_state(&mut self, channel: u16) -> Result<bool, ProtocolError> {
        let mut payload = vec![0x22];
        payload.extend_from_slice(&channel.to_le_bytes());
        let answer = self.query(&Frame::from_cmd_and_payload(0x44, &payload))?;
        answer.assert_status()?;
        let payload = answer.payload();
        if answer.command() != 0x44 || payload.len() != 5 || payload[1] != 0x22 {
            return Err(ProtocolError::UnexpectedAnswer(
                "not a channel logging state answer".into(),
            ));
        }
        let answered_channel = LittleEndian::read_u16(&payload[2..4]);
        if answered_channel != channel {
            return Err(ProtocolError::UnexpectedAnswer(format!(
                "answer for channel {} instead of {}",
                answered_channel, channel
            )));
        }
        Ok(payload[4] != 0)
    }

    /// Download the logged history, one page at a time.
    ///
    /// `since` restricts the download to records after that timestamp; one
    /// second is added so the last previously-seen record is not fetched
    /// again. The initiate answer reports how many pages follow; exactly
    /// that many data requests are issued in sequence. Any failed page fails
    /// the whole download.
    pub fn download_logs(
        &mut self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<LogRecord>, ProtocolError> {
        let start_epoch = since.map(|ts| ts.timestamp() as i32 + 1).unwrap_or(0);

        let mut payload = vec![0x10];
        payload.extend_from_slice(&start_epoch.to_le_bytes());
        payload.extend_from_slice(&[0x00; 5]);
        let init_answer = self.query(&Frame::from_cmd_and_payload(0x24, &payload))?;
        init_answer.assert_status()?;
        let init_payload = init_answer.payload();
        if init_answer.command() != 0x24 || init_payload.len() != 10 || init_payload[1] != 0x10 {
            return Err(ProtocolError::UnexpectedAnswer(
                "not an initiate log download answer".into(),
            ));
        }
        let num_pages = LittleEndian::read_u32(&init_payload[2..6]);
        debug!(num_pages, start_epoch, "log download initiated");

        let data_request = Frame::from_cmd_and_payload(0x24, &[0x20, 0x01]);
        let mut records = Vec::new();
        for _ in 0..num_pages {
            let answer = self.query(&data_request)?;
            let (_, mut page) = decode_log_data(&answer)?;
            records.append(&mut page);
        }
        Ok(records)
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::error::FrameError;

    #[test]
    fn test_session_config() {
        let config = SessionConfig::new("192.168.1.77");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.timeout_ms, DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn test_session_initial_state() {
        let session = DeviceSession::new(SessionConfig::new("localhost"));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.device_id().is_none());
        assert!(session.available_channels().is_empty());
    }

    #[test]
    fn test_retry_succeeds_after_transient_failures() {
        let mut calls = 0;
        let result = retry(
            3,
            |err| matches!(err, ProtocolError::Frame(_)),
            || {
                calls += 1;
                if calls < 3 {
                    Err(ProtocolError::Frame(FrameError::InvalidHeader))
                } else {
                    Ok(42)
                }
            },
        );
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_retry_exhausts_after_bound() {
        let mut calls = 0;
        let result: Result<(), _> = retry(
            3,
            |err| matches!(err, ProtocolError::Frame(_)),
            || {
                calls += 1;
                Err(ProtocolError::Frame(FrameError::ChecksumMismatch {
                    computed: 0x1234,
                    found: 0x4321,
                }))
            },
        );
        assert!(matches!(
            result.unwrap_err(),
            ProtocolError::QueryFailed { attempts: 3 }
        ));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_retry_fatal_error_propagates_immediately() {
        let mut calls = 0;
        let result: Result<(), _> = retry(
            3,
            |err| matches!(err, ProtocolError::Frame(_)),
            || {
                calls += 1;
                Err(ProtocolError::DeviceStatus {
                    code: 0x24,
                    name: "INVALID_CHANNEL",
                })
            },
        );
        assert!(matches!(
            result.unwrap_err(),
            ProtocolError::DeviceStatus { .. }
        ));
        assert_eq!(calls, 1);
    }
}
