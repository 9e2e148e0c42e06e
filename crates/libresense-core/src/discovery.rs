//! Device discovery
//!
//! Devices answer a UDP broadcast (command 0x1E, empty payload) sent to their
//! discovery port. Answers arrive asynchronously on a fixed local port, so a
//! listener runs alongside the broadcast send and collects replies for a
//! bounded detection window. The window is terminated by the listener's
//! socket read timeout; there is no explicit stop signal.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::protocol::catalog::decode_discovery;
use crate::protocol::{
    DiscoveryInfo, Frame, DISCOVERY_LISTEN_PORT, DISCOVERY_TARGET_PORT, READ_BUFFER_SIZE,
};

/// How long the listener waits for further answers
pub const DETECTION_WINDOW: Duration = Duration::from_millis(250);

/// Discovery configuration; the defaults match the devices' fixed ports.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Address the request is broadcast to
    pub broadcast_addr: Ipv4Addr,
    /// UDP port the devices listen on
    pub target_port: u16,
    /// Local UDP port answers arrive on
    pub listen_port: u16,
    /// Detection window after the last received answer
    pub window: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            broadcast_addr: Ipv4Addr::BROADCAST,
            target_port: DISCOVERY_TARGET_PORT,
            listen_port: DISCOVERY_LISTEN_PORT,
            window: DETECTION_WINDOW,
        }
    }
}

/// One datagram that validated as a frame during the detection window.
#[derive(Debug, Clone)]
pub struct DiscoveryEvent {
    /// The validated answer frame
    pub frame: Frame,
    /// Who sent it
    pub source: SocketAddr,
    /// Time since the listener started
    pub elapsed: Duration,
}

/// Broadcast a discovery request and invoke `callback` for every answer
/// frame received within the detection window.
///
/// Datagrams that fail frame validation are logged and dropped. Returns once
/// the window has elapsed.
pub fn discover_devices(
    config: &DiscoveryConfig,
    mut callback: impl FnMut(DiscoveryEvent),
) -> io::Result<()> {
    let listener = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, config.listen_port))?;
    listener.set_read_timeout(Some(config.window))?;

    let (tx, rx) = mpsc::channel();
    let start = Instant::now();
    let handle = thread::spawn(move || {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        loop {
            let (n, source) = match listener.recv_from(&mut buf) {
                Ok(received) => received,
                // read timeout: the detection window is over
                Err(_) => break,
            };
            let elapsed = start.elapsed();
            match Frame::parse(&buf[..n]) {
                Ok(frame) => {
                    let _ = tx.send(DiscoveryEvent {
                        frame,
                        source,
                        elapsed,
                    });
                }
                Err(err) => {
                    warn!(%source, error = %err, "discovery answer failed validation");
                }
            }
        }
    });

    let sender = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    sender.set_broadcast(true)?;
    let request = Frame::from_cmd_and_payload(0x1E, &[]);
    sender.send_to(request.bytes(), (config.broadcast_addr, config.target_port))?;
    debug!(
        broadcast = %config.broadcast_addr,
        port = config.target_port,
        "discovery request sent"
    );

    for event in rx {
        callback(event);
    }
    let _ = handle.join();
    Ok(())
}

/// Broadcast a discovery request and collect the devices that answered.
pub fn discover(config: &DiscoveryConfig) -> io::Result<Vec<(DiscoveryInfo, SocketAddr)>> {
    let mut devices = Vec::new();
    discover_devices(config, |event| match decode_discovery(&event.frame) {
        Ok(info) => {
            debug!(
                device_id = %info.device_id,
                source = %event.source,
                elapsed_ms = event.elapsed.as_millis() as u64,
                "device answered"
            );
            devices.push((info, event.source));
        }
        Err(err) => {
            warn!(source = %event.source, error = %err, "undecodable discovery answer");
        }
    })?;
    Ok(devices)
}
