//! Fake device server
//!
//! A TCP server imitating a real instrument for protocol testing. It replays
//! previously captured (request, response) frame pairs and answers anything
//! it has no recording for with an UNKNOWN_CMD status, so client code can be
//! validated against real traffic without a device on the bench.

use std::fs;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::path::Path;

use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::protocol::{Frame, FrameError, READ_BUFFER_SIZE};

/// Loading recorded traffic failed; the server must not start with a
/// partially loaded recording.
#[derive(Error, Debug)]
pub enum ReplayLogError {
    /// The log file could not be read
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A line did not follow the communication log format
    #[error("malformed communication log line {line}")]
    MalformedLine {
        /// 1-based line number
        line: usize,
    },

    /// A recorded frame failed validation
    #[error("invalid frame on communication log line {line}: {source}")]
    BadFrame {
        /// 1-based line number
        line: usize,
        /// The validation failure
        source: FrameError,
    },
}

/// One captured request/response exchange.
#[derive(Debug, Clone)]
pub struct CommunicationSample {
    /// Capture time, when the log provided one
    pub timestamp: Option<NaiveDateTime>,
    /// The client's request frame
    pub request: Frame,
    /// The device's recorded answer
    pub response: Frame,
}

/// A TCP server replaying recorded device traffic.
pub struct FakeDeviceServer {
    listener: TcpListener,
    samples: Vec<CommunicationSample>,
}

impl FakeDeviceServer {
    /// Bind the server socket. Use port 0 to let the OS pick a free port
    /// (see [`FakeDeviceServer::local_addr`]).
    pub fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self {
            listener,
            samples: Vec::new(),
        })
    }

    /// The address the server is listening on
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Number of loaded request/response samples
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Record one request/response pair to replay.
    pub fn add_sample(&mut self, request: Frame, response: Frame) {
        self.samples.push(CommunicationSample {
            timestamp: None,
            request,
            response,
        });
    }

    /// Load request/response pairs from a communication log.
    ///
    /// The log is line-oriented: `Timestamp` lines carry the capture time
    /// (ISO-8601 date/time with a microsecond suffix), `<- ` lines the
    /// hex-encoded inbound frame and `-> ` lines the hex-encoded outbound
    /// answer completing a pair. Any malformed line or invalid frame aborts
    /// the load.
    pub fn feed_with_communication_log(
        &mut self,
        path: impl AsRef<Path>,
    ) -> Result<usize, ReplayLogError> {
        let text = fs::read_to_string(path)?;
        let mut loaded = 0;

        let mut timestamp: Option<NaiveDateTime> = None;
        let mut request: Option<Frame> = None;
        for (index, raw_line) in text.lines().enumerate() {
            let line = index + 1;
            let trimmed = raw_line.trim();
            if trimmed.is_empty() {
                continue;
            }

            if let Some(rest) = trimmed.strip_prefix("Timestamp") {
                let value = rest.trim().trim_end_matches('Z');
                timestamp = Some(
                    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
                        .map_err(|_| ReplayLogError::MalformedLine { line })?,
                );
            } else if let Some(rest) = trimmed.strip_prefix("<- ") {
                request = Some(parse_hex_frame(rest, line)?);
            } else if let Some(rest) = trimmed.strip_prefix("-> ") {
                let response = parse_hex_frame(rest, line)?;
                let request = request
                    .take()
                    .ok_or(ReplayLogError::MalformedLine { line })?;
                self.samples.push(CommunicationSample {
                    timestamp,
                    request,
                    response,
                });
                loaded += 1;
            }
        }
        info!(samples = loaded, "communication log loaded");
        Ok(loaded)
    }

    /// Accept and serve connections until the process is killed.
    ///
    /// Connections are served one at a time; a test harness has no need for
    /// concurrent clients.
    pub fn serve_forever(&self) -> io::Result<()> {
        loop {
            self.serve_one()?;
        }
    }

    /// Accept one connection, serve it until the peer disconnects, return.
    pub fn serve_one(&self) -> io::Result<()> {
        let (stream, peer) = self.listener.accept()?;
        info!(%peer, "client connected");
        self.serve_connection(stream)?;
        info!(%peer, "client disconnected");
        Ok(())
    }

    fn serve_connection(&self, mut stream: TcpStream) -> io::Result<()> {
        let mut pending = Vec::new();
        let mut buf = [0u8; READ_BUFFER_SIZE];
        loop {
            let n = stream.read(&mut buf)?;
            if n == 0 {
                return Ok(());
            }
            pending.extend_from_slice(&buf[..n]);

            match Frame::parse(&pending) {
                Ok(frame) => {
                    pending.clear();
                    let response = self.react_to_frame(&frame);
                    stream.write_all(response.bytes())?;
                }
                Err(err) if err.is_incomplete() => continue,
                Err(err) => {
                    warn!(error = %err, "discarding invalid request");
                    pending.clear();
                }
            }
        }
    }

    /// Answer with the recorded response whose request matches exactly, or
    /// with a generic UNKNOWN_CMD status for the same command.
    pub fn react_to_frame(&self, request: &Frame) -> Frame {
        for sample in &self.samples {
            if sample.request.command() != request.command() {
                continue;
            }
            if sample.request.payload() != request.payload() {
                continue;
            }
            return sample.response.clone();
        }
        debug!(
            command = request.command(),
            "no recorded answer, replying UNKNOWN_CMD"
        );
        Frame::from_cmd_and_payload(request.command(), &[0x10])
    }
}

fn parse_hex_frame(hex: &str, line: usize) -> Result<Frame, ReplayLogError> {
    let bytes = hex
        .split_whitespace()
        .map(|token| u8::from_str_radix(token, 16))
        .collect::<Result<Vec<u8>, _>>()
        .map_err(|_| ReplayLogError::MalformedLine { line })?;
    Frame::parse(&bytes).map_err(|source| ReplayLogError::BadFrame { line, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    const SAMPLE_LOG: &str = "\
Timestamp  2016-01-29 14:51:28.606281
<- 01 10 00 00 00 00 03 02 31 10 16 03 C2 57 04
-> 01 10 00 00 00 00 07 02 31 10 00 16 01 64 00 03 87 3D 04
";

    fn server() -> FakeDeviceServer {
        FakeDeviceServer::bind("127.0.0.1:0").unwrap()
    }

    #[test]
    fn test_feed_with_communication_log() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE_LOG.as_bytes()).unwrap();

        let mut server = server();
        let loaded = server.feed_with_communication_log(file.path()).unwrap();
        assert_eq!(loaded, 1);
        assert_eq!(server.sample_count(), 1);

        let sample = &server.samples[0];
        assert_eq!(sample.request.command(), 0x31);
        assert_eq!(sample.request.payload(), &[0x16]);
        assert_eq!(sample.response.payload(), &[0x00, 0x16, 0x01, 0x64, 0x00]);
        assert_eq!(
            sample.timestamp.unwrap().format("%Y-%m-%d %H:%M:%S").to_string(),
            "2016-01-29 14:51:28"
        );
    }

    #[test]
    fn test_feed_rejects_corrupt_frame() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        // checksum byte tampered with
        file.write_all(b"<- 01 10 00 00 00 00 03 02 31 10 16 03 C2 58 04\n")
            .unwrap();

        let mut server = server();
        let err = server.feed_with_communication_log(file.path()).unwrap_err();
        assert!(matches!(err, ReplayLogError::BadFrame { line: 1, .. }));
    }

    #[test]
    fn test_feed_rejects_answer_without_request() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"-> 01 10 00 00 00 00 03 02 31 10 16 03 C2 57 04\n")
            .unwrap();

        let mut server = server();
        let err = server.feed_with_communication_log(file.path()).unwrap_err();
        assert!(matches!(err, ReplayLogError::MalformedLine { line: 1 }));
    }

    #[test]
    fn test_react_replays_recorded_answer() {
        let mut server = server();
        server.add_sample(
            Frame::from_cmd_and_payload(0x31, &[0x16]),
            Frame::from_cmd_and_payload(0x31, &[0x00, 0x16, 0x01, 0x64, 0x00]),
        );

        let answer = server.react_to_frame(&Frame::from_cmd_and_payload(0x31, &[0x16]));
        assert_eq!(answer.payload(), &[0x00, 0x16, 0x01, 0x64, 0x00]);
    }

    #[test]
    fn test_react_unknown_command() {
        let server = server();
        let answer = server.react_to_frame(&Frame::from_cmd_and_payload(0x31, &[0x60]));
        assert_eq!(answer.command(), 0x31);
        assert_eq!(answer.payload(), &[0x10]);
    }
}
