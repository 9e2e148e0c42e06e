//! Frame encoding/decoding
//!
//! Implements the L2P wire frame. Short-header layout:
//!
//! ```text
//! 01 10 00 00 00 00 | LEN | 02 | CMD VERC <payload...> | 03 | CRC_LO CRC_HI | 04
//! ```
//!
//! The long header replaces byte 1 with `0x20` and `LEN` with a 16-bit
//! little-endian length. `LEN` counts CMD, VERC and the payload; the CRC-16
//! covers everything from the header through ETX inclusive.

use byteorder::{ByteOrder, LittleEndian};
use tracing::debug;

use super::crc::crc16;
use super::error::{FrameError, ProtocolError};
use super::status;

/// Fixed prefix of a short-style frame (1-byte length field)
pub const HEADER_SHORT: [u8; 6] = [0x01, 0x10, 0x00, 0x00, 0x00, 0x00];
/// Fixed prefix of a long-style frame (2-byte length field)
pub const HEADER_LONG: [u8; 6] = [0x01, 0x20, 0x00, 0x00, 0x00, 0x00];

const STX: u8 = 0x02;
const ETX: u8 = 0x03;
const EOT: u8 = 0x04;

/// Command version byte; constant across all implemented commands
pub const COMMAND_VERSION: u8 = 0x10;

/// Shortest buffer that can hold a frame header plus trailer
const MIN_FRAME_LEN: usize = 12;

/// The two observed frame header variants, differing only in the width of
/// the length field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderStyle {
    /// 1-byte payload length
    Short,
    /// 2-byte little-endian payload length
    Long,
}

/// A validated L2P frame.
///
/// Holds both the raw wire bytes and the fields decoded from them. Instances
/// are built either field-by-field for sending ([`Frame::from_cmd_and_payload`])
/// or by validating a received buffer ([`Frame::parse`]); they are never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    data: Vec<u8>,
    header_style: HeaderStyle,
    command: u8,
    version: u8,
    payload: Vec<u8>,
    checksum: u16,
}

impl Frame {
    /// Build an outgoing short-style frame for `command` with `payload`.
    ///
    /// The payload must fit the 1-byte length field, i.e. be at most 253
    /// bytes; all requests this client sends are far below that.
    pub fn from_cmd_and_payload(command: u8, payload: &[u8]) -> Self {
        debug_assert!(payload.len() <= u8::MAX as usize - 2);

        let mut data = Vec::with_capacity(MIN_FRAME_LEN + payload.len());
        data.extend_from_slice(&HEADER_SHORT);
        data.push(2 + payload.len() as u8);
        data.push(STX);
        data.push(command);
        data.push(COMMAND_VERSION);
        data.extend_from_slice(payload);
        data.push(ETX);
        let crc = crc16(&data);
        data.push((crc & 0xFF) as u8);
        data.push((crc >> 8) as u8);
        data.push(EOT);

        Self {
            data,
            header_style: HeaderStyle::Short,
            command,
            version: COMMAND_VERSION,
            payload: payload.to_vec(),
            checksum: crc,
        }
    }

    /// Validate `data` as a complete frame and decode its fields.
    ///
    /// Returns [`FrameError::Incomplete`] when the buffer is shorter than its
    /// own length field implies; the caller should read more bytes and parse
    /// again rather than discard the buffer.
    pub fn parse(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < MIN_FRAME_LEN {
            return Err(FrameError::Incomplete {
                expected: MIN_FRAME_LEN,
                actual: data.len(),
            });
        }

        // header + width of the length field
        let (header_style, offset) = if data[0..6] == HEADER_SHORT {
            (HeaderStyle::Short, 0usize)
        } else if data[0..6] == HEADER_LONG {
            (HeaderStyle::Long, 1usize)
        } else {
            return Err(FrameError::InvalidHeader);
        };

        // declared length counts CMD, VERC and the payload
        let length = match header_style {
            HeaderStyle::Short => data[6] as usize,
            HeaderStyle::Long => LittleEndian::read_u16(&data[6..8]) as usize,
        };
        let total = MIN_FRAME_LEN + offset + length;
        if data.len() < total {
            debug!(expected = total, actual = data.len(), "frame incomplete");
            return Err(FrameError::Incomplete {
                expected: total,
                actual: data.len(),
            });
        }

        if data[7 + offset] != STX {
            return Err(FrameError::InvalidFraming("STX"));
        }

        let command = data[8 + offset];
        let version = data[9 + offset];
        let payload = data[10 + offset..10 + offset + length - 2].to_vec();

        if data[8 + offset + length] != ETX {
            return Err(FrameError::InvalidFraming("ETX"));
        }

        let computed = crc16(&data[..9 + offset + length]);
        let found = LittleEndian::read_u16(&data[9 + offset + length..11 + offset + length]);
        if computed != found {
            return Err(FrameError::ChecksumMismatch { computed, found });
        }

        if data[11 + offset + length] != EOT {
            return Err(FrameError::InvalidFraming("EOT"));
        }

        Ok(Self {
            data: data[..total].to_vec(),
            header_style,
            command,
            version,
            payload,
            checksum: found,
        })
    }

    /// The raw wire bytes of this frame
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Header variant this frame was encoded with
    pub fn header_style(&self) -> HeaderStyle {
        self.header_style
    }

    /// Command byte
    pub fn command(&self) -> u8 {
        self.command
    }

    /// Command version byte (0x10 on all known firmware)
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Decoded payload (excludes CMD and VERC)
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// CRC-16 carried in the frame trailer
    pub fn checksum(&self) -> u16 {
        self.checksum
    }

    /// Status byte of an answer frame (first payload byte), if present
    pub fn status(&self) -> Option<u8> {
        self.payload.first().copied()
    }

    /// Check the answer's status byte, mapping any non-zero code to
    /// [`ProtocolError::DeviceStatus`].
    pub fn assert_status(&self) -> Result<(), ProtocolError> {
        let code = self
            .status()
            .ok_or_else(|| ProtocolError::UnexpectedAnswer("empty payload".into()))?;
        if code == 0 {
            return Ok(());
        }
        let name = status::status_name(code).unwrap_or("unknown");
        Err(ProtocolError::DeviceStatus { code, name })
    }
}

/// Format raw bytes as space-separated uppercase hex for log output.
pub fn hex_format(raw: &[u8]) -> String {
    raw.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    // cmd=0x31 payload=[0x16]: channel list request
    const CHANNEL_LIST_REQUEST: [u8; 15] = [
        0x01, 0x10, 0x00, 0x00, 0x00, 0x00, 0x03, 0x02, 0x31, 0x10, 0x16, 0x03, 0xC2, 0x57, 0x04,
    ];

    // cmd=0x31 payload=[0x00,0x16,0x01,0x64,0x00]: channel list answer, one channel (100)
    const CHANNEL_LIST_ANSWER: [u8; 19] = [
        0x01, 0x10, 0x00, 0x00, 0x00, 0x00, 0x07, 0x02, 0x31, 0x10, 0x00, 0x16, 0x01, 0x64, 0x00,
        0x03, 0x87, 0x3D, 0x04,
    ];

    // same answer re-encoded with the long header style
    const CHANNEL_LIST_ANSWER_LONG: [u8; 20] = [
        0x01, 0x20, 0x00, 0x00, 0x00, 0x00, 0x07, 0x00, 0x02, 0x31, 0x10, 0x00, 0x16, 0x01, 0x64,
        0x00, 0x03, 0xDB, 0x49, 0x04,
    ];

    #[test]
    fn test_encode_known_request() {
        let frame = Frame::from_cmd_and_payload(0x31, &[0x16]);
        assert_eq!(frame.bytes(), &CHANNEL_LIST_REQUEST);
        assert_eq!(frame.checksum(), 0x57C2);
    }

    #[test]
    fn test_roundtrip() {
        let payload = [0x00, 0x16, 0x02, 0x64, 0x00, 0x96, 0x00];
        let encoded = Frame::from_cmd_and_payload(0x31, &payload);
        let decoded = Frame::parse(encoded.bytes()).expect("should decode");
        assert_eq!(decoded.command(), 0x31);
        assert_eq!(decoded.version(), COMMAND_VERSION);
        assert_eq!(decoded.payload(), &payload);
        assert_eq!(decoded.header_style(), HeaderStyle::Short);
    }

    #[test]
    fn test_roundtrip_all_short_payload_lengths() {
        for len in 0..=253usize {
            let payload: Vec<u8> = (0..len).map(|i| (i * 7 + len) as u8).collect();
            let encoded = Frame::from_cmd_and_payload(0x2F, &payload);
            let decoded = Frame::parse(encoded.bytes()).expect("should decode");
            assert_eq!(decoded.command(), 0x2F);
            assert_eq!(decoded.payload(), payload.as_slice());
        }
    }

    #[test]
    fn test_roundtrip_empty_payload() {
        let encoded = Frame::from_cmd_and_payload(0x46, &[]);
        let decoded = Frame::parse(encoded.bytes()).expect("should decode");
        assert_eq!(decoded.command(), 0x46);
        assert!(decoded.payload().is_empty());
        assert_eq!(decoded.status(), None);
    }

    #[test]
    fn test_parse_long_header() {
        let frame = Frame::parse(&CHANNEL_LIST_ANSWER_LONG).expect("should decode");
        assert_eq!(frame.header_style(), HeaderStyle::Long);
        assert_eq!(frame.command(), 0x31);
        assert_eq!(frame.payload(), &[0x00, 0x16, 0x01, 0x64, 0x00]);
    }

    #[test]
    fn test_every_strict_prefix_is_incomplete() {
        for cut in 0..CHANNEL_LIST_ANSWER.len() {
            let err = Frame::parse(&CHANNEL_LIST_ANSWER[..cut]).unwrap_err();
            assert!(
                err.is_incomplete(),
                "prefix of {} bytes gave {:?}",
                cut,
                err
            );
        }
    }

    #[test]
    fn test_corrupt_header() {
        let mut data = CHANNEL_LIST_ANSWER;
        data[1] = 0x30;
        assert_eq!(Frame::parse(&data).unwrap_err(), FrameError::InvalidHeader);
    }

    #[test]
    fn test_corrupt_checksum() {
        for i in 16..18 {
            let mut data = CHANNEL_LIST_ANSWER;
            data[i] ^= 0xFF;
            assert!(matches!(
                Frame::parse(&data).unwrap_err(),
                FrameError::ChecksumMismatch { .. }
            ));
        }
    }

    #[test]
    fn test_corrupt_payload_fails_checksum() {
        let mut data = CHANNEL_LIST_ANSWER;
        data[13] ^= 0x01;
        assert!(matches!(
            Frame::parse(&data).unwrap_err(),
            FrameError::ChecksumMismatch { .. }
        ));
    }

    #[test]
    fn test_corrupt_markers() {
        let mut data = CHANNEL_LIST_ANSWER;
        data[7] = 0x00; // STX
        assert_eq!(
            Frame::parse(&data).unwrap_err(),
            FrameError::InvalidFraming("STX")
        );

        let mut data = CHANNEL_LIST_ANSWER;
        data[18] = 0x00; // EOT, not covered by the checksum
        assert_eq!(
            Frame::parse(&data).unwrap_err(),
            FrameError::InvalidFraming("EOT")
        );
    }

    #[test]
    fn test_status() {
        let answer = Frame::parse(&CHANNEL_LIST_ANSWER).unwrap();
        assert_eq!(answer.status(), Some(0));
        assert!(answer.assert_status().is_ok());

        let bad = Frame::from_cmd_and_payload(0x31, &[0x24]);
        let err = bad.assert_status().unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::DeviceStatus {
                code: 0x24,
                name: "INVALID_CHANNEL"
            }
        ));
    }

    #[test]
    fn test_hex_format() {
        assert_eq!(hex_format(&[0x01, 0xAB, 0x04]), "01 AB 04");
    }
}
