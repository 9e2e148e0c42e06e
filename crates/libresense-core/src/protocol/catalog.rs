//! Command/answer catalog
//!
//! Every frame on the wire has one of the shapes listed in [`FRAME_KINDS`]:
//! requests sent by this client and answers sent by the device. A received
//! frame is classified by scanning the catalog in order and taking the first
//! descriptor whose command byte, payload length and payload prefix all
//! match. The order is part of the protocol (some entries intentionally
//! shadow more specific ones) and must not be rearranged.
//!
//! Answer kinds carry a decoder turning the validated frame's payload into a
//! typed [`Answer`].

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::ProtocolError;
use super::frame::{Frame, COMMAND_VERSION};
use crate::channel::is_known_channel;

/// One measured value decoded from an answer sub-record.
///
/// `value` is `None` whenever the sub-record's status byte is non-zero (the
/// device marks e.g. deactivated channels that way); the bytes where the
/// value would be must not be interpreted then.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelValue {
    /// Channel number the value belongs to
    pub channel: u16,
    /// Sub-record status byte (0 = value present)
    pub status: u8,
    /// Wire data type; only 0x16 (f32 little-endian) is implemented
    pub data_type: u8,
    /// The measured value, absent when `status != 0`
    pub value: Option<f32>,
}

/// Aggregate a channel reports (current, minimum, maximum or average).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    /// Current value
    Cur,
    /// Minimum since last reset
    Min,
    /// Maximum since last reset
    Max,
    /// Average
    Avg,
}

impl ValueKind {
    /// Short uppercase label as used in channel names
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Cur => "CUR",
            ValueKind::Min => "MIN",
            ValueKind::Max => "MAX",
            ValueKind::Avg => "AVG",
        }
    }

    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x10 => Some(ValueKind::Cur),
            0x11 => Some(ValueKind::Min),
            0x12 => Some(ValueKind::Max),
            0x13 => Some(ValueKind::Avg),
            _ => None,
        }
    }
}

/// Channel metadata as reported by the device itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelProperties {
    /// Channel number
    pub channel: u16,
    /// Channel group
    pub group: u8,
    /// ASCII channel name
    pub name: String,
    /// Unit string (UTF-16 on the wire)
    pub unit: String,
    /// Which aggregate this channel reports
    pub kind: ValueKind,
    /// Lower bound of the measurable range
    pub min: f32,
    /// Upper bound of the measurable range
    pub max: f32,
}

/// One row of downloaded history: a timestamp plus the logged value of each
/// channel that was enabled during that interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Start of the logging interval
    pub timestamp: DateTime<Utc>,
    /// Logged value per channel number
    pub values: BTreeMap<u16, f32>,
}

/// Identity and addressing of a device that answered a discovery broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryInfo {
    /// Device identifier as 12 uppercase hex characters
    pub device_id: String,
    /// Device IPv4 address
    pub address: Ipv4Addr,
    /// Configured gateway
    pub gateway: Ipv4Addr,
    /// Configured subnet mask
    pub netmask: Ipv4Addr,
    /// Network the device lives in, as (network address, prefix length)
    pub network: (Ipv4Addr, u8),
}

/// Typed result of decoding an answer frame through its catalog entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Answer {
    /// Channels the device can measure (unknown ones already dropped)
    AvailableChannels(Vec<u16>),
    /// Metadata of a single channel
    ChannelProperties(ChannelProperties),
    /// One measured value
    SingleValue(ChannelValue),
    /// Measured values for several channels at once
    MultipleValues(Vec<ChannelValue>),
    /// One page of downloaded log history
    LogData {
        /// Whether the device reports this as the final page
        is_final: bool,
        /// Decoded rows
        records: Vec<LogRecord>,
    },
    /// Discovery broadcast answer
    Discovery(DiscoveryInfo),
}

/// Decoder signature shared by all answer kinds
pub type DecodeFn = fn(&Frame) -> Result<Answer, ProtocolError>;

/// Static descriptor of one recognized request or answer shape.
///
/// `prefix` lists the expected leading payload bytes; `None` entries are
/// wildcards. `payload_length` of `None` accepts any length.
pub struct FrameKind {
    /// Command byte the frame must carry
    pub command: u8,
    /// Expected leading payload bytes (`None` = wildcard)
    pub prefix: &'static [Option<u8>],
    /// Exact payload length, if the kind has one
    pub payload_length: Option<usize>,
    /// Human-readable kind name
    pub name: &'static str,
    /// Payload decoder; `None` for requests and undocumented answers
    pub decoder: Option<DecodeFn>,
}

impl FrameKind {
    fn matches(&self, frame: &Frame) -> bool {
        if self.command != frame.command() {
            return false;
        }
        let payload = frame.payload();
        if let Some(expected) = self.payload_length {
            if payload.len() != expected {
                return false;
            }
        }
        if self.prefix.len() > payload.len() {
            return false;
        }
        self.prefix
            .iter()
            .zip(payload)
            .all(|(expected, byte)| expected.map_or(true, |e| e == *byte))
    }
}

impl std::fmt::Debug for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameKind")
            .field("command", &self.command)
            .field("name", &self.name)
            .finish()
    }
}

/// All recognized frame shapes, in matching priority order.
pub static FRAME_KINDS: &[FrameKind] = &[
    FrameKind { command: 0x1E, prefix: &[], payload_length: Some(0), name: "network discovery request", decoder: None },
    FrameKind { command: 0x1E, prefix: &[Some(0x00)], payload_length: Some(35), name: "network discovery answer", decoder: Some(answer_discovery) },
    //
    FrameKind { command: 0x23, prefix: &[], payload_length: Some(2), name: "online single channel request", decoder: None },
    FrameKind { command: 0x23, prefix: &[Some(0x00)], payload_length: Some(8), name: "online single channel answer", decoder: Some(answer_single_value) },
    //
    FrameKind { command: 0x24, prefix: &[Some(0x10)], payload_length: Some(10), name: "initiate log download request", decoder: None },
    FrameKind { command: 0x24, prefix: &[Some(0x00), Some(0x10)], payload_length: Some(10), name: "initiate log download answer", decoder: None },
    //
    FrameKind { command: 0x24, prefix: &[Some(0x20), Some(0x01)], payload_length: Some(2), name: "log download data request", decoder: None },
    FrameKind { command: 0x24, prefix: &[Some(0x00), Some(0x20)], payload_length: None, name: "log download data answer", decoder: Some(answer_log_data) },
    //
    FrameKind { command: 0x27, prefix: &[], payload_length: Some(8), name: "update time request", decoder: None },
    FrameKind { command: 0x27, prefix: &[Some(0x00)], payload_length: Some(1), name: "update time answer", decoder: None },
    //
    FrameKind { command: 0x2F, prefix: &[], payload_length: Some(2), name: "online multiple channel request", decoder: None },
    FrameKind { command: 0x2F, prefix: &[Some(0x00)], payload_length: None, name: "online multiple channel answer", decoder: Some(answer_multiple_values) },
    //
    FrameKind { command: 0x31, prefix: &[Some(0x16)], payload_length: Some(1), name: "channel list request", decoder: None },
    FrameKind { command: 0x31, prefix: &[Some(0x00), Some(0x16)], payload_length: None, name: "channel list answer", decoder: Some(answer_available_channels) },
    //
    FrameKind { command: 0x31, prefix: &[Some(0x17)], payload_length: Some(1), name: "channel group list request", decoder: None },
    FrameKind { command: 0x31, prefix: &[Some(0x00), Some(0x17)], payload_length: None, name: "channel group list answer", decoder: None },
    //
    FrameKind { command: 0x31, prefix: &[Some(0x30)], payload_length: Some(3), name: "information on specific channel request", decoder: None },
    FrameKind { command: 0x31, prefix: &[Some(0x00), Some(0x30)], payload_length: Some(85), name: "information on specific channel answer", decoder: Some(answer_channel_properties) },
    //
    FrameKind { command: 0x31, prefix: &[Some(0x10)], payload_length: Some(1), name: "advanced status request 0x10", decoder: None },
    FrameKind { command: 0x31, prefix: &[Some(0x00), Some(0x10)], payload_length: None, name: "advanced status answer 0x10", decoder: None },
    //
    FrameKind { command: 0x31, prefix: &[Some(0x13)], payload_length: Some(1), name: "advanced status request 0x13", decoder: None },
    FrameKind { command: 0x31, prefix: &[Some(0x00), Some(0x13)], payload_length: None, name: "advanced status answer 0x13", decoder: None },
    //
    FrameKind { command: 0x31, prefix: &[Some(0x60)], payload_length: Some(1), name: "device status request", decoder: None },
    FrameKind { command: 0x31, prefix: &[Some(0x00), Some(0x60)], payload_length: Some(10), name: "device status answer", decoder: None },
    //
    FrameKind { command: 0x44, prefix: &[Some(0x12)], payload_length: Some(2), name: "read value range of channel group request", decoder: None },
    FrameKind { command: 0x44, prefix: &[Some(0x00), Some(0x12)], payload_length: Some(18), name: "read value range of channel group answer", decoder: None },
    //
    FrameKind { command: 0x44, prefix: &[Some(0x22)], payload_length: Some(3), name: "read channel logging state request", decoder: None },
    FrameKind { command: 0x44, prefix: &[Some(0x00), Some(0x22)], payload_length: Some(5), name: "read channel logging state answer", decoder: None },
    FrameKind { command: 0x45, prefix: &[Some(0x22)], payload_length: Some(4), name: "write channel logging state request", decoder: None },
    FrameKind { command: 0x45, prefix: &[Some(0x00), Some(0x22)], payload_length: Some(6), name: "write channel logging state answer", decoder: None },
    //
    FrameKind { command: 0x44, prefix: &[Some(0x41)], payload_length: Some(1), name: "read measuring/logging interval request", decoder: None },
    FrameKind { command: 0x44, prefix: &[Some(0x00), Some(0x41)], payload_length: Some(14), name: "read measuring/logging interval answer", decoder: None },
    FrameKind { command: 0x45, prefix: &[Some(0x41)], payload_length: Some(9), name: "write measuring/logging interval request", decoder: None },
    FrameKind { command: 0x45, prefix: &[Some(0x00), Some(0x41)], payload_length: Some(8), name: "write measuring/logging interval answer", decoder: None },
    //
    FrameKind { command: 0x44, prefix: &[Some(0x43)], payload_length: Some(1), name: "read logging state request", decoder: None },
    FrameKind { command: 0x44, prefix: &[Some(0x00), Some(0x43)], payload_length: Some(3), name: "read logging state answer", decoder: None },
    FrameKind { command: 0x45, prefix: &[Some(0x43)], payload_length: Some(2), name: "write logging state request", decoder: None },
    FrameKind { command: 0x45, prefix: &[Some(0x00)], payload_length: Some(1), name: "write logging state answer", decoder: None },
    //
    FrameKind { command: 0x46, prefix: &[], payload_length: Some(0), name: "clear log request", decoder: None },
    FrameKind { command: 0x46, prefix: &[Some(0x00)], payload_length: Some(1), name: "clear log answer", decoder: None },
];

/// Classify a validated frame against the catalog.
///
/// Returns `None` for unknown shapes and for any frame whose command version
/// differs from 0x10 (unrecognized protocol version).
pub fn classify(frame: &Frame) -> Option<&'static FrameKind> {
    if frame.version() != COMMAND_VERSION {
        return None;
    }
    FRAME_KINDS.iter().find(|kind| kind.matches(frame))
}

/// Render a 6-byte device identifier as 12 uppercase hex characters.
pub fn format_device_id(raw: &[u8]) -> String {
    raw.iter().map(|b| format!("{:02X}", b)).collect()
}

fn truncated(what: &str) -> ProtocolError {
    ProtocolError::UnexpectedAnswer(format!("{} truncated", what))
}

/// Read one embedded value sub-record `[len][status][ch lo][ch hi][dtype][value]`
/// starting at `offset`. Returns the decoded value and the offset of the
/// next record (the declared length is consumed even when the sub-status
/// marks the value unusable).
fn read_sub_value(payload: &[u8], offset: usize) -> Result<(ChannelValue, usize), ProtocolError> {
    let length = *payload.get(offset).ok_or_else(|| truncated("sub-record"))? as usize;
    let status = *payload
        .get(offset + 1)
        .ok_or_else(|| truncated("sub-record"))?;
    let next = offset + 1 + length;
    if payload.len() < next {
        return Err(truncated("sub-record"));
    }

    if status != 0 {
        // value bytes are not to be interpreted; consume the declared length
        let channel = if length >= 3 {
            LittleEndian::read_u16(&payload[offset + 2..offset + 4])
        } else {
            0
        };
        let data_type = if length >= 4 { payload[offset + 4] } else { 0 };
        debug!(channel, status, "sub-record without value");
        return Ok((
            ChannelValue {
                channel,
                status,
                data_type,
                value: None,
            },
            next,
        ));
    }
    if length < 8 {
        return Err(truncated("sub-record"));
    }
    let channel = LittleEndian::read_u16(&payload[offset + 2..offset + 4]);
    let data_type = payload[offset + 4];
    if data_type != 0x16 {
        return Err(ProtocolError::UnsupportedDataType(data_type));
    }
    let value = LittleEndian::read_f32(&payload[offset + 5..offset + 9]);
    Ok((
        ChannelValue {
            channel,
            status,
            data_type,
            value: Some(value),
        },
        next,
    ))
}

/// Decode a channel list answer (0x31/16) into the supported channel numbers.
///
/// Channel numbers absent from [`crate::channel::CHANNEL_SPEC`] are dropped:
/// some firmware announces channels (150, for instance) with no documented
/// semantics.
pub fn decode_available_channels(frame: &Frame) -> Result<Vec<u16>, ProtocolError> {
    let payload = frame.payload();
    if payload.len() < 3 || payload[1] != 0x16 {
        return Err(ProtocolError::UnexpectedAnswer(
            "not a channel list answer".into(),
        ));
    }
    frame.assert_status()?;

    let count = payload[2] as usize;
    if payload.len() < 3 + 2 * count {
        return Err(truncated("channel list"));
    }
    let mut channels = Vec::with_capacity(count);
    for i in 0..count {
        let channel = LittleEndian::read_u16(&payload[3 + 2 * i..5 + 2 * i]);
        if !is_known_channel(channel) {
            debug!(channel, "dropping unsupported channel from answer");
            continue;
        }
        channels.push(channel);
    }
    Ok(channels)
}

/// Decode a channel information answer (0x31/30).
pub fn decode_channel_properties(frame: &Frame) -> Result<ChannelProperties, ProtocolError> {
    let payload = frame.payload();
    if payload.len() != 85 || payload[1] != 0x30 {
        return Err(ProtocolError::UnexpectedAnswer(
            "not a channel information answer".into(),
        ));
    }
    frame.assert_status()?;

    let channel = LittleEndian::read_u16(&payload[2..4]);
    let group = payload[4];
    let name = String::from_utf8_lossy(&payload[5..45])
        .trim_matches('\0')
        .trim()
        .to_string();
    let unit_units: Vec<u16> = payload[45..75]
        .chunks_exact(2)
        .map(LittleEndian::read_u16)
        .filter(|&u| u != 0)
        .collect();
    let unit = char::decode_utf16(unit_units)
        .collect::<Result<String, _>>()
        .map_err(|_| ProtocolError::UnexpectedAnswer("unit string not UTF-16".into()))?
        .trim()
        .to_string();
    let kind = ValueKind::from_byte(payload[75]).ok_or_else(|| {
        ProtocolError::UnexpectedAnswer(format!("unknown channel kind {:#04x}", payload[75]))
    })?;
    let min = LittleEndian::read_f32(&payload[77..81]);
    let max = LittleEndian::read_f32(&payload[81..85]);

    Ok(ChannelProperties {
        channel,
        group,
        name,
        unit,
        kind,
        min,
        max,
    })
}

/// Decode an online data answer for a single channel (0x23).
///
/// The sub-record here is the bare 7-byte form with no embedded length or
/// status; the frame's own status byte stands in for both.
pub fn decode_single_value(frame: &Frame) -> Result<ChannelValue, ProtocolError> {
    let payload = frame.payload();
    if payload.len() != 8 {
        return Err(ProtocolError::UnexpectedAnswer(
            "not a single channel answer".into(),
        ));
    }
    frame.assert_status()?;

    let channel = LittleEndian::read_u16(&payload[1..3]);
    let data_type = payload[3];
    if data_type != 0x16 {
        return Err(ProtocolError::UnsupportedDataType(data_type));
    }
    let value = LittleEndian::read_f32(&payload[4..8]);
    Ok(ChannelValue {
        channel,
        status: 0,
        data_type,
        value: Some(value),
    })
}

/// Decode an online data answer for multiple channels (0x2F).
pub fn decode_multiple_values(frame: &Frame) -> Result<Vec<ChannelValue>, ProtocolError> {
    let payload = frame.payload();
    if payload.len() < 2 {
        return Err(ProtocolError::UnexpectedAnswer(
            "not a multiple channel answer".into(),
        ));
    }
    frame.assert_status()?;

    let count = payload[1] as usize;
    let mut values = Vec::with_capacity(count);
    let mut offset = 2;
    for _ in 0..count {
        let (value, next) = read_sub_value(payload, offset)?;
        values.push(value);
        offset = next;
    }
    Ok(values)
}

/// Decode one page of a log download (0x24/20).
pub fn decode_log_data(frame: &Frame) -> Result<(bool, Vec<LogRecord>), ProtocolError> {
    let payload = frame.payload();
    if payload.len() < 21 || payload[1] != 0x20 {
        return Err(ProtocolError::UnexpectedAnswer(
            "not a log data answer".into(),
        ));
    }
    frame.assert_status()?;

    let is_final = payload[2] != 0;
    let begin = LittleEndian::read_i32(&payload[7..11]);
    let _end = LittleEndian::read_i32(&payload[11..15]);
    let interval = LittleEndian::read_u32(&payload[15..19]);
    let num_blocks = LittleEndian::read_u16(&payload[19..21]) as usize;

    let mut records = Vec::with_capacity(num_blocks);
    let mut offset = 21;
    for block in 0..num_blocks {
        let num_entries = *payload.get(offset).ok_or_else(|| truncated("log row"))? as usize;
        offset += 1;

        let epoch = begin as i64 + block as i64 * interval as i64;
        let timestamp = DateTime::<Utc>::from_timestamp(epoch, 0)
            .ok_or_else(|| ProtocolError::UnexpectedAnswer("log timestamp out of range".into()))?;
        let mut values = BTreeMap::new();
        for _ in 0..num_entries {
            // log rows use a fixed 9-byte stride per sub-record
            let (value, _) = read_sub_value(payload, offset)?;
            if let Some(v) = value.value {
                values.insert(value.channel, v);
            }
            offset += 9;
        }
        records.push(LogRecord { timestamp, values });
    }
    Ok((is_final, records))
}

/// Decode a network discovery answer (0x1E).
pub fn decode_discovery(frame: &Frame) -> Result<DiscoveryInfo, ProtocolError> {
    let payload = frame.payload();
    if payload.len() != 35 {
        return Err(ProtocolError::UnexpectedAnswer(
            "not a discovery answer".into(),
        ));
    }
    frame.assert_status()?;

    let device_id = format_device_id(&payload[1..7]);
    let octets = |start: usize| -> Ipv4Addr {
        Ipv4Addr::new(
            payload[start],
            payload[start + 1],
            payload[start + 2],
            payload[start + 3],
        )
    };
    let address = octets(9);
    let gateway = octets(13);
    let netmask = octets(17);
    let prefix = u32::from(netmask).count_ones() as u8;
    let network = Ipv4Addr::from(u32::from(address) & u32::from(netmask));

    Ok(DiscoveryInfo {
        device_id,
        address,
        gateway,
        netmask,
        network: (network, prefix),
    })
}

fn answer_available_channels(frame: &Frame) -> Result<Answer, ProtocolError> {
    decode_available_channels(frame).map(Answer::AvailableChannels)
}

fn answer_channel_properties(frame: &Frame) -> Result<Answer, ProtocolError> {
    decode_channel_properties(frame).map(Answer::ChannelProperties)
}

fn answer_single_value(frame: &Frame) -> Result<Answer, ProtocolError> {
    decode_single_value(frame).map(Answer::SingleValue)
}

fn answer_multiple_values(frame: &Frame) -> Result<Answer, ProtocolError> {
    decode_multiple_values(frame).map(Answer::MultipleValues)
}

fn answer_log_data(frame: &Frame) -> Result<Answer, ProtocolError> {
    decode_log_data(frame).map(|(is_final, records)| Answer::LogData { is_final, records })
}

fn answer_discovery(frame: &Frame) -> Result<Answer, ProtocolError> {
    decode_discovery(frame).map(Answer::Discovery)
}
