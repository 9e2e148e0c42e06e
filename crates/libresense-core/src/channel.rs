//! Measurement channels
//!
//! A channel is a numbered measurement source on the device (e.g. 100 is the
//! current temperature in °C). The table below lists every channel this
//! client understands; devices may announce additional channel numbers with
//! no documented semantics, which callers skip (see
//! [`crate::protocol::catalog::decode_available_channels`]).

/// Static description of one measurement channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelInfo {
    /// Semantic name, including the CUR/MIN/MAX/AVG aggregate prefix
    pub name: &'static str,
    /// Unit the value is reported in
    pub unit: &'static str,
    /// Permissible calibration offset range
    pub offset_range: &'static str,
}

const fn info(
    name: &'static str,
    unit: &'static str,
    offset_range: &'static str,
) -> ChannelInfo {
    ChannelInfo {
        name,
        unit,
        offset_range,
    }
}

/// All channels supported by this client, ordered by channel number.
pub static CHANNEL_SPEC: &[(u16, ChannelInfo)] = &[
    (100, info("CUR temperature", "°C", "±10.0")),
    (105, info("CUR temperature", "°F", "0.0")),
    (110, info("CUR dewpoint", "°C", "0.0")),
    (115, info("CUR dewpoint", "°F", "0.0")),
    (120, info("MIN temperature", "°C", "±10.0")),
    (125, info("MIN temperature", "°F", "0.0")),
    (130, info("MIN dewpoint", "°C", "0.0")),
    (135, info("MIN dewpoint", "°F", "0.0")),
    (140, info("MAX temperature", "°C", "±10.0")),
    (145, info("MAX temperature", "°F", "0.0")),
    (155, info("MAX dewpoint", "°F", "0.0")),
    (160, info("AVG temperature", "°C", "±10.0")),
    (165, info("AVG temperature", "°F", "0.0")),
    (170, info("AVG dewpoint", "°C", "0.0")),
    (175, info("AVG dewpoint", "°F", "0.0")),
    (200, info("CUR relative humidity", "%", "±30.0")),
    (205, info("CUR absolute humidity", "g/m³", "0.0")),
    (220, info("MIN relative humidity", "%", "±30.0")),
    (225, info("MIN absolute humidity", "g/m³", "0.0")),
    (240, info("MAX relative humidity", "%", "±30.0")),
    (245, info("MAX absolute humidity", "g/m³", "0.0")),
    (260, info("AVG relative humidity", "%", "±30.0")),
    (265, info("AVG absolute humidity", "g/m³", "0.0")),
    (300, info("CUR abs. air pressure", "hPa", "±10.0")),
    (305, info("CUR abs. air pressure", "hPa", "0.0")),
    (320, info("MIN abs. air pressure", "hPa", "±10.0")),
    (325, info("MIN abs. air pressure", "hPa", "0.0")),
    (340, info("MAX abs. air pressure", "hPa", "±10.0")),
    (345, info("MAX abs. air pressure", "hPa", "0.0")),
    (360, info("AVG abs. air pressure", "hPa", "±10.0")),
    (365, info("AVG abs. air pressure", "hPa", "0.0")),
    (10020, info("CUR battery voltage", "V", "0.0")),
    (10040, info("MIN battery voltage", "V", "0.0")),
    (10060, info("MAX battery voltage", "V", "0.0")),
    (10080, info("AVG battery voltage", "V", "0.0")),
];

/// Look up a channel number, returning `None` for channels this client does
/// not support.
pub fn channel_info(channel: u16) -> Option<&'static ChannelInfo> {
    CHANNEL_SPEC
        .binary_search_by_key(&channel, |(num, _)| *num)
        .ok()
        .map(|idx| &CHANNEL_SPEC[idx].1)
}

/// Whether a channel number is known to this client.
pub fn is_known_channel(channel: u16) -> bool {
    channel_info(channel).is_some()
}
