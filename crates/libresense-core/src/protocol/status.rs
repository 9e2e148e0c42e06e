//! Device status codes
//!
//! Every answer carries a status byte as its first payload byte. Non-zero
//! codes mean the device executed the command but reports a problem; the
//! table below maps codes to their firmware names and descriptions.

/// `(code, name, description)` for every documented status byte.
pub static STATUS_WORDS: &[(u8, &str, &str)] = &[
    (0x00, "OK", "command successful"),
    (0x10, "UNKNOWN_CMD", "unknown command"),
    (0x11, "INVALID_PARAM", "invalid parameter"),
    (0x12, "INVALID_HEADER", "invalid header version"),
    (0x13, "INVALID_VERC", "invalid version of the command"),
    (0x14, "INVALID_PW", "invalid password for command"),
    (0x20, "READ_ERR", "read error"),
    (0x21, "WRITE_ERR", "write error"),
    (0x22, "TOO_LONG", "too long"),
    (0x23, "INVALID_ADDRESS", "invalid address"),
    (0x24, "INVALID_CHANNEL", "invalid channel"),
    (0x25, "INVALID_CMD", "command not possible in this mode"),
    (0x26, "UNKNOWN_CAL_CMD", "unknown calibration command"),
    (0x27, "CAL_ERROR", "calibration error"),
    (0x28, "BUSY", "busy"),
    (0x29, "LOW_VOLTAGE", "low voltage"),
    (0x2A, "HW_ERROR", "hardware error"),
    (0x2B, "MEAS_ERROR", "measurement error"),
    (0x2C, "INIT_ERROR", "device initialization error"),
    (0x2D, "OS_ERROR", "operating system error"),
    (0x30, "E2_DEFAULT_CONF", "error. loading the default configuration."),
    (0x31, "E2_CAL_ERROR", "calibration invalid - measurement impossible"),
    (0x32, "E2_CRC_CONF_ERR", "CRC error. loading the default configuration."),
    (
        0x33,
        "E2_CRC_CAL_ERR",
        "CRC error. calibration invalid - measurement impossible",
    ),
    (0x34, "ADJ_STEP1", "adjustment step 1"),
    (0x35, "ADJ_OK", "adjustment OK"),
    (0x36, "CHANNEL_OFF", "channel deactivated"),
    (
        0x50,
        "VALUE_OVERFLOW",
        "measured value (+offset) is above the set value limit",
    ),
    (0x51, "VALUE_UNDERFLOW", ""),
    (
        0x52,
        "CHANNEL_OVERRANGE",
        "measured value (physical) is above the measurable range (e.g. ADC saturation)",
    ),
    (0x53, "CHANNEL_UNDERRANGE", ""),
    (0x54, "DATA_ERROR", "measurement data is invalid or doesn't exist"),
    (
        0x55,
        "MEAS_UNABLE",
        "measurement impossible - check the environment conditions!",
    ),
    (
        0x60,
        "FLASH_CRC_ERR",
        "CRC error in the values stored in flash memory",
    ),
    (0x61, "FLASH_WRITE_ERR", "error on writing to flash memory"),
    (0x62, "FLASH_FLOAT_ERR", "flash memory contains invalid float values"),
    (0x80, "FW_RECEIVE_ERR", "error activating firmware flash mode"),
    (0x81, "CRC_ERR", "CRC error"),
    (0x82, "TIMEOUT_ERR", "timeout occured"),
    (0xF0, "RESERVED", "reserved"),
    (0xFF, "UNKNOWN_ERR", "unknown error"),
];

/// Firmware name for a status code.
pub fn status_name(code: u8) -> Option<&'static str> {
    STATUS_WORDS
        .iter()
        .find(|(c, _, _)| *c == code)
        .map(|(_, name, _)| *name)
}

/// Human-readable description for a status code.
pub fn status_description(code: u8) -> Option<&'static str> {
    STATUS_WORDS
        .iter()
        .find(|(c, _, _)| *c == code)
        .map(|(_, _, descr)| *descr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(status_name(0x00), Some("OK"));
        assert_eq!(status_name(0x10), Some("UNKNOWN_CMD"));
        assert_eq!(status_name(0x36), Some("CHANNEL_OFF"));
        assert_eq!(status_name(0x99), None);
        assert_eq!(status_description(0x28), Some("busy"));
    }

    #[test]
    fn test_codes_unique() {
        for (i, (code, _, _)) in STATUS_WORDS.iter().enumerate() {
            assert!(
                !STATUS_WORDS[i + 1..].iter().any(|(c, _, _)| c == code),
                "duplicate status code {:#04x}",
                code
            );
        }
    }
}
