//! Wire protocol constants: opcodes, status codes and sub-options

/// Start-of-frame marker.
pub const SOF: u8 = 0xFF;

/// Largest value of the length byte.
pub const MAX_DATA_LEN: usize = 0xF8;

/// Command frame overhead: SOF + length + opcode + CRC.
pub const COMMAND_OVERHEAD: usize = 5;

/// Response frame overhead: SOF + length + opcode + status + CRC.
pub const RESPONSE_OVERHEAD: usize = 7;

/// Command opcodes.
pub mod opcode {
    pub const VERSION: u8 = 0x03;
    pub const BOOT_FIRMWARE: u8 = 0x04;
    pub const SET_BAUD_RATE: u8 = 0x06;
    pub const READ_TAG_ID_MULTIPLE: u8 = 0x22;
    pub const WRITE_TAG_DATA: u8 = 0x24;
    pub const LOCK_TAG: u8 = 0x25;
    pub const KILL_TAG: u8 = 0x26;
    pub const READ_TAG_DATA: u8 = 0x28;
    pub const GET_TAG_ID_BUFFER: u8 = 0x29;
    pub const CLEAR_TAG_ID_BUFFER: u8 = 0x2A;
    pub const MULTI_PROTOCOL_TAG_OP: u8 = 0x2F;
    pub const GET_ANTENNA_PORT: u8 = 0x61;
    pub const GET_TAG_PROTOCOL: u8 = 0x63;
    pub const GET_REGION: u8 = 0x67;
    pub const SET_ANTENNA_PORT: u8 = 0x91;
    pub const SET_TAG_PROTOCOL: u8 = 0x93;
    pub const SET_REGION: u8 = 0x97;
}

/// Module status words.
pub mod status {
    pub const SUCCESS: u16 = 0x0000;
    pub const MSG_WRONG_NUMBER_OF_DATA: u16 = 0x0100;
    pub const INVALID_OPCODE: u16 = 0x0101;
    pub const UNIMPLEMENTED_OPCODE: u16 = 0x0102;
    pub const MSG_POWER_TOO_HIGH: u16 = 0x0103;
    pub const MSG_INVALID_FREQ_RECEIVED: u16 = 0x0104;
    pub const MSG_INVALID_PARAMETER_VALUE: u16 = 0x0105;
    pub const MSG_POWER_TOO_LOW: u16 = 0x0106;
    pub const UNIMPLEMENTED_FEATURE: u16 = 0x0109;
    pub const INVALID_BAUD_RATE: u16 = 0x010A;
    pub const INVALID_REGION: u16 = 0x010B;
    pub const NO_TAGS_FOUND: u16 = 0x0400;
    pub const NO_PROTOCOL_DEFINED: u16 = 0x0401;
    pub const INVALID_PROTOCOL_SPECIFIED: u16 = 0x0402;
    pub const GENERAL_TAG_ERROR: u16 = 0x0406;
    pub const TAG_ID_BUFFER_NOT_ENOUGH_TAGS: u16 = 0x0600;
    pub const TAG_ID_BUFFER_FULL: u16 = 0x0601;
    pub const TAG_ID_BUFFER_REPEATED_TAG_ID: u16 = 0x0602;
    pub const TAG_ID_BUFFER_NUM_TAG_TOO_LARGE: u16 = 0x0603;
    pub const ANTENNA_NOT_CONNECTED: u16 = 0x0A04;
    pub const TEMPERATURE_EXCEED_LIMITS: u16 = 0x0A05;
    pub const HIGH_RETURN_LOSS: u16 = 0x0A06;
    pub const SYSTEM_UNKNOWN_ERROR: u16 = 0x7F00;
    pub const TM_ASSERT_FAILED: u16 = 0x7F01;
}

/// Option byte of `MULTI_PROTOCOL_TAG_OP` frames.
pub mod stream_option {
    pub const START: u8 = 0x01;
    pub const STOP: u8 = 0x02;
    pub const AUTH_RESPONSE: u8 = 0x03;

    /// Trailing byte of a stop acknowledgement while the module still drains.
    pub const STOP_DRAINING: u8 = 0x01;
}

/// Report-type discriminator at [`REPORT_TYPE_OFFSET`] of `READ_TAG_ID_MULTIPLE` data.
pub mod report_type {
    pub const TAG: u8 = 0x00;
    pub const STATUS: u8 = 0x01;
    pub const STATS: u8 = 0x02;
    pub const AUTH_REQUEST: u8 = 0x03;
    pub const SEARCH_DONE: u8 = 0x04;
}

/// Offset of the report-type byte: option(1) + search flags(2).
pub const REPORT_TYPE_OFFSET: usize = 3;

/// Search flags sent with `READ_TAG_ID_MULTIPLE`.
pub mod search_flag {
    pub const ANTENNA_LIST: u16 = 0x0001;
    pub const EMBEDDED_OP: u16 = 0x0004;
    pub const TAG_STREAMING: u16 = 0x0100;
    pub const STATS_REPORT: u16 = 0x0200;
    pub const STATUS_REPORT: u16 = 0x0400;
}

/// Option byte of a search command: metadata is always requested.
pub const SEARCH_OPTION_METADATA: u8 = 0x10;

/// Option byte of `SET_ANTENNA_PORT` selecting a tx/rx search list.
pub const ANTENNA_OPTION_SEARCH_LIST: u8 = 0x02;

/// Option byte of `GET_ANTENNA_PORT` returning detected ports.
pub const ANTENNA_OPTION_DETECT: u8 = 0x05;

/// Opcodes accepted by the decoder even when another response is expected.
pub const ALWAYS_ACCEPTABLE: [u8; 3] = [
    opcode::READ_TAG_ID_MULTIPLE,
    opcode::BOOT_FIRMWARE,
    opcode::MULTI_PROTOCOL_TAG_OP,
];

/// Opcodes that only show up unsolicited while the module streams.
pub fn is_streaming_opcode(op: u8) -> bool {
    op == opcode::READ_TAG_ID_MULTIPLE || op == opcode::MULTI_PROTOCOL_TAG_OP
}

/// Status words carrying a firmware assertion.
pub fn is_assertion(code: u16) -> bool {
    code & status::TM_ASSERT_FAILED == status::TM_ASSERT_FAILED
}

/// Decode the `[line:u32 BE][ASCII file name]` assertion payload.
pub(crate) fn decode_assertion(data: &[u8]) -> (String, u32) {
    if data.len() < 4 {
        return (String::from_utf8_lossy(data).trim_end_matches('\0').to_string(), 0);
    }
    let line = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    let name = &data[4..];
    let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
    (String::from_utf8_lossy(&name[..end]).to_string(), line)
}

/// Human readable name of a module status word.
pub fn fault_name(code: u16) -> &'static str {
    if is_assertion(code) {
        return "firmware assertion";
    }
    match code {
        status::SUCCESS => "success",
        status::MSG_WRONG_NUMBER_OF_DATA => "wrong number of data bytes",
        status::INVALID_OPCODE => "invalid opcode",
        status::UNIMPLEMENTED_OPCODE => "unimplemented opcode",
        status::MSG_POWER_TOO_HIGH => "power too high",
        status::MSG_INVALID_FREQ_RECEIVED => "invalid frequency",
        status::MSG_INVALID_PARAMETER_VALUE => "invalid parameter value",
        status::MSG_POWER_TOO_LOW => "power too low",
        status::UNIMPLEMENTED_FEATURE => "unimplemented feature",
        status::INVALID_BAUD_RATE => "invalid baud rate",
        status::INVALID_REGION => "invalid region",
        status::NO_TAGS_FOUND => "no tags found",
        status::NO_PROTOCOL_DEFINED => "no protocol defined",
        status::INVALID_PROTOCOL_SPECIFIED => "invalid protocol",
        status::GENERAL_TAG_ERROR => "general tag error",
        status::TAG_ID_BUFFER_NOT_ENOUGH_TAGS => "not enough tags in buffer",
        status::TAG_ID_BUFFER_FULL => "tag buffer full",
        status::TAG_ID_BUFFER_REPEATED_TAG_ID => "repeated tag id",
        status::TAG_ID_BUFFER_NUM_TAG_TOO_LARGE => "tag count too large",
        status::ANTENNA_NOT_CONNECTED => "antenna not connected",
        status::TEMPERATURE_EXCEED_LIMITS => "temperature limit exceeded",
        status::HIGH_RETURN_LOSS => "high return loss",
        status::SYSTEM_UNKNOWN_ERROR => "unknown system error",
        _ => "unknown fault",
    }
}
