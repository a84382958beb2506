//! Types for RFID operations

use bytes::Bytes;
use std::ops::BitOr;
use std::time::{Duration, SystemTime};

use crate::error::{ProtocolError, ProtocolError::Malformed};
use crate::tagop::TagOp;

/// Air protocols, as encoded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TagProtocol {
    #[default]
    None,
    Iso180006b,
    Gen2,
    Iso180006bUcode,
    Ipx64,
    Ipx256,
    Ata,
    Other(u8),
}

impl TagProtocol {
    pub fn code(self) -> u8 {
        match self {
            TagProtocol::None => 0x00,
            TagProtocol::Iso180006b => 0x03,
            TagProtocol::Gen2 => 0x05,
            TagProtocol::Iso180006bUcode => 0x06,
            TagProtocol::Ipx64 => 0x07,
            TagProtocol::Ipx256 => 0x08,
            TagProtocol::Ata => 0x1D,
            TagProtocol::Other(code) => code,
        }
    }
}

impl From<u8> for TagProtocol {
    fn from(code: u8) -> Self {
        match code {
            0x00 => TagProtocol::None,
            0x03 => TagProtocol::Iso180006b,
            0x05 => TagProtocol::Gen2,
            0x06 => TagProtocol::Iso180006bUcode,
            0x07 => TagProtocol::Ipx64,
            0x08 => TagProtocol::Ipx256,
            0x1D => TagProtocol::Ata,
            other => TagProtocol::Other(other),
        }
    }
}

/// Metadata fields requested with a search, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MetadataFlags(u16);

impl MetadataFlags {
    pub const NONE: Self = Self(0x0000);
    pub const READ_COUNT: Self = Self(0x0001);
    pub const RSSI: Self = Self(0x0002);
    pub const ANTENNA_ID: Self = Self(0x0004);
    pub const FREQUENCY: Self = Self(0x0008);
    pub const TIMESTAMP: Self = Self(0x0010);
    pub const PHASE: Self = Self(0x0020);
    pub const PROTOCOL: Self = Self(0x0040);
    pub const DATA: Self = Self(0x0080);
    pub const GPIO_STATUS: Self = Self(0x0100);
    pub const GEN2_Q: Self = Self(0x0200);
    pub const GEN2_LF: Self = Self(0x0400);
    pub const GEN2_TARGET: Self = Self(0x0800);
    pub const BRAND_ID: Self = Self(0x1000);
    pub const ALL: Self = Self(0x1FFF);

    /// Fields requested when a plan does not say otherwise.
    pub const DEFAULT: Self = Self(0x007F);

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for MetadataFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Content of status and stats reports, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReportFlags(u16);

impl ReportFlags {
    pub const NONE: Self = Self(0x0000);
    pub const ANTENNA: Self = Self(0x0001);
    pub const FREQUENCY: Self = Self(0x0002);
    pub const TEMPERATURE: Self = Self(0x0004);
    pub const RF_ON_TIME: Self = Self(0x0008);
    pub const NOISE_FLOOR: Self = Self(0x0010);
    pub const ALL: Self = Self(0x001F);

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ReportFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// One tag observation decoded from a report frame or the tag buffer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TagRecord {
    pub epc: Bytes,
    pub pc: u16,
    pub crc: u16,
    pub protocol: TagProtocol,
    pub read_count: u32,
    /// Signal strength in dBm
    pub rssi: i32,
    /// Logical antenna id
    pub antenna: u8,
    /// Carrier frequency in kHz
    pub frequency: u32,
    /// Offset from the start of the read operation
    pub timestamp_offset: Duration,
    pub phase: u16,
    /// Data returned by an embedded tag operation
    pub data: Bytes,
    pub gpio: Option<u8>,
    pub gen2_q: Option<u8>,
    pub gen2_link_frequency: Option<u8>,
    pub gen2_target: Option<u8>,
    pub brand_id: Option<u16>,
}

impl TagRecord {
    /// Record with only an EPC and a single read, as a module reports it
    /// when no metadata was requested.
    pub fn with_epc(epc: &[u8]) -> Self {
        Self {
            epc: Bytes::copy_from_slice(epc),
            read_count: 1,
            ..Default::default()
        }
    }

    pub fn epc_hex(&self) -> String {
        bytes_to_hex(&self.epc)
    }
}

/// Asynchronous status report pushed while streaming.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusReport {
    pub antenna: Option<u8>,
    pub frequency: Option<u32>,
    pub temperature: Option<i8>,
}

/// Asynchronous statistics report pushed while streaming.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsReport {
    pub antenna: Option<u8>,
    pub frequency: Option<u32>,
    pub temperature: Option<i8>,
    /// RF on-time in milliseconds since the last report
    pub rf_on_time: Option<u32>,
    pub noise_floor: Option<i8>,
}

/// How a continuous read keeps the module busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// Timed searches into the on-module buffer, drained by the host.
    Buffered,
    /// The module pushes reports until told to stop.
    #[default]
    Streaming,
}

/// What to search for and what to report.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReadPlan {
    pub protocol: TagProtocol,
    /// Logical antennas; empty selects every mapped antenna.
    pub antennas: Vec<u8>,
    pub metadata: MetadataFlags,
    pub mode: ReadMode,
    pub tag_op: Option<TagOp>,
    /// Content of status or stats reports, sent to whichever listener set is registered.
    pub report: ReportFlags,
}

impl ReadPlan {
    pub fn new(protocol: TagProtocol, antennas: &[u8]) -> Self {
        Self {
            protocol,
            antennas: antennas.to_vec(),
            metadata: MetadataFlags::DEFAULT,
            ..Default::default()
        }
    }

    pub fn with_mode(mut self, mode: ReadMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_metadata(mut self, metadata: MetadataFlags) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_tag_op(mut self, op: TagOp) -> Self {
        self.tag_op = Some(op);
        self
    }

    pub fn with_report(mut self, report: ReportFlags) -> Self {
        self.report = report;
        self
    }
}

/// Result of one read operation: whatever was aggregated plus the faults seen.
#[derive(Debug, Clone)]
pub struct ReadOutcome {
    pub tags: Vec<TagRecord>,
    pub faults: Vec<ProtocolError>,
    pub started_at: SystemTime,
}

impl ReadOutcome {
    pub fn is_clean(&self) -> bool {
        self.faults.is_empty()
    }
}

/// Regulatory region codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    NorthAmerica = 0x01,
    Europe = 0x02,
    Korea = 0x03,
    India = 0x04,
    Japan = 0x05,
    China = 0x06,
    Europe3 = 0x08,
    Australia = 0x0B,
    NewZealand = 0x0C,
    Open = 0xFF,
}

impl TryFrom<u8> for Region {
    type Error = ProtocolError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0x01 => Ok(Region::NorthAmerica),
            0x02 => Ok(Region::Europe),
            0x03 => Ok(Region::Korea),
            0x04 => Ok(Region::India),
            0x05 => Ok(Region::Japan),
            0x06 => Ok(Region::China),
            0x08 => Ok(Region::Europe3),
            0x0B => Ok(Region::Australia),
            0x0C => Ok(Region::NewZealand),
            0xFF => Ok(Region::Open),
            other => Err(Malformed(format!("unknown region code 0x{:02X}", other))),
        }
    }
}

/// Memory bank for tag operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryBank {
    Reserved = 0x00,
    Epc = 0x01,
    Tid = 0x02,
    User = 0x03,
}

/// Module hardware family, from the first hardware version byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ModuleModel {
    M6e,
    M6eI,
    M6eMicro,
    M6eNano,
    #[default]
    Unknown,
}

impl From<u8> for ModuleModel {
    fn from(code: u8) -> Self {
        match code {
            0x18 => ModuleModel::M6e,
            0x19 => ModuleModel::M6eI,
            0x20 => ModuleModel::M6eMicro,
            0x30 => ModuleModel::M6eNano,
            _ => ModuleModel::Unknown,
        }
    }
}

/// Answer to the version query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub bootloader: [u8; 4],
    pub hardware: [u8; 4],
    pub firmware_date: [u8; 4],
    pub firmware_version: [u8; 4],
    /// Bit `n - 1` set when protocol code `n` is supported
    pub supported_protocols: u32,
}

impl VersionInfo {
    pub fn model(&self) -> ModuleModel {
        ModuleModel::from(self.hardware[0])
    }

    pub fn supports(&self, protocol: TagProtocol) -> bool {
        match protocol.code() {
            0 => false,
            code if code <= 32 => self.supported_protocols & (1 << (code - 1)) != 0,
            _ => false,
        }
    }

    pub fn firmware(&self) -> String {
        let v = self.firmware_version;
        format!("{:02X}.{:02X}.{:02X}.{:02X}", v[0], v[1], v[2], v[3])
    }
}

/// Convert bytes to uppercase hex string
pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}
