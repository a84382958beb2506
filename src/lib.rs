//! Host-side driver for serial-protocol UHF RFID reader modules, with support
//! for multiple transport backends.
//!
//! The driver frames commands, resynchronizes on noisy links, decodes tag and
//! status reports, and keeps a continuous read running on a background thread
//! while other commands are slipped into the report stream.
//!
//! # Features
//!
//! - `uart-esp32` - UART transport for ESP32 using esp-idf-svc
//! - `serial` - Serial port transport for desktop using serialport crate
//!
//! # Example
//!
//! ```ignore
//! use mercury_serial::{ReadPlan, Reader, ReaderConfig, SerialTransport, TagProtocol};
//! use std::time::Duration;
//!
//! let transport = SerialTransport::new("/dev/ttyUSB0", 115200);
//! let reader = Reader::new(transport, ReaderConfig::default());
//! reader.connect()?;
//!
//! let outcome = reader.read(&ReadPlan::new(TagProtocol::Gen2, &[]), Duration::from_millis(500))?;
//! for tag in &outcome.tags {
//!     println!("{} seen {} times on antenna {}", tag.epc_hex(), tag.read_count, tag.antenna);
//! }
//! ```

mod aggregate;
mod antenna;
mod config;
mod continuous;
mod error;
mod frame;
mod link;
mod observer;
mod protocol;
mod reader;
mod report;
mod retry;
mod tagop;
mod transaction;
mod transport;
mod types;

#[cfg(test)]
mod mock;

#[cfg(feature = "uart-esp32")]
mod uart;

#[cfg(feature = "serial")]
mod serial;

// Re-exports
pub use aggregate::{TagRecordAggregator, UniquenessPolicy};
pub use antenna::{AntennaMap, AntennaPortEntry, PortStatus, pack, unpack};
pub use config::{DEFAULT_BAUD_RATE, DEFAULT_PROBE_BAUD_RATES, ReaderConfig};
pub use continuous::{ReadState, StreamMode};
pub use error::{ProtocolError, Result};
pub use frame::{Frame, FrameReader, FrameWriter, crc16, encode, encode_response, verify_crc};
pub use observer::{
    AuthListener, ExceptionListener, FrameDirection, ReadListener, StatsListener, StatusListener,
    TraceListener,
};
pub use reader::Reader;
pub use retry::{CancelToken, RetryPolicy};
pub use tagop::TagOp;
pub use transport::TransportPort;
pub use types::{
    MemoryBank, MetadataFlags, ModuleModel, ReadMode, ReadOutcome, ReadPlan, Region, ReportFlags,
    StatsReport, StatusReport, TagProtocol, TagRecord, VersionInfo,
};

#[cfg(feature = "uart-esp32")]
pub use uart::UartTransport;

#[cfg(feature = "serial")]
pub use serial::SerialTransport;
