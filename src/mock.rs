//! Scripted transport for exercising the protocol engine without hardware

use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::io::{Error, ErrorKind};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::frame::{Frame, FrameWriter, encode_response};
use crate::protocol::{opcode, report_type, search_flag, status};
use crate::transport::TransportPort;
use crate::types::{MetadataFlags, ReportFlags};

#[derive(Default)]
struct MockState {
    incoming: VecDeque<u8>,
    written: Vec<Vec<u8>>,
    /// One-shot replies per opcode, consumed in order
    scripted: HashMap<u8, VecDeque<Vec<Bytes>>>,
    /// Replies used whenever nothing is scripted for an opcode
    standing: HashMap<u8, Vec<Bytes>>,
    open: bool,
    baud_rate: u32,
    /// Only answer at this baud rate
    answers_at: Option<u32>,
}

/// Cloneable handle; clones share the same script and recordings so a test
/// can keep one while the reader owns another.
#[derive(Clone, Default)]
pub(crate) struct MockPort {
    state: Arc<Mutex<MockState>>,
}

impl MockPort {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    /// Queue bytes as if the module had sent them unsolicited.
    pub(crate) fn push_incoming(&self, bytes: &[u8]) {
        self.with(|s| s.incoming.extend(bytes.iter().copied()));
    }

    /// Answer the next command with `opcode` with these frames.
    pub(crate) fn respond(&self, opcode: u8, frames: Vec<Bytes>) {
        self.with(|s| s.scripted.entry(opcode).or_default().push_back(frames));
    }

    /// Answer every unscripted command with `opcode` with these frames.
    pub(crate) fn respond_always(&self, opcode: u8, frames: Vec<Bytes>) {
        self.with(|s| {
            s.standing.insert(opcode, frames);
        });
    }

    pub(crate) fn answer_only_at(&self, baud_rate: u32) {
        self.with(|s| s.answers_at = Some(baud_rate));
    }

    /// Every frame written so far.
    pub(crate) fn written(&self) -> Vec<Vec<u8>> {
        self.with(|s| s.written.clone())
    }

    /// Opcodes of every frame written so far.
    pub(crate) fn written_opcodes(&self) -> Vec<u8> {
        self.with(|s| s.written.iter().filter_map(|f| f.get(2).copied()).collect())
    }

    pub(crate) fn is_open(&self) -> bool {
        self.with(|s| s.open)
    }

    pub(crate) fn baud_rate(&self) -> u32 {
        self.with(|s| s.baud_rate)
    }
}

fn closed() -> Error {
    Error::new(ErrorKind::NotConnected, "mock port closed")
}

impl TransportPort for MockPort {
    type Error = Error;

    fn open(&mut self) -> Result<(), Self::Error> {
        self.with(|s| s.open = true);
        Ok(())
    }

    fn close(&mut self) -> Result<(), Self::Error> {
        self.with(|s| s.open = false);
        Ok(())
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), Self::Error> {
        self.with(|s| s.baud_rate = baud_rate);
        Ok(())
    }

    fn send_bytes(&mut self, data: &[u8], _timeout_ms: u32) -> Result<(), Self::Error> {
        self.with(|s| {
            if !s.open {
                return Err(closed());
            }
            s.written.push(data.to_vec());
            if s.answers_at.is_some_and(|rate| rate != s.baud_rate) {
                return Ok(());
            }
            let Some(&opcode) = data.get(2) else {
                return Ok(());
            };
            let reply = match s.scripted.get_mut(&opcode).and_then(VecDeque::pop_front) {
                Some(frames) => frames,
                None => s.standing.get(&opcode).cloned().unwrap_or_default(),
            };
            for frame in reply {
                s.incoming.extend(frame.iter().copied());
            }
            // the module switches rate after acknowledging
            if opcode == opcode::SET_BAUD_RATE && s.answers_at.is_some() {
                if let Some(rate) = data.get(3..7) {
                    s.answers_at = Some(u32::from_be_bytes([rate[0], rate[1], rate[2], rate[3]]));
                }
            }
            Ok(())
        })
    }

    fn receive_bytes(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, Self::Error> {
        let n = self.with(|s| {
            if !s.open {
                return Err(closed());
            }
            let n = s.incoming.len().min(buf.len());
            for (slot, byte) in buf.iter_mut().zip(s.incoming.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        })?;
        if n == 0 {
            std::thread::sleep(Duration::from_millis(u64::from(timeout_ms.min(2))));
        }
        Ok(n)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.with(|s| s.incoming.clear());
        Ok(())
    }
}

// ===================
// Module-side frame builders
// ===================

const REPORT_FLAGS: u16 = search_flag::ANTENNA_LIST | search_flag::TAG_STREAMING;

fn parse(raw: Bytes) -> Frame {
    Frame::parse(&raw).unwrap()
}

/// Streamed tag report with read count 1, RSSI and packed antenna metadata.
pub(crate) fn tag_report(epc: &[u8], antenna: u8, rssi: i8) -> Bytes {
    let mut w = FrameWriter::response(opcode::READ_TAG_ID_MULTIPLE, status::SUCCESS);
    w.put_u8(0x10).put_u16(REPORT_FLAGS).put_u8(report_type::TAG);
    let metadata = MetadataFlags::READ_COUNT | MetadataFlags::RSSI | MetadataFlags::ANTENNA_ID;
    w.put_u16(metadata.bits()).put_u8(1).put_u8(rssi as u8).put_u8(antenna);
    w.put_u16(((epc.len() + 4) * 8) as u16)
        .put_u16(0x3000)
        .put_slice(epc)
        .put_u16(0x1234);
    w.finish().unwrap()
}

pub(crate) fn tag_report_frame(epc: &[u8], antenna: u8, rssi: i8) -> Frame {
    parse(tag_report(epc, antenna, rssi))
}

/// Authentication request carrying a partial tag without metadata.
pub(crate) fn auth_request(epc: &[u8]) -> Bytes {
    let mut w = FrameWriter::response(opcode::READ_TAG_ID_MULTIPLE, status::SUCCESS);
    w.put_u8(0x10).put_u16(REPORT_FLAGS).put_u8(report_type::AUTH_REQUEST);
    w.put_u16(0)
        .put_u16(((epc.len() + 4) * 8) as u16)
        .put_u16(0x3000)
        .put_slice(epc)
        .put_u16(0);
    w.finish().unwrap()
}

/// Status or stats report with the given raw field bytes.
pub(crate) fn status_report(kind: u8, flags: ReportFlags, fields: &[u8]) -> Bytes {
    let mut w = FrameWriter::response(opcode::READ_TAG_ID_MULTIPLE, status::SUCCESS);
    w.put_u8(0x10)
        .put_u16(REPORT_FLAGS)
        .put_u8(kind)
        .put_u16(flags.bits())
        .put_slice(fields);
    w.finish().unwrap()
}

pub(crate) fn status_report_frame(kind: u8, flags: ReportFlags, fields: &[u8]) -> Frame {
    parse(status_report(kind, flags, fields))
}

/// End of one search, `count` tags left in the module buffer.
pub(crate) fn search_done(count: u32) -> Bytes {
    let mut w = FrameWriter::response(opcode::READ_TAG_ID_MULTIPLE, status::SUCCESS);
    w.put_u8(0x10)
        .put_u16(REPORT_FLAGS)
        .put_u8(report_type::SEARCH_DONE)
        .put_u32(count);
    w.finish().unwrap()
}

pub(crate) fn no_tags_found() -> Bytes {
    encode_response(opcode::READ_TAG_ID_MULTIPLE, status::NO_TAGS_FOUND, &[]).unwrap()
}

/// Assertion status with `[line][file]` payload.
pub(crate) fn assertion(op: u8, file: &str, line: u32) -> Bytes {
    let mut w = FrameWriter::response(op, status::TM_ASSERT_FAILED);
    w.put_u32(line).put_slice(file.as_bytes());
    w.finish().unwrap()
}

pub(crate) fn ok(op: u8, data: &[u8]) -> Bytes {
    encode_response(op, status::SUCCESS, data).unwrap()
}

pub(crate) fn start_ack() -> Bytes {
    ok(opcode::MULTI_PROTOCOL_TAG_OP, &[0x00, 0x00, 0x01])
}

pub(crate) fn stop_ack(draining: bool) -> Bytes {
    if draining {
        ok(opcode::MULTI_PROTOCOL_TAG_OP, &[0x00, 0x00, 0x02, 0x01])
    } else {
        ok(opcode::MULTI_PROTOCOL_TAG_OP, &[0x00, 0x00, 0x02])
    }
}

pub(crate) fn auth_ack() -> Bytes {
    ok(opcode::MULTI_PROTOCOL_TAG_OP, &[0x00, 0x00, 0x03])
}

/// One page of the tag buffer holding tags with only the antenna metadata.
pub(crate) fn buffer_page(tags: &[(&[u8], u8)]) -> Bytes {
    let mut w = FrameWriter::response(opcode::GET_TAG_ID_BUFFER, status::SUCCESS);
    w.put_u16(MetadataFlags::ANTENNA_ID.bits())
        .put_u8(0)
        .put_u8(tags.len() as u8);
    for (epc, antenna) in tags {
        w.put_u8(*antenna)
            .put_u16(((epc.len() + 4) * 8) as u16)
            .put_u16(0x3000)
            .put_slice(epc)
            .put_u16(0);
    }
    w.finish().unwrap()
}

pub(crate) fn buffer_empty() -> Bytes {
    encode_response(opcode::GET_TAG_ID_BUFFER, status::TAG_ID_BUFFER_NOT_ENOUGH_TAGS, &[]).unwrap()
}

/// Version answer for a module with the given hardware family byte, Gen2 only.
pub(crate) fn version(hardware: u8) -> Bytes {
    let mut w = FrameWriter::response(opcode::VERSION, status::SUCCESS);
    w.put_u32(0x0100_0000)
        .put_u32(u32::from_be_bytes([hardware, 0, 0, 0x01]))
        .put_u32(0x2024_0101)
        .put_u32(0x0113_0200)
        .put_u32(0x0000_0010);
    w.finish().unwrap()
}

pub(crate) fn version_frame(hardware: u8) -> Frame {
    parse(version(hardware))
}

/// Detected-port answer for ports `1..=count`.
pub(crate) fn antenna_ports(count: u8) -> Bytes {
    let mut data = vec![0x05];
    for port in 1..=count {
        data.extend_from_slice(&[port, 1]);
    }
    ok(opcode::GET_ANTENNA_PORT, &data)
}

/// A port answering like a freshly powered module with `ports` antennas.
pub(crate) fn module(ports: u8) -> MockPort {
    let port = MockPort::new();
    port.respond_always(opcode::VERSION, vec![version(0x30)]);
    port.respond_always(opcode::GET_ANTENNA_PORT, vec![antenna_ports(ports)]);
    for op in [
        opcode::SET_TAG_PROTOCOL,
        opcode::SET_ANTENNA_PORT,
        opcode::SET_REGION,
        opcode::SET_BAUD_RATE,
        opcode::CLEAR_TAG_ID_BUFFER,
    ] {
        port.respond_always(op, vec![ok(op, &[])]);
    }
    port.respond_always(opcode::GET_TAG_ID_BUFFER, vec![buffer_empty()]);
    port
}
