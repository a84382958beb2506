//! Byte-level link to the module: receive buffering and frame resynchronization.

use bytes::BytesMut;
use log::{debug, trace, warn};
use std::fmt::Debug;
use std::time::{Duration, Instant};

use crate::error::{ProtocolError, Result};
use crate::frame::{Frame, crc16};
use crate::observer::{FrameDirection, Observers};
use crate::protocol::{self, ALWAYS_ACCEPTABLE, MAX_DATA_LEN, RESPONSE_OVERHEAD, SOF, opcode};
use crate::transport::TransportPort;

/// Bytes needed before a header can be judged: the smallest complete response.
const HEADER_WINDOW: usize = RESPONSE_OVERHEAD;

/// Garbage discards tolerated while looking for one frame.
const MAX_RESYNC_ATTEMPTS: usize = 10;

const CHUNK: usize = 256;

pub(crate) fn transport_error<E: Debug>(e: E) -> ProtocolError {
    ProtocolError::Transport(format!("{:?}", e))
}

pub(crate) fn millis(d: Duration) -> u32 {
    d.as_millis().min(u32::MAX as u128) as u32
}

/// Which opcodes a receive is willing to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Accept {
    expected: Option<u8>,
    streaming: bool,
}

impl Accept {
    /// Plain command/response exchange on an idle link.
    pub(crate) fn response(opcode: u8) -> Self {
        Self {
            expected: Some(opcode),
            streaming: false,
        }
    }

    /// Background loop of a continuous read, optionally waiting for a control response.
    pub(crate) fn stream(pending: Option<u8>) -> Self {
        Self {
            expected: pending,
            streaming: true,
        }
    }

    fn plausible(&self, op: u8) -> bool {
        self.expected == Some(op) || ALWAYS_ACCEPTABLE.contains(&op)
    }

    fn check(&self, op: u8) -> Result<()> {
        if self.expected == Some(op) {
            return Ok(());
        }
        if op == opcode::BOOT_FIRMWARE {
            return Err(ProtocolError::DeviceReset);
        }
        match self.expected {
            _ if self.streaming => Ok(()),
            Some(expected)
                if protocol::is_streaming_opcode(op) && !protocol::is_streaming_opcode(expected) =>
            {
                Err(ProtocolError::AutonomousModeConflict)
            }
            Some(expected) => Err(ProtocolError::UnexpectedOpcode {
                expected,
                received: op,
            }),
            None => Ok(()),
        }
    }

    fn timeout(&self) -> ProtocolError {
        ProtocolError::Timeout {
            opcode: self.expected.unwrap_or(opcode::READ_TAG_ID_MULTIPLE),
        }
    }
}

/// Owns the transport while it is open. Only one thread uses a link at a
/// time; the session keeps it behind its receive-section lock.
pub(crate) struct Link<T: TransportPort> {
    port: T,
    rx: BytesMut,
    open: bool,
    observers: Observers,
    discarded: usize,
}

impl<T: TransportPort> Link<T> {
    pub(crate) fn new(port: T, observers: Observers) -> Self {
        Self {
            port,
            rx: BytesMut::with_capacity(CHUNK * 2),
            open: false,
            observers,
            discarded: 0,
        }
    }

    pub(crate) fn open(&mut self) -> Result<()> {
        if !self.open {
            self.port.open().map_err(transport_error)?;
            self.open = true;
        }
        self.rx.clear();
        Ok(())
    }

    /// Release the port. Safe to call repeatedly.
    pub(crate) fn close(&mut self) -> Result<()> {
        self.rx.clear();
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.port.close().map_err(transport_error)
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(ProtocolError::Transport("link is closed".into()))
        }
    }

    pub(crate) fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.ensure_open()?;
        self.port.set_baud_rate(baud_rate).map_err(transport_error)
    }

    /// Drop buffered and pending input.
    pub(crate) fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.rx.clear();
        self.port.flush().map_err(transport_error)
    }

    pub(crate) fn send(&mut self, frame: &[u8], timeout: Duration) -> Result<()> {
        self.ensure_open()?;
        debug!("TX {:02X?}", frame);
        if self.observers.tracing() {
            self.observers.trace(FrameDirection::Tx, frame, millis(timeout));
        }
        self.port
            .send_bytes(frame, millis(timeout))
            .map_err(transport_error)
    }

    /// Total garbage bytes thrown away while resynchronizing.
    #[cfg(test)]
    pub(crate) fn discarded(&self) -> usize {
        self.discarded
    }

    /// Read until at least `min` bytes are buffered. `false` when the deadline passed first.
    fn fill(&mut self, min: usize, deadline: Instant) -> Result<bool> {
        let mut chunk = [0u8; CHUNK];
        while self.rx.len() < min {
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            let wait = millis(deadline - now).max(1);
            let n = self
                .port
                .receive_bytes(&mut chunk, wait)
                .map_err(transport_error)?;
            self.rx.extend_from_slice(&chunk[..n]);
        }
        Ok(true)
    }

    /// Number of leading bytes that cannot start an acceptable frame.
    fn garbage_prefix(&self, accept: &Accept) -> usize {
        let buf = &self.rx[..];
        for (i, &b) in buf.iter().enumerate() {
            if b != SOF {
                continue;
            }
            match (buf.get(i + 1), buf.get(i + 2)) {
                (Some(&len), _) if len as usize > MAX_DATA_LEN => continue,
                (Some(_), Some(&op)) if !accept.plausible(op) => continue,
                _ => return i,
            }
        }
        buf.len()
    }

    /// Decode the next acceptable frame within `timeout`.
    pub(crate) fn receive(&mut self, accept: Accept, timeout: Duration) -> Result<Frame> {
        self.ensure_open()?;
        let deadline = Instant::now() + timeout;
        let mut attempts = 0;

        loop {
            if !self.fill(HEADER_WINDOW, deadline)? {
                return Err(accept.timeout());
            }
            let garbage = self.garbage_prefix(&accept);
            if garbage == 0 {
                if attempts > 0 {
                    debug!("Resynchronized, {} bytes discarded on this link", self.discarded);
                }
                break;
            }
            warn!("Resync: discarding {} bytes {:02X?}", garbage, &self.rx[..garbage]);
            let _ = self.rx.split_to(garbage);
            self.discarded += garbage;
            attempts += 1;
            if attempts > MAX_RESYNC_ATTEMPTS {
                return Err(accept.timeout());
            }
        }

        let total = self.rx[1] as usize + RESPONSE_OVERHEAD;
        if !self.fill(total, deadline)? {
            return Err(accept.timeout());
        }
        let raw = self.rx.split_to(total).freeze();

        let received = u16::from_be_bytes([raw[total - 2], raw[total - 1]]);
        let computed = crc16(&raw[1..total - 2]);
        if received != computed {
            warn!("Dropping frame with bad checksum: {:02X?}", &raw[..]);
            return Err(ProtocolError::ChecksumFault { received, computed });
        }

        debug!("RX {:02X?}", &raw[..]);
        if self.observers.tracing() {
            self.observers.trace(FrameDirection::Rx, &raw, millis(timeout));
        }
        let frame = Frame::from_validated(raw);
        accept.check(frame.opcode())?;
        Ok(frame)
    }

    /// Background-loop receive: `None` when nothing arrives within `idle`,
    /// otherwise the frame that started arriving, decoded within `timeout`.
    pub(crate) fn poll(&mut self, accept: Accept, idle: Duration, timeout: Duration) -> Result<Option<Frame>> {
        self.ensure_open()?;
        let idle_deadline = Instant::now() + idle;
        // commit to a full frame wait only once a plausible header is buffered
        loop {
            let garbage = self.garbage_prefix(&accept);
            if garbage > 0 {
                warn!("Resync: discarding {} idle bytes {:02X?}", garbage, &self.rx[..garbage]);
                let _ = self.rx.split_to(garbage);
                self.discarded += garbage;
                continue;
            }
            if self.rx.len() >= HEADER_WINDOW {
                break;
            }
            if !self.fill(self.rx.len() + 1, idle_deadline)? {
                trace!("Poll: idle");
                return Ok(None);
            }
        }
        self.receive(accept, timeout).map(Some)
    }
}

impl<T: TransportPort> Drop for Link<T> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close transport: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode_response;
    use crate::mock::MockPort;

    fn open_link(port: &MockPort) -> Link<MockPort> {
        let mut link = Link::new(port.clone(), Observers::default());
        link.open().unwrap();
        link
    }

    const SHORT: Duration = Duration::from_millis(200);

    #[test]
    fn test_receive_clean_frame() {
        let port = MockPort::new();
        let mut link = open_link(&port);
        port.push_incoming(&encode_response(0x03, 0, &[1, 2, 3]).unwrap());
        let frame = link.receive(Accept::response(0x03), SHORT).unwrap();
        assert_eq!(frame.data(), &[1, 2, 3]);
        assert_eq!(link.discarded(), 0);
    }

    #[test]
    fn test_resync_discards_exactly_garbage() {
        for garbage in [1usize, 3, 6, 7, 20, 63] {
            let port = MockPort::new();
            let mut link = open_link(&port);
            let noise: Vec<u8> = (0..garbage).map(|i| (i as u8).wrapping_mul(7) & 0x7F).collect();
            port.push_incoming(&noise);
            port.push_incoming(&encode_response(0x63, 0, &[0x00, 0x05]).unwrap());
            let frame = link.receive(Accept::response(0x63), SHORT).unwrap();
            assert_eq!(frame.data(), &[0x00, 0x05]);
            assert_eq!(link.discarded(), garbage, "garbage {}", garbage);
        }
    }

    #[test]
    fn test_resync_skips_false_marker() {
        let port = MockPort::new();
        let mut link = open_link(&port);
        // 0xFF followed by an impossible length, then a marker with an unacceptable opcode
        port.push_incoming(&[0xFF, 0xFE, 0x00, 0xFF, 0x01, 0x55, 0x00]);
        port.push_incoming(&encode_response(0x03, 0, &[]).unwrap());
        assert!(link.receive(Accept::response(0x03), SHORT).is_ok());
        assert_eq!(link.discarded(), 7);
    }

    #[test]
    fn test_receive_times_out_without_frame() {
        let port = MockPort::new();
        let mut link = open_link(&port);
        assert_eq!(
            link.receive(Accept::response(0x03), Duration::from_millis(20)),
            Err(ProtocolError::Timeout { opcode: 0x03 })
        );
    }

    #[test]
    fn test_checksum_fault() {
        let port = MockPort::new();
        let mut link = open_link(&port);
        let mut raw = encode_response(0x03, 0, &[1, 2]).unwrap().to_vec();
        raw[5] ^= 0x01;
        port.push_incoming(&raw);
        assert!(matches!(
            link.receive(Accept::response(0x03), SHORT),
            Err(ProtocolError::ChecksumFault { .. })
        ));
    }

    #[test]
    fn test_boot_notice_is_device_reset() {
        let port = MockPort::new();
        let mut link = open_link(&port);
        port.push_incoming(&encode_response(0x04, 0, &[]).unwrap());
        assert_eq!(
            link.receive(Accept::response(0x97), SHORT),
            Err(ProtocolError::DeviceReset)
        );
    }

    #[test]
    fn test_streaming_opcode_while_idle_is_conflict() {
        let port = MockPort::new();
        let mut link = open_link(&port);
        port.push_incoming(&encode_response(0x22, 0, &[0x10, 0x01, 0x00, 0x00]).unwrap());
        assert_eq!(
            link.receive(Accept::response(0x63), SHORT),
            Err(ProtocolError::AutonomousModeConflict)
        );
    }

    #[test]
    fn test_unexpected_opcode() {
        let port = MockPort::new();
        let mut link = open_link(&port);
        port.push_incoming(&encode_response(0x2F, 0, &[0x00, 0x00, 0x01]).unwrap());
        assert_eq!(
            link.receive(Accept::response(0x22), SHORT),
            Err(ProtocolError::UnexpectedOpcode {
                expected: 0x22,
                received: 0x2F
            })
        );
    }

    #[test]
    fn test_foreign_opcode_skipped() {
        let port = MockPort::new();
        let mut link = open_link(&port);
        port.push_incoming(&encode_response(0x67, 0, &[0x01]).unwrap());
        port.push_incoming(&encode_response(0x63, 0, &[0x00, 0x05]).unwrap());
        let frame = link.receive(Accept::response(0x63), SHORT).unwrap();
        assert_eq!(frame.data(), &[0x00, 0x05]);
        assert!(link.discarded() >= 8);
    }

    #[test]
    fn test_stream_accepts_continuations() {
        let port = MockPort::new();
        let mut link = open_link(&port);
        port.push_incoming(&encode_response(0x2F, 0, &[0x00, 0x00, 0x02]).unwrap());
        let frame = link.receive(Accept::stream(None), SHORT).unwrap();
        assert_eq!(frame.opcode(), 0x2F);
    }

    #[test]
    fn test_poll_idle_returns_none() {
        let port = MockPort::new();
        let mut link = open_link(&port);
        assert_eq!(link.poll(Accept::stream(None), Duration::from_millis(5), SHORT), Ok(None));
    }

    #[test]
    fn test_poll_drops_stray_bytes_within_idle_window() {
        let port = MockPort::new();
        let mut link = open_link(&port);
        port.push_incoming(&[0x00]);
        let started = Instant::now();
        let polled = link.poll(Accept::stream(None), Duration::from_millis(5), Duration::from_secs(5));
        assert_eq!(polled, Ok(None));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(link.discarded(), 1);

        port.push_incoming(&encode_response(0x22, 0, &[0x10]).unwrap());
        let frame = link.poll(Accept::stream(None), SHORT, SHORT).unwrap().unwrap();
        assert_eq!(frame.opcode(), 0x22);
    }

    #[test]
    fn test_poll_keeps_partial_header() {
        let port = MockPort::new();
        let mut link = open_link(&port);
        let frame = encode_response(0x22, 0, &[0x10]).unwrap();
        port.push_incoming(&frame[..2]);
        let polled = link.poll(Accept::stream(None), Duration::from_millis(5), Duration::from_secs(5));
        assert_eq!(polled, Ok(None));
        assert_eq!(link.discarded(), 0);

        port.push_incoming(&frame[2..]);
        let received = link.poll(Accept::stream(None), SHORT, SHORT).unwrap().unwrap();
        assert_eq!(received.data(), &[0x10]);
    }

    #[test]
    fn test_closed_link_fails() {
        let port = MockPort::new();
        let mut link = open_link(&port);
        link.close().unwrap();
        assert!(matches!(
            link.receive(Accept::response(0x03), SHORT),
            Err(ProtocolError::Transport(_))
        ));
        assert!(!port.is_open());
    }

    #[test]
    fn test_trace_sees_both_directions() {
        use std::sync::{Arc, Mutex};
        let port = MockPort::new();
        let observers = Observers::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        observers.add_trace(Arc::new(move |dir, bytes: &[u8], _| {
            sink.lock().unwrap().push((dir, bytes[2]));
        }));
        let mut link = Link::new(port.clone(), observers);
        link.open().unwrap();
        port.respond(0x03, vec![encode_response(0x03, 0, &[]).unwrap()]);
        link.send(&crate::frame::encode(0x03, &[]).unwrap(), SHORT).unwrap();
        link.receive(Accept::response(0x03), SHORT).unwrap();
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[(FrameDirection::Tx, 0x03), (FrameDirection::Rx, 0x03)]
        );
    }

    #[test]
    fn test_drop_closes_port() {
        let port = MockPort::new();
        {
            let _link = open_link(&port);
            assert!(port.is_open());
        }
        assert!(!port.is_open());
    }
}
