//! Command/response transactions and the session state they share.
//!
//! Every command goes through [`Session::execute`]. Outside a continuous read
//! the caller's thread owns the link for the whole exchange; while one is
//! active the frame is handed to the background loop instead.

use bytes::Bytes;
use log::{debug, warn};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use crate::aggregate::TagRecordAggregator;
use crate::antenna::AntennaMap;
use crate::config::ReaderConfig;
use crate::continuous::{self, StreamSlot};
use crate::error::{ProtocolError, Result};
use crate::frame::{Frame, encode};
use crate::link::{Accept, Link};
use crate::observer::Observers;
use crate::protocol::{opcode, report_type, status};
use crate::report::{self, ParseContext};
use crate::retry::CancelToken;
use crate::tagop::Search;
use crate::transport::TransportPort;
use crate::types::{MetadataFlags, ModuleModel, TagProtocol, TagRecord, VersionInfo};

pub(crate) fn lock<G>(mutex: &Mutex<G>) -> MutexGuard<'_, G> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<G>(rw: &RwLock<G>) -> RwLockReadGuard<'_, G> {
    rw.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<G>(rw: &RwLock<G>) -> RwLockWriteGuard<'_, G> {
    rw.write().unwrap_or_else(PoisonError::into_inner)
}

/// Everything one connected reader owns. Lock order: `send_section`, then
/// `stream`, then `link`.
pub(crate) struct Session<T: TransportPort> {
    /// Receive section: the transport and its receive buffer.
    pub(crate) link: Mutex<Link<T>>,
    /// Send section: held for the whole of one command.
    pub(crate) send_section: Mutex<()>,
    pub(crate) stream: Mutex<StreamSlot>,
    pub(crate) observers: Observers,
    pub(crate) antennas: RwLock<AntennaMap>,
    pub(crate) version: RwLock<Option<VersionInfo>>,
    /// Metadata requested by the last search, used to decode buffer pages.
    pub(crate) metadata: Mutex<MetadataFlags>,
    pub(crate) config: ReaderConfig,
    pub(crate) cancel: CancelToken,
}

impl<T: TransportPort> Session<T> {
    pub(crate) fn new(port: T, config: ReaderConfig) -> Self {
        let observers = Observers::default();
        Self {
            link: Mutex::new(Link::new(port, observers.clone())),
            send_section: Mutex::new(()),
            stream: Mutex::new(StreamSlot::default()),
            observers,
            antennas: RwLock::new(AntennaMap::default()),
            version: RwLock::new(None),
            metadata: Mutex::new(MetadataFlags::DEFAULT),
            config,
            cancel: CancelToken::new(),
        }
    }

    pub(crate) fn model(&self) -> ModuleModel {
        read(&self.version)
            .as_ref()
            .map(VersionInfo::model)
            .unwrap_or_default()
    }

    /// Decode with the active antenna map. The map is only borrowed for the
    /// duration of `f`.
    pub(crate) fn parse<R>(&self, protocol: TagProtocol, f: impl FnOnce(&ParseContext) -> Result<R>) -> Result<R> {
        let antennas = read(&self.antennas);
        f(&ParseContext {
            antennas: &antennas,
            model: self.model(),
            protocol,
        })
    }

    /// Run one command and check its status.
    pub(crate) fn execute(&self, opcode: u8, payload: &[u8], timeout: Duration) -> Result<Frame> {
        let frame = encode(opcode, payload)?;
        let send = lock(&self.send_section);
        self.execute_held(&send, frame, timeout)
    }

    /// Like [`Session::execute`] for callers already holding the send section.
    pub(crate) fn execute_held(&self, _send: &MutexGuard<'_, ()>, frame: Bytes, timeout: Duration) -> Result<Frame> {
        let opcode = frame[2];
        let budget = self.config.response_budget(timeout);
        let control = lock(&self.stream).control();
        let response = match control {
            Some(control) => continuous::call(&control, frame, timeout, false, budget)?
                .ok_or(ProtocolError::SessionClosed)?,
            None => transact(&mut lock(&self.link), &frame, opcode, timeout, budget)?,
        };
        check_status(response)
    }
}

/// Exclusive exchange on an idle link.
pub(crate) fn transact<T: TransportPort>(
    link: &mut Link<T>,
    frame: &[u8],
    opcode: u8,
    timeout: Duration,
    budget: Duration,
) -> Result<Frame> {
    link.flush()?;
    link.send(frame, timeout)?;
    link.receive(Accept::response(opcode), budget)
}

/// Exchange on a link that may carry unsolicited reports. Frames that are not
/// the response are queued in `backlog` for later dispatch.
pub(crate) fn exchange<T: TransportPort>(
    link: &mut Link<T>,
    frame: &[u8],
    timeout: Duration,
    budget: Duration,
    backlog: &mut VecDeque<Frame>,
    is_response: impl Fn(&Frame) -> bool,
) -> Result<Frame> {
    let opcode = frame[2];
    link.send(frame, timeout)?;
    let deadline = Instant::now() + budget;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ProtocolError::Timeout { opcode });
        }
        let response = link.receive(Accept::stream(Some(opcode)), remaining)?;
        if response.opcode() == opcode && is_response(&response) {
            return Ok(response);
        }
        backlog.push_back(response);
    }
}

pub(crate) fn check_status(frame: Frame) -> Result<Frame> {
    match frame.status() {
        status::SUCCESS => Ok(frame),
        code => Err(ProtocolError::from_status(code, frame.data())),
    }
}

/// Page through the module tag buffer, then clear it.
pub(crate) fn drain_tag_buffer<T: TransportPort>(
    session: &Session<T>,
    link: &mut Link<T>,
    protocol: TagProtocol,
    backlog: &mut VecDeque<Frame>,
) -> Result<Vec<TagRecord>> {
    let timeout = session.config.command_timeout;
    let budget = session.config.response_budget(timeout);
    let metadata = *lock(&session.metadata);
    let mut payload = metadata.bits().to_be_bytes().to_vec();
    payload.push(0x00);
    let request = encode(opcode::GET_TAG_ID_BUFFER, &payload)?;

    let mut records = Vec::new();
    loop {
        let page = exchange(link, &request, timeout, budget, backlog, |_| true)?;
        if !matches!(page.status(), status::SUCCESS | status::TAG_ID_BUFFER_NOT_ENOUGH_TAGS) {
            return Err(ProtocolError::from_status(page.status(), page.data()));
        }
        match session.parse(protocol, |ctx| report::parse_buffer_page(&page, ctx))? {
            Some(page) => records.extend(page),
            None => break,
        }
    }

    let clear = encode(opcode::CLEAR_TAG_ID_BUFFER, &[])?;
    check_status(exchange(link, &clear, timeout, budget, backlog, |_| true)?)?;
    debug!("Drained {} tags from the module buffer", records.len());
    Ok(records)
}

/// One timed search on an idle link. Tags land in `aggregator`; the faults
/// that ended the search early are returned.
pub(crate) fn search_cycle<T: TransportPort>(
    session: &Session<T>,
    link: &mut Link<T>,
    search: &Search,
    protocol: TagProtocol,
    aggregator: &mut TagRecordAggregator,
) -> Vec<ProtocolError> {
    let mut faults = Vec::new();
    if let Err(e) = run_search(session, link, search, protocol, aggregator, &mut faults) {
        faults.push(e);
    }
    faults
}

fn run_search<T: TransportPort>(
    session: &Session<T>,
    link: &mut Link<T>,
    search: &Search,
    protocol: TagProtocol,
    aggregator: &mut TagRecordAggregator,
    faults: &mut Vec<ProtocolError>,
) -> Result<()> {
    let timeout = Duration::from_millis(u64::from(search.timeout_ms));
    let budget = session.config.response_budget(timeout);
    let mut backlog = VecDeque::new();

    transact_search(link, &search.command()?, timeout)?;
    // frames deferred while draining are handled before the link is read again
    let mut finished = false;
    loop {
        let frame = match backlog.pop_front() {
            Some(frame) => frame,
            None if finished => return Ok(()),
            None => link.receive(Accept::response(opcode::READ_TAG_ID_MULTIPLE), budget)?,
        };
        match check_status(frame) {
            Ok(frame) => match report::report_type(&frame) {
                Some(report_type::TAG) => {
                    match session.parse(protocol, |ctx| report::parse_tag_report(&frame, ctx)) {
                        Ok(record) => aggregator.insert(record),
                        Err(e) => {
                            warn!("Skipping undecodable tag report: {}", e);
                            faults.push(e);
                        }
                    }
                }
                Some(report_type::STATUS | report_type::STATS) => {}
                Some(report_type::SEARCH_DONE) => {
                    let buffered = report::parse_search_done(&frame)?;
                    debug!("Search done, {} tags left in the module buffer", buffered);
                    if buffered > 0 {
                        for record in drain_tag_buffer(session, link, protocol, &mut backlog)? {
                            aggregator.insert(record);
                        }
                    }
                    finished = true;
                }
                _ => {
                    for record in drain_tag_buffer(session, link, protocol, &mut backlog)? {
                        aggregator.insert(record);
                    }
                    finished = true;
                }
            },
            Err(e) if e.is_no_tags_found() => finished = true,
            Err(ProtocolError::BufferFull) => {
                warn!("Module tag buffer full, draining");
                for record in drain_tag_buffer(session, link, protocol, &mut backlog)? {
                    aggregator.insert(record);
                }
            }
            Err(e) => return Err(e),
        }
    }
}

fn transact_search<T: TransportPort>(link: &mut Link<T>, frame: &[u8], timeout: Duration) -> Result<()> {
    link.flush()?;
    link.send(frame, timeout)
}
