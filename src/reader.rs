//! The reader handle applications hold.

use bytes::Bytes;
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use crate::aggregate::TagRecordAggregator;
use crate::antenna::{AntennaMap, AntennaPortEntry, PortStatus};
use crate::config::ReaderConfig;
use crate::continuous::{self, ReadState};
use crate::error::{ProtocolError, Result};
use crate::frame::{Frame, encode};
use crate::link::{Link, millis};
use crate::observer::FrameDirection;
use crate::protocol::{ANTENNA_OPTION_DETECT, ANTENNA_OPTION_SEARCH_LIST, opcode, status};
use crate::report;
use crate::tagop::{Search, TagOp};
use crate::transaction::{Session, check_status, lock, read, search_cycle, transact, write};
use crate::transport::TransportPort;
use crate::types::{
    ModuleModel, ReadOutcome, ReadPlan, Region, StatsReport, StatusReport, TagProtocol, TagRecord,
    VersionInfo,
};

/// Protocol and search list last sent to the module, so repeated reads with
/// the same plan do not re-issue them.
#[derive(Debug, Default)]
struct Selection {
    protocol: Option<TagProtocol>,
    antennas: Option<Vec<(u8, u8)>>,
}

/// A serial-protocol RFID reader module behind a [`TransportPort`].
///
/// All methods take `&self`; the reader can be shared between threads behind
/// an `Arc`. Listeners run on the background read thread and must not call
/// back into the reader.
pub struct Reader<T: TransportPort + Send + 'static> {
    session: Arc<Session<T>>,
    /// Taken after the send section, before the link.
    selection: Mutex<Selection>,
}

impl<T: TransportPort + Send + 'static> Reader<T> {
    /// Create a reader. Nothing is sent until [`Reader::connect`].
    pub fn new(transport: T, config: ReaderConfig) -> Self {
        Self {
            session: Arc::new(Session::new(transport, config)),
            selection: Mutex::new(Selection::default()),
        }
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.session.config
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.session.link).is_open()
    }

    /// Open the transport, find the module's baud rate, switch it to the
    /// configured one and build the default antenna map from its ports.
    pub fn connect(&self) -> Result<VersionInfo> {
        let session = &self.session;
        let _send = lock(&session.send_section);
        if lock(&session.stream).state() != ReadState::Idle {
            return Err(ProtocolError::InvalidState(
                "cannot connect during a continuous read".into(),
            ));
        }
        session.cancel.reset();
        *lock(&self.selection) = Selection::default();

        let mut link = lock(&session.link);
        link.open()?;
        match self.handshake(&mut link) {
            Ok(version) => Ok(version),
            Err(e) => {
                error!("Connect failed: {}", e);
                if let Err(close) = link.close() {
                    warn!("Failed to close transport after connect error: {}", close);
                }
                Err(e)
            }
        }
    }

    fn handshake(&self, link: &mut Link<T>) -> Result<VersionInfo> {
        let session = &self.session;
        let config = &session.config;

        let mut last = ProtocolError::Timeout {
            opcode: opcode::VERSION,
        };
        let mut found = None;
        for rate in config.baud_candidates() {
            link.set_baud_rate(rate)?;
            match config
                .connect_retry
                .run(&session.cancel, |_| self.query(link, opcode::VERSION, &[]))
            {
                Ok(frame) => {
                    found = Some((rate, frame));
                    break;
                }
                Err(e) if e.is_retryable() => {
                    debug!("No answer at {} baud", rate);
                    last = e;
                }
                Err(e) => return Err(e),
            }
        }
        let Some((rate, frame)) = found else {
            return Err(last);
        };
        let version = report::parse_version(&frame)?;

        if rate != config.baud_rate {
            info!("Module answered at {} baud, switching to {}", rate, config.baud_rate);
            self.query(link, opcode::SET_BAUD_RATE, &config.baud_rate.to_be_bytes())?;
            link.set_baud_rate(config.baud_rate)?;
        }

        let ports = report::parse_antenna_ports(&self.query(
            link,
            opcode::GET_ANTENNA_PORT,
            &[ANTENNA_OPTION_DETECT],
        )?)?;
        let physical: Vec<u8> = ports.iter().map(|p| p.port).collect();
        *write(&session.antennas) = AntennaMap::build(&physical)?;
        *write(&session.version) = Some(version.clone());

        info!(
            "Connected to {:?} (firmware {}), {} antenna ports",
            version.model(),
            version.firmware(),
            physical.len()
        );
        Ok(version)
    }

    /// One command on a link the caller already owns.
    fn query(&self, link: &mut Link<T>, opcode: u8, payload: &[u8]) -> Result<Frame> {
        let config = &self.session.config;
        let frame = encode(opcode, payload)?;
        let timeout = config.command_timeout;
        check_status(transact(link, &frame, opcode, timeout, config.response_budget(timeout))?)
    }

    fn execute(&self, opcode: u8, payload: &[u8]) -> Result<Frame> {
        self.session
            .execute(opcode, payload, self.session.config.command_timeout)
    }

    /// Stop any continuous read and release the transport. Listeners stay
    /// registered; the reader can be connected again.
    pub fn close(&self) -> Result<()> {
        let closed = continuous::shutdown(&self.session);
        *lock(&self.selection) = Selection::default();
        info!("Reader closed");
        closed
    }

    // ===================
    // Module information and settings
    // ===================

    /// Query the module version and refresh the cached model.
    pub fn version(&self) -> Result<VersionInfo> {
        let version = report::parse_version(&self.execute(opcode::VERSION, &[])?)?;
        *write(&self.session.version) = Some(version.clone());
        Ok(version)
    }

    /// Model from the last version answer, `Unknown` before connecting.
    pub fn model(&self) -> ModuleModel {
        self.session.model()
    }

    /// Switch module and host to a new baud rate. Not allowed during a
    /// continuous read.
    pub fn set_baud_rate(&self, baud_rate: u32) -> Result<()> {
        let session = &self.session;
        let send = lock(&session.send_section);
        self.require_idle("change the baud rate")?;
        let frame = encode(opcode::SET_BAUD_RATE, &baud_rate.to_be_bytes())?;
        session.execute_held(&send, frame, session.config.command_timeout)?;
        lock(&session.link).set_baud_rate(baud_rate)?;
        info!("Baud rate set to {}", baud_rate);
        Ok(())
    }

    pub fn region(&self) -> Result<Region> {
        let frame = self.execute(opcode::GET_REGION, &[])?;
        let code = frame
            .data()
            .first()
            .copied()
            .ok_or_else(|| ProtocolError::Malformed("empty region answer".into()))?;
        Region::try_from(code)
    }

    pub fn set_region(&self, region: Region) -> Result<()> {
        self.execute(opcode::SET_REGION, &[region as u8])?;
        debug!("Region set to {:?}", region);
        Ok(())
    }

    pub fn protocol(&self) -> Result<TagProtocol> {
        let frame = self.execute(opcode::GET_TAG_PROTOCOL, &[])?;
        match frame.data() {
            [_, code, ..] => Ok(TagProtocol::from(*code)),
            other => Err(ProtocolError::Malformed(format!(
                "protocol answer {:02X?}",
                other
            ))),
        }
    }

    pub fn set_protocol(&self, protocol: TagProtocol) -> Result<()> {
        self.execute(opcode::SET_TAG_PROTOCOL, &[0x00, protocol.code()])?;
        lock(&self.selection).protocol = Some(protocol);
        Ok(())
    }

    // ===================
    // Antennas
    // ===================

    /// Ask the module which physical ports exist and which have an antenna.
    pub fn detect_antenna_ports(&self) -> Result<Vec<PortStatus>> {
        report::parse_antenna_ports(&self.execute(opcode::GET_ANTENNA_PORT, &[ANTENNA_OPTION_DETECT])?)
    }

    pub fn antenna_map(&self) -> AntennaMap {
        read(&self.session.antennas).clone()
    }

    /// Replace the logical antenna mapping. A rejected mapping leaves the
    /// current one in place; an accepted one is sent with the next read.
    pub fn set_antenna_map(&self, entries: &[AntennaPortEntry]) -> Result<()> {
        write(&self.session.antennas).set(entries)?;
        lock(&self.selection).antennas = None;
        debug!("Antenna map replaced with {} entries", entries.len());
        Ok(())
    }

    fn select(&self, send: &MutexGuard<'_, ()>, plan: &ReadPlan) -> Result<()> {
        let session = &self.session;
        let timeout = session.config.command_timeout;
        let mut selection = lock(&self.selection);

        if plan.protocol != TagProtocol::None && selection.protocol != Some(plan.protocol) {
            let frame = encode(opcode::SET_TAG_PROTOCOL, &[0x00, plan.protocol.code()])?;
            session.execute_held(send, frame, timeout)?;
            selection.protocol = Some(plan.protocol);
        }

        let pairs: Vec<(u8, u8)> = {
            let map = read(&session.antennas);
            if plan.antennas.is_empty() {
                map.entries().iter().map(|e| (e.tx, e.rx)).collect()
            } else {
                plan.antennas
                    .iter()
                    .map(|&logical| map.lookup(logical))
                    .collect::<Result<_>>()?
            }
        };
        if pairs.is_empty() {
            return Err(ProtocolError::InvalidParameter("no antennas to search".into()));
        }
        if selection.antennas.as_ref() != Some(&pairs) {
            let mut payload = vec![ANTENNA_OPTION_SEARCH_LIST];
            payload.extend(pairs.iter().flat_map(|&(tx, rx)| [tx, rx]));
            session.execute_held(send, encode(opcode::SET_ANTENNA_PORT, &payload)?, timeout)?;
            selection.antennas = Some(pairs);
        }
        Ok(())
    }

    fn require_idle(&self, what: &str) -> Result<()> {
        match lock(&self.session.stream).state() {
            ReadState::Idle => Ok(()),
            state => Err(ProtocolError::InvalidState(format!(
                "cannot {} while {:?}",
                what, state
            ))),
        }
    }

    // ===================
    // Reading
    // ===================

    /// Search for `timeout` and return the aggregated tags. Faults that ended
    /// the search early are returned with the tags read before them.
    pub fn read(&self, plan: &ReadPlan, timeout: Duration) -> Result<ReadOutcome> {
        let session = &self.session;
        let started_at = SystemTime::now();
        let send = lock(&session.send_section);
        self.require_idle("run a timed read")?;
        self.select(&send, plan)?;

        *lock(&session.metadata) = plan.metadata;
        let search = Search {
            timeout_ms: millis(timeout).min(u32::from(u16::MAX)) as u16,
            metadata: plan.metadata,
            streaming: true,
            report: None,
            tag_op: plan.tag_op.as_ref(),
        };
        let mut aggregator = TagRecordAggregator::new(session.config.uniqueness);
        let faults = search_cycle(
            session,
            &mut lock(&session.link),
            &search,
            plan.protocol,
            &mut aggregator,
        );
        drop(send);

        let tags = aggregator.drain();
        debug!("Read {} unique tags, {} faults", tags.len(), faults.len());
        Ok(ReadOutcome {
            tags,
            faults,
            started_at,
        })
    }

    /// Start reading in the background. Tags go to the read listeners until
    /// [`Reader::stop_reading`].
    pub fn start_reading(&self, plan: &ReadPlan) -> Result<()> {
        continuous::start(&self.session, plan, |send| self.select(send, plan))
    }

    /// Stop the background read. Does nothing when no read is active.
    pub fn stop_reading(&self) -> Result<()> {
        continuous::stop(&self.session)
    }

    pub fn read_state(&self) -> ReadState {
        lock(&self.session.stream).state()
    }

    /// Run a tag operation on its own and return the module's answer data.
    pub fn execute_tag_op(&self, op: &TagOp, timeout: Duration) -> Result<Bytes> {
        let session = &self.session;
        let frame = op.standalone_frame(millis(timeout).min(u32::from(u16::MAX)) as u16)?;
        let send = lock(&session.send_section);
        let response = session.execute_held(&send, frame, timeout)?;
        Ok(response.payload())
    }

    /// Page through the tags held in the module buffer without clearing it.
    pub fn get_tag_buffer(&self) -> Result<Vec<TagRecord>> {
        let session = &self.session;
        let protocol = lock(&self.selection).protocol.unwrap_or(TagProtocol::Gen2);
        let metadata = *lock(&session.metadata);
        let mut payload = metadata.bits().to_be_bytes().to_vec();
        payload.push(0x00);

        let mut records = Vec::new();
        loop {
            let page = match self.execute(opcode::GET_TAG_ID_BUFFER, &payload) {
                Ok(page) => page,
                Err(ProtocolError::ModuleFault {
                    code: status::TAG_ID_BUFFER_NOT_ENOUGH_TAGS,
                }) => break,
                Err(e) => return Err(e),
            };
            match session.parse(protocol, |ctx| report::parse_buffer_page(&page, ctx))? {
                Some(page) => records.extend(page),
                None => break,
            }
        }
        Ok(records)
    }

    pub fn clear_tag_buffer(&self) -> Result<()> {
        self.execute(opcode::CLEAR_TAG_ID_BUFFER, &[])?;
        Ok(())
    }

    // ===================
    // Listeners
    // ===================

    /// Observe every frame written to and read from the module.
    pub fn add_trace_listener(&self, listener: impl Fn(FrameDirection, &[u8], u32) + Send + Sync + 'static) {
        self.session.observers.add_trace(Arc::new(listener));
    }

    pub fn add_read_listener(&self, listener: impl Fn(&TagRecord) + Send + Sync + 'static) {
        self.session.observers.add_read(Arc::new(listener));
    }

    pub fn add_status_listener(&self, listener: impl Fn(&StatusReport) + Send + Sync + 'static) {
        self.session.observers.add_status(Arc::new(listener));
    }

    pub fn add_stats_listener(&self, listener: impl Fn(&StatsReport) + Send + Sync + 'static) {
        self.session.observers.add_stats(Arc::new(listener));
    }

    /// Faults seen during a continuous read, including the one that ended it.
    pub fn add_exception_listener(&self, listener: impl Fn(&ProtocolError) + Send + Sync + 'static) {
        self.session.observers.add_exception(Arc::new(listener));
    }

    /// Supply access passwords for tags that ask for authentication.
    pub fn set_auth_listener(&self, listener: impl Fn(&TagRecord) -> u32 + Send + Sync + 'static) {
        self.session.observers.set_auth(Some(Arc::new(listener)));
    }

    pub fn clear_auth_listener(&self) {
        self.session.observers.set_auth(None);
    }

    pub fn clear_listeners(&self) {
        self.session.observers.clear();
    }
}

impl<T: TransportPort + Send + 'static> Drop for Reader<T> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Error closing reader: {}", e);
        }
    }
}
