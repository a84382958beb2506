//! Continuous reading on a background thread.
//!
//! While a continuous read is active the worker thread owns the link. Other
//! callers hand their command frames to it through a rendezvous channel; the
//! worker writes the frame between two polls, picks the response out of the
//! report stream by opcode and sends it back on a one-shot reply channel.

use bytes::Bytes;
use log::{debug, error, info, trace, warn};
use std::collections::VecDeque;
use std::sync::{Arc, MutexGuard};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, TryRecvError, sync_channel};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::aggregate::TagRecordAggregator;
use crate::error::{ProtocolError, Result};
use crate::frame::{Frame, encode};
use crate::link::{Accept, millis};
use crate::protocol::{opcode, report_type, status, stream_option};
use crate::report;
use crate::retry::CancelToken;
use crate::tagop::{ReportKind, Search, TagOp};
use crate::transaction::{Session, check_status, drain_tag_buffer, exchange, lock, search_cycle, transact};
use crate::transport::TransportPort;
use crate::types::{MetadataFlags, ReadMode, ReadPlan, TagProtocol};

/// How the module is kept reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Timed searches driven by the host, buffer drained after each.
    Buffered,
    /// The module pushes reports on its own until stopped.
    TrueStreaming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadState {
    #[default]
    Idle,
    Starting,
    Streaming(StreamMode),
    Stopping,
}

/// Continuous-read bookkeeping owned by the session.
#[derive(Default)]
pub(crate) struct StreamSlot {
    state: ReadState,
    control: Option<SyncSender<ControlRequest>>,
    worker: Option<JoinHandle<()>>,
    abort: CancelToken,
}

impl StreamSlot {
    pub(crate) fn state(&self) -> ReadState {
        self.state
    }

    /// Control channel, present only while the worker owns the link.
    pub(crate) fn control(&self) -> Option<SyncSender<ControlRequest>> {
        match self.state {
            ReadState::Streaming(_) | ReadState::Stopping => self.control.clone(),
            ReadState::Idle | ReadState::Starting => None,
        }
    }
}

type Reply = Result<Option<Frame>>;

/// A command handed to the worker.
pub(crate) struct ControlRequest {
    frame: Bytes,
    timeout: Duration,
    stop: bool,
    reply: SyncSender<Reply>,
}

impl ControlRequest {
    fn opcode(&self) -> u8 {
        self.frame.get(2).copied().unwrap_or(opcode::MULTI_PROTOCOL_TAG_OP)
    }

    fn answer(self, reply: Reply) {
        // the caller may have given up waiting
        let _ = self.reply.try_send(reply);
    }
}

/// Hand a frame to the worker and wait for its response. `Ok(None)` means the
/// worker handled the request without module traffic.
pub(crate) fn call(
    control: &SyncSender<ControlRequest>,
    frame: Bytes,
    timeout: Duration,
    stop: bool,
    budget: Duration,
) -> Reply {
    let (reply, response) = sync_channel(1);
    let opcode = frame.get(2).copied().unwrap_or(opcode::MULTI_PROTOCOL_TAG_OP);
    control
        .send(ControlRequest {
            frame,
            timeout,
            stop,
            reply,
        })
        .map_err(|_| ProtocolError::SessionClosed)?;
    match response.recv_timeout(budget) {
        Ok(reply) => reply,
        Err(RecvTimeoutError::Timeout) => Err(ProtocolError::Timeout { opcode }),
        Err(RecvTimeoutError::Disconnected) => Err(ProtocolError::SessionClosed),
    }
}

/// What the worker needs to know about the plan it runs.
struct StreamPlan {
    mode: StreamMode,
    protocol: TagProtocol,
    metadata: MetadataFlags,
    report: Option<ReportKind>,
    tag_op: Option<TagOp>,
    on_time: Duration,
}

impl StreamPlan {
    fn search(&self) -> Search<'_> {
        Search {
            timeout_ms: millis(self.on_time).min(u32::from(u16::MAX)) as u16,
            metadata: self.metadata,
            streaming: self.mode == StreamMode::TrueStreaming,
            report: self.report,
            tag_op: self.tag_op.as_ref(),
        }
    }
}

/// Start a continuous read. `select` issues the antenna and protocol selection
/// on the idle link before the search is started.
pub(crate) fn start<T>(
    session: &Arc<Session<T>>,
    plan: &ReadPlan,
    select: impl FnOnce(&MutexGuard<'_, ()>) -> Result<()>,
) -> Result<()>
where
    T: TransportPort + Send + 'static,
{
    let observers = &session.observers;
    if observers.has_status() && observers.has_stats() {
        return Err(ProtocolError::Config(
            "status and stats listeners cannot be registered at the same time".into(),
        ));
    }
    let report = match plan.report {
        flags if flags.is_empty() => None,
        flags if observers.has_stats() => Some(ReportKind::Stats(flags)),
        flags if observers.has_status() => Some(ReportKind::Status(flags)),
        _ => None,
    };

    let send = lock(&session.send_section);
    let abort = {
        let mut slot = lock(&session.stream);
        if slot.state != ReadState::Idle {
            return Err(ProtocolError::InvalidState(format!(
                "continuous read already active ({:?})",
                slot.state
            )));
        }
        if let Some(worker) = slot.worker.take() {
            reap(worker);
        }
        slot.state = ReadState::Starting;
        slot.abort = CancelToken::new();
        slot.abort.clone()
    };

    let result = select(&send).and_then(|()| launch(session, plan, report, abort));
    if result.is_err() {
        let mut slot = lock(&session.stream);
        slot.state = ReadState::Idle;
        slot.control = None;
    }
    drop(send);
    result
}

fn launch<T>(session: &Arc<Session<T>>, plan: &ReadPlan, report: Option<ReportKind>, abort: CancelToken) -> Result<()>
where
    T: TransportPort + Send + 'static,
{
    let config = &session.config;
    *lock(&session.metadata) = plan.metadata;
    let mode = match plan.mode {
        ReadMode::Buffered => StreamMode::Buffered,
        ReadMode::Streaming => StreamMode::TrueStreaming,
    };
    let plan = StreamPlan {
        mode,
        protocol: plan.protocol,
        metadata: plan.metadata,
        report,
        tag_op: plan.tag_op.clone(),
        on_time: config.async_on_time,
    };

    match mode {
        // validated up front so a bad embedded op fails the start call
        StreamMode::Buffered => drop(plan.search().command()?),
        StreamMode::TrueStreaming => {
            let start = plan.search().start_command()?;
            let timeout = config.command_timeout;
            let ack = check_status(transact(
                &mut lock(&session.link),
                &start,
                opcode::MULTI_PROTOCOL_TAG_OP,
                timeout,
                config.response_budget(timeout),
            )?)?;
            if ack.data().get(2) != Some(&stream_option::START) {
                return Err(ProtocolError::Malformed(format!(
                    "start acknowledgement carries {:02X?}",
                    ack.data()
                )));
            }
        }
    }

    let (control, requests) = sync_channel(0);
    {
        let mut slot = lock(&session.stream);
        slot.state = ReadState::Streaming(mode);
        slot.control = Some(control);
    }
    info!("Continuous read started ({:?})", mode);

    let worker_session = Arc::clone(session);
    let worker = std::thread::Builder::new()
        .name("rfid-stream".into())
        .spawn(move || {
            Worker {
                session: &worker_session,
                requests,
                plan,
                abort,
                pending: None,
                backlog: VecDeque::new(),
            }
            .run()
        })
        .map_err(|e| ProtocolError::Transport(format!("failed to spawn read thread: {:?}", e)))?;
    lock(&session.stream).worker = Some(worker);
    Ok(())
}

/// Stop the continuous read and wait for the worker to finish. A no-op when idle.
pub(crate) fn stop<T: TransportPort>(session: &Session<T>) -> Result<()> {
    let _send = lock(&session.send_section);
    let (control, mode, abort) = {
        let mut slot = lock(&session.stream);
        let state = slot.state;
        let mode = match state {
            ReadState::Idle => {
                debug!("Stop requested while idle");
                drop(slot);
                join_worker(session);
                return Ok(());
            }
            ReadState::Streaming(mode) => mode,
            state => {
                return Err(ProtocolError::InvalidState(format!("cannot stop while {:?}", state)));
            }
        };
        slot.state = ReadState::Stopping;
        (slot.control.clone(), mode, slot.abort.clone())
    };
    let Some(control) = control else {
        join_worker(session);
        return Ok(());
    };

    let timeout = session.config.command_timeout;
    let budget = session.config.response_budget(timeout);
    let result = match mode {
        StreamMode::Buffered => call(&control, Bytes::new(), timeout, true, budget).map(drop),
        StreamMode::TrueStreaming => {
            let frame = encode(opcode::MULTI_PROTOCOL_TAG_OP, &[0x00, 0x00, stream_option::STOP])?;
            session.config.stop_retry.run(&session.cancel, |attempt| {
                if attempt > 0 {
                    warn!("Stop not acknowledged, re-sending (attempt {})", attempt + 1);
                }
                call(&control, frame.clone(), timeout, true, budget).map(drop)
            })
        }
    };

    let result = match result {
        Err(ProtocolError::SessionClosed) => {
            debug!("Read loop ended before the stop was acknowledged");
            Ok(())
        }
        Err(e) => {
            error!("Stop failed ({}), abandoning the read loop", e);
            abort.cancel();
            Err(e)
        }
        ok => ok,
    };
    join_worker(session);
    info!("Continuous read stopped");
    result
}

/// Tear down without a stop handshake: the worker notices the cancel token
/// or fails on the closed transport.
pub(crate) fn shutdown<T: TransportPort>(session: &Session<T>) -> Result<()> {
    session.cancel.cancel();
    let closed = lock(&session.link).close();
    join_worker(session);
    closed
}

fn join_worker<T: TransportPort>(session: &Session<T>) {
    let worker = lock(&session.stream).worker.take();
    if let Some(worker) = worker {
        if !reap(worker) {
            let mut slot = lock(&session.stream);
            slot.state = ReadState::Idle;
            slot.control = None;
        }
    }
}

/// Join a finished worker. `false` when it panicked.
fn reap(worker: JoinHandle<()>) -> bool {
    match worker.join() {
        Ok(()) => true,
        Err(_) => {
            error!("Read thread panicked");
            false
        }
    }
}

/// Why a worker loop ended.
enum Exit {
    Stopped,
    Cancelled,
    Fault(ProtocolError),
}

enum Flow {
    Continue,
    Exit(Exit),
}

struct Pending {
    request: ControlRequest,
    deadline: Instant,
}

fn stop_ack(frame: &Frame) -> Option<bool> {
    if frame.opcode() != opcode::MULTI_PROTOCOL_TAG_OP || frame.status() != status::SUCCESS {
        return None;
    }
    match frame.data() {
        [] => Some(false),
        [_, _, stream_option::STOP, rest @ ..] => Some(rest.first() == Some(&stream_option::STOP_DRAINING)),
        _ => None,
    }
}

fn is_auth_ack(frame: &Frame) -> bool {
    frame.data().get(2) == Some(&stream_option::AUTH_RESPONSE)
}

struct Worker<'a, T: TransportPort> {
    session: &'a Session<T>,
    requests: Receiver<ControlRequest>,
    plan: StreamPlan,
    abort: CancelToken,
    pending: Option<Pending>,
    /// Frames that arrived during a nested exchange, dispatched next.
    backlog: VecDeque<Frame>,
}

impl<T: TransportPort> Worker<'_, T> {
    fn run(mut self) {
        let exit = match self.plan.mode {
            StreamMode::TrueStreaming => self.run_streaming(),
            StreamMode::Buffered => self.run_buffered(),
        };
        let reason = match &exit {
            Exit::Stopped => {
                debug!("Read loop finished");
                ProtocolError::SessionClosed
            }
            Exit::Cancelled => {
                debug!("Read loop cancelled");
                ProtocolError::Cancelled
            }
            Exit::Fault(e) => {
                error!("Continuous read terminated: {}", e);
                self.session.observers.exception(e);
                e.clone()
            }
        };
        if let Some(pending) = self.pending.take() {
            pending.request.answer(Err(reason));
        }

        let mut slot = lock(&self.session.stream);
        slot.state = ReadState::Idle;
        slot.control = None;
    }

    fn cancelled(&self) -> bool {
        self.session.cancel.is_cancelled() || self.abort.is_cancelled()
    }

    fn run_streaming(&mut self) -> Exit {
        let session = self.session;
        let config = &session.config;
        let mut last_frame = Instant::now();
        loop {
            if self.cancelled() {
                return Exit::Cancelled;
            }
            if let Err(e) = self.take_control() {
                return Exit::Fault(e);
            }
            self.expire_control();

            let frame = match self.backlog.pop_front() {
                Some(frame) => frame,
                None => {
                    let accept = Accept::stream(self.pending.as_ref().map(|p| p.request.opcode()));
                    let polled = lock(&session.link).poll(accept, config.poll_interval, config.transport_timeout);
                    match polled {
                        Ok(Some(frame)) => {
                            last_frame = Instant::now();
                            frame
                        }
                        Ok(None) => {
                            if last_frame.elapsed() >= config.stream_watchdog {
                                return Exit::Fault(ProtocolError::Timeout {
                                    opcode: opcode::READ_TAG_ID_MULTIPLE,
                                });
                            }
                            continue;
                        }
                        Err(_) if self.cancelled() => return Exit::Cancelled,
                        Err(e @ ProtocolError::ChecksumFault { .. }) => {
                            session.observers.exception(&e);
                            continue;
                        }
                        Err(e) => return Exit::Fault(e),
                    }
                }
            };

            let is_control_response = self
                .pending
                .as_ref()
                .is_some_and(|p| p.request.opcode() == frame.opcode());
            let flow = if is_control_response {
                self.complete_control(frame)
            } else {
                self.dispatch(frame)
            };
            if let Flow::Exit(exit) = flow {
                return exit;
            }
        }
    }

    /// Pick up a waiting control request and write its frame.
    fn take_control(&mut self) -> Result<()> {
        if self.pending.is_some() {
            return Ok(());
        }
        let request = match self.requests.try_recv() {
            Ok(request) => request,
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => return Ok(()),
        };
        debug!("Injecting control frame {:02X?}", &request.frame[..]);
        let sent = lock(&self.session.link).send(&request.frame, request.timeout);
        match sent {
            Ok(()) => {
                self.pending = Some(Pending {
                    deadline: Instant::now() + request.timeout,
                    request,
                });
                Ok(())
            }
            Err(e) => {
                request.answer(Err(e.clone()));
                Err(e)
            }
        }
    }

    fn expire_control(&mut self) {
        if self.pending.as_ref().is_some_and(|p| Instant::now() >= p.deadline) {
            if let Some(pending) = self.pending.take() {
                let opcode = pending.request.opcode();
                warn!("Control command {:#04X} timed out", opcode);
                pending.request.answer(Err(ProtocolError::Timeout { opcode }));
            }
        }
    }

    fn complete_control(&mut self, frame: Frame) -> Flow {
        let Some(mut pending) = self.pending.take() else {
            return Flow::Continue;
        };
        if frame.status() != status::SUCCESS {
            let fault = ProtocolError::from_status(frame.status(), frame.data());
            pending.request.answer(Err(fault.clone()));
            return match fault {
                ProtocolError::ModuleAssertion { .. } => Flow::Exit(Exit::Fault(fault)),
                _ => Flow::Continue,
            };
        }
        if !pending.request.stop {
            pending.request.answer(Ok(Some(frame)));
            return Flow::Continue;
        }
        match stop_ack(&frame) {
            Some(true) => {
                debug!("Stop acknowledged, module still draining");
                pending.deadline = Instant::now() + pending.request.timeout;
                self.pending = Some(pending);
                Flow::Continue
            }
            Some(false) => {
                pending.request.answer(Ok(Some(frame)));
                Flow::Exit(Exit::Stopped)
            }
            None => {
                debug!("Ignoring {:02X?} while waiting for the stop acknowledgement", frame.data());
                self.pending = Some(pending);
                Flow::Continue
            }
        }
    }

    fn dispatch(&mut self, frame: Frame) -> Flow {
        if frame.status() != status::SUCCESS {
            return self.on_fault(ProtocolError::from_status(frame.status(), frame.data()));
        }
        match frame.opcode() {
            opcode::READ_TAG_ID_MULTIPLE => self.dispatch_report(&frame),
            opcode::MULTI_PROTOCOL_TAG_OP if stop_ack(&frame) == Some(false) => {
                info!("Module ended the continuous read on its own");
                Flow::Exit(Exit::Stopped)
            }
            other => {
                debug!("Ignoring unsolicited frame {:#04X}", other);
                Flow::Continue
            }
        }
    }

    fn dispatch_report(&mut self, frame: &Frame) -> Flow {
        let session = self.session;
        let observers = &session.observers;
        let protocol = self.plan.protocol;
        let parsed = match report::report_type(frame) {
            Some(report_type::TAG) => session
                .parse(protocol, |ctx| report::parse_tag_report(frame, ctx))
                .map(|record| observers.tag(&record)),
            Some(report_type::STATUS) => report::parse_status_report(frame).map(|r| observers.status(&r)),
            Some(report_type::STATS) => report::parse_stats_report(frame).map(|r| observers.stats(&r)),
            Some(report_type::AUTH_REQUEST) => return self.authenticate(frame),
            Some(report_type::SEARCH_DONE) => {
                trace!("Search cycle finished");
                Ok(())
            }
            other => {
                debug!("Unknown report type {:?}", other);
                Ok(())
            }
        };
        if let Err(e) = parsed {
            warn!("Dropping undecodable report: {}", e);
            observers.exception(&e);
        }
        Flow::Continue
    }

    fn on_fault(&mut self, fault: ProtocolError) -> Flow {
        match fault {
            ref e if e.is_no_tags_found() => {
                trace!("No tags in this cycle");
                Flow::Continue
            }
            ProtocolError::BufferFull => {
                warn!("Module tag buffer full, draining");
                self.drain();
                Flow::Continue
            }
            ProtocolError::ModuleAssertion { .. } => Flow::Exit(Exit::Fault(fault)),
            e => {
                self.session.observers.exception(&e);
                Flow::Continue
            }
        }
    }

    fn drain(&mut self) {
        let drained = drain_tag_buffer(
            self.session,
            &mut lock(&self.session.link),
            self.plan.protocol,
            &mut self.backlog,
        );
        match drained {
            Ok(records) => records.iter().for_each(|r| self.session.observers.tag(r)),
            Err(e) => self.session.observers.exception(&e),
        }
    }

    /// Answer an authentication request with the password from the listener.
    fn authenticate(&mut self, frame: &Frame) -> Flow {
        let session = self.session;
        let observers = &session.observers;
        let partial = match session.parse(self.plan.protocol, |ctx| report::parse_tag_report(frame, ctx))
        {
            Ok(partial) => partial,
            Err(e) => {
                observers.exception(&e);
                return Flow::Continue;
            }
        };
        let password = observers.auth(&partial).unwrap_or_else(|| {
            warn!("Tag {} asked for authentication, no listener registered", partial.epc_hex());
            0
        });

        let mut payload = vec![0x00, 0x00, stream_option::AUTH_RESPONSE];
        payload.extend_from_slice(&password.to_be_bytes());
        let config = &session.config;
        let timeout = config.command_timeout;
        let acked = encode(opcode::MULTI_PROTOCOL_TAG_OP, &payload).and_then(|command| {
            exchange(
                &mut lock(&session.link),
                &command,
                timeout,
                config.response_budget(timeout),
                &mut self.backlog,
                is_auth_ack,
            )
        });
        match acked.and_then(check_status) {
            Ok(_) => {
                debug!("Authenticated tag {}", partial.epc_hex());
                Flow::Continue
            }
            Err(e) if e.is_fatal() => Flow::Exit(Exit::Fault(e)),
            Err(e) => {
                observers.exception(&e);
                Flow::Continue
            }
        }
    }

    fn run_buffered(&mut self) -> Exit {
        let session = self.session;
        let config = &session.config;
        loop {
            if self.cancelled() {
                return Exit::Cancelled;
            }

            let mut aggregator = TagRecordAggregator::new(config.uniqueness);
            let faults = search_cycle(
                session,
                &mut lock(&session.link),
                &self.plan.search(),
                self.plan.protocol,
                &mut aggregator,
            );
            for record in aggregator.drain() {
                session.observers.tag(&record);
            }
            for fault in faults {
                if self.cancelled() {
                    return Exit::Cancelled;
                }
                if fault.is_fatal() {
                    return Exit::Fault(fault);
                }
                session.observers.exception(&fault);
            }

            match self.requests.recv_timeout(config.async_off_time) {
                Ok(request) if request.stop => {
                    request.answer(Ok(None));
                    return Exit::Stopped;
                }
                Ok(request) => {
                    let response = {
                        let opcode = request.opcode();
                        let budget = config.response_budget(request.timeout);
                        transact(&mut lock(&session.link), &request.frame, opcode, request.timeout, budget)
                    };
                    request.answer(response.map(Some));
                }
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock;

    fn frame(raw: Bytes) -> Frame {
        Frame::parse(&raw).unwrap()
    }

    #[test]
    fn test_stop_ack_draining_and_terminal() {
        assert_eq!(stop_ack(&frame(mock::stop_ack(true))), Some(true));
        assert_eq!(stop_ack(&frame(mock::stop_ack(false))), Some(false));
        assert_eq!(stop_ack(&frame(mock::ok(0x2F, &[]))), Some(false));
        assert_eq!(stop_ack(&frame(mock::start_ack())), None);
        assert_eq!(stop_ack(&frame(mock::auth_ack())), None);
        assert_eq!(stop_ack(&frame(mock::ok(0x22, &[0x00, 0x00, 0x02]))), None);
    }

    #[test]
    fn test_auth_ack() {
        assert!(is_auth_ack(&frame(mock::auth_ack())));
        assert!(!is_auth_ack(&frame(mock::stop_ack(false))));
    }

    #[test]
    fn test_control_only_while_worker_owns_link() {
        let (control, _requests) = sync_channel(0);
        let mut slot = StreamSlot {
            control: Some(control),
            ..Default::default()
        };
        assert!(slot.control().is_none());
        slot.state = ReadState::Starting;
        assert!(slot.control().is_none());
        slot.state = ReadState::Streaming(StreamMode::Buffered);
        assert!(slot.control().is_some());
        slot.state = ReadState::Stopping;
        assert!(slot.control().is_some());
    }

    #[test]
    fn test_call_without_worker() {
        let (control, requests) = sync_channel(0);
        drop(requests);
        let result = call(
            &control,
            Bytes::from_static(&[0xFF, 0x00, 0x03, 0x1D, 0x0C]),
            Duration::from_millis(10),
            false,
            Duration::from_millis(10),
        );
        assert_eq!(result, Err(ProtocolError::SessionClosed));
    }

    #[test]
    fn test_call_times_out_when_unanswered() {
        let (control, requests) = sync_channel::<ControlRequest>(0);
        let worker = std::thread::spawn(move || {
            // take the request and sit on it
            let request = requests.recv().unwrap();
            std::thread::sleep(Duration::from_millis(50));
            drop(request);
        });
        let result = call(
            &control,
            Bytes::from_static(&[0xFF, 0x00, 0x03, 0x1D, 0x0C]),
            Duration::from_millis(10),
            false,
            Duration::from_millis(10),
        );
        assert_eq!(result, Err(ProtocolError::Timeout { opcode: 0x03 }));
        worker.join().unwrap();
    }

    #[test]
    fn test_start_reaps_panicked_worker() {
        let session = Arc::new(Session::new(mock::module(1), crate::config::ReaderConfig::default()));
        let panicked: JoinHandle<()> = std::thread::spawn(|| panic!("read loop failed"));
        lock(&session.stream).worker = Some(panicked);

        let plan = ReadPlan::new(TagProtocol::Gen2, &[]);
        let result = start(&session, &plan, |_| Err(ProtocolError::InvalidParameter("no antennas".into())));
        assert_eq!(result, Err(ProtocolError::InvalidParameter("no antennas".into())));
        let slot = lock(&session.stream);
        assert!(slot.worker.is_none());
        assert_eq!(slot.state(), ReadState::Idle);
    }

    #[test]
    fn test_reap_reports_panic() {
        assert!(reap(std::thread::spawn(|| ())));
        let panicked: JoinHandle<()> = std::thread::spawn(|| panic!("read loop failed"));
        assert!(!reap(panicked));
    }
}
