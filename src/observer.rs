//! Listener registration and notification.

use std::sync::{Arc, PoisonError, RwLock};

use log::warn;

use crate::error::ProtocolError;
use crate::types::{StatsReport, StatusReport, TagRecord};

/// Direction of a traced frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDirection {
    Tx,
    Rx,
}

pub type TraceListener = Arc<dyn Fn(FrameDirection, &[u8], u32) + Send + Sync>;
pub type ReadListener = Arc<dyn Fn(&TagRecord) + Send + Sync>;
pub type StatusListener = Arc<dyn Fn(&StatusReport) + Send + Sync>;
pub type StatsListener = Arc<dyn Fn(&StatsReport) + Send + Sync>;
pub type ExceptionListener = Arc<dyn Fn(&ProtocolError) + Send + Sync>;
/// Receives the partial identity of a tag asking for authentication and
/// returns the access password to send.
pub type AuthListener = Arc<dyn Fn(&TagRecord) -> u32 + Send + Sync>;

#[derive(Default)]
struct ObserverSet {
    trace: Vec<TraceListener>,
    read: Vec<ReadListener>,
    status: Vec<StatusListener>,
    stats: Vec<StatsListener>,
    exception: Vec<ExceptionListener>,
    auth: Option<AuthListener>,
}

/// Shared, cloneable registry. Notifications take a snapshot of the listener
/// list so callbacks never run under the registry lock.
#[derive(Clone, Default)]
pub struct Observers {
    inner: Arc<RwLock<ObserverSet>>,
}

impl Observers {
    fn read<R>(&self, f: impl FnOnce(&ObserverSet) -> R) -> R {
        f(&self.inner.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write(&self, f: impl FnOnce(&mut ObserverSet)) {
        f(&mut self.inner.write().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn add_trace(&self, listener: TraceListener) {
        self.write(|set| set.trace.push(listener));
    }

    pub fn add_read(&self, listener: ReadListener) {
        self.write(|set| set.read.push(listener));
    }

    pub fn add_status(&self, listener: StatusListener) {
        self.write(|set| set.status.push(listener));
    }

    pub fn add_stats(&self, listener: StatsListener) {
        self.write(|set| set.stats.push(listener));
    }

    pub fn add_exception(&self, listener: ExceptionListener) {
        self.write(|set| set.exception.push(listener));
    }

    pub fn set_auth(&self, listener: Option<AuthListener>) {
        self.write(|set| set.auth = listener);
    }

    pub fn clear(&self) {
        self.write(|set| *set = ObserverSet::default());
    }

    pub fn tracing(&self) -> bool {
        self.read(|set| !set.trace.is_empty())
    }

    pub fn has_status(&self) -> bool {
        self.read(|set| !set.status.is_empty())
    }

    pub fn has_stats(&self) -> bool {
        self.read(|set| !set.stats.is_empty())
    }

    pub fn trace(&self, direction: FrameDirection, bytes: &[u8], timeout_ms: u32) {
        for listener in self.read(|set| set.trace.clone()) {
            listener(direction, bytes, timeout_ms);
        }
    }

    pub fn tag(&self, record: &TagRecord) {
        for listener in self.read(|set| set.read.clone()) {
            listener(record);
        }
    }

    pub fn status(&self, report: &StatusReport) {
        for listener in self.read(|set| set.status.clone()) {
            listener(report);
        }
    }

    pub fn stats(&self, report: &StatsReport) {
        for listener in self.read(|set| set.stats.clone()) {
            listener(report);
        }
    }

    pub fn exception(&self, error: &ProtocolError) {
        let listeners = self.read(|set| set.exception.clone());
        if listeners.is_empty() {
            warn!("Unhandled reader fault: {}", error);
        }
        for listener in listeners {
            listener(error);
        }
    }

    /// Ask the registered listener for an access password.
    pub fn auth(&self, partial: &TagRecord) -> Option<u32> {
        self.read(|set| set.auth.clone()).map(|listener| listener(partial))
    }
}
