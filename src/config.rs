//! Reader configuration.

use std::time::Duration;

use crate::aggregate::UniquenessPolicy;
use crate::retry::RetryPolicy;

/// Default baud rate of the module.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Baud rates tried by `connect`, most likely first.
pub const DEFAULT_PROBE_BAUD_RATES: [u32; 8] =
    [115_200, 9_600, 921_600, 19_200, 38_400, 57_600, 230_400, 460_800];

#[derive(Debug, Clone, PartialEq)]
pub struct ReaderConfig {
    pub baud_rate: u32,
    pub probe_baud_rates: Vec<u32>,
    /// Time the module is given to execute a command.
    pub command_timeout: Duration,
    /// Guard time added on top of every command timeout for the link itself.
    pub transport_timeout: Duration,
    pub uniqueness: UniquenessPolicy,
    /// Search duration of one buffered cycle.
    pub async_on_time: Duration,
    /// Pause between buffered cycles.
    pub async_off_time: Duration,
    /// How long the background loop waits for a byte before checking for control requests.
    pub poll_interval: Duration,
    /// A streaming session without any frame for this long is considered dead.
    pub stream_watchdog: Duration,
    pub stop_retry: RetryPolicy,
    pub connect_retry: RetryPolicy,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            probe_baud_rates: DEFAULT_PROBE_BAUD_RATES.to_vec(),
            command_timeout: Duration::from_millis(1000),
            transport_timeout: Duration::from_millis(5000),
            uniqueness: UniquenessPolicy::default(),
            async_on_time: Duration::from_millis(250),
            async_off_time: Duration::ZERO,
            poll_interval: Duration::from_millis(50),
            stream_watchdog: Duration::from_secs(10),
            stop_retry: RetryPolicy::default(),
            connect_retry: RetryPolicy::once(),
        }
    }
}

impl ReaderConfig {
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_probe_baud_rates(mut self, rates: &[u32]) -> Self {
        self.probe_baud_rates = rates.to_vec();
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_transport_timeout(mut self, timeout: Duration) -> Self {
        self.transport_timeout = timeout;
        self
    }

    pub fn with_uniqueness(mut self, policy: UniquenessPolicy) -> Self {
        self.uniqueness = policy;
        self
    }

    pub fn with_async_times(mut self, on: Duration, off: Duration) -> Self {
        self.async_on_time = on;
        self.async_off_time = off;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_stream_watchdog(mut self, watchdog: Duration) -> Self {
        self.stream_watchdog = watchdog;
        self
    }

    pub fn with_stop_retry(mut self, policy: RetryPolicy) -> Self {
        self.stop_retry = policy;
        self
    }

    pub fn with_connect_retry(mut self, policy: RetryPolicy) -> Self {
        self.connect_retry = policy;
        self
    }

    /// Baud rates to probe, the configured one first and without repeats.
    pub(crate) fn baud_candidates(&self) -> Vec<u32> {
        let mut rates = vec![self.baud_rate];
        for &rate in &self.probe_baud_rates {
            if !rates.contains(&rate) {
                rates.push(rate);
            }
        }
        rates
    }

    /// Upper bound for receiving one response.
    pub(crate) fn response_budget(&self, timeout: Duration) -> Duration {
        timeout + self.transport_timeout
    }
}
