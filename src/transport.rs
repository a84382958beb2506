/// Trait for reader module communication backends.
/// Implement this trait for different transports (UART, USB-CDC, Bluetooth SPP, etc.)
///
/// Implementations own an underlying handle between `open` and `close` and
/// must release it on `close`, also when called after an error.
pub trait TransportPort {
    /// Error type for transport operations
    type Error: std::fmt::Debug;

    /// Acquire the underlying handle
    fn open(&mut self) -> Result<(), Self::Error>;

    /// Release the underlying handle. Pending and later reads must fail.
    fn close(&mut self) -> Result<(), Self::Error>;

    /// Change the host side baud rate
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), Self::Error>;

    /// Write all of `data` within `timeout_ms`
    fn send_bytes(&mut self, data: &[u8], timeout_ms: u32) -> Result<(), Self::Error>;

    /// Read up to `buf.len()` bytes, waiting at most `timeout_ms`.
    /// Returns 0 when nothing arrived in time.
    fn receive_bytes(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, Self::Error>;

    /// Discard any pending input
    fn flush(&mut self) -> Result<(), Self::Error>;
}
