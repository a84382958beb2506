//! Serial port transport for desktop using serialport crate

use crate::transport::TransportPort;
use std::io::{self, Read, Write};
use std::time::Duration;

pub struct SerialTransport {
    port_name: String,
    baud_rate: u32,
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl SerialTransport {
    /// Describe a port; nothing is opened until [`TransportPort::open`].
    pub fn new(port_name: &str, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.to_string(),
            baud_rate,
            port: None,
        }
    }

    fn port(&mut self) -> io::Result<&mut Box<dyn serialport::SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port is closed"))
    }
}

impl TransportPort for SerialTransport {
    type Error = io::Error;

    fn open(&mut self) -> Result<(), Self::Error> {
        let port = serialport::new(&self.port_name, self.baud_rate)
            .timeout(Duration::from_secs(1))
            .open()
            .map_err(io::Error::other)?;
        port.clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::other)?;
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) -> Result<(), Self::Error> {
        self.port = None;
        Ok(())
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), Self::Error> {
        self.baud_rate = baud_rate;
        if let Some(port) = self.port.as_mut() {
            port.set_baud_rate(baud_rate).map_err(io::Error::other)?;
        }
        Ok(())
    }

    fn send_bytes(&mut self, data: &[u8], timeout_ms: u32) -> Result<(), Self::Error> {
        let port = self.port()?;
        port.set_timeout(Duration::from_millis(timeout_ms as u64))
            .map_err(io::Error::other)?;
        port.write_all(data)?;
        port.flush()
    }

    fn receive_bytes(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, Self::Error> {
        let port = self.port()?;
        port.set_timeout(Duration::from_millis(timeout_ms.max(1) as u64))
            .map_err(io::Error::other)?;
        match port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.port()?
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::other)
    }
}
