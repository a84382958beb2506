//! UART transport for ESP32 using esp-idf-svc

use crate::transport::TransportPort;
use esp_idf_svc::hal::gpio::{self, InputPin, OutputPin};
use esp_idf_svc::hal::peripheral::Peripheral;
use esp_idf_svc::hal::uart::{self, UartDriver};
use esp_idf_svc::sys::{EspError, ESP_ERR_INVALID_STATE};
use std::time::Duration;

pub struct UartTransport<'a> {
    uart: UartDriver<'a>,
    open: bool,
}

impl<'a> UartTransport<'a> {
    pub fn new(
        uart: impl Peripheral<P = impl uart::Uart> + 'a,
        tx: impl Peripheral<P = impl OutputPin> + 'a,
        rx: impl Peripheral<P = impl InputPin> + 'a,
        baud_rate: u32,
    ) -> Result<Self, EspError> {
        let config = uart::config::Config::default().baudrate(baud_rate.into());
        let uart = UartDriver::new(
            uart,
            tx,
            rx,
            Option::<gpio::Gpio0>::None,
            Option::<gpio::Gpio0>::None,
            &config,
        )?;

        Ok(Self { uart, open: false })
    }

    fn ensure_open(&self) -> Result<(), EspError> {
        if self.open {
            Ok(())
        } else {
            Err(EspError::from_infallible::<ESP_ERR_INVALID_STATE>())
        }
    }
}

impl TransportPort for UartTransport<'_> {
    type Error = EspError;

    fn open(&mut self) -> Result<(), Self::Error> {
        // module needs a moment after power-up before it answers
        std::thread::sleep(Duration::from_millis(500));
        self.uart.clear_rx()?;
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), Self::Error> {
        self.open = false;
        Ok(())
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), Self::Error> {
        self.uart.change_baudrate(baud_rate)?;
        Ok(())
    }

    fn send_bytes(&mut self, data: &[u8], _timeout_ms: u32) -> Result<(), Self::Error> {
        self.ensure_open()?;
        let mut written = 0;
        while written < data.len() {
            written += self.uart.write(&data[written..])?;
        }
        Ok(())
    }

    fn receive_bytes(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, Self::Error> {
        self.ensure_open()?;
        self.uart.read(buf, timeout_ms)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.ensure_open()?;
        self.uart.clear_rx()
    }
}
