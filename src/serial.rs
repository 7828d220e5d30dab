//! Serial port transport for desktop using serialport crate

use crate::error::UhfError;
use crate::transport::RfidTransport;
use log::info;
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

pub struct SerialTransport {
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl SerialTransport {
    /// Open `port_name` at `baud_rate`, 8N1, no flow control
    pub fn open(port_name: &str, baud_rate: u32, timeout: Duration) -> Result<Self, UhfError> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(timeout)
            .open()
            .map_err(|e| UhfError::Connection {
                port: port_name.to_string(),
                reason: e.to_string(),
            })?;
        port.clear(serialport::ClearBuffer::All)
            .map_err(|e| UhfError::Connection {
                port: port_name.to_string(),
                reason: e.to_string(),
            })?;

        info!("Opened {} at {} baud", port_name, baud_rate);
        Ok(Self { port: Some(port) })
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn port(&mut self) -> std::io::Result<&mut Box<dyn serialport::SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| std::io::Error::new(ErrorKind::NotConnected, "serial port closed"))
    }
}

impl RfidTransport for SerialTransport {
    type Error = std::io::Error;

    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error> {
        let port = self.port()?;
        let written = port.write(data)?;
        port.flush()?;
        Ok(written)
    }

    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, Self::Error> {
        let port = self.port()?;
        port.set_timeout(Duration::from_millis(timeout_ms as u64))
            .map_err(std::io::Error::other)?;
        match port.read(buf) {
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(0),
            other => other,
        }
    }

    fn clear_input(&mut self) -> Result<(), Self::Error> {
        self.port()?
            .clear(serialport::ClearBuffer::Input)
            .map_err(std::io::Error::other)
    }

    fn close(&mut self) -> Result<(), Self::Error> {
        if self.port.take().is_some() {
            info!("Closed serial port");
        }
        Ok(())
    }
}
