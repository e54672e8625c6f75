use std::io::{BufReader, Write};
use std::time::Duration;

use serialport::SerialPort;

use crate::error::{Result, ScopeError};

use super::{map_timeout, read_response, Transport, TransportKind};

/// SCPI over a serial port, 8N1 with `\n` termination.
pub struct SerialTransport {
    path: String,
    baud_rate: u32,
    port: Option<BufReader<Box<dyn SerialPort>>>,
    timeout: Duration,
}

impl SerialTransport {
    pub fn open(path: &str, baud_rate: u32, timeout: Duration) -> Result<Self> {
        let port = serialport::new(path, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(timeout)
            .open()
            .map_err(|e| ScopeError::Connect {
                address: path.to_owned(),
                reason: e.to_string(),
            })?;

        log::debug!("Serial port {} opened at {} baud", path, baud_rate);

        Ok(Self {
            path: path.to_owned(),
            baud_rate,
            port: Some(BufReader::new(port)),
            timeout,
        })
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn port(&mut self) -> Result<&mut BufReader<Box<dyn SerialPort>>> {
        self.port.as_mut().ok_or(ScopeError::NotConnected)
    }
}

impl Transport for SerialTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn address(&self) -> &str {
        &self.path
    }

    fn send(&mut self, command: &str) -> Result<()> {
        log::debug!("-> {}", command);
        let timeout = self.timeout;
        let port = self.port()?.get_mut();
        port.write_all(format!("{}\n", command).as_bytes())
            .and_then(|_| port.flush())
            .map_err(|e| map_timeout(e.into(), timeout))
    }

    fn receive(&mut self) -> Result<Vec<u8>> {
        let timeout = self.timeout;
        let data = read_response(self.port()?).map_err(|e| map_timeout(e, timeout))?;
        log::debug!("<- {} bytes", data.len());
        Ok(data)
    }

    fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            log::info!("Closed serial port {}", self.path);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        self.port()?.get_mut().set_timeout(timeout)?;
        Ok(())
    }
}
