use std::io::{BufReader, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use crate::error::{Result, ScopeError};
use crate::rpc::tcp_clients::connect_stream;

use super::{map_timeout, read_response, Transport, TransportKind};

/// Raw SCPI over TCP, e.g. the socket server of a Tektronix scope (port 4000 by default).
pub struct SocketTransport {
    address: String,
    stream: Option<BufReader<TcpStream>>,
    timeout: Duration,
}

impl SocketTransport {
    pub fn open(host: &str, port: u16, connect_timeout: Duration, timeout: Duration) -> Result<Self> {
        let address = format!("{}:{}", host, port);
        let stream = connect_stream((host, port), connect_timeout).map_err(|e| ScopeError::Connect {
            address: address.clone(),
            reason: e.to_string(),
        })?;
        stream.set_nodelay(true)?;

        let mut transport = Self {
            address,
            stream: Some(BufReader::new(stream)),
            timeout,
        };
        transport.set_timeout(timeout)?;
        Ok(transport)
    }

    fn stream(&mut self) -> Result<&mut BufReader<TcpStream>> {
        self.stream.as_mut().ok_or(ScopeError::NotConnected)
    }
}

impl Transport for SocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn send(&mut self, command: &str) -> Result<()> {
        log::debug!("-> {}", command);
        let timeout = self.timeout;
        let stream = self.stream()?.get_mut();
        stream
            .write_all(format!("{}\n", command).as_bytes())
            .and_then(|_| stream.flush())
            .map_err(|e| map_timeout(e.into(), timeout))
    }

    fn receive(&mut self) -> Result<Vec<u8>> {
        let timeout = self.timeout;
        let data = read_response(self.stream()?).map_err(|e| map_timeout(e, timeout))?;
        log::debug!("<- {} bytes", data.len());
        Ok(data)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            log::info!("Closing socket link to {}", self.address);
            // The peer may already have dropped the connection; either way it is gone now
            let _ = stream.get_ref().shutdown(Shutdown::Both);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        let stream = self.stream()?.get_ref();
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        Ok(())
    }
}
