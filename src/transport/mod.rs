//! Links to the instrument.
//!
//! Every link implements [`Transport`]: commands go out as ASCII text and responses come
//! back as raw bytes, either one newline-terminated line or one IEEE 488.2 definite-length
//! block. Interpreting the bytes is left to the command protocol.

use std::fmt;
use std::io::{self, BufRead, Read};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ScopeConfig;
use crate::error::{Result, ScopeError};

mod loopback;
mod network;
mod serial;
mod socket;

pub use loopback::{LoopbackTransport, SentLog};
pub use network::Vxi11Transport;
pub use serial::SerialTransport;
pub use socket::SocketTransport;

/// Which kind of link to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// VXI-11 over TCP, the `TCPIP::<host>::INSTR` resource.
    Network,
    /// Raw SCPI over a TCP socket server.
    Socket,
    /// RS-232 / USB serial port.
    Serial,
    /// Spreadsheet export from the scope's embedded web server. Not a SCPI link, see
    /// [`WebClient`](crate::devices::tektronix::web::WebClient).
    Http,
    /// In-memory scripted link, see [`LoopbackTransport`].
    Loopback,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportKind::Network => "network",
            TransportKind::Socket => "socket",
            TransportKind::Serial => "serial",
            TransportKind::Http => "http",
            TransportKind::Loopback => "loopback",
        };
        f.write_str(name)
    }
}

impl FromStr for TransportKind {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "network" | "vxi11" | "tcpip" => Ok(TransportKind::Network),
            "socket" => Ok(TransportKind::Socket),
            "serial" => Ok(TransportKind::Serial),
            "http" | "web" => Ok(TransportKind::Http),
            other => Err(ScopeError::Config(::config::ConfigError::Message(format!(
                "unknown transport {:?}, expected network, socket, serial or http",
                other
            )))),
        }
    }
}

/// A blocking, exclusively owned link to one instrument.
///
/// `close` must be idempotent. Any I/O after `close` fails with [`ScopeError::NotConnected`].
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    fn address(&self) -> &str;

    /// Write one command; the link appends whatever terminator it needs.
    fn send(&mut self, command: &str) -> Result<()>;

    /// Read one complete response.
    fn receive(&mut self) -> Result<Vec<u8>>;

    fn close(&mut self) -> Result<()>;

    fn is_open(&self) -> bool;

    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    fn query_raw(&mut self, command: &str) -> Result<Vec<u8>> {
        self.send(command)?;
        self.receive()
    }

    /// Send a query and return its reply as text without the trailing terminator.
    fn query(&mut self, command: &str) -> Result<String> {
        let raw = self.query_raw(command)?;
        let text = String::from_utf8(raw).map_err(|_| {
            ScopeError::protocol(format!("Reply to {} is not valid UTF-8", command))
        })?;
        Ok(text.trim_end().to_owned())
    }
}

/// Open the link described by `config`.
pub fn open(config: &ScopeConfig) -> Result<Box<dyn Transport>> {
    if config.address.trim().is_empty() {
        return Err(ScopeError::Connect {
            address: config.address.clone(),
            reason: "no instrument address configured".to_owned(),
        });
    }

    let transport: Box<dyn Transport> = match config.transport {
        TransportKind::Network => Box::new(Vxi11Transport::open(
            &config.address,
            config.connect_timeout(),
            config.timeout(),
        )?),
        TransportKind::Socket => Box::new(SocketTransport::open(
            &config.address,
            config.socket_port,
            config.connect_timeout(),
            config.timeout(),
        )?),
        TransportKind::Serial => Box::new(SerialTransport::open(
            &config.address,
            config.baud_rate,
            config.timeout(),
        )?),
        TransportKind::Loopback => {
            return Err(ScopeError::Connect {
                address: config.address.clone(),
                reason: "loopback links are scripted in code, not opened from configuration".to_owned(),
            })
        }
        TransportKind::Http => return Err(ScopeError::Unsupported("SCPI".to_owned())),
    };

    log::info!("Opened {} link to {}", transport.kind(), transport.address());
    Ok(transport)
}

/// Read one response from a byte stream: a definite-length block is read by its declared
/// length (the payload may contain newlines), anything else up to the next `\n`.
/// The returned bytes never include the terminator.
pub fn read_response<R: BufRead>(rdr: &mut R) -> Result<Vec<u8>> {
    let first = {
        let buf = rdr.fill_buf()?;
        match buf.first() {
            Some(b) => *b,
            None => return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "link closed by instrument").into()),
        }
    };

    if first != b'#' {
        let mut line = Vec::new();
        rdr.read_until(b'\n', &mut line)?;
        return Ok(trim_terminator(line));
    }

    let mut head = [0u8; 2];
    rdr.read_exact(&mut head)?;
    let digits = (head[1] as char)
        .to_digit(10)
        .ok_or_else(|| ScopeError::protocol(format!("Invalid block header digit {:?}", head[1] as char)))?
        as usize;

    let mut out = head.to_vec();
    if digits == 0 {
        // Indefinite-length block, terminated by the message terminator
        rdr.read_until(b'\n', &mut out)?;
        return Ok(trim_terminator(out));
    }

    let mut len_field = vec![0u8; digits];
    rdr.read_exact(&mut len_field)?;
    let len: usize = std::str::from_utf8(&len_field)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ScopeError::protocol(format!("Invalid block length {:?}", String::from_utf8_lossy(&len_field))))?;
    out.extend_from_slice(&len_field);

    // The declared length only bounds the read
    let start = out.len();
    (&mut *rdr).take(len as u64).read_to_end(&mut out)?;
    let got = out.len() - start;
    if got < len {
        return Err(ScopeError::protocol(format!("Block declares {} bytes but only {} arrived", len, got)));
    }

    // Swallow the terminator that follows the block
    let mut rest = Vec::new();
    rdr.read_until(b'\n', &mut rest)?;
    Ok(out)
}

/// Strip a trailing `\n` / `\r\n` from a text response; blocks are left alone since their
/// last payload byte can legitimately be a newline.
pub fn trim_terminator(mut data: Vec<u8>) -> Vec<u8> {
    if data.first() == Some(&b'#') && data.get(1).map_or(false, |d| *d != b'0') {
        return data;
    }
    while matches!(data.last(), Some(b'\n') | Some(b'\r')) {
        data.pop();
    }
    data
}

// Socket and serial reads surface an expired timeout as WouldBlock or TimedOut
pub(crate) fn map_timeout(err: ScopeError, timeout: Duration) -> ScopeError {
    match err {
        ScopeError::Io(ref e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
            ScopeError::Timeout(timeout)
        }
        other => other,
    }
}
