use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Result, ScopeError};

use super::{Transport, TransportKind};

/// Shared record of every command a [`LoopbackTransport`] was sent.
#[derive(Debug, Clone, Default)]
pub struct SentLog(Arc<Mutex<Vec<String>>>);

impl SentLog {
    pub fn commands(&self) -> Vec<String> {
        self.0.lock().map(|log| log.clone()).unwrap_or_default()
    }

    pub fn contains(&self, command: &str) -> bool {
        self.commands().iter().any(|c| c == command)
    }

    fn push(&self, command: &str) {
        if let Ok(mut log) = self.0.lock() {
            log.push(command.to_owned());
        }
    }
}

/// In-memory instrument for tests and offline work.
///
/// Replies are scripted per command. A command scripted several times answers with each
/// reply in turn and keeps repeating the last one. Queries (commands containing `?`)
/// without a script time out on `receive`, the way a real instrument stays silent.
///
/// ```
/// use tekscope::transport::{LoopbackTransport, Transport};
///
/// let mut link = LoopbackTransport::new().respond("*IDN?", "TEKTRONIX,MODEL,0,1.0");
/// assert_eq!(link.query("*IDN?").unwrap(), "TEKTRONIX,MODEL,0,1.0");
/// ```
#[derive(Debug)]
pub struct LoopbackTransport {
    replies: HashMap<String, VecDeque<Vec<u8>>>,
    pending: VecDeque<Option<Vec<u8>>>,
    sent: SentLog,
    open: bool,
    timeout: Duration,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self {
            replies: HashMap::new(),
            pending: VecDeque::new(),
            sent: SentLog::default(),
            open: true,
            timeout: Duration::from_secs(5),
        }
    }

    /// Script one more reply for `command`.
    pub fn respond<R: Into<Vec<u8>>>(mut self, command: &str, reply: R) -> Self {
        self.replies
            .entry(command.to_owned())
            .or_default()
            .push_back(reply.into());
        self
    }

    /// Handle on the commands sent so far; stays valid after the transport is boxed away.
    pub fn sent(&self) -> SentLog {
        self.sent.clone()
    }

    fn next_reply(&mut self, command: &str) -> Option<Vec<u8>> {
        let queue = self.replies.get_mut(command)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

impl Transport for LoopbackTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Loopback
    }

    fn address(&self) -> &str {
        "loopback"
    }

    fn send(&mut self, command: &str) -> Result<()> {
        if !self.open {
            return Err(ScopeError::NotConnected);
        }
        self.sent.push(command);
        if command.contains('?') {
            let reply = self.next_reply(command);
            self.pending.push_back(reply);
        }
        Ok(())
    }

    fn receive(&mut self) -> Result<Vec<u8>> {
        if !self.open {
            return Err(ScopeError::NotConnected);
        }
        match self.pending.pop_front() {
            Some(Some(reply)) => Ok(reply),
            _ => Err(ScopeError::Timeout(self.timeout)),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        self.pending.clear();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }
}
