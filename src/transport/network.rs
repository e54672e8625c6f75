use std::time::Duration;

use crate::error::{Result, ScopeError};
use crate::rpc::port_mapping::PMAP_PORT;
use crate::vxi11::CoreClient;

use super::{trim_terminator, Transport, TransportKind};

// Logical device name every LAN-attached Tektronix scope answers to
const DEVICE_NAME: &str = "inst0";

fn terminated(command: &str) -> Vec<u8> {
    let mut data = Vec::with_capacity(command.len() + 1);
    data.extend_from_slice(command.as_bytes());
    data.push(b'\n');
    data
}

/// SCPI over a VXI-11 core channel.
pub struct Vxi11Transport {
    address: String,
    core: Option<CoreClient>,
}

impl Vxi11Transport {
    pub fn open(host: &str, connect_timeout: Duration, timeout: Duration) -> Result<Self> {
        Self::open_with_portmapper(host, PMAP_PORT, connect_timeout, timeout)
    }

    pub fn open_with_portmapper(host: &str, pmap_port: u16, connect_timeout: Duration, timeout: Duration) -> Result<Self> {
        let connect_err = |e: ScopeError| ScopeError::Connect {
            address: host.to_owned(),
            reason: e.to_string(),
        };

        let mut core = CoreClient::new(host, pmap_port, connect_timeout).map_err(connect_err)?;
        core.set_timeout(timeout)?;
        core.create_link(DEVICE_NAME).map_err(connect_err)?;

        if let Some(link) = core.link() {
            log::debug!("VXI-11 link {} to {} (max write {} bytes)", link.link_id, host, link.max_recv_size);
        }

        Ok(Self {
            address: host.to_owned(),
            core: Some(core),
        })
    }

    fn core(&mut self) -> Result<&mut CoreClient> {
        self.core.as_mut().ok_or(ScopeError::NotConnected)
    }
}

impl Transport for Vxi11Transport {
    fn kind(&self) -> TransportKind {
        TransportKind::Network
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn send(&mut self, command: &str) -> Result<()> {
        log::debug!("-> {}", command);
        self.core()?.write(&terminated(command))
    }

    fn receive(&mut self) -> Result<Vec<u8>> {
        let data = self.core()?.read()?;
        log::debug!("<- {} bytes", data.len());
        Ok(trim_terminator(data))
    }

    // One write and the reads that answer it, without going through send/receive twice
    fn query_raw(&mut self, command: &str) -> Result<Vec<u8>> {
        log::debug!("-> {}", command);
        let data = self.core()?.ask(&terminated(command))?;
        log::debug!("<- {} bytes", data.len());
        Ok(trim_terminator(data))
    }

    fn close(&mut self) -> Result<()> {
        match self.core.take() {
            Some(mut core) => {
                log::info!("Closing network link to {}", self.address);
                core.destroy_link()
            }
            None => Ok(()),
        }
    }

    fn is_open(&self) -> bool {
        self.core.is_some()
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.core()?.set_timeout(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::tektronix::Oscilloscope;
    use crate::vxi11::mock::MockInstrument;
    use crate::vxi11::OPERATION_FLAGS_END;

    const IDN: &str = "TEKTRONIX,MODEL,0,1.0";

    fn curve() -> Vec<u8> {
        let mut reply = b"#16".to_vec();
        reply.extend_from_slice(&[0x00, 0x02, 0xFF, 0xFE, 0x00, 0x00]);
        reply.push(b'\n');
        reply
    }

    fn open(mock: &MockInstrument) -> Vxi11Transport {
        let timeout = Duration::from_secs(2);
        Vxi11Transport::open_with_portmapper("127.0.0.1", mock.portmapper_port, timeout, timeout).unwrap()
    }

    #[test]
    fn query_over_a_real_core_channel() {
        let idn = format!("{}\n", IDN);
        let mock = MockInstrument::spawn(1024, 4, &[("*IDN?", idn.as_bytes())]);
        let mut link = open(&mock);

        assert_eq!(link.kind(), TransportKind::Network);
        assert_eq!(link.query("*IDN?").unwrap(), IDN);
        assert_eq!(mock.activity.lock().unwrap().device, DEVICE_NAME);
    }

    #[test]
    fn long_commands_are_split_and_only_the_last_chunk_ends() {
        let mock = MockInstrument::spawn(8, 64, &[]);
        let mut link = open(&mock);

        link.send("DATA:SOURCE CH1").unwrap();
        link.close().unwrap();

        let activity = mock.activity.lock().unwrap();
        assert_eq!(activity.commands, vec!["DATA:SOURCE CH1"]);
        assert_eq!(activity.chunks.len(), 2);
        assert_eq!(activity.chunks[0].0, b"DATA:SOU".to_vec());
        assert_eq!(activity.chunks[0].1 & OPERATION_FLAGS_END, 0);
        assert_ne!(activity.chunks[1].1 & OPERATION_FLAGS_END, 0);
    }

    #[test]
    fn unanswered_query_is_a_device_timeout() {
        let mock = MockInstrument::spawn(1024, 64, &[]);
        let mut link = open(&mock);

        let err = link.query("SELECT:CH1?").unwrap_err();
        assert!(matches!(err, ScopeError::Device{ code: 15, .. }));
    }

    #[test]
    fn acquisition_end_to_end() {
        let preamble = b":WFMOUTPRE:BYT_NR 2;BIT_NR 16;ENCDG BIN;BN_FMT RI;BYT_OR MSB;NR_PT 3;\
            XINCR 1.0E-6;XZERO 0;PT_OFF 0;YUNIT \"V\";YMULT 0.5;YOFF 0;YZERO 0\n";
        let curve = curve();
        let mock = MockInstrument::spawn(16, 5, &[
            ("*IDN?", &b"TEKTRONIX,MODEL,0,1.0\n"[..]),
            ("SELECT:CH1?", &b"1\n"[..]),
            ("HORIZONTAL:RECORDLENGTH?", &b"3\n"[..]),
            ("WFMOUTPRE?", &preamble[..]),
            ("CURVE?", &curve[..]),
        ]);

        let mut osc = Oscilloscope::with_transport(Box::new(open(&mock)), false).unwrap();
        let data = osc.get_data(&["CH1"]).unwrap();
        assert_eq!(data.idn(), IDN);
        assert_eq!(data["CH1"].values(), &[1.0, -1.0, 0.0]);

        osc.close().unwrap();
        osc.close().unwrap();
        assert!(!osc.is_open());
        assert!(matches!(osc.query("*IDN?"), Err(ScopeError::NotConnected)));
        assert_eq!(mock.activity.lock().unwrap().destroyed, 1);
    }
}
