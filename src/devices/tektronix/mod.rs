
use std::ops::Drop;
use std::time::Duration;

use crate::collection::WaveformSet;
use crate::config::{AcquisitionPolicy, ScopeConfig};
use crate::error::{Result, ScopeError};
use crate::transport::{self, Transport, TransportKind};
use crate::waveform::{decode, Waveform};

pub mod protocol;
pub mod source;
pub mod web;

pub use protocol::{Identification, SampleRange};
pub use source::ChannelSource;
pub use web::WebClient;

use protocol::Preamble;

/// Knobs for [`Oscilloscope::get_data_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcquireOptions {
	pub range: SampleRange,
	/// Turn every requested source on first instead of failing on sources that are off
	pub enable_channels: bool,
	pub policy: AcquisitionPolicy,
}

enum Link {
	Scpi(Box<dyn Transport>),
	Web(WebClient),
}

/// A Tektronix oscilloscope behind one exclusively owned link.
///
/// ```no_run
/// use tekscope::Oscilloscope;
///
/// let mut osc = Oscilloscope::new("192.168.3.83", false, false)?;
/// let data = osc.get_data(&["CH2", "CH1"])?;
///
/// println!("{:?}", data.sources());
/// println!("{:?}", data["CH1"].values());
/// println!("{:?}", data.header());
/// # Ok::<(), tekscope::ScopeError>(())
/// ```
pub struct Oscilloscope {
	link: Link,
	policy: AcquisitionPolicy,
}

impl Oscilloscope {

	/// Connect over the network (VXI-11), or to the serial port at `address` when `use_serial` is set.
	/// With `print_idn` the instrument's identification is printed once connected.
	pub fn new(address:&str, use_serial:bool, print_idn:bool) -> Result<Self> {
		let config = ScopeConfig {
			address: address.to_owned(),
			transport: if use_serial { TransportKind::Serial } else { TransportKind::Network },
			print_idn,
			..ScopeConfig::default()
		};
		Self::connect(&config)
	}

	pub fn connect(config:&ScopeConfig) -> Result<Self> {
		if config.transport == TransportKind::Http {
			let web = WebClient::new(&config.address, config.http_port, config.connect_timeout(), config.timeout());
			if config.print_idn {
				log::warn!("{} has no identification query; not printing one", web.url());
			}
			return Ok(Self{ link: Link::Web(web), policy: config.policy });
		}

		let link = transport::open(config)?;
		let mut osc = Self::with_transport(link, config.print_idn)?;
		osc.policy = config.policy;
		Ok(osc)
	}

	/// Wrap an already open link, e.g. a [`LoopbackTransport`](crate::transport::LoopbackTransport).
	pub fn with_transport(link:Box<dyn Transport>, print_idn:bool) -> Result<Self> {
		let mut osc = Self{ link: Link::Scpi(link), policy: AcquisitionPolicy::default() };
		if print_idn {
			println!("{}", osc.query_identification()?);
		}
		Ok(osc)
	}

	pub fn kind(&self) -> TransportKind {
		match &self.link {
			Link::Scpi(link) => link.kind(),
			Link::Web(_) => TransportKind::Http,
		}
	}

	pub fn address(&self) -> &str {
		match &self.link {
			Link::Scpi(link) => link.address(),
			Link::Web(web) => web.address(),
		}
	}

	pub fn is_open(&self) -> bool {
		match &self.link {
			Link::Scpi(link) => link.is_open(),
			Link::Web(web) => web.is_open(),
		}
	}

	pub fn set_timeout(&mut self, timeout:Duration) -> Result<()> {
		match &mut self.link {
			Link::Scpi(link) => link.set_timeout(timeout),
			Link::Web(web) => web.set_timeout(timeout),
		}
	}

	// The web server only exports spreadsheets
	fn scpi(&mut self) -> Result<&mut dyn Transport> {
		match &mut self.link {
			Link::Scpi(link) => Ok(link.as_mut()),
			Link::Web(_) => Err(ScopeError::Unsupported("SCPI".to_owned())),
		}
	}

	// One-liners
	pub fn write(&mut self, command:&str) -> Result<()>              { self.scpi()?.send(command) }
	pub fn query(&mut self, command:&str) -> Result<String>          { self.scpi()?.query(command) }
	pub fn query_identification(&mut self) -> Result<String>         { protocol::query_identification(self.scpi()?) }
	pub fn identification(&mut self) -> Result<Identification>       { Identification::parse(&self.query_identification()?) }
	pub fn record_length(&mut self) -> Result<usize>                 { protocol::record_length(self.scpi()?) }

	/// Acquire `sources` in the given order with the full record and the configured policy.
	pub fn get_data<S: AsRef<str>>(&mut self, sources:&[S]) -> Result<WaveformSet> {
		let options = AcquireOptions{ policy: self.policy, ..AcquireOptions::default() };
		self.get_data_with(sources, &options)
	}

	pub fn get_data_with<S: AsRef<str>>(&mut self, sources:&[S], options:&AcquireOptions) -> Result<WaveformSet> {
		// Reject unknown names before touching the instrument
		let sources = sources.iter()
			.map(|s| s.as_ref().parse::<ChannelSource>())
			.collect::<Result<Vec<_>>>()?;

		if let Link::Web(web) = &self.link {
			if options.enable_channels || options.range != SampleRange::default() {
				log::warn!("The web export always sends the full record of enabled channels");
			}
			return web.get_data(&sources, options.policy);
		}

		let mut set = WaveformSet::new(self.query_identification()?);

		if options.enable_channels {
			protocol::select_channels(self.scpi()?, &sources)?;
		}

		for src in &sources {
			match self.acquire(src, options) {
				Ok((preamble, waveform)) => {
					set.update_header(preamble.into_fields());
					set.insert(src.as_str(), waveform);
				},
				Err(e) if options.policy == AcquisitionPolicy::BestEffort && !e.is_connection() => {
					log::warn!("Skipping {}: {}", src, e);
					set.skip(src.as_str(), &e);
				},
				Err(e) => return Err(e),
			}
		}

		log::info!("Acquired {} of {} sources from {}", set.len(), sources.len(), self.address());
		Ok(set)
	}

	fn acquire(&mut self, src:&ChannelSource, options:&AcquireOptions) -> Result<(Preamble, Waveform)> {
		let link = self.scpi()?;
		if !options.enable_channels && !protocol::channel_enabled(link, src)? {
			return Err(ScopeError::ChannelDisabled(src.to_string()));
		}

		let raw = protocol::request_waveform(link, src, options.range)?;
		let header = raw.preamble.header()?;
		let waveform = decode(&raw.samples, &header)?;
		Ok((raw.preamble, waveform))
	}

	pub fn close(&mut self) -> Result<()> {
		match &mut self.link {
			Link::Scpi(link) => link.close(),
			Link::Web(web) => web.close(),
		}
	}

}

impl Drop for Oscilloscope {

	fn drop(&mut self) {
		if let Err(e) = self.close() {
			log::warn!("Unable to close link to {}: {}", self.address(), e);
		}
	}

}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::ErrorKind;
	use crate::transport::LoopbackTransport;
	use protocol::{CURVE_QUERY, IDN_QUERY, PREAMBLE_QUERY, RECORD_LENGTH_QUERY};

	const IDN:&str = "TEKTRONIX,MODEL,0,1.0";
	const PREAMBLE:&str = ":WFMOUTPRE:ENCDG ASC;NR_PT 4;XINCR 1.0E-3;XZERO 0;PT_OFF 0;YUNIT \"V\";YMULT 2;YOFF 1;YZERO 0.5";

	fn scope() -> LoopbackTransport {
		LoopbackTransport::new()
			.respond(IDN_QUERY, IDN)
			.respond(RECORD_LENGTH_QUERY, "4")
			.respond(PREAMBLE_QUERY, PREAMBLE)
			.respond(CURVE_QUERY, "1,2,3,4")
			.respond("SELECT:CH1?", "1")
			.respond("SELECT:CH2?", "1")
	}

	#[test]
	fn acquires_calibrated_values_in_request_order() {
		let mut osc = Oscilloscope::with_transport(Box::new(scope()), false).unwrap();
		let data = osc.get_data(&["CH2", "ch1"]).unwrap();

		assert_eq!(data.idn(), IDN);
		assert_eq!(data.sources(), vec!["CH2", "CH1"]);
		assert_eq!(data["CH1"].values(), &[0.5, 2.5, 4.5, 6.5]);
		assert_eq!(data["CH1"].header().y_unit, "V");
		assert_eq!(data.header().get("NR_PT").map(|s| s.as_str()), Some("4"));
	}

	#[test]
	fn disabled_channel_fails_fast() {
		let link = scope().respond("SELECT:CH3?", "0");
		let mut osc = Oscilloscope::with_transport(Box::new(link), false).unwrap();

		match osc.get_data(&["CH1", "CH3"]) {
			Err(ScopeError::ChannelDisabled(src)) => assert_eq!(src, "CH3"),
			other => panic!("expected ChannelDisabled, got {:?}", other.map(|d| d.sources().len())),
		}
	}

	#[test]
	fn best_effort_skips_disabled_channels() {
		let link = scope().respond("SELECT:CH3?", "0");
		let mut osc = Oscilloscope::with_transport(Box::new(link), false).unwrap();
		let options = AcquireOptions{ policy: AcquisitionPolicy::BestEffort, ..AcquireOptions::default() };

		let data = osc.get_data_with(&["CH3", "CH1"], &options).unwrap();
		assert_eq!(data.sources(), vec!["CH1"]);
		assert_eq!(data.skipped().len(), 1);
		assert_eq!(data.skipped()[0].source, "CH3");
	}

	#[test]
	fn best_effort_still_aborts_on_a_dead_link() {
		// No script for SELECT:CH4? so the query times out
		let mut osc = Oscilloscope::with_transport(Box::new(scope()), false).unwrap();
		let options = AcquireOptions{ policy: AcquisitionPolicy::BestEffort, ..AcquireOptions::default() };

		let err = osc.get_data_with(&["CH1", "CH4"], &options).unwrap_err();
		assert_eq!(err.kind(), ErrorKind::Connection);
	}

	#[test]
	fn short_curve_is_a_count_mismatch() {
		let link = LoopbackTransport::new()
			.respond(IDN_QUERY, IDN)
			.respond("SELECT:CH1?", "1")
			.respond(RECORD_LENGTH_QUERY, "4")
			.respond(PREAMBLE_QUERY, PREAMBLE)
			.respond(CURVE_QUERY, "1,2,3");
		let mut osc = Oscilloscope::with_transport(Box::new(link), false).unwrap();

		assert!(matches!(osc.get_data(&["CH1"]), Err(ScopeError::CountMismatch{ declared: 4, actual: 3 })));
	}

	#[test]
	fn unknown_source_is_rejected_before_any_io() {
		let link = scope();
		let sent = link.sent();
		let mut osc = Oscilloscope::with_transport(Box::new(link), false).unwrap();

		assert!(matches!(osc.get_data(&["CH1", "CH9"]), Err(ScopeError::InvalidSource(_))));
		assert!(sent.commands().is_empty());
	}

	#[test]
	fn enabling_channels_skips_the_selection_query() {
		let link = scope();
		let sent = link.sent();
		let mut osc = Oscilloscope::with_transport(Box::new(link), false).unwrap();
		let options = AcquireOptions{ enable_channels: true, range: SampleRange::new(Some(1), Some(4)), ..AcquireOptions::default() };

		let data = osc.get_data_with(&["CH3"], &options).unwrap();
		assert_eq!(data.sources(), vec!["CH3"]);
		assert!(sent.contains("SELECT:CH3 ON"));
		assert!(!sent.contains("SELECT:CH3?"));
		assert!(!sent.contains(RECORD_LENGTH_QUERY));
	}

	#[test]
	fn identification_is_parsed() {
		let mut osc = Oscilloscope::with_transport(Box::new(scope()), true).unwrap();
		let idn = osc.identification().unwrap();
		assert_eq!(idn.manufacturer, "TEKTRONIX");
		assert_eq!(idn.model, "MODEL");
		assert_eq!(osc.record_length().unwrap(), 4);
	}

	#[test]
	fn close_is_idempotent() {
		let mut osc = Oscilloscope::with_transport(Box::new(scope()), false).unwrap();
		assert_eq!(osc.kind(), TransportKind::Loopback);
		assert!(osc.is_open());

		osc.close().unwrap();
		osc.close().unwrap();
		assert!(!osc.is_open());
		assert!(matches!(osc.query(IDN_QUERY), Err(ScopeError::NotConnected)));
	}

	#[test]
	fn http_transport_fetches_spreadsheets() {
		let (port, _rx) = web::tests::spawn_web_server(1, |_| ("200 OK", web::tests::sheet("CH1", &[0.25, 0.5])));
		let config = ScopeConfig {
			address: "127.0.0.1".to_owned(),
			transport: TransportKind::Http,
			http_port: port,
			..ScopeConfig::default()
		};

		let mut osc = Oscilloscope::connect(&config).unwrap();
		assert_eq!(osc.kind(), TransportKind::Http);
		assert!(matches!(osc.query(IDN_QUERY), Err(ScopeError::Unsupported(_))));

		let data = osc.get_data(&["ch1"]).unwrap();
		assert_eq!(data.sources(), vec!["CH1"]);
		assert_eq!(data["CH1"].values(), &[0.25, 0.5]);

		osc.close().unwrap();
		assert!(!osc.is_open());
	}
}
