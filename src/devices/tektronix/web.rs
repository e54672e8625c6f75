//! Waveform retrieval through the scope's embedded web server.
//!
//! Posting the data page with a channel and the spreadsheet file format makes the scope answer
//! with that channel's CSV export, which [`WaveformSet::from_spreadsheet`] reads. Each channel
//! takes one request; the per-channel sets are merged in request order.

use std::time::Duration;

use crate::collection::WaveformSet;
use crate::config::AcquisitionPolicy;
use crate::error::{Result, ScopeError};

use super::source::ChannelSource;

pub const DATA_PAGE: &str = "/data/mdo_data4.html";

pub struct WebClient {
	host: String,
	url: String,
	agent: Option<ureq::Agent>,
	connect_timeout: Duration,
}

fn build_agent(connect_timeout:Duration, timeout:Duration) -> ureq::Agent {
	ureq::AgentBuilder::new()
		.timeout_connect(connect_timeout)
		.timeout(timeout)
		.build()
}

/// Form fields that select `src` and ask for a spreadsheet export.
pub fn form(src:&ChannelSource) -> Vec<(&'static str, String)> {
	vec![
		("WFMFILENAME", src.as_str().to_owned()),
		("WFMFILEEXT", "csv".to_owned()),
		("command", format!("select:control {}", src.as_str().to_ascii_lowercase())),
		("command1", "save:waveform:fileformat spreadsheet".to_owned()),
		("wfmsend", "Get".to_owned()),
	]
}

impl WebClient {

	// Nothing is sent until the first request; the web server holds no session
	pub fn new(host:&str, port:u16, connect_timeout:Duration, timeout:Duration) -> Self {
		Self{
			host: host.to_owned(),
			url: format!("http://{}:{}{}", host, port, DATA_PAGE),
			agent: Some(build_agent(connect_timeout, timeout)),
			connect_timeout,
		}
	}

	pub fn address(&self) -> &str { &self.host }
	pub fn url(&self) -> &str { &self.url }
	pub fn is_open(&self) -> bool { self.agent.is_some() }

	pub fn set_timeout(&mut self, timeout:Duration) -> Result<()> {
		if self.agent.is_none() { return Err(ScopeError::NotConnected); }
		self.agent = Some(build_agent(self.connect_timeout, timeout));
		Ok(())
	}

	pub fn close(&mut self) -> Result<()> {
		if self.agent.take().is_some() {
			log::info!("Closed web link to {}", self.host);
		}
		Ok(())
	}

	/// The whole spreadsheet the scope exports for `src`, typically a `TIME` column and the channel.
	pub fn fetch_spreadsheet(&self, src:&ChannelSource) -> Result<WaveformSet> {
		let agent = self.agent.as_ref().ok_or(ScopeError::NotConnected)?;
		let fields = form(src);
		let pairs:Vec<(&str, &str)> = fields.iter().map(|(k, v)| (*k, v.as_str())).collect();

		log::debug!("POST {} for {}", self.url, src);
		let response = agent.post(&self.url).send_form(&pairs).map_err(|e| self.http_error(e))?;
		WaveformSet::from_spreadsheet(response.into_reader())
	}

	/// Only the `src` column of its spreadsheet, with the spreadsheet's header rows.
	pub fn fetch(&self, src:&ChannelSource) -> Result<WaveformSet> {
		let sheet = self.fetch_spreadsheet(src)?;
		let waveform = sheet.get(src.as_str())?.clone();

		let mut set = WaveformSet::new(sheet.idn());
		set.update_header(sheet.header().clone());
		set.insert(src.as_str(), waveform);
		Ok(set)
	}

	pub fn get_data(&self, sources:&[ChannelSource], policy:AcquisitionPolicy) -> Result<WaveformSet> {
		let mut set = WaveformSet::new("");
		for src in sources {
			match self.fetch(src) {
				Ok(part) => set.merge(part)?,
				Err(e) if policy == AcquisitionPolicy::BestEffort && !e.is_connection() => {
					log::warn!("Skipping {}: {}", src, e);
					set.skip(src.as_str(), &e);
				},
				Err(e) => return Err(e),
			}
		}
		log::info!("Fetched {} of {} sources from {}", set.len(), sources.len(), self.url);
		Ok(set)
	}

	fn http_error(&self, err:ureq::Error) -> ScopeError {
		match err {
			ureq::Error::Status(code, response) => {
				ScopeError::protocol(format!("{} answered HTTP {} {}", self.url, code, response.status_text()))
			},
			ureq::Error::Transport(t) => ScopeError::Connect{ address: self.host.clone(), reason: t.to_string() },
		}
	}

}
