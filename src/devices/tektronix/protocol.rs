//! SCPI commands of the Tektronix waveform transfer and the parsing of their replies.
//!
//! Every function takes the link by `&mut dyn Transport` so the same code drives a
//! real scope or a scripted [`LoopbackTransport`](crate::transport::LoopbackTransport).

use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

use crate::error::{Result, ScopeError};
use crate::transport::Transport;
use crate::waveform::{unpack_samples, Endianness, NumberFormat, SampleFormat, WaveformHeader};

use super::source::ChannelSource;

lazy_static! {
	static ref IDN_RE: Regex = Regex::new(r"^\s*([^,]+),([^,]+),([^,]*),(.+?)\s*$").unwrap();
}

pub const IDN_QUERY: &str = "*IDN?";
pub const RECORD_LENGTH_QUERY: &str = "HORIZONTAL:RECORDLENGTH?";
pub const PREAMBLE_QUERY: &str = "WFMOUTPRE?";
pub const CURVE_QUERY: &str = "CURVE?";
pub const VERBOSE_HEADERS_ON: &str = "VERBOSE ON;HEADER ON";
pub const VERBOSE_HEADERS_OFF: &str = "VERBOSE OFF;HEADER OFF";

/// The four fields of an `*IDN?` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identification {
	pub manufacturer: String,
	pub model: String,
	pub serial_num: String,
	pub fw_version: String,
}

impl Identification {
	pub fn parse(idn:&str) -> Result<Self> {
		let caps = IDN_RE.captures(idn)
			.ok_or_else(|| ScopeError::protocol(format!("Unrecognized identification string {:?}", idn)))?;
		let field = |i:usize| caps.get(i).map(|m| m.as_str().trim().to_owned()).unwrap_or_default();

		Ok(Identification{ manufacturer: field(1), model: field(2), serial_num: field(3), fw_version: field(4) })
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding { Ascii, Binary }

/// Key/value fields of a `WFMOUTPRE?` reply, keyed by their long names (`BYT_NR`, `YMULT`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Preamble(BTreeMap<String, String>);

impl Preamble {
	/// Parse the reply given with `HEADER ON`, e.g. `:WFMOUTPRE:BYT_NR 1;BIT_NR 8;ENCDG BINARY;...`.
	pub fn parse(reply:&str) -> Result<Self> {
		let mut fields = BTreeMap::new();

		for field in reply.trim().split(';') {
			let field = strip_header_path(field.trim());
			if field.is_empty() { continue; }

			let (key, value) = field.split_once(char::is_whitespace)
				.ok_or_else(|| ScopeError::protocol(format!("Preamble field {:?} has no value", field)))?;
			fields.insert(key.trim().to_ascii_uppercase(), unquote(value.trim()).to_owned());
		}

		if fields.is_empty() {
			return Err(ScopeError::protocol("Empty waveform preamble"));
		}
		Ok(Preamble(fields))
	}

	pub fn get(&self, key:&str) -> Option<&str> { self.0.get(key).map(|s| s.as_str()) }

	pub fn fields(&self) -> &BTreeMap<String, String> { &self.0 }

	pub fn into_fields(self) -> BTreeMap<String, String> { self.0 }

	fn require(&self, key:&str) -> Result<&str> {
		self.get(key).ok_or_else(|| ScopeError::protocol(format!("Preamble is missing {}", key)))
	}

	fn number(&self, key:&str) -> Result<f64> {
		let text = self.require(key)?;
		text.parse::<f64>().map_err(|_| ScopeError::protocol(format!("Preamble field {} is not a number: {:?}", key, text)))
	}

	fn number_or_zero(&self, key:&str) -> Result<f64> {
		match self.get(key) {
			Some(_) => self.number(key),
			None    => Ok(0.0),
		}
	}

	pub fn point_count(&self) -> Result<usize> {
		let n = self.number("NR_PT")?;
		if n < 0.0 || n.fract() != 0.0 {
			return Err(ScopeError::protocol(format!("Invalid point count {}", n)));
		}
		Ok(n as usize)
	}

	pub fn encoding(&self) -> Result<Encoding> {
		let enc = self.require("ENCDG")?.to_ascii_uppercase();
		// Older firmware reports the DATA:ENCDG name (RIBINARY, SRPBINARY, ...) instead of BINARY
		const BINARY_PREFIXES:[&str; 7] = ["BIN", "RIB", "RPB", "FPB", "SRI", "SRP", "SFP"];
		if enc.starts_with("ASC") { Ok(Encoding::Ascii) }
		else if BINARY_PREFIXES.iter().any(|p| enc.starts_with(p)) { Ok(Encoding::Binary) }
		else { Err(ScopeError::protocol(format!("Unknown curve encoding {:?}", enc))) }
	}

	pub fn sample_format(&self) -> Result<SampleFormat> {
		let width = self.require("BYT_NR")?.parse::<usize>()
			.map_err(|_| ScopeError::protocol("BYT_NR is not an integer"))?;
		let number = match self.require("BN_FMT")?.to_ascii_uppercase().as_str() {
			"RI" => NumberFormat::Signed,
			"RP" => NumberFormat::Unsigned,
			"FP" => NumberFormat::Float,
			other => return Err(ScopeError::protocol(format!("Unknown binary format {:?}", other))),
		};
		// Scopes omit BYT_OR for single byte transfers on some firmware
		let endianness = match self.get("BYT_OR").map(|s| s.to_ascii_uppercase()) {
			Some(ref o) if o == "LSB" => Endianness::Little,
			Some(ref o) if o == "MSB" => Endianness::Big,
			None => Endianness::Big,
			Some(other) => return Err(ScopeError::protocol(format!("Unknown byte order {:?}", other))),
		};
		SampleFormat::new(width, number, endianness)
	}

	/// Scale and offset such that `value = raw * scale + offset`, i.e. `(raw - YOFF) * YMULT + YZERO`.
	pub fn header(&self) -> Result<WaveformHeader> {
		let y_mult = self.number("YMULT")?;
		let y_off  = self.number("YOFF")?;
		let y_zero = self.number("YZERO")?;

		Ok(WaveformHeader::new(y_mult, y_zero - y_off * y_mult, self.point_count()?)
			.with_timing(self.number_or_zero("XINCR")?, self.number_or_zero("XZERO")?, self.number_or_zero("PT_OFF")?)
			.with_units(self.get("XUNIT").unwrap_or(""), self.get("YUNIT").unwrap_or("")))
	}
}

fn strip_header_path(field:&str) -> &str {
	for prefix in &[":WFMOUTPRE:", ":WFMPRE:", "WFMOUTPRE:", "WFMPRE:"] {
		if let Some(head) = field.get(..prefix.len()) {
			if head.eq_ignore_ascii_case(prefix) { return &field[prefix.len()..]; }
		}
	}
	field.trim_start_matches(':')
}

fn unquote(value:&str) -> &str {
	value.strip_prefix('"').and_then(|v| v.strip_suffix('"')).unwrap_or(value)
}

// With HEADER ON replies carry the command path before the value, e.g. ":SELECT:CH1 1"
fn reply_value(reply:&str) -> &str {
	reply.trim().rsplit(char::is_whitespace).next().unwrap_or("")
}

/// Inclusive range of record points to transfer, 1-based as the scope counts them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SampleRange {
	pub start: Option<usize>,
	pub stop: Option<usize>,
}

impl SampleRange {
	pub fn new(start:Option<usize>, stop:Option<usize>) -> Self { Self{ start, stop } }
}

/// Preamble plus the raw sample codes of one curve transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct RawWaveform {
	pub source: ChannelSource,
	pub preamble: Preamble,
	pub samples: Vec<f64>,
}

pub fn query_identification(t:&mut dyn Transport) -> Result<String> {
	t.query(IDN_QUERY)
}

/// Turn each source's display on, one command per source, in order.
pub fn select_channels(t:&mut dyn Transport, sources:&[ChannelSource]) -> Result<()> {
	for src in sources {
		t.send(&format!("SELECT:{} ON", src))?;
	}
	Ok(())
}

pub fn channel_enabled(t:&mut dyn Transport, src:&ChannelSource) -> Result<bool> {
	let reply = t.query(&format!("SELECT:{}?", src))?;
	match reply_value(&reply).to_ascii_uppercase().as_str() {
		"1" | "ON"  => Ok(true),
		"0" | "OFF" => Ok(false),
		_ => Err(ScopeError::protocol(format!("Unexpected reply to SELECT:{}?: {:?}", src, reply))),
	}
}

pub fn record_length(t:&mut dyn Transport) -> Result<usize> {
	let reply = t.query(RECORD_LENGTH_QUERY)?;
	reply_value(&reply).parse::<usize>()
		.map_err(|_| ScopeError::protocol(format!("Unexpected record length {:?}", reply)))
}

pub fn query_preamble(t:&mut dyn Transport, src:&ChannelSource) -> Result<Preamble> {
	t.send(&format!("DATA:SOURCE {}", src))?;
	t.send(VERBOSE_HEADERS_ON)?;
	let reply = t.query(PREAMBLE_QUERY);
	// Restore terse replies even when the preamble query failed, later queries depend on it
	let restored = t.send(VERBOSE_HEADERS_OFF);
	let preamble = Preamble::parse(&reply?)?;
	restored?;
	Ok(preamble)
}

/// Select `src`, set the transfer window and fetch the preamble and curve.
pub fn request_waveform(t:&mut dyn Transport, src:&ChannelSource, range:SampleRange) -> Result<RawWaveform> {
	t.send(&format!("DATA:SOURCE {}", src))?;
	let start = range.start.unwrap_or(1);
	t.send(&format!("DATA:START {}", start))?;
	let stop = match range.stop {
		Some(stop) => stop,
		None => record_length(t)?,
	};
	t.send(&format!("DATA:STOP {}", stop))?;

	let preamble = query_preamble(t, src)?;

	let samples = match preamble.encoding()? {
		Encoding::Ascii  => parse_ascii_curve(&t.query(CURVE_QUERY)?)?,
		Encoding::Binary => {
			let format = preamble.sample_format()?;
			let reply = t.query_raw(CURVE_QUERY)?;
			unpack_samples(parse_block(&reply)?, &format)?
		},
	};

	log::debug!("{}: {} samples ({} declared)", src, samples.len(), preamble.get("NR_PT").unwrap_or("?"));
	Ok(RawWaveform{ source: src.clone(), preamble, samples })
}

/// Payload of an IEEE 488.2 block: `#<d><d digits of length><data>`, or `#0<data>` for an indefinite block.
/// Bytes after a definite block (the message terminator) are ignored.
pub fn parse_block(reply:&[u8]) -> Result<&[u8]> {
	let start = reply.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(reply.len());
	let reply = &reply[start..];

	if reply.first() != Some(&b'#') {
		return Err(ScopeError::protocol("Curve reply does not start with a block header"));
	}
	let digits = reply.get(1)
		.and_then(|d| (*d as char).to_digit(10))
		.ok_or_else(|| ScopeError::protocol("Block header has no length digit"))? as usize;

	if digits == 0 {
		let mut data = &reply[2..];
		while let Some((last, rest)) = data.split_last() {
			if *last == b'\n' || *last == b'\r' { data = rest; } else { break; }
		}
		return Ok(data);
	}

	let len_field = reply.get(2..2 + digits)
		.ok_or_else(|| ScopeError::protocol("Block header is truncated"))?;
	let len:usize = std::str::from_utf8(len_field).ok()
		.and_then(|s| s.parse().ok())
		.ok_or_else(|| ScopeError::protocol(format!("Block length {:?} is not a number", String::from_utf8_lossy(len_field))))?;

	let body = &reply[2 + digits..];
	if body.len() < len {
		return Err(ScopeError::protocol(format!("Block declares {} bytes but only {} arrived", len, body.len())));
	}
	Ok(&body[..len])
}

pub fn parse_ascii_curve(reply:&str) -> Result<Vec<f64>> {
	let values = reply_value(reply);
	if values.is_empty() {
		return Ok(vec![]);
	}
	values.split(',')
		.map(|v| v.trim().parse::<f64>().map_err(|_| ScopeError::protocol(format!("Curve value {:?} is not a number", v))))
		.collect()
}
