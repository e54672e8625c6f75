use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Serialize, Serializer};

use crate::error::{Result, ScopeError};

lazy_static! {
	static ref SOURCE_RE: Regex = Regex::new(r"^(CH[1-8]|MATH[1-4]?|REF[1-8]|D(1[0-5]|[0-9]))$").unwrap();
}

/// A waveform source on the scope: `CH1`..`CH8`, `MATH`, `MATH1`..`MATH4`, `REF1`..`REF8` or `D0`..`D15`.
///
/// Parsing is case-insensitive; the stored name is upper case, which is also how the scope spells it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelSource(String);

impl ChannelSource {
	pub fn as_str(&self) -> &str { &self.0 }
}

impl FromStr for ChannelSource {
	type Err = ScopeError;

	fn from_str(s:&str) -> Result<Self> {
		let name = s.trim().to_ascii_uppercase();
		if SOURCE_RE.is_match(&name) { Ok(ChannelSource(name)) }
		else { Err(ScopeError::InvalidSource(s.to_owned())) }
	}
}

impl fmt::Display for ChannelSource {
	fn fmt(&self, f:&mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl AsRef<str> for ChannelSource {
	fn as_ref(&self) -> &str { &self.0 }
}

impl Serialize for ChannelSource {
	fn serialize<S: Serializer>(&self, serializer:S) -> std::result::Result<S::Ok, S::Error> {
		serializer.serialize_str(&self.0)
	}
}
