//! Turning raw curve data into calibrated samples.
//!
//! Everything here is pure: no I/O, so it can be exercised offline.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScopeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endianness {
	Big,
	Little,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumberFormat {
	/// Signed integer (`RI`)
	Signed,
	/// Unsigned integer (`RP`)
	Unsigned,
	/// IEEE float (`FP`)
	Float,
}

/// Layout of one sample in a binary curve transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleFormat {
	width: usize,
	number: NumberFormat,
	endianness: Endianness,
}

impl SampleFormat {
	pub fn new(width:usize, number:NumberFormat, endianness:Endianness) -> Result<Self> {
		let supported = match number {
			NumberFormat::Float => width == 4 || width == 8,
			_ => matches!(width, 1 | 2 | 4 | 8),
		};
		if !supported {
			return Err(ScopeError::protocol(format!("Unsupported sample format: {:?} with {} bytes per point", number, width)));
		}
		Ok(Self{ width, number, endianness })
	}

	pub fn width(&self) -> usize { self.width }
	pub fn number(&self) -> NumberFormat { self.number }
	pub fn endianness(&self) -> Endianness { self.endianness }
}

/// Calibration and timing of one channel's curve.
///
/// A raw sample `r` maps to `r * scale + offset`; sample `i` was taken at
/// `x_zero + (i - pt_off) * x_increment`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveformHeader {
	pub scale: f64,
	pub offset: f64,
	pub count: usize,
	pub x_increment: f64,
	pub x_zero: f64,
	pub pt_off: f64,
	pub x_unit: String,
	pub y_unit: String,
}

impl WaveformHeader {
	pub fn new(scale:f64, offset:f64, count:usize) -> Self {
		Self{ scale, offset, count, x_increment: 0.0, x_zero: 0.0, pt_off: 0.0, x_unit: String::new(), y_unit: String::new() }
	}

	/// Header for samples that are already calibrated.
	pub fn identity(count:usize) -> Self { Self::new(1.0, 0.0, count) }

	pub fn with_timing(mut self, x_increment:f64, x_zero:f64, pt_off:f64) -> Self {
		self.x_increment = x_increment;
		self.x_zero = x_zero;
		self.pt_off = pt_off;
		self
	}

	pub fn with_units(mut self, x_unit:&str, y_unit:&str) -> Self {
		self.x_unit = x_unit.to_owned();
		self.y_unit = y_unit.to_owned();
		self
	}
}

/// Calibrated samples of one channel. Immutable once decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waveform {
	header: WaveformHeader,
	values: Vec<f64>,
}

impl Waveform {
	pub fn header(&self) -> &WaveformHeader { &self.header }
	pub fn values(&self) -> &[f64] { &self.values }
	pub fn len(&self) -> usize { self.values.len() }
	pub fn is_empty(&self) -> bool { self.values.is_empty() }

	pub fn time(&self, idx:usize) -> f64 {
		let h = &self.header;
		h.x_zero + (idx as f64 - h.pt_off) * h.x_increment
	}

	pub fn times(&self) -> Vec<f64> { (0..self.values.len()).map(|i| self.time(i)).collect() }

	/// `(time, value)` pairs, ready for plotting or export.
	pub fn points(&self) -> Vec<(f64, f64)> {
		self.values.iter().enumerate().map(|(i, v)| (self.time(i), *v)).collect()
	}
}

impl std::ops::Index<usize> for Waveform {
	type Output = f64;
	fn index(&self, idx:usize) -> &f64 { &self.values[idx] }
}

/// Calibrate raw samples. Fails if the number of samples differs from the count the header declares.
pub fn decode(raw:&[f64], header:&WaveformHeader) -> Result<Waveform> {
	if raw.len() != header.count {
		return Err(ScopeError::CountMismatch{ declared: header.count, actual: raw.len() });
	}

	let values:Vec<f64> = raw.iter().map(|r| r * header.scale + header.offset).collect();
	Ok(Waveform{ header: header.clone(), values })
}

/// Split a binary curve payload into raw sample codes.
pub fn unpack_samples(bytes:&[u8], format:&SampleFormat) -> Result<Vec<f64>> {
	if bytes.len() % format.width != 0 {
		return Err(ScopeError::decode(format!("{} bytes is not a whole number of {}-byte samples", bytes.len(), format.width)));
	}

	Ok(match format.endianness {
		Endianness::Big    => unpack_with::<BigEndian>(bytes, format),
		Endianness::Little => unpack_with::<LittleEndian>(bytes, format),
	})
}

fn unpack_with<B: ByteOrder>(bytes:&[u8], format:&SampleFormat) -> Vec<f64> {
	let chunks = bytes.chunks_exact(format.width);
	match (format.number, format.width) {
		(NumberFormat::Signed, 1)   => bytes.iter().map(|b| *b as i8 as f64).collect(),
		(NumberFormat::Unsigned, 1) => bytes.iter().map(|b| *b as f64).collect(),
		(NumberFormat::Signed, 2)   => chunks.map(|c| B::read_i16(c) as f64).collect(),
		(NumberFormat::Unsigned, 2) => chunks.map(|c| B::read_u16(c) as f64).collect(),
		(NumberFormat::Signed, 4)   => chunks.map(|c| B::read_i32(c) as f64).collect(),
		(NumberFormat::Unsigned, 4) => chunks.map(|c| B::read_u32(c) as f64).collect(),
		(NumberFormat::Float, 4)    => chunks.map(|c| B::read_f32(c) as f64).collect(),
		(NumberFormat::Signed, _)   => chunks.map(|c| B::read_i64(c) as f64).collect(),
		(NumberFormat::Unsigned, _) => chunks.map(|c| B::read_u64(c) as f64).collect(),
		(NumberFormat::Float, _)    => chunks.map(B::read_f64).collect(),
	}
}
