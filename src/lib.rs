
// Error type shared by every layer, with a coarse classification to decide what is recoverable
pub mod error;

// External data representation, a protocol for serializing data to be sent over the network
pub mod xdr;

// Remote procedure call, a protocol build on top of XDR to provide something like C-style function calls over the network
pub mod rpc;

// A protocol using RPC that's meant to communicate with instruments like oscilloscopes, power supplies, waveform generators, etc
pub mod vxi11;

// Byte level links to an instrument: VXI-11, raw TCP socket, serial port and an in-memory loopback for tests
pub mod transport;

// Conversion of raw sample codes into calibrated values
pub mod waveform;

// Waveforms of one acquisition keyed by source
pub mod collection;

// Layered settings: defaults, TOML file, environment
pub mod config;

// Instrument drivers
pub mod devices;

pub use collection::{SkippedSource, WaveformSet};
pub use crate::config::{load_config, AcquisitionPolicy, ScopeConfig};
pub use devices::tektronix::{AcquireOptions, ChannelSource, Identification, Oscilloscope, SampleRange};
pub use error::{ErrorKind, Result, ScopeError};
pub use transport::{Transport, TransportKind};
pub use waveform::{decode, Waveform, WaveformHeader};
