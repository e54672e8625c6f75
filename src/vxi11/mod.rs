// Device core
pub const DEVICE_CORE_PROG:u32  = 0x0607af;
pub const DEVICE_CORE_VERS:u32  = 1;
pub const CREATE_LINK:u32       = 10;
pub const DEVICE_WRITE:u32      = 11;
pub const DEVICE_READ:u32       = 12;
pub const DESTROY_LINK:u32      = 23;

pub const CLIENT_ID:i32 = 3333;
pub const DEFAULT_LOCK_TIMEOUT:u32 = 10000;

pub const OPERATION_FLAGS_END:i32 = 8;

// Reason bits of a device_read reply
pub const REASON_REQCNT:i32 = 1;
pub const REASON_CHR:i32    = 2;
pub const REASON_END:i32    = 4;

use std::time::Duration;

use crate::error::{Result, ScopeError};
use crate::rpc::port_mapping::{TcpPortMapperClient, Mapping};
use crate::rpc::tcp_clients::TcpClient;

pub mod xdr_pack;

#[cfg(test)]
pub(crate) mod mock;

pub struct CoreClient {
	client: TcpClient,
	opt_link: Option<Link>,
	io_timeout_ms: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct Link {
	pub link_id: i32,
	pub abort_port: u16,
	pub max_recv_size: u32,
}

// Device error codes from the VXI-11 core channel
pub fn device_error(code:i32) -> ScopeError {
	let message = match code {
		1  => "Syntax error",
		3  => "Device not accessible",
		4  => "Invalid link identifier",
		5  => "Parameter error",
		6  => "Channel not established",
		8  => "Operation not supported",
		9  => "Out of resources",
		11 => "Device locked by another link",
		12 => "No lock held by this link",
		15 => "I/O timeout",
		17 => "I/O error",
		21 => "Invalid address",
		23 => "Abort",
		29 => "Channel already established",
		_  => "Unknown error",
	};
	ScopeError::Device{ code, message }
}

fn check(code:i32) -> Result<()> {
	if code == 0 { Ok(()) } else { Err(device_error(code)) }
}

impl CoreClient {

	fn get_link(&self) -> Result<Link> {
		self.opt_link.ok_or(ScopeError::NotConnected)
	}

	pub fn new(host:&str, pmap_port:u16, timeout:Duration) -> Result<Self> {

		// Find the port to use for the core program
		let mut pmap_client = TcpPortMapperClient::new(host, pmap_port, timeout)?;
		let port = pmap_client.get_port(&Mapping::tcp(DEVICE_CORE_PROG, DEVICE_CORE_VERS))?;
		log::debug!("VXI-11 core channel of {} is on port {}", host, port);

		let client = TcpClient::connect((host, port), DEVICE_CORE_PROG, DEVICE_CORE_VERS, timeout)?;

		let mut core = CoreClient{ client, opt_link: None, io_timeout_ms: timeout_ms(timeout) };
		core.set_timeout(timeout)?;
		Ok(core)
	}

	pub fn link(&self) -> Option<Link> { self.opt_link }

	pub fn set_timeout(&mut self, timeout:Duration) -> Result<()> {
		self.io_timeout_ms = timeout_ms(timeout);
		// Give the socket a little longer than the device so the device's own timeout error arrives first
		self.client.set_timeout(timeout.saturating_add(Duration::from_secs(1)))
	}

	pub fn create_link(&mut self, device:&str) -> Result<()> {
		if self.opt_link.is_some() {
			return Err(ScopeError::Rpc("Already connected to a link".to_owned()));
		}

		self.client.start_call(CREATE_LINK)?;
		xdr_pack::pack_create_link_parms(&mut self.client.packer, CLIENT_ID, false, DEFAULT_LOCK_TIMEOUT, device)?;
		self.client.do_call()?;

		let error:i32         = self.client.unpacker.unpack_i32()?;
		let link_id:i32       = self.client.unpacker.unpack_i32()?;
		let abort_port:u32    = self.client.unpacker.unpack_u32()?;
		let max_recv_size:u32 = self.client.unpacker.unpack_u32()?;

		check(error)?;

		self.opt_link = Some(Link{ link_id, abort_port: abort_port as u16, max_recv_size });
		Ok(())
	}

	pub fn ask(&mut self, data:&[u8]) -> Result<Vec<u8>> {
		self.write(data)?;
		self.read()
	}

	pub fn write(&mut self, data:&[u8]) -> Result<()> {
		let link = self.get_link()?;

		// The device tells us the largest write it accepts; only the final chunk carries END
		let chunk_size = (link.max_recv_size as usize).max(1);
		if data.is_empty() {
			return self.write_chunk(link.link_id, data, OPERATION_FLAGS_END);
		}
		let mut chunks = data.chunks(chunk_size).peekable();
		while let Some(chunk) = chunks.next() {
			let flags = if chunks.peek().is_none() { OPERATION_FLAGS_END } else { 0 };
			self.write_chunk(link.link_id, chunk, flags)?;
		}
		Ok(())
	}

	fn write_chunk(&mut self, link_id:i32, data:&[u8], flags:i32) -> Result<()> {
		self.client.start_call(DEVICE_WRITE)?;
		xdr_pack::pack_device_write_parms(&mut self.client.packer, link_id, self.io_timeout_ms, DEFAULT_LOCK_TIMEOUT, flags, data)?;
		self.client.do_call()?;

		let error:i32 = self.client.unpacker.unpack_i32()?;
		let size:u32  = self.client.unpacker.unpack_u32()?;

		check(error)?;

		if size as usize != data.len() {
			return Err(ScopeError::Rpc(format!("Device accepted {} of {} bytes", size, data.len())));
		}
		Ok(())
	}

	pub fn read(&mut self) -> Result<Vec<u8>> {
		let link = self.get_link()?;
		let mut ans:Vec<u8> = vec![];

		loop {
			self.client.start_call(DEVICE_READ)?;
			xdr_pack::pack_device_read_parms(&mut self.client.packer, link.link_id, u32::MAX, self.io_timeout_ms, DEFAULT_LOCK_TIMEOUT, 0, 0)?;
			self.client.do_call()?;

			let error:i32    = self.client.unpacker.unpack_i32()?;
			let reason:i32   = self.client.unpacker.unpack_i32()?;
			let data:Vec<u8> = self.client.unpacker.unpack_variable_len_opaque()?;

			check(error)?;
			ans.extend_from_slice(&data);

			if reason & REASON_END != 0 { return Ok(ans); }
			if reason & (REASON_REQCNT | REASON_CHR) == 0 {
				return Err(ScopeError::Rpc(format!("Read reply with no reason bits set (reason {})", reason)));
			}
			// REQCNT or CHR without END: the response continues in the next read
		}
	}

	pub fn destroy_link(&mut self) -> Result<()> {
		let link = match self.opt_link.take() {
			Some(link) => link,
			None       => return Ok(()),
		};

		self.client.start_call(DESTROY_LINK)?;
		xdr_pack::pack_device_link(&mut self.client.packer, link.link_id)?;
		self.client.do_call()?;

		check(self.client.unpacker.unpack_i32()?)
	}

}

fn timeout_ms(timeout:Duration) -> u32 {
	timeout.as_millis().min(u32::MAX as u128) as u32
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn device_errors_are_connection_errors() {
		let e = device_error(15);
		assert!(e.is_connection());
		assert_eq!(e.to_string(), "Device error 15: I/O timeout");
	}

	#[test]
	fn unknown_codes_still_map() {
		assert!(matches!(device_error(99), ScopeError::Device{ code: 99, message: "Unknown error" }));
	}

	#[test]
	fn timeouts_saturate() {
		assert_eq!(timeout_ms(Duration::from_millis(1500)), 1500);
		assert_eq!(timeout_ms(Duration::from_secs(u64::MAX)), u32::MAX);
	}
}
