
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use byteorder::{BigEndian, WriteBytesExt, ReadBytesExt};

use crate::error::{Result, ScopeError};
use crate::xdr;
use super::{xdr_pack, xdr_unpack, LAST_FRAGMENT};

pub struct TcpClient {
	pub stream: TcpStream,
	pub prog: u32,
	pub vers: u32,
	pub lastxid: u32,
	pub packer: xdr::Packer,
	pub unpacker: xdr::Unpacker,
}

// Try every resolved address in turn with a bounded connect, keeping the last failure for the error message
pub fn connect_stream<A: ToSocketAddrs>(addr: A, timeout: Duration) -> Result<TcpStream> {
	let mut last_err: Option<std::io::Error> = None;
	for socket_addr in addr.to_socket_addrs()? {
		match TcpStream::connect_timeout(&socket_addr, timeout) {
			Ok(stream) => return Ok(stream),
			Err(e)     => last_err = Some(e),
		}
	}
	Err(last_err.map(ScopeError::Io).unwrap_or_else(|| ScopeError::protocol("Address did not resolve to any socket address")))
}

impl TcpClient {

	pub fn connect<A: ToSocketAddrs>(addr: A, prog: u32, vers: u32, timeout: Duration) -> Result<Self> {
		let stream = connect_stream(addr, timeout)?;
		stream.set_read_timeout(Some(timeout))?;
		stream.set_write_timeout(Some(timeout))?;
		stream.set_nodelay(true)?;
		Ok(Self{ stream, prog, vers, lastxid: 0, packer: xdr::Packer::new(), unpacker: xdr::Unpacker::new() })
	}

	pub fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
		self.stream.set_read_timeout(Some(timeout))?;
		self.stream.set_write_timeout(Some(timeout))?;
		Ok(())
	}

	// Bump the transaction id and leave a fresh call header in the packer
	pub fn start_call(&mut self, prc: u32) -> Result<()> {
		self.lastxid = self.lastxid.wrapping_add(1);
		self.packer.reset();
		xdr_pack::pack_callheader_no_auth(&mut self.packer, self.lastxid, self.prog, self.vers, prc)
	}

	// Send whatever is in the packer as a single record and load the matching reply into the unpacker,
	// positioned just past the reply header
	pub fn do_call(&mut self) -> Result<()> {
		let call = self.packer.get_buf();
		if !call.is_empty() {
			let header:u32 = call.len() as u32 | LAST_FRAGMENT;

			let mut send_bytes:Vec<u8> = Vec::with_capacity(call.len() + 4);
			send_bytes.write_u32::<BigEndian>(header)?;
			send_bytes.extend_from_slice(call);
			self.stream.write_all(&send_bytes)?;
		}

		loop {
			let reply = read_record(&mut self.stream)?;

			// Load the response into the unpacker and make sure the xid matches
			self.unpacker.reset(&reply);

			let (xid, _) = xdr_unpack::unpack_replyheader(&mut self.unpacker)?;
			if xid == self.lastxid {
				// Packet from the present
				return Ok(());
			} else if xid < self.lastxid {
				// Packet from the past
				log::debug!("Discarding stale RPC reply xid={} (expecting {})", xid, self.lastxid);
				continue;
			} else {
				return Err(ScopeError::Rpc(format!("Reply xid {} is ahead of the last call {}", xid, self.lastxid)));
			}
		}
	}

}

// Reassemble one record-marked RPC message from its fragments
pub fn read_record<R: Read>(rdr: &mut R) -> Result<Vec<u8>> {
	let mut reply:Vec<u8> = vec![];

	let mut last:bool = false;
	while !last {
		let x:u32 = rdr.read_u32::<BigEndian>()?;

		last = (x & LAST_FRAGMENT) != 0;
		let n = (x & !LAST_FRAGMENT) as usize;

		let start = reply.len();
		(&mut *rdr).take(n as u64).read_to_end(&mut reply)?;
		let got = reply.len() - start;
		if got < n {
			return Err(ScopeError::Rpc(format!("Record fragment declares {} bytes but only {} arrived", n, got)));
		}
	}

	Ok(reply)
}
