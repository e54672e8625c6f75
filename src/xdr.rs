
use std::io::Cursor;

use byteorder::{BigEndian, WriteBytesExt, ReadBytesExt};

use crate::error::{Result, ScopeError};

fn rpc_err(msg:&str) -> ScopeError { ScopeError::Rpc(msg.to_owned()) }

#[derive(Default)]
pub struct Packer {
	pub buff:Vec<u8>
}

// Reads from the front of the buffer by advancing a position instead of shifting bytes out, so unpacking
// a multi-megabyte curve transfer stays linear
#[derive(Default)]
pub struct Unpacker {
	buff:Vec<u8>,
	pos:usize,
}

impl Packer {

	pub fn new() -> Self { Packer{buff: Vec::new()} }

	pub fn reset(&mut self) { self.buff.clear(); }

	pub fn get_buf(&self) -> &[u8] { &self.buff }

	// Packing methods that can only add multiples of four bytes, so if we started off with the correct
	// padding, we'll end up with the correct padding
	pub fn pack_u32(&mut self, x:u32) -> Result<()> { Ok(self.buff.write_u32::<BigEndian>(x)?) }
	pub fn pack_i32(&mut self, x:i32) -> Result<()> { Ok(self.buff.write_i32::<BigEndian>(x)?) }

	pub fn pack_bool(&mut self, b:bool) -> Result<()> {
		if b { self.pack_i32(1) }
		else { self.pack_i32(0) }
	}

	pub fn pack_enum(&mut self, x:i32) -> Result<()> { self.pack_i32(x) }

	// Packing methods that require padding checks at the end
	pub fn pack_variable_len_opaque(&mut self, data:&[u8]) -> Result<()> {
		self.pack_u32(data.len() as u32)?;
		self.buff.extend_from_slice(data);

		// Ensure alignment
		while self.buff.len() % 4 != 0 { self.buff.push(0); }
		Ok(())
	}

}

impl Unpacker {

	pub fn new() -> Self { Unpacker{buff: Vec::new(), pos: 0} }

	pub fn reset(&mut self, data:&[u8]) {
		self.buff.clear();
		self.buff.extend_from_slice(data);
		self.pos = 0;
	}

	pub fn remaining(&self) -> usize { self.buff.len() - self.pos }

	pub fn all_data_consumed(&self) -> bool { self.remaining() == 0 }

	pub fn skip(&mut self, n:usize) -> Result<()> {
		if n%4 != 0 {
			return Err(rpc_err("Only skip multiples of four bytes in order to maintain alignment"));
		}
		if n > self.remaining() {
			return Err(rpc_err("Tried to skip past the end of the buffer"));
		}
		self.pos += n;
		Ok(())
	}

	pub fn unpack_u32(&mut self) -> Result<u32> {
		let mut rdr = Cursor::new(&self.buff[self.pos..]);
		let ans:u32 = rdr.read_u32::<BigEndian>().map_err(|_| rpc_err("Reply ended while unpacking u32"))?;
		self.skip(4)?;
		Ok(ans)
	}

	pub fn unpack_i32(&mut self) -> Result<i32> {
		let mut rdr = Cursor::new(&self.buff[self.pos..]);
		let ans:i32 = rdr.read_i32::<BigEndian>().map_err(|_| rpc_err("Reply ended while unpacking i32"))?;
		self.skip(4)?;
		Ok(ans)
	}

	// An enum is just an i32 with a restricted set of values.  We can't check that this value is in the restricted set at this
	// level because it depends on the application, so for our purposes here, an enum is the same as an i32
	pub fn unpack_enum(&mut self) -> Result<i32> { self.unpack_i32() }

	pub fn unpack_bool(&mut self) -> Result<bool> {
		match self.unpack_i32()? {
			0 => Ok(false),
			1 => Ok(true),
			x => Err(ScopeError::Rpc(format!("Expected 0 or 1 in unpack_bool but got {}", x))),
		}
	}

	pub fn unpack_variable_len_opaque(&mut self) -> Result<Vec<u8>> {
		let n = self.unpack_u32()? as usize;
		if n > self.remaining() {
			return Err(rpc_err("Opaque length runs past the end of the reply"));
		}
		let ans:Vec<u8> = self.buff[self.pos..self.pos+n].to_vec();
		self.pos += n;

		// Skip padding to the next four byte boundary
		let padded = (n + 3) & !3;
		self.pos = (self.pos + padded - n).min(self.buff.len());
		Ok(ans)
	}

}
