
use crate::error::{Result, ScopeError};
use crate::xdr::Unpacker;
use crate::rpc::{REPLY, MSG_DENIED, RPC_MISMATCH, AUTH_ERROR, MSG_ACCEPTED, PROG_UNAVAIL, PROG_MISMATCH, PROC_UNAVAIL, GARBAGE_ARGS, SUCCESS};

fn rpc_err(msg:&str) -> ScopeError { ScopeError::Rpc(msg.to_owned()) }

pub fn unpack_auth(unpacker:&mut Unpacker) -> Result<(i32, Vec<u8>)> {
	let flavor:i32    = unpacker.unpack_enum()?;
	let stuff:Vec<u8> = unpacker.unpack_variable_len_opaque()?;
	Ok((flavor, stuff))
}

pub fn unpack_replyheader(unpacker:&mut Unpacker) -> Result<(u32, (i32, Vec<u8>))> {
	let xid:u32 = unpacker.unpack_u32()?;

	let mtype:i32 = unpacker.unpack_enum()?;
	if mtype != REPLY { return Err(rpc_err("Expected REPLY message type")); }

	match unpacker.unpack_enum()? {
		MSG_DENIED => {
			match unpacker.unpack_enum()? {
				RPC_MISMATCH => {
					let low  = unpacker.unpack_u32()?;
					let high = unpacker.unpack_u32()?;
					return Err(ScopeError::Rpc(format!("Message denied, server supports RPC versions {} to {}", low, high)))
				},
				AUTH_ERROR => {
					let stat = unpacker.unpack_u32()?;
					return Err(ScopeError::Rpc(format!("Message denied due to AUTH_ERROR (status {})", stat)))
				}
				_ => return Err(rpc_err("Message denied for an unknown reason")),
			}
		},
		MSG_ACCEPTED => { },
		_            => return Err(rpc_err("Neither MSG_DENIED nor MSG_ACCEPTED in reply")),
	}

	let verf = unpack_auth(unpacker)?;

	match unpacker.unpack_enum()? {
		SUCCESS       => { },
		PROG_UNAVAIL  => return Err(rpc_err("Program unavailable")),
		PROG_MISMATCH => {
			unpacker.unpack_u32()?;	// This u32 gives the low value
			unpacker.unpack_u32()?;	// This u32 gives the high value
			return Err(rpc_err("Program version mismatch"))
		},
		PROC_UNAVAIL  => return Err(rpc_err("Procedure unavailable")),
		GARBAGE_ARGS  => return Err(rpc_err("Server could not decode the call arguments")),
		_ => return Err(rpc_err("Call failed for unknown reason")),
	}

	Ok((xid, verf))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::rpc::xdr_pack::pack_replyheader;
	use crate::xdr::Packer;

	#[test]
	fn accepted_reply_yields_xid() {
		let mut p = Packer::new();
		pack_replyheader(&mut p, 42, (0, &[])).unwrap();
		p.pack_u32(111).unwrap();

		let mut u = Unpacker::new();
		u.reset(p.get_buf());
		let (xid, (flavor, _)) = unpack_replyheader(&mut u).unwrap();
		assert_eq!(xid, 42);
		assert_eq!(flavor, 0);
		assert_eq!(u.unpack_u32().unwrap(), 111);
	}

	#[test]
	fn denied_reply_is_an_error() {
		let mut p = Packer::new();
		p.pack_u32(1).unwrap();
		p.pack_enum(REPLY).unwrap();
		p.pack_enum(MSG_DENIED).unwrap();
		p.pack_enum(AUTH_ERROR).unwrap();
		p.pack_u32(2).unwrap();

		let mut u = Unpacker::new();
		u.reset(p.get_buf());
		assert!(matches!(unpack_replyheader(&mut u), Err(ScopeError::Rpc(_))));
	}
}
