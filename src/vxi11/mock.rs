// In-process port mapper and VXI-11 core server, so the client can be driven over real sockets in tests

use std::collections::HashMap;
use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

use byteorder::{BigEndian, WriteBytesExt};

use crate::rpc::LAST_FRAGMENT;
use crate::rpc::port_mapping::PMAPPROC_GETPORT;
use crate::rpc::tcp_clients::read_record;
use crate::rpc::xdr_pack::pack_replyheader;
use crate::xdr::{Packer, Unpacker};

use super::{CREATE_LINK, DESTROY_LINK, DEVICE_READ, DEVICE_WRITE, OPERATION_FLAGS_END, REASON_END, REASON_REQCNT};

pub const LINK_ID:i32 = 7;

#[derive(Debug, Default)]
pub struct Activity {
	pub device: String,
	// Every device_write payload with its flags, in arrival order
	pub chunks: Vec<(Vec<u8>, i32)>,
	pub commands: Vec<String>,
	pub destroyed: usize,
}

pub struct MockInstrument {
	pub portmapper_port: u16,
	pub activity: Arc<Mutex<Activity>>,
}

impl MockInstrument {

	/// Serve one client. Queries listed in `replies` are answered `read_chunk` bytes per device_read;
	/// any other query makes the next read fail with device error 15 (I/O timeout).
	pub fn spawn(max_recv_size:u32, read_chunk:usize, replies:&[(&str, &[u8])]) -> Self {
		let pmap = TcpListener::bind("127.0.0.1:0").unwrap();
		let portmapper_port = pmap.local_addr().unwrap().port();
		let core = TcpListener::bind("127.0.0.1:0").unwrap();
		let core_port = core.local_addr().unwrap().port();

		thread::spawn(move || {
			if let Ok((stream, _)) = pmap.accept() {
				serve(stream, |prc, _, reply| {
					assert_eq!(prc, PMAPPROC_GETPORT);
					reply.pack_u32(core_port as u32).unwrap();
				});
			}
		});

		let activity = Arc::new(Mutex::new(Activity::default()));
		let log = activity.clone();
		let replies:HashMap<String, Vec<u8>> = replies.iter().map(|(c, r)| (c.to_string(), r.to_vec())).collect();

		thread::spawn(move || {
			let (stream, _) = match core.accept() {
				Ok(conn) => conn,
				Err(_) => return,
			};
			let mut message:Vec<u8> = vec![];
			let mut pending:Option<Vec<u8>> = None;

			serve(stream, |prc, args, reply| match prc {
				CREATE_LINK => {
					let _client_id = args.unpack_i32().unwrap();
					let _lock = args.unpack_bool().unwrap();
					let _lock_timeout = args.unpack_u32().unwrap();
					let device = args.unpack_variable_len_opaque().unwrap();
					log.lock().unwrap().device = String::from_utf8_lossy(&device).into_owned();

					reply.pack_i32(0).unwrap();
					reply.pack_i32(LINK_ID).unwrap();
					reply.pack_u32(0).unwrap();
					reply.pack_u32(max_recv_size).unwrap();
				},
				DEVICE_WRITE => {
					assert_eq!(args.unpack_i32().unwrap(), LINK_ID);
					args.skip(8).unwrap();
					let flags = args.unpack_i32().unwrap();
					let data = args.unpack_variable_len_opaque().unwrap();

					let mut log = log.lock().unwrap();
					log.chunks.push((data.clone(), flags));
					message.extend_from_slice(&data);
					if flags & OPERATION_FLAGS_END != 0 {
						let command = String::from_utf8_lossy(&message).trim_end().to_owned();
						if command.contains('?') {
							pending = replies.get(&command).cloned();
						}
						log.commands.push(command);
						message.clear();
					}

					reply.pack_i32(0).unwrap();
					reply.pack_u32(data.len() as u32).unwrap();
				},
				DEVICE_READ => match pending.take() {
					Some(mut out) => {
						let n = read_chunk.min(out.len());
						let chunk:Vec<u8> = out.drain(..n).collect();
						let reason = if out.is_empty() { REASON_END } else { pending = Some(out); REASON_REQCNT };

						reply.pack_i32(0).unwrap();
						reply.pack_i32(reason).unwrap();
						reply.pack_variable_len_opaque(&chunk).unwrap();
					},
					None => {
						reply.pack_i32(15).unwrap();
						reply.pack_i32(0).unwrap();
						reply.pack_variable_len_opaque(&[]).unwrap();
					},
				},
				DESTROY_LINK => {
					log.lock().unwrap().destroyed += 1;
					reply.pack_i32(0).unwrap();
				},
				other => panic!("Unexpected procedure {}", other),
			});
		});

		Self{ portmapper_port, activity }
	}

}

// Answer record-marked calls until the client hangs up
fn serve<F: FnMut(u32, &mut Unpacker, &mut Packer)>(mut stream:TcpStream, mut handler:F) {
	let mut args = Unpacker::new();
	let mut reply = Packer::new();

	while let Ok(record) = read_record(&mut stream) {
		args.reset(&record);
		let xid = args.unpack_u32().unwrap();
		args.skip(16).unwrap();	// mtype, rpcvers, prog, vers
		let prc = args.unpack_u32().unwrap();
		for _ in 0..2 {
			args.unpack_enum().unwrap();
			args.unpack_variable_len_opaque().unwrap();
		}

		reply.reset();
		pack_replyheader(&mut reply, xid, (0, &[])).unwrap();
		handler(prc, &mut args, &mut reply);

		let body = reply.get_buf();
		let mut wire:Vec<u8> = Vec::with_capacity(body.len() + 4);
		wire.write_u32::<BigEndian>(body.len() as u32 | LAST_FRAGMENT).unwrap();
		wire.extend_from_slice(body);
		if stream.write_all(&wire).is_err() { break; }
	}
}
