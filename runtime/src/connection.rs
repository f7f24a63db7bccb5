//! Per-connection framing: a growable receive buffer that accumulates bytes
//! until a complete frame is available, and a pending write queue for
//! responses the kernel wasn't ready to take in one shot.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};

use wire::HEADER_LEN;

/// Anything the reactor can multiplex as a connected peer: a `TcpStream` or
/// a `UnixStream`, both of which are `Read + Write + AsRawFd` already.
pub trait Stream: Read + Write + AsRawFd {}
impl<T: Read + Write + AsRawFd> Stream for T {}

/// Result of feeding readiness to a connection: whether it is still open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
	Open,
	Closed,
}

/// What the dispatch closure did with one decoded request frame. The codec
/// rejects a malformed frame before a packet exists to route, but the
/// dispatcher itself can still hit a fatal condition (e.g. a response-shaped
/// frame arriving as a request) that calls for the same "close, no
/// response" policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
	/// One encoded response frame to queue for the peer.
	Response(Vec<u8>),
	/// The request was handled but produces no response of its own; nothing
	/// is queued.
	NoResponse,
	/// Fatal condition (a malformed packet, or an opcode arriving in the
	/// wrong direction): tear down the connection without sending anything.
	Close,
}

/// Initial receive-buffer capacity. Grows past this via `Vec`'s own
/// amortized-doubling growth once a frame outgrows it.
const INITIAL_RECV_CAPACITY: usize = 2048;

pub struct Connection {
	stream: Box<dyn Stream>,
	recv: Vec<u8>,
	write_queue: VecDeque<Vec<u8>>,
}

impl Connection {
	pub fn new(stream: Box<dyn Stream>) -> Self {
		Self { stream, recv: Vec::with_capacity(INITIAL_RECV_CAPACITY), write_queue: VecDeque::new() }
	}

	pub fn fd(&self) -> RawFd {
		self.stream.as_raw_fd()
	}

	pub fn has_pending_writes(&self) -> bool {
		!self.write_queue.is_empty()
	}

	/// Reads everything currently available, extracting and dispatching
	/// every complete frame as it becomes available (a connection may carry
	/// several pipelined requests in one readiness event). `dispatch` turns
	/// one decoded request frame into a [`DispatchOutcome`]; a `Close`
	/// outcome tears the connection down without looking at any bytes still
	/// buffered behind it.
	pub fn readable(&mut self, dispatch: &mut dyn FnMut(&[u8]) -> DispatchOutcome) -> io::Result<Flow> {
		let mut buf = [0u8; 4096];

		loop {
			match self.stream.read(&mut buf) {
				Ok(0) => return Ok(Flow::Closed),
				Ok(n) => {
					self.recv.extend_from_slice(&buf[..n]);
					if self.drain_frames(dispatch) == Flow::Closed {
						return Ok(Flow::Closed);
					}
				}
				Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Flow::Open),
				Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
				Err(e) => return Err(e),
			}
		}
	}

	fn drain_frames(&mut self, dispatch: &mut dyn FnMut(&[u8]) -> DispatchOutcome) -> Flow {
		loop {
			if self.recv.len() < HEADER_LEN {
				return Flow::Open;
			}

			let mut prefix = [0u8; HEADER_LEN];
			prefix.copy_from_slice(&self.recv[..HEADER_LEN]);
			let body_len = wire::packet::Packet::peek_body_len(&prefix) as usize;
			let frame_len = HEADER_LEN + body_len;

			if self.recv.len() < frame_len {
				return Flow::Open;
			}

			let outcome = dispatch(&self.recv[..frame_len]);
			self.recv.drain(..frame_len);

			match outcome {
				DispatchOutcome::Response(bytes) => self.write_queue.push_back(bytes),
				DispatchOutcome::NoResponse => {}
				DispatchOutcome::Close => return Flow::Closed,
			}
		}
	}

	/// Flushes as much of the write queue as the kernel will currently
	/// accept. Responses are sent in the order they were queued, which by
	/// construction is the order their requests were decoded, preserving
	/// per-connection response ordering.
	pub fn writable(&mut self) -> io::Result<Flow> {
		while let Some(front) = self.write_queue.front_mut() {
			match self.stream.write(front) {
				Ok(0) => return Ok(Flow::Closed),
				Ok(n) if n == front.len() => {
					self.write_queue.pop_front();
				}
				Ok(n) => {
					front.drain(..n);
				}
				Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Flow::Open),
				Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
				Err(e) => return Err(e),
			}
		}

		Ok(Flow::Open)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Cursor;

	/// An in-memory `Stream` stand-in: readable bytes come from a fixed
	/// buffer, written bytes accumulate into a `Vec`, never blocks.
	struct MemStream {
		read: Cursor<Vec<u8>>,
		written: Vec<u8>,
	}

	impl Read for MemStream {
		fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
			self.read.read(buf)
		}
	}

	impl Write for MemStream {
		fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
			self.written.extend_from_slice(buf);
			Ok(buf.len())
		}
		fn flush(&mut self) -> io::Result<()> {
			Ok(())
		}
	}

	impl AsRawFd for MemStream {
		fn as_raw_fd(&self) -> RawFd {
			0
		}
	}

	#[test]
	fn drains_a_frame_split_across_two_reads() {
		use wire::packet::Packet;

		let frame = Packet::Ack { status: wire::Status::Ok }.encode();
		let (first, second) = frame.split_at(2);

		let mut calls = 0;
		let mut dispatch = |_: &[u8]| {
			calls += 1;
			DispatchOutcome::NoResponse
		};

		let mut conn = Connection::new(Box::new(MemStream { read: Cursor::new(first.to_vec()), written: Vec::new() }));
		assert_eq!(conn.readable(&mut dispatch).unwrap(), Flow::Open);
		assert_eq!(calls, 0);

		conn.recv.extend_from_slice(second);
		conn.drain_frames(&mut dispatch);
		assert_eq!(calls, 1);
	}

	#[test]
	fn pipelined_frames_are_each_dispatched_once() {
		use wire::packet::Packet;

		let one = Packet::Ack { status: wire::Status::Ok }.encode();
		let two = Packet::Ack { status: wire::Status::NotFound }.encode();
		let mut both = one.clone();
		both.extend_from_slice(&two);

		let mut seen = Vec::new();
		let mut dispatch = |frame: &[u8]| {
			seen.push(frame.to_vec());
			DispatchOutcome::NoResponse
		};

		let mut conn = Connection::new(Box::new(MemStream { read: Cursor::new(both), written: Vec::new() }));
		conn.readable(&mut dispatch).unwrap();

		assert_eq!(seen, vec![one, two]);
	}

	#[test]
	fn close_outcome_tears_down_the_connection_without_draining_further_frames() {
		use wire::packet::Packet;

		let one = Packet::Ack { status: wire::Status::Ok }.encode();
		let two = Packet::Ack { status: wire::Status::NotFound }.encode();
		let mut both = one.clone();
		both.extend_from_slice(&two);

		let mut calls = 0;
		let mut dispatch = |_: &[u8]| {
			calls += 1;
			DispatchOutcome::Close
		};

		let mut conn = Connection::new(Box::new(MemStream { read: Cursor::new(both), written: Vec::new() }));
		assert_eq!(conn.readable(&mut dispatch).unwrap(), Flow::Closed);
		assert_eq!(calls, 1);
	}

	#[test]
	fn writable_drains_queue_in_order() {
		let conn_stream = MemStream { read: Cursor::new(Vec::new()), written: Vec::new() };
		let mut conn = Connection::new(Box::new(conn_stream));
		conn.write_queue.push_back(vec![1, 2, 3]);
		conn.write_queue.push_back(vec![4, 5]);

		assert_eq!(conn.writable().unwrap(), Flow::Open);
		assert!(!conn.has_pending_writes());
	}
}
