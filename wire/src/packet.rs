//! The length-prefixed, opcode-tagged wire packet: header byte, `u32` body
//! length, opcode-specific body.

use bilge::prelude::*;
use utils::Error;

use crate::packer::{Reader, Writer};

/// Bytes 0..5 of every frame: one header byte, then a big-endian `u32` body
/// length. Modeled as a `bilge` bitfield, the one place the protocol packs
/// sub-byte fields.
#[bitsize(8)]
#[derive(Clone, Copy, FromBits)]
struct HeaderByte {
	reserved: u1,
	status: u2,
	opcode: u4,
	kind: bool,
}

pub const HEADER_LEN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
	CreateTs = 0,
	DeleteTs = 1,
	AddPoints = 2,
	Query = 3,
	QueryResponse = 4,
	Ack = 5,
}

impl Opcode {
	fn from_u8(v: u8) -> Result<Self, Error> {
		Ok(match v {
			0 => Opcode::CreateTs,
			1 => Opcode::DeleteTs,
			2 => Opcode::AddPoints,
			3 => Opcode::Query,
			4 => Opcode::QueryResponse,
			5 => Opcode::Ack,
			other => return Err(Error::Malformed(format!("unrecognized opcode {other}"))),
		})
	}
}

/// The two-bit response status field. Reserved (0) on requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
	Ok = 0,
	NotFound = 1,
	UnknownCmd = 2,
	Oom = 3,
}

impl Status {
	fn from_u8(v: u8) -> Self {
		match v & 0b11 {
			0 => Status::Ok,
			1 => Status::NotFound,
			2 => Status::UnknownCmd,
			_ => Status::Oom,
		}
	}
}

/// An owned `(label, value)` pair.
pub type Label = (String, String);

/// One sample as carried in an ADDPOINTS request.
#[derive(Debug, Clone, PartialEq)]
pub struct InPoint {
	pub value: f64,
	/// `None` when the client did not supply this component; the server
	/// fills it from the wall clock.
	pub ts_sec: Option<u64>,
	pub ts_nsec: Option<u64>,
	pub labels: Vec<Label>,
}

/// One sample as carried in a QUERY_RESPONSE.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
	pub rc: Status,
	pub ts_sec: u64,
	pub ts_nsec: u64,
	pub value: f64,
	pub labels: Vec<Label>,
}

/// Fields of a decoded QUERY request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryFields {
	pub mean_window_ms: Option<u64>,
	pub first: bool,
	pub last: bool,
	pub major_of: Option<u64>,
	pub minor_of: Option<u64>,
	pub filter: Vec<Label>,
}

/// The decoded, opcode-tagged packet. Request/response direction and status
/// are implicit in which variant is produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
	CreateTs { name: String, retention_ms: u32 },
	DeleteTs { name: String },
	AddPoints { name: String, points: Vec<InPoint> },
	Query { name: String, fields: QueryFields },
	QueryResponse { status: Status, rows: Vec<ResultRow> },
	Ack { status: Status },
}

mod flags {
	pub const MEAN: u8 = 1 << 0;
	pub const FIRST: u8 = 1 << 1;
	pub const LAST: u8 = 1 << 2;
	pub const MAJOR_OF: u8 = 1 << 3;
	pub const MINOR_OF: u8 = 1 << 4;
	pub const FILTER: u8 = 1 << 5;

	pub const TS_SEC: u8 = 1 << 0;
	pub const TS_NSEC: u8 = 1 << 1;
}

fn put_label(w: &mut Writer, (k, v): &(String, String)) {
	w.put_str16(k.as_bytes());
	w.put_str16(v.as_bytes());
}

fn get_label(r: &mut Reader) -> Result<Label, Error> {
	let k = std::str::from_utf8(r.get_str16()?).map_err(|e| Error::Malformed(e.to_string()))?.to_owned();
	let v = std::str::from_utf8(r.get_str16()?).map_err(|e| Error::Malformed(e.to_string()))?.to_owned();
	Ok((k, v))
}

fn get_name8(r: &mut Reader) -> Result<String, Error> {
	std::str::from_utf8(r.get_str8()?).map(str::to_owned).map_err(|e| Error::Malformed(e.to_string()))
}

impl Packet {
	fn opcode(&self) -> Opcode {
		match self {
			Packet::CreateTs { .. } => Opcode::CreateTs,
			Packet::DeleteTs { .. } => Opcode::DeleteTs,
			Packet::AddPoints { .. } => Opcode::AddPoints,
			Packet::Query { .. } => Opcode::Query,
			Packet::QueryResponse { .. } => Opcode::QueryResponse,
			Packet::Ack { .. } => Opcode::Ack,
		}
	}

	/// `true` for responses (QUERY_RESPONSE, ACK), `false` for requests.
	fn is_response(&self) -> bool {
		matches!(self, Packet::QueryResponse { .. } | Packet::Ack { .. })
	}

	fn status(&self) -> Status {
		match self {
			Packet::QueryResponse { status, .. } | Packet::Ack { status } => *status,
			_ => Status::Ok,
		}
	}

	fn encode_body(&self, w: &mut Writer) {
		match self {
			Packet::CreateTs { name, retention_ms } => {
				w.put_str8(name.as_bytes());
				w.put_u32(*retention_ms);
			}
			Packet::DeleteTs { name } => {
				w.put_str8(name.as_bytes());
			}
			Packet::AddPoints { name, points } => {
				w.put_str8(name.as_bytes());
				for p in points {
					let mut f = 0u8;
					if p.ts_sec.is_some() {
						f |= flags::TS_SEC;
					}
					if p.ts_nsec.is_some() {
						f |= flags::TS_NSEC;
					}
					w.put_u8(f);
					w.put_f64(p.value);
					if let Some(s) = p.ts_sec {
						w.put_u64(s);
					}
					if let Some(n) = p.ts_nsec {
						w.put_u64(n);
					}
					w.put_u16(p.labels.len() as u16);
					for l in &p.labels {
						put_label(w, l);
					}
				}
			}
			Packet::Query { name, fields } => {
				w.put_str8(name.as_bytes());
				let mut qf = 0u8;
				if fields.mean_window_ms.is_some() {
					qf |= flags::MEAN;
				}
				if fields.first {
					qf |= flags::FIRST;
				}
				if fields.last {
					qf |= flags::LAST;
				}
				if fields.major_of.is_some() {
					qf |= flags::MAJOR_OF;
				}
				if fields.minor_of.is_some() {
					qf |= flags::MINOR_OF;
				}
				if !fields.filter.is_empty() {
					qf |= flags::FILTER;
				}
				w.put_u8(qf);
				if let Some(win) = fields.mean_window_ms {
					w.put_u64(win);
				}
				if let Some(m) = fields.major_of {
					w.put_u64(m);
				}
				if let Some(m) = fields.minor_of {
					w.put_u64(m);
				}
				for l in &fields.filter {
					put_label(w, l);
				}
			}
			Packet::QueryResponse { rows, .. } => {
				for row in rows {
					w.put_u8(row.rc as u8);
					w.put_u64(row.ts_sec);
					w.put_u64(row.ts_nsec);
					w.put_f64(row.value);
					w.put_u16(row.labels.len() as u16);
					for l in &row.labels {
						put_label(w, l);
					}
				}
			}
			Packet::Ack { .. } => {}
		}
	}

	/// Encodes header + length + body in one pass.
	pub fn encode(&self) -> Vec<u8> {
		let mut body = Writer::new();
		self.encode_body(&mut body);
		let body = body.into_vec();

		let header = HeaderByte::new(u1::new(0), u2::new(self.status() as u8), u4::new(self.opcode() as u8), self.is_response());

		let mut w = Writer::with_capacity(HEADER_LEN + body.len());
		w.put_u8(u8::from(header));
		w.put_u32(body.len() as u32);
		w.put_bytes(&body);
		w.into_vec()
	}

	/// Reads the 5-byte framing prefix and returns the declared body
	/// length, so the connection layer knows how many more bytes to read
	/// before a full frame is available.
	pub fn peek_body_len(prefix: &[u8; HEADER_LEN]) -> u32 {
		u32::from_be_bytes([prefix[1], prefix[2], prefix[3], prefix[4]])
	}

	/// Decodes one complete frame (header + length + body, no trailing
	/// bytes). Fails with [`Error::Malformed`] when the declared length
	/// does not match `frame`'s actual length, the opcode is unrecognized,
	/// or a field inside the body overruns the declared body length.
	pub fn decode(frame: &[u8]) -> Result<Packet, Error> {
		let mut r = Reader::new(frame);
		let header_byte = r.get_u8()?;
		let header = HeaderByte::from(header_byte);
		let body_len = r.get_u32()? as usize;

		if r.remaining() != body_len {
			log::debug!("rejecting frame: declared body length {body_len} but {} bytes available", r.remaining());
			return Err(Error::Malformed(format!("declared body length {body_len} does not match frame ({} bytes available)", r.remaining())));
		}

		let opcode = Opcode::from_u8(header.opcode().value())?;
		let status = Status::from_u8(header.status().value());
		let is_response = header.kind();

		let packet = match (opcode, is_response) {
			(Opcode::CreateTs, false) => {
				let name = get_name8(&mut r)?;
				let retention_ms = r.get_u32()?;
				Packet::CreateTs { name, retention_ms }
			}
			(Opcode::DeleteTs, false) => Packet::DeleteTs { name: get_name8(&mut r)? },
			(Opcode::AddPoints, false) => {
				let name = get_name8(&mut r)?;
				let mut points = Vec::new();
				while r.remaining() > 0 {
					let f = r.get_u8()?;
					let value = r.get_f64()?;
					let ts_sec = if f & flags::TS_SEC != 0 { Some(r.get_u64()?) } else { None };
					let ts_nsec = if f & flags::TS_NSEC != 0 { Some(r.get_u64()?) } else { None };
					let n = r.get_u16()?;
					let labels = (0..n).map(|_| get_label(&mut r)).collect::<Result<_, _>>()?;
					points.push(InPoint { value, ts_sec, ts_nsec, labels });
				}
				Packet::AddPoints { name, points }
			}
			(Opcode::Query, false) => {
				let name = get_name8(&mut r)?;
				let qf = r.get_u8()?;
				let mut fields = QueryFields {
					first: qf & flags::FIRST != 0,
					last: qf & flags::LAST != 0,
					..Default::default()
				};
				if qf & flags::MEAN != 0 {
					fields.mean_window_ms = Some(r.get_u64()?);
				}
				if qf & flags::MAJOR_OF != 0 {
					fields.major_of = Some(r.get_u64()?);
				}
				if qf & flags::MINOR_OF != 0 {
					fields.minor_of = Some(r.get_u64()?);
				}
				if qf & flags::FILTER != 0 {
					while r.remaining() > 0 {
						fields.filter.push(get_label(&mut r)?);
					}
				}
				Packet::Query { name, fields }
			}
			(Opcode::QueryResponse, true) => {
				let mut rows = Vec::new();
				while r.remaining() > 0 {
					let rc = Status::from_u8(r.get_u8()?);
					let ts_sec = r.get_u64()?;
					let ts_nsec = r.get_u64()?;
					let value = r.get_f64()?;
					let n = r.get_u16()?;
					let labels = (0..n).map(|_| get_label(&mut r)).collect::<Result<_, _>>()?;
					rows.push(ResultRow { rc, ts_sec, ts_nsec, value, labels });
				}
				Packet::QueryResponse { status, rows }
			}
			(Opcode::Ack, true) => Packet::Ack { status },
			(op, kind) => return Err(Error::Malformed(format!("opcode {op:?} is not valid for a {} frame", if kind { "response" } else { "request" }))),
		};

		if r.remaining() != 0 {
			return Err(Error::Malformed(format!("{} unread trailing bytes in body", r.remaining())));
		}

		Ok(packet)
	}
}
