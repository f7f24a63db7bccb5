//! Primitive big-endian integer/real encoding and decoding, plus a small
//! variadic format-string pack/unpack facility mirroring a C-style
//! `pack(fmt, ...)`/`unpack(fmt, ...)` pair.
//!
//! [`Writer`]/[`Reader`] are what the packet codec (`crate::packet`) actually
//! uses to build and consume wire bodies; [`fmt`] is the more general,
//! format-string-driven facility and is exercised by its own tests.

use utils::Error;

/// Appends big-endian primitives to an owned byte buffer.
#[derive(Default)]
pub struct Writer {
	buf: Vec<u8>,
}

impl Writer {
	pub fn new() -> Self {
		Self { buf: Vec::new() }
	}

	pub fn with_capacity(cap: usize) -> Self {
		Self { buf: Vec::with_capacity(cap) }
	}

	pub fn len(&self) -> usize {
		self.buf.len()
	}

	pub fn is_empty(&self) -> bool {
		self.buf.is_empty()
	}

	pub fn put_u8(&mut self, v: u8) -> &mut Self {
		self.buf.push(v);
		self
	}

	pub fn put_u16(&mut self, v: u16) -> &mut Self {
		self.buf.extend_from_slice(&v.to_be_bytes());
		self
	}

	pub fn put_u32(&mut self, v: u32) -> &mut Self {
		self.buf.extend_from_slice(&v.to_be_bytes());
		self
	}

	pub fn put_u64(&mut self, v: u64) -> &mut Self {
		self.buf.extend_from_slice(&v.to_be_bytes());
		self
	}

	pub fn put_f64(&mut self, v: f64) -> &mut Self {
		self.buf.extend_from_slice(&v.to_be_bytes());
		self
	}

	/// Raw bytes, no length prefix.
	pub fn put_bytes(&mut self, b: &[u8]) -> &mut Self {
		self.buf.extend_from_slice(b);
		self
	}

	/// `u8` length prefix followed by `b`. Debug-asserts `b` fits in a
	/// `u8` length; callers reject names over 255 bytes before reaching
	/// the codec.
	pub fn put_str8(&mut self, b: &[u8]) -> &mut Self {
		debug_assert!(b.len() <= u8::MAX as usize);
		self.put_u8(b.len() as u8);
		self.put_bytes(b)
	}

	/// `u16` length prefix followed by `b`.
	pub fn put_str16(&mut self, b: &[u8]) -> &mut Self {
		debug_assert!(b.len() <= u16::MAX as usize);
		self.put_u16(b.len() as u16);
		self.put_bytes(b)
	}

	pub fn into_vec(self) -> Vec<u8> {
		self.buf
	}
}

/// Reads big-endian primitives out of a borrowed byte slice, advancing a
/// cursor. Every getter bounds-checks against the slice and returns
/// [`Error::Malformed`] on underrun.
pub struct Reader<'a> {
	buf: &'a [u8],
	pos: usize,
}

impl<'a> Reader<'a> {
	pub fn new(buf: &'a [u8]) -> Self {
		Self { buf, pos: 0 }
	}

	pub fn remaining(&self) -> usize {
		self.buf.len() - self.pos
	}

	pub fn pos(&self) -> usize {
		self.pos
	}

	fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
		if self.remaining() < n {
			return Err(Error::Malformed(format!("expected {n} more bytes, found {}", self.remaining())));
		}

		let (out, _) = self.buf[self.pos..].split_at(n);
		self.pos += n;
		Ok(out)
	}

	pub fn get_u8(&mut self) -> Result<u8, Error> {
		Ok(self.take(1)?[0])
	}

	pub fn get_u16(&mut self) -> Result<u16, Error> {
		Ok(u16::from_be_bytes(self.take(2)?.try_into().unwrap()))
	}

	pub fn get_u32(&mut self) -> Result<u32, Error> {
		Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
	}

	pub fn get_u64(&mut self) -> Result<u64, Error> {
		Ok(u64::from_be_bytes(self.take(8)?.try_into().unwrap()))
	}

	pub fn get_f64(&mut self) -> Result<f64, Error> {
		Ok(f64::from_be_bytes(self.take(8)?.try_into().unwrap()))
	}

	pub fn get_bytes(&mut self, n: usize) -> Result<&'a [u8], Error> {
		self.take(n)
	}

	/// `u8` length prefix followed by that many bytes.
	pub fn get_str8(&mut self) -> Result<&'a [u8], Error> {
		let n = self.get_u8()? as usize;
		self.get_bytes(n)
	}

	/// `u16` length prefix followed by that many bytes.
	pub fn get_str16(&mut self) -> Result<&'a [u8], Error> {
		let n = self.get_u16()? as usize;
		self.get_bytes(n)
	}
}

/// Converts an `f32` to IEEE-754 half-precision bits, truncating the
/// mantissa (round-toward-zero) and flushing subnormals to zero. Used
/// for the `f` format-string field.
pub fn f32_to_f16_bits(v: f32) -> u16 {
	let bits = v.to_bits();
	let sign = ((bits >> 16) & 0x8000) as u16;
	let exp = ((bits >> 23) & 0xff) as i32 - 127 + 15;
	let mant = bits & 0x7f_ffff;

	if exp <= 0 {
		// Subnormal or zero in f16: flush to signed zero for simplicity.
		return sign;
	}
	if exp >= 0x1f {
		// Overflow/NaN/Inf: saturate to infinity, preserving sign and NaN-ness.
		let nan_bit = if v.is_nan() { 0x0200 } else { 0 };
		return sign | 0x7c00 | nan_bit;
	}

	sign | ((exp as u16) << 10) | ((mant >> 13) as u16)
}

/// Converts IEEE-754 half-precision bits back to `f32`.
pub fn f16_bits_to_f32(bits: u16) -> f32 {
	let sign = (bits & 0x8000) as u32;
	let exp = (bits >> 10) & 0x1f;
	let mant = (bits & 0x3ff) as u32;

	let bits32 = if exp == 0 {
		sign << 16
	} else if exp == 0x1f {
		(sign << 16) | 0x7f80_0000 | (mant << 13)
	} else {
		let exp32 = (exp as u32) - 15 + 127;
		(sign << 16) | (exp32 << 23) | (mant << 13)
	};

	f32::from_bits(bits32)
}

/// The variadic format-string pack/unpack facility. Format characters:
/// `b/B, h/H, i/I, q/Q` for signed/unsigned 8/16/32/64-bit integers,
/// `f/d/g` for 16/32/64-bit reals, `s` for a byte slice whose length is
/// either a leading decimal prefix in the format string (`"10s"`) or,
/// absent a prefix, the most recently unpacked/packed integer field.
pub mod fmt {
	use super::{f16_bits_to_f32, f32_to_f16_bits, Reader, Writer};
	use utils::Error;

	/// One field of a packed record.
	#[derive(Debug, Clone, PartialEq)]
	pub enum Value {
		I8(i8),
		U8(u8),
		I16(i16),
		U16(u16),
		I32(i32),
		U32(u32),
		I64(i64),
		U64(u64),
		F16(f32),
		F32(f32),
		F64(f64),
		Bytes(Vec<u8>),
	}

	impl Value {
		fn as_len(&self) -> Option<usize> {
			match *self {
				Value::I8(n) => Some(n as usize),
				Value::U8(n) => Some(n as usize),
				Value::I16(n) => Some(n as usize),
				Value::U16(n) => Some(n as usize),
				Value::I32(n) => Some(n as usize),
				Value::U32(n) => Some(n as usize),
				Value::I64(n) => Some(n as usize),
				Value::U64(n) => Some(n as usize),
				_ => None,
			}
		}
	}

	/// Parses the leading decimal digits of `fmt`, returning `(value, rest)`.
	/// Returns `None` if `fmt` does not start with a digit.
	fn leading_len(fmt: &str) -> Option<(usize, &str)> {
		let digits = fmt.len() - fmt.trim_start_matches(|c: char| c.is_ascii_digit()).len();
		if digits == 0 {
			return None;
		}
		let (num, rest) = fmt.split_at(digits);
		num.parse().ok().map(|n| (n, rest))
	}

	pub fn pack(fmt: &str, values: &[Value]) -> Vec<u8> {
		let mut w = Writer::new();
		let mut rest = fmt;
		let mut vi = 0;

		while !rest.is_empty() {
			let (_, after_len) = leading_len(rest).unwrap_or((0, rest));
			let mut chars = after_len.char_indices();
			let (_, c) = chars.next().expect("format string ends mid-field");
			rest = &after_len[c.len_utf8()..];

			let v = &values[vi];
			vi += 1;

			match c {
				'b' => w.put_u8(v.as_len().unwrap() as u8),
				'B' => w.put_u8(v.as_len().unwrap() as u8),
				'h' => w.put_u16(v.as_len().unwrap() as u16),
				'H' => w.put_u16(v.as_len().unwrap() as u16),
				'i' => w.put_u32(v.as_len().unwrap() as u32),
				'I' => w.put_u32(v.as_len().unwrap() as u32),
				'q' => w.put_u64(v.as_len().unwrap() as u64),
				'Q' => w.put_u64(v.as_len().unwrap() as u64),
				'f' => match v {
					Value::F16(f) => w.put_u16(f32_to_f16_bits(*f)),
					_ => panic!("expected F16 value for 'f'"),
				},
				'd' => match v {
					Value::F32(f) => w.put_u32(f.to_bits()),
					_ => panic!("expected F32 value for 'd'"),
				},
				'g' => match v {
					Value::F64(f) => w.put_f64(*f),
					_ => panic!("expected F64 value for 'g'"),
				},
				's' => match v {
					Value::Bytes(b) => w.put_bytes(b),
					_ => panic!("expected Bytes value for 's'"),
				},
				other => panic!("unknown format character '{other}'"),
			};
		}

		w.into_vec()
	}

	pub fn unpack(fmt: &str, buf: &[u8]) -> Result<Vec<Value>, Error> {
		let mut r = Reader::new(buf);
		let mut out = Vec::new();
		let mut rest = fmt;
		let mut last_len: Option<usize> = None;

		while !rest.is_empty() {
			let prefix_len = leading_len(rest);
			let after_len = prefix_len.map(|(_, s)| s).unwrap_or(rest);
			let mut chars = after_len.char_indices();
			let (_, c) = chars.next().ok_or_else(|| Error::Malformed("format string ends mid-field".into()))?;
			rest = &after_len[c.len_utf8()..];

			let value = match c {
				'b' => Value::I8(r.get_u8()? as i8),
				'B' => Value::U8(r.get_u8()?),
				'h' => Value::I16(r.get_u16()? as i16),
				'H' => Value::U16(r.get_u16()?),
				'i' => Value::I32(r.get_u32()? as i32),
				'I' => Value::U32(r.get_u32()?),
				'q' => Value::I64(r.get_u64()? as i64),
				'Q' => Value::U64(r.get_u64()?),
				'f' => Value::F16(f16_bits_to_f32(r.get_u16()?)),
				'd' => Value::F32(f32::from_bits(r.get_u32()?)),
				'g' => Value::F64(r.get_f64()?),
				's' => {
					let n = prefix_len
						.map(|(n, _)| n)
						.or(last_len)
						.ok_or_else(|| Error::Malformed("'s' field has no known length".into()))?;
					Value::Bytes(r.get_bytes(n)?.to_vec())
				}
				other => return Err(Error::Malformed(format!("unknown format character '{other}'"))),
			};

			last_len = value.as_len();
			out.push(value);
		}

		Ok(out)
	}

}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn writer_reader_round_trip() {
		let mut w = Writer::new();
		w.put_u8(0x12).put_u16(0x3456).put_u32(0x789a_bcde).put_u64(0x0102_0304_0506_0708).put_f64(1.5).put_str8(b"hi").put_str16(b"world");

		let bytes = w.into_vec();
		let mut r = Reader::new(&bytes);

		assert_eq!(r.get_u8().unwrap(), 0x12);
		assert_eq!(r.get_u16().unwrap(), 0x3456);
		assert_eq!(r.get_u32().unwrap(), 0x789a_bcde);
		assert_eq!(r.get_u64().unwrap(), 0x0102_0304_0506_0708);
		assert_eq!(r.get_f64().unwrap(), 1.5);
		assert_eq!(r.get_str8().unwrap(), b"hi");
		assert_eq!(r.get_str16().unwrap(), b"world");
		assert_eq!(r.remaining(), 0);
	}

	#[test]
	fn reader_errors_on_underrun() {
		let bytes = [0u8; 1];
		let mut r = Reader::new(&bytes);
		assert!(r.get_u32().is_err());
	}
}
