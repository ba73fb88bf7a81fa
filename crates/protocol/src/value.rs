//! Tagged session values and their legacy binary payloads.
//!
//! Every stored value is one type-tag byte followed by a payload whose layout
//! is fixed by the legacy session cache: strings are raw UTF-8, 32-bit
//! integers are big-endian (the two fast-path kinds that dominate real
//! payloads), every other fixed-width number is little-endian, date/time and
//! time-span values are 100 ns tick counts, and anything outside the
//! primitive set travels as an opaque `Object` payload produced by the host
//! serializer. The codec never interprets `Object` bytes.

use time::macros::datetime;
use time::{Duration, OffsetDateTime, PrimitiveDateTime};
use uuid::Uuid;

use crate::error::{CodecError, Result};

pub(crate) const TICKS_PER_SECOND: i64 = 10_000_000;

/// Ticks between 0001-01-01T00:00:00 and the Unix epoch.
const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;

const TICK_BASE: PrimitiveDateTime = datetime!(0001-01-01 0:00);

/// Type tag identifying how a session value payload is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TypeTag {
	Str = 1,
	I32 = 2,
	Bool = 3,
	DateTime = 4,
	Decimal = 5,
	Byte = 6,
	Char = 7,
	F32 = 8,
	F64 = 9,
	SByte = 10,
	I16 = 11,
	I64 = 12,
	U16 = 13,
	U32 = 14,
	U64 = 15,
	Span = 16,
	Guid = 17,
	IntPtr = 18,
	UIntPtr = 19,
	Object = 20,
	Null = 21,
}

impl TypeTag {
	pub fn from_byte(byte: u8) -> Result<Self> {
		Ok(match byte {
			1 => Self::Str,
			2 => Self::I32,
			3 => Self::Bool,
			4 => Self::DateTime,
			5 => Self::Decimal,
			6 => Self::Byte,
			7 => Self::Char,
			8 => Self::F32,
			9 => Self::F64,
			10 => Self::SByte,
			11 => Self::I16,
			12 => Self::I64,
			13 => Self::U16,
			14 => Self::U32,
			15 => Self::U64,
			16 => Self::Span,
			17 => Self::Guid,
			18 => Self::IntPtr,
			19 => Self::UIntPtr,
			20 => Self::Object,
			21 => Self::Null,
			other => return Err(CodecError::UnknownTag(other)),
		})
	}
}

/// One session value, decided at the API boundary and dispatched by tag.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemValue {
	Str(String),
	I32(i32),
	Bool(bool),
	/// Wall-clock timestamp without offset, as the legacy runtimes store it.
	DateTime(PrimitiveDateTime),
	/// Raw 96-bit decimal parts plus scale/sign flags, kept bit-exact.
	Decimal([i32; 4]),
	Byte(u8),
	Char(char),
	F32(f32),
	F64(f64),
	SByte(i8),
	I16(i16),
	I64(i64),
	U16(u16),
	U32(u32),
	U64(u64),
	Span(Duration),
	Guid(Uuid),
	IntPtr(isize),
	UIntPtr(usize),
	/// Host-serialized object graph; opaque to the codec.
	Object(Vec<u8>),
	Null,
}

impl ItemValue {
	pub fn tag(&self) -> TypeTag {
		match self {
			Self::Str(_) => TypeTag::Str,
			Self::I32(_) => TypeTag::I32,
			Self::Bool(_) => TypeTag::Bool,
			Self::DateTime(_) => TypeTag::DateTime,
			Self::Decimal(_) => TypeTag::Decimal,
			Self::Byte(_) => TypeTag::Byte,
			Self::Char(_) => TypeTag::Char,
			Self::F32(_) => TypeTag::F32,
			Self::F64(_) => TypeTag::F64,
			Self::SByte(_) => TypeTag::SByte,
			Self::I16(_) => TypeTag::I16,
			Self::I64(_) => TypeTag::I64,
			Self::U16(_) => TypeTag::U16,
			Self::U32(_) => TypeTag::U32,
			Self::U64(_) => TypeTag::U64,
			Self::Span(_) => TypeTag::Span,
			Self::Guid(_) => TypeTag::Guid,
			Self::IntPtr(_) => TypeTag::IntPtr,
			Self::UIntPtr(_) => TypeTag::UIntPtr,
			Self::Object(_) => TypeTag::Object,
			Self::Null => TypeTag::Null,
		}
	}

	/// Whether reading this value cannot hand out mutable shared state.
	///
	/// `Object` payloads may be mutated by the caller without a fresh
	/// assignment, and a `Null` read is treated the same way by the legacy
	/// providers, so both dirty the collection on read.
	pub fn is_immutable(&self) -> bool {
		!matches!(self, Self::Object(_) | Self::Null)
	}

	/// Encodes the value as one tag byte plus its payload.
	pub fn to_bytes(&self) -> Vec<u8> {
		let mut out = Vec::with_capacity(16);
		out.push(self.tag() as u8);
		match self {
			Self::Str(value) => out.extend_from_slice(value.as_bytes()),
			Self::I32(value) => out.extend_from_slice(&value.to_be_bytes()),
			Self::Bool(value) => out.push(u8::from(*value)),
			Self::DateTime(value) => out.extend_from_slice(&datetime_to_ticks(*value).to_le_bytes()),
			Self::Decimal(parts) => {
				for part in parts {
					out.extend_from_slice(&part.to_le_bytes());
				}
			}
			Self::Byte(value) => out.push(*value),
			Self::Char(value) => {
				let mut buf = [0u8; 4];
				out.extend_from_slice(value.encode_utf8(&mut buf).as_bytes());
			}
			Self::F32(value) => out.extend_from_slice(&value.to_le_bytes()),
			Self::F64(value) => out.extend_from_slice(&value.to_le_bytes()),
			Self::SByte(value) => out.push(*value as u8),
			Self::I16(value) => out.extend_from_slice(&value.to_le_bytes()),
			Self::I64(value) => out.extend_from_slice(&value.to_le_bytes()),
			Self::U16(value) => out.extend_from_slice(&value.to_le_bytes()),
			Self::U32(value) => out.extend_from_slice(&value.to_le_bytes()),
			Self::U64(value) => out.extend_from_slice(&value.to_le_bytes()),
			Self::Span(value) => out.extend_from_slice(&duration_to_ticks(*value).to_le_bytes()),
			Self::Guid(value) => out.extend_from_slice(&value.to_bytes_le()),
			Self::IntPtr(value) => {
				if size_of::<usize>() == 4 {
					out.extend_from_slice(&(*value as i32).to_le_bytes());
				} else {
					out.extend_from_slice(&(*value as i64).to_le_bytes());
				}
			}
			Self::UIntPtr(value) => {
				if size_of::<usize>() == 4 {
					out.extend_from_slice(&(*value as u32).to_le_bytes());
				} else {
					out.extend_from_slice(&(*value as u64).to_le_bytes());
				}
			}
			Self::Object(payload) => out.extend_from_slice(payload),
			Self::Null => {}
		}
		out
	}

	/// Decodes one tag byte plus payload back into a value.
	pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
		let (&tag, payload) = bytes.split_first().ok_or(CodecError::Truncated)?;
		Ok(match TypeTag::from_byte(tag)? {
			TypeTag::Str => Self::Str(String::from_utf8(payload.to_vec()).map_err(|_| CodecError::Malformed)?),
			TypeTag::I32 => Self::I32(i32::from_be_bytes(fixed(payload)?)),
			TypeTag::Null => Self::Null,
			TypeTag::Bool => Self::Bool(*payload.first().ok_or(CodecError::Truncated)? != 0),
			TypeTag::DateTime => Self::DateTime(ticks_to_datetime(i64::from_le_bytes(fixed(payload)?))?),
			TypeTag::Decimal => {
				let raw: [u8; 16] = fixed(payload)?;
				let mut parts = [0i32; 4];
				for (index, part) in parts.iter_mut().enumerate() {
					let mut chunk = [0u8; 4];
					chunk.copy_from_slice(&raw[index * 4..index * 4 + 4]);
					*part = i32::from_le_bytes(chunk);
				}
				Self::Decimal(parts)
			}
			TypeTag::Byte => Self::Byte(*payload.first().ok_or(CodecError::Truncated)?),
			TypeTag::Char => {
				let text = std::str::from_utf8(payload).map_err(|_| CodecError::Malformed)?;
				let mut chars = text.chars();
				match (chars.next(), chars.next()) {
					(Some(value), None) => Self::Char(value),
					_ => return Err(CodecError::Malformed),
				}
			}
			TypeTag::F32 => Self::F32(f32::from_le_bytes(fixed(payload)?)),
			TypeTag::F64 => Self::F64(f64::from_le_bytes(fixed(payload)?)),
			TypeTag::SByte => Self::SByte(*payload.first().ok_or(CodecError::Truncated)? as i8),
			TypeTag::I16 => Self::I16(i16::from_le_bytes(fixed(payload)?)),
			TypeTag::I64 => Self::I64(i64::from_le_bytes(fixed(payload)?)),
			TypeTag::U16 => Self::U16(u16::from_le_bytes(fixed(payload)?)),
			TypeTag::U32 => Self::U32(u32::from_le_bytes(fixed(payload)?)),
			TypeTag::U64 => Self::U64(u64::from_le_bytes(fixed(payload)?)),
			TypeTag::Span => Self::Span(ticks_to_duration(i64::from_le_bytes(fixed(payload)?))),
			TypeTag::Guid => Self::Guid(Uuid::from_bytes_le(fixed(payload)?)),
			TypeTag::IntPtr => match payload.len() {
				4 => Self::IntPtr(i32::from_le_bytes(fixed(payload)?) as isize),
				8 => Self::IntPtr(i64::from_le_bytes(fixed(payload)?) as isize),
				_ => return Err(CodecError::Malformed),
			},
			TypeTag::UIntPtr => match payload.len() {
				4 => Self::UIntPtr(u32::from_le_bytes(fixed(payload)?) as usize),
				8 => Self::UIntPtr(u64::from_le_bytes(fixed(payload)?) as usize),
				_ => return Err(CodecError::Malformed),
			},
			TypeTag::Object => Self::Object(payload.to_vec()),
		})
	}
}

fn fixed<const N: usize>(payload: &[u8]) -> Result<[u8; N]> {
	payload.try_into().map_err(|_| CodecError::Malformed)
}

pub(crate) fn datetime_to_ticks(value: PrimitiveDateTime) -> i64 {
	let span = value - TICK_BASE;
	span.whole_seconds() * TICKS_PER_SECOND + i64::from(span.subsec_nanoseconds()) / 100
}

pub(crate) fn ticks_to_datetime(ticks: i64) -> Result<PrimitiveDateTime> {
	TICK_BASE.checked_add(ticks_to_duration(ticks)).ok_or(CodecError::Malformed)
}

pub(crate) fn duration_to_ticks(value: Duration) -> i64 {
	value.whole_seconds() * TICKS_PER_SECOND + i64::from(value.subsec_nanoseconds()) / 100
}

pub(crate) fn ticks_to_duration(ticks: i64) -> Duration {
	Duration::new(ticks / TICKS_PER_SECOND, ((ticks % TICKS_PER_SECOND) * 100) as i32)
}

/// Current wall-clock time in legacy 100 ns ticks.
pub(crate) fn ticks_now() -> i64 {
	(OffsetDateTime::now_utc().unix_timestamp_nanos() / 100) as i64 + UNIX_EPOCH_TICKS
}
