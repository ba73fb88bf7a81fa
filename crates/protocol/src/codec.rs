//! Binary codec for the legacy session-cache payload format.
//!
//! Layout: `[revision:1][count:3][session id:16]` followed by one
//! `[key len:2][key][value len:4][value]` entry per item. All lengths are
//! big-endian. The revision byte is fixed; any other value (or an empty
//! payload) decodes to an empty collection marked dirty so the next write
//! replaces whatever was stored.

use crate::collection::{ItemCollection, SESSION_ID_LEN};
use crate::error::{CodecError, Result};
use crate::item::SessionItem;

/// Revision prefix the legacy cache writes ahead of every payload.
pub const SERIAL_REVISION: u8 = 2;

const MAX_COUNT: usize = 0xFF_FFFF;

/// Serializes the collection, lazily encoding any values still held decoded.
pub fn encode(items: &mut ItemCollection) -> Result<Vec<u8>> {
	if items.len() > MAX_COUNT {
		return Err(CodecError::Oversize);
	}

	let mut out = Vec::with_capacity(32);
	out.push(SERIAL_REVISION);
	push_u24(&mut out, items.len() as u32);
	out.extend_from_slice(items.session_id_bytes());

	for item in items.items_mut() {
		let key_len = u16::try_from(item.key_bytes().len()).map_err(|_| CodecError::Oversize)?;
		out.extend_from_slice(&key_len.to_be_bytes());
		out.extend_from_slice(item.key_bytes());

		let value = item.value_bytes();
		let value_len = u32::try_from(value.len()).map_err(|_| CodecError::Oversize)?;
		if value_len > i32::MAX as u32 {
			return Err(CodecError::Oversize);
		}
		out.extend_from_slice(&value_len.to_be_bytes());
		out.extend_from_slice(value);
	}

	Ok(out)
}

/// Deserializes a stored payload back into a collection.
///
/// A missing or mismatched revision yields an empty collection marked dirty;
/// a payload that ends mid-entry is an error the caller treats as no data.
pub fn decode(bytes: &[u8]) -> Result<ItemCollection> {
	let mut collection = ItemCollection::new();
	let mut reader = Reader::new(bytes);

	match reader.read_u8() {
		Some(SERIAL_REVISION) => {}
		_ => {
			collection.set_dirty(true);
			return Ok(collection);
		}
	}

	let count = reader.read_u24().ok_or(CodecError::Truncated)?;
	let session_id: [u8; SESSION_ID_LEN] = reader
		.read_bytes(SESSION_ID_LEN)
		.ok_or(CodecError::Truncated)?
		.try_into()
		.map_err(|_| CodecError::Truncated)?;
	collection.set_session_id_bytes(session_id);

	for _ in 0..count {
		let key_len = reader.read_u16().ok_or(CodecError::Truncated)? as usize;
		let key = reader.read_bytes(key_len).ok_or(CodecError::Truncated)?.to_vec();
		let value_len = reader.read_u32().ok_or(CodecError::Truncated)? as usize;
		let value = reader.read_bytes(value_len).ok_or(CodecError::Truncated)?.to_vec();
		collection.push_from_store(SessionItem::from_store(key, value));
	}

	collection.set_dirty(false);
	Ok(collection)
}

fn push_u24(out: &mut Vec<u8>, value: u32) {
	out.push((value >> 16) as u8);
	out.push((value >> 8) as u8);
	out.push(value as u8);
}

struct Reader<'a> {
	buf: &'a [u8],
	pos: usize,
}

impl<'a> Reader<'a> {
	fn new(buf: &'a [u8]) -> Self {
		Self { buf, pos: 0 }
	}

	fn read_u8(&mut self) -> Option<u8> {
		let byte = *self.buf.get(self.pos)?;
		self.pos += 1;
		Some(byte)
	}

	fn read_u16(&mut self) -> Option<u32> {
		Some((self.read_u8()? as u32) << 8 | self.read_u8()? as u32)
	}

	fn read_u24(&mut self) -> Option<u32> {
		Some((self.read_u8()? as u32) << 16 | self.read_u16()?)
	}

	fn read_u32(&mut self) -> Option<u32> {
		Some((self.read_u8()? as u32) << 24 | self.read_u24()?)
	}

	fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
		let slice = self.buf.get(self.pos..self.pos.checked_add(len)?)?;
		self.pos += len;
		Some(slice)
	}
}
