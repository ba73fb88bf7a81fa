//! Lazily-decoded session items.

use crate::error::Result;
use crate::value::ItemValue;

/// One named session value, decoded from or encoded to store bytes on demand.
///
/// Exactly one representation is authoritative at a time: items loaded from
/// the store keep their raw bytes until the value is first read, and items
/// created by application code keep the value until bytes are first needed.
#[derive(Debug, Clone)]
pub struct SessionItem {
	key_bytes: Vec<u8>,
	raw: Option<Vec<u8>>,
	value: Option<ItemValue>,
	decoded: bool,
}

impl SessionItem {
	/// Creates an item from store bytes; nothing is decoded yet.
	pub fn from_store(key_bytes: Vec<u8>, raw: Vec<u8>) -> Self {
		Self {
			key_bytes,
			raw: Some(raw),
			value: None,
			decoded: false,
		}
	}

	/// Creates an item from an application value; nothing is encoded yet.
	pub fn from_value(name: &str, value: ItemValue) -> Self {
		Self {
			key_bytes: name.as_bytes().to_vec(),
			raw: None,
			value: Some(value),
			decoded: true,
		}
	}

	/// Serialized item name; kept as bytes so collection serialization never
	/// re-encodes names.
	pub fn key_bytes(&self) -> &[u8] {
		&self.key_bytes
	}

	pub fn name(&self) -> String {
		String::from_utf8_lossy(&self.key_bytes).into_owned()
	}

	/// The decoded value, decoding the stored bytes on first access only.
	pub fn value(&mut self) -> Result<&ItemValue> {
		if !self.decoded {
			let decoded = match self.raw.as_deref() {
				Some(bytes) => ItemValue::from_bytes(bytes)?,
				None => ItemValue::Null,
			};
			self.value = Some(decoded);
			self.decoded = true;
		}
		Ok(self.value.get_or_insert(ItemValue::Null))
	}

	/// Replaces the value; any stale serialized form is discarded.
	pub fn set_value(&mut self, value: ItemValue) {
		self.value = Some(value);
		self.decoded = true;
		self.raw = None;
	}

	/// The serialized value, re-encoding only when no bytes exist yet or the
	/// decoded kind may have been mutated since decoding.
	pub fn value_bytes(&mut self) -> &[u8] {
		let stale = self.decoded && self.value.as_ref().is_some_and(|value| !value.is_immutable());
		if self.raw.is_none() || stale {
			let encoded = self.value.as_ref().unwrap_or(&ItemValue::Null).to_bytes();
			self.raw = Some(encoded);
		}
		self.raw.get_or_insert_with(Vec::new)
	}

	#[cfg(test)]
	pub(crate) fn is_decoded(&self) -> bool {
		self.decoded
	}
}
