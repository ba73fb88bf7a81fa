//! Ordered named-value collection with the provider dirty contract.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{CodecError, Result};
use crate::item::SessionItem;
use crate::value::ItemValue;

pub(crate) const SESSION_ID_LEN: usize = 16;

/// Insertion-ordered collection of uniquely-named session items.
///
/// Any mutation marks the collection dirty. Reading a value whose kind is not
/// in the fixed immutable set also marks it dirty, because provider contracts
/// allow mutable values to change without being re-assigned.
#[derive(Debug, Clone, Default)]
pub struct ItemCollection {
	items: Vec<SessionItem>,
	session_id_bytes: [u8; SESSION_ID_LEN],
	dirty: bool,
}

impl ItemCollection {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.items.len()
	}

	pub fn is_empty(&self) -> bool {
		self.items.is_empty()
	}

	pub fn dirty(&self) -> bool {
		self.dirty
	}

	/// Overrides the dirty flag; providers clear it after loading a record.
	pub fn set_dirty(&mut self, dirty: bool) {
		self.dirty = dirty;
	}

	/// Item names in insertion order.
	pub fn names(&self) -> impl Iterator<Item = String> + '_ {
		self.items.iter().map(SessionItem::name)
	}

	/// Reads a value by name, decoding it on first access.
	pub fn get(&mut self, name: &str) -> Result<Option<&ItemValue>> {
		let Some(index) = self.position(name) else {
			return Ok(None);
		};
		self.get_at(index)
	}

	/// Reads a value by position, decoding it on first access.
	pub fn get_at(&mut self, index: usize) -> Result<Option<&ItemValue>> {
		let Some(item) = self.items.get_mut(index) else {
			return Ok(None);
		};
		let value = item.value()?;
		if !value.is_immutable() {
			self.dirty = true;
		}
		Ok(Some(value))
	}

	/// Creates or replaces a value by name.
	pub fn put(&mut self, name: &str, value: ItemValue) {
		match self.position(name) {
			Some(index) => self.items[index].set_value(value),
			None => self.items.push(SessionItem::from_value(name, value)),
		}
		self.dirty = true;
	}

	/// Replaces a value by position.
	pub fn put_at(&mut self, index: usize, value: ItemValue) {
		if let Some(item) = self.items.get_mut(index) {
			item.set_value(value);
			self.dirty = true;
		}
	}

	/// Stores an arbitrary application value through the host serializer.
	pub fn put_json<T: Serialize>(&mut self, name: &str, value: &T) -> Result<()> {
		let payload = serde_json::to_vec(value).map_err(|source| CodecError::Serialize {
			item: name.to_string(),
			source,
		})?;
		self.put(name, ItemValue::Object(payload));
		Ok(())
	}

	/// Reads back a value stored through the host serializer.
	pub fn get_json<T: DeserializeOwned>(&mut self, name: &str) -> Result<Option<T>> {
		let payload = match self.get(name)? {
			Some(ItemValue::Object(payload)) => payload.clone(),
			Some(_) | None => return Ok(None),
		};
		serde_json::from_slice(&payload)
			.map(Some)
			.map_err(|source| CodecError::Deserialize {
				item: name.to_string(),
				source,
			})
	}

	/// Removes one value; dirties the collection even when the name is absent.
	pub fn remove(&mut self, name: &str) {
		if let Some(index) = self.position(name) {
			self.items.remove(index);
		}
		self.dirty = true;
	}

	pub fn remove_at(&mut self, index: usize) {
		if index < self.items.len() {
			self.items.remove(index);
		}
		self.dirty = true;
	}

	/// Removes every value.
	pub fn clear(&mut self) {
		self.items.clear();
		self.dirty = true;
	}

	pub(crate) fn session_id_bytes(&self) -> &[u8; SESSION_ID_LEN] {
		&self.session_id_bytes
	}

	pub(crate) fn set_session_id_bytes(&mut self, bytes: [u8; SESSION_ID_LEN]) {
		self.session_id_bytes = bytes;
	}

	/// Appends an item loaded from the store without touching the dirty flag.
	pub(crate) fn push_from_store(&mut self, item: SessionItem) {
		self.items.push(item);
	}

	pub(crate) fn items_mut(&mut self) -> &mut [SessionItem] {
		&mut self.items
	}

	fn position(&self, name: &str) -> Option<usize> {
		self.items.iter().position(|item| item.key_bytes() == name.as_bytes())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn put_marks_dirty() {
		let mut items = ItemCollection::new();
		assert!(!items.dirty());
		items.put("x", ItemValue::I32(42));
		assert!(items.dirty());
	}

	#[test]
	fn reading_an_immutable_value_does_not_mark_dirty() {
		let mut items = ItemCollection::new();
		items.put("x", ItemValue::I32(42));
		items.set_dirty(false);
		assert_eq!(items.get("x").unwrap(), Some(&ItemValue::I32(42)));
		assert!(!items.dirty());
	}

	#[test]
	fn reading_an_object_value_marks_dirty() {
		let mut items = ItemCollection::new();
		items.put("graph", ItemValue::Object(vec![1]));
		items.set_dirty(false);
		let _ = items.get("graph").unwrap();
		assert!(items.dirty());
	}

	#[test]
	fn reading_a_null_value_marks_dirty() {
		let mut items = ItemCollection::new();
		items.put("gone", ItemValue::Null);
		items.set_dirty(false);
		let _ = items.get("gone").unwrap();
		assert!(items.dirty());
	}

	#[test]
	fn remove_dirties_even_when_absent() {
		let mut items = ItemCollection::new();
		items.remove("missing");
		assert!(items.dirty());
	}

	#[test]
	fn put_replaces_by_name_and_keeps_order() {
		let mut items = ItemCollection::new();
		items.put("a", ItemValue::I32(1));
		items.put("b", ItemValue::I32(2));
		items.put("a", ItemValue::I32(3));
		assert_eq!(items.names().collect::<Vec<_>>(), vec!["a", "b"]);
		assert_eq!(items.get("a").unwrap(), Some(&ItemValue::I32(3)));
	}

	#[test]
	fn json_values_round_trip_through_object_payloads() {
		#[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
		struct Cart {
			items: Vec<String>,
		}

		let mut items = ItemCollection::new();
		let cart = Cart {
			items: vec!["a".into(), "b".into()],
		};
		items.put_json("cart", &cart).unwrap();
		assert_eq!(items.get_json::<Cart>("cart").unwrap(), Some(cart));
	}

	#[test]
	fn serialize_failure_names_the_item() {
		let mut items = ItemCollection::new();
		let unserializable = std::collections::HashMap::from([(vec![1u8], "v")]);
		let err = items.put_json("broken", &unserializable).unwrap_err();
		assert!(matches!(err, CodecError::Serialize { ref item, .. } if item == "broken"));
	}

	#[test]
	fn indexed_access_matches_named_access() {
		let mut items = ItemCollection::new();
		items.put("first", ItemValue::Str("1".into()));
		items.put("second", ItemValue::Str("2".into()));
		assert_eq!(items.get_at(1).unwrap(), Some(&ItemValue::Str("2".into())));
		items.put_at(0, ItemValue::Str("one".into()));
		assert_eq!(items.get("first").unwrap(), Some(&ItemValue::Str("one".into())));
		items.remove_at(0);
		assert_eq!(items.names().collect::<Vec<_>>(), vec!["second"]);
	}
}
