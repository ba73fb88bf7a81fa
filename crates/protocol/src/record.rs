//! Session read results and lock ownership tokens.

use time::Duration;

use crate::collection::ItemCollection;
use crate::value::{ticks_now, ticks_to_duration};

/// Store key pair derived from one runtime session identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKeys {
	pub data_key: String,
	pub lock_key: String,
}

/// Opaque proof of temporary ownership of a session's writable state.
///
/// The value is the locker's wall-clock timestamp in 100 ns ticks, which
/// doubles as the lock's birth time for age reporting. Ownership is only
/// ever proven by byte equality with the value stored at the lock key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
	/// Mints a token for a lock being taken now.
	pub fn now() -> Self {
		Self(ticks_now().to_string())
	}

	/// Wraps a token value read back from the store.
	pub fn from_raw(raw: impl Into<String>) -> Self {
		Self(raw.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Time elapsed since the lock was taken; tokens that do not parse as
	/// tick stamps age from the tick origin, matching the legacy providers.
	pub fn age(&self) -> Duration {
		let born = self.0.parse::<i64>().unwrap_or(0);
		ticks_to_duration(ticks_now().saturating_sub(born))
	}
}

impl std::fmt::Display for LockToken {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.0)
	}
}

/// Result of one read operation against the session store.
#[derive(Debug)]
pub struct SessionRecord {
	/// Whether this call obtained (or found itself free to read) the session.
	pub lock_acquired: bool,
	/// Whether another holder's write lock blocked this call.
	pub is_locked: bool,
	/// The lock value currently in the store, ours or the competing holder's.
	pub lock_token: Option<LockToken>,
	/// Remaining idle lifetime budget of the session in seconds.
	pub ttl_seconds: u64,
	/// Stored items; `None` when the lock was not acquired or no data exists.
	pub items: Option<ItemCollection>,
}

impl SessionRecord {
	/// Record shape for a session that was found locked by another holder.
	pub fn locked_by(token: LockToken, ttl_seconds: u64) -> Self {
		Self {
			lock_acquired: false,
			is_locked: true,
			lock_token: Some(token),
			ttl_seconds,
			items: None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fresh_tokens_are_monotonic_enough_to_distinguish_lockers() {
		let first = LockToken::now();
		std::thread::sleep(std::time::Duration::from_millis(2));
		let second = LockToken::now();
		assert_ne!(first, second);
	}

	#[test]
	fn token_age_grows_from_its_birth_tick() {
		let token = LockToken::now();
		std::thread::sleep(std::time::Duration::from_millis(5));
		let age = token.age();
		assert!(age >= Duration::milliseconds(5));
		assert!(age < Duration::seconds(10));
	}

	#[test]
	fn unparseable_tokens_age_from_the_tick_origin() {
		let token = LockToken::from_raw("not-a-tick-stamp");
		assert!(token.age() > Duration::days(365 * 100));
	}

	#[test]
	fn locked_by_reports_busy_without_items() {
		let record = SessionRecord::locked_by(LockToken::from_raw("123"), 1200);
		assert!(!record.lock_acquired);
		assert!(record.is_locked);
		assert!(record.items.is_none());
		assert_eq!(record.ttl_seconds, 1200);
	}
}
