//! Typed script evaluation against the shared store.
//!
//! [`StoreClient`] turns the raw script programs into typed session
//! operations and parses their positional replies. Transport is abstracted
//! behind [`ScriptEngine`] so behavior tests can run against an in-memory
//! fake; the real [`RedisEngine`] adds the silent single-retry rules for
//! closed connections, connection failures, and evicted script handles.

use std::sync::Arc;
use std::time::Duration;

use redis::Value;
use tracing::{debug, warn};

use sx_protocol::{ItemCollection, LockToken, SessionKeys, SessionRecord, codec};

use crate::connection::SharedConnection;
use crate::error::{Result, StoreError};
use crate::retry::retry_for;
use crate::scripts::{DATA_FIELD, KeyLayout, ScriptKind, ScriptSet, StoreScript, TTL_FIELD};

/// Positional argument for a store script.
#[derive(Debug, Clone)]
pub enum ScriptArg {
	Str(String),
	Int(i64),
	Bytes(Vec<u8>),
}

impl From<&str> for ScriptArg {
	fn from(value: &str) -> Self {
		Self::Str(value.to_string())
	}
}

impl From<i64> for ScriptArg {
	fn from(value: i64) -> Self {
		Self::Int(value)
	}
}

impl From<Vec<u8>> for ScriptArg {
	fn from(value: Vec<u8>) -> Self {
		Self::Bytes(value)
	}
}

/// Executes store programs; implementations own transport and low-level
/// retry plumbing.
pub trait ScriptEngine: Send + Sync {
	fn eval(&self, script: &StoreScript, keys: &SessionKeys, args: &[ScriptArg]) -> impl Future<Output = Result<Value>> + Send;
}

/// Engine backed by the process-wide shared connection.
pub struct RedisEngine {
	connection: Arc<SharedConnection>,
}

impl RedisEngine {
	pub fn new(connection: Arc<SharedConnection>) -> Self {
		Self { connection }
	}

	async fn run(&self, script: &StoreScript, keys: &SessionKeys, args: &[ScriptArg], full_body: bool) -> Result<Value> {
		let mut connection = self.connection.handle().await?;
		let mut cmd = if full_body {
			let mut cmd = redis::cmd("EVAL");
			cmd.arg(script.body());
			cmd
		} else {
			let mut cmd = redis::cmd("EVALSHA");
			cmd.arg(script.hash());
			cmd
		};
		cmd.arg(2).arg(&keys.data_key).arg(&keys.lock_key);
		for arg in args {
			match arg {
				ScriptArg::Str(value) => cmd.arg(value),
				ScriptArg::Int(value) => cmd.arg(*value),
				ScriptArg::Bytes(value) => cmd.arg(&value[..]),
			};
		}
		Ok(cmd.query_async(&mut connection).await?)
	}
}

impl ScriptEngine for RedisEngine {
	/// Evaluates the cached script handle, retrying once, immediately and
	/// silently, on an evicted handle (full body resubmit) or a
	/// connection-level failure (reconnect heuristic first).
	async fn eval(&self, script: &StoreScript, keys: &SessionKeys, args: &[ScriptArg]) -> Result<Value> {
		match self.run(script, keys, args, false).await {
			Ok(value) => Ok(value),
			Err(err) if err.is_script_missing() => {
				debug!(target = "sx.client", script = ?script.kind(), "script handle evicted; resubmitting body");
				self.run(script, keys, args, true).await
			}
			Err(err) if err.is_connection_error() => {
				self.connection.force_reconnect().await;
				self.run(script, keys, args, false).await
			}
			Err(err) => Err(err),
		}
	}
}

/// Typed session operations over one script engine.
pub struct StoreClient<E> {
	engine: E,
	scripts: ScriptSet,
	retry_budget: Duration,
	default_ttl_seconds: u64,
}

impl<E: ScriptEngine> StoreClient<E> {
	pub fn new(engine: E, layout: KeyLayout, retry_budget: Duration, default_ttl_seconds: u64) -> Self {
		Self {
			engine,
			scripts: ScriptSet::for_layout(layout),
			retry_budget,
			default_ttl_seconds,
		}
	}

	/// Takes the write lock when free and reads the session in one unit.
	///
	/// Whatever the outcome, the reply carries the current holder's token so
	/// callers can report the competing lock and its age upstream.
	pub async fn acquire_write_lock_and_get(&self, keys: &SessionKeys, token: &LockToken, lock_ttl_seconds: u64) -> Result<SessionRecord> {
		let args = [
			ScriptArg::from(TTL_FIELD),
			ScriptArg::from(DATA_FIELD),
			ScriptArg::from(token.as_str()),
			ScriptArg::from(lock_ttl_seconds as i64),
		];
		let reply = self.evaluate(&self.scripts.acquire, keys, &args).await?;
		self.parse_acquire(reply, token)
	}

	/// Reads the session without touching the lock.
	pub async fn check_lock_and_get(&self, keys: &SessionKeys) -> Result<SessionRecord> {
		let args = [ScriptArg::from(TTL_FIELD), ScriptArg::from(DATA_FIELD)];
		let reply = self.evaluate(&self.scripts.check, keys, &args).await?;
		self.parse_check(reply)
	}

	/// Deletes the lock when `token` still owns it; always refreshes expiry.
	pub async fn release_lock_if_token_matches(&self, keys: &SessionKeys, token: &LockToken, fallback_ttl_seconds: u64) -> Result<()> {
		let args = [
			ScriptArg::from(TTL_FIELD),
			ScriptArg::from(token.as_str()),
			ScriptArg::from(fallback_ttl_seconds as i64),
		];
		self.evaluate(&self.scripts.release, keys, &args).await?;
		Ok(())
	}

	/// Re-applies the stored idle timeout as the keys' expiry.
	pub async fn refresh_expiry(&self, keys: &SessionKeys, default_ttl_seconds: u64) -> Result<()> {
		let args = [ScriptArg::from(TTL_FIELD), ScriptArg::from(default_ttl_seconds as i64)];
		self.evaluate(&self.scripts.refresh, keys, &args).await?;
		Ok(())
	}

	/// Unconditionally overwrites the stored blob; first-time initialization.
	pub async fn put_data(&self, keys: &SessionKeys, blob: Vec<u8>, ttl_seconds: u64) -> Result<()> {
		let args = [
			ScriptArg::from(TTL_FIELD),
			ScriptArg::from(DATA_FIELD),
			ScriptArg::from(blob),
			ScriptArg::from(ttl_seconds as i64),
		];
		self.evaluate(&self.scripts.put, keys, &args).await?;
		Ok(())
	}

	/// Writes new data (when present) and releases the lock in one unit.
	///
	/// Returns `false` when a non-empty expected token no longer owned the
	/// lock and the write was aborted.
	pub async fn release_lock_and_put_data(&self, keys: &SessionKeys, token: Option<&LockToken>, blob: Option<Vec<u8>>, ttl_seconds: u64) -> Result<bool> {
		let has_data = i64::from(blob.is_some());
		let args = [
			ScriptArg::from(TTL_FIELD),
			ScriptArg::from(DATA_FIELD),
			ScriptArg::from(token.map_or("", LockToken::as_str)),
			ScriptArg::from(ttl_seconds as i64),
			ScriptArg::from(has_data),
			ScriptArg::from(blob.unwrap_or_default()),
		];
		let reply = self.evaluate(&self.scripts.release_and_put, keys, &args).await?;
		Ok(reply_flag(&reply))
	}

	/// Deletes every key belonging to the session.
	///
	/// Returns `false` when a non-empty expected token no longer owned the
	/// lock and nothing was touched.
	pub async fn delete_session(&self, keys: &SessionKeys, token: Option<&LockToken>) -> Result<bool> {
		let args = [ScriptArg::from(token.map_or("", LockToken::as_str))];
		let reply = self.evaluate(&self.scripts.delete, keys, &args).await?;
		Ok(reply_flag(&reply))
	}

	async fn evaluate(&self, script: &StoreScript, keys: &SessionKeys, args: &[ScriptArg]) -> Result<Value> {
		retry_for(self.retry_budget, || self.engine.eval(script, keys, args)).await
	}

	fn parse_acquire(&self, reply: Value, expected: &LockToken) -> Result<SessionRecord> {
		let slots = reply_slots(reply, ScriptKind::AcquireWriteLockAndGet)?;
		let holder = slot_string(slots.first());
		let is_locked = slot_flag(slots.get(3));
		let ttl_seconds = self.ttl_or_default(slots.get(2));

		let lock_acquired = !is_locked && holder.as_deref() == Some(expected.as_str());
		let items = if lock_acquired { self.decode_blob(slots.get(1)) } else { None };

		Ok(SessionRecord {
			lock_acquired,
			is_locked,
			lock_token: holder.map(LockToken::from_raw),
			ttl_seconds,
			items,
		})
	}

	fn parse_check(&self, reply: Value) -> Result<SessionRecord> {
		let slots = reply_slots(reply, ScriptKind::CheckLockAndGet)?;
		let holder = slot_string(slots.first()).filter(|token| !token.is_empty());
		let ttl_seconds = self.ttl_or_default(slots.get(2));

		match holder {
			Some(token) => Ok(SessionRecord::locked_by(LockToken::from_raw(token), ttl_seconds)),
			None => Ok(SessionRecord {
				lock_acquired: true,
				is_locked: false,
				lock_token: None,
				ttl_seconds,
				items: self.decode_blob(slots.get(1)),
			}),
		}
	}

	/// Stored TTLs win; the -1 sentinel (or a missing slot) means no TTL
	/// field exists yet and the configured default applies.
	fn ttl_or_default(&self, slot: Option<&Value>) -> u64 {
		match slot_int(slot) {
			Some(ttl) if ttl >= 0 => ttl as u64,
			_ => self.default_ttl_seconds,
		}
	}

	fn decode_blob(&self, slot: Option<&Value>) -> Option<ItemCollection> {
		let blob = slot_bytes(slot)?;
		if blob.is_empty() {
			return None;
		}
		match codec::decode(&blob) {
			Ok(items) => Some(items),
			Err(err) => {
				warn!(target = "sx.client", error = %err, "stored session blob is unreadable; treating as no data");
				None
			}
		}
	}
}

fn reply_slots(reply: Value, script: ScriptKind) -> Result<Vec<Value>> {
	match reply {
		Value::Array(slots) => Ok(slots),
		_ => Err(StoreError::Reply { script }),
	}
}

fn slot_bytes(slot: Option<&Value>) -> Option<Vec<u8>> {
	match slot {
		Some(Value::BulkString(bytes)) => Some(bytes.clone()),
		Some(Value::SimpleString(text)) => Some(text.clone().into_bytes()),
		_ => None,
	}
}

fn slot_string(slot: Option<&Value>) -> Option<String> {
	match slot {
		Some(Value::BulkString(bytes)) => Some(String::from_utf8_lossy(bytes).into_owned()),
		Some(Value::SimpleString(text)) => Some(text.clone()),
		Some(Value::Int(value)) => Some(value.to_string()),
		_ => None,
	}
}

fn slot_int(slot: Option<&Value>) -> Option<i64> {
	match slot {
		Some(Value::Int(value)) => Some(*value),
		Some(Value::BulkString(bytes)) => String::from_utf8_lossy(bytes).parse().ok(),
		Some(Value::SimpleString(text)) => text.parse().ok(),
		_ => None,
	}
}

/// Lua booleans reach the client as 1 or nil.
fn slot_flag(slot: Option<&Value>) -> bool {
	matches!(slot, Some(Value::Int(value)) if *value != 0)
}

fn reply_flag(reply: &Value) -> bool {
	matches!(reply, Value::Int(value) if *value != 0)
}
