//! Facade behavior against an in-memory engine implementing the script
//! semantics, so locking and lifecycle rules are exercised without a store.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use redis::Value;

use sx::{
	BindingApi, ItemCollection, ItemValue, KeyLayout, KeyNamer, LockToken, ScriptArg, ScriptEngine, ScriptKind, SessionBinder, SessionKeys,
	SessionStore, StoreClient, StoreConfig, StoreScript, TTL_FIELD,
};

const TICKS_PER_SECOND: i64 = 10_000_000;

#[derive(Default)]
struct FakeState {
	hashes: HashMap<String, HashMap<String, Vec<u8>>>,
	locks: HashMap<String, String>,
	expires: HashMap<String, u64>,
}

/// In-memory stand-in for the store, mirroring what each atomic program does.
#[derive(Default)]
struct FakeEngine {
	state: Mutex<FakeState>,
}

impl FakeEngine {
	fn ttl_field_ticks(&self, data_key: &str, field: &str) -> Option<i64> {
		let state = self.state.lock().unwrap();
		let raw = state.hashes.get(data_key)?.get(field)?.clone();
		String::from_utf8_lossy(&raw).parse().ok()
	}

	fn lock_holder(&self, lock_key: &str) -> Option<String> {
		self.state.lock().unwrap().locks.get(lock_key).cloned()
	}

	fn has_hash(&self, data_key: &str) -> bool {
		self.state.lock().unwrap().hashes.contains_key(data_key)
	}

	fn last_expire(&self, key: &str) -> Option<u64> {
		self.state.lock().unwrap().expires.get(key).copied()
	}
}

fn arg_str(args: &[ScriptArg], index: usize) -> String {
	match &args[index] {
		ScriptArg::Str(value) => value.clone(),
		ScriptArg::Int(value) => value.to_string(),
		ScriptArg::Bytes(value) => String::from_utf8_lossy(value).into_owned(),
	}
}

fn arg_i64(args: &[ScriptArg], index: usize) -> i64 {
	match &args[index] {
		ScriptArg::Int(value) => *value,
		ScriptArg::Str(value) => value.parse().unwrap_or(0),
		ScriptArg::Bytes(_) => 0,
	}
}

fn arg_bytes(args: &[ScriptArg], index: usize) -> Vec<u8> {
	match &args[index] {
		ScriptArg::Bytes(value) => value.clone(),
		ScriptArg::Str(value) => value.clone().into_bytes(),
		ScriptArg::Int(value) => value.to_string().into_bytes(),
	}
}

fn ticks_bytes(seconds: i64) -> Vec<u8> {
	(seconds * TICKS_PER_SECOND).to_string().into_bytes()
}

fn stored_ttl_slot(hash: Option<&HashMap<String, Vec<u8>>>, field: &str) -> Value {
	let ticks = hash
		.and_then(|hash| hash.get(field))
		.and_then(|raw| String::from_utf8_lossy(raw).parse::<i64>().ok());
	match ticks {
		Some(ticks) => Value::Int(ticks / TICKS_PER_SECOND),
		None => Value::Int(-1),
	}
}

impl ScriptEngine for &FakeEngine {
	async fn eval(&self, script: &StoreScript, keys: &SessionKeys, args: &[ScriptArg]) -> std::result::Result<Value, sx::StoreError> {
		let mut guard = self.state.lock().unwrap();
		let state = &mut *guard;
		let data_key = keys.data_key.clone();
		let lock_key = keys.lock_key.clone();

		let reply = match script.kind() {
			ScriptKind::AcquireWriteLockAndGet => {
				let ttl_field = arg_str(args, 0);
				let data_field = arg_str(args, 1);
				let token = arg_str(args, 2);

				let holder = state.locks.get(&lock_key).cloned();
				let (lock_value, is_locked) = match holder {
					Some(holder) => (holder, true),
					None => {
						state.locks.insert(lock_key.clone(), token.clone());
						(token.clone(), false)
					}
				};

				let hash = state.hashes.get(&data_key);
				let blob = if lock_value == token {
					match hash.and_then(|hash| hash.get(&data_field)) {
						Some(blob) => Value::BulkString(blob.clone()),
						None => Value::Nil,
					}
				} else {
					Value::BulkString(Vec::new())
				};
				let ttl = stored_ttl_slot(hash, &ttl_field);
				let locked = if is_locked { Value::Int(1) } else { Value::Nil };
				Value::Array(vec![Value::BulkString(lock_value.into_bytes()), blob, ttl, locked])
			}

			ScriptKind::CheckLockAndGet => {
				let ttl_field = arg_str(args, 0);
				let data_field = arg_str(args, 1);
				let lock_value = state.locks.get(&lock_key).cloned().unwrap_or_default();

				let hash = state.hashes.get(&data_key);
				let blob = if lock_value.is_empty() {
					match hash.and_then(|hash| hash.get(&data_field)) {
						Some(blob) => Value::BulkString(blob.clone()),
						None => Value::Nil,
					}
				} else {
					Value::BulkString(Vec::new())
				};
				let ttl = stored_ttl_slot(hash, &ttl_field);
				Value::Array(vec![Value::BulkString(lock_value.into_bytes()), blob, ttl])
			}

			ScriptKind::ReleaseLockIfTokenMatches => {
				let ttl_field = arg_str(args, 0);
				let token = arg_str(args, 1);
				if state.locks.get(&lock_key) == Some(&token) {
					state.locks.remove(&lock_key);
				}
				let stored = state
					.hashes
					.get(&data_key)
					.and_then(|hash| hash.get(&ttl_field))
					.and_then(|raw| String::from_utf8_lossy(raw).parse::<i64>().ok())
					.map(|ticks| ticks / TICKS_PER_SECOND);
				let expiry = stored.unwrap_or_else(|| arg_i64(args, 2));
				state.expires.insert(data_key, expiry as u64);
				Value::Int(1)
			}

			ScriptKind::RefreshExpiry => {
				let ttl_field = arg_str(args, 0);
				let default_secs = arg_i64(args, 1);
				if !state.hashes.contains_key(&data_key) {
					return Ok(Value::Int(1));
				}
				let hash = state.hashes.entry(data_key.clone()).or_default();
				let secs = match hash.get(&ttl_field).and_then(|raw| String::from_utf8_lossy(raw).parse::<i64>().ok()) {
					Some(ticks) => ticks / TICKS_PER_SECOND,
					None => {
						hash.insert(ttl_field, ticks_bytes(default_secs));
						default_secs
					}
				};
				state.expires.insert(data_key, secs as u64);
				Value::Int(1)
			}

			ScriptKind::PutData => {
				let ttl_field = arg_str(args, 0);
				let data_field = arg_str(args, 1);
				let blob = arg_bytes(args, 2);
				let secs = arg_i64(args, 3);
				let hash = state.hashes.entry(data_key.clone()).or_default();
				hash.insert(data_field, blob);
				hash.insert(ttl_field, ticks_bytes(secs));
				state.expires.insert(data_key, secs as u64);
				Value::Int(1)
			}

			ScriptKind::ReleaseLockAndPutData => {
				let ttl_field = arg_str(args, 0);
				let data_field = arg_str(args, 1);
				let expected = arg_str(args, 2);
				let secs = arg_i64(args, 3);
				let has_data = arg_i64(args, 4) != 0;
				let blob = arg_bytes(args, 5);

				if !expected.is_empty() && state.locks.get(&lock_key) != Some(&expected) {
					return Ok(Value::Int(0));
				}
				let hash = state.hashes.entry(data_key.clone()).or_default();
				if has_data {
					hash.insert(data_field, blob);
				}
				hash.insert(ttl_field, ticks_bytes(secs));
				state.expires.insert(data_key, secs as u64);
				state.locks.remove(&lock_key);
				Value::Int(1)
			}

			ScriptKind::DeleteSession => {
				let expected = arg_str(args, 0);
				if !expected.is_empty() && state.locks.get(&lock_key) != Some(&expected) {
					return Ok(Value::Int(0));
				}
				state.hashes.remove(&data_key);
				state.locks.remove(&lock_key);
				Value::Int(1)
			}
		};

		Ok(reply)
	}
}

/// Binding endpoint stand-in counting its invocations.
struct CountingApi {
	calls: AtomicUsize,
	lifetime: u64,
}

impl CountingApi {
	fn new(lifetime: u64) -> Self {
		Self {
			calls: AtomicUsize::new(0),
			lifetime,
		}
	}

	fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}

impl BindingApi for &CountingApi {
	async fn bind_session(&self, _session_id: &str, _partner_token: &str) -> sx::Result<u64> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		Ok(self.lifetime)
	}
}

/// Unreachable binding API for direct-layout facades.
struct NoBinding;

impl BindingApi for NoBinding {
	async fn bind_session(&self, _session_id: &str, _partner_token: &str) -> sx::Result<u64> {
		Ok(0)
	}
}

fn direct_config() -> StoreConfig {
	StoreConfig::new("redis://localhost").with_retry_budget(Duration::from_millis(10))
}

fn direct_store<'a>(engine: &'a FakeEngine, session_id: &str) -> SessionStore<&'a FakeEngine, NoBinding> {
	let config = direct_config();
	let client = StoreClient::new(engine, KeyLayout::Direct, config.retry_budget(), config.session_ttl_secs);
	SessionStore::from_parts(client, None, KeyNamer::new(KeyLayout::Direct, session_id), &config)
}

fn bound_store<'a>(engine: &'a FakeEngine, api: &'a CountingApi, session_id: &str) -> SessionStore<&'a FakeEngine, &'a CountingApi> {
	let config = StoreConfig::new("redis://localhost")
		.with_binding("http://sessions/api/bind/")
		.with_retry_budget(Duration::from_millis(10));
	let client = StoreClient::new(engine, KeyLayout::Bound, config.retry_budget(), config.session_ttl_secs);
	let binder = SessionBinder::new(api, "partner-token", false, config.retry_budget());
	SessionStore::from_parts(client, Some(binder), KeyNamer::new(KeyLayout::Bound, session_id), &config)
}

fn items_with(name: &str, value: ItemValue) -> ItemCollection {
	let mut items = ItemCollection::new();
	items.put(name, value);
	items
}

#[tokio::test]
async fn put_then_get_shared_round_trips_items_and_ttl() {
	let engine = FakeEngine::default();
	let mut store = direct_store(&engine, "abc");

	let mut items = items_with("x", ItemValue::I32(42));
	store.put("abc", &mut items, Duration::from_secs(1200)).await.unwrap();

	let record = store.get_shared("abc").await.unwrap();
	assert!(record.lock_acquired);
	assert!(!record.is_locked);
	assert_eq!(record.ttl_seconds, 1200);
	// Adapters that count in minutes see the same budget as 20.
	assert_eq!(record.ttl_seconds / 60, 20);

	let mut loaded = record.items.unwrap();
	assert_eq!(loaded.get("x").unwrap(), Some(&ItemValue::I32(42)));
	assert!(!loaded.dirty());
}

#[tokio::test]
async fn exclusive_lock_is_mutually_exclusive() {
	let engine = FakeEngine::default();
	let mut first = direct_store(&engine, "abc");
	let mut second = direct_store(&engine, "abc");

	let mut items = items_with("x", ItemValue::I32(1));
	first.put("abc", &mut items, Duration::from_secs(1200)).await.unwrap();

	let winner = first.get_exclusive("abc").await.unwrap();
	let loser = second.get_exclusive("abc").await.unwrap();

	assert!(winner.lock_acquired);
	assert!(winner.items.is_some());

	assert!(!loser.lock_acquired);
	assert!(loser.is_locked);
	assert!(loser.items.is_none());
	// The loser learns the winner's token, so it can report the lock age.
	assert_eq!(loser.lock_token, winner.lock_token);
}

#[tokio::test]
async fn get_shared_reports_busy_while_write_locked() {
	let engine = FakeEngine::default();
	let mut writer = direct_store(&engine, "abc");
	let mut reader = direct_store(&engine, "abc");

	let mut items = items_with("x", ItemValue::I32(1));
	writer.put("abc", &mut items, Duration::from_secs(1200)).await.unwrap();
	let held = writer.get_exclusive("abc").await.unwrap();

	let record = reader.get_shared("abc").await.unwrap();
	assert!(!record.lock_acquired);
	assert!(record.is_locked);
	assert_eq!(record.lock_token, held.lock_token);
	assert!(record.items.is_none());
}

#[tokio::test]
async fn release_lock_allows_the_next_acquire() {
	let engine = FakeEngine::default();
	let mut first = direct_store(&engine, "abc");
	let mut second = direct_store(&engine, "abc");

	let held = first.get_exclusive("abc").await.unwrap();
	let token = held.lock_token.unwrap();
	first.release_lock(&token, "abc", Duration::from_secs(1200)).await.unwrap();

	let record = second.get_exclusive("abc").await.unwrap();
	assert!(record.lock_acquired);
}

#[tokio::test]
async fn put_and_release_persists_and_frees_the_lock() {
	let engine = FakeEngine::default();
	let mut store = direct_store(&engine, "abc");

	let held = store.get_exclusive("abc").await.unwrap();
	let token = held.lock_token.unwrap();

	let mut items = items_with("x", ItemValue::Str("updated".into()));
	let written = store
		.put_and_release(Some(&token), "abc", Some(&mut items), Duration::from_secs(1200))
		.await
		.unwrap();
	assert!(written);
	assert!(engine.lock_holder("abc_Lock").is_none());

	let record = store.get_shared("abc").await.unwrap();
	let mut loaded = record.items.unwrap();
	assert_eq!(loaded.get("x").unwrap(), Some(&ItemValue::Str("updated".into())));
}

#[tokio::test]
async fn put_and_release_with_a_stale_token_aborts() {
	let engine = FakeEngine::default();
	let mut store = direct_store(&engine, "abc");

	let mut items = items_with("x", ItemValue::I32(1));
	store.put("abc", &mut items, Duration::from_secs(1200)).await.unwrap();
	let held = store.get_exclusive("abc").await.unwrap();

	let stale = LockToken::from_raw("999");
	let mut replacement = items_with("x", ItemValue::I32(2));
	let written = store
		.put_and_release(Some(&stale), "abc", Some(&mut replacement), Duration::from_secs(1200))
		.await
		.unwrap();
	assert!(!written);
	// The holder's lock and the stored value are untouched.
	assert_eq!(engine.lock_holder("abc_Lock"), held.lock_token.as_ref().map(|token| token.as_str().to_string()));
	let mut current = store.get_exclusive("abc").await.unwrap();
	assert!(!current.lock_acquired);
	assert!(current.items.take().is_none());
}

#[tokio::test]
async fn delete_with_a_mismatched_token_is_a_noop() {
	let engine = FakeEngine::default();
	let mut store = direct_store(&engine, "abc");

	let mut items = items_with("x", ItemValue::I32(42));
	store.put("abc", &mut items, Duration::from_secs(1200)).await.unwrap();
	let _held = store.get_exclusive("abc").await.unwrap();

	let stale = LockToken::from_raw("999");
	let deleted = store.delete(Some(&stale), "abc").await.unwrap();
	assert!(!deleted);
	assert!(engine.has_hash("abc"));
	assert!(engine.lock_holder("abc_Lock").is_some());
}

#[tokio::test]
async fn delete_with_the_matching_token_removes_everything() {
	let engine = FakeEngine::default();
	let mut store = direct_store(&engine, "abc");

	let mut items = items_with("x", ItemValue::I32(42));
	store.put("abc", &mut items, Duration::from_secs(1200)).await.unwrap();
	let held = store.get_exclusive("abc").await.unwrap();

	let deleted = store.delete(held.lock_token.as_ref(), "abc").await.unwrap();
	assert!(deleted);
	assert!(!engine.has_hash("abc"));
	assert!(engine.lock_holder("abc_Lock").is_none());

	let record = store.get_shared("abc").await.unwrap();
	assert!(record.items.is_none());
}

#[tokio::test]
async fn refresh_expiry_never_rewrites_a_stored_timeout() {
	let engine = FakeEngine::default();
	let mut store = direct_store(&engine, "abc");

	let mut items = items_with("x", ItemValue::I32(1));
	store.put("abc", &mut items, Duration::from_secs(1200)).await.unwrap();
	let stored = engine.ttl_field_ticks("abc", TTL_FIELD).unwrap();

	store.refresh_expiry("abc", Duration::from_secs(999)).await.unwrap();
	store.refresh_expiry("abc", Duration::from_secs(5)).await.unwrap();

	// The field is untouched; only the key expiry is re-applied from it.
	assert_eq!(engine.ttl_field_ticks("abc", TTL_FIELD).unwrap(), stored);
	assert_eq!(engine.last_expire("abc"), Some(1200));
}

#[tokio::test]
async fn refresh_expiry_writes_the_default_only_when_missing() {
	let engine = FakeEngine::default();
	{
		let mut state = engine.state.lock().unwrap();
		state.hashes.insert("abc".to_string(), HashMap::new());
	}
	let mut store = direct_store(&engine, "abc");

	store.refresh_expiry("abc", Duration::from_secs(900)).await.unwrap();
	assert_eq!(engine.ttl_field_ticks("abc", TTL_FIELD).unwrap(), 900 * TICKS_PER_SECOND);

	store.refresh_expiry("abc", Duration::from_secs(5)).await.unwrap();
	assert_eq!(engine.ttl_field_ticks("abc", TTL_FIELD).unwrap(), 900 * TICKS_PER_SECOND);
}

#[tokio::test]
async fn refresh_expiry_is_a_noop_without_session_data() {
	let engine = FakeEngine::default();
	let mut store = direct_store(&engine, "abc");
	store.refresh_expiry("abc", Duration::from_secs(900)).await.unwrap();
	assert!(!engine.has_hash("abc"));
}

#[tokio::test]
async fn binding_happens_at_most_once_across_operations() {
	let engine = FakeEngine::default();
	let api = CountingApi::new(900);
	let mut store = bound_store(&engine, &api, "abc");

	let mut items = items_with("x", ItemValue::I32(1));
	store.put("abc", &mut items, Duration::from_secs(1200)).await.unwrap();
	let _ = store.get_shared("abc").await.unwrap();
	store.refresh_expiry("abc", Duration::from_secs(1200)).await.unwrap();

	assert_eq!(api.calls(), 1);

	let flag = store.take_binding_flag().unwrap();
	assert_eq!(flag.max_age_seconds, 900);
	assert!(store.take_binding_flag().is_none());
}

#[tokio::test]
async fn an_identifier_change_forces_a_fresh_binding() {
	let engine = FakeEngine::default();
	let api = CountingApi::new(900);
	let mut store = bound_store(&engine, &api, "abc");

	let _ = store.get_shared("abc").await.unwrap();
	assert_eq!(api.calls(), 1);

	let _ = store.get_shared("xyz").await.unwrap();
	assert_eq!(api.calls(), 2);
}

#[tokio::test]
async fn an_unavailable_counterpart_defers_binding_to_the_next_operation() {
	let engine = FakeEngine::default();
	let api = CountingApi::new(0);
	let mut store = bound_store(&engine, &api, "abc");

	let _ = store.get_shared("abc").await.unwrap();
	let _ = store.get_shared("abc").await.unwrap();

	// Still pending, so every operation retries the binding call.
	assert_eq!(api.calls(), 2);
	assert!(store.take_binding_flag().is_none());
}
