//! Atomic Lua programs executed against the session store.
//!
//! Every program takes the key pair `[data key, lock key]` and a positional
//! argument vector, runs as one indivisible unit store-side, and extends key
//! expiry on success. Two layouts exist: in the direct layout the data key
//! addresses the session hash itself; in the bound layout it is a mapping
//! entry written by the binding endpoint and must be resolved with one `GET`
//! hop before the first field access. The layout is a configuration choice
//! rendered into the script bodies once at construction.

use redis::Script;
use serde::{Deserialize, Serialize};

/// Hash field holding the serialized item blob.
pub const DATA_FIELD: &str = "data";

/// Hash field holding the session timeout in 100 ns ticks.
pub const TTL_FIELD: &str = "sldexp";

/// How session data keys are laid out in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyLayout {
	/// The data key addresses the session hash directly.
	#[default]
	Direct,
	/// The data key maps to the partner runtime's hash key, resolved first.
	Bound,
}

/// Identifies one of the atomic store programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
	AcquireWriteLockAndGet,
	CheckLockAndGet,
	ReleaseLockIfTokenMatches,
	RefreshExpiry,
	PutData,
	ReleaseLockAndPutData,
	DeleteSession,
}

/// One rendered program plus its cached-handle hash.
pub struct StoreScript {
	kind: ScriptKind,
	body: String,
	hash: String,
}

impl StoreScript {
	fn new(kind: ScriptKind, body: String) -> Self {
		let hash = Script::new(&body).get_hash().to_string();
		Self { kind, body, hash }
	}

	pub fn kind(&self) -> ScriptKind {
		self.kind
	}

	pub fn body(&self) -> &str {
		&self.body
	}

	/// SHA-1 handle used for cached evaluation.
	pub fn hash(&self) -> &str {
		&self.hash
	}
}

/// The full program set for one key layout.
pub struct ScriptSet {
	pub acquire: StoreScript,
	pub check: StoreScript,
	pub release: StoreScript,
	pub refresh: StoreScript,
	pub put: StoreScript,
	pub release_and_put: StoreScript,
	pub delete: StoreScript,
}

impl ScriptSet {
	pub fn for_layout(layout: KeyLayout) -> Self {
		Self {
			acquire: StoreScript::new(ScriptKind::AcquireWriteLockAndGet, render(ACQUIRE, layout)),
			check: StoreScript::new(ScriptKind::CheckLockAndGet, render(CHECK, layout)),
			release: StoreScript::new(ScriptKind::ReleaseLockIfTokenMatches, render(RELEASE, layout)),
			refresh: StoreScript::new(ScriptKind::RefreshExpiry, render(REFRESH, layout)),
			put: StoreScript::new(ScriptKind::PutData, render(PUT, layout)),
			release_and_put: StoreScript::new(ScriptKind::ReleaseLockAndPutData, render(RELEASE_AND_PUT, layout)),
			delete: StoreScript::new(ScriptKind::DeleteSession, render(DELETE, layout)),
		}
	}
}

fn render(template: &str, layout: KeyLayout) -> String {
	let (resolve, touch, bind_del) = match layout {
		KeyLayout::Direct => ("local dataKey = KEYS[1]", "", ""),
		KeyLayout::Bound => (
			"local dataKey = redis.call('GET', KEYS[1])",
			"redis.call('EXPIRE', KEYS[1], ttl)",
			"if dataKey then redis.call('DEL', dataKey) end",
		),
	};
	template
		.replace("__RESOLVE__", resolve)
		.replace("__BIND_TOUCH__", touch)
		.replace("__BIND_DEL__", bind_del)
}

/// KEYS: [data, lock]. ARGV: [ttl field, data field, token, lock ttl secs].
/// Reply: [holder token, blob?, ttl secs or -1, locked?].
const ACQUIRE: &str = r"
local ret = {}
__RESOLVE__
local fields = redis.call('HMGET', dataKey, ARGV[1], ARGV[2])
local lockValue = ARGV[3]
local acquired = redis.call('SETNX', KEYS[2], ARGV[3])
local isLocked = true
if acquired == 0 then
    lockValue = redis.call('GET', KEYS[2])
else
    redis.call('EXPIRE', KEYS[2], ARGV[4])
    isLocked = false
end
ret[1] = lockValue
if lockValue == ARGV[3] then ret[2] = fields[2] else ret[2] = '' end
local ttl = fields[1]
if ttl ~= false then
    ttl = math.floor(ttl / 10000000)
    ret[3] = ttl
    redis.call('EXPIRE', dataKey, ttl)
    __BIND_TOUCH__
    redis.call('EXPIRE', KEYS[2], ttl)
else
    ret[3] = -1
end
ret[4] = isLocked
return ret";

/// KEYS: [data, lock]. ARGV: [ttl field, data field].
/// Reply: [holder token or '', blob?, ttl secs or -1].
const CHECK: &str = r"
__RESOLVE__
local fields = redis.call('HMGET', dataKey, ARGV[1], ARGV[2])
local ret = {}
local lockValue = ''
local held = redis.call('GET', KEYS[2])
if held ~= false then
    lockValue = held
end
ret[1] = lockValue
if lockValue == '' then ret[2] = fields[2] else ret[2] = '' end
local ttl = fields[1]
if ttl ~= false then
    ttl = math.floor(ttl / 10000000)
    ret[3] = ttl
    redis.call('EXPIRE', dataKey, ttl)
    __BIND_TOUCH__
    redis.call('EXPIRE', KEYS[2], ttl)
else
    ret[3] = -1
end
return ret";

/// KEYS: [data, lock]. ARGV: [ttl field, token, fallback ttl secs].
const RELEASE: &str = r"
__RESOLVE__
local held = redis.call('GET', KEYS[2])
if held == ARGV[2] then
    redis.call('DEL', KEYS[2])
end
local ttl = redis.call('HMGET', dataKey, ARGV[1])[1]
if ttl then
    ttl = math.floor(ttl / 10000000)
else
    ttl = tonumber(ARGV[3])
end
redis.call('EXPIRE', dataKey, ttl)
__BIND_TOUCH__
return 1";

/// KEYS: [data, lock]. ARGV: [ttl field, default ttl secs].
const REFRESH: &str = r"
__RESOLVE__
if redis.call('EXISTS', dataKey) == 0 then
    return 1
end
local ttl = redis.call('HMGET', dataKey, ARGV[1])[1]
if ttl then
    ttl = math.floor(ttl / 10000000)
else
    ttl = tonumber(ARGV[2])
    redis.call('HSET', dataKey, ARGV[1], ttl * 10000000)
end
redis.call('EXPIRE', dataKey, ttl)
__BIND_TOUCH__
return 1";

/// KEYS: [data, lock]. ARGV: [ttl field, data field, blob, ttl secs].
const PUT: &str = r"
__RESOLVE__
local ttl = tonumber(ARGV[4])
redis.call('HSET', dataKey, ARGV[2], ARGV[3], ARGV[1], ttl * 10000000)
redis.call('EXPIRE', dataKey, ttl)
__BIND_TOUCH__
return 1";

/// KEYS: [data, lock]. ARGV: [ttl field, data field, expected token or '',
/// ttl secs, has-data flag, blob].
const RELEASE_AND_PUT: &str = r"
if ARGV[3] ~= '' then
    local held = redis.call('GET', KEYS[2])
    if held ~= ARGV[3] then
        return 0
    end
end
__RESOLVE__
local ttl = tonumber(ARGV[4])
if tonumber(ARGV[5]) ~= 0 then
    redis.call('HSET', dataKey, ARGV[2], ARGV[6])
end
redis.call('HSET', dataKey, ARGV[1], ttl * 10000000)
redis.call('EXPIRE', dataKey, ttl)
__BIND_TOUCH__
redis.call('DEL', KEYS[2])
return 1";

/// KEYS: [data, lock]. ARGV: [expected token or ''].
const DELETE: &str = r"
if ARGV[1] ~= '' then
    local held = redis.call('GET', KEYS[2])
    if held ~= ARGV[1] then
        return 0
    end
end
__RESOLVE__
redis.call('DEL', KEYS[1])
__BIND_DEL__
redis.call('DEL', KEYS[2])
return 1";
