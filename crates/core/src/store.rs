//! Process-wide store context and the request-scoped session facade.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use url::Url;

use sx_protocol::{ItemCollection, LockToken, SessionRecord, codec};
use sx_runtime::{RedisEngine, ScriptEngine, SharedConnection, StoreClient};

use crate::binding::{BindingApi, BindingFlag, HttpBindingApi, SessionBinder};
use crate::config::StoreConfig;
use crate::error::{Result, SxError};
use crate::keys::KeyNamer;

/// Everything shared by the whole process: validated configuration, the
/// shared store connection, and the binding client.
///
/// Built once at start-up and passed by reference to the components that
/// need store access; configuration errors are fatal here and never retried.
pub struct StoreContext {
	config: StoreConfig,
	connection: Arc<SharedConnection>,
	binding: Option<HttpBindingApi>,
}

impl StoreContext {
	pub fn new(config: StoreConfig) -> Result<Self> {
		config.validate()?;
		let connection = Arc::new(SharedConnection::connect(config.connection_url.as_str())?);
		let binding = match config.binding_base_url.as_deref() {
			// Validation already proved the URL parses.
			Some(base) => Url::parse(base).ok().map(HttpBindingApi::new),
			None => None,
		};
		Ok(Self {
			config,
			connection,
			binding,
		})
	}

	pub fn config(&self) -> &StoreConfig {
		&self.config
	}

	pub fn connection(&self) -> &Arc<SharedConnection> {
		&self.connection
	}

	/// Opens the request-scoped facade for one session.
	///
	/// `partner_token` is the other runtime's session token from the
	/// incoming request; `already_bound` reflects the presence of the flag
	/// cookie. Both matter only in the bound layout.
	pub fn session(&self, session_id: &str, partner_token: &str, already_bound: bool) -> SessionStore<RedisEngine, HttpBindingApi> {
		let engine = RedisEngine::new(Arc::clone(&self.connection));
		let client = StoreClient::new(engine, self.config.key_layout, self.config.retry_budget(), self.config.session_ttl_secs);
		let binder = self
			.binding
			.clone()
			.map(|api| SessionBinder::new(api, partner_token, already_bound, self.config.retry_budget()));
		SessionStore::from_parts(client, binder, KeyNamer::new(self.config.key_layout, session_id), &self.config)
	}
}

/// Request-scoped session operations.
///
/// One logical access sequence runs to completion before the next within a
/// request; mutual exclusion across requests and processes is enforced only
/// through the store's lock key.
pub struct SessionStore<E: ScriptEngine, A: BindingApi = HttpBindingApi> {
	client: StoreClient<E>,
	binder: Option<SessionBinder<A>>,
	namer: KeyNamer,
	session_ttl_seconds: u64,
	lock_ttl_seconds: u64,
	propagate_errors: bool,
	binding_flag: Option<BindingFlag>,
}

impl<E: ScriptEngine, A: BindingApi> SessionStore<E, A> {
	/// Assembles a facade from explicit parts; [`StoreContext::session`] is
	/// the production path.
	pub fn from_parts(client: StoreClient<E>, binder: Option<SessionBinder<A>>, namer: KeyNamer, config: &StoreConfig) -> Self {
		Self {
			client,
			binder,
			namer,
			session_ttl_seconds: config.session_ttl_secs,
			lock_ttl_seconds: config.lock_ttl_secs,
			propagate_errors: config.propagate_errors,
			binding_flag: None,
		}
	}

	/// Flag emitted by a successful binding call, for the adapter to persist
	/// on the response. Cleared by taking it.
	pub fn take_binding_flag(&mut self) -> Option<BindingFlag> {
		self.binding_flag.take()
	}

	/// Reads the session without locking it.
	///
	/// A competing write lock is a normal outcome, not an error: the record
	/// reports `is_locked` with the holder's token and carries no items.
	pub async fn get_shared(&mut self, session_id: &str) -> Result<SessionRecord> {
		self.resolve(session_id).await;
		Ok(self.client.check_lock_and_get(self.namer.keys()).await?)
	}

	/// Takes the write lock and reads the session in one atomic unit.
	pub async fn get_exclusive(&mut self, session_id: &str) -> Result<SessionRecord> {
		self.resolve(session_id).await;
		let token = LockToken::now();
		Ok(self.client.acquire_write_lock_and_get(self.namer.keys(), &token, self.lock_ttl_seconds).await?)
	}

	/// Unconditionally overwrites the session items; used for first-time
	/// initialization.
	pub async fn put(&mut self, session_id: &str, items: &mut ItemCollection, ttl: Duration) -> Result<()> {
		self.resolve(session_id).await;
		let Some(blob) = self.encode_items(items)? else {
			return Ok(());
		};
		Ok(self.client.put_data(self.namer.keys(), blob, ttl.as_secs()).await?)
	}

	/// Writes the items (when given) and releases the lock in one atomic
	/// unit; a stale token aborts the write and is reported as `false`.
	pub async fn put_and_release(&mut self, token: Option<&LockToken>, session_id: &str, items: Option<&mut ItemCollection>, ttl: Duration) -> Result<bool> {
		self.resolve(session_id).await;
		let blob = match items {
			Some(items) => match self.encode_items(items)? {
				Some(blob) => Some(blob),
				None => return Ok(false),
			},
			None => None,
		};
		let written = self.client.release_lock_and_put_data(self.namer.keys(), token, blob, ttl.as_secs()).await?;
		if !written {
			debug!(target = "sx.store", session = session_id, "stale lock token; write aborted");
		}
		Ok(written)
	}

	/// Releases the lock when `token` still owns it and refreshes expiry.
	pub async fn release_lock(&mut self, token: &LockToken, session_id: &str, ttl: Duration) -> Result<()> {
		self.resolve(session_id).await;
		Ok(self.client.release_lock_if_token_matches(self.namer.keys(), token, ttl.as_secs()).await?)
	}

	/// Deletes the session; a mismatched non-empty token is a no-op reported
	/// as `false`.
	pub async fn delete(&mut self, token: Option<&LockToken>, session_id: &str) -> Result<bool> {
		self.resolve(session_id).await;
		let deleted = self.client.delete_session(self.namer.keys(), token).await?;
		if !deleted {
			debug!(target = "sx.store", session = session_id, "stale lock token; delete aborted");
		}
		Ok(deleted)
	}

	/// Re-applies the session's idle timeout as key expiry; `ttl` is only
	/// written when no timeout is stored yet.
	pub async fn refresh_expiry(&mut self, session_id: &str, ttl: Duration) -> Result<()> {
		self.resolve(session_id).await;
		Ok(self.client.refresh_expiry(self.namer.keys(), ttl.as_secs()).await?)
	}

	/// Age of a lock given its token; adapters report this upstream when a
	/// session comes back busy.
	pub fn lock_age(&self, token: &LockToken) -> Duration {
		token.age().try_into().unwrap_or(Duration::ZERO)
	}

	/// Default idle lifetime used when a session has no stored timeout.
	pub fn session_ttl(&self) -> Duration {
		Duration::from_secs(self.session_ttl_seconds)
	}

	/// Resolves keys for the presented identifier, binding first when the
	/// deployment correlates two identifier spaces. An identifier change
	/// mid-request forces a fresh binding.
	async fn resolve(&mut self, session_id: &str) {
		let changed = self.namer.rebind_if_changed(session_id);
		let Some(binder) = self.binder.as_mut() else {
			return;
		};
		if let Some(flag) = binder.bind(self.namer.session_id(), changed).await {
			self.binding_flag = Some(flag);
		}
	}

	/// Serialization failures either propagate or degrade to "nothing to
	/// write" per the deployment toggle.
	fn encode_items(&self, items: &mut ItemCollection) -> Result<Option<Vec<u8>>> {
		match codec::encode(items) {
			Ok(blob) => Ok(Some(blob)),
			Err(err) if self.propagate_errors => Err(SxError::Codec(err)),
			Err(err) => {
				warn!(target = "sx.store", error = %err, "session items not serializable; skipping write");
				Ok(None)
			}
		}
	}
}
