//! Deployment configuration for the shared session store.

use std::time::Duration;

use serde::Deserialize;
use url::Url;

use sx_runtime::KeyLayout;

use crate::error::{Result, SxError};

const DEFAULT_SESSION_TTL_SECS: u64 = 1200;
const DEFAULT_LOCK_TTL_SECS: u64 = 110;
const DEFAULT_RETRY_BUDGET_MS: u64 = 5000;

/// Deployment-wide settings, loaded once at process start.
///
/// Validation failures are fatal and surface at [`StoreContext::new`]; they
/// are never retried.
///
/// [`StoreContext::new`]: crate::store::StoreContext::new
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
	/// Store connection parameters, `redis://` URL form.
	pub connection_url: String,

	/// How session data keys are laid out; `bound` adds the cross-runtime
	/// indirection hop and requires `binding_base_url`.
	#[serde(default)]
	pub key_layout: KeyLayout,

	/// Base URL of the session binding endpoint; bound layout only.
	#[serde(default)]
	pub binding_base_url: Option<String>,

	/// Idle lifetime applied to sessions that carry no stored timeout yet.
	#[serde(default = "default_session_ttl_secs")]
	pub session_ttl_secs: u64,

	/// Expiry applied to a freshly-taken lock key, bounding abandoned locks.
	#[serde(default = "default_lock_ttl_secs")]
	pub lock_ttl_secs: u64,

	/// Cumulative time budget for retrying store and binding calls.
	#[serde(default = "default_retry_budget_ms")]
	pub retry_budget_ms: u64,

	/// Whether serialization failures propagate to the caller or are
	/// swallowed into best-effort empty results.
	#[serde(default = "default_propagate_errors")]
	pub propagate_errors: bool,
}

fn default_session_ttl_secs() -> u64 {
	DEFAULT_SESSION_TTL_SECS
}

fn default_lock_ttl_secs() -> u64 {
	DEFAULT_LOCK_TTL_SECS
}

fn default_retry_budget_ms() -> u64 {
	DEFAULT_RETRY_BUDGET_MS
}

fn default_propagate_errors() -> bool {
	true
}

impl StoreConfig {
	pub fn new(connection_url: impl Into<String>) -> Self {
		Self {
			connection_url: connection_url.into(),
			key_layout: KeyLayout::default(),
			binding_base_url: None,
			session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
			lock_ttl_secs: DEFAULT_LOCK_TTL_SECS,
			retry_budget_ms: DEFAULT_RETRY_BUDGET_MS,
			propagate_errors: default_propagate_errors(),
		}
	}

	/// Switches to the bound layout using `base_url` for the binding call.
	pub fn with_binding(mut self, base_url: impl Into<String>) -> Self {
		self.key_layout = KeyLayout::Bound;
		self.binding_base_url = Some(base_url.into());
		self
	}

	pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
		self.session_ttl_secs = ttl.as_secs();
		self
	}

	pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
		self.lock_ttl_secs = ttl.as_secs();
		self
	}

	pub fn with_retry_budget(mut self, budget: Duration) -> Self {
		self.retry_budget_ms = budget.as_millis() as u64;
		self
	}

	pub fn with_propagate_errors(mut self, propagate: bool) -> Self {
		self.propagate_errors = propagate;
		self
	}

	pub fn retry_budget(&self) -> Duration {
		Duration::from_millis(self.retry_budget_ms)
	}

	/// Rejects malformed or conflicting settings.
	pub fn validate(&self) -> Result<()> {
		if self.connection_url.trim().is_empty() {
			return Err(SxError::Config("connectionUrl must not be empty".to_string()));
		}
		if self.session_ttl_secs == 0 {
			return Err(SxError::Config("sessionTtlSecs must be positive".to_string()));
		}
		if self.lock_ttl_secs == 0 {
			return Err(SxError::Config("lockTtlSecs must be positive".to_string()));
		}
		match (self.key_layout, self.binding_base_url.as_deref()) {
			(KeyLayout::Bound, None) => {
				return Err(SxError::Config("bound key layout requires bindingBaseUrl".to_string()));
			}
			(KeyLayout::Direct, Some(_)) => {
				return Err(SxError::Config("bindingBaseUrl is only meaningful with the bound key layout".to_string()));
			}
			(KeyLayout::Bound, Some(base)) => {
				Url::parse(base).map_err(|err| SxError::Config(format!("bindingBaseUrl is not a valid URL: {err}")))?;
			}
			(KeyLayout::Direct, None) => {}
		}
		Ok(())
	}
}
