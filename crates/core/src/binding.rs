//! One-time correlation of two runtimes' sessions.
//!
//! In the bound key layout the store scripts depend on a mapping entry that
//! only the partner runtime's session endpoint can create. The binder calls
//! that endpoint once per browser session, before any script runs, and hands
//! the adapter a flag value to persist as a cookie so later requests skip
//! the call. Binding failures are never fatal: the session simply binds on a
//! later request.

use std::time::Duration;

use reqwest::StatusCode;
use tracing::{debug, warn};
use url::Url;

use sx_runtime::retry_for;

use crate::error::{Result, SxError};

/// Name of the flag cookie marking a browser session as already bound.
///
/// Cookie path and attribute handling belong to the adapter layer; only the
/// name and value are fixed here so every adapter agrees on them.
pub const BINDING_COOKIE_NAME: &str = "SxBind";

/// Any non-empty value works; some consumers only test for presence.
const BINDING_COOKIE_VALUE: &str = "true";

/// Flag the adapter persists once binding succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingFlag {
	pub name: &'static str,
	pub value: &'static str,
	/// Remaining lifetime of the counterpart session; the flag need not
	/// outlive it. An expired flag merely causes one redundant binding call.
	pub max_age_seconds: u64,
}

impl BindingFlag {
	fn for_lifetime(max_age_seconds: u64) -> Self {
		Self {
			name: BINDING_COOKIE_NAME,
			value: BINDING_COOKIE_VALUE,
			max_age_seconds,
		}
	}
}

/// The synchronization endpoint as the binder sees it.
pub trait BindingApi: Send + Sync {
	/// Asks the endpoint to map `session_id` onto the partner session named
	/// by `partner_token`. Returns the counterpart session's remaining
	/// lifetime in seconds; zero (or a negative lifetime collapsed to zero)
	/// means not yet bound.
	fn bind_session(&self, session_id: &str, partner_token: &str) -> impl Future<Output = Result<u64>> + Send;
}

/// `PUT <base>/<session id>` with the partner token as a JSON string body.
#[derive(Debug, Clone)]
pub struct HttpBindingApi {
	http: reqwest::Client,
	base_url: Url,
}

impl HttpBindingApi {
	/// `base_url` must be the binding collection root; a trailing slash is
	/// added when missing so identifier segments join below it.
	pub fn new(mut base_url: Url) -> Self {
		if !base_url.path().ends_with('/') {
			base_url.set_path(&format!("{}/", base_url.path()));
		}
		Self {
			http: reqwest::Client::new(),
			base_url,
		}
	}
}

impl BindingApi for HttpBindingApi {
	async fn bind_session(&self, session_id: &str, partner_token: &str) -> Result<u64> {
		let url = self
			.base_url
			.join(session_id)
			.map_err(|err| SxError::Config(format!("session id does not form a valid binding URL: {err}")))?;

		let response = self.http.put(url).json(&partner_token).send().await.map_err(SxError::Binding)?;
		if response.status() != StatusCode::OK {
			debug!(target = "sx.binding", status = %response.status(), "binding endpoint declined; not yet bound");
			return Ok(0);
		}

		let body = response.text().await.map_err(SxError::Binding)?;
		let remaining = body.trim().parse::<i64>().unwrap_or(0);
		Ok(remaining.max(0) as u64)
	}
}

/// Per-request binding state: binds at most once unless forced.
#[derive(Debug)]
pub struct SessionBinder<A> {
	api: A,
	partner_token: String,
	pending: bool,
	retry_budget: Duration,
}

impl<A: BindingApi> SessionBinder<A> {
	/// `already_bound` reflects the presence of the flag cookie on the
	/// incoming request.
	pub fn new(api: A, partner_token: impl Into<String>, already_bound: bool, retry_budget: Duration) -> Self {
		Self {
			api,
			partner_token: partner_token.into(),
			pending: !already_bound,
			retry_budget,
		}
	}

	pub fn pending(&self) -> bool {
		self.pending
	}

	/// Runs the binding call when still pending, or unconditionally when
	/// `force` is set (the identifier changed mid-request).
	///
	/// Returns the flag to persist on success. Failures and "not yet bound"
	/// responses leave the binder pending; the next request tries again.
	pub async fn bind(&mut self, session_id: &str, force: bool) -> Option<BindingFlag> {
		if !self.pending && !force {
			return None;
		}

		let outcome = retry_for(self.retry_budget, || self.api.bind_session(session_id, &self.partner_token)).await;
		match outcome {
			Ok(remaining) if remaining > 0 => {
				debug!(target = "sx.binding", remaining, "session bound to its counterpart");
				self.pending = false;
				Some(BindingFlag::for_lifetime(remaining))
			}
			Ok(_) => {
				debug!(target = "sx.binding", "counterpart session unavailable; binding deferred");
				self.pending = true;
				None
			}
			Err(err) => {
				warn!(target = "sx.binding", error = %err, "binding call failed; deferring to a later request");
				self.pending = true;
				None
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use super::*;

	struct FakeApi {
		calls: AtomicUsize,
		lifetime: std::result::Result<u64, ()>,
	}

	impl FakeApi {
		fn returning(lifetime: u64) -> Self {
			Self {
				calls: AtomicUsize::new(0),
				lifetime: Ok(lifetime),
			}
		}

		fn failing() -> Self {
			Self {
				calls: AtomicUsize::new(0),
				lifetime: Err(()),
			}
		}

		fn calls(&self) -> usize {
			self.calls.load(Ordering::SeqCst)
		}
	}

	impl BindingApi for &FakeApi {
		async fn bind_session(&self, _session_id: &str, _partner_token: &str) -> Result<u64> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			match self.lifetime {
				Ok(value) => Ok(value),
				Err(()) => Err(SxError::Config("endpoint unreachable".to_string())),
			}
		}
	}

	#[tokio::test(start_paused = true)]
	async fn binds_at_most_once() {
		let api = FakeApi::returning(900);
		let mut binder = SessionBinder::new(&api, "partner-token", false, Duration::from_millis(50));

		let flag = binder.bind("abc", false).await.unwrap();
		assert_eq!(flag.name, BINDING_COOKIE_NAME);
		assert_eq!(flag.max_age_seconds, 900);

		for _ in 0..5 {
			assert!(binder.bind("abc", false).await.is_none());
		}
		assert_eq!(api.calls(), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn flag_cookie_on_the_request_skips_the_call() {
		let api = FakeApi::returning(900);
		let mut binder = SessionBinder::new(&api, "partner-token", true, Duration::from_millis(50));
		assert!(binder.bind("abc", false).await.is_none());
		assert_eq!(api.calls(), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn force_bypasses_the_short_circuit() {
		let api = FakeApi::returning(900);
		let mut binder = SessionBinder::new(&api, "partner-token", true, Duration::from_millis(50));
		assert!(binder.bind("abc", true).await.is_some());
		assert_eq!(api.calls(), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn zero_lifetime_leaves_the_binder_pending() {
		let api = FakeApi::returning(0);
		let mut binder = SessionBinder::new(&api, "partner-token", false, Duration::from_millis(50));
		assert!(binder.bind("abc", false).await.is_none());
		assert!(binder.pending());
	}

	#[tokio::test(start_paused = true)]
	async fn failures_are_retried_within_the_budget_then_deferred() {
		let api = FakeApi::failing();
		let mut binder = SessionBinder::new(&api, "partner-token", false, Duration::from_millis(50));
		assert!(binder.bind("abc", false).await.is_none());
		assert!(binder.pending());
		// 20 ms backoff then the clamped final attempt inside a 50 ms budget.
		assert!(api.calls() >= 2);
	}

	#[test]
	fn base_url_gains_a_trailing_slash() {
		let api = HttpBindingApi::new(Url::parse("http://sessions/api/bind").unwrap());
		assert!(api.base_url.path().ends_with('/'));
		assert_eq!(api.base_url.join("abc").unwrap().as_str(), "http://sessions/api/bind/abc");
	}
}
