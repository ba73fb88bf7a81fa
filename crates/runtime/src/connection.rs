//! Shared store connection lifecycle and reconnect gating.
//!
//! One `SharedConnection` is constructed at process start and handed by
//! `Arc` to every request-scoped client. The underlying multiplexed
//! connection is created lazily on first use; sustained connection errors
//! replace it through a conservative gate that tolerates isolated blips but
//! recovers from a genuinely broken connection.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use redis::Client;
use redis::aio::MultiplexedConnection;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::error::Result;

/// Minimum spacing between reconnect attempts.
const RECONNECT_INTERVAL: Duration = Duration::from_secs(60);

/// Error cluster span required before reconnecting, and the maximum gap for
/// two errors to still count as the same cluster.
const ERROR_WINDOW: Duration = Duration::from_secs(30);

/// Reconnect decision state, kept free of clock reads so the decision table
/// is testable.
#[derive(Debug)]
pub struct ReconnectGate {
	last_reconnect: Instant,
	first_error: Option<Instant>,
	previous_error: Option<Instant>,
}

impl ReconnectGate {
	pub fn new(now: Instant) -> Self {
		Self {
			last_reconnect: now,
			first_error: None,
			previous_error: None,
		}
	}

	/// Records a qualifying error and reports whether to rebuild the shared
	/// connection.
	///
	/// Reconnects are spaced at least [`RECONNECT_INTERVAL`] apart. The first
	/// error only opens a tracking window; a later error triggers a rebuild
	/// when the cluster has lasted at least [`ERROR_WINDOW`] and the newest
	/// error arrived within [`ERROR_WINDOW`] of the previous one. An isolated
	/// error after a longer quiet gap restarts the window instead.
	pub fn note_error(&mut self, now: Instant) -> bool {
		if now.saturating_duration_since(self.last_reconnect) <= RECONNECT_INTERVAL {
			return false;
		}

		let (Some(first), Some(previous)) = (self.first_error, self.previous_error) else {
			self.first_error = Some(now);
			self.previous_error = Some(now);
			return false;
		};

		let since_first = now.saturating_duration_since(first);
		let since_previous = now.saturating_duration_since(previous);
		self.previous_error = Some(now);

		if since_first >= ERROR_WINDOW && since_previous <= ERROR_WINDOW {
			self.first_error = None;
			self.previous_error = None;
			self.last_reconnect = now;
			return true;
		}

		if since_previous > ERROR_WINDOW {
			// Quiet gap: this error starts a new cluster.
			self.first_error = Some(now);
		}
		false
	}
}

/// Process-wide handle to the store, shared by every request.
pub struct SharedConnection {
	client: Client,
	handle: AsyncMutex<Option<MultiplexedConnection>>,
	gate: Mutex<ReconnectGate>,
}

impl SharedConnection {
	/// Prepares a connection from store connection parameters.
	///
	/// No I/O happens here; the multiplexed connection is established on
	/// first use. Malformed parameters fail immediately.
	pub fn connect<T: redis::IntoConnectionInfo>(params: T) -> Result<Self> {
		let client = Client::open(params)?;
		Ok(Self {
			client,
			handle: AsyncMutex::new(None),
			gate: Mutex::new(ReconnectGate::new(Instant::now())),
		})
	}

	/// Returns the shared multiplexed connection, establishing it on first
	/// use.
	pub async fn handle(&self) -> Result<MultiplexedConnection> {
		let mut slot = self.handle.lock().await;
		if let Some(connection) = slot.as_ref() {
			return Ok(connection.clone());
		}

		debug!(target = "sx.connection", "establishing store connection");
		let connection = self.client.get_multiplexed_tokio_connection().await?;
		*slot = Some(connection.clone());
		Ok(connection)
	}

	/// Notes a connection-level failure and rebuilds the shared handle when
	/// the gate decides the connection is genuinely broken.
	///
	/// The old handle is dropped best-effort; errors while closing do not
	/// matter because it is already being discarded.
	pub async fn force_reconnect(&self) {
		let rebuild = self.gate.lock().note_error(Instant::now());
		if !rebuild {
			return;
		}

		warn!(target = "sx.connection", "sustained store errors; discarding shared connection");
		let mut slot = self.handle.lock().await;
		*slot = None;
	}
}

impl std::fmt::Debug for SharedConnection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SharedConnection").finish_non_exhaustive()
	}
}
