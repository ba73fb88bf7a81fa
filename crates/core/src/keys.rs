//! Store key derivation bound to a runtime session identifier.

use sx_protocol::SessionKeys;
use sx_runtime::KeyLayout;

/// Derives the key pair for one session and tracks identifier changes.
///
/// Key material is request-scoped: a namer is created when a request first
/// touches the store and discarded with it, so keys are always re-derived
/// from the identifier actually presented.
#[derive(Debug)]
pub struct KeyNamer {
	session_id: String,
	layout: KeyLayout,
	keys: SessionKeys,
}

impl KeyNamer {
	pub fn new(layout: KeyLayout, session_id: &str) -> Self {
		Self {
			session_id: session_id.to_string(),
			layout,
			keys: derive(layout, session_id),
		}
	}

	pub fn session_id(&self) -> &str {
		&self.session_id
	}

	pub fn keys(&self) -> &SessionKeys {
		&self.keys
	}

	/// Re-derives the key pair when the identifier changed; returns whether
	/// it did, in which case the session must be bound again.
	pub fn rebind_if_changed(&mut self, session_id: &str) -> bool {
		if self.session_id == session_id {
			return false;
		}
		self.session_id = session_id.to_string();
		self.keys = derive(self.layout, session_id);
		true
	}
}

fn derive(layout: KeyLayout, session_id: &str) -> SessionKeys {
	match layout {
		KeyLayout::Direct => SessionKeys {
			data_key: session_id.to_string(),
			lock_key: format!("{session_id}_Lock"),
		},
		KeyLayout::Bound => SessionKeys {
			data_key: format!("{session_id}_Bind"),
			lock_key: format!("{session_id}_Lock"),
		},
	}
}
