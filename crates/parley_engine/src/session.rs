#![forbid(unsafe_code)]

use std::sync::Arc;

use parley_domain::UserId;
use tokio::sync::RwLock;

use crate::EngineError;

/// Shared authenticated-caller context.
///
/// Cloning the handle shares the same underlying session; every service
/// holds a clone and reads the current user at call time.
#[derive(Debug, Clone, Default)]
pub struct SessionHandle {
	inner: Arc<RwLock<Option<UserId>>>,
}

impl SessionHandle {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn sign_in(&self, user: UserId) {
		*self.inner.write().await = Some(user);
	}

	pub async fn sign_out(&self) {
		*self.inner.write().await = None;
	}

	pub async fn current(&self) -> Option<UserId> {
		self.inner.read().await.clone()
	}

	/// Current user, or `NotSignedIn`.
	pub(crate) async fn require(&self) -> Result<UserId, EngineError> {
		self.current().await.ok_or(EngineError::NotSignedIn)
	}
}
