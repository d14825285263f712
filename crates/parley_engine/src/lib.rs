#![forbid(unsafe_code)]

//! Presence-synchronized chat engine.
//!
//! Six services over a versioned document store: chatroom resolution,
//! best-effort presence sets, unread counters, a live message relay, a
//! request-coalescing profile cache, and a time-windowed lobby tracker.
//! Construct them once via [`Engine::new`] and share by reference; there are
//! no global singletons.

pub mod config;
pub mod diff;

mod cas;
mod engine;
mod lobby;
mod presence;
mod profiles;
mod relay;
mod resolver;
mod session;
mod unread;

#[cfg(test)]
mod resolver_tests;

pub use config::EngineConfig;
pub use engine::Engine;
pub use lobby::{LobbyPresenceTracker, LobbyRoster};
pub use presence::PresenceStateStore;
pub use profiles::ProfileResolutionCache;
pub use relay::MessageStreamRelay;
pub use resolver::ChatroomResolver;
pub use session::SessionHandle;
pub use unread::{ChatroomScope, UnreadCounterService};

use parley_store::StoreError;

/// Engine failure taxonomy.
///
/// Identity- and chatroom-resolution failures are surfaced to callers as
/// these typed errors; presence mutations and unread increments are
/// best-effort and never surface (failures are logged and swallowed).
/// `Clone` so one failure can fan out to every coalesced waiter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
	/// No authenticated user context.
	#[error("not signed in")]
	NotSignedIn,

	/// Transport or remote call failed or timed out.
	#[error("network failure: {0}")]
	Network(String),

	/// A compare-and-swap loop exhausted its retry budget.
	#[error("transaction conflict: {0}")]
	Conflict(String),

	/// Malformed document from the store.
	#[error("parse failure: {0}")]
	Parse(String),

	/// Resolution found nothing.
	#[error("not found")]
	NotFound,
}

impl From<StoreError> for EngineError {
	fn from(e: StoreError) -> Self {
		match e {
			StoreError::Network(s) => EngineError::Network(s),
			StoreError::Conflict { doc, expected, found } => {
				EngineError::Conflict(format!("{doc}: expected version {expected}, found {found}"))
			}
			StoreError::Parse(s) => EngineError::Parse(s),
			StoreError::NotFound(_) => EngineError::NotFound,
		}
	}
}
