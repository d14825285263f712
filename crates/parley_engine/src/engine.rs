#![forbid(unsafe_code)]

use std::sync::Arc;

use parley_domain::UserId;
use parley_store::{DocumentStore, ProfileService, ProfileStore};
use tracing::info;

use crate::config::EngineConfig;
use crate::lobby::LobbyPresenceTracker;
use crate::presence::PresenceStateStore;
use crate::profiles::ProfileResolutionCache;
use crate::relay::MessageStreamRelay;
use crate::resolver::ChatroomResolver;
use crate::session::SessionHandle;
use crate::unread::UnreadCounterService;

/// All engine services, constructed once at process start and shared by
/// reference. Anything that needs a human-readable identity goes through
/// [`profiles`](Self::profiles), never the remote profile service directly.
pub struct Engine {
	session: SessionHandle,
	profiles: Arc<ProfileResolutionCache>,
	resolver: ChatroomResolver,
	presence: PresenceStateStore,
	unread: Arc<UnreadCounterService>,
	relay: Arc<MessageStreamRelay>,
	lobby: LobbyPresenceTracker,
}

impl Engine {
	pub fn new(
		store: Arc<dyn DocumentStore>,
		profile_service: Arc<dyn ProfileService>,
		profile_store: Arc<dyn ProfileStore>,
		cfg: EngineConfig,
	) -> Self {
		let session = SessionHandle::new();

		let profiles = Arc::new(ProfileResolutionCache::new(
			profile_service,
			profile_store,
			cfg.fetch_timeout,
		));
		let unread = Arc::new(UnreadCounterService::new(store.clone(), &cfg));
		let relay = Arc::new(MessageStreamRelay::new(
			store.clone(),
			unread.clone(),
			session.clone(),
			&cfg,
		));
		let resolver = ChatroomResolver::new(store.clone(), session.clone(), unread.clone(), relay.clone(), &cfg);
		let presence = PresenceStateStore::new(store.clone(), session.clone(), &cfg);
		let lobby = LobbyPresenceTracker::new(store, session.clone(), &cfg);

		Self {
			session,
			profiles,
			resolver,
			presence,
			unread,
			relay,
			lobby,
		}
	}

	/// Begin an authenticated session. Clears the profile cache so stale
	/// profiles from a previous session never leak into this one.
	pub async fn sign_in(&self, user: UserId) {
		info!(user = %user, "signing in");
		self.profiles.clear().await;
		self.session.sign_in(user).await;
	}

	pub async fn sign_out(&self) {
		info!("signing out");
		self.session.sign_out().await;
		self.profiles.clear().await;
	}

	/// Relationship events (friend added, accepted, blocked) usually
	/// accompany a profile change; evict that user's cached profile.
	pub async fn relationship_changed(&self, user: &UserId) {
		self.profiles.invalidate(user).await;
	}

	pub fn session(&self) -> &SessionHandle {
		&self.session
	}

	pub fn profiles(&self) -> &ProfileResolutionCache {
		&self.profiles
	}

	pub fn resolver(&self) -> &ChatroomResolver {
		&self.resolver
	}

	pub fn presence(&self) -> &PresenceStateStore {
		&self.presence
	}

	pub fn unread(&self) -> &UnreadCounterService {
		&self.unread
	}

	pub fn relay(&self) -> &MessageStreamRelay {
		&self.relay
	}

	pub fn lobby(&self) -> &LobbyPresenceTracker {
		&self.lobby
	}
}
