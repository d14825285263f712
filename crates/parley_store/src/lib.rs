#![forbid(unsafe_code)]

//! External-collaborator interfaces for the chat engine: the versioned
//! document store, the remote profile service, and the local profile store,
//! plus a complete in-memory backend for tests and demos.

pub mod memory;

use std::collections::BTreeSet;
use std::time::SystemTime;

use async_trait::async_trait;
use parley_domain::{Chatroom, ChatroomId, GameId, LobbyKey, LobbyMembership, Message, Profile, SessionId, UserId};
use tokio::sync::mpsc;

pub use memory::{FixtureProfiles, MemoryProfileStore, MemoryStore, MemoryStoreConfig};

/// Store-tier failure taxonomy.
///
/// `Clone` so a single failure can fan out to every coalesced waiter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
	/// Transport failed or the remote call timed out.
	#[error("network failure: {0}")]
	Network(String),

	/// A conditional write lost the race: the document version moved
	/// between read and write.
	#[error("version conflict on {doc}: expected {expected}, found {found}")]
	Conflict { doc: String, expected: u64, found: u64 },

	/// The store returned a document the engine cannot interpret.
	#[error("malformed document: {0}")]
	Parse(String),

	#[error("not found: {0}")]
	NotFound(String),
}

/// A document snapshot plus the version token required for a conditional
/// write-back. The token is opaque to callers; only the store compares it.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
	pub value: T,
	pub version: u64,
}

impl<T> Versioned<T> {
	pub fn new(value: T, version: u64) -> Self {
		Self { value, version }
	}
}

/// Live feed receiver. Dropping it is the unsubscribe operation: the
/// publisher prunes closed senders, so no delivery happens after drop and
/// dropping twice is trivially idempotent.
pub type WatchRx<T> = mpsc::Receiver<T>;

/// Remote, listener-based document store.
///
/// Required primitives per collection: point read, point write, conditional
/// write (compare-and-swap on the document version), atomic numeric
/// increment, and live change subscription with ordering and limit.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
	// --- chatrooms ---

	async fn get_chatroom(&self, id: &ChatroomId) -> Result<Versioned<Chatroom>, StoreError>;

	/// Point-create. Fails with `Conflict` if the id already exists.
	async fn insert_chatroom(&self, room: Chatroom) -> Result<(), StoreError>;

	/// Conditional write: succeeds only if the stored version still equals
	/// `expected`; the stored version is bumped on success.
	async fn write_chatroom_if_version(&self, room: Chatroom, expected: u64) -> Result<(), StoreError>;

	/// All chatrooms the user participates in, most recently updated first.
	async fn chatrooms_for_participant(&self, user: &UserId) -> Result<Vec<Chatroom>, StoreError>;

	/// First chatroom linked to the given session, if any.
	async fn chatroom_by_session(&self, session: &SessionId) -> Result<Option<Chatroom>, StoreError>;

	/// Lobby message container with an exact tag-set match, if any.
	async fn lobby_chatroom(&self, game: &GameId, tags: &BTreeSet<String>) -> Result<Option<Chatroom>, StoreError>;

	/// Bump `updated_at`. Best-effort; callers treat failures as ignorable.
	async fn touch_chatroom(&self, id: &ChatroomId, at: SystemTime) -> Result<(), StoreError>;

	/// Live feed of the chatroom document. Emits the current snapshot on
	/// subscribe, then every subsequent write.
	async fn watch_chatroom(&self, id: &ChatroomId) -> Result<WatchRx<Versioned<Chatroom>>, StoreError>;

	// --- messages ---

	async fn append_message(&self, message: Message) -> Result<(), StoreError>;

	/// Live feed of the newest `limit` messages of a chatroom, ascending by
	/// creation time. Every emission is the full reconciled window.
	async fn watch_messages(&self, id: &ChatroomId, limit: usize) -> Result<WatchRx<Vec<Message>>, StoreError>;

	// --- unread counters ---

	/// Atomically add 1 to the user's counter for this room, creating it
	/// lazily at 1.
	async fn increment_unread(&self, user: &UserId, room: &ChatroomId) -> Result<(), StoreError>;

	/// Delete the counter (reset to absent).
	async fn clear_unread(&self, user: &UserId, room: &ChatroomId) -> Result<(), StoreError>;

	/// Live feed of all the user's per-chatroom counters.
	async fn watch_unread(&self, user: &UserId) -> Result<WatchRx<Vec<(ChatroomId, u64)>>, StoreError>;

	// --- lobby presence ---

	async fn upsert_lobby_membership(&self, membership: LobbyMembership) -> Result<(), StoreError>;

	/// Live feed of up to `limit` membership rows for the lobby, ordered by
	/// `last_changed` descending.
	async fn watch_lobby(&self, key: &LobbyKey, limit: usize) -> Result<WatchRx<Vec<LobbyMembership>>, StoreError>;
}

/// Remote profile service, batched by id.
#[async_trait]
pub trait ProfileService: Send + Sync + 'static {
	/// Fetch profiles for the given ids. Unknown ids are omitted from the
	/// result rather than failing the batch.
	async fn fetch_profiles(&self, ids: &[UserId]) -> Result<Vec<Profile>, StoreError>;
}

/// Local persistent tier backing the profile cache.
#[async_trait]
pub trait ProfileStore: Send + Sync + 'static {
	async fn get(&self, user: &UserId) -> Option<Profile>;

	/// All-or-none batch lookup: `Some` only when every id is present.
	async fn get_all(&self, users: &[UserId]) -> Option<Vec<Profile>>;

	async fn put_many(&self, profiles: Vec<Profile>);

	async fn remove(&self, user: &UserId);

	async fn clear(&self);
}
