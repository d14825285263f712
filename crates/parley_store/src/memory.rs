#![forbid(unsafe_code)]

//! In-memory [`DocumentStore`] backend with live fan-out, used by the demo
//! binary and the engine test-suite. Not a transport: it exists so the
//! engine's semantics can be exercised without a remote store.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use parley_domain::{Chatroom, ChatroomId, GameId, LobbyKey, LobbyMembership, Message, Profile, SessionId, UserId};
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use crate::{DocumentStore, ProfileService, ProfileStore, StoreError, Versioned, WatchRx};

/// Configuration for [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct MemoryStoreConfig {
	/// Maximum number of queued emissions per watcher.
	pub watch_queue_capacity: usize,
}

impl Default for MemoryStoreConfig {
	fn default() -> Self {
		Self { watch_queue_capacity: 64 }
	}
}

/// In-memory versioned document store.
#[derive(Debug, Clone)]
pub struct MemoryStore {
	inner: Arc<Mutex<Inner>>,
	cfg: MemoryStoreConfig,
}

#[derive(Debug, Default)]
struct Inner {
	chatrooms: HashMap<ChatroomId, Versioned<Chatroom>>,

	/// Per-room message log, kept ascending by `created_at`.
	messages: HashMap<ChatroomId, Vec<Message>>,

	unread: HashMap<UserId, HashMap<ChatroomId, u64>>,

	/// Lobby rows keyed by `LobbyKey::storage_key()`, then user.
	lobby: HashMap<String, HashMap<UserId, LobbyMembership>>,

	room_watchers: HashMap<ChatroomId, Vec<mpsc::Sender<Versioned<Chatroom>>>>,
	message_watchers: HashMap<ChatroomId, Vec<LimitedWatcher<Vec<Message>>>>,
	unread_watchers: HashMap<UserId, Vec<mpsc::Sender<Vec<(ChatroomId, u64)>>>>,
	lobby_watchers: HashMap<String, Vec<LimitedWatcher<Vec<LobbyMembership>>>>,
}

#[derive(Debug)]
struct LimitedWatcher<T> {
	limit: usize,
	tx: mpsc::Sender<T>,
}

impl MemoryStore {
	pub fn new(cfg: MemoryStoreConfig) -> Self {
		Self {
			inner: Arc::new(Mutex::new(Inner::default())),
			cfg,
		}
	}

	fn channel<T>(&self) -> (mpsc::Sender<T>, mpsc::Receiver<T>) {
		mpsc::channel(self.cfg.watch_queue_capacity.max(1))
	}
}

impl Default for MemoryStore {
	fn default() -> Self {
		Self::new(MemoryStoreConfig::default())
	}
}

fn publish<T: Clone>(watchers: &mut Vec<mpsc::Sender<T>>, item: &T) {
	watchers.retain(|tx| !tx.is_closed());
	for tx in watchers.iter() {
		if tx.try_send(item.clone()).is_err() {
			debug!("memory store: dropping emission (watcher queue full or closed)");
		}
	}
}

impl Inner {
	fn publish_room(&mut self, id: &ChatroomId) {
		let Some(doc) = self.chatrooms.get(id).cloned() else {
			return;
		};
		if let Some(watchers) = self.room_watchers.get_mut(id) {
			publish(watchers, &doc);
		}
	}

	fn message_window(&self, id: &ChatroomId, limit: usize) -> Vec<Message> {
		let log = self.messages.get(id).map(Vec::as_slice).unwrap_or(&[]);
		let start = log.len().saturating_sub(limit);
		log[start..].to_vec()
	}

	fn publish_messages(&mut self, id: &ChatroomId) {
		let log: Vec<Message> = self.messages.get(id).cloned().unwrap_or_default();
		let Some(watchers) = self.message_watchers.get_mut(id) else {
			return;
		};

		watchers.retain(|w| !w.tx.is_closed());
		for w in watchers.iter() {
			let start = log.len().saturating_sub(w.limit);
			if w.tx.try_send(log[start..].to_vec()).is_err() {
				debug!(room = %id, "memory store: dropping message emission");
			}
		}
	}

	fn unread_snapshot(&self, user: &UserId) -> Vec<(ChatroomId, u64)> {
		let mut rows: Vec<(ChatroomId, u64)> = self
			.unread
			.get(user)
			.map(|m| m.iter().map(|(k, v)| (k.clone(), *v)).collect())
			.unwrap_or_default();
		rows.sort_by(|a, b| a.0.cmp(&b.0));
		rows
	}

	fn publish_unread(&mut self, user: &UserId) {
		let snapshot = self.unread_snapshot(user);
		if let Some(watchers) = self.unread_watchers.get_mut(user) {
			publish(watchers, &snapshot);
		}
	}

	fn lobby_rows(&self, storage_key: &str, limit: usize) -> Vec<LobbyMembership> {
		let mut rows: Vec<LobbyMembership> = self
			.lobby
			.get(storage_key)
			.map(|m| m.values().cloned().collect())
			.unwrap_or_default();
		rows.sort_by(|a, b| b.last_changed.cmp(&a.last_changed).then_with(|| a.user.cmp(&b.user)));
		rows.truncate(limit);
		rows
	}

	fn publish_lobby(&mut self, storage_key: &str) {
		// Taken out and reinserted so `lobby_rows` can borrow the rest of
		// the state; no await happens in between.
		let Some(mut watchers) = self.lobby_watchers.remove(storage_key) else {
			return;
		};

		watchers.retain(|w| !w.tx.is_closed());
		for w in &watchers {
			if w.tx.try_send(self.lobby_rows(storage_key, w.limit)).is_err() {
				debug!(lobby = %storage_key, "memory store: dropping lobby emission");
			}
		}

		if !watchers.is_empty() {
			self.lobby_watchers.insert(storage_key.to_string(), watchers);
		}
	}
}

#[async_trait]
impl DocumentStore for MemoryStore {
	async fn get_chatroom(&self, id: &ChatroomId) -> Result<Versioned<Chatroom>, StoreError> {
		let inner = self.inner.lock().await;
		inner
			.chatrooms
			.get(id)
			.cloned()
			.ok_or_else(|| StoreError::NotFound(format!("chatroom {id}")))
	}

	async fn insert_chatroom(&self, room: Chatroom) -> Result<(), StoreError> {
		let mut inner = self.inner.lock().await;
		if inner.chatrooms.contains_key(&room.id) {
			return Err(StoreError::Conflict {
				doc: format!("chatroom {}", room.id),
				expected: 0,
				found: inner.chatrooms[&room.id].version,
			});
		}
		let id = room.id.clone();
		inner.chatrooms.insert(id.clone(), Versioned::new(room, 1));
		inner.publish_room(&id);
		Ok(())
	}

	async fn write_chatroom_if_version(&self, room: Chatroom, expected: u64) -> Result<(), StoreError> {
		let mut inner = self.inner.lock().await;
		let id = room.id.clone();
		let current = inner
			.chatrooms
			.get(&id)
			.ok_or_else(|| StoreError::NotFound(format!("chatroom {id}")))?;

		if current.version != expected {
			return Err(StoreError::Conflict {
				doc: format!("chatroom {id}"),
				expected,
				found: current.version,
			});
		}

		inner.chatrooms.insert(id.clone(), Versioned::new(room, expected + 1));
		inner.publish_room(&id);
		Ok(())
	}

	async fn chatrooms_for_participant(&self, user: &UserId) -> Result<Vec<Chatroom>, StoreError> {
		let inner = self.inner.lock().await;
		let mut rooms: Vec<Chatroom> = inner
			.chatrooms
			.values()
			.filter(|doc| doc.value.participants.contains(user))
			.map(|doc| doc.value.clone())
			.collect();
		rooms.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
		Ok(rooms)
	}

	async fn chatroom_by_session(&self, session: &SessionId) -> Result<Option<Chatroom>, StoreError> {
		let inner = self.inner.lock().await;
		Ok(inner
			.chatrooms
			.values()
			.find(|doc| doc.value.session.as_ref() == Some(session))
			.map(|doc| doc.value.clone()))
	}

	async fn lobby_chatroom(&self, game: &GameId, tags: &BTreeSet<String>) -> Result<Option<Chatroom>, StoreError> {
		let inner = self.inner.lock().await;
		Ok(inner
			.chatrooms
			.values()
			.find(|doc| doc.value.game.as_ref() == Some(game) && doc.value.tags == *tags)
			.map(|doc| doc.value.clone()))
	}

	async fn touch_chatroom(&self, id: &ChatroomId, at: SystemTime) -> Result<(), StoreError> {
		let mut inner = self.inner.lock().await;
		let doc = inner
			.chatrooms
			.get_mut(id)
			.ok_or_else(|| StoreError::NotFound(format!("chatroom {id}")))?;
		doc.value.updated_at = at;
		doc.version += 1;
		inner.publish_room(id);
		Ok(())
	}

	async fn watch_chatroom(&self, id: &ChatroomId) -> Result<WatchRx<Versioned<Chatroom>>, StoreError> {
		let (tx, rx) = self.channel();
		let mut inner = self.inner.lock().await;
		if let Some(doc) = inner.chatrooms.get(id).cloned() {
			let _ = tx.try_send(doc);
		}
		inner.room_watchers.entry(id.clone()).or_default().push(tx);
		Ok(rx)
	}

	async fn append_message(&self, message: Message) -> Result<(), StoreError> {
		let mut inner = self.inner.lock().await;
		let room = message.chatroom.clone();
		let log = inner.messages.entry(room.clone()).or_default();

		// Insert in timestamp order; appends are the overwhelmingly common case.
		let at = log
			.iter()
			.rposition(|m| m.created_at <= message.created_at)
			.map(|i| i + 1)
			.unwrap_or(0);
		log.insert(at, message);

		inner.publish_messages(&room);
		Ok(())
	}

	async fn watch_messages(&self, id: &ChatroomId, limit: usize) -> Result<WatchRx<Vec<Message>>, StoreError> {
		let (tx, rx) = self.channel();
		let mut inner = self.inner.lock().await;
		let _ = tx.try_send(inner.message_window(id, limit));
		inner
			.message_watchers
			.entry(id.clone())
			.or_default()
			.push(LimitedWatcher { limit, tx });
		Ok(rx)
	}

	async fn increment_unread(&self, user: &UserId, room: &ChatroomId) -> Result<(), StoreError> {
		let mut inner = self.inner.lock().await;
		let counter = inner
			.unread
			.entry(user.clone())
			.or_default()
			.entry(room.clone())
			.or_insert(0);
		*counter += 1;
		inner.publish_unread(user);
		Ok(())
	}

	async fn clear_unread(&self, user: &UserId, room: &ChatroomId) -> Result<(), StoreError> {
		let mut inner = self.inner.lock().await;
		if let Some(counters) = inner.unread.get_mut(user)
			&& counters.remove(room).is_some()
		{
			inner.publish_unread(user);
		}
		Ok(())
	}

	async fn watch_unread(&self, user: &UserId) -> Result<WatchRx<Vec<(ChatroomId, u64)>>, StoreError> {
		let (tx, rx) = self.channel();
		let mut inner = self.inner.lock().await;
		let _ = tx.try_send(inner.unread_snapshot(user));
		inner.unread_watchers.entry(user.clone()).or_default().push(tx);
		Ok(rx)
	}

	async fn upsert_lobby_membership(&self, membership: LobbyMembership) -> Result<(), StoreError> {
		let mut inner = self.inner.lock().await;
		let key = membership.lobby.storage_key();
		inner
			.lobby
			.entry(key.clone())
			.or_default()
			.insert(membership.user.clone(), membership);
		inner.publish_lobby(&key);
		Ok(())
	}

	async fn watch_lobby(&self, key: &LobbyKey, limit: usize) -> Result<WatchRx<Vec<LobbyMembership>>, StoreError> {
		let (tx, rx) = self.channel();
		let storage_key = key.storage_key();
		let mut inner = self.inner.lock().await;
		let _ = tx.try_send(inner.lobby_rows(&storage_key, limit));
		inner
			.lobby_watchers
			.entry(storage_key)
			.or_default()
			.push(LimitedWatcher { limit, tx });
		Ok(rx)
	}
}

/// In-memory local profile tier.
#[derive(Debug, Default)]
pub struct MemoryProfileStore {
	profiles: Mutex<HashMap<UserId, Profile>>,
}

impl MemoryProfileStore {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
	async fn get(&self, user: &UserId) -> Option<Profile> {
		self.profiles.lock().await.get(user).cloned()
	}

	async fn get_all(&self, users: &[UserId]) -> Option<Vec<Profile>> {
		let profiles = self.profiles.lock().await;
		users.iter().map(|u| profiles.get(u).cloned()).collect()
	}

	async fn put_many(&self, incoming: Vec<Profile>) {
		let mut profiles = self.profiles.lock().await;
		for p in incoming {
			profiles.insert(p.user.clone(), p);
		}
	}

	async fn remove(&self, user: &UserId) {
		self.profiles.lock().await.remove(user);
	}

	async fn clear(&self) {
		self.profiles.lock().await.clear();
	}
}

/// Stub profile service with a fixed directory, a fetch counter, and an
/// optional artificial latency. Drives the demo binary and the coalescing
/// tests.
#[derive(Debug, Default)]
pub struct FixtureProfiles {
	directory: Mutex<HashMap<UserId, Profile>>,
	fetches: AtomicU64,
	failing: AtomicBool,
	latency: Duration,
}

impl FixtureProfiles {
	pub fn new() -> Self {
		Self::default()
	}

	/// Delay every fetch by `latency` (useful to hold requests in flight).
	pub fn with_latency(mut self, latency: Duration) -> Self {
		self.latency = latency;
		self
	}

	pub async fn insert(&self, profile: Profile) {
		self.directory.lock().await.insert(profile.user.clone(), profile);
	}

	/// Number of remote fetches issued so far.
	pub fn fetch_count(&self) -> u64 {
		self.fetches.load(Ordering::SeqCst)
	}

	/// Make subsequent fetches fail with a network error.
	pub fn set_failing(&self, failing: bool) {
		self.failing.store(failing, Ordering::SeqCst);
	}
}

#[async_trait]
impl ProfileService for FixtureProfiles {
	async fn fetch_profiles(&self, ids: &[UserId]) -> Result<Vec<Profile>, StoreError> {
		self.fetches.fetch_add(1, Ordering::SeqCst);

		if !self.latency.is_zero() {
			tokio::time::sleep(self.latency).await;
		}

		if self.failing.load(Ordering::SeqCst) {
			return Err(StoreError::Network("fixture profile service set to fail".to_string()));
		}

		let directory = self.directory.lock().await;
		Ok(ids.iter().filter_map(|id| directory.get(id).cloned()).collect())
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use parley_domain::MessageDraft;
	use tokio::time::timeout;

	use super::*;

	fn user(s: &str) -> UserId {
		UserId::new(s).expect("valid UserId")
	}

	fn private_room(creator: &str, others: &[&str]) -> Chatroom {
		Chatroom::new_private(user(creator), others.iter().map(|s| user(s)).collect())
	}

	async fn recv<T>(rx: &mut WatchRx<T>) -> T {
		timeout(Duration::from_millis(500), rx.recv())
			.await
			.expect("emission within timeout")
			.expect("watcher channel open")
	}

	#[tokio::test]
	async fn conditional_write_detects_version_conflict() {
		let store = MemoryStore::default();
		let room = private_room("a", &["b"]);
		store.insert_chatroom(room.clone()).await.unwrap();

		let doc = store.get_chatroom(&room.id).await.unwrap();

		// A competing writer lands first.
		let mut winner = doc.value.clone();
		winner.typing_users.insert(user("b"));
		store.write_chatroom_if_version(winner, doc.version).await.unwrap();

		let mut loser = doc.value.clone();
		loser.typing_users.insert(user("a"));
		let err = store.write_chatroom_if_version(loser, doc.version).await.unwrap_err();
		match err {
			StoreError::Conflict { expected, found, .. } => {
				assert_eq!(expected, doc.version);
				assert!(found > expected);
			}
			other => panic!("expected Conflict, got: {other:?}"),
		}
	}

	#[tokio::test]
	async fn watch_chatroom_emits_snapshot_then_updates() {
		let store = MemoryStore::default();
		let room = private_room("a", &["b"]);
		store.insert_chatroom(room.clone()).await.unwrap();

		let mut rx = store.watch_chatroom(&room.id).await.unwrap();
		let snapshot = recv(&mut rx).await;
		assert_eq!(snapshot.value.id, room.id);

		store.touch_chatroom(&room.id, SystemTime::now()).await.unwrap();
		let updated = recv(&mut rx).await;
		assert!(updated.version > snapshot.version);
	}

	#[tokio::test]
	async fn dropped_watcher_receives_nothing_and_is_pruned() {
		let store = MemoryStore::default();
		let room = private_room("a", &[]);
		store.insert_chatroom(room.clone()).await.unwrap();

		{
			let _rx = store.watch_chatroom(&room.id).await.unwrap();
		}

		// Publishing after the receiver drop must not error or deliver.
		store.touch_chatroom(&room.id, SystemTime::now()).await.unwrap();

		let inner = store.inner.lock().await;
		let open = inner
			.room_watchers
			.get(&room.id)
			.map(|w| w.iter().filter(|tx| !tx.is_closed()).count())
			.unwrap_or(0);
		assert_eq!(open, 0);
	}

	#[tokio::test]
	async fn message_window_is_capped_and_ascending() {
		let store = MemoryStore::default();
		let room = private_room("a", &["b"]);
		store.insert_chatroom(room.clone()).await.unwrap();

		let mut rx = store.watch_messages(&room.id, 2).await.unwrap();
		assert!(recv(&mut rx).await.is_empty());

		for i in 0..3 {
			let msg = MessageDraft::text(format!("m{i}")).into_message(room.id.clone(), user("a"));
			store.append_message(msg).await.unwrap();
			let _ = recv(&mut rx).await;
		}

		let window = store.inner.lock().await.message_window(&room.id, 2);
		let texts: Vec<_> = window.iter().map(|m| m.text.clone().unwrap()).collect();
		assert_eq!(texts, vec!["m1".to_string(), "m2".to_string()]);
	}

	#[tokio::test]
	async fn unread_counters_increment_and_clear() {
		let store = MemoryStore::default();
		let room = private_room("a", &["b"]);
		store.insert_chatroom(room.clone()).await.unwrap();

		let mut rx = store.watch_unread(&user("b")).await.unwrap();
		assert!(recv(&mut rx).await.is_empty());

		store.increment_unread(&user("b"), &room.id).await.unwrap();
		store.increment_unread(&user("b"), &room.id).await.unwrap();
		let _ = recv(&mut rx).await;
		let rows = recv(&mut rx).await;
		assert_eq!(rows, vec![(room.id.clone(), 2)]);

		store.clear_unread(&user("b"), &room.id).await.unwrap();
		let rows = recv(&mut rx).await;
		assert!(rows.is_empty());
	}

	#[tokio::test]
	async fn lobby_rows_are_ordered_and_limited() {
		let store = MemoryStore::default();
		let key = LobbyKey::new(GameId::new("g1").unwrap(), ["eu".to_string()]);

		for (i, name) in ["u1", "u2", "u3"].iter().enumerate() {
			let mut row = LobbyMembership::joined(key.clone(), user(name));
			row.last_changed = SystemTime::UNIX_EPOCH + Duration::from_secs(i as u64);
			store.upsert_lobby_membership(row).await.unwrap();
		}

		let mut rx = store.watch_lobby(&key, 2).await.unwrap();
		let rows = recv(&mut rx).await;
		assert_eq!(rows.len(), 2);
		// Most recently changed first.
		assert_eq!(rows[0].user, user("u3"));
		assert_eq!(rows[1].user, user("u2"));
	}

	#[tokio::test]
	async fn published_lobby_updates_are_ordered_and_limited() {
		let store = MemoryStore::default();
		let key = LobbyKey::new(GameId::new("g1").unwrap(), ["eu".to_string()]);

		let mut rx = store.watch_lobby(&key, 2).await.unwrap();
		assert!(recv(&mut rx).await.is_empty());

		// Each upsert publishes; the live emissions must obey the same
		// ordering and limit as the subscribe snapshot.
		let mut rows = Vec::new();
		for (i, name) in ["u1", "u2", "u3"].iter().enumerate() {
			let mut row = LobbyMembership::joined(key.clone(), user(name));
			row.last_changed = SystemTime::UNIX_EPOCH + Duration::from_secs(i as u64);
			store.upsert_lobby_membership(row).await.unwrap();
			rows = recv(&mut rx).await;
		}

		assert_eq!(rows.len(), 2);
		assert_eq!(rows[0].user, user("u3"));
		assert_eq!(rows[1].user, user("u2"));
	}

	#[tokio::test]
	async fn fixture_profiles_counts_fetches_and_fails_on_demand() {
		let svc = FixtureProfiles::new();
		svc.insert(Profile::new(user("u1"), "One")).await;

		let got = svc.fetch_profiles(&[user("u1"), user("missing")]).await.unwrap();
		assert_eq!(got.len(), 1);
		assert_eq!(svc.fetch_count(), 1);

		svc.set_failing(true);
		assert!(svc.fetch_profiles(&[user("u1")]).await.is_err());
		assert_eq!(svc.fetch_count(), 2);
	}
}
