#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::sync::Arc;

use parley_domain::{Chatroom, ChatroomId, GameId, Message, MessageDraft, UserId};
use parley_store::{DocumentStore, WatchRx};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::session::SessionHandle;
use crate::unread::UnreadCounterService;
use crate::EngineError;

/// Live, ordered, bounded message feed per chatroom, plus message append
/// with side effects.
pub struct MessageStreamRelay {
	store: Arc<dyn DocumentStore>,
	unread: Arc<UnreadCounterService>,
	session: SessionHandle,
	live_message_limit: usize,
}

impl MessageStreamRelay {
	pub fn new(
		store: Arc<dyn DocumentStore>,
		unread: Arc<UnreadCounterService>,
		session: SessionHandle,
		cfg: &EngineConfig,
	) -> Self {
		Self {
			store,
			unread,
			session,
			live_message_limit: cfg.live_message_limit,
		}
	}

	/// Append a message from the signed-in user.
	///
	/// Returns the materialized message immediately; the write and its side
	/// effects (recipient unread increments, `updated_at` touch) run in the
	/// background with no ordering or atomicity between them. A crash
	/// between steps can leave a message visible with stale unread counts.
	pub async fn append(&self, room: &Chatroom, draft: MessageDraft) -> Result<Message, EngineError> {
		let sender = self.session.require().await?;
		let message = draft.into_message(room.id.clone(), sender);

		let store = self.store.clone();
		let unread = self.unread.clone();
		let room = room.clone();
		let spawned = message.clone();
		tokio::spawn(async move {
			deliver(store, unread, room, spawned).await;
		});

		Ok(message)
	}

	/// Append on behalf of `sender` and wait for the write to land before
	/// returning. Used for system notices whose ordering relative to a
	/// following mutation matters (e.g. "left" before losing write
	/// permission).
	pub(crate) async fn append_as_and_wait(
		&self,
		room: &Chatroom,
		sender: UserId,
		draft: MessageDraft,
	) -> Result<Message, EngineError> {
		let message = draft.into_message(room.id.clone(), sender);
		self.store.append_message(message.clone()).await?;

		let store = self.store.clone();
		let unread = self.unread.clone();
		let room = room.clone();
		let written = message.clone();
		tokio::spawn(async move {
			fan_out(store, unread, room, written).await;
		});

		Ok(message)
	}

	/// Live feed of the newest messages of a chatroom, ascending by
	/// creation time, capped at the configured window. Every emission is
	/// the full reconciled list; callers diff against their previous
	/// snapshot (see [`crate::diff`]).
	pub async fn observe(&self, room: &ChatroomId) -> Result<WatchRx<Vec<Message>>, EngineError> {
		self.observe_with_limit(room, self.live_message_limit).await
	}

	pub async fn observe_with_limit(&self, room: &ChatroomId, limit: usize) -> Result<WatchRx<Vec<Message>>, EngineError> {
		self.store.watch_messages(room, limit).await.map_err(Into::into)
	}

	/// Same contract as [`observe`](Self::observe), scoped to a
	/// lobby-identified conversation. The lobby's message container is
	/// resolved (exact tag-set match) or created lazily on first
	/// observation.
	///
	/// Known race, shared with private resolution: two concurrent first
	/// observers can each miss the other's uncommitted container and create
	/// duplicates.
	pub async fn observe_for_lobby(
		&self,
		game: &GameId,
		tags: &BTreeSet<String>,
	) -> Result<(Chatroom, WatchRx<Vec<Message>>), EngineError> {
		let caller = self.session.require().await?;

		let room = match self.store.lobby_chatroom(game, tags).await? {
			Some(room) => room,
			None => {
				let room = Chatroom::new_lobby(caller, game.clone(), tags.clone());
				self.store.insert_chatroom(room.clone()).await?;
				room
			}
		};

		let feed = self.store.watch_messages(&room.id, self.live_message_limit).await?;
		Ok((room, feed))
	}
}

async fn deliver(store: Arc<dyn DocumentStore>, unread: Arc<UnreadCounterService>, room: Chatroom, message: Message) {
	if let Err(e) = store.append_message(message.clone()).await {
		warn!(room = %room.id, message = %message.id, error = %e, "message write failed");
		return;
	}

	fan_out(store, unread, room, message).await;
}

/// Best-effort side effects of a landed message.
async fn fan_out(store: Arc<dyn DocumentStore>, unread: Arc<UnreadCounterService>, room: Chatroom, message: Message) {
	unread.increment_for_recipients(&room, &message.sender).await;

	if let Err(e) = store.touch_chatroom(&room.id, message.created_at).await {
		debug!(room = %room.id, error = %e, "updated_at touch failed");
	}
}
