#![forbid(unsafe_code)]

use std::sync::Arc;

use futures::future::join_all;
use parley_domain::{Chatroom, ChatroomId, UserId};
use parley_store::{DocumentStore, StoreError, WatchRx};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::EngineError;

/// Filter for the per-chatroom unread join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatroomScope {
	All,
	/// Only rooms bound to a play session.
	Sessions,
	/// Only private chats (no session link).
	Private,
}

impl ChatroomScope {
	pub fn matches(self, room: &Chatroom) -> bool {
		match self {
			ChatroomScope::All => true,
			ChatroomScope::Sessions => room.is_session_room(),
			ChatroomScope::Private => !room.is_session_room(),
		}
	}
}

/// Per-(user, chatroom) unread counters.
///
/// Increments are a best-effort notification count, not a billing-grade
/// counter: a partial failure across recipients is accepted and logged.
pub struct UnreadCounterService {
	store: Arc<dyn DocumentStore>,
	watch_queue_capacity: usize,
}

impl UnreadCounterService {
	pub fn new(store: Arc<dyn DocumentStore>, cfg: &EngineConfig) -> Self {
		Self {
			store,
			watch_queue_capacity: cfg.watch_queue_capacity,
		}
	}

	/// Atomically add 1 to every participant's counter except the sender's.
	/// Not transactional across recipients.
	pub async fn increment_for_recipients(&self, room: &Chatroom, excluding: &UserId) {
		let recipients: Vec<UserId> = room.participants.iter().filter(|u| *u != excluding).cloned().collect();

		let results = join_all(
			recipients
				.iter()
				.map(|user| self.store.increment_unread(user, &room.id)),
		)
		.await;

		for (user, result) in recipients.iter().zip(results) {
			if let Err(e) = result {
				warn!(room = %room.id, user = %user, error = %e, "unread increment failed");
			}
		}
	}

	/// Reset the counter to absent. Called when the owner begins actively
	/// viewing the chatroom, and when they leave it.
	pub async fn reset(&self, user: &UserId, room: &ChatroomId) -> Result<(), EngineError> {
		self.store.clear_unread(user, room).await.map_err(Into::into)
	}

	/// Live sum of all of the user's per-chatroom counters.
	pub async fn observe_total(&self, user: &UserId) -> Result<WatchRx<u64>, EngineError> {
		let mut rows = self.store.watch_unread(user).await?;
		let (tx, rx) = mpsc::channel(self.watch_queue_capacity.max(1));

		tokio::spawn(async move {
			while let Some(rows) = rows.recv().await {
				let total: u64 = rows.iter().map(|(_, n)| n).sum();
				if tx.send(total).await.is_err() {
					break;
				}
			}
		});

		Ok(rx)
	}

	/// Live join of the user's counters with their resolved chatrooms,
	/// filtered by `scope`. Rooms that cannot be resolved are skipped.
	pub async fn observe_per_chatroom(
		&self,
		user: &UserId,
		scope: ChatroomScope,
	) -> Result<WatchRx<Vec<(Chatroom, u64)>>, EngineError> {
		let mut rows = self.store.watch_unread(user).await?;
		let store = self.store.clone();
		let (tx, rx) = mpsc::channel(self.watch_queue_capacity.max(1));

		tokio::spawn(async move {
			while let Some(rows) = rows.recv().await {
				let mut joined: Vec<(Chatroom, u64)> = Vec::with_capacity(rows.len());
				for (room_id, count) in rows {
					match store.get_chatroom(&room_id).await {
						Ok(doc) => {
							if scope.matches(&doc.value) {
								joined.push((doc.value, count));
							}
						}
						Err(StoreError::NotFound(_)) => {
							debug!(room = %room_id, "unread counter for unknown chatroom; skipping");
						}
						Err(e) => {
							warn!(room = %room_id, error = %e, "unread join failed to resolve chatroom");
						}
					}
				}

				if tx.send(joined).await.is_err() {
					break;
				}
			}
		});

		Ok(rx)
	}
}
