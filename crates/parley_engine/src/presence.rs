#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::sync::Arc;

use parley_domain::{ChatroomId, PresenceField, UserId};
use parley_store::{DocumentStore, WatchRx};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::cas::edit_chatroom;
use crate::config::EngineConfig;
use crate::session::SessionHandle;
use crate::EngineError;

enum PresenceCommand {
	Set {
		room: ChatroomId,
		field: PresenceField,
		user: UserId,
		present: bool,
	},

	/// Test/shutdown hook: acks once every prior command has been applied.
	Flush { done: oneshot::Sender<()> },
}

/// Best-effort mutator and observer for the named membership sets of a
/// chatroom (typing, voice-on, muted).
///
/// Mutations from this process are serialized through one worker so that
/// "set then clear" cannot reorder; cross-client concurrency is handled by
/// the compare-and-swap retry loop alone, with no external lock.
pub struct PresenceStateStore {
	store: Arc<dyn DocumentStore>,
	session: SessionHandle,
	commands: mpsc::Sender<PresenceCommand>,
	watch_queue_capacity: usize,
}

impl PresenceStateStore {
	pub fn new(store: Arc<dyn DocumentStore>, session: SessionHandle, cfg: &EngineConfig) -> Self {
		let (commands, rx) = mpsc::channel(cfg.watch_queue_capacity.max(1));

		tokio::spawn(run_worker(store.clone(), rx, cfg.cas_retry_budget));

		Self {
			store,
			session,
			commands,
			watch_queue_capacity: cfg.watch_queue_capacity,
		}
	}

	/// Fire-and-forget membership update. Terminal failures are logged,
	/// never surfaced: presence is an ephemeral UX signal, not durable
	/// state.
	pub fn set_membership(&self, room: ChatroomId, field: PresenceField, user: UserId, present: bool) {
		let cmd = PresenceCommand::Set { room, field, user, present };
		if self.commands.try_send(cmd).is_err() {
			warn!("presence queue full or closed; dropping membership update");
		}
	}

	pub fn set_typing(&self, room: ChatroomId, user: UserId, typing: bool) {
		self.set_membership(room, PresenceField::Typing, user, typing);
	}

	pub fn set_on_voice(&self, room: ChatroomId, user: UserId, on_voice: bool) {
		self.set_membership(room, PresenceField::OnVoice, user, on_voice);
	}

	pub fn set_muted(&self, room: ChatroomId, user: UserId, muted: bool) {
		self.set_membership(room, PresenceField::Muted, user, muted);
	}

	/// Wait until every previously submitted mutation has been applied (or
	/// dropped after exhausting its retries).
	pub async fn flush(&self) {
		let (done, ack) = oneshot::channel();
		if self.commands.send(PresenceCommand::Flush { done }).await.is_ok() {
			let _ = ack.await;
		}
	}

	/// Live feed of one membership set. The observing user's own id is
	/// filtered out of every emission, so a client never sees itself
	/// typing. Dropping the receiver unsubscribes.
	pub async fn observe_membership(
		&self,
		room: &ChatroomId,
		field: PresenceField,
	) -> Result<WatchRx<BTreeSet<UserId>>, EngineError> {
		let me = self.session.current().await;
		let mut docs = self.store.watch_chatroom(room).await?;
		let (tx, rx) = mpsc::channel(self.watch_queue_capacity.max(1));

		tokio::spawn(async move {
			let mut last: Option<BTreeSet<UserId>> = None;
			while let Some(doc) = docs.recv().await {
				let mut set = doc.value.presence_set(field).clone();
				if let Some(me) = &me {
					set.remove(me);
				}

				// Document writes that left this set untouched are not
				// re-emitted.
				if last.as_ref() == Some(&set) {
					continue;
				}
				last = Some(set.clone());

				if tx.send(set).await.is_err() {
					break;
				}
			}
		});

		Ok(rx)
	}
}

async fn run_worker(store: Arc<dyn DocumentStore>, mut rx: mpsc::Receiver<PresenceCommand>, budget: u32) {
	while let Some(cmd) = rx.recv().await {
		match cmd {
			PresenceCommand::Set { room, field, user, present } => {
				let result = edit_chatroom(&store, &room, budget, |r| {
					let set = r.presence_set_mut(field);
					if present { set.insert(user.clone()) } else { set.remove(&user) }
				})
				.await;

				match result {
					Ok(_) => {
						debug!(room = %room, field = %field, user = %user, present, "presence membership applied");
					}
					Err(e) => {
						warn!(
							room = %room,
							field = %field,
							user = %user,
							present,
							error = %e,
							"presence membership dropped"
						);
					}
				}
			}
			PresenceCommand::Flush { done } => {
				let _ = done.send(());
			}
		}
	}
}
