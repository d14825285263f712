#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::sync::Arc;

use parley_domain::{Chatroom, ChatroomId, MessageDraft, MessageKind, SessionId, UserId};
use parley_store::DocumentStore;
use tracing::{debug, warn};

use crate::cas::edit_chatroom;
use crate::config::EngineConfig;
use crate::relay::MessageStreamRelay;
use crate::session::SessionHandle;
use crate::unread::UnreadCounterService;
use crate::EngineError;

/// Finds or creates a chatroom for a participant set or a session link.
pub struct ChatroomResolver {
	store: Arc<dyn DocumentStore>,
	session: SessionHandle,
	unread: Arc<UnreadCounterService>,
	relay: Arc<MessageStreamRelay>,
	cas_retry_budget: u32,
}

impl ChatroomResolver {
	pub fn new(
		store: Arc<dyn DocumentStore>,
		session: SessionHandle,
		unread: Arc<UnreadCounterService>,
		relay: Arc<MessageStreamRelay>,
		cfg: &EngineConfig,
	) -> Self {
		Self {
			store,
			session,
			unread,
			relay,
			cas_retry_budget: cfg.cas_retry_budget,
		}
	}

	/// Resolve the private chatroom for a participant set, creating it if
	/// none exists. The caller is added to the set if absent, so the result
	/// always has the caller as a participant.
	///
	/// Known race, kept deliberately: two callers resolving the same new
	/// set concurrently can each miss the other's uncommitted room and
	/// create two chatrooms. Closing it with a deterministic document key
	/// would change observable behavior (idempotent creation) and is left
	/// as a recorded decision, not a silent fix.
	pub async fn resolve_private(&self, participants: BTreeSet<UserId>) -> Result<Chatroom, EngineError> {
		let caller = self.session.require().await?;

		let mut normalized = participants;
		normalized.insert(caller.clone());

		let existing = self.store.chatrooms_for_participant(&caller).await?;
		if let Some(room) = existing
			.into_iter()
			.find(|r| !r.is_session_room() && r.game.is_none() && r.participants == normalized)
		{
			debug!(room = %room.id, "resolved existing private chatroom");
			return Ok(room);
		}

		let room = Chatroom::new_private(caller, normalized);
		self.store.insert_chatroom(room.clone()).await?;
		debug!(room = %room.id, "created private chatroom");

		// Return the locally-known document; no confirmation round-trip.
		Ok(room)
	}

	/// First chatroom linked to the given session, or `NotFound`.
	pub async fn resolve_by_session(&self, session: &SessionId) -> Result<Chatroom, EngineError> {
		self.store
			.chatroom_by_session(session)
			.await?
			.ok_or(EngineError::NotFound)
	}

	/// Replace the participant set. The creator is re-added if absent so
	/// the room invariant holds by construction.
	pub async fn set_participants(&self, room: &ChatroomId, participants: BTreeSet<UserId>) -> Result<Chatroom, EngineError> {
		let updated = edit_chatroom(&self.store, room, self.cas_retry_budget, |r| {
			let mut next = participants.clone();
			next.insert(r.creator.clone());
			if r.participants == next {
				return false;
			}
			r.participants = next;
			true
		})
		.await?;
		Ok(updated)
	}

	/// Remove the caller from the chatroom.
	///
	/// Resets the caller's unread counter and, for non-session rooms,
	/// appends a "left" notice *before* the removal: once removed, the
	/// caller may lose write permission. Both preludes are best-effort;
	/// only the removal itself surfaces failures.
	pub async fn leave(&self, room: &Chatroom) -> Result<(), EngineError> {
		let caller = self.session.require().await?;

		if let Err(e) = self.unread.reset(&caller, &room.id).await {
			warn!(room = %room.id, user = %caller, error = %e, "unread reset on leave failed");
		}

		if !room.is_session_room() {
			let notice = MessageDraft::notice(MessageKind::SessionNotice, format!("{caller} left the conversation"));
			if let Err(e) = self.relay.append_as_and_wait(room, caller.clone(), notice).await {
				warn!(room = %room.id, user = %caller, error = %e, "leave notice append failed");
			}
		}

		edit_chatroom(&self.store, &room.id, self.cas_retry_budget, |r| {
			let mut changed = r.participants.remove(&caller);
			changed |= r.typing_users.remove(&caller);
			changed |= r.on_voice_users.remove(&caller);
			changed |= r.muted_users.remove(&caller);
			changed
		})
		.await?;

		Ok(())
	}
}
