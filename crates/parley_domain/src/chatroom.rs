#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::ids::{ChatroomId, GameId, SessionId, UserId};

/// Named ephemeral membership sets attached to a chatroom.
///
/// These carry short-lived, best-effort presence signals; losing an update
/// is acceptable, duplicating an entry is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceField {
	Typing,
	OnVoice,
	Muted,
}

impl PresenceField {
	/// Stable document field name.
	pub const fn as_str(self) -> &'static str {
		match self {
			PresenceField::Typing => "typing_users",
			PresenceField::OnVoice => "on_voice_users",
			PresenceField::Muted => "muted_users",
		}
	}
}

impl std::fmt::Display for PresenceField {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A persisted conversation.
///
/// Invariant: `participants` is non-empty and always contains `creator`.
/// Chatrooms are never hard-deleted; leaving shrinks the participant set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chatroom {
	pub id: ChatroomId,
	pub participants: BTreeSet<UserId>,
	pub creator: UserId,
	pub created_at: SystemTime,
	pub updated_at: SystemTime,

	/// Set when the room is a lobby conversation for a game.
	pub game: Option<GameId>,

	/// Set when the room is bound to a play session.
	pub session: Option<SessionId>,

	/// Lobby tag set; empty for private rooms.
	pub tags: BTreeSet<String>,

	pub typing_users: BTreeSet<UserId>,
	pub on_voice_users: BTreeSet<UserId>,
	pub muted_users: BTreeSet<UserId>,
}

impl Chatroom {
	/// Create a private chatroom. The creator is always a participant.
	pub fn new_private(creator: UserId, mut participants: BTreeSet<UserId>) -> Self {
		participants.insert(creator.clone());
		let now = SystemTime::now();
		Self {
			id: ChatroomId::generate(),
			participants,
			creator,
			created_at: now,
			updated_at: now,
			game: None,
			session: None,
			tags: BTreeSet::new(),
			typing_users: BTreeSet::new(),
			on_voice_users: BTreeSet::new(),
			muted_users: BTreeSet::new(),
		}
	}

	/// Create the message container for a tag-keyed lobby conversation.
	pub fn new_lobby(creator: UserId, game: GameId, tags: BTreeSet<String>) -> Self {
		let mut room = Self::new_private(creator, BTreeSet::new());
		room.game = Some(game);
		room.tags = tags;
		room
	}

	/// Create a chatroom bound to a play session.
	pub fn new_session(creator: UserId, participants: BTreeSet<UserId>, session: SessionId) -> Self {
		let mut room = Self::new_private(creator, participants);
		room.session = Some(session);
		room
	}

	pub fn is_session_room(&self) -> bool {
		self.session.is_some()
	}

	pub fn presence_set(&self, field: PresenceField) -> &BTreeSet<UserId> {
		match field {
			PresenceField::Typing => &self.typing_users,
			PresenceField::OnVoice => &self.on_voice_users,
			PresenceField::Muted => &self.muted_users,
		}
	}

	pub fn presence_set_mut(&mut self, field: PresenceField) -> &mut BTreeSet<UserId> {
		match field {
			PresenceField::Typing => &mut self.typing_users,
			PresenceField::OnVoice => &mut self.on_voice_users,
			PresenceField::Muted => &mut self.muted_users,
		}
	}
}
