#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::ids::{ChatroomId, GameId, MessageId, UserId};

/// Message payload kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
	Text,
	Media,

	/// System notice: friend request sent/accepted.
	FriendNotice,
	/// System notice: party invite/join/leave.
	PartyNotice,
	/// System notice: mic turned on/off.
	MicNotice,
	/// System notice: a participant changed their display name.
	NameNotice,
	/// System notice: a participant changed their avatar.
	ImageNotice,
	/// System notice: session started/ended or a participant left.
	SessionNotice,
}

impl MessageKind {
	pub fn is_system_notice(self) -> bool {
		!matches!(self, MessageKind::Text | MessageKind::Media)
	}
}

/// An immutable chat message. Ordering key is `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
	pub id: MessageId,
	pub chatroom: ChatroomId,
	pub sender: UserId,
	pub kind: MessageKind,
	pub text: Option<String>,
	pub media_url: Option<String>,
	pub created_at: SystemTime,

	/// Optional game reference carried by lobby messages.
	pub game: Option<GameId>,

	/// Optional tag references carried by lobby messages.
	pub tags: BTreeSet<String>,
}

/// Builder input for a message append; ids and timestamps are assigned at
/// append time.
#[derive(Debug, Clone, Default)]
pub struct MessageDraft {
	pub kind: Option<MessageKind>,
	pub text: Option<String>,
	pub media_url: Option<String>,
	pub game: Option<GameId>,
	pub tags: BTreeSet<String>,
}

impl MessageDraft {
	/// Plain text message.
	pub fn text(body: impl Into<String>) -> Self {
		Self {
			kind: Some(MessageKind::Text),
			text: Some(body.into()),
			..Self::default()
		}
	}

	/// Media message with an optional caption.
	pub fn media(url: impl Into<String>, caption: Option<String>) -> Self {
		Self {
			kind: Some(MessageKind::Media),
			text: caption,
			media_url: Some(url.into()),
			..Self::default()
		}
	}

	/// System notice of the given kind.
	pub fn notice(kind: MessageKind, body: impl Into<String>) -> Self {
		Self {
			kind: Some(kind),
			text: Some(body.into()),
			..Self::default()
		}
	}

	/// Materialize the draft into an immutable message.
	pub fn into_message(self, chatroom: ChatroomId, sender: UserId) -> Message {
		Message {
			id: MessageId::new_v4(),
			chatroom,
			sender,
			kind: self.kind.unwrap_or(MessageKind::Text),
			text: self.text,
			media_url: self.media_url,
			created_at: SystemTime::now(),
			game: self.game,
			tags: self.tags,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn draft_defaults_to_text_kind() {
		let msg = MessageDraft::text("hi").into_message(
			ChatroomId::new("r1").unwrap(),
			UserId::new("u1").unwrap(),
		);
		assert_eq!(msg.kind, MessageKind::Text);
		assert_eq!(msg.text.as_deref(), Some("hi"));
		assert!(msg.media_url.is_none());
	}

	#[test]
	fn system_notice_classification() {
		assert!(MessageKind::SessionNotice.is_system_notice());
		assert!(MessageKind::MicNotice.is_system_notice());
		assert!(!MessageKind::Text.is_system_notice());
		assert!(!MessageKind::Media.is_system_notice());
	}
}
