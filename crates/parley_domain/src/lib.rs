#![forbid(unsafe_code)]

mod chatroom;
mod ids;
mod lobby;
mod message;
mod profile;

pub use chatroom::{Chatroom, PresenceField};
pub use ids::{ChatroomId, GameId, MessageId, ParseIdError, SessionId, UserId};
pub use lobby::{LobbyKey, LobbyMembership};
pub use message::{Message, MessageDraft, MessageKind};
pub use profile::Profile;
