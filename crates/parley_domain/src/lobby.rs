#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ids::{GameId, UserId};

/// Key of an ephemeral, tag-keyed gathering point: a game plus a selected
/// tag set. Equal tag sets in any order map to the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LobbyKey {
	game: GameId,
	tags: BTreeSet<String>,
}

impl LobbyKey {
	pub fn new(game: GameId, tags: impl IntoIterator<Item = String>) -> Self {
		Self {
			game,
			tags: tags.into_iter().collect(),
		}
	}

	pub fn game(&self) -> &GameId {
		&self.game
	}

	pub fn tags(&self) -> &BTreeSet<String> {
		&self.tags
	}

	/// Stable storage key: `<game>/<sha256 of the sorted tag set, hex>`.
	pub fn storage_key(&self) -> String {
		let mut hasher = Sha256::new();
		for tag in &self.tags {
			hasher.update(tag.as_bytes());
			hasher.update([0u8]);
		}
		let digest = hasher.finalize();
		let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
		format!("{}/{hex}", self.game)
	}
}

impl fmt::Display for LobbyKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.storage_key())
	}
}

/// Per-(lobby, user) presence row.
///
/// Rows are never explicitly deleted; inactive rows age out of query
/// results once they pass the staleness cutoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyMembership {
	pub lobby: LobbyKey,
	pub user: UserId,
	pub is_active: bool,
	pub last_changed: SystemTime,
}

impl LobbyMembership {
	pub fn joined(lobby: LobbyKey, user: UserId) -> Self {
		Self {
			lobby,
			user,
			is_active: true,
			last_changed: SystemTime::now(),
		}
	}

	pub fn left(lobby: LobbyKey, user: UserId) -> Self {
		Self {
			lobby,
			user,
			is_active: false,
			last_changed: SystemTime::now(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn game(s: &str) -> GameId {
		GameId::new(s).expect("valid GameId")
	}

	#[test]
	fn tag_order_does_not_change_the_key() {
		let a = LobbyKey::new(game("g1"), ["ranked".to_string(), "eu".to_string()]);
		let b = LobbyKey::new(game("g1"), ["eu".to_string(), "ranked".to_string()]);
		assert_eq!(a, b);
		assert_eq!(a.storage_key(), b.storage_key());
	}

	#[test]
	fn different_tags_produce_different_keys() {
		let a = LobbyKey::new(game("g1"), ["eu".to_string()]);
		let b = LobbyKey::new(game("g1"), ["na".to_string()]);
		assert_ne!(a.storage_key(), b.storage_key());
	}

	#[test]
	fn tag_boundaries_are_unambiguous() {
		// ["ab", "c"] must not hash like ["a", "bc"].
		let a = LobbyKey::new(game("g1"), ["ab".to_string(), "c".to_string()]);
		let b = LobbyKey::new(game("g1"), ["a".to_string(), "bc".to_string()]);
		assert_ne!(a.storage_key(), b.storage_key());
	}

	#[test]
	fn join_and_leave_rows() {
		let key = LobbyKey::new(game("g1"), []);
		let user = UserId::new("u1").unwrap();
		assert!(LobbyMembership::joined(key.clone(), user.clone()).is_active);
		assert!(!LobbyMembership::left(key, user).is_active);
	}
}
