#![forbid(unsafe_code)]

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// Snapshot of a user's public identity record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
	pub user: UserId,
	pub display_name: String,
	pub avatar_url: Option<String>,
	pub status_line: Option<String>,

	/// When this snapshot was fetched from the profile service.
	pub fetched_at: SystemTime,
}

impl Profile {
	pub fn new(user: UserId, display_name: impl Into<String>) -> Self {
		Self {
			user,
			display_name: display_name.into(),
			avatar_url: None,
			status_line: None,
			fetched_at: SystemTime::now(),
		}
	}
}
