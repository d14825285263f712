#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parley_domain::{LobbyKey, LobbyMembership, UserId};
use parley_store::{DocumentStore, WatchRx};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::config::EngineConfig;
use crate::session::SessionHandle;
use crate::EngineError;

/// One roster emission: lobby members partitioned by activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LobbyRoster {
	pub active: Vec<UserId>,
	pub recently_inactive: Vec<UserId>,
}

enum LobbyCommand {
	Upsert { key: LobbyKey, active: bool },
	Flush { done: oneshot::Sender<()> },
}

/// Time-windowed active/inactive membership tracking per lobby key.
///
/// Join/leave are fire-and-forget upserts serialized through one worker so
/// a join immediately followed by a leave cannot reorder. Inactive rows age
/// out of rosters past the staleness cutoff; active rows never do.
pub struct LobbyPresenceTracker {
	store: Arc<dyn DocumentStore>,
	session: SessionHandle,
	commands: mpsc::Sender<LobbyCommand>,
	staleness: Duration,
	roster_limit: usize,
	watch_queue_capacity: usize,
}

impl LobbyPresenceTracker {
	pub fn new(store: Arc<dyn DocumentStore>, session: SessionHandle, cfg: &EngineConfig) -> Self {
		let (commands, rx) = mpsc::channel(cfg.watch_queue_capacity.max(1));

		tokio::spawn(run_worker(store.clone(), session.clone(), rx));

		Self {
			store,
			session,
			commands,
			staleness: cfg.lobby_staleness,
			roster_limit: cfg.lobby_roster_limit,
			watch_queue_capacity: cfg.watch_queue_capacity,
		}
	}

	/// Mark the signed-in user active in the lobby. Best-effort.
	pub fn join(&self, key: LobbyKey) {
		self.submit(key, true);
	}

	/// Mark the signed-in user inactive in the lobby. Best-effort.
	pub fn leave(&self, key: LobbyKey) {
		self.submit(key, false);
	}

	fn submit(&self, key: LobbyKey, active: bool) {
		if self.commands.try_send(LobbyCommand::Upsert { key, active }).is_err() {
			warn!("lobby presence queue full or closed; dropping update");
		}
	}

	/// Wait until every previously submitted update has been applied.
	pub async fn flush(&self) {
		let (done, ack) = oneshot::channel();
		if self.commands.send(LobbyCommand::Flush { done }).await.is_ok() {
			let _ = ack.await;
		}
	}

	/// Live roster for a lobby. The caller is always excluded; inactive
	/// members older than the staleness cutoff are dropped entirely.
	pub async fn observe(&self, key: &LobbyKey) -> Result<WatchRx<LobbyRoster>, EngineError> {
		let me = self.session.current().await;
		let staleness = self.staleness;
		let mut rows = self.store.watch_lobby(key, self.roster_limit).await?;
		let (tx, rx) = mpsc::channel(self.watch_queue_capacity.max(1));

		tokio::spawn(async move {
			while let Some(rows) = rows.recv().await {
				let roster = partition_roster(rows, me.as_ref(), staleness, SystemTime::now());
				if tx.send(roster).await.is_err() {
					break;
				}
			}
		});

		Ok(rx)
	}
}

/// Partition membership rows into a roster.
///
/// The staleness cutoff applies only to inactive rows; an active row is
/// kept regardless of age.
pub(crate) fn partition_roster(
	rows: Vec<LobbyMembership>,
	exclude: Option<&UserId>,
	staleness: Duration,
	now: SystemTime,
) -> LobbyRoster {
	let mut roster = LobbyRoster::default();

	for row in rows {
		if Some(&row.user) == exclude {
			continue;
		}

		if row.is_active {
			roster.active.push(row.user);
		} else {
			let age = now.duration_since(row.last_changed).unwrap_or_default();
			if age <= staleness {
				roster.recently_inactive.push(row.user);
			}
		}
	}

	roster
}

async fn run_worker(store: Arc<dyn DocumentStore>, session: SessionHandle, mut rx: mpsc::Receiver<LobbyCommand>) {
	while let Some(cmd) = rx.recv().await {
		match cmd {
			LobbyCommand::Upsert { key, active } => {
				let Some(user) = session.current().await else {
					warn!(lobby = %key, "lobby presence update without a signed-in user; dropping");
					continue;
				};

				let row = if active {
					LobbyMembership::joined(key, user)
				} else {
					LobbyMembership::left(key, user)
				};

				if let Err(e) = store.upsert_lobby_membership(row).await {
					warn!(error = %e, "lobby membership upsert dropped");
				}
			}
			LobbyCommand::Flush { done } => {
				let _ = done.send(());
			}
		}
	}
}
