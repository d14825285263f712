#![forbid(unsafe_code)]

//! Scripted end-to-end run of the engine over the in-memory backend.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parley_domain::{GameId, LobbyKey, MessageDraft, Profile, UserId};
use parley_engine::{ChatroomScope, Engine, config};
use parley_store::{DocumentStore, FixtureProfiles, MemoryProfileStore, MemoryStore, ProfileService, ProfileStore};
use tokio::time::timeout;
use tracing::info;

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: parley_demo [--config path]\n\
\n\
Options:\n\
\t--config  Engine config TOML (default: ~/.parley/config.toml)\n\
\t--help    Show this help\n\
"
	);
	std::process::exit(2)
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,parley_engine=debug".to_string());
	tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn parse_args() -> Option<PathBuf> {
	let mut config_path = None;

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--config" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--config must be non-empty");
					usage_and_exit();
				}
				config_path = Some(PathBuf::from(v));
			}
			other => {
				eprintln!("unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	config_path
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let cfg = match parse_args() {
		Some(path) => config::load_engine_config_from_path(&path)?,
		None => config::load_engine_config()?,
	};
	info!(?cfg, "engine config loaded");

	let alice = UserId::new("alice")?;
	let bob = UserId::new("bob")?;

	let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::default());
	let directory = FixtureProfiles::new();
	directory.insert(Profile::new(alice.clone(), "Alice")).await;
	directory.insert(Profile::new(bob.clone(), "Bob")).await;
	let remote: Arc<dyn ProfileService> = Arc::new(directory);
	let local: Arc<dyn ProfileStore> = Arc::new(MemoryProfileStore::new());

	let engine = Engine::new(store, remote, local, cfg);

	engine.sign_in(alice.clone()).await;

	// Resolve the private room and watch it as Alice.
	let room = engine.resolver().resolve_private([bob.clone()].into_iter().collect()).await?;
	info!(room = %room.id, participants = room.participants.len(), "resolved private chatroom");

	let mut feed = engine.relay().observe(&room.id).await?;

	let profile = engine.profiles().get(&bob, true).await?;
	info!(display_name = %profile.display_name, "resolved peer profile");

	engine.presence().set_typing(room.id.clone(), alice.clone(), true);
	engine.relay().append(&room, MessageDraft::text("anyone up for a match?")).await?;
	engine.presence().set_typing(room.id.clone(), alice.clone(), false);
	engine.presence().flush().await;

	while let Ok(Some(messages)) = timeout(Duration::from_millis(250), feed.recv()).await {
		for message in &messages {
			info!(
				sender = %message.sender,
				text = message.text.as_deref().unwrap_or(""),
				"feed emission"
			);
		}
		if !messages.is_empty() {
			break;
		}
	}

	// Bob's unread counters, joined with their rooms.
	engine.sign_in(bob.clone()).await;
	let mut per_room = engine.unread().observe_per_chatroom(&bob, ChatroomScope::Private).await?;
	if let Ok(Some(rows)) = timeout(Duration::from_millis(250), per_room.recv()).await {
		for (room, count) in rows {
			info!(room = %room.id, count, "unread");
		}
	}

	// Lobby presence.
	let lobby = LobbyKey::new(GameId::new("skyfall")?, ["ranked".to_string(), "eu".to_string()]);
	engine.lobby().join(lobby.clone());
	engine.lobby().flush().await;

	engine.sign_in(alice.clone()).await;
	let mut roster = engine.lobby().observe(&lobby).await?;
	if let Ok(Some(roster)) = timeout(Duration::from_millis(250), roster.recv()).await {
		info!(active = ?roster.active, inactive = ?roster.recently_inactive, "lobby roster");
	}

	engine.sign_out().await;
	info!("demo complete");
	Ok(())
}
