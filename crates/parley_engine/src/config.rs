#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use serde::Deserialize;
use tracing::info;

/// Default config path: `~/.parley/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".parley").join("config.toml"))
}

/// Load the engine config from TOML and env overrides.
pub fn load_engine_config() -> anyhow::Result<EngineConfig> {
	let path = default_config_path()?;
	load_engine_config_from_path(&path)
}

/// Same as `load_engine_config` but with an explicit config path.
pub fn load_engine_config_from_path(path: &Path) -> anyhow::Result<EngineConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = EngineConfig::from_file(file_cfg);

	apply_env_overrides(&mut cfg);

	Ok(cfg)
}

/// Tunables of the engine, replacing the inline magic constants of the
/// original system with named, documented values.
#[derive(Debug, Clone)]
pub struct EngineConfig {
	/// Age past which an *inactive* lobby membership stops appearing in
	/// rosters. Active rows never age out. Unit: wall-clock duration.
	pub lobby_staleness: Duration,

	/// Messages kept in a live feed window; older messages silently fall
	/// out of the view (not out of storage).
	pub live_message_limit: usize,

	/// Membership rows read per lobby roster emission.
	pub lobby_roster_limit: usize,

	/// Upper bound on any single remote fetch; a timed-out fetch is a
	/// network failure, never a silent hang.
	pub fetch_timeout: Duration,

	/// Read-modify-write attempts before a presence mutation is dropped.
	pub cas_retry_budget: u32,

	/// Maximum queued emissions per observation stream.
	pub watch_queue_capacity: usize,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			lobby_staleness: Duration::from_secs(3 * 24 * 60 * 60),
			live_message_limit: 100,
			lobby_roster_limit: 50,
			fetch_timeout: Duration::from_secs(10),
			cas_retry_budget: 8,
			watch_queue_capacity: 64,
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	lobby_staleness_hours: Option<u64>,
	live_message_limit: Option<usize>,
	lobby_roster_limit: Option<usize>,
	fetch_timeout_secs: Option<u64>,
	cas_retry_budget: Option<u32>,
	watch_queue_capacity: Option<usize>,
}

impl EngineConfig {
	fn from_file(file: FileConfig) -> Self {
		let defaults = Self::default();
		Self {
			lobby_staleness: file
				.lobby_staleness_hours
				.filter(|v| *v > 0)
				.map(|h| Duration::from_secs(h * 60 * 60))
				.unwrap_or(defaults.lobby_staleness),
			live_message_limit: file
				.live_message_limit
				.filter(|v| *v > 0)
				.unwrap_or(defaults.live_message_limit),
			lobby_roster_limit: file
				.lobby_roster_limit
				.filter(|v| *v > 0)
				.unwrap_or(defaults.lobby_roster_limit),
			fetch_timeout: file
				.fetch_timeout_secs
				.filter(|v| *v > 0)
				.map(Duration::from_secs)
				.unwrap_or(defaults.fetch_timeout),
			cas_retry_budget: file.cas_retry_budget.filter(|v| *v > 0).unwrap_or(defaults.cas_retry_budget),
			watch_queue_capacity: file
				.watch_queue_capacity
				.filter(|v| *v > 0)
				.unwrap_or(defaults.watch_queue_capacity),
		}
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut EngineConfig) {
	if let Ok(v) = std::env::var("PARLEY_LOBBY_STALENESS_HOURS")
		&& let Ok(hours) = v.trim().parse::<u64>()
		&& hours > 0
	{
		cfg.lobby_staleness = Duration::from_secs(hours * 60 * 60);
		info!(hours, "engine config: lobby_staleness overridden by env");
	}

	if let Ok(v) = std::env::var("PARLEY_LIVE_MESSAGE_LIMIT")
		&& let Ok(limit) = v.trim().parse::<usize>()
		&& limit > 0
	{
		cfg.live_message_limit = limit;
		info!(limit, "engine config: live_message_limit overridden by env");
	}

	if let Ok(v) = std::env::var("PARLEY_LOBBY_ROSTER_LIMIT")
		&& let Ok(limit) = v.trim().parse::<usize>()
		&& limit > 0
	{
		cfg.lobby_roster_limit = limit;
		info!(limit, "engine config: lobby_roster_limit overridden by env");
	}

	if let Ok(v) = std::env::var("PARLEY_FETCH_TIMEOUT_SECS")
		&& let Ok(secs) = v.trim().parse::<u64>()
		&& secs > 0
	{
		cfg.fetch_timeout = Duration::from_secs(secs);
		info!(secs, "engine config: fetch_timeout overridden by env");
	}

	if let Ok(v) = std::env::var("PARLEY_CAS_RETRY_BUDGET")
		&& let Ok(budget) = v.trim().parse::<u32>()
		&& budget > 0
	{
		cfg.cas_retry_budget = budget;
		info!(budget, "engine config: cas_retry_budget overridden by env");
	}

	if let Ok(v) = std::env::var("PARLEY_WATCH_QUEUE_CAPACITY")
		&& let Ok(capacity) = v.trim().parse::<usize>()
		&& capacity > 0
	{
		cfg.watch_queue_capacity = capacity;
		info!(capacity, "engine config: watch_queue_capacity overridden by env");
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_are_sane() {
		let cfg = EngineConfig::default();
		assert_eq!(cfg.lobby_staleness, Duration::from_secs(72 * 60 * 60));
		assert_eq!(cfg.live_message_limit, 100);
		assert!(cfg.cas_retry_budget > 0);
		assert!(cfg.watch_queue_capacity > 0);
	}

	#[test]
	fn file_values_override_defaults() {
		let file: FileConfig = toml::from_str(
			"lobby_staleness_hours = 24\n\
			 live_message_limit = 25\n\
			 fetch_timeout_secs = 3\n",
		)
		.unwrap();

		let cfg = EngineConfig::from_file(file);
		assert_eq!(cfg.lobby_staleness, Duration::from_secs(24 * 60 * 60));
		assert_eq!(cfg.live_message_limit, 25);
		assert_eq!(cfg.fetch_timeout, Duration::from_secs(3));
		// Untouched fields keep their defaults.
		assert_eq!(cfg.cas_retry_budget, EngineConfig::default().cas_retry_budget);
	}

	#[test]
	fn zero_file_values_are_ignored() {
		let file: FileConfig = toml::from_str("live_message_limit = 0\ncas_retry_budget = 0\n").unwrap();
		let cfg = EngineConfig::from_file(file);
		assert_eq!(cfg.live_message_limit, EngineConfig::default().live_message_limit);
		assert_eq!(cfg.cas_retry_budget, EngineConfig::default().cas_retry_budget);
	}

	#[test]
	fn missing_config_file_yields_defaults() {
		let cfg = load_engine_config_from_path(Path::new("/nonexistent/parley/config.toml")).unwrap();
		assert_eq!(cfg.live_message_limit, EngineConfig::default().live_message_limit);
	}
}
