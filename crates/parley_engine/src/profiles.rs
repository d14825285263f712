#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Duration;

use parley_domain::{Profile, UserId};
use parley_store::{ProfileService, ProfileStore};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, oneshot};
use tokio::time::timeout;
use tracing::debug;

use crate::EngineError;

type FetchResult = Result<Vec<Profile>, EngineError>;
type InflightMap = HashMap<RequestKey, Vec<oneshot::Sender<FetchResult>>>;

/// Key of an in-flight resolution: a single id, or a digest of a batch's
/// sorted id set (so equal batches in any order coalesce).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RequestKey {
	Single(UserId),
	Batch(String),
}

fn request_key(sorted_ids: &[UserId]) -> RequestKey {
	if let [only] = sorted_ids {
		return RequestKey::Single(only.clone());
	}
	let mut hasher = Sha256::new();
	for id in sorted_ids {
		hasher.update(id.as_str().as_bytes());
		hasher.update([0u8]);
	}
	let hex: String = hasher.finalize().iter().map(|b| format!("{b:02x}")).collect();
	RequestKey::Batch(hex)
}

/// Two-tier (local-store + remote-service) cache for profile records with
/// in-flight request coalescing.
///
/// The waiter map is only ever touched under one lock; that single
/// serialization point is what guarantees a second identical request joins
/// the in-flight fetch instead of issuing its own. The fetch itself runs in
/// a detached task that owns removing the entry and notifying the waiters,
/// so cancelling any caller (including the one that started the fetch)
/// never strands the key.
pub struct ProfileResolutionCache {
	remote: Arc<dyn ProfileService>,
	local: Arc<dyn ProfileStore>,
	inflight: Arc<Mutex<InflightMap>>,
	fetch_timeout: Duration,
}

impl ProfileResolutionCache {
	pub fn new(remote: Arc<dyn ProfileService>, local: Arc<dyn ProfileStore>, fetch_timeout: Duration) -> Self {
		Self {
			remote,
			local,
			inflight: Arc::new(Mutex::new(HashMap::new())),
			fetch_timeout,
		}
	}

	/// Resolve a single profile.
	pub async fn get(&self, user: &UserId, allow_cache: bool) -> Result<Profile, EngineError> {
		let mut got = self.get_batch(std::slice::from_ref(user), allow_cache).await?;
		match got.pop() {
			Some(profile) if &profile.user == user => Ok(profile),
			_ => Err(EngineError::NotFound),
		}
	}

	/// Resolve a batch of profiles.
	///
	/// Returns from the local store with no remote call when `allow_cache`
	/// and *all* requested ids are present locally. Otherwise joins or
	/// starts a coalesced remote fetch; every waiter for the same key is
	/// notified exactly once, in registration order, when it completes.
	pub async fn get_batch(&self, users: &[UserId], allow_cache: bool) -> Result<Vec<Profile>, EngineError> {
		let mut ids: Vec<UserId> = users.to_vec();
		ids.sort();
		ids.dedup();

		if ids.is_empty() {
			return Ok(Vec::new());
		}

		if allow_cache && let Some(cached) = self.local.get_all(&ids).await {
			return Ok(cached);
		}

		let key = request_key(&ids);

		let rx = {
			let mut inflight = self.inflight.lock().await;
			match inflight.entry(key.clone()) {
				Entry::Occupied(mut e) => {
					let (tx, rx) = oneshot::channel();
					e.get_mut().push(tx);
					debug!(?key, "profile resolution joined in-flight fetch");
					rx
				}
				Entry::Vacant(e) => {
					let (tx, rx) = oneshot::channel();
					e.insert(vec![tx]);
					self.spawn_fetch(key.clone(), ids);
					rx
				}
			}
		};

		// The detached task is the only remover of the entry; a dropped rx
		// here just means one fewer delivery.
		rx.await
			.map_err(|_| EngineError::Network("in-flight profile resolution was dropped".to_string()))?
	}

	/// Run the remote fetch to completion regardless of caller lifetimes,
	/// then remove the entry and fan the result out.
	fn spawn_fetch(&self, key: RequestKey, ids: Vec<UserId>) {
		let remote = self.remote.clone();
		let local = self.local.clone();
		let inflight = self.inflight.clone();
		let fetch_timeout = self.fetch_timeout;

		tokio::spawn(async move {
			let result = resolve(remote, local, fetch_timeout, &ids).await;

			let waiters = inflight.lock().await.remove(&key).unwrap_or_default();
			for tx in waiters {
				let _ = tx.send(result.clone());
			}
		});
	}

	/// Evict one profile. Called when that user's relationship status
	/// changes (friend added/accepted/blocked), which usually accompanies a
	/// profile change.
	pub async fn invalidate(&self, user: &UserId) {
		self.local.remove(user).await;
	}

	/// Wholesale clear. Called on sign-out and sign-in so stale profiles
	/// never leak across sessions.
	pub async fn clear(&self) {
		self.local.clear().await;
	}
}

async fn resolve(
	remote: Arc<dyn ProfileService>,
	local: Arc<dyn ProfileStore>,
	fetch_timeout: Duration,
	ids: &[UserId],
) -> FetchResult {
	match timeout(fetch_timeout, remote.fetch_profiles(ids)).await {
		Ok(Ok(profiles)) => {
			// Write through before any waiter observes the result.
			local.put_many(profiles.clone()).await;
			Ok(profiles)
		}
		Ok(Err(e)) => Err(e.into()),
		Err(_) => Err(EngineError::Network(format!("profile fetch timed out after {fetch_timeout:?}"))),
	}
}
