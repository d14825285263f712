#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use parley_domain::{Chatroom, MessageKind, SessionId, UserId};
use parley_store::{DocumentStore, MemoryStore};
use tokio::time::timeout;

use crate::EngineError;
use crate::config::EngineConfig;
use crate::relay::MessageStreamRelay;
use crate::resolver::ChatroomResolver;
use crate::session::SessionHandle;
use crate::unread::UnreadCounterService;

fn user(s: &str) -> UserId {
	UserId::new(s).expect("valid UserId")
}

fn users(names: &[&str]) -> BTreeSet<UserId> {
	names.iter().map(|s| user(s)).collect()
}

fn harness() -> (MemoryStore, SessionHandle, ChatroomResolver) {
	let store = MemoryStore::default();
	let session = SessionHandle::new();
	let cfg = EngineConfig::default();
	let unread = Arc::new(UnreadCounterService::new(Arc::new(store.clone()), &cfg));
	let relay = Arc::new(MessageStreamRelay::new(
		Arc::new(store.clone()),
		unread.clone(),
		session.clone(),
		&cfg,
	));
	let resolver = ChatroomResolver::new(Arc::new(store.clone()), session.clone(), unread, relay, &cfg);
	(store, session, resolver)
}

#[tokio::test]
async fn resolving_requires_a_signed_in_user() {
	let (_, _, resolver) = harness();
	let err = resolver.resolve_private(users(&["b"])).await.unwrap_err();
	assert!(matches!(err, EngineError::NotSignedIn));
}

#[tokio::test]
async fn resolving_the_same_set_twice_returns_the_same_room() {
	let (_, session, resolver) = harness();
	session.sign_in(user("a")).await;

	let first = resolver.resolve_private(users(&["b"])).await.unwrap();
	let second = resolver.resolve_private(users(&["b"])).await.unwrap();
	assert_eq!(first.id, second.id);
}

#[tokio::test]
async fn the_caller_is_always_a_participant() {
	let (_, session, resolver) = harness();
	session.sign_in(user("a")).await;

	let room = resolver.resolve_private(users(&["b", "c"])).await.unwrap();
	assert_eq!(room.participants, users(&["a", "b", "c"]));
	assert_eq!(room.creator, user("a"));
}

#[tokio::test]
async fn distinct_participant_sets_resolve_to_distinct_rooms() {
	let (_, session, resolver) = harness();
	session.sign_in(user("a")).await;

	let pair = resolver.resolve_private(users(&["b"])).await.unwrap();
	let trio = resolver.resolve_private(users(&["b", "c"])).await.unwrap();
	assert_ne!(pair.id, trio.id);
}

#[tokio::test]
async fn session_rooms_never_satisfy_private_resolution() {
	let (store, session, resolver) = harness();
	session.sign_in(user("a")).await;

	let sid = SessionId::new("s1").unwrap();
	let bound = Chatroom::new_session(user("a"), users(&["b"]), sid.clone());
	store.insert_chatroom(bound.clone()).await.unwrap();

	let room = resolver.resolve_private(users(&["b"])).await.unwrap();
	assert_ne!(room.id, bound.id);

	let by_session = resolver.resolve_by_session(&sid).await.unwrap();
	assert_eq!(by_session.id, bound.id);
}

#[tokio::test]
async fn unknown_session_is_not_found() {
	let (_, session, resolver) = harness();
	session.sign_in(user("a")).await;

	let err = resolver.resolve_by_session(&SessionId::new("nope").unwrap()).await.unwrap_err();
	assert!(matches!(err, EngineError::NotFound));
}

#[tokio::test]
async fn set_participants_reinserts_the_creator() {
	let (_, session, resolver) = harness();
	session.sign_in(user("a")).await;

	let room = resolver.resolve_private(users(&["b"])).await.unwrap();
	let updated = resolver.set_participants(&room.id, users(&["c"])).await.unwrap();
	assert_eq!(updated.participants, users(&["a", "c"]));
}

#[tokio::test]
async fn leaving_appends_a_notice_then_removes_the_caller() {
	let (store, session, resolver) = harness();
	session.sign_in(user("a")).await;

	let room = resolver.resolve_private(users(&["b"])).await.unwrap();
	store.increment_unread(&user("a"), &room.id).await.unwrap();

	resolver.leave(&room).await.unwrap();

	let doc = store.get_chatroom(&room.id).await.unwrap();
	assert_eq!(doc.value.participants, users(&["b"]));

	// The farewell notice landed before the removal.
	let mut feed = store.watch_messages(&room.id, 10).await.unwrap();
	let log = timeout(Duration::from_millis(500), feed.recv()).await.unwrap().unwrap();
	assert_eq!(log.len(), 1);
	assert_eq!(log[0].kind, MessageKind::SessionNotice);
	assert_eq!(log[0].sender, user("a"));
	assert!(log[0].text.as_deref().unwrap_or("").contains("left the conversation"));

	// And the leaver's unread counter is gone.
	let mut unread = store.watch_unread(&user("a")).await.unwrap();
	let rows = timeout(Duration::from_millis(500), unread.recv()).await.unwrap().unwrap();
	assert!(rows.is_empty());
}

#[tokio::test]
async fn leaving_clears_the_callers_presence_entries() {
	let (store, session, resolver) = harness();
	session.sign_in(user("a")).await;

	let room = resolver.resolve_private(users(&["b"])).await.unwrap();
	{
		let doc = store.get_chatroom(&room.id).await.unwrap();
		let mut updated = doc.value.clone();
		updated.typing_users.insert(user("a"));
		updated.on_voice_users.insert(user("a"));
		updated.muted_users.insert(user("a"));
		store.write_chatroom_if_version(updated, doc.version).await.unwrap();
	}

	resolver.leave(&room).await.unwrap();

	let doc = store.get_chatroom(&room.id).await.unwrap();
	assert!(doc.value.typing_users.is_empty());
	assert!(doc.value.on_voice_users.is_empty());
	assert!(doc.value.muted_users.is_empty());
}

#[tokio::test]
async fn leaving_a_session_room_skips_the_notice() {
	let (store, session, resolver) = harness();
	session.sign_in(user("a")).await;

	let bound = Chatroom::new_session(user("a"), users(&["b"]), SessionId::new("s1").unwrap());
	store.insert_chatroom(bound.clone()).await.unwrap();

	resolver.leave(&bound).await.unwrap();

	let doc = store.get_chatroom(&bound.id).await.unwrap();
	assert_eq!(doc.value.participants, users(&["b"]));

	let mut feed = store.watch_messages(&bound.id, 10).await.unwrap();
	let log = timeout(Duration::from_millis(500), feed.recv()).await.unwrap().unwrap();
	assert!(log.is_empty());
}
