#![forbid(unsafe_code)]

use std::sync::Arc;

use parley_domain::{Chatroom, ChatroomId};
use parley_store::{DocumentStore, StoreError};

/// Read-modify-write a chatroom document under compare-and-swap.
///
/// `edit` returns `false` when the document already has the desired shape;
/// no write is issued in that case. On a version conflict the whole cycle
/// restarts, up to `budget` attempts; the final conflict is returned.
pub(crate) async fn edit_chatroom<F>(
	store: &Arc<dyn DocumentStore>,
	id: &ChatroomId,
	budget: u32,
	mut edit: F,
) -> Result<Chatroom, StoreError>
where
	F: FnMut(&mut Chatroom) -> bool,
{
	let mut attempts: u32 = 0;
	loop {
		let doc = store.get_chatroom(id).await?;
		let mut next = doc.value;

		if !edit(&mut next) {
			return Ok(next);
		}

		match store.write_chatroom_if_version(next.clone(), doc.version).await {
			Ok(()) => return Ok(next),
			Err(StoreError::Conflict { doc, expected, found }) => {
				attempts += 1;
				if attempts >= budget.max(1) {
					return Err(StoreError::Conflict { doc, expected, found });
				}
			}
			Err(e) => return Err(e),
		}
	}
}
