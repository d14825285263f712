#![forbid(unsafe_code)]

//! Minimal-edit reconciliation for live list feeds.
//!
//! Observation streams emit the full reconciled list on every update;
//! consumers diff each emission against their previous snapshot with
//! [`diff_keyed`] and apply the resulting insert/delete/move script instead
//! of reloading the whole view.

use std::collections::HashSet;
use std::hash::Hash;

use parley_domain::Message;

/// One step of an edit script. Indices refer to the list as it stands when
/// the step is applied, after all previous steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListEdit<T> {
	Insert { index: usize, item: T },
	Delete { index: usize },
	Move { from: usize, to: usize },
}

/// Compute an edit script turning `old` into `new`, keyed by `key`.
///
/// Items whose key survives stay in place where possible: common
/// subsequences are never touched, reordered survivors become moves rather
/// than delete/insert pairs. Keys must be unique within each list (message
/// ids are).
pub fn diff_keyed<T, K, F>(old: &[T], new: &[T], key: F) -> Vec<ListEdit<T>>
where
	T: Clone,
	K: Eq + Hash,
	F: Fn(&T) -> K,
{
	let new_keys: HashSet<K> = new.iter().map(&key).collect();

	let mut edits = Vec::new();
	let mut work: Vec<K> = old.iter().map(&key).collect();

	// Phase 1: drop vanished items, highest index first so earlier indices
	// stay valid.
	for index in (0..work.len()).rev() {
		if !new_keys.contains(&work[index]) {
			edits.push(ListEdit::Delete { index });
			work.remove(index);
		}
	}

	// Phase 2: walk the target; every position either already matches,
	// pulls a surviving item forward, or inserts a new one.
	for (index, item) in new.iter().enumerate() {
		let k = key(item);

		if work.get(index) == Some(&k) {
			continue;
		}

		if let Some(offset) = work[index.min(work.len())..].iter().position(|w| *w == k) {
			let from = index + offset;
			edits.push(ListEdit::Move { from, to: index });
			let moved = work.remove(from);
			work.insert(index, moved);
		} else {
			edits.push(ListEdit::Insert {
				index,
				item: item.clone(),
			});
			work.insert(index, k);
		}
	}

	edits
}

/// Apply an edit script produced by [`diff_keyed`].
pub fn apply<T: Clone>(old: &[T], edits: &[ListEdit<T>]) -> Vec<T> {
	let mut list: Vec<T> = old.to_vec();
	for edit in edits {
		match edit {
			ListEdit::Insert { index, item } => list.insert(*index, item.clone()),
			ListEdit::Delete { index } => {
				list.remove(*index);
			}
			ListEdit::Move { from, to } => {
				let item = list.remove(*from);
				list.insert(*to, item);
			}
		}
	}
	list
}

/// Diff two message-feed emissions by message id.
pub fn diff_messages(old: &[Message], new: &[Message]) -> Vec<ListEdit<Message>> {
	diff_keyed(old, new, |m| m.id)
}

#[cfg(test)]
mod tests {
	use proptest::prelude::*;

	use super::*;

	fn diff_ids(old: &[u32], new: &[u32]) -> Vec<ListEdit<u32>> {
		diff_keyed(old, new, |x| *x)
	}

	#[test]
	fn appends_produce_tail_inserts_only() {
		let old = [1, 2, 3];
		let new = [1, 2, 3, 4, 5];
		let edits = diff_ids(&old, &new);
		assert_eq!(
			edits,
			vec![
				ListEdit::Insert { index: 3, item: 4 },
				ListEdit::Insert { index: 4, item: 5 },
			]
		);
	}

	#[test]
	fn window_slide_is_one_delete_one_insert() {
		// The live view dropping its oldest entry as a new one lands.
		let old = [1, 2, 3];
		let new = [2, 3, 4];
		let edits = diff_ids(&old, &new);
		assert_eq!(
			edits,
			vec![ListEdit::Delete { index: 0 }, ListEdit::Insert { index: 2, item: 4 }]
		);
	}

	#[test]
	fn reordered_survivor_becomes_a_move() {
		let old = [1, 2, 3];
		let new = [3, 1, 2];
		let edits = diff_ids(&old, &new);
		assert_eq!(edits, vec![ListEdit::Move { from: 2, to: 0 }]);
	}

	#[test]
	fn identical_lists_need_no_edits() {
		let old = [1, 2, 3];
		assert!(diff_ids(&old, &old).is_empty());
	}

	#[test]
	fn empty_to_full_and_back() {
		let edits = diff_ids(&[], &[1, 2]);
		assert_eq!(apply(&[], &edits), vec![1, 2]);

		let edits = diff_ids(&[1, 2], &[]);
		assert_eq!(apply(&[1, 2], &edits), Vec::<u32>::new());
	}

	proptest! {
		#[test]
		fn script_transforms_old_into_new(
			old_pool in proptest::collection::hash_set(0u32..64, 0..16),
			new_pool in proptest::collection::hash_set(0u32..64, 0..16),
			seed in any::<u64>(),
		) {
			// Unique keys in pseudo-random order on both sides.
			let mut old: Vec<u32> = old_pool.into_iter().collect();
			let mut new: Vec<u32> = new_pool.into_iter().collect();
			old.sort_by_key(|x| x.wrapping_mul(seed as u32 | 1));
			new.sort_by_key(|x| x.rotate_left((seed % 31) as u32));

			let edits = diff_ids(&old, &new);
			prop_assert_eq!(apply(&old, &edits), new);
		}
	}
}
