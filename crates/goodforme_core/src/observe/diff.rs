//! Storage-agnostic keyed diff of two ordered lists.
//!
//! # Responsibility
//! - Turn "old ordering" and "new ordering" into a sequential list of
//!   `ChangeEvent`s.
//! - Provide `replay`, the interpreter that applies such a list to a vector.
//!
//! # Invariants
//! - Keys are unique within each input list.
//! - Replaying the events against `old` yields exactly the keys of `new`.
//! - Event order inside one diff: deletes (descending), moves, inserts
//!   (ascending), updates (ascending).
//! - Only entries whose sort position key changed are moved; entries that
//!   kept their sort key keep their relative order and never get a `Move`.

use crate::observe::event::ChangeEvent;
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::hash::Hash;

/// Classification of an entry present in both lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryChange {
    Unchanged,
    /// Same sort key, other fields differ.
    Updated,
    /// Sort key differs.
    Reordered,
}

/// Computes the events that transform `old` into `new`.
///
/// `key_of` identifies entries across both sides; `classify` compares the
/// old and new version of an entry present in both.
pub fn diff<T, K>(
    old: &[T],
    new: &[T],
    key_of: impl Fn(&T) -> K,
    classify: impl Fn(&T, &T) -> EntryChange,
) -> Vec<ChangeEvent>
where
    K: Eq + Hash + Clone,
{
    let old_keys: Vec<K> = old.iter().map(&key_of).collect();
    let new_keys: Vec<K> = new.iter().map(&key_of).collect();
    let old_index: HashMap<&K, usize> = old_keys.iter().enumerate().map(|(i, k)| (k, i)).collect();
    let new_index: HashMap<&K, usize> = new_keys.iter().enumerate().map(|(i, k)| (k, i)).collect();
    debug_assert_eq!(old_index.len(), old_keys.len(), "duplicate key in old list");
    debug_assert_eq!(new_index.len(), new_keys.len(), "duplicate key in new list");

    let mut events = Vec::new();

    for (index, key) in old_keys.iter().enumerate().rev() {
        if !new_index.contains_key(key) {
            events.push(ChangeEvent::Delete { index });
        }
    }

    let mut reordered = HashSet::new();
    let mut updated = HashSet::new();
    for (new_pos, key) in new_keys.iter().enumerate() {
        if let Some(&old_pos) = old_index.get(key) {
            match classify(&old[old_pos], &new[new_pos]) {
                EntryChange::Unchanged => {}
                EntryChange::Updated => {
                    updated.insert(key);
                }
                EntryChange::Reordered => {
                    reordered.insert(key);
                }
            }
        }
    }

    // Survivors, in old order, then rearranged into new order by moving only
    // reordered entries: each lands right after its new predecessor.
    let mut working: Vec<&K> = old_keys
        .iter()
        .filter(|key| new_index.contains_key(key))
        .collect();
    let survivors: Vec<&K> = new_keys
        .iter()
        .filter(|key| old_index.contains_key(key))
        .collect();

    for (target_pos, key) in survivors.iter().enumerate() {
        if !reordered.contains(key) {
            continue;
        }
        let from = position(&working, *key);
        let entry = working.remove(from);
        let to = match target_pos {
            0 => 0,
            _ => position(&working, survivors[target_pos - 1]) + 1,
        };
        working.insert(to, entry);
        if from == to {
            updated.insert(*key);
        } else {
            events.push(ChangeEvent::Move { from, to });
        }
    }
    debug_assert!(working == survivors);

    for (index, key) in new_keys.iter().enumerate() {
        if !old_index.contains_key(key) {
            events.push(ChangeEvent::Insert { index });
        }
    }

    for (index, key) in new_keys.iter().enumerate() {
        if updated.contains(key) {
            events.push(ChangeEvent::Update { index });
        }
    }

    events
}

fn position<K: Eq>(list: &[&K], key: &K) -> usize {
    list.iter()
        .position(|candidate| *candidate == key)
        .unwrap_or_else(|| unreachable!("survivor missing from working list"))
}

/// Event that could not be applied during [`replay`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayError {
    pub event: ChangeEvent,
    pub len: usize,
}

impl Display for ReplayError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "event {} out of bounds for list of length {}", self.event, self.len)
    }
}

impl Error for ReplayError {}

/// Applies `events` to `list` in order.
///
/// Inserted and updated entries are taken from `target` at the event index,
/// matching the order in which [`diff`] emits them. Moved entries keep their
/// previous content.
pub fn replay<T: Clone>(
    list: &mut Vec<T>,
    events: &[ChangeEvent],
    target: &[T],
) -> Result<(), ReplayError> {
    for event in events {
        let len = list.len();
        let out_of_bounds = ReplayError { event: *event, len };
        match *event {
            ChangeEvent::Insert { index } => {
                let value = target.get(index).filter(|_| index <= len);
                list.insert(index, value.ok_or(out_of_bounds)?.clone());
            }
            ChangeEvent::Delete { index } => {
                if index >= len {
                    return Err(out_of_bounds);
                }
                list.remove(index);
            }
            ChangeEvent::Update { index } => {
                let value = target.get(index).filter(|_| index < len);
                list[index] = value.ok_or(out_of_bounds)?.clone();
            }
            ChangeEvent::Move { from, to } => {
                if from >= len || to >= len {
                    return Err(out_of_bounds);
                }
                let entry = list.remove(from);
                list.insert(to, entry);
            }
            ChangeEvent::FullReload => {
                *list = target.to_vec();
            }
        }
    }
    Ok(())
}
