//! Change observation over committed store state.
//!
//! # Responsibility
//! - Describe collection changes as `ChangeEvent`s.
//! - Compute them with a storage-agnostic ordered-list diff.
//! - Drive one delegate per observer from store commit notifications.

mod diff;
mod event;
mod observer;
mod order;

pub use diff::{diff, replay, EntryChange, ReplayError};
pub use event::ChangeEvent;
pub use observer::{ChangeDelegate, ChangeObserver, Delivery, EntryKey};
pub use order::SortOrder;
