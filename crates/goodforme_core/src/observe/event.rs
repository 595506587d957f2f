//! Structured collection change notifications.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// One mutation of an observed ordered collection.
///
/// Indices refer to the collection as it stands after every earlier event of
/// the same delivery has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeEvent {
    Insert { index: usize },
    Delete { index: usize },
    Update { index: usize },
    /// The moved entry's content may have changed as well.
    Move { from: usize, to: usize },
    FullReload,
}

impl ChangeEvent {
    pub fn is_structural(&self) -> bool {
        !matches!(self, Self::Update { .. })
    }
}

impl Display for ChangeEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Insert { index } => write!(f, "insert({index})"),
            Self::Delete { index } => write!(f, "delete({index})"),
            Self::Update { index } => write!(f, "update({index})"),
            Self::Move { from, to } => write!(f, "move({from}->{to})"),
            Self::FullReload => f.write_str("full_reload"),
        }
    }
}
