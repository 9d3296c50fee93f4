//! Chain head snapshot.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::{BlockHash, Timestamp};

/// Immutable snapshot of a chain tip.
///
/// Identity is the block hash: two heads with the same `hash` are the same
/// head, whatever the other fields say. `parent_hash` is a back-reference
/// only; a head never owns its ancestors.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Head {
    pub number: u64,
    pub hash: BlockHash,
    pub parent_hash: BlockHash,
    pub timestamp: Timestamp,
}

impl Head {
    pub fn new(number: u64, hash: BlockHash, parent_hash: BlockHash, timestamp: Timestamp) -> Self {
        Self {
            number,
            hash,
            parent_hash,
            timestamp,
        }
    }

    /// Whether `self` directly extends `parent`.
    pub fn is_child_of(&self, parent: &Head) -> bool {
        self.parent_hash == parent.hash && parent.number.checked_add(1) == Some(self.number)
    }

    /// A head without a parent reference.
    pub fn is_genesis(&self) -> bool {
        self.parent_hash.is_zero()
    }
}

impl PartialEq for Head {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for Head {}

impl Hash for Head {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl fmt::Display for Head {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({})", self.number, self.hash.short())
    }
}
