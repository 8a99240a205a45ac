//! Pending change sets
//!
//! A mutation returns the exact delta it produced so the persistence
//! collaborator can apply it without diffing the aggregate.

use serde::{Deserialize, Serialize};

use super::ItemKind;

/// Reference to an item by kind and key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemRef {
    pub kind: ItemKind,
    pub key: String,
}

impl ItemRef {
    pub fn new(kind: ItemKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
        }
    }
}

/// Index move caused by the removal of a sibling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reindexed {
    pub item: ItemRef,
    pub from: usize,
    pub to: usize,
}

/// Delta produced by one or more case mutations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Items to insert
    pub added: Vec<ItemRef>,

    /// Items to write in place (never insert or delete)
    pub updated: Vec<ItemRef>,

    /// Items to delete
    pub removed: Vec<ItemRef>,

    /// Surviving items whose index changed
    pub reindexed: Vec<Reindexed>,
}

impl ChangeSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn added(item: ItemRef) -> Self {
        Self {
            added: vec![item],
            ..Self::default()
        }
    }

    pub fn updated(item: ItemRef) -> Self {
        Self {
            updated: vec![item],
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.updated.is_empty()
            && self.removed.is_empty()
            && self.reindexed.is_empty()
    }

    /// Only in-place updates, no inserts, deletes or index moves
    pub fn is_update_only(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.reindexed.is_empty()
    }

    /// Fold `other` into `self`.
    ///
    /// An update of an item added or removed in the same set is absorbed by
    /// the insert or delete.
    pub fn merge(&mut self, other: ChangeSet) {
        for item in other.added {
            if !self.added.contains(&item) {
                self.added.push(item);
            }
        }
        for item in other.removed {
            self.added.retain(|a| a != &item);
            self.updated.retain(|u| u != &item);
            self.reindexed.retain(|r| r.item != item);
            if !self.removed.contains(&item) {
                self.removed.push(item);
            }
        }
        for item in other.updated {
            if !self.added.contains(&item)
                && !self.removed.contains(&item)
                && !self.updated.contains(&item)
            {
                self.updated.push(item);
            }
        }
        for moved in other.reindexed {
            match self.reindexed.iter_mut().find(|r| r.item == moved.item) {
                Some(existing) => existing.to = moved.to,
                None => self.reindexed.push(moved),
            }
        }
        self.reindexed.retain(|r| r.from != r.to);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_absorbs_update_of_added_item() {
        let file = ItemRef::new(ItemKind::File, "h1");
        let mut changes = ChangeSet::added(file.clone());
        changes.merge(ChangeSet::updated(file.clone()));

        assert_eq!(changes.added, vec![file]);
        assert!(changes.updated.is_empty());
    }

    #[test]
    fn test_merge_remove_cancels_add() {
        let file = ItemRef::new(ItemKind::File, "h1");
        let mut changes = ChangeSet::added(file.clone());
        changes.merge(ChangeSet {
            removed: vec![file.clone()],
            ..ChangeSet::default()
        });

        assert!(changes.added.is_empty());
        assert_eq!(changes.removed, vec![file]);
    }

    #[test]
    fn test_merge_chains_reindex() {
        let link = ItemRef::new(ItemKind::Link, "target");
        let mut changes = ChangeSet {
            reindexed: vec![Reindexed {
                item: link.clone(),
                from: 2,
                to: 1,
            }],
            ..ChangeSet::default()
        };
        changes.merge(ChangeSet {
            reindexed: vec![Reindexed {
                item: link.clone(),
                from: 1,
                to: 0,
            }],
            ..ChangeSet::default()
        });

        assert_eq!(
            changes.reindexed,
            vec![Reindexed {
                item: link,
                from: 2,
                to: 0
            }]
        );
    }

    #[test]
    fn test_update_only() {
        assert!(ChangeSet::updated(ItemRef::new(ItemKind::Metadata, "name")).is_update_only());
        assert!(!ChangeSet::added(ItemRef::new(ItemKind::Metadata, "name")).is_update_only());
        assert!(ChangeSet::empty().is_empty());
    }
}
