//! Optimistic favorites with exact rollback.
//!
//! The map is keyed by a client-local item key (outfit name + index in
//! the recommendation list). An add inserts a `Pending` sentinel before
//! the network call and upgrades it to `Saved(id)` on success; a remove
//! takes the entry out up front and restores it if the delete fails.
//! While a key has a call in flight, further toggles on that key are
//! ignored; other keys proceed independently.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Client-local identity of one recommendation row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemKey(String);

impl ItemKey {
    #[must_use]
    pub fn for_recommendation(outfit_name: &str, index: usize) -> Self {
        Self(format!("{outfit_name}-{index}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ItemKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FavoriteEntry {
    /// Optimistically shown as favorited; no server id yet.
    Pending,
    Saved { id: String },
}

/// What a toggle decided to do. The app layer turns this into the
/// matching network call (or into nothing).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleAction {
    StartAdd,
    StartRemove { id: String },
    /// A call for this key is already in flight; the toggle is dropped.
    Ignored,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FavoritesManager {
    entries: HashMap<ItemKey, FavoriteEntry>,
    in_flight: HashSet<ItemKey>,
}

impl FavoritesManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_favorite(&self, key: &ItemKey) -> bool {
        self.entries.contains_key(key)
    }

    #[must_use]
    pub fn is_pending(&self, key: &ItemKey) -> bool {
        matches!(self.entries.get(key), Some(FavoriteEntry::Pending))
            || self.in_flight.contains(key)
    }

    #[must_use]
    pub fn entry(&self, key: &ItemKey) -> Option<&FavoriteEntry> {
        self.entries.get(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decides what a toggle on `key` does and applies the optimistic
    /// half of it.
    pub fn toggle(&mut self, key: &ItemKey) -> ToggleAction {
        if self.in_flight.contains(key) {
            return ToggleAction::Ignored;
        }

        match self.entries.get(key) {
            None => {
                self.entries.insert(key.clone(), FavoriteEntry::Pending);
                self.in_flight.insert(key.clone());
                ToggleAction::StartAdd
            }
            Some(FavoriteEntry::Saved { id }) => {
                let id = id.clone();
                self.entries.remove(key);
                self.in_flight.insert(key.clone());
                ToggleAction::StartRemove { id }
            }
            // Pending without an in-flight call only happens mid-rollback;
            // treat it as busy.
            Some(FavoriteEntry::Pending) => ToggleAction::Ignored,
        }
    }

    /// The add round-trip came back with a server id.
    pub fn resolve_add(&mut self, key: &ItemKey, id: String) {
        self.in_flight.remove(key);
        if let Some(entry) = self.entries.get_mut(key) {
            *entry = FavoriteEntry::Saved { id };
        }
    }

    /// The add failed: take the sentinel back out, leaving the map
    /// exactly as it was before the toggle.
    pub fn rollback_add(&mut self, key: &ItemKey) {
        self.in_flight.remove(key);
        if matches!(self.entries.get(key), Some(FavoriteEntry::Pending)) {
            self.entries.remove(key);
        }
    }

    pub fn resolve_remove(&mut self, key: &ItemKey) {
        self.in_flight.remove(key);
    }

    /// The delete failed: put the saved entry back under its old id.
    pub fn rollback_remove(&mut self, key: &ItemKey, id: String) {
        self.in_flight.remove(key);
        self.entries.insert(key.clone(), FavoriteEntry::Saved { id });
    }

    /// Drops the in-flight marker without touching entries. Used when a
    /// response arrives for a session that no longer exists.
    pub fn clear_in_flight(&mut self, key: &ItemKey) {
        self.in_flight.remove(key);
    }

    /// Wholesale reset; regeneration and session discard both land here.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.in_flight.clear();
    }
}
