//! The pool of searching users, indexed for fast compatibility scans.

use std::collections::{BTreeSet, HashMap, HashSet};

use mingle_protocol::ChatPreference;

/// Lowercase, trim, and de-duplicate interest tags, dropping empties.
#[must_use]
pub fn normalize_interests(raw: &[String]) -> BTreeSet<String> {
    raw.iter()
        .map(|tag| tag.trim().to_lowercase())
        .filter(|tag| !tag.is_empty())
        .collect()
}

/// One searching user.
#[derive(Debug, Clone)]
pub struct SearchEntry {
    pub user_id: String,
    pub interests: BTreeSet<String>,
    pub preference: ChatPreference,
    /// Users this searcher must never be paired with (either direction).
    pub blocked: HashSet<String>,
    pub enqueued_at: u64,
}

impl SearchEntry {
    #[must_use]
    pub fn shares_interest_with(&self, other: &SearchEntry) -> usize {
        self.interests.intersection(&other.interests).count()
    }
}

/// Set of search entries plus an inverted interest-tag index.
///
/// The inverted index is kept consistent with the entry set by funnelling all
/// mutation through [`add`](Self::add) and [`remove`](Self::remove).
#[derive(Default)]
pub struct SearchPool {
    entries: HashMap<String, SearchEntry>,
    by_interest: HashMap<String, HashSet<String>>,
}

impl SearchPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, replacing any previous entry for the same user.
    pub fn add(&mut self, entry: SearchEntry) {
        self.remove(&entry.user_id);
        for tag in &entry.interests {
            self.by_interest
                .entry(tag.clone())
                .or_default()
                .insert(entry.user_id.clone());
        }
        self.entries.insert(entry.user_id.clone(), entry);
    }

    pub fn remove(&mut self, user_id: &str) -> Option<SearchEntry> {
        let entry = self.entries.remove(user_id)?;
        for tag in &entry.interests {
            if let Some(users) = self.by_interest.get_mut(tag) {
                users.remove(user_id);
                if users.is_empty() {
                    self.by_interest.remove(tag);
                }
            }
        }
        Some(entry)
    }

    #[must_use]
    pub fn contains(&self, user_id: &str) -> bool {
        self.entries.contains_key(user_id)
    }

    #[must_use]
    pub fn get(&self, user_id: &str) -> Option<&SearchEntry> {
        self.entries.get(user_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries ordered oldest first (ties broken by id for determinism).
    #[must_use]
    pub fn oldest_first(&self) -> Vec<&SearchEntry> {
        let mut all: Vec<&SearchEntry> = self.entries.values().collect();
        all.sort_by(|a, b| {
            a.enqueued_at
                .cmp(&b.enqueued_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        all
    }

    /// Users compatible with `entry`: same preference, at least one shared
    /// interest, and not blocked in either direction. Uses the inverted index
    /// so only users sharing a tag are ever inspected.
    #[must_use]
    pub fn candidates_for(&self, entry: &SearchEntry) -> Vec<&SearchEntry> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut out = Vec::new();
        for tag in &entry.interests {
            let Some(users) = self.by_interest.get(tag) else {
                continue;
            };
            for user_id in users {
                if user_id == &entry.user_id || seen.contains(user_id.as_str()) {
                    continue;
                }
                seen.insert(user_id);
                let Some(other) = self.entries.get(user_id) else {
                    continue;
                };
                if other.preference != entry.preference {
                    continue;
                }
                if entry.blocked.contains(user_id) || other.blocked.contains(&entry.user_id) {
                    continue;
                }
                out.push(other);
            }
        }
        out
    }
}
