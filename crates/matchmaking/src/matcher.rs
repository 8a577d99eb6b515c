//! Tick-driven pairing over the search pool.
//!
//! One call to [`plan`] pairs as many searchers as possible. Oldest searchers
//! pick first, so nobody starves; among a searcher's candidates, more shared
//! interests win, with older enqueue instants and then lexicographic ids as
//! tie-breaks, which keeps runs reproducible.

use std::collections::HashSet;

use mingle_protocol::ChatPreference;

use crate::pool::{SearchEntry, SearchPool};

/// A pair the matcher wants to put in front of both users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMatch {
    pub first: String,
    pub second: String,
    pub kind: ChatPreference,
    pub shared_interests: usize,
}

/// Compute the pairs for one tick. Pure: the pool is not modified.
#[must_use]
pub fn plan(pool: &SearchPool) -> Vec<PlannedMatch> {
    let mut paired: HashSet<&str> = HashSet::new();
    let mut out = Vec::new();

    for searcher in pool.oldest_first() {
        if paired.contains(searcher.user_id.as_str()) {
            continue;
        }

        let best = pool
            .candidates_for(searcher)
            .into_iter()
            .filter(|c| !paired.contains(c.user_id.as_str()))
            .max_by(|a, b| rank(searcher, a).cmp(&rank(searcher, b)));

        if let Some(candidate) = best {
            paired.insert(searcher.user_id.as_str());
            paired.insert(candidate.user_id.as_str());
            out.push(PlannedMatch {
                first: searcher.user_id.clone(),
                second: candidate.user_id.clone(),
                kind: searcher.preference,
                shared_interests: searcher.shares_interest_with(candidate),
            });
        }
    }

    out
}

/// Ranking key for a candidate: more shared interests beat fewer; then older
/// enqueue instants; then lexicographically smaller ids. `max_by` picks the
/// largest key, so age and id are inverted.
fn rank<'a>(
    searcher: &SearchEntry,
    candidate: &'a SearchEntry,
) -> (usize, std::cmp::Reverse<u64>, std::cmp::Reverse<&'a str>) {
    (
        searcher.shares_interest_with(candidate),
        std::cmp::Reverse(candidate.enqueued_at),
        std::cmp::Reverse(candidate.user_id.as_str()),
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rstest::rstest;

    use {super::*, crate::pool::normalize_interests};

    fn entry(
        user_id: &str,
        interests: &[&str],
        preference: ChatPreference,
        enqueued_at: u64,
    ) -> SearchEntry {
        SearchEntry {
            user_id: user_id.into(),
            interests: normalize_interests(
                &interests.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            ),
            preference,
            blocked: HashSet::new(),
            enqueued_at,
        }
    }

    fn pool_of(entries: Vec<SearchEntry>) -> SearchPool {
        let mut pool = SearchPool::new();
        for e in entries {
            pool.add(e);
        }
        pool
    }

    #[test]
    fn pairs_compatible_searchers() {
        let pool = pool_of(vec![
            entry("u1", &["music", "art"], ChatPreference::Friendship, 0),
            entry("u2", &["art", "sports"], ChatPreference::Friendship, 1),
        ]);
        let planned = plan(&pool);
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].first, "u1");
        assert_eq!(planned[0].second, "u2");
        assert_eq!(planned[0].kind, ChatPreference::Friendship);
        assert_eq!(planned[0].shared_interests, 1);
    }

    #[rstest]
    #[case::friendship_vs_dating(ChatPreference::Friendship, ChatPreference::Dating)]
    #[case::dating_vs_friendship(ChatPreference::Dating, ChatPreference::Friendship)]
    fn preference_mismatch_never_pairs(
        #[case] first: ChatPreference,
        #[case] second: ChatPreference,
    ) {
        let pool = pool_of(vec![
            entry("u1", &["music"], first, 0),
            entry("u3", &["music"], second, 1),
        ]);
        assert!(plan(&pool).is_empty());
    }

    #[test]
    fn disjoint_interests_never_pair() {
        let pool = pool_of(vec![
            entry("u1", &["music"], ChatPreference::Friendship, 0),
            entry("u4", &["cooking"], ChatPreference::Friendship, 1),
        ]);
        assert!(plan(&pool).is_empty());
    }

    #[test]
    fn oldest_searcher_picks_first() {
        // u3 is oldest; it grabs u1 (its best candidate) even though u1 and
        // u2 arrived earlier as a pair.
        let pool = pool_of(vec![
            entry("u3", &["music"], ChatPreference::Friendship, 0),
            entry("u1", &["music"], ChatPreference::Friendship, 5),
            entry("u2", &["music"], ChatPreference::Friendship, 9),
        ]);
        let planned = plan(&pool);
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].first, "u3");
        assert_eq!(planned[0].second, "u1");
    }

    #[test]
    fn more_shared_interests_win() {
        let pool = pool_of(vec![
            entry("a", &["music", "art", "film"], ChatPreference::Friendship, 0),
            entry("one", &["music"], ChatPreference::Friendship, 1),
            entry("two", &["music", "art"], ChatPreference::Friendship, 2),
        ]);
        let planned = plan(&pool);
        assert_eq!(planned[0].second, "two");
        assert_eq!(planned[0].shared_interests, 2);
    }

    #[test]
    fn equal_overlap_breaks_ties_by_age_then_id() {
        let pool = pool_of(vec![
            entry("a", &["music"], ChatPreference::Friendship, 0),
            entry("young", &["music"], ChatPreference::Friendship, 9),
            entry("old", &["music"], ChatPreference::Friendship, 3),
        ]);
        assert_eq!(plan(&pool)[0].second, "old");

        let pool = pool_of(vec![
            entry("a", &["music"], ChatPreference::Friendship, 0),
            entry("zed", &["music"], ChatPreference::Friendship, 4),
            entry("bee", &["music"], ChatPreference::Friendship, 4),
        ]);
        assert_eq!(plan(&pool)[0].second, "bee");
    }

    #[test]
    fn one_tick_pairs_many() {
        let pool = pool_of(vec![
            entry("u1", &["music"], ChatPreference::Friendship, 0),
            entry("u2", &["music"], ChatPreference::Friendship, 1),
            entry("u3", &["hiking"], ChatPreference::Friendship, 2),
            entry("u4", &["hiking"], ChatPreference::Friendship, 3),
            entry("u5", &["chess"], ChatPreference::Friendship, 4),
        ]);
        let planned = plan(&pool);
        assert_eq!(planned.len(), 2);
        let matched: HashSet<&str> = planned
            .iter()
            .flat_map(|p| [p.first.as_str(), p.second.as_str()])
            .collect();
        assert!(!matched.contains("u5"));
    }

    #[test]
    fn nobody_is_paired_twice_in_a_tick() {
        let pool = pool_of(vec![
            entry("u1", &["music"], ChatPreference::Friendship, 0),
            entry("u2", &["music"], ChatPreference::Friendship, 1),
            entry("u3", &["music"], ChatPreference::Friendship, 2),
        ]);
        let planned = plan(&pool);
        assert_eq!(planned.len(), 1);
        let mut seen = HashSet::new();
        for p in &planned {
            assert!(seen.insert(p.first.clone()));
            assert!(seen.insert(p.second.clone()));
        }
    }
}
