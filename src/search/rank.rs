use std::cell::Cell;

use serde::{Deserialize, Serialize};

use super::TokenList;

/// Scores a candidate's tokens against a query.
pub trait Ranker {
    /// `None` means the candidate does not match at all.
    fn distance(&self, candidate: &TokenList, query: &TokenList) -> Option<u32>;

    /// Final sort key for one result of a batch. `max_usage` is the highest
    /// usage count among the batch's candidates.
    fn rank(&self, distance: u32, usage: u32, max_usage: u32) -> u32;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct SearchSettings {
    pub add_penalty: u32,
    pub drop_penalty: u32,
    pub end_drop_penalty: u32,
    pub swap_penalty: u32,
    /// Per query token.
    pub max_distance: u32,
    /// Percent added to every distance reported by indicator collectors.
    pub indicator_penalty: u32,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            add_penalty: 10,
            drop_penalty: 10,
            end_drop_penalty: 1,
            swap_penalty: 15,
            max_distance: 30,
            indicator_penalty: 50,
        }
    }
}

/// Weighted edit distance between query tokens and candidate tokens.
///
/// Each query token is matched against its closest candidate token; dropping
/// the tail of a candidate token is cheap so prefixes score well.
#[derive(Debug, Default)]
pub struct TokenDistance {
    settings: Cell<SearchSettings>,
}

impl TokenDistance {
    pub fn new(settings: SearchSettings) -> Self { Self { settings: Cell::new(settings) } }

    pub fn settings(&self) -> SearchSettings { self.settings.get() }

    pub fn set_settings(&self, settings: SearchSettings) { self.settings.set(settings); }

    fn token_distance(&self, query: &[char], candidate: &[char]) -> u32 {
        let s = self.settings.get();
        let (n, m) = (query.len(), candidate.len());
        let width = m + 1;
        let mut dp = vec![0u32; (n + 1) * width];
        let at = |i: usize, j: usize| i * width + j;

        for j in 0..=m {
            dp[at(0, j)] = j as u32 * s.drop_penalty;
        }
        for i in 1..=n {
            dp[at(i, 0)] = i as u32 * s.add_penalty;
            for j in 1..=m {
                let mut best = if query[i - 1] == candidate[j - 1] {
                    dp[at(i - 1, j - 1)]
                } else {
                    dp[at(i - 1, j - 1)] + s.add_penalty + s.drop_penalty
                };
                best = best.min(dp[at(i - 1, j)] + s.add_penalty);
                best = best.min(dp[at(i, j - 1)] + s.drop_penalty);
                if i > 1
                    && j > 1
                    && query[i - 1] == candidate[j - 2]
                    && query[i - 2] == candidate[j - 1]
                {
                    best = best.min(dp[at(i - 2, j - 2)] + s.swap_penalty);
                }
                dp[at(i, j)] = best;
            }
        }

        (0..=m)
            .map(|j| dp[at(n, j)] + (m - j) as u32 * s.end_drop_penalty)
            .min()
            .unwrap_or(0)
    }
}

impl Ranker for TokenDistance {
    fn distance(&self, candidate: &TokenList, query: &TokenList) -> Option<u32> {
        if query.is_empty() {
            return Some(0);
        }
        let max = self.settings.get().max_distance;
        let candidate: Vec<Vec<char>> = candidate.iter().map(|t| t.chars().collect()).collect();

        let mut total = 0;
        for token in query.iter() {
            let token: Vec<char> = token.chars().collect();
            let best = candidate.iter().map(|c| self.token_distance(&token, c)).min()?;
            if best > max {
                return None;
            }
            total += best;
        }
        Some(total)
    }

    fn rank(&self, distance: u32, usage: u32, max_usage: u32) -> u32 {
        if max_usage == 0 {
            return distance;
        }
        let unused = max_usage.saturating_sub(usage) as u64;
        let scale = self.settings.get().add_penalty as u64;
        distance + (scale * unused / max_usage as u64) as u32
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn ranker() -> TokenDistance { TokenDistance::new(SearchSettings::default()) }

    fn distance(candidate: &str, query: &str) -> Option<u32> {
        ranker().distance(&TokenList::parse(candidate), &TokenList::parse(query))
    }

    #[test]
    fn exact_token_is_free() {
        assert_eq!(distance("File New", "new"), Some(0));
    }

    #[test]
    fn prefix_costs_end_drops() {
        assert_eq!(distance("Preferences", "pref"), Some(7));
    }

    #[test]
    fn unrelated_query_does_not_match() {
        assert_eq!(distance("File New", "xyz"), None);
    }

    #[test]
    fn swap_is_cheaper_than_two_edits() {
        let swapped = distance("Save", "asve").unwrap();
        assert_eq!(swapped, 15);
    }

    #[test]
    fn empty_query_matches_everything() {
        assert_eq!(distance("Anything", ""), Some(0));
    }

    #[test]
    fn every_query_token_must_match() {
        assert!(distance("File Open", "open").is_some());
        assert_eq!(distance("File Open", "open zzzzzz"), None);
    }

    #[test]
    fn usage_ranks_frequent_items_first() {
        let r = ranker();
        assert!(r.rank(0, 5, 5) < r.rank(0, 1, 5));
        assert_eq!(r.rank(12, 0, 0), 12);
        assert_eq!(r.rank(12, 5, 5), 12);
    }

    #[test]
    fn settings_can_be_swapped() {
        let r = ranker();
        r.set_settings(SearchSettings { max_distance: 0, ..SearchSettings::default() });
        assert_eq!(r.distance(&TokenList::parse("Save"), &TokenList::parse("sav")), None);
    }
}
