use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredId {
    pub id: i64,
    pub score: f64,
}

/// Sparse asset id -> relevance score produced by one finder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoredIdMap {
    scores: HashMap<i64, f64>,
}

impl ScoredIdMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last write wins.
    pub fn set(&mut self, id: i64, score: f64) {
        self.scores.insert(id, score);
    }

    /// Accumulates onto any existing score.
    pub fn add(&mut self, id: i64, score: f64) {
        *self.scores.entry(id).or_insert(0.0) += score;
    }

    pub fn get(&self, id: i64) -> Option<f64> {
        self.scores.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Drops every id that `other` does not contain. Scores are kept as is.
    pub fn retain_common(&mut self, other: &ScoredIdMap) {
        self.scores.retain(|id, _| other.scores.contains_key(id));
    }

    /// Highest score first; equal scores in ascending id order.
    pub fn ranked(&self) -> Vec<ScoredId> {
        let mut items: Vec<ScoredId> = self
            .scores
            .iter()
            .map(|(&id, &score)| ScoredId { id, score })
            .collect();
        items.sort_unstable_by(|a, b| match b.score.total_cmp(&a.score) {
            Ordering::Equal => a.id.cmp(&b.id),
            other => other,
        });
        items
    }
}

impl FromIterator<(i64, f64)> for ScoredIdMap {
    fn from_iter<I: IntoIterator<Item = (i64, f64)>>(iter: I) -> Self {
        Self {
            scores: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(items: &[ScoredId]) -> Vec<i64> {
        items.iter().map(|s| s.id).collect()
    }

    #[test]
    fn test_set_and_add() {
        let mut map = ScoredIdMap::new();
        map.add(1, 0.5);
        map.add(1, 0.25);
        map.set(2, 3.0);
        map.set(2, 1.0);
        assert_eq!(map.get(1), Some(0.75));
        assert_eq!(map.get(2), Some(1.0));
        assert_eq!(map.get(3), None);
    }

    #[test]
    fn test_ranked_order() {
        let map: ScoredIdMap = [(5, 1.0), (3, 2.0), (9, 1.0), (1, 1.0), (7, 0.1)]
            .into_iter()
            .collect();
        let first = map.ranked();
        assert_eq!(ids(&first), vec![3, 1, 5, 9, 7]);
        // repeated calls agree despite hash map iteration order
        assert_eq!(first, map.clone().ranked());
    }

    #[test]
    fn test_retain_common() {
        let mut a: ScoredIdMap = [(1, 1.0), (2, 2.0), (3, 3.0)].into_iter().collect();
        let b: ScoredIdMap = [(2, 9.0), (3, 9.0), (4, 9.0)].into_iter().collect();
        a.retain_common(&b);
        assert_eq!(ids(&a.ranked()), vec![3, 2]);
        assert_eq!(a.get(3), Some(3.0));

        a.retain_common(&ScoredIdMap::new());
        assert!(a.is_empty());
    }
}
