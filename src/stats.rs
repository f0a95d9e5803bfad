//! Running statistics derived from the ledger

use serde::{Deserialize, Serialize};

use crate::ledger::LedgerSnapshot;
use crate::models::Category;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisStats {
    /// Messages carrying a category (productive + unproductive)
    pub total: usize,
    pub productive: usize,
    pub unproductive: usize,
    /// Messages in Analyzed or Replied
    pub processed: usize,
}

/// Recomputes [`AnalysisStats`] from a snapshot, caching the last result by
/// ledger revision. Counts are never adjusted incrementally.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    cached: Option<(u64, AnalysisStats)>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compute(snapshot: &LedgerSnapshot) -> AnalysisStats {
        let mut stats = AnalysisStats::default();

        for message in snapshot.iter() {
            match message.category {
                Some(Category::Productive) => stats.productive += 1,
                Some(Category::Unproductive) => stats.unproductive += 1,
                None => {}
            }
            if message.state.is_processed() {
                stats.processed += 1;
            }
        }

        stats.total = stats.productive + stats.unproductive;
        stats
    }

    /// Stats for `snapshot`, reusing the cache when the revision matches
    pub fn current(&mut self, snapshot: &LedgerSnapshot) -> AnalysisStats {
        if let Some((revision, stats)) = self.cached {
            if revision == snapshot.revision() {
                return stats;
            }
        }

        let stats = Self::compute(snapshot);
        self.cached = Some((snapshot.revision(), stats));
        stats
    }

    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    pub fn is_cached(&self) -> bool {
        self.cached.is_some()
    }
}
