//! Process-lifetime resolution counters.

use std::collections::BTreeMap;

use dashmap::DashMap;
use serde::Serialize;

use crate::{ConfidenceLevel, ResolutionResult, ResolutionStatus, Source};

const TOTAL_PROCESSED: &str = "total_processed";
const ALREADY_HAS_DOI: &str = "already_has_doi";
const UNRESOLVED: &str = "unresolved";
const HIGH_CONFIDENCE: &str = "high_confidence";
const MEDIUM_CONFIDENCE: &str = "medium_confidence";
const LOW_CONFIDENCE: &str = "low_confidence";

/// Thread-safe counters shared by every concurrent `resolve()`.
///
/// Each counter is updated atomically through its [`DashMap`] shard lock, so
/// concurrent resolutions never lose increments.
#[derive(Debug)]
pub struct StatsTracker {
    counters: DashMap<&'static str, u64>,
}

impl Default for StatsTracker {
    fn default() -> Self {
        let counters = DashMap::new();
        for key in [
            TOTAL_PROCESSED,
            ALREADY_HAS_DOI,
            UNRESOLVED,
            HIGH_CONFIDENCE,
            MEDIUM_CONFIDENCE,
            LOW_CONFIDENCE,
        ] {
            counters.insert(key, 0);
        }
        for source in Source::ALL {
            counters.insert(source.stats_key(), 0);
        }
        Self { counters }
    }
}

impl StatsTracker {
    fn bump(&self, key: &'static str) {
        *self.counters.entry(key).or_insert(0) += 1;
    }

    /// Count one terminal outcome of `resolve()`.
    pub fn record(&self, result: &ResolutionResult) {
        self.bump(TOTAL_PROCESSED);

        match result.status {
            ResolutionStatus::Resolved | ResolutionStatus::Partial => match result.source {
                Some(source) => self.bump(source.stats_key()),
                None => self.bump(ALREADY_HAS_DOI),
            },
            ResolutionStatus::Unresolved => self.bump(UNRESOLVED),
            // Aborted resolutions count towards the total only.
            ResolutionStatus::Failed => {}
        }

        match result.confidence_level {
            ConfidenceLevel::High => self.bump(HIGH_CONFIDENCE),
            ConfidenceLevel::Medium => self.bump(MEDIUM_CONFIDENCE),
            ConfidenceLevel::Low => self.bump(LOW_CONFIDENCE),
            ConfidenceLevel::None => {}
        }
    }

    /// An owned copy of the current counters.
    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot(
            self.counters
                .iter()
                .map(|entry| (entry.key().to_string(), *entry.value()))
                .collect(),
        )
    }
}

/// Point-in-time copy of the orchestrator's counters.
///
/// Mutating a snapshot never affects the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatisticsSnapshot(pub BTreeMap<String, u64>);

impl StatisticsSnapshot {
    /// Counter value, 0 for unknown keys.
    pub fn get(&self, key: &str) -> u64 {
        self.0.get(key).copied().unwrap_or(0)
    }

    pub fn total_processed(&self) -> u64 {
        self.get(TOTAL_PROCESSED)
    }

    pub fn resolved_by(&self, source: Source) -> u64 {
        self.get(source.stats_key())
    }

    pub fn into_inner(self) -> BTreeMap<String, u64> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Candidate, ResolutionMetadata};

    #[test]
    fn snapshot_is_seeded_with_every_key() {
        let snap = StatsTracker::default().snapshot();
        assert_eq!(snap.0.len(), 10);
        assert!(snap.0.values().all(|v| *v == 0));
        assert!(snap.0.contains_key("resolved_semantic_scholar"));
    }

    #[test]
    fn record_counts_one_outcome() {
        let stats = StatsTracker::default();
        stats.record(&ResolutionResult::from_known_doi("c", "10.1/x".into()));

        let mut winner = Candidate::crossref(90.0).with_title("T");
        winner.raw_score = 0.75;
        stats.record(&ResolutionResult::matched(
            "c",
            &winner,
            vec![winner.clone()],
            ResolutionMetadata::default(),
        ));
        stats.record(&ResolutionResult::unresolved("c", vec![], ResolutionMetadata::default()));

        let snap = stats.snapshot();
        assert_eq!(snap.total_processed(), 3);
        assert_eq!(snap.get("already_has_doi"), 1);
        assert_eq!(snap.resolved_by(Source::Crossref), 1);
        assert_eq!(snap.get("unresolved"), 1);
        assert_eq!(snap.get("high_confidence"), 1);
        assert_eq!(snap.get("medium_confidence"), 1);
        assert_eq!(snap.get("low_confidence"), 1);
    }

    #[test]
    fn failed_outcome_counts_only_as_processed() {
        let stats = StatsTracker::default();
        stats.record(&ResolutionResult::failed("c", "boom"));

        let counters = stats.snapshot().into_inner();
        assert_eq!(counters["total_processed"], 1);
        let others: u64 = counters
            .iter()
            .filter(|(k, _)| k.as_str() != "total_processed")
            .map(|(_, v)| *v)
            .sum();
        assert_eq!(others, 0);
    }

    #[test]
    fn snapshot_is_a_copy() {
        let stats = StatsTracker::default();
        let mut snap = stats.snapshot();
        snap.0.insert("total_processed".into(), 999);
        snap.0.clear();
        assert_eq!(stats.snapshot().total_processed(), 0);
    }

    #[test]
    fn concurrent_records_are_not_lost() {
        let stats = std::sync::Arc::new(StatsTracker::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        stats.record(&ResolutionResult::unresolved(
                            "c",
                            vec![],
                            ResolutionMetadata::default(),
                        ));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let snap = stats.snapshot();
        assert_eq!(snap.total_processed(), 4000);
        assert_eq!(snap.get("unresolved"), 4000);
    }
}
