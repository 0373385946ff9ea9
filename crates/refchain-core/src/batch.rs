//! Batch resolution over many citations, with per-item fault isolation and
//! an aggregate summary.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::info;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::pool::{ResolutionPool, ResolveJob};
use crate::resolver::Orchestrator;
use crate::{Citation, ConfidenceLevel, ResolutionResult, ResolutionStatus, Source};

const CANCELLED: &str = "cancelled";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Resolve up to `Config::max_concurrency` citations at once. When false,
    /// citations are resolved one after another.
    pub parallel: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self { parallel: true }
    }
}

/// Results in input order, plus their summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub results: Vec<ResolutionResult>,
    pub summary: BatchSummary,
}

/// Aggregate statistics over one batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub resolved: usize,
    pub partial: usize,
    pub unresolved: usize,
    pub failed: usize,
    pub resolved_pct: f64,
    pub partial_pct: f64,
    pub unresolved_pct: f64,
    pub failed_pct: f64,
    /// Results per confidence level; every level is present.
    pub confidence_levels: BTreeMap<ConfidenceLevel, usize>,
    /// Accepted matches per source; every source is present.
    pub source_wins: BTreeMap<Source, usize>,
    /// Citations that already carried a DOI.
    pub already_had_doi: usize,
    pub avg_processing_ms: f64,
}

/// Resolve every citation, returning exactly one result per input, in input
/// order.
///
/// A panic while resolving one citation marks only that citation FAILED.
/// Cancelling `cancel` drops in-flight adapter calls; every citation not yet
/// finished comes back FAILED with the message "cancelled".
pub async fn batch_resolve(
    orchestrator: Arc<Orchestrator>,
    citations: Vec<Citation>,
    options: BatchOptions,
    cancel: CancellationToken,
) -> BatchReport {
    info!(
        "resolving {} citation(s), {}",
        citations.len(),
        if options.parallel { "parallel" } else { "sequential" }
    );

    let results = if options.parallel {
        resolve_parallel(orchestrator, citations, cancel).await
    } else {
        resolve_sequential(&orchestrator, citations, &cancel).await
    };

    let summary = summarize(&results);
    log_summary(&summary);
    BatchReport { results, summary }
}

async fn resolve_parallel(
    orchestrator: Arc<Orchestrator>,
    citations: Vec<Citation>,
    cancel: CancellationToken,
) -> Vec<ResolutionResult> {
    let workers = orchestrator
        .config()
        .max_concurrency
        .min(citations.len())
        .max(1);
    let pool = ResolutionPool::new(orchestrator, cancel, workers);

    let mut pending = Vec::with_capacity(citations.len());
    for citation in citations {
        let (result_tx, result_rx) = oneshot::channel();
        let text = citation.text.clone();
        pool.submit(ResolveJob {
            citation,
            result_tx,
        })
        .await;
        pending.push((text, result_rx));
    }

    let mut results = Vec::with_capacity(pending.len());
    for (text, rx) in pending {
        // A dropped sender means the worker gave up on the job.
        results.push(
            rx.await
                .unwrap_or_else(|_| ResolutionResult::failed(&text, CANCELLED)),
        );
    }

    pool.shutdown().await;
    results
}

async fn resolve_sequential(
    orchestrator: &Orchestrator,
    citations: Vec<Citation>,
    cancel: &CancellationToken,
) -> Vec<ResolutionResult> {
    let mut results = Vec::with_capacity(citations.len());
    for citation in &citations {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => ResolutionResult::failed(&citation.text, CANCELLED),
            result = orchestrator.resolve(citation) => result,
        };
        results.push(result);
    }
    results
}

fn percent(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 * 100.0 / total as f64
    }
}

/// Aggregate a batch's results. Pure: the same results always give the same
/// summary.
pub fn summarize(results: &[ResolutionResult]) -> BatchSummary {
    let total = results.len();
    let count = |status: ResolutionStatus| {
        results.iter().filter(|r| r.status == status).count()
    };
    let resolved = count(ResolutionStatus::Resolved);
    let partial = count(ResolutionStatus::Partial);
    let unresolved = count(ResolutionStatus::Unresolved);
    let failed = count(ResolutionStatus::Failed);

    let mut confidence_levels: BTreeMap<ConfidenceLevel, usize> =
        ConfidenceLevel::ALL.iter().map(|l| (*l, 0)).collect();
    let mut source_wins: BTreeMap<Source, usize> =
        Source::ALL.iter().map(|s| (*s, 0)).collect();
    let mut already_had_doi = 0;
    let mut total_ms: u64 = 0;

    for r in results {
        *confidence_levels.entry(r.confidence_level).or_insert(0) += 1;
        total_ms += r.metadata.processing_time_ms;
        if matches!(r.status, ResolutionStatus::Resolved | ResolutionStatus::Partial) {
            match r.source {
                Some(source) => *source_wins.entry(source).or_insert(0) += 1,
                None => already_had_doi += 1,
            }
        }
    }

    BatchSummary {
        total,
        resolved,
        partial,
        unresolved,
        failed,
        resolved_pct: percent(resolved, total),
        partial_pct: percent(partial, total),
        unresolved_pct: percent(unresolved, total),
        failed_pct: percent(failed, total),
        confidence_levels,
        source_wins,
        already_had_doi,
        avg_processing_ms: if total == 0 {
            0.0
        } else {
            total_ms as f64 / total as f64
        },
    }
}

/// Emit a summary at info level.
pub fn log_summary(summary: &BatchSummary) {
    info!(
        "batch done: {} total, {} resolved ({:.1}%), {} partial ({:.1}%)",
        summary.total,
        summary.resolved,
        summary.resolved_pct,
        summary.partial,
        summary.partial_pct,
    );
    info!(
        "  {} unresolved ({:.1}%), {} failed ({:.1}%)",
        summary.unresolved, summary.unresolved_pct, summary.failed, summary.failed_pct,
    );
    for (level, n) in &summary.confidence_levels {
        info!("  confidence {:?}: {}", level, n);
    }
    for (source, n) in &summary.source_wins {
        info!("  won by {}: {}", source, n);
    }
    info!(
        "  already had DOI: {}, avg {:.1}ms per citation",
        summary.already_had_doi, summary.avg_processing_ms
    );
}
