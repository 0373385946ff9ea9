//! The resolution waterfall for a single citation.
//!
//! Sources are tried in a fixed order, each as a [`Resolver`] step:
//!
//! 1. A citation that already has a DOI resolves immediately, no calls.
//! 2. With an arXiv id, Semantic Scholar is asked by id first.
//! 3. Crossref, then 4. arXiv, then 5. OpenAlex.
//! 6. Semantic Scholar title search, unless step 2 ran.
//! 7. Nothing accepted: UNRESOLVED.
//!
//! A step whose best candidate reaches [`HIGH_CONFIDENCE`] ends the chain.
//! Otherwise the best candidate at or above [`MEDIUM_CONFIDENCE`] across all
//! steps becomes a PARTIAL result. Semantic Scholar is held to the same bar
//! as the others, so its matches are accepted on metadata alone, without a
//! DOI.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use futures_util::FutureExt;
use log::{debug, error, warn};
use tokio_util::sync::CancellationToken;

use crate::batch::{BatchOptions, BatchReport, batch_resolve};
use crate::blocking::BlockingPool;
use crate::rate_limit::{RateLimiters, call_with_retry};
use crate::scoring::{HIGH_CONFIDENCE, MEDIUM_CONFIDENCE, ScoringConfig, score_candidate};
use crate::sources::{AdapterFuture, CandidateSource, SemanticScholarLookup, SourceSet};
use crate::stats::{StatisticsSnapshot, StatsTracker};
use crate::{
    AdapterError, Candidate, Citation, Config, ResolutionMetadata, ResolutionResult, S2Paper,
    Source,
};

/// Everything one step's source returned, scored, with its best candidate.
struct StepHit {
    best: Candidate,
    candidates: Vec<Candidate>,
}

/// Score every candidate and pick the best (earliest on ties).
/// `None` if the source returned nothing. A non-finite score is stored as 0.0
/// so it can never outrank a real one.
fn score_hits(
    citation: &Citation,
    mut candidates: Vec<Candidate>,
    scoring: &ScoringConfig,
) -> Option<StepHit> {
    let mut best: Option<(usize, f64)> = None;
    for (i, candidate) in candidates.iter_mut().enumerate() {
        score_candidate(citation, candidate, scoring).apply(candidate);
        if !candidate.raw_score.is_finite() {
            candidate.raw_score = 0.0;
        }
        if best.is_none_or(|(_, score)| candidate.raw_score > score) {
            best = Some((i, candidate.raw_score));
        }
    }
    let (index, _) = best?;
    Some(StepHit {
        best: candidates[index].clone(),
        candidates,
    })
}

/// One waterfall step: a source queried in a particular way.
///
/// `Ok(None)` is "no match" and `Err` a failed source; both let the
/// waterfall continue.
trait Resolver: Send + Sync {
    fn source(&self) -> Source;

    fn attempt<'a>(&'a self, citation: &'a Citation) -> AdapterFuture<'a, Option<StepHit>>;
}

/// Steps backed by an asynchronous [`CandidateSource`].
struct AdapterStep<'o> {
    source: Source,
    adapter: &'o dyn CandidateSource,
    scoring: &'o ScoringConfig,
}

impl Resolver for AdapterStep<'_> {
    fn source(&self) -> Source {
        self.source
    }

    fn attempt<'a>(&'a self, citation: &'a Citation) -> AdapterFuture<'a, Option<StepHit>> {
        Box::pin(async move {
            let candidates = self.adapter.resolve(citation).await?;
            Ok(score_hits(citation, candidates, self.scoring))
        })
    }
}

enum S2Query {
    ArxivId(String),
    Search { query: String, limit: usize },
}

/// Steps backed by the synchronous Semantic Scholar client, run on the
/// blocking pool.
struct SemanticScholarStep<'o> {
    lookup: &'o Arc<dyn SemanticScholarLookup>,
    pool: &'o BlockingPool,
    scoring: &'o ScoringConfig,
    query: S2Query,
}

impl Resolver for SemanticScholarStep<'_> {
    fn source(&self) -> Source {
        Source::SemanticScholar
    }

    fn attempt<'a>(&'a self, citation: &'a Citation) -> AdapterFuture<'a, Option<StepHit>> {
        Box::pin(async move {
            let lookup = Arc::clone(self.lookup);
            let papers: Vec<S2Paper> = match &self.query {
                S2Query::ArxivId(id) => {
                    let id = id.clone();
                    self.pool
                        .run(move || lookup.by_arxiv_id(&id))
                        .await??
                        .into_iter()
                        .collect()
                }
                S2Query::Search { query, limit } => {
                    let (query, limit) = (query.clone(), *limit);
                    self.pool.run(move || lookup.search(&query, limit)).await??
                }
            };
            let candidates = papers.into_iter().map(Candidate::from).collect();
            Ok(score_hits(citation, candidates, self.scoring))
        })
    }
}

/// First few words of a citation, for log lines.
fn preview(text: &str) -> String {
    const MAX_CHARS: usize = 60;
    let mut out: String = text.chars().take(MAX_CHARS).collect();
    if text.chars().count() > MAX_CHARS {
        out.push_str("...");
    }
    out
}

/// Resolves citations against the four sources.
///
/// One instance is meant to be shared (behind an [`Arc`]) by every
/// concurrent resolution; its statistics are safe under concurrency.
pub struct Orchestrator {
    sources: SourceSet,
    config: Config,
    blocking: BlockingPool,
    limiters: RateLimiters,
    stats: StatsTracker,
    closed: AtomicBool,
}

impl Orchestrator {
    pub fn new(sources: SourceSet, config: Config) -> Self {
        Self {
            blocking: BlockingPool::new(config.blocking_threads),
            limiters: RateLimiters::new(&config.rate_limit),
            stats: StatsTracker::default(),
            closed: AtomicBool::new(false),
            sources,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Resolve one citation. Never fails and never panics: adapter errors
    /// are absorbed into the result, and a panic anywhere in the chain comes
    /// back as a FAILED result carrying the panic message.
    ///
    /// A source that reports a 429 is retried up to
    /// `config.max_rate_limit_retries` times before it counts as "no match",
    /// waiting for its Retry-After (or an exponential backoff, at most 30 s)
    /// before each retry. One rate-limited source can therefore be called
    /// several times and add that much latency to a single resolution.
    pub async fn resolve(&self, citation: &Citation) -> ResolutionResult {
        self.resolve_at_depth(citation, 0).await
    }

    /// [`resolve`](Self::resolve) with an explicit recursion depth. Past
    /// `config.max_depth` the citation comes back UNRESOLVED without any
    /// source being queried.
    pub async fn resolve_at_depth(&self, citation: &Citation, depth: u32) -> ResolutionResult {
        let started = Instant::now();
        let mut result = match AssertUnwindSafe(self.run_waterfall(citation, depth))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("{}: resolution panicked: {}", preview(&citation.text), message);
                ResolutionResult::failed(&citation.text, message)
            }
        };
        result.metadata.processing_time_ms = started.elapsed().as_millis() as u64;
        self.stats.record(&result);
        result
    }

    /// Resolve many citations; see [`batch_resolve`].
    pub async fn batch_resolve(
        self: &Arc<Self>,
        citations: Vec<Citation>,
        options: BatchOptions,
        cancel: CancellationToken,
    ) -> BatchReport {
        batch_resolve(Arc::clone(self), citations, options, cancel).await
    }

    /// A copy of the running counters.
    pub fn get_statistics(&self) -> StatisticsSnapshot {
        self.stats.snapshot()
    }

    /// Close every adapter once. Later calls do nothing.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for adapter in [
            &self.sources.crossref,
            &self.sources.arxiv,
            &self.sources.openalex,
        ] {
            if AssertUnwindSafe(adapter.close()).catch_unwind().await.is_err() {
                warn!("{}: close panicked", adapter.name());
            }
        }
        let s2 = Arc::clone(&self.sources.semantic_scholar);
        let closed = self
            .blocking
            .run(move || std::panic::catch_unwind(AssertUnwindSafe(|| s2.close())).is_ok())
            .await;
        if !matches!(closed, Ok(true)) {
            warn!("{}: close failed", Source::SemanticScholar);
        }
    }

    fn s2_step(&self, query: S2Query) -> SemanticScholarStep<'_> {
        SemanticScholarStep {
            lookup: &self.sources.semantic_scholar,
            pool: &self.blocking,
            scoring: &self.config.scoring,
            query,
        }
    }

    fn adapter_step<'o>(
        &'o self,
        source: Source,
        adapter: &'o Arc<dyn CandidateSource>,
    ) -> AdapterStep<'o> {
        AdapterStep {
            source,
            adapter: adapter.as_ref(),
            scoring: &self.config.scoring,
        }
    }

    /// The ordered steps for this citation.
    fn plan(&self, citation: &Citation) -> Vec<Box<dyn Resolver + '_>> {
        let mut steps: Vec<Box<dyn Resolver + '_>> = Vec::with_capacity(4);
        let arxiv_id = citation.effective_arxiv_id();
        let s2_by_id = arxiv_id.is_some();

        if let Some(id) = arxiv_id {
            steps.push(Box::new(self.s2_step(S2Query::ArxivId(id))));
        }
        steps.push(Box::new(
            self.adapter_step(Source::Crossref, &self.sources.crossref),
        ));
        steps.push(Box::new(self.adapter_step(Source::Arxiv, &self.sources.arxiv)));
        steps.push(Box::new(
            self.adapter_step(Source::OpenAlex, &self.sources.openalex),
        ));
        if !s2_by_id {
            steps.push(Box::new(self.s2_step(S2Query::Search {
                query: citation.match_title().to_string(),
                limit: self.config.s2_search_limit,
            })));
        }
        steps
    }

    async fn run_waterfall(&self, citation: &Citation, depth: u32) -> ResolutionResult {
        if depth > self.config.max_depth {
            let message = format!(
                "recursion depth {} exceeds limit {}",
                depth, self.config.max_depth
            );
            warn!("{}: {}", preview(&citation.text), message);
            let metadata = ResolutionMetadata {
                error_message: Some(message),
                ..Default::default()
            };
            return ResolutionResult::unresolved(&citation.text, Vec::new(), metadata);
        }

        if let Some(doi) = citation.effective_doi() {
            debug!("{}: already has DOI {}", preview(&citation.text), doi);
            return ResolutionResult::from_known_doi(&citation.text, doi);
        }

        let mut metadata = ResolutionMetadata::default();
        let mut candidates: Vec<Candidate> = Vec::new();
        let mut errors: Vec<String> = Vec::new();
        let mut accepted: Option<Candidate> = None;

        for step in self.plan(citation) {
            let source = step.source();
            metadata.api_sources_tried.push(source);

            let outcome: Result<Option<StepHit>, AdapterError> = call_with_retry(
                source,
                &self.limiters,
                self.config.max_rate_limit_retries,
                || step.attempt(citation),
            )
            .await;

            match outcome {
                Ok(Some(StepHit { best, candidates: hits })) => {
                    debug!(
                        "{}: {} candidate(s) from {}, best {:.3}",
                        preview(&citation.text),
                        hits.len(),
                        source,
                        best.raw_score
                    );
                    candidates.extend(hits);

                    if best.raw_score >= HIGH_CONFIDENCE {
                        metadata.error_message = join_errors(&errors);
                        return ResolutionResult::matched(
                            &citation.text,
                            &best,
                            candidates,
                            metadata,
                        );
                    }
                    if best.raw_score >= MEDIUM_CONFIDENCE
                        && accepted
                            .as_ref()
                            .is_none_or(|a| best.raw_score > a.raw_score)
                    {
                        accepted = Some(best);
                    }
                }
                Ok(None) => debug!("{}: no match from {}", preview(&citation.text), source),
                Err(e) => {
                    warn!("{}: {} failed: {}", preview(&citation.text), source, e);
                    errors.push(format!("{}: {}", source, e));
                }
            }
        }

        metadata.error_message = join_errors(&errors);
        match accepted {
            Some(winner) => {
                ResolutionResult::matched(&citation.text, &winner, candidates, metadata)
            }
            None => ResolutionResult::unresolved(&citation.text, candidates, metadata),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "resolution panicked".to_string()
    }
}

fn join_errors(errors: &[String]) -> Option<String> {
    (!errors.is_empty()).then(|| errors.join("; "))
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("sources", &self.sources)
            .field("config", &self.config)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
