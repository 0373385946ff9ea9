use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

pub mod batch;
pub mod blocking;
pub mod candidate;
pub mod config_file;
pub mod identifiers;
pub mod pool;
pub mod rate_limit;
pub mod resolver;
pub mod scoring;
pub mod sources;
pub mod stats;

pub use batch::{BatchOptions, BatchReport, BatchSummary, batch_resolve, summarize};
pub use candidate::{Candidate, S2Author, S2ExternalIds, S2Paper, SourceDetail};
pub use rate_limit::RateLimitConfig;
pub use resolver::Orchestrator;
pub use scoring::{HIGH_CONFIDENCE, MEDIUM_CONFIDENCE, ScoringConfig, TITLE_MIN_SIMILARITY};
pub use sources::{CandidateSource, SemanticScholarLookup, SourceSet};
pub use stats::StatisticsSnapshot;

/// Failure reported by a source adapter.
///
/// The orchestrator never propagates these: a failed source is logged,
/// recorded in the result metadata, and treated as "no match".
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdapterError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("{}", rate_limited_message(.retry_after))]
    RateLimited { retry_after: Option<Duration> },
    #[error("malformed response: {0}")]
    Parse(String),
    #[error("{0}")]
    Other(String),
}

fn rate_limited_message(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!("rate limited (429), retry after {:.1}s", d.as_secs_f64()),
        None => "rate limited (429)".to_string(),
    }
}

impl From<String> for AdapterError {
    fn from(s: String) -> Self {
        AdapterError::Other(s)
    }
}

/// The bibliographic sources queried by the resolution waterfall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Source {
    Crossref,
    Arxiv,
    #[serde(rename = "OPENALEX")]
    OpenAlex,
    SemanticScholar,
}

impl Source {
    /// All sources, in waterfall order.
    pub const ALL: [Source; 4] = [
        Source::Crossref,
        Source::Arxiv,
        Source::OpenAlex,
        Source::SemanticScholar,
    ];

    /// Display name of the source.
    pub fn name(self) -> &'static str {
        match self {
            Source::Crossref => "CrossRef",
            Source::Arxiv => "arXiv",
            Source::OpenAlex => "OpenAlex",
            Source::SemanticScholar => "Semantic Scholar",
        }
    }

    /// Key of the per-source win counter in [`StatisticsSnapshot`].
    pub fn stats_key(self) -> &'static str {
        match self {
            Source::Crossref => "resolved_crossref",
            Source::Arxiv => "resolved_arxiv",
            Source::OpenAlex => "resolved_openalex",
            Source::SemanticScholar => "resolved_semantic_scholar",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A partially-known citation, as extracted upstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Citation {
    pub text: String,
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub year: Option<i32>,
    pub doi: Option<String>,
    pub arxiv_id: Option<String>,
    /// Secondary identifier; `arxiv:<id>` is understood as an arXiv id.
    pub backup_id: Option<String>,
}

impl Citation {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors = authors.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn with_doi(mut self, doi: impl Into<String>) -> Self {
        self.doi = Some(doi.into());
        self
    }

    pub fn with_arxiv_id(mut self, arxiv_id: impl Into<String>) -> Self {
        self.arxiv_id = Some(arxiv_id.into());
        self
    }

    pub fn with_backup_id(mut self, backup_id: impl Into<String>) -> Self {
        self.backup_id = Some(backup_id.into());
        self
    }

    /// The DOI, normalized, if the citation carries a non-empty one.
    pub fn effective_doi(&self) -> Option<String> {
        self.doi.as_deref().and_then(identifiers::normalize_doi)
    }

    /// The arXiv id from the explicit field, falling back to an
    /// `arxiv:`-prefixed backup id.
    pub fn effective_arxiv_id(&self) -> Option<String> {
        self.arxiv_id
            .as_deref()
            .and_then(identifiers::normalize_arxiv_id)
            .or_else(|| {
                self.backup_id
                    .as_deref()
                    .and_then(identifiers::arxiv_id_from_backup)
            })
    }

    /// The text compared against candidate titles: the title if known,
    /// otherwise the raw citation text.
    pub fn match_title(&self) -> &str {
        match self.title.as_deref() {
            Some(t) if !t.trim().is_empty() => t,
            _ => &self.text,
        }
    }
}

/// Terminal status of one resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionStatus {
    Resolved,
    Partial,
    Unresolved,
    Failed,
}

/// Coarse confidence bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
    None,
}

impl ConfidenceLevel {
    pub const ALL: [ConfidenceLevel; 4] = [
        ConfidenceLevel::High,
        ConfidenceLevel::Medium,
        ConfidenceLevel::Low,
        ConfidenceLevel::None,
    ];

    /// Bucket a confidence score. Anything below MEDIUM is LOW.
    pub fn from_score(score: f64) -> Self {
        if score >= HIGH_CONFIDENCE {
            ConfidenceLevel::High
        } else if score >= MEDIUM_CONFIDENCE {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }
}

/// Canonical bibliographic data of the winning match.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchedData {
    pub doi: Option<String>,
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub year: Option<i32>,
    pub venue: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
}

impl From<&Candidate> for MatchedData {
    fn from(c: &Candidate) -> Self {
        Self {
            doi: c.doi.clone(),
            title: c.title.clone(),
            authors: c.authors.clone(),
            year: c.year,
            venue: c.venue.clone(),
            abstract_text: c.abstract_text.clone(),
        }
    }
}

/// Bookkeeping attached to every [`ResolutionResult`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolutionMetadata {
    /// Sources queried, in query order, each at most once.
    pub api_sources_tried: Vec<Source>,
    pub processing_time_ms: u64,
    pub error_message: Option<String>,
    /// Always false: results are never served from a cache.
    pub cache_hit: bool,
}

/// Outcome of resolving one citation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolutionResult {
    pub citation_text: String,
    pub status: ResolutionStatus,
    pub confidence_score: f64,
    pub confidence_level: ConfidenceLevel,
    pub source: Option<Source>,
    pub matched_data: Option<MatchedData>,
    /// Every candidate considered, in attempt order.
    pub candidates: Vec<Candidate>,
    pub metadata: ResolutionMetadata,
}

impl ResolutionResult {
    /// The citation already carried a DOI: resolved without any source call.
    pub fn from_known_doi(citation_text: &str, doi: String) -> Self {
        Self {
            citation_text: citation_text.to_string(),
            status: ResolutionStatus::Resolved,
            confidence_score: 1.0,
            confidence_level: ConfidenceLevel::High,
            source: None,
            matched_data: Some(MatchedData {
                doi: Some(doi),
                ..Default::default()
            }),
            candidates: Vec::new(),
            metadata: ResolutionMetadata::default(),
        }
    }

    /// A candidate was accepted. RESOLVED at HIGH, PARTIAL below.
    pub fn matched(
        citation_text: &str,
        winner: &Candidate,
        candidates: Vec<Candidate>,
        metadata: ResolutionMetadata,
    ) -> Self {
        let score = winner.raw_score.clamp(0.0, 1.0);
        let status = if score >= HIGH_CONFIDENCE {
            ResolutionStatus::Resolved
        } else {
            ResolutionStatus::Partial
        };
        Self {
            citation_text: citation_text.to_string(),
            status,
            confidence_score: score,
            confidence_level: ConfidenceLevel::from_score(score),
            source: Some(winner.source()),
            matched_data: Some(MatchedData::from(winner)),
            candidates,
            metadata,
        }
    }

    pub fn unresolved(
        citation_text: &str,
        candidates: Vec<Candidate>,
        metadata: ResolutionMetadata,
    ) -> Self {
        Self {
            citation_text: citation_text.to_string(),
            status: ResolutionStatus::Unresolved,
            confidence_score: 0.0,
            confidence_level: ConfidenceLevel::Low,
            source: None,
            matched_data: None,
            candidates,
            metadata,
        }
    }

    /// Resolution of this item aborted (panic or cancellation inside a batch).
    pub fn failed(citation_text: &str, error: impl Into<String>) -> Self {
        Self {
            citation_text: citation_text.to_string(),
            status: ResolutionStatus::Failed,
            confidence_score: 0.0,
            confidence_level: ConfidenceLevel::None,
            source: None,
            matched_data: None,
            candidates: Vec::new(),
            metadata: ResolutionMetadata {
                error_message: Some(error.into()),
                ..Default::default()
            },
        }
    }
}

/// Configuration for the resolution chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Maximum in-flight resolutions during a parallel batch.
    pub max_concurrency: usize,
    /// Recursion guard on [`Orchestrator::resolve_at_depth`].
    pub max_depth: u32,
    /// Threads available to the synchronous Semantic Scholar adapter.
    pub blocking_threads: usize,
    /// Number of hits requested from Semantic Scholar title search.
    pub s2_search_limit: usize,
    /// Retries of an adapter call that reports a 429.
    pub max_rate_limit_retries: u32,
    pub rate_limit: RateLimitConfig,
    pub scoring: ScoringConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrency: 50,
            max_depth: 3,
            blocking_threads: 8,
            s2_search_limit: 5,
            max_rate_limit_retries: 3,
            rate_limit: RateLimitConfig::default(),
            scoring: ScoringConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arxiv_id_falls_back_to_backup_id() {
        let c = Citation::new("x").with_backup_id("arXiv:1706.03762");
        assert_eq!(c.effective_arxiv_id().as_deref(), Some("1706.03762"));

        let c = Citation::new("x")
            .with_arxiv_id("2101.00001")
            .with_backup_id("arxiv:1706.03762");
        assert_eq!(c.effective_arxiv_id().as_deref(), Some("2101.00001"));

        let c = Citation::new("x").with_backup_id("pmid:12345");
        assert!(c.effective_arxiv_id().is_none());
    }

    #[test]
    fn blank_doi_is_absent() {
        assert!(Citation::new("x").with_doi("   ").effective_doi().is_none());
    }

    #[test]
    fn match_title_prefers_title_over_text() {
        let c = Citation::new("raw text").with_title("A Title");
        assert_eq!(c.match_title(), "A Title");
        assert_eq!(Citation::new("raw text").match_title(), "raw text");
    }

    #[test]
    fn confidence_buckets() {
        assert_eq!(ConfidenceLevel::from_score(0.85), ConfidenceLevel::High);
        assert_eq!(ConfidenceLevel::from_score(0.7), ConfidenceLevel::Medium);
        assert_eq!(ConfidenceLevel::from_score(0.69), ConfidenceLevel::Low);
        assert_eq!(ConfidenceLevel::from_score(0.0), ConfidenceLevel::Low);
    }

    #[test]
    fn rate_limited_display() {
        let e = AdapterError::RateLimited {
            retry_after: Some(Duration::from_millis(1500)),
        };
        assert_eq!(e.to_string(), "rate limited (429), retry after 1.5s");
        let e = AdapterError::RateLimited { retry_after: None };
        assert_eq!(e.to_string(), "rate limited (429)");
    }
}
