//! Contracts the four bibliographic source adapters must fulfil.
//!
//! Adapters are shared by every concurrent resolution of an
//! [`Orchestrator`](crate::Orchestrator) and must be safe for concurrent use.
//! They own their transport, timeouts, and quotas; the orchestrator only
//! sequences and scores their calls.

#[cfg(test)]
pub(crate) mod mock;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::{AdapterError, Candidate, Citation, S2Paper};

/// Boxed future returned by asynchronous adapters.
pub type AdapterFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, AdapterError>> + Send + 'a>>;

/// An asynchronous source that resolves a citation to ranked candidates
/// (Crossref, arXiv, OpenAlex).
pub trait CandidateSource: Send + Sync {
    /// The canonical name of this source, for logs.
    fn name(&self) -> &str;

    /// Candidates for the citation, best first. An empty list means no match.
    fn resolve<'a>(&'a self, citation: &'a Citation) -> AdapterFuture<'a, Vec<Candidate>>;

    /// Release any held resources. Must tolerate repeated calls.
    fn close<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async {})
    }
}

/// The synchronous Semantic Scholar client.
///
/// Calls block the current thread, so the orchestrator always runs them on
/// its [`BlockingPool`](crate::blocking::BlockingPool).
pub trait SemanticScholarLookup: Send + Sync {
    fn by_arxiv_id(&self, arxiv_id: &str) -> Result<Option<S2Paper>, AdapterError>;

    fn by_doi(&self, doi: &str) -> Result<Option<S2Paper>, AdapterError>;

    fn search(&self, query: &str, limit: usize) -> Result<Vec<S2Paper>, AdapterError>;

    /// Release any held resources. Must tolerate repeated calls.
    fn close(&self) {}
}

/// The four adapters queried by the waterfall.
#[derive(Clone)]
pub struct SourceSet {
    pub crossref: Arc<dyn CandidateSource>,
    pub arxiv: Arc<dyn CandidateSource>,
    pub openalex: Arc<dyn CandidateSource>,
    pub semantic_scholar: Arc<dyn SemanticScholarLookup>,
}

impl SourceSet {
    pub fn new(
        crossref: Arc<dyn CandidateSource>,
        arxiv: Arc<dyn CandidateSource>,
        openalex: Arc<dyn CandidateSource>,
        semantic_scholar: Arc<dyn SemanticScholarLookup>,
    ) -> Self {
        Self {
            crossref,
            arxiv,
            openalex,
            semantic_scholar,
        }
    }
}

impl std::fmt::Debug for SourceSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceSet")
            .field("crossref", &self.crossref.name())
            .field("arxiv", &self.arxiv.name())
            .field("openalex", &self.openalex.name())
            .finish_non_exhaustive()
    }
}
