//! Call-counting mock adapters for tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{AdapterFuture, CandidateSource, SemanticScholarLookup, SourceSet};
use crate::{AdapterError, Candidate, Citation, S2Paper};

type ResolveFn = dyn Fn(&Citation) -> Result<Vec<Candidate>, AdapterError> + Send + Sync;
type LookupFn = dyn Fn(&str) -> Result<Option<S2Paper>, AdapterError> + Send + Sync;
type SearchFn = dyn Fn(&str) -> Result<Vec<S2Paper>, AdapterError> + Send + Sync;

pub(crate) struct MockSource {
    name: &'static str,
    respond: Box<ResolveFn>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    closes: AtomicUsize,
}

impl MockSource {
    pub fn with<F>(name: &'static str, respond: F) -> Self
    where
        F: Fn(&Citation) -> Result<Vec<Candidate>, AdapterError> + Send + Sync + 'static,
    {
        Self {
            name,
            respond: Box::new(respond),
            delay: None,
            calls: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    pub fn empty(name: &'static str) -> Self {
        Self::with(name, |_| Ok(vec![]))
    }

    pub fn returning(name: &'static str, candidates: Vec<Candidate>) -> Self {
        Self::with(name, move |_| Ok(candidates.clone()))
    }

    pub fn failing(name: &'static str, err: AdapterError) -> Self {
        Self::with(name, move |_| Err(err.clone()))
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl CandidateSource for MockSource {
    fn name(&self) -> &str {
        self.name
    }

    fn resolve<'a>(&'a self, citation: &'a Citation) -> AdapterFuture<'a, Vec<Candidate>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            (self.respond)(citation)
        })
    }

    fn close<'a>(&'a self) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            self.closes.fetch_add(1, Ordering::SeqCst);
        })
    }
}

pub(crate) struct MockLookup {
    arxiv: Box<LookupFn>,
    doi: Box<LookupFn>,
    search: Box<SearchFn>,
    pub arxiv_calls: AtomicUsize,
    pub doi_calls: AtomicUsize,
    pub search_calls: AtomicUsize,
    pub closes: AtomicUsize,
}

impl MockLookup {
    pub fn empty() -> Self {
        Self {
            arxiv: Box::new(|_| Ok(None)),
            doi: Box::new(|_| Ok(None)),
            search: Box::new(|_| Ok(vec![])),
            arxiv_calls: AtomicUsize::new(0),
            doi_calls: AtomicUsize::new(0),
            search_calls: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    pub fn on_arxiv<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> Result<Option<S2Paper>, AdapterError> + Send + Sync + 'static,
    {
        self.arxiv = Box::new(f);
        self
    }

    pub fn on_search<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> Result<Vec<S2Paper>, AdapterError> + Send + Sync + 'static,
    {
        self.search = Box::new(f);
        self
    }

    pub fn calls(&self) -> usize {
        self.arxiv_calls.load(Ordering::SeqCst)
            + self.doi_calls.load(Ordering::SeqCst)
            + self.search_calls.load(Ordering::SeqCst)
    }
}

impl SemanticScholarLookup for MockLookup {
    fn by_arxiv_id(&self, arxiv_id: &str) -> Result<Option<S2Paper>, AdapterError> {
        self.arxiv_calls.fetch_add(1, Ordering::SeqCst);
        (self.arxiv)(arxiv_id)
    }

    fn by_doi(&self, doi: &str) -> Result<Option<S2Paper>, AdapterError> {
        self.doi_calls.fetch_add(1, Ordering::SeqCst);
        (self.doi)(doi)
    }

    fn search(&self, query: &str, _limit: usize) -> Result<Vec<S2Paper>, AdapterError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        (self.search)(query)
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Handles to the mocks behind a [`SourceSet`], for call-count assertions.
pub(crate) struct MockSources {
    pub crossref: Arc<MockSource>,
    pub arxiv: Arc<MockSource>,
    pub openalex: Arc<MockSource>,
    pub semantic_scholar: Arc<MockLookup>,
}

impl Default for MockSources {
    fn default() -> Self {
        Self {
            crossref: Arc::new(MockSource::empty("CrossRef")),
            arxiv: Arc::new(MockSource::empty("arXiv")),
            openalex: Arc::new(MockSource::empty("OpenAlex")),
            semantic_scholar: Arc::new(MockLookup::empty()),
        }
    }
}

impl MockSources {
    pub fn set(&self) -> SourceSet {
        SourceSet::new(
            self.crossref.clone(),
            self.arxiv.clone(),
            self.openalex.clone(),
            self.semantic_scholar.clone(),
        )
    }

    /// Total calls across all four adapters.
    pub fn total_calls(&self) -> usize {
        self.crossref.calls()
            + self.arxiv.calls()
            + self.openalex.calls()
            + self.semantic_scholar.calls()
    }
}
