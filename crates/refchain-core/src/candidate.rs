//! Candidate records returned by source adapters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Source;

/// Fields only one source provides.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceDetail {
    Crossref {
        /// Crossref's own relevance score (roughly 0..100+).
        relevance: f64,
    },
    Arxiv {
        arxiv_id: Option<String>,
        pdf_url: Option<String>,
        categories: Vec<String>,
    },
    #[serde(rename = "OPENALEX")]
    OpenAlex {
        id: String,
        is_open_access: bool,
        /// Confidence computed by the adapter itself; trusted as-is.
        confidence: f64,
    },
    SemanticScholar {
        paper_id: Option<String>,
    },
}

impl SourceDetail {
    pub fn source(&self) -> Source {
        match self {
            SourceDetail::Crossref { .. } => Source::Crossref,
            SourceDetail::Arxiv { .. } => Source::Arxiv,
            SourceDetail::OpenAlex { .. } => Source::OpenAlex,
            SourceDetail::SemanticScholar { .. } => Source::SemanticScholar,
        }
    }
}

/// One source's proposed match for a citation.
///
/// Adapters fill the bibliographic fields and [`SourceDetail`];
/// `raw_score` and `component_scores` are written by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub doi: Option<String>,
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub year: Option<i32>,
    pub venue: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub citation_count: Option<u64>,
    pub url: Option<String>,
    #[serde(flatten)]
    pub detail: SourceDetail,
    pub raw_score: f64,
    pub component_scores: BTreeMap<String, f64>,
}

impl Candidate {
    pub fn new(detail: SourceDetail) -> Self {
        Self {
            doi: None,
            title: None,
            authors: Vec::new(),
            year: None,
            venue: None,
            abstract_text: None,
            citation_count: None,
            url: None,
            detail,
            raw_score: 0.0,
            component_scores: BTreeMap::new(),
        }
    }

    pub fn crossref(relevance: f64) -> Self {
        Self::new(SourceDetail::Crossref { relevance })
    }

    pub fn arxiv(arxiv_id: impl Into<String>) -> Self {
        Self::new(SourceDetail::Arxiv {
            arxiv_id: Some(arxiv_id.into()),
            pdf_url: None,
            categories: Vec::new(),
        })
    }

    pub fn openalex(id: impl Into<String>, confidence: f64) -> Self {
        Self::new(SourceDetail::OpenAlex {
            id: id.into(),
            is_open_access: false,
            confidence,
        })
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

    pub fn with_venue(mut self, venue: impl Into<String>) -> Self {
        self.venue = Some(venue.into());
        self
    }

    pub fn with_citation_count(mut self, count: u64) -> Self {
        self.citation_count = Some(count);
        self
    }

    pub fn source(&self) -> Source {
        self.detail.source()
    }

    /// Whether the candidate carries a non-blank DOI.
    pub fn has_doi(&self) -> bool {
        self.doi.as_deref().is_some_and(|d| !d.trim().is_empty())
    }
}

/// A Semantic Scholar author entry.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct S2Author {
    pub author_id: Option<String>,
    #[serde(default)]
    pub name: String,
}

/// External identifiers block of a Semantic Scholar record.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct S2ExternalIds {
    #[serde(rename = "DOI")]
    pub doi: Option<String>,
    #[serde(rename = "ArXiv")]
    pub arxiv: Option<String>,
}

/// A Semantic Scholar paper record, in the Graph API JSON shape.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct S2Paper {
    pub paper_id: Option<String>,
    pub title: Option<String>,
    pub year: Option<i32>,
    #[serde(default)]
    pub authors: Vec<S2Author>,
    pub external_ids: Option<S2ExternalIds>,
    pub venue: Option<String>,
    pub citation_count: Option<u64>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub url: Option<String>,
}

impl S2Paper {
    pub fn doi(&self) -> Option<&str> {
        self.external_ids
            .as_ref()
            .and_then(|ids| ids.doi.as_deref())
            .filter(|d| !d.trim().is_empty())
    }
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.trim().is_empty())
}

impl From<S2Paper> for Candidate {
    fn from(paper: S2Paper) -> Self {
        let doi = paper.doi().map(str::to_string);
        Self {
            doi,
            title: non_blank(paper.title),
            authors: paper
                .authors
                .into_iter()
                .map(|a| a.name)
                .filter(|n| !n.trim().is_empty())
                .collect(),
            year: paper.year,
            venue: non_blank(paper.venue),
            abstract_text: non_blank(paper.abstract_text),
            citation_count: paper.citation_count,
            url: paper.url,
            detail: SourceDetail::SemanticScholar {
                paper_id: paper.paper_id,
            },
            raw_score: 0.0,
            component_scores: BTreeMap::new(),
        }
    }
}
