//! Similarity functions and per-source weighted confidence.
//!
//! Every weighted confidence function applies the title gate first: a
//! candidate whose title similarity is below [`TITLE_MIN_SIMILARITY`] scores
//! exactly 0.0, whatever its other components.
//!
//! OpenAlex is the exception to re-scoring. Its adapter ranks and scores
//! candidates itself, and [`openalex_confidence`] passes that score through
//! unchanged (clamped to [0, 1]) without applying the gate.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{Candidate, Citation, SourceDetail};

/// Confidence at which a match is accepted outright and the waterfall stops.
pub const HIGH_CONFIDENCE: f64 = 0.85;
/// Confidence at which a match is accepted as partial.
pub const MEDIUM_CONFIDENCE: f64 = 0.70;
/// Title similarity below this vetoes a candidate.
pub const TITLE_MIN_SIMILARITY: f64 = 0.80;

const TITLE_WEIGHT: f64 = 0.45;
const AUTHOR_WEIGHT: f64 = 0.25;
const YEAR_WEIGHT: f64 = 0.15;
const QUALITY_WEIGHT: f64 = 0.15;

/// Tunable author/year constants used by the weighted scores.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Author score when the authors agree.
    pub author_match: f64,
    /// First-author heuristic (Crossref, arXiv) when they don't. Author lists
    /// from these sources are often partial, so this stays neutral.
    pub first_author_default: f64,
    /// Surname-overlap heuristic (Semantic Scholar) when nothing overlaps.
    pub surname_default: f64,
    /// Year score when either side has no year.
    pub unknown_year: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            author_match: 0.8,
            first_author_default: 0.5,
            surname_default: 0.3,
            unknown_year: 0.5,
        }
    }
}

/// Clamp to [0, 1]; NaN and infinities become 0.0.
fn finite_unit(x: f64) -> f64 {
    if x.is_finite() {
        x.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// A confidence value with its named components.
#[derive(Debug, Clone, PartialEq)]
pub struct Scored {
    pub confidence: f64,
    pub components: BTreeMap<String, f64>,
}

impl Scored {
    fn gated(title: f64) -> Self {
        Self {
            confidence: 0.0,
            components: BTreeMap::from([("title".to_string(), title)]),
        }
    }

    fn weighted(title: f64, author: f64, year: f64, quality: f64) -> Self {
        let confidence = TITLE_WEIGHT * title
            + AUTHOR_WEIGHT * author
            + YEAR_WEIGHT * year
            + QUALITY_WEIGHT * quality;
        Self {
            confidence: finite_unit(confidence),
            components: BTreeMap::from([
                ("title".to_string(), title),
                ("author".to_string(), author),
                ("year".to_string(), year),
                ("quality".to_string(), quality),
            ]),
        }
    }

    /// Write the score onto the candidate.
    pub fn apply(self, candidate: &mut Candidate) {
        candidate.raw_score = self.confidence;
        candidate.component_scores = self.components;
    }
}

/// Lowercase and trim.
pub fn normalize_title(title: &str) -> String {
    title.trim().to_lowercase()
}

/// Jaccard similarity of whitespace tokens, 1.0 on exact normalized match.
///
/// Symmetric; 0.0 when either side is blank.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_title(a);
    let b = normalize_title(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    let ta: HashSet<&str> = a.split_whitespace().collect();
    let tb: HashSet<&str> = b.split_whitespace().collect();
    let union = ta.union(&tb).count();
    if union == 0 {
        return 0.0;
    }
    ta.intersection(&tb).count() as f64 / union as f64
}

/// Score for an absolute year difference.
pub fn year_distance_score(diff: u32) -> f64 {
    match diff {
        0 => 1.0,
        1 => 0.8,
        2 => 0.4,
        _ => 0.0,
    }
}

pub fn year_score(a: Option<i32>, b: Option<i32>, config: &ScoringConfig) -> f64 {
    match (a, b) {
        (Some(a), Some(b)) => year_distance_score(a.abs_diff(b)),
        _ => config.unknown_year,
    }
}

/// Crossref/arXiv heuristic: the first author strings match if either
/// contains the other (case-insensitive).
pub fn first_author_score(cited: &[String], found: &[String], config: &ScoringConfig) -> f64 {
    let first = |authors: &[String]| {
        authors
            .first()
            .map(|a| a.trim().to_lowercase())
            .filter(|a| !a.is_empty())
    };
    match (first(cited), first(found)) {
        (Some(a), Some(b)) if a.contains(&b) || b.contains(&a) => config.author_match,
        _ => config.first_author_default,
    }
}

/// Surname of an author string: the part before a comma ("Vaswani, A."),
/// otherwise the last token ("Ashish Vaswani").
fn surname(name: &str) -> Option<String> {
    let name = name.trim();
    let raw = match name.split_once(',') {
        Some((last, _)) => last.trim(),
        None => name.split_whitespace().last()?,
    };
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '\'')
        .flat_map(char::to_lowercase)
        .collect();
    (!cleaned.is_empty()).then_some(cleaned)
}

/// Semantic Scholar heuristic: any surname shared between the two author lists.
pub fn surname_overlap_score(cited: &[String], found: &[String], config: &ScoringConfig) -> f64 {
    let cited: HashSet<String> = cited.iter().filter_map(|a| surname(a)).collect();
    if cited.is_empty() {
        return config.surname_default;
    }
    if found
        .iter()
        .filter_map(|a| surname(a))
        .any(|s| cited.contains(&s))
    {
        config.author_match
    } else {
        config.surname_default
    }
}

/// Title similarity between the citation and a candidate, 0.0 if the
/// candidate has no title.
fn candidate_title_similarity(citation: &Citation, candidate: &Candidate) -> f64 {
    candidate
        .title
        .as_deref()
        .map(|t| title_similarity(citation.match_title(), t))
        .unwrap_or(0.0)
}

pub fn crossref_confidence(
    citation: &Citation,
    candidate: &Candidate,
    config: &ScoringConfig,
) -> Scored {
    let title = candidate_title_similarity(citation, candidate);
    if title < TITLE_MIN_SIMILARITY {
        return Scored::gated(title);
    }
    let author = first_author_score(&citation.authors, &candidate.authors, config);
    let year = year_score(citation.year, candidate.year, config);
    let relevance = match candidate.detail {
        SourceDetail::Crossref { relevance } if relevance.is_finite() => relevance,
        _ => 0.0,
    };
    let quality = (relevance / 100.0).clamp(0.0, 1.0);
    Scored::weighted(title, author, year, quality)
}

pub fn arxiv_confidence(
    citation: &Citation,
    candidate: &Candidate,
    config: &ScoringConfig,
) -> Scored {
    let title = candidate_title_similarity(citation, candidate);
    if title < TITLE_MIN_SIMILARITY {
        return Scored::gated(title);
    }
    let author = first_author_score(&citation.authors, &candidate.authors, config);
    let year = year_score(citation.year, candidate.year, config);
    let quality = if candidate.has_doi() { 1.0 } else { 0.5 };
    Scored::weighted(title, author, year, quality)
}

pub fn semantic_scholar_confidence(
    citation: &Citation,
    candidate: &Candidate,
    config: &ScoringConfig,
) -> Scored {
    let title = candidate_title_similarity(citation, candidate);
    if title < TITLE_MIN_SIMILARITY {
        return Scored::gated(title);
    }
    let author = surname_overlap_score(&citation.authors, &candidate.authors, config);
    let year = year_score(citation.year, candidate.year, config);
    let mut quality = 0.0;
    if candidate.has_doi() {
        quality += 0.7;
    }
    if candidate.citation_count.unwrap_or(0) > 0 {
        quality += 0.3;
    }
    Scored::weighted(title, author, year, quality)
}

/// The adapter's own confidence, trusted without re-scoring.
pub fn openalex_confidence(candidate: &Candidate) -> Scored {
    let confidence = match candidate.detail {
        SourceDetail::OpenAlex { confidence, .. } => confidence,
        _ => 0.0,
    };
    let confidence = finite_unit(confidence);
    Scored {
        confidence,
        components: BTreeMap::from([("source_confidence".to_string(), confidence)]),
    }
}

/// Score a candidate with the function matching its source.
pub fn score_candidate(
    citation: &Citation,
    candidate: &Candidate,
    config: &ScoringConfig,
) -> Scored {
    match candidate.detail {
        SourceDetail::Crossref { .. } => crossref_confidence(citation, candidate, config),
        SourceDetail::Arxiv { .. } => arxiv_confidence(citation, candidate, config),
        SourceDetail::OpenAlex { .. } => openalex_confidence(candidate),
        SourceDetail::SemanticScholar { .. } => {
            semantic_scholar_confidence(citation, candidate, config)
        }
    }
}
