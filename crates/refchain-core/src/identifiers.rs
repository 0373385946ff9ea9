//! Normalization of DOI and arXiv identifiers supplied with a citation.

use once_cell::sync::Lazy;
use regex::Regex;

static DOI_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:https?://(?:dx\.)?doi\.org/|doi:\s*)").unwrap());

static ARXIV_PREFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^arxiv:\s*").unwrap());

/// Strip resolver URL and `doi:` prefixes. Blank input yields `None`.
pub fn normalize_doi(raw: &str) -> Option<String> {
    let doi = DOI_PREFIX_RE.replace(raw.trim(), "");
    let doi = doi.trim();
    (!doi.is_empty()).then(|| doi.to_string())
}

/// Strip an optional `arXiv:` prefix. Blank input yields `None`.
pub fn normalize_arxiv_id(raw: &str) -> Option<String> {
    let id = ARXIV_PREFIX_RE.replace(raw.trim(), "");
    let id = id.trim();
    (!id.is_empty()).then(|| id.to_string())
}

/// Extract the arXiv id from a backup identifier of the form `arxiv:<id>`.
///
/// Backup ids with any other scheme yield `None`.
pub fn arxiv_id_from_backup(backup_id: &str) -> Option<String> {
    let trimmed = backup_id.trim();
    if !ARXIV_PREFIX_RE.is_match(trimmed) {
        return None;
    }
    normalize_arxiv_id(trimmed)
}
