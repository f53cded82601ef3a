//! Frequency reports over a raw corpus: which words and which sender
//! domains characterize a category.

use super::corpus::{Corpus, CorpusRecord};
use crate::domain_utils::DomainUtils;
use crate::features::FeatureExtractor;
use crate::message::Category;
use std::collections::HashMap;

/// Records of `category` (all labeled records when `None`).
fn records_for(
    corpus: &Corpus,
    category: Option<Category>,
) -> impl Iterator<Item = &CorpusRecord> {
    corpus.records().filter(move |record| match (category, record.category()) {
        (Some(wanted), Ok(found)) => found == wanted,
        (None, Ok(_)) => true,
        (_, Err(_)) => false,
    })
}

/// Sort by count descending, then alphabetically, and keep the first `n`.
fn top_n(counts: HashMap<String, usize>, n: usize) -> Vec<(String, usize)> {
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(n);
    ranked
}

/// Most frequent terms in subject and body of the selected records.
pub fn top_keywords(
    corpus: &Corpus,
    extractor: &FeatureExtractor,
    category: Option<Category>,
    n: usize,
) -> Vec<(String, usize)> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for record in records_for(corpus, category) {
        let subject = record.subject.as_deref().unwrap_or_default();
        let body = record.body.as_deref().unwrap_or_default();
        for token in extractor
            .tokenize(subject)
            .into_iter()
            .chain(extractor.tokenize(body))
        {
            *counts.entry(token).or_insert(0) += 1;
        }
    }
    top_n(counts, n)
}

/// Most frequent sender domains of the selected records.
pub fn common_sender_domains(
    corpus: &Corpus,
    category: Option<Category>,
    n: usize,
) -> Vec<(String, usize)> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for record in records_for(corpus, category) {
        if let Some(domain) = record.email.as_deref().and_then(DomainUtils::extract_domain) {
            *counts
                .entry(DomainUtils::canonicalize_domain(&domain))
                .or_insert(0) += 1;
        }
    }
    top_n(counts, n)
}
