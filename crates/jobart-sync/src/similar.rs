//! Nearest listings of a dataset by TF-IDF cosine similarity.

use std::collections::{HashMap, HashSet};

use anyhow::{bail, Result};
use jobart_core::{CanonicalListing, UNKNOWN};
use serde::Serialize;

use crate::skills::SkillExtractor;

pub const DEFAULT_SIMILAR_COUNT: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarListing {
    /// Position in the dataset the index was built from.
    pub index: usize,
    pub score: f64,
}

/// Contract, title, sector, experience, city, skills and description.
/// Sentinel values carry no meaning and are left out.
fn listing_text(listing: &CanonicalListing) -> String {
    let mut parts = vec![
        listing.contract_type.label(),
        listing.title.as_str(),
        listing.industry_sector.as_str(),
        listing.experience_level.as_str(),
        listing.city.as_str(),
    ];
    parts.retain(|p| *p != UNKNOWN);
    parts.extend(listing.tech_skills.iter().map(String::as_str));
    parts.extend(listing.soft_skills.iter().map(String::as_str));
    parts.push(listing.description.as_str());
    parts.join(" ")
}

/// L2-normalized TF-IDF vectors, one per listing. IDF is smoothed:
/// `ln((1 + n) / (1 + df)) + 1`.
#[derive(Debug, Clone)]
pub struct SimilarityIndex {
    vectors: Vec<HashMap<String, f64>>,
}

impl SimilarityIndex {
    pub fn build(listings: &[CanonicalListing], extractor: &SkillExtractor) -> Self {
        let docs = listings
            .iter()
            .map(|l| extractor.words(&listing_text(l)))
            .collect::<Vec<_>>();
        let n = docs.len() as f64;

        let mut doc_freq: HashMap<&str, usize> = HashMap::new();
        for doc in &docs {
            for term in doc.iter().map(String::as_str).collect::<HashSet<_>>() {
                *doc_freq.entry(term).or_default() += 1;
            }
        }

        let vectors = docs
            .iter()
            .map(|doc| {
                let mut weights: HashMap<String, f64> = HashMap::new();
                for term in doc {
                    *weights.entry(term.clone()).or_default() += 1.0;
                }
                for (term, weight) in weights.iter_mut() {
                    let df = doc_freq.get(term.as_str()).copied().unwrap_or(1) as f64;
                    *weight *= ((1.0 + n) / (1.0 + df)).ln() + 1.0;
                }
                let norm = weights.values().map(|w| w * w).sum::<f64>().sqrt();
                if norm > 0.0 {
                    weights.values_mut().for_each(|w| *w /= norm);
                }
                weights
            })
            .collect();

        Self { vectors }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    fn cosine(&self, a: usize, b: usize) -> f64 {
        let (small, large) = if self.vectors[a].len() <= self.vectors[b].len() {
            (&self.vectors[a], &self.vectors[b])
        } else {
            (&self.vectors[b], &self.vectors[a])
        };
        small
            .iter()
            .filter_map(|(term, w)| large.get(term).map(|v| w * v))
            .sum()
    }

    /// The `k` listings closest to `index`, best first, never `index` itself.
    /// Ties keep dataset order.
    pub fn most_similar(&self, index: usize, k: usize) -> Result<Vec<SimilarListing>> {
        if index >= self.len() {
            bail!("listing {index} out of range for a dataset of {}", self.len());
        }
        let mut scored = (0..self.len())
            .filter(|&other| other != index)
            .map(|other| SimilarListing {
                index: other,
                score: self.cosine(index, other),
            })
            .collect::<Vec<_>>();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.index.cmp(&b.index)));
        scored.truncate(k);
        Ok(scored)
    }
}

pub fn similar_listings(
    listings: &[CanonicalListing],
    index: usize,
    k: usize,
    extractor: &SkillExtractor,
) -> Result<Vec<SimilarListing>> {
    SimilarityIndex::build(listings, extractor).most_similar(index, k)
}
