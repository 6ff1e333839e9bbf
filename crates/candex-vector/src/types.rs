//! Core types for the candidate vector collection

use candex_core::{CandidateId, Distance, ValidatedCandidate};
use serde::{Deserialize, Serialize};

/// Named collection with a fixed dimension and metric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub name: String,
    pub dimension: usize,
    pub distance: Distance,
}

impl CollectionConfig {
    pub fn new(name: impl Into<String>, dimension: usize, distance: Distance) -> Self {
        Self {
            name: name.into(),
            dimension,
            distance,
        }
    }
}

/// Payload stored next to each vector.
///
/// `update_at` is the wire name used by existing collections; some older
/// points carry `updated_at` instead, which readers accept as a fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointPayload {
    pub name: String,
    pub text_content: String,
    #[serde(alias = "updated_at")]
    pub update_at: String,
}

/// A point ready to be written to the collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexPoint {
    pub id: u64,
    pub vector: Vec<f32>,
    pub payload: PointPayload,
}

impl IndexPoint {
    /// Build the point for a validated candidate and its document embedding.
    pub fn from_candidate(candidate: &ValidatedCandidate, vector: Vec<f32>) -> Self {
        Self {
            id: point_id(candidate.id),
            vector,
            payload: PointPayload {
                name: candidate.name.clone(),
                text_content: candidate.context_text(),
                update_at: candidate.updated_at_string(),
            },
        }
    }

    /// Candidate id this point was derived from.
    pub fn candidate_id(&self) -> Option<CandidateId> {
        CandidateId::try_from(self.id).ok()
    }
}

/// Point ids are the candidate primary keys. Negative keys never occur in
/// the candidates table; they wrap to the upper half of the id space rather
/// than colliding with a real candidate.
#[allow(clippy::cast_sign_loss)]
pub const fn point_id(id: CandidateId) -> u64 {
    id as u64
}

/// Payload conditions applied to a similarity query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilter {
    /// Full-text match on `name`. Required when set.
    pub name: Option<String>,
    /// Full-text matches on `text_content`. At least one must hold when non-empty.
    pub skills_any: Vec<String>,
    /// Point never returned, used to exclude the reference point of a
    /// similarity lookup.
    pub exclude_id: Option<u64>,
}

impl SearchFilter {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.skills_any.is_empty() && self.exclude_id.is_none()
    }

    /// Evaluate the filter against a payload.
    ///
    /// Text matching is case-insensitive containment, which approximates the
    /// word-tokenized full-text index used by the remote backend.
    pub fn matches(&self, id: u64, payload: &PointPayload) -> bool {
        if self.exclude_id == Some(id) {
            return false;
        }
        if let Some(name) = &self.name {
            if !contains_ci(&payload.name, name) {
                return false;
            }
        }
        self.skills_any.is_empty()
            || self
                .skills_any
                .iter()
                .any(|skill| contains_ci(&payload.text_content, skill))
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.trim().to_lowercase())
}

/// Similarity query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub vector: Vec<f32>,
    pub limit: usize,
    pub score_threshold: Option<f32>,
    pub filter: SearchFilter,
}

impl SearchQuery {
    pub fn new(vector: Vec<f32>) -> Self {
        Self {
            vector,
            limit: 10,
            score_threshold: None,
            filter: SearchFilter::default(),
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    pub fn with_score_threshold(mut self, threshold: f32) -> Self {
        self.score_threshold = Some(threshold);
        self
    }

    pub fn with_filter(mut self, filter: SearchFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn validate(&self, dimension: usize) -> Result<(), String> {
        if self.vector.len() != dimension {
            return Err(format!(
                "query vector has {} dimensions, collection expects {dimension}",
                self.vector.len()
            ));
        }
        if self.limit == 0 {
            return Err("limit must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// A point returned by a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPoint {
    pub id: u64,
    pub score: f32,
    pub payload: PointPayload,
}

/// Score of `b` relative to `a` under the given metric.
///
/// Cosine and dot product grow with similarity. Euclidean scores are
/// distances, so smaller is closer.
pub fn score(distance: Distance, a: &[f32], b: &[f32]) -> f32 {
    match distance {
        Distance::Cosine => {
            let dot = dot(a, b);
            let mag_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
            let mag_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
            if mag_a == 0.0 || mag_b == 0.0 {
                0.0
            } else {
                dot / (mag_a * mag_b)
            }
        }
        Distance::Dot => dot(a, b),
        Distance::Euclid => a
            .iter()
            .zip(b)
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>()
            .sqrt(),
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Whether `score` passes `threshold` under the given metric.
pub fn within_threshold(distance: Distance, score: f32, threshold: f32) -> bool {
    match distance {
        Distance::Euclid => score <= threshold,
        Distance::Cosine | Distance::Dot => score >= threshold,
    }
}
