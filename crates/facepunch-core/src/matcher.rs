//! Face matching: one probe embedding against the gallery of active identities.

use serde::{Deserialize, Serialize};

use crate::geometry::clamp_unit;
use crate::types::{Embedding, Gallery, Identity};

/// Matching thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Maximum Euclidean distance accepted as the same person (lower = stricter).
    pub tolerance: f32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self { tolerance: 0.45 }
    }
}

/// Best-scoring identity for a probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityMatch {
    pub identity: Identity,
    /// Minimum distance over the identity's embeddings.
    pub distance: f32,
    /// `1 - distance`, clamped to [0, 1].
    pub confidence: f32,
}

/// Why a probe matched nobody.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum NoMatchReason {
    /// No active identity has any stored embedding.
    EmptyGallery,
    /// The closest identity is farther away than the tolerance.
    OutsideTolerance {
        best_distance: f32,
        best_identity: String,
    },
    /// Every stored embedding was incomparable with the probe.
    NoComparableEmbeddings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MatchResult {
    Match(IdentityMatch),
    NoMatch(NoMatchReason),
}

impl MatchResult {
    pub fn identity_match(&self) -> Option<&IdentityMatch> {
        match self {
            MatchResult::Match(m) => Some(m),
            MatchResult::NoMatch(_) => None,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, MatchResult::Match(_))
    }
}

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
///
/// Implementations must be deterministic and must break distance ties in
/// favour of the identity registered first.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &Gallery, tolerance: f32) -> MatchResult;
}

/// Exhaustive Euclidean matcher, O(total embeddings) per probe.
///
/// Every identity's score is the minimum distance over its own embeddings.
/// Identities are visited in gallery (registration) order and the running
/// best is only replaced on a strictly smaller score, which makes the
/// earliest-registered identity win ties.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Embedding, gallery: &Gallery, tolerance: f32) -> MatchResult {
        if gallery.is_empty() {
            return MatchResult::NoMatch(NoMatchReason::EmptyGallery);
        }

        let mut best: Option<(usize, f32)> = None;

        for (idx, entry) in gallery.entries().iter().enumerate() {
            let mut identity_best: Option<f32> = None;
            for stored in &entry.embeddings {
                let Some(distance) = probe.euclidean_distance(stored).filter(|d| d.is_finite())
                else {
                    tracing::warn!(
                        identity = %entry.identity.id,
                        probe_dim = probe.dim(),
                        stored_dim = stored.dim(),
                        "skipping incomparable stored embedding"
                    );
                    continue;
                };
                if identity_best.map_or(true, |b| distance < b) {
                    identity_best = Some(distance);
                }
            }

            if let Some(score) = identity_best {
                if best.map_or(true, |(_, b)| score < b) {
                    best = Some((idx, score));
                }
            }
        }

        let Some((idx, distance)) = best else {
            return MatchResult::NoMatch(NoMatchReason::NoComparableEmbeddings);
        };
        let identity = &gallery.entries()[idx].identity;

        if distance <= tolerance {
            MatchResult::Match(IdentityMatch {
                identity: identity.clone(),
                distance,
                confidence: clamp_unit(1.0 - distance),
            })
        } else {
            MatchResult::NoMatch(NoMatchReason::OutsideTolerance {
                best_distance: distance,
                best_identity: identity.id.clone(),
            })
        }
    }
}

/// Matching engine with an injected strategy and thresholds.
#[derive(Debug, Clone, Default)]
pub struct MatchEngine<M = EuclideanMatcher> {
    matcher: M,
    config: MatchConfig,
}

impl<M: Matcher> MatchEngine<M> {
    pub fn new(matcher: M, config: MatchConfig) -> Self {
        Self { matcher, config }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    pub fn identify(&self, probe: &Embedding, gallery: &Gallery) -> MatchResult {
        let result = self.matcher.compare(probe, gallery, self.config.tolerance);
        match &result {
            MatchResult::Match(m) => tracing::debug!(
                identity = %m.identity.id,
                distance = m.distance,
                "probe matched"
            ),
            MatchResult::NoMatch(reason) => tracing::debug!(?reason, "probe not matched"),
        }
        result
    }
}
