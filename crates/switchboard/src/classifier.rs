//! Complexity classification for inbound requests.
//!
//! Maps a [`RequestContext`] to a discrete [`ComplexityTier`] through a
//! weighted additive score. The exact thresholds are policy, not contract:
//! they live in [`ClassifierPolicy`] and can be tuned per deployment. The
//! only guaranteed property is monotonicity — a longer prompt or a
//! structured-output requirement never lowers the tier.

use serde::{Deserialize, Serialize};

use crate::request::RequestContext;

/// Coarse classification of a request's expected difficulty.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityTier {
    Low,
    Medium,
    High,
}

impl ComplexityTier {
    /// The next tier down, used for graceful routing degradation.
    pub fn step_down(self) -> Option<Self> {
        match self {
            Self::High => Some(Self::Medium),
            Self::Medium => Some(Self::Low),
            Self::Low => None,
        }
    }

    pub fn all() -> Vec<Self> {
        vec![Self::Low, Self::Medium, Self::High]
    }
}

impl std::fmt::Display for ComplexityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Keywords that suggest multi-step or analytical work.
const ANALYTICAL_KEYWORDS: &[&str] = &[
    "analyze",
    "analyse",
    "compare",
    "evaluate",
    "step by step",
    "step-by-step",
    "explain why",
    "trade-off",
    "tradeoff",
    "design",
    "architecture",
    "plan",
    "strategy",
];

/// Tunable scoring thresholds for the classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierPolicy {
    /// Prompt length (chars) that earns the first length point.
    pub long_prompt_chars: usize,
    /// Prompt length that earns a second length point.
    pub very_long_prompt_chars: usize,
    /// Requested output size that earns an output point.
    pub large_output_tokens: u32,
    /// Points awarded for a structured-output requirement.
    pub structured_points: u32,
    /// Points awarded when analytical keywords are present.
    pub keyword_points: u32,
    /// Minimum score for the medium tier.
    pub medium_threshold: u32,
    /// Minimum score for the high tier.
    pub high_threshold: u32,
}

impl Default for ClassifierPolicy {
    fn default() -> Self {
        Self {
            long_prompt_chars: 1_500,
            very_long_prompt_chars: 6_000,
            large_output_tokens: 1_500,
            structured_points: 2,
            keyword_points: 1,
            medium_threshold: 2,
            high_threshold: 4,
        }
    }
}

/// Score a request and map it to a tier.
///
/// Pure and deterministic. An explicit caller hint always wins.
pub fn classify(ctx: &RequestContext, policy: &ClassifierPolicy) -> ComplexityTier {
    if let Some(hint) = ctx.request.complexity_hint {
        return hint;
    }

    let mut score: u32 = 0;

    let chars = ctx.prompt_chars();
    if chars >= policy.long_prompt_chars {
        score += 1;
    }
    if chars >= policy.very_long_prompt_chars {
        score += 1;
    }

    if ctx.wants_structured() {
        score += policy.structured_points;
    }

    if let Some(max_output) = ctx.request.max_output_tokens {
        if max_output >= policy.large_output_tokens {
            score += 1;
        }
    }

    let text: String = ctx
        .request
        .messages
        .iter()
        .map(|m| m.content.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");
    if ANALYTICAL_KEYWORDS.iter().any(|k| text.contains(k)) {
        score += policy.keyword_points;
    }

    if score >= policy.high_threshold {
        ComplexityTier::High
    } else if score >= policy.medium_threshold {
        ComplexityTier::Medium
    } else {
        ComplexityTier::Low
    }
}
