//! Two-attempt similarity threshold policy.

use std::future::Future;

use crate::error::Result;
use crate::store::Candidate;

/// Primary bar plus the single relaxed bar tried when the primary finds nothing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdPolicy {
    /// First-attempt threshold.
    pub primary: f32,
    /// Second-attempt threshold.
    pub fallback: f32,
}

/// Candidates found plus the bar that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    /// Threshold of the attempt that produced `candidates`.
    pub threshold: f32,
    /// True when the fallback attempt ran.
    pub relaxed: bool,
    /// Hits, possibly empty.
    pub candidates: Vec<Candidate>,
}

impl ThresholdPolicy {
    /// Builds a policy.
    pub fn new(primary: f32, fallback: f32) -> Self {
        Self { primary, fallback }
    }

    /// Thresholds to try, in order. The fallback only applies above it.
    pub fn attempts(&self) -> Vec<f32> {
        if self.primary > self.fallback {
            vec![self.primary, self.fallback]
        } else {
            vec![self.primary]
        }
    }

    /// Runs `search` at each attempt until one returns candidates.
    ///
    /// Search errors abort immediately.
    pub async fn run<F, Fut>(&self, mut search: F) -> Result<SearchOutcome>
    where
        F: FnMut(f32) -> Fut,
        Fut: Future<Output = Result<Vec<Candidate>>>,
    {
        let mut outcome = SearchOutcome {
            threshold: self.primary,
            relaxed: false,
            candidates: Vec::new(),
        };
        for (attempt, threshold) in self.attempts().into_iter().enumerate() {
            outcome.threshold = threshold;
            outcome.relaxed = attempt > 0;
            outcome.candidates = search(threshold).await?;
            if !outcome.candidates.is_empty() {
                break;
            }
        }
        Ok(outcome)
    }
}
