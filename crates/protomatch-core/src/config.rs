//! Matching configuration.

use crate::error::{Error, Result};
use crate::signature::SignatureConfig;

/// Default minimum score for a candidate pair
pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// Default score gap below which two candidates count as tied
pub const DEFAULT_SCORE_GAP: f64 = 0.05;

/// Tunable weights of the similarity scorer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    /// Credit given to a field pair matched on shape but not on wire number,
    /// relative to a pair matched on both
    pub renumber_weight: f64,
    /// Minimum field similarity for a field pair to count as matched
    pub field_threshold: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            renumber_weight: 0.5,
            field_threshold: 0.5,
        }
    }
}

impl ScoreWeights {
    /// Sets the credit for renumbered field matches
    pub fn renumber_weight(mut self, weight: f64) -> Self {
        self.renumber_weight = weight;
        self
    }

    /// Sets the per-field match threshold
    pub fn field_threshold(mut self, threshold: f64) -> Self {
        self.field_threshold = threshold;
        self
    }
}

/// Configuration for building a match index
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchConfig {
    /// Minimum score for a pair to be kept as a candidate
    pub threshold: f64,
    /// Candidates within this score of the best one make a match ambiguous
    pub score_gap_tolerance: f64,
    /// Scorer weights
    pub weights: ScoreWeights,
    /// Signature construction settings
    pub signature: SignatureConfig,
    /// Also match nested types, not just top-level ones
    pub include_nested: bool,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            score_gap_tolerance: DEFAULT_SCORE_GAP,
            weights: ScoreWeights::default(),
            signature: SignatureConfig::default(),
            include_nested: false,
        }
    }
}

impl MatchConfig {
    /// Creates a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the candidate threshold
    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Sets the ambiguity gap
    pub fn score_gap_tolerance(mut self, gap: f64) -> Self {
        self.score_gap_tolerance = gap;
        self
    }

    /// Sets the scorer weights
    pub fn weights(mut self, weights: ScoreWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Sets the signature settings
    pub fn signature(mut self, signature: SignatureConfig) -> Self {
        self.signature = signature;
        self
    }

    /// Sets whether nested types take part in matching
    pub fn include_nested(mut self, include: bool) -> Self {
        self.include_nested = include;
        self
    }

    /// Checks every ratio is a finite value in `[0, 1]` and the depth bound is positive
    pub fn validate(&self) -> Result<()> {
        check_unit("threshold", self.threshold)?;
        check_unit("score_gap_tolerance", self.score_gap_tolerance)?;
        check_unit("renumber_weight", self.weights.renumber_weight)?;
        check_unit("field_threshold", self.weights.field_threshold)?;
        if self.signature.max_depth == 0 {
            return Err(Error::invalid_config("max_depth", 0, "at least 1"));
        }
        Ok(())
    }
}

fn check_unit(parameter: &'static str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::invalid_config(parameter, value, "0.0..=1.0"))
    }
}
