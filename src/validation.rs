//! Ballot validation
//!
//! Pure, synchronous checks run on every selection change: per-award counts,
//! completeness and award caps. No I/O happens here.

use crate::config::VotingConfig;
use crate::types::*;
use serde::{Deserialize, Serialize};

/// Reasons a ballot cannot be submitted
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Every candidate needs an award before submitting")]
    Incomplete,

    #[error("{}", .0.join(" "))]
    LimitExceeded(Vec<String>),

    #[error("Unknown candidate '{0}'")]
    UnknownCandidate(CandidateId),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub is_complete: bool,
    /// Every cap currently exceeded, in award order
    pub violations: Vec<String>,
    pub counts: AwardCounts,
}

impl ValidationResult {
    /// Collapse into the error that blocks confirmation, cap violations first
    pub fn into_result(self) -> Result<(), ValidationError> {
        if !self.violations.is_empty() {
            return Err(ValidationError::LimitExceeded(self.violations));
        }
        if !self.is_complete {
            return Err(ValidationError::Incomplete);
        }
        Ok(())
    }

    /// How many more candidates may still receive `award`, None if uncapped
    pub fn remaining(&self, config: &VotingConfig, award: Award) -> Option<u32> {
        award_limit(config, award).map(|limit| limit.saturating_sub(self.counts.get(award)))
    }
}

/// Cap for an award; `none` is uncapped and awards without a tier rule
/// may not be given at all
fn award_limit(config: &VotingConfig, award: Award) -> Option<u32> {
    if award.is_none() {
        return None;
    }
    Some(config.tier(award).map(|t| t.limit).unwrap_or(0))
}

/// Validate a (possibly partial) selection mapping against the rule set.
///
/// Candidates missing from `selections` count as `none`. Keys that are not
/// configured candidates are ignored here; see [`check_known_candidates`].
pub fn validate(selections: &Selections, config: &VotingConfig) -> ValidationResult {
    let mut counts = AwardCounts::default();
    let mut is_complete = true;

    for candidate in &config.candidates {
        let award = selections.get(&candidate.id).copied().unwrap_or_default();
        counts.increment(award);
        if award.is_none() {
            is_complete = false;
        }
    }

    let mut violations = Vec::new();
    for award in Award::RANKED {
        let Some(limit) = award_limit(config, award) else {
            continue;
        };
        if counts.get(award) <= limit {
            continue;
        }
        match config.tier(award) {
            Some(tier) => violations.push(format!(
                "At most {} {} may be awarded.",
                tier.limit, tier.label
            )),
            None => violations.push(format!("{:?} is not awarded in this vote.", award)),
        }
    }

    ValidationResult {
        is_valid: violations.is_empty(),
        is_complete,
        violations,
        counts,
    }
}

/// Reject selections that name candidates outside the rule set
pub fn check_known_candidates(
    selections: &Selections,
    config: &VotingConfig,
) -> Result<(), ValidationError> {
    match selections.keys().find(|id| !config.has_candidate(id)) {
        Some(id) => Err(ValidationError::UnknownCandidate(id.clone())),
        None => Ok(()),
    }
}

/// In-progress ballot. Always keyed by exactly the configured candidates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ballot {
    selections: Selections,
}

impl Ballot {
    /// Fresh ballot with every candidate set to `none`
    pub fn new(config: &VotingConfig) -> Self {
        Self {
            selections: config
                .candidates
                .iter()
                .map(|c| (c.id.clone(), Award::None))
                .collect(),
        }
    }

    pub fn select(
        &mut self,
        candidate_id: &str,
        award: Award,
    ) -> Result<(), ValidationError> {
        match self.selections.get_mut(candidate_id) {
            Some(slot) => {
                *slot = award;
                Ok(())
            }
            None => Err(ValidationError::UnknownCandidate(candidate_id.to_string())),
        }
    }

    pub fn selections(&self) -> &Selections {
        &self.selections
    }

    /// Number of candidates that already have an award
    pub fn awarded_count(&self) -> usize {
        self.selections.values().filter(|a| !a.is_none()).count()
    }

    pub fn validate(&self, config: &VotingConfig) -> ValidationResult {
        validate(&self.selections, config)
    }
}
