//! Score aggregation and ranking
//!
//! Every pass is a full recompute from the complete set of vote records.
//! The only memory carried between passes is the previous standings,
//! which the caller threads through explicitly.

use crate::config::VotingConfig;
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Result of one aggregation pass
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tally {
    /// Candidates by descending score; ties keep configuration order
    pub standings: Vec<Standing>,
    pub total_votes: usize,
}

impl Tally {
    /// Tally with no votes, every candidate on 0 points
    pub fn empty(config: &VotingConfig) -> Self {
        tally(config, &[], &[])
    }
}

/// Compute standings from all vote records.
///
/// `previous` is the standings of the prior pass (empty on the first one).
/// Point entries for unknown candidates are skipped.
pub fn tally(config: &VotingConfig, previous: &[Standing], records: &[VoteRecord]) -> Tally {
    let index: HashMap<&str, usize> = config
        .candidates
        .iter()
        .enumerate()
        .map(|(i, c)| (c.id.as_str(), i))
        .collect();

    let mut totals = vec![0u64; config.candidates.len()];
    let mut awards = vec![AwardCounts::default(); config.candidates.len()];

    for record in records {
        for (candidate_id, points) in &record.points {
            match index.get(candidate_id.as_str()) {
                Some(&i) => totals[i] += u64::from(*points),
                None => tracing::debug!(
                    "Skipping points for unknown candidate {} in vote {}",
                    candidate_id,
                    record.voter_id
                ),
            }
        }
        for (candidate_id, award) in &record.selections {
            if let Some(&i) = index.get(candidate_id.as_str()) {
                awards[i].increment(*award);
            }
        }
    }

    let previous_ranks: HashMap<&str, usize> = previous
        .iter()
        .enumerate()
        .map(|(i, s)| (s.candidate_id.as_str(), i + 1))
        .collect();

    // sort_by is stable, so equal scores keep configuration order
    let mut order: Vec<usize> = (0..config.candidates.len()).collect();
    order.sort_by(|&a, &b| totals[b].cmp(&totals[a]));

    let standings = order
        .into_iter()
        .enumerate()
        .map(|(position, i)| {
            let candidate = &config.candidates[i];
            Standing {
                candidate_id: candidate.id.clone(),
                name: candidate.name.clone(),
                team: candidate.team.clone(),
                total_score: totals[i],
                rank: position + 1,
                previous_rank: previous_ranks
                    .get(candidate.id.as_str())
                    .copied()
                    .unwrap_or(0),
                awards: awards[i],
            }
        })
        .collect();

    Tally {
        standings,
        total_votes: records.len(),
    }
}
