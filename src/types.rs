use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Opaque ID types for type safety
pub type CandidateId = String;
pub type VoterId = String;

/// Award picked for every candidate of a ballot
pub type Selections = BTreeMap<CandidateId, Award>;

/// Point contribution of a single vote record, per candidate
pub type Points = BTreeMap<CandidateId, u32>;

/// A video competing in the vote
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub id: CandidateId,
    pub name: String,
    pub team: String,
}

#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(rename_all = "lowercase")]
pub enum Award {
    #[default]
    None,
    First,
    Second,
    Third,
}

impl Award {
    /// Awards that carry points, in descending prestige
    pub const RANKED: [Award; 3] = [Award::First, Award::Second, Award::Third];

    pub fn is_none(&self) -> bool {
        *self == Award::None
    }
}

/// Point value and per-ballot cap of one award tier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TierRule {
    pub award: Award,
    pub label: String,
    pub points: u32,
    /// Maximum number of candidates that may receive this award on one ballot
    pub limit: u32,
}

/// Number of candidates per award, either on one ballot or across all ballots
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AwardCounts {
    pub none: u32,
    pub first: u32,
    pub second: u32,
    pub third: u32,
}

impl AwardCounts {
    pub fn get(&self, award: Award) -> u32 {
        match award {
            Award::None => self.none,
            Award::First => self.first,
            Award::Second => self.second,
            Award::Third => self.third,
        }
    }

    pub fn increment(&mut self, award: Award) {
        match award {
            Award::None => self.none += 1,
            Award::First => self.first += 1,
            Award::Second => self.second += 1,
            Award::Third => self.third += 1,
        }
    }
}

/// Authenticated user as supplied by the identity provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Identity {
    pub uid: VoterId,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

/// Weight and role granted to a voter by the role lookup
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoleGrant {
    pub multiplier: u32,
    pub role: Option<String>,
}

impl Default for RoleGrant {
    fn default() -> Self {
        Self {
            multiplier: 1,
            role: None,
        }
    }
}

/// A submitted ballot as persisted in the document store.
///
/// Every field has a default so that malformed documents still decode and
/// get counted by the tally.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VoteRecord {
    #[serde(default)]
    pub voter_id: VoterId,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, rename = "name")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub selections: Selections,
    #[serde(default)]
    pub points: Points,
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// RFC 3339 timestamp assigned when the record was written
    #[serde(default, rename = "timestamp")]
    pub submitted_at: Option<String>,
}

fn default_multiplier() -> u32 {
    1
}

/// One candidate's place in the current ranking
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Standing {
    pub candidate_id: CandidateId,
    pub name: String,
    pub team: String,
    pub total_score: u64,
    /// 1-based position
    pub rank: usize,
    /// Rank at the previous aggregation pass, 0 if there was none
    pub previous_rank: usize,
    /// How often each award was given to this candidate
    #[serde(default)]
    pub awards: AwardCounts,
}

impl Standing {
    pub fn movement(&self) -> RankMovement {
        if self.previous_rank == 0 || self.previous_rank == self.rank {
            RankMovement::Unchanged
        } else if self.rank < self.previous_rank {
            RankMovement::Up(self.previous_rank - self.rank)
        } else {
            RankMovement::Down(self.rank - self.previous_rank)
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "direction", content = "places", rename_all = "lowercase")]
pub enum RankMovement {
    Up(usize),
    Down(usize),
    Unchanged,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VotingPeriod {
    Open,
    Locked,
}

/// Singleton status document of the voting period. A missing document
/// reads as the default, i.e. open.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VotingStatus {
    #[serde(default)]
    pub is_locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_by: Option<String>,
    /// Standings captured at lock time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_standings: Option<Vec<Standing>>,
    /// Vote count captured alongside `final_standings`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_total_votes: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_by: Option<String>,
}

impl VotingStatus {
    pub fn period(&self) -> VotingPeriod {
        if self.is_locked {
            VotingPeriod::Locked
        } else {
            VotingPeriod::Open
        }
    }
}
