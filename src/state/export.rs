//! Admin status report and results export.
//!
//! Both are read-only snapshots for the people running the vote: a quick
//! health check of the system, and the final ranking with optional
//! per-ballot detail for archiving.

use super::{dashboard_view, voting_progress, AdminCredential, AdminError, AppState};
use crate::allowlist::AllowlistStats;
use crate::tally::tally;
use crate::types::*;
use serde::{Deserialize, Serialize};

/// Schema version for export format compatibility
pub const EXPORT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub generated_at: String,
    pub allowlist: AllowlistStats,
    pub voting: VotingStatus,
    pub total_votes: usize,
    pub expected_voters: u32,
    pub progress_percent: u32,
    /// Live standings, regardless of any lock snapshot
    pub standings: Vec<Standing>,
}

/// One ranked candidate in the export
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportedResult {
    pub rank: usize,
    pub candidate_id: CandidateId,
    pub name: String,
    pub team: String,
    pub total_score: u64,
    pub awards: AwardCounts,
}

/// One voter's ballot, included in detailed exports
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportedBallot {
    pub voter_id: VoterId,
    pub email: Option<String>,
    pub name: Option<String>,
    pub selections: Selections,
    pub multiplier: u32,
    pub role: Option<String>,
    /// Sum of the ballot's weighted points
    pub total_points: u64,
    pub submitted_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsExport {
    pub schema_version: u32,
    pub exported_at: String,
    pub total_votes: usize,
    /// Results come from the lock-time snapshot
    pub is_final: bool,
    pub results: Vec<ExportedResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ballots: Option<Vec<ExportedBallot>>,
}

impl From<&VoteRecord> for ExportedBallot {
    fn from(record: &VoteRecord) -> Self {
        Self {
            voter_id: record.voter_id.clone(),
            email: record.email.clone(),
            name: record.display_name.clone(),
            selections: record.selections.clone(),
            multiplier: record.multiplier,
            role: record.role.clone(),
            total_points: record.points.values().map(|p| u64::from(*p)).sum(),
            submitted_at: record.submitted_at.clone(),
        }
    }
}

impl AppState {
    pub async fn status_report(
        &self,
        credential: &AdminCredential,
    ) -> Result<StatusReport, AdminError> {
        self.admin.authorize(credential)?;

        let allowlist = self.allowlist.stats().await?;
        let voting = self.voting_status().await?;
        let live = self.current_tally().await?;

        Ok(StatusReport {
            generated_at: chrono::Utc::now().to_rfc3339(),
            allowlist,
            voting,
            total_votes: live.total_votes,
            expected_voters: self.config.expected_voters,
            progress_percent: voting_progress(live.total_votes, self.config.expected_voters),
            standings: live.standings,
        })
    }

    /// Ranked results; with `detailed` every ballot is included too
    pub async fn export_results(
        &self,
        credential: &AdminCredential,
        detailed: bool,
    ) -> Result<ResultsExport, AdminError> {
        let actor = self.admin.authorize(credential)?;

        let status = self.voting_status().await?;
        let records = self.vote_records().await?;
        let view = dashboard_view(
            &status,
            &tally(&self.config, &[], &records),
            self.config.expected_voters,
        );

        let results = view
            .standings
            .iter()
            .map(|s| ExportedResult {
                rank: s.rank,
                candidate_id: s.candidate_id.clone(),
                name: s.name.clone(),
                team: s.team.clone(),
                total_score: s.total_score,
                awards: s.awards,
            })
            .collect();

        let ballots = detailed.then(|| records.iter().map(ExportedBallot::from).collect());

        tracing::info!(
            "Results exported by {} ({} votes, detailed={})",
            actor,
            records.len(),
            detailed
        );

        Ok(ResultsExport {
            schema_version: EXPORT_SCHEMA_VERSION,
            exported_at: chrono::Utc::now().to_rfc3339(),
            total_votes: view.total_votes,
            is_final: view.is_final,
            results,
            ballots,
        })
    }
}
