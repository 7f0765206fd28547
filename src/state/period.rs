use super::{AdminCredential, AdminError, AppState};
use crate::store::{read_doc, write_doc, StoreResult, Subscription};
use crate::tally::Tally;
use crate::types::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What the results dashboard should display
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DashboardView {
    pub standings: Vec<Standing>,
    pub total_votes: usize,
    /// True when showing the snapshot taken at lock time
    pub is_final: bool,
    pub expected_voters: u32,
    /// `total_votes` as a rounded percentage of `expected_voters`; can pass 100
    pub progress_percent: u32,
    pub status: VotingStatus,
}

/// Share of the expected voters that have voted, in whole percent
pub fn voting_progress(total_votes: usize, expected_voters: u32) -> u32 {
    if expected_voters == 0 {
        return 0;
    }
    (total_votes as f64 * 100.0 / f64::from(expected_voters)).round() as u32
}

/// Final standings and count while locked, live ones otherwise (or when the
/// lock carried no snapshot)
pub fn dashboard_view(status: &VotingStatus, live: &Tally, expected_voters: u32) -> DashboardView {
    let (standings, total_votes, is_final) = match (&status.final_standings, status.period()) {
        (Some(snapshot), VotingPeriod::Locked) => (
            snapshot.clone(),
            status.final_total_votes.unwrap_or(live.total_votes),
            true,
        ),
        _ => (live.standings.clone(), live.total_votes, false),
    };
    DashboardView {
        standings,
        total_votes,
        is_final,
        expected_voters,
        progress_percent: voting_progress(total_votes, expected_voters),
        status: status.clone(),
    }
}

/// Decode a status document; missing or unreadable means open
pub fn parse_status(doc: Option<Value>) -> VotingStatus {
    match doc {
        Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
            tracing::warn!("Malformed voting status document: {}", e);
            VotingStatus::default()
        }),
        None => VotingStatus::default(),
    }
}

fn is_valid_period_transition(from: VotingPeriod, to: VotingPeriod) -> bool {
    use VotingPeriod::*;

    // Locked -> Open only happens through a reset
    matches!((from, to), (Open, Locked))
}

impl AppState {
    pub async fn voting_status(&self) -> StoreResult<VotingStatus> {
        Ok(read_doc(&*self.store, &self.paths.voting_status())
            .await?
            .unwrap_or_default())
    }

    /// Raw status document feed; decode items with [`parse_status`]
    pub async fn subscribe_voting_status(&self) -> StoreResult<Subscription<Option<Value>>> {
        self.store
            .subscribe_document(&self.paths.voting_status())
            .await
    }

    /// Close voting, freezing the current standings and vote count as the
    /// final result
    pub async fn lock_voting(
        &self,
        credential: &AdminCredential,
    ) -> Result<VotingStatus, AdminError> {
        let actor = self.admin.authorize(credential)?;
        let _guard = self.period_guard.lock().await;

        let current = self.voting_status().await?;
        if !is_valid_period_transition(current.period(), VotingPeriod::Locked) {
            return Err(AdminError::InvalidTransition(format!(
                "Cannot lock voting while {:?}",
                current.period()
            )));
        }

        let tally = self.current_tally().await?;
        let status = VotingStatus {
            is_locked: true,
            locked_at: Some(chrono::Utc::now().to_rfc3339()),
            locked_by: Some(actor.clone()),
            final_standings: Some(tally.standings),
            final_total_votes: Some(tally.total_votes),
            ..current
        };
        write_doc(&*self.store, &self.paths.voting_status(), &status).await?;

        tracing::info!(
            "Voting locked by {} with {} votes",
            actor,
            tally.total_votes
        );
        Ok(status)
    }

    /// Delete every vote and reopen voting. Allowed from either period.
    /// Returns the number of deleted votes.
    pub async fn reset_all_votes(&self, credential: &AdminCredential) -> Result<usize, AdminError> {
        let actor = self.admin.authorize(credential)?;
        let _guard = self.period_guard.lock().await;

        // Status is only rewritten once every vote is gone; a failed reset
        // keeps the period as it was and can be retried
        let votes = self.store.list(&self.paths.votes()).await?;
        for (deleted, doc) in votes.iter().enumerate() {
            if let Err(e) = self.store.delete(&self.paths.vote(&doc.id)).await {
                tracing::error!(
                    "Reset by {} failed after deleting {} of {} votes: {}",
                    actor,
                    deleted,
                    votes.len(),
                    e
                );
                return Err(e.into());
            }
        }

        let status = VotingStatus {
            is_locked: false,
            reset_at: Some(chrono::Utc::now().to_rfc3339()),
            reset_by: Some(actor.clone()),
            ..VotingStatus::default()
        };
        write_doc(&*self.store, &self.paths.voting_status(), &status).await?;

        tracing::info!("All {} votes reset by {}", votes.len(), actor);
        Ok(votes.len())
    }

    pub async fn dashboard(&self) -> StoreResult<DashboardView> {
        let status = self.voting_status().await?;
        let live = self.current_tally().await?;
        Ok(dashboard_view(&status, &live, self.config.expected_voters))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResubmitPolicy;
    use crate::state::tests::{admin, ballot, full_ballot, identity, test_state};
    use crate::store::DocumentStore;
    use serde_json::json;

    async fn e2e_votes(state: &AppState) {
        state
            .submit_vote("voter1", &identity("voter1", "alice@corp.example"), full_ballot())
            .await
            .unwrap();
        let second = ballot(&[
            ("v1", Award::Second),
            ("v2", Award::First),
            ("v3", Award::Third),
            ("v4", Award::Second),
        ]);
        state
            .submit_vote("voter2", &identity("voter2", "bob@corp.example"), second)
            .await
            .unwrap();
    }

    #[test]
    fn test_period_transitions() {
        assert!(is_valid_period_transition(
            VotingPeriod::Open,
            VotingPeriod::Locked
        ));
        assert!(!is_valid_period_transition(
            VotingPeriod::Locked,
            VotingPeriod::Locked
        ));
        assert!(!is_valid_period_transition(
            VotingPeriod::Locked,
            VotingPeriod::Open
        ));
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status(None), VotingStatus::default());
        assert!(parse_status(Some(json!({ "isLocked": true }))).is_locked);
        assert_eq!(
            parse_status(Some(json!({ "isLocked": "yes" }))),
            VotingStatus::default()
        );
    }

    #[tokio::test]
    async fn test_missing_status_is_open() {
        let (state, _) = test_state(ResubmitPolicy::AllowOverwrite);
        assert_eq!(
            state.voting_status().await.unwrap().period(),
            VotingPeriod::Open
        );
    }

    #[tokio::test]
    async fn test_lock_snapshots_standings() {
        let (state, store) = test_state(ResubmitPolicy::AllowOverwrite);
        e2e_votes(&state).await;

        let status = state.lock_voting(&admin()).await.unwrap();
        assert!(status.is_locked);
        assert!(status.locked_at.is_some());
        assert_eq!(status.locked_by.as_deref(), Some("security-code"));
        let snapshot = status.final_standings.clone().unwrap();
        let scores: Vec<_> = snapshot
            .iter()
            .map(|s| (s.candidate_id.as_str(), s.total_score))
            .collect();
        assert_eq!(scores, vec![("v1", 8), ("v2", 8), ("v3", 5), ("v4", 5)]);
        assert_eq!(status.final_total_votes, Some(2));

        // A stray late write changes live totals but not the final view
        store
            .set(&state.paths.vote("late"), json!({ "points": { "v4": 100 } }))
            .await
            .unwrap();
        assert_eq!(state.current_tally().await.unwrap().total_votes, 3);
        let view = state.dashboard().await.unwrap();
        assert!(view.is_final);
        assert_eq!(view.standings, snapshot);
        assert_eq!(view.total_votes, 2);
        assert_eq!(view.progress_percent, 1);

        assert!(matches!(
            state.lock_voting(&admin()).await,
            Err(AdminError::InvalidTransition(_))
        ));
    }

    #[tokio::test]
    async fn test_reset_clears_votes_and_reopens() {
        let (state, _) = test_state(ResubmitPolicy::AllowOverwrite);
        e2e_votes(&state).await;
        state.lock_voting(&admin()).await.unwrap();

        let deleted = state.reset_all_votes(&admin()).await.unwrap();
        assert_eq!(deleted, 2);

        let status = state.voting_status().await.unwrap();
        assert!(!status.is_locked);
        assert!(status.final_standings.is_none());
        assert!(status.reset_at.is_some());
        assert_eq!(status.reset_by.as_deref(), Some("security-code"));

        let tally = state.current_tally().await.unwrap();
        assert_eq!(tally.total_votes, 0);
        assert!(tally.standings.iter().all(|s| s.total_score == 0));

        // Reset also works while open
        assert_eq!(state.reset_all_votes(&admin()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_locks_apply_once() {
        let (state, _) = test_state(ResubmitPolicy::AllowOverwrite);
        e2e_votes(&state).await;

        let (admin_a, admin_b) = (admin(), admin());
        let (a, b) = tokio::join!(state.lock_voting(&admin_a), state.lock_voting(&admin_b));
        let (won, lost) = match (a, b) {
            (Ok(won), Err(lost)) | (Err(lost), Ok(won)) => (won, lost),
            other => panic!("expected exactly one lock to succeed: {:?}", other),
        };
        assert!(matches!(lost, AdminError::InvalidTransition(_)));
        assert_eq!(state.voting_status().await.unwrap(), won);
    }

    #[tokio::test]
    async fn test_failed_reset_keeps_period_and_can_be_retried() {
        let (state, store) = test_state(ResubmitPolicy::AllowOverwrite);
        e2e_votes(&state).await;
        state.lock_voting(&admin()).await.unwrap();

        store.fail_writes_after(1);
        assert!(matches!(
            state.reset_all_votes(&admin()).await,
            Err(AdminError::Store(_))
        ));
        assert!(state.voting_status().await.unwrap().is_locked);
        assert_eq!(state.vote_records().await.unwrap().len(), 1);

        store.set_available(true);
        assert_eq!(state.reset_all_votes(&admin()).await.unwrap(), 1);
        assert!(!state.voting_status().await.unwrap().is_locked);
        assert_eq!(state.vote_records().await.unwrap().len(), 0);
    }

    #[test]
    fn test_voting_progress() {
        assert_eq!(voting_progress(0, 250), 0);
        assert_eq!(voting_progress(125, 250), 50);
        assert_eq!(voting_progress(1, 3), 33);
        assert_eq!(voting_progress(300, 250), 120);
        assert_eq!(voting_progress(5, 0), 0);
    }

    #[tokio::test]
    async fn test_period_changes_need_admin() {
        let (state, _) = test_state(ResubmitPolicy::AllowOverwrite);
        let nobody = AdminCredential::default();
        assert!(matches!(
            state.lock_voting(&nobody).await,
            Err(AdminError::Unauthorized)
        ));
        assert!(matches!(
            state.reset_all_votes(&nobody).await,
            Err(AdminError::Unauthorized)
        ));
        assert!(!state.voting_status().await.unwrap().is_locked);
    }

    #[tokio::test]
    async fn test_status_subscription_sees_lock() {
        let (state, _) = test_state(ResubmitPolicy::AllowOverwrite);
        let mut sub = state.subscribe_voting_status().await.unwrap();
        assert!(!parse_status(sub.next().await.unwrap()).is_locked);

        state.lock_voting(&admin()).await.unwrap();
        assert!(parse_status(sub.next().await.unwrap()).is_locked);
    }

    #[test]
    fn test_dashboard_view_falls_back_to_live() {
        let config = crate::config::VotingConfig::default();
        let live = Tally::empty(&config);
        let locked = VotingStatus {
            is_locked: true,
            ..VotingStatus::default()
        };
        let view = dashboard_view(&locked, &live, 4);
        assert!(!view.is_final);
        assert_eq!(view.standings, live.standings);
        assert_eq!(view.expected_voters, 4);
        assert_eq!(view.progress_percent, 0);
    }
}
