use super::AppState;
use crate::allowlist::normalize_email;
use crate::config::ResubmitPolicy;
use crate::store::{StoreError, StoreResult, Subscription};
use crate::types::*;
use crate::validation::{check_known_candidates, validate, ValidationError, ValidationResult};
use serde_json::Value;

/// Why a vote was not recorded
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Voting is closed")]
    VotingLocked,

    #[error("A vote has already been recorded for this account")]
    AlreadyVoted,

    #[error("Signed in as {signed_in}, cannot vote as {voter_id}")]
    IdentityMismatch { voter_id: String, signed_in: String },

    #[error("Could not save the vote: {0}")]
    Store(#[from] StoreError),
}

impl SubmissionError {
    /// Only store failures are worth retrying with the same ballot
    pub fn is_retryable(&self) -> bool {
        matches!(self, SubmissionError::Store(_))
    }
}

impl AppState {
    pub fn validate_selections(&self, selections: &Selections) -> ValidationResult {
        validate(selections, &self.config)
    }

    /// Build the record a voter's ballot would be stored as.
    /// Every point value is scaled by the voter's multiplier.
    pub fn build_vote_record(
        &self,
        voter_id: &str,
        identity: &Identity,
        selections: Selections,
    ) -> VoteRecord {
        let email = identity
            .email
            .as_deref()
            .map(normalize_email)
            .filter(|e| !e.is_empty());
        let grant = email
            .as_deref()
            .map(|e| self.roles.lookup(e))
            .unwrap_or_default();

        let points = selections
            .iter()
            .filter_map(|(id, award)| {
                let base = self.config.point_value(*award);
                (base > 0).then(|| (id.clone(), base.saturating_mul(grant.multiplier)))
            })
            .collect();

        VoteRecord {
            voter_id: voter_id.to_string(),
            email,
            display_name: identity.display_name.clone(),
            selections,
            points,
            multiplier: grant.multiplier,
            role: grant.role,
            submitted_at: Some(chrono::Utc::now().to_rfc3339()),
        }
    }

    /// Validate and persist a ballot for `voter_id`, which must be the
    /// signed-in identity's uid.
    ///
    /// The record is keyed by voter id, so there is never more than one per
    /// voter. Under `AllowOverwrite` a resubmission replaces the earlier
    /// record; under `RejectDuplicate` it fails with `AlreadyVoted`.
    pub async fn submit_vote(
        &self,
        voter_id: &str,
        identity: &Identity,
        selections: Selections,
    ) -> Result<VoteRecord, SubmissionError> {
        if identity.uid != voter_id {
            tracing::warn!("Refusing vote for {} from {}", voter_id, identity.uid);
            return Err(SubmissionError::IdentityMismatch {
                voter_id: voter_id.to_string(),
                signed_in: identity.uid.clone(),
            });
        }
        check_known_candidates(&selections, &self.config)?;
        self.validate_selections(&selections).into_result()?;

        if self.voting_status().await?.is_locked {
            tracing::info!("Refusing vote from {}: voting is locked", voter_id);
            return Err(SubmissionError::VotingLocked);
        }

        let record = self.build_vote_record(voter_id, identity, selections);
        let path = self.paths.vote(voter_id);
        let value = serde_json::to_value(&record).map_err(StoreError::from)?;

        match self.resubmit_policy {
            ResubmitPolicy::AllowOverwrite => {
                if self.store.get(&path).await?.is_some() {
                    tracing::info!("Overwriting earlier vote of {}", voter_id);
                }
                self.store.set(&path, value).await?;
            }
            ResubmitPolicy::RejectDuplicate => {
                if !self.store.create_if_absent(&path, value).await? {
                    tracing::info!("Rejecting duplicate vote from {}", voter_id);
                    return Err(SubmissionError::AlreadyVoted);
                }
            }
        }

        tracing::info!(
            "Vote recorded for {} (multiplier {}, role {:?})",
            voter_id,
            record.multiplier,
            record.role
        );
        Ok(record)
    }

    /// Whether a vote record exists for `voter_id`
    pub async fn has_voted(&self, voter_id: &str) -> StoreResult<bool> {
        Ok(self.store.get(&self.paths.vote(voter_id)).await?.is_some())
    }

    /// Live variant of [`AppState::has_voted`]; each item is the raw record
    /// or None, so `is_some()` answers the question
    pub async fn subscribe_has_voted(
        &self,
        voter_id: &str,
    ) -> StoreResult<Subscription<Option<Value>>> {
        self.store.subscribe_document(&self.paths.vote(voter_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::{admin, ballot, full_ballot, identity, test_state};

    #[tokio::test]
    async fn test_submit_vote_persists_record() {
        let (state, _) = test_state(ResubmitPolicy::AllowOverwrite);
        let alice = identity("alice", "Alice@Corp.example");

        assert!(!state.has_voted("alice").await.unwrap());
        let record = state
            .submit_vote("alice", &alice, full_ballot())
            .await
            .unwrap();

        assert_eq!(record.voter_id, "alice");
        assert_eq!(record.email.as_deref(), Some("alice@corp.example"));
        assert_eq!(record.display_name.as_deref(), Some("ALICE"));
        assert_eq!(record.multiplier, 1);
        assert_eq!(record.role, None);
        assert_eq!(record.points.get("v1"), Some(&5));
        assert_eq!(record.points.get("v4"), Some(&2));
        assert!(record.submitted_at.is_some());
        assert!(state.has_voted("alice").await.unwrap());

        let stored: VoteRecord = crate::store::read_doc(&*state.store, &state.paths.vote("alice"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored, record);
    }

    #[tokio::test]
    async fn test_multiplier_scales_points() {
        let (state, _) = test_state(ResubmitPolicy::AllowOverwrite);
        let ceo = identity("ceo", "ceo@corp.example");
        let mut selections = full_ballot();
        selections.insert("v1".to_string(), Award::First);
        selections.insert("v2".to_string(), Award::Third);

        let record = state.submit_vote("ceo", &ceo, selections).await.unwrap();
        assert_eq!(record.multiplier, 10);
        assert_eq!(record.role.as_deref(), Some("board"));
        assert_eq!(record.points.get("v1"), Some(&50));
        assert_eq!(record.points.get("v2"), Some(&20));
    }

    #[tokio::test]
    async fn test_invalid_ballots_are_rejected_before_writing() {
        let (state, _) = test_state(ResubmitPolicy::AllowOverwrite);
        let alice = identity("alice", "alice@corp.example");

        let partial = ballot(&[("v1", Award::First)]);
        let err = state.submit_vote("alice", &alice, partial).await.unwrap_err();
        assert!(matches!(
            err,
            SubmissionError::Validation(ValidationError::Incomplete)
        ));
        assert!(!err.is_retryable());

        let two_firsts = ballot(&[
            ("v1", Award::First),
            ("v2", Award::First),
            ("v3", Award::Third),
            ("v4", Award::Third),
        ]);
        let err = state
            .submit_vote("alice", &alice, two_firsts)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SubmissionError::Validation(ValidationError::LimitExceeded(_))
        ));

        let mut unknown = full_ballot();
        unknown.insert("v9".to_string(), Award::Third);
        let err = state.submit_vote("alice", &alice, unknown).await.unwrap_err();
        assert!(matches!(
            err,
            SubmissionError::Validation(ValidationError::UnknownCandidate(_))
        ));

        assert!(!state.has_voted("alice").await.unwrap());
    }

    #[tokio::test]
    async fn test_resubmit_overwrites_by_default() {
        let (state, _) = test_state(ResubmitPolicy::AllowOverwrite);
        let alice = identity("alice", "alice@corp.example");

        state
            .submit_vote("alice", &alice, full_ballot())
            .await
            .unwrap();
        let second = ballot(&[
            ("v1", Award::Third),
            ("v2", Award::Third),
            ("v3", Award::Second),
            ("v4", Award::First),
        ]);
        state.submit_vote("alice", &alice, second).await.unwrap();

        let records = state.vote_records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].points.get("v4"), Some(&5));
    }

    #[tokio::test]
    async fn test_concurrent_submissions_collapse_to_one_record() {
        let (state, _) = test_state(ResubmitPolicy::AllowOverwrite);
        let alice = identity("alice", "alice@corp.example");

        let (a, b) = tokio::join!(
            state.submit_vote("alice", &alice, full_ballot()),
            state.submit_vote("alice", &alice, full_ballot()),
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(state.vote_records().await.unwrap().len(), 1);
        assert_eq!(state.current_tally().await.unwrap().total_votes, 1);
    }

    #[tokio::test]
    async fn test_reject_duplicate_policy() {
        let (state, _) = test_state(ResubmitPolicy::RejectDuplicate);
        let alice = identity("alice", "alice@corp.example");

        let (a, b) = tokio::join!(
            state.submit_vote("alice", &alice, full_ballot()),
            state.submit_vote("alice", &alice, full_ballot()),
        );
        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);

        let err = state
            .submit_vote("alice", &alice, full_ballot())
            .await
            .unwrap_err();
        assert!(matches!(err, SubmissionError::AlreadyVoted));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_locked_period_refuses_votes() {
        let (state, _) = test_state(ResubmitPolicy::AllowOverwrite);
        state.lock_voting(&admin()).await.unwrap();

        let err = state
            .submit_vote("bob", &identity("bob", "bob@corp.example"), full_ballot())
            .await
            .unwrap_err();
        assert!(matches!(err, SubmissionError::VotingLocked));
        assert!(!state.has_voted("bob").await.unwrap());
    }

    #[tokio::test]
    async fn test_store_failure_is_retryable() {
        let (state, store) = test_state(ResubmitPolicy::AllowOverwrite);
        store.set_available(false);

        let err = state
            .submit_vote("bob", &identity("bob", "bob@corp.example"), full_ballot())
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        store.set_available(true);
        assert!(state
            .submit_vote("bob", &identity("bob", "bob@corp.example"), full_ballot())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_vote_for_another_voter_is_refused() {
        let (state, _) = test_state(ResubmitPolicy::AllowOverwrite);
        let alice = identity("alice", "alice@corp.example");

        let err = state
            .submit_vote("bob", &alice, full_ballot())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SubmissionError::IdentityMismatch { ref voter_id, ref signed_in }
                if voter_id == "bob" && signed_in == "alice"
        ));
        assert!(!err.is_retryable());
        assert!(!state.has_voted("bob").await.unwrap());
        assert!(!state.has_voted("alice").await.unwrap());
    }

    #[tokio::test]
    async fn test_subscribe_has_voted() {
        let (state, _) = test_state(ResubmitPolicy::AllowOverwrite);
        let mut sub = state.subscribe_has_voted("bob").await.unwrap();
        assert!(sub.next().await.unwrap().is_none());

        state
            .submit_vote("bob", &identity("bob", "bob@corp.example"), full_ballot())
            .await
            .unwrap();
        assert!(sub.next().await.unwrap().is_some());
    }

    #[test]
    fn test_identity_without_email_gets_default_weight() {
        let (state, _) = test_state(ResubmitPolicy::AllowOverwrite);
        let anon = Identity {
            uid: "anon".to_string(),
            email: None,
            display_name: None,
        };
        let record = state.build_vote_record("anon", &anon, full_ballot());
        assert_eq!(record.multiplier, 1);
        assert_eq!(record.email, None);
        assert_eq!(record.points.len(), 4);
    }
}
