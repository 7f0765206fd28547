//! Per-user voting flow.
//!
//! A `VotingSession` walks one signed-in voter from composing a ballot to a
//! stored vote record:
//!
//! ```text
//! Composing -> Confirming -> Submitting -> Submitted
//!                  ^              |
//!                  +--- failure --+
//! ```
//!
//! `AlreadyVoted` and `VotingClosed` are terminal views entered from the
//! live vote-record and voting-status subscriptions the session holds for
//! its lifetime. Dropping the session releases both subscriptions.

use crate::allowlist::AuthorizationError;
use crate::state::{parse_status, AppState, SubmissionError};
use crate::store::{StoreError, Subscription};
use crate::types::*;
use crate::validation::{Ballot, ValidationError, ValidationResult};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Composing,
    Confirming,
    Submitting,
    /// Vote stored during this session
    Submitted,
    /// A vote record already existed (or appeared from another device)
    AlreadyVoted,
    /// Voting is locked and this voter has no record
    VotingClosed,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Cannot {action} while {phase:?}")]
    InvalidTransition {
        action: &'static str,
        phase: SessionPhase,
    },

    #[error(transparent)]
    Authorization(#[from] AuthorizationError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct VotingSession {
    state: AppState,
    identity: Identity,
    ballot: Ballot,
    phase: SessionPhase,
    has_voted: bool,
    is_locked: bool,
    /// Retryable error from the last failed submit
    last_error: Option<String>,
    record: Option<VoteRecord>,
    voted_feed: Subscription<Option<Value>>,
    status_feed: Subscription<Option<Value>>,
}

impl VotingSession {
    /// Start a session for `identity`.
    ///
    /// Fails if the identity is not allowlisted. A voter with an existing
    /// record starts in `AlreadyVoted` and never sees `Composing`.
    pub async fn enter(state: AppState, identity: Identity) -> Result<Self, SessionError> {
        state.allowlist.authorize(&identity).await?;

        // Subscribe before the lookups so no change falls in between
        let voted_feed = state.subscribe_has_voted(&identity.uid).await?;
        let status_feed = state.subscribe_voting_status().await?;
        let has_voted = state.has_voted(&identity.uid).await?;
        let is_locked = state.voting_status().await?.is_locked;

        let mut session = Self {
            ballot: Ballot::new(&state.config),
            state,
            identity,
            phase: SessionPhase::Composing,
            has_voted,
            is_locked,
            last_error: None,
            record: None,
            voted_feed,
            status_feed,
        };
        session.settle();
        tracing::debug!(
            "Session for {} entered in {:?}",
            session.identity.uid,
            session.phase
        );
        Ok(session)
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn ballot(&self) -> &Ballot {
        &self.ballot
    }

    pub fn validation(&self) -> ValidationResult {
        self.ballot.validate(&self.state.config)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Record stored by this session, if any
    pub fn record(&self) -> Option<&VoteRecord> {
        self.record.as_ref()
    }

    fn require(&self, action: &'static str, phase: SessionPhase) -> Result<(), SessionError> {
        if self.phase == phase {
            Ok(())
        } else {
            Err(SessionError::InvalidTransition {
                action,
                phase: self.phase,
            })
        }
    }

    /// Change one candidate's award and re-validate
    pub fn select(
        &mut self,
        candidate_id: &str,
        award: Award,
    ) -> Result<ValidationResult, SessionError> {
        self.require("change selections", SessionPhase::Composing)?;
        self.ballot.select(candidate_id, award)?;
        Ok(self.validation())
    }

    /// Move to confirmation; only a complete ballot within all caps may
    pub fn request_confirmation(&mut self) -> Result<(), SessionError> {
        self.sync();
        self.require("confirm", SessionPhase::Composing)?;
        self.validation().into_result()?;
        self.phase = SessionPhase::Confirming;
        Ok(())
    }

    /// Return from confirmation to editing, keeping the ballot
    pub fn back(&mut self) -> Result<(), SessionError> {
        self.require("go back", SessionPhase::Confirming)?;
        self.phase = SessionPhase::Composing;
        Ok(())
    }

    /// Store the confirmed ballot.
    ///
    /// A retryable failure leaves the session in `Confirming` with the
    /// ballot intact, so calling `submit` again retries.
    pub async fn submit(&mut self) -> Result<VoteRecord, SessionError> {
        self.sync();
        self.require("submit", SessionPhase::Confirming)?;

        self.phase = SessionPhase::Submitting;
        self.last_error = None;
        let result = self
            .state
            .submit_vote(
                &self.identity.uid,
                &self.identity,
                self.ballot.selections().clone(),
            )
            .await;

        match result {
            Ok(record) => {
                self.phase = SessionPhase::Submitted;
                self.has_voted = true;
                self.record = Some(record.clone());
                Ok(record)
            }
            Err(e) => {
                match &e {
                    SubmissionError::VotingLocked => {
                        self.is_locked = true;
                        self.phase = SessionPhase::VotingClosed;
                    }
                    SubmissionError::AlreadyVoted => {
                        self.has_voted = true;
                        self.phase = SessionPhase::AlreadyVoted;
                    }
                    SubmissionError::Validation(_) => self.phase = SessionPhase::Composing,
                    SubmissionError::IdentityMismatch { .. } => {
                        self.last_error = Some(e.to_string());
                        self.phase = SessionPhase::Confirming;
                    }
                    SubmissionError::Store(_) => {
                        tracing::warn!("Vote for {} not saved: {}", self.identity.uid, e);
                        self.last_error = Some(e.to_string());
                        self.phase = SessionPhase::Confirming;
                    }
                }
                Err(e.into())
            }
        }
    }

    /// Apply pending subscription updates without waiting.
    /// Returns whether the phase changed.
    pub fn sync(&mut self) -> bool {
        if let Some(doc) = self.voted_feed.try_latest() {
            self.has_voted = doc.is_some();
        }
        if let Some(doc) = self.status_feed.try_latest() {
            self.is_locked = parse_status(doc).is_locked;
        }
        self.settle()
    }

    /// Wait for the vote record or voting status to change, then return
    /// the resulting phase. None once the store closes a feed.
    pub async fn changed(&mut self) -> Option<SessionPhase> {
        tokio::select! {
            doc = self.voted_feed.next() => self.has_voted = doc?.is_some(),
            doc = self.status_feed.next() => self.is_locked = parse_status(doc?).is_locked,
        }
        self.sync();
        Some(self.phase)
    }

    /// Derive the phase from the live flags. Returns whether it changed.
    fn settle(&mut self) -> bool {
        use SessionPhase::*;

        let before = self.phase;
        self.phase = match (self.phase, self.has_voted, self.is_locked) {
            // An in-flight submit settles on its own result
            (Submitting, _, _) => Submitting,
            (Submitted, true, _) => Submitted,
            (_, true, _) => AlreadyVoted,
            // The record is gone again: votes were reset
            (Submitted | AlreadyVoted, false, locked) => {
                self.ballot = Ballot::new(&self.state.config);
                self.record = None;
                if locked {
                    VotingClosed
                } else {
                    Composing
                }
            }
            (Composing | Confirming, false, true) => VotingClosed,
            (VotingClosed, false, false) => Composing,
            (phase, false, _) => phase,
        };

        if self.phase != before {
            tracing::debug!(
                "Session for {}: {:?} -> {:?}",
                self.identity.uid,
                before,
                self.phase
            );
        }
        self.phase != before
    }
}
