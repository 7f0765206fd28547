use super::AppState;
use crate::config::VotingConfig;
use crate::store::{CollectionSnapshot, Document, StoreResult, Subscription};
use crate::tally::{tally, Tally};
use crate::types::*;
use std::sync::Arc;

/// Decode vote documents leniently: a document that does not parse still
/// counts as a vote, with no points.
pub fn decode_votes(docs: &[Document]) -> Vec<VoteRecord> {
    docs.iter()
        .map(|doc| {
            let mut record = match serde_json::from_value::<VoteRecord>(doc.data.clone()) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!("Malformed vote document {}: {}", doc.id, e);
                    VoteRecord::default()
                }
            };
            if record.voter_id.is_empty() {
                record.voter_id = doc.id.clone();
            }
            record
        })
        .collect()
}

/// Live standings over the vote collection.
///
/// Holds the previous pass's standings so rank deltas are computed against
/// the last tally this feed produced. Dropping the feed unsubscribes.
pub struct StandingsFeed {
    config: Arc<VotingConfig>,
    subscription: Subscription<CollectionSnapshot>,
    previous: Vec<Standing>,
}

impl StandingsFeed {
    pub fn new(config: Arc<VotingConfig>, subscription: Subscription<CollectionSnapshot>) -> Self {
        Self {
            config,
            subscription,
            previous: Vec::new(),
        }
    }

    /// Continue rank deltas from standings produced by an earlier feed
    pub fn with_previous(mut self, previous: Vec<Standing>) -> Self {
        self.previous = previous;
        self
    }

    /// Wait for the vote collection to change and return the new tally.
    /// The first call tallies the state at subscribe time.
    ///
    /// Snapshots that piled up while waiting are coalesced: only the newest
    /// one is tallied. Returns None once the store closes the feed.
    pub async fn next(&mut self) -> Option<Tally> {
        let snapshot = self.subscription.next().await?;
        let snapshot = self.subscription.try_latest().unwrap_or(snapshot);

        let records = decode_votes(&snapshot);
        let result = tally(&self.config, &self.previous, &records);
        self.previous = result.standings.clone();
        Some(result)
    }

    /// Standings of the last pass, empty before the first
    pub fn previous(&self) -> &[Standing] {
        &self.previous
    }
}

impl AppState {
    pub async fn subscribe_standings(&self) -> StoreResult<StandingsFeed> {
        let subscription = self.store.subscribe_collection(&self.paths.votes()).await?;
        Ok(StandingsFeed::new(self.config.clone(), subscription))
    }

    pub async fn vote_records(&self) -> StoreResult<Vec<VoteRecord>> {
        let docs = self.store.list(&self.paths.votes()).await?;
        Ok(decode_votes(&docs))
    }

    /// One-off tally of the current votes, without rank history
    pub async fn current_tally(&self) -> StoreResult<Tally> {
        let records = self.vote_records().await?;
        Ok(tally(&self.config, &[], &records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResubmitPolicy;
    use crate::state::tests::{ballot, full_ballot, identity, test_state};
    use crate::store::DocumentStore;
    use serde_json::json;

    #[test]
    fn test_decode_votes_is_lenient() {
        let docs = vec![
            Document {
                id: "u1".to_string(),
                data: json!({ "points": { "v1": 5 } }),
            },
            Document {
                id: "u2".to_string(),
                data: json!({ "points": "garbage" }),
            },
            Document {
                id: "u3".to_string(),
                data: json!(42),
            },
        ];

        let records = decode_votes(&docs);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].voter_id, "u1");
        assert_eq!(records[0].points.get("v1"), Some(&5));
        assert_eq!(records[1].voter_id, "u2");
        assert!(records[1].points.is_empty());
        assert!(records[2].points.is_empty());
    }

    #[tokio::test]
    async fn test_feed_tracks_votes_and_rank_deltas() {
        let (state, _) = test_state(ResubmitPolicy::AllowOverwrite);
        let mut feed = state.subscribe_standings().await.unwrap();

        let first = feed.next().await.unwrap();
        assert_eq!(first.total_votes, 0);
        assert!(first.standings.iter().all(|s| s.previous_rank == 0));

        let flipped = ballot(&[
            ("v1", Award::Third),
            ("v2", Award::Third),
            ("v3", Award::Second),
            ("v4", Award::First),
        ]);
        state
            .submit_vote("alice", &identity("alice", "alice@corp.example"), flipped)
            .await
            .unwrap();

        let second = feed.next().await.unwrap();
        assert_eq!(second.total_votes, 1);
        let top = &second.standings[0];
        assert_eq!(top.candidate_id, "v4");
        assert_eq!(top.previous_rank, 4);
        assert_eq!(top.movement(), RankMovement::Up(3));
        assert_eq!(feed.previous(), second.standings.as_slice());
    }

    #[tokio::test]
    async fn test_resumed_feed_keeps_rank_history() {
        let (state, _) = test_state(ResubmitPolicy::AllowOverwrite);
        let mut feed = state.subscribe_standings().await.unwrap();
        feed.next().await.unwrap();
        let flipped = ballot(&[
            ("v1", Award::Third),
            ("v2", Award::Third),
            ("v3", Award::Second),
            ("v4", Award::First),
        ]);
        state
            .submit_vote("alice", &identity("alice", "alice@corp.example"), flipped)
            .await
            .unwrap();
        let before = feed.next().await.unwrap();
        drop(feed);

        let mut resumed = state
            .subscribe_standings()
            .await
            .unwrap()
            .with_previous(before.standings.clone());
        let after = resumed.next().await.unwrap();
        assert_eq!(after.standings[0].candidate_id, "v4");
        assert_eq!(after.standings[0].previous_rank, 1);
        assert!(after.standings.iter().all(|s| s.previous_rank != 0));
    }

    #[tokio::test]
    async fn test_feed_coalesces_pending_snapshots() {
        let (state, _) = test_state(ResubmitPolicy::AllowOverwrite);
        let mut feed = state.subscribe_standings().await.unwrap();

        state
            .submit_vote("alice", &identity("alice", "alice@corp.example"), full_ballot())
            .await
            .unwrap();
        state
            .submit_vote("bob", &identity("bob", "bob@corp.example"), full_ballot())
            .await
            .unwrap();

        // Initial snapshot superseded by the newest pending one
        let tally = feed.next().await.unwrap();
        assert_eq!(tally.total_votes, 2);
        assert_eq!(tally.standings[0].total_score, 10);
    }

    #[tokio::test]
    async fn test_malformed_vote_in_store_is_counted() {
        let (state, store) = test_state(ResubmitPolicy::AllowOverwrite);
        store
            .set(&state.paths.vote("broken"), json!("not a vote"))
            .await
            .unwrap();
        state
            .submit_vote("alice", &identity("alice", "alice@corp.example"), full_ballot())
            .await
            .unwrap();

        let tally = state.current_tally().await.unwrap();
        assert_eq!(tally.total_votes, 2);
        assert_eq!(tally.standings[0].total_score, 5);
    }

    #[tokio::test]
    async fn test_dropping_feed_releases_subscription() {
        let (state, store) = test_state(ResubmitPolicy::AllowOverwrite);
        let feed = state.subscribe_standings().await.unwrap();
        assert_eq!(store.watcher_count().await, 1);
        drop(feed);
        assert_eq!(store.watcher_count().await, 0);
    }
}
