use crate::protocol::DashboardMessage;
use crate::state::{dashboard_view, parse_status, AppState};
use crate::store::StoreResult;
use crate::tally::Tally;
use crate::types::Standing;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Pause before resubscribing after the store feed ends or fails
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(2);

/// Spawn a background task that pushes standings and voting status to
/// dashboard clients whenever votes or the status document change
pub fn spawn_dashboard_broadcaster(state: Arc<AppState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut seq = 0u64;
        // Kept across resubscribes so rank movement carries on
        let mut previous: Vec<Standing> = Vec::new();

        loop {
            match run_dashboard_feed(&state, &mut seq, &mut previous).await {
                Ok(()) => tracing::warn!("Dashboard feed closed, resubscribing"),
                Err(e) => {
                    // Clients keep their last view until the feed is back
                    tracing::error!("Dashboard feed failed: {}", e);
                    let _ = state
                        .dashboard_broadcast
                        .send(DashboardMessage::error("FEED_ERROR", e.to_string()));
                }
            }
            tokio::time::sleep(RESUBSCRIBE_DELAY).await;
        }
    })
}

async fn run_dashboard_feed(
    state: &AppState,
    seq: &mut u64,
    previous: &mut Vec<Standing>,
) -> StoreResult<()> {
    let mut status_feed = state.subscribe_voting_status().await?;
    let mut feed = state
        .subscribe_standings()
        .await?
        .with_previous(previous.clone());
    tracing::debug!("Dashboard feed subscribed");

    // No standings go out until the period is known
    let Some(doc) = status_feed.next().await else {
        return Ok(());
    };
    let mut status = parse_status(doc);
    let _ = state.dashboard_broadcast.send(DashboardMessage::VotingStatus {
        status: status.clone(),
    });
    let mut live: Option<Tally> = None;

    loop {
        tokio::select! {
            tally = feed.next() => {
                let Some(tally) = tally else { return Ok(()) };
                tracing::debug!("Standings recomputed: {} votes", tally.total_votes);
                *previous = tally.standings.clone();
                live = Some(tally);
            }
            doc = status_feed.next() => {
                let Some(doc) = doc else { return Ok(()) };
                status = parse_status(doc);
                // Ignore send errors (no receivers connected is fine)
                let _ = state.dashboard_broadcast.send(DashboardMessage::VotingStatus {
                    status: status.clone(),
                });
            }
        }

        if let Some(live) = &live {
            *seq += 1;
            let view = dashboard_view(&status, live, state.config.expected_voters);
            let _ = state
                .dashboard_broadcast
                .send(DashboardMessage::standings(view, *seq));
        }
    }
}
