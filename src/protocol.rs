use crate::state::DashboardView;
use crate::types::*;
use serde::{Deserialize, Serialize};

/// Version reported in the welcome message
pub const PROTOCOL_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ask for the current view again, e.g. after a gap in updates
    Refresh,
}

/// Messages pushed to dashboard clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum DashboardMessage {
    Welcome {
        protocol: String,
        view: DashboardView,
        server_now: String,
    },
    Standings {
        standings: Vec<Standing>,
        total_votes: usize,
        /// Standings are the lock-time snapshot
        is_final: bool,
        expected_voters: u32,
        progress_percent: u32,
        /// When the server produced this update
        updated_at: String,
        seq: u64,
    },
    VotingStatus {
        status: VotingStatus,
    },
    Error {
        code: String,
        msg: String,
    },
}

impl DashboardMessage {
    pub fn welcome(view: DashboardView) -> Self {
        DashboardMessage::Welcome {
            protocol: PROTOCOL_VERSION.to_string(),
            view,
            server_now: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn standings(view: DashboardView, seq: u64) -> Self {
        DashboardMessage::Standings {
            standings: view.standings,
            total_votes: view.total_votes,
            is_final: view.is_final,
            expected_voters: view.expected_voters,
            progress_percent: view.progress_percent,
            updated_at: chrono::Utc::now().to_rfc3339(),
            seq,
        }
    }

    pub fn error(code: &str, msg: impl Into<String>) -> Self {
        DashboardMessage::Error {
            code: code.to_string(),
            msg: msg.into(),
        }
    }
}
