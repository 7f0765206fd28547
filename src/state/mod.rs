mod admin;
mod export;
mod period;
mod standings;
mod vote;

pub use admin::{AdminAuth, AdminCredential, AdminError};
pub use export::{ExportedBallot, ExportedResult, ResultsExport, StatusReport};
pub use period::{dashboard_view, parse_status, voting_progress, DashboardView};
pub use standings::{decode_votes, StandingsFeed};
pub use vote::SubmissionError;

use crate::allowlist::Allowlist;
use crate::config::{AppConfig, ResubmitPolicy, VotingConfig};
use crate::protocol::DashboardMessage;
use crate::roles::{RoleLookup, StaticRoleLookup};
use crate::store::{DocumentStore, StorePaths};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Immutable rule set, fixed at construction
    pub config: Arc<VotingConfig>,
    pub store: Arc<dyn DocumentStore>,
    pub paths: StorePaths,
    pub roles: Arc<dyn RoleLookup>,
    pub allowlist: Arc<Allowlist>,
    pub admin: Arc<AdminAuth>,
    pub resubmit_policy: ResubmitPolicy,
    /// Broadcast channel for sending updates to dashboard clients
    pub dashboard_broadcast: broadcast::Sender<DashboardMessage>,
    /// Held across lock and reset so period changes apply one at a time
    period_guard: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(
        config: VotingConfig,
        store: Arc<dyn DocumentStore>,
        app: &AppConfig,
        local_allowlist: Vec<String>,
    ) -> Self {
        let (tx, _rx) = broadcast::channel(100);
        let paths = StorePaths::new(&app.app_id);
        let allowlist = Allowlist::new(
            local_allowlist,
            store.clone(),
            paths.clone(),
            app.allowlist_cache_ttl,
        )
        .with_allow_all(app.allow_all_emails);

        Self {
            roles: Arc::new(StaticRoleLookup::new(&config.roles)),
            config: Arc::new(config),
            store,
            paths,
            allowlist: Arc::new(allowlist),
            admin: Arc::new(AdminAuth::new(
                app.admin_emails.clone(),
                app.admin_security_code.clone(),
            )),
            resubmit_policy: app.resubmit_policy,
            dashboard_broadcast: tx,
            period_guard: Arc::new(Mutex::new(())),
        }
    }

    /// Swap the role lookup for another policy
    pub fn with_roles(mut self, roles: Arc<dyn RoleLookup>) -> Self {
        self.roles = roles;
        self
    }
}
