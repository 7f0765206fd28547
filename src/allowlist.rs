//! Email allowlist
//!
//! Decides whether a signed-in identity may use the system. Two sources:
//! - a local list loaded at startup (default)
//! - a remote list replicated in the document store, used whenever its
//!   metadata document exists; cached for a TTL, with the local list as
//!   fallback when the store cannot be read
//!
//! Also hosts the admin-side sync that reconciles the remote list with a
//! desired set of emails.

use crate::store::{DocumentStore, StorePaths, StoreResult};
use crate::types::Identity;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Reasons an identity is refused access
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AuthorizationError {
    #[error("The signed-in account has no email address")]
    MissingEmail,

    #[error("{0} is not allowed to access this vote")]
    NotAllowed(String),
}

/// Trim and lowercase an email for comparisons
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn looks_like_email(candidate: &str) -> bool {
    let Some((local, domain)) = candidate.split_once('@') else {
        return false;
    };
    let clean = |s: &str| !s.is_empty() && !s.contains('@') && !s.contains(char::is_whitespace);
    clean(local)
        && clean(domain)
        && domain
            .char_indices()
            .any(|(i, c)| c == '.' && i > 0 && i < domain.len() - 1)
}

/// Pull one email per line out of comma or tab separated text.
///
/// A first line without an email but mentioning "mail" is treated as a
/// header. Results are lowercased and de-duplicated in first-seen order.
pub fn extract_emails(text: &str) -> Vec<String> {
    let cells = |line: &str| -> Vec<String> {
        line.split([',', '\t'])
            .map(|part| part.trim().replace(['"', '\''], ""))
            .collect()
    };

    let mut lines = text.lines().peekable();
    if let Some(first) = lines.peek() {
        let first = first.trim().to_lowercase();
        let has_email = cells(&first).iter().any(|c| looks_like_email(c));
        if !has_email && first.contains("mail") {
            lines.next();
        }
    }

    let mut seen = HashSet::new();
    let mut emails = Vec::new();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(email) = cells(line).into_iter().find(|c| looks_like_email(c)) {
            let email = email.to_lowercase();
            if seen.insert(email.clone()) {
                emails.push(email);
            }
        }
    }
    emails
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AllowlistSource {
    /// Allowlist disabled, everyone is let in
    Bypass,
    /// No usable email to check
    Invalid,
    Remote,
    Local,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AllowlistDecision {
    pub allowed: bool,
    pub source: AllowlistSource,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AllowlistStats {
    pub source: AllowlistSource,
    pub total_count: usize,
    pub last_updated: Option<String>,
}

/// Remote metadata document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AllowlistMeta {
    #[serde(default)]
    total_count: usize,
    #[serde(default)]
    last_updated: Option<String>,
}

/// Planned changes to the remote list
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AllowlistDiff {
    pub to_add: Vec<String>,
    pub to_remove: Vec<String>,
    pub unchanged: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct SyncOptions {
    /// Only compute the diff
    #[serde(default)]
    pub dry_run: bool,
    /// Keep remote entries that are missing from the desired list
    #[serde(default)]
    pub no_delete: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SyncReport {
    pub diff: AllowlistDiff,
    pub added: usize,
    pub removed: usize,
    pub total: usize,
    pub dry_run: bool,
}

struct CachedList {
    fetched_at: Instant,
    emails: Arc<HashSet<String>>,
}

pub struct Allowlist {
    local: Arc<HashSet<String>>,
    allow_all: bool,
    store: Arc<dyn DocumentStore>,
    paths: StorePaths,
    cache_ttl: Duration,
    cache: RwLock<Option<CachedList>>,
}

impl Allowlist {
    pub fn new(
        local: impl IntoIterator<Item = String>,
        store: Arc<dyn DocumentStore>,
        paths: StorePaths,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            local: Arc::new(local.into_iter().map(|e| normalize_email(&e)).collect()),
            allow_all: false,
            store,
            paths,
            cache_ttl,
            cache: RwLock::new(None),
        }
    }

    /// Let every email in. Testing only.
    pub fn with_allow_all(mut self, allow_all: bool) -> Self {
        self.allow_all = allow_all;
        self
    }

    /// Read a local allowlist file (plain list or CSV)
    pub fn load_local_file(path: &Path) -> std::io::Result<Vec<String>> {
        let content = std::fs::read_to_string(path)?;
        Ok(extract_emails(&content))
    }

    /// Check whether `email` may use the system
    pub async fn check(&self, email: Option<&str>) -> AllowlistDecision {
        if self.allow_all {
            return AllowlistDecision {
                allowed: true,
                source: AllowlistSource::Bypass,
            };
        }

        let email = email.map(normalize_email).filter(|e| !e.is_empty());
        let Some(email) = email else {
            return AllowlistDecision {
                allowed: false,
                source: AllowlistSource::Invalid,
            };
        };

        if self.is_remote().await {
            let (emails, source) = self.remote_emails().await;
            return AllowlistDecision {
                allowed: emails.contains(&email),
                source,
            };
        }

        AllowlistDecision {
            allowed: self.local.contains(&email),
            source: AllowlistSource::Local,
        }
    }

    /// Gate an identity; returns its normalized email when allowed
    pub async fn authorize(&self, identity: &Identity) -> Result<String, AuthorizationError> {
        let email = identity
            .email
            .as_deref()
            .map(normalize_email)
            .filter(|e| !e.is_empty());

        if self.allow_all {
            return Ok(email.unwrap_or_default());
        }

        let email = email.ok_or(AuthorizationError::MissingEmail)?;
        let decision = self.check(Some(&email)).await;
        if decision.allowed {
            tracing::debug!("{} allowed via {:?} allowlist", email, decision.source);
            Ok(email)
        } else {
            tracing::info!("{} rejected by {:?} allowlist", email, decision.source);
            Err(AuthorizationError::NotAllowed(email))
        }
    }

    /// Drop the cached remote list
    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    async fn is_remote(&self) -> bool {
        match self.store.get(&self.paths.allowlist_meta()).await {
            Ok(meta) => meta.is_some(),
            Err(e) => {
                tracing::warn!("Could not read allowlist metadata, using local list: {}", e);
                false
            }
        }
    }

    /// Remote list from cache or store, local list if the store fails
    async fn remote_emails(&self) -> (Arc<HashSet<String>>, AllowlistSource) {
        if let Some(cached) = self.cache.read().await.as_ref() {
            if cached.fetched_at.elapsed() < self.cache_ttl {
                return (cached.emails.clone(), AllowlistSource::Remote);
            }
        }

        match self.fetch_remote().await {
            Ok(emails) => {
                let emails = Arc::new(emails);
                *self.cache.write().await = Some(CachedList {
                    fetched_at: Instant::now(),
                    emails: emails.clone(),
                });
                (emails, AllowlistSource::Remote)
            }
            Err(e) => {
                tracing::warn!("Failed to fetch remote allowlist, using local list: {}", e);
                (self.local.clone(), AllowlistSource::Local)
            }
        }
    }

    async fn fetch_remote(&self) -> StoreResult<HashSet<String>> {
        let docs = self.store.list(&self.paths.allowlist()).await?;
        Ok(docs
            .iter()
            .filter_map(|d| d.data.get("email").and_then(|e| e.as_str()))
            .map(normalize_email)
            .collect())
    }

    pub async fn stats(&self) -> StoreResult<AllowlistStats> {
        let meta = self.store.get(&self.paths.allowlist_meta()).await?;
        Ok(match meta {
            Some(value) => {
                let meta: AllowlistMeta = serde_json::from_value(value).unwrap_or_default();
                AllowlistStats {
                    source: AllowlistSource::Remote,
                    total_count: meta.total_count,
                    last_updated: meta.last_updated,
                }
            }
            None => AllowlistStats {
                source: AllowlistSource::Local,
                total_count: self.local.len(),
                last_updated: None,
            },
        })
    }

    /// Compare the desired emails with the remote list
    pub async fn plan_sync(&self, desired: &[String]) -> StoreResult<AllowlistDiff> {
        let current = self.fetch_remote().await?;

        let mut seen = HashSet::new();
        let desired: Vec<String> = desired
            .iter()
            .map(|e| normalize_email(e))
            .filter(|e| !e.is_empty() && seen.insert(e.clone()))
            .collect();

        let (unchanged, to_add): (Vec<String>, Vec<String>) =
            desired.into_iter().partition(|e| current.contains(e));

        let mut to_remove: Vec<String> = current.into_iter().filter(|e| !seen.contains(e)).collect();
        to_remove.sort();

        Ok(AllowlistDiff {
            to_add,
            to_remove,
            unchanged,
        })
    }

    /// Reconcile the remote list with `desired`, then rewrite the metadata
    pub async fn sync(&self, desired: &[String], options: SyncOptions) -> StoreResult<SyncReport> {
        let diff = self.plan_sync(desired).await?;
        self.apply_sync(diff, options).await
    }

    pub async fn apply_sync(
        &self,
        diff: AllowlistDiff,
        options: SyncOptions,
    ) -> StoreResult<SyncReport> {
        let total = diff.to_add.len() + diff.unchanged.len();
        tracing::info!(
            "Allowlist sync: +{} -{} ={} (dry_run={}, no_delete={})",
            diff.to_add.len(),
            diff.to_remove.len(),
            diff.unchanged.len(),
            options.dry_run,
            options.no_delete
        );

        if options.dry_run {
            return Ok(SyncReport {
                diff,
                added: 0,
                removed: 0,
                total,
                dry_run: true,
            });
        }

        let now = chrono::Utc::now().to_rfc3339();
        for email in &diff.to_add {
            self.store
                .set(
                    &self.paths.allowlist_entry(email),
                    json!({ "email": email, "addedAt": now }),
                )
                .await?;
        }

        let mut removed = 0;
        if !options.no_delete {
            for email in &diff.to_remove {
                self.store.delete(&self.paths.allowlist_entry(email)).await?;
                removed += 1;
            }
        }

        self.store
            .set(
                &self.paths.allowlist_meta(),
                json!({
                    "totalCount": total,
                    "lastUpdated": now,
                    "source": "csv_sync",
                    "added": diff.to_add.len(),
                    "deleted": removed,
                }),
            )
            .await?;
        self.invalidate().await;

        Ok(SyncReport {
            added: diff.to_add.len(),
            removed,
            total,
            dry_run: false,
            diff,
        })
    }
}
