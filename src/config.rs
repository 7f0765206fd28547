//! Voting rules and process configuration
//!
//! `VotingConfig` is the immutable rule set (candidates, award tiers,
//! privileged roles) handed to the validation engine, the submission
//! workflow and the tally at construction time. `AppConfig` holds the
//! process-level settings read from the environment.

use crate::types::{Award, Candidate, TierRule};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Errors that can occur while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Set of emails whose votes carry extra weight
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrivilegedRole {
    pub role: String,
    pub multiplier: u32,
    pub emails: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VotingConfig {
    /// Candidates in display order; ties in the ranking keep this order
    pub candidates: Vec<Candidate>,
    /// Rules for every award except `none`
    pub tiers: Vec<TierRule>,
    #[serde(default)]
    pub roles: Vec<PrivilegedRole>,
    /// Head count the dashboard measures voting progress against
    #[serde(default = "default_expected_voters")]
    pub expected_voters: u32,
}

fn default_expected_voters() -> u32 {
    250
}

impl Default for VotingConfig {
    fn default() -> Self {
        let candidate = |id: &str, name: &str, team: &str| Candidate {
            id: id.to_string(),
            name: name.to_string(),
            team: team.to_string(),
        };
        let tier = |award, label: &str, points, limit| TierRule {
            award,
            label: label.to_string(),
            points,
            limit,
        };

        Self {
            candidates: vec![
                candidate("v1", "Reaching Further", "Team Marketing"),
                candidate("v2", "Office Stories", "Team Sales & Admin"),
                candidate("v3", "The Future Is Now", "Team Tech & Product"),
                candidate("v4", "The Guide", "Team BOD"),
            ],
            tiers: vec![
                tier(Award::First, "First Prize", 5, 1),
                tier(Award::Second, "Second Prize", 3, 2),
                tier(Award::Third, "Third Prize", 2, 3),
            ],
            roles: Vec::new(),
            expected_voters: default_expected_voters(),
        }
    }
}

impl VotingConfig {
    pub fn tier(&self, award: Award) -> Option<&TierRule> {
        self.tiers.iter().find(|t| t.award == award)
    }

    /// Points an award is worth; `none` and unconfigured awards are worth 0
    pub fn point_value(&self, award: Award) -> u32 {
        self.tier(award).map(|t| t.points).unwrap_or(0)
    }

    pub fn candidate(&self, id: &str) -> Option<&Candidate> {
        self.candidates.iter().find(|c| c.id == id)
    }

    pub fn has_candidate(&self, id: &str) -> bool {
        self.candidate(id).is_some()
    }

    /// Check internal consistency of the rule set
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.candidates.is_empty() {
            return Err(ConfigError::Invalid("no candidates configured".to_string()));
        }

        let mut ids = HashSet::new();
        for candidate in &self.candidates {
            if candidate.id.trim().is_empty() {
                return Err(ConfigError::Invalid("candidate with empty id".to_string()));
            }
            if !ids.insert(candidate.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate candidate id '{}'",
                    candidate.id
                )));
            }
        }

        let mut awards = HashSet::new();
        for tier in &self.tiers {
            if tier.award.is_none() {
                return Err(ConfigError::Invalid(
                    "the 'none' award cannot have a tier rule".to_string(),
                ));
            }
            if !awards.insert(tier.award) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate tier rule for {:?}",
                    tier.award
                )));
            }
        }

        for role in &self.roles {
            if role.multiplier == 0 {
                return Err(ConfigError::Invalid(format!(
                    "role '{}' has a zero multiplier",
                    role.role
                )));
            }
        }

        Ok(())
    }

    /// Read and validate a JSON rule set
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: VotingConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the rule set from `path`, falling back to the built-in default
    /// when no path is given or the file is unusable
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            tracing::info!("No voting config file set, using built-in defaults");
            return Self::default();
        };

        match Self::from_file(path) {
            Ok(config) => {
                tracing::info!(
                    "Loaded voting config from {} ({} candidates, {} tiers, {} roles)",
                    path.display(),
                    config.candidates.len(),
                    config.tiers.len(),
                    config.roles.len()
                );
                config
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to load voting config from {}: {}. Using built-in defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }
}

/// What happens when a voter who already has a vote record submits again
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResubmitPolicy {
    /// The record is keyed by voter id, so a second write replaces the first
    #[default]
    AllowOverwrite,
    /// A second submission is refused
    RejectDuplicate,
}

impl ResubmitPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "overwrite" | "allow_overwrite" => Some(Self::AllowOverwrite),
            "reject" | "reject_duplicate" => Some(Self::RejectDuplicate),
            _ => None,
        }
    }
}

/// Process configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Tenant identifier that prefixes every document path
    pub app_id: String,
    pub bind_addr: SocketAddr,
    pub voting_config_path: Option<PathBuf>,
    /// Local allowlist file (one email per line, or CSV)
    pub allowed_emails_path: Option<PathBuf>,
    /// Let every email in (testing only)
    pub allow_all_emails: bool,
    pub allowlist_cache_ttl: Duration,
    pub admin_emails: Vec<String>,
    pub admin_security_code: Option<String>,
    pub resubmit_policy: ResubmitPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_id: "default-app".to_string(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            voting_config_path: None,
            allowed_emails_path: None,
            allow_all_emails: false,
            allowlist_cache_ttl: Duration::from_secs(300),
            admin_emails: Vec::new(),
            admin_security_code: None,
            resubmit_policy: ResubmitPolicy::default(),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v != "0" && v.to_lowercase() != "false")
        .unwrap_or(default)
}

impl AppConfig {
    /// Load config from environment variables, keeping defaults for
    /// anything unset or unparsable
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let bind_addr = match env_string("BIND_ADDR") {
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                tracing::warn!("Invalid BIND_ADDR '{}': {}. Using {}", raw, e, defaults.bind_addr);
                defaults.bind_addr
            }),
            None => defaults.bind_addr,
        };

        let allowlist_cache_ttl = env_string("ALLOWLIST_CACHE_SECS")
            .and_then(|raw| match raw.parse::<u64>() {
                Ok(secs) => Some(Duration::from_secs(secs)),
                Err(_) => {
                    tracing::warn!("Invalid ALLOWLIST_CACHE_SECS '{}', using default", raw);
                    None
                }
            })
            .unwrap_or(defaults.allowlist_cache_ttl);

        let admin_emails: Vec<String> = env_string("ADMIN_EMAILS")
            .map(|raw| {
                raw.split(',')
                    .map(|e| e.trim().to_lowercase())
                    .filter(|e| !e.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let admin_security_code = env_string("ADMIN_SECURITY_CODE");

        let resubmit_policy = match env_string("RESUBMIT_POLICY") {
            Some(raw) => ResubmitPolicy::parse(&raw).unwrap_or_else(|| {
                tracing::warn!("Unknown RESUBMIT_POLICY '{}', using overwrite", raw);
                ResubmitPolicy::default()
            }),
            None => ResubmitPolicy::default(),
        };

        let allow_all_emails = env_flag("ALLOW_ALL_EMAILS", false);
        if allow_all_emails {
            tracing::warn!("ALLOW_ALL_EMAILS is set - the allowlist is bypassed!");
        }

        Self {
            app_id: env_string("APP_ID").unwrap_or(defaults.app_id),
            bind_addr,
            voting_config_path: env_string("VOTING_CONFIG_PATH").map(PathBuf::from),
            allowed_emails_path: env_string("ALLOWED_EMAILS_PATH").map(PathBuf::from),
            allow_all_emails,
            allowlist_cache_ttl,
            admin_emails,
            admin_security_code,
            resubmit_policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = VotingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.candidates.len(), 4);
        assert_eq!(config.point_value(Award::First), 5);
        assert_eq!(config.point_value(Award::Second), 3);
        assert_eq!(config.point_value(Award::Third), 2);
        assert_eq!(config.point_value(Award::None), 0);
        assert_eq!(config.tier(Award::Third).map(|t| t.limit), Some(3));
    }

    #[test]
    fn test_validate_rejects_duplicate_candidates() {
        let mut config = VotingConfig::default();
        config.candidates[1].id = "v1".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate candidate id"));
    }

    #[test]
    fn test_validate_rejects_bad_tiers_and_roles() {
        let mut config = VotingConfig::default();
        config.tiers[1].award = Award::First;
        assert!(config.validate().is_err());

        let mut config = VotingConfig::default();
        config.tiers[0].award = Award::None;
        assert!(config.validate().is_err());

        let mut config = VotingConfig::default();
        config.roles.push(PrivilegedRole {
            role: "judge".to_string(),
            multiplier: 0,
            emails: vec![],
        });
        assert!(config.validate().is_err());

        let config = VotingConfig {
            candidates: vec![],
            ..VotingConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut config = VotingConfig::default();
        config.tiers[1].limit = 1;
        config.tiers[2].limit = 1;
        config.roles.push(PrivilegedRole {
            role: "judge".to_string(),
            multiplier: 10,
            emails: vec!["boss@corp.example".to_string()],
        });

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", serde_json::to_string(&config).unwrap()).unwrap();

        let loaded = VotingConfig::load_or_default(Some(file.path()));
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_falls_back_to_default() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();

        assert!(VotingConfig::from_file(file.path()).is_err());
        assert_eq!(
            VotingConfig::load_or_default(Some(file.path())),
            VotingConfig::default()
        );
        assert_eq!(VotingConfig::load_or_default(None), VotingConfig::default());
    }

    #[test]
    fn test_expected_voters_defaults_when_absent() {
        let mut json = serde_json::to_value(VotingConfig::default()).unwrap();
        assert_eq!(json["expected_voters"], 250);

        json.as_object_mut().unwrap().remove("expected_voters");
        let config: VotingConfig = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(config.expected_voters, 250);

        json["expected_voters"] = serde_json::json!(40);
        let config: VotingConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.expected_voters, 40);
    }

    #[test]
    fn test_resubmit_policy_parse() {
        assert_eq!(
            ResubmitPolicy::parse("overwrite"),
            Some(ResubmitPolicy::AllowOverwrite)
        );
        assert_eq!(
            ResubmitPolicy::parse(" REJECT "),
            Some(ResubmitPolicy::RejectDuplicate)
        );
        assert_eq!(ResubmitPolicy::parse("maybe"), None);
    }

    #[test]
    #[serial]
    fn test_app_config_from_env() {
        std::env::set_var("APP_ID", "yep-2026");
        std::env::set_var("BIND_ADDR", "127.0.0.1:9000");
        std::env::set_var("ADMIN_EMAILS", " Admin@Corp.example, ,ops@corp.example");
        std::env::set_var("ALLOWLIST_CACHE_SECS", "60");
        std::env::set_var("RESUBMIT_POLICY", "reject");

        let config = AppConfig::from_env();
        assert_eq!(config.app_id, "yep-2026");
        assert_eq!(config.bind_addr, SocketAddr::from(([127, 0, 0, 1], 9000)));
        assert_eq!(
            config.admin_emails,
            vec!["admin@corp.example".to_string(), "ops@corp.example".to_string()]
        );
        assert_eq!(config.allowlist_cache_ttl, Duration::from_secs(60));
        assert_eq!(config.resubmit_policy, ResubmitPolicy::RejectDuplicate);

        for key in [
            "APP_ID",
            "BIND_ADDR",
            "ADMIN_EMAILS",
            "ALLOWLIST_CACHE_SECS",
            "RESUBMIT_POLICY",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_app_config_defaults_on_garbage() {
        std::env::set_var("BIND_ADDR", "not-an-addr");
        std::env::set_var("ALLOWLIST_CACHE_SECS", "soon");

        let config = AppConfig::from_env();
        assert_eq!(config.bind_addr, AppConfig::default().bind_addr);
        assert_eq!(config.allowlist_cache_ttl, Duration::from_secs(300));
        assert_eq!(config.app_id, "default-app");

        std::env::remove_var("BIND_ADDR");
        std::env::remove_var("ALLOWLIST_CACHE_SECS");
    }
}
