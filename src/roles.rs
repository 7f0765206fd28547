//! Per-voter weight lookup

use crate::allowlist::normalize_email;
use crate::config::PrivilegedRole;
use crate::types::RoleGrant;
use std::collections::HashSet;

/// Decides how much a voter's ballot weighs
pub trait RoleLookup: Send + Sync {
    /// `email` is already normalized (trimmed, lowercase)
    fn lookup(&self, email: &str) -> RoleGrant;
}

#[derive(Debug, Clone)]
struct RoleEntry {
    role: String,
    multiplier: u32,
    emails: HashSet<String>,
}

/// Role lookup backed by the configured privileged email sets.
/// The first role containing the email wins.
#[derive(Debug, Clone, Default)]
pub struct StaticRoleLookup {
    roles: Vec<RoleEntry>,
}

impl StaticRoleLookup {
    pub fn new(roles: &[PrivilegedRole]) -> Self {
        let roles = roles
            .iter()
            .map(|r| {
                let multiplier = if r.multiplier == 0 {
                    tracing::warn!("Role '{}' has multiplier 0, using 1", r.role);
                    1
                } else {
                    r.multiplier
                };
                RoleEntry {
                    role: r.role.clone(),
                    multiplier,
                    emails: r.emails.iter().map(|e| normalize_email(e)).collect(),
                }
            })
            .collect();
        Self { roles }
    }
}

impl RoleLookup for StaticRoleLookup {
    fn lookup(&self, email: &str) -> RoleGrant {
        self.roles
            .iter()
            .find(|r| r.emails.contains(email))
            .map(|r| RoleGrant {
                multiplier: r.multiplier,
                role: Some(r.role.clone()),
            })
            .unwrap_or_default()
    }
}
