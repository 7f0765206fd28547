//! Admin authorization and allowlist management

use super::AppState;
use crate::allowlist::{normalize_email, SyncOptions, SyncReport};
use crate::store::StoreError;
use serde::Deserialize;
use std::collections::HashSet;

/// Errors returned by admin operations
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("Admin access denied")]
    Unauthorized,

    #[error("{0}")]
    InvalidTransition(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What a caller presents to prove admin rights
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminCredential {
    /// Signed-in email, checked against the admin list
    pub email: Option<String>,
    /// Shared security code
    pub code: Option<String>,
}

/// Admin gate: an admin email or the shared security code.
/// With neither configured, every call is refused.
#[derive(Debug, Clone, Default)]
pub struct AdminAuth {
    emails: HashSet<String>,
    security_code: Option<String>,
}

impl AdminAuth {
    pub fn new(emails: Vec<String>, security_code: Option<String>) -> Self {
        Self {
            emails: emails.iter().map(|e| normalize_email(e)).collect(),
            security_code: security_code.filter(|c| !c.is_empty()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.emails.is_empty() || self.security_code.is_some()
    }

    /// Returns who is acting, for the audit fields of the status document
    pub fn authorize(&self, credential: &AdminCredential) -> Result<String, AdminError> {
        let email = credential
            .email
            .as_deref()
            .map(normalize_email)
            .filter(|e| !e.is_empty());

        if let Some(email) = &email {
            if self.emails.contains(email) {
                return Ok(email.clone());
            }
        }

        if let (Some(expected), Some(given)) = (&self.security_code, &credential.code) {
            if constant_time_eq(expected.as_bytes(), given.as_bytes()) {
                return Ok(email.unwrap_or_else(|| "security-code".to_string()));
            }
        }

        tracing::warn!("Rejected admin request from {:?}", email);
        Err(AdminError::Unauthorized)
    }
}

/// Constant-time byte comparison to prevent timing attacks
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

impl AppState {
    /// Reconcile the remote allowlist with `desired`
    pub async fn sync_allowlist(
        &self,
        credential: &AdminCredential,
        desired: &[String],
        options: SyncOptions,
    ) -> Result<SyncReport, AdminError> {
        let actor = self.admin.authorize(credential)?;
        tracing::info!("Allowlist sync requested by {}", actor);
        Ok(self.allowlist.sync(desired, options).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResubmitPolicy;
    use crate::state::tests::{admin, test_state};

    fn by_email(email: &str) -> AdminCredential {
        AdminCredential {
            email: Some(email.to_string()),
            code: None,
        }
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"hello", b"hell"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn test_admin_by_email_or_code() {
        let auth = AdminAuth::new(
            vec!["Admin@Corp.example".to_string()],
            Some("s3cret".to_string()),
        );

        assert_eq!(
            auth.authorize(&by_email(" admin@corp.example")).unwrap(),
            "admin@corp.example"
        );
        assert!(auth.authorize(&by_email("alice@corp.example")).is_err());

        let with_code = AdminCredential {
            email: Some("alice@corp.example".to_string()),
            code: Some("s3cret".to_string()),
        };
        assert_eq!(auth.authorize(&with_code).unwrap(), "alice@corp.example");

        let wrong_code = AdminCredential {
            email: None,
            code: Some("s3cre".to_string()),
        };
        assert!(matches!(
            auth.authorize(&wrong_code),
            Err(AdminError::Unauthorized)
        ));
    }

    #[test]
    fn test_unconfigured_admin_refuses_everyone() {
        let auth = AdminAuth::new(vec![], Some(String::new()));
        assert!(!auth.is_enabled());
        assert!(auth.authorize(&AdminCredential::default()).is_err());
        let empty_code = AdminCredential {
            email: None,
            code: Some(String::new()),
        };
        assert!(auth.authorize(&empty_code).is_err());
    }

    #[tokio::test]
    async fn test_sync_allowlist_is_admin_gated() {
        let (state, _) = test_state(ResubmitPolicy::AllowOverwrite);
        let desired = vec!["new@corp.example".to_string()];

        let denied = state
            .sync_allowlist(&by_email("alice@corp.example"), &desired, SyncOptions::default())
            .await;
        assert!(matches!(denied, Err(AdminError::Unauthorized)));

        let report = state
            .sync_allowlist(&admin(), &desired, SyncOptions::default())
            .await
            .unwrap();
        assert_eq!(report.added, 1);
        assert!(state.allowlist.check(Some("new@corp.example")).await.allowed);
    }
}
