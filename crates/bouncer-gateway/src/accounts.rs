//! Target-account registry.
//!
//! Accounts are registered through the approval pipeline (`add_account` /
//! `remove_account` kinds); the dispatcher mutates the registry only after
//! a human approves.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use bouncer_approval::{StoreError, StoreResult};
use bouncer_core::Timestamp;

/// A registered target account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// 12-digit account id.
    pub account_id: String,
    /// Display name.
    pub name: String,
    /// Role assumed for cross-account execution; `None` runs locally.
    pub role_arn: Option<String>,
    /// Bucket approved uploads land in for this account.
    pub upload_bucket: Option<String>,
    /// Free-form sensitivity tag (`prod`, `sandbox`, ...).
    pub sensitivity: Option<String>,
    /// Disabled accounts reject submissions.
    pub enabled: bool,
    /// Approver who registered the account.
    pub created_by: String,
    /// Registration time.
    pub created_at: Timestamp,
}

/// Validate a 12-digit account id.
///
/// # Errors
///
/// Returns a human-readable description of the problem.
pub fn validate_account_id(account_id: &str) -> Result<(), String> {
    if account_id.len() == 12 && account_id.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(format!(
            "account id must be 12 digits, got '{account_id}'"
        ))
    }
}

/// Validate an IAM role ARN.
///
/// # Errors
///
/// Returns a human-readable description of the problem.
pub fn validate_role_arn(role_arn: &str) -> Result<(), String> {
    if role_arn.starts_with("arn:aws:iam::") && role_arn.contains(":role/") {
        Ok(())
    } else {
        Err(format!("not an IAM role arn: '{role_arn}'"))
    }
}

/// The account registry contract.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert or replace an account.
    async fn put(&self, account: Account) -> StoreResult<()>;

    /// Fetch an account.
    async fn get(&self, account_id: &str) -> StoreResult<Option<Account>>;

    /// Remove an account. Returns false when it did not exist.
    async fn remove(&self, account_id: &str) -> StoreResult<bool>;

    /// All registered accounts, ordered by id.
    async fn list(&self) -> StoreResult<Vec<Account>>;
}

/// In-memory account registry.
#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    accounts: RwLock<HashMap<String, Account>>,
}

impl MemoryAccountStore {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-seeded with a default account (test/local helper).
    #[must_use]
    pub fn with_default_account(account_id: &str, name: &str) -> Self {
        let store = Self::new();
        let account = Account {
            account_id: account_id.to_owned(),
            name: name.to_owned(),
            role_arn: None,
            upload_bucket: None,
            sensitivity: None,
            enabled: true,
            created_by: "bootstrap".to_owned(),
            created_at: Timestamp::now(),
        };
        if let Ok(mut accounts) = store.accounts.try_write() {
            accounts.insert(account.account_id.clone(), account);
        }
        store
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn put(&self, account: Account) -> StoreResult<()> {
        self.accounts
            .write()
            .await
            .insert(account.account_id.clone(), account);
        Ok(())
    }

    async fn get(&self, account_id: &str) -> StoreResult<Option<Account>> {
        Ok(self.accounts.read().await.get(account_id).cloned())
    }

    async fn remove(&self, account_id: &str) -> StoreResult<bool> {
        Ok(self.accounts.write().await.remove(account_id).is_some())
    }

    async fn list(&self) -> StoreResult<Vec<Account>> {
        let mut accounts: Vec<Account> = self.accounts.read().await.values().cloned().collect();
        accounts.sort_by(|a, b| a.account_id.cmp(&b.account_id));
        Ok(accounts)
    }
}

/// Resolution of a submission's target account.
#[derive(Debug, Clone)]
pub struct ResolvedAccount {
    /// Account id.
    pub account_id: String,
    /// Display name.
    pub name: String,
    /// Role to assume, if cross-account.
    pub role_arn: Option<String>,
}

/// Resolve the account for a submission: explicit id, else the default.
///
/// # Errors
///
/// [`StoreError::Unavailable`] with a descriptive message when the account
/// is unknown or disabled.
pub async fn resolve_account(
    store: &dyn AccountStore,
    requested: Option<&str>,
    default_account_id: &str,
) -> StoreResult<ResolvedAccount> {
    match requested {
        Some(account_id) => {
            validate_account_id(account_id)
                .map_err(StoreError::Unavailable)?;
            let account = store
                .get(account_id)
                .await?
                .ok_or_else(|| StoreError::Unavailable(format!("account {account_id} not configured")))?;
            if !account.enabled {
                return Err(StoreError::Unavailable(format!(
                    "account {account_id} is disabled"
                )));
            }
            Ok(ResolvedAccount {
                account_id: account.account_id,
                name: account.name,
                role_arn: account.role_arn,
            })
        },
        None => {
            if default_account_id.is_empty() {
                return Err(StoreError::Unavailable(
                    "no account requested and no default configured".to_owned(),
                ));
            }
            match store.get(default_account_id).await? {
                Some(account) => Ok(ResolvedAccount {
                    account_id: account.account_id,
                    name: account.name,
                    role_arn: account.role_arn,
                }),
                None => Ok(ResolvedAccount {
                    account_id: default_account_id.to_owned(),
                    name: "Default".to_owned(),
                    role_arn: None,
                }),
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_id_validation() {
        assert!(validate_account_id("111111111111").is_ok());
        assert!(validate_account_id("11111111111").is_err());
        assert!(validate_account_id("11111111111x").is_err());
    }

    #[test]
    fn test_role_arn_validation() {
        assert!(validate_role_arn("arn:aws:iam::111111111111:role/deploy").is_ok());
        assert!(validate_role_arn("arn:aws:s3:::bucket").is_err());
        assert!(validate_role_arn("role/deploy").is_err());
    }

    #[tokio::test]
    async fn test_registry_roundtrip() {
        let store = MemoryAccountStore::new();
        store
            .put(Account {
                account_id: "222222222222".to_owned(),
                name: "Prod".to_owned(),
                role_arn: Some("arn:aws:iam::222222222222:role/bouncer".to_owned()),
                upload_bucket: None,
                sensitivity: Some("prod".to_owned()),
                enabled: true,
                created_by: "approver-1".to_owned(),
                created_at: Timestamp::now(),
            })
            .await
            .unwrap();
        assert!(store.get("222222222222").await.unwrap().is_some());
        assert_eq!(store.list().await.unwrap().len(), 1);
        assert!(store.remove("222222222222").await.unwrap());
        assert!(!store.remove("222222222222").await.unwrap());
    }

    #[tokio::test]
    async fn test_resolve_explicit_account() {
        let store = MemoryAccountStore::with_default_account("111111111111", "Dev");
        let resolved = resolve_account(&store, Some("111111111111"), "")
            .await
            .unwrap();
        assert_eq!(resolved.name, "Dev");
    }

    #[tokio::test]
    async fn test_resolve_unknown_account_fails() {
        let store = MemoryAccountStore::new();
        assert!(resolve_account(&store, Some("999999999999"), "").await.is_err());
    }

    #[tokio::test]
    async fn test_resolve_disabled_account_fails() {
        let store = MemoryAccountStore::new();
        store
            .put(Account {
                account_id: "333333333333".to_owned(),
                name: "Off".to_owned(),
                role_arn: None,
                upload_bucket: None,
                sensitivity: None,
                enabled: false,
                created_by: "x".to_owned(),
                created_at: Timestamp::now(),
            })
            .await
            .unwrap();
        assert!(resolve_account(&store, Some("333333333333"), "").await.is_err());
    }

    #[tokio::test]
    async fn test_resolve_default_fallback() {
        let store = MemoryAccountStore::new();
        let resolved = resolve_account(&store, None, "444444444444").await.unwrap();
        assert_eq!(resolved.account_id, "444444444444");
        assert_eq!(resolved.name, "Default");
    }
}
