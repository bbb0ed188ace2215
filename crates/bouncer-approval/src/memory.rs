//! In-memory store implementation.
//!
//! The reference implementation of the [`Store`] contract, used by tests
//! and local runs. A single mutex makes every conditional update genuinely
//! atomic: concurrent check-and-consume callers serialize on the lock, so a
//! budget condition can never be satisfied twice past its limit.
//!
//! The `fail_mode` switch makes every operation return
//! [`StoreError::Unavailable`], which the fail-closed tests lean on.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::Mutex;

use bouncer_core::{GrantId, MessageId, PageId, RequestId, RequestStatus, Timestamp, TrustId};

use crate::grant::{GrantSession, GrantStatus};
use crate::record::{ApprovalRequest, RecordPatch};
use crate::store::{
    ConsumeOutcome, PageRecord, Store, StoreError, StoreResult, TransitionOutcome, TrustConsume,
};
use crate::trust::{TrustSession, TrustSessionStatus};

/// Repeat cap for dangerous commands under `allow_repeat` grants.
const DANGEROUS_REPEAT_LIMIT: u32 = 3;

#[derive(Default)]
struct Inner {
    requests: HashMap<RequestId, ApprovalRequest>,
    idempotency: HashMap<String, RequestId>,
    trust: HashMap<TrustId, TrustSession>,
    trust_index: HashMap<(String, String), TrustId>,
    grants: HashMap<GrantId, GrantSession>,
    rate: HashMap<(String, i64), u32>,
    pages: HashMap<PageId, PageRecord>,
    fail: bool,
}

impl Inner {
    fn check_available(&self) -> StoreResult<()> {
        if self.fail {
            return Err(StoreError::Unavailable("fail mode enabled".to_owned()));
        }
        Ok(())
    }
}

/// In-memory [`Store`].
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle simulated outage: every operation fails until cleared.
    pub async fn set_fail_mode(&self, fail: bool) {
        self.inner.lock().await.fail = fail;
    }

    /// Number of approval records held (test helper).
    pub async fn record_count(&self) -> usize {
        self.inner.lock().await.requests.len()
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn put_new(&self, record: ApprovalRequest) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.check_available()?;
        if inner.requests.contains_key(&record.request_id) {
            return Err(StoreError::AlreadyExists(record.request_id.to_string()));
        }
        if let Some(key) = &record.idempotency_key {
            inner
                .idempotency
                .insert(key.clone(), record.request_id.clone());
        }
        inner.requests.insert(record.request_id.clone(), record);
        Ok(())
    }

    async fn get(&self, id: &RequestId) -> StoreResult<Option<ApprovalRequest>> {
        let inner = self.inner.lock().await;
        inner.check_available()?;
        Ok(inner.requests.get(id).cloned())
    }

    async fn delete(&self, id: &RequestId) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.check_available()?;
        if let Some(record) = inner.requests.remove(id)
            && let Some(key) = record.idempotency_key
        {
            inner.idempotency.remove(&key);
        }
        Ok(())
    }

    async fn set_message_id(&self, id: &RequestId, message_id: MessageId) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.check_available()?;
        match inner.requests.get_mut(id) {
            Some(record) => {
                record.message_id = Some(message_id);
                record.updated_at = Timestamp::now();
                Ok(())
            },
            None => Err(StoreError::Unavailable(format!("no such record {id}"))),
        }
    }

    async fn transition(
        &self,
        id: &RequestId,
        from: RequestStatus,
        to: RequestStatus,
        patch: RecordPatch,
    ) -> StoreResult<TransitionOutcome> {
        if !from.can_transition_to(to) {
            return Err(StoreError::InvalidTransition { from, to });
        }
        let mut inner = self.inner.lock().await;
        inner.check_available()?;
        let Some(record) = inner.requests.get_mut(id) else {
            return Ok(TransitionOutcome::Conflict);
        };
        if record.status != from {
            return Ok(TransitionOutcome::Conflict);
        }
        patch.apply(record, to);
        Ok(TransitionOutcome::Applied(Box::new(record.clone())))
    }

    async fn list_pending(
        &self,
        source: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<ApprovalRequest>> {
        let inner = self.inner.lock().await;
        inner.check_available()?;
        let mut pending: Vec<ApprovalRequest> = inner
            .requests
            .values()
            .filter(|r| r.status == RequestStatus::Pending)
            .filter(|r| source.is_none_or(|s| r.source == s))
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.created_at);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn list_pending_for_trust(
        &self,
        trust_scope: &str,
        account_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<ApprovalRequest>> {
        let inner = self.inner.lock().await;
        inner.check_available()?;
        let mut pending: Vec<ApprovalRequest> = inner
            .requests
            .values()
            .filter(|r| r.status == RequestStatus::Pending)
            .filter(|r| r.trust_scope.as_deref() == Some(trust_scope))
            .filter(|r| r.account_id == account_id)
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.created_at);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn count_pending(&self, source: &str) -> StoreResult<u32> {
        let inner = self.inner.lock().await;
        inner.check_available()?;
        let count = inner
            .requests
            .values()
            .filter(|r| r.status == RequestStatus::Pending && r.source == source)
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn find_by_idempotency_key(&self, key: &str) -> StoreResult<Option<RequestId>> {
        let inner = self.inner.lock().await;
        inner.check_available()?;
        Ok(inner.idempotency.get(key).cloned())
    }

    async fn put_trust(&self, session: TrustSession) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.check_available()?;
        inner.trust_index.insert(
            (session.trust_scope.clone(), session.account_id.clone()),
            session.trust_id.clone(),
        );
        inner.trust.insert(session.trust_id.clone(), session);
        Ok(())
    }

    async fn get_trust(&self, id: &TrustId) -> StoreResult<Option<TrustSession>> {
        let inner = self.inner.lock().await;
        inner.check_available()?;
        Ok(inner.trust.get(id).cloned())
    }

    async fn active_trust(
        &self,
        trust_scope: &str,
        account_id: &str,
    ) -> StoreResult<Option<TrustSession>> {
        let inner = self.inner.lock().await;
        inner.check_available()?;
        let key = (trust_scope.to_owned(), account_id.to_owned());
        let Some(id) = inner.trust_index.get(&key) else {
            return Ok(None);
        };
        let Some(session) = inner.trust.get(id) else {
            return Ok(None);
        };
        if session.is_active(Timestamp::now()) {
            Ok(Some(session.clone()))
        } else {
            Ok(None)
        }
    }

    async fn consume_trust(
        &self,
        id: &TrustId,
        what: TrustConsume,
    ) -> StoreResult<ConsumeOutcome<TrustSession>> {
        let mut inner = self.inner.lock().await;
        inner.check_available()?;
        let Some(session) = inner.trust.get_mut(id) else {
            return Ok(ConsumeOutcome::Denied("no such trust session".to_owned()));
        };
        let now = Timestamp::now();
        if session.status != TrustSessionStatus::Active {
            return Ok(ConsumeOutcome::Denied("trust session not active".to_owned()));
        }
        if session.expires_at.is_past(now) {
            return Ok(ConsumeOutcome::Denied("trust session expired".to_owned()));
        }
        match what {
            TrustConsume::Command => {
                if session.commands_used >= session.commands_max {
                    return Ok(ConsumeOutcome::Denied(format!(
                        "trust command budget exhausted ({}/{})",
                        session.commands_used, session.commands_max
                    )));
                }
                session.commands_used += 1;
            },
            TrustConsume::Upload { bytes } => {
                if session.uploads_used >= session.uploads_max {
                    return Ok(ConsumeOutcome::Denied(format!(
                        "trust upload budget exhausted ({}/{})",
                        session.uploads_used, session.uploads_max
                    )));
                }
                if session.bytes_used.saturating_add(bytes) > session.bytes_max {
                    return Ok(ConsumeOutcome::Denied(
                        "trust upload byte budget exhausted".to_owned(),
                    ));
                }
                session.uploads_used += 1;
                session.bytes_used += bytes;
            },
        }
        Ok(ConsumeOutcome::Consumed(Box::new(session.clone())))
    }

    async fn revoke_trust(&self, id: &TrustId) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        inner.check_available()?;
        match inner.trust.get_mut(id) {
            Some(session) => {
                session.status = TrustSessionStatus::Revoked;
                Ok(true)
            },
            None => Ok(false),
        }
    }

    async fn put_grant(&self, session: GrantSession) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.check_available()?;
        inner.grants.insert(session.grant_id.clone(), session);
        Ok(())
    }

    async fn get_grant(&self, id: &GrantId) -> StoreResult<Option<GrantSession>> {
        let inner = self.inner.lock().await;
        inner.check_available()?;
        Ok(inner.grants.get(id).cloned())
    }

    async fn decide_grant(&self, decided: GrantSession) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        inner.check_available()?;
        match inner.grants.get_mut(&decided.grant_id) {
            Some(stored) if stored.status == GrantStatus::Pending => {
                *stored = decided;
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    async fn consume_grant(
        &self,
        id: &GrantId,
        normalized_cmd: &str,
        dangerous: bool,
    ) -> StoreResult<ConsumeOutcome<GrantSession>> {
        let mut inner = self.inner.lock().await;
        inner.check_available()?;
        let Some(session) = inner.grants.get_mut(id) else {
            return Ok(ConsumeOutcome::Denied("no such grant".to_owned()));
        };
        let now = Timestamp::now();
        if session.status != GrantStatus::Approved {
            return Ok(ConsumeOutcome::Denied("grant not approved".to_owned()));
        }
        if session.expires_at.is_past(now) {
            return Ok(ConsumeOutcome::Denied("grant expired".to_owned()));
        }
        if session.executions_used >= session.max_executions {
            return Ok(ConsumeOutcome::Denied(format!(
                "grant execution budget exhausted ({}/{})",
                session.executions_used, session.max_executions
            )));
        }
        let prior = session.used.get(normalized_cmd).copied().unwrap_or(0);
        if !session.allow_repeat && prior > 0 {
            return Ok(ConsumeOutcome::Denied(
                "command already executed under this grant".to_owned(),
            ));
        }
        if session.allow_repeat && dangerous && prior >= DANGEROUS_REPEAT_LIMIT {
            return Ok(ConsumeOutcome::Denied(format!(
                "dangerous command repeat limit reached ({DANGEROUS_REPEAT_LIMIT})"
            )));
        }
        *session.used.entry(normalized_cmd.to_owned()).or_insert(0) += 1;
        session.executions_used += 1;
        Ok(ConsumeOutcome::Consumed(Box::new(session.clone())))
    }

    async fn revoke_grant(&self, id: &GrantId) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        inner.check_available()?;
        match inner.grants.get_mut(id) {
            Some(session) => {
                session.status = GrantStatus::Revoked;
                Ok(true)
            },
            None => Ok(false),
        }
    }

    async fn increment_rate(&self, source: &str, window_start: i64) -> StoreResult<u32> {
        let mut inner = self.inner.lock().await;
        inner.check_available()?;
        let count = inner
            .rate
            .entry((source.to_owned(), window_start))
            .or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn put_page(&self, page: PageRecord) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.check_available()?;
        inner.pages.insert(page.page_id.clone(), page);
        Ok(())
    }

    async fn get_page(&self, id: &PageId) -> StoreResult<Option<PageRecord>> {
        let inner = self.inner.lock().await;
        inner.check_available()?;
        let now = Timestamp::now();
        Ok(inner
            .pages
            .get(id)
            .filter(|p| !p.expires_at.is_past(now))
            .cloned())
    }

    async fn sweep_expired(&self, now: Timestamp) -> StoreResult<u32> {
        let mut inner = self.inner.lock().await;
        inner.check_available()?;
        let mut removed = 0u32;

        let expired_requests: Vec<RequestId> = inner
            .requests
            .values()
            .filter(|r| r.created_at.plus_seconds(r.ttl_hint_seconds).is_past(now))
            .map(|r| r.request_id.clone())
            .collect();
        for id in expired_requests {
            if let Some(record) = inner.requests.remove(&id) {
                if let Some(key) = record.idempotency_key {
                    inner.idempotency.remove(&key);
                }
                removed += 1;
            }
        }

        let expired_pages: Vec<PageId> = inner
            .pages
            .values()
            .filter(|p| p.expires_at.is_past(now))
            .map(|p| p.page_id.clone())
            .collect();
        for id in expired_pages {
            inner.pages.remove(&id);
            removed += 1;
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RequestPayload;
    use bouncer_core::DecisionType;

    fn record(command: &str, source: &str) -> ApprovalRequest {
        ApprovalRequest::new(
            RequestPayload::Execute {
                command: command.to_owned(),
                assume_role: None,
            },
            RequestStatus::Pending,
            source,
            Some(source.to_owned()),
            "111111111111",
            "Dev",
            "testing",
            300,
            60,
        )
    }

    #[tokio::test]
    async fn test_put_new_rejects_duplicates() {
        let store = MemoryStore::new();
        let r = record("aws s3 ls", "bot");
        store.put_new(r.clone()).await.unwrap();
        assert!(matches!(
            store.put_new(r).await,
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_transition_applies_once() {
        let store = MemoryStore::new();
        let r = record("aws s3 ls", "bot");
        let id = r.request_id.clone();
        store.put_new(r).await.unwrap();

        let first = store
            .transition(
                &id,
                RequestStatus::Pending,
                RequestStatus::Approved,
                RecordPatch::decision(DecisionType::Approved, Some("appr".to_owned())),
            )
            .await
            .unwrap();
        assert!(first.applied().is_some());

        let second = store
            .transition(
                &id,
                RequestStatus::Pending,
                RequestStatus::Denied,
                RecordPatch::decision(DecisionType::Denied, Some("appr".to_owned())),
            )
            .await
            .unwrap();
        assert!(matches!(second, TransitionOutcome::Conflict));
    }

    #[tokio::test]
    async fn test_transition_rejects_illegal_edge() {
        let store = MemoryStore::new();
        let r = record("aws s3 ls", "bot");
        let id = r.request_id.clone();
        store.put_new(r).await.unwrap();
        let err = store
            .transition(
                &id,
                RequestStatus::Pending,
                RequestStatus::ExecutedOk,
                RecordPatch::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_transitions_single_winner() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let r = record("aws s3 ls", "bot");
        let id = r.request_id.clone();
        store.put_new(r).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = std::sync::Arc::clone(&store);
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .transition(
                        &id,
                        RequestStatus::Pending,
                        RequestStatus::Approved,
                        RecordPatch::default(),
                    )
                    .await
                    .unwrap()
                    .applied()
                    .is_some()
            }));
        }
        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn test_list_pending_ordered_and_filtered() {
        let store = MemoryStore::new();
        let a = record("aws s3 ls", "bot-A");
        let b = record("aws ec2 describe-instances", "bot-B");
        store.put_new(a.clone()).await.unwrap();
        store.put_new(b).await.unwrap();

        let all = store.list_pending(None, 10).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].created_at <= all[1].created_at);

        let only_a = store.list_pending(Some("bot-A"), 10).await.unwrap();
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].request_id, a.request_id);
    }

    #[tokio::test]
    async fn test_idempotency_key_lookup() {
        let store = MemoryStore::new();
        let r = record("aws s3 ls", "bot").with_idempotency_key(Some("key-1".to_owned()));
        let id = r.request_id.clone();
        store.put_new(r).await.unwrap();
        assert_eq!(
            store.find_by_idempotency_key("key-1").await.unwrap(),
            Some(id)
        );
        assert!(
            store
                .find_by_idempotency_key("other")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_rate_counter_increments_per_window() {
        let store = MemoryStore::new();
        assert_eq!(store.increment_rate("bot", 100).await.unwrap(), 1);
        assert_eq!(store.increment_rate("bot", 100).await.unwrap(), 2);
        assert_eq!(store.increment_rate("bot", 160).await.unwrap(), 1);
        assert_eq!(store.increment_rate("other", 100).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_fail_mode_fails_everything() {
        let store = MemoryStore::new();
        store.set_fail_mode(true).await;
        assert!(store.get(&RequestId::new()).await.is_err());
        assert!(store.increment_rate("bot", 0).await.is_err());
        store.set_fail_mode(false).await;
        assert!(store.get(&RequestId::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_page_ttl() {
        let store = MemoryStore::new();
        let id = PageId::from("req-1:page:2");
        store
            .put_page(PageRecord {
                page_id: id.clone(),
                content: "x".to_owned(),
                page: 2,
                total_pages: 2,
                expires_at: Timestamp::now().plus_seconds(60),
            })
            .await
            .unwrap();
        assert!(store.get_page(&id).await.unwrap().is_some());

        let stale = PageId::from("req-1:page:3");
        store
            .put_page(PageRecord {
                page_id: stale.clone(),
                content: "y".to_owned(),
                page: 3,
                total_pages: 3,
                expires_at: Timestamp(Timestamp::now().0 - chrono::Duration::seconds(5)),
            })
            .await
            .unwrap();
        assert!(store.get_page(&stale).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sweep_removes_expired() {
        let store = MemoryStore::new();
        let mut r = record("aws s3 ls", "bot");
        r.ttl_hint_seconds = 0;
        store.put_new(r).await.unwrap();
        let removed = store
            .sweep_expired(Timestamp::now().plus_seconds(5))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.record_count().await, 0);
    }
}
