//! Concurrency-safe issuance of year-scoped sequential codes.
//!
//! Allocation always goes through a scope lease: read the committed maximum under
//! the lock, stage `max + 1`, and commit only once the entity carrying the code is
//! persisted. An [`AllocationTransaction`] may be opened by the issuer or supplied
//! by the caller; either way the lease is acquired before a value is staged.

use std::sync::Arc;

use tracing::{debug, warn};

use super::codes::{CodeScope, SequentialCode, MAX_SEQUENCE};
use super::error::AdmissionError;
use super::ports::{RepositoryError, SequenceLease, SequenceStore};

struct StagedLease {
    lease: Box<dyn SequenceLease>,
    staged: Option<u32>,
}

/// Unit of work holding scope leases and the sequences staged under them.
///
/// Dropping an uncommitted transaction releases every lease and discards the staged
/// values.
#[derive(Default)]
pub struct AllocationTransaction {
    leases: Vec<StagedLease>,
}

impl AllocationTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn holds(&self, scope: &CodeScope) -> bool {
        self.position(scope).is_some()
    }

    /// Persist staged maxima and release the leases.
    pub fn commit(self) {
        for StagedLease { lease, staged } in self.leases {
            let last = staged.unwrap_or_else(|| lease.last_issued());
            lease.commit(last);
        }
    }

    fn position(&self, scope: &CodeScope) -> Option<usize> {
        self.leases
            .iter()
            .position(|entry| entry.lease.scope() == scope)
    }
}

impl std::fmt::Debug for AllocationTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocationTransaction")
            .field(
                "scopes",
                &self
                    .leases
                    .iter()
                    .map(|entry| entry.lease.scope().to_string())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Issues the next unused code in a scope.
#[derive(Clone)]
pub struct SequentialCodeIssuer {
    store: Arc<dyn SequenceStore>,
    conflict_retries: u32,
}

impl SequentialCodeIssuer {
    pub fn new(store: Arc<dyn SequenceStore>, conflict_retries: u32) -> Self {
        Self {
            store,
            conflict_retries,
        }
    }

    /// Allocate and commit a code in its own transaction.
    pub async fn issue(&self, scope: &CodeScope) -> Result<SequentialCode, AdmissionError> {
        let mut transaction = AllocationTransaction::new();
        let code = self.issue_in(&mut transaction, scope).await?;
        transaction.commit();
        Ok(code)
    }

    /// Stage the next code for `scope` inside a caller-owned transaction.
    ///
    /// The scope lease is acquired if the transaction does not already hold it.
    /// Nothing is visible to other callers until `transaction.commit()`.
    pub async fn issue_in(
        &self,
        transaction: &mut AllocationTransaction,
        scope: &CodeScope,
    ) -> Result<SequentialCode, AdmissionError> {
        let index = match transaction.position(scope) {
            Some(index) => index,
            None => {
                let lease = self.acquire(scope).await?;
                transaction.leases.push(StagedLease {
                    lease,
                    staged: None,
                });
                transaction.leases.len() - 1
            }
        };

        let entry = &mut transaction.leases[index];
        let current = entry.staged.unwrap_or_else(|| entry.lease.last_issued());
        let next = current
            .checked_add(1)
            .filter(|next| *next <= MAX_SEQUENCE)
            .ok_or_else(|| AdmissionError::CodeAllocationExhausted {
                scope: scope.clone(),
            })?;
        entry.staged = Some(next);

        debug!(%scope, sequence = next, "staged sequential code");
        Ok(SequentialCode::new(scope.clone(), next)?)
    }

    /// Number of codes committed in `scope`.
    pub async fn count_issued(&self, scope: &CodeScope) -> Result<u32, AdmissionError> {
        self.store
            .last_issued(scope)
            .await
            .map_err(AdmissionError::storage)
    }

    /// Display-only preview of the next sequence. Takes no lock; never allocate
    /// from this value.
    pub async fn peek_next(&self, scope: &CodeScope) -> Result<u32, AdmissionError> {
        Ok(self.count_issued(scope).await? + 1)
    }

    async fn acquire(&self, scope: &CodeScope) -> Result<Box<dyn SequenceLease>, AdmissionError> {
        let mut attempt = 0;
        loop {
            match self.store.acquire(scope).await {
                Ok(lease) => return Ok(lease),
                Err(RepositoryError::Conflict) if attempt < self.conflict_retries => {
                    attempt += 1;
                    warn!(%scope, attempt, "sequence lock contended, retrying");
                }
                Err(err) => return Err(AdmissionError::storage(err)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admissions::memory::InMemorySequenceStore;
    use std::collections::HashSet;
    use std::time::Duration;

    fn issuer() -> (SequentialCodeIssuer, Arc<InMemorySequenceStore>) {
        let store = Arc::new(InMemorySequenceStore::new(Duration::from_millis(500)));
        (SequentialCodeIssuer::new(store.clone(), 2), store)
    }

    #[tokio::test]
    async fn first_code_in_scope_is_one() {
        let (issuer, _) = issuer();
        let code = issuer
            .issue(&CodeScope::student("SCH", 2024))
            .await
            .expect("issues");
        assert_eq!(code.to_string(), "SCH-2024-0001");
    }

    #[tokio::test]
    async fn scopes_keep_independent_counters() {
        let (issuer, _) = issuer();
        let student = CodeScope::student("SCH", 2024);
        let inquiry = CodeScope::inquiry("SCH", 2024);
        let next_year = CodeScope::student("SCH", 2025);

        issuer.issue(&student).await.unwrap();
        issuer.issue(&student).await.unwrap();
        let first_inquiry = issuer.issue(&inquiry).await.unwrap();
        let first_next_year = issuer.issue(&next_year).await.unwrap();

        assert_eq!(first_inquiry.to_string(), "SCH-INQ-2024-0001");
        assert_eq!(first_next_year.to_string(), "SCH-2025-0001");
        assert_eq!(issuer.count_issued(&student).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back_staged_values() {
        let (issuer, _) = issuer();
        let scope = CodeScope::student("SCH", 2024);

        {
            let mut transaction = AllocationTransaction::new();
            let staged = issuer.issue_in(&mut transaction, &scope).await.unwrap();
            assert_eq!(staged.sequence(), 1);
        }

        assert_eq!(issuer.count_issued(&scope).await.unwrap(), 0);
        assert_eq!(issuer.issue(&scope).await.unwrap().sequence(), 1);
    }

    #[tokio::test]
    async fn joined_transaction_reuses_its_lease() {
        let (issuer, _) = issuer();
        let scope = CodeScope::student("SCH", 2024);
        let mut transaction = AllocationTransaction::new();

        let first = issuer.issue_in(&mut transaction, &scope).await.unwrap();
        let second = issuer.issue_in(&mut transaction, &scope).await.unwrap();
        assert!(transaction.holds(&scope));
        transaction.commit();

        assert_eq!((first.sequence(), second.sequence()), (1, 2));
        assert_eq!(issuer.count_issued(&scope).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn joined_transaction_still_blocks_other_callers() {
        let store = Arc::new(InMemorySequenceStore::new(Duration::from_millis(30)));
        let issuer = SequentialCodeIssuer::new(store, 0);
        let scope = CodeScope::student("SCH", 2024);

        let mut transaction = AllocationTransaction::new();
        issuer.issue_in(&mut transaction, &scope).await.unwrap();

        let contender = issuer.issue(&scope).await;
        assert!(matches!(
            contender,
            Err(AdmissionError::DependencyFailure { .. })
        ));

        transaction.commit();
        assert_eq!(issuer.issue(&scope).await.unwrap().sequence(), 2);
    }

    #[tokio::test]
    async fn exhausted_scope_fails_loudly() {
        let (issuer, store) = issuer();
        let scope = CodeScope::student("SCH", 2024);
        store.seed(&scope, MAX_SEQUENCE).await;

        assert!(matches!(
            issuer.issue(&scope).await,
            Err(AdmissionError::CodeAllocationExhausted { .. })
        ));
        assert_eq!(issuer.count_issued(&scope).await.unwrap(), MAX_SEQUENCE);
    }

    #[tokio::test]
    async fn peek_next_does_not_allocate() {
        let (issuer, _) = issuer();
        let scope = CodeScope::student("SCH", 2024);
        assert_eq!(issuer.peek_next(&scope).await.unwrap(), 1);
        assert_eq!(issuer.peek_next(&scope).await.unwrap(), 1);
        issuer.issue(&scope).await.unwrap();
        assert_eq!(issuer.peek_next(&scope).await.unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_receive_distinct_contiguous_codes() {
        let (issuer, _) = issuer();
        let scope = CodeScope::student("SCH", 2024);

        let handles: Vec<_> = (0..64)
            .map(|_| {
                let issuer = issuer.clone();
                let scope = scope.clone();
                tokio::spawn(async move { issuer.issue(&scope).await })
            })
            .collect();

        let mut sequences = HashSet::new();
        for handle in handles {
            let code = handle.await.expect("task joins").expect("code issued");
            assert!(sequences.insert(code.sequence()), "duplicate {code}");
        }

        assert_eq!(sequences, (1..=64).collect());
    }
}
