use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::codes::{CodeScope, SequentialCode};
use super::domain::{AdmissionId, AdmissionRecord, AdmissionStatus, Identity, Student, StudentId};

/// Error enumeration for storage failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    /// Unique key collision, stale version, or lock wait expired.
    #[error("conflicting write")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Persistence for admission records.
///
/// `update` is a compare-and-swap on [`AdmissionRecord::version`]: it succeeds only
/// when the stored version equals the caller's, and the stored copy then carries
/// `version + 1`.
#[async_trait]
pub trait AdmissionStore: Send + Sync {
    async fn insert(&self, record: AdmissionRecord) -> Result<AdmissionRecord, RepositoryError>;
    async fn update(&self, record: AdmissionRecord) -> Result<AdmissionRecord, RepositoryError>;
    async fn fetch(&self, id: &AdmissionId) -> Result<Option<AdmissionRecord>, RepositoryError>;
    async fn find_by_temporary_id(
        &self,
        temporary_id: &SequentialCode,
    ) -> Result<Option<AdmissionRecord>, RepositoryError>;
    async fn list_by_status(
        &self,
        status: AdmissionStatus,
    ) -> Result<Vec<AdmissionRecord>, RepositoryError>;
}

#[async_trait]
pub trait StudentStore: Send + Sync {
    /// Fails with [`RepositoryError::Conflict`] when the student code is taken.
    async fn insert(&self, student: Student) -> Result<Student, RepositoryError>;
    async fn fetch(&self, id: &StudentId) -> Result<Option<Student>, RepositoryError>;
    async fn find_by_code(&self, code: &SequentialCode)
        -> Result<Option<Student>, RepositoryError>;
    /// Compensation hook for an enrollment that could not complete.
    async fn delete(&self, id: &StudentId) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<Identity>, RepositoryError>;
    /// Fails with [`RepositoryError::Conflict`] when the username exists.
    async fn create(&self, identity: Identity) -> Result<Identity, RepositoryError>;
    async fn delete(&self, username: &str) -> Result<(), RepositoryError>;
}

/// A held write-intent lock on one code scope.
///
/// Dropping the lease without calling [`SequenceLease::commit`] leaves the stored
/// maximum untouched.
pub trait SequenceLease: Send {
    fn scope(&self) -> &CodeScope;
    /// Highest sequence committed for the scope, `0` when none.
    fn last_issued(&self) -> u32;
    fn commit(self: Box<Self>, last_issued: u32);
}

/// Storage for per-scope sequence maxima.
#[async_trait]
pub trait SequenceStore: Send + Sync {
    /// Acquire the scope lock. Expired waits surface as [`RepositoryError::Conflict`].
    async fn acquire(&self, scope: &CodeScope) -> Result<Box<dyn SequenceLease>, RepositoryError>;
    /// Unlocked read of the committed maximum.
    async fn last_issued(&self, scope: &CodeScope) -> Result<u32, RepositoryError>;
}

/// Message templates understood by the notification collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationTemplate {
    InquiryReceived,
    ApplicationReceived,
    TestScheduled,
    InterviewScheduled,
    AdmissionOffer,
    EnrollmentCredentials,
    Rejection,
    Withdrawal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub destination: String,
    pub template: NotificationTemplate,
    pub admission_id: AdmissionId,
    pub payload: BTreeMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

/// Best-effort outbound messaging (SMS, e-mail).
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send(&self, notification: Notification) -> Result<(), NotificationError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferLetterRequest {
    pub admission_id: AdmissionId,
    pub temporary_id: String,
    pub applicant_name: String,
    pub guardian_name: String,
    pub class_name: String,
    pub admission_date: chrono::NaiveDate,
}

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("offer letter generation failed: {0}")]
    Generation(String),
}

/// Mandatory document rendering; returns a retrievable URL.
#[async_trait]
pub trait DocumentGenerator: Send + Sync {
    async fn generate_offer_letter(
        &self,
        request: OfferLetterRequest,
    ) -> Result<String, DocumentError>;
}

/// Bundle of collaborators injected into the engine.
#[derive(Clone)]
pub struct AdmissionPorts {
    pub admissions: Arc<dyn AdmissionStore>,
    pub students: Arc<dyn StudentStore>,
    pub identities: Arc<dyn IdentityStore>,
    pub sequences: Arc<dyn SequenceStore>,
    pub notifications: Arc<dyn NotificationDispatcher>,
    pub documents: Arc<dyn DocumentGenerator>,
}
