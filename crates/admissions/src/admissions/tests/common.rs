use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::admissions::codes::SequentialCode;
use crate::admissions::context::{FixedClock, RequestContext};
use crate::admissions::domain::{
    ActorId, AdmissionId, AdmissionRecord, AdmissionStatus, ApplicantDetails, ContactInfo,
    GuardianInfo, Identity, InterviewFeedback, InterviewSchedule, NewInquiry, PreviousSchooling,
    TestResult, TestSchedule,
};
use crate::admissions::engine::{AdmissionWorkflowEngine, WorkflowSettings};
use crate::admissions::memory::{InMemoryBackend, InMemoryIdentityStore};
use crate::admissions::ports::{
    AdmissionPorts, AdmissionStore, DocumentError, DocumentGenerator, IdentityStore,
    Notification, NotificationDispatcher, NotificationError, OfferLetterRequest, RepositoryError,
};

pub(super) fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 4, 15).expect("valid date")
}

pub(super) fn ctx() -> RequestContext {
    RequestContext::new(ActorId("registrar-7".to_string()))
}

pub(super) fn backend() -> InMemoryBackend {
    InMemoryBackend::new(Duration::from_millis(200), "https://documents.test")
}

pub(super) fn engine_with(ports: AdmissionPorts) -> AdmissionWorkflowEngine {
    AdmissionWorkflowEngine::new(
        ports,
        WorkflowSettings::default(),
        Arc::new(FixedClock::on(today())),
    )
}

pub(super) fn build_engine() -> (AdmissionWorkflowEngine, InMemoryBackend) {
    let backend = backend();
    (engine_with(backend.ports()), backend)
}

pub(super) fn inquiry() -> NewInquiry {
    NewInquiry {
        applicant: ApplicantDetails {
            first_name: "Aarav".to_string(),
            last_name: "Shah".to_string(),
            date_of_birth: NaiveDate::from_ymd_opt(2014, 6, 3),
            gender: None,
            applying_for_class: "5".to_string(),
            contact: ContactInfo::default(),
            address: Some("12 Lake Road".to_string()),
        },
        guardian: GuardianInfo {
            name: "Mehul Shah".to_string(),
            relation: Some("father".to_string()),
            contact: ContactInfo {
                phone: Some("+91 98200 11111".to_string()),
                email: Some("mehul@example.com".to_string()),
            },
        },
    }
}

pub(super) fn test_schedule() -> TestSchedule {
    TestSchedule {
        test_date: NaiveDate::from_ymd_opt(2024, 4, 20).expect("valid date"),
    }
}

pub(super) fn test_result() -> TestResult {
    TestResult {
        score: 82,
        max_score: 100,
        remarks: Some("Strong in arithmetic".to_string()),
    }
}

pub(super) fn interview_schedule() -> InterviewSchedule {
    InterviewSchedule {
        interview_date: NaiveDate::from_ymd_opt(2024, 4, 25).expect("valid date"),
    }
}

pub(super) fn feedback() -> InterviewFeedback {
    InterviewFeedback {
        feedback: "Curious and articulate".to_string(),
        rating: Some(4),
    }
}

/// Inquiry → Applied → Admitted.
pub(super) async fn admitted(engine: &AdmissionWorkflowEngine) -> AdmissionRecord {
    let record = engine
        .create_inquiry(&ctx(), inquiry())
        .await
        .expect("inquiry recorded");
    engine
        .convert_to_application(&ctx(), record.admission_id, PreviousSchooling::default())
        .await
        .expect("application accepted");
    engine
        .admit(&ctx(), record.admission_id)
        .await
        .expect("admitted")
}

/// Drive a fresh record into `status` along the longest path.
pub(super) async fn record_in(
    engine: &AdmissionWorkflowEngine,
    status: AdmissionStatus,
) -> AdmissionId {
    let id = engine
        .create_inquiry(&ctx(), inquiry())
        .await
        .expect("inquiry recorded")
        .admission_id;
    let path = [
        AdmissionStatus::Applied,
        AdmissionStatus::TestScheduled,
        AdmissionStatus::Tested,
        AdmissionStatus::InterviewScheduled,
        AdmissionStatus::Interviewed,
        AdmissionStatus::Admitted,
        AdmissionStatus::Enrolled,
    ];

    match status {
        AdmissionStatus::Inquiry => return id,
        AdmissionStatus::Rejected => {
            engine.reject(&ctx(), id, "incomplete").await.expect("rejected");
            return id;
        }
        AdmissionStatus::Withdrawn => {
            engine.withdraw(&ctx(), id, "moved city").await.expect("withdrawn");
            return id;
        }
        _ => {}
    }

    for step in path {
        let outcome = match step {
            AdmissionStatus::Applied => engine
                .convert_to_application(&ctx(), id, PreviousSchooling::default())
                .await
                .map(|_| ()),
            AdmissionStatus::TestScheduled => {
                engine.schedule_test(&ctx(), id, test_schedule()).await.map(|_| ())
            }
            AdmissionStatus::Tested => {
                engine.record_test_score(&ctx(), id, test_result()).await.map(|_| ())
            }
            AdmissionStatus::InterviewScheduled => engine
                .schedule_interview(&ctx(), id, interview_schedule())
                .await
                .map(|_| ()),
            AdmissionStatus::Interviewed => {
                engine.record_interview(&ctx(), id, feedback()).await.map(|_| ())
            }
            AdmissionStatus::Admitted => engine.admit(&ctx(), id).await.map(|_| ()),
            _ => engine.enroll(&ctx(), id).await.map(|_| ()),
        };
        outcome.expect("path step succeeds");

        if step == status {
            break;
        }
    }
    id
}

#[derive(Default)]
pub(super) struct FailingDocuments;

#[async_trait]
impl DocumentGenerator for FailingDocuments {
    async fn generate_offer_letter(
        &self,
        _request: OfferLetterRequest,
    ) -> Result<String, DocumentError> {
        Err(DocumentError::Generation("renderer offline".to_string()))
    }
}

#[derive(Default)]
pub(super) struct FailingNotifier;

#[async_trait]
impl NotificationDispatcher for FailingNotifier {
    async fn send(&self, _notification: Notification) -> Result<(), NotificationError> {
        Err(NotificationError::Transport("sms gateway down".to_string()))
    }
}

/// Identity store that refuses to create usernames with the given prefix.
pub(super) struct RefusingIdentityStore {
    pub(super) inner: Arc<InMemoryIdentityStore>,
    pub(super) refused_prefix: &'static str,
}

#[async_trait]
impl IdentityStore for RefusingIdentityStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<Identity>, RepositoryError> {
        self.inner.find_by_username(username).await
    }

    async fn create(&self, identity: Identity) -> Result<Identity, RepositoryError> {
        if identity.username.starts_with(self.refused_prefix) {
            return Err(RepositoryError::Unavailable("directory offline".to_string()));
        }
        self.inner.create(identity).await
    }

    async fn delete(&self, username: &str) -> Result<(), RepositoryError> {
        self.inner.delete(username).await
    }
}

/// Admission store whose first `conflicts` updates report a version conflict.
pub(super) struct ContendedAdmissionStore {
    pub(super) inner: Arc<dyn AdmissionStore>,
    pub(super) conflicts: AtomicU32,
}

#[async_trait]
impl AdmissionStore for ContendedAdmissionStore {
    async fn insert(&self, record: AdmissionRecord) -> Result<AdmissionRecord, RepositoryError> {
        self.inner.insert(record).await
    }

    async fn update(&self, record: AdmissionRecord) -> Result<AdmissionRecord, RepositoryError> {
        let remaining = self.conflicts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.conflicts.store(remaining - 1, Ordering::SeqCst);
            return Err(RepositoryError::Conflict);
        }
        self.inner.update(record).await
    }

    async fn fetch(&self, id: &AdmissionId) -> Result<Option<AdmissionRecord>, RepositoryError> {
        self.inner.fetch(id).await
    }

    async fn find_by_temporary_id(
        &self,
        temporary_id: &SequentialCode,
    ) -> Result<Option<AdmissionRecord>, RepositoryError> {
        self.inner.find_by_temporary_id(temporary_id).await
    }

    async fn list_by_status(
        &self,
        status: AdmissionStatus,
    ) -> Result<Vec<AdmissionRecord>, RepositoryError> {
        self.inner.list_by_status(status).await
    }
}

/// Decrement `counter` if it is positive; true when a failure should be injected.
fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Identity store that stalls before creating usernames with the given prefix.
pub(super) struct StallingIdentityStore {
    pub(super) inner: Arc<InMemoryIdentityStore>,
    pub(super) stalled_prefix: &'static str,
    pub(super) stall: Duration,
}

#[async_trait]
impl IdentityStore for StallingIdentityStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<Identity>, RepositoryError> {
        self.inner.find_by_username(username).await
    }

    async fn create(&self, identity: Identity) -> Result<Identity, RepositoryError> {
        if identity.username.starts_with(self.stalled_prefix) {
            tokio::time::sleep(self.stall).await;
        }
        self.inner.create(identity).await
    }

    async fn delete(&self, username: &str) -> Result<(), RepositoryError> {
        self.inner.delete(username).await
    }
}

/// Identity store whose next `create_failures` creates under `failing_prefix`
/// and next `delete_failures` deletes report the directory as unavailable.
pub(super) struct FlakyIdentityStore {
    pub(super) inner: Arc<InMemoryIdentityStore>,
    pub(super) failing_prefix: &'static str,
    pub(super) create_failures: AtomicU32,
    pub(super) delete_failures: AtomicU32,
}

#[async_trait]
impl IdentityStore for FlakyIdentityStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<Identity>, RepositoryError> {
        self.inner.find_by_username(username).await
    }

    async fn create(&self, identity: Identity) -> Result<Identity, RepositoryError> {
        if identity.username.starts_with(self.failing_prefix) && take_one(&self.create_failures) {
            return Err(RepositoryError::Unavailable("directory offline".to_string()));
        }
        self.inner.create(identity).await
    }

    async fn delete(&self, username: &str) -> Result<(), RepositoryError> {
        if take_one(&self.delete_failures) {
            return Err(RepositoryError::Unavailable("directory offline".to_string()));
        }
        self.inner.delete(username).await
    }
}

/// Admission store that stalls before every update.
pub(super) struct StallingAdmissionStore {
    pub(super) inner: Arc<dyn AdmissionStore>,
    pub(super) stall: Duration,
}

#[async_trait]
impl AdmissionStore for StallingAdmissionStore {
    async fn insert(&self, record: AdmissionRecord) -> Result<AdmissionRecord, RepositoryError> {
        self.inner.insert(record).await
    }

    async fn update(&self, record: AdmissionRecord) -> Result<AdmissionRecord, RepositoryError> {
        tokio::time::sleep(self.stall).await;
        self.inner.update(record).await
    }

    async fn fetch(&self, id: &AdmissionId) -> Result<Option<AdmissionRecord>, RepositoryError> {
        self.inner.fetch(id).await
    }

    async fn find_by_temporary_id(
        &self,
        temporary_id: &SequentialCode,
    ) -> Result<Option<AdmissionRecord>, RepositoryError> {
        self.inner.find_by_temporary_id(temporary_id).await
    }

    async fn list_by_status(
        &self,
        status: AdmissionStatus,
    ) -> Result<Vec<AdmissionRecord>, RepositoryError> {
        self.inner.list_by_status(status).await
    }
}
