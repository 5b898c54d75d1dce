//! In-process adapters for every port. Used by the API service and the tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, RwLock};
use tracing::info;

use super::codes::{CodeScope, SequentialCode};
use super::domain::{AdmissionId, AdmissionRecord, AdmissionStatus, Identity, Student, StudentId};
use super::ports::{
    AdmissionPorts, AdmissionStore, DocumentError, DocumentGenerator, IdentityStore,
    Notification, NotificationDispatcher, NotificationError, OfferLetterRequest, RepositoryError,
    SequenceLease, SequenceStore, StudentStore,
};

/// Thread-safe admission store with compare-and-swap updates.
#[derive(Default, Clone)]
pub struct InMemoryAdmissionStore {
    records: Arc<RwLock<HashMap<AdmissionId, AdmissionRecord>>>,
}

impl InMemoryAdmissionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AdmissionStore for InMemoryAdmissionStore {
    async fn insert(&self, record: AdmissionRecord) -> Result<AdmissionRecord, RepositoryError> {
        let mut records = self.records.write().await;
        let duplicate = records.contains_key(&record.admission_id)
            || records
                .values()
                .any(|existing| existing.temporary_id == record.temporary_id);
        if duplicate {
            return Err(RepositoryError::Conflict);
        }
        records.insert(record.admission_id, record.clone());
        Ok(record)
    }

    async fn update(&self, mut record: AdmissionRecord) -> Result<AdmissionRecord, RepositoryError> {
        let mut records = self.records.write().await;
        let stored = records
            .get(&record.admission_id)
            .ok_or(RepositoryError::NotFound)?;
        if stored.version != record.version {
            return Err(RepositoryError::Conflict);
        }
        record.version += 1;
        records.insert(record.admission_id, record.clone());
        Ok(record)
    }

    async fn fetch(&self, id: &AdmissionId) -> Result<Option<AdmissionRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records.get(id).cloned())
    }

    async fn find_by_temporary_id(
        &self,
        temporary_id: &SequentialCode,
    ) -> Result<Option<AdmissionRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .find(|record| &record.temporary_id == temporary_id)
            .cloned())
    }

    async fn list_by_status(
        &self,
        status: AdmissionStatus,
    ) -> Result<Vec<AdmissionRecord>, RepositoryError> {
        let records = self.records.read().await;
        let mut matching: Vec<_> = records
            .values()
            .filter(|record| record.status == status)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.temporary_id.cmp(&b.temporary_id));
        Ok(matching)
    }
}

#[derive(Default, Clone)]
pub struct InMemoryStudentStore {
    students: Arc<RwLock<HashMap<StudentId, Student>>>,
}

impl InMemoryStudentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.students.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl StudentStore for InMemoryStudentStore {
    async fn insert(&self, student: Student) -> Result<Student, RepositoryError> {
        let mut students = self.students.write().await;
        let duplicate = students.contains_key(&student.student_id)
            || students
                .values()
                .any(|existing| existing.student_code == student.student_code);
        if duplicate {
            return Err(RepositoryError::Conflict);
        }
        students.insert(student.student_id, student.clone());
        Ok(student)
    }

    async fn fetch(&self, id: &StudentId) -> Result<Option<Student>, RepositoryError> {
        Ok(self.students.read().await.get(id).cloned())
    }

    async fn find_by_code(
        &self,
        code: &SequentialCode,
    ) -> Result<Option<Student>, RepositoryError> {
        let students = self.students.read().await;
        Ok(students
            .values()
            .find(|student| &student.student_code == code)
            .cloned())
    }

    async fn delete(&self, id: &StudentId) -> Result<(), RepositoryError> {
        self.students
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound)
    }
}

#[derive(Default, Clone)]
pub struct InMemoryIdentityStore {
    identities: Arc<RwLock<HashMap<String, Identity>>>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn usernames(&self) -> Vec<String> {
        let mut names: Vec<_> = self.identities.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<Identity>, RepositoryError> {
        Ok(self.identities.read().await.get(username).cloned())
    }

    async fn create(&self, identity: Identity) -> Result<Identity, RepositoryError> {
        let mut identities = self.identities.write().await;
        if identities.contains_key(&identity.username) {
            return Err(RepositoryError::Conflict);
        }
        identities.insert(identity.username.clone(), identity.clone());
        Ok(identity)
    }

    async fn delete(&self, username: &str) -> Result<(), RepositoryError> {
        self.identities
            .write()
            .await
            .remove(username)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound)
    }
}

#[derive(Clone, Default)]
struct ScopeSlot {
    lock: Arc<AsyncMutex<()>>,
    committed: Arc<AtomicU32>,
}

/// Per-scope sequence maxima guarded by async mutexes.
///
/// Lock waits longer than `lock_timeout` are reported as [`RepositoryError::Conflict`].
pub struct InMemorySequenceStore {
    scopes: AsyncMutex<HashMap<CodeScope, ScopeSlot>>,
    lock_timeout: Duration,
}

impl InMemorySequenceStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            scopes: AsyncMutex::new(HashMap::new()),
            lock_timeout,
        }
    }

    /// Set the committed maximum for a scope, e.g. when importing legacy codes.
    pub async fn seed(&self, scope: &CodeScope, last_issued: u32) {
        let slot = self.slot(scope).await;
        let _guard = slot.lock.lock().await;
        slot.committed.store(last_issued, Ordering::SeqCst);
    }

    async fn slot(&self, scope: &CodeScope) -> ScopeSlot {
        let mut scopes = self.scopes.lock().await;
        scopes.entry(scope.clone()).or_default().clone()
    }
}

struct InMemoryLease {
    scope: CodeScope,
    committed: Arc<AtomicU32>,
    _guard: OwnedMutexGuard<()>,
}

impl SequenceLease for InMemoryLease {
    fn scope(&self) -> &CodeScope {
        &self.scope
    }

    fn last_issued(&self) -> u32 {
        self.committed.load(Ordering::SeqCst)
    }

    fn commit(self: Box<Self>, last_issued: u32) {
        self.committed.store(last_issued, Ordering::SeqCst);
    }
}

#[async_trait]
impl SequenceStore for InMemorySequenceStore {
    async fn acquire(&self, scope: &CodeScope) -> Result<Box<dyn SequenceLease>, RepositoryError> {
        let slot = self.slot(scope).await;
        let guard = tokio::time::timeout(self.lock_timeout, slot.lock.clone().lock_owned())
            .await
            .map_err(|_| RepositoryError::Conflict)?;

        Ok(Box::new(InMemoryLease {
            scope: scope.clone(),
            committed: slot.committed,
            _guard: guard,
        }))
    }

    async fn last_issued(&self, scope: &CodeScope) -> Result<u32, RepositoryError> {
        let slot = self.slot(scope).await;
        Ok(slot.committed.load(Ordering::SeqCst))
    }
}

/// Dispatcher that keeps every notification for later inspection.
#[derive(Default, Clone)]
pub struct RecordingNotificationDispatcher {
    events: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotificationDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Notification> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingNotificationDispatcher {
    async fn send(&self, notification: Notification) -> Result<(), NotificationError> {
        info!(
            template = ?notification.template,
            admission_id = %notification.admission_id,
            "notification queued"
        );
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification);
        Ok(())
    }
}

/// Offer-letter generator that derives a stable URL from the temporary id.
#[derive(Debug, Clone)]
pub struct StaticOfferLetterGenerator {
    base_url: String,
}

impl StaticOfferLetterGenerator {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl DocumentGenerator for StaticOfferLetterGenerator {
    async fn generate_offer_letter(
        &self,
        request: OfferLetterRequest,
    ) -> Result<String, DocumentError> {
        if request.temporary_id.is_empty() {
            return Err(DocumentError::Generation(
                "temporary id is required".to_string(),
            ));
        }
        Ok(format!(
            "{}/offer-letters/{}.pdf",
            self.base_url.trim_end_matches('/'),
            request.temporary_id
        ))
    }
}

/// Concrete handles to an in-memory wiring, kept for inspection.
#[derive(Clone)]
pub struct InMemoryBackend {
    pub admissions: Arc<InMemoryAdmissionStore>,
    pub students: Arc<InMemoryStudentStore>,
    pub identities: Arc<InMemoryIdentityStore>,
    pub sequences: Arc<InMemorySequenceStore>,
    pub notifications: Arc<RecordingNotificationDispatcher>,
    pub documents: Arc<StaticOfferLetterGenerator>,
}

impl InMemoryBackend {
    pub fn new(lock_timeout: Duration, document_base_url: impl Into<String>) -> Self {
        Self {
            admissions: Arc::new(InMemoryAdmissionStore::new()),
            students: Arc::new(InMemoryStudentStore::new()),
            identities: Arc::new(InMemoryIdentityStore::new()),
            sequences: Arc::new(InMemorySequenceStore::new(lock_timeout)),
            notifications: Arc::new(RecordingNotificationDispatcher::new()),
            documents: Arc::new(StaticOfferLetterGenerator::new(document_base_url)),
        }
    }

    pub fn ports(&self) -> AdmissionPorts {
        AdmissionPorts {
            admissions: self.admissions.clone(),
            students: self.students.clone(),
            identities: self.identities.clone(),
            sequences: self.sequences.clone(),
            notifications: self.notifications.clone(),
            documents: self.documents.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admissions::domain::{
        ApplicantDetails, ContactInfo, GuardianInfo, WorkflowDates,
    };
    use chrono::NaiveDate;

    fn record(sequence: u32) -> AdmissionRecord {
        AdmissionRecord {
            admission_id: AdmissionId::new(),
            temporary_id: SequentialCode::new(CodeScope::inquiry("SCH", 2024), sequence).unwrap(),
            status: AdmissionStatus::Inquiry,
            applicant: ApplicantDetails {
                first_name: "Aarav".to_string(),
                last_name: "Shah".to_string(),
                date_of_birth: None,
                gender: None,
                applying_for_class: "5".to_string(),
                contact: ContactInfo::default(),
                address: None,
            },
            guardian: GuardianInfo {
                name: "Mehul Shah".to_string(),
                relation: None,
                contact: ContactInfo::default(),
            },
            previous_schooling: None,
            dates: WorkflowDates::new(NaiveDate::from_ymd_opt(2024, 4, 1).unwrap()),
            test_result: None,
            interview: None,
            admission_offer_letter_url: None,
            enrolled_student_id: None,
            rejection_reason: None,
            withdrawal_reason: None,
            history: Vec::new(),
            version: 0,
        }
    }

    #[tokio::test]
    async fn update_rejects_stale_versions() {
        let store = InMemoryAdmissionStore::new();
        let stored = store.insert(record(1)).await.unwrap();

        let mut first = stored.clone();
        first.status = AdmissionStatus::Applied;
        let updated = store.update(first).await.expect("fresh version wins");
        assert_eq!(updated.version, 1);

        let mut stale = stored;
        stale.status = AdmissionStatus::Rejected;
        assert_eq!(store.update(stale).await, Err(RepositoryError::Conflict));

        let current = store.fetch(&updated.admission_id).await.unwrap().unwrap();
        assert_eq!(current.status, AdmissionStatus::Applied);
    }

    #[tokio::test]
    async fn insert_refuses_duplicate_temporary_ids() {
        let store = InMemoryAdmissionStore::new();
        store.insert(record(7)).await.unwrap();
        assert_eq!(
            store.insert(record(7)).await.map(|_| ()),
            Err(RepositoryError::Conflict)
        );
    }

    #[tokio::test]
    async fn list_by_status_orders_by_temporary_id() {
        let store = InMemoryAdmissionStore::new();
        for sequence in [3, 1, 2] {
            store.insert(record(sequence)).await.unwrap();
        }
        let listed: Vec<u32> = store
            .list_by_status(AdmissionStatus::Inquiry)
            .await
            .unwrap()
            .iter()
            .map(|record| record.temporary_id.sequence())
            .collect();
        assert_eq!(listed, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn sequence_lease_times_out_while_held() {
        let store = InMemorySequenceStore::new(Duration::from_millis(20));
        let scope = CodeScope::student("SCH", 2024);
        let held = store.acquire(&scope).await.unwrap();

        assert!(matches!(
            store.acquire(&scope).await,
            Err(RepositoryError::Conflict)
        ));
        held.commit(4);

        let lease = store.acquire(&scope).await.unwrap();
        assert_eq!(lease.last_issued(), 4);
    }

    #[tokio::test]
    async fn offer_letter_url_uses_temporary_id() {
        let generator = StaticOfferLetterGenerator::new("https://docs.example/");
        let url = generator
            .generate_offer_letter(OfferLetterRequest {
                admission_id: AdmissionId::new(),
                temporary_id: "SCH-INQ-2024-0001".to_string(),
                applicant_name: "Aarav Shah".to_string(),
                guardian_name: "Mehul Shah".to_string(),
                class_name: "5".to_string(),
                admission_date: NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
            })
            .await
            .unwrap();
        assert_eq!(url, "https://docs.example/offer-letters/SCH-INQ-2024-0001.pdf");
    }
}
