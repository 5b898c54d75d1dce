//! `Admitted → Enrolled` as an ordered unit of work.
//!
//! Steps and their compensations:
//!
//! | step | action | on later failure |
//! |---|---|---|
//! | prepare | check status, lease the student-code scope, stage the code | lease dropped, code rolled back |
//! | 1 | insert the student | student deleted |
//! | 2 | provision student and parent identities | identities bound to the new student revoked |
//! | 3 | compare-and-swap the admission to `Enrolled` | restored only if the swap landed after the deadline |
//! | 4 | commit the code lease | none |
//! | 5 | send credentials | best-effort, never undone |
//!
//! Prepare and steps 1 to 3 run under the request deadline. The status swap is the
//! last write, so an `Enrolled` record is only visible once the student and its
//! identities exist. Any failure or expiry unwinds the completed steps in reverse,
//! each bounded by the operation timeout, and the call fails.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{error, info, warn};

use super::codes::{CodeScope, SequentialCode};
use super::context::{Clock, RequestContext};
use super::credentials::{
    parent_username, student_username, IdentityProvisioner, IdentityRequest, ProvisionedIdentity,
};
use super::domain::{AdmissionId, AdmissionRecord, IdentityRole, Student, StudentId};
use super::engine::{within, WorkflowSettings};
use super::error::AdmissionError;
use super::notify::Notifier;
use super::ports::{AdmissionStore, NotificationTemplate, RepositoryError, StudentStore};
use super::sequence::{AllocationTransaction, SequentialCodeIssuer};
use super::transitions::Operation;

/// Credentials produced by an enrollment. Plaintext passwords appear only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrollmentCredentials {
    pub student: ProvisionedIdentity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<ProvisionedIdentity>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrollmentOutcome {
    pub admission: AdmissionRecord,
    pub student: Student,
    pub credentials: EnrollmentCredentials,
}

/// Writes attempted so far. Each entry is recorded before its call goes out, so a
/// write cut off by the deadline is still compensated.
#[derive(Default)]
struct Attempted {
    student: Option<Student>,
    identities: Vec<String>,
    admission: Option<AdmissionRecord>,
}

pub struct EnrollmentFinalizer {
    admissions: Arc<dyn AdmissionStore>,
    students: Arc<dyn StudentStore>,
    issuer: SequentialCodeIssuer,
    provisioner: IdentityProvisioner,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    settings: WorkflowSettings,
}

impl EnrollmentFinalizer {
    pub(crate) fn new(
        admissions: Arc<dyn AdmissionStore>,
        students: Arc<dyn StudentStore>,
        issuer: SequentialCodeIssuer,
        provisioner: IdentityProvisioner,
        notifier: Notifier,
        clock: Arc<dyn Clock>,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            admissions,
            students,
            issuer,
            provisioner,
            notifier,
            clock,
            settings,
        }
    }

    pub async fn finalize(
        &self,
        ctx: &RequestContext,
        admission_id: AdmissionId,
        deadline: Instant,
    ) -> Result<EnrollmentOutcome, AdmissionError> {
        let (transaction, code, admitted) = within(deadline, self.prepare(admission_id)).await?;
        let student = student_from(&admitted, code, self.clock.today());

        let mut attempted = Attempted::default();
        let written = within(deadline, self.write(ctx, admitted, student, &mut attempted)).await;
        let (enrolled, student, credentials) = match written {
            Ok(written) => written,
            Err(err) => {
                error!(
                    admission_id = %admission_id,
                    error = %err,
                    "enrollment failed; compensating"
                );
                self.compensate(attempted).await;
                return Err(err);
            }
        };

        transaction.commit();
        info!(
            admission_id = %admission_id,
            student_code = %student.student_code,
            actor = %ctx.actor,
            "admission enrolled"
        );

        self.notifier
            .send(
                &enrolled,
                NotificationTemplate::EnrollmentCredentials,
                credential_payload(&student, &credentials),
            )
            .await;

        Ok(EnrollmentOutcome {
            admission: enrolled,
            student,
            credentials,
        })
    }

    /// Fails before any write when the record is not `Admitted`.
    async fn prepare(
        &self,
        admission_id: AdmissionId,
    ) -> Result<(AllocationTransaction, SequentialCode, AdmissionRecord), AdmissionError> {
        let current = self.load(admission_id).await?;
        self.settings
            .policy
            .authorize(Operation::Enroll, current.status)?;

        let year = current
            .dates
            .admission_date
            .unwrap_or_else(|| self.clock.today())
            .year();
        let scope = CodeScope::student(self.settings.school_prefix.clone(), year);

        // Lease first, then re-read the row so the status check happens under the lease.
        let mut transaction = AllocationTransaction::new();
        let code = self.issuer.issue_in(&mut transaction, &scope).await?;
        let admitted = self.load(admission_id).await?;
        self.settings
            .policy
            .authorize(Operation::Enroll, admitted.status)?;

        Ok((transaction, code, admitted))
    }

    async fn write(
        &self,
        ctx: &RequestContext,
        admitted: AdmissionRecord,
        student: Student,
        attempted: &mut Attempted,
    ) -> Result<(AdmissionRecord, Student, EnrollmentCredentials), AdmissionError> {
        attempted.student = Some(student.clone());
        let student = self
            .students
            .insert(student)
            .await
            .map_err(AdmissionError::storage)?;

        let credentials = self
            .provision(&admitted, &student, &mut attempted.identities)
            .await?;
        let enrolled = self
            .mark_enrolled(ctx, admitted, &student, &mut attempted.admission)
            .await?;
        Ok((enrolled, student, credentials))
    }

    async fn provision(
        &self,
        admitted: &AdmissionRecord,
        student: &Student,
        attempted: &mut Vec<String>,
    ) -> Result<EnrollmentCredentials, AdmissionError> {
        let username = student_username(&student.student_code);
        attempted.push(username.clone());
        let student_identity = self
            .provisioner
            .provision(IdentityRequest {
                username,
                role: IdentityRole::Student,
                contact: student.contact.clone(),
                student_id: student.student_id,
            })
            .await?;

        let guardian_contact = &admitted.guardian.contact;
        let parent_identity = if guardian_contact.is_empty() {
            None
        } else {
            let username = parent_username(&student.student_code);
            attempted.push(username.clone());
            let identity = self
                .provisioner
                .provision(IdentityRequest {
                    username,
                    role: IdentityRole::Parent,
                    contact: guardian_contact.clone(),
                    student_id: student.student_id,
                })
                .await?;
            Some(identity)
        };

        Ok(EnrollmentCredentials {
            student: student_identity,
            parent: parent_identity,
        })
    }

    /// `before` holds the record each swap attempt was based on.
    async fn mark_enrolled(
        &self,
        ctx: &RequestContext,
        mut current: AdmissionRecord,
        student: &Student,
        before: &mut Option<AdmissionRecord>,
    ) -> Result<AdmissionRecord, AdmissionError> {
        let mut attempt = 0;
        loop {
            let mut next = current.clone();
            next.enrolled_student_id = Some(student.student_id);
            next.dates.enrollment_date.get_or_insert(student.enrolled_on);
            next.record_transition(
                Operation::Enroll.target(),
                &ctx.actor,
                self.clock.now(),
                Some(format!("student code {}", student.student_code)),
            );

            *before = Some(current.clone());
            match self.admissions.update(next).await {
                Ok(updated) => return Ok(updated),
                Err(RepositoryError::Conflict) if attempt < self.settings.conflict_retries => {
                    attempt += 1;
                    warn!(
                        admission_id = %current.admission_id,
                        attempt,
                        "admission changed concurrently, retrying"
                    );
                    current = self.load(current.admission_id).await?;
                    self.settings
                        .policy
                        .authorize(Operation::Enroll, current.status)?;
                }
                Err(RepositoryError::NotFound) => {
                    return Err(AdmissionError::AdmissionNotFound(current.admission_id))
                }
                Err(err) => return Err(AdmissionError::storage(err)),
            }
        }
    }

    /// Undo attempted writes in reverse. Runs after the request deadline may have
    /// passed, so each step gets its own operation timeout.
    async fn compensate(&self, attempted: Attempted) {
        let Some(student) = attempted.student else {
            return;
        };
        if let Some(before) = attempted.admission {
            self.restore_admission(before, student.student_id).await;
        }
        for username in attempted.identities.iter().rev() {
            let revoked = self
                .bounded(self.provisioner.revoke(username, student.student_id))
                .await;
            if let Err(err) = revoked {
                error!(%username, error = %err, "could not revoke identity");
            }
        }
        self.remove_student(&student).await;
    }

    async fn restore_admission(&self, before: AdmissionRecord, student_id: StudentId) {
        let admission_id = before.admission_id;
        let restored = self
            .bounded(async move {
                let current = self.load(admission_id).await?;
                if current.enrolled_student_id != Some(student_id) {
                    return Ok(false);
                }
                let restored = AdmissionRecord {
                    version: current.version,
                    ..before
                };
                self.admissions
                    .update(restored)
                    .await
                    .map_err(AdmissionError::storage)?;
                Ok::<_, AdmissionError>(true)
            })
            .await;

        match restored {
            Ok(true) => warn!(%admission_id, "late enrollment swap reverted"),
            Ok(false) => {}
            Err(err) => error!(%admission_id, error = %err, "could not restore admission"),
        }
    }

    async fn remove_student(&self, student: &Student) {
        let removed = self
            .bounded(async {
                match self.students.delete(&student.student_id).await {
                    Ok(()) | Err(RepositoryError::NotFound) => Ok(()),
                    Err(err) => Err(AdmissionError::storage(err)),
                }
            })
            .await;
        if let Err(err) = removed {
            error!(
                student_code = %student.student_code,
                error = %err,
                "could not remove student"
            );
        }
    }

    async fn bounded<T, Fut>(&self, future: Fut) -> Result<T, AdmissionError>
    where
        Fut: Future<Output = Result<T, AdmissionError>>,
    {
        within(Instant::now() + self.settings.operation_timeout, future).await
    }

    async fn load(&self, admission_id: AdmissionId) -> Result<AdmissionRecord, AdmissionError> {
        self.admissions
            .fetch(&admission_id)
            .await
            .map_err(AdmissionError::storage)?
            .ok_or(AdmissionError::AdmissionNotFound(admission_id))
    }
}

fn student_from(record: &AdmissionRecord, code: SequentialCode, today: NaiveDate) -> Student {
    let applicant = &record.applicant;
    Student {
        student_id: StudentId::new(),
        student_code: code,
        first_name: applicant.first_name.clone(),
        last_name: applicant.last_name.clone(),
        date_of_birth: applicant.date_of_birth,
        gender: applicant.gender.unwrap_or_default(),
        class_name: applicant.applying_for_class.clone(),
        contact: applicant.contact.clone(),
        guardian: record.guardian.clone(),
        address: applicant.address.clone(),
        admission_date: record.dates.admission_date.unwrap_or(today),
        enrolled_on: today,
    }
}

fn credential_payload(
    student: &Student,
    credentials: &EnrollmentCredentials,
) -> BTreeMap<String, String> {
    let mut payload = BTreeMap::new();
    payload.insert("student_code".to_string(), student.student_code.to_string());
    let identities = std::iter::once(&credentials.student).chain(credentials.parent.as_ref());
    for identity in identities {
        let role = identity.role().label();
        payload.insert(format!("{role}_username"), identity.username().to_string());
        if let Some(password) = identity.temporary_password() {
            payload.insert(format!("{role}_password"), password.to_string());
        }
    }
    payload
}
