use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, NaiveDate};
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use super::codes::{CodeScope, SequentialCode};
use super::context::{Clock, RequestContext};
use super::credentials::{CredentialHasher, IdentityProvisioner, Sha256CredentialHasher};
use super::domain::{
    require_text, AdmissionId, AdmissionRecord, AdmissionStatus, InterviewFeedback,
    InterviewOutcome, InterviewSchedule, NewInquiry, PreviousSchooling, TestOutcome, TestResult,
    TestSchedule, TransitionEvent, WorkflowDates,
};
use super::enrollment::{EnrollmentFinalizer, EnrollmentOutcome};
use super::error::{AdmissionError, Dependency};
use super::notify::Notifier;
use super::ports::{AdmissionPorts, NotificationTemplate, OfferLetterRequest, RepositoryError};
use super::sequence::{AllocationTransaction, SequentialCodeIssuer};
use super::transitions::{Operation, TransitionPolicy};
use crate::config::AdmissionsConfig;

/// Engine tunables, usually derived from [`AdmissionsConfig`].
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub school_prefix: String,
    pub policy: TransitionPolicy,
    pub conflict_retries: u32,
    /// Deadline applied when a [`RequestContext`] carries none.
    pub operation_timeout: Duration,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self::from_config(&AdmissionsConfig::default())
    }
}

impl WorkflowSettings {
    pub fn from_config(config: &AdmissionsConfig) -> Self {
        Self {
            school_prefix: config.school_prefix.clone(),
            policy: TransitionPolicy::new(config.interview_from_applied),
            conflict_retries: config.conflict_retries,
            operation_timeout: config.operation_timeout,
        }
    }
}

/// Owns the admission state machine and every write to admission records.
pub struct AdmissionWorkflowEngine {
    ports: AdmissionPorts,
    settings: WorkflowSettings,
    issuer: SequentialCodeIssuer,
    notifier: Notifier,
    finalizer: EnrollmentFinalizer,
    clock: Arc<dyn Clock>,
}

impl AdmissionWorkflowEngine {
    pub fn new(ports: AdmissionPorts, settings: WorkflowSettings, clock: Arc<dyn Clock>) -> Self {
        Self::with_hasher(ports, settings, clock, Arc::new(Sha256CredentialHasher))
    }

    pub fn with_hasher(
        ports: AdmissionPorts,
        settings: WorkflowSettings,
        clock: Arc<dyn Clock>,
        hasher: Arc<dyn CredentialHasher>,
    ) -> Self {
        let issuer = SequentialCodeIssuer::new(ports.sequences.clone(), settings.conflict_retries);
        let notifier = Notifier::new(ports.notifications.clone(), settings.operation_timeout);
        let provisioner = IdentityProvisioner::new(
            ports.identities.clone(),
            ports.students.clone(),
            hasher,
        );
        let finalizer = EnrollmentFinalizer::new(
            ports.admissions.clone(),
            ports.students.clone(),
            issuer.clone(),
            provisioner,
            notifier.clone(),
            clock.clone(),
            settings.clone(),
        );

        Self {
            ports,
            settings,
            issuer,
            notifier,
            finalizer,
            clock,
        }
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    pub fn policy(&self) -> &TransitionPolicy {
        &self.settings.policy
    }

    /// Record a new inquiry under a freshly issued temporary id.
    #[instrument(skip_all, fields(actor = %ctx.actor))]
    pub async fn create_inquiry(
        &self,
        ctx: &RequestContext,
        inquiry: NewInquiry,
    ) -> Result<AdmissionRecord, AdmissionError> {
        inquiry.validate()?;
        let deadline = self.deadline(ctx);
        let today = self.clock.today();
        let scope = CodeScope::inquiry(self.settings.school_prefix.clone(), today.year());

        let (transaction, temporary_id) = within(deadline, async {
            let mut transaction = AllocationTransaction::new();
            let code = self.issuer.issue_in(&mut transaction, &scope).await?;
            Ok((transaction, code))
        })
        .await?;

        let record = AdmissionRecord {
            admission_id: AdmissionId::new(),
            temporary_id,
            status: AdmissionStatus::Inquiry,
            applicant: inquiry.applicant,
            guardian: inquiry.guardian,
            previous_schooling: None,
            dates: WorkflowDates::new(today),
            test_result: None,
            interview: None,
            admission_offer_letter_url: None,
            enrolled_student_id: None,
            rejection_reason: None,
            withdrawal_reason: None,
            history: vec![TransitionEvent {
                from: None,
                to: AdmissionStatus::Inquiry,
                at: self.clock.now(),
                actor: ctx.actor.clone(),
                note: None,
            }],
            version: 0,
        };

        let stored = within(deadline, async {
            self.ports
                .admissions
                .insert(record)
                .await
                .map_err(AdmissionError::storage)
        })
        .await?;
        transaction.commit();

        info!(
            admission_id = %stored.admission_id,
            temporary_id = %stored.temporary_id,
            "inquiry recorded"
        );
        self.notifier
            .send(&stored, NotificationTemplate::InquiryReceived, BTreeMap::new())
            .await;
        Ok(stored)
    }

    #[instrument(skip_all, fields(admission_id = %admission_id, actor = %ctx.actor))]
    pub async fn convert_to_application(
        &self,
        ctx: &RequestContext,
        admission_id: AdmissionId,
        schooling: PreviousSchooling,
    ) -> Result<AdmissionRecord, AdmissionError> {
        let record = self
            .advance(ctx, admission_id, Operation::ConvertToApplication, None, |record, today| {
                record.previous_schooling = Some(schooling.clone());
                record.dates.application_date.get_or_insert(today);
            })
            .await?;
        self.notifier
            .send(&record, NotificationTemplate::ApplicationReceived, BTreeMap::new())
            .await;
        Ok(record)
    }

    #[instrument(skip_all, fields(admission_id = %admission_id, actor = %ctx.actor))]
    pub async fn schedule_test(
        &self,
        ctx: &RequestContext,
        admission_id: AdmissionId,
        schedule: TestSchedule,
    ) -> Result<AdmissionRecord, AdmissionError> {
        let record = self
            .advance(ctx, admission_id, Operation::ScheduleTest, None, |record, _| {
                record.dates.admission_test_date.get_or_insert(schedule.test_date);
            })
            .await?;
        self.notifier
            .send(
                &record,
                NotificationTemplate::TestScheduled,
                single("test_date", schedule.test_date),
            )
            .await;
        Ok(record)
    }

    #[instrument(skip_all, fields(admission_id = %admission_id, actor = %ctx.actor))]
    pub async fn record_test_score(
        &self,
        ctx: &RequestContext,
        admission_id: AdmissionId,
        result: TestResult,
    ) -> Result<AdmissionRecord, AdmissionError> {
        result.validate()?;
        let note = format!("score {}/{}", result.score, result.max_score);
        self.advance(ctx, admission_id, Operation::RecordTestScore, Some(note), |record, _| {
            record.test_result = Some(TestOutcome {
                score: result.score,
                max_score: result.max_score,
                remarks: result.remarks.clone(),
            });
        })
        .await
    }

    #[instrument(skip_all, fields(admission_id = %admission_id, actor = %ctx.actor))]
    pub async fn schedule_interview(
        &self,
        ctx: &RequestContext,
        admission_id: AdmissionId,
        schedule: InterviewSchedule,
    ) -> Result<AdmissionRecord, AdmissionError> {
        let record = self
            .advance(ctx, admission_id, Operation::ScheduleInterview, None, |record, _| {
                record.dates.interview_date.get_or_insert(schedule.interview_date);
            })
            .await?;
        self.notifier
            .send(
                &record,
                NotificationTemplate::InterviewScheduled,
                single("interview_date", schedule.interview_date),
            )
            .await;
        Ok(record)
    }

    #[instrument(skip_all, fields(admission_id = %admission_id, actor = %ctx.actor))]
    pub async fn record_interview(
        &self,
        ctx: &RequestContext,
        admission_id: AdmissionId,
        feedback: InterviewFeedback,
    ) -> Result<AdmissionRecord, AdmissionError> {
        feedback.validate()?;
        self.advance(ctx, admission_id, Operation::RecordInterview, None, |record, _| {
            record.interview = Some(InterviewOutcome {
                feedback: feedback.feedback.clone(),
                rating: feedback.rating,
            });
        })
        .await
    }

    /// Admit after generating the offer letter. A failed generation leaves the
    /// record untouched.
    #[instrument(skip_all, fields(admission_id = %admission_id, actor = %ctx.actor))]
    pub async fn admit(
        &self,
        ctx: &RequestContext,
        admission_id: AdmissionId,
    ) -> Result<AdmissionRecord, AdmissionError> {
        let deadline = self.deadline(ctx);
        let mut attempt = 0;
        loop {
            let (current, letter_url) = within(deadline, async {
                let current = self.load(admission_id).await?;
                self.settings
                    .policy
                    .authorize(Operation::Admit, current.status)?;
                let url = self.offer_letter(&current).await?;
                Ok((current, url))
            })
            .await?;

            let committed = self
                .try_commit(ctx, deadline, current, Operation::Admit, None, |record, today| {
                    record.dates.admission_date.get_or_insert(today);
                    record.admission_offer_letter_url = Some(letter_url.clone());
                })
                .await?;

            match committed {
                Some(record) => {
                    self.notifier
                        .send(
                            &record,
                            NotificationTemplate::AdmissionOffer,
                            single("offer_letter_url", &letter_url),
                        )
                        .await;
                    return Ok(record);
                }
                None => self.note_conflict(admission_id, &mut attempt)?,
            }
        }
    }

    /// Finalize enrollment: student code, student entity and login identities.
    #[instrument(skip_all, fields(admission_id = %admission_id, actor = %ctx.actor))]
    pub async fn enroll(
        &self,
        ctx: &RequestContext,
        admission_id: AdmissionId,
    ) -> Result<EnrollmentOutcome, AdmissionError> {
        let deadline = self.deadline(ctx);
        self.finalizer.finalize(ctx, admission_id, deadline).await
    }

    #[instrument(skip_all, fields(admission_id = %admission_id, actor = %ctx.actor))]
    pub async fn reject(
        &self,
        ctx: &RequestContext,
        admission_id: AdmissionId,
        reason: &str,
    ) -> Result<AdmissionRecord, AdmissionError> {
        require_text("reason", reason)?;
        let reason = reason.trim().to_string();
        let record = self
            .advance(
                ctx,
                admission_id,
                Operation::Reject,
                Some(reason.clone()),
                |record, today| {
                    record.rejection_reason = Some(reason.clone());
                    record.dates.rejection_date.get_or_insert(today);
                },
            )
            .await?;
        self.notifier
            .send(&record, NotificationTemplate::Rejection, single("reason", &reason))
            .await;
        Ok(record)
    }

    #[instrument(skip_all, fields(admission_id = %admission_id, actor = %ctx.actor))]
    pub async fn withdraw(
        &self,
        ctx: &RequestContext,
        admission_id: AdmissionId,
        reason: &str,
    ) -> Result<AdmissionRecord, AdmissionError> {
        require_text("reason", reason)?;
        let reason = reason.trim().to_string();
        let record = self
            .advance(
                ctx,
                admission_id,
                Operation::Withdraw,
                Some(reason.clone()),
                |record, today| {
                    record.withdrawal_reason = Some(reason.clone());
                    record.dates.withdrawal_date.get_or_insert(today);
                },
            )
            .await?;
        self.notifier
            .send(&record, NotificationTemplate::Withdrawal, BTreeMap::new())
            .await;
        Ok(record)
    }

    pub async fn get(&self, admission_id: AdmissionId) -> Result<AdmissionRecord, AdmissionError> {
        self.load(admission_id).await
    }

    pub async fn find_by_temporary_id(
        &self,
        temporary_id: &str,
    ) -> Result<Option<AdmissionRecord>, AdmissionError> {
        let code = SequentialCode::parse(temporary_id)?;
        self.ports
            .admissions
            .find_by_temporary_id(&code)
            .await
            .map_err(AdmissionError::storage)
    }

    pub async fn list_by_status(
        &self,
        status: AdmissionStatus,
    ) -> Result<Vec<AdmissionRecord>, AdmissionError> {
        self.ports
            .admissions
            .list_by_status(status)
            .await
            .map_err(AdmissionError::storage)
    }

    /// Statuses reachable from the record's current status.
    pub async fn allowed_transitions(
        &self,
        admission_id: AdmissionId,
    ) -> Result<Vec<AdmissionStatus>, AdmissionError> {
        let record = self.load(admission_id).await?;
        Ok(self.settings.policy.next_states(record.status))
    }

    /// Student codes committed for `year`.
    pub async fn count_issued(&self, year: i32) -> Result<u32, AdmissionError> {
        self.issuer.count_issued(&self.student_scope(year)).await
    }

    /// Display-only preview of the next student code sequence for `year`.
    pub async fn peek_next(&self, year: i32) -> Result<u32, AdmissionError> {
        self.issuer.peek_next(&self.student_scope(year)).await
    }

    fn student_scope(&self, year: i32) -> CodeScope {
        CodeScope::student(self.settings.school_prefix.clone(), year)
    }

    fn deadline(&self, ctx: &RequestContext) -> Instant {
        ctx.deadline
            .unwrap_or_else(|| Instant::now() + self.settings.operation_timeout)
    }

    async fn load(&self, admission_id: AdmissionId) -> Result<AdmissionRecord, AdmissionError> {
        self.ports
            .admissions
            .fetch(&admission_id)
            .await
            .map_err(AdmissionError::storage)?
            .ok_or(AdmissionError::AdmissionNotFound(admission_id))
    }

    /// Read, check the precondition, apply and compare-and-swap; repeat on version
    /// conflicts up to the configured bound.
    async fn advance<F>(
        &self,
        ctx: &RequestContext,
        admission_id: AdmissionId,
        operation: Operation,
        note: Option<String>,
        mut apply: F,
    ) -> Result<AdmissionRecord, AdmissionError>
    where
        F: FnMut(&mut AdmissionRecord, NaiveDate) + Send,
    {
        let deadline = self.deadline(ctx);
        let mut attempt = 0;
        loop {
            let current = within(deadline, async {
                let current = self.load(admission_id).await?;
                self.settings.policy.authorize(operation, current.status)?;
                Ok(current)
            })
            .await?;

            if let Some(record) = self
                .try_commit(ctx, deadline, current, operation, note.clone(), &mut apply)
                .await?
            {
                return Ok(record);
            }
            self.note_conflict(admission_id, &mut attempt)?;
        }
    }

    /// `Ok(None)` when another writer got there first.
    async fn try_commit<F>(
        &self,
        ctx: &RequestContext,
        deadline: Instant,
        current: AdmissionRecord,
        operation: Operation,
        note: Option<String>,
        apply: F,
    ) -> Result<Option<AdmissionRecord>, AdmissionError>
    where
        F: FnOnce(&mut AdmissionRecord, NaiveDate),
    {
        let admission_id = current.admission_id;
        let from = current.status;
        let to = operation.target();
        let mut next = current;
        apply(&mut next, self.clock.today());
        next.record_transition(to, &ctx.actor, self.clock.now(), note);

        let written = tokio::time::timeout_at(deadline, self.ports.admissions.update(next))
            .await
            .map_err(|_| AdmissionError::DeadlineExceeded)?;
        match written {
            Ok(updated) => {
                info!(
                    admission_id = %updated.admission_id,
                    from = from.label(),
                    to = to.label(),
                    actor = %ctx.actor,
                    "admission transitioned"
                );
                Ok(Some(updated))
            }
            Err(RepositoryError::Conflict) => Ok(None),
            Err(RepositoryError::NotFound) => {
                Err(AdmissionError::AdmissionNotFound(admission_id))
            }
            Err(err) => Err(AdmissionError::storage(err)),
        }
    }

    fn note_conflict(
        &self,
        admission_id: AdmissionId,
        attempt: &mut u32,
    ) -> Result<(), AdmissionError> {
        if *attempt >= self.settings.conflict_retries {
            return Err(AdmissionError::storage(RepositoryError::Conflict));
        }
        *attempt += 1;
        warn!(
            %admission_id,
            attempt = *attempt,
            "admission changed concurrently, retrying"
        );
        Ok(())
    }

    async fn offer_letter(&self, record: &AdmissionRecord) -> Result<String, AdmissionError> {
        let request = OfferLetterRequest {
            admission_id: record.admission_id,
            temporary_id: record.temporary_id.to_string(),
            applicant_name: record.applicant.full_name(),
            guardian_name: record.guardian.name.clone(),
            class_name: record.applicant.applying_for_class.clone(),
            admission_date: record
                .dates
                .admission_date
                .unwrap_or_else(|| self.clock.today()),
        };
        self.ports
            .documents
            .generate_offer_letter(request)
            .await
            .map_err(|err| AdmissionError::DependencyFailure {
                which: Dependency::DocumentGenerator,
                detail: err.to_string(),
            })
    }
}

/// Run `future` against `deadline`, mapping expiry to [`AdmissionError::DeadlineExceeded`].
pub(super) async fn within<T, Fut>(deadline: Instant, future: Fut) -> Result<T, AdmissionError>
where
    Fut: Future<Output = Result<T, AdmissionError>>,
{
    tokio::time::timeout_at(deadline, future)
        .await
        .map_err(|_| AdmissionError::DeadlineExceeded)?
}

fn single(key: &str, value: impl ToString) -> BTreeMap<String, String> {
    BTreeMap::from([(key.to_string(), value.to_string())])
}
