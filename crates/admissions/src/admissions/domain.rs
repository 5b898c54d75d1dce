use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::codes::SequentialCode;
use super::error::AdmissionError;

/// System-assigned, immutable admission identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdmissionId(pub Uuid);

impl AdmissionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw).ok().map(Self)
    }
}

impl Default for AdmissionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AdmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentId(pub Uuid);

impl StudentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StudentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Staff member or system principal a transition is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub String);

impl ActorId {
    pub fn system() -> Self {
        Self("system".to_string())
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of an admission. Exactly one holds at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionStatus {
    Inquiry,
    Applied,
    TestScheduled,
    Tested,
    InterviewScheduled,
    Interviewed,
    Admitted,
    Enrolled,
    Rejected,
    Withdrawn,
}

impl AdmissionStatus {
    pub const ALL: [AdmissionStatus; 10] = [
        AdmissionStatus::Inquiry,
        AdmissionStatus::Applied,
        AdmissionStatus::TestScheduled,
        AdmissionStatus::Tested,
        AdmissionStatus::InterviewScheduled,
        AdmissionStatus::Interviewed,
        AdmissionStatus::Admitted,
        AdmissionStatus::Enrolled,
        AdmissionStatus::Rejected,
        AdmissionStatus::Withdrawn,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            AdmissionStatus::Inquiry => "inquiry",
            AdmissionStatus::Applied => "applied",
            AdmissionStatus::TestScheduled => "test_scheduled",
            AdmissionStatus::Tested => "tested",
            AdmissionStatus::InterviewScheduled => "interview_scheduled",
            AdmissionStatus::Interviewed => "interviewed",
            AdmissionStatus::Admitted => "admitted",
            AdmissionStatus::Enrolled => "enrolled",
            AdmissionStatus::Rejected => "rejected",
            AdmissionStatus::Withdrawn => "withdrawn",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            AdmissionStatus::Enrolled | AdmissionStatus::Rejected | AdmissionStatus::Withdrawn
        )
    }

    /// Phrase naming the operation that moves a record into this status.
    pub const fn transition_verb(self) -> &'static str {
        match self {
            AdmissionStatus::Inquiry => "record inquiry",
            AdmissionStatus::Applied => "convert to application",
            AdmissionStatus::TestScheduled => "schedule test",
            AdmissionStatus::Tested => "record test score",
            AdmissionStatus::InterviewScheduled => "schedule interview",
            AdmissionStatus::Interviewed => "record interview",
            AdmissionStatus::Admitted => "admit",
            AdmissionStatus::Enrolled => "enroll",
            AdmissionStatus::Rejected => "reject",
            AdmissionStatus::Withdrawn => "withdraw",
        }
    }
}

impl fmt::Display for AdmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    #[default]
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl ContactInfo {
    pub fn is_empty(&self) -> bool {
        self.phone.is_none() && self.email.is_none()
    }

    /// Preferred notification destination: phone first, then e-mail.
    pub fn destination(&self) -> Option<&str> {
        self.phone.as_deref().or(self.email.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardianInfo {
    pub name: String,
    #[serde(default)]
    pub relation: Option<String>,
    #[serde(default)]
    pub contact: ContactInfo,
}

/// Identity facts captured at inquiry time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicantDetails {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub gender: Option<Gender>,
    pub applying_for_class: String,
    #[serde(default)]
    pub contact: ContactInfo,
    #[serde(default)]
    pub address: Option<String>,
}

impl ApplicantDetails {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Fields owned by the `Applied` transition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviousSchooling {
    #[serde(default)]
    pub school_name: Option<String>,
    #[serde(default)]
    pub last_class_completed: Option<String>,
    #[serde(default)]
    pub reason_for_leaving: Option<String>,
}

/// One timestamp per visited status, each written at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDates {
    pub inquiry_date: NaiveDate,
    pub application_date: Option<NaiveDate>,
    pub admission_test_date: Option<NaiveDate>,
    pub interview_date: Option<NaiveDate>,
    pub admission_date: Option<NaiveDate>,
    pub enrollment_date: Option<NaiveDate>,
    pub rejection_date: Option<NaiveDate>,
    pub withdrawal_date: Option<NaiveDate>,
}

impl WorkflowDates {
    pub fn new(inquiry_date: NaiveDate) -> Self {
        Self {
            inquiry_date,
            application_date: None,
            admission_test_date: None,
            interview_date: None,
            admission_date: None,
            enrollment_date: None,
            rejection_date: None,
            withdrawal_date: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub score: u16,
    pub max_score: u16,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterviewOutcome {
    pub feedback: String,
    pub rating: Option<u8>,
}

/// Audit entry appended for every committed transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub from: Option<AdmissionStatus>,
    pub to: AdmissionStatus,
    pub at: DateTime<Utc>,
    pub actor: ActorId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Persisted admission entity, mutated only through the workflow engine.
///
/// `status` and `history` change together through [`AdmissionRecord::record_transition`]
/// and are read-only outside this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionRecord {
    pub admission_id: AdmissionId,
    pub temporary_id: SequentialCode,
    pub(crate) status: AdmissionStatus,
    pub applicant: ApplicantDetails,
    pub guardian: GuardianInfo,
    pub previous_schooling: Option<PreviousSchooling>,
    pub dates: WorkflowDates,
    pub test_result: Option<TestOutcome>,
    pub interview: Option<InterviewOutcome>,
    pub admission_offer_letter_url: Option<String>,
    pub enrolled_student_id: Option<StudentId>,
    pub rejection_reason: Option<String>,
    pub withdrawal_reason: Option<String>,
    pub(crate) history: Vec<TransitionEvent>,
    /// Optimistic concurrency token, bumped by the store on every update.
    pub version: u64,
}

impl AdmissionRecord {
    pub fn status(&self) -> AdmissionStatus {
        self.status
    }

    /// Audit trail, oldest first.
    pub fn history(&self) -> &[TransitionEvent] {
        &self.history
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `to` and append the audit entry. Legality is checked by the caller.
    pub(crate) fn record_transition(
        &mut self,
        to: AdmissionStatus,
        actor: &ActorId,
        at: DateTime<Utc>,
        note: Option<String>,
    ) {
        self.history.push(TransitionEvent {
            from: Some(self.status),
            to,
            at,
            actor: actor.clone(),
            note,
        });
        self.status = to;
    }

    pub fn status_view(&self) -> AdmissionStatusView {
        AdmissionStatusView {
            admission_id: self.admission_id,
            temporary_id: self.temporary_id.to_string(),
            applicant_name: self.applicant.full_name(),
            applying_for_class: self.applicant.applying_for_class.clone(),
            status: self.status.label(),
            admission_offer_letter_url: self.admission_offer_letter_url.clone(),
            enrolled_student_id: self.enrolled_student_id,
        }
    }
}

/// Sanitized representation of an admission for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct AdmissionStatusView {
    pub admission_id: AdmissionId,
    pub temporary_id: String,
    pub applicant_name: String,
    pub applying_for_class: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admission_offer_letter_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrolled_student_id: Option<StudentId>,
}

/// Student entity materialized at enrollment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub student_id: StudentId,
    pub student_code: SequentialCode,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Gender,
    pub class_name: String,
    pub contact: ContactInfo,
    pub guardian: GuardianInfo,
    pub address: Option<String>,
    pub admission_date: NaiveDate,
    pub enrolled_on: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityRole {
    Student,
    Parent,
}

impl IdentityRole {
    pub const fn label(self) -> &'static str {
        match self {
            IdentityRole::Student => "student",
            IdentityRole::Parent => "parent",
        }
    }
}

/// Login account linked to a student. Only the password hash is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub username: String,
    pub password_hash: String,
    pub role: IdentityRole,
    pub contact: ContactInfo,
    pub student_id: StudentId,
}

/// Payload for a new inquiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInquiry {
    pub applicant: ApplicantDetails,
    pub guardian: GuardianInfo,
}

impl NewInquiry {
    pub fn validate(&self) -> Result<(), AdmissionError> {
        require_text("first_name", &self.applicant.first_name)?;
        require_text("last_name", &self.applicant.last_name)?;
        require_text("applying_for_class", &self.applicant.applying_for_class)?;
        require_text("guardian.name", &self.guardian.name)?;
        validate_contact("contact", &self.applicant.contact)?;
        validate_contact("guardian.contact", &self.guardian.contact)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSchedule {
    pub test_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub score: u16,
    pub max_score: u16,
    #[serde(default)]
    pub remarks: Option<String>,
}

impl TestResult {
    pub fn validate(&self) -> Result<(), AdmissionError> {
        if self.max_score == 0 {
            return Err(AdmissionError::invalid("max_score", "must be positive"));
        }
        if self.score > self.max_score {
            return Err(AdmissionError::invalid(
                "score",
                format!("{} exceeds maximum {}", self.score, self.max_score),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterviewSchedule {
    pub interview_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterviewFeedback {
    pub feedback: String,
    #[serde(default)]
    pub rating: Option<u8>,
}

impl InterviewFeedback {
    pub fn validate(&self) -> Result<(), AdmissionError> {
        require_text("feedback", &self.feedback)?;
        match self.rating {
            Some(rating) if !(1..=5).contains(&rating) => Err(AdmissionError::invalid(
                "rating",
                format!("{rating} is outside 1..=5"),
            )),
            _ => Ok(()),
        }
    }
}

pub(crate) fn require_text(field: &'static str, value: &str) -> Result<(), AdmissionError> {
    if value.trim().is_empty() {
        Err(AdmissionError::invalid(field, "must not be empty"))
    } else {
        Ok(())
    }
}

fn validate_contact(field: &'static str, contact: &ContactInfo) -> Result<(), AdmissionError> {
    if let Some(email) = &contact.email {
        if !email.contains('@') {
            return Err(AdmissionError::invalid(field, "email must contain '@'"));
        }
    }
    if let Some(phone) = &contact.phone {
        let digits = phone.chars().filter(char::is_ascii_digit).count();
        if digits < 7 {
            return Err(AdmissionError::invalid(field, "phone needs at least 7 digits"));
        }
    }
    Ok(())
}
