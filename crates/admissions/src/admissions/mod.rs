//! Admission lifecycle: inquiry → application → test → interview → offer →
//! enrollment, with reject and withdraw branches from any open status.
//!
//! [`AdmissionWorkflowEngine`] is the only writer of admission records. Codes come
//! from [`SequentialCodeIssuer`]; enrollment runs through [`EnrollmentFinalizer`].
//! Storage and side effects are reached through the traits in [`ports`].

pub mod codes;
pub mod context;
pub mod credentials;
pub mod domain;
pub mod engine;
pub mod enrollment;
pub mod error;
pub mod memory;
mod notify;
pub mod ports;
pub mod sequence;
pub mod transitions;

#[cfg(test)]
mod tests;

pub use codes::{validate_format, CodeFormatError, CodeKind, CodeScope, SequentialCode};
pub use context::{Clock, FixedClock, RequestContext, SystemClock};
pub use credentials::{
    generate_password, CredentialHasher, IdentityProvisioner, IdentityRequest,
    ProvisionedIdentity, Sha256CredentialHasher,
};
pub use domain::{
    ActorId, AdmissionId, AdmissionRecord, AdmissionStatus, AdmissionStatusView,
    ApplicantDetails, ContactInfo, Gender, GuardianInfo, Identity, IdentityRole,
    InterviewFeedback, InterviewOutcome, InterviewSchedule, NewInquiry, PreviousSchooling,
    Student, StudentId, TestOutcome, TestResult, TestSchedule, TransitionEvent, WorkflowDates,
};
pub use engine::{AdmissionWorkflowEngine, WorkflowSettings};
pub use enrollment::{EnrollmentCredentials, EnrollmentFinalizer, EnrollmentOutcome};
pub use error::{AdmissionError, Dependency, ErrorKind};
pub use memory::InMemoryBackend;
pub use ports::{
    AdmissionPorts, AdmissionStore, DocumentError, DocumentGenerator, IdentityStore,
    Notification, NotificationDispatcher, NotificationError, NotificationTemplate,
    OfferLetterRequest, RepositoryError, SequenceLease, SequenceStore, StudentStore,
};
pub use sequence::{AllocationTransaction, SequentialCodeIssuer};
pub use transitions::{Guard, Operation, TransitionPolicy};
