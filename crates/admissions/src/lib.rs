//! Admission-to-enrollment workflow engine.
//!
//! The [`admissions`] module owns the admission state machine, the year-scoped
//! sequential code issuer and the enrollment finalizer that materializes a
//! student with linked login identities. HTTP routing lives in the API service
//! crate; nothing here depends on it.

pub mod admissions;
pub mod config;
pub mod telemetry;
