//! Login identities for enrolled students and their parents.

use std::fmt;
use std::sync::Arc;

use rand::seq::{IndexedRandom, SliceRandom};
use rand::{Rng, RngCore};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::codes::SequentialCode;
use super::domain::{ContactInfo, Identity, IdentityRole, StudentId};
use super::error::{AdmissionError, Dependency};
use super::ports::{IdentityStore, RepositoryError, StudentStore};

pub const PASSWORD_LENGTH: usize = 8;

// Look-alike glyphs (I, O, l, o, 0, 1) are left out.
const UPPER: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
const LOWER: &[u8] = b"abcdefghijkmnpqrstuvwxyz";
const DIGITS: &[u8] = b"23456789";
const SYMBOLS: &[u8] = b"!@#$%&*?";

/// Random temporary password with at least one upper, lower, digit and symbol.
///
/// Callers pass a cryptographically secure generator; [`rand::rng`] in production.
pub fn generate_password<R: Rng + ?Sized>(rng: &mut R) -> String {
    let classes = [UPPER, LOWER, DIGITS, SYMBOLS];
    let mut chars: Vec<u8> = Vec::with_capacity(PASSWORD_LENGTH);

    for class in classes {
        if let Some(byte) = class.choose(rng) {
            chars.push(*byte);
        }
    }

    let pool: Vec<u8> = classes.concat();
    while chars.len() < PASSWORD_LENGTH {
        if let Some(byte) = pool.choose(rng) {
            chars.push(*byte);
        }
    }

    chars.shuffle(rng);
    chars.into_iter().map(char::from).collect()
}

pub fn student_username(code: &SequentialCode) -> String {
    code.username()
}

pub fn parent_username(code: &SequentialCode) -> String {
    format!("parent.{}", code.username())
}

/// One-way password hashing for stored identities.
pub trait CredentialHasher: Send + Sync {
    fn hash(&self, password: &str) -> String;
    fn verify(&self, password: &str, stored: &str) -> bool;
}

/// Salted SHA-256, stored as `sha256$<salt>$<digest>` in hex.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256CredentialHasher;

impl Sha256CredentialHasher {
    fn digest(salt: &[u8], password: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(salt);
        hasher.update(password.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl CredentialHasher for Sha256CredentialHasher {
    fn hash(&self, password: &str) -> String {
        let mut salt = [0u8; 16];
        rand::rng().fill_bytes(&mut salt);
        format!("sha256${}${}", hex::encode(salt), Self::digest(&salt, password))
    }

    fn verify(&self, password: &str, stored: &str) -> bool {
        let mut parts = stored.splitn(3, '$');
        let (Some("sha256"), Some(salt), Some(digest)) = (parts.next(), parts.next(), parts.next())
        else {
            return false;
        };
        match hex::decode(salt) {
            Ok(salt) => Self::digest(&salt, password) == digest,
            Err(_) => false,
        }
    }
}

/// Identity to ensure for a student.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRequest {
    pub username: String,
    pub role: IdentityRole,
    pub contact: ContactInfo,
    pub student_id: StudentId,
}

/// Result of provisioning one identity. A temporary password is only ever
/// available for an identity created by this call.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProvisionedIdentity {
    Created {
        username: String,
        role: IdentityRole,
        temporary_password: String,
    },
    Existing {
        username: String,
        role: IdentityRole,
    },
}

impl ProvisionedIdentity {
    pub fn username(&self) -> &str {
        match self {
            ProvisionedIdentity::Created { username, .. }
            | ProvisionedIdentity::Existing { username, .. } => username,
        }
    }

    pub fn role(&self) -> IdentityRole {
        match self {
            ProvisionedIdentity::Created { role, .. } | ProvisionedIdentity::Existing { role, .. } => {
                *role
            }
        }
    }

    pub fn temporary_password(&self) -> Option<&str> {
        match self {
            ProvisionedIdentity::Created {
                temporary_password, ..
            } => Some(temporary_password),
            ProvisionedIdentity::Existing { .. } => None,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, ProvisionedIdentity::Created { .. })
    }
}

impl fmt::Debug for ProvisionedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = if self.was_created() { "Created" } else { "Existing" };
        f.debug_struct(outcome)
            .field("username", &self.username())
            .field("role", &self.role())
            .finish_non_exhaustive()
    }
}

/// Idempotent find-or-create over an [`IdentityStore`].
///
/// A username is reused when it already belongs to the requested student and
/// role. One left behind by an enrollment whose student no longer exists is
/// reissued with fresh credentials; any other owner is an
/// [`AdmissionError::IdentityConflict`].
#[derive(Clone)]
pub struct IdentityProvisioner {
    store: Arc<dyn IdentityStore>,
    students: Arc<dyn StudentStore>,
    hasher: Arc<dyn CredentialHasher>,
}

impl IdentityProvisioner {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        students: Arc<dyn StudentStore>,
        hasher: Arc<dyn CredentialHasher>,
    ) -> Self {
        Self {
            store,
            students,
            hasher,
        }
    }

    pub async fn provision(
        &self,
        request: IdentityRequest,
    ) -> Result<ProvisionedIdentity, AdmissionError> {
        if let Some(existing) = self.find(&request.username).await? {
            if let Some(reused) = self.reuse(existing, &request).await? {
                return Ok(reused);
            }
        }

        let temporary_password = generate_password(&mut rand::rng());
        let identity = Identity {
            username: request.username.clone(),
            password_hash: self.hasher.hash(&temporary_password),
            role: request.role,
            contact: request.contact.clone(),
            student_id: request.student_id,
        };

        match self.store.create(identity).await {
            Ok(created) => {
                info!(
                    username = %created.username,
                    role = created.role.label(),
                    "identity created"
                );
                Ok(ProvisionedIdentity::Created {
                    username: created.username,
                    role: created.role,
                    temporary_password,
                })
            }
            Err(RepositoryError::Conflict) => {
                // Lost a race with a concurrent provisioner.
                match self.find(&request.username).await? {
                    Some(existing) if Self::owned_by(&existing, &request) => {
                        Ok(Self::existing(existing))
                    }
                    _ => Err(AdmissionError::IdentityConflict {
                        username: request.username,
                    }),
                }
            }
            Err(err) => Err(identity_failure(err)),
        }
    }

    /// Delete `username` if it is still bound to `owner`. Used to compensate a
    /// failed enrollment; identities of other students are left alone.
    pub async fn revoke(&self, username: &str, owner: StudentId) -> Result<(), AdmissionError> {
        match self.find(username).await? {
            Some(identity) if identity.student_id == owner => self.delete(username).await,
            _ => Ok(()),
        }
    }

    async fn find(&self, username: &str) -> Result<Option<Identity>, AdmissionError> {
        self.store
            .find_by_username(username)
            .await
            .map_err(identity_failure)
    }

    async fn delete(&self, username: &str) -> Result<(), AdmissionError> {
        match self.store.delete(username).await {
            Ok(()) | Err(RepositoryError::NotFound) => Ok(()),
            Err(err) => Err(identity_failure(err)),
        }
    }

    /// `Ok(None)` when the username was orphaned and has been cleared for reissue.
    async fn reuse(
        &self,
        existing: Identity,
        request: &IdentityRequest,
    ) -> Result<Option<ProvisionedIdentity>, AdmissionError> {
        if Self::owned_by(&existing, request) {
            return Ok(Some(Self::existing(existing)));
        }
        if existing.role != request.role || self.student_exists(existing.student_id).await? {
            return Err(AdmissionError::IdentityConflict {
                username: existing.username,
            });
        }

        warn!(
            username = %existing.username,
            stale_student_id = %existing.student_id,
            "identity bound to a missing student; reissuing"
        );
        self.delete(&existing.username).await?;
        Ok(None)
    }

    async fn student_exists(&self, student_id: StudentId) -> Result<bool, AdmissionError> {
        self.students
            .fetch(&student_id)
            .await
            .map(|student| student.is_some())
            .map_err(AdmissionError::storage)
    }

    fn owned_by(existing: &Identity, request: &IdentityRequest) -> bool {
        existing.student_id == request.student_id && existing.role == request.role
    }

    fn existing(identity: Identity) -> ProvisionedIdentity {
        debug!(username = %identity.username, "identity already provisioned");
        ProvisionedIdentity::Existing {
            username: identity.username,
            role: identity.role,
        }
    }
}

fn identity_failure(err: RepositoryError) -> AdmissionError {
    AdmissionError::DependencyFailure {
        which: Dependency::IdentityStore,
        detail: err.to_string(),
    }
}
