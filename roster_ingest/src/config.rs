//! Ingestion options.

use regex::Regex;
use snafu::ResultExt;

use crate::{BadIdentifierPatternSnafu, IngestError};

/// Uploads past this size are rejected before any parsing is attempted.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// The shape student identifiers must match, as one anchored expression.
pub const DEFAULT_IDENTIFIER_PATTERN: &str = r"^PS/LAB/\d{2}/\d{4}$";

/// How the initial credential of a created record is chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialPolicy {
    /// The student's email address doubles as the initial credential. This
    /// mirrors the portal's onboarding flow, where students are told to log
    /// in with their email and change the password immediately.
    EmailAsInitial,
    /// A secret derived from the salt and the student's identity, for
    /// deployments that hand credentials out through a separate channel.
    Derived { salt: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOptions {
    pub max_upload_bytes: usize,
    pub identifier_pattern: String,
    pub credential_policy: CredentialPolicy,
}

impl Default for IngestOptions {
    fn default() -> IngestOptions {
        IngestOptions {
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            identifier_pattern: DEFAULT_IDENTIFIER_PATTERN.to_string(),
            credential_policy: CredentialPolicy::EmailAsInitial,
        }
    }
}

impl IngestOptions {
    pub fn compiled_identifier_pattern(&self) -> Result<Regex, IngestError> {
        Regex::new(&self.identifier_pattern).context(BadIdentifierPatternSnafu {
            pattern: self.identifier_pattern.clone(),
        })
    }
}
