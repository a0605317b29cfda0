//! External data: the user and secret directories
//!
//! The resolver composes claim labels with labels from the user directory
//! and, on top of those, labels from the secret directory. Loaders are
//! synchronous; the resolver has no suspension points.

use canopy_lang::LabelSet;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Directory lookup failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExternalError {
    #[error("unknown user '{0}'")]
    UnknownUser(String),

    #[error("directory error: {0}")]
    Directory(String),
}

/// Loads user labels by user id.
pub trait UserLoader: Send + Sync {
    fn load(&self, user_id: &str) -> Result<LabelSet, ExternalError>;
}

/// Loads secret labels by user id.
///
/// Users without secrets load an empty set; errors are reserved for
/// directory failures.
pub trait SecretLoader: Send + Sync {
    fn load(&self, user_id: &str) -> Result<LabelSet, ExternalError>;
}

/// The external collaborators the engine reads from.
#[derive(Clone)]
pub struct ExternalData {
    users: Arc<dyn UserLoader>,
    secrets: Arc<dyn SecretLoader>,
}

impl ExternalData {
    pub fn new(users: Arc<dyn UserLoader>, secrets: Arc<dyn SecretLoader>) -> Self {
        Self { users, secrets }
    }

    /// User labels with secret labels merged on top.
    pub fn user_labels(&self, user_id: &str) -> Result<LabelSet, ExternalError> {
        let user = self.users.load(user_id)?;
        let secrets = self.secrets.load(user_id)?;
        Ok(user.merged(&secrets))
    }
}

/// In-memory user directory.
#[derive(Debug, Clone, Default)]
pub struct StaticUserLoader {
    users: BTreeMap<String, LabelSet>,
}

impl StaticUserLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user_id: impl Into<String>, labels: LabelSet) -> Self {
        self.users.insert(user_id.into(), labels);
        self
    }
}

impl UserLoader for StaticUserLoader {
    fn load(&self, user_id: &str) -> Result<LabelSet, ExternalError> {
        self.users
            .get(user_id)
            .cloned()
            .ok_or_else(|| ExternalError::UnknownUser(user_id.to_string()))
    }
}

/// In-memory secret directory; users without secrets get an empty set.
#[derive(Debug, Clone, Default)]
pub struct StaticSecretLoader {
    secrets: BTreeMap<String, LabelSet>,
}

impl StaticSecretLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secrets(mut self, user_id: impl Into<String>, labels: LabelSet) -> Self {
        self.secrets.insert(user_id.into(), labels);
        self
    }
}

impl SecretLoader for StaticSecretLoader {
    fn load(&self, user_id: &str) -> Result<LabelSet, ExternalError> {
        Ok(self.secrets.get(user_id).cloned().unwrap_or_default())
    }
}
