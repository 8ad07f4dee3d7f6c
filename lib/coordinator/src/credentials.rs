//! Per-user content credentials.

use crate::error::CredentialError;
use async_trait::async_trait;
use mixtape_core::UserId;
use mixtape_workflow::Credentials;
use rootcause::prelude::Report;
use std::collections::HashMap;
use std::sync::RwLock;

/// Resolves the access credential a job runs with.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credentials_for(
        &self,
        user_id: UserId,
    ) -> Result<Credentials, Report<CredentialError>>;
}

/// Every user shares one credential.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    credentials: Credentials,
}

impl StaticCredentials {
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn credentials_for(
        &self,
        _user_id: UserId,
    ) -> Result<Credentials, Report<CredentialError>> {
        Ok(self.credentials.clone())
    }
}

/// Credentials held in process, keyed by user.
#[derive(Debug, Default)]
pub struct InMemoryCredentials {
    by_user: RwLock<HashMap<UserId, Credentials>>,
}

impl InMemoryCredentials {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_user(self, user_id: UserId, credentials: Credentials) -> Self {
        self.insert(user_id, credentials);
        self
    }

    pub fn insert(&self, user_id: UserId, credentials: Credentials) {
        self.by_user
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(user_id, credentials);
    }
}

#[async_trait]
impl CredentialProvider for InMemoryCredentials {
    async fn credentials_for(
        &self,
        user_id: UserId,
    ) -> Result<Credentials, Report<CredentialError>> {
        let by_user = self
            .by_user
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        by_user
            .get(&user_id)
            .cloned()
            .ok_or_else(|| CredentialError::Missing { user_id }.into())
    }
}
