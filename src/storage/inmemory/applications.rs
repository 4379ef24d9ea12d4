//! In-memory consumer application storage

use crate::dcr::types::ConsumerApplication;
use crate::errors::StorageError;
use crate::storage::traits::*;
use async_trait::async_trait;
use base64::Engine;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Default application access token lifetime in seconds
pub const DEFAULT_APPLICATION_TOKEN_LIFETIME: i64 = 3600;
/// Default user access token lifetime in seconds
pub const DEFAULT_USER_TOKEN_LIFETIME: i64 = 3600;
/// Default refresh token lifetime in seconds
pub const DEFAULT_REFRESH_TOKEN_LIFETIME: i64 = 86400;
/// Default ID token lifetime in seconds
pub const DEFAULT_ID_TOKEN_LIFETIME: i64 = 3600;

/// In-memory implementation of the OAuth application store
#[derive(Default)]
pub struct MemoryConsumerApplicationStorage {
    applications: Mutex<HashMap<String, ConsumerApplication>>,
}

impl MemoryConsumerApplicationStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored application
    pub fn applications(&self) -> Result<Vec<ConsumerApplication>> {
        let applications = self
            .applications
            .lock()
            .map_err(|e| StorageError::Unavailable(format!("Lock error: {}", e)))?;
        Ok(applications.values().cloned().collect())
    }
}

/// Generate a client secret
pub fn generate_client_secret() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.r#gen();
    base64::prelude::BASE64_URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate a client ID
pub fn generate_client_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn name_taken(
    applications: &HashMap<String, ConsumerApplication>,
    application: &ConsumerApplication,
) -> bool {
    applications.values().any(|existing| {
        existing.client_id != application.client_id
            && existing.tenant_domain == application.tenant_domain
            && existing.application_name == application.application_name
    })
}

#[async_trait]
impl ConsumerApplicationStore for MemoryConsumerApplicationStorage {
    async fn create(&self, application: &ConsumerApplication) -> Result<ConsumerApplication> {
        if application.application_name.trim().is_empty() {
            return Err(StorageError::Rejected(
                "application name is required".to_string(),
            ));
        }

        let mut applications = self
            .applications
            .lock()
            .map_err(|e| StorageError::Unavailable(format!("Lock error: {}", e)))?;

        let mut stored = application.clone();
        if stored.client_id.is_empty() {
            stored.client_id = generate_client_id();
        } else if applications.contains_key(&stored.client_id) {
            return Err(StorageError::Conflict(format!(
                "client id {} is already registered",
                stored.client_id
            )));
        }
        if name_taken(&applications, &stored) {
            return Err(StorageError::Conflict(format!(
                "application {} already exists in {}",
                stored.application_name, stored.tenant_domain
            )));
        }

        if stored.client_secret.as_deref().is_none_or(str::is_empty) {
            stored.client_secret = Some(generate_client_secret());
        }
        stored
            .application_access_token_expiry_time
            .get_or_insert(DEFAULT_APPLICATION_TOKEN_LIFETIME);
        stored
            .user_access_token_expiry_time
            .get_or_insert(DEFAULT_USER_TOKEN_LIFETIME);
        stored
            .refresh_token_expiry_time
            .get_or_insert(DEFAULT_REFRESH_TOKEN_LIFETIME);
        stored
            .id_token_expiry_time
            .get_or_insert(DEFAULT_ID_TOKEN_LIFETIME);
        // The JWKS URI lives on the service provider.
        stored.jwks_uri = None;

        applications.insert(stored.client_id.clone(), stored.clone());
        Ok(stored)
    }

    async fn update(&self, application: &ConsumerApplication) -> Result<()> {
        let mut applications = self
            .applications
            .lock()
            .map_err(|e| StorageError::Unavailable(format!("Lock error: {}", e)))?;

        if !applications.contains_key(&application.client_id) {
            return Err(StorageError::NotFound(format!(
                "client id {}",
                application.client_id
            )));
        }
        if application.application_name.trim().is_empty() {
            return Err(StorageError::Rejected(
                "application name is required".to_string(),
            ));
        }
        if name_taken(&applications, application) {
            return Err(StorageError::Conflict(format!(
                "application {} already exists in {}",
                application.application_name, application.tenant_domain
            )));
        }

        let mut stored = application.clone();
        stored.jwks_uri = None;
        applications.insert(stored.client_id.clone(), stored);
        Ok(())
    }

    async fn get_by_client_id(
        &self,
        client_id: &str,
        tenant_domain: &str,
    ) -> Result<Option<ConsumerApplication>> {
        let applications = self
            .applications
            .lock()
            .map_err(|e| StorageError::Unavailable(format!("Lock error: {}", e)))?;
        Ok(applications
            .get(client_id)
            .filter(|application| application.tenant_domain == tenant_domain)
            .cloned())
    }

    async fn get_by_name(
        &self,
        application_name: &str,
        tenant_domain: &str,
    ) -> Result<Option<ConsumerApplication>> {
        let applications = self
            .applications
            .lock()
            .map_err(|e| StorageError::Unavailable(format!("Lock error: {}", e)))?;
        Ok(applications
            .values()
            .find(|application| {
                application.application_name == application_name
                    && application.tenant_domain == tenant_domain
            })
            .cloned())
    }

    async fn delete(&self, client_id: &str) -> Result<()> {
        let mut applications = self
            .applications
            .lock()
            .map_err(|e| StorageError::Unavailable(format!("Lock error: {}", e)))?;
        applications.remove(client_id);
        Ok(())
    }

    async fn tenant_of_client(&self, client_id: &str) -> Result<Option<String>> {
        let applications = self
            .applications
            .lock()
            .map_err(|e| StorageError::Unavailable(format!("Lock error: {}", e)))?;
        Ok(applications
            .get(client_id)
            .map(|application| application.tenant_domain.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn application(name: &str, tenant: &str) -> ConsumerApplication {
        ConsumerApplication {
            application_name: name.to_string(),
            tenant_domain: tenant.to_string(),
            username: "alice".to_string(),
            jwks_uri: Some("https://rp.test/jwks".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_assigns_credentials_and_defaults() {
        let storage = MemoryConsumerApplicationStorage::new();
        let stored = storage
            .create(&application("app", "carbon.super"))
            .await
            .unwrap();

        assert!(!stored.client_id.is_empty());
        assert!(stored.client_secret.as_deref().is_some_and(|s| !s.is_empty()));
        assert_eq!(stored.application_access_token_expiry_time, Some(3600));
        assert_eq!(stored.refresh_token_expiry_time, Some(86400));
        assert_eq!(stored.jwks_uri, None);

        let fetched = storage
            .get_by_client_id(&stored.client_id, "carbon.super")
            .await
            .unwrap();
        assert_eq!(fetched, Some(stored.clone()));
        assert_eq!(
            storage.get_by_client_id(&stored.client_id, "other").await.unwrap(),
            None
        );
        assert_eq!(
            storage.tenant_of_client(&stored.client_id).await.unwrap(),
            Some("carbon.super".to_string())
        );
    }

    #[tokio::test]
    async fn test_create_keeps_requested_credentials() {
        let storage = MemoryConsumerApplicationStorage::new();
        let mut requested = application("app", "carbon.super");
        requested.client_id = "provided_client_id_01".to_string();
        requested.client_secret = Some("provided-secret".to_string());
        requested.user_access_token_expiry_time = Some(60);

        let stored = storage.create(&requested).await.unwrap();
        assert_eq!(stored.client_id, "provided_client_id_01");
        assert_eq!(stored.client_secret.as_deref(), Some("provided-secret"));
        assert_eq!(stored.user_access_token_expiry_time, Some(60));

        let mut again = application("other", "carbon.super");
        again.client_id = "provided_client_id_01".to_string();
        assert!(matches!(
            storage.create(&again).await,
            Err(StorageError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_names_are_unique_per_tenant() {
        let storage = MemoryConsumerApplicationStorage::new();
        storage.create(&application("app", "a.test")).await.unwrap();
        storage.create(&application("app", "b.test")).await.unwrap();

        assert!(matches!(
            storage.create(&application("app", "a.test")).await,
            Err(StorageError::Conflict(_))
        ));
        assert!(matches!(
            storage.create(&application(" ", "a.test")).await,
            Err(StorageError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let storage = MemoryConsumerApplicationStorage::new();
        let mut stored = storage
            .create(&application("app", "carbon.super"))
            .await
            .unwrap();
        storage.create(&application("taken", "carbon.super")).await.unwrap();

        stored.callback_url = "https://rp.test/cb".to_string();
        storage.update(&stored).await.unwrap();
        let fetched = storage
            .get_by_name("app", "carbon.super")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.callback_url, "https://rp.test/cb");

        stored.application_name = "taken".to_string();
        assert!(matches!(
            storage.update(&stored).await,
            Err(StorageError::Conflict(_))
        ));

        storage.delete(&stored.client_id).await.unwrap();
        assert!(storage.tenant_of_client(&stored.client_id).await.unwrap().is_none());
        assert!(matches!(
            storage.update(&stored).await,
            Err(StorageError::NotFound(_))
        ));
        assert_eq!(storage.applications().unwrap().len(), 1);
    }
}
