//! In-memory service provider storage

use crate::dcr::types::{
    AUTH_TYPE_OAUTH2, DEFAULT_SP_CONFIG, ServiceProvider, ServiceProviderProperty,
};
use crate::errors::StorageError;
use crate::storage::traits::*;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// (tenant domain, name)
type Key = (String, String);

fn key(tenant_domain: &str, name: &str) -> Key {
    (tenant_domain.to_string(), name.to_string())
}

/// In-memory implementation of the application-management store
#[derive(Default)]
pub struct MemoryServiceProviderStorage {
    service_providers: Mutex<HashMap<Key, ServiceProvider>>,
    authorized_users: Mutex<HashMap<Key, HashSet<String>>>,
    templates: HashMap<Key, Vec<ServiceProviderProperty>>,
    applications: Option<Arc<dyn ConsumerApplicationStore>>,
}

impl MemoryServiceProviderStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cascade service provider deletes to the linked OAuth clients
    pub fn with_application_store(mut self, applications: Arc<dyn ConsumerApplicationStore>) -> Self {
        self.applications = Some(applications);
        self
    }

    /// Register a template whose properties seed service providers created
    /// from it
    pub fn with_template(
        mut self,
        tenant_domain: &str,
        name: &str,
        properties: Vec<ServiceProviderProperty>,
    ) -> Self {
        self.templates.insert(key(tenant_domain, name), properties);
        self
    }

    /// Allow a user other than the owner to manage a service provider
    pub fn authorize_user(&self, name: &str, username: &str, tenant_domain: &str) -> Result<()> {
        let mut authorized_users = self
            .authorized_users
            .lock()
            .map_err(|e| StorageError::Unavailable(format!("Lock error: {}", e)))?;
        authorized_users
            .entry(key(tenant_domain, name))
            .or_default()
            .insert(username.to_string());
        Ok(())
    }

    /// Snapshot of every stored service provider
    pub fn service_providers(&self) -> Result<Vec<ServiceProvider>> {
        let service_providers = self
            .service_providers
            .lock()
            .map_err(|e| StorageError::Unavailable(format!("Lock error: {}", e)))?;
        Ok(service_providers.values().cloned().collect())
    }
}

#[async_trait]
impl ServiceProviderStore for MemoryServiceProviderStorage {
    async fn create_with_template(
        &self,
        service_provider: &ServiceProvider,
        tenant_domain: &str,
        owner: &str,
        template: Option<&str>,
    ) -> Result<String> {
        if service_provider.application_name.trim().is_empty() {
            return Err(StorageError::Rejected(
                "service provider name is required".to_string(),
            ));
        }

        let mut stored = service_provider.clone();
        if let Some(template) = template {
            let properties = self
                .templates
                .get(&key(tenant_domain, template))
                .ok_or_else(|| StorageError::Rejected(format!("unknown template {}", template)))?;
            for property in properties {
                stored.insert_property(&property.name, property.value.clone());
            }
        }

        let mut service_providers = self
            .service_providers
            .lock()
            .map_err(|e| StorageError::Unavailable(format!("Lock error: {}", e)))?;

        let id = key(tenant_domain, &stored.application_name);
        if service_providers.contains_key(&id) {
            return Err(StorageError::Conflict(format!(
                "service provider {} already exists in {}",
                stored.application_name, tenant_domain
            )));
        }

        let application_id = Uuid::new_v4().to_string();
        stored.application_id = Some(application_id.clone());
        stored.owner.username = owner.to_string();
        stored.owner.tenant_domain = tenant_domain.to_string();
        service_providers.insert(id, stored);
        Ok(application_id)
    }

    async fn template_exists(&self, template: &str, tenant_domain: &str) -> Result<bool> {
        Ok(self.templates.contains_key(&key(tenant_domain, template)))
    }

    async fn update(
        &self,
        service_provider: &ServiceProvider,
        tenant_domain: &str,
        owner: &str,
    ) -> Result<()> {
        let mut service_providers = self
            .service_providers
            .lock()
            .map_err(|e| StorageError::Unavailable(format!("Lock error: {}", e)))?;

        let current = service_providers
            .iter()
            .find(|((tenant, name), existing)| {
                tenant == tenant_domain
                    && match &service_provider.application_id {
                        Some(id) => existing.application_id.as_ref() == Some(id),
                        None => *name == service_provider.application_name,
                    }
            })
            .map(|(id, existing)| (id.clone(), existing.owner.clone()))
            .ok_or_else(|| {
                StorageError::NotFound(format!(
                    "service provider {}",
                    service_provider.application_name
                ))
            })?;
        let (current_key, current_owner) = current;

        let new_key = key(tenant_domain, &service_provider.application_name);
        if new_key != current_key && service_providers.contains_key(&new_key) {
            return Err(StorageError::Conflict(format!(
                "service provider {} already exists in {}",
                service_provider.application_name, tenant_domain
            )));
        }

        let mut stored = service_provider.clone();
        stored.owner.tenant_domain = tenant_domain.to_string();
        stored.owner.username = if owner.is_empty() {
            current_owner.username
        } else {
            owner.to_string()
        };
        service_providers.remove(&current_key);
        service_providers.insert(new_key, stored);
        Ok(())
    }

    async fn get_by_name(
        &self,
        name: &str,
        tenant_domain: &str,
    ) -> Result<Option<ServiceProvider>> {
        let service_providers = self
            .service_providers
            .lock()
            .map_err(|e| StorageError::Unavailable(format!("Lock error: {}", e)))?;
        Ok(service_providers.get(&key(tenant_domain, name)).cloned())
    }

    async fn delete(&self, name: &str, tenant_domain: &str, _owner: &str) -> Result<()> {
        let removed = {
            let mut service_providers = self
                .service_providers
                .lock()
                .map_err(|e| StorageError::Unavailable(format!("Lock error: {}", e)))?;
            service_providers.remove(&key(tenant_domain, name))
        };
        let Some(removed) = removed else {
            return Ok(());
        };

        if let Some(applications) = &self.applications {
            for inbound in removed
                .inbound_authentication
                .iter()
                .filter(|inbound| inbound.inbound_auth_type == AUTH_TYPE_OAUTH2)
            {
                applications.delete(&inbound.inbound_auth_key).await?;
            }
        }
        Ok(())
    }

    async fn service_provider_name_by_client_id(
        &self,
        client_id: &str,
        auth_type: &str,
        tenant_domain: &str,
    ) -> Result<String> {
        let service_providers = self
            .service_providers
            .lock()
            .map_err(|e| StorageError::Unavailable(format!("Lock error: {}", e)))?;
        Ok(service_providers
            .iter()
            .find(|((tenant, _), sp)| tenant == tenant_domain && sp.is_linked_to(client_id, auth_type))
            .map(|((_, name), _)| name.clone())
            .unwrap_or_else(|| DEFAULT_SP_CONFIG.to_string()))
    }

    async fn is_user_authorized(
        &self,
        service_provider_name: &str,
        username: &str,
        tenant_domain: &str,
    ) -> Result<bool> {
        let id = key(tenant_domain, service_provider_name);
        let owner = {
            let service_providers = self
                .service_providers
                .lock()
                .map_err(|e| StorageError::Unavailable(format!("Lock error: {}", e)))?;
            match service_providers.get(&id) {
                Some(sp) => sp.owner.username.clone(),
                None => return Ok(false),
            }
        };
        if owner == username {
            return Ok(true);
        }

        let authorized_users = self
            .authorized_users
            .lock()
            .map_err(|e| StorageError::Unavailable(format!("Lock error: {}", e)))?;
        Ok(authorized_users
            .get(&id)
            .is_some_and(|users| users.contains(username)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dcr::types::ConsumerApplication;
    use crate::storage::inmemory::MemoryConsumerApplicationStorage;

    fn service_provider(name: &str) -> ServiceProvider {
        ServiceProvider {
            application_name: name.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_assigns_id_and_owner() {
        let storage = MemoryServiceProviderStorage::new();
        let id = storage
            .create_with_template(&service_provider("app"), "carbon.super", "alice", None)
            .await
            .unwrap();

        let sp = storage
            .get_by_name("app", "carbon.super")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sp.application_id, Some(id));
        assert_eq!(sp.owner.username, "alice");
        assert_eq!(sp.owner.tenant_domain, "carbon.super");

        assert!(matches!(
            storage
                .create_with_template(&service_provider("app"), "carbon.super", "bob", None)
                .await,
            Err(StorageError::Conflict(_))
        ));
        assert!(
            storage
                .create_with_template(&service_provider("app"), "other.test", "bob", None)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_templates_seed_properties() {
        let storage = MemoryServiceProviderStorage::new().with_template(
            "carbon.super",
            "mobile",
            vec![ServiceProviderProperty {
                name: "skipConsent".to_string(),
                value: "true".to_string(),
            }],
        );

        assert!(storage.template_exists("mobile", "carbon.super").await.unwrap());
        assert!(!storage.template_exists("mobile", "other.test").await.unwrap());

        storage
            .create_with_template(&service_provider("app"), "carbon.super", "alice", Some("mobile"))
            .await
            .unwrap();
        let sp = storage.get_by_name("app", "carbon.super").await.unwrap().unwrap();
        assert_eq!(sp.property("skipConsent"), Some("true"));

        assert!(matches!(
            storage
                .create_with_template(&service_provider("b"), "carbon.super", "alice", Some("web"))
                .await,
            Err(StorageError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_update_renames_by_application_id() {
        let storage = MemoryServiceProviderStorage::new();
        storage
            .create_with_template(&service_provider("old"), "carbon.super", "alice", None)
            .await
            .unwrap();
        storage
            .create_with_template(&service_provider("taken"), "carbon.super", "alice", None)
            .await
            .unwrap();

        let mut sp = storage.get_by_name("old", "carbon.super").await.unwrap().unwrap();
        sp.application_name = "new".to_string();
        storage.update(&sp, "carbon.super", "").await.unwrap();

        assert!(storage.get_by_name("old", "carbon.super").await.unwrap().is_none());
        let renamed = storage.get_by_name("new", "carbon.super").await.unwrap().unwrap();
        assert_eq!(renamed.owner.username, "alice");

        sp.application_name = "taken".to_string();
        assert!(matches!(
            storage.update(&sp, "carbon.super", "alice").await,
            Err(StorageError::Conflict(_))
        ));
        assert!(matches!(
            storage.update(&service_provider("ghost"), "carbon.super", "alice").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_client_links_and_cascading_delete() {
        let applications = Arc::new(MemoryConsumerApplicationStorage::new());
        let storage =
            MemoryServiceProviderStorage::new().with_application_store(applications.clone());

        let client = applications
            .create(&ConsumerApplication {
                application_name: "app".to_string(),
                tenant_domain: "carbon.super".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        storage
            .create_with_template(&service_provider("app"), "carbon.super", "alice", None)
            .await
            .unwrap();
        assert_eq!(
            storage
                .service_provider_name_by_client_id(&client.client_id, AUTH_TYPE_OAUTH2, "carbon.super")
                .await
                .unwrap(),
            DEFAULT_SP_CONFIG
        );

        let mut sp = storage.get_by_name("app", "carbon.super").await.unwrap().unwrap();
        sp.link_oauth_client(&client.client_id);
        storage.update(&sp, "carbon.super", "alice").await.unwrap();
        assert_eq!(
            storage
                .service_provider_name_by_client_id(&client.client_id, AUTH_TYPE_OAUTH2, "carbon.super")
                .await
                .unwrap(),
            "app"
        );

        storage.delete("app", "carbon.super", "alice").await.unwrap();
        assert!(storage.service_providers().unwrap().is_empty());
        assert!(applications.applications().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_user_authorization() {
        let storage = MemoryServiceProviderStorage::new();
        storage
            .create_with_template(&service_provider("app"), "carbon.super", "alice", None)
            .await
            .unwrap();

        assert!(storage.is_user_authorized("app", "alice", "carbon.super").await.unwrap());
        assert!(!storage.is_user_authorized("app", "bob", "carbon.super").await.unwrap());
        storage.authorize_user("app", "bob", "carbon.super").unwrap();
        assert!(storage.is_user_authorized("app", "bob", "carbon.super").await.unwrap());
        assert!(!storage.is_user_authorized("missing", "alice", "carbon.super").await.unwrap());
    }
}
