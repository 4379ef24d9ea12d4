//! Storage trait definitions for registration data.
//!
//! The registration engine writes to two independent stores: the OAuth store
//! holding consumer applications and the application-management store holding
//! service providers. Tenant lookups and per-tenant DCR policy are injected
//! the same way.

use crate::dcr::types::{ConsumerApplication, DcrConfiguration, ServiceProvider};
use crate::errors::StorageError;
use async_trait::async_trait;

pub type Result<T> = std::result::Result<T, StorageError>;

/// Trait for the OAuth side of a registration
#[async_trait]
pub trait ConsumerApplicationStore: Send + Sync {
    /// Register a new client; the store fills in missing credentials and
    /// token lifetimes and returns the stored record
    async fn create(&self, application: &ConsumerApplication) -> Result<ConsumerApplication>;

    /// Replace an existing client record
    async fn update(&self, application: &ConsumerApplication) -> Result<()>;

    /// Retrieve a client by ID within a tenant
    async fn get_by_client_id(
        &self,
        client_id: &str,
        tenant_domain: &str,
    ) -> Result<Option<ConsumerApplication>>;

    /// Retrieve a client by application name within a tenant
    async fn get_by_name(
        &self,
        application_name: &str,
        tenant_domain: &str,
    ) -> Result<Option<ConsumerApplication>>;

    /// Delete a client
    async fn delete(&self, client_id: &str) -> Result<()>;

    /// Tenant that owns a client, if the client exists
    async fn tenant_of_client(&self, client_id: &str) -> Result<Option<String>>;
}

/// Trait for the application-management side of a registration
#[async_trait]
pub trait ServiceProviderStore: Send + Sync {
    /// Create a service provider, optionally from a named template, and
    /// return its assigned application ID
    async fn create_with_template(
        &self,
        service_provider: &ServiceProvider,
        tenant_domain: &str,
        owner: &str,
        template: Option<&str>,
    ) -> Result<String>;

    /// Whether a named template exists in a tenant
    async fn template_exists(&self, template: &str, tenant_domain: &str) -> Result<bool>;

    /// Persist changes to an existing service provider
    async fn update(
        &self,
        service_provider: &ServiceProvider,
        tenant_domain: &str,
        owner: &str,
    ) -> Result<()>;

    /// Retrieve a service provider by name
    async fn get_by_name(&self, name: &str, tenant_domain: &str)
    -> Result<Option<ServiceProvider>>;

    /// Delete a service provider together with its linked consumer
    /// applications
    async fn delete(&self, name: &str, tenant_domain: &str, owner: &str) -> Result<()>;

    /// Name of the service provider linked to a client, or `default` when
    /// the client is not linked to any
    async fn service_provider_name_by_client_id(
        &self,
        client_id: &str,
        auth_type: &str,
        tenant_domain: &str,
    ) -> Result<String>;

    /// Whether a user may manage a service provider
    async fn is_user_authorized(
        &self,
        service_provider_name: &str,
        username: &str,
        tenant_domain: &str,
    ) -> Result<bool>;
}

/// Trait for per-tenant DCR policy
#[async_trait]
pub trait DcrConfigurationSource: Send + Sync {
    async fn dcr_configuration(&self, tenant_domain: &str) -> Result<DcrConfiguration>;
}

/// Trait for organization and tenant lookups
#[async_trait]
pub trait TenantResolver: Send + Sync {
    /// Map an organization ID to the tenant domain it lives in
    async fn resolve_tenant_domain(&self, organization_id: &str) -> Result<String>;

    /// Username of the tenant administrator
    async fn tenant_admin(&self, tenant_domain: &str) -> Result<Option<String>>;
}
