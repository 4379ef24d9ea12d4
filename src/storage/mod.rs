//! Trait-based storage abstractions with in-memory backends.

pub mod inmemory;
pub mod traits;

pub use inmemory::{
    MemoryConsumerApplicationStorage, MemoryServiceProviderStorage, MemoryTenantDirectory,
};
pub use traits::*;

use std::sync::Arc;

/// Collaborators the registration engine reads from and writes to
#[derive(Clone)]
pub struct Stores {
    pub applications: Arc<dyn ConsumerApplicationStore>,
    pub service_providers: Arc<dyn ServiceProviderStore>,
    pub dcr_configuration: Arc<dyn DcrConfigurationSource>,
    pub tenants: Arc<dyn TenantResolver>,
}

impl Stores {
    /// In-memory stores with service provider deletes cascading to their
    /// OAuth clients
    pub fn memory(directory: MemoryTenantDirectory) -> Self {
        Self::memory_with(MemoryServiceProviderStorage::new(), directory)
    }

    /// Like [`Stores::memory`], starting from a preconfigured service
    /// provider store (templates, authorized users)
    pub fn memory_with(
        service_providers: MemoryServiceProviderStorage,
        directory: MemoryTenantDirectory,
    ) -> Self {
        let applications: Arc<dyn ConsumerApplicationStore> =
            Arc::new(MemoryConsumerApplicationStorage::new());
        let service_providers = service_providers.with_application_store(applications.clone());
        let directory = Arc::new(directory);
        Self {
            applications,
            service_providers: Arc::new(service_providers),
            dcr_configuration: directory.clone(),
            tenants: directory,
        }
    }
}
