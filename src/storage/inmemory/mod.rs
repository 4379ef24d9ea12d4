//! In-memory storage implementations
//!
//! This module provides in-memory implementations of all storage traits.
//! These implementations are suitable for development and testing.

mod applications;
mod service_providers;
mod tenants;

pub use applications::{
    DEFAULT_APPLICATION_TOKEN_LIFETIME, DEFAULT_ID_TOKEN_LIFETIME, DEFAULT_REFRESH_TOKEN_LIFETIME,
    DEFAULT_USER_TOKEN_LIFETIME, MemoryConsumerApplicationStorage, generate_client_id,
    generate_client_secret,
};
pub use service_providers::MemoryServiceProviderStorage;
pub use tenants::MemoryTenantDirectory;
