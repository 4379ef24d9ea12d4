//! In-memory tenant directory and DCR policy source

use crate::dcr::types::DcrConfiguration;
use crate::errors::StorageError;
use crate::storage::traits::*;
use async_trait::async_trait;
use std::collections::HashMap;

/// Fixed organization, administrator and policy data, configured up front
#[derive(Debug, Clone, Default)]
pub struct MemoryTenantDirectory {
    organizations: HashMap<String, String>,
    admins: HashMap<String, String>,
    configurations: HashMap<String, DcrConfiguration>,
    default_configuration: DcrConfiguration,
}

impl MemoryTenantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_organization(mut self, organization_id: &str, tenant_domain: &str) -> Self {
        self.organizations
            .insert(organization_id.to_string(), tenant_domain.to_string());
        self
    }

    pub fn with_admin(mut self, tenant_domain: &str, username: &str) -> Self {
        self.admins
            .insert(tenant_domain.to_string(), username.to_string());
        self
    }

    /// Policy applied to a single tenant
    pub fn with_configuration(mut self, tenant_domain: &str, configuration: DcrConfiguration) -> Self {
        self.configurations
            .insert(tenant_domain.to_string(), configuration);
        self
    }

    /// Policy applied to tenants without their own
    pub fn with_default_configuration(mut self, configuration: DcrConfiguration) -> Self {
        self.default_configuration = configuration;
        self
    }
}

#[async_trait]
impl TenantResolver for MemoryTenantDirectory {
    async fn resolve_tenant_domain(&self, organization_id: &str) -> Result<String> {
        self.organizations
            .get(organization_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("organization {}", organization_id)))
    }

    async fn tenant_admin(&self, tenant_domain: &str) -> Result<Option<String>> {
        Ok(self.admins.get(tenant_domain).cloned())
    }
}

#[async_trait]
impl DcrConfigurationSource for MemoryTenantDirectory {
    async fn dcr_configuration(&self, tenant_domain: &str) -> Result<DcrConfiguration> {
        Ok(self
            .configurations
            .get(tenant_domain)
            .unwrap_or(&self.default_configuration)
            .clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_directory_lookups() {
        let directory = MemoryTenantDirectory::new()
            .with_organization("org-1", "acme.test")
            .with_admin("acme.test", "admin")
            .with_default_configuration(DcrConfiguration {
                mandate_ssa: true,
                ..Default::default()
            })
            .with_configuration(
                "acme.test",
                DcrConfiguration {
                    authentication_required: Some(false),
                    ..Default::default()
                },
            );

        assert_eq!(directory.resolve_tenant_domain("org-1").await.unwrap(), "acme.test");
        assert!(matches!(
            directory.resolve_tenant_domain("org-2").await,
            Err(StorageError::NotFound(_))
        ));
        assert_eq!(
            directory.tenant_admin("acme.test").await.unwrap().as_deref(),
            Some("admin")
        );
        assert_eq!(directory.tenant_admin("other.test").await.unwrap(), None);

        let acme = directory.dcr_configuration("acme.test").await.unwrap();
        assert!(!acme.is_authentication_required());
        assert!(!acme.mandate_ssa);
        let other = directory.dcr_configuration("other.test").await.unwrap();
        assert!(other.mandate_ssa);
        assert!(other.is_authentication_required());
    }
}
