//! Registration engine: reads, delete and the helpers shared with create and
//! update.

use std::sync::Arc;

use tracing::{debug, error};

use crate::config::Config;
use crate::dcr::assembler::assemble;
use crate::dcr::attributes::{AdditionalAttributeFilter, stored_response_attributes};
use crate::dcr::software_statement::SoftwareStatementVerifier;
use crate::dcr::types::{
    APP_ROLE_AUDIENCE, AUTH_TYPE_OAUTH2, Application, CERTIFICATE_BASED_TOKEN_BINDER,
    ConsumerApplication, DEFAULT_SP_CONFIG, DcrConfiguration, ORG_ROLE_AUDIENCE, RequestContext,
    ServiceProvider, TOKEN_BINDING_TYPE_NONE,
};
use crate::dcr::validators::NamingRules;
use crate::errors::{DcrmError, Result};
use crate::storage::{
    ConsumerApplicationStore, DcrConfigurationSource, ServiceProviderStore, Stores, TenantResolver,
};

/// Process-wide switches of the registration engine
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub naming_rules: NamingRules,
    pub enable_fapi: bool,
    pub application_role_permission_required: bool,
    pub token_binders: Vec<String>,
}

impl ServiceSettings {
    pub fn new(naming_rules: NamingRules) -> Self {
        Self {
            naming_rules,
            enable_fapi: false,
            application_role_permission_required: false,
            token_binders: vec![CERTIFICATE_BASED_TOKEN_BINDER.to_string()],
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            naming_rules: config.naming_rules(),
            enable_fapi: *config.enable_fapi.as_ref(),
            application_role_permission_required: *config
                .application_role_permission_required
                .as_ref(),
            token_binders: config.token_binders.as_ref().clone(),
        }
    }

    fn certificate_binder_available(&self) -> bool {
        self.token_binders
            .iter()
            .any(|binder| binder == CERTIFICATE_BASED_TOKEN_BINDER)
    }
}

/// Normalised allowed audience, or `None` for values that are not one of
/// the recognised audiences.
pub(crate) fn allowed_audience(requested: Option<&str>) -> Option<String> {
    let audience = requested?.trim().to_lowercase();
    (audience == ORG_ROLE_AUDIENCE || audience == APP_ROLE_AUDIENCE).then_some(audience)
}

/// Token binding to store for a mutual-TLS request flag: certificate binding
/// when requested and a certificate binder is registered, `None` when not
/// requested.
pub(crate) struct TokenBinding {
    pub binding_type: Option<String>,
    pub validation_enabled: bool,
}

/// OAuth2/OIDC dynamic client registration engine.
///
/// Every operation receives an explicit [`RequestContext`]; the service keeps
/// no per-request state.
pub struct DcrmService {
    pub(crate) applications: Arc<dyn ConsumerApplicationStore>,
    pub(crate) service_providers: Arc<dyn ServiceProviderStore>,
    pub(crate) dcr_configuration: Arc<dyn DcrConfigurationSource>,
    pub(crate) tenants: Arc<dyn TenantResolver>,
    pub(crate) verifier: Arc<dyn SoftwareStatementVerifier>,
    pub(crate) attribute_filter: Option<Arc<dyn AdditionalAttributeFilter>>,
    pub(crate) settings: ServiceSettings,
}

impl DcrmService {
    pub fn new(
        stores: Stores,
        verifier: Arc<dyn SoftwareStatementVerifier>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            applications: stores.applications,
            service_providers: stores.service_providers,
            dcr_configuration: stores.dcr_configuration,
            tenants: stores.tenants,
            verifier,
            attribute_filter: None,
            settings,
        }
    }

    /// Install an additional-attribute filter
    pub fn with_attribute_filter(mut self, filter: Arc<dyn AdditionalAttributeFilter>) -> Self {
        self.attribute_filter = Some(filter);
        self
    }

    /// Get a registered application by client ID.
    pub async fn get_application(&self, ctx: &RequestContext, client_id: &str) -> Result<Application> {
        let tenant_domain = self.resolve_tenant(ctx).await?;
        self.validate_request_tenant_domain(client_id, &tenant_domain)
            .await?;
        let mut consumer_app = self
            .get_application_by_id(
                ctx,
                client_id,
                &tenant_domain,
                self.settings.application_role_permission_required,
            )
            .await?;

        let sp = self
            .find_service_provider(&consumer_app.application_name, &tenant_domain)
            .await?;
        if let Some(jwks_uri) = sp.as_ref().and_then(|sp| sp.jwks_uri.clone()) {
            consumer_app.jwks_uri = Some(jwks_uri);
        }

        let mut application = assemble(&consumer_app, sp.as_ref());
        if let Some(sp) = &sp {
            application.ext_allowed_audience = Some(sp.associated_roles.allowed_audience.clone());
            if let Some(filter) = &self.attribute_filter {
                application.additional_attributes = stored_response_attributes(filter.as_ref(), sp);
            }
        }
        Ok(application)
    }

    /// Get a registered application by its name.
    pub async fn get_application_by_name(
        &self,
        ctx: &RequestContext,
        client_name: &str,
    ) -> Result<Application> {
        if client_name.is_empty() {
            return Err(DcrmError::InsufficientData(
                "client_name is required".to_string(),
            ));
        }

        let tenant_domain = self.resolve_tenant(ctx).await?;
        if !self.service_provider_exists(client_name, &tenant_domain).await {
            return Err(DcrmError::ApplicationNameNotFound(client_name.to_string()));
        }

        let consumer_app = self
            .applications
            .get_by_name(client_name, &tenant_domain)
            .await
            .map_err(|e| DcrmError::ApplicationStoreFailed("get", e.to_string()))?
            .ok_or_else(|| DcrmError::OAuthApplicationNameNotFound(client_name.to_string()))?;

        if !self
            .is_user_authorized(ctx, &consumer_app.client_id, &tenant_domain)
            .await?
        {
            return Err(DcrmError::UnauthorizedUser(client_name.to_string()));
        }

        let sp = self
            .find_service_provider(client_name, &tenant_domain)
            .await?;
        let mut application = assemble(&consumer_app, sp.as_ref());
        application.ext_allowed_audience = sp.map(|sp| sp.associated_roles.allowed_audience);
        Ok(application)
    }

    /// Delete a registered application by client ID.
    pub async fn delete_application(&self, ctx: &RequestContext, client_id: &str) -> Result<()> {
        let tenant_domain = self.resolve_tenant(ctx).await?;
        self.validate_request_tenant_domain(client_id, &tenant_domain)
            .await?;
        let consumer_app = self
            .get_application_by_id(ctx, client_id, &tenant_domain, true)
            .await?;
        let owner = ctx.username.clone().unwrap_or_default();

        let sp_name = self
            .service_providers
            .service_provider_name_by_client_id(
                &consumer_app.client_id,
                AUTH_TYPE_OAUTH2,
                &tenant_domain,
            )
            .await
            .map_err(|e| {
                DcrmError::ServiceProviderStoreFailed("look up", client_id.to_string(), e.to_string())
            })?;

        if sp_name != DEFAULT_SP_CONFIG {
            debug!(client_id, service_provider = %sp_name, "deleting associated service provider");
            self.delete_service_provider(&sp_name, &tenant_domain, &owner)
                .await
        } else {
            debug!(client_id, "application has no associated service provider");
            self.delete_without_associated_sp(&consumer_app, &tenant_domain, &owner)
                .await
        }
    }

    /// Delete a consumer application directly, then its same-named service
    /// provider if nothing else is bound to it.
    pub(crate) async fn delete_without_associated_sp(
        &self,
        consumer_app: &ConsumerApplication,
        tenant_domain: &str,
        owner: &str,
    ) -> Result<()> {
        debug!(client_id = %consumer_app.client_id, "deleting OAuth application");
        self.applications
            .delete(&consumer_app.client_id)
            .await
            .map_err(|e| DcrmError::ApplicationStoreFailed("delete", e.to_string()))?;

        let name = &consumer_app.application_name;
        let sp = self
            .service_providers
            .get_by_name(name, tenant_domain)
            .await
            .map_err(|e| DcrmError::ServiceProviderStoreFailed("get", name.clone(), e.to_string()))?;
        match sp {
            None => {
                debug!(service_provider = %name, "no service provider with the application name");
                Ok(())
            }
            Some(sp) if sp.inbound_authentication.is_empty() => {
                debug!(service_provider = %name, "deleting orphaned service provider");
                self.delete_service_provider(name, tenant_domain, owner)
                    .await
            }
            Some(_) => {
                debug!(
                    service_provider = %name,
                    "service provider is bound to other applications, leaving it in place"
                );
                Ok(())
            }
        }
    }

    pub(crate) async fn delete_service_provider(
        &self,
        name: &str,
        tenant_domain: &str,
        owner: &str,
    ) -> Result<()> {
        self.service_providers
            .delete(name, tenant_domain, owner)
            .await
            .map_err(|e| DcrmError::ServiceProviderStoreFailed("delete", name.to_string(), e.to_string()))
    }

    /// Tenant the request acts on: the resident organization's tenant when
    /// one is present, else the context tenant.
    pub(crate) async fn resolve_tenant(&self, ctx: &RequestContext) -> Result<String> {
        match ctx
            .resident_organization_id
            .as_deref()
            .filter(|org| !org.is_empty())
        {
            Some(organization_id) => self
                .tenants
                .resolve_tenant_domain(organization_id)
                .await
                .map_err(|e| {
                    DcrmError::TenantResolutionFailed(organization_id.to_string(), e.to_string())
                }),
            None => Ok(ctx.tenant_domain.clone()),
        }
    }

    pub(crate) async fn dcr_configuration(&self, tenant_domain: &str) -> Result<DcrConfiguration> {
        self.dcr_configuration
            .dcr_configuration(tenant_domain)
            .await
            .map_err(|e| DcrmError::ConfigurationUnavailable(e.to_string()))
    }

    pub(crate) async fn validate_request_tenant_domain(
        &self,
        client_id: &str,
        tenant_domain: &str,
    ) -> Result<()> {
        match self.applications.tenant_of_client(client_id).await {
            Ok(Some(owner_tenant)) if owner_tenant == tenant_domain => Ok(()),
            Ok(_) => Err(DcrmError::TenantDomainMismatch(client_id.to_string())),
            Err(e) => Err(DcrmError::TenantValidationFailed(
                client_id.to_string(),
                e.to_string(),
            )),
        }
    }

    pub(crate) async fn get_application_by_id(
        &self,
        ctx: &RequestContext,
        client_id: &str,
        tenant_domain: &str,
        check_authorization: bool,
    ) -> Result<ConsumerApplication> {
        if client_id.is_empty() {
            return Err(DcrmError::InvalidInput("Invalid client_id".to_string()));
        }

        let consumer_app = self
            .applications
            .get_by_client_id(client_id, tenant_domain)
            .await
            .map_err(|e| DcrmError::ApplicationStoreFailed("get", e.to_string()))?
            .filter(|app| !app.application_name.is_empty())
            .ok_or_else(|| DcrmError::ApplicationNotFound(client_id.to_string()))?;

        if check_authorization && !self.is_user_authorized(ctx, client_id, tenant_domain).await? {
            return Err(DcrmError::UnauthorizedUser(client_id.to_string()));
        }
        Ok(consumer_app)
    }

    /// Whether the caller may manage the service provider linked to a client.
    pub(crate) async fn is_user_authorized(
        &self,
        ctx: &RequestContext,
        client_id: &str,
        tenant_domain: &str,
    ) -> Result<bool> {
        let Some(username) = ctx.username.as_deref() else {
            return Ok(false);
        };
        let sp_name = self
            .service_providers
            .service_provider_name_by_client_id(client_id, AUTH_TYPE_OAUTH2, tenant_domain)
            .await
            .map_err(|e| {
                DcrmError::ServiceProviderStoreFailed("look up", client_id.to_string(), e.to_string())
            })?;
        if sp_name == DEFAULT_SP_CONFIG {
            // No linked service provider: the application owner decides.
            let consumer_app = self
                .applications
                .get_by_client_id(client_id, tenant_domain)
                .await
                .map_err(|e| DcrmError::ApplicationStoreFailed("get", e.to_string()))?;
            return Ok(consumer_app.is_some_and(|app| app.username == username));
        }
        self.service_providers
            .is_user_authorized(&sp_name, username, tenant_domain)
            .await
            .map_err(|e| DcrmError::ServiceProviderStoreFailed("authorize", sp_name, e.to_string()))
    }

    pub(crate) async fn find_service_provider(
        &self,
        name: &str,
        tenant_domain: &str,
    ) -> Result<Option<ServiceProvider>> {
        self.service_providers
            .get_by_name(name, tenant_domain)
            .await
            .map_err(|e| DcrmError::ServiceProviderStoreFailed("get", name.to_string(), e.to_string()))
    }

    /// Advisory existence check; a failing store counts as "absent".
    pub(crate) async fn service_provider_exists(&self, name: &str, tenant_domain: &str) -> bool {
        match self.find_service_provider(name, tenant_domain).await {
            Ok(sp) => sp.is_some(),
            Err(err) => {
                error!(service_provider = name, tenant_domain, error = ?err, "failed to look up service provider");
                false
            }
        }
    }

    pub(crate) async fn client_id_exists(&self, client_id: &str, tenant_domain: &str) -> Result<bool> {
        let existing = self
            .applications
            .get_by_client_id(client_id, tenant_domain)
            .await
            .map_err(|e| DcrmError::ApplicationStoreFailed("get", e.to_string()))?;
        Ok(existing.is_some_and(|app| !app.application_name.trim().is_empty()))
    }

    pub(crate) fn token_binding(&self, certificate_bound: bool) -> TokenBinding {
        if !certificate_bound {
            return TokenBinding {
                binding_type: Some(TOKEN_BINDING_TYPE_NONE.to_string()),
                validation_enabled: false,
            };
        }
        if self.settings.certificate_binder_available() {
            TokenBinding {
                binding_type: Some(CERTIFICATE_BASED_TOKEN_BINDER.to_string()),
                validation_enabled: true,
            }
        } else {
            TokenBinding {
                binding_type: None,
                validation_enabled: false,
            }
        }
    }

    pub(crate) fn fapi_conformance(&self, configuration: &DcrConfiguration) -> bool {
        self.settings.enable_fapi && configuration.fapi_enforcement
    }
}
