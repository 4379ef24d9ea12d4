//! Client registration.
//!
//! Every check that needs no store runs first. The writes then run as a saga
//! of three steps (service provider, consumer application, link-back) so a
//! failure part way removes what was already created.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::dcr::assembler::assemble;
use crate::dcr::attributes::{Attributes, add_sp_properties, response_attributes};
use crate::dcr::saga::{Saga, SagaStep};
use crate::dcr::service::{DcrmService, allowed_audience};
use crate::dcr::software_statement::verify_software_statement;
use crate::dcr::types::{
    APP_DISPLAY_NAME_PROPERTY, Application, AssociatedRolesConfig, ConsumerApplication,
    DcrConfiguration, GRANT_TYPE_SEPARATOR, IS_THIRD_PARTY_APP_PROPERTY, OAUTH_VERSION,
    RegistrationRequest, RequestContext, ServiceProvider,
};
use crate::dcr::validators::{build_callback_url, validate_backchannel_logout_uri};
use crate::errors::{DcrmError, Result, StorageError};

/// State threaded through the registration saga
struct Registration<'a> {
    service: &'a DcrmService,
    tenant_domain: String,
    owner: String,
    template: Option<String>,
    service_provider: ServiceProvider,
    consumer_app: ConsumerApplication,
    display_name: Option<String>,
    jwks_uri: Option<String>,
}

struct CreateServiceProvider;

struct CreateConsumerApplication;

struct LinkServiceProvider;

#[async_trait]
impl<'a> SagaStep<Registration<'a>> for CreateServiceProvider {
    fn name(&self) -> &'static str {
        "create_service_provider"
    }

    async fn execute(&self, registration: &mut Registration<'a>) -> Result<()> {
        let service = registration.service;
        let tenant_domain = registration.tenant_domain.as_str();
        let name = registration.service_provider.application_name.clone();

        if let Some(template) = registration.template.as_deref() {
            let exists = service
                .service_providers
                .template_exists(template, tenant_domain)
                .await
                .map_err(|e| {
                    DcrmError::ServiceProviderStoreFailed("look up template", name.clone(), e.to_string())
                })?;
            if !exists {
                return Err(DcrmError::InvalidTemplateName(template.to_string()));
            }
        }

        service
            .service_providers
            .create_with_template(
                &registration.service_provider,
                tenant_domain,
                &registration.owner,
                registration.template.as_deref(),
            )
            .await
            .map_err(|e| match e {
                StorageError::Conflict(_) => DcrmError::ApplicationNameConflict(name.clone()),
                StorageError::Rejected(reason) => DcrmError::ApplicationCreationRejected(reason),
                other => DcrmError::ServiceProviderStoreFailed("create", name.clone(), other.to_string()),
            })?;

        match service.find_service_provider(&name, tenant_domain).await {
            Ok(Some(created)) => {
                registration.service_provider = created;
                Ok(())
            }
            outcome => {
                // Incomplete steps are not compensated by the saga.
                if let Err(e) = service
                    .delete_service_provider(&name, tenant_domain, &registration.owner)
                    .await
                {
                    debug!(service_provider = %name, error = ?e, "cleanup of unreadable service provider failed");
                }
                match outcome {
                    Err(e) => Err(e),
                    _ => Err(DcrmError::ServiceProviderNotRegistered(name)),
                }
            }
        }
    }

    async fn compensate(&self, registration: &Registration<'a>) -> Result<()> {
        let service = registration.service;
        let name = &registration.service_provider.application_name;
        if service
            .find_service_provider(name, &registration.tenant_domain)
            .await?
            .is_none()
        {
            debug!(service_provider = %name, "service provider already removed");
            return Ok(());
        }
        service
            .delete_service_provider(name, &registration.tenant_domain, &registration.owner)
            .await
    }
}

#[async_trait]
impl<'a> SagaStep<Registration<'a>> for CreateConsumerApplication {
    fn name(&self) -> &'static str {
        "create_consumer_application"
    }

    async fn execute(&self, registration: &mut Registration<'a>) -> Result<()> {
        let created = registration
            .service
            .applications
            .create(&registration.consumer_app)
            .await
            .map_err(|e| {
                if e.is_client_error() {
                    DcrmError::InvalidClientMetadata(e.to_string())
                } else {
                    DcrmError::ApplicationStoreFailed("create", e.to_string())
                }
            })?;
        debug!(client_id = %created.client_id, "consumer application created");
        registration.consumer_app = created;
        Ok(())
    }

    async fn compensate(&self, registration: &Registration<'a>) -> Result<()> {
        registration
            .service
            .delete_without_associated_sp(
                &registration.consumer_app,
                &registration.tenant_domain,
                &registration.owner,
            )
            .await
    }
}

#[async_trait]
impl<'a> SagaStep<Registration<'a>> for LinkServiceProvider {
    fn name(&self) -> &'static str {
        "link_service_provider"
    }

    async fn execute(&self, registration: &mut Registration<'a>) -> Result<()> {
        let mut sp = registration.service_provider.clone();
        if let Some(display_name) = &registration.display_name {
            sp.upsert_property(APP_DISPLAY_NAME_PROPERTY, display_name.clone());
        }
        sp.jwks_uri = registration.jwks_uri.clone();
        sp.link_oauth_client(&registration.consumer_app.client_id);
        sp.saas_app = false;

        registration
            .service
            .service_providers
            .update(&sp, &registration.tenant_domain, &registration.owner)
            .await
            .map_err(|e| {
                DcrmError::ServiceProviderStoreFailed("update", sp.application_name.clone(), e.to_string())
            })?;
        registration.service_provider = sp;
        Ok(())
    }

    async fn compensate(&self, _registration: &Registration<'a>) -> Result<()> {
        Ok(())
    }
}

impl DcrmService {
    /// Register a new OAuth client together with its service provider.
    pub async fn register_application(
        &self,
        ctx: &RequestContext,
        request: RegistrationRequest,
    ) -> Result<Application> {
        let tenant_domain = self.resolve_tenant(ctx).await?;
        let configuration = self.dcr_configuration(&tenant_domain).await?;
        let owner = self
            .resolve_owner(ctx, &request, &configuration, &tenant_domain)
            .await?;

        let client_name = request.client_name.trim().to_string();
        if client_name.is_empty() {
            return Err(DcrmError::InsufficientData(
                "missing client name".to_string(),
            ));
        }
        self.settings
            .naming_rules
            .validate_application_name(&client_name)?;

        if self
            .service_provider_exists(&client_name, &tenant_domain)
            .await
        {
            return Err(DcrmError::ApplicationNameConflict(client_name));
        }

        let requested_client_id = request
            .client_id
            .as_deref()
            .filter(|id| !id.trim().is_empty());
        if let Some(client_id) = requested_client_id
            && self.client_id_exists(client_id, &tenant_domain).await?
        {
            return Err(DcrmError::ClientIdConflict(client_id.to_string()));
        }

        let claims = verify_software_statement(
            self.verifier.as_ref(),
            &configuration,
            request.software_statement.as_deref(),
        )
        .await?;

        let filtered: Attributes = match &self.attribute_filter {
            Some(filter) if claims.is_some() || !request.additional_attributes.is_empty() => {
                filter.filter_register_attributes(&request, claims.as_ref())?
            }
            _ => Attributes::new(),
        };

        let consumer_app = self.consumer_application_draft(
            &request,
            &client_name,
            &owner,
            &tenant_domain,
            &configuration,
        )?;

        let mut service_provider = ServiceProvider {
            application_name: client_name.clone(),
            description: format!("Service Provider for application {}", client_name),
            management_app: request.ext_is_management_app,
            ..Default::default()
        };
        service_provider.insert_property(IS_THIRD_PARTY_APP_PROPERTY, "true");
        add_sp_properties(&filtered, &mut service_provider, false);
        match allowed_audience(request.ext_allowed_audience.as_deref()) {
            Some(audience) => {
                service_provider.associated_roles = AssociatedRolesConfig {
                    allowed_audience: audience,
                };
            }
            None => {
                if let Some(requested) = request.ext_allowed_audience.as_deref() {
                    debug!(allowed_audience = requested, "ignoring unrecognised allowed audience");
                }
            }
        }

        let mut registration = Registration {
            service: self,
            tenant_domain,
            owner,
            template: request
                .ext_param_sp_template
                .clone()
                .filter(|template| !template.trim().is_empty()),
            service_provider,
            consumer_app,
            display_name: request.ext_application_display_name.clone(),
            jwks_uri: request.jwks_uri.clone(),
        };

        Saga::new("register_application")
            .step(CreateServiceProvider)
            .step(CreateConsumerApplication)
            .step(LinkServiceProvider)
            .run(&mut registration)
            .await?;

        info!(
            client_id = %registration.consumer_app.client_id,
            client_name = %client_name,
            tenant_domain = %registration.tenant_domain,
            "application registered"
        );

        let Registration {
            service_provider,
            mut consumer_app,
            ..
        } = registration;
        consumer_app.jwks_uri = service_provider.jwks_uri.clone();

        let mut application = assemble(&consumer_app, Some(&service_provider));
        application.software_statement = request.software_statement;
        application.ext_allowed_audience =
            Some(service_provider.associated_roles.allowed_audience.clone());
        if let Some(filter) = &self.attribute_filter {
            application.additional_attributes = response_attributes(filter.as_ref(), &filtered);
        }
        Ok(application)
    }

    async fn resolve_owner(
        &self,
        ctx: &RequestContext,
        request: &RegistrationRequest,
        configuration: &DcrConfiguration,
        tenant_domain: &str,
    ) -> Result<String> {
        let explicit = request
            .ext_application_owner
            .as_deref()
            .filter(|owner| !owner.trim().is_empty())
            .or(ctx.username.as_deref())
            .filter(|owner| !owner.trim().is_empty());
        if let Some(owner) = explicit {
            return Ok(owner.to_string());
        }

        if configuration.is_authentication_required() {
            return Err(DcrmError::OwnerUnresolved(tenant_domain.to_string()));
        }

        debug!(tenant_domain, "unauthenticated registration, owner falls back to the tenant admin");
        self.tenants
            .tenant_admin(tenant_domain)
            .await
            .map_err(|e| DcrmError::TenantAdminLookupFailed(tenant_domain.to_string(), e.to_string()))?
            .filter(|admin| !admin.trim().is_empty())
            .ok_or_else(|| DcrmError::OwnerUnresolved(tenant_domain.to_string()))
    }

    /// Build the consumer application record, running every validation that
    /// needs no store.
    fn consumer_application_draft(
        &self,
        request: &RegistrationRequest,
        client_name: &str,
        owner: &str,
        tenant_domain: &str,
        configuration: &DcrConfiguration,
    ) -> Result<ConsumerApplication> {
        let callback_url = build_callback_url(&request.redirect_uris, &request.grant_types)?;
        let backchannel_logout_url =
            validate_backchannel_logout_uri(request.metadata.backchannel_logout_uri.as_deref())?;

        let client_id = match request.client_id.as_deref().map(str::trim) {
            Some(client_id) if !client_id.is_empty() => {
                self.settings.naming_rules.validate_client_id(client_id)?;
                client_id.to_string()
            }
            _ => String::new(),
        };

        let mut application = ConsumerApplication {
            client_id,
            client_secret: request
                .client_secret
                .clone()
                .filter(|secret| !secret.is_empty()),
            application_name: client_name.to_string(),
            username: owner.to_string(),
            tenant_domain: tenant_domain.to_string(),
            callback_url,
            grant_types: request.grant_types.join(GRANT_TYPE_SEPARATOR),
            oauth_version: OAUTH_VERSION.to_string(),
            backchannel_logout_url,
            fapi_conformance_enabled: self.fapi_conformance(configuration),
            ..Default::default()
        };
        application.apply_metadata(&request.metadata);

        let binding = self.token_binding(
            request
                .metadata
                .tls_client_certificate_bound_access_tokens
                .unwrap_or(false),
        );
        application.token_binding_type = binding.binding_type;
        application.token_binding_validation_enabled = binding.validation_enabled;
        Ok(application)
    }
}
