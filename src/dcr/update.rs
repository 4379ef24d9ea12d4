//! Client update.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::dcr::assembler::assemble;
use crate::dcr::attributes::{Attributes, add_sp_properties, response_attributes};
use crate::dcr::saga::{Saga, SagaStep};
use crate::dcr::service::{DcrmService, allowed_audience};
use crate::dcr::software_statement::verify_software_statement;
use crate::dcr::types::{
    APP_DISPLAY_NAME_PROPERTY, Application, ConsumerApplication, GRANT_TYPE_SEPARATOR,
    RequestContext, ServiceProvider, UpdateRequest,
};
use crate::dcr::validators::{build_callback_url, validate_backchannel_logout_uri};
use crate::errors::{DcrmError, Result, StorageError};

struct Update<'a> {
    service: &'a DcrmService,
    tenant_domain: String,
    owner: String,
    previous_sp: ServiceProvider,
    service_provider: ServiceProvider,
    consumer_app: ConsumerApplication,
}

struct UpdateServiceProvider;

struct UpdateConsumerApplication;

#[async_trait]
impl<'a> SagaStep<Update<'a>> for UpdateServiceProvider {
    fn name(&self) -> &'static str {
        "update_service_provider"
    }

    async fn execute(&self, update: &mut Update<'a>) -> Result<()> {
        let name = update.service_provider.application_name.clone();
        update
            .service
            .service_providers
            .update(&update.service_provider, &update.tenant_domain, &update.owner)
            .await
            .map_err(|e| match e {
                StorageError::Conflict(_) => DcrmError::ApplicationNameConflict(name.clone()),
                other => DcrmError::ServiceProviderStoreFailed("update", name.clone(), other.to_string()),
            })
    }

    async fn compensate(&self, update: &Update<'a>) -> Result<()> {
        let previous = &update.previous_sp;
        debug!(service_provider = %previous.application_name, "restoring service provider");
        update
            .service
            .service_providers
            .update(previous, &update.tenant_domain, &previous.owner.username)
            .await
            .map_err(|e| {
                DcrmError::ServiceProviderStoreFailed(
                    "restore",
                    previous.application_name.clone(),
                    e.to_string(),
                )
            })
    }
}

#[async_trait]
impl<'a> SagaStep<Update<'a>> for UpdateConsumerApplication {
    fn name(&self) -> &'static str {
        "update_consumer_application"
    }

    async fn execute(&self, update: &mut Update<'a>) -> Result<()> {
        update
            .service
            .applications
            .update(&update.consumer_app)
            .await
            .map_err(|e| {
                if e.is_client_error() {
                    DcrmError::InvalidClientMetadata(e.to_string())
                } else {
                    DcrmError::ApplicationStoreFailed("update", e.to_string())
                }
            })
    }

    async fn compensate(&self, _update: &Update<'a>) -> Result<()> {
        Ok(())
    }
}

impl DcrmService {
    /// Update a registered client. Absent fields keep their stored values.
    pub async fn update_application(
        &self,
        ctx: &RequestContext,
        client_id: &str,
        request: UpdateRequest,
    ) -> Result<Application> {
        let tenant_domain = self.resolve_tenant(ctx).await?;
        self.validate_request_tenant_domain(client_id, &tenant_domain)
            .await?;
        let mut consumer_app = self
            .get_application_by_id(ctx, client_id, &tenant_domain, true)
            .await?;

        let owner = request
            .ext_application_owner
            .as_deref()
            .filter(|owner| !owner.trim().is_empty())
            .or(ctx.username.as_deref())
            .filter(|owner| !owner.trim().is_empty())
            .unwrap_or_default()
            .to_string();

        let current_name = consumer_app.application_name.clone();
        let previous_sp = self
            .find_service_provider(&current_name, &tenant_domain)
            .await?
            .ok_or_else(|| DcrmError::ServiceProviderNotFound(current_name.clone()))?;
        let mut sp = previous_sp.clone();

        let client_name = request
            .client_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty());

        let mut filtered = Attributes::new();
        if let Some(client_name) = client_name {
            if client_name != current_name
                && self.service_provider_exists(client_name, &tenant_domain).await
            {
                return Err(DcrmError::ApplicationNameConflict(client_name.to_string()));
            }
            self.settings
                .naming_rules
                .validate_application_name(client_name)?;

            let claims = match request.software_statement.as_deref() {
                Some(statement) if !statement.is_empty() => {
                    let configuration = self.dcr_configuration(&tenant_domain).await?;
                    verify_software_statement(self.verifier.as_ref(), &configuration, Some(statement))
                        .await?
                }
                _ => None,
            };

            if let Some(filter) = &self.attribute_filter
                && (claims.is_some() || !request.additional_attributes.is_empty())
            {
                filtered = filter.filter_update_attributes(&request, claims.as_ref(), &sp.properties)?;
                add_sp_properties(&filtered, &mut sp, true);
            }

            if let Some(display_name) = &request.ext_application_display_name {
                sp.upsert_property(APP_DISPLAY_NAME_PROPERTY, display_name.clone());
            }
            if let Some(jwks_uri) = &request.jwks_uri {
                sp.jwks_uri = Some(jwks_uri.clone());
            }
            if let Some(version) = &request.ext_application_version {
                sp.application_version = Some(version.clone());
            }
            sp.application_name = client_name.to_string();
            consumer_app.application_name = client_name.to_string();
        }

        if let Some(audience) = allowed_audience(request.ext_allowed_audience.as_deref()) {
            sp.associated_roles.allowed_audience = audience;
        }

        if let Some(grant_types) = &request.grant_types {
            consumer_app.grant_types = grant_types.join(GRANT_TYPE_SEPARATOR);
        }
        if let Some(redirect_uris) = &request.redirect_uris {
            consumer_app.callback_url =
                build_callback_url(redirect_uris, &consumer_app.grant_type_list())?;
        }
        if let Some(uri) = request
            .metadata
            .backchannel_logout_uri
            .as_deref()
            .filter(|uri| !uri.is_empty())
        {
            consumer_app.backchannel_logout_url = validate_backchannel_logout_uri(Some(uri))?;
        }
        consumer_app.apply_metadata(&request.metadata);
        if let Some(certificate_bound) = request.metadata.tls_client_certificate_bound_access_tokens {
            let binding = self.token_binding(certificate_bound);
            consumer_app.token_binding_type = binding.binding_type;
            consumer_app.token_binding_validation_enabled = binding.validation_enabled;
        }

        let mut update = Update {
            service: self,
            tenant_domain,
            owner,
            previous_sp,
            service_provider: sp,
            consumer_app,
        };
        Saga::new("update_application")
            .step(UpdateServiceProvider)
            .step(UpdateConsumerApplication)
            .run(&mut update)
            .await?;

        let Update {
            tenant_domain,
            service_provider,
            ..
        } = update;
        info!(client_id, tenant_domain = %tenant_domain, "application updated");

        let mut updated = self
            .applications
            .get_by_client_id(client_id, &tenant_domain)
            .await
            .map_err(|e| DcrmError::ApplicationStoreFailed("get", e.to_string()))?
            .ok_or_else(|| DcrmError::ApplicationNotFound(client_id.to_string()))?;
        updated.jwks_uri = request.jwks_uri.clone().or(service_provider.jwks_uri.clone());

        let mut application = assemble(&updated, Some(&service_provider));
        application.software_statement = request.software_statement;
        application.ext_allowed_audience =
            Some(service_provider.associated_roles.allowed_audience.clone());
        if let Some(filter) = &self.attribute_filter {
            application.additional_attributes = response_attributes(filter.as_ref(), &filtered);
        }
        Ok(application)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::dcr::attributes::KeyListAttributeFilter;
    use crate::dcr::service::ServiceSettings;
    use crate::dcr::software_statement::tests::{StubVerifier, unsigned_token};
    use crate::dcr::types::{ClientMetadata, RegistrationRequest, TOKEN_BINDING_TYPE_NONE};
    use crate::dcr::validators::{
        DEFAULT_APPLICATION_NAME_REGEX, DEFAULT_CLIENT_ID_REGEX, NamingRules,
    };
    use crate::storage::{MemoryServiceProviderStorage, MemoryTenantDirectory, Stores};

    const TENANT: &str = "carbon.super";

    fn service() -> DcrmService {
        DcrmService::new(
            Stores::memory(MemoryTenantDirectory::new()),
            Arc::new(StubVerifier::new(Ok(true))),
            ServiceSettings::new(
                NamingRules::new(DEFAULT_APPLICATION_NAME_REGEX, DEFAULT_CLIENT_ID_REGEX).unwrap(),
            ),
        )
    }

    fn alice() -> RequestContext {
        RequestContext::new(TENANT).with_user("alice")
    }

    async fn register(service: &DcrmService, name: &str) -> Application {
        service
            .register_application(
                &alice(),
                RegistrationRequest {
                    client_name: name.to_string(),
                    redirect_uris: vec!["https://op.test/cb".to_string()],
                    grant_types: vec!["authorization_code".to_string()],
                    ext_application_display_name: Some("Original".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_rename_updates_both_records() {
        let service = service();
        let registered = register(&service, "Application").await;

        let updated = service
            .update_application(
                &alice(),
                &registered.client_id,
                UpdateRequest {
                    client_name: Some("Renamed".to_string()),
                    ext_application_display_name: Some("Renamed display".to_string()),
                    ext_application_version: Some("v2".to_string()),
                    jwks_uri: Some("https://rp.test/jwks".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.client_id, registered.client_id);
        assert_eq!(updated.client_name, "Renamed");
        assert_eq!(updated.ext_application_display_name.as_deref(), Some("Renamed display"));
        assert_eq!(updated.ext_application_version.as_deref(), Some("v2"));
        assert_eq!(updated.jwks_uri.as_deref(), Some("https://rp.test/jwks"));
        assert_eq!(updated.redirect_uris, registered.redirect_uris);

        assert!(!service.service_provider_exists("Application", TENANT).await);
        let sp = service
            .find_service_provider("Renamed", TENANT)
            .await
            .unwrap()
            .unwrap();
        assert!(sp.is_linked_to(&registered.client_id, "oauth2"));
    }

    #[tokio::test]
    async fn test_absent_fields_are_kept() {
        let service = service();
        let registered = register(&service, "Application").await;

        let updated = service
            .update_application(
                &alice(),
                &registered.client_id,
                UpdateRequest {
                    metadata: ClientMetadata {
                        ext_pkce_mandatory: Some(true),
                        ..Default::default()
                    },
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(updated.ext_pkce_mandatory);
        assert_eq!(updated.client_name, "Application");
        assert_eq!(updated.grant_types, vec!["authorization_code"]);
        assert_eq!(updated.redirect_uris, vec!["https://op.test/cb"]);
        assert_eq!(updated.ext_application_display_name.as_deref(), Some("Original"));
    }

    #[tokio::test]
    async fn test_redirect_uris_checked_against_effective_grant_types() {
        let service = service();
        let registered = register(&service, "Application").await;

        let result = service
            .update_application(
                &alice(),
                &registered.client_id,
                UpdateRequest {
                    redirect_uris: Some(Vec::new()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(DcrmError::InvalidInput(_))));

        let updated = service
            .update_application(
                &alice(),
                &registered.client_id,
                UpdateRequest {
                    redirect_uris: Some(Vec::new()),
                    grant_types: Some(vec!["client_credentials".to_string()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(updated.redirect_uris.is_empty());
        assert_eq!(updated.grant_types, vec!["client_credentials"]);
    }

    #[tokio::test]
    async fn test_multiple_redirect_uris() {
        let service = service();
        let registered = register(&service, "Application").await;

        let uris = vec![
            "https://a.test/cb".to_string(),
            "https://b.test/cb?x=1".to_string(),
        ];
        let updated = service
            .update_application(
                &alice(),
                &registered.client_id,
                UpdateRequest {
                    redirect_uris: Some(uris.clone()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.redirect_uris, uris);
    }

    #[tokio::test]
    async fn test_rename_to_existing_name_conflicts() {
        let service = service();
        let registered = register(&service, "Application").await;
        register(&service, "Taken").await;

        let result = service
            .update_application(
                &alice(),
                &registered.client_id,
                UpdateRequest {
                    client_name: Some("Taken".to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(DcrmError::ApplicationNameConflict(_))));

        let unchanged = service
            .update_application(
                &alice(),
                &registered.client_id,
                UpdateRequest {
                    client_name: Some("Application".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(unchanged.client_name, "Application");
    }

    #[tokio::test]
    async fn test_update_requires_authorization() {
        let service = service();
        let registered = register(&service, "Application").await;

        let bob = RequestContext::new(TENANT).with_user("bob");
        let result = service
            .update_application(&bob, &registered.client_id, UpdateRequest::default())
            .await;
        assert!(matches!(result, Err(DcrmError::UnauthorizedUser(_))));
    }

    #[tokio::test]
    async fn test_blank_owner_falls_back_to_request_user() {
        let service_providers = MemoryServiceProviderStorage::new();
        service_providers
            .authorize_user("Application", "alice", TENANT)
            .unwrap();
        let service = DcrmService::new(
            Stores::memory_with(service_providers, MemoryTenantDirectory::new()),
            Arc::new(StubVerifier::new(Ok(true))),
            ServiceSettings::new(
                NamingRules::new(DEFAULT_APPLICATION_NAME_REGEX, DEFAULT_CLIENT_ID_REGEX).unwrap(),
            ),
        );
        let registered = service
            .register_application(
                &alice(),
                RegistrationRequest {
                    client_name: "Application".to_string(),
                    redirect_uris: vec!["https://op.test/cb".to_string()],
                    grant_types: vec!["authorization_code".to_string()],
                    ext_application_owner: Some("carol".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let sp = service
            .find_service_provider("Application", TENANT)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sp.owner.username, "carol");

        service
            .update_application(
                &alice(),
                &registered.client_id,
                UpdateRequest {
                    ext_application_owner: Some("  ".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let sp = service
            .find_service_provider("Application", TENANT)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sp.owner.username, "alice");
    }

    #[tokio::test]
    async fn test_allowed_audience_and_token_binding() {
        let service = service();
        let registered = register(&service, "Application").await;

        let updated = service
            .update_application(
                &alice(),
                &registered.client_id,
                UpdateRequest {
                    ext_allowed_audience: Some("ORGANIZATION".to_string()),
                    metadata: ClientMetadata {
                        tls_client_certificate_bound_access_tokens: Some(true),
                        ..Default::default()
                    },
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.ext_allowed_audience.as_deref(), Some("organization"));
        assert!(updated.tls_client_certificate_bound_access_tokens);

        let updated = service
            .update_application(
                &alice(),
                &registered.client_id,
                UpdateRequest {
                    ext_allowed_audience: Some("unknown".to_string()),
                    metadata: ClientMetadata {
                        tls_client_certificate_bound_access_tokens: Some(false),
                        ..Default::default()
                    },
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.ext_allowed_audience.as_deref(), Some("organization"));
        assert!(!updated.tls_client_certificate_bound_access_tokens);

        let stored = service
            .applications
            .get_by_client_id(&registered.client_id, TENANT)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.token_binding_type.as_deref(), Some(TOKEN_BINDING_TYPE_NONE));
    }

    #[tokio::test]
    async fn test_update_filters_attributes_with_statement_claims() {
        let service = service()
            .with_attribute_filter(Arc::new(KeyListAttributeFilter::new(["software_id"])));
        let registered = register(&service, "Application").await;

        let statement = unsigned_token(json!({"software_id": "s2"}));
        let updated = service
            .update_application(
                &alice(),
                &registered.client_id,
                UpdateRequest {
                    client_name: Some("Application".to_string()),
                    software_statement: Some(statement.clone()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.software_statement.as_deref(), Some(statement.as_str()));
        assert_eq!(updated.additional_attributes.get("software_id"), Some(&json!("s2")));

        let sp = service
            .find_service_provider("Application", TENANT)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sp.property("software_id"), Some("s2"));
    }

    #[tokio::test]
    async fn test_invalid_backchannel_uri_changes_nothing() {
        let service = service();
        let registered = register(&service, "Application").await;

        let result = service
            .update_application(
                &alice(),
                &registered.client_id,
                UpdateRequest {
                    client_name: Some("Renamed".to_string()),
                    metadata: ClientMetadata {
                        backchannel_logout_uri: Some("not a uri".to_string()),
                        ..Default::default()
                    },
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(DcrmError::InvalidBackchannelLogoutUri(_))));
        assert!(service.service_provider_exists("Application", TENANT).await);
        assert!(!service.service_provider_exists("Renamed", TENANT).await);
    }
}
