//! Builds the public [`Application`] view from the stored records.

use crate::dcr::types::{Application, ConsumerApplication, ServiceProvider};
use crate::dcr::validators::redirect_uris_from_callback_url;

/// Combine a consumer application with its service provider.
///
/// Allowed audience, software statement and additional attributes depend on
/// the operation and are filled in by the caller.
pub fn assemble(application: &ConsumerApplication, sp: Option<&ServiceProvider>) -> Application {
    Application {
        client_id: application.client_id.clone(),
        client_secret: application.client_secret.clone(),
        client_name: application.application_name.clone(),
        redirect_uris: redirect_uris_from_callback_url(&application.callback_url),
        grant_types: application.grant_type_list(),
        ext_application_display_name: sp.and_then(|sp| sp.display_name()).map(str::to_string),
        ext_application_version: sp.and_then(|sp| sp.application_version.clone()),
        ext_application_owner: application.username.clone(),
        ext_application_token_lifetime: application.application_access_token_expiry_time,
        ext_user_token_lifetime: application.user_access_token_expiry_time,
        ext_refresh_token_lifetime: application.refresh_token_expiry_time,
        ext_id_token_lifetime: application.id_token_expiry_time,
        ext_pkce_mandatory: application.pkce_mandatory,
        ext_pkce_support_plain: application.pkce_support_plain,
        ext_public_client: application.bypass_client_credentials,
        ext_token_type: application.token_type.clone(),
        jwks_uri: application.jwks_uri.clone(),
        token_endpoint_auth_method: application.token_endpoint_auth_method.clone(),
        token_endpoint_allow_reuse_pvt_key_jwt: application.token_endpoint_allow_reuse_pvt_key_jwt,
        token_endpoint_auth_signing_alg: application.token_endpoint_auth_signature_algorithm.clone(),
        sector_identifier_uri: application.sector_identifier_uri.clone(),
        id_token_signed_response_alg: application.id_token_signature_algorithm.clone(),
        id_token_encrypted_response_alg: application.id_token_encryption_algorithm.clone(),
        id_token_encrypted_response_enc: application.id_token_encryption_method.clone(),
        require_signed_request_object: application.request_object_signature_validation_enabled,
        request_object_signing_alg: application.request_object_signature_algorithm.clone(),
        request_object_encryption_alg: application.request_object_encryption_algorithm.clone(),
        request_object_encryption_enc: application.request_object_encryption_method.clone(),
        require_pushed_authorization_requests: application.require_pushed_authorization_requests,
        tls_client_auth_subject_dn: application.tls_client_auth_subject_dn.clone(),
        tls_client_certificate_bound_access_tokens: application.is_certificate_bound(),
        subject_type: application.subject_type.clone(),
        ext_allowed_audience: None,
        software_statement: None,
        additional_attributes: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dcr::types::{APP_DISPLAY_NAME_PROPERTY, CERTIFICATE_BASED_TOKEN_BINDER};

    #[test]
    fn test_assemble_with_service_provider() {
        let application = ConsumerApplication {
            client_id: "client".to_string(),
            client_secret: Some("secret".to_string()),
            application_name: "app".to_string(),
            username: "alice".to_string(),
            callback_url: "regexp=(https://a\\.test/cb|https://b\\.test/cb)".to_string(),
            grant_types: "authorization_code refresh_token".to_string(),
            token_binding_type: Some(CERTIFICATE_BASED_TOKEN_BINDER.to_string()),
            request_object_signature_validation_enabled: true,
            jwks_uri: Some("https://rp.test/jwks".to_string()),
            ..Default::default()
        };
        let mut sp = ServiceProvider {
            application_version: Some("v2".to_string()),
            ..Default::default()
        };
        sp.upsert_property(APP_DISPLAY_NAME_PROPERTY, "My App");

        let view = assemble(&application, Some(&sp));
        assert_eq!(view.client_name, "app");
        assert_eq!(view.ext_application_owner, "alice");
        assert_eq!(
            view.redirect_uris,
            vec!["https://a.test/cb".to_string(), "https://b.test/cb".to_string()]
        );
        assert_eq!(view.grant_types, vec!["authorization_code", "refresh_token"]);
        assert_eq!(view.ext_application_display_name.as_deref(), Some("My App"));
        assert_eq!(view.ext_application_version.as_deref(), Some("v2"));
        assert!(view.tls_client_certificate_bound_access_tokens);
        assert!(view.require_signed_request_object);
        assert_eq!(view.jwks_uri.as_deref(), Some("https://rp.test/jwks"));
    }

    #[test]
    fn test_assemble_without_service_provider() {
        let application = ConsumerApplication {
            client_id: "client".to_string(),
            application_name: "app".to_string(),
            token_binding_type: Some("None".to_string()),
            ..Default::default()
        };

        let view = assemble(&application, None);
        assert!(view.redirect_uris.is_empty());
        assert!(view.grant_types.is_empty());
        assert!(view.ext_application_display_name.is_none());
        assert!(!view.tls_client_certificate_bound_access_tokens);
    }
}
