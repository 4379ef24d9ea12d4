//! Registration records, requests and the public `Application` view.
//!
//! `ConsumerApplication` is the OAuth-side record and `ServiceProvider` is its
//! application-management twin. Both are plain owned values: stores hand out
//! copies, so mutating a fetched record never touches a cached instance.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Inbound authentication type linking a service provider to an OAuth client
pub const AUTH_TYPE_OAUTH2: &str = "oauth2";

/// OAuth version stamped on every consumer application
pub const OAUTH_VERSION: &str = "OAuth-2.0";

/// Separator used when grant types are stored as a single string
pub const GRANT_TYPE_SEPARATOR: &str = " ";

/// Service provider property holding the human readable application name
pub const APP_DISPLAY_NAME_PROPERTY: &str = "DisplayName";

/// Service provider property marking applications registered through DCR
pub const IS_THIRD_PARTY_APP_PROPERTY: &str = "isThirdPartyApp";

/// Name reported by the management store for clients without a service provider
pub const DEFAULT_SP_CONFIG: &str = "default";

/// Marker prefix of callback URLs that hold a pattern instead of a single URI
pub const CALLBACK_URL_REGEXP_PREFIX: &str = "regexp=";

/// Allowed audience for organization roles
pub const ORG_ROLE_AUDIENCE: &str = "organization";

/// Allowed audience for application roles
pub const APP_ROLE_AUDIENCE: &str = "application";

/// Token binder type for mutual-TLS certificate bound access tokens
pub const CERTIFICATE_BASED_TOKEN_BINDER: &str = "certificate";

/// Token binding type of clients that do not bind tokens
pub const TOKEN_BINDING_TYPE_NONE: &str = "None";

pub const GRANT_TYPE_AUTHORIZATION_CODE: &str = "authorization_code";
pub const GRANT_TYPE_IMPLICIT: &str = "implicit";

/// Claims extracted from a software statement
pub type Claims = serde_json::Map<String, Value>;

/// Additional attributes exchanged with the attribute filter
pub type AdditionalAttributes = HashMap<String, Value>;

/// Caller identity and tenancy for one request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Tenant the request was addressed to
    pub tenant_domain: String,
    /// Authenticated user, absent when the endpoint is unauthenticated
    pub username: Option<String>,
    /// Organization the application resides in, if different from the tenant
    pub resident_organization_id: Option<String>,
}

impl RequestContext {
    pub fn new(tenant_domain: impl Into<String>) -> Self {
        Self {
            tenant_domain: tenant_domain.into(),
            ..Default::default()
        }
    }

    pub fn with_user(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_resident_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.resident_organization_id = Some(organization_id.into());
        self
    }
}

/// DCR policy snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DcrConfiguration {
    /// Whether the DCR endpoint requires authentication; absent means required
    pub authentication_required: Option<bool>,
    /// Whether every registration must carry a software statement
    pub mandate_ssa: bool,
    /// JWKS endpoint for software statement signatures; empty skips the check
    pub ssa_jwks: Option<String>,
    /// Whether registered clients must conform to FAPI
    pub fapi_enforcement: bool,
}

impl DcrConfiguration {
    pub fn is_authentication_required(&self) -> bool {
        self.authentication_required.unwrap_or(true)
    }

    /// JWKS endpoint to verify software statements against, if configured.
    pub fn ssa_jwks_url(&self) -> Option<&str> {
        self.ssa_jwks.as_deref().filter(|url| !url.is_empty())
    }
}

/// OAuth/OIDC client metadata shared by registration and update requests.
///
/// Every field is optional; on update an absent field leaves the stored value
/// untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientMetadata {
    pub ext_token_type: Option<String>,
    /// Deprecated, used only when `ext_token_type` is absent
    pub token_type_extension: Option<String>,
    pub backchannel_logout_uri: Option<String>,
    pub ext_application_token_lifetime: Option<i64>,
    pub ext_user_token_lifetime: Option<i64>,
    pub ext_refresh_token_lifetime: Option<i64>,
    pub ext_id_token_lifetime: Option<i64>,
    pub token_endpoint_auth_method: Option<String>,
    pub token_endpoint_allow_reuse_pvt_key_jwt: Option<bool>,
    pub token_endpoint_auth_signing_alg: Option<String>,
    pub sector_identifier_uri: Option<String>,
    pub id_token_signed_response_alg: Option<String>,
    pub id_token_encrypted_response_alg: Option<String>,
    pub id_token_encrypted_response_enc: Option<String>,
    pub request_object_signing_alg: Option<String>,
    pub request_object_encryption_alg: Option<String>,
    pub request_object_encryption_enc: Option<String>,
    pub require_signed_request_object: Option<bool>,
    pub require_pushed_authorization_requests: Option<bool>,
    pub tls_client_auth_subject_dn: Option<String>,
    pub tls_client_certificate_bound_access_tokens: Option<bool>,
    pub subject_type: Option<String>,
    pub ext_pkce_mandatory: Option<bool>,
    pub ext_pkce_support_plain: Option<bool>,
    pub ext_public_client: Option<bool>,
}

impl ClientMetadata {
    /// Token type, preferring the `ext_` field over the deprecated one.
    pub fn effective_token_type(&self) -> Option<&str> {
        self.ext_token_type
            .as_deref()
            .or(self.token_type_extension.as_deref())
    }
}

/// Dynamic client registration request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationRequest {
    pub client_name: String,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    /// Client id requested by the caller instead of a generated one
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub software_statement: Option<String>,
    pub jwks_uri: Option<String>,
    pub ext_application_owner: Option<String>,
    pub ext_application_display_name: Option<String>,
    pub ext_allowed_audience: Option<String>,
    pub ext_param_sp_template: Option<String>,
    pub ext_is_management_app: bool,
    #[serde(flatten)]
    pub metadata: ClientMetadata,
    pub additional_attributes: AdditionalAttributes,
}

/// Partial update of a registered client
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateRequest {
    pub client_name: Option<String>,
    /// `Some(vec![])` clears the callback URL where the grant types allow it
    pub redirect_uris: Option<Vec<String>>,
    pub grant_types: Option<Vec<String>>,
    pub software_statement: Option<String>,
    pub jwks_uri: Option<String>,
    pub ext_application_owner: Option<String>,
    pub ext_application_display_name: Option<String>,
    pub ext_application_version: Option<String>,
    pub ext_allowed_audience: Option<String>,
    #[serde(flatten)]
    pub metadata: ClientMetadata,
    pub additional_attributes: AdditionalAttributes,
}

/// OAuth consumer application as held by the OAuth application store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsumerApplication {
    /// Client id; empty until the store assigns one
    pub client_id: String,
    pub client_secret: Option<String>,
    pub application_name: String,
    /// Owner username
    pub username: String,
    pub tenant_domain: String,
    /// Single redirect URI, or a `regexp=` pattern for several
    pub callback_url: String,
    /// Space separated grant types
    pub grant_types: String,
    pub oauth_version: String,
    pub token_type: Option<String>,
    pub backchannel_logout_url: Option<String>,
    pub application_access_token_expiry_time: Option<i64>,
    pub user_access_token_expiry_time: Option<i64>,
    pub refresh_token_expiry_time: Option<i64>,
    pub id_token_expiry_time: Option<i64>,
    pub token_endpoint_auth_method: Option<String>,
    pub token_endpoint_allow_reuse_pvt_key_jwt: bool,
    pub token_endpoint_auth_signature_algorithm: Option<String>,
    pub sector_identifier_uri: Option<String>,
    pub id_token_signature_algorithm: Option<String>,
    pub id_token_encryption_enabled: bool,
    pub id_token_encryption_algorithm: Option<String>,
    pub id_token_encryption_method: Option<String>,
    pub request_object_signature_validation_enabled: bool,
    pub request_object_signature_algorithm: Option<String>,
    pub request_object_encryption_algorithm: Option<String>,
    pub request_object_encryption_method: Option<String>,
    pub require_pushed_authorization_requests: bool,
    pub tls_client_auth_subject_dn: Option<String>,
    pub subject_type: Option<String>,
    pub token_binding_type: Option<String>,
    pub token_binding_validation_enabled: bool,
    pub pkce_mandatory: bool,
    pub pkce_support_plain: bool,
    pub bypass_client_credentials: bool,
    pub fapi_conformance_enabled: bool,
    /// Response only: lives on the service provider, never persisted here
    #[serde(skip)]
    pub jwks_uri: Option<String>,
}

impl ConsumerApplication {
    /// Merge every metadata field that is present.
    ///
    /// Backchannel logout URI and token binding need validation or registry
    /// lookups and are applied by the caller.
    pub fn apply_metadata(&mut self, metadata: &ClientMetadata) {
        if let Some(token_type) = metadata.effective_token_type() {
            self.token_type = Some(token_type.to_string());
        }
        if let Some(lifetime) = metadata.ext_application_token_lifetime {
            self.application_access_token_expiry_time = Some(lifetime);
        }
        if let Some(lifetime) = metadata.ext_user_token_lifetime {
            self.user_access_token_expiry_time = Some(lifetime);
        }
        if let Some(lifetime) = metadata.ext_refresh_token_lifetime {
            self.refresh_token_expiry_time = Some(lifetime);
        }
        if let Some(lifetime) = metadata.ext_id_token_lifetime {
            self.id_token_expiry_time = Some(lifetime);
        }
        if let Some(method) = &metadata.token_endpoint_auth_method {
            self.token_endpoint_auth_method = Some(method.clone());
        }
        if let Some(reuse) = metadata.token_endpoint_allow_reuse_pvt_key_jwt {
            self.token_endpoint_allow_reuse_pvt_key_jwt = reuse;
        }
        if let Some(alg) = &metadata.token_endpoint_auth_signing_alg {
            self.token_endpoint_auth_signature_algorithm = Some(alg.clone());
        }
        if let Some(uri) = &metadata.sector_identifier_uri {
            self.sector_identifier_uri = Some(uri.clone());
        }
        if let Some(alg) = &metadata.id_token_signed_response_alg {
            self.id_token_signature_algorithm = Some(alg.clone());
        }
        if let Some(alg) = &metadata.id_token_encrypted_response_alg {
            self.id_token_encryption_algorithm = Some(alg.clone());
            self.id_token_encryption_enabled = true;
        }
        if let Some(enc) = &metadata.id_token_encrypted_response_enc {
            self.id_token_encryption_method = Some(enc.clone());
        }
        if let Some(alg) = &metadata.request_object_signing_alg {
            self.request_object_signature_algorithm = Some(alg.clone());
        }
        if let Some(alg) = &metadata.request_object_encryption_alg {
            self.request_object_encryption_algorithm = Some(alg.clone());
        }
        if let Some(enc) = &metadata.request_object_encryption_enc {
            self.request_object_encryption_method = Some(enc.clone());
        }
        if let Some(required) = metadata.require_signed_request_object {
            self.request_object_signature_validation_enabled = required;
        }
        if let Some(required) = metadata.require_pushed_authorization_requests {
            self.require_pushed_authorization_requests = required;
        }
        if let Some(dn) = &metadata.tls_client_auth_subject_dn {
            self.tls_client_auth_subject_dn = Some(dn.clone());
        }
        if let Some(subject_type) = &metadata.subject_type {
            self.subject_type = Some(subject_type.clone());
        }
        if let Some(mandatory) = metadata.ext_pkce_mandatory {
            self.pkce_mandatory = mandatory;
        }
        if let Some(plain) = metadata.ext_pkce_support_plain {
            self.pkce_support_plain = plain;
        }
        if let Some(public) = metadata.ext_public_client {
            self.bypass_client_credentials = public;
        }
    }

    /// Grant types as an ordered list.
    pub fn grant_type_list(&self) -> Vec<String> {
        self.grant_types
            .split(GRANT_TYPE_SEPARATOR)
            .filter(|grant| !grant.is_empty())
            .map(|grant| grant.to_string())
            .collect()
    }

    pub fn is_certificate_bound(&self) -> bool {
        self.token_binding_type.as_deref() == Some(CERTIFICATE_BASED_TOKEN_BINDER)
    }
}

/// Owner of a service provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationOwner {
    pub username: String,
    pub tenant_domain: String,
}

/// Role audience configuration of a service provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociatedRolesConfig {
    pub allowed_audience: String,
}

impl Default for AssociatedRolesConfig {
    fn default() -> Self {
        Self {
            allowed_audience: APP_ROLE_AUDIENCE.to_string(),
        }
    }
}

/// Name/value property attached to a service provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceProviderProperty {
    pub name: String,
    pub value: String,
}

/// Protocol binding of a service provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundAuthenticationRequestConfig {
    pub inbound_auth_key: String,
    pub inbound_auth_type: String,
}

/// Identity application record held by the application-management store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceProvider {
    /// Assigned by the store on creation
    pub application_id: Option<String>,
    pub application_name: String,
    pub owner: ApplicationOwner,
    pub description: String,
    pub management_app: bool,
    pub saas_app: bool,
    pub application_version: Option<String>,
    pub associated_roles: AssociatedRolesConfig,
    pub jwks_uri: Option<String>,
    pub properties: Vec<ServiceProviderProperty>,
    pub inbound_authentication: Vec<InboundAuthenticationRequestConfig>,
}

impl ServiceProvider {
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|property| property.name == name)
            .map(|property| property.value.as_str())
    }

    /// Set a property, overwriting an existing value.
    pub fn upsert_property(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.properties.iter_mut().find(|p| p.name == name) {
            Some(property) => property.value = value,
            None => self.properties.push(ServiceProviderProperty {
                name: name.to_string(),
                value,
            }),
        }
    }

    /// Set a property only if it is not present yet.
    pub fn insert_property(&mut self, name: &str, value: impl Into<String>) {
        if self.property(name).is_none() {
            self.properties.push(ServiceProviderProperty {
                name: name.to_string(),
                value: value.into(),
            });
        }
    }

    pub fn display_name(&self) -> Option<&str> {
        self.property(APP_DISPLAY_NAME_PROPERTY)
    }

    /// Replace the inbound configuration with a single OAuth2 binding.
    pub fn link_oauth_client(&mut self, client_id: &str) {
        self.inbound_authentication = vec![InboundAuthenticationRequestConfig {
            inbound_auth_key: client_id.to_string(),
            inbound_auth_type: AUTH_TYPE_OAUTH2.to_string(),
        }];
    }

    pub fn is_linked_to(&self, client_id: &str, auth_type: &str) -> bool {
        self.inbound_authentication
            .iter()
            .any(|c| c.inbound_auth_key == client_id && c.inbound_auth_type == auth_type)
    }
}

/// Registered client as returned to callers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub client_name: String,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext_application_display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext_application_version: Option<String>,
    pub ext_application_owner: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext_application_token_lifetime: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext_user_token_lifetime: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext_refresh_token_lifetime: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext_id_token_lifetime: Option<i64>,
    pub ext_pkce_mandatory: bool,
    pub ext_pkce_support_plain: bool,
    pub ext_public_client: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext_token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_endpoint_auth_method: Option<String>,
    pub token_endpoint_allow_reuse_pvt_key_jwt: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_endpoint_auth_signing_alg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sector_identifier_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token_signed_response_alg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token_encrypted_response_alg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token_encrypted_response_enc: Option<String>,
    pub require_signed_request_object: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_object_signing_alg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_object_encryption_alg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_object_encryption_enc: Option<String>,
    pub require_pushed_authorization_requests: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_client_auth_subject_dn: Option<String>,
    pub tls_client_certificate_bound_access_tokens: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext_allowed_audience: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub software_statement: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub additional_attributes: AdditionalAttributes,
}
