//! Standardized error types following the `error-dcrm-<domain>-<number>` format.

use axum::Json;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde_json::json;
use thiserror::Error;

/// Configuration errors that occur during application startup
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error when a required environment variable is not set
    #[error("error-dcrm-config-1 {0} must be set")]
    EnvVarRequired(String),

    /// Error when version information is not available
    #[error("error-dcrm-config-2 One of GIT_HASH or CARGO_PKG_VERSION must be set")]
    VersionNotSet,

    /// Error when duration string cannot be parsed
    #[error("error-dcrm-config-3 Failed to parse duration '{0}': {1}")]
    DurationParsingFailed(String, String),

    /// Error when boolean string cannot be parsed
    #[error(
        "error-dcrm-config-4 Failed to parse boolean '{0}': expected true/false/1/0/yes/no/on/off"
    )]
    BoolParsingFailed(String),

    /// Error when a validation pattern does not compile
    #[error("error-dcrm-config-5 Invalid regular expression '{0}': {1}")]
    InvalidRegex(String, String),

    /// Error when a URL setting cannot be parsed
    #[error("error-dcrm-config-6 Invalid URL '{0}': {1}")]
    InvalidUrl(String, String),
}

/// Errors raised by the backing stores
#[derive(Debug, Error)]
pub enum StorageError {
    /// The store rejected the record because of caller-supplied data
    #[error("error-dcrm-storage-1 Rejected by store: {0}")]
    Rejected(String),

    /// A uniqueness constraint was violated
    #[error("error-dcrm-storage-2 Conflict: {0}")]
    Conflict(String),

    /// Requested resource is not found
    #[error("error-dcrm-storage-3 Not found: {0}")]
    NotFound(String),

    /// Error when the store is unreachable or fails internally
    #[error("error-dcrm-storage-4 Store failure: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Whether the store attributes the failure to the caller's input.
    pub fn is_client_error(&self) -> bool {
        matches!(self, StorageError::Rejected(_) | StorageError::Conflict(_))
    }
}

/// Software statement verification errors
#[derive(Debug, Error)]
pub enum VerifierError {
    /// The token is not a well-formed signed JWT
    #[error("error-dcrm-verifier-1 Malformed software statement: {0}")]
    Malformed(String),

    /// The token uses an algorithm that cannot be verified
    #[error("error-dcrm-verifier-2 Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The JWKS endpoint could not be used
    #[error("error-dcrm-verifier-3 JWKS unavailable: {0}")]
    JwksUnavailable(String),

    /// No key in the JWKS fits the token header
    #[error("error-dcrm-verifier-4 No matching key: {0}")]
    KeyNotFound(String),
}

/// Errors raised by the registration engine.
///
/// Every variant is either a client error (safe to return to the caller, with
/// a stable [`DcrmError::code`]) or a server error (logged, generic message).
#[derive(Debug, Error)]
pub enum DcrmError {
    /// Malformed or missing input
    #[error("error-dcrm-client-1 Invalid input: {0}")]
    InvalidInput(String),

    /// A mandatory value was not supplied
    #[error("error-dcrm-client-2 Insufficient data: {0}")]
    InsufficientData(String),

    /// Application name does not match the configured pattern
    #[error("error-dcrm-client-3 Application name does not match pattern {0}")]
    InvalidApplicationName(String),

    /// An application with the same name already exists in the tenant
    #[error("error-dcrm-client-4 Application with name {0} already exists")]
    ApplicationNameConflict(String),

    /// An application with the same client id already exists
    #[error("error-dcrm-client-5 Application with client id {0} already exists")]
    ClientIdConflict(String),

    /// Requested client id does not match the configured pattern
    #[error("error-dcrm-client-6 Client id does not match pattern {0}")]
    ClientIdViolatesPattern(String),

    /// Redirect URI failed validation
    #[error("error-dcrm-client-7 Invalid redirect URI: {0}")]
    InvalidRedirectUri(String),

    /// Backchannel logout URI failed validation
    #[error("error-dcrm-client-8 Invalid backchannel logout URI: {0}")]
    InvalidBackchannelLogoutUri(String),

    /// Policy requires a software statement and none was supplied
    #[error("error-dcrm-client-9 Software statement is mandatory")]
    MissingSoftwareStatement,

    /// Software statement failed parsing or signature verification
    #[error("error-dcrm-client-10 Signature validation of the software statement failed: {0}")]
    InvalidSoftwareStatement(String),

    /// Claims could not be read from the software statement
    #[error("error-dcrm-client-11 Failed to read the software statement: {0}")]
    UnreadableSoftwareStatement(String),

    /// The requested service provider template does not exist
    #[error("error-dcrm-client-12 Invalid service provider template: {0}")]
    InvalidTemplateName(String),

    /// The application-management store rejected the service provider
    #[error("error-dcrm-client-13 Application creation rejected: {0}")]
    ApplicationCreationRejected(String),

    /// The OAuth store rejected the client metadata
    #[error("error-dcrm-client-14 Invalid client metadata: {0}")]
    InvalidClientMetadata(String),

    /// No application with the given client id
    #[error("error-dcrm-client-15 Application not found for client id {0}")]
    ApplicationNotFound(String),

    /// No service provider with the given name
    #[error("error-dcrm-client-16 Application not found with name {0}")]
    ApplicationNameNotFound(String),

    /// Service provider exists but has no OAuth application with that name
    #[error("error-dcrm-client-17 OAuth application not found with name {0}")]
    OAuthApplicationNameNotFound(String),

    /// Caller may not act on the application
    #[error("error-dcrm-client-18 User is not authorized to access application {0}")]
    UnauthorizedUser(String),

    /// Application belongs to a different tenant than the request
    #[error("error-dcrm-client-19 Tenant domain mismatch for client id {0}")]
    TenantDomainMismatch(String),

    /// The paired service provider could not be found
    #[error("error-dcrm-client-20 Service provider not found: {0}")]
    ServiceProviderNotFound(String),

    /// The service provider vanished right after it was created
    #[error("error-dcrm-client-21 Service provider was not registered: {0}")]
    ServiceProviderNotRegistered(String),

    /// Application owner could not be determined
    #[error("error-dcrm-server-1 Unable to resolve application owner: {0}")]
    OwnerUnresolved(String),

    /// Tenant admin lookup failed
    #[error("error-dcrm-server-2 Failed to get the tenant admin of {0}: {1}")]
    TenantAdminLookupFailed(String, String),

    /// Organization could not be mapped to a tenant
    #[error("error-dcrm-server-3 Failed to resolve tenant domain for organization {0}: {1}")]
    TenantResolutionFailed(String, String),

    /// Tenant ownership of the client could not be checked
    #[error("error-dcrm-server-4 Failed to validate tenant domain of client id {0}: {1}")]
    TenantValidationFailed(String, String),

    /// Policy source failed
    #[error("error-dcrm-server-5 DCR configuration unavailable: {0}")]
    ConfigurationUnavailable(String),

    /// OAuth store failure
    #[error("error-dcrm-server-6 OAuth application store failed to {0}: {1}")]
    ApplicationStoreFailed(&'static str, String),

    /// Application-management store failure
    #[error("error-dcrm-server-7 Service provider store failed to {0} {1}: {2}")]
    ServiceProviderStoreFailed(&'static str, String, String),
}

/// Whether an error is safe to expose to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Client,
    Server,
}

impl DcrmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DcrmError::OwnerUnresolved(_)
            | DcrmError::TenantAdminLookupFailed(..)
            | DcrmError::TenantResolutionFailed(..)
            | DcrmError::TenantValidationFailed(..)
            | DcrmError::ConfigurationUnavailable(_)
            | DcrmError::ApplicationStoreFailed(..)
            | DcrmError::ServiceProviderStoreFailed(..) => ErrorKind::Server,
            _ => ErrorKind::Client,
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.kind() == ErrorKind::Client
    }

    /// Stable error code reported to callers.
    pub fn code(&self) -> &'static str {
        match self {
            DcrmError::InvalidInput(_) => "BAD_REQUEST_INVALID_INPUT",
            DcrmError::InsufficientData(_) => "BAD_REQUEST_INSUFFICIENT_DATA",
            DcrmError::InvalidApplicationName(_) => "BAD_REQUEST_INVALID_SP_NAME",
            DcrmError::ApplicationNameConflict(_) => "CONFLICT_EXISTING_APPLICATION",
            DcrmError::ClientIdConflict(_) => "CONFLICT_EXISTING_CLIENT_ID",
            DcrmError::ClientIdViolatesPattern(_) => "BAD_REQUEST_CLIENT_ID_VIOLATES_PATTERN",
            DcrmError::InvalidRedirectUri(_) => "BAD_REQUEST_INVALID_REDIRECT_URI",
            DcrmError::InvalidBackchannelLogoutUri(_) => {
                "BAD_REQUEST_INVALID_BACKCHANNEL_LOGOUT_URI"
            }
            DcrmError::MissingSoftwareStatement
            | DcrmError::InvalidSoftwareStatement(_)
            | DcrmError::UnreadableSoftwareStatement(_) => "invalid_software_statement",
            DcrmError::InvalidTemplateName(_) => "BAD_REQUEST_INVALID_SP_TEMPLATE_NAME",
            DcrmError::ApplicationCreationRejected(_) => "BAD_REQUEST_APPLICATION_CREATION",
            DcrmError::InvalidClientMetadata(_) => "invalid_client_metadata",
            DcrmError::ApplicationNotFound(_) => "NOT_FOUND_APPLICATION_WITH_ID",
            DcrmError::ApplicationNameNotFound(_) => "NOT_FOUND_APPLICATION_WITH_NAME",
            DcrmError::OAuthApplicationNameNotFound(_) => "NOT_FOUND_OAUTH_APPLICATION_WITH_NAME",
            DcrmError::UnauthorizedUser(_) => "FORBIDDEN_UNAUTHORIZED_USER",
            DcrmError::TenantDomainMismatch(_) => "TENANT_DOMAIN_MISMATCH",
            DcrmError::ServiceProviderNotFound(_) => "FAILED_TO_GET_SP",
            DcrmError::ServiceProviderNotRegistered(_) => "FAILED_TO_REGISTER_SP",
            _ => "server_error",
        }
    }

    /// HTTP status an endpoint layer should answer with.
    pub fn status_code(&self) -> StatusCode {
        if !self.is_client_error() {
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
        let code = self.code();
        if code.starts_with("CONFLICT_") {
            StatusCode::CONFLICT
        } else if code.starts_with("NOT_FOUND_") {
            StatusCode::NOT_FOUND
        } else if code.starts_with("FORBIDDEN_") || code == "TENANT_DOMAIN_MISMATCH" {
            StatusCode::FORBIDDEN
        } else {
            StatusCode::BAD_REQUEST
        }
    }
}

pub type Result<T> = std::result::Result<T, DcrmError>;

impl IntoResponse for DcrmError {
    fn into_response(self) -> Response {
        if !self.is_client_error() {
            tracing::error!(error = ?self, "internal server error");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        (
            self.status_code(),
            Json(json!({
                "error": self.code(),
                "error_description": self.to_string(),
            })),
        )
            .into_response()
    }
}
