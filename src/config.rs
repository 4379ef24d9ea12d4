//! Environment-based configuration types for the registration engine.

use anyhow::Result;
use regex::Regex;
use std::time::Duration;
use url::Url;

use crate::dcr::software_statement::JwksCacheConfig;
use crate::dcr::types::{CERTIFICATE_BASED_TOKEN_BINDER, DcrConfiguration};
use crate::dcr::validators::{DEFAULT_APPLICATION_NAME_REGEX, DEFAULT_CLIENT_ID_REGEX, NamingRules};
use crate::errors::ConfigError;

/// Pattern application names must match
#[derive(Clone, Debug)]
pub struct ApplicationNameRegex(Regex);

/// Pattern caller supplied client IDs must match
#[derive(Clone, Debug)]
pub struct ClientIdRegex(Regex);

/// Global FAPI switch, combined with the per-tenant enforcement flag
#[derive(Clone, Debug)]
pub struct EnableFapi(bool);

/// Whether reads check the caller against the application's authorized users
#[derive(Clone, Debug)]
pub struct ApplicationRolePermissionRequired(bool);

/// Default policy: whether the DCR endpoint requires authentication
#[derive(Clone, Debug)]
pub struct AuthenticationRequired(Option<bool>);

/// Default policy: whether software statements are mandatory
#[derive(Clone, Debug)]
pub struct MandateSsa(bool);

/// Default policy: JWKS endpoint for software statement signatures
#[derive(Clone, Debug)]
pub struct SsaJwks(Option<String>);

/// Default policy: whether registered clients must conform to FAPI
#[derive(Clone, Debug)]
pub struct FapiEnforcement(bool);

/// Lifetime of cached JWK sets
#[derive(Clone, Debug)]
pub struct JwksCacheTtl(Duration);

/// HTTP client timeout configuration
#[derive(Clone, Debug)]
pub struct HttpClientTimeout(Duration);

/// Registered access token binders
#[derive(Clone, Debug)]
pub struct TokenBinders(Vec<String>);

/// Main application configuration
#[derive(Clone, Debug)]
pub struct Config {
    pub version: String,
    pub application_name_regex: ApplicationNameRegex,
    pub client_id_regex: ClientIdRegex,
    pub enable_fapi: EnableFapi,
    pub application_role_permission_required: ApplicationRolePermissionRequired,
    pub authentication_required: AuthenticationRequired,
    pub mandate_ssa: MandateSsa,
    pub ssa_jwks: SsaJwks,
    pub fapi_enforcement: FapiEnforcement,
    pub jwks_cache_ttl: JwksCacheTtl,
    pub http_client_timeout: HttpClientTimeout,
    pub token_binders: TokenBinders,
}

impl Config {
    /// Create a new configuration from environment variables
    pub fn new() -> Result<Self> {
        let application_name_regex: ApplicationNameRegex =
            default_env("DCRM_APPLICATION_NAME_REGEX", DEFAULT_APPLICATION_NAME_REGEX).try_into()?;
        let client_id_regex: ClientIdRegex =
            default_env("DCRM_CLIENT_ID_REGEX", DEFAULT_CLIENT_ID_REGEX).try_into()?;
        let enable_fapi: EnableFapi = default_env("DCRM_ENABLE_FAPI", "false").try_into()?;
        let application_role_permission_required: ApplicationRolePermissionRequired =
            default_env("DCRM_APPLICATION_ROLE_PERMISSION_REQUIRED", "false").try_into()?;
        let authentication_required: AuthenticationRequired =
            optional_env("DCRM_AUTHENTICATION_REQUIRED").try_into()?;
        let mandate_ssa: MandateSsa = default_env("DCRM_MANDATE_SSA", "false").try_into()?;
        let ssa_jwks: SsaJwks = optional_env("DCRM_SSA_JWKS").try_into()?;
        let fapi_enforcement: FapiEnforcement =
            default_env("DCRM_FAPI_ENFORCEMENT", "false").try_into()?;
        let jwks_cache_ttl: JwksCacheTtl = default_env("DCRM_JWKS_CACHE_TTL", "1h").try_into()?;
        let http_client_timeout: HttpClientTimeout =
            default_env("DCRM_HTTP_CLIENT_TIMEOUT", "10s").try_into()?;
        let token_binders: TokenBinders = optional_env("DCRM_TOKEN_BINDERS").try_into()?;

        Ok(Self {
            version: version()?,
            application_name_regex,
            client_id_regex,
            enable_fapi,
            application_role_permission_required,
            authentication_required,
            mandate_ssa,
            ssa_jwks,
            fapi_enforcement,
            jwks_cache_ttl,
            http_client_timeout,
            token_binders,
        })
    }

    pub fn naming_rules(&self) -> NamingRules {
        NamingRules::from_regexes(
            self.application_name_regex.0.clone(),
            self.client_id_regex.0.clone(),
        )
    }

    /// Policy for tenants without their own DCR configuration
    pub fn default_dcr_configuration(&self) -> DcrConfiguration {
        DcrConfiguration {
            authentication_required: self.authentication_required.0,
            mandate_ssa: self.mandate_ssa.0,
            ssa_jwks: self.ssa_jwks.0.clone(),
            fapi_enforcement: self.fapi_enforcement.0,
        }
    }

    pub fn jwks_cache_config(&self) -> JwksCacheConfig {
        JwksCacheConfig::default()
            .with_ttl(self.jwks_cache_ttl.0)
            .with_request_timeout(self.http_client_timeout.0)
    }
}

/// Get application version from build environment
pub fn version() -> Result<String> {
    option_env!("GIT_HASH")
        .or(option_env!("CARGO_PKG_VERSION"))
        .map(|val| val.to_string())
        .ok_or(ConfigError::VersionNotSet.into())
}

pub(crate) fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn default_env(name: &str, default_value: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default_value.to_string())
}

fn parse_bool(value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::BoolParsingFailed(value.to_string())),
    }
}

fn parse_duration(value: String) -> Result<Duration, ConfigError> {
    duration_str::parse(&value).map_err(|e| ConfigError::DurationParsingFailed(value, e.to_string()))
}

impl TryFrom<String> for ApplicationNameRegex {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Regex::new(&value)
            .map(Self)
            .map_err(|e| ConfigError::InvalidRegex(value, e.to_string()))
    }
}

impl AsRef<Regex> for ApplicationNameRegex {
    fn as_ref(&self) -> &Regex {
        &self.0
    }
}

impl TryFrom<String> for ClientIdRegex {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Regex::new(&value)
            .map(Self)
            .map_err(|e| ConfigError::InvalidRegex(value, e.to_string()))
    }
}

impl AsRef<Regex> for ClientIdRegex {
    fn as_ref(&self) -> &Regex {
        &self.0
    }
}

impl TryFrom<String> for EnableFapi {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_bool(&value).map(Self)
    }
}

impl AsRef<bool> for EnableFapi {
    fn as_ref(&self) -> &bool {
        &self.0
    }
}

impl TryFrom<String> for ApplicationRolePermissionRequired {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_bool(&value).map(Self)
    }
}

impl AsRef<bool> for ApplicationRolePermissionRequired {
    fn as_ref(&self) -> &bool {
        &self.0
    }
}

impl TryFrom<Option<String>> for AuthenticationRequired {
    type Error = ConfigError;

    fn try_from(value: Option<String>) -> Result<Self, Self::Error> {
        match value {
            None => Ok(Self(None)),
            Some(v) if v.trim().is_empty() => Ok(Self(None)),
            Some(v) => parse_bool(&v).map(|flag| Self(Some(flag))),
        }
    }
}

impl AsRef<Option<bool>> for AuthenticationRequired {
    fn as_ref(&self) -> &Option<bool> {
        &self.0
    }
}

impl TryFrom<String> for MandateSsa {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_bool(&value).map(Self)
    }
}

impl AsRef<bool> for MandateSsa {
    fn as_ref(&self) -> &bool {
        &self.0
    }
}

impl TryFrom<Option<String>> for SsaJwks {
    type Error = ConfigError;

    fn try_from(value: Option<String>) -> Result<Self, Self::Error> {
        let value = match value {
            None => return Ok(Self(None)),
            Some(v) if v.trim().is_empty() => return Ok(Self(None)),
            Some(v) => v,
        };
        Url::parse(&value).map_err(|e| ConfigError::InvalidUrl(value.clone(), e.to_string()))?;
        Ok(Self(Some(value)))
    }
}

impl AsRef<Option<String>> for SsaJwks {
    fn as_ref(&self) -> &Option<String> {
        &self.0
    }
}

impl TryFrom<String> for FapiEnforcement {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_bool(&value).map(Self)
    }
}

impl AsRef<bool> for FapiEnforcement {
    fn as_ref(&self) -> &bool {
        &self.0
    }
}

impl TryFrom<String> for JwksCacheTtl {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_duration(value).map(Self)
    }
}

impl AsRef<Duration> for JwksCacheTtl {
    fn as_ref(&self) -> &Duration {
        &self.0
    }
}

impl TryFrom<String> for HttpClientTimeout {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Ok(Self(Duration::from_secs(10)));
        }
        parse_duration(value).map(Self)
    }
}

impl AsRef<Duration> for HttpClientTimeout {
    fn as_ref(&self) -> &Duration {
        &self.0
    }
}

impl TryFrom<Option<String>> for TokenBinders {
    type Error = ConfigError;

    fn try_from(value: Option<String>) -> Result<Self, Self::Error> {
        let Some(value) = value else {
            return Ok(Self(vec![CERTIFICATE_BASED_TOKEN_BINDER.to_string()]));
        };
        Ok(Self(
            value
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        ))
    }
}

impl TryFrom<String> for TokenBinders {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(Some(value))
    }
}

impl AsRef<Vec<String>> for TokenBinders {
    fn as_ref(&self) -> &Vec<String> {
        &self.0
    }
}
