//! Software statement (SSA) verification.
//!
//! Statements are signed JWTs. When the tenant policy names a JWKS URL the
//! signature is checked against it before the claims are used; otherwise the
//! claims are read without verification.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::jwk::{Jwk, JwkSet, PublicKeyUse};
use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::dcr::types::{Claims, DcrConfiguration};
use crate::errors::{DcrmError, VerifierError};

/// Signature checks and claim extraction for software statements
#[async_trait]
pub trait SoftwareStatementVerifier: Send + Sync {
    /// Returns `Ok(false)` when a key was found but the signature does not
    /// match it.
    async fn verify_signature_by_jwks_url(
        &self,
        token: &str,
        jwks_url: &str,
    ) -> Result<bool, VerifierError>;

    /// Read the payload of a compact JWT without verifying it.
    fn parse_claims(&self, token: &str) -> Result<Claims, VerifierError>;
}

/// Run the statement through the policy: absent statements pass unless they
/// are mandated, present ones are verified when a JWKS URL is configured and
/// then yield their claims.
pub async fn verify_software_statement(
    verifier: &dyn SoftwareStatementVerifier,
    configuration: &DcrConfiguration,
    statement: Option<&str>,
) -> Result<Option<Claims>, DcrmError> {
    let Some(statement) = statement.filter(|s| !s.is_empty()) else {
        if configuration.mandate_ssa {
            return Err(DcrmError::MissingSoftwareStatement);
        }
        return Ok(None);
    };

    check_jws_header(statement).map_err(|e| DcrmError::InvalidSoftwareStatement(e.to_string()))?;

    match configuration.ssa_jwks_url() {
        Some(jwks_url) => {
            match verifier.verify_signature_by_jwks_url(statement, jwks_url).await {
                Ok(true) => {}
                Ok(false) => {
                    return Err(DcrmError::InvalidSoftwareStatement(
                        "signature does not match any key".to_string(),
                    ));
                }
                Err(err) => return Err(DcrmError::InvalidSoftwareStatement(err.to_string())),
            }
        }
        None => debug!("no JWKS configured for software statements, skipping signature check"),
    }

    verifier
        .parse_claims(statement)
        .map(Some)
        .map_err(|e| DcrmError::UnreadableSoftwareStatement(e.to_string()))
}

/// Structural JWS check: three segments and a JSON header naming any
/// algorithm other than `none`.
fn check_jws_header(token: &str) -> Result<(), VerifierError> {
    let header = match token.split('.').collect::<Vec<_>>().as_slice() {
        [header, _, _] => *header,
        _ => {
            return Err(VerifierError::Malformed(
                "expected three dot separated segments".to_string(),
            ));
        }
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(header.trim_end_matches('='))
        .map_err(|e| VerifierError::Malformed(format!("header is not base64url: {}", e)))?;
    let header: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|e| VerifierError::Malformed(format!("header is not JSON: {}", e)))?;
    match header.get("alg").and_then(serde_json::Value::as_str) {
        Some(alg) if !alg.is_empty() && !alg.eq_ignore_ascii_case("none") => Ok(()),
        Some(alg) => Err(VerifierError::UnsupportedAlgorithm(alg.to_string())),
        None => Err(VerifierError::Malformed("header has no alg".to_string())),
    }
}

fn parse_header(token: &str) -> Result<Header, VerifierError> {
    jsonwebtoken::decode_header(token).map_err(|e| VerifierError::Malformed(e.to_string()))
}

/// Read the payload segment of a compact JWT.
pub fn decode_claims(token: &str) -> Result<Claims, VerifierError> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => {
            return Err(VerifierError::Malformed(
                "expected three dot separated segments".to_string(),
            ));
        }
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| VerifierError::Malformed(format!("payload is not base64url: {}", e)))?;
    serde_json::from_slice::<Claims>(&bytes)
        .map_err(|e| VerifierError::Malformed(format!("payload is not a JSON object: {}", e)))
}

/// Settings for the JWKS cache
#[derive(Debug, Clone)]
pub struct JwksCacheConfig {
    pub ttl: Duration,
    pub request_timeout: Duration,
    pub max_response_size: usize,
}

impl Default for JwksCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            request_timeout: Duration::from_secs(10),
            max_response_size: 1024 * 1024,
        }
    }
}

impl JwksCacheConfig {
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

struct CachedJwks {
    jwks: JwkSet,
    fetched_at: Instant,
}

/// Verifier backed by JWK sets fetched over HTTPS and cached per URL.
pub struct JwksSoftwareStatementVerifier {
    http_client: reqwest::Client,
    cache: Arc<RwLock<HashMap<String, CachedJwks>>>,
    config: JwksCacheConfig,
}

impl JwksSoftwareStatementVerifier {
    pub fn new(config: JwksCacheConfig) -> Result<Self, VerifierError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| VerifierError::JwksUnavailable(format!("http client: {}", e)))?;
        Ok(Self {
            http_client,
            cache: Arc::new(RwLock::new(HashMap::new())),
            config,
        })
    }

    async fn decoding_key(
        &self,
        jwks_url: &str,
        kid: Option<&str>,
        algorithm: Algorithm,
    ) -> Result<DecodingKey, VerifierError> {
        let stale = {
            let cache = self.cache.read().await;
            match cache.get(jwks_url) {
                Some(cached) => {
                    if cached.fetched_at.elapsed() < self.config.ttl
                        && let Some(key) = find_key(&cached.jwks, kid, algorithm)
                    {
                        return jwk_to_decoding_key(&key);
                    }
                    Some(cached.jwks.clone())
                }
                None => None,
            }
        };

        let jwks = match self.fetch_jwks(jwks_url).await {
            Ok(jwks) => {
                let mut cache = self.cache.write().await;
                cache.insert(
                    jwks_url.to_string(),
                    CachedJwks {
                        jwks: jwks.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                jwks
            }
            Err(err) => match stale {
                Some(jwks) => {
                    warn!(jwks_url, error = ?err, "JWKS refresh failed, using cached keys");
                    jwks
                }
                None => return Err(err),
            },
        };

        let key = find_key(&jwks, kid, algorithm).ok_or_else(|| match kid {
            Some(kid) => VerifierError::KeyNotFound(format!("kid '{}'", kid)),
            None => VerifierError::KeyNotFound(format!("no {} signing key", algorithm_to_string(algorithm))),
        })?;
        jwk_to_decoding_key(&key)
    }

    async fn fetch_jwks(&self, uri: &str) -> Result<JwkSet, VerifierError> {
        if !uri.starts_with("https://") {
            return Err(VerifierError::JwksUnavailable(
                "JWKS URL must use HTTPS".to_string(),
            ));
        }

        let response = self
            .http_client
            .get(uri)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                warn!(uri, error = ?e, "failed to fetch JWKS");
                VerifierError::JwksUnavailable(e.to_string())
            })?;

        if !response.status().is_success() {
            return Err(VerifierError::JwksUnavailable(format!(
                "JWKS fetch failed with status {}",
                response.status()
            )));
        }

        if let Some(len) = response.content_length()
            && len as usize > self.config.max_response_size
        {
            return Err(VerifierError::JwksUnavailable(
                "JWKS response exceeds maximum size".to_string(),
            ));
        }

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| VerifierError::JwksUnavailable(format!("invalid JWKS JSON: {}", e)))
    }
}

#[async_trait]
impl SoftwareStatementVerifier for JwksSoftwareStatementVerifier {
    async fn verify_signature_by_jwks_url(
        &self,
        token: &str,
        jwks_url: &str,
    ) -> Result<bool, VerifierError> {
        let header = parse_header(token)?;
        if matches!(header.alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(VerifierError::UnsupportedAlgorithm(
                algorithm_to_string(header.alg).to_string(),
            ));
        }

        let key = self
            .decoding_key(jwks_url, header.kid.as_deref(), header.alg)
            .await?;

        let mut validation = Validation::new(header.alg);
        validation.validate_aud = false;
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        match jsonwebtoken::decode::<Claims>(token, &key, &validation) {
            Ok(_) => Ok(true),
            Err(err) => match err.kind() {
                jsonwebtoken::errors::ErrorKind::InvalidSignature => Ok(false),
                _ => Err(VerifierError::Malformed(err.to_string())),
            },
        }
    }

    fn parse_claims(&self, token: &str) -> Result<Claims, VerifierError> {
        decode_claims(token)
    }
}

fn find_key(jwks: &JwkSet, kid: Option<&str>, algorithm: Algorithm) -> Option<Jwk> {
    let alg = algorithm_to_string(algorithm);
    jwks.keys
        .iter()
        .find(|key| {
            if let Some(expected) = kid
                && key.common.key_id.as_deref() != Some(expected)
            {
                return false;
            }
            if let Some(key_alg) = &key.common.key_algorithm
                && key_alg.to_string() != alg
            {
                return false;
            }
            match &key.common.public_key_use {
                Some(key_use) => *key_use == PublicKeyUse::Signature,
                None => true,
            }
        })
        .cloned()
}

fn jwk_to_decoding_key(jwk: &Jwk) -> Result<DecodingKey, VerifierError> {
    DecodingKey::from_jwk(jwk).map_err(|e| VerifierError::KeyNotFound(format!("unusable JWK: {}", e)))
}

fn algorithm_to_string(algorithm: Algorithm) -> &'static str {
    match algorithm {
        Algorithm::HS256 => "HS256",
        Algorithm::HS384 => "HS384",
        Algorithm::HS512 => "HS512",
        Algorithm::ES256 => "ES256",
        Algorithm::ES384 => "ES384",
        Algorithm::RS256 => "RS256",
        Algorithm::RS384 => "RS384",
        Algorithm::RS512 => "RS512",
        Algorithm::PS256 => "PS256",
        Algorithm::PS384 => "PS384",
        Algorithm::PS512 => "PS512",
        Algorithm::EdDSA => "EdDSA",
    }
}
