//! Pure validation helpers for registration input.
//!
//! Several redirect URIs are collapsed into one `regexp=(a|b)` callback URL so
//! that the single-valued callback field of the OAuth store can express a set
//! of exact-match redirect targets.

use crate::dcr::types::{CALLBACK_URL_REGEXP_PREFIX, GRANT_TYPE_AUTHORIZATION_CODE, GRANT_TYPE_IMPLICIT};
use crate::errors::{ConfigError, DcrmError};
use regex::Regex;
use url::Url;

/// Default pattern for application names
pub const DEFAULT_APPLICATION_NAME_REGEX: &str = r"^[a-zA-Z0-9\s._-]*$";

/// Default pattern for caller supplied client ids
pub const DEFAULT_CLIENT_ID_REGEX: &str = r"^[a-zA-Z0-9_]{15,30}$";

/// Compiled naming rules for application names and client ids
#[derive(Debug, Clone)]
pub struct NamingRules {
    application_name: Regex,
    client_id: Regex,
}

impl NamingRules {
    pub fn new(application_name: &str, client_id: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            application_name: compile(application_name)?,
            client_id: compile(client_id)?,
        })
    }

    pub fn from_regexes(application_name: Regex, client_id: Regex) -> Self {
        Self {
            application_name,
            client_id,
        }
    }

    pub fn application_name_pattern(&self) -> &str {
        self.application_name.as_str()
    }

    pub fn client_id_pattern(&self) -> &str {
        self.client_id.as_str()
    }

    pub fn validate_application_name(&self, name: &str) -> Result<(), DcrmError> {
        if self.application_name.is_match(name) {
            Ok(())
        } else {
            Err(DcrmError::InvalidApplicationName(
                self.application_name.as_str().to_string(),
            ))
        }
    }

    pub fn validate_client_id(&self, client_id: &str) -> Result<(), DcrmError> {
        if self.client_id.is_match(client_id) {
            Ok(())
        } else {
            Err(DcrmError::ClientIdViolatesPattern(
                self.client_id.as_str().to_string(),
            ))
        }
    }
}

fn compile(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|e| ConfigError::InvalidRegex(pattern.to_string(), e.to_string()))
}

/// Check that a redirect URI is absolute, has a host when the scheme needs
/// one, and carries no fragment.
pub fn is_redirection_uri_valid(uri: &str) -> bool {
    if uri.trim().is_empty() {
        return false;
    }
    let Ok(parsed) = Url::parse(uri) else {
        return false;
    };
    if parsed.fragment().is_some() {
        return false;
    }
    match parsed.scheme() {
        "http" | "https" => parsed.host_str().is_some_and(|host| !host.is_empty()),
        _ => !parsed.cannot_be_a_base() || !parsed.path().is_empty(),
    }
}

/// An absent or empty backchannel logout URI is allowed.
pub fn is_backchannel_logout_uri_valid(uri: Option<&str>) -> bool {
    match uri {
        None => true,
        Some(uri) if uri.is_empty() => true,
        Some(uri) => is_redirection_uri_valid(uri),
    }
}

pub fn validate_backchannel_logout_uri(uri: Option<&str>) -> Result<Option<String>, DcrmError> {
    if is_backchannel_logout_uri_valid(uri) {
        Ok(uri.filter(|u| !u.is_empty()).map(str::to_string))
    } else {
        Err(DcrmError::InvalidBackchannelLogoutUri(
            uri.unwrap_or_default().to_string(),
        ))
    }
}

/// Whether any of the grant types needs a redirect URI.
pub fn is_redirect_uri_mandatory<S: AsRef<str>>(grant_types: &[S]) -> bool {
    grant_types.iter().any(|grant| {
        let grant = grant.as_ref();
        grant == GRANT_TYPE_AUTHORIZATION_CODE || grant == GRANT_TYPE_IMPLICIT
    })
}

/// Collapse redirect URIs into the value stored as the callback URL.
pub fn build_callback_url<S: AsRef<str>>(
    redirect_uris: &[String],
    grant_types: &[S],
) -> Result<String, DcrmError> {
    match redirect_uris {
        [] if is_redirect_uri_mandatory(grant_types) => Err(DcrmError::InvalidInput(
            "RedirectUris property must have at least one URI value when using \
             Authorization code or implicit grant types."
                .to_string(),
        )),
        [] => Ok(String::new()),
        [uri] if is_redirection_uri_valid(uri) => Ok(uri.clone()),
        [uri] => Err(DcrmError::InvalidRedirectUri(uri.clone())),
        uris => Ok(format!(
            "{}{}",
            CALLBACK_URL_REGEXP_PREFIX,
            create_regex_pattern(uris)?
        )),
    }
}

/// Build the `(a|b|...)` alternation for several redirect URIs.
pub fn create_regex_pattern(redirect_uris: &[String]) -> Result<String, DcrmError> {
    let mut escaped = Vec::with_capacity(redirect_uris.len());
    for uri in redirect_uris {
        if !is_redirection_uri_valid(uri) {
            return Err(DcrmError::InvalidRedirectUri(uri.clone()));
        }
        escaped.push(regex::escape(uri));
    }
    if escaped.is_empty() {
        return Ok(String::new());
    }
    Ok(format!("({})", escaped.join("|")))
}

/// Whether a redirect URI presented at authorization time is acceptable for
/// the stored callback URL.
pub fn callback_url_matches(callback_url: &str, redirect_uri: &str) -> bool {
    match callback_url.strip_prefix(CALLBACK_URL_REGEXP_PREFIX) {
        Some(pattern) => Regex::new(&format!("^(?:{})$", pattern))
            .map(|regex| regex.is_match(redirect_uri))
            .unwrap_or(false),
        None => !callback_url.is_empty() && callback_url == redirect_uri,
    }
}

/// Recover the registered redirect URIs from a stored callback URL.
pub fn redirect_uris_from_callback_url(callback_url: &str) -> Vec<String> {
    if callback_url.is_empty() {
        return Vec::new();
    }
    let Some(pattern) = callback_url.strip_prefix(CALLBACK_URL_REGEXP_PREFIX) else {
        return vec![callback_url.to_string()];
    };
    let inner = pattern
        .strip_prefix('(')
        .and_then(|p| p.strip_suffix(')'))
        .unwrap_or(pattern);

    let mut uris = Vec::new();
    let mut current = String::new();
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            '|' => uris.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    uris.push(current);
    uris.retain(|uri| !uri.is_empty());
    uris
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uris(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_redirection_uri_shapes() {
        assert!(is_redirection_uri_valid("https://op.test/cb"));
        assert!(is_redirection_uri_valid("http://localhost:8080/cb?x=1"));
        assert!(is_redirection_uri_valid("com.example.app:/oauth2redirect"));
        assert!(!is_redirection_uri_valid(""));
        assert!(!is_redirection_uri_valid("not a uri"));
        assert!(!is_redirection_uri_valid("/relative/path"));
        assert!(!is_redirection_uri_valid("https://op.test/cb#fragment"));
    }

    #[test]
    fn test_zero_redirect_uris_depend_on_grant_types() {
        let result = build_callback_url(&[], &["authorization_code"]);
        assert!(matches!(result, Err(DcrmError::InvalidInput(_))));

        let result = build_callback_url(&[], &["refresh_token", "implicit"]);
        assert!(matches!(result, Err(DcrmError::InvalidInput(_))));

        for grants in [
            vec!["client_credentials"],
            vec!["password", "refresh_token"],
            vec![],
        ] {
            assert_eq!(build_callback_url(&[], &grants).unwrap(), "");
        }
    }

    #[test]
    fn test_single_redirect_uri_is_verbatim() {
        let callback =
            build_callback_url(&uris(&["https://op.test/cb"]), &["authorization_code"]).unwrap();
        assert_eq!(callback, "https://op.test/cb");

        let result = build_callback_url(&uris(&["op.test/cb"]), &["authorization_code"]);
        assert!(matches!(result, Err(DcrmError::InvalidRedirectUri(uri)) if uri == "op.test/cb"));
    }

    #[test]
    fn test_multiple_redirect_uris_reject_invalid_member() {
        let result = build_callback_url(
            &uris(&["https://op.test/cb", "https://op.test/cb#frag"]),
            &["authorization_code"],
        );
        assert!(
            matches!(result, Err(DcrmError::InvalidRedirectUri(uri)) if uri == "https://op.test/cb#frag")
        );
    }

    #[test]
    fn test_callback_pattern_accepts_exactly_registered_uris() {
        let registered = uris(&[
            "https://a.test/cb?x=1",
            "https://b.test/return",
            "myapp://callback",
        ]);
        let callback = build_callback_url(&registered, &["authorization_code"]).unwrap();
        assert!(callback.starts_with(CALLBACK_URL_REGEXP_PREFIX));

        for uri in &registered {
            assert!(callback_url_matches(&callback, uri), "{uri} should match");
        }
        for uri in [
            "https://a.test/cbXx=1",
            "https://a.test/cb",
            "https://a.test/cb?x=12",
            "https://aXtest/cb?x=1",
            "https://b.test/return/extra",
            "prefix-https://b.test/return",
            "https://evil.test",
        ] {
            assert!(!callback_url_matches(&callback, uri), "{uri} should not match");
        }
    }

    #[test]
    fn test_single_callback_url_matching() {
        assert!(callback_url_matches("https://op.test/cb", "https://op.test/cb"));
        assert!(!callback_url_matches("https://op.test/cb", "https://op.test/cb2"));
        assert!(!callback_url_matches("", ""));
    }

    #[test]
    fn test_redirect_uris_round_trip_through_callback_url() {
        let registered = uris(&["https://a.test/cb?x=1&y=(2)", "https://b.test/a|b"]);
        let callback = build_callback_url(&registered, &["implicit"]).unwrap();
        assert_eq!(redirect_uris_from_callback_url(&callback), registered);

        assert_eq!(
            redirect_uris_from_callback_url("https://op.test/cb"),
            vec!["https://op.test/cb".to_string()]
        );
        assert!(redirect_uris_from_callback_url("").is_empty());
    }

    #[test]
    fn test_legacy_query_only_escaping_is_decoded() {
        let callback = "regexp=(https://a.test/cb\\?x=1|https://b.test/cb)";
        assert_eq!(
            redirect_uris_from_callback_url(callback),
            uris(&["https://a.test/cb?x=1", "https://b.test/cb"])
        );
    }

    #[test]
    fn test_backchannel_logout_uri() {
        assert_eq!(validate_backchannel_logout_uri(None).unwrap(), None);
        assert_eq!(validate_backchannel_logout_uri(Some("")).unwrap(), None);
        assert_eq!(
            validate_backchannel_logout_uri(Some("https://rp.test/logout")).unwrap(),
            Some("https://rp.test/logout".to_string())
        );
        assert!(matches!(
            validate_backchannel_logout_uri(Some("logout")),
            Err(DcrmError::InvalidBackchannelLogoutUri(_))
        ));
    }

    #[test]
    fn test_naming_rules() {
        let rules = NamingRules::new(DEFAULT_APPLICATION_NAME_REGEX, DEFAULT_CLIENT_ID_REGEX).unwrap();
        assert!(rules.validate_application_name("My App_1.0").is_ok());
        assert!(matches!(
            rules.validate_application_name("bad/name"),
            Err(DcrmError::InvalidApplicationName(pattern)) if pattern == DEFAULT_APPLICATION_NAME_REGEX
        ));

        assert!(rules.validate_client_id("client_id_123456789").is_ok());
        assert!(matches!(
            rules.validate_client_id("short"),
            Err(DcrmError::ClientIdViolatesPattern(_))
        ));

        assert!(NamingRules::new("(", DEFAULT_CLIENT_ID_REGEX).is_err());
    }
}
