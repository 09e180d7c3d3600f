//! JWT Validator (C4): verifies the bearer token against the Public-Key
//! Cache (C3), enforces route scopes and configured header-claim rules,
//! and produces the headers propagated to the upstream request.

use crate::error::GatewayError;
use crate::keys::KeyCache;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// One entry of `tokenHeaderValidationConfig`: a regex a claim's value
/// must fully match, and whether the claim is required at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderClaimRule {
    pub regex: String,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtValidatorConfig {
    #[serde(default = "default_user_id_field")]
    pub user_id_field: String,
    #[serde(default)]
    pub token_header_validation: HashMap<String, HeaderClaimRule>,
}

fn default_user_id_field() -> String {
    "sub".to_string()
}

impl Default for JwtValidatorConfig {
    fn default() -> Self {
        Self {
            user_id_field: default_user_id_field(),
            token_header_validation: HashMap::new(),
        }
    }
}

/// The headers this filter propagates to the upstream request, plus the
/// resolved scopes used by later filters for logging/diagnostics.
#[derive(Debug, Clone, Default)]
pub struct ValidatedIdentity {
    pub headers: HashMap<String, String>,
    pub user_scopes: Vec<String>,
    pub claims: serde_json::Map<String, serde_json::Value>,
}

/// Validates `authorization_header` against `key_cache`, checking
/// `route_scopes` and `config`'s header-claim rules.
pub fn validate(
    authorization_header: Option<&str>,
    key_cache: &KeyCache,
    route_scopes: &[String],
    config: &JwtValidatorConfig,
) -> Result<ValidatedIdentity, GatewayError> {
    let token = extract_bearer_token(authorization_header)?;
    let header = jsonwebtoken::decode_header(token)
        .map_err(|_| GatewayError::unauthorized("invalid token"))?;
    let kid = header
        .kid
        .ok_or_else(|| GatewayError::unauthorized("invalid token"))?;

    let record = key_cache
        .get(&kid)
        .ok_or_else(|| GatewayError::unauthorized("invalid token"))?;

    let mut validation = jsonwebtoken::Validation::new(record.algorithm);
    validation.leeway = 0;
    validation.validate_exp = true;
    validation.validate_nbf = true;
    validation.required_spec_claims = HashSet::new();

    let decoded = jsonwebtoken::decode::<serde_json::Map<String, serde_json::Value>>(
        token,
        &record.public_key,
        &validation,
    )
    .map_err(|_| GatewayError::unauthorized("invalid token"))?;

    let claims = decoded.claims;
    let user_scopes = extract_scopes(&claims);

    if !route_scopes.is_empty() {
        let intersects = user_scopes.iter().any(|s| route_scopes.contains(s));
        if !intersects {
            return Err(GatewayError::route_not_found());
        }
    }

    let mut headers = HashMap::new();

    let user_id = claim_str(&claims, &config.user_id_field).unwrap_or_default();
    headers.insert("user-id".to_string(), user_id);
    headers.insert("scope".to_string(), user_scopes.join(","));

    let override_scope: HashSet<&str> = user_scopes
        .iter()
        .map(String::as_str)
        .chain(route_scopes.iter().map(String::as_str))
        .collect();
    let mut override_scope: Vec<&str> = override_scope.into_iter().collect();
    override_scope.sort_unstable();
    headers.insert("override-scope".to_string(), override_scope.join(","));

    for (header_name, rule) in &config.token_header_validation {
        let value = find_claim_case_insensitive(&claims, header_name);
        match value {
            None | Some("") => {
                if rule.required {
                    return Err(GatewayError::unauthorized(format!("missing required claim for header {}", header_name)));
                }
            }
            Some(v) => {
                let re = Regex::new(&anchor(&rule.regex)).map_err(|_| {
                    GatewayError::internal(format!("invalid header claim regex for {}", header_name))
                })?;
                if !re.is_match(v) {
                    return Err(GatewayError::unauthorized(format!("claim for header {} failed validation", header_name)));
                }
                if rule.required {
                    headers.insert(header_name.clone(), v.to_string());
                }
            }
        }
    }

    Ok(ValidatedIdentity {
        headers,
        user_scopes,
        claims,
    })
}

fn anchor(pattern: &str) -> String {
    if pattern.starts_with('^') && pattern.ends_with('$') {
        pattern.to_string()
    } else {
        format!("^(?:{})$", pattern)
    }
}

fn extract_bearer_token(header: Option<&str>) -> Result<&str, GatewayError> {
    let header = header.ok_or_else(|| {
        GatewayError::unauthorized("invalid token")
    })?;
    let token = header.strip_prefix("Bearer ").ok_or_else(|| {
        GatewayError::unauthorized("invalid token")
    })?;
    if token.is_empty() {
        return Err(GatewayError::unauthorized("invalid token"));
    }
    Ok(token)
}

fn claim_str(claims: &serde_json::Map<String, serde_json::Value>, field: &str) -> Option<String> {
    claims.get(field).and_then(|v| v.as_str()).map(str::to_string)
}

fn find_claim_case_insensitive<'a>(
    claims: &'a serde_json::Map<String, serde_json::Value>,
    name: &str,
) -> Option<&'a str> {
    claims
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .and_then(|(_, v)| v.as_str())
}

fn extract_scopes(claims: &serde_json::Map<String, serde_json::Value>) -> Vec<String> {
    match claims.get("scope") {
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(serde_json::Value::String(s)) => {
            let separator = if s.contains(',') { ',' } else { ' ' };
            s.split(separator)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_bearer_prefix_rejected() {
        assert!(extract_bearer_token(Some("Basic abc")).is_err());
        assert!(extract_bearer_token(Some("Bearer ")).is_err());
        assert!(extract_bearer_token(None).is_err());
        assert!(extract_bearer_token(Some("Bearer abc")).is_ok());
    }

    #[test]
    fn extract_scopes_handles_all_shapes() {
        let mut comma = serde_json::Map::new();
        comma.insert("scope".to_string(), serde_json::json!("read,write"));
        assert_eq!(extract_scopes(&comma), vec!["read", "write"]);

        let mut space = serde_json::Map::new();
        space.insert("scope".to_string(), serde_json::json!("read write"));
        assert_eq!(extract_scopes(&space), vec!["read", "write"]);

        let mut array = serde_json::Map::new();
        array.insert("scope".to_string(), serde_json::json!(["read", "write"]));
        assert_eq!(extract_scopes(&array), vec!["read", "write"]);
    }

    #[test]
    fn find_claim_case_insensitive_matches_any_case() {
        let mut claims = serde_json::Map::new();
        claims.insert("X-Tenant-Id".to_string(), serde_json::json!("acme"));
        assert_eq!(find_claim_case_insensitive(&claims, "x-tenant-id"), Some("acme"));
    }
}
