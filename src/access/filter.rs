//! Client Access Control Filter (C6): resolves the caller's `clientId`
//! from validated JWT claims, rejects injection attempts before any
//! store lookup, and deny/allows the request against the merged
//! client-access configuration (C5) using C1/C2.

use crate::access::merger::ClientAccessStore;
use crate::error::GatewayError;
use crate::rules::{self, path, Decision};
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum AccessControlError {
    #[error("no clientId claim present")]
    MissingClientId,
    #[error("clientId failed injection validation")]
    InjectionAttempt,
    #[error("client is unknown or inactive")]
    ClientInactiveOrUnknown,
    #[error("access denied by rule evaluation")]
    Denied,
}

impl From<AccessControlError> for GatewayError {
    fn from(e: AccessControlError) -> Self {
        match e {
            AccessControlError::MissingClientId => GatewayError::unauthorized("missing clientId claim"),
            AccessControlError::InjectionAttempt => {
                GatewayError::forbidden("clientId failed validation")
            }
            AccessControlError::ClientInactiveOrUnknown => {
                GatewayError::forbidden("client is inactive or unknown")
            }
            AccessControlError::Denied => GatewayError::forbidden("access denied"),
        }
    }
}

fn injection_patterns() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)(\b(select|insert|update|delete|drop|union|exec|or\s+1\s*=\s*1)\b|--|;|<script|on\w+\s*=|javascript:|\.\./|%2e%2e|%00|%3c|%3e)",
        )
        .expect("static injection pattern regex is valid")
    })
}

/// Rejects `clientId` values carrying SQL-injection, XSS, path-traversal,
/// or their percent-encoded variants, before any lookup touches the
/// client-access store (spec.md §4.6, §8's `' OR 1=1 --` boundary case).
pub fn looks_like_injection(client_id: &str) -> bool {
    injection_patterns().is_match(client_id)
}

/// Scans `claim_names` in order, case-insensitively, for the first claim
/// present; if that claim's value is a JSON array, takes its first
/// non-blank string element.
pub fn extract_client_id(
    claims: &serde_json::Map<String, serde_json::Value>,
    claim_names: &[String],
) -> Option<String> {
    for name in claim_names {
        let found = claims
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v);
        if let Some(value) = found {
            match value {
                serde_json::Value::String(s) if !s.trim().is_empty() => return Some(s.clone()),
                serde_json::Value::Array(items) => {
                    if let Some(first) = items
                        .iter()
                        .filter_map(|v| v.as_str())
                        .find(|s| !s.trim().is_empty())
                    {
                        return Some(first.to_string());
                    }
                }
                _ => {}
            }
        }
    }
    None
}

/// Full C6 evaluation for one request: extract `clientId`, validate it,
/// resolve the merged access config, and evaluate the rule set against
/// `(service, route)` extracted from `request_path`. Returns the
/// resolved `clientId` on success for downstream logging/propagation.
pub fn check_client_access(
    claims: &serde_json::Map<String, serde_json::Value>,
    claim_names: &[String],
    request_path: &str,
    store: &ClientAccessStore,
) -> Result<String, GatewayError> {
    let client_id =
        extract_client_id(claims, claim_names).ok_or(AccessControlError::MissingClientId)?;

    if looks_like_injection(&client_id) {
        warn!(client_id, "rejected clientId: injection pattern match");
        return Err(AccessControlError::InjectionAttempt.into());
    }

    let record = store
        .get(&client_id)
        .ok_or(AccessControlError::ClientInactiveOrUnknown)?;
    if !record.active {
        return Err(AccessControlError::ClientInactiveOrUnknown.into());
    }

    let (service, route) = path::extract_service_and_route(request_path);
    match rules::decide(&record.rules, &service, &route) {
        Decision::Allow => Ok(client_id),
        Decision::Deny => Err(AccessControlError::Denied.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::model::{ClientAccessConfig, ClientAccessSource};

    fn claims_with(field: &str, value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        let mut m = serde_json::Map::new();
        m.insert(field.to_string(), value);
        m
    }

    #[test]
    fn sql_injection_client_id_is_rejected() {
        assert!(looks_like_injection("' OR 1=1 --"));
        assert!(!looks_like_injection("alice"));
    }

    #[test]
    fn xss_and_traversal_patterns_are_rejected() {
        assert!(looks_like_injection("<script>alert(1)</script>"));
        assert!(looks_like_injection("../../etc/passwd"));
        assert!(looks_like_injection("%2e%2e%2fadmin"));
    }

    #[test]
    fn extract_client_id_scans_claims_in_order_case_insensitively() {
        let claims = claims_with("Client-Id", serde_json::json!("alice"));
        let names = vec!["client_id".to_string(), "Client-Id".to_string()];
        assert_eq!(extract_client_id(&claims, &names), Some("alice".to_string()));
    }

    #[test]
    fn extract_client_id_takes_first_nonblank_array_element() {
        let claims = claims_with("client_id", serde_json::json!(["", "alice", "bob"]));
        let names = vec!["client_id".to_string()];
        assert_eq!(extract_client_id(&claims, &names), Some("alice".to_string()));
    }

    #[test]
    fn missing_client_id_is_unauthorized() {
        let claims = serde_json::Map::new();
        let store = ClientAccessStore::new();
        let err = check_client_access(&claims, &["client_id".to_string()], "/svc/rt", &store)
            .unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn inactive_client_is_forbidden() {
        let claims = claims_with("client_id", serde_json::json!("alice"));
        let store = ClientAccessStore::new();
        store.update(
            &[ClientAccessConfig {
                client_id: "alice".to_string(),
                tenant: "t1".to_string(),
                active: false,
                rules: vec!["svc:*".to_string()],
                source: ClientAccessSource::Persisted,
            }],
            &[],
        );
        let err = check_client_access(&claims, &["client_id".to_string()], "/svc/rt", &store)
            .unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::FORBIDDEN);
    }

    #[test]
    fn active_client_with_matching_allow_rule_succeeds() {
        let claims = claims_with("client_id", serde_json::json!("alice"));
        let store = ClientAccessStore::new();
        store.update(
            &[ClientAccessConfig {
                client_id: "alice".to_string(),
                tenant: "t1".to_string(),
                active: true,
                rules: vec!["user-service:*".to_string()],
                source: ClientAccessSource::Persisted,
            }],
            &[],
        );
        let resolved =
            check_client_access(&claims, &["client_id".to_string()], "/user-service/profile", &store)
                .unwrap();
        assert_eq!(resolved, "alice");
    }

    #[test]
    fn explicit_deny_rule_overrides_wildcard_allow() {
        let claims = claims_with("client_id", serde_json::json!("alice"));
        let store = ClientAccessStore::new();
        store.update(
            &[ClientAccessConfig {
                client_id: "alice".to_string(),
                tenant: "t1".to_string(),
                active: true,
                rules: vec!["!user-service:ban".to_string(), "user-service:*".to_string()],
                source: ClientAccessSource::Persisted,
            }],
            &[],
        );
        let err =
            check_client_access(&claims, &["client_id".to_string()], "/user-service/ban", &store)
                .unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::FORBIDDEN);
    }
}
