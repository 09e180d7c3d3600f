//! Per-source-type key fetchers backing the Public-Key Cache (C3):
//! `JWKS`, `PEM_CERT`, `PEM_PUBKEY`, and `RAW`, each under NONE / BASIC /
//! CLIENT_CREDENTIALS auth.

use crate::registry::model::{
    KeyAuthType, KeyCredentials, KeyLocation, PublicKeyRecord, PublicKeySource, KeySourceType,
};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum KeyFetchError {
    #[error("fetching key material: {0}")]
    Request(String),
    #[error("decoding key material: {0}")]
    Decode(String),
    #[error("obtaining OAuth2 token: {0}")]
    Auth(String),
}

#[derive(Debug, Deserialize)]
struct Jwks {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kid: Option<String>,
    kty: Option<String>,
    n: Option<String>,
    e: Option<String>,
    crv: Option<String>,
    x: Option<String>,
    y: Option<String>,
    #[serde(default)]
    alg: Option<String>,
}

pub async fn fetch_keys(
    source: &PublicKeySource,
    client: &reqwest::Client,
) -> Result<Vec<PublicKeyRecord>, KeyFetchError> {
    let raw = load_material(source, client).await?;
    match source.source_type {
        KeySourceType::Jwks => parse_jwks(source, &raw),
        KeySourceType::PemCert => parse_pem_cert(source, &raw),
        KeySourceType::PemPubkey => parse_pem_pubkey(source, &raw),
        KeySourceType::Raw => parse_raw(source, &raw),
    }
}

async fn load_material(
    source: &PublicKeySource,
    client: &reqwest::Client,
) -> Result<String, KeyFetchError> {
    match &source.location {
        KeyLocation::Inline { inline } => Ok(inline.clone()),
        KeyLocation::Url { url } => {
            let mut request = client
                .get(url)
                .timeout(std::time::Duration::from_secs(30));
            request = apply_auth(request, source, client).await?;
            let response = request
                .send()
                .await
                .map_err(|e| KeyFetchError::Request(e.to_string()))?;
            response
                .text()
                .await
                .map_err(|e| KeyFetchError::Request(e.to_string()))
        }
    }
}

async fn apply_auth(
    request: reqwest::RequestBuilder,
    source: &PublicKeySource,
    client: &reqwest::Client,
) -> Result<reqwest::RequestBuilder, KeyFetchError> {
    match source.auth_type {
        KeyAuthType::None => Ok(request),
        KeyAuthType::Basic => {
            let creds = source
                .credentials
                .as_ref()
                .ok_or_else(|| KeyFetchError::Auth("missing basic auth credentials".to_string()))?;
            let username = creds.username.clone().unwrap_or_default();
            let password = creds.password.clone();
            Ok(request.basic_auth(username, password))
        }
        KeyAuthType::ClientCredentials => {
            let token = fetch_client_credentials_token(
                source.credentials.as_ref().ok_or_else(|| {
                    KeyFetchError::Auth("missing client_credentials config".to_string())
                })?,
                client,
            )
            .await?;
            Ok(request.bearer_auth(token))
        }
    }
}

async fn fetch_client_credentials_token(
    creds: &KeyCredentials,
    client: &reqwest::Client,
) -> Result<String, KeyFetchError> {
    #[derive(Deserialize)]
    struct TokenResponse {
        access_token: String,
    }

    let token_url = creds
        .token_url
        .as_ref()
        .ok_or_else(|| KeyFetchError::Auth("missing token_url".to_string()))?;
    let client_id = creds.client_id.clone().unwrap_or_default();
    let client_secret = creds.client_secret.clone().unwrap_or_default();

    // spec.md §4.3: CLIENT_CREDENTIALS auth is Basic-auth-carrying
    // credentials plus a form body, not credentials in the form body.
    let response = client
        .post(token_url)
        .timeout(std::time::Duration::from_secs(30))
        .basic_auth(&client_id, Some(&client_secret))
        .form(&[("grant_type", "client_credentials")])
        .send()
        .await
        .map_err(|e| KeyFetchError::Auth(e.to_string()))?;

    let parsed: TokenResponse = response
        .json()
        .await
        .map_err(|e| KeyFetchError::Auth(e.to_string()))?;
    Ok(parsed.access_token)
}

/// Parses a JWKS document into decoding keys, supporting RSA (`kty:
/// "RSA"`) and EC (`kty: "EC"`) entries per spec.md §4.3; any other
/// `kty`, or an RSA/EC entry missing its required components, is
/// skipped with a warning rather than failing the whole source.
fn parse_jwks(source: &PublicKeySource, raw: &str) -> Result<Vec<PublicKeyRecord>, KeyFetchError> {
    let jwks: Jwks = serde_json::from_str(raw).map_err(|e| KeyFetchError::Decode(e.to_string()))?;
    let now = Utc::now();
    Ok(jwks
        .keys
        .into_iter()
        .filter_map(|jwk| parse_jwk(source, &jwk, now))
        .collect())
}

fn parse_jwk(source: &PublicKeySource, jwk: &Jwk, now: chrono::DateTime<Utc>) -> Option<PublicKeyRecord> {
    let kid = jwk.kid.clone().or_else(|| Some(source.id.clone()))?;
    match jwk.kty.as_deref() {
        Some("RSA") | None => {
            let n = jwk.n.as_deref()?;
            let e = jwk.e.as_deref()?;
            let algorithm = match jwk.alg.as_deref() {
                Some("RS384") => Algorithm::RS384,
                Some("RS512") => Algorithm::RS512,
                _ => Algorithm::RS256,
            };
            let decoding_key = match DecodingKey::from_rsa_components(n, e) {
                Ok(k) => k,
                Err(err) => {
                    warn!(source_id = %source.id, kid, %err, "skipping RSA JWK: invalid components");
                    return None;
                }
            };
            Some(PublicKeyRecord {
                key_id: kid,
                algorithm,
                public_key: decoding_key,
                source_id: source.id.clone(),
                fetched_at: now,
            })
        }
        Some("EC") => {
            let x = jwk.x.as_deref()?;
            let y = jwk.y.as_deref()?;
            let algorithm = match jwk.crv.as_deref() {
                Some("P-384") => Algorithm::ES384,
                _ => Algorithm::ES256,
            };
            let decoding_key = match DecodingKey::from_ec_components(x, y) {
                Ok(k) => k,
                Err(err) => {
                    warn!(source_id = %source.id, kid, %err, "skipping EC JWK: invalid components");
                    return None;
                }
            };
            Some(PublicKeyRecord {
                key_id: kid,
                algorithm,
                public_key: decoding_key,
                source_id: source.id.clone(),
                fetched_at: now,
            })
        }
        Some(other) => {
            warn!(source_id = %source.id, kid, kty = other, "skipping JWK: unsupported key type");
            None
        }
    }
}

fn parse_pem_cert(source: &PublicKeySource, raw: &str) -> Result<Vec<PublicKeyRecord>, KeyFetchError> {
    let decoding_key =
        DecodingKey::from_rsa_pem(raw.as_bytes()).map_err(|e| KeyFetchError::Decode(e.to_string()))?;
    Ok(vec![PublicKeyRecord {
        key_id: source.id.clone(),
        algorithm: Algorithm::RS256,
        public_key: decoding_key,
        source_id: source.id.clone(),
        fetched_at: Utc::now(),
    }])
}

fn parse_pem_pubkey(source: &PublicKeySource, raw: &str) -> Result<Vec<PublicKeyRecord>, KeyFetchError> {
    let decoding_key =
        DecodingKey::from_rsa_pem(raw.as_bytes()).map_err(|e| KeyFetchError::Decode(e.to_string()))?;
    Ok(vec![PublicKeyRecord {
        key_id: source.id.clone(),
        algorithm: Algorithm::RS256,
        public_key: decoding_key,
        source_id: source.id.clone(),
        fetched_at: Utc::now(),
    }])
}

/// `RAW` sources carry a base64-encoded X.509 SubjectPublicKeyInfo
/// (spec.md §4.3), not a shared secret — decoded the same way a PEM
/// public key is, minus the PEM armor.
fn parse_raw(source: &PublicKeySource, raw: &str) -> Result<Vec<PublicKeyRecord>, KeyFetchError> {
    use base64::Engine;
    let der = base64::engine::general_purpose::STANDARD
        .decode(raw.trim())
        .map_err(|e| KeyFetchError::Decode(e.to_string()))?;
    let decoding_key =
        DecodingKey::from_rsa_der(&der);
    Ok(vec![PublicKeyRecord {
        key_id: source.id.clone(),
        algorithm: Algorithm::RS256,
        public_key: decoding_key,
        source_id: source.id.clone(),
        fetched_at: Utc::now(),
    }])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_string, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn client_credentials_token_fetch_sends_basic_auth_and_grant_type_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(header_exists("authorization"))
            .and(body_string("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "abc123"
            })))
            .mount(&server)
            .await;

        let creds = KeyCredentials {
            username: None,
            password: None,
            client_id: Some("client-id".to_string()),
            client_secret: Some("secret".to_string()),
            token_url: Some(format!("{}/token", server.uri())),
        };
        let client = reqwest::Client::new();
        let token = fetch_client_credentials_token(&creds, &client).await.unwrap();
        assert_eq!(token, "abc123");
    }

    fn raw_source(inline: &str) -> PublicKeySource {
        PublicKeySource {
            id: "raw-1".to_string(),
            location: KeyLocation::Inline {
                inline: inline.to_string(),
            },
            source_type: KeySourceType::Raw,
            auth_type: KeyAuthType::None,
            credentials: None,
            refresh_interval: Duration::from_secs(600),
        }
    }

    #[tokio::test]
    async fn raw_source_decodes_base64_der_as_rsa() {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"not-real-der-but-decodable");
        let source = raw_source(&encoded);
        let client = reqwest::Client::new();
        let keys = fetch_keys(&source, &client).await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].algorithm, Algorithm::RS256);
        assert_eq!(keys[0].source_id, "raw-1");
    }

    #[tokio::test]
    async fn raw_source_rejects_non_base64_material() {
        let source = raw_source("not base64 at all !!!");
        let client = reqwest::Client::new();
        assert!(fetch_keys(&source, &client).await.is_err());
    }

    #[test]
    fn jwks_parse_skips_incomplete_entries() {
        let source = PublicKeySource {
            id: "jwks-1".to_string(),
            location: KeyLocation::Inline {
                inline: String::new(),
            },
            source_type: KeySourceType::Jwks,
            auth_type: KeyAuthType::None,
            credentials: None,
            refresh_interval: Duration::from_secs(600),
        };
        let body = r#"{"keys":[{"kid":"missing-n","e":"AQAB"}]}"#;
        let keys = parse_jwks(&source, body).unwrap();
        assert!(keys.is_empty());
    }

    fn jwks_source() -> PublicKeySource {
        PublicKeySource {
            id: "jwks-1".to_string(),
            location: KeyLocation::Inline {
                inline: String::new(),
            },
            source_type: KeySourceType::Jwks,
            auth_type: KeyAuthType::None,
            credentials: None,
            refresh_interval: Duration::from_secs(600),
        }
    }

    #[test]
    fn jwks_parse_supports_ec_keys() {
        let source = jwks_source();
        let body = r#"{"keys":[{
            "kid":"ec-1",
            "kty":"EC",
            "crv":"P-256",
            "x":"f83OJ3D2xF1Bg8vub9tLe1gHMzV76e8Tus9uPHvRVEU",
            "y":"x_FEzRu9m36HLN_tue659LNpXW6pCyStikYjKIWI5a0"
        }]}"#;
        let keys = parse_jwks(&source, body).unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].key_id, "ec-1");
        assert_eq!(keys[0].algorithm, Algorithm::ES256);
    }

    #[test]
    fn jwks_parse_skips_unsupported_key_type_with_warning() {
        let source = jwks_source();
        let body = r#"{"keys":[{"kid":"oct-1","kty":"oct","k":"secret"}]}"#;
        let keys = parse_jwks(&source, body).unwrap();
        assert!(keys.is_empty());
    }
}
