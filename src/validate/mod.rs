//! Request-Body Validator (C9): JSON-schema validation of an
//! already-buffered request body, applied only when a route's metadata
//! carries a `SchemaValidator` entry.

use crate::error::GatewayError;
use jsonschema::JSONSchema;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaCompileError {
    #[error("invalid JSON in route schema: {0}")]
    InvalidSchemaJson(String),
    #[error("invalid JSON Schema document: {0}")]
    InvalidSchema(String),
}

/// A compiled schema, produced once at route-compile time (C12) and held
/// for the route snapshot's lifetime.
pub struct CompiledSchema {
    schema: JSONSchema,
}

impl CompiledSchema {
    /// Compiles the route's `Schema` metadata value (a JSON Schema
    /// document serialized as text) into a reusable validator.
    pub fn compile(schema_json: &str) -> Result<Self, SchemaCompileError> {
        let document: serde_json::Value = serde_json::from_str(schema_json)
            .map_err(|e| SchemaCompileError::InvalidSchemaJson(e.to_string()))?;
        let schema = JSONSchema::options()
            .compile(&document)
            .map_err(|e| SchemaCompileError::InvalidSchema(e.to_string()))?;
        Ok(Self { schema })
    }
}

/// Validates `body` (the already-buffered request body, spec.md §4.9)
/// against `compiled`. Empty/blank bodies and JSON parse failures are
/// `BAD_REQUEST`, same as a schema mismatch; validation errors are
/// joined into a single message.
pub fn validate_body(compiled: &CompiledSchema, body: &[u8]) -> Result<(), GatewayError> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(GatewayError::bad_request("request body must not be empty"));
    }

    let instance: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| GatewayError::bad_request(format!("invalid JSON body: {e}")))?;

    let result = compiled.schema.validate(&instance);
    if let Err(errors) = result {
        let joined = errors
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(GatewayError::bad_request(joined));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> CompiledSchema {
        CompiledSchema::compile(
            r#"{
                "type": "object",
                "required": ["name"],
                "properties": { "name": { "type": "string" } }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn empty_body_is_bad_request() {
        let err = validate_body(&schema(), b"   ").unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn malformed_json_is_bad_request() {
        let err = validate_body(&schema(), b"{not json").unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn schema_mismatch_joins_messages() {
        let err = validate_body(&schema(), b"{}").unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::BAD_REQUEST);
        assert!(!err.message.is_empty());
    }

    #[test]
    fn valid_body_passes() {
        assert!(validate_body(&schema(), br#"{"name": "alice"}"#).is_ok());
    }

    #[test]
    fn invalid_schema_document_fails_to_compile() {
        assert!(CompiledSchema::compile("not json").is_err());
        assert!(CompiledSchema::compile(r#"{"type": "not-a-real-type"}"#).is_err());
    }
}
