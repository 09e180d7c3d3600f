//! Route compilation (half of C12): turns one Registry `RouteDefinition`
//! into a `CompiledRoute` ready for dispatch. Grounded on the teacher's
//! `gateway::router::RoutePattern` regex-compilation approach, extended
//! with predicate/filter resolution against the fixed factory set
//! (spec.md §9's two-pass circular-reference fix: filter factories are a
//! static, pre-known index, so there is really only one pass needed here
//! — indexing and resolution happen against the same constant table).

use crate::config::RateLimitSettings;
use crate::ratelimit::resolvers::{self, KeyResolver};
use crate::registry::model::{metadata_keys, RouteDefinition};
use crate::rewrite::{resolve_filter, TransformRule, TransformTarget};
use crate::validate::CompiledSchema;
use regex::Regex;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum RouteCompileError {
    #[error("route '{0}' has no Path predicate")]
    MissingPathPredicate(String),
    #[error("route '{0}' has an invalid Path pattern: {1}")]
    InvalidPathPattern(String, String),
    #[error("route '{0}' references unknown filter '{1}'")]
    UnknownFilter(String, String),
    #[error("route '{0}' has an invalid schema: {1}")]
    InvalidSchema(String, String),
    #[error("route '{0}' references unknown key resolver '{1}'")]
    UnknownKeyResolver(String, String),
}

/// A matcher built from a route's `Path` predicate. `*` matches one path
/// segment, `**` matches any remaining suffix, everything else is literal.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    regex: Regex,
}

impl PathMatcher {
    pub fn compile(pattern: &str) -> Result<Self, regex::Error> {
        let mut out = String::from("^");
        let mut chars = pattern.chars().peekable();
        while let Some(ch) = chars.next() {
            match ch {
                '*' => {
                    if chars.peek() == Some(&'*') {
                        chars.next();
                        out.push_str(".*");
                    } else {
                        out.push_str("[^/]*");
                    }
                }
                '.' | '+' | '?' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '|' | '\\' => {
                    out.push('\\');
                    out.push(ch);
                }
                _ => out.push(ch),
            }
        }
        out.push('$');
        Ok(Self { regex: Regex::new(&out)? })
    }

    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }
}

/// One compiled, dispatch-ready route.
pub struct CompiledRoute {
    pub id: String,
    pub uri: String,
    pub path_matcher: PathMatcher,
    pub methods: Vec<http::Method>,
    pub service: String,
    pub context_path: Option<String>,
    pub order: i32,
    pub request_filters: Vec<TransformRule>,
    pub response_filters: Vec<TransformRule>,
    pub rate_limit: crate::registry::model::RateLimitConfig,
    /// Resolved once here (C8), not re-dispatched by name per request.
    pub key_resolver: KeyResolver,
    pub compiled_schema: Option<Arc<CompiledSchema>>,
    pub scopes: Vec<String>,
}

fn path_pattern(def: &RouteDefinition) -> Option<&str> {
    def.predicates
        .iter()
        .find(|p| p.name == "Path")
        .and_then(|p| p.args.get("pattern"))
        .map(String::as_str)
}

fn methods(def: &RouteDefinition) -> Vec<http::Method> {
    def.predicates
        .iter()
        .find(|p| p.name == "Method")
        .and_then(|p| p.args.get("methods"))
        .map(|raw| {
            raw.split(',')
                .filter_map(|m| m.trim().parse::<http::Method>().ok())
                .collect()
        })
        .unwrap_or_default()
}

fn scopes(def: &RouteDefinition) -> Vec<String> {
    def.metadata
        .get("scopes")
        .map(|raw| raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default()
}

/// Compiles one route definition. Per spec.md §3, a route missing a
/// `Path` predicate, an invalid `Path` pattern, an unresolvable filter
/// name, or an invalid schema document is dropped (not fatal to the
/// snapshot) — the caller logs and skips it.
pub fn compile_route(
    def: &RouteDefinition,
    rate_limit_settings: &RateLimitSettings,
) -> Result<CompiledRoute, RouteCompileError> {
    let pattern = path_pattern(def).ok_or_else(|| RouteCompileError::MissingPathPredicate(def.id.clone()))?;
    let path_matcher = PathMatcher::compile(pattern)
        .map_err(|e| RouteCompileError::InvalidPathPattern(def.id.clone(), e.to_string()))?;

    let mut request_filters = Vec::new();
    let mut response_filters = Vec::new();
    for filter in &def.filters {
        let (target, rule) = resolve_filter(&filter.name, &filter.args)
            .ok_or_else(|| RouteCompileError::UnknownFilter(def.id.clone(), filter.name.clone()))?;
        match target {
            TransformTarget::Request => request_filters.push(rule),
            TransformTarget::Response => response_filters.push(rule),
        }
    }

    let compiled_schema = match def.metadata.get(crate::registry::model::metadata_keys::SCHEMA_VALIDATOR) {
        Some(_) => match def.metadata.get(crate::registry::model::metadata_keys::SCHEMA) {
            Some(schema_json) => Some(Arc::new(
                CompiledSchema::compile(schema_json)
                    .map_err(|e| RouteCompileError::InvalidSchema(def.id.clone(), e.to_string()))?,
            )),
            None => None,
        },
        None => None,
    };

    let rate_limit = rate_limit_settings.config_for_route(&def.id);
    let header_name_arg = def.metadata.get(metadata_keys::RATE_LIMIT_HEADER_NAME).map(String::as_str);
    let key_resolver = resolvers::resolve_by_name(&rate_limit.key_resolver_name, header_name_arg)
        .ok_or_else(|| RouteCompileError::UnknownKeyResolver(def.id.clone(), rate_limit.key_resolver_name.clone()))?;

    Ok(CompiledRoute {
        id: def.id.clone(),
        uri: def.uri.clone(),
        path_matcher,
        methods: methods(def),
        service: def.service.clone(),
        context_path: def.context_path.clone(),
        order: def.order,
        request_filters,
        response_filters,
        rate_limit,
        key_resolver,
        compiled_schema,
        scopes: scopes(def),
    })
}

/// Compiles every route in `defs`, dropping (and logging) any that fail,
/// per spec.md §3's "not fatal to the snapshot".
pub fn compile_all(defs: &[RouteDefinition], rate_limit_settings: &RateLimitSettings) -> Vec<CompiledRoute> {
    defs.iter()
        .filter_map(|def| match compile_route(def, rate_limit_settings) {
            Ok(route) => Some(route),
            Err(e) => {
                warn!(route_id = %def.id, error = %e, "dropping route: compile failed");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::model::{FilterSpec, PredicateSpec};
    use std::collections::HashMap;

    fn route_with_path(pattern: &str) -> RouteDefinition {
        let mut predicate_args = HashMap::new();
        predicate_args.insert("pattern".to_string(), pattern.to_string());
        RouteDefinition {
            id: "r1".to_string(),
            uri: "http://upstream".to_string(),
            predicates: vec![PredicateSpec {
                name: "Path".to_string(),
                args: predicate_args,
            }],
            filters: vec![],
            metadata: HashMap::new(),
            service: "svc".to_string(),
            context_path: None,
            api_docs: false,
            order: 0,
        }
    }

    #[test]
    fn path_matcher_handles_single_and_double_wildcard() {
        let single = PathMatcher::compile("/api/*/detail").unwrap();
        assert!(single.matches("/api/users/detail"));
        assert!(!single.matches("/api/users/extra/detail"));

        let double = PathMatcher::compile("/api/**").unwrap();
        assert!(double.matches("/api/users/123"));
    }

    #[test]
    fn route_without_path_predicate_fails_to_compile() {
        let mut def = route_with_path("/api/*");
        def.predicates.clear();
        let settings = RateLimitSettings::default();
        assert!(compile_route(&def, &settings).is_err());
    }

    #[test]
    fn unknown_filter_name_fails_compilation() {
        let mut def = route_with_path("/api/*");
        def.filters.push(FilterSpec {
            name: "NotARealFilter".to_string(),
            args: HashMap::new(),
        });
        let settings = RateLimitSettings::default();
        assert!(compile_route(&def, &settings).is_err());
    }

    #[test]
    fn known_filter_resolves_to_request_side() {
        let mut def = route_with_path("/api/*");
        let mut args = HashMap::new();
        args.insert("name".to_string(), "x-trace".to_string());
        args.insert("value".to_string(), "1".to_string());
        def.filters.push(FilterSpec {
            name: "AddRequestHeader".to_string(),
            args,
        });
        let settings = RateLimitSettings::default();
        let compiled = compile_route(&def, &settings).unwrap();
        assert_eq!(compiled.request_filters.len(), 1);
        assert!(compiled.response_filters.is_empty());
    }

    #[test]
    fn header_resolver_requires_header_name_metadata() {
        let mut def = route_with_path("/api/*");
        let mut settings = RateLimitSettings::default();
        settings.defaults.key_resolver_name = "header".to_string();
        assert!(compile_route(&def, &settings).is_err());

        def.metadata.insert(
            crate::registry::model::metadata_keys::RATE_LIMIT_HEADER_NAME.to_string(),
            "X-Tenant".to_string(),
        );
        let compiled = compile_route(&def, &settings).unwrap();
        assert_eq!(compiled.key_resolver, crate::ratelimit::resolvers::KeyResolver::Header("X-Tenant".to_string()));
    }

    #[test]
    fn scopes_metadata_is_parsed_as_csv() {
        let mut def = route_with_path("/api/*");
        def.metadata.insert("scopes".to_string(), "user.read, user.write".to_string());
        let settings = RateLimitSettings::default();
        let compiled = compile_route(&def, &settings).unwrap();
        assert_eq!(compiled.scopes, vec!["user.read".to_string(), "user.write".to_string()]);
    }
}
