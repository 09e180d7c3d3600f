//! Route Table (C11): an immutable `RouteSnapshot` held behind an atomic
//! pointer. Readers take a single load and never hold it across a
//! suspension point (spec.md §5).

use super::compile::CompiledRoute;
use arc_swap::ArcSwap;
use std::sync::Arc;

/// An immutable, versioned set of compiled routes.
pub struct RouteSnapshot {
    pub generation: u64,
    pub routes: Vec<CompiledRoute>,
}

impl RouteSnapshot {
    pub fn empty() -> Self {
        Self {
            generation: 0,
            routes: Vec::new(),
        }
    }

    /// First route, in ascending `order`, whose predicates match
    /// `(method, path)`. Ties broken by definition order.
    pub fn find(&self, method: &http::Method, path: &str) -> Option<&CompiledRoute> {
        self.routes
            .iter()
            .filter(|r| r.path_matcher.matches(path))
            .filter(|r| r.methods.is_empty() || r.methods.contains(method))
            .min_by_key(|r| r.order)
    }
}

/// Lock-free readable, single-writer-swapped holder for the current
/// `RouteSnapshot`.
pub struct RouteTable {
    current: ArcSwap<RouteSnapshot>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self {
            current: ArcSwap::from_pointee(RouteSnapshot::empty()),
        }
    }
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Arc<RouteSnapshot> {
        self.current.load_full()
    }

    /// Installs `snapshot` as current. Old snapshots remain referenced
    /// (and thus readable) by any in-flight request holding an `Arc` to
    /// them (spec.md §3).
    pub fn install(&self, snapshot: RouteSnapshot) {
        self.current.store(Arc::new(snapshot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitSettings;
    use crate::registry::model::{PredicateSpec, RouteDefinition};
    use std::collections::HashMap;

    fn def(id: &str, pattern: &str, order: i32) -> RouteDefinition {
        let mut args = HashMap::new();
        args.insert("pattern".to_string(), pattern.to_string());
        RouteDefinition {
            id: id.to_string(),
            uri: "http://upstream".to_string(),
            predicates: vec![PredicateSpec {
                name: "Path".to_string(),
                args,
            }],
            filters: vec![],
            metadata: HashMap::new(),
            service: "svc".to_string(),
            context_path: None,
            api_docs: false,
            order,
        }
    }

    #[test]
    fn find_picks_lowest_order_among_matches() {
        let settings = RateLimitSettings::default();
        let routes = super::super::compile::compile_all(
            &[def("low", "/api/*", 5), def("high", "/api/*", 1)],
            &settings,
        );
        let snapshot = RouteSnapshot { generation: 1, routes };
        let found = snapshot.find(&http::Method::GET, "/api/users").unwrap();
        assert_eq!(found.id, "high");
    }

    #[test]
    fn old_snapshot_remains_readable_after_install() {
        let table = RouteTable::new();
        let settings = RateLimitSettings::default();
        let routes = super::super::compile::compile_all(&[def("r1", "/api/*", 0)], &settings);
        table.install(RouteSnapshot { generation: 1, routes });
        let held = table.current();

        let routes2 = super::super::compile::compile_all(&[def("r2", "/other/*", 0)], &settings);
        table.install(RouteSnapshot { generation: 2, routes: routes2 });

        assert_eq!(held.generation, 1);
        assert!(held.find(&http::Method::GET, "/api/x").is_some());
        assert_eq!(table.current().generation, 2);
    }

    #[test]
    fn empty_table_finds_nothing() {
        let table = RouteTable::new();
        assert!(table.current().find(&http::Method::GET, "/x").is_none());
    }
}
