//! Rule Matcher (C1): parses the `"svc:rt"` / `"!svc:rt"` rule strings
//! that `ClientAccessConfig.rules` carries and decides whether a given
//! `(service, route)` pair is allowed.

pub mod path;

use crate::registry::model::AccessRule;

/// Parses one rule string. `*` matches any segment. A leading `!`
/// marks the rule as a deny; without it, the rule allows.
pub fn parse_rule(raw: &str) -> Option<AccessRule> {
    let (deny, body) = match raw.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };
    let (service, route) = body.split_once(':')?;
    if service.is_empty() || route.is_empty() {
        return None;
    }
    Some(AccessRule {
        service: service.to_string(),
        route: route.to_string(),
        deny,
    })
}

fn service_matches(pattern: &str, actual: &str) -> bool {
    pattern == "*" || pattern == actual
}

fn route_matches(pattern: &str, actual: &str) -> bool {
    if pattern == "*" || pattern == actual {
        return true;
    }
    match pattern.strip_suffix('*') {
        Some(prefix) => actual.starts_with(prefix),
        None => false,
    }
}

/// Outcome of evaluating a client's rule set against a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

/// Evaluates `rules` in order against `(service, route)`. Deny rules
/// take precedence the instant they match; otherwise the request is
/// allowed only if some rule explicitly allows it. An empty rule set,
/// or a `(service, route)` of `("", "")` (the root path), denies.
pub fn decide(rules: &[AccessRule], service: &str, route: &str) -> Decision {
    if service.is_empty() || route.is_empty() {
        return Decision::Deny;
    }

    let mut allowed = false;
    for rule in rules {
        if service_matches(&rule.service, service) && route_matches(&rule.route, route) {
            if rule.deny {
                return Decision::Deny;
            }
            allowed = true;
        }
    }

    if allowed {
        Decision::Allow
    } else {
        Decision::Deny
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_allow_and_deny_rules() {
        assert_eq!(
            parse_rule("billing:invoices"),
            Some(AccessRule {
                service: "billing".to_string(),
                route: "invoices".to_string(),
                deny: false,
            })
        );
        assert_eq!(
            parse_rule("!billing:invoices"),
            Some(AccessRule {
                service: "billing".to_string(),
                route: "invoices".to_string(),
                deny: true,
            })
        );
        assert_eq!(parse_rule("malformed"), None);
    }

    #[test]
    fn wildcard_service_matches_anything() {
        let rules = vec![AccessRule {
            service: "*".to_string(),
            route: "health".to_string(),
            deny: false,
        }];
        assert_eq!(decide(&rules, "billing", "health"), Decision::Allow);
    }

    #[test]
    fn deny_rule_overrides_allow() {
        let rules = vec![
            AccessRule {
                service: "*".to_string(),
                route: "*".to_string(),
                deny: false,
            },
            AccessRule {
                service: "billing".to_string(),
                route: "invoices".to_string(),
                deny: true,
            },
        ];
        assert_eq!(decide(&rules, "billing", "invoices"), Decision::Deny);
        assert_eq!(decide(&rules, "billing", "accounts"), Decision::Allow);
    }

    #[test]
    fn trailing_wildcard_route_matches_prefix() {
        let rules = vec![AccessRule {
            service: "billing".to_string(),
            route: "invoices*".to_string(),
            deny: false,
        }];
        assert_eq!(decide(&rules, "billing", "invoices/42"), Decision::Allow);
        assert_eq!(decide(&rules, "billing", "accounts"), Decision::Deny);
    }

    #[test]
    fn root_path_always_denied() {
        let rules = vec![AccessRule {
            service: "*".to_string(),
            route: "*".to_string(),
            deny: false,
        }];
        assert_eq!(decide(&rules, "", ""), Decision::Deny);
    }

    #[test]
    fn empty_rule_set_denies() {
        assert_eq!(decide(&[], "billing", "invoices"), Decision::Deny);
    }
}
