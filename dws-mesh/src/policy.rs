//! Access policy evaluation: selector match, priority ordering, and
//! condition matching (exact/contains/regex/exists).

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::identity::{Selector, ServiceIdentity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionMode {
    Exact,
    Contains,
    Regex,
    Exists,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "field", rename_all = "snake_case")]
pub enum Condition {
    Method { mode: ConditionMode, value: Option<String> },
    Path { mode: ConditionMode, value: Option<String> },
    Header { name: String, mode: ConditionMode, value: Option<String> },
}

impl Condition {
    fn evaluate(&self, field_value: Option<&str>, mode: ConditionMode, expected: Option<&str>) -> bool {
        match mode {
            ConditionMode::Exists => field_value.is_some(),
            ConditionMode::Exact => field_value == expected,
            ConditionMode::Contains => match (field_value, expected) {
                (Some(actual), Some(exp)) => actual.contains(exp),
                _ => false,
            },
            ConditionMode::Regex => match (field_value, expected) {
                (Some(actual), Some(exp)) => Regex::new(exp).map(|re| re.is_match(actual)).unwrap_or(false),
                _ => false,
            },
        }
    }

    fn matches(&self, request: &AccessRequest) -> bool {
        match self {
            Condition::Method { mode, value } => {
                self.evaluate(Some(request.method.as_str()), *mode, value.as_deref())
            }
            Condition::Path { mode, value } => {
                self.evaluate(Some(request.path.as_str()), *mode, value.as_deref())
            }
            Condition::Header { name, mode, value } => {
                let actual = request.headers.get(&name.to_lowercase()).map(|s| s.as_str());
                self.evaluate(actual, *mode, value.as_deref())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccessRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessPolicy {
    pub id: String,
    pub source: Selector,
    pub destination: Selector,
    pub priority: i32,
    pub effect: Effect,
    pub conditions: Vec<Condition>,
}

/// Evaluates `policies` against `(source, destination, request)`: gathers
/// every policy whose selectors match, sorts by priority descending,
/// and returns the effect of the first whose conditions all match.
/// Defaults to deny when nothing matches.
pub fn check_access(
    policies: &[AccessPolicy],
    source: &ServiceIdentity,
    destination: &ServiceIdentity,
    request: &AccessRequest,
) -> Effect {
    let mut candidates: Vec<&AccessPolicy> = policies
        .iter()
        .filter(|p| p.source.matches(source) && p.destination.matches(destination))
        .collect();
    candidates.sort_by(|a, b| b.priority.cmp(&a.priority));

    for policy in candidates {
        if policy.conditions.iter().all(|c| c.matches(request)) {
            return policy.effect;
        }
    }
    Effect::Deny
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(name: &str) -> ServiceIdentity {
        ServiceIdentity::new(name, "default")
    }

    fn request(method: &str, path: &str) -> AccessRequest {
        AccessRequest {
            method: method.to_string(),
            path: path.to_string(),
            headers: HashMap::new(),
        }
    }

    #[test]
    fn default_deny_when_no_policy_matches() {
        let effect = check_access(&[], &identity("a"), &identity("b"), &request("GET", "/x"));
        assert_eq!(effect, Effect::Deny);
    }

    #[test]
    fn highest_priority_policy_wins() {
        let policies = vec![
            AccessPolicy {
                id: "low".into(),
                source: Selector::default(),
                destination: Selector::default(),
                priority: 1,
                effect: Effect::Deny,
                conditions: vec![],
            },
            AccessPolicy {
                id: "high".into(),
                source: Selector::default(),
                destination: Selector::default(),
                priority: 10,
                effect: Effect::Allow,
                conditions: vec![],
            },
        ];
        let effect = check_access(&policies, &identity("a"), &identity("b"), &request("GET", "/x"));
        assert_eq!(effect, Effect::Allow);
    }

    #[test]
    fn unmatched_condition_falls_through_to_next_policy() {
        let policies = vec![
            AccessPolicy {
                id: "method-restricted".into(),
                source: Selector::default(),
                destination: Selector::default(),
                priority: 10,
                effect: Effect::Allow,
                conditions: vec![Condition::Method {
                    mode: ConditionMode::Exact,
                    value: Some("POST".to_string()),
                }],
            },
            AccessPolicy {
                id: "fallback".into(),
                source: Selector::default(),
                destination: Selector::default(),
                priority: 1,
                effect: Effect::Deny,
                conditions: vec![],
            },
        ];
        let effect = check_access(&policies, &identity("a"), &identity("b"), &request("GET", "/x"));
        assert_eq!(effect, Effect::Deny);
    }

    #[test]
    fn regex_condition_matches_path() {
        let policies = vec![AccessPolicy {
            id: "p".into(),
            source: Selector::default(),
            destination: Selector::default(),
            priority: 1,
            effect: Effect::Allow,
            conditions: vec![Condition::Path {
                mode: ConditionMode::Regex,
                value: Some("^/api/.*$".to_string()),
            }],
        }];
        let effect = check_access(&policies, &identity("a"), &identity("b"), &request("GET", "/api/v1"));
        assert_eq!(effect, Effect::Allow);
    }
}
