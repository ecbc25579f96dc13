//! Path matching and rewrite: Exact/Prefix/Regex in
//! declaration order, first match wins.

use regex::Regex;

use crate::types::{PathMatchMode, PathRule};

pub fn find_matching_path<'a>(paths: &'a [PathRule], request_path: &str) -> Option<&'a PathRule> {
    paths.iter().find(|rule| path_matches(rule, request_path))
}

fn path_matches(rule: &PathRule, request_path: &str) -> bool {
    match rule.mode {
        PathMatchMode::Exact => rule.path == request_path,
        PathMatchMode::Prefix => request_path.starts_with(&rule.path),
        PathMatchMode::Regex => Regex::new(&rule.path)
            .map(|re| re.is_match(request_path))
            .unwrap_or(false),
    }
}

/// Applies `pathRule.rewrite` by treating `pathRule.path` as a regex and
/// replacing the first match, mirroring
/// `currentPath.replace(new RegExp(pathRule.path), pathRule.rewrite)`.
pub fn rewrite_path(rule: &PathRule, request_path: &str) -> String {
    match &rule.rewrite {
        None => request_path.to_string(),
        Some(rewrite) => match Regex::new(&rule.path) {
            Ok(re) => re.replace(request_path, rewrite.as_str()).to_string(),
            Err(_) => request_path.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BackendConfig, BackendType};

    fn path_rule(path: &str, mode: PathMatchMode, rewrite: Option<&str>) -> PathRule {
        PathRule {
            path: path.to_string(),
            mode,
            backend: BackendConfig { backend_type: BackendType::Service, target: "svc".into() },
            rewrite: rewrite.map(str::to_string),
        }
    }

    #[test]
    fn declaration_order_wins_over_specificity() {
        let paths = vec![
            path_rule("/api", PathMatchMode::Prefix, None),
            path_rule("/api/v1", PathMatchMode::Exact, None),
        ];
        let matched = find_matching_path(&paths, "/api/v1").unwrap();
        assert_eq!(matched.path, "/api");
    }

    #[test]
    fn exact_mode_requires_full_match() {
        let paths = vec![path_rule("/health", PathMatchMode::Exact, None)];
        assert!(find_matching_path(&paths, "/health").is_some());
        assert!(find_matching_path(&paths, "/health/live").is_none());
    }

    #[test]
    fn regex_mode_matches_pattern() {
        let paths = vec![path_rule("^/v[0-9]+/items$", PathMatchMode::Regex, None)];
        assert!(find_matching_path(&paths, "/v2/items").is_some());
        assert!(find_matching_path(&paths, "/v2/items/1").is_none());
    }

    #[test]
    fn rewrite_applies_regex_replacement() {
        let rule = path_rule("^/old/(.*)$", PathMatchMode::Regex, Some("/new/$1"));
        assert_eq!(rewrite_path(&rule, "/old/thing"), "/new/thing");
    }

    #[test]
    fn no_rewrite_configured_returns_original_path() {
        let rule = path_rule("/api", PathMatchMode::Prefix, None);
        assert_eq!(rewrite_path(&rule, "/api/v1"), "/api/v1");
    }
}
