//! Rule matching for the HTTP listener.
//!
//! Rules are compiled per mode into a `RuleSet`. Lookup evaluates regex
//! selectors first, in declaration order, then falls back to an exact
//! comparison against literal selectors. The selector that matches decides
//! the outcome: if it has no response for the request method the request is
//! a miss, even when another selector would have covered that method.

use super::headers::to_header_map;
use super::types::{ResponseSpec, Rule};
use crate::config::ModeConfig;
use crate::error::ConfigError;
use bytes::Bytes;
use hyper::{HeaderMap, StatusCode};
use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Normalise a request target: ensure a leading slash and collapse runs of slashes.
pub fn normalize_uri(raw: &str) -> String {
    let mut normalized = String::with_capacity(raw.len() + 1);
    normalized.push('/');
    for c in raw.chars() {
        if c == '/' && normalized.ends_with('/') {
            continue;
        }
        normalized.push(c);
    }
    normalized
}

/// A response ready to be written: status, headers and body pre-encoded.
#[derive(Debug)]
pub struct CompiledResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub delay: Duration,
    pub echo_request_headers: bool,
}

impl CompiledResponse {
    fn compile(selector: &str, spec: &ResponseSpec) -> Result<Self, ConfigError> {
        let status =
            StatusCode::from_u16(spec.status).map_err(|_| ConfigError::InvalidStatus(spec.status))?;
        let body = spec
            .body
            .encode()
            .map_err(|source| ConfigError::BodyEncoding {
                selector: selector.to_string(),
                source,
            })?;
        Ok(Self {
            status,
            headers: to_header_map(&spec.headers)?,
            body,
            delay: spec.delay,
            echo_request_headers: spec.echo_request_headers,
        })
    }
}

/// One selector and its per-method responses.
#[derive(Debug, Default)]
struct Endpoint {
    methods: HashMap<String, Arc<CompiledResponse>>,
}

#[derive(Debug)]
struct RegexEndpoint {
    pattern: Regex,
    endpoint: Endpoint,
}

/// Result of a lookup.
#[derive(Debug, Clone)]
pub enum MatchOutcome {
    Matched(Arc<CompiledResponse>),
    /// A selector matched but has no response for this method
    MethodNotConfigured,
    NoSelector,
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchOutcome::Matched(_))
    }
}

/// Compiled rules of one mode.
#[derive(Debug)]
pub struct RuleSet {
    name: String,
    regex: Vec<RegexEndpoint>,
    literal: HashMap<String, Endpoint>,
}

impl RuleSet {
    pub fn compile(mode: &ModeConfig) -> Result<Self, ConfigError> {
        if mode.rules.is_empty() {
            return Err(ConfigError::EmptyMode(mode.name.clone()));
        }

        let mut regex: Vec<RegexEndpoint> = Vec::new();
        let mut literal: HashMap<String, Endpoint> = HashMap::new();

        for rule in &mode.rules {
            let method = rule.method.to_ascii_uppercase();
            let response = Arc::new(CompiledResponse::compile(&rule.selector, &rule.response)?);

            let endpoint = if rule.selector_is_regex {
                let position = regex
                    .iter()
                    .position(|r| r.pattern.as_str() == rule.selector);
                let index = match position {
                    Some(index) => index,
                    None => {
                        let pattern = Regex::new(&rule.selector).map_err(|source| {
                            ConfigError::InvalidPattern {
                                selector: rule.selector.clone(),
                                source,
                            }
                        })?;
                        regex.push(RegexEndpoint {
                            pattern,
                            endpoint: Endpoint::default(),
                        });
                        regex.len() - 1
                    }
                };
                &mut regex[index].endpoint
            } else {
                literal.entry(normalize_uri(&rule.selector)).or_default()
            };

            if endpoint.methods.insert(method.clone(), response).is_some() {
                return Err(duplicate(&mode.name, rule, method));
            }
        }

        Ok(Self {
            name: mode.name.clone(),
            regex,
            literal,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a normalised URI and method.
    pub fn lookup(&self, uri: &str, method: &str) -> MatchOutcome {
        let endpoint = self
            .regex
            .iter()
            .find(|r| r.pattern.is_match(uri))
            .map(|r| &r.endpoint)
            .or_else(|| self.literal.get(uri));

        let Some(endpoint) = endpoint else {
            return MatchOutcome::NoSelector;
        };

        match endpoint.methods.get(&method.to_ascii_uppercase()) {
            Some(response) => MatchOutcome::Matched(Arc::clone(response)),
            None => MatchOutcome::MethodNotConfigured,
        }
    }
}

fn duplicate(mode: &str, rule: &Rule, method: String) -> ConfigError {
    ConfigError::DuplicateRule {
        mode: mode.to_string(),
        selector: rule.selector.clone(),
        method,
    }
}

/// All modes of a listener plus the active one.
pub struct RuleMatcher {
    modes: HashMap<String, Arc<RuleSet>>,
    active: RwLock<Arc<RuleSet>>,
}

impl RuleMatcher {
    /// Compile every mode. `initial` defaults to the first declared mode.
    pub fn new(modes: &[ModeConfig], initial: Option<&str>) -> Result<Self, ConfigError> {
        let first = modes.first().ok_or(ConfigError::NoModes)?;

        let mut compiled = HashMap::with_capacity(modes.len());
        for mode in modes {
            let rule_set = Arc::new(RuleSet::compile(mode)?);
            if compiled.insert(mode.name.clone(), rule_set).is_some() {
                return Err(ConfigError::DuplicateMode(mode.name.clone()));
            }
        }

        let initial = initial.unwrap_or(&first.name);
        let active = compiled
            .get(initial)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownMode(initial.to_string()))?;

        Ok(Self {
            modes: compiled,
            active: RwLock::new(active),
        })
    }

    /// Swap the active mode. In-flight requests that already looked up a
    /// response keep it.
    pub fn set_mode(&self, name: &str) -> Result<(), ConfigError> {
        let rule_set = self
            .modes
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownMode(name.to_string()))?;
        *self.active.write() = rule_set;
        info!("HTTP mode switched to '{}'", name);
        Ok(())
    }

    pub fn active_mode(&self) -> String {
        self.active.read().name().to_string()
    }

    pub fn mode_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modes.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn lookup(&self, uri: &str, method: &str) -> MatchOutcome {
        let active: Arc<RuleSet> = self.active.read().clone();
        active.lookup(uri, method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ResponseBody;

    fn ok(body: &str) -> ResponseSpec {
        ResponseSpec::new(200).with_body(body)
    }

    fn body_of(outcome: MatchOutcome) -> Bytes {
        match outcome {
            MatchOutcome::Matched(response) => response.body.clone(),
            other => panic!("expected a match, got {other:?}"),
        }
    }

    #[test]
    fn test_normalize_uri() {
        assert_eq!(normalize_uri("test"), "/test");
        assert_eq!(normalize_uri("//test"), "/test");
        assert_eq!(normalize_uri("/a///b//c"), "/a/b/c");
        assert_eq!(normalize_uri("/a?x=1"), "/a?x=1");
        assert_eq!(normalize_uri(""), "/");
    }

    #[test]
    fn test_literal_selectors_are_normalised() {
        let mode = ModeConfig::new("default", vec![Rule::literal("test//path", "get", ok("hit"))]);
        let rules = RuleSet::compile(&mode).unwrap();
        assert_eq!(body_of(rules.lookup("/test/path", "GET")), "hit");
    }

    #[test]
    fn test_regex_precedes_literal() {
        let mode = ModeConfig::new(
            "default",
            vec![
                Rule::literal("/a", "GET", ok("literal")),
                Rule::regex("^/a.*", "GET", ok("regex")),
            ],
        );
        let rules = RuleSet::compile(&mode).unwrap();
        assert_eq!(body_of(rules.lookup("/a", "GET")), "regex");
        assert_eq!(body_of(rules.lookup("/abc", "GET")), "regex");
    }

    #[test]
    fn test_literal_fallback_when_no_regex_matches() {
        let mode = ModeConfig::new(
            "default",
            vec![
                Rule::regex("^/api/v[0-9]+/", "GET", ok("api")),
                Rule::literal("/health", "GET", ok("healthy")),
            ],
        );
        let rules = RuleSet::compile(&mode).unwrap();
        assert_eq!(body_of(rules.lookup("/health", "GET")), "healthy");
        assert_eq!(body_of(rules.lookup("/api/v2/users", "GET")), "api");
    }

    #[test]
    fn test_misses() {
        let mode = ModeConfig::new("default", vec![Rule::literal("/test", "GET", ok("x"))]);
        let rules = RuleSet::compile(&mode).unwrap();
        assert!(matches!(
            rules.lookup("/test", "POST"),
            MatchOutcome::MethodNotConfigured
        ));
        assert!(matches!(rules.lookup("/not", "GET"), MatchOutcome::NoSelector));
        assert!(!rules.lookup("/not", "GET").is_match());
    }

    #[test]
    fn test_same_selector_multiple_methods() {
        let mode = ModeConfig::new(
            "default",
            vec![
                Rule::literal("/item", "GET", ok("read")),
                Rule::literal("/item", "DELETE", ResponseSpec::new(204)),
            ],
        );
        let rules = RuleSet::compile(&mode).unwrap();
        assert_eq!(body_of(rules.lookup("/item", "get")), "read");
        match rules.lookup("/item", "DELETE") {
            MatchOutcome::Matched(response) => assert_eq!(response.status, StatusCode::NO_CONTENT),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_literal_rule_rejected() {
        let mode = ModeConfig::new(
            "default",
            vec![
                Rule::literal("/dup", "GET", ok("one")),
                Rule::literal("//dup", "GET", ok("two")),
            ],
        );
        assert!(matches!(
            RuleSet::compile(&mode),
            Err(ConfigError::DuplicateRule { .. })
        ));
    }

    #[test]
    fn test_overlapping_regex_rules_coexist() {
        let mode = ModeConfig::new(
            "default",
            vec![
                Rule::regex("^/users/[0-9]+$", "GET", ok("by-id")),
                Rule::regex("^/users/", "GET", ok("any-user")),
            ],
        );
        let rules = RuleSet::compile(&mode).unwrap();
        assert_eq!(body_of(rules.lookup("/users/12", "GET")), "by-id");
        assert_eq!(body_of(rules.lookup("/users/bob", "GET")), "any-user");
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let mode = ModeConfig::new("default", vec![Rule::regex("(", "GET", ok("x"))]);
        assert!(matches!(
            RuleSet::compile(&mode),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_invalid_status_rejected() {
        let mode = ModeConfig::new("default", vec![Rule::literal("/", "GET", ResponseSpec::new(42))]);
        assert!(matches!(
            RuleSet::compile(&mode),
            Err(ConfigError::InvalidStatus(42))
        ));
    }

    #[test]
    fn test_mode_switching() {
        let modes = vec![
            ModeConfig::new("up", vec![Rule::literal("/status", "GET", ok("up"))]),
            ModeConfig::new("down", vec![Rule::literal("/other", "GET", ok("down"))]),
        ];
        let matcher = RuleMatcher::new(&modes, None).unwrap();
        assert_eq!(matcher.active_mode(), "up");
        assert_eq!(body_of(matcher.lookup("/status", "GET")), "up");
        assert!(!matcher.lookup("/other", "GET").is_match());

        matcher.set_mode("down").unwrap();
        assert_eq!(matcher.active_mode(), "down");
        assert!(!matcher.lookup("/status", "GET").is_match());
        assert_eq!(body_of(matcher.lookup("/other", "GET")), "down");

        assert!(matches!(
            matcher.set_mode("missing"),
            Err(ConfigError::UnknownMode(_))
        ));
        assert_eq!(matcher.active_mode(), "down");
        assert_eq!(matcher.mode_names(), vec!["down", "up"]);
    }

    #[test]
    fn test_initial_mode_override() {
        let modes = vec![
            ModeConfig::new("a", vec![Rule::literal("/", "GET", ok("a"))]),
            ModeConfig::new("b", vec![Rule::literal("/", "GET", ok("b"))]),
        ];
        let matcher = RuleMatcher::new(&modes, Some("b")).unwrap();
        assert_eq!(body_of(matcher.lookup("/", "GET")), "b");
    }

    #[test]
    fn test_structured_body_is_pre_encoded() {
        let spec = ResponseSpec::new(201).with_body(ResponseBody::from(serde_json::json!({"ok": true})));
        let mode = ModeConfig::new("default", vec![Rule::literal("/json", "PUT", spec)]);
        let rules = RuleSet::compile(&mode).unwrap();
        assert_eq!(body_of(rules.lookup("/json", "PUT")), r#"{"ok":true}"#);
    }
}
