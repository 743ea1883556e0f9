//! Rule evaluation
//!
//! The classifier is built once at startup and never mutated. Rules are
//! checked in order and the first match wins; entries matching nothing get
//! the default decision (accept, default prefix, default transform).

use crate::config::RoutingConfig;
use crate::error::{Result, TransferError};
use crate::network::{EntryKind, RemoteFileEntry};
use crate::route::{MatchSpec, RuleSpec};
use globset::{GlobBuilder, GlobMatcher};
use serde::Serialize;

/// Whether a file is transferred
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum RouteAction {
    /// Transfer the file
    Accept,
    /// Leave the file alone
    Skip {
        /// Why the file was skipped
        reason: String,
    },
}

/// The classifier's verdict for one entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingDecision {
    /// Accept or skip
    #[serde(flatten)]
    pub action: RouteAction,
    /// Destination key prefix
    pub prefix: String,
    /// Transform identifier (`none` for passthrough)
    pub transform: String,
    /// Label of the matching rule, `None` for the default decision
    pub rule: Option<String>,
}

impl RoutingDecision {
    /// Whether the file must not be transferred
    pub fn is_skip(&self) -> bool {
        matches!(self.action, RouteAction::Skip { .. })
    }

    /// Skip reason, if skipped
    pub fn skip_reason(&self) -> Option<&str> {
        match &self.action {
            RouteAction::Skip { reason } => Some(reason),
            RouteAction::Accept => None,
        }
    }

    /// Destination key for an object name under this decision's prefix
    pub fn destination_key(&self, object_name: &str) -> String {
        join_key(&self.prefix, object_name)
    }
}

/// Join a prefix and an object name with exactly one `/`
pub fn join_key(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

enum Matcher {
    Suffix(String),
    Prefix(String),
    Exact(String),
    Glob(GlobMatcher),
}

struct CompiledRule {
    label: String,
    matcher: Matcher,
    case_insensitive: bool,
    prefix: Option<String>,
    transform: Option<String>,
    skip: bool,
}

impl CompiledRule {
    fn compile(index: usize, spec: &RuleSpec) -> Result<Self> {
        let fold = |p: &str| {
            if spec.case_insensitive {
                p.to_ascii_lowercase()
            } else {
                p.to_string()
            }
        };

        let matcher = match &spec.matcher {
            MatchSpec::Suffix(p) => Matcher::Suffix(fold(p)),
            MatchSpec::Prefix(p) => Matcher::Prefix(fold(p)),
            MatchSpec::Exact(p) => Matcher::Exact(fold(p)),
            MatchSpec::Glob(p) => {
                let glob = GlobBuilder::new(p)
                    .case_insensitive(spec.case_insensitive)
                    .literal_separator(true)
                    .build()
                    .map_err(|e| {
                        TransferError::config(format!("Invalid glob in {}: {}", spec.label(index), e))
                    })?;
                Matcher::Glob(glob.compile_matcher())
            }
        };

        Ok(Self {
            label: spec.label(index),
            matcher,
            case_insensitive: spec.case_insensitive,
            prefix: spec.prefix.clone(),
            transform: spec.transform.clone(),
            skip: spec.skip,
        })
    }

    fn matches(&self, name: &str) -> bool {
        let folded;
        let name = if self.case_insensitive {
            folded = name.to_ascii_lowercase();
            folded.as_str()
        } else {
            name
        };

        match &self.matcher {
            Matcher::Suffix(p) => name.ends_with(p.as_str()),
            Matcher::Prefix(p) => name.starts_with(p.as_str()),
            Matcher::Exact(p) => name == p,
            Matcher::Glob(g) => g.is_match(name),
        }
    }
}

/// Ordered, first-match-wins file classifier
pub struct Classifier {
    rules: Vec<CompiledRule>,
    default_prefix: String,
    default_transform: String,
}

impl Classifier {
    /// Compile the rule table
    pub fn new(config: &RoutingConfig) -> Result<Self> {
        let rules = config
            .rules
            .iter()
            .enumerate()
            .map(|(i, spec)| CompiledRule::compile(i, spec))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            rules,
            default_prefix: config.default_prefix.clone(),
            default_transform: config.default_transform.clone(),
        })
    }

    /// Number of configured rules
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Every transform identifier the table can produce
    pub fn transform_ids(&self) -> impl Iterator<Item = &str> {
        self.rules
            .iter()
            .filter_map(|r| r.transform.as_deref())
            .chain(std::iter::once(self.default_transform.as_str()))
    }

    /// Classify one listing entry. Total and deterministic.
    pub fn classify(&self, entry: &RemoteFileEntry) -> RoutingDecision {
        if entry.kind != EntryKind::File {
            return self.skip(format!("not a regular file ({})", entry.kind), None);
        }
        if entry.name.is_empty() {
            return self.skip("empty file name".to_string(), None);
        }

        for rule in &self.rules {
            if !rule.matches(&entry.name) {
                continue;
            }
            if rule.skip {
                return self.skip(format!("matched {}", rule.label), Some(rule.label.clone()));
            }
            return RoutingDecision {
                action: RouteAction::Accept,
                prefix: rule.prefix.clone().unwrap_or_else(|| self.default_prefix.clone()),
                transform: rule
                    .transform
                    .clone()
                    .unwrap_or_else(|| self.default_transform.clone()),
                rule: Some(rule.label.clone()),
            };
        }

        RoutingDecision {
            action: RouteAction::Accept,
            prefix: self.default_prefix.clone(),
            transform: self.default_transform.clone(),
            rule: None,
        }
    }

    fn skip(&self, reason: String, rule: Option<String>) -> RoutingDecision {
        RoutingDecision {
            action: RouteAction::Skip { reason },
            prefix: self.default_prefix.clone(),
            transform: "none".to_string(),
            rule,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::path::PathBuf;

    fn entry(name: &str, size: u64) -> RemoteFileEntry {
        RemoteFileEntry::file(PathBuf::from("/outbound"), name, size)
    }

    fn scenario_classifier() -> Classifier {
        Classifier::new(&RoutingConfig {
            rules: vec![
                RuleSpec::route(MatchSpec::Suffix(".zip".into()), "archive/"),
                RuleSpec::route(MatchSpec::Suffix(".csv".into()), "data/"),
            ],
            default_prefix: "misc/".into(),
            default_transform: "none".into(),
        })
        .unwrap()
    }

    #[test]
    fn test_suffix_rule_builds_key() {
        let classifier = Classifier::new(&RoutingConfig {
            rules: vec![RuleSpec::route(MatchSpec::Suffix(".csv".into()), "csv/")],
            ..Default::default()
        })
        .unwrap();

        let decision = classifier.classify(&entry("report_2024.csv", 10));
        assert!(!decision.is_skip());
        assert_eq!(decision.destination_key("report_2024.csv"), "csv/report_2024.csv");
    }

    #[test]
    fn test_scenario_routes() {
        let classifier = scenario_classifier();
        let key = |name: &str| classifier.classify(&entry(name, 1)).destination_key(name);
        assert_eq!(key("a.txt"), "misc/a.txt");
        assert_eq!(key("b.zip"), "archive/b.zip");
        assert_eq!(key("c.csv"), "data/c.csv");
    }

    #[test]
    fn test_first_match_wins() {
        let classifier = Classifier::new(&RoutingConfig {
            rules: vec![
                RuleSpec::route(MatchSpec::Prefix("report_".into()), "reports/"),
                RuleSpec::route(MatchSpec::Suffix(".csv".into()), "csv/"),
            ],
            ..Default::default()
        })
        .unwrap();

        let decision = classifier.classify(&entry("report_q1.csv", 5));
        assert_eq!(decision.prefix, "reports/");
        assert_eq!(decision.rule.as_deref(), Some("rule 1 (prefix 'report_')"));
    }

    #[test]
    fn test_exact_and_skip_rules() {
        let mut skip = RuleSpec::route(MatchSpec::Exact("manifest.txt".into()), "");
        skip.skip = true;
        let classifier = Classifier::new(&RoutingConfig {
            rules: vec![skip],
            ..Default::default()
        })
        .unwrap();

        assert!(classifier.classify(&entry("manifest.txt", 3)).is_skip());
        assert!(!classifier.classify(&entry("manifest.txt.bak", 3)).is_skip());
    }

    #[test]
    fn test_case_insensitive_and_glob() {
        let mut rule = RuleSpec::route(MatchSpec::Glob("export_*.CSV".into()), "exports/")
            .with_transform("gzip");
        rule.case_insensitive = true;
        let classifier = Classifier::new(&RoutingConfig {
            rules: vec![rule],
            ..Default::default()
        })
        .unwrap();

        let decision = classifier.classify(&entry("EXPORT_2024.csv", 3));
        assert_eq!(decision.prefix, "exports/");
        assert_eq!(decision.transform, "gzip");
        assert!(classifier.classify(&entry("imports/export_1.csv", 3)).rule.is_none());
    }

    #[test]
    fn test_invalid_glob_is_config_error() {
        let res = Classifier::new(&RoutingConfig {
            rules: vec![RuleSpec::route(MatchSpec::Glob("[".into()), "x/")],
            ..Default::default()
        });
        assert!(res.is_err());
    }

    #[test]
    fn test_edge_entries_still_get_decisions() {
        let classifier = scenario_classifier();

        let empty = classifier.classify(&entry("empty.csv", 0));
        assert_eq!(empty.prefix, "data/");

        let bare = classifier.classify(&entry("README", 42));
        assert_eq!(bare.destination_key("README"), "misc/README");

        let mut dir = entry("incoming", 0);
        dir.kind = EntryKind::Directory;
        assert!(classifier.classify(&dir).is_skip());
    }

    #[test]
    fn test_join_key() {
        assert_eq!(join_key("", "a.txt"), "a.txt");
        assert_eq!(join_key("data", "a.txt"), "data/a.txt");
        assert_eq!(join_key("data//", "/a.txt"), "data/a.txt");
    }

    proptest! {
        #[test]
        fn prop_classify_total_and_deterministic(
            name in ".{0,40}",
            size in any::<u64>(),
            kind in prop_oneof![
                Just(EntryKind::File),
                Just(EntryKind::Directory),
                Just(EntryKind::Symlink),
                Just(EntryKind::Other),
            ],
        ) {
            let classifier = scenario_classifier();
            let mut e = entry(&name, size);
            e.kind = kind;
            let first = classifier.classify(&e);
            let second = classifier.classify(&e);
            prop_assert_eq!(first, second);
        }
    }
}
