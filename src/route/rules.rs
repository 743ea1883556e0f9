//! Declarative routing rules as loaded from configuration

use serde::{Deserialize, Serialize};

/// How a rule matches a file name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchSpec {
    /// Name ends with the pattern (e.g. `.csv`)
    Suffix(String),
    /// Name starts with the pattern
    Prefix(String),
    /// Name equals the pattern
    Exact(String),
    /// Name matches a glob (e.g. `report_*.csv`)
    Glob(String),
}

impl std::fmt::Display for MatchSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Suffix(p) => write!(f, "suffix '{}'", p),
            Self::Prefix(p) => write!(f, "prefix '{}'", p),
            Self::Exact(p) => write!(f, "exact '{}'", p),
            Self::Glob(p) => write!(f, "glob '{}'", p),
        }
    }
}

/// One entry of the routing table
///
/// ```json
/// {"name": "csv", "match": {"suffix": ".csv"}, "prefix": "data/", "transform": "gzip"}
/// ```
///
/// Omitted `prefix` or `transform` fall back to the table defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    /// Label used in logs and reports
    #[serde(default)]
    pub name: Option<String>,
    /// Matching condition
    #[serde(rename = "match")]
    pub matcher: MatchSpec,
    /// Compare names ignoring ASCII case
    #[serde(default)]
    pub case_insensitive: bool,
    /// Destination key prefix
    #[serde(default)]
    pub prefix: Option<String>,
    /// Transform identifier
    #[serde(default)]
    pub transform: Option<String>,
    /// Skip matching files instead of uploading them
    #[serde(default)]
    pub skip: bool,
}

impl RuleSpec {
    /// Rule routing `matcher` to `prefix` with no transform override
    pub fn route(matcher: MatchSpec, prefix: impl Into<String>) -> Self {
        Self {
            name: None,
            matcher,
            case_insensitive: false,
            prefix: Some(prefix.into()),
            transform: None,
            skip: false,
        }
    }

    /// Set the transform applied to matching files
    pub fn with_transform(mut self, transform: impl Into<String>) -> Self {
        self.transform = Some(transform.into());
        self
    }

    /// Label for logs: the configured name or the matcher description
    pub fn label(&self, index: usize) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("rule {} ({})", index + 1, self.matcher),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_json_shape() {
        let rule: RuleSpec = serde_json::from_str(
            r#"{"match": {"glob": "report_*.csv"}, "case_insensitive": true, "transform": "gzip"}"#,
        )
        .unwrap();
        assert_eq!(rule.matcher, MatchSpec::Glob("report_*.csv".to_string()));
        assert!(rule.case_insensitive);
        assert_eq!(rule.prefix, None);
        assert_eq!(rule.transform.as_deref(), Some("gzip"));
        assert!(!rule.skip);
    }

    #[test]
    fn test_unknown_match_kind_rejected() {
        let res: Result<RuleSpec, _> = serde_json::from_str(r#"{"match": {"regex": ".*"}}"#);
        assert!(res.is_err());
    }

    #[test]
    fn test_label() {
        let rule = RuleSpec::route(MatchSpec::Suffix(".zip".into()), "archive/");
        assert_eq!(rule.label(0), "rule 1 (suffix '.zip')");
    }
}
