//! Keyword-based severity tagging for reported issues.
//!
//! A report's severity is never entered by the reporter. It is derived from
//! the title and description every time either changes, by walking an ordered
//! list of [`SeverityTier`]s and returning the first tier that has a keyword
//! occurring anywhere in the text.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Urgency of a reported issue, ordered from least to most urgent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    #[default]
    #[serde(alias = "low")]
    Low,
    #[serde(alias = "medium")]
    Medium,
    #[serde(alias = "high")]
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(ConfigError::UnknownSeverity(s.to_string())),
        }
    }
}

/// One rung of the classification ladder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeverityTier {
    pub severity: Severity,
    pub keywords: Vec<String>,
}

impl SeverityTier {
    pub fn new<I, S>(severity: Severity, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            severity,
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().trim().to_lowercase())
                .collect(),
        }
    }

    fn matches(&self, text: &str) -> bool {
        self.keywords.iter().any(|k| text.contains(k.as_str()))
    }
}

/// Ordered severity configuration.
///
/// Tiers are checked in order and the first one with a matching keyword
/// wins, so a tier listed earlier takes precedence over every later tier.
/// Text that matches no tier gets `fallback`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeverityRules {
    #[serde(default)]
    pub fallback: Severity,
    #[serde(default)]
    pub tiers: Vec<SeverityTier>,
}

const HIGH_KEYWORDS: &[&str] = &[
    "urgent",
    "emergency",
    "severe",
    "leak",
    "critical",
    "garbage dump",
    "fire",
    "deadly",
    "hazardous",
    "life-threatening",
];

const MEDIUM_KEYWORDS: &[&str] = &[
    "problem",
    "issue",
    "broken",
    "defect",
    "faulty",
    "malfunction",
];

static DEFAULT_RULES: LazyLock<SeverityRules> = LazyLock::new(SeverityRules::default);

impl Default for SeverityRules {
    fn default() -> Self {
        Self {
            fallback: Severity::Low,
            tiers: vec![
                SeverityTier::new(Severity::High, HIGH_KEYWORDS),
                SeverityTier::new(Severity::Medium, MEDIUM_KEYWORDS),
            ],
        }
    }
}

impl SeverityRules {
    /// Parse rules from TOML, normalizing keywords to trimmed lowercase.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let raw: SeverityRules = toml::from_str(source)?;
        let rules = Self {
            fallback: raw.fallback,
            tiers: raw
                .tiers
                .into_iter()
                .map(|t| SeverityTier::new(t.severity, t.keywords))
                .collect(),
        };
        rules.validate()?;
        Ok(rules)
    }

    /// Load rules from a TOML file on disk.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let rules = Self::from_toml_str(&source)?;
        tracing::info!(
            "Loaded {} severity tiers from {}",
            rules.tiers.len(),
            path.display()
        );
        Ok(rules)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for tier in &self.tiers {
            if tier.keywords.iter().any(|k| k.is_empty()) {
                return Err(ConfigError::EmptyKeyword(tier.severity));
            }
        }
        Ok(())
    }

    pub fn classify(&self, title: &str, description: &str) -> Severity {
        let text = format!("{} {}", title, description).to_lowercase();
        self.tiers
            .iter()
            .find(|tier| tier.matches(&text))
            .map(|tier| tier.severity)
            .unwrap_or(self.fallback)
    }
}

/// Classify with the built-in keyword lists.
pub fn classify(title: &str, description: &str) -> Severity {
    DEFAULT_RULES.classify(title, description)
}
