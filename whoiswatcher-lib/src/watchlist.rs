//! Watchlist rules and their file formats.
//!
//! A watchlist is an ordered list of conditions. Each condition is either a
//! single clause tested against one contact field family, or a two-clause
//! combo where both clauses must hold.
//!
//! Watchlists are loaded from TOML, JSON or YAML:
//!
//! ```toml
//! [[rule]]
//! key = "email"
//! type = "contains"
//! value = "@evil-corp.example"
//!
//! [[rule]]
//! combo = [
//!     { key = "domain", type = "matches", value = "evil.com" },
//!     { key = "organization", type = "contains", value = "shell" },
//! ]
//! ```
//!
//! ```json
//! [{"key": "email", "type": "contains", "value": "alice@"}]
//! ```
//!
//! ```yaml
//! - key: email
//!   type: contains
//!   value: alice@
//! - combo:
//!     - {key: domain, type: matches, value: evil.com}
//!     - {key: organization, type: contains, value: shell}
//! ```

use crate::error::WatchError;
use crate::types::ContactField;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Which value family a clause is tested against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKey {
    Email,
    Name,
    Organization,
    Phone,
    /// The looked-up domain name (combo clauses only)
    Domain,
    /// The registrar name (combo clauses only)
    Registrar,
    /// Anything else; never matches
    #[serde(other)]
    Unknown,
}

impl FieldKey {
    /// The contact field family behind this key, if it is one.
    pub fn contact_field(&self) -> Option<ContactField> {
        match self {
            FieldKey::Email => Some(ContactField::Email),
            FieldKey::Name => Some(ContactField::Name),
            FieldKey::Organization => Some(ContactField::Organization),
            FieldKey::Phone => Some(ContactField::Phone),
            FieldKey::Domain | FieldKey::Registrar | FieldKey::Unknown => None,
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKey::Email => "email",
            FieldKey::Name => "name",
            FieldKey::Organization => "organization",
            FieldKey::Phone => "phone",
            FieldKey::Domain => "domain",
            FieldKey::Registrar => "registrar",
            FieldKey::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// How a clause value is compared. Both sides are lower-cased first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Case-insensitive substring test
    Contains,
    /// Case-insensitive equality
    Matches,
    #[serde(other)]
    Unknown,
}

impl MatchMode {
    /// Apply the predicate to one input.
    pub fn test(&self, input: &str, value: &str) -> bool {
        let input = input.to_lowercase();
        let value = value.to_lowercase();
        match self {
            MatchMode::Contains => input.contains(&value),
            MatchMode::Matches => input == value,
            MatchMode::Unknown => false,
        }
    }
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchMode::Contains => write!(f, "contains"),
            MatchMode::Matches => write!(f, "matches"),
            MatchMode::Unknown => write!(f, "unknown"),
        }
    }
}

/// One key/mode/value test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clause {
    pub key: FieldKey,
    #[serde(rename = "type")]
    pub mode: MatchMode,
    #[serde(default)]
    pub value: String,
}

impl Clause {
    pub fn new<V: Into<String>>(key: FieldKey, mode: MatchMode, value: V) -> Self {
        Self {
            key,
            mode,
            value: value.into(),
        }
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.key, self.mode, self.value)
    }
}

/// A condition exactly as written in a watchlist file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Condition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<FieldKey>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<MatchMode>,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub combo: Vec<Clause>,
}

/// A validated watchlist rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    Single(Clause),
    Combo(Clause, Clause),
}

impl Rule {
    fn from_condition(index: usize, condition: Condition) -> Result<Self, WatchError> {
        if !condition.combo.is_empty() {
            let mut clauses = condition.combo.into_iter();
            return match (clauses.next(), clauses.next(), clauses.next()) {
                (Some(first), Some(second), None) => Ok(Rule::Combo(first, second)),
                _ => Err(WatchError::config(format!(
                    "Watchlist rule {}: a combo must have exactly two clauses",
                    index + 1
                ))),
            };
        }

        let key = condition.key.ok_or_else(|| {
            WatchError::config(format!(
                "Watchlist rule {}: needs either 'key' or 'combo'",
                index + 1
            ))
        })?;
        let mode = condition.mode.ok_or_else(|| {
            WatchError::config(format!(
                "Watchlist rule {}: missing match 'type' (contains or matches)",
                index + 1
            ))
        })?;

        if key.contact_field().is_none() {
            warn!(rule = index + 1, key = %key, "single-clause rule key never matches");
        }

        Ok(Rule::Single(Clause::new(key, mode, condition.value)))
    }
}

#[derive(Debug, Deserialize)]
struct TomlWatchlist {
    #[serde(default)]
    rule: Vec<Condition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Toml,
    Yaml,
}

impl Format {
    /// Guess the format of a file without extension from its first token.
    fn sniff(content: &str) -> Self {
        let trimmed = content.trim_start();
        if trimmed.starts_with("[[") {
            // Array of tables; a JSON watchlist never nests arrays
            Format::Toml
        } else if trimmed.starts_with('[') {
            Format::Json
        } else if trimmed.starts_with('-') {
            Format::Yaml
        } else {
            Format::Toml
        }
    }
}

/// The ordered, read-only set of rules for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Watchlist {
    rules: Vec<Rule>,
}

impl Watchlist {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Validate raw conditions into rules, keeping their order.
    pub fn from_conditions(conditions: Vec<Condition>) -> Result<Self, WatchError> {
        let rules = conditions
            .into_iter()
            .enumerate()
            .map(|(index, condition)| Rule::from_condition(index, condition))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// Parse a JSON watchlist (a top-level array of conditions).
    pub fn from_json_str(content: &str) -> Result<Self, WatchError> {
        let conditions: Vec<Condition> = serde_json::from_str(content)
            .map_err(|e| WatchError::config(format!("Failed to parse JSON watchlist: {}", e)))?;
        Self::from_conditions(conditions)
    }

    /// Parse a TOML watchlist (`[[rule]]` tables).
    pub fn from_toml_str(content: &str) -> Result<Self, WatchError> {
        let parsed: TomlWatchlist = toml::from_str(content)
            .map_err(|e| WatchError::config(format!("Failed to parse TOML watchlist: {}", e)))?;
        Self::from_conditions(parsed.rule)
    }

    /// Parse a YAML watchlist (a top-level list of conditions).
    pub fn from_yaml_str(content: &str) -> Result<Self, WatchError> {
        let conditions: Vec<Condition> = serde_yaml::from_str(content)
            .map_err(|e| WatchError::config(format!("Failed to parse YAML watchlist: {}", e)))?;
        Self::from_conditions(conditions)
    }

    /// Load a watchlist file, choosing the format by extension.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, WatchError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            WatchError::file_error(
                path.to_string_lossy(),
                format!("Failed to read watchlist: {}", e),
            )
        })?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        let format = match extension.as_deref() {
            Some("json") => Format::Json,
            Some("toml") => Format::Toml,
            Some("yaml") | Some("yml") => Format::Yaml,
            Some(other) => {
                return Err(WatchError::config(format!(
                    "Unsupported watchlist format '.{}'. Use .toml, .json or .yaml",
                    other
                )))
            }
            None => Format::sniff(&content),
        };

        match format {
            Format::Json => Self::from_json_str(&content),
            Format::Toml => Self::from_toml_str(&content),
            Format::Yaml => Self::from_yaml_str(&content),
        }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
