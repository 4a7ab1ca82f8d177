//! Rule evaluation.
//!
//! [`evaluate`] is a pure function of a normalized record, the looked-up
//! domain name and the watchlist. It never fails: unknown keys and match modes
//! simply contribute nothing.
//!
//! After a rule fires, a [`TerminationPolicy`] decides whether later rules
//! still get a look at the record. Under the default policy email, name and
//! organization hits stop evaluation while phone, domain and registrar hits
//! let it continue.

use crate::error::WatchError;
use crate::types::NormalizedRecord;
use crate::watchlist::{Clause, FieldKey, Rule, Watchlist};
use std::str::FromStr;

/// What the engine does after a rule fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Stop evaluating further rules for this record
    Halt,
    /// Move on to the next rule
    Continue,
}

/// Per-key termination table consulted after every match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TerminationPolicy {
    /// email/name/organization halt, phone/domain/registrar continue
    #[default]
    Asymmetric,
    /// The first match always halts
    FirstMatch,
    /// Every rule is evaluated
    AllMatches,
}

impl TerminationPolicy {
    /// Flow after a match whose deciding clause used `key`. For combos this
    /// is the key of the second clause.
    pub fn after_match(&self, key: FieldKey) -> Flow {
        match self {
            TerminationPolicy::FirstMatch => Flow::Halt,
            TerminationPolicy::AllMatches => Flow::Continue,
            TerminationPolicy::Asymmetric => match key {
                FieldKey::Email | FieldKey::Name | FieldKey::Organization => Flow::Halt,
                FieldKey::Phone | FieldKey::Domain | FieldKey::Registrar | FieldKey::Unknown => {
                    Flow::Continue
                }
            },
        }
    }
}

impl FromStr for TerminationPolicy {
    type Err = WatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "asymmetric" => Ok(TerminationPolicy::Asymmetric),
            "first-match" | "first_match" => Ok(TerminationPolicy::FirstMatch),
            "all-matches" | "all_matches" => Ok(TerminationPolicy::AllMatches),
            other => Err(WatchError::config(format!(
                "Unknown termination policy '{}'. Use asymmetric, first-match or all-matches",
                other
            ))),
        }
    }
}

/// One fired rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    /// Position of the rule in the watchlist
    pub rule_index: usize,
    /// Human-readable explanation of the hit
    pub description: String,
}

/// The value sets one record offers to clauses.
struct Inputs<'a> {
    domain: &'a str,
    record: &'a NormalizedRecord,
}

impl<'a> Inputs<'a> {
    fn values(&self, key: FieldKey) -> Vec<&'a str> {
        match key {
            FieldKey::Domain => vec![self.domain],
            FieldKey::Registrar => vec![self.record.registrar_name()],
            FieldKey::Unknown => Vec::new(),
            other => match other.contact_field() {
                Some(field) => self.record.field_values(field).to_vec(),
                None => Vec::new(),
            },
        }
    }

    fn check(&self, clause: &Clause) -> bool {
        self.values(clause.key)
            .iter()
            .any(|input| clause.mode.test(input, &clause.value))
    }
}

/// Evaluate a record against every rule in watchlist order.
pub fn evaluate(
    watchlist: &Watchlist,
    domain: &str,
    record: &NormalizedRecord,
    policy: TerminationPolicy,
) -> Vec<RuleMatch> {
    let inputs = Inputs { domain, record };
    let mut matches = Vec::new();

    for (rule_index, rule) in watchlist.rules().iter().enumerate() {
        let (deciding_key, description) = match rule {
            Rule::Combo(first, second) => {
                // No fallthrough: a failed first clause ends this rule.
                if !inputs.check(first) || !inputs.check(second) {
                    continue;
                }
                (
                    second.key,
                    format!("Combo Match: [{}] AND [{}]", first, second),
                )
            }
            Rule::Single(clause) => {
                if clause.key.contact_field().is_none() || !inputs.check(clause) {
                    continue;
                }
                (
                    clause.key,
                    format!(
                        "Match on any {}: [{}] - {} - {}",
                        clause.key,
                        inputs.values(clause.key).join(", "),
                        clause.mode,
                        clause.value
                    ),
                )
            }
        };

        matches.push(RuleMatch {
            rule_index,
            description,
        });

        if policy.after_match(deciding_key) == Flow::Halt {
            break;
        }
    }

    matches
}
