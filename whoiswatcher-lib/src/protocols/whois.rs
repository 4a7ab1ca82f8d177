//! Lookups through the system `whois` command.
//!
//! WHOIS answers are free text. Lines of the form `Key: value` are picked up
//! by a regex and mapped onto the record; the first occurrence of each field
//! wins, so a thick registrar answer appended after a thin registry answer
//! still fills the contact roles.

use crate::error::WatchError;
use crate::protocols::LookupPort;
use crate::types::{ContactField, Outcome, Record, Role};
use async_trait::async_trait;
use regex::Regex;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const RATE_LIMIT_PATTERNS: [&str; 7] = [
    "rate limit exceeded",
    "too many requests",
    "try again later",
    "quota exceeded",
    "limit exceeded",
    "throttled",
    "rate-limited",
];

const NOT_FOUND_PATTERNS: [&str; 10] = [
    "no match for",
    "not found",
    "no data found",
    "no entries found",
    "domain not found",
    "status: free",
    "not registered",
    "no matching record",
    "the queried object does not exist",
    "this domain name has not been registered",
];

/// Turns WHOIS text into a [`Record`].
#[derive(Debug, Clone)]
pub struct WhoisParser {
    line: Regex,
}

impl WhoisParser {
    pub fn new() -> Result<Self, WatchError> {
        Ok(Self {
            line: Regex::new(r"^\s*([A-Za-z][A-Za-z0-9 /().-]*?)\s*:\s*(.+?)\s*$")?,
        })
    }

    /// Parse a WHOIS answer. Returns `None` when no known field was found.
    pub fn parse(&self, text: &str, domain: &str) -> Option<Record> {
        let mut record = Record::new(domain);
        let mut fields = 0;

        for line in text.lines() {
            let Some(caps) = self.line.captures(line) else {
                continue;
            };
            let key = caps[1].to_lowercase();
            let value = caps[2].trim();
            if apply_field(&mut record, &key, value) {
                fields += 1;
            }
        }

        (fields > 0).then_some(record)
    }
}

/// Store one `key: value` pair. Returns whether the key was recognized.
fn apply_field(record: &mut Record, key: &str, value: &str) -> bool {
    fn set_once(slot: &mut Option<String>, value: &str) {
        if slot.is_none() {
            *slot = Some(value.to_string());
        }
    }

    match key {
        "domain name" | "domain" => {
            record.domain.domain = value.to_lowercase();
            true
        }
        "domain status" | "status" => {
            // "clientTransferProhibited https://icann.org/epp#..." keeps the code only
            if let Some(code) = value.split_whitespace().next() {
                record.domain.status.push(code.to_string());
            }
            true
        }
        "name server" | "nserver" => {
            let ns = value.to_lowercase();
            if !record.domain.name_servers.contains(&ns) {
                record.domain.name_servers.push(ns);
            }
            true
        }
        "creation date" | "created" | "registered on" => {
            set_once(&mut record.domain.created_date, value);
            true
        }
        "updated date" | "last updated" | "changed" => {
            set_once(&mut record.domain.updated_date, value);
            true
        }
        "registry expiry date" | "registrar registration expiration date" | "expiry date"
        | "expires" => {
            set_once(&mut record.domain.expiration_date, value);
            true
        }
        "registrar" | "sponsoring registrar" => {
            let registrar = record.registrar.get_or_insert_with(Default::default);
            if registrar.name.is_empty() {
                registrar.name = value.to_string();
            }
            true
        }
        _ => match contact_key(key) {
            Some((role, field)) => {
                let slot = record.contact_mut(role).field_mut(field);
                if slot.is_empty() {
                    *slot = value.to_string();
                }
                true
            }
            None => false,
        },
    }
}

/// "Registrant Email", "Admin Phone", "Tech Organization", ...
fn contact_key(key: &str) -> Option<(Role, ContactField)> {
    let (role, field) = key.split_once(' ')?;
    let role = match role {
        "registrant" => Role::Registrant,
        "admin" | "administrative" => Role::Administrative,
        "tech" | "technical" => Role::Technical,
        "billing" => Role::Billing,
        _ => return None,
    };
    let field = match field {
        "name" => ContactField::Name,
        "organization" | "organisation" => ContactField::Organization,
        "email" => ContactField::Email,
        "phone" => ContactField::Phone,
        _ => return None,
    };
    Some((role, field))
}

fn contains_any(text: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| text.contains(p))
}

/// Classify a complete WHOIS answer.
pub fn classify(parser: &WhoisParser, text: &str, domain: &str) -> Outcome {
    let record = parser.parse(text, domain);
    if let Some(record) = record.as_ref().filter(|r| r.has_registrant()) {
        return Outcome::Resolved(record.clone());
    }

    let lower = text.to_lowercase();
    if contains_any(&lower, &RATE_LIMIT_PATTERNS) {
        return Outcome::RateLimited;
    }
    if contains_any(&lower, &NOT_FOUND_PATTERNS) {
        return Outcome::NotFound;
    }

    match record {
        Some(record) => Outcome::from_record(record),
        None => Outcome::ParseError(WatchError::whois(
            domain,
            "No recognizable fields in WHOIS response",
        )),
    }
}

/// WHOIS adapter.
#[derive(Debug, Clone)]
pub struct WhoisLookup {
    timeout: Duration,
    parser: WhoisParser,
}

impl WhoisLookup {
    pub fn new(timeout: Duration) -> Result<Self, WatchError> {
        Ok(Self {
            timeout,
            parser: WhoisParser::new()?,
        })
    }

    async fn query(&self, domain: &str) -> Result<String, WatchError> {
        let output = Command::new("whois")
            .arg(domain)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| WatchError::timeout("WHOIS query", self.timeout))?
            .map_err(|e| {
                WatchError::whois(
                    domain,
                    format!(
                        "Failed to execute whois command: {}. Make sure 'whois' is installed.",
                        e
                    ),
                )
            })?;

        // An empty failed answer is usually a dropped connection to the server.
        if output.stdout.is_empty() && !output.status.success() {
            return Err(WatchError::network_with_source(
                format!("whois for '{}' exited with {}", domain, output.status),
                String::from_utf8_lossy(&output.stderr).trim(),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl LookupPort for WhoisLookup {
    async fn lookup(&self, domain: &str, cancel: CancellationToken) -> Outcome {
        let text = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Outcome::TransportError(WatchError::whois(domain, "Lookup cancelled"));
            }
            result = self.query(domain) => result,
        };

        match text {
            Ok(text) => {
                let outcome = classify(&self.parser, &text, domain);
                debug!(domain = %domain, outcome = outcome.kind(), "whois answer classified");
                outcome
            }
            Err(e) => Outcome::TransportError(e),
        }
    }

    fn name(&self) -> &'static str {
        "whois"
    }
}
