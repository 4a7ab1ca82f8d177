//! Core data types for watchlist runs.
//!
//! This module defines the lookup record (wire and normalized forms), the
//! explicit lookup outcome, the events a run emits, and the run configuration.

use crate::error::WatchError;
use crate::retry::RetryPolicy;
use crate::rules::TerminationPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Contact details for one role on a registration record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactSet {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
}

impl ContactSet {
    /// True when every field is blank.
    pub fn is_empty(&self) -> bool {
        self.name.trim().is_empty()
            && self.organization.trim().is_empty()
            && self.email.trim().is_empty()
            && self.phone.trim().is_empty()
    }

    /// Get the value of a single field.
    pub fn field(&self, field: ContactField) -> &str {
        match field {
            ContactField::Name => &self.name,
            ContactField::Organization => &self.organization,
            ContactField::Email => &self.email,
            ContactField::Phone => &self.phone,
        }
    }

    pub(crate) fn field_mut(&mut self, field: ContactField) -> &mut String {
        match field {
            ContactField::Name => &mut self.name,
            ContactField::Organization => &mut self.organization,
            ContactField::Email => &mut self.email,
            ContactField::Phone => &mut self.phone,
        }
    }
}

/// The field families a contact carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContactField {
    Name,
    Organization,
    Email,
    Phone,
}

impl ContactField {
    pub const ALL: [ContactField; 4] = [
        ContactField::Email,
        ContactField::Phone,
        ContactField::Organization,
        ContactField::Name,
    ];

    /// Title-case label used in projection output.
    pub fn label(&self) -> &'static str {
        match self {
            ContactField::Name => "Name",
            ContactField::Organization => "Organization",
            ContactField::Email => "Email",
            ContactField::Phone => "Phone",
        }
    }
}

impl fmt::Display for ContactField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContactField::Name => write!(f, "name"),
            ContactField::Organization => write!(f, "organization"),
            ContactField::Email => write!(f, "email"),
            ContactField::Phone => write!(f, "phone"),
        }
    }
}

impl FromStr for ContactField {
    type Err = WatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "name" => Ok(ContactField::Name),
            "organization" | "organisation" | "org" => Ok(ContactField::Organization),
            "email" => Ok(ContactField::Email),
            "phone" => Ok(ContactField::Phone),
            other => Err(WatchError::config(format!(
                "Unknown output field '{}'. Use email, phone, organization or name",
                other
            ))),
        }
    }
}

/// Contact roles, in the fixed order the rule engine inspects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Registrant,
    Technical,
    Administrative,
    Billing,
}

impl Role {
    pub const ALL: [Role; 4] = [
        Role::Registrant,
        Role::Technical,
        Role::Administrative,
        Role::Billing,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Role::Registrant => "Registrant",
            Role::Technical => "Technical",
            Role::Administrative => "Administrative",
            Role::Billing => "Billing",
        }
    }
}

/// Domain-level details of a registration record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainDetails {
    /// The domain name as reported by the registry
    #[serde(default)]
    pub domain: String,

    /// Registry status codes (e.g. "clientTransferProhibited")
    #[serde(default)]
    pub status: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub name_servers: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<String>,
}

/// A registration record as produced by a lookup adapter or read from a
/// replay file. Contact slots may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default)]
    pub domain: DomainDetails,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registrar: Option<ContactSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registrant: Option<ContactSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub administrative: Option<ContactSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technical: Option<ContactSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing: Option<ContactSet>,
}

impl Record {
    /// Create an empty record for a domain.
    pub fn new<D: Into<String>>(domain: D) -> Self {
        Self {
            domain: DomainDetails {
                domain: domain.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Whether the record carries any registrant data.
    pub fn has_registrant(&self) -> bool {
        self.registrant.as_ref().is_some_and(|c| !c.is_empty())
    }

    /// Domains in redemption never return contact data.
    pub fn in_redemption_period(&self) -> bool {
        self.domain
            .status
            .first()
            .is_some_and(|s| s.eq_ignore_ascii_case("redemptionperiod"))
    }

    /// Mutable access to a role slot, creating it when absent.
    pub fn contact_mut(&mut self, role: Role) -> &mut ContactSet {
        let slot = match role {
            Role::Registrant => &mut self.registrant,
            Role::Technical => &mut self.technical,
            Role::Administrative => &mut self.administrative,
            Role::Billing => &mut self.billing,
        };
        slot.get_or_insert_with(ContactSet::default)
    }

    /// Replace absent contact slots with empty ones.
    pub fn normalize(self) -> NormalizedRecord {
        NormalizedRecord {
            domain: self.domain,
            registrar: self.registrar.unwrap_or_default(),
            registrant: self.registrant.unwrap_or_default(),
            administrative: self.administrative.unwrap_or_default(),
            technical: self.technical.unwrap_or_default(),
            billing: self.billing.unwrap_or_default(),
        }
    }
}

/// A record with all four contact roles present. This is the only form the
/// rule engine accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub domain: DomainDetails,
    pub registrar: ContactSet,
    pub registrant: ContactSet,
    pub administrative: ContactSet,
    pub technical: ContactSet,
    pub billing: ContactSet,
}

impl NormalizedRecord {
    pub fn registrar_name(&self) -> &str {
        &self.registrar.name
    }

    pub fn contact(&self, role: Role) -> &ContactSet {
        match role {
            Role::Registrant => &self.registrant,
            Role::Technical => &self.technical,
            Role::Administrative => &self.administrative,
            Role::Billing => &self.billing,
        }
    }

    /// The values of one field family across all roles, ordered registrant,
    /// technical, administrative, billing.
    pub fn field_values(&self, field: ContactField) -> [&str; 4] {
        Role::ALL.map(|role| self.contact(role).field(field))
    }
}

/// Result of one call through the lookup port.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The registry returned a usable record
    Resolved(Record),
    /// The upstream service throttled the query (explicitly or by omitting
    /// registrant data)
    RateLimited,
    /// The registry has no record for the domain
    NotFound,
    /// Network or protocol failure
    TransportError(WatchError),
    /// The response could not be parsed into a record
    ParseError(WatchError),
}

impl Outcome {
    /// Classify a parsed record. A record with no registrant data is how
    /// throttling usually shows up, so it becomes `RateLimited`.
    pub fn from_record(record: Record) -> Self {
        if record.has_registrant() || record.in_redemption_period() {
            Outcome::Resolved(record)
        } else {
            Outcome::RateLimited
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::Resolved(_) => "resolved",
            Outcome::RateLimited => "rate_limited",
            Outcome::NotFound => "not_found",
            Outcome::TransportError(_) => "transport_error",
            Outcome::ParseError(_) => "parse_error",
        }
    }
}

/// Everything a run reports, in the order it happens.
#[derive(Debug, Clone)]
pub enum Event {
    /// A record was resolved and passed to the rule engine
    Resolved {
        domain: String,
        record: NormalizedRecord,
    },
    /// A watchlist rule fired
    Matched {
        domain: String,
        rule_index: usize,
        description: String,
        record: NormalizedRecord,
    },
    /// The per-domain deadline elapsed
    Timeout { domain: String },
    /// The domain was dropped for this run
    Failed { domain: String, error: String },
    /// Progress information (drain phase)
    Notice { message: String },
}

impl Event {
    /// Render the event as a single JSON line.
    pub fn to_json_line(&self) -> Result<String, WatchError> {
        let value = match self {
            Event::Resolved { record, .. } => serde_json::to_value(record)?,
            Event::Matched {
                domain,
                description,
                record,
                ..
            } => serde_json::json!({
                "match": description,
                "domain": domain,
                "record": record,
            }),
            Event::Timeout { domain } => serde_json::json!({
                "error": format!("Operation timed out - {}", domain),
                "domain": domain,
            }),
            Event::Failed { domain, error } => serde_json::json!({
                "error": error,
                "domain": domain,
            }),
            Event::Notice { message } => serde_json::json!({ "message": message }),
        };
        Ok(serde_json::to_string(&value)?)
    }
}

/// Counters for a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub submitted: usize,
    pub resolved: usize,
    pub matched: usize,
    pub deferred: usize,
    pub timed_out: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Which lookup adapter to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LookupProtocol {
    #[default]
    Rdap,
    Whois,
}

impl FromStr for LookupProtocol {
    type Err = WatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "rdap" => Ok(LookupProtocol::Rdap),
            "whois" => Ok(LookupProtocol::Whois),
            other => Err(WatchError::config(format!(
                "Unknown lookup protocol '{}'. Use 'rdap' or 'whois'",
                other
            ))),
        }
    }
}

impl fmt::Display for LookupProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupProtocol::Rdap => write!(f, "rdap"),
            LookupProtocol::Whois => write!(f, "whois"),
        }
    }
}

/// Configuration for a watchlist run.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Number of persistent lookup workers.
    /// Default: 10, Range: 1-100
    pub concurrency: usize,

    /// Outer deadline for one domain, retries included.
    /// Default: 60 seconds
    pub lookup_deadline: Duration,

    /// Timeout for a single adapter call.
    /// Default: 5 seconds
    pub lookup_timeout: Duration,

    /// Pause before and during the rate-limit drain.
    /// Default: 10 seconds
    pub rate_limit_cooldown: Duration,

    /// The drain pauses after a popped entry with probability 1/N.
    /// Default: 10
    pub pause_one_in: u32,

    /// Seed for the drain pacing draws (random when `None`)
    pub pacing_seed: Option<u64>,

    /// How many times one domain may be deferred before it is reported.
    /// Default: 5, `None` means unbounded
    pub max_deferrals: Option<u32>,

    /// Retry policy for transport errors
    pub retry: RetryPolicy,

    /// What the rule engine does after a rule fires
    pub termination: TerminationPolicy,

    /// Lookup adapter selection
    pub protocol: LookupProtocol,

    /// Optional SOCKS5 proxy ("host:port")
    pub proxy: Option<String>,

    /// Whether RDAP may consult the IANA bootstrap registry for unknown TLDs
    pub enable_bootstrap: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            lookup_deadline: Duration::from_secs(60),
            lookup_timeout: Duration::from_secs(5),
            rate_limit_cooldown: Duration::from_secs(10),
            pause_one_in: 10,
            pacing_seed: None,
            max_deferrals: Some(5),
            retry: RetryPolicy::default(),
            termination: TerminationPolicy::default(),
            protocol: LookupProtocol::default(),
            proxy: None,
            enable_bootstrap: true,
        }
    }
}

impl WatchConfig {
    /// Set the worker count, capped to 1-100.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.clamp(1, 100);
        self
    }

    pub fn with_lookup_deadline(mut self, deadline: Duration) -> Self {
        self.lookup_deadline = deadline;
        self
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.rate_limit_cooldown = cooldown;
        self
    }

    pub fn with_pacing_seed(mut self, seed: u64) -> Self {
        self.pacing_seed = Some(seed);
        self
    }

    pub fn with_max_deferrals(mut self, max: Option<u32>) -> Self {
        self.max_deferrals = max;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_termination(mut self, termination: TerminationPolicy) -> Self {
        self.termination = termination;
        self
    }

    pub fn with_protocol(mut self, protocol: LookupProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_proxy<P: Into<String>>(mut self, proxy: P) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn with_bootstrap(mut self, enabled: bool) -> Self {
        self.enable_bootstrap = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(email: &str) -> ContactSet {
        ContactSet {
            email: email.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_normalize_fills_absent_roles() {
        let mut record = Record::new("example.com");
        record.registrant = Some(contact("owner@example.com"));

        let normalized = record.normalize();
        assert_eq!(normalized.registrant.email, "owner@example.com");
        assert!(normalized.technical.is_empty());
        assert!(normalized.administrative.is_empty());
        assert!(normalized.billing.is_empty());
        assert_eq!(normalized.registrar_name(), "");
    }

    #[test]
    fn test_field_values_follow_role_order() {
        let mut record = Record::new("example.com");
        record.registrant = Some(contact("r@x"));
        record.technical = Some(contact("t@x"));
        record.administrative = Some(contact("a@x"));
        record.billing = Some(contact("b@x"));

        let normalized = record.normalize();
        assert_eq!(
            normalized.field_values(ContactField::Email),
            ["r@x", "t@x", "a@x", "b@x"]
        );
    }

    #[test]
    fn test_outcome_from_record_without_registrant_is_rate_limited() {
        let record = Record::new("example.com");
        assert!(matches!(Outcome::from_record(record), Outcome::RateLimited));

        let mut blank = Record::new("example.com");
        blank.registrant = Some(ContactSet::default());
        assert!(matches!(Outcome::from_record(blank), Outcome::RateLimited));

        let mut full = Record::new("example.com");
        full.registrant = Some(contact("a@b.c"));
        assert!(matches!(Outcome::from_record(full), Outcome::Resolved(_)));
    }

    #[test]
    fn test_redemption_period_record_is_resolved() {
        let mut record = Record::new("expired.com");
        record.domain.status = vec!["redemptionPeriod".to_string()];
        assert!(record.in_redemption_period());
        assert!(matches!(Outcome::from_record(record), Outcome::Resolved(_)));
    }

    #[test]
    fn test_record_deserializes_parser_json() {
        let line = r#"{"domain":{"domain":"example.com","status":["ok"],"punycode":"example.com"},
            "registrar":{"name":"Example Registrar","referral_url":"https://r"},
            "registrant":{"name":"Alice","email":"alice@example.com","street":"Main"},
            "technical":null}"#;
        let record: Record = serde_json::from_str(line).unwrap();
        assert_eq!(record.domain.domain, "example.com");
        assert_eq!(record.domain.status, vec!["ok"]);
        assert_eq!(record.registrar.unwrap().name, "Example Registrar");
        assert_eq!(record.registrant.unwrap().email, "alice@example.com");
        assert!(record.technical.is_none());
    }

    #[test]
    fn test_event_json_lines() {
        let timeout = Event::Timeout {
            domain: "slow.com".to_string(),
        };
        let line = timeout.to_json_line().unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["error"], "Operation timed out - slow.com");

        let notice = Event::Notice {
            message: "sleeping".to_string(),
        };
        assert_eq!(notice.to_json_line().unwrap(), r#"{"message":"sleeping"}"#);
    }

    #[test]
    fn test_config_builders() {
        let config = WatchConfig::default()
            .with_concurrency(500)
            .with_cooldown(Duration::ZERO)
            .with_protocol(LookupProtocol::Whois);
        assert_eq!(config.concurrency, 100);
        assert_eq!(config.rate_limit_cooldown, Duration::ZERO);
        assert_eq!(config.protocol, LookupProtocol::Whois);
        assert_eq!(WatchConfig::default().lookup_deadline, Duration::from_secs(60));
    }

    #[test]
    fn test_parse_protocol_and_field() {
        assert_eq!("RDAP".parse::<LookupProtocol>().unwrap(), LookupProtocol::Rdap);
        assert!("ftp".parse::<LookupProtocol>().is_err());
        assert_eq!(
            "organisation".parse::<ContactField>().unwrap(),
            ContactField::Organization
        );
        assert!("fax".parse::<ContactField>().is_err());
    }
}
