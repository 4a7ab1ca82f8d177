//! RDAP (Registration Data Access Protocol) lookups.
//!
//! The registry answer is turned into a [`Record`] by walking its entity tree
//! and reading the jCard of every contact role. Thin registries (`.com`,
//! `.net`) only carry the registrar, so when the registry record has no
//! registrant the registrar's own RDAP record is fetched once through its
//! `related` link and merged in.

use crate::error::WatchError;
use crate::protocols::registry::{extract_tld, rdap_endpoint};
use crate::protocols::LookupPort;
use crate::types::{ContactSet, Outcome, Record, Role};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const RDAP_ACCEPT: &str = "application/rdap+json";

/// RDAP adapter.
#[derive(Clone)]
pub struct RdapLookup {
    http_client: reqwest::Client,
    use_bootstrap: bool,
}

impl RdapLookup {
    /// Create an adapter with a per-request timeout and an optional SOCKS5
    /// proxy (`host:port` or a full `socks5://` URL).
    pub fn new(
        timeout: Duration,
        proxy: Option<&str>,
        use_bootstrap: bool,
    ) -> Result<Self, WatchError> {
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("whoiswatcher/", env!("CARGO_PKG_VERSION")));

        if let Some(proxy) = proxy {
            let url = if proxy.contains("://") {
                proxy.to_string()
            } else {
                format!("socks5://{}", proxy)
            };
            let proxy = reqwest::Proxy::all(&url)
                .map_err(|e| WatchError::config(format!("Invalid proxy '{}': {}", url, e)))?;
            builder = builder.proxy(proxy);
        }

        let http_client = builder.build().map_err(|e| {
            WatchError::network_with_source("Failed to create RDAP HTTP client", e.to_string())
        })?;

        Ok(Self {
            http_client,
            use_bootstrap,
        })
    }

    async fn resolve(&self, domain: &str) -> Outcome {
        let endpoint = match extract_tld(domain) {
            Ok(tld) => rdap_endpoint(&tld, self.use_bootstrap, &self.http_client).await,
            Err(e) => Err(e),
        };
        let endpoint = match endpoint {
            Ok(endpoint) => endpoint,
            Err(e) => return Outcome::TransportError(e),
        };

        let json = match self.fetch(&format!("{}{}", endpoint, domain), domain).await {
            Ok(json) => json,
            Err(outcome) => return outcome,
        };
        let mut record = record_from_rdap(&json, domain);

        if !record.has_registrant() {
            if let Some(link) = related_link(&json) {
                debug!(domain = %domain, link = %link, "following registrar RDAP link");
                // The registry answer stands on its own if the registrar fails.
                match self.fetch(&link, domain).await {
                    Ok(registrar_json) => merge(&mut record, record_from_rdap(&registrar_json, domain)),
                    Err(outcome) => {
                        debug!(domain = %domain, outcome = outcome.kind(), "registrar RDAP lookup failed")
                    }
                }
            }
        }

        Outcome::from_record(record)
    }

    /// GET one RDAP document. Non-success answers come back as the outcome
    /// they map to.
    async fn fetch(&self, url: &str, domain: &str) -> Result<Value, Outcome> {
        let response = self
            .http_client
            .get(url)
            .header(reqwest::header::ACCEPT, RDAP_ACCEPT)
            .send()
            .await
            .map_err(|e| {
                Outcome::TransportError(WatchError::network_with_source(
                    format!("RDAP request for '{}' failed", domain),
                    e.to_string(),
                ))
            })?;

        match response.status() {
            StatusCode::OK => response.json::<Value>().await.map_err(|e| {
                Outcome::ParseError(WatchError::rdap(
                    domain,
                    format!("Failed to parse JSON: {}", e),
                ))
            }),
            StatusCode::NOT_FOUND => Err(Outcome::NotFound),
            StatusCode::TOO_MANY_REQUESTS => Err(Outcome::RateLimited),
            code => Err(Outcome::TransportError(WatchError::rdap_with_status(
                domain,
                format!("RDAP server returned error: {}", code),
                code.as_u16(),
            ))),
        }
    }
}

#[async_trait]
impl LookupPort for RdapLookup {
    async fn lookup(&self, domain: &str, cancel: CancellationToken) -> Outcome {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                Outcome::TransportError(WatchError::rdap(domain, "Lookup cancelled"))
            }
            outcome = self.resolve(domain) => outcome,
        }
    }

    fn name(&self) -> &'static str {
        "rdap"
    }
}

/// Build a record from an RDAP domain object.
pub fn record_from_rdap(json: &Value, domain: &str) -> Record {
    let name = json
        .get("ldhName")
        .and_then(|n| n.as_str())
        .unwrap_or(domain)
        .to_lowercase();
    let mut record = Record::new(name);

    if let Some(statuses) = json.get("status").and_then(|s| s.as_array()) {
        record.domain.status = statuses
            .iter()
            .filter_map(|s| s.as_str())
            .map(epp_status)
            .collect();
    }

    if let Some(nameservers) = json.get("nameservers").and_then(|ns| ns.as_array()) {
        record.domain.name_servers = nameservers
            .iter()
            .filter_map(|ns| ns.get("ldhName").and_then(|n| n.as_str()))
            .map(|n| n.to_lowercase())
            .collect();
    }

    if let Some(events) = json.get("events").and_then(|e| e.as_array()) {
        for event in events {
            if let (Some(action), Some(date)) = (
                event.get("eventAction").and_then(|a| a.as_str()),
                event.get("eventDate").and_then(|d| d.as_str()),
            ) {
                match action {
                    "registration" => record.domain.created_date = Some(date.to_string()),
                    "expiration" => record.domain.expiration_date = Some(date.to_string()),
                    "last changed" => record.domain.updated_date = Some(date.to_string()),
                    _ => {}
                }
            }
        }
    }

    if let Some(entities) = json.get("entities").and_then(|e| e.as_array()) {
        collect_entities(entities, &mut record);
    }

    record
}

/// Walk the entity tree. The first entity seen for a role wins.
fn collect_entities(entities: &[Value], record: &mut Record) {
    for entity in entities {
        let roles = entity
            .get("roles")
            .and_then(|r| r.as_array())
            .map(|r| r.iter().filter_map(|v| v.as_str()).collect::<Vec<_>>())
            .unwrap_or_default();

        for role in roles {
            if role == "registrar" {
                if record.registrar.is_none() {
                    let mut contact = vcard_contact(entity);
                    if contact.name.is_empty() {
                        contact.name = entity_identifier(entity).unwrap_or_default();
                    }
                    record.registrar = Some(contact);
                }
                continue;
            }

            let Some(role) = contact_role(role) else {
                continue;
            };
            let contact = vcard_contact(entity);
            if contact.is_empty() {
                continue;
            }
            let slot = record.contact_mut(role);
            if slot.is_empty() {
                *slot = contact;
            }
        }

        if let Some(nested) = entity.get("entities").and_then(|e| e.as_array()) {
            collect_entities(nested, record);
        }
    }
}

fn contact_role(role: &str) -> Option<Role> {
    match role {
        "registrant" => Some(Role::Registrant),
        "technical" => Some(Role::Technical),
        "administrative" => Some(Role::Administrative),
        "billing" => Some(Role::Billing),
        _ => None,
    }
}

/// Read name, organization, email and phone out of an entity's jCard.
fn vcard_contact(entity: &Value) -> ContactSet {
    let mut contact = ContactSet::default();
    let Some(items) = entity
        .get("vcardArray")
        .and_then(|v| v.get(1))
        .and_then(|a| a.as_array())
    else {
        return contact;
    };

    for item in items.iter().filter_map(|i| i.as_array()) {
        let (Some(property), Some(value)) = (item.first().and_then(|p| p.as_str()), item.get(3))
        else {
            continue;
        };
        let slot = match property {
            "fn" => &mut contact.name,
            "org" => &mut contact.organization,
            "email" => &mut contact.email,
            "tel" => &mut contact.phone,
            _ => continue,
        };
        if !slot.is_empty() {
            continue;
        }
        // Structured values (org units, adr) arrive as arrays.
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Array(parts) => parts
                .iter()
                .filter_map(|p| p.as_str())
                .filter(|p| !p.is_empty())
                .collect::<Vec<_>>()
                .join(" "),
            _ => continue,
        };
        *slot = text.trim_start_matches("tel:").trim().to_string();
    }

    contact
}

fn entity_identifier(entity: &Value) -> Option<String> {
    entity
        .get("publicIds")
        .and_then(|p| p.as_array())
        .and_then(|ids| ids.first())
        .and_then(|id| id.get("identifier"))
        .or_else(|| entity.get("handle"))
        .and_then(|v| v.as_str())
        .map(String::from)
}

/// The registrar's copy of the domain object, if the registry links to it.
fn related_link(json: &Value) -> Option<String> {
    json.get("links")?
        .as_array()?
        .iter()
        .filter(|link| link.get("rel").and_then(|r| r.as_str()) == Some("related"))
        .filter(|link| {
            link.get("type")
                .and_then(|t| t.as_str())
                .map_or(true, |t| t == RDAP_ACCEPT)
        })
        .find_map(|link| link.get("href").and_then(|h| h.as_str()))
        .map(String::from)
}

/// Fill empty slots of `record` from the registrar's answer.
fn merge(record: &mut Record, other: Record) {
    for role in Role::ALL {
        let theirs = match role {
            Role::Registrant => &other.registrant,
            Role::Technical => &other.technical,
            Role::Administrative => &other.administrative,
            Role::Billing => &other.billing,
        };
        if let Some(theirs) = theirs.as_ref().filter(|c| !c.is_empty()) {
            let ours = record.contact_mut(role);
            if ours.is_empty() {
                *ours = theirs.clone();
            }
        }
    }
    if record.registrar.is_none() {
        record.registrar = other.registrar;
    }
}

/// RDAP spells EPP status codes as words ("redemption period"); convert
/// them back to the camel-case EPP form ("redemptionPeriod").
fn epp_status(status: &str) -> String {
    let mut words = status.split_whitespace();
    let mut code = words.next().unwrap_or_default().to_lowercase();
    for word in words {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            code.extend(first.to_uppercase());
            code.push_str(&chars.as_str().to_lowercase());
        }
    }
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vcard(items: Value) -> Value {
        serde_json::json!(["vcard", items])
    }

    fn sample() -> Value {
        serde_json::json!({
            "objectClassName": "domain",
            "ldhName": "EXAMPLE.COM",
            "status": ["client transfer prohibited", "active"],
            "nameservers": [{"ldhName": "NS1.EXAMPLE.NET"}],
            "events": [
                {"eventAction": "registration", "eventDate": "2024-01-02T00:00:00Z"},
                {"eventAction": "expiration", "eventDate": "2025-01-02T00:00:00Z"}
            ],
            "entities": [
                {
                    "roles": ["registrar"],
                    "publicIds": [{"type": "IANA Registrar ID", "identifier": "9999"}],
                    "vcardArray": vcard(serde_json::json!([["fn", {}, "text", "Example Registrar LLC"]])),
                    "entities": [
                        {
                            "roles": ["abuse"],
                            "vcardArray": vcard(serde_json::json!([["email", {}, "text", "abuse@registrar.test"]]))
                        }
                    ]
                },
                {
                    "roles": ["registrant", "administrative"],
                    "vcardArray": vcard(serde_json::json!([
                        ["version", {}, "text", "4.0"],
                        ["fn", {}, "text", "Alice Liddell"],
                        ["org", {}, "text", "Wonderland Ltd"],
                        ["email", {}, "text", "alice@example.com"],
                        ["tel", {"type": "voice"}, "uri", "tel:+1.5555550100"]
                    ]))
                }
            ]
        })
    }

    #[test]
    fn test_record_from_rdap() {
        let record = record_from_rdap(&sample(), "example.com");

        assert_eq!(record.domain.domain, "example.com");
        assert_eq!(
            record.domain.status,
            vec!["clientTransferProhibited", "active"]
        );
        assert_eq!(record.domain.name_servers, vec!["ns1.example.net"]);
        assert_eq!(
            record.domain.created_date.as_deref(),
            Some("2024-01-02T00:00:00Z")
        );

        let registrant = record.registrant.as_ref().unwrap();
        assert_eq!(registrant.name, "Alice Liddell");
        assert_eq!(registrant.organization, "Wonderland Ltd");
        assert_eq!(registrant.phone, "+1.5555550100");
        assert_eq!(record.administrative.as_ref().unwrap().email, "alice@example.com");
        assert!(record.technical.is_none());
        assert_eq!(record.registrar.as_ref().unwrap().name, "Example Registrar LLC");
        assert!(matches!(Outcome::from_record(record), Outcome::Resolved(_)));
    }

    #[test]
    fn test_thin_registry_record_is_rate_limited() {
        let json = serde_json::json!({
            "ldhName": "thin.com",
            "entities": [{"roles": ["registrar"], "handle": "292"}]
        });
        let record = record_from_rdap(&json, "thin.com");
        assert_eq!(record.registrar.as_ref().unwrap().name, "292");
        assert!(matches!(Outcome::from_record(record), Outcome::RateLimited));
    }

    #[test]
    fn test_related_link_and_merge() {
        let registry = serde_json::json!({
            "links": [
                {"rel": "self", "href": "https://rdap.verisign.com/com/v1/domain/thin.com"},
                {"rel": "related", "type": "application/rdap+json",
                 "href": "https://rdap.registrar.test/domain/thin.com"}
            ]
        });
        assert_eq!(
            related_link(&registry).as_deref(),
            Some("https://rdap.registrar.test/domain/thin.com")
        );

        let mut record = record_from_rdap(&registry, "thin.com");
        merge(&mut record, record_from_rdap(&sample(), "thin.com"));
        assert!(record.has_registrant());
        assert_eq!(record.domain.domain, "thin.com");
    }

    #[test]
    fn test_epp_status() {
        assert_eq!(epp_status("redemption period"), "redemptionPeriod");
        assert_eq!(epp_status("client delete prohibited"), "clientDeleteProhibited");
        assert_eq!(epp_status("ok"), "ok");

        let mut record = Record::new("gone.com");
        record.domain.status = vec![epp_status("redemption period")];
        assert!(record.in_redemption_period());
    }

    #[test]
    fn test_client_with_proxy() {
        assert!(RdapLookup::new(Duration::from_secs(5), Some("127.0.0.1:9050"), false).is_ok());
        assert!(RdapLookup::new(Duration::from_secs(5), None, true).is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_lookup_returns_immediately() {
        let lookup = RdapLookup::new(Duration::from_secs(5), None, false).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = lookup.lookup("example.com", cancel).await;
        assert!(matches!(outcome, Outcome::TransportError(_)));
    }
}
