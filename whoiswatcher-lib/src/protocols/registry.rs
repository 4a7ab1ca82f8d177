//! RDAP server discovery.
//!
//! A short built-in table covers the TLDs that dominate newly registered
//! domain feeds. Everything else is resolved through the IANA RDAP bootstrap
//! file, fetched once and cached for a day. TLDs absent from the bootstrap
//! file are remembered so later domains under them fail without a request.

use crate::error::WatchError;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info};

const BOOTSTRAP_URL: &str = "https://data.iana.org/rdap/dns.json";

/// RDAP endpoints rarely change.
const BOOTSTRAP_TTL: Duration = Duration::from_secs(24 * 3600);

struct BootstrapCache {
    /// TLD -> RDAP domain endpoint
    endpoints: HashMap<String, String>,
    /// TLDs with no RDAP service
    no_rdap: HashSet<String>,
    last_fetch: Option<Instant>,
}

impl BootstrapCache {
    fn new() -> Self {
        Self {
            endpoints: HashMap::new(),
            no_rdap: HashSet::new(),
            last_fetch: None,
        }
    }

    fn is_stale(&self) -> bool {
        match self.last_fetch {
            Some(t) => t.elapsed() > BOOTSTRAP_TTL,
            None => true,
        }
    }
}

lazy_static::lazy_static! {
    static ref BOOTSTRAP_CACHE: Mutex<BootstrapCache> = Mutex::new(BootstrapCache::new());
}

fn cache() -> Result<MutexGuard<'static, BootstrapCache>, WatchError> {
    BOOTSTRAP_CACHE
        .lock()
        .map_err(|_| WatchError::internal("Failed to acquire bootstrap cache lock"))
}

/// Built-in TLD to RDAP endpoint table. Every URL ends in `/domain/`.
pub fn rdap_registry_map() -> HashMap<&'static str, &'static str> {
    HashMap::from([
        ("com", "https://rdap.verisign.com/com/v1/domain/"),
        ("net", "https://rdap.verisign.com/net/v1/domain/"),
        (
            "org",
            "https://rdap.publicinterestregistry.org/rdap/domain/",
        ),
        ("info", "https://rdap.identitydigital.services/rdap/domain/"),
        ("io", "https://rdap.identitydigital.services/rdap/domain/"),
        ("biz", "https://rdap.nic.biz/domain/"),
        ("app", "https://pubapi.registry.google/rdap/domain/"),
        ("dev", "https://pubapi.registry.google/rdap/domain/"),
        ("xyz", "https://rdap.centralnic.com/xyz/domain/"),
        ("online", "https://rdap.centralnic.com/online/domain/"),
        ("site", "https://rdap.centralnic.com/site/domain/"),
        ("shop", "https://rdap.gmoregistry.net/rdap/domain/"),
        ("top", "https://rdap.nic.top/domain/"),
        ("us", "https://rdap.nic.us/domain/"),
        ("uk", "https://rdap.nominet.uk/domain/"),
        ("fr", "https://rdap.nic.fr/domain/"),
        ("nl", "https://rdap.sidn.nl/domain/"),
    ])
}

/// Extract the last label of a domain name.
pub fn extract_tld(domain: &str) -> Result<String, WatchError> {
    match domain.rsplit_once('.') {
        Some((rest, tld)) if !rest.is_empty() && !tld.is_empty() => Ok(tld.to_lowercase()),
        _ => Err(WatchError::invalid_domain(
            domain,
            "Domain must contain at least one dot",
        )),
    }
}

/// Resolve the RDAP domain endpoint for a TLD.
///
/// Order: built-in table, fresh bootstrap cache, negative cache, then (when
/// `use_bootstrap` is set) a full bootstrap fetch through `client`.
pub async fn rdap_endpoint(
    tld: &str,
    use_bootstrap: bool,
    client: &reqwest::Client,
) -> Result<String, WatchError> {
    let tld = tld.to_lowercase();

    if let Some(endpoint) = rdap_registry_map().get(tld.as_str()) {
        return Ok(endpoint.to_string());
    }

    let needs_fetch = {
        let cache = cache()?;
        if !cache.is_stale() {
            if let Some(endpoint) = cache.endpoints.get(&tld) {
                return Ok(endpoint.clone());
            }
            if cache.no_rdap.contains(&tld) {
                return Err(WatchError::bootstrap(&tld, "TLD has no known RDAP endpoint"));
            }
        }
        cache.is_stale()
    };

    if !use_bootstrap {
        return Err(WatchError::bootstrap(
            &tld,
            "No known RDAP endpoint and bootstrap disabled",
        ));
    }

    if needs_fetch {
        fetch_full_bootstrap(client).await?;
    }

    let mut cache = cache()?;
    if let Some(endpoint) = cache.endpoints.get(&tld) {
        return Ok(endpoint.clone());
    }
    cache.no_rdap.insert(tld.clone());
    Err(WatchError::bootstrap(
        &tld,
        "TLD not found in IANA bootstrap registry",
    ))
}

/// Download the IANA bootstrap file and replace the cache contents.
async fn fetch_full_bootstrap(client: &reqwest::Client) -> Result<(), WatchError> {
    debug!(url = BOOTSTRAP_URL, "fetching RDAP bootstrap registry");

    let response = client.get(BOOTSTRAP_URL).send().await.map_err(|e| {
        WatchError::bootstrap("*", format!("Failed to fetch bootstrap registry: {}", e))
    })?;

    if !response.status().is_success() {
        return Err(WatchError::bootstrap(
            "*",
            format!("Bootstrap registry returned HTTP {}", response.status()),
        ));
    }

    let json: serde_json::Value = response.json().await.map_err(|e| {
        WatchError::bootstrap("*", format!("Failed to parse bootstrap JSON: {}", e))
    })?;

    let endpoints = parse_bootstrap(&json)?;
    info!(tlds = endpoints.len(), "loaded RDAP bootstrap registry");

    let mut cache = cache()?;
    cache.endpoints = endpoints;
    cache.last_fetch = Some(Instant::now());
    cache.no_rdap.clear();
    Ok(())
}

/// Turn the bootstrap `services` array into a TLD -> endpoint map.
fn parse_bootstrap(json: &serde_json::Value) -> Result<HashMap<String, String>, WatchError> {
    let services = json
        .get("services")
        .and_then(|s| s.as_array())
        .ok_or_else(|| {
            WatchError::bootstrap(
                "*",
                "Invalid bootstrap JSON: missing or invalid 'services' array",
            )
        })?;

    let mut endpoints = HashMap::new();
    for service in services.iter().filter_map(|s| s.as_array()) {
        let (Some(tlds), Some(urls)) = (
            service.first().and_then(|t| t.as_array()),
            service.get(1).and_then(|u| u.as_array()),
        ) else {
            continue;
        };

        // Prefer an https base when a service lists several.
        let url = urls
            .iter()
            .filter_map(|u| u.as_str())
            .find(|u| u.starts_with("https://"))
            .or_else(|| urls.first().and_then(|u| u.as_str()));

        if let Some(url) = url {
            let endpoint = format!("{}/domain/", url.trim_end_matches('/'));
            for tld in tlds.iter().filter_map(|t| t.as_str()) {
                endpoints.insert(tld.to_lowercase(), endpoint.clone());
            }
        }
    }

    Ok(endpoints)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_tld() {
        assert_eq!(extract_tld("example.com").unwrap(), "com");
        assert_eq!(extract_tld("sub.example.ORG").unwrap(), "org");
        assert!(extract_tld("invalid").is_err());
        assert!(extract_tld(".com").is_err());
        assert!(extract_tld("").is_err());
    }

    #[test]
    fn test_all_endpoints_are_https_domain_urls() {
        for (tld, endpoint) in rdap_registry_map() {
            assert!(endpoint.starts_with("https://"), "{}: {}", tld, endpoint);
            assert!(endpoint.ends_with("/domain/"), "{}: {}", tld, endpoint);
        }
    }

    #[tokio::test]
    async fn test_builtin_endpoint_needs_no_network() {
        let client = reqwest::Client::new();
        let endpoint = rdap_endpoint("COM", false, &client).await.unwrap();
        assert!(endpoint.contains("verisign.com"));
    }

    #[tokio::test]
    async fn test_unknown_tld_without_bootstrap() {
        let client = reqwest::Client::new();
        let err = rdap_endpoint("unknowntld123", false, &client)
            .await
            .unwrap_err();
        assert!(matches!(err, WatchError::BootstrapError { .. }));
    }

    #[test]
    fn test_parse_bootstrap_services() {
        let json = serde_json::json!({
            "version": "1.0",
            "services": [
                [["Example", "test"], ["http://rdap.example/", "https://rdap.example/"]],
                [["zz"], ["https://rdap.zz.invalid"]],
                ["malformed"]
            ]
        });
        let map = parse_bootstrap(&json).unwrap();
        assert_eq!(map["example"], "https://rdap.example/domain/");
        assert_eq!(map["test"], "https://rdap.example/domain/");
        assert_eq!(map["zz"], "https://rdap.zz.invalid/domain/");
        assert_eq!(map.len(), 3);

        assert!(parse_bootstrap(&serde_json::json!({})).is_err());
    }

    #[test]
    fn test_bootstrap_cache_starts_stale() {
        let cache = BootstrapCache::new();
        assert!(cache.is_stale());
        assert!(cache.endpoints.is_empty());
        assert!(cache.no_rdap.is_empty());
    }
}
