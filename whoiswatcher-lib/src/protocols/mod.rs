//! Lookup adapters.
//!
//! The dispatcher only sees the [`LookupPort`] trait. Two adapters ship with
//! the library: RDAP over HTTPS (default) and the system `whois` command.

use crate::error::WatchError;
use crate::types::{LookupProtocol, Outcome, WatchConfig};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// RDAP lookups over HTTPS
pub mod rdap;

/// RDAP endpoint table and IANA bootstrap discovery
pub mod registry;

/// Lookups through the system whois command
pub mod whois;

pub use rdap::{record_from_rdap, RdapLookup};
pub use registry::{extract_tld, rdap_endpoint, rdap_registry_map};
pub use whois::{classify as classify_whois, WhoisLookup, WhoisParser};

/// Retrieves the registration record for one domain.
///
/// Implementations must return promptly once `cancel` fires; the dispatcher
/// also drops the returned future on deadline.
#[async_trait]
pub trait LookupPort: Send + Sync {
    async fn lookup(&self, domain: &str, cancel: CancellationToken) -> Outcome;

    /// Short adapter name for logs.
    fn name(&self) -> &'static str;
}

/// Build the adapter selected by `config`.
pub fn build_lookup(config: &WatchConfig) -> Result<Arc<dyn LookupPort>, WatchError> {
    match config.protocol {
        LookupProtocol::Rdap => Ok(Arc::new(RdapLookup::new(
            config.lookup_timeout,
            config.proxy.as_deref(),
            config.enable_bootstrap,
        )?)),
        LookupProtocol::Whois => {
            if config.proxy.is_some() {
                return Err(WatchError::config(
                    "A proxy can only be used with the rdap protocol",
                ));
            }
            Ok(Arc::new(WhoisLookup::new(config.lookup_timeout)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_default_adapter_is_rdap() {
        let lookup = build_lookup(&WatchConfig::default()).unwrap();
        assert_eq!(lookup.name(), "rdap");
    }

    #[test]
    fn test_whois_with_proxy_is_rejected() {
        let config = WatchConfig::default()
            .with_protocol(LookupProtocol::Whois)
            .with_proxy("127.0.0.1:9050");
        let err = build_lookup(&config).err().unwrap();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_build_whois_adapter() {
        let config = WatchConfig::default().with_protocol(LookupProtocol::Whois);
        assert_eq!(build_lookup(&config).unwrap().name(), "whois");
    }
}
