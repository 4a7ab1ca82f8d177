//! # whoiswatcher Library
//!
//! Looks up the registration records of many domains concurrently and
//! evaluates each record against a watchlist of alerting rules.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use whoiswatcher_lib::{build_lookup, Dispatcher, Event, WatchConfig, Watchlist};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = WatchConfig::default().with_concurrency(10);
//!     let watchlist = Arc::new(Watchlist::load("watchlist.toml")?);
//!     let dispatcher = Dispatcher::new(build_lookup(&config)?, watchlist, config);
//!
//!     let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//!     let domains = futures::stream::iter(vec!["example.com".to_string()]);
//!     let run = tokio::spawn(async move { dispatcher.run(domains, tx).await });
//!
//!     while let Some(event) = rx.recv().await {
//!         if let Event::Matched { domain, description, .. } = event {
//!             println!("{}: {}", domain, description);
//!         }
//!     }
//!     let summary = run.await?;
//!     println!("{} lookups resolved", summary.resolved);
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Dispatcher**: fixed pool of lookup workers with per-domain deadlines
//! - **Retry queue**: rate-limited domains are deferred and drained with paced sleeps
//! - **Rule engine**: single-clause and two-clause combo rules over normalized records
//! - **Adapters**: RDAP with IANA bootstrap discovery, or the system `whois` command

pub use config::{
    load_env_config, parse_duration_string, ConfigManager, DefaultsConfig, EnvConfig, FileConfig,
};
pub use dispatcher::Dispatcher;
pub use error::WatchError;
pub use protocols::{build_lookup, LookupPort};
pub use replay::replay;
pub use retry::{Deferral, Pacer, RetryPolicy, RetryQueue};
pub use rules::{evaluate, Flow, RuleMatch, TerminationPolicy};
pub use types::{
    ContactField, ContactSet, DomainDetails, Event, LookupProtocol, NormalizedRecord, Outcome,
    Record, Role, RunSummary, WatchConfig,
};
pub use utils::{normalize_domain_input, validate_domain};
pub use watchlist::{Clause, Condition, FieldKey, MatchMode, Rule, Watchlist};

// Adapters are public so callers can wrap or replace them.
pub mod protocols;

mod config;
mod dispatcher;
mod error;
mod replay;
mod retry;
mod rules;
mod types;
mod utils;
mod watchlist;

pub type Result<T> = std::result::Result<T, WatchError>;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
