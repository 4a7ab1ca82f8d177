//! whoiswatcher CLI Application
//!
//! Looks up domains read from the command line, a file or stdin, and prints
//! a JSON line for every record that matches the watchlist.

mod ui;

use clap::builder::styling::{AnsiColor, Effects, Styles};
use clap::Parser;
use futures::stream::{self, Stream};
use std::path::Path;
use std::pin::Pin;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use ui::Printer;
use whoiswatcher_lib::{
    build_lookup, load_env_config, replay, ConfigManager, ContactField, Dispatcher, EnvConfig,
    Event, FileConfig, LookupProtocol, RunSummary, WatchConfig, WatchError, Watchlist,
};

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Yellow.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Yellow.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

type DomainStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// CLI arguments for whoiswatcher
#[derive(Parser, Debug)]
#[command(name = "whoiswatcher")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Get alerted on domains whose registration records match a watchlist")]
#[command(
    long_about = "Look up the registration records of many domains concurrently and report the ones matching a watchlist of rules.\n\nDomains are read from the arguments, --file, or stdin. Matches are printed as JSON lines on stdout."
)]
#[command(styles = STYLES)]
pub struct Args {
    /// Domain names to look up
    #[arg(value_name = "DOMAINS", help_heading = "Input")]
    pub domains: Vec<String>,

    /// File with domains, one per line
    #[arg(short = 'f', long = "file", value_name = "FILE", help_heading = "Input")]
    pub file: Option<String>,

    /// Evaluate previously saved JSON records instead of looking domains up
    #[arg(
        short = 'j',
        long = "jsoninput",
        value_name = "FILE",
        help_heading = "Input"
    )]
    pub json_input: Option<String>,

    /// Watchlist of rules (TOML, JSON or YAML)
    #[arg(
        short = 'w',
        long = "watchlist",
        value_name = "FILE",
        help_heading = "Rules"
    )]
    pub watchlist: Option<String>,

    /// Print every resolved record
    #[arg(short = 'v', long = "verbose", help_heading = "Output")]
    pub verbose: bool,

    /// Print contact fields from every record: email, phone, organization, name
    #[arg(
        short = 'u',
        long = "outputField",
        value_name = "FIELDS",
        value_delimiter = ',',
        help_heading = "Output"
    )]
    pub fields: Vec<String>,

    /// SOCKS5 proxy, host:port
    #[arg(short = 'p', long = "proxy", value_name = "PROXY", help_heading = "Lookup")]
    pub proxy: Option<String>,

    /// Number of lookup workers (default: 10, max: 100)
    #[arg(short = 't', long = "threads", value_name = "THREADS", help_heading = "Lookup")]
    pub threads: Option<usize>,

    /// Seconds to sleep when rate limited (default: 10)
    #[arg(short = 's', long = "sleep", value_name = "SECONDS", help_heading = "Lookup")]
    pub sleep: Option<u64>,

    /// Lookup protocol: rdap or whois
    #[arg(long = "protocol", value_name = "PROTOCOL", help_heading = "Lookup")]
    pub protocol: Option<String>,

    /// Seconds allowed per domain, retries included (default: 60)
    #[arg(long = "deadline", value_name = "SECONDS", help_heading = "Lookup")]
    pub deadline: Option<u64>,

    /// Disable IANA bootstrap (use only built-in RDAP endpoints)
    #[arg(long = "no-bootstrap", help_heading = "Lookup")]
    pub no_bootstrap: bool,

    /// Use specific config file instead of automatic discovery
    #[arg(long = "config", value_name = "FILE", help_heading = "Configuration")]
    pub config: Option<String>,

    /// Debug logging on stderr
    #[arg(short = 'd', long = "debug", help_heading = "Configuration")]
    pub debug: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.debug);

    if let Err(e) = validate_args(&args) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }

    match run(args).await {
        Ok(summary) => ui::print_summary(&summary),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Validate command line arguments
fn validate_args(args: &Args) -> Result<(), String> {
    if let Some(threads) = args.threads {
        if threads == 0 || threads > 100 {
            return Err("Threads must be between 1 and 100".to_string());
        }
    }

    if args.json_input.is_some() && (!args.domains.is_empty() || args.file.is_some()) {
        return Err("Cannot combine --jsoninput with domain arguments or --file".to_string());
    }

    Ok(())
}

/// Everything resolved from config files, environment and flags.
struct Settings {
    config: WatchConfig,
    watchlist: Option<String>,
    fields: Vec<ContactField>,
}

async fn run(args: Args) -> Result<RunSummary, Box<dyn std::error::Error>> {
    let env_config = load_env_config();
    let file_config = load_file_config(&args, &env_config)?;
    let settings = build_settings(&args, &env_config, &file_config)?;

    let watchlist = match &settings.watchlist {
        Some(path) => {
            let watchlist = Watchlist::load(path)?;
            info!(path = %path, rules = watchlist.len(), "loaded watchlist");
            Some(watchlist)
        }
        None => None,
    };

    // Without a watchlist every resolved record is printed.
    let printer = Printer::new(args.verbose || watchlist.is_none(), settings.fields);

    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
    let output = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            printer.print(&event);
        }
    });

    let summary = if let Some(path) = &args.json_input {
        let watchlist =
            watchlist.ok_or_else(|| WatchError::config("JSON input requires a watchlist"))?;
        let reader = open_lines(path).await?;
        replay(reader, &watchlist, settings.config.termination, &tx).await?
    } else {
        let domains = domain_source(&args).await?;
        let lookup = build_lookup(&settings.config)?;
        let dispatcher = Dispatcher::new(
            lookup,
            Arc::new(watchlist.unwrap_or_default()),
            settings.config,
        );
        debug!(config = ?dispatcher.config(), "starting dispatcher");
        dispatcher.run(domains, tx.clone()).await
    };

    drop(tx);
    output.await?;
    Ok(summary)
}

/// Load configuration files: `--config`, then `WW_CONFIG`, then discovery.
fn load_file_config(args: &Args, env_config: &EnvConfig) -> Result<FileConfig, WatchError> {
    let manager = ConfigManager::new();

    if let Some(path) = &args.config {
        debug!(path = %path, "using config file from --config");
        return manager.load_file(path);
    }
    if let Some(path) = &env_config.config {
        debug!(path = %path, "using config file from WW_CONFIG");
        return manager.load_file(path);
    }
    manager.discover_and_load()
}

/// Layer defaults, config file, environment and flags, lowest first.
fn build_settings(
    args: &Args,
    env_config: &EnvConfig,
    file_config: &FileConfig,
) -> Result<Settings, WatchError> {
    let mut config = WatchConfig::default();
    let mut watchlist = None;

    if let Some(defaults) = &file_config.defaults {
        config = defaults.apply(config)?;
        watchlist = defaults.watchlist.clone();
    }

    config = env_config.apply(config);
    if env_config.watchlist.is_some() {
        watchlist = env_config.watchlist.clone();
    }

    config = apply_cli_args(config, args)?;
    if args.watchlist.is_some() {
        watchlist = args.watchlist.clone();
    }

    let fields = args
        .fields
        .iter()
        .filter(|f| !f.trim().is_empty())
        .map(|f| f.parse::<ContactField>())
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Settings {
        config,
        watchlist,
        fields,
    })
}

/// CLI flags win over every other source, but only when given.
fn apply_cli_args(mut config: WatchConfig, args: &Args) -> Result<WatchConfig, WatchError> {
    if let Some(threads) = args.threads {
        config = config.with_concurrency(threads);
    }
    if let Some(sleep) = args.sleep {
        config = config.with_cooldown(Duration::from_secs(sleep));
    }
    if let Some(deadline) = args.deadline {
        config = config.with_lookup_deadline(Duration::from_secs(deadline));
    }
    if let Some(proxy) = &args.proxy {
        config = config.with_proxy(proxy.clone());
    }
    if let Some(protocol) = &args.protocol {
        config = config.with_protocol(protocol.parse::<LookupProtocol>()?);
    }
    if args.no_bootstrap {
        config = config.with_bootstrap(false);
    }
    Ok(config)
}

/// Domains from the arguments, else `--file`, else stdin.
async fn domain_source(args: &Args) -> Result<DomainStream, WatchError> {
    if !args.domains.is_empty() {
        return Ok(Box::pin(stream::iter(args.domains.clone())));
    }

    if let Some(path) = &args.file {
        let reader = open_lines(path).await?;
        return Ok(line_stream(reader));
    }

    debug!("reading domains from stdin");
    Ok(line_stream(BufReader::new(tokio::io::stdin())))
}

async fn open_lines(path: &str) -> Result<BufReader<tokio::fs::File>, WatchError> {
    if !Path::new(path).exists() {
        return Err(WatchError::file_error(path, "File not found"));
    }
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| WatchError::file_error(path, format!("Failed to open file: {}", e)))?;
    Ok(BufReader::new(file))
}

fn line_stream<R>(reader: R) -> DomainStream
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    Box::pin(stream::unfold(reader.lines(), |mut lines| async move {
        match lines.next_line().await {
            Ok(Some(line)) => Some((line, lines)),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "stopped reading domains");
                None
            }
        }
    }))
}
