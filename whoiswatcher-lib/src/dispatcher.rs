//! The concurrent lookup dispatcher.
//!
//! A run has two phases:
//!
//! 1. **Primary pass**: input domains are fed in order into a bounded work
//!    channel consumed by a fixed pool of worker tasks. Each worker looks a
//!    domain up under a per-domain deadline, evaluates resolved records
//!    against the watchlist, and parks throttled domains in the
//!    [`RetryQueue`].
//! 2. **Drain**: once every worker has finished, parked domains are replayed
//!    one at a time with cooldown pauses, through the same per-domain
//!    pipeline (so they can be parked again until their deferral limit).
//!
//! Everything the run reports goes out as [`Event`]s on an unbounded channel;
//! the caller decides how to render them.

use crate::protocols::LookupPort;
use crate::retry::{Deferral, Pacer, RetryPolicy, RetryQueue};
use crate::rules::{self, TerminationPolicy};
use crate::types::{Event, NormalizedRecord, Outcome, RunSummary, WatchConfig};
use crate::utils::{normalize_domain_input, validate_domain};
use crate::watchlist::Watchlist;
use futures::stream::{Stream, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Drives lookups for a stream of domains.
pub struct Dispatcher {
    lookup: Arc<dyn LookupPort>,
    watchlist: Arc<Watchlist>,
    config: WatchConfig,
}

impl Dispatcher {
    pub fn new(lookup: Arc<dyn LookupPort>, watchlist: Arc<Watchlist>, config: WatchConfig) -> Self {
        Self {
            lookup,
            watchlist,
            config,
        }
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// Process every domain of `domains`, then drain the retry queue.
    ///
    /// Input lines are trimmed and lower-cased; blank lines are skipped and
    /// malformed names are reported without a lookup. Returns once the input
    /// is exhausted, every worker has finished and the retry queue is empty.
    pub async fn run<S>(&self, domains: S, events: UnboundedSender<Event>) -> RunSummary
    where
        S: Stream<Item = String> + Unpin,
    {
        let concurrency = self.config.concurrency.max(1);
        let pipeline = Pipeline {
            lookup: self.lookup.clone(),
            watchlist: self.watchlist.clone(),
            queue: Arc::new(RetryQueue::new(self.config.max_deferrals)),
            counters: Arc::new(Counters::default()),
            events,
            deadline: self.config.lookup_deadline,
            cooldown: self.config.rate_limit_cooldown,
            retry: self.config.retry,
            termination: self.config.termination,
        };

        info!(
            adapter = self.lookup.name(),
            workers = concurrency,
            rules = self.watchlist.len(),
            "starting watchlist run"
        );

        let (work_tx, work_rx) = mpsc::channel::<String>(concurrency);
        let work_rx = Arc::new(Mutex::new(work_rx));

        let mut workers = JoinSet::new();
        for worker_id in 0..concurrency {
            workers.spawn(pipeline.clone().worker(worker_id, work_rx.clone()));
        }

        let mut domains = domains;
        while let Some(line) = domains.next().await {
            let Some(domain) = normalize_domain_input(&line) else {
                continue;
            };
            bump(&pipeline.counters.submitted);

            if let Err(e) = validate_domain(&domain) {
                pipeline.fail(&domain, e.to_string());
                continue;
            }
            if work_tx.send(domain).await.is_err() {
                error!("all lookup workers exited early");
                break;
            }
        }
        // Closing the channel lets idle workers exit.
        drop(work_tx);

        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "lookup worker failed");
            }
        }

        self.drain(&pipeline).await;

        let summary = pipeline.counters.summary();
        info!(
            submitted = summary.submitted,
            resolved = summary.resolved,
            matched = summary.matched,
            deferred = summary.deferred,
            timed_out = summary.timed_out,
            failed = summary.failed,
            "watchlist run finished"
        );
        summary
    }

    /// Replay parked domains one at a time with random cooldown pauses.
    async fn drain(&self, pipeline: &Pipeline) {
        if pipeline.queue.is_empty() {
            return;
        }

        let mut pacer = Pacer::new(self.config.pause_one_in, self.config.pacing_seed);
        pipeline.pause().await;

        while let Some(domain) = pipeline.queue.pop() {
            pipeline.process(&domain).await;

            // The draw happens for every entry so seeded runs stay reproducible.
            if pacer.should_pause() && !pipeline.queue.is_empty() {
                pipeline.pause().await;
            }
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicUsize,
    resolved: AtomicUsize,
    matched: AtomicUsize,
    deferred: AtomicUsize,
    timed_out: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Counters {
    fn summary(&self) -> RunSummary {
        RunSummary {
            submitted: self.submitted.load(Ordering::Relaxed),
            resolved: self.resolved.load(Ordering::Relaxed),
            matched: self.matched.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

/// Per-domain processing shared by all workers and the drain loop.
#[derive(Clone)]
struct Pipeline {
    lookup: Arc<dyn LookupPort>,
    watchlist: Arc<Watchlist>,
    queue: Arc<RetryQueue>,
    counters: Arc<Counters>,
    events: UnboundedSender<Event>,
    deadline: Duration,
    cooldown: Duration,
    retry: RetryPolicy,
    termination: TerminationPolicy,
}

impl Pipeline {
    async fn worker(self, worker_id: usize, work_rx: Arc<Mutex<mpsc::Receiver<String>>>) {
        debug!(worker_id, "lookup worker started");
        loop {
            let domain = {
                let mut rx = work_rx.lock().await;
                rx.recv().await
            };
            let Some(domain) = domain else {
                break;
            };
            self.process(&domain).await;
        }
        debug!(worker_id, "lookup worker finished");
    }

    async fn process(&self, domain: &str) {
        let cancel = CancellationToken::new();
        let attempts = self.retry.execute(|attempt| {
            let lookup = self.lookup.clone();
            let cancel = cancel.clone();
            let domain = domain.to_string();
            async move {
                debug!(domain = %domain, attempt, adapter = lookup.name(), "looking up");
                lookup.lookup(&domain, cancel).await
            }
        });

        let outcome = match tokio::time::timeout(self.deadline, attempts).await {
            Ok(outcome) => outcome,
            Err(_) => {
                // The lookup future is already dropped; the token reaches
                // anything the adapter spawned.
                cancel.cancel();
                warn!(domain = %domain, deadline = ?self.deadline, "lookup timed out");
                bump(&self.counters.timed_out);
                self.emit(Event::Timeout {
                    domain: domain.to_string(),
                });
                return;
            }
        };

        debug!(domain = %domain, outcome = outcome.kind(), "lookup finished");
        match outcome {
            Outcome::Resolved(record) => {
                if record.in_redemption_period() {
                    debug!(domain = %domain, "in redemption period, skipped");
                    bump(&self.counters.skipped);
                } else if !record.has_registrant() {
                    self.defer(domain);
                } else {
                    self.report(domain, record.normalize());
                }
            }
            Outcome::RateLimited => self.defer(domain),
            Outcome::NotFound => self.fail(domain, "No registration record found".to_string()),
            Outcome::TransportError(e) | Outcome::ParseError(e) => self.fail(domain, e.to_string()),
        }
    }

    fn report(&self, domain: &str, record: NormalizedRecord) {
        bump(&self.counters.resolved);
        let matched = publish(
            &self.watchlist,
            self.termination,
            domain,
            record,
            &self.events,
        );
        self.counters
            .matched
            .fetch_add(matched, Ordering::Relaxed);
    }

    fn defer(&self, domain: &str) {
        match self.queue.push(domain) {
            Deferral::Queued { attempt } => {
                debug!(domain = %domain, attempt, "rate limited, deferred");
                bump(&self.counters.deferred);
            }
            Deferral::Exhausted { attempts } => {
                warn!(domain = %domain, attempts, "deferral limit reached");
                self.fail(
                    domain,
                    format!("still rate limited after {} attempts", attempts + 1),
                );
            }
        }
    }

    fn fail(&self, domain: &str, error: String) {
        debug!(domain = %domain, error = %error, "domain dropped");
        bump(&self.counters.failed);
        self.emit(Event::Failed {
            domain: domain.to_string(),
            error,
        });
    }

    async fn pause(&self) {
        let message = format!(
            "Processing a total of {} rate limited domains, sleeping for {} seconds",
            self.queue.len(),
            self.cooldown.as_secs()
        );
        info!("{}", message);
        self.emit(Event::Notice { message });
        if !self.cooldown.is_zero() {
            tokio::time::sleep(self.cooldown).await;
        }
    }

    fn emit(&self, event: Event) {
        // A closed receiver means nobody is listening; the run still completes.
        let _ = self.events.send(event);
    }
}

/// Emit the resolved record and one event per fired rule. Returns the number
/// of matches.
pub(crate) fn publish(
    watchlist: &Watchlist,
    termination: TerminationPolicy,
    domain: &str,
    record: NormalizedRecord,
    events: &UnboundedSender<Event>,
) -> usize {
    let matches = rules::evaluate(watchlist, domain, &record, termination);

    let _ = events.send(Event::Resolved {
        domain: domain.to_string(),
        record: record.clone(),
    });

    for m in &matches {
        info!(domain = %domain, rule = m.rule_index, "watchlist match");
        let _ = events.send(Event::Matched {
            domain: domain.to_string(),
            rule_index: m.rule_index,
            description: m.description.clone(),
            record: record.clone(),
        });
    }

    matches.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContactSet, Record};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct Scripted {
        rate_limited_first: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl LookupPort for Scripted {
        async fn lookup(&self, domain: &str, _cancel: CancellationToken) -> Outcome {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.rate_limited_first {
                return Outcome::RateLimited;
            }
            let mut record = Record::new(domain);
            record.registrant = Some(ContactSet {
                email: format!("owner@{}", domain),
                ..Default::default()
            });
            Outcome::Resolved(record)
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    fn config() -> WatchConfig {
        WatchConfig::default()
            .with_concurrency(2)
            .with_cooldown(Duration::ZERO)
            .with_pacing_seed(1)
    }

    async fn collect(
        dispatcher: &Dispatcher,
        domains: Vec<&str>,
    ) -> (RunSummary, Vec<Event>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let input = futures::stream::iter(domains.into_iter().map(String::from));
        let summary = dispatcher.run(input, tx).await;
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (summary, events)
    }

    #[tokio::test]
    async fn test_invalid_and_blank_input() {
        let lookup = Arc::new(Scripted {
            rate_limited_first: 0,
            calls: AtomicU32::new(0),
        });
        let dispatcher = Dispatcher::new(lookup.clone(), Arc::default(), config());

        let (summary, events) = collect(&dispatcher, vec!["  ", "Example.COM", "not a domain"]).await;
        assert_eq!(summary.submitted, 2);
        assert_eq!(summary.resolved, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
        assert!(events.iter().any(
            |e| matches!(e, Event::Resolved { domain, .. } if domain == "example.com")
        ));
    }

    #[tokio::test]
    async fn test_rate_limited_domain_recovers_in_drain() {
        let lookup = Arc::new(Scripted {
            rate_limited_first: 1,
            calls: AtomicU32::new(0),
        });
        let dispatcher = Dispatcher::new(lookup.clone(), Arc::default(), config());

        let (summary, events) = collect(&dispatcher, vec!["slow.com"]).await;
        assert_eq!(summary.deferred, 1);
        assert_eq!(summary.resolved, 1);
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 2);
        assert!(matches!(&events[0], Event::Notice { message }
            if message == "Processing a total of 1 rate limited domains, sleeping for 0 seconds"));
    }
}
