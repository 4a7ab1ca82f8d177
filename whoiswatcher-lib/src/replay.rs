//! Replay of previously saved records.
//!
//! Each input line is one JSON record, either bare as printed in verbose
//! output or wrapped under `"record"` as printed for matches. Replay skips the lookup adapters entirely and feeds the
//! records straight into the rule engine, which makes it possible to try a
//! new watchlist against yesterday's results.

use crate::dispatcher::publish;
use crate::error::WatchError;
use crate::rules::TerminationPolicy;
use crate::types::{Event, Record, RunSummary};
use crate::watchlist::Watchlist;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

/// Evaluate every record read from `reader`.
///
/// Malformed lines and records without registrant data are skipped. Only
/// read errors abort the replay.
pub async fn replay<R>(
    reader: R,
    watchlist: &Watchlist,
    termination: TerminationPolicy,
    events: &UnboundedSender<Event>,
) -> Result<RunSummary, WatchError>
where
    R: AsyncBufRead + Unpin,
{
    let mut summary = RunSummary::default();
    let mut lines = reader.lines();
    let mut line_number = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        summary.submitted += 1;

        let record = match parse_line(line) {
            Ok(record) => record,
            Err(e) => {
                debug!(line = line_number, error = %e, "skipping malformed record");
                summary.skipped += 1;
                continue;
            }
        };

        if !record.has_registrant() || record.in_redemption_period() {
            debug!(line = line_number, domain = %record.domain.domain, "skipping record without registrant");
            summary.skipped += 1;
            continue;
        }

        let domain = record.domain.domain.to_lowercase();
        summary.resolved += 1;
        summary.matched += publish(watchlist, termination, &domain, record.normalize(), events);
    }

    info!(
        records = summary.submitted,
        matched = summary.matched,
        skipped = summary.skipped,
        "replay finished"
    );
    Ok(summary)
}

/// A match line carries the record under `"record"`; anything else is a
/// bare record.
fn parse_line(line: &str) -> Result<Record, serde_json::Error> {
    let mut value: serde_json::Value = serde_json::from_str(line)?;
    match value.get_mut("record") {
        Some(record) if record.is_object() => serde_json::from_value(record.take()),
        _ => serde_json::from_value(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContactSet;
    use crate::watchlist::{Clause, FieldKey, MatchMode, Rule};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_replay_matches_and_skips() {
        let input = concat!(
            r#"{"domain":{"domain":"evil.com","status":["ok"]},"registrant":{"email":"Alice@Example.com"}}"#,
            "\n",
            "not json\n",
            "\n",
            r#"{"domain":{"domain":"thin.com"},"registrar":{"name":"Registrar"}}"#,
            "\n",
            r#"{"domain":{"domain":"good.com"},"registrant":{"email":"bob@example.org"}}"#,
            "\n",
        );
        let watchlist = Watchlist::new(vec![Rule::Single(Clause::new(
            FieldKey::Email,
            MatchMode::Contains,
            "alice@",
        ))]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let summary = replay(input.as_bytes(), &watchlist, TerminationPolicy::default(), &tx)
            .await
            .unwrap();
        drop(tx);

        assert_eq!(summary.submitted, 4);
        assert_eq!(summary.resolved, 2);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.matched, 1);

        let mut matched = Vec::new();
        while let Some(event) = rx.recv().await {
            if let Event::Matched { domain, .. } = event {
                matched.push(domain);
            }
        }
        assert_eq!(matched, vec!["evil.com"]);
    }

    #[tokio::test]
    async fn test_replay_reads_back_match_lines() {
        let mut record = Record::new("Evil.com");
        record.registrant = Some(ContactSet {
            email: "alice@evil.com".to_string(),
            ..Default::default()
        });
        let line = Event::Matched {
            domain: "evil.com".to_string(),
            rule_index: 0,
            description: "Match on any email: alice@".to_string(),
            record: record.normalize(),
        }
        .to_json_line()
        .unwrap();
        let watchlist = Watchlist::new(vec![Rule::Single(Clause::new(
            FieldKey::Email,
            MatchMode::Contains,
            "alice@",
        ))]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let summary = replay(
            format!("{}\n", line).as_bytes(),
            &watchlist,
            TerminationPolicy::default(),
            &tx,
        )
        .await
        .unwrap();
        drop(tx);

        assert_eq!(summary.submitted, 1);
        assert_eq!(summary.resolved, 1);
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.matched, 1);

        let mut matched = Vec::new();
        while let Some(event) = rx.recv().await {
            if let Event::Matched { domain, record, .. } = event {
                assert_eq!(record.registrant.email, "alice@evil.com");
                matched.push(domain);
            }
        }
        assert_eq!(matched, vec!["evil.com"]);
    }
}
