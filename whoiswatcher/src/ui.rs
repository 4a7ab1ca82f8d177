//! Output rendering for the whoiswatcher CLI.
//!
//! Result lines are JSON and go to stdout; everything meant for a human
//! (the closing summary) goes to stderr so stdout stays machine readable.

use console::{style, Term};
use whoiswatcher_lib::{ContactField, Event, NormalizedRecord, Role, RunSummary};

/// Renders run events as they arrive.
#[derive(Debug, Clone, Default)]
pub struct Printer {
    /// Print every resolved record, not only matches
    pub verbose: bool,
    /// Contact fields to project from every resolved record
    pub fields: Vec<ContactField>,
}

impl Printer {
    pub fn new(verbose: bool, fields: Vec<ContactField>) -> Self {
        Self { verbose, fields }
    }

    /// Print one event to stdout.
    pub fn print(&self, event: &Event) {
        for line in self.render(event) {
            println!("{}", line);
        }
    }

    /// The stdout lines for one event.
    pub fn render(&self, event: &Event) -> Vec<String> {
        let mut lines = Vec::new();

        if let Event::Resolved { record, .. } = event {
            if self.verbose {
                lines.extend(json_line(event));
            }
            lines.extend(project(record, &self.fields));
            return lines;
        }

        lines.extend(json_line(event));
        lines
    }
}

fn json_line(event: &Event) -> Option<String> {
    match event.to_json_line() {
        Ok(line) => Some(line),
        Err(e) => {
            tracing::warn!(error = %e, "could not serialize event");
            None
        }
    }
}

/// `"<Role> <Field>: <value>"` for every requested field and all four roles.
pub fn project(record: &NormalizedRecord, fields: &[ContactField]) -> Vec<String> {
    fields
        .iter()
        .flat_map(|&field| {
            Role::ALL.iter().map(move |&role| {
                format!(
                    "{} {}: {}",
                    role.label(),
                    field.label(),
                    record.contact(role).field(field)
                )
            })
        })
        .collect()
}

/// Print the end-of-run counters to stderr.
pub fn print_summary(summary: &RunSummary) {
    let term = Term::stderr();
    let matched = if summary.matched > 0 {
        style(format!("{} matched", summary.matched)).green().bold()
    } else {
        style(format!("{} matched", summary.matched)).dim()
    };

    let mut parts = vec![
        format!("{} domains", summary.submitted),
        format!("{} resolved", summary.resolved),
        matched.to_string(),
    ];
    if summary.deferred > 0 {
        parts.push(style(format!("{} deferred", summary.deferred)).yellow().to_string());
    }
    if summary.timed_out > 0 {
        parts.push(style(format!("{} timed out", summary.timed_out)).red().to_string());
    }
    if summary.failed > 0 {
        parts.push(style(format!("{} failed", summary.failed)).red().to_string());
    }
    if summary.skipped > 0 {
        parts.push(format!("{} skipped", summary.skipped));
    }

    let _ = term.write_line(&format!(
        "{} {}",
        style("whoiswatcher").bold(),
        style(parts.join(", ")).dim()
    ));
}
