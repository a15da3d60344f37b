//! Shared styling utilities for the CLI.

use console::Style;

use kfed_core::merge::Resolution;
use kfed_core::models::SyncResult;

/// Create a success-styled string (green with checkmark).
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Create an error-styled string (red with cross).
pub fn error(msg: &str) -> String {
    let style = Style::new().red();
    format!("{} {}", style.apply_to("✗"), msg)
}

/// Create a warning-styled string (yellow).
pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

/// Create a header-styled string (bold).
pub fn header(msg: &str) -> String {
    Style::new().bold().apply_to(msg).to_string()
}

pub fn dim(msg: &str) -> String {
    Style::new().dim().apply_to(msg).to_string()
}

/// One line per sync result: marker, status label, source name, detail.
pub fn sync_line(result: &SyncResult) -> String {
    use kfed_core::models::SyncOutcome;

    let lead = format!("{:<11} {:<20}", result.status_label(), result.source);
    match &result.outcome {
        SyncOutcome::Success {
            operation,
            commit,
            warning,
        } => {
            let sha = commit
                .as_ref()
                .map(|c| short_sha(&c.sha).to_string())
                .unwrap_or_else(|| "-".into());
            let line = success(&format!("{} {} @ {}", lead, operation, sha));
            match warning {
                Some(w) => format!("{}\n    {}", line, warn(w)),
                None => line,
            }
        }
        SyncOutcome::InProgress => warn(&format!("{} already syncing, skipped", lead)),
        SyncOutcome::Error { detail } => error(&format!("{} {}", lead, detail)),
    }
}

/// Colored label for a ledger resolution.
pub fn resolution(resolution: Resolution) -> String {
    let style = match resolution {
        Resolution::Replace => Style::new().blue(),
        Resolution::Keep => Style::new().dim(),
        Resolution::Merged => Style::new().green(),
        Resolution::Manual => Style::new().yellow().bold(),
    };
    style.apply_to(resolution.to_string()).to_string()
}

pub fn short_sha(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}

/// Human-readable byte count.
pub fn bytes(n: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = n as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
