//! Diagnostic trail for field debugging
//!
//! Every component appends here. The export is meant to be handed to support
//! as-is, so its format is fixed: one line per entry, then a line naming the
//! build and platform.

use chrono::{DateTime, Local};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticEntry {
    pub timestamp: DateTime<Local>,
    pub event: String,
    pub detail: Option<String>,
}

impl std::fmt::Display for DiagnosticEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            single_line(&self.event)
        )?;
        if let Some(detail) = &self.detail {
            write!(f, ": {}", single_line(detail))?;
        }
        Ok(())
    }
}

/// Line breaks in peripheral or backend text would split an entry
fn single_line(text: &str) -> std::borrow::Cow<'_, str> {
    if text.contains(['\n', '\r']) {
        text.replace('\r', "\\r").replace('\n', "\\n").into()
    } else {
        text.into()
    }
}

/// Append-only, insertion-ordered event log. Lives as long as the session.
#[derive(Debug, Default)]
pub struct DiagnosticLog {
    entries: Vec<DiagnosticEntry>,
}

impl DiagnosticLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&mut self, event: impl Into<String>) {
        self.push(event.into(), None);
    }

    pub fn log_detail(&mut self, event: impl Into<String>, detail: impl Into<String>) {
        self.push(event.into(), Some(detail.into()));
    }

    fn push(&mut self, event: String, detail: Option<String>) {
        let entry = DiagnosticEntry {
            timestamp: Local::now(),
            event,
            detail,
        };
        log::debug!(target: "roombeacon::diagnostics", "{entry}");
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[DiagnosticEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render the report. Pure: repeated calls without new entries are identical.
    pub fn export(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&entry.to_string());
            out.push('\n');
        }
        out.push_str(&platform_line());
        out.push('\n');
        out
    }
}

fn platform_line() -> String {
    format!(
        "{} {} ({}/{})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_is_idempotent() {
        let mut log = DiagnosticLog::new();
        log.log("scan requested");
        log.log_detail("peripheral discovered", "RoomBeacon (-60 dBm)");

        let first = log.export();
        let second = log.export();
        assert_eq!(first, second);

        log.log("cancelled");
        assert_ne!(first, log.export());
    }

    #[test]
    fn export_format() {
        let mut log = DiagnosticLog::new();
        log.log("one");
        log.log_detail("two", "with detail");

        let report = log.export();
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("] one"));
        assert!(lines[1].ends_with("] two: with detail"));
        assert!(lines[2].starts_with("roombeacon-provision "));

        // [YYYY-MM-DD HH:MM:SS.mmm]
        let stamp = &lines[0][1..lines[0].find(']').unwrap()];
        assert_eq!(stamp.len(), 23);
        assert_eq!(&stamp[19..20], ".");
    }

    #[test]
    fn line_breaks_stay_inside_their_entry() {
        let mut log = DiagnosticLog::new();
        log.log_detail("status", "error:line one\r\nline two");
        log.log("multi\nline event");

        let report = log.export();
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with(r"] status: error:line one\r\nline two"));
        assert!(lines[1].ends_with(r"] multi\nline event"));
        // stored as received
        assert_eq!(log.entries()[0].detail.as_deref(), Some("error:line one\r\nline two"));
    }

    #[test]
    fn entries_keep_insertion_order() {
        let mut log = DiagnosticLog::new();
        for i in 0..5 {
            log.log(format!("event {i}"));
        }
        let events: Vec<_> = log.entries().iter().map(|e| e.event.as_str()).collect();
        assert_eq!(events, ["event 0", "event 1", "event 2", "event 3", "event 4"]);
    }

    #[test]
    fn empty_export_still_identifies_platform() {
        let log = DiagnosticLog::new();
        assert!(log.is_empty());
        assert_eq!(log.export().lines().count(), 1);
    }
}
