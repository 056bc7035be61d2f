//! Renders dispatch events as a live status line.

use std::{io::Write, time::Duration};

use colored::Colorize;
use courier_delivery::{DispatchEvent, DispatchState, Observer};

/// `MM:SS`. Minutes keep counting past an hour.
#[must_use]
pub fn countdown(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// Writes progress to a terminal.
///
/// Progress and countdown overwrite one line in place with `\r`. Failures
/// get a line of their own as soon as they happen.
pub struct ConsoleReporter<W> {
    out: W,
    color: bool,
    /// Width of the line currently being overwritten.
    status_width: usize,
}

impl<W: Write> ConsoleReporter<W> {
    pub const fn new(out: W, color: bool) -> Self {
        Self {
            out,
            color,
            status_width: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn status(&mut self, line: &str) {
        let width = line.chars().count();
        let padding = self.status_width.saturating_sub(width);
        let _ = write!(self.out, "\r{line}{}", " ".repeat(padding));
        let _ = self.out.flush();
        self.status_width = width;
    }

    fn line(&mut self, line: &str) {
        if self.status_width > 0 {
            let _ = writeln!(self.out);
            self.status_width = 0;
        }
        let _ = writeln!(self.out, "{line}");
        let _ = self.out.flush();
    }

    fn paint(&self, text: &str, paint: fn(&str) -> colored::ColoredString) -> String {
        if self.color {
            paint(text).to_string()
        } else {
            text.to_string()
        }
    }
}

impl<W: Write> Observer for ConsoleReporter<W> {
    fn observe(&mut self, event: &DispatchEvent) {
        match event {
            DispatchEvent::Pending {
                total,
                already_delivered,
                exhausted,
            } => {
                let mut line = format!("{total} recipients pending, {already_delivered} already delivered");
                if *exhausted > 0 {
                    line.push_str(&format!(", {exhausted} skipped after too many failures"));
                }
                self.line(&line);
            }
            DispatchEvent::Progress {
                attempted,
                succeeded,
                total,
            } => {
                self.status(&format!(
                    "Sent {attempted}/{total}: {succeeded} delivered, {} failed, {} remaining",
                    attempted - succeeded,
                    total - attempted
                ));
            }
            DispatchEvent::SendFailed { email, reason } => {
                let line = format!("Failed to send to {email}: {reason}");
                let line = self.paint(&line, |s| s.red());
                self.line(&line);
            }
            DispatchEvent::PersistFailed { email, reason } => {
                let line = format!("Progress after {email} was not saved: {reason}");
                let line = self.paint(&line, |s| s.yellow());
                self.line(&line);
            }
            DispatchEvent::Countdown { remaining } => {
                self.status(&format!("{} before the next batch", countdown(*remaining)));
            }
            DispatchEvent::State(DispatchState::Sending) if self.status_width > 0 => {
                // Clear the finished countdown
                self.status("");
                let _ = write!(self.out, "\r");
            }
            DispatchEvent::State(_) => {}
            DispatchEvent::Finished(summary) => {
                let line = if summary.total_pending == 0 {
                    "Nothing to send, every recipient has already been delivered to".to_string()
                } else {
                    format!(
                        "Done: {}/{} delivered",
                        summary.succeeded, summary.total_pending
                    )
                };
                let line = self.paint(&line, |s| s.green());
                self.line(&line);
            }
        }
    }
}
