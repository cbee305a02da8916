//! Terminal rendering of queue snapshots.
//!
//! Pure presentation: takes a [`QueueSnapshot`] and draws one bar per
//! transfer on a terminal, or prints one line per status change otherwise.

use std::collections::HashMap;
use std::io::{self, IsTerminal};
use std::time::Duration;

use indicatif::{
    HumanBytes, MultiProgress, ProgressBar, ProgressDrawTarget, ProgressState, ProgressStyle,
};

use ferry_core::{QueueSnapshot, TransferId, TransferRecord, TransferStatus};

/// Snapshot renderer that picks terminal or plain output.
pub struct TransferProgress {
    inner: ProgressRender,
}

enum ProgressRender {
    Fancy(FancyProgress),
    Plain(PlainProgress),
}

impl TransferProgress {
    /// Create a renderer, auto-detecting terminal capability.
    pub fn new() -> Self {
        let inner = if io::stdout().is_terminal() {
            ProgressRender::Fancy(FancyProgress::new())
        } else {
            ProgressRender::Plain(PlainProgress::default())
        };
        Self { inner }
    }

    pub fn render(&mut self, snapshot: &QueueSnapshot) {
        match &mut self.inner {
            ProgressRender::Fancy(inner) => inner.render(snapshot),
            ProgressRender::Plain(inner) => inner.render(snapshot),
        }
    }

    /// Stop drawing. Bars for unfinished transfers are left as they are.
    pub fn finish(&mut self) {
        if let ProgressRender::Fancy(inner) = &mut self.inner {
            inner.finish();
        }
    }
}

impl Default for TransferProgress {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Fancy Terminal Progress (indicatif)
// ============================================================================

struct TransferBar {
    bar: ProgressBar,
    sized: bool,
    done: bool,
}

struct FancyProgress {
    multi: MultiProgress,
    bars: HashMap<TransferId, TransferBar>,
}

impl FancyProgress {
    fn new() -> Self {
        Self {
            multi: MultiProgress::with_draw_target(ProgressDrawTarget::stdout()),
            bars: HashMap::new(),
        }
    }

    fn render(&mut self, snapshot: &QueueSnapshot) {
        for record in &snapshot.transfers {
            let entry = self.bars.entry(record.id.clone()).or_insert_with(|| {
                let bar = self.multi.add(ProgressBar::new_spinner());
                bar.set_style(spinner_style());
                bar.enable_steady_tick(Duration::from_millis(120));
                TransferBar {
                    bar,
                    sized: false,
                    done: false,
                }
            });
            if entry.done {
                continue;
            }

            let label = label_for(record);
            if record.is_terminal() {
                entry.bar.set_style(finished_style());
                entry
                    .bar
                    .finish_with_message(format!("{label} {}", status_text(record)));
                entry.done = true;
                continue;
            }

            if let Some(total) = record.total_bytes.filter(|total| *total > 0) {
                if !entry.sized {
                    entry.bar.set_style(bar_style());
                    entry.sized = true;
                }
                entry.bar.set_length(total);
                entry.bar.set_position(record.downloaded_bytes.min(total));
            } else {
                entry.bar.set_position(record.downloaded_bytes);
            }

            let status = status_text(record);
            if status.is_empty() {
                entry.bar.set_message(label);
            } else {
                entry.bar.set_message(format!("{label} ({status})"));
            }
        }
    }

    fn finish(&self) {
        for entry in self.bars.values().filter(|entry| !entry.done) {
            entry.bar.abandon();
        }
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner} {msg} {bytes}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn finished_style() -> ProgressStyle {
    ProgressStyle::with_template("  {msg}").unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{spinner} {msg} {bar:28.cyan/blue} {human_bytes:>9} / {human_total:>9} ({percent:>3}%) @ {binary_bytes_per_sec} ETA {eta}",
    )
    .map(|style| {
        style
            .with_key("human_bytes", |state: &ProgressState, w: &mut dyn std::fmt::Write| {
                let _ = write!(w, "{}", HumanBytes(state.pos()));
            })
            .with_key("human_total", |state: &ProgressState, w: &mut dyn std::fmt::Write| {
                let value = state
                    .len()
                    .map_or_else(|| "?".to_string(), |len| HumanBytes(len).to_string());
                let _ = write!(w, "{value}");
            })
    })
    .unwrap_or_else(|_| ProgressStyle::default_bar())
}

// ============================================================================
// Plain Progress (non-terminal)
// ============================================================================

#[derive(Default)]
struct PlainProgress {
    last_status: HashMap<TransferId, TransferStatus>,
}

impl PlainProgress {
    fn render(&mut self, snapshot: &QueueSnapshot) {
        for line in self.changes(snapshot) {
            println!("{line}");
        }
    }

    /// One line per transfer whose status changed since the last snapshot.
    fn changes(&mut self, snapshot: &QueueSnapshot) -> Vec<String> {
        let mut lines = Vec::new();
        for record in &snapshot.transfers {
            if self.last_status.get(&record.id) == Some(&record.status) {
                continue;
            }
            self.last_status.insert(record.id.clone(), record.status);

            let status = status_text(record);
            let status = if status.is_empty() {
                "downloading".to_string()
            } else {
                status
            };
            lines.push(format!("{}: {status}", label_for(record)));
        }
        lines
    }
}

// ============================================================================
// Labels
// ============================================================================

/// Short name for a transfer: the locator's last path segment.
fn label_for(record: &TransferRecord) -> String {
    let trimmed = record.locator.split(['?', '#']).next().unwrap_or_default();
    let name = trimmed
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or(record.id.as_str());
    format_label(name)
}

fn format_label(raw: &str) -> String {
    const MAX_LABEL: usize = 40;
    if raw.chars().count() <= MAX_LABEL {
        return raw.to_string();
    }
    let mut buf: String = raw.chars().take(MAX_LABEL - 1).collect();
    buf.push('…');
    buf
}

/// Status suffix shown next to a transfer. Empty while downloading.
fn status_text(record: &TransferRecord) -> String {
    match record.status {
        TransferStatus::Downloading => String::new(),
        TransferStatus::Queued if record.retry_count > 0 => {
            format!("retry {} queued", record.retry_count)
        }
        TransferStatus::Queued => "queued".to_string(),
        TransferStatus::Paused => "paused".to_string(),
        TransferStatus::Completed => "done".to_string(),
        TransferStatus::Cancelled => "cancelled".to_string(),
        TransferStatus::Failed => format!(
            "failed: {}",
            record.last_error.as_deref().unwrap_or("unknown error")
        ),
    }
}
