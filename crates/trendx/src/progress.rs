// AI
//! 📊 progress.rs: "Are we there yet?" asks every bulk sync, every night, forever.
//!
//! 🚀 Answers the question "how many of the forty thousand have landed?" with a progress
//! bar and a table so comfy it has lumbar support. Counts documents, not bytes: the
//! pipeline knows exactly how many it has to write before the first chunk leaves.
//!
//! ⚠️ Watching this progress bar will not make it go faster. Science says no.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;

/// 🔢 "1000000" → "1,000,000". You're welcome, eyes.
pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ MM:SS, or HH:MM:SS when the run has gone on long enough to call your mom.
pub(crate) fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

/// 📊 Live counters for one Applied run, drawn onto an indicatif bar.
///
/// Uses a sliding 5-second window for docs/s so one slow chunk doesn't scare anyone.
pub(crate) struct ProgressMetrics {
    index_name: String,
    total_docs: u64,
    updated: u64,
    failed: u64,
    progress_bar: ProgressBar,
    rate_samples: VecDeque<(Instant, u64)>,
    start_time: Instant,
}

impl std::fmt::Debug for ProgressMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 ProgressBar is a diva and doesn't derive Debug
        f.debug_struct("ProgressMetrics")
            .field("index_name", &self.index_name)
            .field("total_docs", &self.total_docs)
            .field("updated", &self.updated)
            .field("failed", &self.failed)
            .finish()
    }
}

impl ProgressMetrics {
    /// 🚀 `visible = false` gives a hidden bar: same bookkeeping, nothing drawn. Cron jobs
    /// and CI logs don't want ANSI art.
    pub(crate) fn new(index_name: impl Into<String>, total_docs: u64, visible: bool) -> Self {
        let progress_bar = if visible {
            ProgressBar::new(total_docs)
        } else {
            ProgressBar::hidden()
        };
        match ProgressStyle::default_bar().template("{msg}\n| [{bar:40.cyan/blue}] {pos}/{len}") {
            Ok(style) => progress_bar.set_style(style.progress_chars("=>-")),
            // -- hardcoded template; if this ever fires, the default style is fine
            Err(e) => warn!("⚠️ Progress template rejected, keeping the default look: {e}"),
        }
        if !visible {
            progress_bar.set_length(total_docs);
        }

        let start_time = Instant::now();
        let mut rate_samples = VecDeque::new();
        rate_samples.push_back((start_time, 0u64));

        Self {
            index_name: index_name.into(),
            total_docs,
            updated: 0,
            failed: 0,
            progress_bar,
            rate_samples,
            start_time,
        }
    }

    /// 🔄 One chunk came back. Count it, redraw, move the bar.
    pub(crate) fn update(&mut self, updated: u64, failed: u64) {
        self.updated += updated;
        self.failed += failed;
        let docs_per_sec = self.calculate_rate();
        self.render(docs_per_sec);
        self.progress_bar.set_position(self.done());
    }

    pub(crate) fn done(&self) -> u64 {
        self.updated + self.failed
    }

    /// ✅ Ring the bell. We made it. (Or everything failed. Same bell.)
    pub(crate) fn finish(&self) {
        self.progress_bar.finish();
    }

    fn calculate_rate(&mut self) -> f64 {
        let now = Instant::now();
        let window = Duration::from_secs(5);
        while let Some(&(timestamp, _)) = self.rate_samples.front() {
            if now.duration_since(timestamp) > window {
                self.rate_samples.pop_front();
            } else {
                break;
            }
        }
        let done = self.done();
        self.rate_samples.push_back((now, done));

        match self.rate_samples.front() {
            Some(&(oldest_time, oldest_done)) => {
                let elapsed = now.duration_since(oldest_time).as_secs_f64();
                if elapsed > 0.0 {
                    done.saturating_sub(oldest_done) as f64 / elapsed
                } else {
                    0.0
                }
            }
            None => 0.0,
        }
    }

    /// 🎨 Two columns, right-aligned, no borders:
    /// ```text
    /// | index: <name>
    ///   <docs/s>       <done> / <total> Docs
    ///   <updated>      <failed>
    ///   <elapsed>      <remaining>
    /// ```
    fn render(&self, docs_per_sec: f64) {
        let done = self.done();
        let elapsed = self.start_time.elapsed();
        let remaining = if done > 0 && done < self.total_docs {
            // 🔮 linear extrapolation: assumes the future looks like the past
            let per_doc = elapsed.as_secs_f64() / done as f64;
            format_duration(Duration::from_secs_f64(
                per_doc * (self.total_docs - done) as f64,
            ))
        } else {
            "--:--".to_string()
        };

        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.add_row(vec![
            Cell::new(format!("{} Docs/s", format_number(docs_per_sec as u64)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!(
                "{} / {} Docs",
                format_number(done),
                format_number(self.total_docs)
            ))
            .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} updated", format_number(self.updated)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} failed", format_number(self.failed)))
                .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} elapsed", format_duration(elapsed)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{remaining} remaining")).set_alignment(CellAlignment::Right),
        ]);

        self.progress_bar
            .set_message(format!("index: {}\n{}", self.index_name, table));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_big_numbers_get_commas() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1_000), "1,000");
        assert_eq!(format_number(40_123_456), "40,123,456");
    }

    #[test]
    fn the_one_where_long_runs_grow_an_hours_column() {
        assert_eq!(format_duration(Duration::from_secs(65)), "01:05");
        assert_eq!(format_duration(Duration::from_secs(3_725)), "01:02:05");
    }

    #[test]
    fn the_one_where_a_hidden_bar_still_counts() {
        let mut progress = ProgressMetrics::new("skus", 1_000, false);
        progress.update(500, 0);
        progress.update(498, 2);
        assert_eq!(progress.done(), 1_000);
        assert_eq!(progress.failed, 2);
        progress.finish();
    }
}
