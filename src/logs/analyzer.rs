//! Log collection pipeline.
//!
//! A background loop tails the configured files, classifies each new line
//! against the pattern set, and retains matches in per-source windows.
//! Query methods (`snapshot`, `error_summary`, `search`) read the windows
//! and never touch the filesystem.

use std::collections::{BTreeMap, HashMap};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::RegexBuilder;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::logs::patterns::PatternSet;
use crate::logs::tailer::LogTailer;
use crate::logs::window::{LogEvent, LogWindow};
use crate::types::{Error, LogAnalysisConfig, Result};

const TOP_REPEATS: usize = 5;

/// Aggregated counts over events whose last occurrence falls inside a
/// recency window. All counts include coalesced repeats.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorSummary {
    pub window_seconds: u64,
    /// Distinct retained events in the window.
    pub total_events: usize,
    /// Occurrences including repeats.
    pub total_occurrences: u64,
    pub by_source: BTreeMap<String, u64>,
    pub by_pattern: BTreeMap<String, u64>,
    /// The most-repeated messages, largest first, capped at five.
    pub top_repeats: Vec<RepeatedMessage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepeatedMessage {
    pub message: String,
    pub source_path: String,
    pub severity: String,
    pub repeats: u32,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug)]
pub struct LogAnalyzer {
    config: LogAnalysisConfig,
    patterns: PatternSet,
    windows: Arc<RwLock<HashMap<String, LogWindow>>>,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
}

struct TailSlot {
    tailer: LogTailer,
    unreadable: bool,
}

impl LogAnalyzer {
    pub fn new(config: &LogAnalysisConfig) -> Self {
        Self {
            patterns: PatternSet::new(&config.error_patterns),
            windows: Arc::new(RwLock::new(HashMap::new())),
            stop_tx: Mutex::new(None),
            config: config.clone(),
        }
    }

    /// Spawn the tail loop over the configured watch paths. A source that
    /// cannot be read is warned about once and retried every poll; files
    /// that appear later are picked up from the start.
    pub fn start(&self) -> JoinHandle<()> {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        *lock(&self.stop_tx) = Some(stop_tx);

        let patterns = self.patterns.clone();
        let windows = self.windows.clone();
        let max_lines = self.config.max_lines;
        let dedup_window = self.config.dedup_window;
        let period = self.config.poll_interval;
        let mut slots: Vec<TailSlot> = self
            .config
            .watch_paths
            .iter()
            .map(|path| TailSlot {
                tailer: LogTailer::new(path.clone()),
                unreadable: false,
            })
            .collect();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for slot in &mut slots {
                            poll_slot(slot, &patterns, &windows, max_lines, dedup_window);
                        }
                    }
                    _ = &mut stop_rx => {
                        tracing::info!("log_analyzer_stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Signal the tail loop to exit.
    pub fn stop(&self) {
        if let Some(stop_tx) = lock(&self.stop_tx).take() {
            let _ = stop_tx.send(());
        }
    }

    /// Classify and retain a single line, exactly as the tail loop would.
    pub fn ingest(&self, source_path: &str, raw_line: &str) {
        ingest_lines(
            &self.patterns,
            &self.windows,
            self.config.max_lines,
            self.config.dedup_window,
            source_path,
            &[raw_line.to_string()],
        );
    }

    /// Retained events, newest first, optionally restricted to one source.
    pub fn snapshot(&self, source: Option<&str>, limit: usize) -> Vec<LogEvent> {
        let windows = read_windows(&self.windows);
        let mut events: Vec<LogEvent> = windows
            .iter()
            .filter(|(path, _)| source.map_or(true, |wanted| wanted == path.as_str()))
            .flat_map(|(_, window)| window.events().cloned())
            .collect();
        events.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        events.truncate(limit);
        events
    }

    /// Aggregate events seen within `window` of now.
    pub fn error_summary(&self, window: Duration) -> ErrorSummary {
        let span = chrono::Duration::from_std(window)
            .unwrap_or_else(|_| chrono::Duration::max_value());
        let cutoff = Utc::now()
            .checked_sub_signed(span)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut summary = ErrorSummary {
            window_seconds: window.as_secs(),
            total_events: 0,
            total_occurrences: 0,
            by_source: BTreeMap::new(),
            by_pattern: BTreeMap::new(),
            top_repeats: Vec::new(),
        };
        let mut repeated = Vec::new();

        let windows = read_windows(&self.windows);
        for (source, window) in windows.iter() {
            for event in window.events().filter(|e| e.last_seen >= cutoff) {
                let occurrences = u64::from(event.repeats);
                summary.total_events += 1;
                summary.total_occurrences += occurrences;
                *summary.by_source.entry(source.clone()).or_insert(0) += occurrences;
                *summary.by_pattern.entry(event.severity.clone()).or_insert(0) += occurrences;
                if event.repeats > 1 {
                    repeated.push(RepeatedMessage {
                        message: event.raw_line.clone(),
                        source_path: event.source_path.clone(),
                        severity: event.severity.clone(),
                        repeats: event.repeats,
                        last_seen: event.last_seen,
                    });
                }
            }
        }

        repeated.sort_by(|a, b| b.repeats.cmp(&a.repeats));
        repeated.truncate(TOP_REPEATS);
        summary.top_repeats = repeated;
        summary
    }

    /// Regex search across retained events, newest first.
    pub fn search(
        &self,
        query: &str,
        case_sensitive: bool,
        max_results: usize,
    ) -> Result<Vec<LogEvent>> {
        let regex = RegexBuilder::new(query)
            .case_insensitive(!case_sensitive)
            .build()
            .map_err(|err| Error::invalid_argument("query", err.to_string()))?;

        let windows = read_windows(&self.windows);
        let mut matches: Vec<LogEvent> = windows
            .values()
            .flat_map(|window| window.events())
            .filter(|event| regex.is_match(&event.raw_line))
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        matches.truncate(max_results);
        Ok(matches)
    }
}

fn poll_slot(
    slot: &mut TailSlot,
    patterns: &PatternSet,
    windows: &RwLock<HashMap<String, LogWindow>>,
    max_lines: usize,
    dedup_window: Duration,
) {
    let source = slot.tailer.path().display().to_string();
    match slot.tailer.poll() {
        Ok(lines) => {
            if slot.unreadable {
                info!(path = %source, "log_source_recovered");
                slot.unreadable = false;
            }
            ingest_lines(patterns, windows, max_lines, dedup_window, &source, &lines);
        }
        Err(err) => {
            if slot.unreadable {
                debug!(path = %source, error = %err, "log_source_still_unreadable");
            } else {
                warn!(path = %source, error = %err, "log_source_unreadable");
                slot.unreadable = true;
            }
        }
    }
}

fn ingest_lines(
    patterns: &PatternSet,
    windows: &RwLock<HashMap<String, LogWindow>>,
    max_lines: usize,
    dedup_window: Duration,
    source: &str,
    lines: &[String],
) {
    if lines.is_empty() {
        return;
    }
    let mut windows = write_windows(windows);
    for line in lines {
        let Some(severity) = patterns.classify(line) else {
            continue;
        };
        windows
            .entry(source.to_string())
            .or_insert_with(|| LogWindow::new(max_lines, dedup_window))
            .ingest(source, line, severity, Utc::now());
    }
}

fn lock<'a>(
    stop_tx: &'a Mutex<Option<oneshot::Sender<()>>>,
) -> MutexGuard<'a, Option<oneshot::Sender<()>>> {
    stop_tx.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read_windows(
    windows: &RwLock<HashMap<String, LogWindow>>,
) -> RwLockReadGuard<'_, HashMap<String, LogWindow>> {
    windows.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_windows(
    windows: &RwLock<HashMap<String, LogWindow>>,
) -> RwLockWriteGuard<'_, HashMap<String, LogWindow>> {
    windows.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tokio::time::{sleep, timeout};
    use tracing_test::traced_test;

    fn analyzer() -> LogAnalyzer {
        LogAnalyzer::new(&LogAnalysisConfig::default())
    }

    // Letter-only tags so message normalization cannot merge lines that
    // differ only in an embedded counter.
    fn tag(i: usize) -> String {
        [
            (b'a' + (i / 676) as u8) as char,
            (b'a' + ((i / 26) % 26) as u8) as char,
            (b'a' + (i % 26) as u8) as char,
        ]
        .iter()
        .collect()
    }

    #[test]
    fn test_retention_keeps_the_most_recent_events() {
        let analyzer = analyzer();
        for i in 0..2000 {
            analyzer.ingest("/var/log/syslog", &format!("error in unit {}", tag(i)));
        }
        let events = analyzer.snapshot(None, usize::MAX);
        assert_eq!(events.len(), 1000);
        let lines: Vec<&str> = events.iter().map(|e| e.raw_line.as_str()).collect();
        assert!(lines.contains(&format!("error in unit {}", tag(1999)).as_str()));
        assert!(!lines.contains(&format!("error in unit {}", tag(999)).as_str()));
    }

    #[test]
    fn test_lines_matching_no_pattern_are_dropped() {
        let analyzer = analyzer();
        analyzer.ingest("/var/log/syslog", "routine heartbeat ok");
        analyzer.ingest("/var/log/syslog", "session opened for user root");
        assert!(analyzer.snapshot(None, 10).is_empty());
    }

    #[test]
    fn test_first_configured_pattern_wins() {
        let analyzer = analyzer();
        analyzer.ingest("/var/log/syslog", "job failed with error 5");
        let events = analyzer.snapshot(None, 10);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, "error");
    }

    #[test]
    fn test_snapshot_filters_by_source() {
        let analyzer = analyzer();
        analyzer.ingest("/var/log/syslog", "error alpha");
        analyzer.ingest("/var/log/kern.log", "error beta");
        let events = analyzer.snapshot(Some("/var/log/kern.log"), 10);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].raw_line, "error beta");
    }

    #[test]
    fn test_error_summary_aggregates_by_source_and_pattern() {
        let analyzer = analyzer();
        for _ in 0..4 {
            analyzer.ingest("/var/log/syslog", "disk error on sda");
        }
        analyzer.ingest("/var/log/syslog", "mount failed for backup");
        analyzer.ingest("/var/log/kern.log", "thermal alert on core aa");

        let summary = analyzer.error_summary(Duration::from_secs(600));
        assert_eq!(summary.total_events, 3);
        assert_eq!(summary.total_occurrences, 6);
        assert_eq!(summary.by_source["/var/log/syslog"], 5);
        assert_eq!(summary.by_source["/var/log/kern.log"], 1);
        assert_eq!(summary.by_pattern["error"], 4);
        assert_eq!(summary.by_pattern["failed"], 1);
        assert_eq!(summary.by_pattern["alert"], 1);
        assert_eq!(summary.top_repeats.len(), 1);
        assert_eq!(summary.top_repeats[0].repeats, 4);
        assert_eq!(summary.top_repeats[0].message, "disk error on sda");
    }

    #[test]
    fn test_search_applies_regex_and_case() {
        let analyzer = analyzer();
        analyzer.ingest("/var/log/syslog", "ERROR in unit alpha");
        analyzer.ingest("/var/log/syslog", "error in unit beta");
        analyzer.ingest("/var/log/syslog", "failed in unit gamma");

        let hits = analyzer.search("unit (alpha|beta)", false, 10).unwrap();
        assert_eq!(hits.len(), 2);

        let hits = analyzer.search("ERROR", true, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].raw_line, "ERROR in unit alpha");

        let err = analyzer.search("(unclosed", false, 10).unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[tokio::test]
    async fn test_tail_loop_collects_appended_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "boot error alpha\n").unwrap();

        let config = LogAnalysisConfig {
            watch_paths: vec![path.clone()],
            poll_interval: Duration::from_millis(10),
            ..LogAnalysisConfig::default()
        };
        let analyzer = Arc::new(LogAnalyzer::new(&config));
        let handle = analyzer.start();

        sleep(Duration::from_millis(40)).await;
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap();
        writeln!(file, "mount failed for media").unwrap();
        drop(file);
        sleep(Duration::from_millis(60)).await;

        let events = analyzer.snapshot(None, 10);
        assert_eq!(events.len(), 2);

        analyzer.stop();
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }

    #[traced_test]
    #[tokio::test]
    async fn test_unreadable_source_warns_once_then_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("late.log");

        let config = LogAnalysisConfig {
            watch_paths: vec![path.clone()],
            poll_interval: Duration::from_millis(10),
            ..LogAnalysisConfig::default()
        };
        let analyzer = Arc::new(LogAnalyzer::new(&config));
        let handle = analyzer.start();
        sleep(Duration::from_millis(50)).await;

        std::fs::write(&path, "startup error omega\n").unwrap();
        sleep(Duration::from_millis(50)).await;

        analyzer.stop();
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();

        logs_assert(|lines: &[&str]| {
            let warns = lines
                .iter()
                .filter(|line| line.contains("log_source_unreadable"))
                .count();
            match warns {
                1 => Ok(()),
                n => Err(format!("expected one unreadable warning, saw {n}")),
            }
        });
        assert!(logs_contain("log_source_recovered"));
        assert_eq!(analyzer.snapshot(None, 10).len(), 1);
    }
}
