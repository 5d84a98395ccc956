//! Bounded per-source event retention with repeat coalescing.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::logs::patterns::dedup_hash;

/// A classified, retained log line. Immutable once created except for
/// `repeats` and `last_seen`, which advance when an identical message
/// arrives within the dedup window.
#[derive(Debug, Clone, Serialize)]
pub struct LogEvent {
    pub source_path: String,
    pub raw_line: String,
    /// The matched pattern; unmatched lines are dropped before storage.
    pub severity: String,
    pub dedup_hash: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub repeats: u32,
}

/// FIFO window of at most `max_lines` events for one source.
///
/// Insertion order is chronological and eviction never reorders what
/// remains; overflow drops the oldest event. Lossy by design: under
/// sustained volume, old evidence is sacrificed for recency.
#[derive(Debug)]
pub struct LogWindow {
    events: VecDeque<LogEvent>,
    max_lines: usize,
    dedup_window: chrono::Duration,
}

impl LogWindow {
    pub fn new(max_lines: usize, dedup_window: Duration) -> Self {
        Self {
            events: VecDeque::with_capacity(max_lines.min(1024)),
            max_lines: max_lines.max(1),
            dedup_window: chrono::Duration::from_std(dedup_window)
                .unwrap_or_else(|_| chrono::Duration::max_value()),
        }
    }

    /// Insert a classified line, coalescing a repeat of a message whose last
    /// occurrence is within the dedup window. Returns whether a new event
    /// was created.
    pub fn ingest(&mut self, source_path: &str, raw_line: &str, severity: &str, now: DateTime<Utc>) -> bool {
        let hash = dedup_hash(raw_line);

        // Scan newest-first: the duplicate, if any, is almost always recent.
        for event in self.events.iter_mut().rev() {
            if event.dedup_hash == hash && now - event.last_seen <= self.dedup_window {
                event.repeats = event.repeats.saturating_add(1);
                event.last_seen = now;
                return false;
            }
        }

        self.events.push_back(LogEvent {
            source_path: source_path.to_string(),
            raw_line: raw_line.to_string(),
            severity: severity.to_string(),
            dedup_hash: hash,
            first_seen: now,
            last_seen: now,
            repeats: 1,
        });
        if self.events.len() > self.max_lines {
            self.events.pop_front();
        }
        true
    }

    /// Events oldest-first.
    pub fn events(&self) -> impl Iterator<Item = &LogEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
