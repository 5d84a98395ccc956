//! Log tailing, classification, and retention.

mod analyzer;
mod patterns;
mod tailer;
mod window;

pub use analyzer::{ErrorSummary, LogAnalyzer, RepeatedMessage};
pub use patterns::{dedup_hash, normalize_message, PatternSet};
pub use tailer::LogTailer;
pub use window::{LogEvent, LogWindow};
