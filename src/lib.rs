//! # Steward Core - Host Management Daemon
//!
//! Rust implementation of the steward daemon providing:
//! - A tool dispatcher with typed argument validation and per-tool config
//! - A TTL result cache with single-flight computation and LRU eviction
//! - Host/Docker/Plex providers behind one trait
//! - Log tailing with pattern classification and repeat coalescing
//! - Hysteresis-based health evaluation of sampled host metrics
//! - A maintenance scheduler with overlap-free background tasks
//!
//! ## Architecture
//!
//! Every request flows through the dispatcher; background loops feed the
//! state the tools read:
//! ```text
//!                    ┌─────────────────────────────────┐
//!   HTTP /invoke  →  │        ToolDispatcher           │
//!                    │   validate → cache → handler    │
//!                    │  ┌─────────┐ ┌────────────────┐ │
//!                    │  │ Health  │ │  LogAnalyzer   │ │
//!                    │  │ Monitor │ │  (tail loops)  │ │
//!                    │  └─────────┘ └────────────────┘ │
//!                    │  ┌─────────┐ ┌────────────────┐ │
//!                    │  │Providers│ │  Maintenance   │ │
//!                    │  │host/dkr/│ │   Scheduler    │ │
//!                    │  │  plex   │ │                │ │
//!                    │  └─────────┘ └────────────────┘ │
//!                    └─────────────────────────────────┘
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

// Re-export public API
pub mod cache;
pub mod daemon;
pub mod health;
pub mod logs;
pub mod maintenance;
pub mod providers;
pub mod server;
pub mod tools;
pub mod types;

// Internal utilities
pub mod observability;

pub use types::{Config, Error, Result};
