//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Non-streaming request to the upstream:
//!     → retries.rs (retry connection failures)
//!     → backoff.rs (exponential delay with jitter between attempts)
//! ```
//!
//! # Design Decisions
//! - Timeouts are enforced by the upstream client on every call
//! - Only idempotent GETs are retried; streaming relays never are
//! - Only connection-level failures are retried, never upstream status codes

pub mod backoff;
pub mod retries;
