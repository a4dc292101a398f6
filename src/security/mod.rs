//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → rate_limit.rs (check per-IP limits)
//!     → auth.rs (Basic credentials + X-APP-TOKEN)
//!     → Pass to routes
//!
//! Upgrade request:
//!     → auth.rs (same check, called directly by the gateway)
//! ```
//!
//! # Design Decisions
//! - One credential check, two callers (middleware and raw upgrade)
//! - Fail closed: reject on any security check failure

pub mod auth;
pub mod rate_limit;

pub use auth::{check_credentials, AuthDecision};
pub use rate_limit::RateLimiter;
