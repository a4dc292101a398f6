//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Initialize subsystems → Start listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Close WebSockets → Drain → Exit
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listener
//! - Shutdown has timeout: forced exit after the grace period

pub mod shutdown;

pub use shutdown::{shutdown_signal, Shutdown};
