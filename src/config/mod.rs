//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) + environment
//!     → loader.rs (parse, deserialize, env overrides)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → atomic swap of the live credentials
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; only credentials are hot-swapped
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::GatewayConfig;
pub use schema::{
    AuthConfig, DatabaseConfig, ListenerConfig, ObservabilityConfig, RateLimitConfig,
    UpstreamConfig, WebSocketConfig,
};
