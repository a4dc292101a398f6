//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection (head already read by server.rs)
//!     → request.rs (request id)
//!     → rate limit → middleware/auth.rs
//!     → routes/
//!         ollama.rs   → upstream pass-through (streamed where the upstream streams)
//!         db.rs       → VectorStore, ingestion events
//!         health.rs   → /status, /health
//!         internal.rs → limiter and connection counters
//!     → error.rs (JSON error bodies)
//! ```

pub mod error;
pub mod middleware;
pub mod request;
pub mod routes;
pub mod server;
pub mod state;

pub use request::X_REQUEST_ID;
pub use server::{HttpServer, ServerError};
pub use state::AppState;
