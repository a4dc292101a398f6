//! Hand-rolled WebSocket gateway.
//!
//! # Data Flow
//! ```text
//! upgrade request (raw socket, head already read)
//!     → gateway.rs (path, handshake headers, credentials, 101)
//!     → registry.rs (per-endpoint connection handles)
//!     → session.rs (one task per socket: frames in, Outbound out)
//!         chat   → chat.rs relay → ChatBackend stream → text frames
//!         status → status.rs snapshot + collection updates
//!
//! Background:
//!     liveness sweep   → ping / reap
//!
//! Ingestion (called from the write routes):
//!     apply_ingest → counters.rs → fan-out to status sessions
//! ```
//!
//! # Design Decisions
//! - Registries and counters belong to a gateway instance, not the process
//! - Only the session task writes to its socket; everyone else queues
//! - Pings bypass the outbound queue so a busy relay cannot starve them
//! - Fragmented messages are rejected, not reassembled

pub mod chat;
pub mod codec;
pub mod counters;
pub mod gateway;
pub mod handshake;
pub mod registry;
pub mod session;
pub mod status;

pub use counters::CollectionCounters;
pub use gateway::{SweepReport, WebSocketGateway};
pub use registry::EndpointKind;
