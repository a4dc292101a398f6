//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (id, drain tracking)
//!     → head.rs (read the request head)
//!     → upgrade?  yes → WebSocket gateway (raw socket)
//!                 no  → rewind.rs replays the head → hyper / axum
//! ```

pub mod connection;
pub mod head;
pub mod listener;
pub mod rewind;
