//! tunnel-panda: an authenticated HTTP/WebSocket gateway in front of an
//! Ollama-compatible inference server and a vector database.

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod websocket;

// Collaborators
pub mod store;
pub mod upstream;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use websocket::WebSocketGateway;
