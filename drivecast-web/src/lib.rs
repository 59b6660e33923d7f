//! Drivecast Web - HTTP surface for the streaming proxy
//!
//! Exposes `GET /stream/{id}` (and its `/api/stream/{id}` alias) plus JSON
//! health and stats endpoints, with CORS suited to browser media players.

pub mod error;
pub mod handlers;
pub mod server;

// Re-export main types
pub use error::ProxyError;
pub use server::{AppState, build_router, run_server};
