//! Request handlers.

pub mod api;
pub mod stream;

pub use api::{api_health, api_stats};
pub use stream::{StreamQuery, extract_credential, stream_file};
