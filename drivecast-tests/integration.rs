//! Integration tests for Drivecast
//!
//! Exercise the core components against the simulated drive over real
//! loopback HTTP, without the proxy's own HTTP front.

#[path = "harness.rs"]
mod harness;

#[path = "integration/proxy_relay.rs"]
mod proxy_relay;
#[path = "integration/resolver.rs"]
mod resolver;
