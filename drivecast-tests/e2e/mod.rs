//! End-to-end tests for Drivecast
//!
//! These tests drive complete client workflows over HTTP: credential
//! handling, range negotiation, relaying, and failure behavior.

#[path = "../harness.rs"]
mod harness;

mod streaming_workflow;
