//! Drivecast Simulation - an in-process stand-in for a cloud drive upstream.
//!
//! Provides a Graph-shaped metadata endpoint and a range-honoring download
//! endpoint over deterministic content, with per-file fault injection for
//! exercising the proxy's failure paths.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use drivecast_sim::{SimulatedDrive, SimulatedDriveServer, demo_library};
//!
//! # async fn run() -> Result<(), drivecast_sim::SimError> {
//! let drive = Arc::new(SimulatedDrive::with_files("dev-token", demo_library(42)));
//! let server = SimulatedDriveServer::start_local(drive).await?;
//! println!("metadata at {}/me/drive/items/demo-mp4", server.base_url());
//! # Ok(())
//! # }
//! ```

pub mod content;
pub mod drive;
pub mod server;

pub use content::{SimulatedFile, demo_library};
pub use drive::{DriveStats, FaultPlan, SimulatedDrive};
pub use server::{DownloadWindow, SimError, SimulatedDriveServer, download_window, router};

/// Token accepted by the development-mode drive.
pub const DEV_TOKEN: &str = "dev-token";

/// Seed for the development-mode library.
pub const DEV_SEED: u64 = 42;
