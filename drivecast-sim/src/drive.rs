//! In-memory drive state: files, accepted tokens, faults, and counters.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::Serialize;

use crate::content::SimulatedFile;

/// Misbehavior injected for one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultPlan {
    /// Answer the metadata call with this status instead of the item
    pub metadata_status: Option<u16>,
    /// Leave the download URL out of the metadata
    pub omit_download_url: bool,
    /// Answer the download URL with this status and an empty body
    pub download_status: Option<u16>,
    /// Reply 200 with the full body even when a range was requested
    pub ignore_range: bool,
    /// Reset the download connection after this many body bytes
    pub drop_after: Option<u64>,
    /// Stop sending (without closing) after this many body bytes
    pub stall_after: Option<u64>,
}

impl FaultPlan {
    pub fn drop_after(bytes: u64) -> Self {
        Self {
            drop_after: Some(bytes),
            ..Default::default()
        }
    }

    pub fn stall_after(bytes: u64) -> Self {
        Self {
            stall_after: Some(bytes),
            ..Default::default()
        }
    }

    pub fn ignore_range() -> Self {
        Self {
            ignore_range: true,
            ..Default::default()
        }
    }

    pub fn download_status(status: u16) -> Self {
        Self {
            download_status: Some(status),
            ..Default::default()
        }
    }

    pub fn metadata_status(status: u16) -> Self {
        Self {
            metadata_status: Some(status),
            ..Default::default()
        }
    }
}

/// Request counters for the simulated drive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DriveStats {
    pub metadata_requests: u64,
    pub download_requests: u64,
    pub bytes_served: u64,
}

/// Simulated cloud drive.
///
/// Shared between the HTTP handlers and tests; tests add files and faults
/// while the server is running and read the counters afterwards.
#[derive(Debug, Default)]
pub struct SimulatedDrive {
    files: RwLock<HashMap<String, SimulatedFile>>,
    tokens: RwLock<HashSet<String>>,
    faults: RwLock<HashMap<String, FaultPlan>>,
    metadata_requests: AtomicU64,
    download_requests: AtomicU64,
    bytes_served: AtomicU64,
}

impl SimulatedDrive {
    /// Creates an empty drive that accepts no tokens.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a drive holding `files` and accepting `token`.
    pub fn with_files(token: &str, files: impl IntoIterator<Item = SimulatedFile>) -> Self {
        let drive = Self::new();
        drive.allow_token(token);
        for file in files {
            drive.add_file(file);
        }
        drive
    }

    /// Accepts `token` as a valid bearer credential.
    pub fn allow_token(&self, token: &str) {
        self.tokens.write().insert(token.to_string());
    }

    /// Whether `token` is accepted.
    pub fn is_authorized(&self, token: &str) -> bool {
        self.tokens.read().contains(token)
    }

    /// Adds or replaces a file.
    pub fn add_file(&self, file: SimulatedFile) {
        self.files.write().insert(file.id.clone(), file);
    }

    /// Looks up a file by id.
    pub fn file(&self, id: &str) -> Option<SimulatedFile> {
        self.files.read().get(id).cloned()
    }

    /// Installs a fault plan for one file.
    pub fn inject_fault(&self, id: &str, plan: FaultPlan) {
        self.faults.write().insert(id.to_string(), plan);
    }

    /// Removes any fault plan for one file.
    pub fn clear_fault(&self, id: &str) {
        self.faults.write().remove(id);
    }

    /// Fault plan for one file, or the default (no faults).
    pub fn fault(&self, id: &str) -> FaultPlan {
        self.faults.read().get(id).cloned().unwrap_or_default()
    }

    pub(crate) fn record_metadata_request(&self) {
        self.metadata_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_download_request(&self) {
        self.download_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_bytes_served(&self, bytes: u64) {
        self.bytes_served.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Current request counters.
    pub fn stats(&self) -> DriveStats {
        DriveStats {
            metadata_requests: self.metadata_requests.load(Ordering::Relaxed),
            download_requests: self.download_requests.load(Ordering::Relaxed),
            bytes_served: self.bytes_served.load(Ordering::Relaxed),
        }
    }
}
