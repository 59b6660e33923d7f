//! Deterministic file content for the simulated drive.

use bytes::Bytes;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// One file stored in the simulated drive.
#[derive(Debug, Clone)]
pub struct SimulatedFile {
    /// Opaque drive item id
    pub id: String,
    /// Display name including extension
    pub name: String,
    /// Content type the drive reports in metadata
    pub mime_type: String,
    /// File bytes
    pub data: Bytes,
}

impl SimulatedFile {
    /// Creates a file with pseudo-random content derived from `seed`.
    ///
    /// The same id, size, and seed always produce identical bytes.
    pub fn generate(
        id: impl Into<String>,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        size: usize,
        seed: u64,
    ) -> Self {
        let mut data = vec![0u8; size];
        ChaCha8Rng::seed_from_u64(seed).fill_bytes(&mut data);

        Self {
            id: id.into(),
            name: name.into(),
            mime_type: mime_type.into(),
            data: Bytes::from(data),
        }
    }

    /// Creates a file from explicit bytes.
    pub fn from_bytes(
        id: impl Into<String>,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    /// File size in bytes.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Small media library for development mode.
///
/// Declared types mimic what cloud drives report: Matroska and AVI come
/// back as generic binary.
pub fn demo_library(seed: u64) -> Vec<SimulatedFile> {
    const MIB: usize = 1024 * 1024;

    vec![
        SimulatedFile::generate("demo-mkv", "Big Buck Bunny.mkv", "application/octet-stream", 24 * MIB, seed),
        SimulatedFile::generate("demo-mp4", "Sintel Trailer.mp4", "video/mp4", 8 * MIB, seed + 1),
        SimulatedFile::generate("demo-avi", "Elephants Dream.avi", "application/octet-stream", 4 * MIB, seed + 2),
        SimulatedFile::generate("demo-mp3", "Soundtrack.mp3", "audio/mpeg", 3 * MIB, seed + 3),
        SimulatedFile::generate("demo-txt", "README.txt", "text/plain", 2048, seed + 4),
    ]
}
