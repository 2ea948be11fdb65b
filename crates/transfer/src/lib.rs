//! Resumable chunked upload with whole-file SHA-256 verification.
//!
//! One [`TransferClient`] call moves one local file to the backend store
//! through the init / chunk / final handshake. The remote byte offset is
//! authoritative: the local read position always follows it.

mod chunked;
mod client;
mod error;
mod session;

pub use chunked::{Chunk, ChunkReader, calculate_file_checksum, checksum_bytes, hash_file};
pub use client::{FinalizedUpload, TransferClient, TransferConfig, UploadEndpoints};
pub use error::{Phase, TransferError};
pub use session::TransferSession;

/// Default chunk size: 2 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 2 * 1024 * 1024;

/// Read buffer used when hashing whole files.
pub const HASH_BUFFER_SIZE: usize = 1024 * 1024;
