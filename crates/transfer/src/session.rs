use std::path::{Path, PathBuf};

use genworker_protocol::{InitUploadRequest, ResourceId};

use crate::TransferError;

/// State of one file upload.
///
/// The content hash is fixed at construction. The confirmed offset only
/// moves forward and never passes `total_size`.
#[derive(Debug, Clone)]
pub struct TransferSession {
    path: PathBuf,
    resource: ResourceId,
    total_size: u64,
    sha256: String,
    confirmed: u64,
}

impl TransferSession {
    pub fn new(path: &Path, resource: ResourceId, total_size: u64, sha256: String) -> Self {
        Self {
            path: path.to_path_buf(),
            resource,
            total_size,
            sha256,
            confirmed: 0,
        }
    }

    /// Adopts the offset the remote reported at init.
    pub fn resume_at(&mut self, offset: u64) -> Result<(), TransferError> {
        self.check_range(offset)?;
        self.advance_to(offset)
    }

    /// Records the cumulative offset reported after an accepted chunk.
    ///
    /// The remote must have made progress.
    pub fn acknowledge(&mut self, reported: u64) -> Result<(), TransferError> {
        self.check_range(reported)?;
        if reported == self.confirmed {
            return Err(TransferError::NoProgress {
                offset: self.confirmed,
            });
        }
        self.advance_to(reported)
    }

    /// Moves to the offset named by an offset-conflict response.
    pub fn reseek(&mut self, expected: u64) -> Result<(), TransferError> {
        self.check_range(expected)?;
        self.advance_to(expected)
    }

    fn check_range(&self, offset: u64) -> Result<(), TransferError> {
        if offset > self.total_size {
            return Err(TransferError::OffsetOutOfRange {
                offset,
                total: self.total_size,
            });
        }
        Ok(())
    }

    fn advance_to(&mut self, offset: u64) -> Result<(), TransferError> {
        if offset < self.confirmed {
            return Err(TransferError::OffsetRegression {
                confirmed: self.confirmed,
                reported: offset,
            });
        }
        self.confirmed = offset;
        Ok(())
    }

    /// Request body shared by init and finalize.
    pub fn descriptor(&self) -> InitUploadRequest {
        InitUploadRequest {
            resource: self.resource.clone(),
            total_size: self.total_size,
            sha256: self.sha256.clone(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn resource(&self) -> &ResourceId {
        &self.resource
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    /// Bytes the remote has durably accepted.
    pub fn confirmed(&self) -> u64 {
        self.confirmed
    }

    pub fn remaining(&self) -> u64 {
        self.total_size - self.confirmed
    }

    pub fn is_complete(&self) -> bool {
        self.confirmed == self.total_size
    }
}
