//! Coarse post-transfer size verification.
//!
//! Estimates in the catalog are advisory, so this is a sanity check against
//! truncated or error-page downloads, not an integrity guarantee.

use std::path::Path;

use tracing::debug;

use crate::transfer::TransferError;

/// Bytes per megabyte used for all size comparisons.
pub const BYTES_PER_MB: f64 = 1_048_576.0;

/// Default allowed relative deviation from the estimate.
pub const DEFAULT_TOLERANCE: f64 = 0.05;

/// Default absolute minimum size in megabytes.
pub const DEFAULT_MIN_SIZE_MB: f64 = 0.1;

/// Size-tolerance verifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntegrityVerifier {
    tolerance: f64,
    min_size_mb: f64,
}

impl Default for IntegrityVerifier {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            min_size_mb: DEFAULT_MIN_SIZE_MB,
        }
    }
}

impl IntegrityVerifier {
    /// Creates a verifier with explicit thresholds.
    #[must_use]
    pub fn new(tolerance: f64, min_size_mb: f64) -> Self {
        Self {
            tolerance,
            min_size_mb,
        }
    }

    /// Returns true when the file passes [`IntegrityVerifier::check`].
    pub async fn verify(&self, path: &Path, expected_size_mb: Option<f64>) -> bool {
        self.check(path, expected_size_mb).await.is_ok()
    }

    /// Checks the file at `path`, returning its size in bytes.
    ///
    /// Fails when the file is missing, smaller than the absolute floor, or,
    /// for a positive estimate, off by more than the relative tolerance.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Integrity`] describing the first failed rule.
    pub async fn check(
        &self,
        path: &Path,
        expected_size_mb: Option<f64>,
    ) -> Result<u64, TransferError> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|_| TransferError::integrity(path, "file does not exist"))?;
        if !metadata.is_file() {
            return Err(TransferError::integrity(path, "not a regular file"));
        }

        let bytes = metadata.len();
        #[allow(clippy::cast_precision_loss)]
        let actual_mb = bytes as f64 / BYTES_PER_MB;

        if let Some(expected) = expected_size_mb.filter(|e| *e > 0.0)
            && !self.within_tolerance(actual_mb, expected)
        {
            return Err(TransferError::integrity(
                path,
                format!(
                    "size {actual_mb:.2} MB deviates {:.1}% from estimate {expected:.2} MB",
                    relative_deviation(actual_mb, expected) * 100.0
                ),
            ));
        }

        if actual_mb < self.min_size_mb {
            return Err(TransferError::integrity(
                path,
                format!(
                    "size {actual_mb:.3} MB is below the {} MB minimum",
                    self.min_size_mb
                ),
            ));
        }

        debug!(path = %path.display(), actual_mb, "size verified");
        Ok(bytes)
    }

    /// Returns true when `actual_mb` is within tolerance of `expected_mb`.
    #[must_use]
    pub fn within_tolerance(&self, actual_mb: f64, expected_mb: f64) -> bool {
        relative_deviation(actual_mb, expected_mb) <= self.tolerance
    }
}

fn relative_deviation(actual: f64, expected: f64) -> f64 {
    (actual - expected).abs() / expected
}
