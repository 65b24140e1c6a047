//! Workflow error types.
//!
//! [`ProvisionError`] covers every failure mode of the provisioning and
//! deletion workflows.  Callers dispatch on two classifications rather than
//! individual variants: [`is_ignorable`](ProvisionError::is_ignorable)
//! conditions must not be retried or alarmed on, while
//! [`is_retryable`](ProvisionError::is_retryable) failures are rescheduled at
//! the caller's discretion.  Everything else is a non-retryable
//! configuration problem.

use std::path::PathBuf;

use thiserror::Error;

use libnas::BackendError;

/// Unified error type for provisioning and deletion.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Quota policy is enabled but the request carried no capacity.
    #[error("no storage size requested and quotas enabled")]
    QuotaWithoutCapacity,

    /// The storage class carried a parameter this provisioner does not
    /// recognize.
    #[error("invalid parameter: {0:?}")]
    InvalidParameter(String),

    /// The record carries no ownership tag; nobody recognizable owns it.
    #[error("ownership tag not found on record")]
    MissingIdentity,

    /// The record belongs to another provisioner instance.
    #[error("record is owned by provisioner {0}, not this one")]
    ForeignIdentity(String),

    /// The record names no backend volume; there is nothing to delete.
    #[error("record names no backend volume")]
    MissingVolume,

    /// The appliance failed or refused an operation.  Returned unmodified.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Preparing the local mount directory failed.
    #[error("mount path {}: {}", .path.display(), .source)]
    MountPath {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The caller cancelled the operation; the workflow stopped at the
    /// current step.
    #[error("operation cancelled")]
    Cancelled,
}

impl ProvisionError {
    /// Conditions meaning "not this provisioner's responsibility".
    ///
    /// The caller must treat these as final: no retry, no alert.
    pub fn is_ignorable(&self) -> bool {
        matches!(
            self,
            Self::MissingIdentity | Self::ForeignIdentity(_) | Self::MissingVolume
        )
    }

    /// Transient failures the caller may retry on its own schedule.
    /// Cancellation counts: the operation never completed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Backend(_) | Self::MountPath { .. } | Self::Cancelled
        )
    }
}
