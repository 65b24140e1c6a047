//! Backend error types.
//!
//! All appliance failures are represented by the [`BackendError`] enum, which
//! derives [`thiserror::Error`] and implements [`Serialize`]/[`Deserialize`]
//! so wire clients can map transport payloads onto it directly.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for appliance operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone)]
pub enum BackendError {
    /// The named volume does not exist on the appliance.
    #[error("volume {0} not found")]
    VolumeNotFound(String),

    /// The named volume has no active export.
    #[error("no export found for volume {0}")]
    ExportNotFound(String),

    /// The appliance rejected or failed the API call.
    #[error("backend api error: {0}")]
    Api(String),
}

impl BackendError {
    /// Create a [`BackendError::Api`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn api<E: std::fmt::Display>(e: E) -> Self {
        Self::Api(e.to_string())
    }
}
