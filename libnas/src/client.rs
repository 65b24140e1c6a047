//! Storage backend capability trait.
//!
//! [`StorageBackend`] is the seam between the provisioning workflow and the
//! appliance's wire client.  Implementations own transport, authentication,
//! and session handling; consumers hold an `Arc<dyn StorageBackend>` and see
//! only the operations below.

use async_trait::async_trait;

use crate::error::BackendError;
use crate::types::{Export, Quota, Volume};

/// Capability surface of the remote storage appliance.
///
/// All operations address volumes by their unique appliance-side name.
/// Implementations must be safe to share across concurrent callers; the
/// workflow never serializes its calls through a lock.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Create a volume directory on the appliance.
    async fn create_volume(&self, name: &str) -> Result<Volume, BackendError>;

    /// Delete a volume and its contents.
    async fn delete_volume(&self, name: &str) -> Result<(), BackendError>;

    /// Attach a hard capacity quota of `size_bytes` to the volume.
    async fn set_quota_size(&self, name: &str, size_bytes: u64) -> Result<(), BackendError>;

    /// Return the quota currently attached to the volume, if any.
    async fn get_quota(&self, name: &str) -> Result<Option<Quota>, BackendError>;

    /// Remove the quota attached to the volume.
    async fn clear_quota(&self, name: &str) -> Result<(), BackendError>;

    /// Publish an NFS export for the volume.
    async fn export_volume(&self, name: &str) -> Result<Export, BackendError>;

    /// Remove the volume's NFS export.
    async fn unexport(&self, name: &str) -> Result<(), BackendError>;
}
