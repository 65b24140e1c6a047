//! Backend data model: volumes, exports, and quotas.
//!
//! These descriptors mirror what the appliance reports for each object.  They
//! are all [`Serialize`]/[`Deserialize`] so callers can persist or forward
//! them as part of their own records.

use serde::{Deserialize, Serialize};

/// A volume as known to the appliance.
///
/// Returned by [`StorageBackend::create_volume`](crate::StorageBackend::create_volume);
/// afterwards the volume is addressed by `name` alone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Volume {
    /// Unique volume name on the appliance.
    pub name: String,
    /// Absolute path of the volume directory on the appliance filesystem.
    pub path: String,
}

/// A network export published for a volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Export {
    /// Appliance-assigned export identifier.
    pub id: u64,
    /// Exported path.
    pub path: String,
}

/// A capacity quota attached to a volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Quota {
    /// Volume the quota is attached to.
    pub volume: String,
    /// Hard capacity limit in bytes.
    pub hard_threshold_bytes: u64,
}
