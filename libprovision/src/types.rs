//! Workflow data model: provisioning requests and volume records.
//!
//! [`ProvisionRequest`] is what the host's reconciliation loop hands to the
//! workflow for each new volume; [`VolumeRecord`] is the durable artifact the
//! workflow hands back, and the only input the deletion workflow accepts.
//! Both are [`Serialize`]/[`Deserialize`] so hosts can persist them in their
//! own resource objects.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A single provisioning request.  Immutable; one per volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvisionRequest {
    /// Namespace of the requesting claim.
    pub namespace: String,
    /// Name of the requesting claim.
    pub claim_name: String,
    /// Name assigned to the resource being provisioned, e.g. `pv-0001`.
    pub resource_name: String,
    /// Requested capacity in bytes; `0` means unspecified.
    #[serde(default)]
    pub capacity_bytes: u64,
    /// Storage-class parameters forwarded with the request.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

/// The durable output of a successful provision.
///
/// Created by the provisioning workflow, consumed read-only by the deletion
/// workflow.  `ownership_tag` and `backend_volume` are optional because
/// deletion must cope with records that lack them — such records are not
/// this provisioner's responsibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeRecord {
    /// Orchestrator-side resource name.
    pub resource_name: String,
    /// Identity of the provisioner that created this volume.
    #[serde(default)]
    pub ownership_tag: Option<String>,
    /// Backend volume name, used to address the volume on teardown.
    #[serde(default)]
    pub backend_volume: Option<String>,
    /// Export handle, when an export was published.
    #[serde(default)]
    pub export_id: Option<u64>,
    /// Local directory prepared for the orchestrator to mount into.
    pub mount_path: PathBuf,
    /// Appliance serving the volume.
    pub server: String,
    /// Provisioned capacity in bytes.
    pub capacity_bytes: u64,
    /// NFS mount options from the storage class, in request order.
    #[serde(default)]
    pub mount_options: Vec<String>,
}
