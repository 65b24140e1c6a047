//! Provisioning and deletion workflows.
//!
//! [`NasProvisioner`] drives the ordered backend sequences that turn a
//! [`ProvisionRequest`] into a mountable [`VolumeRecord`] and tear one down
//! again.  Both operations are single-shot: the host's reconciliation loop
//! owns retry scheduling and may invoke them concurrently for different
//! requests.

use std::collections::HashMap;
use std::future::Future;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use libnas::{BackendError, StorageBackend};

use crate::config::ProvisionerConfig;
use crate::error::ProvisionError;
use crate::identity::ProvisionerIdentity;
use crate::naming::backend_volume_name;
use crate::types::{ProvisionRequest, VolumeRecord};

/// Storage-class parameter carrying comma-separated NFS mount options.
/// Matched case-insensitively; the only parameter this provisioner accepts.
const PARAM_MOUNT_OPTIONS: &str = "mountoptions";

/// Mode for freshly prepared mount directories.  The orchestrator mounts
/// into them under arbitrary uids, so they must be world-writable.
const MOUNT_PATH_MODE: u32 = 0o777;

/// Capability surface the host scheduler drives.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Provision the volume described by `request` and return its record.
    async fn provision(
        &self,
        request: ProvisionRequest,
        cancel: &CancellationToken,
    ) -> Result<VolumeRecord, ProvisionError>;

    /// Tear down the volume described by `record`.
    ///
    /// Errors for which [`ProvisionError::is_ignorable`] holds mean the
    /// record is not this provisioner's responsibility; the caller must not
    /// retry them.
    async fn delete(
        &self,
        record: &VolumeRecord,
        cancel: &CancellationToken,
    ) -> Result<(), ProvisionError>;
}

/// NAS-backed implementation of [`Provisioner`].
pub struct NasProvisioner {
    identity: ProvisionerIdentity,
    config: ProvisionerConfig,
    backend: Arc<dyn StorageBackend>,
}

impl NasProvisioner {
    /// Build a provisioner over `backend`, deriving the process identity
    /// from the configured server address.
    pub fn new(config: ProvisionerConfig, backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            identity: ProvisionerIdentity::from_server(&config.server),
            config,
            backend,
        }
    }

    /// Ownership tag written into every record this provisioner creates.
    pub fn identity(&self) -> &ProvisionerIdentity {
        &self.identity
    }
}

/// Race a backend call against the caller's cancellation signal.
///
/// `biased` polls the token first, so a cancelled caller never reaches the
/// backend: the call future is dropped unpolled and the workflow stops at
/// the current step.
async fn guarded<T>(
    cancel: &CancellationToken,
    call: impl Future<Output = Result<T, BackendError>>,
) -> Result<T, ProvisionError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProvisionError::Cancelled),
        result = call => result.map_err(ProvisionError::from),
    }
}

/// Create `path` with permissions that let the orchestrator mount into it.
/// Creating an already-existing directory is not an error.
async fn prepare_mount_path(path: &Path) -> Result<(), ProvisionError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| ProvisionError::MountPath {
            path: path.to_owned(),
            source: e,
        })?;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(MOUNT_PATH_MODE))
        .await
        .map_err(|e| ProvisionError::MountPath {
            path: path.to_owned(),
            source: e,
        })?;
    Ok(())
}

/// Validate the storage-class parameters and return the mount options.
///
/// Only [`PARAM_MOUNT_OPTIONS`] is recognized; any other key is a
/// configuration error in the storage class.
fn parse_parameters(parameters: &HashMap<String, String>) -> Result<Vec<String>, ProvisionError> {
    let mut mount_options = Vec::new();
    for (key, value) in parameters {
        if key.eq_ignore_ascii_case(PARAM_MOUNT_OPTIONS) {
            mount_options = value.split(',').map(str::to_owned).collect();
        } else {
            return Err(ProvisionError::InvalidParameter(key.clone()));
        }
    }
    Ok(mount_options)
}

#[async_trait]
impl Provisioner for NasProvisioner {
    #[instrument(
        skip(self, request, cancel),
        fields(
            namespace = %request.namespace,
            claim = %request.claim_name,
            resource = %request.resource_name,
        )
    )]
    async fn provision(
        &self,
        request: ProvisionRequest,
        cancel: &CancellationToken,
    ) -> Result<VolumeRecord, ProvisionError> {
        let volume_name = backend_volume_name(
            &request.namespace,
            &request.claim_name,
            &request.resource_name,
        );
        let mount_path = self.config.volume_root.join(&volume_name);

        info!(volume = %volume_name, capacity = request.capacity_bytes, "creating volume");
        let volume = guarded(cancel, self.backend.create_volume(&volume_name)).await?;
        debug!(path = %volume.path, "volume created");

        if self.config.quota_enable {
            // A quota needs a size; an unbounded volume behind a quota
            // policy would defeat the policy.
            if request.capacity_bytes == 0 {
                return Err(ProvisionError::QuotaWithoutCapacity);
            }
            match guarded(
                cancel,
                self.backend.set_quota_size(&volume_name, request.capacity_bytes),
            )
            .await
            {
                Ok(()) => {
                    info!(volume = %volume_name, size = request.capacity_bytes, "quota set");
                }
                Err(e @ ProvisionError::Cancelled) => return Err(e),
                // Accepted risk: the volume stays usable but unbounded.
                Err(e) => warn!(
                    volume = %volume_name,
                    size = request.capacity_bytes,
                    error = %e,
                    "failed to set quota, continuing without one",
                ),
            }
        }

        let export_id = if self.config.exports_enable {
            let export = guarded(cancel, self.backend.export_volume(&volume_name)).await?;
            info!(volume = %volume_name, export = export.id, "export published");
            Some(export.id)
        } else {
            None
        };

        prepare_mount_path(&mount_path).await?;

        let mount_options = match parse_parameters(&request.parameters) {
            Ok(options) => options,
            Err(e) => {
                // No compensating delete: the volume created above stays on
                // the backend for manual cleanup.
                warn!(
                    volume = %volume_name,
                    error = %e,
                    "parameter validation failed after volume creation, volume left on backend",
                );
                return Err(e);
            }
        };

        info!(volume = %volume_name, "volume provisioned");
        Ok(VolumeRecord {
            resource_name: request.resource_name,
            ownership_tag: Some(self.identity.as_str().to_owned()),
            backend_volume: Some(volume_name),
            export_id,
            mount_path,
            server: self.config.server.clone(),
            capacity_bytes: request.capacity_bytes,
            mount_options,
        })
    }

    #[instrument(skip(self, record, cancel), fields(resource = %record.resource_name))]
    async fn delete(
        &self,
        record: &VolumeRecord,
        cancel: &CancellationToken,
    ) -> Result<(), ProvisionError> {
        let Some(tag) = record.ownership_tag.as_deref() else {
            return Err(ProvisionError::MissingIdentity);
        };
        if !self.identity.matches(tag) {
            debug!(tag, "record owned by another provisioner, ignoring");
            return Err(ProvisionError::ForeignIdentity(tag.to_owned()));
        }
        let Some(volume_name) = record.backend_volume.as_deref() else {
            return Err(ProvisionError::MissingVolume);
        };

        info!(volume = %volume_name, "removing volume");

        // Teardown runs in the reverse of the creation order: export first,
        // then quota, then the volume itself.  Some backends refuse to
        // delete a volume that is still exported.
        if self.config.exports_enable {
            guarded(cancel, self.backend.unexport(volume_name)).await?;
            debug!(volume = %volume_name, "export removed");
        }

        if self.config.quota_enable
            && let Some(quota) = guarded(cancel, self.backend.get_quota(volume_name)).await?
        {
            debug!(volume = %volume_name, size = quota.hard_threshold_bytes, "clearing quota");
            guarded(cancel, self.backend.clear_quota(volume_name)).await?;
        }

        guarded(cancel, self.backend.delete_volume(volume_name)).await?;
        info!(volume = %volume_name, "volume removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::PathBuf;

    use libnas::{BackendOp, MemoryBackend};

    use crate::config::Credentials;

    const SERVER: &str = "nas-01.example.com";
    const VOLUME: &str = "team-a-claim1-pv-0001";

    fn config(root: &Path, quota: bool, exports: bool) -> ProvisionerConfig {
        ProvisionerConfig {
            server: SERVER.into(),
            volume_root: root.to_owned(),
            access_root: "/export/volumes".into(),
            credentials: Credentials {
                user: "svc-provisioner".into(),
                password: "hunter2".into(),
                group: "storage".into(),
            },
            quota_enable: quota,
            exports_enable: exports,
        }
    }

    fn request(capacity: u64) -> ProvisionRequest {
        ProvisionRequest {
            namespace: "team-a".into(),
            claim_name: "claim1".into(),
            resource_name: "pv-0001".into(),
            capacity_bytes: capacity,
            parameters: HashMap::new(),
        }
    }

    fn harness(root: &Path, quota: bool, exports: bool) -> (Arc<MemoryBackend>, NasProvisioner) {
        let backend = Arc::new(MemoryBackend::new("/export/volumes"));
        let provisioner = NasProvisioner::new(config(root, quota, exports), backend.clone());
        (backend, provisioner)
    }

    #[tokio::test]
    async fn provision_basic() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, provisioner) = harness(tmp.path(), false, false);
        let cancel = CancellationToken::new();

        let record = provisioner.provision(request(0), &cancel).await.unwrap();

        assert_eq!(record.backend_volume.as_deref(), Some(VOLUME));
        assert_eq!(record.ownership_tag.as_deref(), Some(SERVER));
        assert_eq!(record.server, SERVER);
        assert_eq!(record.mount_path, tmp.path().join(VOLUME));
        assert!(record.mount_path.is_dir());
        assert!(record.export_id.is_none());
        assert!(record.mount_options.is_empty());
        assert_eq!(backend.operations(), vec![BackendOp::CreateVolume]);
    }

    #[tokio::test]
    async fn provision_quota_without_capacity_is_policy_violation() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, provisioner) = harness(tmp.path(), true, false);
        let cancel = CancellationToken::new();

        let err = provisioner.provision(request(0), &cancel).await.unwrap_err();

        assert!(matches!(err, ProvisionError::QuotaWithoutCapacity));
        assert!(!err.is_ignorable());
        assert!(!err.is_retryable());
        // The volume was created before the policy check; no quota call and
        // no rollback.
        assert_eq!(backend.operations(), vec![BackendOp::CreateVolume]);
        assert!(backend.has_volume(VOLUME));
    }

    #[tokio::test]
    async fn provision_sets_quota() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, provisioner) = harness(tmp.path(), true, false);
        let cancel = CancellationToken::new();

        let record = provisioner
            .provision(request(1 << 30), &cancel)
            .await
            .unwrap();

        assert_eq!(record.capacity_bytes, 1 << 30);
        assert_eq!(
            backend.quota_of(VOLUME).unwrap().hard_threshold_bytes,
            1 << 30
        );
        assert_eq!(
            backend.operations(),
            vec![BackendOp::CreateVolume, BackendOp::SetQuotaSize]
        );
    }

    #[tokio::test]
    async fn provision_tolerates_quota_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, provisioner) = harness(tmp.path(), true, false);
        backend.fail_on(BackendOp::SetQuotaSize);
        let cancel = CancellationToken::new();

        let record = provisioner
            .provision(request(1 << 30), &cancel)
            .await
            .unwrap();

        // Provisioning continued without the quota.
        assert!(backend.quota_of(VOLUME).is_none());
        assert_eq!(record.backend_volume.as_deref(), Some(VOLUME));
        assert!(record.mount_path.is_dir());
    }

    #[tokio::test]
    async fn provision_aborts_on_export_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, provisioner) = harness(tmp.path(), false, true);
        backend.fail_on(BackendOp::ExportVolume);
        let cancel = CancellationToken::new();

        let err = provisioner.provision(request(0), &cancel).await.unwrap_err();

        assert!(matches!(err, ProvisionError::Backend(_)));
        assert!(err.is_retryable());
        // The workflow stopped before preparing the mount path.
        assert!(!tmp.path().join(VOLUME).exists());
    }

    #[tokio::test]
    async fn provision_publishes_export() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, provisioner) = harness(tmp.path(), false, true);
        let cancel = CancellationToken::new();

        let record = provisioner.provision(request(0), &cancel).await.unwrap();

        let export = backend.export_of(VOLUME).unwrap();
        assert_eq!(record.export_id, Some(export.id));
        assert_eq!(
            backend.operations(),
            vec![BackendOp::CreateVolume, BackendOp::ExportVolume]
        );
    }

    #[tokio::test]
    async fn provision_rejects_unknown_parameter() {
        let tmp = tempfile::tempdir().unwrap();
        // Both policies on: parameter validation fails independently of them.
        let (backend, provisioner) = harness(tmp.path(), true, true);
        let cancel = CancellationToken::new();

        let mut req = request(1 << 30);
        req.parameters.insert("foo".into(), "bar".into());
        let err = provisioner.provision(req, &cancel).await.unwrap_err();

        assert!(matches!(err, ProvisionError::InvalidParameter(ref key) if key == "foo"));
        assert!(!err.is_ignorable());
        assert!(!err.is_retryable());
        // The volume is orphaned on the backend, by design.
        assert!(backend.has_volume(VOLUME));
    }

    #[tokio::test]
    async fn provision_parses_mount_options() {
        let tmp = tempfile::tempdir().unwrap();
        let (_backend, provisioner) = harness(tmp.path(), false, false);
        let cancel = CancellationToken::new();

        let mut req = request(0);
        req.parameters
            .insert("mountOptions".into(), "nfsvers=3,hard".into());
        let record = provisioner.provision(req, &cancel).await.unwrap();

        assert_eq!(record.mount_options, vec!["nfsvers=3", "hard"]);
    }

    #[tokio::test]
    async fn provision_stops_on_cancelled_token() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, provisioner) = harness(tmp.path(), false, false);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = provisioner.provision(request(0), &cancel).await.unwrap_err();

        assert!(matches!(err, ProvisionError::Cancelled));
        assert!(backend.operations().is_empty());
    }

    fn record_for(provisioner: &NasProvisioner, volume: Option<&str>) -> VolumeRecord {
        VolumeRecord {
            resource_name: "pv-0001".into(),
            ownership_tag: Some(provisioner.identity().as_str().to_owned()),
            backend_volume: volume.map(str::to_owned),
            export_id: None,
            mount_path: PathBuf::from("/export/volumes").join(volume.unwrap_or_default()),
            server: SERVER.into(),
            capacity_bytes: 0,
            mount_options: Vec::new(),
        }
    }

    #[tokio::test]
    async fn delete_without_identity_is_ignorable() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, provisioner) = harness(tmp.path(), true, true);
        let cancel = CancellationToken::new();

        let mut record = record_for(&provisioner, Some(VOLUME));
        record.ownership_tag = None;
        let err = provisioner.delete(&record, &cancel).await.unwrap_err();

        assert!(matches!(err, ProvisionError::MissingIdentity));
        assert!(err.is_ignorable());
        assert!(backend.operations().is_empty());
    }

    #[tokio::test]
    async fn delete_foreign_record_is_ignorable() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, provisioner) = harness(tmp.path(), true, true);
        let cancel = CancellationToken::new();

        let mut record = record_for(&provisioner, Some(VOLUME));
        record.ownership_tag = Some("server-x".into());
        let err = provisioner.delete(&record, &cancel).await.unwrap_err();

        assert!(matches!(err, ProvisionError::ForeignIdentity(ref tag) if tag == "server-x"));
        assert!(err.is_ignorable());
        assert!(backend.operations().is_empty());
    }

    #[tokio::test]
    async fn delete_without_volume_name_is_ignorable() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, provisioner) = harness(tmp.path(), false, false);
        let cancel = CancellationToken::new();

        let record = record_for(&provisioner, None);
        let err = provisioner.delete(&record, &cancel).await.unwrap_err();

        assert!(matches!(err, ProvisionError::MissingVolume));
        assert!(err.is_ignorable());
        assert!(backend.operations().is_empty());
    }

    #[tokio::test]
    async fn delete_tears_down_in_reverse_order() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, provisioner) = harness(tmp.path(), true, true);
        let cancel = CancellationToken::new();

        let record = provisioner
            .provision(request(1 << 30), &cancel)
            .await
            .unwrap();
        backend.clear_journal();

        provisioner.delete(&record, &cancel).await.unwrap();

        assert_eq!(
            backend.operations(),
            vec![
                BackendOp::Unexport,
                BackendOp::GetQuota,
                BackendOp::ClearQuota,
                BackendOp::DeleteVolume,
            ]
        );
        assert!(!backend.has_volume(VOLUME));
    }

    #[tokio::test]
    async fn delete_skips_clear_when_no_quota_present() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Arc::new(MemoryBackend::new("/export/volumes"));

        // Provisioned without quota policy, deleted by an instance with the
        // policy on: same server, same identity.
        let plain = NasProvisioner::new(config(tmp.path(), false, false), backend.clone());
        let cancel = CancellationToken::new();
        let record = plain.provision(request(0), &cancel).await.unwrap();
        backend.clear_journal();

        let quota_aware = NasProvisioner::new(config(tmp.path(), true, false), backend.clone());
        quota_aware.delete(&record, &cancel).await.unwrap();

        assert_eq!(
            backend.operations(),
            vec![BackendOp::GetQuota, BackendOp::DeleteVolume]
        );
    }

    #[tokio::test]
    async fn delete_propagates_clear_quota_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, provisioner) = harness(tmp.path(), true, false);
        let cancel = CancellationToken::new();

        let record = provisioner
            .provision(request(1 << 30), &cancel)
            .await
            .unwrap();
        backend.clear_journal();
        backend.fail_on(BackendOp::ClearQuota);

        let err = provisioner.delete(&record, &cancel).await.unwrap_err();

        assert!(matches!(err, ProvisionError::Backend(_)));
        assert!(err.is_retryable());
        // The volume survived for the retry.
        assert!(backend.has_volume(VOLUME));
        assert_eq!(
            backend.operations(),
            vec![BackendOp::GetQuota, BackendOp::ClearQuota]
        );
    }

    #[tokio::test]
    async fn delete_propagates_unexport_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, provisioner) = harness(tmp.path(), false, true);
        let cancel = CancellationToken::new();

        let record = provisioner.provision(request(0), &cancel).await.unwrap();
        backend.clear_journal();
        backend.fail_on(BackendOp::Unexport);

        let err = provisioner.delete(&record, &cancel).await.unwrap_err();

        assert!(matches!(err, ProvisionError::Backend(_)));
        assert!(backend.has_volume(VOLUME));
        assert_eq!(backend.operations(), vec![BackendOp::Unexport]);
    }

    #[tokio::test]
    async fn delete_stops_on_cancelled_token() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, provisioner) = harness(tmp.path(), false, false);
        let cancel = CancellationToken::new();

        let record = provisioner.provision(request(0), &cancel).await.unwrap();
        backend.clear_journal();
        cancel.cancel();

        let err = provisioner.delete(&record, &cancel).await.unwrap_err();

        assert!(matches!(err, ProvisionError::Cancelled));
        assert!(backend.operations().is_empty());
        assert!(backend.has_volume(VOLUME));
    }
}
