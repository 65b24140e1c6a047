//! In-process fake appliance.
//!
//! [`MemoryBackend`] implements [`StorageBackend`] entirely in memory.  It is
//! the test double for workflow code: every call is appended to a journal so
//! tests can assert exact operation sequences, and any operation can be made
//! to fail on demand via [`MemoryBackend::fail_on`].
//!
//! Like a real appliance, it refuses to delete a volume that is still
//! exported, so teardown-ordering mistakes surface as errors.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use tracing::debug;

use crate::client::StorageBackend;
use crate::error::BackendError;
use crate::types::{Export, Quota, Volume};

/// Identifies a [`StorageBackend`] operation in the call journal and the
/// failure-injection set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    CreateVolume,
    DeleteVolume,
    SetQuotaSize,
    GetQuota,
    ClearQuota,
    ExportVolume,
    Unexport,
}

/// In-memory fake of a NAS appliance.
///
/// All state is behind concurrent maps, so the fake can serve the same
/// concurrent call patterns a real backend would.
pub struct MemoryBackend {
    /// Appliance filesystem root under which volume paths are reported.
    root: String,
    volumes: DashMap<String, Volume>,
    quotas: DashMap<String, Quota>,
    exports: DashMap<String, Export>,
    next_export_id: AtomicU64,
    /// Operations forced to fail with an injected API error.
    failures: DashSet<BackendOp>,
    journal: Mutex<Vec<(BackendOp, String)>>,
}

impl MemoryBackend {
    /// Create an empty fake appliance rooted at `root`.
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            volumes: DashMap::new(),
            quotas: DashMap::new(),
            exports: DashMap::new(),
            next_export_id: AtomicU64::new(1),
            failures: DashSet::new(),
            journal: Mutex::new(Vec::new()),
        }
    }

    /// Make every subsequent call of `op` fail with an injected API error.
    /// The call is still recorded in the journal.
    pub fn fail_on(&self, op: BackendOp) {
        self.failures.insert(op);
    }

    /// Every call made so far, in order, with the volume name it addressed.
    pub fn journal(&self) -> Vec<(BackendOp, String)> {
        self.journal.lock().expect("journal poisoned").clone()
    }

    /// The operation kinds called so far, in order.
    pub fn operations(&self) -> Vec<BackendOp> {
        self.journal().into_iter().map(|(op, _)| op).collect()
    }

    /// Forget all recorded calls.  State (volumes, quotas, exports) is kept.
    pub fn clear_journal(&self) {
        self.journal.lock().expect("journal poisoned").clear();
    }

    /// Whether a volume with `name` currently exists.
    pub fn has_volume(&self, name: &str) -> bool {
        self.volumes.contains_key(name)
    }

    /// The quota currently attached to `name`, if any.
    pub fn quota_of(&self, name: &str) -> Option<Quota> {
        self.quotas.get(name).map(|q| q.clone())
    }

    /// The export currently published for `name`, if any.
    pub fn export_of(&self, name: &str) -> Option<Export> {
        self.exports.get(name).map(|e| e.clone())
    }

    fn enter(&self, op: BackendOp, name: &str) -> Result<(), BackendError> {
        self.journal
            .lock()
            .expect("journal poisoned")
            .push((op, name.to_owned()));
        if self.failures.contains(&op) {
            return Err(BackendError::Api(format!("injected {op:?} failure")));
        }
        Ok(())
    }

    fn volume_path(&self, name: &str) -> String {
        format!("{}/{}", self.root, name)
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn create_volume(&self, name: &str) -> Result<Volume, BackendError> {
        self.enter(BackendOp::CreateVolume, name)?;
        let volume = self
            .volumes
            .entry(name.to_owned())
            .or_insert_with(|| Volume {
                name: name.to_owned(),
                path: self.volume_path(name),
            })
            .clone();
        debug!(volume = name, "volume created");
        Ok(volume)
    }

    async fn delete_volume(&self, name: &str) -> Result<(), BackendError> {
        self.enter(BackendOp::DeleteVolume, name)?;
        if self.exports.contains_key(name) {
            return Err(BackendError::Api(format!(
                "volume {name} is still exported"
            )));
        }
        match self.volumes.remove(name) {
            Some(_) => {
                debug!(volume = name, "volume deleted");
                Ok(())
            }
            None => Err(BackendError::VolumeNotFound(name.to_owned())),
        }
    }

    async fn set_quota_size(&self, name: &str, size_bytes: u64) -> Result<(), BackendError> {
        self.enter(BackendOp::SetQuotaSize, name)?;
        if !self.volumes.contains_key(name) {
            return Err(BackendError::VolumeNotFound(name.to_owned()));
        }
        self.quotas.insert(
            name.to_owned(),
            Quota {
                volume: name.to_owned(),
                hard_threshold_bytes: size_bytes,
            },
        );
        Ok(())
    }

    async fn get_quota(&self, name: &str) -> Result<Option<Quota>, BackendError> {
        self.enter(BackendOp::GetQuota, name)?;
        Ok(self.quotas.get(name).map(|q| q.clone()))
    }

    async fn clear_quota(&self, name: &str) -> Result<(), BackendError> {
        self.enter(BackendOp::ClearQuota, name)?;
        match self.quotas.remove(name) {
            Some(_) => Ok(()),
            None => Err(BackendError::Api(format!("no quota on volume {name}"))),
        }
    }

    async fn export_volume(&self, name: &str) -> Result<Export, BackendError> {
        self.enter(BackendOp::ExportVolume, name)?;
        if !self.volumes.contains_key(name) {
            return Err(BackendError::VolumeNotFound(name.to_owned()));
        }
        let export = self
            .exports
            .entry(name.to_owned())
            .or_insert_with(|| Export {
                id: self.next_export_id.fetch_add(1, Ordering::Relaxed),
                path: self.volume_path(name),
            })
            .clone();
        Ok(export)
    }

    async fn unexport(&self, name: &str) -> Result<(), BackendError> {
        self.enter(BackendOp::Unexport, name)?;
        match self.exports.remove(name) {
            Some(_) => Ok(()),
            None => Err(BackendError::ExportNotFound(name.to_owned())),
        }
    }
}
