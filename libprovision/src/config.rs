//! Provisioner configuration.
//!
//! Configuration is read once at startup into an immutable
//! [`ProvisionerConfig`] that is passed by reference into the workflow
//! components; nothing reads the process environment after that.
//!
//! Environment variables:
//! - `NAS_SERVER`: appliance address.  Required; also the source of the
//!   provisioner identity.
//! - `NAS_ROOT`: filesystem root under which volumes are created.  Required.
//! - `NAS_ACCESS_ROOT`: API access point on the appliance.  Defaults to
//!   `NAS_ROOT`.
//! - `NAS_USER`, `NAS_PASSWORD`, `NAS_GROUP`: API credentials.  Required.
//! - `NAS_QUOTA_ENABLE`: set to `true` or `1` to attach a capacity quota to
//!   every new volume.  Defaults to disabled.
//! - `NAS_EXPORTS_ENABLE`: set to `true` or `1` to publish an NFS export for
//!   every new volume.  Defaults to disabled.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;
use tracing::info;

/// Fatal startup failure; the process must not proceed to serve requests.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required setting is absent or empty.
    #[error("required setting {0} is not set")]
    Missing(&'static str),
}

/// API credentials for the appliance.
#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    pub password: String,
    pub group: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("group", &self.group)
            .finish()
    }
}

/// Immutable provisioner configuration, constructed once at startup.
#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    /// Appliance address.  Doubles as the provisioner identity.
    pub server: String,
    /// Root under which backend volumes live; local mount paths are prepared
    /// under the same root.
    pub volume_root: PathBuf,
    /// API access point on the appliance.
    pub access_root: String,
    /// Credentials handed to the wire client.
    pub credentials: Credentials,
    /// Attach a capacity quota to every new volume.
    pub quota_enable: bool,
    /// Publish an NFS export for every new volume.
    pub exports_enable: bool,
}

impl ProvisionerConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary settings source.
    ///
    /// Empty values are treated the same as absent ones.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &'static str| lookup(key).filter(|v| !v.is_empty());
        let require = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let server = require("NAS_SERVER")?;
        let volume_root = require("NAS_ROOT")?;
        let access_root = get("NAS_ACCESS_ROOT").unwrap_or_else(|| volume_root.clone());
        let credentials = Credentials {
            user: require("NAS_USER")?,
            password: require("NAS_PASSWORD")?,
            group: require("NAS_GROUP")?,
        };

        Ok(Self {
            server,
            volume_root: PathBuf::from(volume_root),
            access_root,
            credentials,
            quota_enable: flag(get("NAS_QUOTA_ENABLE")),
            exports_enable: flag(get("NAS_EXPORTS_ENABLE")),
        })
    }

    /// HTTPS API endpoint the host hands to its wire client.
    pub fn endpoint(&self) -> String {
        format!("https://{}:8080", self.server)
    }

    /// Log the effective settings at startup.
    pub fn log_startup(&self) {
        info!(
            endpoint = %self.endpoint(),
            access_root = %self.access_root,
            "connecting to appliance"
        );
        if self.quota_enable {
            info!(path = %self.volume_root.display(), "quota support enabled");
        } else {
            info!("quota support disabled");
        }
        if self.exports_enable {
            info!(path = %self.volume_root.display(), "export support enabled");
        } else {
            info!("export support disabled");
        }
    }
}

fn flag(value: Option<String>) -> bool {
    value
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
