//! Provisioner identity.
//!
//! Multiple provisioner processes may share one appliance.  Each tags the
//! records it creates with its own identity and refuses to tear down records
//! carrying anyone else's.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Name under which the host registers this provisioner with its controller
/// framework, and which storage classes reference.
pub const PROVISIONER_NAME: &str = "example.com/nas";

/// Stable ownership tag for every record this process creates.
///
/// Derived once at startup from the backend server address and read-only
/// afterwards: written into records on creation, compared on deletion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProvisionerIdentity(String);

impl ProvisionerIdentity {
    /// Derive the identity from the configured appliance address.
    pub fn from_server(server: &str) -> Self {
        Self(server.to_owned())
    }

    /// The identity as the tag string written into records.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `tag` names this provisioner.
    pub fn matches(&self, tag: &str) -> bool {
        self.0 == tag
    }
}

impl fmt::Display for ProvisionerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
