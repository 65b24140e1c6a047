//! Backend volume name derivation.

/// Separator joining the request fields into a backend volume name.
const SEPARATOR: &str = "-";

/// Derive the backend volume name for a provisioning request.
///
/// The name is the requesting namespace, the requesting claim name, and the
/// target resource name joined with [`SEPARATOR`].  The caller guarantees
/// the triple is globally unique, so the joined name is too; identical
/// inputs always map to the identical name.
pub fn backend_volume_name(namespace: &str, claim: &str, resource: &str) -> String {
    [namespace, claim, resource].join(SEPARATOR)
}
