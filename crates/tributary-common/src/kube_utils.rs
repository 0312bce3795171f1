//! Shared Kubernetes utilities using kube-rs

use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, Patch, PatchParams};
use kube::discovery::ApiResource;
use kube::Client;

/// Maximum length of a Kubernetes object name that is also used as a label value
pub const MAX_NAME_LEN: usize = 63;

/// The "Available" condition type for deployments
pub const CONDITION_AVAILABLE: &str = "Available";
/// The "True" status value for conditions
pub const STATUS_TRUE: &str = "True";

// =============================================================================
// ApiResource building
// =============================================================================

/// Build an ApiResource from an apiVersion string and kind.
///
/// The plural is guessed from the kind with [`pluralize_kind`]. Used for
/// addressable sink objects, whose type is only known from the reference.
///
/// # Example
/// ```
/// use tributary_common::kube_utils::build_api_resource;
///
/// let ar = build_api_resource("eventing.knative.dev/v1", "Broker");
/// assert_eq!(ar.group, "eventing.knative.dev");
/// assert_eq!(ar.plural, "brokers");
/// ```
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Parse apiVersion into (group, version)
///
/// # Examples
/// ```
/// use tributary_common::kube_utils::parse_api_version;
///
/// let (group, version) = parse_api_version("apps/v1");
/// assert_eq!(group, "apps");
/// assert_eq!(version, "v1");
///
/// let (group, version) = parse_api_version("v1");
/// assert_eq!(group, "");
/// assert_eq!(version, "v1");
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Kinds whose plural does not follow the simple English rules below
const KIND_PLURALS: &[(&str, &str)] = &[
    ("endpoints", "endpoints"),
    ("podsecuritypolicy", "podsecuritypolicies"),
];

/// Pluralize a Kubernetes resource kind
///
/// Uses a lookup table for irregular kinds, falling back to the same guess
/// the API machinery makes for unregistered types.
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    for (singular, plural) in KIND_PLURALS {
        if *singular == lower {
            return (*plural).to_string();
        }
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

// =============================================================================
// Naming
// =============================================================================

/// Compute a deterministic hash of the input string, returning a 16-char hex digest.
///
/// Uses truncated SHA-256 for stability across Rust toolchain versions.
/// `DefaultHasher` is NOT guaranteed stable across Rust releases, so this
/// function should be used whenever the hash is persisted (e.g., object names).
pub fn deterministic_hash(input: &str) -> String {
    use aws_lc_rs::digest;
    let hash = digest::digest(&digest::SHA256, input.as_bytes());
    hash.as_ref()[..8]
        .iter()
        .fold(String::with_capacity(16), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
}

/// Clamp a generated name to [`MAX_NAME_LEN`] characters.
///
/// Names that already fit are returned unchanged. Longer names keep a
/// prefix and end in `-<hash>` of the full name, so two long names that
/// share a prefix still map to different results.
pub fn bounded_name(name: &str) -> String {
    if name.len() <= MAX_NAME_LEN {
        return name.to_string();
    }
    let hash = deterministic_hash(name);
    let keep = MAX_NAME_LEN - hash.len() - 1;
    let prefix: String = name.chars().take(keep).collect();
    format!("{}-{}", prefix.trim_end_matches('-'), hash)
}

// =============================================================================
// Conditions
// =============================================================================

/// Check if a Kubernetes condition of the given type has status "True"
///
/// # Arguments
/// * `conditions` - Optional slice of conditions (e.g., from status.conditions)
/// * `condition_type` - The condition type to check (e.g., "Available")
pub fn has_condition<T>(conditions: Option<&[T]>, condition_type: &str) -> bool
where
    T: HasConditionFields,
{
    find_condition(conditions, condition_type)
        .map(|c| c.status_field() == STATUS_TRUE)
        .unwrap_or(false)
}

/// Find the condition of the given type, if the object reports one
pub fn find_condition<'a, T>(conditions: Option<&'a [T]>, condition_type: &str) -> Option<&'a T>
where
    T: HasConditionFields,
{
    conditions.and_then(|conds| conds.iter().find(|c| c.type_field() == condition_type))
}

/// Trait for types that have condition-like fields (type and status)
pub trait HasConditionFields {
    /// Get the condition type field value
    fn type_field(&self) -> &str;
    /// Get the condition status field value
    fn status_field(&self) -> &str;
}

impl HasConditionFields for k8s_openapi::api::apps::v1::DeploymentCondition {
    fn type_field(&self) -> &str {
        &self.type_
    }
    fn status_field(&self) -> &str {
        &self.status
    }
}

// =============================================================================
// Status writes
// =============================================================================

/// Patch the status sub-resource of a namespaced resource with a version precondition.
///
/// Serializes `status` into `{ "metadata": { "resourceVersion": .. }, "status": .. }`
/// and applies it via merge-patch. When `resource_version` is set the API
/// server rejects the write with 409 Conflict if the object changed since it
/// was read, so a stale pass can never overwrite a newer status.
///
/// Returns `kube::Error` so callers can map to their own error type.
pub async fn patch_resource_status<T>(
    client: &Client,
    name: &str,
    namespace: &str,
    resource_version: Option<&str>,
    status: &impl serde::Serialize,
    field_manager: &str,
) -> std::result::Result<(), kube::Error>
where
    T: kube::Resource<Scope = NamespaceResourceScope>
        + Clone
        + serde::de::DeserializeOwned
        + std::fmt::Debug,
    <T as kube::Resource>::DynamicType: Default,
{
    let api: Api<T> = Api::namespaced(client.clone(), namespace);
    let patch = status_patch(resource_version, status);
    api.patch_status(name, &PatchParams::apply(field_manager), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Body of a version-guarded status merge patch
pub fn status_patch(
    resource_version: Option<&str>,
    status: &impl serde::Serialize,
) -> serde_json::Value {
    match resource_version {
        Some(rv) => serde_json::json!({
            "metadata": { "resourceVersion": rv },
            "status": status,
        }),
        None => serde_json::json!({ "status": status }),
    }
}

/// Map a kube GET result so that 404 becomes `Ok(None)`
pub fn optional<T>(result: Result<T, kube::Error>) -> Result<Option<T>, kube::Error> {
    match result {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
        Err(e) => Err(e),
    }
}
