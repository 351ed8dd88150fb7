//! Resource object helpers on top of kube's `DynamicObject`
//!
//! Every object crossing the cluster boundary is a `DynamicObject`: manifests
//! are submitted as-is and watch events deliver whatever the server sends.
//! Reconcilers convert to typed `k8s_openapi` views only where they need
//! field access.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::{DynamicObject, TypeMeta};
use kube::discovery::ApiResource;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{Error, Result};

/// Known kind/plural pairs. Anything else falls back to simple English rules.
const KIND_PLURALS: &[(&str, &str)] = &[
    ("Pod", "pods"),
    ("ReplicaSet", "replicasets"),
    ("Deployment", "deployments"),
    ("DeploymentConfig", "deploymentconfigs"),
    ("StatefulSet", "statefulsets"),
    ("DaemonSet", "daemonsets"),
    ("Namespace", "namespaces"),
    ("Service", "services"),
    ("ServiceAccount", "serviceaccounts"),
    ("ConfigMap", "configmaps"),
    ("Secret", "secrets"),
    ("Endpoints", "endpoints"),
    ("Ingress", "ingresses"),
    ("NetworkPolicy", "networkpolicies"),
    ("CustomResourceDefinition", "customresourcedefinitions"),
];

/// Pluralize a Kubernetes resource kind into its URL path segment
pub fn pluralize_kind(kind: &str) -> String {
    if let Some((_, plural)) = KIND_PLURALS.iter().find(|(k, _)| *k == kind) {
        return (*plural).to_string();
    }

    let lower = kind.to_lowercase();
    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// Best-effort inverse of [`pluralize_kind`] for watch paths, which only name the plural.
///
/// Unknown plurals are singularized naively and upper-cased at the first
/// letter; the kind is informational only for watches.
pub fn kind_for_plural(plural: &str) -> String {
    if let Some((kind, _)) = KIND_PLURALS.iter().find(|(_, p)| *p == plural) {
        return (*kind).to_string();
    }

    let singular = if let Some(stem) = plural.strip_suffix("ies") {
        format!("{stem}y")
    } else if let Some(stem) = plural.strip_suffix("ses") {
        format!("{stem}s")
    } else {
        plural.strip_suffix('s').unwrap_or(plural).to_string()
    };

    let mut chars = singular.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Split an apiVersion into `(group, version)`; the core group is empty.
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Build an `ApiResource` from an apiVersion/kind pair
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        api_version: api_version.to_string(),
        kind: kind.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// `ApiResource` for a dynamic object, from its own type metadata
pub fn api_resource_of(obj: &DynamicObject) -> Result<ApiResource> {
    let types = obj
        .types
        .as_ref()
        .ok_or_else(|| Error::invalid_object(format!("{} has no apiVersion/kind", describe(obj))))?;
    Ok(build_api_resource(&types.api_version, &types.kind))
}

/// Owner reference pointing at the given parent.
///
/// Returns `None` unless the parent exposes apiVersion, kind, name and uid.
pub fn owner_reference(types: Option<&TypeMeta>, meta: &ObjectMeta) -> Option<OwnerReference> {
    let types = types?;
    if types.api_version.is_empty() || types.kind.is_empty() {
        return None;
    }
    Some(OwnerReference {
        api_version: types.api_version.clone(),
        kind: types.kind.clone(),
        name: meta.name.clone()?,
        uid: meta.uid.clone()?,
        ..Default::default()
    })
}

/// Whether `child` carries an owner reference with the given uid
pub fn is_owned_by(child: &ObjectMeta, owner_uid: &str) -> bool {
    child
        .owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .any(|r| r.uid == owner_uid)
}

/// Typed view of a dynamic object
pub fn parse_typed<K: DeserializeOwned>(obj: &DynamicObject) -> Result<K> {
    let value = serde_json::to_value(obj).map_err(|e| Error::serialization(e.to_string()))?;
    serde_json::from_value(value)
        .map_err(|e| Error::invalid_object(format!("{}: {}", describe(obj), e)))
}

/// Dynamic form of a typed object, ready for submission
pub fn to_dynamic<K: Serialize>(obj: &K) -> Result<DynamicObject> {
    let value = serde_json::to_value(obj).map_err(|e| Error::serialization(e.to_string()))?;
    from_value(value)
}

/// Dynamic object from a parsed manifest document
pub fn from_value(value: serde_json::Value) -> Result<DynamicObject> {
    serde_json::from_value(value).map_err(|e| Error::serialization(e.to_string()))
}

/// `Kind namespace/name` for log lines, tolerating missing fields
pub fn describe(obj: &DynamicObject) -> String {
    let kind = obj.types.as_ref().map(|t| t.kind.as_str()).unwrap_or("<unknown>");
    let name = obj
        .metadata
        .name
        .as_deref()
        .or(obj.metadata.generate_name.as_deref())
        .unwrap_or("<unnamed>");
    match obj.metadata.namespace.as_deref() {
        Some(ns) => format!("{kind} {ns}/{name}"),
        None => format!("{kind} {name}"),
    }
}
