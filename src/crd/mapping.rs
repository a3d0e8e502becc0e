//! Mapping Custom Resource Definition
//!
//! A Mapping routes a URL prefix to a target service. The controller turns
//! each one into a placeholder Service carrying Ambassador's v0 annotation.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification for a Mapping
///
/// Example:
/// ```yaml
/// apiVersion: ambassadorshim.admiralty.io/v1alpha1
/// kind: Mapping
/// metadata:
///   name: httpbin
///   namespace: default
/// spec:
///   prefix: /httpbin/
///   targetService: httpbin.org:80
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "ambassadorshim.admiralty.io",
    version = "v1alpha1",
    kind = "Mapping",
    plural = "mappings",
    shortname = "amap",
    namespaced,
    status = "MappingStatus",
    printcolumn = r#"{"name":"Prefix","type":"string","jsonPath":".spec.prefix"}"#,
    printcolumn = r#"{"name":"Service","type":"string","jsonPath":".spec.targetService"}"#,
    printcolumn = r#"{"name":"Configured","type":"boolean","jsonPath":".status.configured"}"#,
    printcolumn = r#"{"name":"UpToDate","type":"boolean","jsonPath":".status.upToDate"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MappingSpec {
    /// URL prefix routed by Ambassador (e.g. `/httpbin/`)
    pub prefix: String,

    /// Upstream service requests are forwarded to (e.g. `httpbin.org:80`)
    pub target_service: String,
}

/// Status for a Mapping
///
/// Written only by the controller. `configured` means the placeholder Service
/// exists; `up_to_date` means its annotation matched the spec when last
/// observed.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MappingStatus {
    /// The placeholder Service exists
    #[serde(default)]
    pub configured: bool,

    /// The placeholder Service annotation matches the spec
    #[serde(default)]
    pub up_to_date: bool,
}

impl MappingStatus {
    /// Status for a Mapping whose Service does not exist yet
    pub const fn not_configured() -> Self {
        Self {
            configured: false,
            up_to_date: false,
        }
    }

    /// Status for a Mapping whose Service exists but is being corrected
    pub const fn stale() -> Self {
        Self {
            configured: true,
            up_to_date: false,
        }
    }

    /// Status for a Mapping whose Service matches the spec
    pub const fn ready() -> Self {
        Self {
            configured: true,
            up_to_date: true,
        }
    }
}
