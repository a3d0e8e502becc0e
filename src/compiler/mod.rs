//! Mapping Compiler
//!
//! Turns a [`Mapping`] into the placeholder Service Ambassador reads its v0
//! configuration from. Compilation is pure: no API calls, no owner reference
//! (the controller attaches that once it holds the live Mapping).
//!
//! # Output
//!
//! ```text
//! apiVersion: v1
//! kind: Service
//! metadata:
//!   name: <mapping>-ambassadorshim
//!   namespace: <mapping namespace>
//!   annotations:
//!     getambassador.io/config: |
//!       apiVersion: ambassador/v0
//!       kind: Mapping
//!       name: <mapping>
//!       prefix: <spec.prefix>
//!       service: <spec.targetService>
//! spec:
//!   ports:
//!   - port: 80
//! ```

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

use crate::crd::Mapping;
use crate::{Error, AMBASSADOR_CONFIG_ANNOTATION, PLACEHOLDER_PORT, SERVICE_NAME_SUFFIX};

/// Ambassador config schema version written into every annotation
pub const LEGACY_API_VERSION: &str = "ambassador/v0";

/// Ambassador config kind written into every annotation
pub const LEGACY_KIND: &str = "Mapping";

/// Ambassador v0 Mapping, as carried in the `getambassador.io/config` annotation
///
/// Decoding is strict: a payload with any key outside these five is not a
/// config this controller wrote.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LegacyMappingConfig {
    /// Always [`LEGACY_API_VERSION`]
    pub api_version: String,
    /// Always [`LEGACY_KIND`]
    pub kind: String,
    /// Name of the source Mapping
    pub name: String,
    /// URL prefix
    pub prefix: String,
    /// Upstream service
    pub service: String,
}

impl LegacyMappingConfig {
    /// Project a Mapping's spec onto the legacy config
    pub fn from_mapping(name: &str, mapping: &Mapping) -> Self {
        Self {
            api_version: LEGACY_API_VERSION.to_string(),
            kind: LEGACY_KIND.to_string(),
            name: name.to_string(),
            prefix: mapping.spec.prefix.clone(),
            service: mapping.spec.target_service.clone(),
        }
    }

    /// Serialize to the annotation value
    pub fn to_yaml(&self) -> Result<String, Error> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Decode the config carried by an existing Service
    ///
    /// Returns `None` when the annotation is absent, does not parse as a
    /// legacy Mapping, or carries extra keys; either way the Service needs
    /// rewriting.
    pub fn from_service(service: &Service) -> Option<Self> {
        let value = service
            .metadata
            .annotations
            .as_ref()?
            .get(AMBASSADOR_CONFIG_ANNOTATION)?;
        serde_yaml::from_str(value).ok()
    }
}

/// Output from compiling a Mapping
#[derive(Clone, Debug)]
pub struct CompiledMapping {
    /// Structured config, used for diffing against the observed Service
    pub config: LegacyMappingConfig,
    /// Desired placeholder Service (no owner reference yet)
    pub service: Service,
}

impl CompiledMapping {
    /// Name of the generated Service
    pub fn service_name(&self) -> &str {
        self.service.metadata.name.as_deref().unwrap_or_default()
    }

    /// Namespace of the generated Service
    pub fn service_namespace(&self) -> &str {
        self.service.metadata.namespace.as_deref().unwrap_or_default()
    }

    /// Desired annotation map (exactly one key)
    pub fn annotations(&self) -> BTreeMap<String, String> {
        self.service.metadata.annotations.clone().unwrap_or_default()
    }
}

/// Name of the placeholder Service for a Mapping
pub fn service_name(mapping_name: &str) -> String {
    format!("{}{}", mapping_name, SERVICE_NAME_SUFFIX)
}

/// Compile a Mapping into its placeholder Service
///
/// # Errors
///
/// `Error::Validation` if the Mapping has no name or namespace,
/// `Error::Serialization` if the legacy config cannot be encoded.
pub fn compile_mapping(mapping: &Mapping) -> Result<CompiledMapping, Error> {
    let name = mapping
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| Error::validation("mapping has no name"))?;
    let namespace = mapping
        .metadata
        .namespace
        .as_deref()
        .ok_or_else(|| Error::validation(format!("mapping {} has no namespace", name)))?;

    let config = LegacyMappingConfig::from_mapping(name, mapping);
    let payload = config.to_yaml()?;

    let service = Service {
        metadata: ObjectMeta {
            name: Some(service_name(name)),
            namespace: Some(namespace.to_string()),
            annotations: Some(BTreeMap::from([(
                AMBASSADOR_CONFIG_ANNOTATION.to_string(),
                payload,
            )])),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                port: PLACEHOLDER_PORT,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    };

    Ok(CompiledMapping { config, service })
}
