//! ambassador-shim - projects `Mapping` resources onto legacy Ambassador annotations
//!
//! Ambassador's v0 configuration lives in a `getambassador.io/config` annotation
//! on a Kubernetes Service. This controller lets users declare routes as a
//! first-class `Mapping` custom resource instead, and keeps one placeholder
//! Service per Mapping carrying the equivalent annotation.
//!
//! # Modules
//!
//! - [`crd`] - The `Mapping` Custom Resource Definition
//! - [`compiler`] - Builds the desired placeholder Service from a Mapping
//! - [`controller`] - Reconciliation loop (observe, diff, act, report status)
//! - [`config`] - Runtime configuration shared with the controller
//! - [`telemetry`] - Tracing subscriber setup
//! - [`error`] - Error types for the controller

#![deny(missing_docs)]

pub mod compiler;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Annotation key Ambassador reads its v0 configuration from
pub const AMBASSADOR_CONFIG_ANNOTATION: &str = "getambassador.io/config";

/// Suffix appended to a Mapping name to form its placeholder Service name
pub const SERVICE_NAME_SUFFIX: &str = "-ambassadorshim";

/// Placeholder port on the generated Service (a Service needs at least one)
pub const PLACEHOLDER_PORT: i32 = 80;

/// Default field manager for writes made by the controller
pub const DEFAULT_FIELD_MANAGER: &str = "ambassador-shim";
