//! Controller implementations for ambassador-shim CRDs
//!
//! Controllers follow the Kubernetes controller pattern with observe-diff-act loops.

mod mapping;

pub use mapping::{
    error_policy, plan, reconcile, reconcile_mapping, Context, ContextBuilder, KubeClient,
    KubeClientImpl, Observation, Plan, Reconciled, ServiceAction, ServiceWrite,
};
