//! Integration tests for the Mapping controller
//!
//! These tests require a Kubernetes cluster (kind) and drive the real
//! reconcile cycle against the API server.
//!
//! - `mapping_lifecycle`: Stories about a Mapping's placeholder Service being
//!   created, kept in sync, repaired after tampering, and garbage collected
//!
//! # Running These Tests
//!
//! ```bash
//! cargo test --test kind -- --ignored
//! ```

mod mapping_lifecycle;
