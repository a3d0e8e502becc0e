//! Integration tests for the Mapping lifecycle
//!
//! These tests tell the story of a Mapping from creation to deletion: the
//! controller creates its placeholder Service, reports status, repairs a
//! tampered annotation, and leaves cleanup to the garbage collector.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;

use ambassador_shim::compiler::LegacyMappingConfig;
use ambassador_shim::controller::{reconcile, reconcile_mapping, Context, Observation};
use ambassador_shim::crd::{Mapping, MappingSpec, MappingStatus};
use ambassador_shim::AMBASSADOR_CONFIG_ANNOTATION;

use super::helpers::{ensure_test_cluster, wait_until};

const NAMESPACE: &str = "default";

// =============================================================================
// Test Fixtures
// =============================================================================

fn sample_mapping(name: &str) -> Mapping {
    let mut mapping = Mapping::new(
        name,
        MappingSpec {
            prefix: format!("/{name}/"),
            target_service: "httpbin.org:80".to_string(),
        },
    );
    mapping.metadata.namespace = Some(NAMESPACE.to_string());
    mapping
}

/// Remove a Mapping and its Service left over from a previous run
async fn cleanup(client: &Client, name: &str) {
    let mappings: Api<Mapping> = Api::namespaced(client.clone(), NAMESPACE);
    let services: Api<Service> = Api::namespaced(client.clone(), NAMESPACE);
    let _ = mappings.delete(name, &DeleteParams::default()).await;
    let _ = services
        .delete(&format!("{name}-ambassadorshim"), &DeleteParams::default())
        .await;
    tokio::time::sleep(Duration::from_millis(500)).await;
}

fn create_test_context(client: Client) -> Arc<Context> {
    Arc::new(Context::new(client))
}

// =============================================================================
// Lifecycle Stories
// =============================================================================

/// Story: A user creates a Mapping and Ambassador gets a route
///
/// Expected behavior:
/// - First cycle creates `<name>-ambassadorshim` owned by the Mapping
/// - Status reads configured=false after the first cycle (written before the
///   Service existed), then configured=true, upToDate=true after the second
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_new_mapping_gets_placeholder_service() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let name = "it-create";
    cleanup(&client, name).await;

    let mappings: Api<Mapping> = Api::namespaced(client.clone(), NAMESPACE);
    let services: Api<Service> = Api::namespaced(client.clone(), NAMESPACE);
    mappings
        .create(&PostParams::default(), &sample_mapping(name))
        .await
        .expect("failed to create mapping");

    let ctx = create_test_context(client.clone());

    let first = reconcile_mapping(NAMESPACE, name, &ctx)
        .await
        .expect("first cycle failed")
        .expect("mapping should exist");
    assert_eq!(first.observation, Observation::Missing);
    assert_eq!(
        mappings.get(name).await.unwrap().status,
        Some(MappingStatus::not_configured())
    );

    let service = services
        .get(&format!("{name}-ambassadorshim"))
        .await
        .expect("service should exist");
    let config = LegacyMappingConfig::from_service(&service).expect("annotation should decode");
    assert_eq!(config.prefix, "/it-create/");
    assert_eq!(config.service, "httpbin.org:80");
    let owners = service.metadata.owner_references.unwrap_or_default();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].kind, "Mapping");

    let second = reconcile_mapping(NAMESPACE, name, &ctx)
        .await
        .expect("second cycle failed")
        .expect("mapping should exist");
    assert_eq!(second.observation, Observation::InSync);
    assert_eq!(
        mappings.get(name).await.unwrap().status,
        Some(MappingStatus::ready())
    );

    cleanup(&client, name).await;
}

/// Story: Someone edits the generated annotation by hand
///
/// The next cycle reports the Mapping as stale and restores the annotation;
/// the cycle after that reports it ready again.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_tampered_annotation_is_restored() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let name = "it-drift";
    cleanup(&client, name).await;

    let mappings: Api<Mapping> = Api::namespaced(client.clone(), NAMESPACE);
    let services: Api<Service> = Api::namespaced(client.clone(), NAMESPACE);
    mappings
        .create(&PostParams::default(), &sample_mapping(name))
        .await
        .expect("failed to create mapping");

    let ctx = create_test_context(client.clone());
    reconcile_mapping(NAMESPACE, name, &ctx).await.unwrap();
    reconcile_mapping(NAMESPACE, name, &ctx).await.unwrap();

    let service_name = format!("{name}-ambassadorshim");
    let mut service = services.get(&service_name).await.unwrap();
    service.metadata.annotations = Some(BTreeMap::from([(
        AMBASSADOR_CONFIG_ANNOTATION.to_string(),
        "apiVersion: ambassador/v0\nkind: Mapping\nname: it-drift\nprefix: /elsewhere/\nservice: other:80\n"
            .to_string(),
    )]));
    services
        .replace(&service_name, &PostParams::default(), &service)
        .await
        .expect("failed to tamper with service");

    let repaired = reconcile_mapping(NAMESPACE, name, &ctx).await.unwrap().unwrap();
    assert_eq!(repaired.observation, Observation::Drifted);
    assert_eq!(
        mappings.get(name).await.unwrap().status,
        Some(MappingStatus::stale())
    );

    let restored = services.get(&service_name).await.unwrap();
    assert_eq!(
        LegacyMappingConfig::from_service(&restored).unwrap().prefix,
        "/it-drift/"
    );

    let settled = reconcile_mapping(NAMESPACE, name, &ctx).await.unwrap().unwrap();
    assert_eq!(settled.status, MappingStatus::ready());

    cleanup(&client, name).await;
}

/// Story: A user deletes their Mapping
///
/// The controller does nothing on deletion; the garbage collector removes the
/// Service through its owner reference, and a late reconcile is a no-op.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_deleted_mapping_is_garbage_collected() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let name = "it-delete";
    cleanup(&client, name).await;

    let mappings: Api<Mapping> = Api::namespaced(client.clone(), NAMESPACE);
    let services: Api<Service> = Api::namespaced(client.clone(), NAMESPACE);
    let created = mappings
        .create(&PostParams::default(), &sample_mapping(name))
        .await
        .expect("failed to create mapping");

    let ctx = create_test_context(client.clone());
    reconcile_mapping(NAMESPACE, name, &ctx).await.unwrap();

    mappings
        .delete(name, &DeleteParams::background())
        .await
        .expect("failed to delete mapping");

    let service_name = format!("{name}-ambassadorshim");
    let collected = wait_until(Duration::from_secs(30), || {
        let services = services.clone();
        let service_name = service_name.clone();
        async move { matches!(services.get_opt(&service_name).await, Ok(None)) }
    })
    .await;
    assert!(collected, "service should be garbage collected");

    let late = reconcile(Arc::new(created), ctx).await;
    assert!(late.is_ok(), "reconcile of a deleted mapping should succeed");
}
