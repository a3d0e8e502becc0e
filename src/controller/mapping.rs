//! Mapping controller implementation
//!
//! Each reconcile cycle reads the Mapping, compiles the desired placeholder
//! Service, reads the observed one, and then:
//!
//! | Observed Service          | Status written                  | Service write |
//! |---------------------------|---------------------------------|---------------|
//! | missing                   | configured=false, upToDate=false | create        |
//! | annotation matches spec   | configured=true,  upToDate=true  | none          |
//! | annotation differs        | configured=true,  upToDate=false | replace       |
//!
//! The status write always precedes the Service write, so the status never
//! claims more than what exists in the cluster. Deleting the Service when its
//! Mapping goes away is left to the garbage collector via the owner reference.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::{Client, Resource, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use crate::compiler::{compile_mapping, CompiledMapping, LegacyMappingConfig};
use crate::config::ControllerConfig;
use crate::crd::{Mapping, MappingStatus};
use crate::Error;

/// Trait abstracting the Kubernetes API calls the Mapping controller makes
///
/// Absence is reported as `Ok(None)`, never as an error. This allows mocking
/// the cluster in tests while using the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Fetch a Mapping
    async fn get_mapping(&self, namespace: &str, name: &str) -> Result<Option<Mapping>, Error>;

    /// Overwrite the status of a Mapping
    async fn patch_mapping_status(
        &self,
        namespace: &str,
        name: &str,
        status: &MappingStatus,
    ) -> Result<(), Error>;

    /// Fetch a Service
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error>;

    /// Create a Service
    ///
    /// Fails with `Error::Conflict` if it already exists.
    async fn create_service(&self, service: &Service) -> Result<(), Error>;

    /// Replace a Service as a whole
    ///
    /// Fails with `Error::Conflict` if the Service changed since the
    /// `resourceVersion` it carries was read.
    async fn replace_service(&self, service: &Service) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
    field_manager: String,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }
}

/// Namespace and name of a Service about to be written
fn service_key(service: &Service) -> Result<(&str, &str), Error> {
    let namespace = service
        .metadata
        .namespace
        .as_deref()
        .ok_or_else(|| Error::validation("service has no namespace"))?;
    let name = service
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| Error::validation("service has no name"))?;
    Ok((namespace, name))
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_mapping(&self, namespace: &str, name: &str) -> Result<Option<Mapping>, Error> {
        let api: Api<Mapping> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn patch_mapping_status(
        &self,
        namespace: &str,
        name: &str,
        status: &MappingStatus,
    ) -> Result<(), Error> {
        let api: Api<Mapping> = Api::namespaced(self.client.clone(), namespace);

        let status_patch = serde_json::json!({
            "status": status
        });

        api.patch_status(
            name,
            &PatchParams::apply(&self.field_manager),
            &Patch::Merge(&status_patch),
        )
        .await?;

        Ok(())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_service(&self, service: &Service) -> Result<(), Error> {
        let (namespace, name) = service_key(service)?;
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);

        match api.create(&self.post_params(), service).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                Err(Error::conflict("Service", namespace, name))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn replace_service(&self, service: &Service) -> Result<(), Error> {
        let (namespace, name) = service_key(service)?;
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);

        match api.replace(name, &self.post_params(), service).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                Err(Error::conflict("Service", namespace, name))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Controller context containing shared state and clients
///
/// Use [`ContextBuilder`] to construct instances:
///
/// ```ignore
/// let ctx = Context::builder(client)
///     .config(ControllerConfig::default())
///     .shutdown(token)
///     .build();
/// ```
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Controller settings
    pub config: ControllerConfig,
    /// Cancelled on shutdown; aborts in-flight API calls
    pub shutdown: CancellationToken,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Create a new controller context with the given Kubernetes client
    pub fn new(client: Client) -> Self {
        Self::builder(client).build()
    }

    /// Create a context for testing with a custom mock client
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn KubeClient>) -> Self {
        Self {
            kube,
            config: ControllerConfig::default(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Run an API call, aborting with `Error::Cancelled` on shutdown
    pub async fn guard<T, F>(&self, op: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>>,
    {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(Error::Cancelled),
            result = op => result,
        }
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    kube: Option<Arc<dyn KubeClient>>,
    config: ControllerConfig,
    shutdown: Option<CancellationToken>,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            kube: None,
            config: ControllerConfig::default(),
            shutdown: None,
        }
    }

    /// Set the controller settings
    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a shutdown token with the caller
    pub fn shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    /// Override the Kubernetes client (primarily for testing)
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        let field_manager = self.config.field_manager.clone();
        Context {
            kube: self
                .kube
                .unwrap_or_else(|| Arc::new(KubeClientImpl::new(self.client, field_manager))),
            config: self.config,
            shutdown: self.shutdown.unwrap_or_default(),
        }
    }
}

/// What the observed Service looks like relative to the desired one
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Observation {
    /// No Service exists
    Missing,
    /// Service annotation decodes to the desired config
    InSync,
    /// Service exists but its annotation is absent, unparsable, or different
    Drifted,
}

/// Write to perform on the Service
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceAction {
    /// Create the Service
    Create,
    /// Leave the Service alone
    Keep,
    /// Replace the Service annotations
    Replace,
}

impl Observation {
    /// Compare the observed Service against the desired config
    ///
    /// Compares decoded configs, so formatting differences in the stored
    /// YAML never count as drift.
    pub fn observe(desired: &LegacyMappingConfig, observed: Option<&Service>) -> Self {
        match observed {
            None => Self::Missing,
            Some(service) => match LegacyMappingConfig::from_service(service) {
                Some(ref current) if current == desired => Self::InSync,
                _ => Self::Drifted,
            },
        }
    }

    /// Status to persist and Service write to perform, in that order
    pub const fn transition(self) -> (MappingStatus, ServiceAction) {
        match self {
            Self::Missing => (MappingStatus::not_configured(), ServiceAction::Create),
            Self::InSync => (MappingStatus::ready(), ServiceAction::Keep),
            Self::Drifted => (MappingStatus::stale(), ServiceAction::Replace),
        }
    }

    /// Status a Mapping should report for this observation
    pub const fn status(self) -> MappingStatus {
        self.transition().0
    }
}

/// A materialized Service write
#[derive(Clone, Debug, PartialEq)]
pub enum ServiceWrite {
    /// Create this Service
    Create(Service),
    /// Replace the existing Service with this one
    Replace(Service),
}

/// Decision for one reconcile cycle
#[derive(Clone, Debug, PartialEq)]
pub struct Plan {
    /// How the observed Service compared
    pub observation: Observation,
    /// Status to persist before any write
    pub status: MappingStatus,
    /// Service write to perform after the status, if any
    pub write: Option<ServiceWrite>,
}

/// Decide what to do given the desired and observed Service
///
/// Pure: no API calls. A replace keeps everything from the observed Service
/// (including its `resourceVersion` and annotations owned by other writers)
/// and overwrites only the `getambassador.io/config` entry.
pub fn plan(desired: &CompiledMapping, observed: Option<Service>) -> Plan {
    let observation = Observation::observe(&desired.config, observed.as_ref());
    let (status, action) = observation.transition();

    let write = match (action, observed) {
        (ServiceAction::Keep, _) => None,
        (ServiceAction::Replace, Some(mut current)) => {
            current
                .metadata
                .annotations
                .get_or_insert_with(BTreeMap::new)
                .extend(desired.annotations());
            Some(ServiceWrite::Replace(current))
        }
        (ServiceAction::Create, _) | (ServiceAction::Replace, None) => {
            Some(ServiceWrite::Create(desired.service.clone()))
        }
    };

    Plan {
        observation,
        status,
        write,
    }
}

/// Result of a reconcile cycle that found its Mapping
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reconciled {
    /// How the observed Service compared
    pub observation: Observation,
    /// Status persisted on the Mapping
    pub status: MappingStatus,
}

/// Run one reconcile cycle for the Mapping `namespace/name`
///
/// Returns `Ok(None)` if the Mapping no longer exists.
///
/// # Errors
///
/// Any API error, a conflict on create/replace, cancellation, or a Mapping
/// that cannot be compiled. Nothing is retried here; the caller requeues.
pub async fn reconcile_mapping(
    namespace: &str,
    name: &str,
    ctx: &Context,
) -> Result<Option<Reconciled>, Error> {
    let kube = ctx.kube.as_ref();

    let Some(mapping) = ctx.guard(kube.get_mapping(namespace, name)).await? else {
        debug!("mapping not found, owner reference handles cleanup");
        return Ok(None);
    };

    let mut desired = compile_mapping(&mapping)?;
    let owner = mapping.controller_owner_ref(&()).ok_or_else(|| {
        Error::validation(format!("mapping {}/{} has no uid", namespace, name))
    })?;
    desired.service.metadata.owner_references = Some(vec![owner]);

    let observed = ctx
        .guard(kube.get_service(namespace, desired.service_name()))
        .await?;

    let plan = plan(&desired, observed);
    debug!(observation = ?plan.observation, "compared placeholder service");

    persist_status(&mapping, namespace, name, plan.status, ctx).await?;

    match plan.write {
        Some(ServiceWrite::Create(service)) => {
            info!(service = %desired.service_name(), "creating placeholder service");
            ctx.guard(kube.create_service(&service)).await?;
        }
        Some(ServiceWrite::Replace(service)) => {
            info!(service = %desired.service_name(), "restoring placeholder service annotation");
            ctx.guard(kube.replace_service(&service)).await?;
        }
        None => {}
    }

    Ok(Some(Reconciled {
        observation: plan.observation,
        status: plan.status,
    }))
}

/// Persist the Mapping status unless it already matches
async fn persist_status(
    mapping: &Mapping,
    namespace: &str,
    name: &str,
    status: MappingStatus,
    ctx: &Context,
) -> Result<(), Error> {
    if mapping.status == Some(status) {
        debug!("status unchanged, skipping update");
        return Ok(());
    }

    ctx.guard(ctx.kube.patch_mapping_status(namespace, name, &status))
        .await
}

/// Reconcile a Mapping resource
///
/// Entry point for `kube::runtime::Controller`. The cached object only
/// supplies the key: the cycle re-reads the Mapping so a deletion racing the
/// watch event is treated as success.
#[instrument(skip(mapping, ctx), fields(mapping = %mapping.name_any()))]
pub async fn reconcile(mapping: Arc<Mapping>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = mapping.name_any();
    let namespace = mapping
        .namespace()
        .ok_or_else(|| Error::validation(format!("mapping {} has no namespace", name)))?;

    info!(namespace = %namespace, "reconciling mapping");

    if let Some(reconciled) = reconcile_mapping(&namespace, &name, &ctx).await? {
        info!(
            namespace = %namespace,
            observation = ?reconciled.observation,
            configured = reconciled.status.configured,
            up_to_date = reconciled.status.up_to_date,
            "mapping reconciled"
        );
    }

    Ok(Action::requeue(ctx.config.resync_interval))
}

/// Error policy for the Mapping controller
///
/// Conflicts mean another writer got there first and are requeued quickly;
/// everything else waits for the configured backoff.
pub fn error_policy(mapping: Arc<Mapping>, error: &Error, ctx: Arc<Context>) -> Action {
    if error.is_conflict() {
        warn!(
            %error,
            mapping = %mapping.name_any(),
            "conflict during reconciliation, requeueing"
        );
    } else {
        error!(
            ?error,
            mapping = %mapping.name_any(),
            retryable = error.is_retryable(),
            "reconciliation failed"
        );
    }

    Action::requeue(ctx.config.backoff_for(error))
}
