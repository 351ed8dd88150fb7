//! Reconciliation handlers
//!
//! Stand-ins for the workload controllers a real control plane runs: a
//! Deployment event produces one ReplicaSet, a ReplicaSet event produces its
//! Pods. Child objects keep the parent's label and ownership lineage so the
//! resulting tree looks like what kube-controller-manager would build.
//!
//! Handlers do not check for existing children by default: every Added or
//! Modified event creates a fresh set. [`DuplicatePolicy::SkipOwned`] trades
//! one list call per event for creating only what is missing.
//!
//! A parent yields one child template plus a count; copies are made one at a
//! time as they are submitted, so a large `replicas` never sits in memory.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet, ReplicaSetSpec};
use k8s_openapi::api::core::v1::{Pod, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{DynamicObject, TypeMeta};
use tracing::{debug, info, warn};

use crate::backoff::{BackoffPolicy, Pacing};
use crate::cluster::ClusterApi;
use crate::resource::{describe, is_owned_by, owner_reference, parse_typed, to_dynamic};
use crate::watch::{EventHandler, SubscriptionSet, WatchEvent, WatchPath};
use crate::{Error, Result};

/// Phase given to every synthesized pod; there is no scheduler or kubelet.
pub const POD_PHASE_RUNNING: &str = "Running";

/// Default wait before submitting a ReplicaSet
pub const DEFAULT_REPLICA_SET_DELAY: Duration = Duration::from_secs(5);

/// Default wait before submitting each Pod
pub const DEFAULT_POD_DELAY: Duration = Duration::from_secs(2);

// =============================================================================
// Kinds
// =============================================================================

/// Parent kinds the harness knows how to reconcile
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReconcilableKind {
    /// Deployment → ReplicaSet
    Deployment,
    /// ReplicaSet → Pods
    ReplicaSet,
}

impl ReconcilableKind {
    /// Every reconcilable kind
    pub const ALL: [ReconcilableKind; 2] = [ReconcilableKind::Deployment, ReconcilableKind::ReplicaSet];

    /// Collection path watched for this parent kind
    pub fn watch_path(self) -> &'static str {
        match self {
            ReconcilableKind::Deployment => "/apis/apps/v1/deployments",
            ReconcilableKind::ReplicaSet => "/apis/apps/v1/replicasets",
        }
    }

    /// `(apiVersion, kind)` of the children this parent produces
    pub fn child_type(self) -> (&'static str, &'static str) {
        match self {
            ReconcilableKind::Deployment => ("apps/v1", "ReplicaSet"),
            ReconcilableKind::ReplicaSet => ("v1", "Pod"),
        }
    }
}

impl fmt::Display for ReconcilableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReconcilableKind::Deployment => "Deployment",
            ReconcilableKind::ReplicaSet => "ReplicaSet",
        })
    }
}

/// Whether a reconciler looks for existing children before creating
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Create children on every event
    #[default]
    Allow,
    /// List children owned by the parent and create only the shortfall
    SkipOwned,
}

/// Submission settings shared by all reconcilers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcileSettings {
    /// Wait before each ReplicaSet submission
    pub replica_set_pacing: Pacing,
    /// Wait before each Pod submission
    pub pod_pacing: Pacing,
    /// Existing-children handling
    pub duplicates: DuplicatePolicy,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            replica_set_pacing: Pacing::new(DEFAULT_REPLICA_SET_DELAY),
            pod_pacing: Pacing::new(DEFAULT_POD_DELAY),
            duplicates: DuplicatePolicy::Allow,
        }
    }
}

impl ReconcileSettings {
    /// No pacing, no duplicate detection
    pub fn immediate() -> Self {
        Self {
            replica_set_pacing: Pacing::immediate(),
            pod_pacing: Pacing::immediate(),
            duplicates: DuplicatePolicy::Allow,
        }
    }

    fn pacing_for(&self, kind: ReconcilableKind) -> Pacing {
        match kind {
            ReconcilableKind::Deployment => self.replica_set_pacing,
            ReconcilableKind::ReplicaSet => self.pod_pacing,
        }
    }
}

// =============================================================================
// Child builders
// =============================================================================

/// One child template and how many copies of it to submit
#[derive(Clone, Debug, PartialEq)]
pub struct ChildPlan<T> {
    /// Object submitted for every copy
    pub template: T,
    /// Number of copies
    pub count: usize,
}

/// The ReplicaSet a Deployment controller would create for `deployment`.
///
/// Returns `None` when the deployment has no namespace or name. `types` is
/// the type metadata the deployment arrived with; the owner reference is only
/// set when it and the uid are present.
pub fn replica_set_for(
    types: Option<&TypeMeta>,
    deployment: &Deployment,
) -> Result<Option<ReplicaSet>> {
    let meta = &deployment.metadata;
    let (Some(namespace), Some(name)) = (meta.namespace.as_ref(), meta.name.as_ref()) else {
        return Ok(None);
    };
    let spec = deployment.spec.as_ref().ok_or_else(|| {
        Error::invalid_object(format!("deployment {}/{} has no spec", namespace, name))
    })?;

    let labels = BTreeMap::from([
        ("app".to_string(), name.clone()),
        ("deployment".to_string(), name.clone()),
    ]);

    Ok(Some(ReplicaSet {
        metadata: ObjectMeta {
            namespace: Some(namespace.clone()),
            generate_name: Some(format!("{}-", name)),
            owner_references: Some(owner_reference(types, meta).into_iter().collect()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(ReplicaSetSpec {
            replicas: Some(spec.replicas.unwrap_or(1)),
            selector: spec.selector.clone(),
            template: Some(spec.template.clone()),
            ..Default::default()
        }),
        status: None,
    }))
}

/// Fail unless the raw Deployment carries `spec.selector` and `spec.template`.
///
/// The typed view fills both with defaults when they are missing, so absence
/// is only visible on the untyped object.
pub fn require_deployment_fields(deployment: &DynamicObject) -> Result<()> {
    for field in ["selector", "template"] {
        if deployment.data["spec"][field].is_null() {
            return Err(Error::invalid_object(format!(
                "{} has no spec.{}",
                describe(deployment),
                field
            )));
        }
    }
    Ok(())
}

/// The Pods a ReplicaSet controller would create for `replica_set`.
///
/// `spec.replicas` defaults to 1 when absent; zero or negative counts produce
/// `None`, as does a ReplicaSet without namespace or name. The template pod
/// starts from the template metadata, is re-homed into the ReplicaSet's
/// namespace with a `<replicaset>-` generated name, and reports itself as
/// already running.
pub fn pods_for(
    types: Option<&TypeMeta>,
    replica_set: &ReplicaSet,
) -> Result<Option<ChildPlan<Pod>>> {
    let meta = &replica_set.metadata;
    let (Some(namespace), Some(name)) = (meta.namespace.as_ref(), meta.name.as_ref()) else {
        return Ok(None);
    };

    let spec = replica_set.spec.as_ref();
    let count = usize::try_from(spec.and_then(|s| s.replicas).unwrap_or(1)).unwrap_or(0);
    if count == 0 {
        return Ok(None);
    }

    let template = spec.and_then(|s| s.template.as_ref());
    let pod_spec = template.and_then(|t| t.spec.clone()).ok_or_else(|| {
        Error::invalid_object(format!(
            "replicaset {}/{} has no spec.template.spec",
            namespace, name
        ))
    })?;

    let mut metadata = template.and_then(|t| t.metadata.clone()).unwrap_or_default();
    metadata.namespace = Some(namespace.clone());
    metadata.generate_name = Some(format!("{}-", name));
    metadata.owner_references = Some(owner_reference(types, meta).into_iter().collect());

    let template = Pod {
        metadata,
        spec: Some(pod_spec),
        status: Some(PodStatus {
            phase: Some(POD_PHASE_RUNNING.to_string()),
            ..Default::default()
        }),
    };
    Ok(Some(ChildPlan { template, count }))
}

// =============================================================================
// Reconciler
// =============================================================================

/// Event handler that submits the children of one parent kind
pub struct Reconciler {
    kind: ReconcilableKind,
    cluster: Arc<dyn ClusterApi>,
    pacing: Pacing,
    duplicates: DuplicatePolicy,
}

impl Reconciler {
    /// Reconciler for `kind` submitting through `cluster`
    pub fn new(
        kind: ReconcilableKind,
        cluster: Arc<dyn ClusterApi>,
        settings: &ReconcileSettings,
    ) -> Self {
        Self {
            kind,
            cluster,
            pacing: settings.pacing_for(kind),
            duplicates: settings.duplicates,
        }
    }

    /// Parent kind handled
    pub fn kind(&self) -> ReconcilableKind {
        self.kind
    }

    /// Children the parent should have, ignoring what already exists
    pub fn desired_children(&self, parent: &DynamicObject) -> Result<Option<ChildPlan<DynamicObject>>> {
        let types = parent.types.as_ref();
        match self.kind {
            ReconcilableKind::Deployment => {
                let deployment: Deployment = parse_typed(parent)?;
                let Some(replica_set) = replica_set_for(types, &deployment)? else {
                    return Ok(None);
                };
                require_deployment_fields(parent)?;
                Ok(Some(ChildPlan {
                    template: to_dynamic(&replica_set)?,
                    count: 1,
                }))
            }
            ReconcilableKind::ReplicaSet => {
                let replica_set: ReplicaSet = parse_typed(parent)?;
                match pods_for(types, &replica_set)? {
                    Some(plan) => Ok(Some(ChildPlan {
                        template: to_dynamic(&plan.template)?,
                        count: plan.count,
                    })),
                    None => Ok(None),
                }
            }
        }
    }

    /// Submit the children for one observed parent, one at a time.
    ///
    /// Returns how many children were submitted.
    pub async fn reconcile(&self, parent: &DynamicObject) -> Result<usize> {
        let Some(children) = self.desired_children(parent)? else {
            debug!(kind = %self.kind, parent = %describe(parent), "nothing to create");
            return Ok(0);
        };

        let mut total = children.count;
        if self.duplicates == DuplicatePolicy::SkipOwned {
            let existing = self.owned_children(parent).await?;
            total = children.count.saturating_sub(existing);
            if existing > 0 {
                debug!(parent = %describe(parent), existing, missing = total, "skipping owned children");
            }
        }

        for i in 0..total {
            self.pacing.wait().await;
            let created = self.cluster.create(children.template.clone()).await?;
            info!(
                parent = %describe(parent),
                child = %describe(&created),
                progress = %format!("{}/{}", i + 1, total),
                "created child"
            );
        }
        Ok(total)
    }

    async fn owned_children(&self, parent: &DynamicObject) -> Result<usize> {
        let Some(uid) = parent.metadata.uid.as_deref() else {
            warn!(parent = %describe(parent), "parent has no uid, cannot detect owned children");
            return Ok(0);
        };
        let (api_version, kind) = self.kind.child_type();
        let children = self
            .cluster
            .list(api_version, kind, parent.metadata.namespace.clone())
            .await?;
        Ok(children
            .iter()
            .filter(|child| is_owned_by(&child.metadata, uid))
            .count())
    }
}

#[async_trait]
impl EventHandler for Reconciler {
    async fn handle(&self, event: WatchEvent) -> Result<()> {
        match &event {
            WatchEvent::Added(parent) | WatchEvent::Modified(parent) => {
                debug!(kind = %self.kind, phase = %event.phase(), parent = %describe(parent), "reconciling");
                self.reconcile(parent).await?;
            }
            WatchEvent::Deleted(parent) => {
                debug!(kind = %self.kind, parent = %describe(parent), "parent deleted, nothing to do");
            }
            WatchEvent::Bookmark { .. } | WatchEvent::Reconnected { .. } => {}
        }
        Ok(())
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Reconcilers keyed by parent kind
#[derive(Default)]
pub struct ReconcilerRegistry {
    reconcilers: BTreeMap<ReconcilableKind, Arc<Reconciler>>,
}

impl ReconcilerRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a reconciler for every [`ReconcilableKind`]
    pub fn with_defaults(cluster: Arc<dyn ClusterApi>, settings: &ReconcileSettings) -> Self {
        let mut registry = Self::new();
        for kind in ReconcilableKind::ALL {
            registry.register(Reconciler::new(kind, cluster.clone(), settings));
        }
        registry
    }

    /// Add or replace the reconciler for its kind
    pub fn register(&mut self, reconciler: Reconciler) {
        self.reconcilers
            .insert(reconciler.kind(), Arc::new(reconciler));
    }

    /// Reconciler for `kind`
    pub fn get(&self, kind: ReconcilableKind) -> Option<Arc<Reconciler>> {
        self.reconcilers.get(&kind).cloned()
    }

    /// Registered kinds, in enum order
    pub fn kinds(&self) -> impl Iterator<Item = ReconcilableKind> + '_ {
        self.reconcilers.keys().copied()
    }

    /// Start watching the path of `kind`, feeding its reconciler
    pub async fn watch(
        &self,
        kind: ReconcilableKind,
        cluster: Arc<dyn ClusterApi>,
        subscriptions: &SubscriptionSet,
        policy: BackoffPolicy,
    ) -> Result<()> {
        let reconciler = self
            .get(kind)
            .ok_or_else(|| Error::validation(format!("no reconciler registered for {}", kind)))?;
        let path = WatchPath::parse(kind.watch_path())?;
        subscriptions.start(cluster, path, reconciler, policy).await
    }

    /// Start watching every registered kind
    pub async fn watch_all(
        &self,
        cluster: Arc<dyn ClusterApi>,
        subscriptions: &SubscriptionSet,
        policy: BackoffPolicy,
    ) -> Result<()> {
        for kind in self.kinds() {
            self.watch(kind, cluster.clone(), subscriptions, policy.clone())
                .await?;
        }
        Ok(())
    }
}
