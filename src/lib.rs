//! Lattice test environment - controller stand-ins and scenario runner for
//! Kubernetes API servers without a control plane
//!
//! Points at a bare API server (no kube-controller-manager), applies manifest
//! files, and runs scenario trees whose leaves start lightweight reconcilers:
//! a Deployment gets a ReplicaSet, a ReplicaSet gets its Pods.
//!
//! # Modules
//!
//! - [`watch`] - Event stream adapter (ordered delivery, reconnect)
//! - [`reconcile`] - Deployment → ReplicaSet → Pod reconcilers
//! - [`scenario`] - Scenario tree builder, printer and runner
//! - [`scenarios`] - Compiled-in scenario modules
//! - [`loader`] - Resource file classification and loading
//! - [`cluster`] - Cluster API seam and kube-backed implementation
//! - [`resource`] - Dynamic object helpers
//! - [`backoff`] - Reconnect backoff and submission pacing
//! - [`yaml`] - Multi-document manifest parsing
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod backoff;
pub mod cluster;
pub mod error;
pub mod loader;
pub mod reconcile;
pub mod resource;
pub mod scenario;
pub mod scenarios;
pub mod watch;
pub mod yaml;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use backoff::{BackoffPolicy, Pacing};
use cluster::{ClusterApi, KubeClusterApi};
use loader::{ApplyReport, LoadPlan};
use reconcile::{DuplicatePolicy, ReconcileSettings};
use scenario::{RunSummary, ScenarioContext, ScenarioRunner, ScenarioTree, TreeBuilder};
use scenarios::ScenarioCatalog;
use watch::{SubscriptionReport, SubscriptionSet};

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Default API server of a local test environment
pub const DEFAULT_API_SERVER: &str = "http://127.0.0.1:44771/";

/// Default wait before each ReplicaSet submission, in milliseconds
pub const DEFAULT_REPLICA_SET_DELAY_MS: u64 = reconcile::DEFAULT_REPLICA_SET_DELAY.as_millis() as u64;

/// Default wait before each Pod submission, in milliseconds
pub const DEFAULT_POD_DELAY_MS: u64 = reconcile::DEFAULT_POD_DELAY.as_millis() as u64;

/// Default reconnect attempts per watch
pub const DEFAULT_WATCH_RETRIES: u32 = 5;

// =============================================================================
// CLI
// =============================================================================

/// Lattice test environment - run scenarios against a bare API server
#[derive(Parser, Debug, Clone)]
#[command(name = "lattice-testenv")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// API server URL
    #[arg(long, env = "TESTENV_API_SERVER", default_value = DEFAULT_API_SERVER)]
    pub api_server: String,

    /// Comma-separated resource files or directories
    ///
    /// `.json`, `.yaml` and `.yml` files are applied; `.js` and `.ts` files
    /// select the scenario module named by their stem.
    #[arg(long, env = "TESTENV_RESOURCES", default_value = "")]
    pub resources: String,

    /// Wait before each ReplicaSet a reconciler submits
    #[arg(long, default_value_t = DEFAULT_REPLICA_SET_DELAY_MS)]
    pub replica_set_delay_ms: u64,

    /// Wait before each Pod a reconciler submits
    #[arg(long, default_value_t = DEFAULT_POD_DELAY_MS)]
    pub pod_delay_ms: u64,

    /// Reconnect attempts after a watch fails (0 stops at the first failure)
    #[arg(long, default_value_t = DEFAULT_WATCH_RETRIES)]
    pub watch_retries: u32,

    /// Only create children a parent does not already own
    #[arg(long)]
    pub dedup: bool,

    /// Exit after the scenario run instead of waiting for watches to end
    #[arg(long)]
    pub no_wait: bool,
}

impl Cli {
    /// Settings derived from the flags
    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            reconcile: ReconcileSettings {
                replica_set_pacing: Pacing::new(Duration::from_millis(self.replica_set_delay_ms)),
                pod_pacing: Pacing::new(Duration::from_millis(self.pod_delay_ms)),
                duplicates: if self.dedup {
                    DuplicatePolicy::SkipOwned
                } else {
                    DuplicatePolicy::Allow
                },
            },
            backoff: BackoffPolicy::with_max_attempts(self.watch_retries),
            wait_for_subscriptions: !self.no_wait,
            shutdown: CancellationToken::new(),
        }
    }

    /// Run the test environment
    pub async fn run(self) -> Result<()> {
        let config = self.run_config();
        let plan = loader::classify(&self.resources)?;

        let shutdown = config.shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupted, stopping watches");
                shutdown.cancel();
            }
        });

        let cluster: Arc<dyn ClusterApi> = Arc::new(KubeClusterApi::connect(&self.api_server).await?);
        execute(cluster, &plan, &config, &ScenarioCatalog::builtin()).await?;
        Ok(())
    }
}

/// Everything a run needs besides the cluster and the resource list
#[derive(Clone, Debug)]
pub struct RunConfig {
    /// Reconciler pacing and duplicate handling
    pub reconcile: ReconcileSettings,
    /// Watch reconnect policy
    pub backoff: BackoffPolicy,
    /// Block until every watch started by the run has ended
    pub wait_for_subscriptions: bool,
    /// Cancelling this stops every watch started by the run
    pub shutdown: CancellationToken,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            reconcile: ReconcileSettings::default(),
            backoff: BackoffPolicy::default(),
            wait_for_subscriptions: true,
            shutdown: CancellationToken::new(),
        }
    }
}

/// What a finished run did
#[derive(Debug)]
pub struct RunOutcome {
    /// Declarative apply totals
    pub applied: ApplyReport,
    /// The tree that was run
    pub tree: ScenarioTree,
    /// Scenario run totals
    pub summary: RunSummary,
    /// Watches that ended (empty when not waiting)
    pub subscriptions: Vec<SubscriptionReport>,
}

/// Apply, load, print and run a classified plan against `cluster`.
///
/// Declarative files are applied before any scenario module is loaded; the
/// tree is printed to stdout before it runs. When waiting, watches run until
/// `config.shutdown` is cancelled or their retry budget is spent.
pub async fn execute(
    cluster: Arc<dyn ClusterApi>,
    plan: &LoadPlan,
    config: &RunConfig,
    catalog: &ScenarioCatalog,
) -> Result<RunOutcome> {
    let applied = loader::apply_all(cluster.as_ref(), plan).await?;

    let mut builder = TreeBuilder::new();
    for path in &plan.procedural {
        loader::load_procedural(catalog, &mut builder, path)?;
    }
    let tree = builder.build();
    print!("{}", tree.render());

    let subscriptions = Arc::new(SubscriptionSet::with_shutdown(config.shutdown.clone()));
    let context = ScenarioContext::new(cluster, config.reconcile.clone(), config.backoff.clone())
        .with_subscriptions(subscriptions);
    let runner = ScenarioRunner::new(context);
    let summary = runner.run(&tree).await?;

    let subscriptions = if config.wait_for_subscriptions {
        let running = runner.context().subscriptions().len().await;
        if running > 0 {
            info!(subscriptions = running, "watching until interrupted");
        }
        runner.context().subscriptions().wait_all().await
    } else {
        runner.context().subscriptions().abort_all().await;
        Vec::new()
    };

    Ok(RunOutcome {
        applied,
        tree,
        summary,
        subscriptions,
    })
}
