//! Stories about the Deployment → ReplicaSet → Pod fan-out
//!
//! Each test runs the compiled-in `deployment` scenario against the fake
//! cluster, lets the reconcilers work, then cancels the run's shutdown token
//! so the watches stop and the run can finish.

use std::fs;
use std::sync::Arc;

use kube::api::DynamicObject;

use lattice_testenv::cluster::ClusterApi;
use lattice_testenv::loader::classify;
use lattice_testenv::reconcile::{DuplicatePolicy, ReconcileSettings, POD_PHASE_RUNNING};
use lattice_testenv::scenarios::ScenarioCatalog;
use lattice_testenv::{execute, RunConfig, RunOutcome};

use super::fake_cluster::FakeCluster;

// =============================================================================
// Test Fixtures
// =============================================================================

const D0: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: d0
  namespace: default
spec:
  replicas: 3
  selector:
    matchLabels:
      app: d0
  template:
    metadata:
      labels:
        app: d0
    spec:
      containers:
      - name: web
        image: nginx:1.27
"#;

fn config(duplicates: DuplicatePolicy) -> RunConfig {
    RunConfig {
        reconcile: ReconcileSettings {
            duplicates,
            ..ReconcileSettings::immediate()
        },
        ..RunConfig::default()
    }
}

fn owner_uid(obj: &DynamicObject) -> String {
    let owners = obj.metadata.owner_references.as_ref().expect("owner references");
    assert_eq!(owners.len(), 1, "exactly one owner");
    owners[0].uid.clone()
}

/// Run the `deployment` scenario with `d0` applied, until `pods` pods exist
async fn run_deployment_scenario(
    cluster: Arc<FakeCluster>,
    duplicates: DuplicatePolicy,
    pods: usize,
) -> RunOutcome {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("d0.yaml"), D0).unwrap();
    fs::write(dir.path().join("deployment.ts"), "").unwrap();
    let plan = classify(dir.path().to_str().unwrap()).unwrap();

    let config = config(duplicates);
    let closer = {
        let cluster = cluster.clone();
        let shutdown = config.shutdown.clone();
        tokio::spawn(async move {
            cluster.wait_for("pods", pods).await;
            shutdown.cancel();
        })
    };

    let api: Arc<dyn ClusterApi> = cluster.clone();
    let outcome = execute(api, &plan, &config, &ScenarioCatalog::builtin())
        .await
        .unwrap();
    closer.await.unwrap();
    outcome
}

// =============================================================================
// Stories
// =============================================================================

/// Story: a Deployment with three replicas ends up as one ReplicaSet owned by
/// the Deployment and three running Pods owned by the ReplicaSet
#[tokio::test]
async fn story_deployment_fans_out_to_running_pods() {
    let cluster = Arc::new(FakeCluster::new());

    let outcome = run_deployment_scenario(cluster.clone(), DuplicatePolicy::Allow, 3).await;

    assert_eq!(outcome.applied.created, 1);
    assert_eq!(outcome.summary.actions, 2);
    assert_eq!(outcome.subscriptions.len(), 2);
    assert!(outcome.subscriptions.iter().all(|r| !r.exhausted));

    let deployments = cluster.objects("deployments");
    assert_eq!(deployments.len(), 1);
    let d0_uid = deployments[0].metadata.uid.clone().unwrap();

    let replica_sets = cluster.objects("replicasets");
    assert_eq!(replica_sets.len(), 1);
    let rs = &replica_sets[0];
    assert_eq!(owner_uid(rs), d0_uid);
    assert_eq!(rs.data["spec"]["replicas"], 3);
    assert_eq!(rs.data["spec"]["selector"]["matchLabels"]["app"], "d0");
    assert!(rs.metadata.name.as_deref().unwrap().starts_with("d0-"));
    let rs_uid = rs.metadata.uid.clone().unwrap();

    let pods = cluster.objects("pods");
    assert_eq!(pods.len(), 3);
    for pod in &pods {
        assert_eq!(owner_uid(pod), rs_uid);
        assert_eq!(pod.data["status"]["phase"], POD_PHASE_RUNNING);
        assert_eq!(pod.data["spec"]["containers"][0]["image"], "nginx:1.27");
        assert_eq!(pod.metadata.namespace.as_deref(), Some("default"));
    }
}

/// Story: with duplicate detection on, a ReplicaSet that already has its
/// pods gets no more when it is seen again
#[tokio::test]
async fn story_dedup_skips_children_that_exist() {
    let cluster = Arc::new(FakeCluster::new());

    run_deployment_scenario(cluster.clone(), DuplicatePolicy::SkipOwned, 3).await;

    // A second run replays every stored object to the new watches
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("deployment.ts"), "").unwrap();
    let plan = classify(dir.path().to_str().unwrap()).unwrap();
    let config = config(DuplicatePolicy::SkipOwned);
    let closer = {
        let shutdown = config.shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            shutdown.cancel();
        })
    };
    let api: Arc<dyn ClusterApi> = cluster.clone();
    execute(api, &plan, &config, &ScenarioCatalog::builtin())
        .await
        .unwrap();
    closer.await.unwrap();

    assert_eq!(cluster.objects("replicasets").len(), 1);
    assert_eq!(cluster.objects("pods").len(), 3);
}
