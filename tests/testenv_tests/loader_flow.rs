//! Stories about resource lists and manifest apply

use std::fs;
use std::sync::Arc;

use lattice_testenv::cluster::ClusterApi;
use lattice_testenv::loader::classify;
use lattice_testenv::scenarios::ScenarioCatalog;
use lattice_testenv::{execute, Error, RunConfig};

use super::fake_cluster::FakeCluster;

const NAMESPACE_AND_CONFIG: &str = r#"
apiVersion: v1
kind: Namespace
metadata:
  name: demo
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: settings
  namespace: demo
data:
  mode: test
"#;

/// Story: one unsupported file in the list means nothing is applied at all
#[tokio::test]
async fn story_unsupported_file_applies_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let x = dir.path().join("x.yaml");
    let y = dir.path().join("y.ts");
    let z = dir.path().join("z.bogus");
    fs::write(&x, NAMESPACE_AND_CONFIG).unwrap();
    fs::write(&y, "").unwrap();
    fs::write(&z, "").unwrap();

    let resources = format!("{},{},{}", x.display(), y.display(), z.display());
    let err = classify(&resources).unwrap_err();

    assert!(matches!(err, Error::UnsupportedInput { path } if path == z));
    assert_eq!(FakeCluster::new().len(), 0);
}

/// Story: applying the same manifests twice creates them once and reports
/// the second round as ignored conflicts
#[tokio::test]
async fn story_reapplying_manifests_is_harmless() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("base.yaml"), NAMESPACE_AND_CONFIG).unwrap();
    let plan = classify(dir.path().to_str().unwrap()).unwrap();
    let cluster = Arc::new(FakeCluster::new());
    let api: Arc<dyn ClusterApi> = cluster.clone();
    let catalog = ScenarioCatalog::builtin();

    let first = execute(api.clone(), &plan, &RunConfig::default(), &catalog)
        .await
        .unwrap();
    let second = execute(api, &plan, &RunConfig::default(), &catalog)
        .await
        .unwrap();

    assert_eq!(first.applied.created, 2);
    assert_eq!(second.applied.created, 0);
    assert_eq!(second.applied.ignored, 2);
    assert_eq!(cluster.len(), 2);
    assert!(first.tree.is_empty());
    assert_eq!(first.summary.actions, 0);
}

/// Story: CRD manifests are applied before everything else
#[tokio::test]
async fn story_crd_manifests_go_first() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a-app.yaml"), NAMESPACE_AND_CONFIG).unwrap();
    fs::write(
        dir.path().join("widgets-crd.yaml"),
        r#"
apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: widgets.example.com
spec:
  group: example.com
  names:
    kind: Widget
    plural: widgets
  scope: Namespaced
"#,
    )
    .unwrap();
    let plan = classify(dir.path().to_str().unwrap()).unwrap();
    let cluster = Arc::new(FakeCluster::new());
    let api: Arc<dyn ClusterApi> = cluster.clone();

    execute(api, &plan, &RunConfig::default(), &ScenarioCatalog::builtin())
        .await
        .unwrap();

    let crds = cluster.objects("customresourcedefinitions");
    let namespaces = cluster.objects("namespaces");
    assert_eq!(crds.len(), 1);
    assert_eq!(namespaces.len(), 1);
    let crd_version: u64 = crds[0].metadata.resource_version.as_deref().unwrap().parse().unwrap();
    let ns_version: u64 = namespaces[0].metadata.resource_version.as_deref().unwrap().parse().unwrap();
    assert!(crd_version < ns_version);
}

/// Story: a scenario file that names no known module stops the run before
/// anything executes
#[tokio::test]
async fn story_unknown_scenario_module_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("smoke.ts"), "").unwrap();
    let plan = classify(dir.path().to_str().unwrap()).unwrap();
    let api: Arc<dyn ClusterApi> = Arc::new(FakeCluster::new());

    let err = execute(api, &plan, &RunConfig::default(), &ScenarioCatalog::builtin())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ScenarioNotFound { name } if name == "smoke"));
}
