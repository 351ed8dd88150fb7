//! Bulk Deployment creation
//!
//! Submits a large batch of Deployments one after another. Together with the
//! reconcilers from the `deployment` module this fans out into thousands of
//! ReplicaSets and Pods.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use tracing::{debug, info};

use crate::resource::to_dynamic;
use crate::scenario::{ScenarioContext, TreeBuilder};
use crate::Result;

/// Deployments submitted by the load test
pub const LOAD_DEPLOYMENT_COUNT: usize = 1000;

/// Namespace the load test writes into
pub const LOAD_NAMESPACE: &str = "default";

const LOAD_REPLICAS: i32 = 3;

pub(super) fn register(builder: &mut TreeBuilder) {
    builder.group("LoadTest 1", |b| {
        b.leaf("should automatically create 1000 deployments", |ctx| {
            create_deployments(ctx, LOAD_DEPLOYMENT_COUNT)
        });
    });
}

/// Deployment `name` with three replicas of a single nginx container
pub fn load_deployment(name: &str) -> Deployment {
    let labels = BTreeMap::from([("app".to_string(), name.to_string())]);
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(LOAD_NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(LOAD_REPLICAS),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "app".to_string(),
                        image: Some("nginx:latest".to_string()),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

async fn create_deployments(ctx: ScenarioContext, count: usize) -> Result<()> {
    let mut created = 0usize;
    for i in 0..count {
        let name = format!("d-{}", i);
        let object = to_dynamic(&load_deployment(&name))?;
        match ctx.cluster().create(object).await {
            Ok(_) => created += 1,
            Err(e) if e.is_status() => {
                debug!(deployment = %name, error = %e, "ignoring rejected deployment");
            }
            Err(e) => return Err(e),
        }
    }
    info!(created, requested = count, "load test deployments submitted");
    Ok(())
}
