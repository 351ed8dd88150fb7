//! OpenShift DeploymentConfig outline
//!
//! Only the first leaf does anything: it watches DeploymentConfigs and logs
//! what arrives.

use std::sync::Arc;

use crate::scenario::{ScenarioContext, TreeBuilder};
use crate::watch::LogEvents;

const DEPLOYMENT_CONFIGS: &str = "/apis/apps.openshift.io/v1/deploymentconfigs";

pub(super) fn register(builder: &mut TreeBuilder) {
    builder.group("DeploymentConfig", |b| {
        b.group("level 2", |b| {
            b.group("level 3", |b| {
                b.leaf(
                    "automatically start a Pod based on x",
                    |ctx: ScenarioContext| async move {
                        ctx.watch(DEPLOYMENT_CONFIGS, Arc::new(LogEvents::new("DeploymentConfig")))
                            .await
                    },
                );
            });
        });
        b.leaf("automatically start these Pods after a second", |_| async { Ok(()) });
        b.leaf("automatically removes all Pods if the DC is deleted", |_| async { Ok(()) });
    });
}
