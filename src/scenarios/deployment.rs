//! Deployment and ReplicaSet controller stand-ins

use crate::reconcile::ReconcilableKind;
use crate::scenario::{ScenarioContext, TreeBuilder};

pub(super) fn register(builder: &mut TreeBuilder) {
    builder.group("Deployment", |b| {
        b.leaf(
            "automatically create a ReplicaSet when a Deployment is created",
            |ctx: ScenarioContext| async move { ctx.watch_kind(ReconcilableKind::Deployment).await },
        );
    });
    builder.group("ReplicaSet", |b| {
        b.leaf(
            "automatically create a Pod when a ReplicaSet is created",
            |ctx: ScenarioContext| async move { ctx.watch_kind(ReconcilableKind::ReplicaSet).await },
        );
    });
}
