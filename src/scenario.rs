//! Scenario tree: builder, printer and runner
//!
//! Scenario modules describe a test suite as nested named groups holding leaf
//! actions. Registration goes through a [`TreeBuilder`] that is passed down
//! the loading chain; [`TreeBuilder::build`] freezes the result into a
//! [`ScenarioTree`] which is then rendered once and run once.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, info};

use crate::backoff::BackoffPolicy;
use crate::cluster::ClusterApi;
use crate::reconcile::{ReconcilableKind, ReconcileSettings, Reconciler};
use crate::watch::{EventHandler, SubscriptionSet, WatchPath};
use crate::Result;

/// Future returned by a leaf action
pub type ActionFuture = BoxFuture<'static, Result<()>>;

/// Leaf action: receives the shared context, resolves when done
pub type Action = Arc<dyn Fn(ScenarioContext) -> ActionFuture + Send + Sync>;

// =============================================================================
// Context
// =============================================================================

/// Everything a leaf action may use while running
#[derive(Clone)]
pub struct ScenarioContext {
    cluster: Arc<dyn ClusterApi>,
    reconcile: ReconcileSettings,
    backoff: BackoffPolicy,
    subscriptions: Arc<SubscriptionSet>,
}

impl ScenarioContext {
    /// Context with a fresh subscription set
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        reconcile: ReconcileSettings,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            cluster,
            reconcile,
            backoff,
            subscriptions: Arc::new(SubscriptionSet::new()),
        }
    }

    /// Use `subscriptions` for watches started by actions
    pub fn with_subscriptions(mut self, subscriptions: Arc<SubscriptionSet>) -> Self {
        self.subscriptions = subscriptions;
        self
    }

    /// Shared cluster access
    pub fn cluster(&self) -> &Arc<dyn ClusterApi> {
        &self.cluster
    }

    /// Reconciler pacing and duplicate handling
    pub fn reconcile_settings(&self) -> &ReconcileSettings {
        &self.reconcile
    }

    /// Reconnect policy for watches started from this context
    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    /// Watches started by actions
    pub fn subscriptions(&self) -> &Arc<SubscriptionSet> {
        &self.subscriptions
    }

    /// Start a watch on `path` feeding `handler`
    pub async fn watch(&self, path: &str, handler: Arc<dyn EventHandler>) -> Result<()> {
        let path = WatchPath::parse(path)?;
        self.subscriptions
            .start(self.cluster.clone(), path, handler, self.backoff.clone())
            .await
    }

    /// Start the reconciler for `kind` on its watch path
    pub async fn watch_kind(&self, kind: ReconcilableKind) -> Result<()> {
        let reconciler = Reconciler::new(kind, self.cluster.clone(), &self.reconcile);
        self.watch(kind.watch_path(), Arc::new(reconciler)).await
    }
}

// =============================================================================
// Nodes
// =============================================================================

/// Group or leaf
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    /// Named container of other nodes
    Group,
    /// Named action
    Leaf,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NodeKind::Group => "describe",
            NodeKind::Leaf => "it",
        })
    }
}

/// One node of a [`ScenarioTree`]. Only leaves carry an action.
#[derive(Clone)]
pub struct ScenarioNode {
    kind: NodeKind,
    name: String,
    children: Vec<ScenarioNode>,
    action: Option<Action>,
}

impl ScenarioNode {
    fn group(name: String, children: Vec<ScenarioNode>) -> Self {
        Self {
            kind: NodeKind::Group,
            name,
            children,
            action: None,
        }
    }

    fn leaf(name: String, action: Action) -> Self {
        Self {
            kind: NodeKind::Leaf,
            name,
            children: Vec::new(),
            action: Some(action),
        }
    }

    /// Group or leaf
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Children in registration order
    pub fn children(&self) -> &[ScenarioNode] {
        &self.children
    }

    /// Whether the node runs anything
    pub fn has_action(&self) -> bool {
        self.action.is_some()
    }
}

impl fmt::Debug for ScenarioNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScenarioNode")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("children", &self.children)
            .field("has_action", &self.action.is_some())
            .finish()
    }
}

// =============================================================================
// Builder
// =============================================================================

struct Frame {
    name: String,
    children: Vec<ScenarioNode>,
}

/// Collects registrations into a tree.
///
/// ```
/// use lattice_testenv::scenario::TreeBuilder;
///
/// let mut builder = TreeBuilder::new();
/// builder.group("A", |b| {
///     b.leaf("a1", |_| async { Ok(()) });
/// });
/// let tree = builder.build();
/// assert_eq!(tree.render(), "- describe A\n  - it a1\n");
/// ```
#[derive(Default)]
pub struct TreeBuilder {
    roots: Vec<ScenarioNode>,
    frames: Vec<Frame>,
}

impl TreeBuilder {
    /// Empty builder
    pub fn new() -> Self {
        Self::default()
    }

    fn current(&mut self) -> &mut Vec<ScenarioNode> {
        match self.frames.last_mut() {
            Some(frame) => &mut frame.children,
            None => &mut self.roots,
        }
    }

    /// Register a group; `body` registers its children
    pub fn group(&mut self, name: impl Into<String>, body: impl FnOnce(&mut Self)) -> &mut Self {
        self.frames.push(Frame {
            name: name.into(),
            children: Vec::new(),
        });
        body(self);
        if let Some(frame) = self.frames.pop() {
            let node = ScenarioNode::group(frame.name, frame.children);
            self.current().push(node);
        }
        self
    }

    /// Register a leaf action in the current group
    pub fn leaf<F, Fut>(&mut self, name: impl Into<String>, action: F) -> &mut Self
    where
        F: Fn(ScenarioContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let action: Action = Arc::new(move |ctx| action(ctx).boxed());
        let node = ScenarioNode::leaf(name.into(), action);
        self.current().push(node);
        self
    }

    /// Freeze everything registered so far
    pub fn build(self) -> ScenarioTree {
        ScenarioTree { roots: self.roots }
    }
}

// =============================================================================
// Tree
// =============================================================================

/// Immutable scenario tree
#[derive(Clone, Debug, Default)]
pub struct ScenarioTree {
    roots: Vec<ScenarioNode>,
}

impl ScenarioTree {
    /// Top-level nodes
    pub fn roots(&self) -> &[ScenarioNode] {
        &self.roots
    }

    /// Whether nothing was registered
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Number of nodes carrying an action
    pub fn action_count(&self) -> usize {
        fn count(nodes: &[ScenarioNode]) -> usize {
            nodes
                .iter()
                .map(|n| usize::from(n.has_action()) + count(&n.children))
                .sum()
        }
        count(&self.roots)
    }

    /// Outline of the tree, one `- <kind> <name>` line per node, indented
    /// two spaces per level. Nothing is executed.
    pub fn render(&self) -> String {
        fn walk(nodes: &[ScenarioNode], depth: usize, out: &mut String) {
            for node in nodes {
                out.push_str(&"  ".repeat(depth));
                out.push_str(&format!("- {} {}\n", node.kind, node.name));
                walk(&node.children, depth + 1, out);
            }
        }
        let mut out = String::new();
        walk(&self.roots, 0, &mut out);
        out
    }
}

impl fmt::Display for ScenarioTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

// =============================================================================
// Runner
// =============================================================================

/// Outcome of a completed run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Actions executed
    pub actions: usize,
}

/// Executes a tree depth-first, one action at a time
pub struct ScenarioRunner {
    context: ScenarioContext,
}

impl ScenarioRunner {
    /// Runner handing `context` to every action
    pub fn new(context: ScenarioContext) -> Self {
        Self { context }
    }

    /// Context given to actions
    pub fn context(&self) -> &ScenarioContext {
        &self.context
    }

    /// Run every action in pre-order. The first failing action aborts the run.
    pub async fn run(&self, tree: &ScenarioTree) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        for node in tree.roots() {
            self.run_node(node, &mut summary).await?;
        }
        info!(actions = summary.actions, "scenario run complete");
        Ok(summary)
    }

    fn run_node<'a>(
        &'a self,
        node: &'a ScenarioNode,
        summary: &'a mut RunSummary,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if let Some(action) = &node.action {
                info!("[RUN] {} {}", node.kind, node.name);
                action(self.context.clone()).await?;
                summary.actions += 1;
            } else {
                debug!(kind = %node.kind, name = %node.name, "entering");
            }
            for child in &node.children {
                self.run_node(child, summary).await?;
            }
            Ok(())
        })
    }
}
