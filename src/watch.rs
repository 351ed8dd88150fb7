//! Event stream adapter
//!
//! Opens a raw watch on a resource path and hands every notification, in
//! arrival order, to exactly one [`EventHandler`]. The handler for event N
//! returns before event N+1 is read, so child submissions always trail the
//! parent updates that caused them.
//!
//! A failed stream is re-opened from the last resource version seen (object
//! or bookmark) under a bounded [`BackoffPolicy`]; the handler learns about it
//! through [`WatchEvent::Reconnected`]. Watch requests carry a server-side
//! timeout, so a stream that closes cleanly after running a while is renewed
//! from the same position without touching the retry budget. A subscription
//! ends only when its shutdown token is cancelled or the budget runs out.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use kube::error::ErrorResponse;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::BackoffPolicy;
use crate::cluster::{ClusterApi, RawWatchStream};
use crate::resource::{describe, kind_for_plural};
use crate::{Error, Result};

// =============================================================================
// Watch paths
// =============================================================================

/// A watchable collection, e.g. `/apis/apps/v1/deployments` or
/// `/api/v1/namespaces/default/pods`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchPath {
    raw: String,
    group: String,
    version: String,
    plural: String,
    namespace: Option<String>,
}

impl WatchPath {
    /// Parse an API collection path.
    ///
    /// Accepted shapes:
    /// - `/api/<version>/<plural>`
    /// - `/api/<version>/namespaces/<ns>/<plural>`
    /// - `/apis/<group>/<version>/<plural>`
    /// - `/apis/<group>/<version>/namespaces/<ns>/<plural>`
    pub fn parse(path: &str) -> Result<Self> {
        let parts: Vec<&str> = path
            .trim_start_matches('/')
            .trim_end_matches('/')
            .split('/')
            .collect();

        let (group, rest) = match parts.as_slice() {
            ["api", rest @ ..] => ("", rest),
            ["apis", group, rest @ ..] => (*group, rest),
            _ => return Err(Error::validation(format!("unknown API prefix in '{}'", path))),
        };

        let (version, namespace, plural) = match rest {
            [version, plural] => (*version, None, *plural),
            [version, "namespaces", ns, plural] => (*version, Some(*ns), *plural),
            _ => {
                return Err(Error::validation(format!(
                    "'{}' is not a collection path",
                    path
                )))
            }
        };

        if [group, version, plural].iter().any(|s| s.contains(char::is_whitespace))
            || version.is_empty()
            || plural.is_empty()
            || namespace.is_some_and(str::is_empty)
        {
            return Err(Error::validation(format!("malformed watch path '{}'", path)));
        }

        Ok(Self {
            raw: path.to_string(),
            group: group.to_string(),
            version: version.to_string(),
            plural: plural.to_string(),
            namespace: namespace.map(str::to_string),
        })
    }

    /// `ApiResource` for the watched collection
    pub fn api_resource(&self) -> ApiResource {
        let api_version = if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        };
        ApiResource {
            group: self.group.clone(),
            version: self.version.clone(),
            api_version,
            kind: kind_for_plural(&self.plural),
            plural: self.plural.clone(),
        }
    }

    /// Namespace restriction, if the path has one
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Resource plural (last path segment)
    pub fn plural(&self) -> &str {
        &self.plural
    }

    /// The path as given
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for WatchPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for WatchPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

// =============================================================================
// Events
// =============================================================================

/// Phase of a delivered event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchPhase {
    /// Object created
    Added,
    /// Object updated
    Modified,
    /// Object deleted
    Deleted,
    /// Position marker, no object
    Bookmark,
    /// Stream was re-established after a failure
    Reconnected,
}

impl fmt::Display for WatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WatchPhase::Added => "ADDED",
            WatchPhase::Modified => "MODIFIED",
            WatchPhase::Deleted => "DELETED",
            WatchPhase::Bookmark => "BOOKMARK",
            WatchPhase::Reconnected => "RECONNECTED",
        })
    }
}

/// A classified watch notification
#[derive(Clone, Debug)]
pub enum WatchEvent {
    /// Object created
    Added(DynamicObject),
    /// Object updated
    Modified(DynamicObject),
    /// Object deleted
    Deleted(DynamicObject),
    /// Position marker; never a resource change
    Bookmark {
        /// Resource version the stream has reached
        resource_version: String,
    },
    /// The subscription re-opened its stream after a failure
    Reconnected {
        /// Version the new stream resumes after (`None` = from the start)
        resource_version: Option<String>,
        /// Consecutive failure count that led to this reconnect
        attempt: u32,
    },
}

impl WatchEvent {
    /// Phase of this event
    pub fn phase(&self) -> WatchPhase {
        match self {
            WatchEvent::Added(_) => WatchPhase::Added,
            WatchEvent::Modified(_) => WatchPhase::Modified,
            WatchEvent::Deleted(_) => WatchPhase::Deleted,
            WatchEvent::Bookmark { .. } => WatchPhase::Bookmark,
            WatchEvent::Reconnected { .. } => WatchPhase::Reconnected,
        }
    }

    /// Object carried by the event, if any
    pub fn object(&self) -> Option<&DynamicObject> {
        match self {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) | WatchEvent::Deleted(obj) => {
                Some(obj)
            }
            WatchEvent::Bookmark { .. } | WatchEvent::Reconnected { .. } => None,
        }
    }

    /// Resource version a reconnect may resume from after this event
    fn resume_version(&self) -> Option<&str> {
        match self {
            WatchEvent::Bookmark { resource_version } => Some(resource_version.as_str()),
            _ => self.object()?.metadata.resource_version.as_deref(),
        }
    }
}

/// Split a raw notification into an event or a stream failure
fn classify(
    raw: kube::api::WatchEvent<DynamicObject>,
) -> std::result::Result<WatchEvent, ErrorResponse> {
    use kube::api::WatchEvent as Raw;
    match raw {
        Raw::Added(obj) => Ok(WatchEvent::Added(obj)),
        Raw::Modified(obj) => Ok(WatchEvent::Modified(obj)),
        Raw::Deleted(obj) => Ok(WatchEvent::Deleted(obj)),
        Raw::Bookmark(bookmark) => Ok(WatchEvent::Bookmark {
            resource_version: bookmark.metadata.resource_version,
        }),
        Raw::Error(status) => Err(status),
    }
}

/// Receiver of one subscription's events
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one event; errors are logged and do not end the subscription
    async fn handle(&self, event: WatchEvent) -> Result<()>;
}

/// Handler that only logs what it sees
#[derive(Clone, Debug, Default)]
pub struct LogEvents {
    label: String,
}

impl LogEvents {
    /// Logging handler tagged with `label`
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

#[async_trait]
impl EventHandler for LogEvents {
    async fn handle(&self, event: WatchEvent) -> Result<()> {
        match event.object() {
            Some(obj) => info!(
                label = %self.label,
                phase = %event.phase(),
                object = %describe(obj),
                "observed"
            ),
            None => info!(label = %self.label, phase = %event.phase(), "observed"),
        }
        Ok(())
    }
}

// =============================================================================
// Subscriptions
// =============================================================================

/// A stream closing sooner than this after opening counts as a failure
pub const MIN_STREAM_LIFETIME: Duration = Duration::from_secs(1);

/// How a subscription ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionReport {
    /// Watched path
    pub path: String,
    /// Events handed to the handler (bookmarks and reconnects included)
    pub delivered: u64,
    /// Successful reconnects after failures
    pub reconnects: u32,
    /// Streams re-opened after the server closed them at their timeout
    pub renewals: u32,
    /// Whether the subscription stopped because the retry budget ran out
    pub exhausted: bool,
}

/// Open a watch and deliver events to `handler` until `shutdown` is
/// cancelled or the retry budget is spent.
pub async fn subscribe(
    cluster: Arc<dyn ClusterApi>,
    path: WatchPath,
    handler: Arc<dyn EventHandler>,
    policy: BackoffPolicy,
    shutdown: CancellationToken,
) -> Result<SubscriptionReport> {
    let stream = cluster.watch(&path, None).await?;
    info!(path = %path, "watching");
    Ok(pump(cluster, path, handler, policy, shutdown, stream).await)
}

async fn pump(
    cluster: Arc<dyn ClusterApi>,
    path: WatchPath,
    handler: Arc<dyn EventHandler>,
    policy: BackoffPolicy,
    shutdown: CancellationToken,
    mut stream: RawWatchStream,
) -> SubscriptionReport {
    let mut report = SubscriptionReport {
        path: path.to_string(),
        delivered: 0,
        reconnects: 0,
        renewals: 0,
        exhausted: false,
    };
    let mut resume: Option<String> = None;
    let mut failures = 0u32;
    let mut opened_at = Instant::now();

    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!(path = %path, delivered = report.delivered, "watch stopped");
                return report;
            }
            next = stream.next() => next,
        };

        match next {
            Some(Ok(raw)) => match classify(raw) {
                Ok(event) => {
                    failures = 0;
                    if let Some(version) = event.resume_version() {
                        resume = Some(version.to_string());
                    }
                    deliver(&path, handler.as_ref(), event, &mut report).await;
                    continue;
                }
                Err(status) => {
                    warn!(
                        path = %path,
                        code = status.code,
                        reason = %status.reason,
                        message = %status.message,
                        "watch stream reported an error"
                    );
                    if status.code == 410 {
                        // Resume point expired; start over from a fresh list
                        resume = None;
                    }
                }
            },
            Some(Err(e)) => {
                warn!(path = %path, error = %e, "watch stream failed");
            }
            None if opened_at.elapsed() >= MIN_STREAM_LIFETIME => {
                debug!(path = %path, resource_version = ?resume, "watch stream timed out, renewing");
                match cluster.watch(&path, resume.clone()).await {
                    Ok(next) => {
                        stream = next;
                        opened_at = Instant::now();
                        report.renewals += 1;
                        continue;
                    }
                    Err(e) => warn!(path = %path, error = %e, "renewing watch failed"),
                }
            }
            None => {
                warn!(path = %path, "watch stream closed right after opening");
            }
        }

        // Failure: re-open the stream or give up
        loop {
            failures += 1;
            if !policy.allows(failures) {
                error!(path = %path, failures, "giving up on watch");
                report.exhausted = true;
                return report;
            }

            let delay = policy.delay(failures);
            debug!(path = %path, attempt = failures, delay_ms = delay.as_millis() as u64, "reconnecting watch");
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!(path = %path, delivered = report.delivered, "watch stopped");
                    return report;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            match cluster.watch(&path, resume.clone()).await {
                Ok(next) => {
                    stream = next;
                    opened_at = Instant::now();
                    report.reconnects += 1;
                    let event = WatchEvent::Reconnected {
                        resource_version: resume.clone(),
                        attempt: failures,
                    };
                    deliver(&path, handler.as_ref(), event, &mut report).await;
                    break;
                }
                Err(e) => warn!(path = %path, attempt = failures, error = %e, "reconnect failed"),
            }
        }
    }
}

async fn deliver(
    path: &WatchPath,
    handler: &dyn EventHandler,
    event: WatchEvent,
    report: &mut SubscriptionReport,
) {
    match &event {
        WatchEvent::Bookmark { resource_version } => {
            debug!(path = %path, "bookmark: {}", resource_version);
        }
        WatchEvent::Reconnected {
            resource_version,
            attempt,
        } => {
            info!(path = %path, attempt, resource_version = ?resource_version, "watch reconnected");
        }
        other => {
            if let Some(obj) = other.object() {
                debug!(path = %path, phase = %other.phase(), object = %describe(obj), "watch event");
            }
        }
    }

    let phase = event.phase();
    report.delivered += 1;
    if let Err(e) = handler.handle(event).await {
        error!(path = %path, phase = %phase, error = %e, "event handler failed");
    }
}

/// Concurrently running subscriptions.
///
/// Each watch runs as its own task; different paths interleave freely while
/// every single path stays strictly ordered. All of them stop when the set's
/// shutdown token is cancelled.
#[derive(Default)]
pub struct SubscriptionSet {
    tasks: Mutex<JoinSet<SubscriptionReport>>,
    shutdown: CancellationToken,
}

impl SubscriptionSet {
    /// Empty set with its own shutdown token
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty set stopped by `shutdown`
    pub fn with_shutdown(shutdown: CancellationToken) -> Self {
        Self {
            tasks: Mutex::default(),
            shutdown,
        }
    }

    /// Open the watch now and keep delivering in the background.
    ///
    /// Errors opening the initial stream are returned to the caller.
    pub async fn start(
        &self,
        cluster: Arc<dyn ClusterApi>,
        path: WatchPath,
        handler: Arc<dyn EventHandler>,
        policy: BackoffPolicy,
    ) -> Result<()> {
        let stream = cluster.watch(&path, None).await?;
        info!(path = %path, "watching");
        let shutdown = self.shutdown.clone();
        self.tasks
            .lock()
            .await
            .spawn(pump(cluster, path, handler, policy, shutdown, stream));
        Ok(())
    }

    /// Number of subscriptions not yet collected
    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Whether no subscriptions are running
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Ask every subscription to stop after the event it is handling
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait for every running subscription to end
    pub async fn wait_all(&self) -> Vec<SubscriptionReport> {
        let mut tasks = std::mem::take(&mut *self.tasks.lock().await);
        let mut reports = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => error!(error = %e, "subscription task failed"),
            }
        }
        reports
    }

    /// Stop every running subscription without waiting for handlers
    pub async fn abort_all(&self) {
        self.tasks.lock().await.abort_all();
    }
}
