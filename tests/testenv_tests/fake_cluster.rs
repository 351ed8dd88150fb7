//! In-memory API server stand-in
//!
//! Stores created objects, assigns `generateName` suffixes, uids and resource
//! versions, and pushes `ADDED` notifications to every open watch on the
//! object's plural. A new watch first replays the stored objects newer than
//! the resource version it was opened from (all of them when it has none).

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use kube::api::{DynamicObject, WatchEvent};
use kube::error::ErrorResponse;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use lattice_testenv::cluster::{ClusterApi, RawWatchStream};
use lattice_testenv::resource::{describe, pluralize_kind};
use lattice_testenv::watch::WatchPath;
use lattice_testenv::Result;

type Sender = mpsc::UnboundedSender<kube::Result<WatchEvent<DynamicObject>>>;

struct Watcher {
    plural: String,
    namespace: Option<String>,
    sender: Sender,
}

impl Watcher {
    fn wants(&self, plural: &str, namespace: Option<&str>) -> bool {
        self.plural == plural && (self.namespace.is_none() || self.namespace.as_deref() == namespace)
    }
}

#[derive(Default)]
struct State {
    objects: Vec<(String, DynamicObject)>,
    watchers: Vec<Watcher>,
    resource_version: u64,
}

/// In-memory [`ClusterApi`]
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored objects of a plural, in creation order
    pub fn objects(&self, plural: &str) -> Vec<DynamicObject> {
        self.state
            .lock()
            .unwrap()
            .objects
            .iter()
            .filter(|(p, _)| p == plural)
            .map(|(_, obj)| obj.clone())
            .collect()
    }

    /// Total number of stored objects
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().objects.len()
    }

    /// Poll until `plural` holds at least `count` objects
    pub async fn wait_for(&self, plural: &str, count: usize) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while self.objects(plural).len() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {count} {plural}"));
    }
}

fn already_exists(plural: &str, name: &str) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{plural} \"{name}\" already exists"),
        reason: "AlreadyExists".to_string(),
        code: 409,
    })
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn create(&self, mut object: DynamicObject) -> Result<DynamicObject> {
        let kind = object
            .types
            .as_ref()
            .map(|t| t.kind.clone())
            .expect("object without kind");
        let plural = pluralize_kind(&kind);

        let mut state = self.state.lock().unwrap();

        let name = match (&object.metadata.name, &object.metadata.generate_name) {
            (Some(name), _) => name.clone(),
            (None, Some(prefix)) => {
                let suffix = uuid::Uuid::new_v4().simple().to_string();
                format!("{}{}", prefix, &suffix[..5])
            }
            (None, None) => panic!("{} has neither name nor generateName", describe(&object)),
        };
        let taken = state.objects.iter().any(|(p, o)| {
            p == &plural
                && o.metadata.name.as_deref() == Some(name.as_str())
                && o.metadata.namespace == object.metadata.namespace
        });
        if taken {
            return Err(already_exists(&plural, &name).into());
        }

        state.resource_version += 1;
        object.metadata.name = Some(name);
        object.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        object.metadata.resource_version = Some(state.resource_version.to_string());

        let namespace = object.metadata.namespace.clone();
        state.watchers.retain(|w| {
            !w.wants(&plural, namespace.as_deref())
                || w.sender.send(Ok(WatchEvent::Added(object.clone()))).is_ok()
        });
        state.objects.push((plural, object.clone()));
        Ok(object)
    }

    async fn list(
        &self,
        _api_version: &str,
        kind: &str,
        namespace: Option<String>,
    ) -> Result<Vec<DynamicObject>> {
        let plural = pluralize_kind(kind);
        Ok(self
            .objects(&plural)
            .into_iter()
            .filter(|o| namespace.is_none() || o.metadata.namespace == namespace)
            .collect())
    }

    async fn watch(
        &self,
        path: &WatchPath,
        resource_version: Option<String>,
    ) -> Result<RawWatchStream> {
        let since: u64 = resource_version
            .as_deref()
            .and_then(|rv| rv.parse().ok())
            .unwrap_or(0);
        let (sender, receiver) = mpsc::unbounded_channel();
        let watcher = Watcher {
            plural: path.plural().to_string(),
            namespace: path.namespace().map(str::to_string),
            sender,
        };

        let mut state = self.state.lock().unwrap();
        for (plural, object) in &state.objects {
            let version: u64 = object
                .metadata
                .resource_version
                .as_deref()
                .and_then(|rv| rv.parse().ok())
                .unwrap_or(0);
            if version > since && watcher.wants(plural, object.metadata.namespace.as_deref()) {
                let _ = watcher.sender.send(Ok(WatchEvent::Added(object.clone())));
            }
        }
        state.watchers.push(watcher);
        Ok(UnboundedReceiverStream::new(receiver).boxed())
    }
}
