//! Cluster API access
//!
//! The harness needs exactly three calls against the API server: create an
//! object, list objects of a kind, and open a raw watch on a resource path.
//! They sit behind [`ClusterApi`] so reconcilers, the loader and scenario
//! actions can be exercised without a cluster.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use kube::api::{Api, DynamicObject, ListParams, PostParams, WatchEvent, WatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::{debug, info};

use crate::resource::{api_resource_of, build_api_resource, describe};
use crate::watch::WatchPath;
use crate::{Error, Result};

/// Raw notifications as delivered by the API server
pub type RawWatchStream = BoxStream<'static, kube::Result<WatchEvent<DynamicObject>>>;

/// Connection timeout for the API server (local test clusters answer fast)
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Field manager recorded on created objects
const FIELD_MANAGER: &str = "lattice-testenv";

/// The cluster operations the harness depends on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Create one object; returns the server's copy (with generated name and uid)
    async fn create(&self, object: DynamicObject) -> Result<DynamicObject>;

    /// List objects of a kind, optionally restricted to a namespace
    async fn list(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<String>,
    ) -> Result<Vec<DynamicObject>>;

    /// Open a watch on `path`, resuming after `resource_version` when given
    async fn watch(
        &self,
        path: &WatchPath,
        resource_version: Option<String>,
    ) -> Result<RawWatchStream>;
}

/// [`ClusterApi`] backed by a kube client
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    /// Wrap an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect to an unauthenticated test API server (TLS verification off).
    ///
    /// Building the client does no I/O; the first request opens the
    /// connection.
    pub async fn connect(api_server: &str) -> Result<Self> {
        let api_server = api_server.trim();
        if api_server.is_empty() {
            return Err(Error::configuration("API server endpoint is empty"));
        }
        install_crypto_provider();

        let kubeconfig = Kubeconfig::from_yaml(&test_env_kubeconfig(api_server))
            .map_err(|e| Error::configuration(format!("invalid kubeconfig: {}", e)))?;
        let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| {
                Error::configuration(format!("failed to load config for {}: {}", api_server, e))
            })?;
        config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
        // Watches sit idle for minutes between events
        config.read_timeout = None;

        let client = Client::try_from(config)
            .map_err(|e| Error::configuration(format!("failed to create client: {}", e)))?;
        info!(api_server = %api_server, "connected to test environment");
        Ok(Self::new(client))
    }
}

/// Install aws-lc-rs as the process-level rustls provider.
///
/// A provider installed earlier (by `main` or another connect) is kept.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Kubeconfig with a single insecure cluster and an anonymous user
fn test_env_kubeconfig(api_server: &str) -> String {
    format!(
        r#"apiVersion: v1
kind: Config
clusters:
- name: test-env-cluster
  cluster:
    server: "{api_server}"
    insecure-skip-tls-verify: true
contexts:
- name: test-env-context
  context:
    cluster: test-env-cluster
    user: test-env-user
users:
- name: test-env-user
  user: {{}}
current-context: test-env-context
"#
    )
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn create(&self, object: DynamicObject) -> Result<DynamicObject> {
        let ar = api_resource_of(&object)?;
        let api: Api<DynamicObject> = match object.metadata.namespace.as_deref() {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        };
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };

        let created = api.create(&params, &object).await?;
        debug!(object = %describe(&created), "created");
        Ok(created)
    }

    async fn list(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<String>,
    ) -> Result<Vec<DynamicObject>> {
        let ar = build_api_resource(api_version, kind);
        let api: Api<DynamicObject> = match namespace.as_deref() {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        };
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn watch(
        &self,
        path: &WatchPath,
        resource_version: Option<String>,
    ) -> Result<RawWatchStream> {
        let ar = path.api_resource();
        let api: Api<DynamicObject> = match path.namespace() {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        };
        let version = resource_version.unwrap_or_else(|| "0".to_string());
        let stream = api.watch(&WatchParams::default(), &version).await?;
        Ok(stream.boxed())
    }
}
