//! Integration tests for the test environment
//!
//! # Test Organization
//!
//! - `fake_cluster`: in-memory [`ClusterApi`](lattice_testenv::cluster::ClusterApi)
//!   that assigns names and uids and fans created objects out to watchers
//!
//! - `reconcile_flow`: stories about Deployments turning into ReplicaSets and
//!   running Pods through the compiled-in `deployment` scenario
//!
//! - `loader_flow`: stories about resource lists, manifest apply and
//!   scenario module selection

mod fake_cluster;
mod loader_flow;
mod reconcile_flow;
