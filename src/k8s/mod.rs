//! Kubernetes integration for cluster provisioning
//!
//! This module handles the cluster-side half of provisioning:
//! - Building a shared API handle from the kubeconfig kind writes
//! - Idempotent creation of the secrets and config maps add-ons need
//! - Watching deployments and daemon sets until they report ready

mod client;
mod watcher;

pub use client::{ClusterApi, K8sClient, WatchStream};
pub use watcher::{
    daemon_set_ready, deployment_ready, wait_for, wait_for_daemon_set, wait_for_deployments,
};
