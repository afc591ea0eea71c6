//! Readiness watches
//!
//! Consumes a raw watch stream and blocks until an object satisfies a
//! readiness predicate, the context finishes, or the stream ends.

use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use kube::api::{DynamicObject, WatchEvent};
use kube::Resource;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::client::{ClusterApi, WatchStream};
use crate::context::{Context, Done};
use crate::error::{DeployError, Result};

/// Waits on `stream` until an object of kind `K` satisfies `ready`.
///
/// Every added, modified or deleted object is evaluated. Bookmarks are
/// skipped; an error event carries a `Status` object and is reported as a
/// type mismatch.
pub async fn wait_for<K, P>(
    ctx: &Context,
    mut stream: WatchStream,
    target: &str,
    mut ready: P,
) -> Result<()>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
    P: FnMut(&K) -> bool,
{
    loop {
        tokio::select! {
            done = ctx.done() => {
                return Err(match done {
                    Done::Cancelled => DeployError::cancelled(target),
                    Done::DeadlineExceeded => DeployError::timeout(target),
                });
            }
            event = stream.next() => {
                let object = match event {
                    None => return Err(DeployError::stream_closed(target)),
                    Some(Err(e)) => return Err(DeployError::api(format!("watch {}", target), e)),
                    Some(Ok(WatchEvent::Bookmark(_))) => continue,
                    Some(Ok(WatchEvent::Error(status))) => {
                        debug!(code = status.code, message = %status.message, "Watch error event");
                        return Err(DeployError::type_mismatch(K::kind(&()), "Status"));
                    }
                    Some(Ok(WatchEvent::Added(o)))
                    | Some(Ok(WatchEvent::Modified(o)))
                    | Some(Ok(WatchEvent::Deleted(o))) => o,
                };
                let object: K = parse_object(object)?;
                if ready(&object) {
                    return Ok(());
                }
            }
        }
    }
}

fn parse_object<K>(object: DynamicObject) -> Result<K>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    let expected = K::kind(&());
    if let Some(types) = &object.types {
        if types.kind != expected {
            return Err(DeployError::type_mismatch(expected, types.kind.clone()));
        }
    }
    let value = serde_json::to_value(&object).map_err(DeployError::serialization)?;
    serde_json::from_value(value).map_err(|e| DeployError::type_mismatch(expected, e.to_string()))
}

/// Deployment readiness: every replica counter matches the desired count
/// (1 when unset) and nothing is unavailable.
pub fn deployment_ready(deployment: &Deployment) -> bool {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let status = deployment.status.clone().unwrap_or_default();

    status.available_replicas.unwrap_or(0) == desired
        && status.ready_replicas.unwrap_or(0) == desired
        && status.unavailable_replicas.unwrap_or(0) == 0
        && status.replicas.unwrap_or(0) == desired
        && status.updated_replicas.unwrap_or(0) == desired
}

/// Daemon set readiness: every scheduled pod is ready and none unavailable.
pub fn daemon_set_ready(daemon_set: &DaemonSet) -> bool {
    let status = daemon_set.status.clone().unwrap_or_default();
    status.number_ready == status.desired_number_scheduled
        && status.number_unavailable.unwrap_or(0) == 0
}

/// Waits until any deployment in `namespace` reports ready.
///
/// There is no name filter: the first deployment in the namespace to reach
/// readiness ends the wait.
pub async fn wait_for_deployments(
    ctx: &Context,
    api: &dyn ClusterApi,
    namespace: &str,
) -> Result<()> {
    info!(namespace, "Waiting on deployments to be healthy");
    let target = format!("deployments in {}", namespace);
    let stream = api.watch_deployments(namespace).await?;
    wait_for::<Deployment, _>(ctx, stream, &target, deployment_ready).await?;
    info!(namespace, "Deployments healthy");
    Ok(())
}

/// Waits until the daemon set `name` in `namespace` reports ready.
pub async fn wait_for_daemon_set(
    ctx: &Context,
    api: &dyn ClusterApi,
    namespace: &str,
    name: &str,
) -> Result<()> {
    info!(namespace, name, "Waiting on daemon set to be healthy");
    let target = format!("daemon set {}/{}", namespace, name);
    let selector = format!("metadata.name={}", name);
    let stream = api.watch_daemon_sets(namespace, Some(&selector)).await?;
    wait_for::<DaemonSet, _>(ctx, stream, &target, daemon_set_ready).await?;
    info!(namespace, name, "Daemon set healthy");
    Ok(())
}
