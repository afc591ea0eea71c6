//! Shared fakes for provisioning tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{DynamicObject, WatchEvent};
use serde_json::{json, Value};

use networksim_deploy::deploy::Connector;
use networksim_deploy::host::display_command;
use networksim_deploy::k8s::{ClusterApi, WatchStream};
use networksim_deploy::network::{NetworkApi, NetworkInfo};
use networksim_deploy::{DeployError, Result};

/// Host fake that records every command instead of running it.
#[derive(Default)]
pub struct RecordingHost {
    pub commands: Mutex<Vec<String>>,
    pub missing: HashSet<String>,
    /// Commands starting with one of these prefixes fail.
    pub failing: Vec<String>,
    /// Captured stdout keyed by command prefix.
    pub outputs: HashMap<String, String>,
    pub files: HashSet<PathBuf>,
    /// Contents of files passed to `kubectl apply -f` at apply time.
    pub applied: Mutex<HashMap<PathBuf, String>>,
    /// `DOCKER_CONFIG` as seen by each `docker` invocation.
    pub docker_config: Mutex<Vec<Option<String>>>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn missing(mut self, bin: &str) -> Self {
        self.missing.insert(bin.to_string());
        self
    }

    pub fn failing(mut self, prefix: &str) -> Self {
        self.failing.push(prefix.to_string());
        self
    }

    pub fn output(mut self, prefix: &str, stdout: &str) -> Self {
        self.outputs.insert(prefix.to_string(), stdout.to_string());
        self
    }

    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.insert(path.into());
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.commands().iter().position(|c| c.starts_with(prefix))
    }

    fn record(&self, program: &str, args: &[String]) -> Result<String> {
        let line = std::iter::once(program.to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        self.commands.lock().unwrap().push(line.clone());

        if program == "docker" {
            self.docker_config
                .lock()
                .unwrap()
                .push(std::env::var("DOCKER_CONFIG").ok());
        }
        if program == "kubectl" && args.len() == 3 && args[0] == "apply" && args[1] == "-f" {
            if let Ok(content) = std::fs::read_to_string(&args[2]) {
                self.applied
                    .lock()
                    .unwrap()
                    .insert(PathBuf::from(&args[2]), content);
            }
        }

        if self.failing.iter().any(|p| line.starts_with(p)) {
            return Err(DeployError::command_failed(
                display_command(program, args),
                "exit status: 1",
            ));
        }
        Ok(self
            .outputs
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl networksim_deploy::host::Host for RecordingHost {
    async fn look_path(&self, bin: &str) -> bool {
        !self.missing.contains(bin)
    }

    async fn file_exists(&self, path: &Path) -> bool {
        self.files.contains(path)
    }

    async fn exec(&self, program: &str, args: &[String]) -> Result<()> {
        self.record(program, args).map(|_| ())
    }

    async fn exec_output(&self, program: &str, args: &[String]) -> Result<String> {
        self.record(program, args)
    }
}

/// In-memory cluster API with scripted watch streams.
///
/// Namespaces without a script get a watch that never yields.
#[derive(Default)]
pub struct FakeClusterApi {
    pub secrets: Mutex<HashMap<(String, String), Secret>>,
    pub config_maps: Mutex<HashMap<(String, String), ConfigMap>>,
    pub secret_creates: AtomicUsize,
    pub config_map_creates: AtomicUsize,
    pub deployment_events: Mutex<HashMap<String, Vec<Value>>>,
    pub daemon_set_events: Mutex<HashMap<String, Vec<Value>>>,
    pub field_selectors: Mutex<Vec<Option<String>>>,
    /// Namespaces whose watch stream ends once the script runs out.
    pub closing: Mutex<HashSet<String>>,
}

impl FakeClusterApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deployments(self, namespace: &str, events: Vec<Value>) -> Self {
        self.deployment_events
            .lock()
            .unwrap()
            .insert(namespace.to_string(), events);
        self
    }

    pub fn daemon_sets(self, namespace: &str, events: Vec<Value>) -> Self {
        self.daemon_set_events
            .lock()
            .unwrap()
            .insert(namespace.to_string(), events);
        self
    }

    pub fn closing(self, namespace: &str) -> Self {
        self.closing.lock().unwrap().insert(namespace.to_string());
        self
    }

    pub fn creates(&self) -> usize {
        self.secret_creates.load(Ordering::SeqCst) + self.config_map_creates.load(Ordering::SeqCst)
    }

    pub fn config_map(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        self.config_maps
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    fn stream(&self, namespace: &str, script: Option<Vec<Value>>) -> WatchStream {
        let closing = self.closing.lock().unwrap().contains(namespace);
        match script {
            Some(values) => {
                let events = futures::stream::iter(values.into_iter().map(modified));
                if closing {
                    events.boxed()
                } else {
                    events.chain(futures::stream::pending()).boxed()
                }
            }
            None if closing => futures::stream::empty().boxed(),
            None => futures::stream::pending().boxed(),
        }
    }
}

fn modified(value: Value) -> kube::Result<WatchEvent<DynamicObject>> {
    Ok(WatchEvent::Modified(serde_json::from_value(value).unwrap()))
}

fn key(namespace: &str, name: Option<&String>) -> (String, String) {
    (namespace.to_string(), name.cloned().unwrap_or_default())
}

#[async_trait]
impl ClusterApi for FakeClusterApi {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Ok(self
            .secrets
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<()> {
        self.secret_creates.fetch_add(1, Ordering::SeqCst);
        self.secrets
            .lock()
            .unwrap()
            .insert(key(namespace, secret.metadata.name.as_ref()), secret.clone());
        Ok(())
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        Ok(self.config_map(namespace, name))
    }

    async fn create_config_map(&self, namespace: &str, config_map: &ConfigMap) -> Result<()> {
        self.config_map_creates.fetch_add(1, Ordering::SeqCst);
        self.config_maps.lock().unwrap().insert(
            key(namespace, config_map.metadata.name.as_ref()),
            config_map.clone(),
        );
        Ok(())
    }

    async fn watch_deployments(&self, namespace: &str) -> Result<WatchStream> {
        self.field_selectors.lock().unwrap().push(None);
        let script = self.deployment_events.lock().unwrap().get(namespace).cloned();
        Ok(self.stream(namespace, script))
    }

    async fn watch_daemon_sets(
        &self,
        namespace: &str,
        field_selector: Option<&str>,
    ) -> Result<WatchStream> {
        self.field_selectors
            .lock()
            .unwrap()
            .push(field_selector.map(str::to_string));
        let script = self.daemon_set_events.lock().unwrap().get(namespace).cloned();
        Ok(self.stream(namespace, script))
    }
}

/// Connector handing out a prebuilt fake.
pub struct FakeConnector(pub Arc<FakeClusterApi>);

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, _kubeconfig: &Path) -> Result<Arc<dyn ClusterApi>> {
        Ok(self.0.clone())
    }
}

/// Static docker network listing.
pub struct StaticNetworks(pub Vec<NetworkInfo>);

impl StaticNetworks {
    pub fn kind(subnets: &[&str]) -> Self {
        Self(vec![
            NetworkInfo {
                name: "bridge".into(),
                subnets: vec!["172.17.0.0/16".into()],
            },
            NetworkInfo {
                name: "kind".into(),
                subnets: subnets.iter().map(|s| s.to_string()).collect(),
            },
        ])
    }
}

#[async_trait]
impl NetworkApi for StaticNetworks {
    async fn list_networks(&self) -> Result<Vec<NetworkInfo>> {
        Ok(self.0.clone())
    }
}

pub fn ready_deployment(namespace: &str, name: &str, replicas: i32) -> Value {
    deployment(namespace, name, replicas, replicas, 0)
}

pub fn deployment(namespace: &str, name: &str, desired: i32, ready: i32, unavailable: i32) -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": name, "namespace": namespace },
        "spec": { "replicas": desired, "selector": {}, "template": {} },
        "status": {
            "availableReplicas": ready,
            "readyReplicas": ready,
            "replicas": desired,
            "updatedReplicas": desired,
            "unavailableReplicas": unavailable,
        },
    })
}

pub fn daemon_set(desired: i32, ready: i32, unavailable: i32) -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "DaemonSet",
        "metadata": { "name": "meshnet", "namespace": "meshnet" },
        "status": {
            "currentNumberScheduled": desired,
            "desiredNumberScheduled": desired,
            "numberMisscheduled": 0,
            "numberReady": ready,
            "numberUnavailable": unavailable,
        },
    })
}
