//! kind cluster lifecycle
//!
//! Creates, recycles and deletes the kind cluster, and optionally wires
//! Google Artifact Registry credentials into every node and preloads
//! container images.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, instrument};

use super::Cluster;
use crate::context::Context;
use crate::error::{DeployError, Result};
use crate::host::{args, check_dependencies, Host};

pub const DEFAULT_CLUSTER_NAME: &str = "kind";

const DOCKER_CONFIG_ENV: &str = "DOCKER_CONFIG";
const KUBELET_CONFIG_PATH: &str = "/var/lib/kubelet/config.json";
const REGISTRY_USER: &str = "oauth2accesstoken";

/// Declarative description of a kind cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KindSpec {
    pub name: Option<String>,
    pub recycle: bool,
    pub version: Option<String>,
    pub image: Option<String>,
    pub retain: bool,
    /// Seconds `kind create cluster` waits for the control plane.
    #[serde(with = "seconds")]
    pub wait: Option<Duration>,
    #[serde(rename = "kubecfg")]
    pub kubeconfig: Option<PathBuf>,
    pub google_artifact_registries: Vec<String>,
    /// Source image to the tag it is loaded into the cluster as.
    pub container_images: BTreeMap<String, String>,
    #[serde(rename = "config")]
    pub kind_config_file: Option<PathBuf>,
    pub additional_manifests: Vec<PathBuf>,
}

mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}

/// A kind cluster driven through the host CLIs.
pub struct KindCluster {
    spec: KindSpec,
    host: Arc<dyn Host>,
}

impl KindCluster {
    pub fn new(spec: KindSpec, host: Arc<dyn Host>) -> Self {
        Self { spec, host }
    }

    fn context_name(&self) -> String {
        format!("kind-{}", self.name())
    }

    /// The configured name; an empty name counts as unset.
    fn configured_name(&self) -> Option<&str> {
        self.spec.name.as_deref().filter(|n| !n.is_empty())
    }

    /// `--name` is only passed when a name was configured.
    fn push_name(&self, args: &mut Vec<String>) {
        if let Some(name) = self.configured_name() {
            args.push("--name".into());
            args.push(name.to_string());
        }
    }

    async fn check_dependencies(&self) -> Result<()> {
        let mut bins = vec!["kind"];
        if !self.spec.google_artifact_registries.is_empty() {
            bins.push("gcloud");
        }
        check_dependencies(self.host.as_ref(), &bins).await
    }

    fn create_args(&self) -> Vec<String> {
        let mut args = args(["create", "cluster"]);
        self.push_name(&mut args);
        if let Some(image) = &self.spec.image {
            args.push("--image".into());
            args.push(image.clone());
        }
        if self.spec.retain {
            args.push("--retain".into());
        }
        if let Some(wait) = self.spec.wait.filter(|w| !w.is_zero()) {
            args.push("--wait".into());
            args.push(format!("{}s", wait.as_secs()));
        }
        if let Some(kubeconfig) = &self.spec.kubeconfig {
            args.push("--kubeconfig".into());
            args.push(kubeconfig.display().to_string());
        }
        if let Some(config) = &self.spec.kind_config_file {
            args.push("--config".into());
            args.push(config.display().to_string());
        }
        args
    }

    #[instrument(skip(self), fields(registries = ?self.spec.google_artifact_registries))]
    async fn setup_registry_access(&self) -> Result<()> {
        // A fresh docker config without a credsStore, so `docker login`
        // writes the token straight into config.json.
        let temp_dir = tempfile::Builder::new()
            .prefix("networksim_kind_docker")
            .tempdir()?;
        let _docker_config = EnvOverride::set(DOCKER_CONFIG_ENV, temp_dir.path());

        let config_path = temp_dir.path().join("config.json");
        tokio::fs::write(
            &config_path,
            render_docker_config(&self.spec.google_artifact_registries),
        )
        .await?;

        let token = self
            .host
            .exec_output("gcloud", &args(["auth", "print-access-token"]))
            .await?;
        for registry in &self.spec.google_artifact_registries {
            let url = format!("https://{}", registry);
            self.host
                .exec(
                    "docker",
                    &args(["login", "-u", REGISTRY_USER, "-p", token.trim(), url.as_str()]),
                )
                .await?;
        }

        let mut get_nodes = args(["get", "nodes"]);
        self.push_name(&mut get_nodes);
        let nodes = self.host.exec_output("kind", &get_nodes).await?;

        // Kubelet only picks up the new credentials after a restart.
        let source = config_path.display().to_string();
        for node in parse_nodes(&nodes) {
            let target = format!("{}:{}", node, KUBELET_CONFIG_PATH);
            self.host
                .exec("docker", &args(["cp", source.as_str(), target.as_str()]))
                .await?;
            self.host
                .exec(
                    "docker",
                    &args(["exec", node, "systemctl", "restart", "kubelet.service"]),
                )
                .await?;
        }

        info!("Set up credentials for artifact registries in kind cluster");
        Ok(())
    }

    async fn load_container_images(&self) -> Result<()> {
        for (source, dest) in &self.spec.container_images {
            info!(source = %source, dest = %dest, "Loading container image");
            self.host
                .exec("docker", &args(["pull", source.as_str()]))
                .await
                .map_err(|e| wrap(format!("failed to pull {:?}", source), e))?;
            self.host
                .exec("docker", &args(["tag", source.as_str(), dest.as_str()]))
                .await
                .map_err(|e| wrap(format!("failed to tag {:?} with {:?}", source, dest), e))?;
            let mut load = args(["load", "docker-image", dest.as_str()]);
            self.push_name(&mut load);
            self.host
                .exec("kind", &load)
                .await
                .map_err(|e| wrap(format!("failed to load {:?}", dest), e))?;
        }
        info!("Loaded all container images");
        Ok(())
    }
}

#[async_trait]
impl Cluster for KindCluster {
    #[instrument(skip_all, fields(cluster = %self.name()))]
    async fn deploy(&mut self, _ctx: &Context) -> Result<()> {
        self.check_dependencies().await?;

        if self.spec.recycle {
            info!("Attempting to recycle existing cluster");
            let probe = args(["cluster-info", "--context", self.context_name().as_str()]);
            if self.host.exec("kubectl", &probe).await.is_ok() {
                info!("Recycling existing cluster");
                return Ok(());
            }
        }

        let create = self.create_args();
        info!(args = ?create, "Creating kind cluster");
        self.host
            .exec("kind", &create)
            .await
            .map_err(|e| wrap("failed to create cluster", e))?;
        info!("Deployed kind cluster");

        for manifest in &self.spec.additional_manifests {
            info!(manifest = %manifest.display(), "Applying additional manifest");
            self.host
                .exec(
                    "kubectl",
                    &args(["apply", "-f", manifest.display().to_string().as_str()]),
                )
                .await
                .map_err(|e| wrap("failed to deploy manifest", e))?;
        }

        if !self.spec.google_artifact_registries.is_empty() {
            self.setup_registry_access()
                .await
                .map_err(|e| wrap("failed to set up artifact registry access", e))?;
        }

        if !self.spec.container_images.is_empty() {
            self.load_container_images()
                .await
                .map_err(|e| wrap("failed to load container images", e))?;
        }

        Ok(())
    }

    #[instrument(skip_all, fields(cluster = %self.name()))]
    async fn delete(&mut self) -> Result<()> {
        let mut delete = args(["delete", "cluster"]);
        self.push_name(&mut delete);
        self.host
            .exec("kind", &delete)
            .await
            .map_err(|e| wrap("failed to delete cluster", e))
    }

    async fn healthy(&self) -> Result<()> {
        let probe = args(["cluster-info", "--context", self.context_name().as_str()]);
        self.host
            .exec("kubectl", &probe)
            .await
            .map_err(|e| wrap("cluster not healthy", e))
    }

    fn name(&self) -> String {
        self.configured_name()
            .unwrap_or(DEFAULT_CLUSTER_NAME)
            .to_string()
    }
}

/// Prefixes a command failure with what the cluster was doing.
fn wrap(what: impl Into<String>, err: DeployError) -> DeployError {
    match err {
        DeployError::CommandFailed { command, reason } => {
            DeployError::command_failed(command, format!("{}: {}", what.into(), reason))
        }
        other => other,
    }
}

/// Docker client config listing each registry with an empty auth entry.
pub fn render_docker_config(registries: &[String]) -> String {
    let auths: Map<String, Value> = registries
        .iter()
        .map(|r| (r.clone(), json!({})))
        .collect();
    let mut rendered = serde_json::to_string_pretty(&json!({ "auths": auths }))
        .unwrap_or_else(|_| String::from("{}"));
    rendered.push('\n');
    rendered
}

/// Node container names from `kind get nodes`, one per line or space separated.
pub fn parse_nodes(output: &str) -> Vec<&str> {
    output.split_whitespace().collect()
}

/// Sets an environment variable until dropped, then restores the old value.
struct EnvOverride {
    key: &'static str,
    previous: Option<std::ffi::OsString>,
}

impl EnvOverride {
    fn set(key: &'static str, value: &Path) -> Self {
        let previous = std::env::var_os(key);
        std::env::set_var(key, value);
        Self { key, previous }
    }
}

impl Drop for EnvOverride {
    fn drop(&mut self) {
        match &self.previous {
            Some(value) => std::env::set_var(self.key, value),
            None => std::env::remove_var(self.key),
        }
    }
}
