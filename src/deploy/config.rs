//! Deployment description files
//!
//! A deployment file names one implementation per stage and carries its
//! spec:
//!
//! ```yaml
//! cluster:
//!   kind: Kind
//!   spec:
//!     name: kne
//!     recycle: true
//! ingress:
//!   kind: MetalLB
//!   spec:
//!     ip_count: 100
//!     manifests: ../manifests/metallb
//! cni:
//!   kind: Meshnet
//!   spec:
//!     manifests: ../manifests/meshnet/base
//! controllers:
//!   - kind: IxiaTG
//!     spec:
//!       manifests: ../manifests/keysight
//! ```
//!
//! Relative paths are resolved against the file's directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::ixiatg::{IxiaTg, IxiaTgSpec};
use super::kind::{KindCluster, KindSpec};
use super::meshnet::{Meshnet, MeshnetSpec};
use super::metallb::{MetalLb, MetalLbSpec};
use super::{Cluster, Component, Deployment};
use crate::error::{DeployError, Result};
use crate::host::Host;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "spec")]
pub enum ClusterConfig {
    Kind(KindSpec),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "spec")]
pub enum IngressConfig {
    #[serde(rename = "MetalLB")]
    MetalLb(MetalLbSpec),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "spec")]
pub enum CniConfig {
    Meshnet(MeshnetSpec),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "spec")]
pub enum ControllerConfig {
    #[serde(rename = "IxiaTG")]
    IxiaTg(IxiaTgSpec),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    pub cluster: ClusterConfig,
    pub ingress: IngressConfig,
    pub cni: CniConfig,
    #[serde(default)]
    pub controllers: Vec<ControllerConfig>,
}

impl DeploymentConfig {
    /// Parse a deployment description.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(DeployError::serialization)
    }

    /// Read a deployment file, resolving relative paths against its directory.
    pub fn load(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&yaml)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    pub fn resolve_paths(&mut self, base: &Path) {
        match &mut self.cluster {
            ClusterConfig::Kind(spec) => {
                resolve_opt(base, &mut spec.kubeconfig);
                resolve_opt(base, &mut spec.kind_config_file);
                for manifest in &mut spec.additional_manifests {
                    resolve(base, manifest);
                }
            }
        }
        match &mut self.ingress {
            IngressConfig::MetalLb(spec) => resolve(base, &mut spec.manifest_dir),
        }
        match &mut self.cni {
            CniConfig::Meshnet(spec) => resolve(base, &mut spec.manifest_dir),
        }
        for controller in &mut self.controllers {
            match controller {
                ControllerConfig::IxiaTg(spec) => resolve(base, &mut spec.manifest_dir),
            }
        }
    }

    /// The kubeconfig the cluster writes, if the cluster spec sets one.
    pub fn kubeconfig(&self) -> Option<&Path> {
        match &self.cluster {
            ClusterConfig::Kind(spec) => spec.kubeconfig.as_deref(),
        }
    }

    /// Pretty JSON rendering for logs.
    pub fn describe(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Build the runnable deployment.
    pub fn into_deployment(self, host: Arc<dyn Host>) -> Deployment {
        let cluster: Box<dyn Cluster> = match self.cluster {
            ClusterConfig::Kind(spec) => Box::new(KindCluster::new(spec, host.clone())),
        };
        let ingress: Box<dyn Component> = match self.ingress {
            IngressConfig::MetalLb(spec) => Box::new(MetalLb::new(spec, host.clone())),
        };
        let cni: Box<dyn Component> = match self.cni {
            CniConfig::Meshnet(spec) => Box::new(Meshnet::new(spec, host.clone())),
        };
        let controllers = self
            .controllers
            .into_iter()
            .map(|c| -> Box<dyn Component> {
                match c {
                    ControllerConfig::IxiaTg(spec) => Box::new(IxiaTg::new(spec, host.clone())),
                }
            })
            .collect();
        Deployment::new(host, cluster, ingress, cni, controllers)
    }
}

fn resolve(base: &Path, path: &mut PathBuf) {
    if path.is_relative() && !path.as_os_str().is_empty() {
        *path = base.join(&*path);
    }
}

fn resolve_opt(base: &Path, path: &mut Option<PathBuf>) {
    if let Some(p) = path {
        resolve(base, p);
    }
}
