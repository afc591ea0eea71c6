//! Staged provisioning of a NetworkSim cluster
//!
//! A [`Deployment`] brings stages up strictly in order: cluster, ingress,
//! CNI, then each controller. Each add-on stage must deploy *and* report
//! healthy within its own deadline before the next one starts. Nothing is
//! retried and nothing already deployed is torn down on failure.

pub mod config;
pub mod ixiatg;
pub mod kind;
pub mod meshnet;
pub mod metallb;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::{info, instrument};

use crate::context::Context;
use crate::error::{DeployError, Result};
use crate::host::{check_dependencies, Host};
use crate::k8s::{ClusterApi, K8sClient};

pub use config::DeploymentConfig;
pub use ixiatg::{IxiaTgConfigMap, IxiaTgImage, IxiaTgSpec};
pub use kind::KindSpec;
pub use meshnet::MeshnetSpec;
pub use metallb::MetalLbSpec;

/// Deadline for each individual health wait.
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(60);

/// Binaries every deployment needs regardless of component choice.
const REQUIRED_BINARIES: [&str; 2] = ["docker", "kubectl"];

/// Provisioning stage, used to annotate failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Stage {
    Preflight,
    Cluster,
    Ingress,
    Cni,
    Controller,
}

/// The base cluster.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Cluster: Send + Sync {
    async fn deploy(&mut self, ctx: &Context) -> Result<()>;

    async fn delete(&mut self) -> Result<()>;

    /// Immediate pass/fail probe, no waiting.
    async fn healthy(&self) -> Result<()>;

    fn name(&self) -> String;
}

/// An add-on deployed into a running cluster: ingress, CNI or controller.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Component: Send + Sync {
    async fn deploy(&mut self, ctx: &Context) -> Result<()>;

    /// Hands the component the shared cluster API handle.
    fn set_cluster_api(&mut self, api: Arc<dyn ClusterApi>);

    /// Blocks until the component reports ready or `ctx` finishes.
    async fn healthy(&self, ctx: &Context) -> Result<()>;
}

/// Builds the cluster API handle once the cluster exists.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, kubeconfig: &Path) -> Result<Arc<dyn ClusterApi>>;
}

/// [`Connector`] that reads a kubeconfig file into a live client.
#[derive(Debug, Clone, Default)]
pub struct KubeConnector;

#[async_trait]
impl Connector for KubeConnector {
    async fn connect(&self, kubeconfig: &Path) -> Result<Arc<dyn ClusterApi>> {
        let client = K8sClient::from_kubeconfig(kubeconfig).await?;
        Ok(Arc::new(client))
    }
}

pub struct Deployment {
    pub cluster: Box<dyn Cluster>,
    pub ingress: Box<dyn Component>,
    pub cni: Box<dyn Component>,
    pub controllers: Vec<Box<dyn Component>>,
    host: Arc<dyn Host>,
    connector: Arc<dyn Connector>,
    health_timeout: Duration,
}

impl Deployment {
    pub fn new(
        host: Arc<dyn Host>,
        cluster: Box<dyn Cluster>,
        ingress: Box<dyn Component>,
        cni: Box<dyn Component>,
        controllers: Vec<Box<dyn Component>>,
    ) -> Self {
        Self {
            cluster,
            ingress,
            cni,
            controllers,
            host,
            connector: Arc::new(KubeConnector),
            health_timeout: HEALTH_TIMEOUT,
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Overrides the per-stage health deadline.
    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    async fn check_dependencies(&self) -> Result<()> {
        check_dependencies(self.host.as_ref(), &REQUIRED_BINARIES).await
    }

    /// Bring every stage up in order.
    #[instrument(skip_all, fields(cluster = %self.cluster.name()))]
    pub async fn deploy(&mut self, ctx: &Context, kubeconfig: &Path) -> Result<()> {
        self.check_dependencies()
            .await
            .map_err(|e| e.in_stage(Stage::Preflight, "dependency check"))?;

        info!("Deploying cluster...");
        self.cluster
            .deploy(ctx)
            .await
            .map_err(|e| e.in_stage(Stage::Cluster, "deploy"))?;
        info!("Cluster deployed");

        let api = self
            .connector
            .connect(kubeconfig)
            .await
            .map_err(|e| e.in_stage(Stage::Cluster, "connect"))?;

        self.ingress.set_cluster_api(api.clone());
        info!("Deploying ingress...");
        self.ingress
            .deploy(ctx)
            .await
            .map_err(|e| e.in_stage(Stage::Ingress, "deploy"))?;
        self.ingress
            .healthy(&ctx.with_timeout(self.health_timeout))
            .await
            .map_err(|e| e.in_stage(Stage::Ingress, "healthy"))?;
        info!("Ingress healthy");

        info!("Deploying CNI...");
        self.cni
            .deploy(ctx)
            .await
            .map_err(|e| e.in_stage(Stage::Cni, "deploy"))?;
        self.cni.set_cluster_api(api.clone());
        self.cni
            .healthy(&ctx.with_timeout(self.health_timeout))
            .await
            .map_err(|e| e.in_stage(Stage::Cni, "healthy"))?;
        info!("CNI healthy");

        for (index, controller) in self.controllers.iter_mut().enumerate() {
            info!(index, "Deploying controller...");
            controller
                .deploy(ctx)
                .await
                .map_err(|e| e.in_controller(index, "deploy"))?;
            controller.set_cluster_api(api.clone());
            controller
                .healthy(&ctx.with_timeout(self.health_timeout))
                .await
                .map_err(|e| e.in_controller(index, "healthy"))?;
        }
        info!("Controllers deployed and healthy");

        Ok(())
    }

    /// Delete the cluster. Add-ons go down with it.
    #[instrument(skip_all, fields(cluster = %self.cluster.name()))]
    pub async fn delete(&mut self) -> Result<()> {
        info!("Deleting cluster...");
        self.cluster
            .delete()
            .await
            .map_err(|e| e.in_stage(Stage::Cluster, "delete"))?;
        info!("Cluster deleted");
        Ok(())
    }

    /// Attach to an already running cluster without deploying anything.
    pub async fn connect(&mut self, kubeconfig: &Path) -> Result<()> {
        let api = self
            .connector
            .connect(kubeconfig)
            .await
            .map_err(|e| e.in_stage(Stage::Cluster, "connect"))?;
        self.ingress.set_cluster_api(api.clone());
        self.cni.set_cluster_api(api.clone());
        for controller in &mut self.controllers {
            controller.set_cluster_api(api.clone());
        }
        Ok(())
    }

    /// Re-run every readiness check without redeploying.
    #[instrument(skip_all, fields(cluster = %self.cluster.name()))]
    pub async fn healthy(&self, ctx: &Context) -> Result<()> {
        self.cluster
            .healthy()
            .await
            .map_err(|e| e.in_stage(Stage::Cluster, "healthy"))?;
        info!("Cluster healthy");

        self.ingress
            .healthy(&ctx.with_timeout(self.health_timeout))
            .await
            .map_err(|e| e.in_stage(Stage::Ingress, "healthy"))?;
        info!("Ingress healthy");

        self.cni
            .healthy(&ctx.with_timeout(self.health_timeout))
            .await
            .map_err(|e| e.in_stage(Stage::Cni, "healthy"))?;
        info!("CNI healthy");

        for (index, controller) in self.controllers.iter().enumerate() {
            controller
                .healthy(&ctx.with_timeout(self.health_timeout))
                .await
                .map_err(|e| e.in_controller(index, "healthy"))?;
        }
        info!("Controllers healthy");

        Ok(())
    }
}

/// Returns the cluster API handle or a not-connected error.
pub(crate) fn require_api<'a>(
    api: &'a Option<Arc<dyn ClusterApi>>,
    component: &'static str,
) -> Result<&'a dyn ClusterApi> {
    api.as_deref().ok_or(DeployError::NotConnected(component))
}
