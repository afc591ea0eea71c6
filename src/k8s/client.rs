//! Kubernetes client wrapper for cluster provisioning

use std::path::Path;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{
    api::{Api, DynamicObject, PostParams, WatchEvent, WatchParams},
    config::{KubeConfigOptions, Kubeconfig},
    discovery::ApiResource,
    Client, Config,
};
use tracing::{info, instrument};

use crate::error::{DeployError, Result};

/// Raw watch events as delivered by the API server.
pub type WatchStream = BoxStream<'static, kube::Result<WatchEvent<DynamicObject>>>;

/// The slice of the Kubernetes API the provisioners use.
///
/// Built once after the cluster comes up and shared by every component.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Fetches a secret, `None` if it does not exist.
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<()>;

    /// Fetches a config map, `None` if it does not exist.
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>>;

    async fn create_config_map(&self, namespace: &str, config_map: &ConfigMap) -> Result<()>;

    /// Watches every deployment in `namespace`.
    async fn watch_deployments(&self, namespace: &str) -> Result<WatchStream>;

    /// Watches daemon sets in `namespace`, optionally narrowed by a field selector.
    async fn watch_daemon_sets(
        &self,
        namespace: &str,
        field_selector: Option<&str>,
    ) -> Result<WatchStream>;
}

/// [`ClusterApi`] backed by a live `kube::Client`.
#[derive(Clone)]
pub struct K8sClient {
    client: Client,
}

impl K8sClient {
    /// Build a client from a kubeconfig file written by the cluster tool
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn from_kubeconfig(path: &Path) -> Result<Self> {
        let kubeconfig =
            Kubeconfig::read_from(path).map_err(|e| DeployError::Kubeconfig(e.to_string()))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| DeployError::Kubeconfig(e.to_string()))?;
        let client =
            Client::try_from(config).map_err(|e| DeployError::api("build client", e))?;

        info!("Connected to Kubernetes cluster");

        Ok(Self { client })
    }

    fn erased<K>(&self, namespace: &str) -> Api<DynamicObject>
    where
        K: kube::Resource<DynamicType = ()>,
    {
        Api::namespaced_with(self.client.clone(), namespace, &ApiResource::erase::<K>(&()))
    }

    async fn watch<K>(&self, namespace: &str, params: WatchParams) -> Result<WatchStream>
    where
        K: kube::Resource<DynamicType = ()>,
    {
        let api = self.erased::<K>(namespace);
        let kind = K::kind(&());
        let stream = api
            .watch(&params, "0")
            .await
            .map_err(|e| DeployError::api(format!("watch {} in {}", kind, namespace), e))?;
        Ok(stream.boxed())
    }
}

#[async_trait]
impl ClusterApi for K8sClient {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| DeployError::api(format!("get secret {}/{}", namespace, name), e))
    }

    #[instrument(skip(self, secret), fields(secret_name = %secret.metadata.name.as_deref().unwrap_or("unknown")))]
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), secret)
            .await
            .map_err(|e| DeployError::api(format!("create secret in {}", namespace), e))?;
        info!("Created secret");
        Ok(())
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| DeployError::api(format!("get config map {}/{}", namespace, name), e))
    }

    #[instrument(skip(self, config_map), fields(config_map_name = %config_map.metadata.name.as_deref().unwrap_or("unknown")))]
    async fn create_config_map(&self, namespace: &str, config_map: &ConfigMap) -> Result<()> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), config_map)
            .await
            .map_err(|e| DeployError::api(format!("create config map in {}", namespace), e))?;
        info!("Created config map");
        Ok(())
    }

    async fn watch_deployments(&self, namespace: &str) -> Result<WatchStream> {
        self.watch::<Deployment>(namespace, WatchParams::default())
            .await
    }

    async fn watch_daemon_sets(
        &self,
        namespace: &str,
        field_selector: Option<&str>,
    ) -> Result<WatchStream> {
        let mut params = WatchParams::default();
        if let Some(selector) = field_selector {
            params = params.fields(selector);
        }
        self.watch::<DaemonSet>(namespace, params).await
    }
}
