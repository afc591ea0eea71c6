//! MetalLB ingress
//!
//! Applies the MetalLB manifests and publishes an address pool carved from
//! the kind docker network. The memberlist secret and the address-pool
//! config map are created only when missing, so redeploying never rotates
//! the key or moves the pool.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::{require_api, Component};
use crate::context::Context;
use crate::error::{DeployError, Result};
use crate::host::{args, Host};
use crate::k8s::{wait_for_deployments, ClusterApi};
use crate::network::{find_ipv4_subnet, make_config, DockerNetworks, NetworkApi};

pub const NAMESPACE: &str = "metallb-system";
pub const SECRET_NAME: &str = "memberlist";
pub const SECRET_KEY: &str = "secretkey";
pub const CONFIG_MAP_NAME: &str = "config";
const CONFIG_KEY: &str = "config";
const KIND_NETWORK: &str = "kind";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetalLbSpec {
    pub version: Option<String>,
    /// Number of addresses in the published pool.
    pub ip_count: u32,
    #[serde(rename = "manifests")]
    pub manifest_dir: PathBuf,
}

pub struct MetalLb {
    spec: MetalLbSpec,
    host: Arc<dyn Host>,
    networks: Option<Arc<dyn NetworkApi>>,
    api: Option<Arc<dyn ClusterApi>>,
}

impl MetalLb {
    pub fn new(spec: MetalLbSpec, host: Arc<dyn Host>) -> Self {
        Self {
            spec,
            host,
            networks: None,
            api: None,
        }
    }

    /// Use `networks` instead of connecting to the local Docker engine.
    pub fn with_network_api(mut self, networks: Arc<dyn NetworkApi>) -> Self {
        self.networks = Some(networks);
        self
    }

    fn network_api(&mut self) -> Result<Arc<dyn NetworkApi>> {
        match &self.networks {
            Some(networks) => Ok(networks.clone()),
            None => {
                let networks: Arc<dyn NetworkApi> = Arc::new(DockerNetworks::connect()?);
                self.networks = Some(networks.clone());
                Ok(networks)
            }
        }
    }

    async fn apply(&self, file: &str) -> Result<()> {
        let path = self.spec.manifest_dir.join(file);
        self.host
            .exec("kubectl", &args(["apply", "-f", path.display().to_string().as_str()]))
            .await
    }

    async fn ensure_secret(&self, api: &dyn ClusterApi) -> Result<()> {
        if api.get_secret(NAMESPACE, SECRET_NAME).await?.is_some() {
            return Ok(());
        }
        info!("Creating metallb secret");
        api.create_secret(NAMESPACE, &memberlist_secret()).await
    }

    async fn ensure_config(&self, api: &dyn ClusterApi, networks: &dyn NetworkApi) -> Result<()> {
        if api.get_config_map(NAMESPACE, CONFIG_MAP_NAME).await?.is_some() {
            return Ok(());
        }
        info!("Applying metallb ingress config");
        let subnet = find_ipv4_subnet(&networks.list_networks().await?, KIND_NETWORK)?;
        let config = make_config(&subnet, self.spec.ip_count);
        let rendered = serde_yaml::to_string(&config).map_err(DeployError::serialization)?;
        info!(subnet = %subnet, pool = ?config.address_pools[0].addresses, "Computed address pool");

        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some(CONFIG_MAP_NAME.to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(CONFIG_KEY.to_string(), rendered)])),
            ..Default::default()
        };
        api.create_config_map(NAMESPACE, &config_map).await
    }
}

/// A fresh memberlist secret holding 16 random bytes, base64 encoded.
fn memberlist_secret() -> Secret {
    let key: [u8; 16] = rand::random();
    Secret {
        metadata: ObjectMeta {
            name: Some(SECRET_NAME.to_string()),
            ..Default::default()
        },
        string_data: Some(BTreeMap::from([(
            SECRET_KEY.to_string(),
            STANDARD.encode(key),
        )])),
        ..Default::default()
    }
}

#[async_trait]
impl Component for MetalLb {
    #[instrument(skip_all, fields(manifests = %self.spec.manifest_dir.display()))]
    async fn deploy(&mut self, _ctx: &Context) -> Result<()> {
        let networks = self.network_api()?;
        let api = require_api(&self.api, "metallb")?;

        info!("Creating metallb namespace");
        self.apply("namespace.yaml").await?;

        self.ensure_secret(api).await?;

        info!("Applying metallb pods");
        self.apply("metallb.yaml").await?;

        self.ensure_config(api, networks.as_ref()).await
    }

    fn set_cluster_api(&mut self, api: Arc<dyn ClusterApi>) {
        self.api = Some(api);
    }

    async fn healthy(&self, ctx: &Context) -> Result<()> {
        let api = require_api(&self.api, "metallb")?;
        wait_for_deployments(ctx, api, NAMESPACE).await
    }
}
