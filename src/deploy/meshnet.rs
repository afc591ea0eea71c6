//! Meshnet CNI

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::{require_api, Component};
use crate::context::Context;
use crate::error::Result;
use crate::host::{args, Host};
use crate::k8s::{wait_for_daemon_set, ClusterApi};

pub const NAMESPACE: &str = "meshnet";
pub const DAEMON_SET_NAME: &str = "meshnet";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshnetSpec {
    pub image: Option<String>,
    #[serde(rename = "manifests")]
    pub manifest_dir: PathBuf,
}

pub struct Meshnet {
    spec: MeshnetSpec,
    host: Arc<dyn Host>,
    api: Option<Arc<dyn ClusterApi>>,
}

impl Meshnet {
    pub fn new(spec: MeshnetSpec, host: Arc<dyn Host>) -> Self {
        Self {
            spec,
            host,
            api: None,
        }
    }
}

#[async_trait]
impl Component for Meshnet {
    #[instrument(skip_all, fields(manifests = %self.spec.manifest_dir.display()))]
    async fn deploy(&mut self, _ctx: &Context) -> Result<()> {
        info!("Deploying Meshnet");
        // -k applies the whole kustomization directory.
        let dir = self.spec.manifest_dir.display().to_string();
        self.host
            .exec("kubectl", &args(["apply", "-k", dir.as_str()]))
            .await?;
        info!("Meshnet deployed");
        Ok(())
    }

    fn set_cluster_api(&mut self, api: Arc<dyn ClusterApi>) {
        self.api = Some(api);
    }

    async fn healthy(&self, ctx: &Context) -> Result<()> {
        let api = require_api(&self.api, "meshnet")?;
        wait_for_daemon_set(ctx, api, NAMESPACE, DAEMON_SET_NAME).await
    }
}
