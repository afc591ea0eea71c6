//! IxiaTG traffic generator controller
//!
//! Applies the operator manifest plus its release config map. The config
//! map is either a static file shipped next to the manifests or rendered
//! from a structured release description.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::{require_api, Component};
use crate::context::Context;
use crate::error::{DeployError, Result};
use crate::host::{args, Host};
use crate::k8s::{wait_for_deployments, ClusterApi};

pub const NAMESPACE: &str = "ixiatg-op-system";
const OPERATOR_MANIFEST: &str = "ixiatg-operator.yaml";
const STATIC_CONFIG_MAP: &str = "ixia-configmap.yaml";

const CONFIG_MAP_HEADER: &str = "apiVersion: v1
kind: ConfigMap
metadata:
  name: ixiatg-release-config
  namespace: ixiatg-op-system
data:
  versions: |
    ";
const BLOCK_INDENT: &str = "    ";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IxiaTgSpec {
    #[serde(rename = "manifests")]
    pub manifest_dir: PathBuf,
    pub config_map: Option<IxiaTgConfigMap>,
}

/// Release description embedded in the operator's config map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IxiaTgConfigMap {
    pub release: String,
    pub images: Vec<IxiaTgImage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IxiaTgImage {
    pub name: String,
    pub path: String,
    pub tag: String,
}

/// Renders the release config map: the fixed header followed by the
/// release as indented JSON inside the `versions` block scalar.
pub fn render_config_map(config: &IxiaTgConfigMap) -> Result<String> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"  ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    config
        .serialize(&mut serializer)
        .map_err(DeployError::serialization)?;
    let json = String::from_utf8(buf).map_err(DeployError::serialization)?;

    let mut rendered = String::from(CONFIG_MAP_HEADER);
    rendered.push_str(&json.replace('\n', &format!("\n{}", BLOCK_INDENT)));
    Ok(rendered)
}

pub struct IxiaTg {
    spec: IxiaTgSpec,
    host: Arc<dyn Host>,
    api: Option<Arc<dyn ClusterApi>>,
}

impl IxiaTg {
    pub fn new(spec: IxiaTgSpec, host: Arc<dyn Host>) -> Self {
        Self {
            spec,
            host,
            api: None,
        }
    }

    async fn apply(&self, path: &std::path::Path) -> Result<()> {
        self.host
            .exec("kubectl", &args(["apply", "-f", path.display().to_string().as_str()]))
            .await
    }

    async fn apply_static_config(&self) -> Result<()> {
        let path = self.spec.manifest_dir.join(STATIC_CONFIG_MAP);
        if !self.host.file_exists(&path).await {
            return Err(DeployError::config_not_found(path, "ixia configmap not found"));
        }
        info!(path = %path.display(), "Deploying IxiaTG configmap");
        self.apply(&path).await
    }

    async fn apply_rendered_config(&self, config: &IxiaTgConfigMap) -> Result<()> {
        let rendered = render_config_map(config)?;
        // Removed when `file` drops, on every exit path.
        let mut file = tempfile::Builder::new()
            .prefix("ixiatg-configmap-")
            .suffix(".yaml")
            .tempfile()?;
        file.write_all(rendered.as_bytes())?;
        file.flush()?;

        info!(path = %file.path().display(), release = %config.release, "Deploying IxiaTG configmap");
        self.apply(file.path()).await
    }
}

#[async_trait]
impl Component for IxiaTg {
    #[instrument(skip_all, fields(manifests = %self.spec.manifest_dir.display()))]
    async fn deploy(&mut self, _ctx: &Context) -> Result<()> {
        info!("Deploying IxiaTG controller");
        self.apply(&self.spec.manifest_dir.join(OPERATOR_MANIFEST))
            .await?;

        match &self.spec.config_map {
            None => self.apply_static_config().await?,
            Some(config) => self.apply_rendered_config(config).await?,
        }
        info!("IxiaTG controller deployed");
        Ok(())
    }

    fn set_cluster_api(&mut self, api: Arc<dyn ClusterApi>) {
        self.api = Some(api);
    }

    async fn healthy(&self, ctx: &Context) -> Result<()> {
        let api = require_api(&self.api, "ixiatg")?;
        wait_for_deployments(ctx, api, NAMESPACE).await
    }
}
