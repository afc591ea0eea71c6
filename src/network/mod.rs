//! Container network discovery and address pool arithmetic
//!
//! MetalLB hands out addresses from the docker bridge network kind attaches
//! its nodes to. This module finds that network's IPv4 subnet and carves an
//! address pool out of it.

mod pool;

use std::net::Ipv4Addr;

use async_trait::async_trait;
use bollard::network::ListNetworksOptions;
use bollard::Docker;
use tracing::{debug, info};

use crate::error::{DeployError, Result};

pub use pool::{increment, make_config, AddressPool, MetalLbConfig, POOL_OFFSET};

/// A container network and the subnets configured on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub name: String,
    pub subnets: Vec<String>,
}

/// Container runtime network listing.
#[async_trait]
pub trait NetworkApi: Send + Sync {
    async fn list_networks(&self) -> Result<Vec<NetworkInfo>>;
}

/// [`NetworkApi`] backed by the local Docker engine.
pub struct DockerNetworks {
    docker: Docker,
}

impl DockerNetworks {
    /// Connects using `DOCKER_HOST` or the local socket.
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        info!("Connected to Docker daemon");
        Ok(Self { docker })
    }
}

#[async_trait]
impl NetworkApi for DockerNetworks {
    async fn list_networks(&self) -> Result<Vec<NetworkInfo>> {
        let networks = self
            .docker
            .list_networks(None::<ListNetworksOptions<String>>)
            .await?;

        Ok(networks
            .into_iter()
            .map(|n| NetworkInfo {
                name: n.name.unwrap_or_default(),
                subnets: n
                    .ipam
                    .and_then(|ipam| ipam.config)
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|c| c.subnet)
                    .collect(),
            })
            .collect())
    }
}

/// An IPv4 subnet in CIDR form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Cidr {
    /// Network address, host bits cleared.
    pub base: Ipv4Addr,
    pub prefix: u8,
}

impl std::str::FromStr for Ipv4Cidr {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| DeployError::network_discovery(format!("invalid CIDR {:?}", s)))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| DeployError::network_discovery(format!("invalid CIDR {:?}", s)))?;
        let prefix: u8 = prefix
            .parse()
            .ok()
            .filter(|p| *p <= 32)
            .ok_or_else(|| DeployError::network_discovery(format!("invalid CIDR {:?}", s)))?;

        let mask = if prefix == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(prefix))
        };
        Ok(Self {
            base: Ipv4Addr::from(u32::from(addr) & mask),
            prefix,
        })
    }
}

impl std::fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.base, self.prefix)
    }
}

/// Picks the first IPv4 subnet on the network called `name`.
///
/// IPv6 entries are skipped; an IPv4 entry that fails to parse is an error.
pub fn find_ipv4_subnet(networks: &[NetworkInfo], name: &str) -> Result<Ipv4Cidr> {
    let network = networks.iter().find(|n| n.name == name);
    for subnet in network.map(|n| n.subnets.as_slice()).unwrap_or_default() {
        if subnet.contains(':') {
            debug!(subnet = %subnet, "Skipping IPv6 subnet");
            continue;
        }
        return subnet.parse();
    }
    Err(DeployError::network_discovery(format!(
        "failed to find {} ipv4 docker net",
        name
    )))
}
