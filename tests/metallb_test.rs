//! Tests for the MetalLB ingress stage
//!
//! Secret and address-pool creation against an in-memory cluster API.

mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use networksim_deploy::deploy::metallb::{MetalLb, CONFIG_MAP_NAME, NAMESPACE, SECRET_NAME};
use networksim_deploy::deploy::{Component, MetalLbSpec};
use networksim_deploy::network::MetalLbConfig;
use networksim_deploy::{Context, DeployError};

fn spec(ip_count: u32) -> MetalLbSpec {
    MetalLbSpec {
        version: Some("v0.13.7".into()),
        ip_count,
        manifest_dir: PathBuf::from("/manifests/metallb"),
    }
}

fn metallb(host: &Arc<RecordingHost>, api: &Arc<FakeClusterApi>, subnets: &[&str]) -> MetalLb {
    let mut metallb = MetalLb::new(spec(10), host.clone())
        .with_network_api(Arc::new(StaticNetworks::kind(subnets)));
    metallb.set_cluster_api(api.clone());
    metallb
}

#[tokio::test]
async fn test_deploy_applies_manifests_in_order() {
    let host = Arc::new(RecordingHost::new());
    let api = Arc::new(FakeClusterApi::new());
    let mut ingress = metallb(&host, &api, &["172.18.0.0/16"]);

    ingress.deploy(&Context::background()).await.unwrap();

    assert_eq!(
        host.commands(),
        vec![
            "kubectl apply -f /manifests/metallb/namespace.yaml",
            "kubectl apply -f /manifests/metallb/metallb.yaml",
        ]
    );
}

#[tokio::test]
async fn test_deploy_publishes_pool_from_kind_network() {
    let host = Arc::new(RecordingHost::new());
    let api = Arc::new(FakeClusterApi::new());
    let mut ingress = metallb(&host, &api, &["fc00:f853:ccd:e793::/64", "172.18.0.0/16"]);

    ingress.deploy(&Context::background()).await.unwrap();

    let config_map = api.config_map(NAMESPACE, CONFIG_MAP_NAME).unwrap();
    let rendered = &config_map.data.unwrap()["config"];
    let config: MetalLbConfig = serde_yaml::from_str(rendered).unwrap();
    assert_eq!(config.address_pools.len(), 1);
    assert_eq!(config.address_pools[0].name, "default");
    assert_eq!(config.address_pools[0].protocol, "layer2");
    assert_eq!(
        config.address_pools[0].addresses,
        vec!["172.18.0.50 - 172.18.0.60".to_string()]
    );
    assert!(rendered.contains("address-pools:"));
}

#[tokio::test]
async fn test_redeploy_creates_nothing() {
    let host = Arc::new(RecordingHost::new());
    let api = Arc::new(FakeClusterApi::new());
    let mut ingress = metallb(&host, &api, &["172.18.0.0/16"]);

    ingress.deploy(&Context::background()).await.unwrap();
    assert_eq!(api.creates(), 2);
    let key = api.secrets.lock().unwrap()[&(NAMESPACE.to_string(), SECRET_NAME.to_string())]
        .string_data
        .clone();

    ingress.deploy(&Context::background()).await.unwrap();
    assert_eq!(api.creates(), 2);
    let after = api.secrets.lock().unwrap()[&(NAMESPACE.to_string(), SECRET_NAME.to_string())]
        .string_data
        .clone();
    assert_eq!(key, after);
}

#[tokio::test]
async fn test_missing_ipv4_subnet_fails_discovery() {
    let host = Arc::new(RecordingHost::new());
    let api = Arc::new(FakeClusterApi::new());
    let mut ingress = metallb(&host, &api, &["fc00:f853:ccd:e793::/64"]);

    let err = ingress.deploy(&Context::background()).await.unwrap_err();

    match err {
        DeployError::NetworkDiscovery(reason) => {
            assert_eq!(reason, "failed to find kind ipv4 docker net")
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(api.config_map_creates.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_manifest_failure_stops_deploy() {
    let host = Arc::new(RecordingHost::new().failing("kubectl apply -f /manifests/metallb/namespace.yaml"));
    let api = Arc::new(FakeClusterApi::new());
    let mut ingress = metallb(&host, &api, &["172.18.0.0/16"]);

    let err = ingress.deploy(&Context::background()).await.unwrap_err();

    assert!(matches!(err, DeployError::CommandFailed { .. }));
    assert_eq!(host.commands().len(), 1);
    assert_eq!(api.creates(), 0);
}

#[tokio::test]
async fn test_healthy_waits_for_every_deployment() {
    let host = Arc::new(RecordingHost::new());
    let api = Arc::new(
        FakeClusterApi::new().deployments(
            NAMESPACE,
            vec![
                deployment(NAMESPACE, "controller", 1, 0, 1),
                ready_deployment(NAMESPACE, "controller", 1),
            ],
        ),
    );
    let ingress = metallb(&host, &api, &["172.18.0.0/16"]);

    let ctx = Context::background().with_timeout(Duration::from_secs(5));
    ingress.healthy(&ctx).await.unwrap();
    assert_eq!(*api.field_selectors.lock().unwrap(), vec![None]);
}

#[tokio::test]
async fn test_healthy_without_cluster_api() {
    let host = Arc::new(RecordingHost::new());
    let ingress = MetalLb::new(spec(10), host.clone());

    let err = ingress.healthy(&Context::background()).await.unwrap_err();
    assert!(matches!(err, DeployError::NotConnected("metallb")));
}
