//! NetworkSim cluster provisioning
//!
//! Brings up a kind cluster with MetalLB ingress, the Meshnet CNI and any
//! number of controller add-ons, waiting for each stage to report healthy
//! before starting the next.

pub mod config;
pub mod context;
pub mod deploy;
pub mod error;
pub mod host;
pub mod k8s;
pub mod network;

pub use context::Context;
pub use deploy::{Deployment, DeploymentConfig, Stage};
pub use error::{DeployError, Result};
