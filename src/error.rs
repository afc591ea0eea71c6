//! Error types for cluster provisioning
//!
//! Every stage failure ends up as a [`DeployError`]. The orchestrator wraps
//! component failures in [`DeployError::Stage`] so callers can tell which
//! component and operation failed; [`DeployError::root`] peels that context
//! back off.

use std::path::PathBuf;

use thiserror::Error;

use crate::deploy::Stage;

/// Result type for provisioning operations.
pub type Result<T> = std::result::Result<T, DeployError>;

/// Errors that can occur while provisioning or probing a deployment.
#[derive(Debug, Error)]
pub enum DeployError {
    /// One or more required binaries could not be resolved on `PATH`.
    #[error("{}", missing_message(.0))]
    MissingDependency(Vec<String>),

    /// An external command exited unsuccessfully or could not be started.
    #[error("command `{command}` failed: {reason}")]
    CommandFailed { command: String, reason: String },

    /// The Kubernetes API rejected a call.
    #[error("kubernetes API error during {operation}: {source}")]
    Api {
        operation: String,
        #[source]
        source: kube::Error,
    },

    /// The per-stage deadline expired before the target became ready.
    #[error("timed out waiting for {target} to become healthy")]
    Timeout { target: String },

    /// The parent context was cancelled before the target became ready.
    #[error("context cancelled before {target} became healthy")]
    Cancelled { target: String },

    /// The watch stream ended without a ready event.
    #[error("watch stream closed before {target} became healthy")]
    StreamClosed { target: String },

    /// A watch delivered an object of an unexpected kind.
    #[error("invalid object type: expected {expected}, got {found}")]
    TypeMismatch { expected: String, found: String },

    /// No usable container network or subnet was found.
    #[error("network discovery failed: {0}")]
    NetworkDiscovery(String),

    /// A static configuration artifact is missing.
    #[error("config not found at {}: {reason}", path.display())]
    ConfigNotFound { path: PathBuf, reason: String },

    /// The kubeconfig produced by the cluster could not be loaded.
    #[error("failed to load kubeconfig: {0}")]
    Kubeconfig(String),

    /// A component was asked to talk to the cluster before it had a handle.
    #[error("{0} has no cluster API handle")]
    NotConnected(&'static str),

    /// Docker engine API error.
    #[error("Docker API error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A component failure annotated with the stage it happened in.
    #[error("{} {operation} failed: {source}", stage_label(.stage, .index))]
    Stage {
        stage: Stage,
        /// Position among the configured controllers.
        index: Option<usize>,
        operation: &'static str,
        #[source]
        source: Box<DeployError>,
    },
}

fn stage_label(stage: &Stage, index: &Option<usize>) -> String {
    match index {
        Some(i) => format!("{}[{}]", stage, i),
        None => stage.to_string(),
    }
}

fn missing_message(bins: &[String]) -> String {
    bins.iter()
        .map(|bin| format!("install dependency {:?} to deploy", bin))
        .collect::<Vec<_>>()
        .join("; ")
}

impl DeployError {
    /// Creates a command failed error.
    pub fn command_failed(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CommandFailed {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// Creates an API error for the given operation.
    pub fn api(operation: impl Into<String>, source: kube::Error) -> Self {
        Self::Api {
            operation: operation.into(),
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(target: impl Into<String>) -> Self {
        Self::Timeout {
            target: target.into(),
        }
    }

    /// Creates a cancellation error.
    pub fn cancelled(target: impl Into<String>) -> Self {
        Self::Cancelled {
            target: target.into(),
        }
    }

    /// Creates a stream closed error.
    pub fn stream_closed(target: impl Into<String>) -> Self {
        Self::StreamClosed {
            target: target.into(),
        }
    }

    /// Creates a type mismatch error.
    pub fn type_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Creates a network discovery error.
    pub fn network_discovery(reason: impl Into<String>) -> Self {
        Self::NetworkDiscovery(reason.into())
    }

    /// Creates a config not found error.
    pub fn config_not_found(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ConfigNotFound {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates a serialization error.
    pub fn serialization(reason: impl ToString) -> Self {
        Self::Serialization(reason.to_string())
    }

    /// Wraps this error with the stage and operation it came from.
    pub fn in_stage(self, stage: Stage, operation: &'static str) -> Self {
        Self::Stage {
            stage,
            index: None,
            operation,
            source: Box::new(self),
        }
    }

    /// Wraps a failure of the controller at `index`.
    pub fn in_controller(self, index: usize, operation: &'static str) -> Self {
        Self::Stage {
            stage: Stage::Controller,
            index: Some(index),
            operation,
            source: Box::new(self),
        }
    }

    /// Returns the underlying error with any stage context removed.
    pub fn root(&self) -> &DeployError {
        match self {
            Self::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns the stage this error was raised in, if it was annotated.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Returns which controller failed, for controller stage errors.
    pub fn controller_index(&self) -> Option<usize> {
        match self {
            Self::Stage { index, .. } => *index,
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), Self::Timeout { .. })
    }
}
