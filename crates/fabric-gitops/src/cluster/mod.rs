//! Cluster Sync Client: list/get/create/update against the fabric's
//! control-plane, behind the [`ClusterApi`] seam.

mod api;
mod client;
mod error;
mod kinds;
mod memory;
mod rest;

use std::sync::Arc;

use crate::config::ClusterConfig;
use crate::model::Fabric;

pub use api::ClusterApi;
pub use client::{Applied, ApplyOutcome, ClusterSyncClient, FetchedResource};
pub use error::{classify_status, ClusterError, Result};
pub use kinds::{pluralize, KindMapping, KindRegistry};
pub use memory::InMemoryCluster;
pub use rest::RestClusterClient;

/// Builds the [`ClusterApi`] a fabric's sync talks to.
pub trait ClusterConnector: Send + Sync {
    fn connect(&self, fabric: &Fabric) -> Result<Arc<dyn ClusterApi>>;
}

/// Connects over HTTPS to the endpoint stored on the fabric.
pub struct RestConnector {
    config: ClusterConfig,
}

impl RestConnector {
    pub fn new(config: &ClusterConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

impl ClusterConnector for RestConnector {
    fn connect(&self, fabric: &Fabric) -> Result<Arc<dyn ClusterApi>> {
        Ok(Arc::new(RestClusterClient::new(&fabric.cluster, &self.config)?))
    }
}

/// Hands out the same API for every fabric. For hosts that bring their own
/// client, and for tests. The fabric must still have an endpoint set.
pub struct StaticConnector {
    api: Arc<dyn ClusterApi>,
}

impl StaticConnector {
    pub fn new(api: Arc<dyn ClusterApi>) -> Self {
        Self { api }
    }
}

impl ClusterConnector for StaticConnector {
    fn connect(&self, fabric: &Fabric) -> Result<Arc<dyn ClusterApi>> {
        if !fabric.has_endpoint() {
            return Err(ClusterError::NotConfigured);
        }
        Ok(self.api.clone())
    }
}
