//! Node labels advertising the buffer size per cache level.
//!
//! Next to the extended resource, the node carries a label such as
//! `intel.com/excat-l3=2560` with the size in KiB, so workloads can select
//! nodes by buffer size. The label is written with a merge patch against the
//! node object; a `null` value deletes it.

use async_trait::async_trait;
use excat_resctrl::{CacheLevel, SizeLabels};
use k8s_openapi::api::core::v1::Node;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client as KubeClient};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{PluginError, Result};

/// Label key of a cache level, e.g. `intel.com/excat-l3`.
pub fn label_key(prefix: &str, base: &str, level: CacheLevel) -> String {
    format!("{}{}", prefix, crate::consts::resource_name(base, level))
}

/// Merge patch setting `key` to `value`, or deleting it for `None`.
pub fn label_patch(key: &str, value: Option<&str>) -> Value {
    json!({ "metadata": { "labels": { key: value } } })
}

/// Sets and clears the buffer size label of the local node.
#[async_trait]
pub trait NodeLabeler: Send + Sync {
    /// Adds (or overwrites) the label of `level`.
    async fn add(&self, level: CacheLevel, value: &str) -> Result<()>;

    /// Removes the label of `level`.
    async fn remove(&self, level: CacheLevel) -> Result<()>;
}

/// Removes a label, logging instead of failing since the label may not exist.
pub async fn remove_quietly(labeler: &dyn NodeLabeler, level: CacheLevel) {
    match labeler.remove(level).await {
        Ok(()) => debug!("Label of cache level {} removed", level),
        Err(e) => debug!(
            "Couldn't remove label of cache level {}, label either doesn't exist or there was an error: {}",
            level, e
        ),
    }
}

/// Sets the label of `level` at startup, if the level has a size.
pub async fn label_level(
    labeler: &dyn NodeLabeler,
    level: CacheLevel,
    labels: &SizeLabels,
) -> Result<()> {
    let Some(size) = labels.get(level) else {
        return Ok(());
    };

    labeler.add(level, &size.to_string()).await.map_err(|e| {
        PluginError::Label(format!("setting label of cache level {} failed: {}", level, e))
    })
}

/// Labeler used when label patching is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLabeler;

#[async_trait]
impl NodeLabeler for NoopLabeler {
    async fn add(&self, level: CacheLevel, value: &str) -> Result<()> {
        debug!("Label patching disabled, not adding {}={}", level, value);
        Ok(())
    }

    async fn remove(&self, _level: CacheLevel) -> Result<()> {
        Ok(())
    }
}

/// Patches node labels through the API server.
///
/// The client is inferred from the environment, in a pod that is the
/// service account, and keeps its credentials fresh on its own.
pub struct KubeNodeLabeler {
    nodes: Api<Node>,
    node_name: String,
    prefix: String,
    base_name: String,
}

impl KubeNodeLabeler {
    /// Connects to the API server of the cluster the daemon runs in.
    pub async fn connect(
        node_name: impl Into<String>,
        prefix: impl Into<String>,
        base_name: impl Into<String>,
    ) -> Result<Self> {
        let client = KubeClient::try_default()
            .await
            .map_err(|e| PluginError::Label(format!("failed to create Kubernetes client: {}", e)))?;

        Ok(Self::new(client, node_name, prefix, base_name))
    }

    pub fn new(
        client: KubeClient,
        node_name: impl Into<String>,
        prefix: impl Into<String>,
        base_name: impl Into<String>,
    ) -> Self {
        Self {
            nodes: Api::all(client),
            node_name: node_name.into(),
            prefix: prefix.into(),
            base_name: base_name.into(),
        }
    }

    async fn patch(&self, level: CacheLevel, value: Option<&str>) -> Result<()> {
        let key = label_key(&self.prefix, &self.base_name, level);
        let patch = label_patch(&key, value);

        self.nodes
            .patch(&self.node_name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| {
                PluginError::Label(format!("error when patching node {}: {}", self.node_name, e))
            })?;

        debug!("Patch {} of node {} successful", patch, self.node_name);
        Ok(())
    }
}

#[async_trait]
impl NodeLabeler for KubeNodeLabeler {
    async fn add(&self, level: CacheLevel, value: &str) -> Result<()> {
        self.patch(level, Some(value)).await
    }

    async fn remove(&self, level: CacheLevel) -> Result<()> {
        self.patch(level, None).await
    }
}
