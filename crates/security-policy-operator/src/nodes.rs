use std::collections::BTreeMap;

use async_trait::async_trait;
use itertools::Itertools as _;
use k8s_openapi::api::core::v1::Node;
use kube::{Api, api::ListParams};
use security_policy_crd::SecurityPolicySpec;
use tracing::{Level, instrument};

const EXTERNAL_IP: &str = "ExternalIP";

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error(transparent)]
    Kube(#[from] kube::Error),
}

#[async_trait]
pub trait NodeAddresses: Send + Sync {
    /// External addresses of all nodes carrying every one of `selectors`.
    async fn list_external_addresses(
        &self,
        selectors: &BTreeMap<String, String>,
    ) -> Result<Vec<String>, NodeError>;
}

#[async_trait]
impl NodeAddresses for Api<Node> {
    #[instrument(skip(self), ret(level = Level::DEBUG), err(level = Level::WARN))]
    async fn list_external_addresses(
        &self,
        selectors: &BTreeMap<String, String>,
    ) -> Result<Vec<String>, NodeError> {
        if selectors.is_empty() {
            return Ok(Vec::new());
        }

        let selector = selectors
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .join(",");

        let nodes = self.list(&ListParams::default().labels(&selector)).await?;

        Ok(nodes.items.iter().flat_map(external_addresses).collect())
    }
}

pub fn external_addresses(node: &Node) -> impl Iterator<Item = String> + '_ {
    node.status
        .iter()
        .flat_map(|status| status.addresses.iter().flatten())
        .filter(|address| address.type_ == EXTERNAL_IP)
        .map(|address| address.address.clone())
}

/// Copy of `spec` with the source ranges of every node selecting rule
/// replaced by the current addresses of the selected nodes.
#[instrument(skip_all, fields(name = spec.name), err(level = Level::WARN))]
pub async fn derive_source_ranges(
    spec: &SecurityPolicySpec,
    nodes: &dyn NodeAddresses,
) -> Result<SecurityPolicySpec, NodeError> {
    let mut spec = spec.clone();

    for rule in spec
        .rules
        .iter_mut()
        .filter(|rule| rule.derives_source_ranges())
    {
        let mut addresses = nodes
            .list_external_addresses(&rule.selector_labels())
            .await?;

        addresses.sort();
        addresses.dedup();
        rule.src_ip_ranges = addresses;
    }

    Ok(spec)
}
