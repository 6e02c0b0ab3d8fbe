use std::sync::Arc;

use kube::ResourceExt as _;
use security_policy_crd::SecurityPolicy;
use tokio::sync::OwnedMutexGuard;

use crate::{
    compute::PolicyClient,
    controller::{locks::Locks, store::PolicyStore},
    converge::Retry,
    nodes::NodeAddresses,
};

pub struct Context {
    compute: Arc<dyn PolicyClient>,
    nodes: Arc<dyn NodeAddresses>,
    store: Arc<dyn PolicyStore>,
    retry: Retry,
    locks: Locks,
}

impl Context {
    pub fn new(
        compute: Arc<dyn PolicyClient>,
        nodes: Arc<dyn NodeAddresses>,
        store: Arc<dyn PolicyStore>,
        retry: Retry,
    ) -> Self {
        Self {
            compute,
            nodes,
            store,
            retry,
            locks: Locks::default(),
        }
    }

    pub fn compute(&self) -> &dyn PolicyClient {
        self.compute.as_ref()
    }

    pub fn nodes(&self) -> &dyn NodeAddresses {
        self.nodes.as_ref()
    }

    pub fn store(&self) -> &dyn PolicyStore {
        self.store.as_ref()
    }

    pub fn retry(&self) -> Retry {
        self.retry
    }

    pub async fn lock(&self, object: &SecurityPolicy) -> OwnedMutexGuard<()> {
        let key = format!(
            "{}/{}",
            object.namespace().unwrap_or_default(),
            object.name_any()
        );

        self.locks.acquire(&key).await
    }
}
