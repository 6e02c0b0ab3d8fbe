use kube::{
    Api, ResourceExt as _,
    api::{Patch, PatchParams},
};
use security_policy_crd::SecurityPolicy;
use serde_json::json;
use tracing::{Level, instrument};

use crate::controller::store::StoreError;

pub const GUARD: &str = "securitypolicy.finalizer.cloudarmor.matsumo.dev";

#[must_use]
pub fn is_guarded(object: &SecurityPolicy) -> bool {
    object.finalizers().iter().any(|finalizer| finalizer == GUARD)
}

#[must_use]
pub fn with_guard(object: &SecurityPolicy) -> Vec<String> {
    let mut finalizers = object.finalizers().to_vec();
    if !is_guarded(object) {
        finalizers.push(GUARD.to_owned());
    }

    finalizers
}

#[must_use]
pub fn without_guard(object: &SecurityPolicy) -> Vec<String> {
    object
        .finalizers()
        .iter()
        .filter(|finalizer| *finalizer != GUARD)
        .cloned()
        .collect()
}

pub trait GuardExt {
    async fn set_finalizers(
        &self,
        object: &SecurityPolicy,
        finalizers: Vec<String>,
    ) -> Result<(), StoreError>;
}

impl GuardExt for Api<SecurityPolicy> {
    #[instrument(skip(self, object), fields(name = object.metadata.name), err(level = Level::WARN))]
    async fn set_finalizers(
        &self,
        object: &SecurityPolicy,
        finalizers: Vec<String>,
    ) -> Result<(), StoreError> {
        let name = object
            .metadata
            .name
            .as_deref()
            .ok_or(StoreError::ResourceName)?;

        // Pinning the resource version turns a concurrent edit into a conflict.
        let patch = json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": object.resource_version(),
            }
        });

        self.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;

        Ok(())
    }
}
