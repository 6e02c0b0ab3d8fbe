use async_trait::async_trait;
use kube::{Api, Client, ResourceExt as _, api::ListParams};
use security_policy_crd::{SecurityPolicy, SecurityPolicyStatus};

use crate::{
    controller::store::{PolicyStore, StoreError},
    k8s::{
        guard_ext::{GuardExt as _, with_guard, without_guard},
        status_ext::StatusExt as _,
    },
};

fn api(client: &Client, object: &SecurityPolicy) -> Result<Api<SecurityPolicy>, StoreError> {
    let namespace = object.namespace().ok_or(StoreError::ResourceNamespace)?;
    Ok(Api::namespaced(client.clone(), &namespace))
}

#[async_trait]
impl PolicyStore for Client {
    async fn add_guard(&self, object: &SecurityPolicy) -> Result<(), StoreError> {
        api(self, object)?
            .set_finalizers(object, with_guard(object))
            .await
    }

    async fn remove_guard(&self, object: &SecurityPolicy) -> Result<(), StoreError> {
        api(self, object)?
            .set_finalizers(object, without_guard(object))
            .await
    }

    async fn set_status(
        &self,
        object: &SecurityPolicy,
        status: SecurityPolicyStatus,
    ) -> Result<(), StoreError> {
        api(self, object)?.set_status(object, status).await
    }

    async fn set_condition(
        &self,
        object: &SecurityPolicy,
        condition: String,
    ) -> Result<(), StoreError> {
        api(self, object)?.set_condition(object, condition).await
    }

    async fn list(&self) -> Result<Vec<SecurityPolicy>, StoreError> {
        let api: Api<SecurityPolicy> = Api::all(self.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }
}
