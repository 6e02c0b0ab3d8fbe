use kube::{Api, api::PostParams};
use security_policy_crd::{SecurityPolicy, SecurityPolicyStatus};
use tracing::debug;

use crate::controller::store::StoreError;

pub trait StatusExt<K> {
    type Status;

    async fn set_status(&self, object: &K, status: Self::Status) -> Result<(), StoreError>;

    async fn set_condition(&self, object: &K, condition: String) -> Result<(), StoreError>;
}

impl StatusExt<SecurityPolicy> for Api<SecurityPolicy> {
    type Status = SecurityPolicyStatus;

    async fn set_status(
        &self,
        object: &SecurityPolicy,
        status: Self::Status,
    ) -> Result<(), StoreError> {
        update_status(self, object, |_| status).await
    }

    async fn set_condition(
        &self,
        object: &SecurityPolicy,
        condition: String,
    ) -> Result<(), StoreError> {
        update_status(self, object, |current| {
            SecurityPolicyStatus::with_condition(current, condition)
        })
        .await
    }
}

/// Reads the stored status, derives the new one from it and replaces it
/// unless nothing changed.
async fn update_status(
    api: &Api<SecurityPolicy>,
    object: &SecurityPolicy,
    update: impl FnOnce(Option<&SecurityPolicyStatus>) -> SecurityPolicyStatus,
) -> Result<(), StoreError> {
    let name = object
        .metadata
        .name
        .as_deref()
        .ok_or(StoreError::ResourceName)?;
    let params = PostParams::default();

    let mut current = api.get_status(name).await?;
    let status = update(current.status.as_ref());

    if current.status.as_ref() == Some(&status) {
        debug!("Status of {name} is unchanged.");
        return Ok(());
    }

    current.status = Some(status);

    api.replace_status(name, &params, &current).await?;
    Ok(())
}
