use async_trait::async_trait;
use security_policy_crd::{SecurityPolicy, SecurityPolicyStatus};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Kube(#[from] kube::Error),

    #[error("Missing resource name.")]
    ResourceName,

    #[error("Missing resource namespace.")]
    ResourceNamespace,
}

/// Persistence of desired state records, their deletion guard and status.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn add_guard(&self, object: &SecurityPolicy) -> Result<(), StoreError>;

    async fn remove_guard(&self, object: &SecurityPolicy) -> Result<(), StoreError>;

    async fn set_status(
        &self,
        object: &SecurityPolicy,
        status: SecurityPolicyStatus,
    ) -> Result<(), StoreError>;

    /// Replaces only the condition of the currently stored status.
    async fn set_condition(
        &self,
        object: &SecurityPolicy,
        condition: String,
    ) -> Result<(), StoreError>;

    async fn list(&self) -> Result<Vec<SecurityPolicy>, StoreError>;
}
