mod plan;
pub mod retry;

use tracing::{Level, debug, info, instrument};

pub use plan::{MutationReport, Plan};
pub use retry::Retry;

use crate::compute::{ComputeError, PolicyClient, SecurityPolicy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Converged(MutationReport),
}

/// Brings the remote policy named like `target` in line with `target`.
#[instrument(
    skip_all,
    fields(name = target.name),
    ret(level = Level::DEBUG),
    err(level = Level::WARN),
)]
pub async fn converge(
    client: &dyn PolicyClient,
    target: &SecurityPolicy,
) -> Result<Outcome, ComputeError> {
    let current = client
        .fetch(&target.name)
        .await?
        .filter(|current| !current.name.is_empty());

    let Some(current) = current else {
        info!("Creating security policy.");
        client.insert(target).await?;
        return Ok(Outcome::Created);
    };

    let plan = Plan::diff(target, &current);
    if plan.is_empty() {
        debug!("Security policy is already converged.");
    }

    let report = plan.execute(client).await?;
    Ok(Outcome::Converged(report))
}
