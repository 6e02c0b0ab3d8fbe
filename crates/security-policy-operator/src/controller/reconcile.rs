use std::{sync::Arc, time::Duration};

use kube::runtime::controller::Action;
use security_policy_crd::{SecurityPolicy, SecurityPolicyStatus};
use tracing::{Level, debug, info, instrument};

use crate::{
    compute::ComputeError,
    controller::{context::Context, store::StoreError},
    converge::{self, converge},
    k8s::guard_ext::is_guarded,
    nodes::{NodeError, derive_source_ranges},
    translate::{RemotePolicy as _, TranslateError},
};

pub const SYNCHRONIZED: &str = "synchronized";

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("Security policy {from} cannot be renamed to {to}.")]
    Renamed { from: String, to: String },

    #[error(transparent)]
    Translate(#[from] TranslateError),

    #[error(transparent)]
    Nodes(#[from] NodeError),

    #[error(transparent)]
    Compute(#[from] ComputeError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReconcileError {
    /// Whether the record itself is invalid, so only a change to it helps.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Renamed { .. } | Self::Translate(_))
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Synchronized(converge::Outcome),
    Deleted,
    Released,
}

#[instrument(
    skip_all,
    fields(name = object.metadata.name, namespace = object.metadata.namespace),
    ret(level = Level::DEBUG),
    err(level = Level::WARN)
)]
pub async fn reconcile(
    object: Arc<SecurityPolicy>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let action = match reconcile_policy(&object, &ctx).await? {
        Outcome::Synchronized(_) => Action::requeue(Duration::from_secs(60 * 60)),
        Outcome::Deleted | Outcome::Released => Action::await_change(),
    };

    Ok(action)
}

#[instrument(
    skip_all,
    fields(name = object.metadata.name, namespace = object.metadata.namespace),
)]
#[allow(clippy::needless_pass_by_value)]
pub fn error_policy(
    object: Arc<SecurityPolicy>,
    error: &ReconcileError,
    _ctx: Arc<Context>,
) -> Action {
    if error.is_validation() {
        Action::await_change()
    } else {
        Action::requeue(Duration::from_secs(30))
    }
}

/// One level triggered pass over `object`: either converges the remote
/// policy to the record or, for a record being deleted, removes the remote
/// policy and releases the deletion guard.
pub async fn reconcile_policy(
    object: &SecurityPolicy,
    ctx: &Context,
) -> Result<Outcome, ReconcileError> {
    let _lock = ctx.lock(object).await;

    if object.metadata.deletion_timestamp.is_some() {
        return finalize(object, ctx).await;
    }

    if !is_guarded(object) {
        debug!("Attaching deletion guard.");
        ctx.store().add_guard(object).await?;
    }

    if let Some(from) = synchronized_name(object)
        && from != object.spec.name
    {
        return Err(ReconcileError::Renamed {
            from: from.to_owned(),
            to: object.spec.name.clone(),
        });
    }

    let spec = derive_source_ranges(&object.spec, ctx.nodes()).await?;
    let target = spec.translate()?;

    let outcome = ctx
        .retry()
        .run(|| converge(ctx.compute(), &target))
        .await?;

    info!("Security policy {} synchronized: {:?}", target.name, outcome);

    ctx.store()
        .set_status(
            object,
            SecurityPolicyStatus::mirror(object, &spec, SYNCHRONIZED.to_owned()),
        )
        .await?;

    Ok(Outcome::Synchronized(outcome))
}

async fn finalize(object: &SecurityPolicy, ctx: &Context) -> Result<Outcome, ReconcileError> {
    if !is_guarded(object) {
        return Ok(Outcome::Released);
    }

    match remote_name(object) {
        Some(name) => {
            info!("Deleting security policy {name}.");
            ctx.compute().delete(name).await?;
        }
        None => debug!("No security policy was ever named, nothing to delete."),
    }

    ctx.store().remove_guard(object).await?;
    Ok(Outcome::Deleted)
}

fn synchronized_name(object: &SecurityPolicy) -> Option<&str> {
    object
        .status
        .as_ref()
        .map(|status| status.name.as_str())
        .filter(|name| !name.is_empty())
}

/// The last synchronized name, falling back to the requested one.
fn remote_name(object: &SecurityPolicy) -> Option<&str> {
    synchronized_name(object)
        .or_else(|| Some(object.spec.name.as_str()).filter(|name| !name.is_empty()))
}
