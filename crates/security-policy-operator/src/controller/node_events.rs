use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::Node;
use kube::{ResourceExt as _, runtime::watcher::Event};
use tracing::{Level, debug, instrument};

use crate::controller::{context::Context, store::StoreError};

pub const NODE_EVENT_UPDATE: &str = "node event update";

/// Tracks node names to tell membership changes from plain node updates.
#[derive(Debug, Default)]
pub struct Membership {
    known: BTreeSet<String>,
    pending: BTreeSet<String>,
}

impl Membership {
    /// Returns whether `event` added or removed a node.
    pub fn observe(&mut self, event: &Event<Node>) -> bool {
        match event {
            Event::Apply(node) => self.known.insert(node.name_any()),
            Event::Delete(node) => self.known.remove(&node.name_any()),
            Event::Init => {
                self.pending.clear();
                false
            }
            Event::InitApply(node) => {
                self.pending.insert(node.name_any());
                false
            }
            Event::InitDone => {
                let changed = self.pending != self.known;
                self.known = std::mem::take(&mut self.pending);
                changed
            }
        }
    }
}

/// Marks every policy with node derived source ranges, so their status shows
/// that a recalculation is due.
#[instrument(skip_all, ret(level = Level::DEBUG), err(level = Level::WARN))]
pub async fn mark_node_event(ctx: &Context) -> Result<usize, StoreError> {
    let mut marked = 0;

    for policy in ctx
        .store()
        .list()
        .await?
        .iter()
        .filter(|policy| policy.spec.has_node_selectors())
    {
        let _lock = ctx.lock(policy).await;
        debug!("Marking {} for node update.", policy.name_any());

        ctx.store()
            .set_condition(policy, NODE_EVENT_UPDATE.to_owned())
            .await?;
        marked += 1;
    }

    Ok(marked)
}
