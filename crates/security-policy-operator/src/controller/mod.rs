mod context;
mod locks;
mod node_events;
mod reconcile;
pub mod store;

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use futures_util::StreamExt as _;
use k8s_openapi::api::core::v1::Node;
use kube::{
    Api, Client,
    runtime::{
        Controller, Predicate as _, PredicateConfig, WatchStreamExt as _, controller::Config,
        predicates, reflector, watcher,
    },
};
use security_policy_crd::SecurityPolicy;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, warn};

pub use context::Context;

use crate::controller::{
    node_events::{Membership, mark_node_event},
    reconcile::{error_policy, reconcile},
};

pub async fn run(client: Client, ctx: Arc<Context>) -> Result<()> {
    let api: Api<SecurityPolicy> = Api::all(client.clone());
    let nodes: Api<Node> = Api::all(client);

    let (reader, writer) = reflector::store();
    let stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .reflect(writer)
        .applied_objects()
        .predicate_filter(
            predicates::generation.combine(predicates::finalizers),
            PredicateConfig::default(),
        );

    let (node_changes, node_changes_rx) = mpsc::unbounded_channel();
    tokio::spawn(watch_nodes(nodes, ctx.clone(), node_changes));

    Controller::for_stream(stream, reader)
        .with_config(Config::default().debounce(Duration::from_secs(1)))
        .reconcile_all_on(UnboundedReceiverStream::new(node_changes_rx))
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((object, _)) => info!("Reconciled {}.", object.name),
                Err(error) => warn!("Reconciliation failed: {}", error),
            }
        })
        .await;

    Ok(())
}

/// Marks node selecting policies whenever nodes join or leave and asks the
/// controller to reconcile every policy.
async fn watch_nodes(api: Api<Node>, ctx: Arc<Context>, changes: mpsc::UnboundedSender<()>) {
    let mut membership = Membership::default();
    let mut events = watcher(api, watcher::Config::default())
        .default_backoff()
        .boxed();

    while let Some(event) = events.next().await {
        let event = match event {
            Ok(event) => event,
            Err(error) => {
                warn!("Node watch failed: {}", error);
                continue;
            }
        };

        if !membership.observe(&event) {
            continue;
        }

        info!("Node membership changed.");

        if let Err(error) = mark_node_event(&ctx).await {
            warn!("Could not mark policies for node update: {}", error);
        }

        if changes.send(()).is_err() {
            break;
        }
    }
}
