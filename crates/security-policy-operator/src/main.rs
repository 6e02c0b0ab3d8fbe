mod compute;
mod controller;
mod converge;
#[cfg(test)]
mod fake;
mod k8s;
mod nodes;
mod translate;

use std::sync::Arc;

use envconfig::Envconfig;
use k8s_openapi::api::core::v1::Node;
use kube::{Api, Client};
use log::{LevelFilter, info};

use crate::{
    compute::ComputeClient,
    controller::Context,
    converge::{Retry, retry},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .filter_module("security_policy_operator", LevelFilter::Debug)
        .init();

    let compute = ComputeClient::try_from_config(compute::Config::init_from_env()?).await?;
    let retry = Retry::from(retry::Config::init_from_env()?);

    let client = Client::try_default().await?;
    let nodes: Api<Node> = Api::all(client.clone());

    let ctx = Context::new(
        Arc::new(compute),
        Arc::new(nodes),
        Arc::new(client.clone()),
        retry,
    );

    info!("Starting security policy controller.");
    controller::run(client, Arc::new(ctx)).await
}
