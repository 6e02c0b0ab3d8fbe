use std::time::Duration;

use async_trait::async_trait;
use envconfig::Envconfig;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{Level, debug, instrument};

use crate::{
    compute::{
        ComputeError, PolicyClient, Rule, SecurityPolicy,
        token::{self, TokenSource},
    },
    translate::DEFAULT_RULE_PRIORITY,
};

const PROVIDER_DEFAULT_PRIORITY: i64 = 2_147_483_647;

#[derive(Debug, Envconfig)]
pub struct Config {
    #[envconfig(from = "SECURITY_POLICY__PROJECT")]
    pub project: Option<String>,

    #[envconfig(from = "SECURITY_POLICY__ACCESS_TOKEN")]
    pub access_token: Option<String>,

    #[envconfig(
        from = "SECURITY_POLICY__COMPUTE_ENDPOINT",
        default = "https://compute.googleapis.com/compute/v1"
    )]
    pub endpoint: String,

    #[envconfig(from = "SECURITY_POLICY__REQUEST_TIMEOUT_SECONDS", default = "30")]
    pub request_timeout_seconds: u64,
}

/// Compute Engine v1 client for global security policies.
pub struct ComputeClient {
    http: reqwest::Client,
    base: String,
    token: TokenSource,
}

impl ComputeClient {
    pub async fn try_from_config(config: Config) -> Result<Self, ComputeError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        let project = match config.project {
            Some(project) => project,
            None => token::project_id(&http).await?,
        };

        Ok(Self {
            base: policies_url(&config.endpoint, &project),
            token: TokenSource::new(config.access_token),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    async fn send(&self, request: RequestBuilder, name: &str) -> Result<Response, ComputeError> {
        let token = self.token.token(&self.http).await?;
        let response = request.bearer_auth(token).send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let message = error_message(&response.text().await.unwrap_or_default());
        Err(status_error(status, name, message))
    }
}

#[async_trait]
impl PolicyClient for ComputeClient {
    #[instrument(skip(self), err(level = Level::WARN))]
    async fn fetch(&self, name: &str) -> Result<Option<SecurityPolicy>, ComputeError> {
        let request = self.http.get(self.url(&format!("/{name}")));

        let Some(response) = found(self.send(request, name).await)? else {
            return Ok(None);
        };

        let policy: SecurityPolicy = response.json().await?;
        Ok(Some(from_provider_policy(policy)))
    }

    #[instrument(skip_all, fields(name = policy.name), err(level = Level::WARN))]
    async fn insert(&self, policy: &SecurityPolicy) -> Result<(), ComputeError> {
        let request = self
            .http
            .post(self.url(""))
            .json(&to_provider_policy(policy));
        self.send(request, &policy.name).await?;
        Ok(())
    }

    #[instrument(skip(self, policy), err(level = Level::WARN))]
    async fn patch_metadata(
        &self,
        name: &str,
        policy: &SecurityPolicy,
    ) -> Result<(), ComputeError> {
        let request = self.http.patch(self.url(&format!("/{name}"))).json(policy);
        self.send(request, name).await?;
        Ok(())
    }

    #[instrument(skip(self, rule), fields(priority = rule.priority), err(level = Level::WARN))]
    async fn add_rule(&self, name: &str, rule: &Rule) -> Result<(), ComputeError> {
        let request = self
            .http
            .post(self.url(&format!("/{name}/addRule")))
            .json(&to_provider_rule(rule));
        self.send(request, name).await?;
        Ok(())
    }

    #[instrument(skip(self, rule), err(level = Level::WARN))]
    async fn patch_rule(
        &self,
        name: &str,
        priority: i64,
        rule: &Rule,
    ) -> Result<(), ComputeError> {
        let request = self
            .http
            .post(self.url(&format!("/{name}/patchRule")))
            .query(&[("priority", to_provider_priority(priority))])
            .json(&to_provider_rule(rule));
        self.send(request, name).await?;
        Ok(())
    }

    #[instrument(skip(self), err(level = Level::WARN))]
    async fn remove_rule(&self, name: &str, priority: i64) -> Result<(), ComputeError> {
        let request = self
            .http
            .post(self.url(&format!("/{name}/removeRule")))
            .query(&[("priority", to_provider_priority(priority))]);
        self.send(request, name).await?;
        Ok(())
    }

    #[instrument(skip(self), err(level = Level::WARN))]
    async fn delete(&self, name: &str) -> Result<(), ComputeError> {
        let request = self.http.delete(self.url(&format!("/{name}")));

        if found(self.send(request, name).await)?.is_none() {
            debug!("Security policy already absent.");
        }

        Ok(())
    }
}

fn status_error(status: StatusCode, name: &str, message: String) -> ComputeError {
    match status {
        StatusCode::NOT_FOUND => ComputeError::NotFound(name.to_owned()),
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => {
            ComputeError::Conflict(name.to_owned(), message)
        }
        status => ComputeError::Api { status, message },
    }
}

/// Turns a missing policy into `None`.
fn found<T>(result: Result<T, ComputeError>) -> Result<Option<T>, ComputeError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ComputeError::NotFound(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

// The provider caps priorities at 2147483647, where it keeps its default rule.
fn to_provider_priority(priority: i64) -> i64 {
    if priority == DEFAULT_RULE_PRIORITY {
        PROVIDER_DEFAULT_PRIORITY
    } else {
        priority
    }
}

fn from_provider_priority(priority: i64) -> i64 {
    if priority == PROVIDER_DEFAULT_PRIORITY {
        DEFAULT_RULE_PRIORITY
    } else {
        priority
    }
}

fn to_provider_rule(rule: &Rule) -> Rule {
    Rule {
        priority: to_provider_priority(rule.priority),
        ..rule.clone()
    }
}

fn to_provider_policy(policy: &SecurityPolicy) -> SecurityPolicy {
    SecurityPolicy {
        rules: policy.rules.iter().map(to_provider_rule).collect(),
        ..policy.clone()
    }
}

fn from_provider_policy(mut policy: SecurityPolicy) -> SecurityPolicy {
    for rule in &mut policy.rules {
        rule.priority = from_provider_priority(rule.priority);
    }

    policy
}

fn policies_url(endpoint: &str, project: &str) -> String {
    format!(
        "{}/projects/{project}/global/securityPolicies",
        endpoint.trim_end_matches('/')
    )
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .map(|body| body.error.message)
        .unwrap_or_else(|_| body.to_owned())
}
