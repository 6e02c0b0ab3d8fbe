mod client;
mod token;

use std::collections::BTreeSet;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

pub use client::{ComputeClient, Config};
pub use token::TokenError;

pub const SRC_IPS_V1: &str = "SRC_IPS_V1";

#[derive(Debug, thiserror::Error)]
pub enum ComputeError {
    #[error("Security policy {0} does not exist.")]
    NotFound(String),

    #[error("Security policy {0} was modified concurrently: {1}")]
    Conflict(String, String),

    #[error("Compute api responded with {status}: {message}")]
    Api { status: StatusCode, message: String },

    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Token(#[from] TokenError),
}

/// Operations on provider hosted security policies.
///
/// `fetch` reports a missing policy as `None` and `delete` treats a missing
/// policy as success. Every other failure is returned as is.
#[async_trait]
pub trait PolicyClient: Send + Sync {
    async fn fetch(&self, name: &str) -> Result<Option<SecurityPolicy>, ComputeError>;

    async fn insert(&self, policy: &SecurityPolicy) -> Result<(), ComputeError>;

    async fn patch_metadata(
        &self,
        name: &str,
        policy: &SecurityPolicy,
    ) -> Result<(), ComputeError>;

    async fn add_rule(&self, name: &str, rule: &Rule) -> Result<(), ComputeError>;

    async fn patch_rule(
        &self,
        name: &str,
        priority: i64,
        rule: &Rule,
    ) -> Result<(), ComputeError>;

    async fn remove_rule(&self, name: &str, priority: i64) -> Result<(), ComputeError>;

    async fn delete(&self, name: &str) -> Result<(), ComputeError>;
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<Rule>,
}

impl SecurityPolicy {
    /// Metadata only copy of `self`, stamped with the identity of `current`.
    #[must_use]
    pub fn metadata_patch(&self, current: &SecurityPolicy) -> Self {
        Self {
            id: current.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            fingerprint: current.fingerprint.clone(),
            rules: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub action: String,
    #[serde(default)]
    pub description: String,
    pub priority: i64,
    #[serde(rename = "match", default)]
    pub matcher: Matcher,
    #[serde(default)]
    pub preview: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Matcher {
    #[serde(default)]
    pub versioned_expr: String,
    #[serde(default)]
    pub config: MatcherConfig,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatcherConfig {
    #[serde(default)]
    pub src_ip_ranges: Vec<String>,
}

impl Rule {
    #[must_use]
    pub fn source_ranges(&self) -> &[String] {
        &self.matcher.config.src_ip_ranges
    }

    /// Whether applying `self` over `current` would change the rule.
    /// Source ranges are compared without regard to their order.
    #[must_use]
    pub fn differs_from(&self, current: &Rule) -> bool {
        let ranges: BTreeSet<&String> = self.source_ranges().iter().collect();
        let current_ranges: BTreeSet<&String> = current.source_ranges().iter().collect();

        self.action != current.action
            || self.description != current.description
            || ranges != current_ranges
    }
}
