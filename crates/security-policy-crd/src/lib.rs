use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::{JsonSchema, Schema, SchemaGenerator, json_schema};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, PartialEq, CustomResource, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "cloudarmor.matsumo.dev",
    version = "v1beta1",
    kind = "SecurityPolicy",
    namespaced,
    status = SecurityPolicyStatus,
    shortname = "secpol",
    printcolumn = r#"{"name":"Policy", "type":"string", "jsonPath":".spec.name"}"#,
    printcolumn = r#"{"name":"Default", "type":"string", "jsonPath":".spec.defaultAction"}"#,
    printcolumn = r#"{"name":"Condition", "type":"string", "jsonPath":".status.condition"}"#,
)]
#[serde(rename_all = "camelCase")]
pub struct SecurityPolicySpec {
    /// Name of the remote policy. Immutable once created.
    #[schemars(schema_with = "immutable_name")]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub default_action: Action,
    #[serde(default)]
    pub rules: Vec<SecurityPolicyRule>,
}

fn immutable_name(_: &mut SchemaGenerator) -> Schema {
    json_schema!({
        "type": "string",
        "minLength": 1,
        "x-kubernetes-validations": [{
            "rule": "self == oldSelf",
            "message": "name is immutable"
        }]
    })
}

impl SecurityPolicySpec {
    /// Whether any rule takes its source ranges from node addresses.
    #[must_use]
    pub fn has_node_selectors(&self) -> bool {
        self.rules.iter().any(SecurityPolicyRule::derives_source_ranges)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecurityPolicyRule {
    pub action: Action,
    #[serde(default)]
    pub description: String,
    pub priority: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub src_ip_ranges: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_pool_selectors: Vec<LabelSelector>,
}

impl SecurityPolicyRule {
    #[must_use]
    pub fn derives_source_ranges(&self) -> bool {
        !self.node_pool_selectors.is_empty()
    }

    /// Selectors as a label map. Later entries win on duplicate keys.
    #[must_use]
    pub fn selector_labels(&self) -> BTreeMap<String, String> {
        self.node_pool_selectors
            .iter()
            .map(|selector| (selector.key.clone(), selector.value.clone()))
            .collect()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LabelSelector {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    Allow,
    #[default]
    Deny,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecurityPolicyStatus {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub default_action: Action,
    #[serde(default)]
    pub rules: Vec<SecurityPolicyRule>,
    #[serde(default)]
    pub condition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl SecurityPolicyStatus {
    #[must_use]
    pub fn mirror(object: &SecurityPolicy, spec: &SecurityPolicySpec, condition: String) -> Self {
        Self {
            name: spec.name.clone(),
            description: spec.description.clone(),
            default_action: spec.default_action,
            rules: spec.rules.clone(),
            condition,
            observed_generation: object.metadata.generation,
        }
    }

    /// Copy of `status` with only the condition replaced.
    #[must_use]
    pub fn with_condition(status: Option<&Self>, condition: String) -> Self {
        Self {
            condition,
            ..status.cloned().unwrap_or_default()
        }
    }
}
