use std::iter;

use itertools::Itertools as _;
use security_policy_crd::{Action, SecurityPolicyRule, SecurityPolicySpec};
use tracing::{Level, instrument};

use crate::compute::{Matcher, MatcherConfig, Rule, SRC_IPS_V1, SecurityPolicy};

pub const DEFAULT_RULE_PRIORITY: i64 = i64::MAX;
pub const DEFAULT_RULE_DESCRIPTION: &str = "default action";

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("Security policy name must not be empty.")]
    MissingName,

    #[error("Priority {0} is used by more than one rule.")]
    DuplicatePriority(i64),
}

pub trait RemotePolicy {
    fn translate(&self) -> Result<SecurityPolicy, TranslateError>;
}

impl RemotePolicy for SecurityPolicySpec {
    #[instrument(skip_all, fields(name = self.name), err(level = Level::WARN))]
    fn translate(&self) -> Result<SecurityPolicy, TranslateError> {
        if self.name.is_empty() {
            return Err(TranslateError::MissingName);
        }

        let rules: Vec<Rule> = self
            .rules
            .iter()
            .map(Rule::from)
            .chain(iter::once(default_rule(self.default_action)))
            .collect();

        if let Some(priority) = rules.iter().map(|rule| rule.priority).duplicates().next() {
            return Err(TranslateError::DuplicatePriority(priority));
        }

        Ok(SecurityPolicy {
            name: self.name.clone(),
            description: self.description.clone(),
            rules,
            ..Default::default()
        })
    }
}

impl From<&SecurityPolicyRule> for Rule {
    fn from(rule: &SecurityPolicyRule) -> Self {
        remote_rule(
            rule.action,
            rule.description.clone(),
            rule.priority,
            rule.src_ip_ranges.clone(),
        )
    }
}

fn default_rule(action: Action) -> Rule {
    remote_rule(
        action,
        DEFAULT_RULE_DESCRIPTION.to_owned(),
        DEFAULT_RULE_PRIORITY,
        vec!["*".to_owned()],
    )
}

fn remote_rule(action: Action, description: String, priority: i64, ranges: Vec<String>) -> Rule {
    Rule {
        action: remote_action(action).to_owned(),
        description,
        priority,
        matcher: Matcher {
            versioned_expr: SRC_IPS_V1.to_owned(),
            config: MatcherConfig {
                src_ip_ranges: ranges,
            },
        },
        preview: false,
    }
}

fn remote_action(action: Action) -> &'static str {
    match action {
        Action::Allow => "allow",
        Action::Deny => "deny(403)",
    }
}
