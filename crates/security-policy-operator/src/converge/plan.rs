use std::collections::BTreeMap;

use tracing::{Level, info, instrument};

use crate::compute::{ComputeError, PolicyClient, Rule, SecurityPolicy};

/// Remote calls issued by one converge pass, by rule priority.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MutationReport {
    pub added: Vec<i64>,
    pub patched: Vec<i64>,
    pub removed: Vec<i64>,
    pub metadata: bool,
}

#[derive(Debug)]
pub struct Plan<'a> {
    pub name: &'a str,
    pub add: Vec<&'a Rule>,
    pub patch: Vec<&'a Rule>,
    pub remove: Vec<i64>,
    pub metadata: Option<SecurityPolicy>,
}

impl<'a> Plan<'a> {
    #[instrument(
        skip_all,
        fields(name = target.name),
        ret(level = Level::DEBUG),
    )]
    pub fn diff(target: &'a SecurityPolicy, current: &SecurityPolicy) -> Plan<'a> {
        let target_by_priority = by_priority(target);
        let current_by_priority = by_priority(current);

        let mut add = Vec::new();
        let mut patch = Vec::new();

        for (priority, rule) in &target_by_priority {
            match current_by_priority.get(priority) {
                None => add.push(*rule),
                Some(current) if rule.differs_from(current) => patch.push(*rule),
                Some(_) => {}
            }
        }

        let remove = current_by_priority
            .keys()
            .filter(|priority| !target_by_priority.contains_key(priority))
            .copied()
            .collect();

        let metadata = (target.name != current.name || target.description != current.description)
            .then(|| target.metadata_patch(current));

        Self {
            name: &target.name,
            add,
            patch,
            remove,
            metadata,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.add.is_empty()
            && self.patch.is_empty()
            && self.remove.is_empty()
            && self.metadata.is_none()
    }

    /// Issues the planned calls one by one. Calls that already succeeded are
    /// not undone when a later one fails.
    pub async fn execute(
        &self,
        client: &dyn PolicyClient,
    ) -> Result<MutationReport, ComputeError> {
        let mut report = MutationReport::default();

        for rule in &self.add {
            info!("Adding rule with priority {}.", rule.priority);
            client.add_rule(self.name, rule).await?;
            report.added.push(rule.priority);
        }

        for rule in &self.patch {
            info!("Patching rule with priority {}.", rule.priority);
            client.patch_rule(self.name, rule.priority, rule).await?;
            report.patched.push(rule.priority);
        }

        for priority in &self.remove {
            info!("Removing rule with priority {priority}.");
            client.remove_rule(self.name, *priority).await?;
            report.removed.push(*priority);
        }

        if let Some(metadata) = &self.metadata {
            info!("Patching security policy metadata.");
            client.patch_metadata(self.name, metadata).await?;
            report.metadata = true;
        }

        Ok(report)
    }
}

fn by_priority(policy: &SecurityPolicy) -> BTreeMap<i64, &Rule> {
    policy.rules.iter().map(|rule| (rule.priority, rule)).collect()
}
