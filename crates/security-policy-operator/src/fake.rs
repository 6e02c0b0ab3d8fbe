use std::{
    collections::BTreeMap,
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use k8s_openapi::{apimachinery::pkg::apis::meta::v1::Time, jiff::Timestamp};
use kube::{ResourceExt as _, core::Status};
use reqwest::StatusCode;
use security_policy_crd::{SecurityPolicy as PolicyRecord, SecurityPolicyStatus};

use crate::{
    compute::{ComputeError, PolicyClient, Rule, SecurityPolicy},
    controller::store::{PolicyStore, StoreError},
    k8s::guard_ext::{with_guard, without_guard},
    nodes::{NodeAddresses, NodeError},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Fetch,
    Insert,
    PatchMetadata,
    AddRule(i64),
    PatchRule(i64),
    RemoveRule(i64),
    Delete,
}

#[derive(Default)]
struct ComputeState {
    policy: Option<SecurityPolicy>,
    calls: Vec<Call>,
    fail_next: usize,
    fail_after: Option<usize>,
    rotate_fingerprint: bool,
    fingerprints: u64,
}

impl ComputeState {
    fn next_fingerprint(&mut self) -> Option<String> {
        self.fingerprints += 1;
        Some(format!("fp-{}", self.fingerprints))
    }

    fn policy_mut(&mut self, name: &str) -> Result<&mut SecurityPolicy, ComputeError> {
        self.policy
            .as_mut()
            .filter(|policy| policy.name == name)
            .ok_or_else(|| ComputeError::NotFound(name.to_owned()))
    }
}

/// In memory security policy provider that records every call.
#[derive(Default)]
pub struct FakeCompute {
    state: Mutex<ComputeState>,
}

impl FakeCompute {
    pub fn with_policy(policy: SecurityPolicy) -> Self {
        let compute = Self::default();
        compute.state().policy = Some(policy);
        compute
    }

    /// Fails the next `count` calls.
    pub fn fail_next(&self, count: usize) {
        self.state().fail_next = count;
    }

    /// Lets `count` calls pass and fails every call after them.
    pub fn fail_after(&self, count: usize) {
        self.state().fail_after = Some(count);
    }

    pub fn rotate_fingerprint_on_fetch(&self) {
        self.state().rotate_fingerprint = true;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn policy(&self) -> Option<SecurityPolicy> {
        self.state().policy.clone()
    }

    fn state(&self) -> MutexGuard<'_, ComputeState> {
        self.state.lock().unwrap()
    }

    fn begin(&self, call: Call) -> Result<MutexGuard<'_, ComputeState>, ComputeError> {
        let mut state = self.state();
        state.calls.push(call);

        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(unavailable());
        }

        let fail_after = state.fail_after;
        match fail_after {
            Some(0) => return Err(unavailable()),
            Some(count) => state.fail_after = Some(count - 1),
            None => {}
        }

        Ok(state)
    }
}

fn unavailable() -> ComputeError {
    ComputeError::Api {
        status: StatusCode::SERVICE_UNAVAILABLE,
        message: "backend unavailable".to_owned(),
    }
}

fn invalid(message: String) -> ComputeError {
    ComputeError::Api {
        status: StatusCode::BAD_REQUEST,
        message,
    }
}

#[async_trait]
impl PolicyClient for FakeCompute {
    async fn fetch(&self, name: &str) -> Result<Option<SecurityPolicy>, ComputeError> {
        let mut state = self.begin(Call::Fetch)?;
        let policy = state.policy.clone().filter(|policy| policy.name == name);

        if policy.is_some() && state.rotate_fingerprint {
            let fingerprint = state.next_fingerprint();
            state.policy_mut(name)?.fingerprint = fingerprint;
        }

        Ok(policy)
    }

    async fn insert(&self, policy: &SecurityPolicy) -> Result<(), ComputeError> {
        let mut state = self.begin(Call::Insert)?;

        if state
            .policy
            .as_ref()
            .is_some_and(|current| current.name == policy.name)
        {
            return Err(ComputeError::Conflict(
                policy.name.clone(),
                "already exists".to_owned(),
            ));
        }

        let fingerprint = state.next_fingerprint();
        state.policy = Some(SecurityPolicy {
            id: Some("1".to_owned()),
            fingerprint,
            ..policy.clone()
        });

        Ok(())
    }

    async fn patch_metadata(
        &self,
        name: &str,
        policy: &SecurityPolicy,
    ) -> Result<(), ComputeError> {
        let mut state = self.begin(Call::PatchMetadata)?;
        let fingerprint = state.next_fingerprint();
        let current = state.policy_mut(name)?;

        if current.fingerprint != policy.fingerprint {
            return Err(ComputeError::Conflict(
                name.to_owned(),
                "stale fingerprint".to_owned(),
            ));
        }

        current.name = policy.name.clone();
        current.description = policy.description.clone();
        current.fingerprint = fingerprint;

        Ok(())
    }

    async fn add_rule(&self, name: &str, rule: &Rule) -> Result<(), ComputeError> {
        let mut state = self.begin(Call::AddRule(rule.priority))?;
        let current = state.policy_mut(name)?;

        if current.rules.iter().any(|r| r.priority == rule.priority) {
            return Err(invalid(format!("priority {} is taken", rule.priority)));
        }

        current.rules.push(rule.clone());
        Ok(())
    }

    async fn patch_rule(
        &self,
        name: &str,
        priority: i64,
        rule: &Rule,
    ) -> Result<(), ComputeError> {
        let mut state = self.begin(Call::PatchRule(priority))?;
        let current = state.policy_mut(name)?;

        let existing = current
            .rules
            .iter_mut()
            .find(|r| r.priority == priority)
            .ok_or_else(|| invalid(format!("no rule at priority {priority}")))?;

        *existing = Rule {
            priority,
            ..rule.clone()
        };
        Ok(())
    }

    async fn remove_rule(&self, name: &str, priority: i64) -> Result<(), ComputeError> {
        let mut state = self.begin(Call::RemoveRule(priority))?;
        let current = state.policy_mut(name)?;

        current.rules.retain(|r| r.priority != priority);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), ComputeError> {
        let mut state = self.begin(Call::Delete)?;

        if state.policy.as_ref().is_some_and(|policy| policy.name == name) {
            state.policy = None;
        }

        Ok(())
    }
}

/// Nodes given as label sets with one external address each.
#[derive(Default)]
pub struct FakeNodes {
    nodes: Vec<(BTreeMap<String, String>, String)>,
    unreachable: bool,
    lookups: AtomicUsize,
}

impl FakeNodes {
    pub fn with_node(mut self, labels: &[(&str, &str)], address: &str) -> Self {
        let labels = labels
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect();

        self.nodes.push((labels, address.to_owned()));
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NodeAddresses for FakeNodes {
    async fn list_external_addresses(
        &self,
        selectors: &BTreeMap<String, String>,
    ) -> Result<Vec<String>, NodeError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);

        if self.unreachable {
            return Err(NodeError::Kube(kube::Error::Api(
                Status::failure("connection refused", "ServiceUnavailable").with_code(503).boxed(),
            )));
        }

        if selectors.is_empty() {
            return Ok(Vec::new());
        }

        Ok(self
            .nodes
            .iter()
            .filter(|(labels, _)| {
                selectors
                    .iter()
                    .all(|(key, value)| labels.get(key) == Some(value))
            })
            .map(|(_, address)| address.clone())
            .collect())
    }
}

/// In memory record storage honouring finalizers on deletion.
#[derive(Default)]
pub struct FakeStore {
    objects: Mutex<BTreeMap<(String, String), PolicyRecord>>,
}

fn key(object: &PolicyRecord) -> (String, String) {
    (object.namespace().unwrap_or_default(), object.name_any())
}

fn not_found() -> StoreError {
    StoreError::Kube(kube::Error::Api(
        Status::failure("not found", "NotFound").with_code(404).boxed(),
    ))
}

impl FakeStore {
    pub fn insert(&self, object: PolicyRecord) {
        self.objects().insert(key(&object), object);
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<PolicyRecord> {
        self.objects()
            .get(&(namespace.to_owned(), name.to_owned()))
            .cloned()
    }

    /// Deletes the record, or only marks it as terminating while it carries
    /// finalizers.
    pub fn request_delete(&self, namespace: &str, name: &str) {
        let mut objects = self.objects();
        let key = (namespace.to_owned(), name.to_owned());

        let Some(object) = objects.get_mut(&key) else {
            return;
        };

        if object.finalizers().is_empty() {
            objects.remove(&key);
        } else {
            object.metadata.deletion_timestamp = Some(Time::from(Timestamp::now()));
        }
    }

    fn objects(&self) -> MutexGuard<'_, BTreeMap<(String, String), PolicyRecord>> {
        self.objects.lock().unwrap()
    }
}

#[async_trait]
impl PolicyStore for FakeStore {
    async fn add_guard(&self, object: &PolicyRecord) -> Result<(), StoreError> {
        let mut objects = self.objects();
        let stored = objects.get_mut(&key(object)).ok_or_else(not_found)?;

        let finalizers = with_guard(stored);
        stored.metadata.finalizers = Some(finalizers);
        Ok(())
    }

    async fn remove_guard(&self, object: &PolicyRecord) -> Result<(), StoreError> {
        let mut objects = self.objects();
        let key = key(object);
        let stored = objects.get_mut(&key).ok_or_else(not_found)?;

        let finalizers = without_guard(stored);
        stored.metadata.finalizers = Some(finalizers);

        if stored.metadata.deletion_timestamp.is_some() && stored.finalizers().is_empty() {
            objects.remove(&key);
        }

        Ok(())
    }

    async fn set_status(
        &self,
        object: &PolicyRecord,
        status: SecurityPolicyStatus,
    ) -> Result<(), StoreError> {
        let mut objects = self.objects();
        let stored = objects.get_mut(&key(object)).ok_or_else(not_found)?;

        stored.status = Some(status);
        Ok(())
    }

    async fn set_condition(
        &self,
        object: &PolicyRecord,
        condition: String,
    ) -> Result<(), StoreError> {
        let mut objects = self.objects();
        let stored = objects.get_mut(&key(object)).ok_or_else(not_found)?;

        stored.status = Some(SecurityPolicyStatus::with_condition(
            stored.status.as_ref(),
            condition,
        ));
        Ok(())
    }

    async fn list(&self) -> Result<Vec<PolicyRecord>, StoreError> {
        Ok(self.objects().values().cloned().collect())
    }
}
