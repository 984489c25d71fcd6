//! In-memory backing store with the full versioned-entity lifecycle

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::model::{EntityStatus, Field, Function, Rule, Terminal, Workflow};
use crate::store::{ConfigStore, StoreError};

#[derive(Default)]
struct NamespaceData {
    fields: HashMap<String, Field>,
    functions: HashMap<String, Vec<Function>>,
    rules: HashMap<String, Vec<Rule>>,
    workflows: HashMap<String, Vec<Workflow>>,
    terminals: HashMap<String, Terminal>,
    checksum: Option<String>,
}

impl NamespaceData {
    fn active<'a, T>(versions: &'a HashMap<String, Vec<T>>, status: impl Fn(&T) -> EntityStatus) -> Vec<&'a T> {
        versions
            .values()
            .flat_map(|v| v.iter())
            .filter(|e| status(e) == EntityStatus::Active)
            .collect()
    }
}

/// Single-process [`ConfigStore`] backed by concurrent maps.
///
/// Carries the write-side lifecycle the external admin layer would normally
/// drive: namespace creation, draft staging, publish-with-supersede, and
/// explicit checksum recomputation. Also supports failure injection so the
/// circuit breaker path can be exercised deterministically.
#[derive(Clone, Default)]
pub struct MemoryConfigStore {
    namespaces: Arc<DashMap<String, NamespaceData>>,
    inject_failures: Arc<AtomicU32>,
}

impl MemoryConfigStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` store operations fail with
    /// [`StoreError::Unavailable`].
    pub fn fail_next_ops(&self, count: u32) {
        self.inject_failures.store(count, Ordering::SeqCst);
    }

    fn check_fault(&self) -> Result<(), StoreError> {
        let remaining = self
            .inject_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if remaining {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }

    /// Create a namespace. Idempotent.
    pub fn create_namespace(&self, namespace: &str) {
        self.namespaces
            .entry(namespace.to_string())
            .or_default();
    }

    /// Delete a namespace and everything it owns.
    pub fn delete_namespace(&self, namespace: &str) {
        self.namespaces.remove(namespace);
    }

    /// Insert or replace a field declaration.
    pub fn put_field(&self, namespace: &str, field: Field) -> Result<(), StoreError> {
        let mut data = self.namespace_mut(namespace)?;
        data.fields.insert(field.field_id.clone(), field);
        Ok(())
    }

    /// Insert or replace a terminal.
    pub fn put_terminal(&self, namespace: &str, terminal: Terminal) -> Result<(), StoreError> {
        let mut data = self.namespace_mut(namespace)?;
        data.terminals.insert(terminal.terminal_id.clone(), terminal);
        Ok(())
    }

    /// Stage a function draft. Replaces any existing draft for the same id;
    /// otherwise the draft gets the next version number.
    pub fn put_draft_function(&self, namespace: &str, mut function: Function) -> Result<u32, StoreError> {
        function.validate().map_err(StoreError::InvalidEntity)?;
        let mut data = self.namespace_mut(namespace)?;
        let versions = data.functions.entry(function.function_id.clone()).or_default();
        let version = stage_draft(versions, |f| f.status, |f| f.version)?;
        function.version = version;
        function.status = EntityStatus::Draft;
        upsert_version(versions, function, |f| f.version);
        Ok(version)
    }

    /// Stage a rule draft.
    pub fn put_draft_rule(&self, namespace: &str, mut rule: Rule) -> Result<u32, StoreError> {
        if rule.conditions.is_empty() {
            return Err(StoreError::InvalidEntity(format!(
                "rule {} declares no conditions",
                rule.rule_id
            )));
        }
        let mut data = self.namespace_mut(namespace)?;
        let versions = data.rules.entry(rule.rule_id.clone()).or_default();
        let version = stage_draft(versions, |r| r.status, |r| r.version)?;
        rule.version = version;
        rule.status = EntityStatus::Draft;
        upsert_version(versions, rule, |r| r.version);
        Ok(version)
    }

    /// Stage a workflow draft.
    pub fn put_draft_workflow(&self, namespace: &str, mut workflow: Workflow) -> Result<u32, StoreError> {
        workflow.validate().map_err(StoreError::InvalidEntity)?;
        let mut data = self.namespace_mut(namespace)?;
        let versions = data.workflows.entry(workflow.workflow_id.clone()).or_default();
        let version = stage_draft(versions, |w| w.status, |w| w.version)?;
        workflow.version = version;
        workflow.status = EntityStatus::Draft;
        upsert_version(versions, workflow, |w| w.version);
        Ok(version)
    }

    /// Publish the draft version of a function: the draft becomes active and
    /// the previously active version, if any, becomes inactive.
    pub fn publish_function(&self, namespace: &str, function_id: &str) -> Result<(), StoreError> {
        let mut data = self.namespace_mut(namespace)?;
        let versions = data
            .functions
            .get_mut(function_id)
            .ok_or_else(|| StoreError::LifecycleConflict(format!("unknown function {function_id}")))?;
        publish(versions, function_id, |f| &mut f.status)
    }

    /// Publish the draft version of a rule.
    pub fn publish_rule(&self, namespace: &str, rule_id: &str) -> Result<(), StoreError> {
        let mut data = self.namespace_mut(namespace)?;
        let versions = data
            .rules
            .get_mut(rule_id)
            .ok_or_else(|| StoreError::LifecycleConflict(format!("unknown rule {rule_id}")))?;
        publish(versions, rule_id, |r| &mut r.status)
    }

    /// Publish the draft version of a workflow.
    pub fn publish_workflow(&self, namespace: &str, workflow_id: &str) -> Result<(), StoreError> {
        let mut data = self.namespace_mut(namespace)?;
        let versions = data
            .workflows
            .get_mut(workflow_id)
            .ok_or_else(|| StoreError::LifecycleConflict(format!("unknown workflow {workflow_id}")))?;
        publish(versions, workflow_id, |w| &mut w.status)
    }

    fn namespace_mut(
        &self,
        namespace: &str,
    ) -> Result<dashmap::mapref::one::RefMut<'_, String, NamespaceData>, StoreError> {
        self.namespaces
            .get_mut(namespace)
            .ok_or_else(|| StoreError::NamespaceNotFound(namespace.to_string()))
    }

    fn namespace_ref(
        &self,
        namespace: &str,
    ) -> Result<dashmap::mapref::one::Ref<'_, String, NamespaceData>, StoreError> {
        self.namespaces
            .get(namespace)
            .ok_or_else(|| StoreError::NamespaceNotFound(namespace.to_string()))
    }

    fn digest_active(data: &NamespaceData) -> String {
        // The digest covers the active configuration only, in a canonical
        // order, so equivalent active sets always hash identically.
        let mut fields: Vec<&Field> = data.fields.values().collect();
        fields.sort_by(|a, b| a.field_id.cmp(&b.field_id));

        let mut functions = NamespaceData::active(&data.functions, |f: &Function| f.status);
        functions.sort_by(|a, b| a.function_id.cmp(&b.function_id));

        let mut rules = NamespaceData::active(&data.rules, |r: &Rule| r.status);
        rules.sort_by(|a, b| a.rule_id.cmp(&b.rule_id));

        let mut workflows = NamespaceData::active(&data.workflows, |w: &Workflow| w.status);
        workflows.sort_by(|a, b| a.workflow_id.cmp(&b.workflow_id));

        let mut terminals: Vec<&Terminal> = data.terminals.values().collect();
        terminals.sort_by(|a, b| a.terminal_id.cmp(&b.terminal_id));

        let mut hasher = Sha256::new();
        digest_json(&mut hasher, &fields);
        digest_json(&mut hasher, &functions);
        digest_json(&mut hasher, &rules);
        digest_json(&mut hasher, &workflows);
        digest_json(&mut hasher, &terminals);
        format!("{:x}", hasher.finalize())
    }
}

/// Feed one entity collection into the hasher via `serde_json::Value`, whose
/// object representation keeps keys sorted. Keyed maps inside entities (the
/// workflow step graph) therefore hash order-independently.
fn digest_json<T: serde::Serialize>(hasher: &mut Sha256, value: &T) {
    let canonical = serde_json::to_value(value).unwrap_or_default();
    hasher.update(canonical.to_string().as_bytes());
    hasher.update(b"\n");
}

fn stage_draft<T>(
    versions: &mut [T],
    status: impl Fn(&T) -> EntityStatus,
    version: impl Fn(&T) -> u32,
) -> Result<u32, StoreError> {
    if let Some(draft) = versions.iter().find(|e| status(e) == EntityStatus::Draft) {
        // Drafts are editable in place; re-staging keeps the version slot.
        return Ok(version(draft));
    }
    Ok(versions.iter().map(&version).max().unwrap_or(0) + 1)
}

fn upsert_version<T>(versions: &mut Vec<T>, entity: T, version: impl Fn(&T) -> u32) {
    let v = version(&entity);
    versions.retain(|e| version(e) != v);
    versions.push(entity);
}

fn publish<T>(
    versions: &mut [T],
    id: &str,
    status: impl Fn(&mut T) -> &mut EntityStatus,
) -> Result<(), StoreError> {
    let mut has_draft = false;
    for entity in versions.iter_mut() {
        let slot = status(entity);
        match *slot {
            EntityStatus::Draft => {
                *slot = EntityStatus::Active;
                has_draft = true;
            }
            EntityStatus::Active => *slot = EntityStatus::Inactive,
            EntityStatus::Inactive => {}
        }
    }
    if !has_draft {
        return Err(StoreError::LifecycleConflict(format!(
            "no draft version of {id} to publish"
        )));
    }
    Ok(())
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn list_namespaces(&self) -> Result<Vec<String>, StoreError> {
        self.check_fault()?;
        Ok(self.namespaces.iter().map(|e| e.key().clone()).collect())
    }

    async fn recompute_checksum(&self, namespace: &str) -> Result<(), StoreError> {
        self.check_fault()?;
        let mut data = self.namespace_mut(namespace)?;
        let digest = Self::digest_active(&data);
        debug!(namespace, checksum = %digest, "recomputed namespace checksum");
        data.checksum = Some(digest);
        Ok(())
    }

    async fn get_checksum(&self, namespace: &str) -> Result<String, StoreError> {
        self.check_fault()?;
        let data = self.namespace_ref(namespace)?;
        data.checksum
            .clone()
            .ok_or_else(|| StoreError::ChecksumMissing(namespace.to_string()))
    }

    async fn list_fields(&self, namespace: &str) -> Result<Vec<Field>, StoreError> {
        self.check_fault()?;
        let data = self.namespace_ref(namespace)?;
        Ok(data.fields.values().cloned().collect())
    }

    async fn list_active_functions(&self, namespace: &str) -> Result<Vec<Function>, StoreError> {
        self.check_fault()?;
        let data = self.namespace_ref(namespace)?;
        Ok(NamespaceData::active(&data.functions, |f: &Function| f.status)
            .into_iter()
            .cloned()
            .collect())
    }

    async fn list_active_rules(&self, namespace: &str) -> Result<Vec<Rule>, StoreError> {
        self.check_fault()?;
        let data = self.namespace_ref(namespace)?;
        Ok(NamespaceData::active(&data.rules, |r: &Rule| r.status)
            .into_iter()
            .cloned()
            .collect())
    }

    async fn list_active_workflows(&self, namespace: &str) -> Result<Vec<Workflow>, StoreError> {
        self.check_fault()?;
        let data = self.namespace_ref(namespace)?;
        Ok(NamespaceData::active(&data.workflows, |w: &Workflow| w.status)
            .into_iter()
            .cloned()
            .collect())
    }

    async fn list_terminals(&self, namespace: &str) -> Result<Vec<Terminal>, StoreError> {
        self.check_fault()?;
        let data = self.namespace_ref(namespace)?;
        Ok(data.terminals.values().cloned().collect())
    }
}
