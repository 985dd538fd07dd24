//! Hierarchical context resolution over the four-tier inheritance chain.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use crate::context::cache::ContextCache;
use crate::context::delegation::DelegationEngine;
use crate::context::merge;
use crate::error::{InvariantKind, LatticeError, Result};
use crate::models::{
    ChainLink, ContextDelegation, ContextLevel, ContextRecord, NewDelegation, ResolvedContext,
    Task, UpdateContext, GLOBAL_SINGLETON_ID,
};
use crate::repository::{
    BranchRepository, ContextRepository, ProjectRepository, TaskRepository,
};
use crate::validation::Validator;

// Bounded retry for optimistic-version races on context writes
const MAX_WRITE_ATTEMPTS: u8 = 5;

/// Facade over context storage, the merge rule, the cache and delegation.
///
/// All context reads and writes go through this service so that cache
/// invalidation stays synchronous with every write.
pub struct ContextService {
    contexts: Arc<dyn ContextRepository>,
    projects: Arc<dyn ProjectRepository>,
    branches: Arc<dyn BranchRepository>,
    tasks: Arc<dyn TaskRepository>,
    cache: Arc<ContextCache>,
    delegation: Arc<DelegationEngine>,
}

impl ContextService {
    pub fn new(
        contexts: Arc<dyn ContextRepository>,
        projects: Arc<dyn ProjectRepository>,
        branches: Arc<dyn BranchRepository>,
        tasks: Arc<dyn TaskRepository>,
        cache: Arc<ContextCache>,
        delegation: Arc<DelegationEngine>,
    ) -> Self {
        Self {
            contexts,
            projects,
            branches,
            tasks,
            cache,
            delegation,
        }
    }

    pub fn cache(&self) -> &ContextCache {
        &self.cache
    }

    /// Make sure the global singleton exists; called once at startup.
    pub async fn bootstrap_global(&self) -> Result<ContextRecord> {
        if let Some(existing) = self
            .contexts
            .get(ContextLevel::Global, GLOBAL_SINGLETON_ID)
            .await?
        {
            return Ok(existing);
        }
        self.contexts
            .insert(empty_record(ContextLevel::Global, GLOBAL_SINGLETON_ID, None))
            .await
    }

    /// Local context record only, no inheritance.
    pub async fn get(&self, level: ContextLevel, id: &str) -> Result<ContextRecord> {
        Validator::validate_entity_id(id)?;
        self.contexts
            .get(level, id)
            .await?
            .ok_or_else(|| LatticeError::not_found(&format!("{level} context"), id))
    }

    pub async fn list(&self, level: ContextLevel) -> Result<Vec<ContextRecord>> {
        self.contexts.list(level).await
    }

    /// Resolve the merged context for `(level, id)`.
    ///
    /// Walks the stored parent chain root-ward, honors
    /// `inheritance_disabled`, applies the merge rule root-to-leaf and
    /// annotates the result with the consulted chain. Results are cached;
    /// `force_refresh` bypasses the lookup but still refreshes the entry.
    pub async fn resolve(
        &self,
        level: ContextLevel,
        id: &str,
        force_refresh: bool,
        include_inherited: bool,
    ) -> Result<ResolvedContext> {
        Validator::validate_entity_id(id)?;
        let key = (level, id.to_string());

        if include_inherited && !force_refresh {
            if let Some(cached) = self.cache.get(&key) {
                debug!(level = %level, id, "context resolve served from cache");
                return Ok(cached);
            }
        }

        let started = Instant::now();
        let records = if include_inherited {
            self.collect_chain(level, id).await?
        } else {
            let leaf = self
                .contexts
                .get(level, id)
                .await?
                .ok_or_else(|| LatticeError::not_found(&format!("{level} context"), id))?;
            vec![leaf]
        };
        let consulted: Vec<&ContextRecord> = records.iter().collect();

        let mut data = Value::Object(serde_json::Map::new());
        for record in &consulted {
            merge::merge_into(&mut data, &record.data);
            merge::merge_into(&mut data, &record.local_overrides);
        }

        let resolved = ResolvedContext {
            level,
            context_id: id.to_string(),
            data,
            inheritance_chain: consulted.iter().map(|r| r.level).collect(),
            chain: consulted
                .iter()
                .map(|r| ChainLink {
                    level: r.level,
                    context_id: r.id.clone(),
                    version: r.version,
                })
                .collect(),
            from_cache: false,
            resolved_at: Utc::now(),
        };

        if include_inherited {
            self.cache.put(&resolved, started.elapsed());
        }
        Ok(resolved)
    }

    /// Records on the inheritance chain, root first, leaf last.
    ///
    /// The leaf must exist (`NotFound`); a missing intermediate fails with
    /// `MissingParent` and is never auto-created here. A level with
    /// `inheritance_disabled` becomes the new root: levels above it are
    /// not consulted.
    async fn collect_chain(&self, level: ContextLevel, id: &str) -> Result<Vec<ContextRecord>> {
        let leaf = self
            .contexts
            .get(level, id)
            .await?
            .ok_or_else(|| LatticeError::not_found(&format!("{level} context"), id))?;

        let mut chain = vec![leaf];
        let mut visited: HashSet<(ContextLevel, String)> = HashSet::new();
        visited.insert((level, id.to_string()));

        loop {
            let current = chain.last().expect("chain is never empty");
            if current.inheritance_disabled {
                break;
            }
            let parent_level = match current.level.parent() {
                Some(parent_level) => parent_level,
                None => break,
            };
            let parent_id = current.parent_id.clone().ok_or_else(|| {
                LatticeError::missing_parent(parent_level.as_str(), "(unlinked)")
            })?;

            if !visited.insert((parent_level, parent_id.clone())) {
                return Err(LatticeError::CircularInheritance(format!(
                    "chain for {level} '{id}' re-visits {parent_level} '{parent_id}'"
                )));
            }

            let parent = self
                .contexts
                .get(parent_level, &parent_id)
                .await?
                .ok_or_else(|| {
                    LatticeError::missing_parent(parent_level.as_str(), &parent_id)
                })?;
            chain.push(parent);
        }

        chain.reverse();
        Ok(chain)
    }

    /// Create a context at a level.
    ///
    /// The owning entity must exist, and so must the parent context;
    /// explicit creation never fills in missing ancestors.
    pub async fn create(
        &self,
        level: ContextLevel,
        id: &str,
        data: Value,
    ) -> Result<ContextRecord> {
        Validator::validate_entity_id(id)?;
        Validator::validate_context_data(&data)?;

        if self.contexts.get(level, id).await?.is_some() {
            return Err(LatticeError::already_exists(
                &format!("{level} context"),
                id,
            ));
        }

        let parent_id = self.derive_parent_id(level, id).await?;
        if let (Some(parent_level), Some(parent_id)) = (level.parent(), parent_id.as_deref()) {
            if self.contexts.get(parent_level, parent_id).await?.is_none() {
                return Err(LatticeError::missing_parent(
                    parent_level.as_str(),
                    parent_id,
                ));
            }
        }

        let mut record = empty_record(level, id, parent_id);
        record.data = data;
        let created = self.contexts.insert(record).await?;
        self.cache.invalidate_dependents(id);
        Ok(created)
    }

    /// The parent context id implied by the owning entity's foreign keys.
    async fn derive_parent_id(&self, level: ContextLevel, id: &str) -> Result<Option<String>> {
        match level {
            ContextLevel::Global => {
                if id != GLOBAL_SINGLETON_ID {
                    return Err(LatticeError::Validation(format!(
                        "global context id must be '{GLOBAL_SINGLETON_ID}', got '{id}'"
                    )));
                }
                Ok(None)
            }
            ContextLevel::Project => {
                self.projects
                    .get(id)
                    .await?
                    .ok_or_else(|| LatticeError::not_found("Project", id))?;
                Ok(Some(GLOBAL_SINGLETON_ID.to_string()))
            }
            ContextLevel::Branch => {
                let branch = self
                    .branches
                    .get(id)
                    .await?
                    .ok_or_else(|| LatticeError::not_found("Branch", id))?;
                Ok(Some(branch.project_id))
            }
            ContextLevel::Task => {
                let task = self
                    .tasks
                    .get(id)
                    .await?
                    .ok_or_else(|| LatticeError::not_found("Task", id))?;
                Ok(Some(task.branch_id))
            }
        }
    }

    /// Update a context: the `data` payload deep-merges into the stored
    /// data, other fields replace when present. Retries version races and
    /// synchronously invalidates every downstream cache entry.
    pub async fn update(
        &self,
        level: ContextLevel,
        id: &str,
        updates: UpdateContext,
        propagate: bool,
    ) -> Result<ContextRecord> {
        Validator::validate_entity_id(id)?;
        if let Some(data) = &updates.data {
            Validator::validate_context_data(data)?;
        }

        let mut last_err = None;
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let mut record = self.get(level, id).await?;
            if let Some(data) = &updates.data {
                merge::merge_into(&mut record.data, data);
            }
            if let Some(local_overrides) = &updates.local_overrides {
                record.local_overrides = local_overrides.clone();
            }
            if let Some(triggers) = &updates.delegation_triggers {
                record.delegation_triggers = triggers.clone();
            }
            if let Some(disabled) = updates.inheritance_disabled {
                record.inheritance_disabled = disabled;
            }

            match self.contexts.update(record).await {
                Ok(updated) => {
                    if propagate {
                        self.cache.invalidate_dependents(id);
                    } else {
                        self.cache.invalidate_key(&(level, id.to_string()));
                    }
                    return Ok(updated);
                }
                Err(err @ LatticeError::ConflictingState(_)) => last_err = Some(err),
                Err(other) => return Err(other),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            LatticeError::Internal("context update retry loop exhausted".to_string())
        }))
    }

    /// Merge a patch into a context's `data` (sync, insights, delegation).
    pub async fn merge_data(
        &self,
        level: ContextLevel,
        id: &str,
        patch: Value,
    ) -> Result<ContextRecord> {
        self.update(
            level,
            id,
            UpdateContext {
                data: Some(patch),
                ..Default::default()
            },
            true,
        )
        .await
    }

    /// Delete a context; refuses while child contexts still point at it.
    pub async fn delete(&self, level: ContextLevel, id: &str) -> Result<()> {
        Validator::validate_entity_id(id)?;
        self.get(level, id).await?;

        let children = self.contexts.children_of(level, id).await?;
        if !children.is_empty() {
            return Err(LatticeError::blocked_by(
                InvariantKind::ChildContexts,
                format!("{level} context '{id}' still has child contexts"),
                children,
            ));
        }

        self.contexts.delete(level, id).await?;
        self.cache.invalidate_dependents(id);
        Ok(())
    }

    /// Append a timestamped insight entry to a context's `data.insights`.
    pub async fn add_insight(
        &self,
        level: ContextLevel,
        id: &str,
        content: &str,
        category: Option<&str>,
        importance: Option<&str>,
        agent: Option<&str>,
    ) -> Result<ContextRecord> {
        if content.trim().is_empty() {
            return Err(LatticeError::empty_field("content"));
        }
        let entry = serde_json::json!({
            "content": content,
            "category": category.unwrap_or("general"),
            "importance": importance.unwrap_or("medium"),
            "agent": agent,
            "timestamp": Utc::now().to_rfc3339(),
        });
        self.merge_data(level, id, serde_json::json!({ "insights": [entry] }))
            .await
    }

    /// Append a timestamped progress entry to a context's `data.progress`.
    pub async fn add_progress(
        &self,
        level: ContextLevel,
        id: &str,
        content: &str,
        agent: Option<&str>,
    ) -> Result<ContextRecord> {
        if content.trim().is_empty() {
            return Err(LatticeError::empty_field("content"));
        }
        let entry = serde_json::json!({
            "content": content,
            "agent": agent,
            "timestamp": Utc::now().to_rfc3339(),
        });
        self.merge_data(level, id, serde_json::json!({ "progress": [entry] }))
            .await
    }

    /// Enqueue an upward delegation from `(source_level, source_id)`.
    ///
    /// The target id is derived from the source's stored chain, so callers
    /// name only the target level.
    pub async fn delegate(
        &self,
        source_level: ContextLevel,
        source_id: &str,
        target_level: ContextLevel,
        data: Value,
        reason: String,
        auto: bool,
    ) -> Result<ContextDelegation> {
        Validator::validate_entity_id(source_id)?;
        Validator::validate_context_data(&data)?;

        if target_level == source_level
            || chain_position(target_level) >= chain_position(source_level)
        {
            return Err(LatticeError::Validation(format!(
                "delegation must promote upward; {source_level} -> {target_level} is not"
            )));
        }

        let chain = self.collect_chain(source_level, source_id).await?;
        let target_id = chain
            .iter()
            .find(|record| record.level == target_level)
            .map(|record| record.id.clone())
            .ok_or_else(|| {
                LatticeError::missing_parent(target_level.as_str(), source_id)
            })?;

        self.delegation
            .submit(NewDelegation {
                source_level,
                source_id: source_id.to_string(),
                target_level,
                target_id,
                delegated_data: data,
                reason,
                auto_delegated: auto,
            })
            .await
    }

    /// The delegation engine behind this service.
    pub fn delegation(&self) -> &DelegationEngine {
        &self.delegation
    }

    /// Ensure the full context chain for a task exists, creating any
    /// missing level with empty data.
    ///
    /// This is the completion-time auto-create path; explicit
    /// `manage_context.create` stays strict about missing parents. Returns
    /// whether the task-level context had to be created.
    pub async fn ensure_chain_for_task(&self, task: &Task) -> Result<bool> {
        let branch = self
            .branches
            .get(&task.branch_id)
            .await?
            .ok_or_else(|| LatticeError::not_found("Branch", &task.branch_id))?;

        self.bootstrap_global().await?;

        if self
            .contexts
            .get(ContextLevel::Project, &branch.project_id)
            .await?
            .is_none()
        {
            self.contexts
                .insert(empty_record(
                    ContextLevel::Project,
                    &branch.project_id,
                    Some(GLOBAL_SINGLETON_ID.to_string()),
                ))
                .await?;
        }

        if self
            .contexts
            .get(ContextLevel::Branch, &branch.id)
            .await?
            .is_none()
        {
            self.contexts
                .insert(empty_record(
                    ContextLevel::Branch,
                    &branch.id,
                    Some(branch.project_id.clone()),
                ))
                .await?;
        }

        if self
            .contexts
            .get(ContextLevel::Task, &task.id)
            .await?
            .is_none()
        {
            self.contexts
                .insert(empty_record(
                    ContextLevel::Task,
                    &task.id,
                    Some(task.branch_id.clone()),
                ))
                .await?;
            self.cache.invalidate_dependents(&task.id);
            return Ok(true);
        }
        Ok(false)
    }
}

fn empty_record(level: ContextLevel, id: &str, parent_id: Option<String>) -> ContextRecord {
    let now = Utc::now();
    ContextRecord {
        level,
        id: id.to_string(),
        parent_id,
        data: Value::Object(serde_json::Map::new()),
        local_overrides: Value::Object(serde_json::Map::new()),
        delegation_triggers: Value::Object(serde_json::Map::new()),
        inheritance_disabled: false,
        version: 1,
        created_at: now,
        updated_at: now,
    }
}

/// Distance from the root; global is 0.
fn chain_position(level: ContextLevel) -> u8 {
    match level {
        ContextLevel::Global => 0,
        ContextLevel::Project => 1,
        ContextLevel::Branch => 2,
        ContextLevel::Task => 3,
    }
}
