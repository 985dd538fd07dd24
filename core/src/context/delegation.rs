//! Upward promotion of context data with a review queue.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::info;

use crate::context::cache::ContextCache;
use crate::context::merge;
use crate::error::{LatticeError, Result};
use crate::models::{new_entity_id, ContextDelegation, ContextLevel, NewDelegation};
use crate::repository::{ContextRepository, DelegationRepository};

// Bounded retry for optimistic-version races when applying to the target
const MAX_APPLY_ATTEMPTS: u8 = 5;

/// Persists delegation requests and applies or queues them by policy.
///
/// Auto-delegations targeting the project or branch level apply
/// immediately; anything aimed at the global context waits for explicit
/// approval. Applying deep-merges the payload into the target's `data`,
/// bumps its version and invalidates every cache entry whose chain
/// traverses the target. The source context is never touched.
pub struct DelegationEngine {
    delegations: Arc<dyn DelegationRepository>,
    contexts: Arc<dyn ContextRepository>,
    cache: Arc<ContextCache>,
}

impl DelegationEngine {
    pub fn new(
        delegations: Arc<dyn DelegationRepository>,
        contexts: Arc<dyn ContextRepository>,
        cache: Arc<ContextCache>,
    ) -> Self {
        Self {
            delegations,
            contexts,
            cache,
        }
    }

    /// Enqueue a delegation and process it if policy allows.
    pub async fn submit(&self, request: NewDelegation) -> Result<ContextDelegation> {
        if !request.delegated_data.is_object() {
            return Err(LatticeError::Validation(
                "Delegated data must be a JSON object".to_string(),
            ));
        }

        let now = Utc::now();
        let delegation = ContextDelegation {
            id: new_entity_id(),
            source_level: request.source_level,
            source_id: request.source_id,
            target_level: request.target_level,
            target_id: request.target_id,
            delegated_data: request.delegated_data,
            reason: request.reason,
            auto_delegated: request.auto_delegated,
            processed: false,
            approved: None,
            rejected_reason: None,
            created_at: now,
            processed_at: None,
        };
        let delegation = self.delegations.create(delegation).await?;

        // Global writes always wait for review
        if delegation.target_level == ContextLevel::Global || !delegation.auto_delegated {
            info!(
                delegation_id = %delegation.id,
                target_level = %delegation.target_level,
                "delegation queued for review"
            );
            return Ok(delegation);
        }

        self.apply(delegation).await
    }

    /// Approve or reject a queued delegation.
    pub async fn process(
        &self,
        delegation_id: &str,
        approve: bool,
        rejected_reason: Option<String>,
    ) -> Result<ContextDelegation> {
        let delegation = self
            .delegations
            .get(delegation_id)
            .await?
            .ok_or_else(|| LatticeError::not_found("Delegation", delegation_id))?;

        if delegation.processed {
            return Err(LatticeError::ConflictingState(format!(
                "delegation '{delegation_id}' was already processed"
            )));
        }

        if approve {
            self.apply(delegation).await
        } else {
            self.delegations
                .mark_processed(delegation_id, false, rejected_reason)
                .await
        }
    }

    /// Pending queue entries awaiting review.
    pub async fn pending(&self) -> Result<Vec<ContextDelegation>> {
        self.delegations.list(Some(false)).await
    }

    pub async fn list(&self, processed: Option<bool>) -> Result<Vec<ContextDelegation>> {
        self.delegations.list(processed).await
    }

    /// Apply a delegation to its target context.
    ///
    /// A payload that would overwrite an object in the target with a
    /// non-object violates the schema invariant; the delegation is
    /// rejected and the target stays unchanged.
    async fn apply(&self, delegation: ContextDelegation) -> Result<ContextDelegation> {
        for _ in 0..MAX_APPLY_ATTEMPTS {
            let mut target = match self
                .contexts
                .get(delegation.target_level, &delegation.target_id)
                .await?
            {
                Some(target) => target,
                None => {
                    return self
                        .delegations
                        .mark_processed(
                            &delegation.id,
                            false,
                            Some(format!(
                                "target {} context '{}' does not exist",
                                delegation.target_level, delegation.target_id
                            )),
                        )
                        .await;
                }
            };

            if let Some(conflict) = object_overwrite(&target.data, &delegation.delegated_data) {
                return self
                    .delegations
                    .mark_processed(
                        &delegation.id,
                        false,
                        Some(format!(
                            "delegated data would replace object at '{conflict}' with a non-object"
                        )),
                    )
                    .await;
            }

            merge::merge_into(&mut target.data, &delegation.delegated_data);
            match self.contexts.update(target).await {
                Ok(_) => {
                    self.cache.invalidate_dependents(&delegation.target_id);
                    info!(
                        delegation_id = %delegation.id,
                        target_level = %delegation.target_level,
                        target_id = %delegation.target_id,
                        "delegation applied"
                    );
                    return self
                        .delegations
                        .mark_processed(&delegation.id, true, None)
                        .await;
                }
                Err(LatticeError::ConflictingState(_)) => continue,
                Err(other) => return Err(other),
            }
        }
        Err(LatticeError::ConflictingState(format!(
            "delegation '{}' lost every version race against the target",
            delegation.id
        )))
    }
}

/// Path of the first key where `patch` would replace an object in `base`
/// with a non-object, if any.
fn object_overwrite(base: &Value, patch: &Value) -> Option<String> {
    let (base_map, patch_map) = match (base, patch) {
        (Value::Object(b), Value::Object(p)) => (b, p),
        _ => return None,
    };
    for (key, patch_value) in patch_map {
        if let Some(base_value) = base_map.get(key) {
            match (base_value, patch_value) {
                (Value::Object(_), Value::Object(_)) => {
                    if let Some(nested) = object_overwrite(base_value, patch_value) {
                        return Some(format!("{key}.{nested}"));
                    }
                }
                (Value::Object(_), value) if !value.is_null() => {
                    return Some(key.clone());
                }
                _ => {}
            }
        }
    }
    None
}
