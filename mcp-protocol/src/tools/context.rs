use lattice_core::{models::UpdateContext, LatticeError, Result};
use serde_json::{json, Map, Value};

use crate::coerce::{self, Args};
use crate::envelope::Envelope;
use crate::state::AppState;
use crate::tools::require_level;

pub const TOOL: &str = "manage_context";

pub async fn handle(state: &AppState, action: &str, args: &Args) -> Value {
    let result = match action {
        "create" => create(state, args).await,
        "get" => get(state, args).await,
        "update" => update(state, args).await,
        "delete" => delete(state, args).await,
        "resolve" => resolve(state, args).await,
        "delegate" => delegate(state, args).await,
        "add_insight" => add_insight(state, args).await,
        "add_progress" => add_progress(state, args).await,
        "list" => list(state, args).await,
        _ => Err(LatticeError::InvalidAction {
            tool: TOOL.to_string(),
            action: action.to_string(),
        }),
    };
    result.unwrap_or_else(|err| Envelope::new(TOOL, action).failure(&err))
}

fn require_context_id(args: &Args) -> Result<String> {
    if let Some(id) = coerce::opt_string(args, "context_id")? {
        return Ok(id);
    }
    coerce::require_string(args, "id")
}

async fn create(state: &AppState, args: &Args) -> Result<Value> {
    let level = require_level(args, "level")?;
    let context_id = require_context_id(args)?;
    let data = coerce::opt_object(args, "data")?
        .unwrap_or_else(|| Value::Object(Map::new()));
    let record = state.contexts.create(level, &context_id, data).await?;
    Ok(Envelope::new(TOOL, "create")
        .data("context_data", json!(record))
        .success())
}

async fn get(state: &AppState, args: &Args) -> Result<Value> {
    let level = require_level(args, "level")?;
    let context_id = require_context_id(args)?;
    let record = state.contexts.get(level, &context_id).await?;
    Ok(Envelope::new(TOOL, "get")
        .data("context_data", json!(record))
        .success())
}

async fn update(state: &AppState, args: &Args) -> Result<Value> {
    let level = require_level(args, "level")?;
    let context_id = require_context_id(args)?;
    let updates = UpdateContext {
        data: coerce::opt_object(args, "data")?,
        local_overrides: coerce::opt_object(args, "local_overrides")?,
        delegation_triggers: coerce::opt_object(args, "delegation_triggers")?,
        inheritance_disabled: coerce::opt_bool(args, "inheritance_disabled")?,
    };
    let propagate = coerce::bool_or(args, "propagate", true)?;
    let record = state
        .contexts
        .update(level, &context_id, updates, propagate)
        .await?;
    Ok(Envelope::new(TOOL, "update")
        .data("context_data", json!(record))
        .detail("propagate", json!(propagate))
        .success())
}

async fn delete(state: &AppState, args: &Args) -> Result<Value> {
    let level = require_level(args, "level")?;
    let context_id = require_context_id(args)?;
    state.contexts.delete(level, &context_id).await?;
    Ok(Envelope::new(TOOL, "delete")
        .data("context_id", json!(context_id))
        .detail("level", json!(level.as_str()))
        .success())
}

async fn resolve(state: &AppState, args: &Args) -> Result<Value> {
    let level = require_level(args, "level")?;
    let context_id = require_context_id(args)?;
    let force_refresh = coerce::bool_or(args, "force_refresh", false)?;
    let include_inherited = coerce::bool_or(args, "include_inherited", true)?;
    let resolved = state
        .contexts
        .resolve(level, &context_id, force_refresh, include_inherited)
        .await?;
    let from_cache = resolved.from_cache;
    Ok(Envelope::new(TOOL, "resolve")
        .data("resolved_context", json!(resolved))
        .detail("from_cache", json!(from_cache))
        .success())
}

async fn delegate(state: &AppState, args: &Args) -> Result<Value> {
    let source_level = if args.contains_key("source_level") {
        require_level(args, "source_level")?
    } else {
        require_level(args, "level")?
    };
    let source_id = if let Some(id) = coerce::opt_string(args, "source_id")? {
        id
    } else {
        require_context_id(args)?
    };
    let target_level = require_level(args, "target_level")?;
    let data = coerce::opt_object(args, "data")?
        .or(coerce::opt_object(args, "delegated_data")?)
        .ok_or_else(|| LatticeError::Validation("Missing required parameter 'data'".to_string()))?;
    let reason = coerce::opt_string(args, "reason")?.unwrap_or_default();
    let auto = coerce::bool_or(args, "auto_delegated", true)?;

    let delegation = state
        .contexts
        .delegate(source_level, &source_id, target_level, data, reason, auto)
        .await?;
    let queued = !delegation.processed;
    Ok(Envelope::new(TOOL, "delegate")
        .data("delegation_result", json!(delegation))
        .detail("queued_for_review", json!(queued))
        .success())
}

async fn add_insight(state: &AppState, args: &Args) -> Result<Value> {
    let level = require_level(args, "level")?;
    let context_id = require_context_id(args)?;
    let content = coerce::require_string(args, "content")?;
    let category = coerce::opt_string(args, "category")?;
    let importance = coerce::opt_string(args, "importance")?;
    let agent = coerce::opt_string(args, "agent")?;
    let record = state
        .contexts
        .add_insight(
            level,
            &context_id,
            &content,
            category.as_deref(),
            importance.as_deref(),
            agent.as_deref(),
        )
        .await?;
    Ok(Envelope::new(TOOL, "add_insight")
        .data("context_data", json!(record))
        .success())
}

async fn add_progress(state: &AppState, args: &Args) -> Result<Value> {
    let level = require_level(args, "level")?;
    let context_id = require_context_id(args)?;
    let content = coerce::require_string(args, "content")?;
    let agent = coerce::opt_string(args, "agent")?;
    let record = state
        .contexts
        .add_progress(level, &context_id, &content, agent.as_deref())
        .await?;
    Ok(Envelope::new(TOOL, "add_progress")
        .data("context_data", json!(record))
        .success())
}

async fn list(state: &AppState, args: &Args) -> Result<Value> {
    let level = require_level(args, "level")?;
    let contexts = state.contexts.list(level).await?;
    let count = contexts.len();
    Ok(Envelope::new(TOOL, "list")
        .data("contexts", json!(contexts))
        .detail("count", json!(count))
        .success())
}
