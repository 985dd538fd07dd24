use lattice_core::Result;
use serde_json::{json, Value};

use crate::coerce::{self, Args};
use crate::envelope::Envelope;
use crate::state::AppState;

pub const TOOL: &str = "call_agent";

/// `call_agent` is a single-action tool: it returns the descriptor for a
/// named agent role.
pub async fn handle(state: &AppState, args: &Args) -> Value {
    describe(state, args)
        .await
        .unwrap_or_else(|err| Envelope::new(TOOL, "call").failure(&err))
}

async fn describe(state: &AppState, args: &Args) -> Result<Value> {
    let name = if let Some(name) = coerce::opt_string(args, "name_agent")? {
        name
    } else {
        coerce::require_string(args, "name")?
    };
    let descriptor = state.agents.describe(&name).await?;
    Ok(Envelope::new(TOOL, "call")
        .data("agent", descriptor)
        .success())
}
