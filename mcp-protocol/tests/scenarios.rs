//! End-to-end scenarios through the JSON-RPC dispatch over SQLite.

use std::sync::Arc;
use std::time::Duration;

use database::SqliteDatabase;
use mcp_protocol::server::{handle_method, ServerContext};
use mcp_protocol::{AppState, StateConfig};
use serde_json::{json, Value};

async fn context() -> ServerContext {
    let db = SqliteDatabase::in_memory().await.unwrap();
    let state = AppState::build(
        Arc::new(db.projects()),
        Arc::new(db.branches()),
        Arc::new(db.tasks()),
        Arc::new(db.subtasks()),
        Arc::new(db.contexts()),
        Arc::new(db.delegations()),
        Arc::new(db.agents()),
        StateConfig::default(),
    );
    state.initialize().await.unwrap();
    ServerContext {
        state,
        request_timeout: Duration::from_secs(30),
    }
}

/// Call a tool and return the parsed envelope.
async fn call(ctx: &ServerContext, tool: &str, arguments: Value) -> Value {
    let response = handle_method(
        ctx,
        "tools/call",
        json!({ "name": tool, "arguments": arguments }),
        Some(json!(1)),
    )
    .await;
    let text = response["result"]["content"][0]["text"]
        .as_str()
        .unwrap_or_else(|| panic!("no content in response: {response}"));
    serde_json::from_str(text).unwrap()
}

fn assert_success(envelope: &Value) {
    assert_eq!(
        envelope["success"],
        json!(true),
        "expected success envelope: {envelope}"
    );
}

async fn seed_project_branch(ctx: &ServerContext) -> (String, String) {
    let project = call(ctx, "manage_project", json!({"action": "create", "name": "Alpha"})).await;
    assert_success(&project);
    let project_id = project["data"]["project"]["id"].as_str().unwrap().to_string();

    let branch = call(
        ctx,
        "manage_git_branch",
        json!({"action": "create", "project_id": project_id, "name": "feat/x"}),
    )
    .await;
    assert_success(&branch);
    let branch_id = branch["data"]["branch"]["id"].as_str().unwrap().to_string();
    (project_id, branch_id)
}

#[tokio::test]
async fn scenario_a_full_task_lifecycle() {
    let ctx = context().await;
    let (_, branch_id) = seed_project_branch(&ctx).await;

    let task = call(
        &ctx,
        "manage_task",
        json!({"action": "create", "git_branch_id": branch_id, "title": "Impl auth", "priority": "high"}),
    )
    .await;
    assert_success(&task);
    assert_eq!(task["data"]["task"]["status"], "todo");
    assert_eq!(task["data"]["task"]["priority"], "high");
    let task_id = task["data"]["task"]["id"].as_str().unwrap().to_string();

    let subtask = call(
        &ctx,
        "manage_subtask",
        json!({"action": "create", "task_id": task_id, "title": "Write tests"}),
    )
    .await;
    assert_success(&subtask);
    let subtask_id = subtask["data"]["subtask"]["id"].as_str().unwrap().to_string();

    // Completion is gated on the unfinished subtask
    let blocked = call(
        &ctx,
        "manage_task",
        json!({"action": "complete", "task_id": task_id, "completion_summary": "done"}),
    )
    .await;
    assert_eq!(blocked["status"], "failure");
    assert_eq!(blocked["error"]["code"], "INVARIANT_VIOLATION");
    assert_eq!(blocked["data"]["blocking_subtasks"], json!([subtask_id]));

    let subtask_done = call(
        &ctx,
        "manage_subtask",
        json!({
            "action": "complete",
            "task_id": task_id,
            "subtask_id": subtask_id,
            "completion_summary": "tests green",
        }),
    )
    .await;
    assert_success(&subtask_done);
    assert_eq!(subtask_done["data"]["subtask"]["progress_percentage"], 100);
    assert_eq!(subtask_done["data"]["progress"]["ready_to_complete"], true);

    let completed = call(
        &ctx,
        "manage_task",
        json!({"action": "complete", "task_id": task_id, "completion_summary": "done"}),
    )
    .await;
    assert_success(&completed);
    assert_eq!(completed["data"]["context_auto_created"], true);
    assert_eq!(completed["data"]["task"]["status"], "done");

    let branch = call(
        &ctx,
        "manage_git_branch",
        json!({"action": "get", "git_branch_id": branch_id}),
    )
    .await;
    assert_eq!(branch["data"]["branch"]["completed_task_count"], 1);
    assert_eq!(branch["data"]["branch"]["task_count"], 1);
}

#[tokio::test]
async fn scenario_b_context_inheritance_resolve() {
    let ctx = context().await;
    let (project_id, branch_id) = seed_project_branch(&ctx).await;
    let task = call(
        &ctx,
        "manage_task",
        json!({"action": "create", "branch_id": branch_id, "title": "T"}),
    )
    .await;
    let task_id = task["data"]["task"]["id"].as_str().unwrap().to_string();

    // Global exists from bootstrap; fill it and create the chain
    assert_success(
        &call(
            &ctx,
            "manage_context",
            json!({
                "action": "update", "level": "global", "context_id": "global_singleton",
                "data": {"rules": {"style": "black"}, "lists": ["g"]},
            }),
        )
        .await,
    );
    assert_success(
        &call(
            &ctx,
            "manage_context",
            json!({
                "action": "create", "level": "project", "context_id": project_id,
                "data": {"rules": {"linter": "ruff"}, "lists": ["p"]},
            }),
        )
        .await,
    );
    assert_success(
        &call(
            &ctx,
            "manage_context",
            json!({
                "action": "create", "level": "branch", "context_id": branch_id,
                "data": {"lists": ["b"]},
            }),
        )
        .await,
    );
    assert_success(
        &call(
            &ctx,
            "manage_context",
            json!({
                "action": "create", "level": "task", "context_id": task_id,
                "data": {"rules": {"style": "isort"}, "lists": ["t"]},
            }),
        )
        .await,
    );

    let resolved = call(
        &ctx,
        "manage_context",
        json!({"action": "resolve", "level": "task", "context_id": task_id}),
    )
    .await;
    assert_success(&resolved);
    let data = &resolved["data"]["resolved_context"]["data"];
    assert_eq!(
        *data,
        json!({
            "rules": {"style": "isort", "linter": "ruff"},
            "lists": ["g", "p", "b", "t"],
        })
    );
    assert_eq!(
        resolved["data"]["resolved_context"]["inheritance_chain"],
        json!(["global", "project", "branch", "task"])
    );

    // Second resolve comes from the cache
    let cached = call(
        &ctx,
        "manage_context",
        json!({"action": "resolve", "level": "task", "context_id": task_id}),
    )
    .await;
    assert_eq!(cached["metadata"]["operation_details"]["from_cache"], true);
}

#[tokio::test]
async fn scenario_c_delegation() {
    let ctx = context().await;
    let (project_id, branch_id) = seed_project_branch(&ctx).await;
    let task = call(
        &ctx,
        "manage_task",
        json!({"action": "create", "branch_id": branch_id, "title": "T"}),
    )
    .await;
    let task_id = task["data"]["task"]["id"].as_str().unwrap().to_string();

    for (level, id) in [
        ("project", project_id.as_str()),
        ("branch", branch_id.as_str()),
        ("task", task_id.as_str()),
    ] {
        assert_success(
            &call(
                &ctx,
                "manage_context",
                json!({"action": "create", "level": level, "context_id": id}),
            )
            .await,
        );
    }

    let project_before = call(
        &ctx,
        "manage_context",
        json!({"action": "get", "level": "project", "context_id": project_id}),
    )
    .await;
    let version_before = project_before["data"]["context_data"]["version"]
        .as_i64()
        .unwrap();

    let delegated = call(
        &ctx,
        "manage_context",
        json!({
            "action": "delegate",
            "source_level": "task",
            "source_id": task_id,
            "target_level": "project",
            "data": {"shared": {"pattern": "JWT"}},
            "reason": "reusable",
        }),
    )
    .await;
    assert_success(&delegated);
    assert_eq!(delegated["data"]["delegation_result"]["processed"], true);
    assert_eq!(delegated["data"]["delegation_result"]["approved"], true);

    let project_after = call(
        &ctx,
        "manage_context",
        json!({"action": "get", "level": "project", "context_id": project_id}),
    )
    .await;
    assert_eq!(
        project_after["data"]["context_data"]["data"]["shared"]["pattern"],
        "JWT"
    );
    assert_eq!(
        project_after["data"]["context_data"]["version"].as_i64().unwrap(),
        version_before + 1
    );

    // The promotion is visible from the task-level resolve
    let resolved = call(
        &ctx,
        "manage_context",
        json!({"action": "resolve", "level": "task", "context_id": task_id}),
    )
    .await;
    assert_eq!(
        resolved["data"]["resolved_context"]["data"]["shared"]["pattern"],
        "JWT"
    );
}

#[tokio::test]
async fn scenario_d_dependency_cycle_rejected() {
    let ctx = context().await;
    let (_, branch_id) = seed_project_branch(&ctx).await;

    let mut ids = vec![];
    for title in ["T1", "T2"] {
        let task = call(
            &ctx,
            "manage_task",
            json!({"action": "create", "branch_id": branch_id, "title": title}),
        )
        .await;
        ids.push(task["data"]["task"]["id"].as_str().unwrap().to_string());
    }

    let ok = call(
        &ctx,
        "manage_task",
        json!({"action": "add_dependency", "task_id": ids[1], "depends_on": ids[0]}),
    )
    .await;
    assert_success(&ok);
    assert_eq!(ok["data"]["added"], true);

    let cycle = call(
        &ctx,
        "manage_task",
        json!({"action": "add_dependency", "task_id": ids[0], "depends_on": ids[1]}),
    )
    .await;
    assert_eq!(cycle["status"], "failure");
    assert_eq!(cycle["error"]["code"], "DEPENDENCY_CYCLE");

    // Idempotent re-add reports no change
    let repeat = call(
        &ctx,
        "manage_task",
        json!({"action": "add_dependency", "task_id": ids[1], "depends_on": ids[0]}),
    )
    .await;
    assert_success(&repeat);
    assert_eq!(repeat["data"]["added"], false);
}

#[tokio::test]
async fn scenario_e_next_task_selection() {
    let ctx = context().await;
    let (_, branch_id) = seed_project_branch(&ctx).await;

    let t1 = call(
        &ctx,
        "manage_task",
        json!({"action": "create", "branch_id": branch_id, "title": "T1", "priority": "high"}),
    )
    .await;
    let t1_id = t1["data"]["task"]["id"].as_str().unwrap().to_string();

    let t2 = call(
        &ctx,
        "manage_task",
        json!({
            "action": "create", "branch_id": branch_id, "title": "T2",
            "priority": "critical", "dependencies": [t1_id],
        }),
    )
    .await;
    assert_success(&t2);
    let t2_id = t2["data"]["task"]["id"].as_str().unwrap().to_string();

    call(
        &ctx,
        "manage_task",
        json!({"action": "create", "branch_id": branch_id, "title": "T3", "priority": "urgent"}),
    )
    .await;

    call(
        &ctx,
        "manage_task",
        json!({"action": "complete", "task_id": t1_id, "completion_summary": "done"}),
    )
    .await;

    // T1 done, so the critical task outranks the urgent one
    let next = call(
        &ctx,
        "manage_task",
        json!({"action": "next", "branch_id": branch_id}),
    )
    .await;
    assert_success(&next);
    assert_eq!(next["data"]["task"]["id"], json!(t2_id));
}

#[tokio::test]
async fn scenario_f_concurrent_context_writes() {
    let ctx = context().await;
    let (project_id, _) = seed_project_branch(&ctx).await;
    assert_success(
        &call(
            &ctx,
            "manage_context",
            json!({"action": "create", "level": "project", "context_id": project_id, "data": {"base": 1}}),
        )
        .await,
    );

    let (first, second) = tokio::join!(
        call(
            &ctx,
            "manage_context",
            json!({"action": "update", "level": "project", "context_id": project_id, "data": {"a": 1}}),
        ),
        call(
            &ctx,
            "manage_context",
            json!({"action": "update", "level": "project", "context_id": project_id, "data": {"b": 2}}),
        )
    );
    assert_success(&first);
    assert_success(&second);

    let after = call(
        &ctx,
        "manage_context",
        json!({"action": "get", "level": "project", "context_id": project_id}),
    )
    .await;
    let record = &after["data"]["context_data"];
    assert_eq!(record["version"], 3);
    assert_eq!(record["data"]["a"], 1);
    assert_eq!(record["data"]["b"], 2);
    assert_eq!(record["data"]["base"], 1);
}

#[tokio::test]
async fn search_and_boundary_behaviors() {
    let ctx = context().await;
    let (_, branch_id) = seed_project_branch(&ctx).await;
    call(
        &ctx,
        "manage_task",
        json!({
            "action": "create", "branch_id": branch_id,
            "title": "Implement auth", "description": "JWT middleware",
        }),
    )
    .await;

    // Token-AND: both tokens must appear
    let hits = call(
        &ctx,
        "manage_task",
        json!({"action": "search", "query": "auth jwt"}),
    )
    .await;
    assert_eq!(hits["data"]["tasks"].as_array().unwrap().len(), 1);

    let misses = call(
        &ctx,
        "manage_task",
        json!({"action": "search", "query": "auth missingtoken"}),
    )
    .await;
    assert!(misses["data"]["tasks"].as_array().unwrap().is_empty());

    // Empty query returns an empty list, not all tasks
    let empty = call(&ctx, "manage_task", json!({"action": "search", "query": ""})).await;
    assert!(empty["data"]["tasks"].as_array().unwrap().is_empty());

    // Creating a task on a missing branch is NotFound
    let bad = call(
        &ctx,
        "manage_task",
        json!({"action": "create", "branch_id": "00000000-0000-0000-0000-000000000000", "title": "x"}),
    )
    .await;
    assert_eq!(bad["error"]["code"], "NOT_FOUND");

    // Unknown action is InvalidAction
    let invalid = call(&ctx, "manage_task", json!({"action": "explode"})).await;
    assert_eq!(invalid["error"]["code"], "INVALID_ACTION");
}

#[tokio::test]
async fn agent_tools_round_trip() {
    let ctx = context().await;
    let (_, branch_id) = seed_project_branch(&ctx).await;

    let registered = call(
        &ctx,
        "manage_agent",
        json!({"action": "register", "name": "@coding_agent"}),
    )
    .await;
    assert_success(&registered);

    let assigned = call(
        &ctx,
        "manage_agent",
        json!({"action": "assign", "agent_id": "@coding_agent", "git_branch_id": branch_id}),
    )
    .await;
    assert_success(&assigned);
    assert_eq!(
        assigned["data"]["branch"]["assigned_agent_id"],
        "@coding_agent"
    );

    // Statistics read the live assignment table
    let stats = call(
        &ctx,
        "manage_git_branch",
        json!({"action": "get_statistics", "git_branch_id": branch_id}),
    )
    .await;
    assert_eq!(
        stats["data"]["statistics"]["assigned_agents"],
        json!(["@coding_agent"])
    );

    let descriptor = call(&ctx, "call_agent", json!({"name_agent": "@coding_agent"})).await;
    assert_success(&descriptor);
    assert_eq!(descriptor["data"]["agent"]["name"], "@coding_agent");
    assert!(descriptor["data"]["agent"]["capabilities"].is_array());
}

#[tokio::test]
async fn jsonrpc_framing_and_protocol_methods() {
    let ctx = context().await;

    let initialized = handle_method(&ctx, "initialize", json!({}), Some(json!(1))).await;
    assert_eq!(initialized["jsonrpc"], "2.0");
    assert_eq!(
        initialized["result"]["serverInfo"]["name"],
        json!("lattice-mcp")
    );

    let tools = handle_method(&ctx, "tools/list", json!({}), Some(json!(2))).await;
    let listed = tools["result"]["tools"].as_array().unwrap();
    assert_eq!(listed.len(), 8);

    let unknown = handle_method(&ctx, "bogus/method", json!({}), Some(json!(3))).await;
    assert_eq!(unknown["error"]["code"], -32601);

    let unknown_tool = handle_method(
        &ctx,
        "tools/call",
        json!({"name": "manage_nothing", "arguments": {}}),
        Some(json!(4)),
    )
    .await;
    assert_eq!(unknown_tool["error"]["code"], -32602);

    // Tool results wrap the envelope as a text content item
    let health = handle_method(
        &ctx,
        "tools/call",
        json!({"name": "manage_project", "arguments": {"action": "health_check"}}),
        Some(json!(5)),
    )
    .await;
    assert_eq!(health["id"], 5);
    assert_eq!(health["result"]["isError"], false);
    let envelope: Value =
        serde_json::from_str(health["result"]["content"][0]["text"].as_str().unwrap()).unwrap();
    assert_eq!(envelope["operation"], "manage_project.health_check");
    assert_eq!(envelope["data"]["health"]["database"], true);
}
