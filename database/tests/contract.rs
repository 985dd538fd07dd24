//! Contract tests: core services running over the real SQLite store.

use std::sync::Arc;

use database::SqliteDatabase;
use lattice_core::{
    models::{
        CompleteSubtask, CompleteTask, ContextLevel, ContextRecord, Insight, NewBranch,
        NewProject, NewSubtask, NewTask, UpdateContext, GLOBAL_SINGLETON_ID,
    },
    BranchRepository, ContextCache, ContextService, ContextSyncService, DelegationEngine,
    DependencyService, LatticeError, ProjectRepository, SubtaskService, TaskService,
};
use serde_json::json;

struct Stack {
    db: SqliteDatabase,
    contexts: Arc<ContextService>,
    tasks: Arc<TaskService>,
    subtasks: Arc<SubtaskService>,
    dependencies: Arc<DependencyService>,
}

async fn stack() -> Stack {
    let db = SqliteDatabase::in_memory().await.unwrap();

    let project_repo = Arc::new(db.projects());
    let branch_repo = Arc::new(db.branches());
    let task_repo = Arc::new(db.tasks());
    let subtask_repo = Arc::new(db.subtasks());
    let context_repo = Arc::new(db.contexts());
    let delegation_repo = Arc::new(db.delegations());

    let cache = Arc::new(ContextCache::new(100, None));
    let engine = Arc::new(DelegationEngine::new(
        delegation_repo,
        context_repo.clone(),
        cache.clone(),
    ));
    let contexts = Arc::new(ContextService::new(
        context_repo,
        project_repo.clone(),
        branch_repo.clone(),
        task_repo.clone(),
        cache,
        engine,
    ));
    contexts.bootstrap_global().await.unwrap();

    let sync = Arc::new(ContextSyncService::new(
        contexts.clone(),
        subtask_repo.clone(),
    ));
    let dependencies = Arc::new(DependencyService::new(
        task_repo.clone(),
        branch_repo.clone(),
    ));
    let tasks = Arc::new(TaskService::new(
        task_repo.clone(),
        subtask_repo.clone(),
        branch_repo.clone(),
        contexts.clone(),
        sync.clone(),
        dependencies.clone(),
    ));
    let subtasks = Arc::new(SubtaskService::new(subtask_repo, task_repo, sync));

    Stack {
        db,
        contexts,
        tasks,
        subtasks,
        dependencies,
    }
}

async fn seed_branch(stack: &Stack) -> (String, String) {
    let project = stack
        .db
        .projects()
        .create(
            NewProject {
                name: "Alpha".to_string(),
                description: String::new(),
                user_id: None,
            },
            "user-1",
        )
        .await
        .unwrap();
    let branch = stack
        .db
        .branches()
        .create(NewBranch {
            project_id: project.id.clone(),
            name: "feat/x".to_string(),
            description: String::new(),
            priority: None,
        })
        .await
        .unwrap();
    (project.id, branch.id)
}

#[tokio::test]
async fn four_tier_resolve_merges_root_to_leaf() {
    let stack = stack().await;
    let (project_id, branch_id) = seed_branch(&stack).await;
    let task = stack
        .tasks
        .create(NewTask::new(branch_id.clone(), "Impl auth"))
        .await
        .unwrap();

    stack
        .contexts
        .update(
            ContextLevel::Global,
            GLOBAL_SINGLETON_ID,
            UpdateContext {
                data: Some(json!({"rules": {"style": "black"}, "lists": ["g"]})),
                ..Default::default()
            },
            true,
        )
        .await
        .unwrap();
    stack
        .contexts
        .create(
            ContextLevel::Project,
            &project_id,
            json!({"rules": {"linter": "ruff"}, "lists": ["p"]}),
        )
        .await
        .unwrap();
    stack
        .contexts
        .create(ContextLevel::Branch, &branch_id, json!({"lists": ["b"]}))
        .await
        .unwrap();
    stack
        .contexts
        .create(
            ContextLevel::Task,
            &task.id,
            json!({"rules": {"style": "isort"}, "lists": ["t"]}),
        )
        .await
        .unwrap();

    let resolved = stack
        .contexts
        .resolve(ContextLevel::Task, &task.id, false, true)
        .await
        .unwrap();

    assert_eq!(
        resolved.data,
        json!({
            "rules": {"style": "isort", "linter": "ruff"},
            "lists": ["g", "p", "b", "t"],
        })
    );
    assert_eq!(
        resolved.inheritance_chain,
        vec![
            ContextLevel::Global,
            ContextLevel::Project,
            ContextLevel::Branch,
            ContextLevel::Task,
        ]
    );

    // Determinism: force-refreshed resolves return byte-equal data
    let again = stack
        .contexts
        .resolve(ContextLevel::Task, &task.id, true, true)
        .await
        .unwrap();
    assert_eq!(
        serde_json::to_string(&resolved.data).unwrap(),
        serde_json::to_string(&again.data).unwrap()
    );
}

#[tokio::test]
async fn resolve_without_project_context_is_missing_parent() {
    let stack = stack().await;
    let (_, branch_id) = seed_branch(&stack).await;
    let task = stack
        .tasks
        .create(NewTask::new(branch_id.clone(), "Orphan"))
        .await
        .unwrap();

    // Insert branch and task contexts directly, skipping the project level
    let now = chrono::Utc::now();
    let make = |level: ContextLevel, id: &str, parent: &str| ContextRecord {
        level,
        id: id.to_string(),
        parent_id: Some(parent.to_string()),
        data: json!({}),
        local_overrides: json!({}),
        delegation_triggers: json!({}),
        inheritance_disabled: false,
        version: 1,
        created_at: now,
        updated_at: now,
    };
    let context_repo = stack.db.contexts();
    use lattice_core::repository::ContextRepository;
    context_repo
        .insert(make(ContextLevel::Branch, &branch_id, "missing-project"))
        .await
        .unwrap();
    context_repo
        .insert(make(ContextLevel::Task, &task.id, &branch_id))
        .await
        .unwrap();

    let result = stack
        .contexts
        .resolve(ContextLevel::Task, &task.id, false, true)
        .await;
    assert!(matches!(result, Err(LatticeError::MissingParent(_))));
}

#[tokio::test]
async fn completion_gates_then_auto_context() {
    let stack = stack().await;
    let (_, branch_id) = seed_branch(&stack).await;
    let task = stack
        .tasks
        .create(NewTask::new(branch_id.clone(), "Impl auth"))
        .await
        .unwrap();
    let subtask = stack
        .subtasks
        .create(NewSubtask {
            task_id: task.id.clone(),
            title: "Write tests".to_string(),
            description: String::new(),
            priority: None,
            assignees: vec![],
        })
        .await
        .unwrap();

    // Gate: unfinished subtask blocks completion and is named
    let blocked = stack
        .tasks
        .complete(
            &task.id,
            CompleteTask {
                completion_summary: "done".to_string(),
                testing_notes: None,
                enforce_dependencies: true,
            },
        )
        .await;
    match blocked {
        Err(LatticeError::InvariantViolation { blocking_ids, .. }) => {
            assert_eq!(blocking_ids, vec![subtask.id.clone()]);
        }
        other => panic!("expected InvariantViolation, got {other:?}"),
    }

    stack
        .subtasks
        .complete(
            &task.id,
            &subtask.id,
            CompleteSubtask {
                completion_summary: "tests green".to_string(),
                impact_on_parent: None,
                insights_found: vec![],
                challenges_overcome: None,
            },
        )
        .await
        .unwrap();

    let outcome = stack
        .tasks
        .complete(
            &task.id,
            CompleteTask {
                completion_summary: "done".to_string(),
                testing_notes: None,
                enforce_dependencies: true,
            },
        )
        .await
        .unwrap();
    assert!(outcome.context_auto_created);
    assert_eq!(outcome.task.completion_summary, "done");

    // Branch counters reflect the completion
    let branch = stack.db.branches().get(&branch_id).await.unwrap().unwrap();
    assert_eq!(branch.task_count, 1);
    assert_eq!(branch.completed_task_count, 1);

    // The auto-created chain resolves
    let resolved = stack
        .contexts
        .resolve(ContextLevel::Task, &task.id, false, true)
        .await
        .unwrap();
    assert_eq!(resolved.data["completion_summary"], json!("done"));

    // Idempotent re-completion
    let again = stack
        .tasks
        .complete(
            &task.id,
            CompleteTask {
                completion_summary: "done".to_string(),
                testing_notes: None,
                enforce_dependencies: true,
            },
        )
        .await
        .unwrap();
    assert!(again.already_done);
}

#[tokio::test]
async fn delegation_promotes_into_resolved_data() {
    let stack = stack().await;
    let (project_id, branch_id) = seed_branch(&stack).await;
    let task = stack
        .tasks
        .create(NewTask::new(branch_id.clone(), "Impl auth"))
        .await
        .unwrap();

    stack
        .contexts
        .create(ContextLevel::Project, &project_id, json!({}))
        .await
        .unwrap();
    stack
        .contexts
        .create(ContextLevel::Branch, &branch_id, json!({}))
        .await
        .unwrap();
    stack
        .contexts
        .create(ContextLevel::Task, &task.id, json!({}))
        .await
        .unwrap();

    let project_before = stack
        .contexts
        .get(ContextLevel::Project, &project_id)
        .await
        .unwrap();

    let delegation = stack
        .contexts
        .delegate(
            ContextLevel::Task,
            &task.id,
            ContextLevel::Project,
            json!({"shared": {"pattern": "JWT"}}),
            "reusable".to_string(),
            true,
        )
        .await
        .unwrap();
    assert!(delegation.processed);
    assert_eq!(delegation.approved, Some(true));

    let project_after = stack
        .contexts
        .get(ContextLevel::Project, &project_id)
        .await
        .unwrap();
    assert_eq!(project_after.data["shared"]["pattern"], json!("JWT"));
    assert_eq!(project_after.version, project_before.version + 1);

    // The promoted data reaches task-level resolution
    let resolved = stack
        .contexts
        .resolve(ContextLevel::Task, &task.id, false, true)
        .await
        .unwrap();
    assert_eq!(resolved.data["shared"]["pattern"], json!("JWT"));
}

#[tokio::test]
async fn dependency_cycle_rejected_without_mutation() {
    let stack = stack().await;
    let (_, branch_id) = seed_branch(&stack).await;
    let t1 = stack
        .tasks
        .create(NewTask::new(branch_id.clone(), "one"))
        .await
        .unwrap();
    let t2 = stack
        .tasks
        .create(NewTask::new(branch_id.clone(), "two"))
        .await
        .unwrap();

    assert!(stack.dependencies.add(&t2.id, &t1.id).await.unwrap());
    let result = stack.dependencies.add(&t1.id, &t2.id).await;
    assert!(matches!(result, Err(LatticeError::DependencyCycle(_))));

    // Neither task gained an edge from the rejected call
    let t1_after = stack.tasks.get(&t1.id).await.unwrap();
    assert!(t1_after.dependencies.is_empty());
    let t2_after = stack.tasks.get(&t2.id).await.unwrap();
    assert_eq!(t2_after.dependencies, vec![t1.id.clone()]);
}

#[tokio::test]
async fn sequential_context_writes_both_land() {
    let stack = stack().await;
    let (project_id, _) = seed_branch(&stack).await;
    stack
        .contexts
        .create(ContextLevel::Project, &project_id, json!({"base": true}))
        .await
        .unwrap();
    let initial = stack
        .contexts
        .get(ContextLevel::Project, &project_id)
        .await
        .unwrap();

    let write = |data: serde_json::Value| {
        let contexts = stack.contexts.clone();
        let project_id = project_id.clone();
        async move {
            contexts
                .update(
                    ContextLevel::Project,
                    &project_id,
                    UpdateContext {
                        data: Some(data),
                        ..Default::default()
                    },
                    true,
                )
                .await
        }
    };

    let (first, second) = tokio::join!(
        write(json!({"a": 1, "both": "first"})),
        write(json!({"b": 2, "both": "second"}))
    );
    first.unwrap();
    second.unwrap();

    let after = stack
        .contexts
        .get(ContextLevel::Project, &project_id)
        .await
        .unwrap();
    assert_eq!(after.version, initial.version + 2);
    assert_eq!(after.data["a"], json!(1));
    assert_eq!(after.data["b"], json!(2));
    assert_eq!(after.data["base"], json!(true));
    assert!(after.data["both"] == json!("first") || after.data["both"] == json!("second"));
}

#[tokio::test]
async fn next_task_prefers_priority_with_satisfied_dependencies() {
    let stack = stack().await;
    let (_, branch_id) = seed_branch(&stack).await;

    let mut high = NewTask::new(branch_id.clone(), "T1");
    high.priority = Some(lattice_core::models::Priority::High);
    let t1 = stack.tasks.create(high).await.unwrap();

    let mut critical = NewTask::new(branch_id.clone(), "T2");
    critical.priority = Some(lattice_core::models::Priority::Critical);
    let t2 = stack.tasks.create(critical).await.unwrap();
    stack.dependencies.add(&t2.id, &t1.id).await.unwrap();

    let mut urgent = NewTask::new(branch_id.clone(), "T3");
    urgent.priority = Some(lattice_core::models::Priority::Urgent);
    let t3 = stack.tasks.create(urgent).await.unwrap();

    // T2 is blocked on T1, so the urgent task wins first
    let next = stack.tasks.next(&branch_id).await.unwrap().unwrap();
    assert_eq!(next.id, t3.id);

    stack
        .tasks
        .complete(
            &t1.id,
            CompleteTask {
                completion_summary: "done".to_string(),
                testing_notes: None,
                enforce_dependencies: true,
            },
        )
        .await
        .unwrap();

    // With T1 satisfied, critical outranks urgent
    let next = stack.tasks.next(&branch_id).await.unwrap().unwrap();
    assert_eq!(next.id, t2.id);
}

#[tokio::test]
async fn search_uses_token_and_semantics() {
    let stack = stack().await;
    let (_, branch_id) = seed_branch(&stack).await;

    let mut auth = NewTask::new(branch_id.clone(), "Implement auth flow");
    auth.description = "JWT tokens".to_string();
    stack.tasks.create(auth).await.unwrap();

    let mut ui = NewTask::new(branch_id.clone(), "Implement UI");
    ui.description = "buttons".to_string();
    stack.tasks.create(ui).await.unwrap();

    let hits = stack.tasks.search("implement auth", None).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].title, "Implement auth flow");

    // Empty query returns nothing, not everything
    assert!(stack.tasks.search("   ", None).await.unwrap().is_empty());
}

#[tokio::test]
async fn global_delegation_waits_for_review() {
    let stack = stack().await;
    let (project_id, branch_id) = seed_branch(&stack).await;
    let task = stack
        .tasks
        .create(NewTask::new(branch_id.clone(), "T"))
        .await
        .unwrap();
    for (level, id) in [
        (ContextLevel::Project, project_id.as_str()),
        (ContextLevel::Branch, branch_id.as_str()),
        (ContextLevel::Task, task.id.as_str()),
    ] {
        stack.contexts.create(level, id, json!({})).await.unwrap();
    }

    let queued = stack
        .contexts
        .delegate(
            ContextLevel::Task,
            &task.id,
            ContextLevel::Global,
            json!({"org_rule": "rotate keys"}),
            "org-wide".to_string(),
            true,
        )
        .await
        .unwrap();
    assert!(!queued.processed);

    // The global context is untouched until review approves the entry
    let global_before = stack
        .contexts
        .get(ContextLevel::Global, GLOBAL_SINGLETON_ID)
        .await
        .unwrap();
    assert!(global_before.data.get("org_rule").is_none());

    let approved = stack
        .contexts
        .delegation()
        .process(&queued.id, true, None)
        .await
        .unwrap();
    assert!(approved.processed);
    assert_eq!(approved.approved, Some(true));

    let global_after = stack
        .contexts
        .get(ContextLevel::Global, GLOBAL_SINGLETON_ID)
        .await
        .unwrap();
    assert_eq!(global_after.data["org_rule"], json!("rotate keys"));

    // Re-processing a settled entry conflicts
    let again = stack
        .contexts
        .delegation()
        .process(&queued.id, false, None)
        .await;
    assert!(matches!(again, Err(LatticeError::ConflictingState(_))));
}

#[tokio::test]
async fn flagged_subtask_insight_reaches_project_context() {
    let stack = stack().await;
    let (project_id, branch_id) = seed_branch(&stack).await;
    let task = stack
        .tasks
        .create(NewTask::new(branch_id.clone(), "T"))
        .await
        .unwrap();
    for (level, id) in [
        (ContextLevel::Project, project_id.as_str()),
        (ContextLevel::Branch, branch_id.as_str()),
        (ContextLevel::Task, task.id.as_str()),
    ] {
        stack.contexts.create(level, id, json!({})).await.unwrap();
    }

    let subtask = stack
        .subtasks
        .create(lattice_core::models::NewSubtask {
            task_id: task.id.clone(),
            title: "investigate".to_string(),
            description: String::new(),
            priority: None,
            assignees: vec![],
        })
        .await
        .unwrap();

    let mut flagged = lattice_core::models::Insight::new("JWT middleware pattern");
    flagged.auto_delegate = true;
    stack
        .subtasks
        .complete(
            &task.id,
            &subtask.id,
            CompleteSubtask {
                completion_summary: "found a reusable pattern".to_string(),
                impact_on_parent: None,
                insights_found: vec![flagged, Insight::new("local-only note")],
                challenges_overcome: None,
            },
        )
        .await
        .unwrap();

    let project = stack
        .contexts
        .get(ContextLevel::Project, &project_id)
        .await
        .unwrap();
    let promoted = project.data["delegated_insights"].as_array().unwrap();
    assert_eq!(promoted.len(), 1);
    assert_eq!(promoted[0]["content"], json!("JWT middleware pattern"));

    // The unflagged insight stays local to the subtask
    assert!(!project
        .data
        .to_string()
        .contains("local-only note"));

    // The parent context carries the subtask summary view
    let task_context = stack
        .contexts
        .get(ContextLevel::Task, &task.id)
        .await
        .unwrap();
    assert_eq!(
        task_context.data["subtasks_progress"]["completed"],
        json!(1)
    );
}
