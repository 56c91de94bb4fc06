//! Integration tests for structures
//!
//! These tests run whole structures end to end:
//! - workflow diamonds and concurrency
//! - branch decisions (valid, invalid)
//! - pipeline fail-fast
//! - graph errors raised before any task runs
//! - tool use through a structure, memory and event persistence

use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use weave_agent::structure::{Agent, Pipeline, StructureConfig, StructureStatus, Workflow};
use weave_agent::task::{Task, TaskContext, TaskId, TaskState, ToolkitTask};
use weave_agent::{RunEvent, StructureError};
use weave_core::memory::LocalFileMemoryDriver;
use weave_core::{
    Activity, Artifact, ConversationMemory, ScriptedPromptDriver, Settings, Tool, ToolRegistry,
};

// =============================================================================
// Helper Functions
// =============================================================================

type Journal = Arc<Mutex<Vec<String>>>;

/// Code task that sleeps, appends its id to the journal and returns its id.
fn journaled(id: &'static str, delay_ms: u64, journal: &Journal) -> Task {
    let journal = Arc::clone(journal);
    Task::code(id, move |_ctx: TaskContext| {
        let journal = Arc::clone(&journal);
        async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            journal.lock().unwrap().push(id.to_string());
            Ok(Artifact::text(id))
        }
    })
}

fn counter_tool(calls: &Arc<AtomicUsize>) -> ToolRegistry {
    let calls = Arc::clone(calls);
    let mut tools = ToolRegistry::new();
    tools
        .register(Tool::new("counter", "Counts calls").activity(Activity::new(
            "bump",
            "Increments the counter",
            json!({"type": "object"}),
            move |_| {
                let calls = Arc::clone(&calls);
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok(Artifact::text(n.to_string()))
                }
            },
        )))
        .unwrap();
    tools
}

fn settings(fail_fast: bool) -> Settings {
    let mut settings = Settings::default();
    settings.fail_fast = fail_fast;
    settings
}

// =============================================================================
// Workflow
// =============================================================================

#[tokio::test]
async fn test_diamond_joins_after_both_branches() {
    let journal: Journal = Arc::new(Mutex::new(Vec::new()));
    let mut workflow = Workflow::new(StructureConfig::new());
    workflow.add_task(journaled("a", 0, &journal)).unwrap();
    workflow
        .add_task(journaled("b", 30, &journal).with_parent("a"))
        .unwrap();
    workflow
        .add_task(journaled("c", 5, &journal).with_parent("a"))
        .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in_d = Arc::clone(&seen);
    workflow
        .add_task(
            Task::code("d", move |ctx: TaskContext| {
                let seen = Arc::clone(&seen_in_d);
                async move {
                    let parents: Vec<String> = ctx
                        .parent_outputs
                        .iter()
                        .map(|(id, out)| format!("{}={}", id, out))
                        .collect();
                    seen.lock().unwrap().extend(parents);
                    Ok(Artifact::text("joined"))
                }
            })
            .with_parent("b")
            .with_parent("c"),
        )
        .unwrap();

    let report = workflow.run(vec![]).await.unwrap();

    assert_eq!(report.status, StructureStatus::Finished);
    assert_eq!(report.output.unwrap().to_text(), "joined");
    assert_eq!(*seen.lock().unwrap(), vec!["b=b", "c=c"]);

    let journal = journal.lock().unwrap();
    assert_eq!(journal.first().map(String::as_str), Some("a"));
    assert_eq!(journal.len(), 3);
    assert!(workflow.tasks().iter().all(|t| t.state() == TaskState::Finished));
    assert!(!workflow.task("a").unwrap().is_skipped());
}

#[tokio::test]
async fn test_siblings_run_concurrently() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut workflow = Workflow::new(StructureConfig::new());

    for id in ["w1", "w2", "w3"] {
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        workflow
            .add_task(Task::code(id, move |_| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(Artifact::text("ok"))
                }
            }))
            .unwrap();
    }

    let report = workflow.run(vec![]).await.unwrap();
    assert_eq!(report.status, StructureStatus::Finished);
    assert!(peak.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn test_invalid_branch_leaves_children_pending() {
    let mut workflow = Workflow::new(StructureConfig::new().with_settings(settings(false)));
    workflow
        .add_task(Task::branch("router", |_| async { Ok(vec![TaskId::new("ghost")]) }))
        .unwrap();
    let journal: Journal = Arc::new(Mutex::new(Vec::new()));
    workflow
        .add_task(journaled("left", 0, &journal).with_parent("router"))
        .unwrap();
    workflow
        .add_task(journaled("right", 0, &journal).with_parent("router"))
        .unwrap();

    let report = workflow.run(vec![]).await.unwrap();

    let router = workflow.task("router").unwrap();
    assert_eq!(router.state(), TaskState::Error);
    let message = router.output().unwrap().to_text();
    assert!(message.contains("ghost"), "{}", message);

    assert_eq!(workflow.task("left").unwrap().state(), TaskState::Pending);
    assert_eq!(workflow.task("right").unwrap().state(), TaskState::Pending);
    assert_eq!(report.status, StructureStatus::Stuck);
    assert!(!workflow.is_finished());
    assert!(workflow.is_stuck());
    assert!(journal.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_branch_skips_unselected_subtree() {
    let journal: Journal = Arc::new(Mutex::new(Vec::new()));
    let mut workflow = Workflow::new(StructureConfig::new());
    workflow
        .add_task(Task::branch("router", |ctx: TaskContext| async move {
            assert_eq!(ctx.child_ids.len(), 2);
            Ok(vec![TaskId::new("yes")])
        }))
        .unwrap();
    workflow
        .add_task(journaled("yes", 0, &journal).with_parent("router"))
        .unwrap();
    workflow
        .add_task(journaled("no", 0, &journal).with_parent("router"))
        .unwrap();
    workflow
        .add_task(journaled("no_child", 0, &journal).with_parent("no"))
        .unwrap();

    let report = workflow.run(vec![]).await.unwrap();

    assert_eq!(report.status, StructureStatus::Finished);
    assert_eq!(*journal.lock().unwrap(), vec!["yes"]);
    assert_eq!(workflow.task("no").unwrap().state(), TaskState::Skipped);
    assert_eq!(workflow.task("no_child").unwrap().state(), TaskState::Skipped);
    assert!(workflow.task("no").unwrap().output().is_none());

    let skipped = workflow
        .events()
        .replay()
        .await
        .into_iter()
        .filter(|e| matches!(e, RunEvent::TaskSkipped { .. }))
        .count();
    assert_eq!(skipped, 2);
}

// =============================================================================
// Pipeline
// =============================================================================

#[tokio::test]
async fn test_pipeline_fail_fast_keeps_second_task_pending() {
    let journal: Journal = Arc::new(Mutex::new(Vec::new()));
    let mut pipeline = Pipeline::new(StructureConfig::new().with_settings(settings(true)));
    pipeline
        .add_task(Task::code("first", |_| async { Ok(Artifact::error("upstream failed")) }))
        .unwrap();
    pipeline.add_task(journaled("second", 0, &journal)).unwrap();

    let report = pipeline.run(vec![]).await.unwrap();

    assert_eq!(report.status, StructureStatus::Halted);
    assert!(report.output.is_none());
    assert!(pipeline.output().is_none());
    assert_eq!(pipeline.task("first").unwrap().state(), TaskState::Error);
    assert_eq!(pipeline.task("second").unwrap().state(), TaskState::Pending);
    assert!(journal.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_rerun_resets_tasks() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let mut pipeline = Pipeline::new(StructureConfig::new());
    pipeline
        .add_task(Task::code("only", move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok(Artifact::text(format!("run {}", n))) }
        }))
        .unwrap();

    pipeline.run(vec![]).await.unwrap();
    let report = pipeline.run(vec![]).await.unwrap();
    assert_eq!(report.output.unwrap().to_text(), "run 2");
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

// =============================================================================
// Graph errors
// =============================================================================

#[tokio::test]
async fn test_missing_node_fails_before_any_task() {
    let journal: Journal = Arc::new(Mutex::new(Vec::new()));
    let mut workflow = Workflow::new(StructureConfig::new());
    workflow.add_task(journaled("a", 0, &journal)).unwrap();
    workflow
        .add_task(journaled("b", 0, &journal).with_parent("nowhere"))
        .unwrap();

    let err = workflow.run(vec![]).await.unwrap_err();
    match err {
        StructureError::MissingNode { task, missing } => {
            assert_eq!(task.as_str(), "b");
            assert_eq!(missing.as_str(), "nowhere");
        }
        other => panic!("expected MissingNode, got {}", other),
    }
    assert!(journal.lock().unwrap().is_empty());
    assert!(workflow.events().is_empty().await);
}

#[tokio::test]
async fn test_cycle_fails_before_any_task() {
    let journal: Journal = Arc::new(Mutex::new(Vec::new()));
    let mut workflow = Workflow::new(StructureConfig::new());
    workflow
        .add_task(journaled("a", 0, &journal).with_parent("c"))
        .unwrap();
    workflow
        .add_task(journaled("b", 0, &journal).with_parent("a"))
        .unwrap();
    workflow
        .add_task(journaled("c", 0, &journal).with_parent("b"))
        .unwrap();

    assert!(matches!(
        workflow.run(vec![]).await,
        Err(StructureError::Cycle(_))
    ));
    assert!(journal.lock().unwrap().is_empty());
    assert!(workflow.tasks().iter().all(|t| t.output().is_none()));
}

// =============================================================================
// Tools, memory and events
// =============================================================================

#[tokio::test]
async fn test_subtask_bound_through_structure() {
    let calls = Arc::new(AtomicUsize::new(0));
    let driver = Arc::new(ScriptedPromptDriver::new(Vec::<String>::new()).with_fallback(
        r#"Thought: once more
Actions: [{"name": "counter", "path": "bump", "input": {}}]"#,
    ));
    let mut agent = Agent::new(StructureConfig::new().with_prompt_driver(driver.clone()));
    agent
        .add_task(Task::toolkit(
            "loop",
            ToolkitTask::new(counter_tool(&calls)).with_max_subtasks(3),
        ))
        .unwrap();

    let report = agent.run(vec!["go".into()]).await.unwrap();

    assert_eq!(report.status, StructureStatus::Halted);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(driver.calls(), 4);
    let task = agent.task("loop").unwrap();
    assert_eq!(task.state(), TaskState::Error);
    assert_eq!(
        task.output().unwrap().to_text(),
        "Exceeded tool limit of 3 subtasks per task"
    );
}

#[tokio::test]
async fn test_memory_persists_across_structures() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("memory.json");

    let mut memory_settings = Settings::default();
    memory_settings.memory.max_runs = Some(2);

    for (question, answer) in [("q1", "a1"), ("q2", "a2"), ("q3", "a3")] {
        let driver = Arc::new(ScriptedPromptDriver::new([answer]));
        let config = StructureConfig::new()
            .with_settings(memory_settings.clone())
            .with_prompt_driver(driver)
            .with_memory_driver(Arc::new(LocalFileMemoryDriver::new(&path)), true)
            .await
            .unwrap();
        let mut agent = Agent::new(config).with_task(Task::prompt("chat")).unwrap();
        agent.run(vec![question.into()]).await.unwrap();
    }

    let reloaded = ConversationMemory::new()
        .load_from(Arc::new(LocalFileMemoryDriver::new(&path)), true)
        .await
        .unwrap();
    let outputs: Vec<String> = reloaded.runs().iter().map(|r| r.output.to_text()).collect();
    assert_eq!(outputs, vec!["a2", "a3"]);
}

#[tokio::test]
async fn test_events_persisted_per_run() {
    let temp = TempDir::new().unwrap();
    let mut settings = Settings::default();
    settings.events_dir = Some(temp.path().join("events"));

    let mut pipeline = Pipeline::new(StructureConfig::new().with_settings(settings));
    pipeline
        .add_task(Task::code("a", |_| async { Ok(Artifact::text("done")) }))
        .unwrap();

    let first = pipeline.run(vec![]).await.unwrap();
    let second = pipeline.run(vec![]).await.unwrap();
    assert_ne!(first.run_id, second.run_id);

    let path = temp.path().join("events").join(format!("{}.json", second.run_id));
    let content = std::fs::read_to_string(path).unwrap();
    let events: Vec<RunEvent> = serde_json::from_str(&content).unwrap();
    let names: Vec<&str> = events.iter().map(RunEvent::name).collect();
    assert_eq!(names.first(), Some(&"StructureStarted"));
    assert!(names.contains(&"TaskStarted"));
    assert!(names.contains(&"TaskFinished"));
    assert!(names.contains(&"RunRecorded"));
    assert_eq!(names.last(), Some(&"StructureFinished"));
}

#[tokio::test]
async fn test_structure_from_yaml_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("structure.yaml");
    std::fs::write(
        &path,
        r#"
kind: workflow
settings:
  max_concurrency: 2
tasks:
  - id: left
    type: prompt
    template: "left {{ args[0] }}"
  - id: right
    type: prompt
    template: "right {{ args[0] }}"
  - id: merge
    type: prompt
    parents: [left, right]
    template: "{{ parent_outputs.left }} & {{ parent_outputs.right }}"
"#,
    )
    .unwrap();

    let driver = Arc::new(weave_core::EchoPromptDriver::new());
    let mut built = weave_agent::StructureDefinition::from_yaml_file(&path)
        .unwrap()
        .build(driver, &ToolRegistry::new())
        .unwrap();

    let report = built.structure_mut().run(vec!["x".into()]).await.unwrap();
    assert_eq!(report.status, StructureStatus::Finished);
    assert_eq!(report.output.unwrap().to_text(), "left x & right x");
}
