//! End-to-end tests for the conductor: submission through execution,
//! lifecycle events through the gate, and configuration from disk.

mod common;

use common::RecordingHandler;
use conductor_core::constants::events;
use conductor_core::events::RecordingPolicyHandler;
use conductor_core::{
    CallerContext, Conductor, ConductorConfig, ConductorError, ConfigManager, EventCallback,
    ExecutionOutcome, LocalEventBus, Payload, PipelineRequest, Priority,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_drain_runs_requests_in_priority_order() {
    let conductor = Conductor::new(ConductorConfig::default()).unwrap();
    conductor.submit(PipelineRequest::new("A", "edit", Priority::Normal)).unwrap();
    conductor.submit(PipelineRequest::new("B", "edit", Priority::Chained)).unwrap();
    conductor.submit(PipelineRequest::new("C", "edit", Priority::High)).unwrap();
    conductor.submit(PipelineRequest::new("D", "edit", Priority::Normal)).unwrap();

    let handler = RecordingHandler::default();
    let outcomes = conductor.drain(&handler).await.unwrap();

    assert_eq!(handler.executed(), vec!["C", "B", "A", "D"]);
    assert_eq!(outcomes.len(), 4);
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, ExecutionOutcome::Completed { .. })));

    let status = conductor.status();
    assert_eq!(status.pending, 0);
    assert_eq!(status.completed, 4);
    assert_eq!(conductor.statistics().total_executed, 4);
}

#[tokio::test]
async fn test_failures_are_recorded_and_drain_continues() {
    let conductor = Conductor::new(ConductorConfig::default()).unwrap();
    conductor.submit(PipelineRequest::new("r1", "broken", Priority::Normal)).unwrap();
    conductor.submit(PipelineRequest::new("r2", "edit", Priority::Normal)).unwrap();

    let handler = RecordingHandler::default();
    let outcomes = conductor.drain(&handler).await.unwrap();

    assert!(matches!(outcomes[0], ExecutionOutcome::Failed { .. }));
    assert!(matches!(outcomes[1], ExecutionOutcome::Completed { .. }));

    let stats = conductor.statistics();
    assert_eq!(stats.total_errors, 1);
    assert_eq!(stats.total_executed, 1);
    assert_eq!(stats.success_rate, 50.0);
    assert!(conductor
        .warnings()
        .iter()
        .any(|warning| warning.contains("success rate")));
}

#[tokio::test]
async fn test_lifecycle_events_reach_gate_subscribers_and_broadcast() {
    let conductor = Conductor::new(ConductorConfig::default()).unwrap();
    let mut lifecycle = conductor.lifecycle_events();

    let completed = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&completed);
    conductor
        .gate()
        .subscribe(
            events::PIPELINE_COMPLETED,
            EventCallback::new(move |_, data| {
                sink.lock().push(data["request_id"].as_str().unwrap_or_default().to_string());
                Ok(())
            }),
            &CallerContext::ui_component("StatusBar"),
        )
        .unwrap();

    conductor.submit(PipelineRequest::new("r1", "edit", Priority::Normal)).unwrap();
    conductor.execute_next(&RecordingHandler::default()).await.unwrap();

    assert_eq!(*completed.lock(), vec!["r1".to_string()]);

    let names: Vec<String> = std::iter::from_fn(|| lifecycle.try_recv().ok())
        .map(|event| event.name)
        .collect();
    assert_eq!(
        names,
        vec![
            events::PIPELINE_QUEUED,
            events::PIPELINE_STARTED,
            events::PIPELINE_COMPLETED
        ]
    );
}

#[tokio::test]
async fn test_failing_raw_subscriber_does_not_fail_execution() {
    let conductor = Conductor::new(ConductorConfig::default()).unwrap();
    conductor
        .gate()
        .subscribe(
            events::PIPELINE_STARTED,
            EventCallback::new(|_, _| Err("toolbar crashed".into())),
            &CallerContext::ui_component("Toolbar"),
        )
        .unwrap();

    let managed_calls = Arc::new(AtomicUsize::new(0));
    let calls = Arc::clone(&managed_calls);
    conductor
        .gate()
        .create_managed_subscription(
            events::PIPELINE_COMPLETED,
            EventCallback::new(move |_, _| {
                calls.fetch_add(1, Ordering::Relaxed);
                panic!("inspector panicked")
            }),
            "inspector",
            &CallerContext::mounting_plugin("inspector"),
        )
        .unwrap();

    conductor.submit(PipelineRequest::new("r1", "edit", Priority::Normal)).unwrap();
    let outcome = conductor
        .execute_next(&RecordingHandler::default())
        .await
        .unwrap()
        .unwrap();

    assert!(matches!(outcome, ExecutionOutcome::Completed { .. }));
    assert_eq!(managed_calls.load(Ordering::Relaxed), 1);
    assert_eq!(conductor.gate().stats().managed_failures, 1);
}

#[test]
fn test_strict_gate_rejects_plugin_outside_mount_phase() {
    let policy = Arc::new(RecordingPolicyHandler::new(true));
    let conductor = Conductor::builder()
        .transport(Arc::new(LocalEventBus::new()))
        .policy(policy.clone())
        .build()
        .unwrap();

    let result = conductor.gate().subscribe(
        events::PIPELINE_QUEUED,
        EventCallback::new(|_, _| Ok(())),
        &CallerContext::plugin("late-plugin"),
    );

    assert!(matches!(result, Err(ConductorError::PolicyViolation { .. })));
    assert_eq!(policy.violation_count(), 1);
    assert_eq!(conductor.gate().transport_info().total_subscribers, 0);
}

#[tokio::test]
async fn test_callbacks_survive_a_plain_data_hop() {
    let conductor = Conductor::new(ConductorConfig::default()).unwrap();
    let mut payload = Payload::object([
        ("tool", Payload::from("brush")),
        (
            "handlers",
            Payload::array([Payload::callback(|arg| Ok(arg.clone()))]),
        ),
    ]);

    let (preserved, wire) = conductor.encode_payload(&mut payload).unwrap();
    assert_eq!(preserved.count, 1);
    assert!(conductor.callbacks().has_entry(&preserved.correlation_id));

    let (received, restored) = conductor.decode_payload(&wire).unwrap();
    assert_eq!(restored, 1);
    let callback = received
        .get("handlers")
        .and_then(|handlers| handlers.get_index(0))
        .and_then(Payload::as_callback)
        .unwrap();
    assert_eq!(callback.call(&serde_json::json!(3)).unwrap(), serde_json::json!(3));

    assert!(conductor.callbacks().cleanup(&preserved.correlation_id));
    let (_, restored_again) = conductor.decode_payload(&wire).unwrap();
    assert_eq!(restored_again, 0);
}

#[tokio::test]
async fn test_conductor_from_config_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("conductor.toml"),
        r#"
[ledger]
strategy = "queue"

[queue.priority_overrides]
AutoSave = "high"
"#,
    )
    .unwrap();
    std::fs::write(
        dir.path().join("conductor.test.toml"),
        "[gate]\nstrict_mode = true\n",
    )
    .unwrap();

    let manager =
        ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
            .unwrap();
    let conductor = Conductor::from_config_manager(&manager).unwrap();
    assert!(conductor.gate().strict_mode());

    conductor.submit(PipelineRequest::new("r1", "edit", Priority::Normal)).unwrap();
    conductor.submit(PipelineRequest::new("r2", "AutoSave", Priority::Normal)).unwrap();

    let handler = RecordingHandler::default();
    conductor.drain(&handler).await.unwrap();
    assert_eq!(handler.executed(), vec!["r2", "r1"]);
}

#[tokio::test]
async fn test_gap_monitor_runs_in_background() {
    let mut config = ConductorConfig::default();
    config.monitor.sample_interval_ms = 10;
    let conductor = Conductor::new(config).unwrap();

    let handle = conductor.start_monitor();
    tokio::time::sleep(Duration::from_millis(60)).await;
    handle.shutdown().await;

    assert!(conductor.gap_report().samples >= 1);
}

#[tokio::test]
async fn test_drain_runs_past_a_blocked_high_priority_request() {
    let mut config = ConductorConfig::default();
    config.ledger.strategy = "queue".to_string();
    let conductor = Conductor::new(config).unwrap();
    conductor.acquire_ownership("selection", "canvas", "canvas#1", "host-drag");

    conductor
        .submit(
            PipelineRequest::new("H", "resize", Priority::High)
                .with_instance("canvas#2")
                .with_resources(["selection"]),
        )
        .unwrap();
    conductor.submit(PipelineRequest::new("N", "autosave", Priority::Normal)).unwrap();

    let handler = RecordingHandler::default();
    let outcomes = conductor.drain(&handler).await.unwrap();

    assert_eq!(handler.executed(), vec!["N"]);
    assert!(outcomes
        .iter()
        .any(|o| matches!(o, ExecutionOutcome::Completed { request_id, .. } if request_id == "N")));
    assert!(matches!(outcomes.last(), Some(ExecutionOutcome::Requeued { .. })));
    assert_eq!(conductor.status().pending, 1);

    // Once the host lets go, the blocked request runs
    assert!(conductor.release_ownership("selection", "host-drag"));
    conductor.drain(&handler).await.unwrap();
    assert_eq!(handler.executed(), vec!["N", "H"]);
    assert_eq!(conductor.status().pending, 0);
}

#[tokio::test]
async fn test_host_claims_drive_arbitration() {
    let mut config = ConductorConfig::default();
    config.ledger.strategy = "reject".to_string();
    let conductor = Conductor::new(config).unwrap();
    conductor.acquire_ownership("doc", "editor", "editor#1", "host-save");
    assert_eq!(conductor.resources_owned_by("host-save"), vec!["doc"]);

    let request = PipelineRequest::new("r1", "format", Priority::High)
        .with_group("editor")
        .with_instance("editor#2")
        .with_resources(["doc"]);
    let check = conductor.check_conflict(&request, "doc");
    assert!(check.has_conflict);
    conductor.submit(request).unwrap();

    let outcome = conductor
        .execute_next(&RecordingHandler::default())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Rejected { ref resource_id, .. } if resource_id == "doc"));

    let stats = conductor.conflict_stats();
    assert_eq!(stats.checks, 1);
    assert_eq!(stats.conflicts, 1);
    assert_eq!(stats.rejections, 1);

    // A stale release from another execution leaves the owner in place
    assert!(!conductor.release_ownership("doc", "someone-else"));
    assert_eq!(conductor.owner_of("doc").unwrap().execution_id, "host-save");
}
