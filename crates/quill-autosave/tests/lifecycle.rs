//! Forced saves, cancellation and teardown
//!
//! Covers `save_now`, `save_all`, `cancel_pending`, `remove_key`,
//! `shutdown`, the persist watchdog and sink panics.

use pretty_assertions::assert_eq;
use quill_autosave::{
    sink_fn, Autosave, AutosaveError, SaveEvent, SaveKey, SaveStatus, SinkError, SubmitOptions,
};
use quill_test_utils::{advance_ms, drain_events, test_config, ScriptedSink, Step};
use std::time::Duration;
use tokio::time::Instant;

fn immediate() -> SubmitOptions {
    SubmitOptions::new().with_delay(Duration::ZERO)
}

/// save_now skips the quiet period and the abandoned timer never fires
#[tokio::test(start_paused = true)]
async fn test_save_now_flushes_debounced_payload() {
    let sink = ScriptedSink::<String>::new();
    let autosave = Autosave::new(test_config(), sink.clone());

    autosave.submit_default("outline", "v1".into()).unwrap();
    autosave.save_now("outline").await.unwrap();

    let calls = sink.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].started_ms, 0);
    assert!(!autosave.status("outline").debounce_pending);

    advance_ms(2000).await;
    assert_eq!(sink.call_count(), 1);
}

/// save_now waits for an execution already in flight
#[tokio::test(start_paused = true)]
async fn test_save_now_waits_for_in_flight_save() {
    let sink = ScriptedSink::<String>::with_latency(Duration::from_millis(500));
    let autosave = Autosave::new(test_config(), sink.clone());

    autosave.submit("outline", "v1".into(), immediate()).unwrap();
    advance_ms(10).await;
    assert!(autosave.status("outline").is_saving);

    let began = Instant::now();
    autosave.save_now("outline").await.unwrap();
    assert!(began.elapsed() >= Duration::from_millis(450));
    assert_eq!(sink.call_count(), 1);
}

/// A failing authoritative save surfaces to the caller
#[tokio::test(start_paused = true)]
async fn test_save_now_reports_sink_failure() {
    let sink = ScriptedSink::<String>::with_behavior(|_, _| {
        Step::fail_after(Duration::from_millis(20), "disk full")
    });
    let autosave = Autosave::new(test_config(), sink);

    autosave.submit_default("outline", "v1".into()).unwrap();
    let err = autosave.save_now("outline").await.unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(err.key().map(SaveKey::as_str), Some("outline"));
    match err {
        AutosaveError::Persist { message, .. } => assert!(message.contains("disk full")),
        other => panic!("unexpected error: {other}"),
    }
}

/// A flushed request that loses to a queued higher-priority one is discarded
#[tokio::test(start_paused = true)]
async fn test_save_now_reports_discarded_request() {
    let sink = ScriptedSink::<String>::with_latency(Duration::from_millis(500));
    let autosave = Autosave::new(test_config(), sink.clone());

    autosave.submit("outline", "first".into(), immediate()).unwrap();
    advance_ms(10).await;
    autosave
        .submit("outline", "forced".into(), immediate().with_priority(5))
        .unwrap();
    advance_ms(10).await;
    autosave.submit_default("outline", "typed".into()).unwrap();

    let err = autosave.save_now("outline").await.unwrap_err();
    assert!(matches!(err, AutosaveError::Discarded { .. }));
    assert!(!err.is_retryable());
    assert_eq!(
        sink.payloads_for("outline"),
        vec!["first".to_string(), "forced".to_string()]
    );
}

/// A waiter learns that its key was torn down
#[tokio::test(start_paused = true)]
async fn test_save_now_reports_removed_key() {
    let sink = ScriptedSink::<String>::with_latency(Duration::from_millis(1000));
    let autosave = Autosave::new(test_config(), sink);

    autosave.submit("outline", "v1".into(), immediate()).unwrap();
    advance_ms(10).await;

    let waiter = {
        let autosave = autosave.clone();
        tokio::spawn(async move { autosave.save_now("outline").await })
    };
    advance_ms(10).await;
    assert!(autosave.remove_key("outline").unwrap());

    let result = waiter.await.unwrap();
    assert!(matches!(result, Err(AutosaveError::KeyRemoved { .. })));
}

/// save_all drives every key and surfaces the first failure
#[tokio::test(start_paused = true)]
async fn test_save_all_covers_every_pending_key() {
    let sink = ScriptedSink::<String>::with_behavior(|key, _| {
        if key.as_str() == "broken" {
            Step::fail_after(Duration::from_millis(10), "read-only")
        } else {
            Step::ok_after(Duration::from_millis(10))
        }
    });
    let autosave = Autosave::new(test_config(), sink.clone());

    for name in ["outline", "characters", "beats"] {
        autosave.submit_default(name, format!("{name}-text")).unwrap();
    }
    autosave.save_all().await.unwrap();
    assert_eq!(sink.call_count(), 3);
    assert!(autosave.pending_keys().is_empty());

    autosave.submit_default("outline", "more".into()).unwrap();
    autosave.submit_default("broken", "text".into()).unwrap();
    let err = autosave.save_all().await.unwrap_err();
    assert!(matches!(err, AutosaveError::Persist { ref key, .. } if key.as_str() == "broken"));
    assert!(autosave.status("outline").last_outcome.unwrap().success);
}

/// Cancelling with nothing pending changes nothing
#[tokio::test(start_paused = true)]
async fn test_cancel_without_pending_is_noop() {
    let sink = ScriptedSink::<String>::new();
    let autosave = Autosave::new(test_config(), sink.clone());
    let mut events = autosave.events();

    autosave.cancel_pending("outline").unwrap();

    assert!(drain_events(&mut events).is_empty());
    assert_eq!(autosave.stats().cancellations, 0);
    assert_eq!(autosave.status("outline"), SaveStatus::default());
}

/// A debounced payload dropped by cancel is never persisted
#[tokio::test(start_paused = true)]
async fn test_cancel_drops_debounced_payload() {
    let sink = ScriptedSink::<String>::new();
    let autosave = Autosave::new(test_config(), sink.clone());
    let mut events = autosave.events();

    autosave.submit_default("outline", "v1".into()).unwrap();
    autosave.cancel_pending("outline").unwrap();
    advance_ms(5000).await;

    assert_eq!(sink.call_count(), 0);
    assert!(!autosave.status("outline").debounce_pending);
    assert!(drain_events(&mut events)
        .iter()
        .any(|e| matches!(e, SaveEvent::Cancelled { dropped: 0, .. })));
    assert_eq!(autosave.stats().cancellations, 1);
}

/// Cancel leaves the in-flight save alone but drops what is queued behind it
#[tokio::test(start_paused = true)]
async fn test_cancel_keeps_in_flight_save() {
    let sink = ScriptedSink::<String>::with_latency(Duration::from_millis(500));
    let autosave = Autosave::new(test_config(), sink.clone());

    autosave.submit("outline", "v1".into(), immediate()).unwrap();
    advance_ms(10).await;
    autosave.submit("outline", "v2".into(), immediate()).unwrap();
    advance_ms(10).await;
    assert_eq!(autosave.status("outline").queued_count, 1);

    autosave.cancel_pending("outline").unwrap();
    assert_eq!(autosave.status("outline").queued_count, 0);
    assert!(autosave.status("outline").is_saving);

    advance_ms(1000).await;
    assert_eq!(sink.payloads_for("outline"), vec!["v1".to_string()]);
    let status = autosave.status("outline");
    assert!(status.is_idle());
    assert!(status.last_outcome.unwrap().success);
}

/// An execution that settles after its key was removed leaves no trace
#[tokio::test(start_paused = true)]
async fn test_removed_key_drops_late_outcome() {
    let sink = ScriptedSink::<String>::with_latency(Duration::from_millis(500));
    let autosave = Autosave::new(test_config(), sink.clone());

    autosave.submit("outline", "v1".into(), immediate()).unwrap();
    advance_ms(10).await;
    autosave.remove_key("outline").unwrap();
    advance_ms(1000).await;

    assert_eq!(sink.call_count(), 1);
    assert_eq!(autosave.status("outline"), SaveStatus::default());
}

/// A key recreated after removal never sees the old execution's outcome
#[tokio::test(start_paused = true)]
async fn test_recreated_key_ignores_removed_execution() {
    let sink = ScriptedSink::<String>::with_latency(Duration::from_millis(500));
    let autosave = Autosave::new(test_config(), sink.clone());

    autosave.submit("outline", "old".into(), immediate()).unwrap();
    advance_ms(10).await;
    autosave.remove_key("outline").unwrap();
    autosave.submit_default("outline", "new".into()).unwrap();

    let status = autosave.status("outline");
    assert!(!status.is_saving);
    assert!(status.debounce_pending);

    advance_ms(600).await;
    let status = autosave.status("outline");
    assert_eq!(status.last_outcome, None);
    assert!(!status.is_saving);
    assert_eq!(sink.payloads_for("outline"), vec!["old".to_string()]);

    let flushed_at = Instant::now();
    autosave.save_now("outline").await.unwrap();
    let outcome = autosave.status("outline").last_outcome.unwrap();
    assert!(outcome.success);
    assert!(outcome.submitted_at.0 >= 610);
    assert!(Instant::now() - flushed_at >= Duration::from_millis(500));
    assert_eq!(
        sink.payloads_for("outline"),
        vec!["old".to_string(), "new".to_string()]
    );
}

/// Work queued on a recreated key waits for the removed execution
#[tokio::test(start_paused = true)]
async fn test_recreated_key_queues_behind_removed_execution() {
    let sink = ScriptedSink::<String>::with_latency(Duration::from_millis(500));
    let autosave = Autosave::new(test_config(), sink.clone());

    autosave.submit("outline", "old".into(), immediate()).unwrap();
    advance_ms(10).await;
    autosave.remove_key("outline").unwrap();
    autosave.submit("outline", "new".into(), immediate()).unwrap();
    advance_ms(10).await;

    let status = autosave.status("outline");
    assert!(!status.is_saving);
    assert_eq!(status.queued_count, 1);

    autosave.save_now("outline").await.unwrap();
    let outcome = autosave.status("outline").last_outcome.unwrap();
    assert!(outcome.success);
    assert!((10..=11).contains(&outcome.submitted_at.0));
    assert!((1000..=1001).contains(&outcome.completed_at.0));
    assert_eq!(sink.max_concurrent_for("outline"), 1);
    assert_eq!(
        sink.payloads_for("outline"),
        vec!["old".to_string(), "new".to_string()]
    );
}

/// Shutdown rejects new work, drops queued work, lets in-flight finish
#[tokio::test(start_paused = true)]
async fn test_shutdown_drains_only_in_flight() {
    let sink = ScriptedSink::<String>::with_latency(Duration::from_millis(500));
    let autosave = Autosave::new(test_config(), sink.clone());

    autosave.submit("outline", "v1".into(), immediate()).unwrap();
    advance_ms(10).await;
    autosave.submit("outline", "v2".into(), immediate()).unwrap();
    autosave.submit_default("beats", "b".into()).unwrap();
    advance_ms(10).await;

    autosave.shutdown();
    autosave.shutdown();
    assert!(matches!(
        autosave.submit_default("outline", "v3".into()),
        Err(AutosaveError::ShutDown)
    ));

    advance_ms(3000).await;
    assert_eq!(sink.payloads_for("outline"), vec!["v1".to_string()]);
    assert!(sink.payloads_for("beats").is_empty());
    assert!(autosave.status("outline").last_outcome.unwrap().success);
}

/// The watchdog turns a hung sink into a failed outcome
#[tokio::test(start_paused = true)]
async fn test_watchdog_fails_hung_sink() {
    let sink = ScriptedSink::<String>::with_latency(Duration::from_secs(60));
    let config = test_config().with_persist_timeout(Duration::from_millis(200));
    let autosave = Autosave::new(config, sink);

    autosave.submit_default("outline", "v1".into()).unwrap();
    let began = Instant::now();
    let err = autosave.save_now("outline").await.unwrap_err();

    assert!(began.elapsed() < Duration::from_secs(1));
    match err {
        AutosaveError::Persist { message, .. } => assert!(message.contains("timed out")),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!autosave.status("outline").is_saving);
}

/// A panicking sink is reported as a failure and the key keeps working
#[tokio::test(start_paused = true)]
async fn test_panicking_sink_does_not_wedge_key() {
    let sink = sink_fn(|_key: SaveKey, payload: String| async move {
        if payload == "boom" {
            panic!("sink exploded");
        }
        Ok::<(), SinkError>(())
    });
    let autosave = Autosave::new(test_config(), sink);

    autosave.submit_default("outline", "boom".into()).unwrap();
    assert!(matches!(
        autosave.save_now("outline").await,
        Err(AutosaveError::Persist { .. })
    ));

    autosave.submit_default("outline", "fine".into()).unwrap();
    autosave.save_now("outline").await.unwrap();
    assert!(autosave.status("outline").last_outcome.unwrap().success);
}

/// A quiet save emits the full lifecycle in order
#[tokio::test(start_paused = true)]
async fn test_events_follow_request_lifecycle() {
    let sink = ScriptedSink::<String>::new();
    let autosave = Autosave::new(test_config(), sink);
    let mut events = autosave.events();

    autosave
        .submit("outline", "v1".into(), SubmitOptions::new().with_delay(Duration::from_millis(50)))
        .unwrap();
    advance_ms(100).await;

    let events = drain_events(&mut events);
    assert_eq!(events.len(), 4);
    assert!(matches!(events[0], SaveEvent::Scheduled { delay_ms: 50, .. }));
    assert!(matches!(events[1], SaveEvent::Enqueued { priority: 0, .. }));
    assert!(matches!(events[2], SaveEvent::Started { .. }));
    assert!(matches!(events[3], SaveEvent::Completed { success: true, .. }));
    assert!(events.iter().all(|e| e.key().as_str() == "outline"));

    let json = serde_json::to_value(&events[3]).unwrap();
    assert_eq!(json["event"], "completed");
}

/// Status subscribers are woken instead of polling
#[tokio::test(start_paused = true)]
async fn test_subscriber_observes_saving_then_outcome() {
    let sink = ScriptedSink::<String>::with_latency(Duration::from_millis(100));
    let autosave = Autosave::new(test_config(), sink);
    let mut rx = autosave.subscribe("outline").unwrap();

    autosave.submit("outline", "v1".into(), immediate()).unwrap();
    rx.wait_for(|status| status.is_saving).await.unwrap();
    let status = rx.wait_for(|status| status.last_outcome.is_some()).await.unwrap().clone();

    assert!(!status.is_saving);
    assert!(status.last_outcome.unwrap().success);
}

/// Per-key delays from configuration apply without explicit options
#[tokio::test(start_paused = true)]
async fn test_configured_key_delay_applies() {
    let sink = ScriptedSink::<String>::new();
    let config = test_config().with_key_delay("beats", Duration::from_millis(250));
    let autosave = Autosave::new(config, sink.clone());

    autosave.submit_default("beats", "b".into()).unwrap();
    autosave.submit_default("outline", "o".into()).unwrap();
    advance_ms(500).await;

    assert_eq!(sink.payloads_for("beats"), vec!["b".to_string()]);
    assert!(sink.payloads_for("outline").is_empty());
    assert!((250..=251).contains(&sink.calls()[0].started_ms));
}
