// Integration tests for Sluice components
// These tests drive the consume operator end to end against in-process sources

use sluice_core::{
    ApplyArgs, ApplyFunction, CommitCadence, ConsumeConfig, ConsumeOperator, FunctionRegistry,
    MemorySource, Message, MessageSource, SourceError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn mocked_messages(count: usize) -> MemorySource<Message> {
    MemorySource::new((0..count).map(|offset| {
        let mut message = Message::new("test", "test_messages");
        message.offset = offset as i64;
        message
    }))
}

fn consume_config(max_messages: Option<usize>) -> ConsumeConfig {
    let mut config = ConsumeConfig::for_topics(["test"]);
    config.max_messages = max_messages;
    config.poll_timeout_secs = 0.0001;
    config
}

#[test]
fn test_operator_consume_budgets() {
    let cases = [
        (None, 1001),       // Consume all messages
        (Some(100), 1000),  // max_messages < max_batch_size is raised to max_batch_size
        (Some(2000), 1001), // max_messages > max_batch_size
    ];

    for (max_messages, expected) in cases {
        let mut source = mocked_messages(1001);
        let config = consume_config(max_messages);
        let mut operator = ConsumeOperator::new(&config, ApplyFunction::None).unwrap();

        let report = operator.execute(&mut source).unwrap();

        assert_eq!(report.total_consumed, expected, "max_messages = {:?}", max_messages);
        assert_eq!(source.remaining(), 1001 - expected);
        assert!(source.requests().iter().all(|&n| n <= 1000));
    }
}

#[test]
fn test_operator_with_callable() {
    let payloads = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&payloads);
    let apply = ApplyFunction::per_message(move |message: &Message| {
        assert_eq!(message.payload_str(), Some("test_messages"));
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let mut operator = ConsumeOperator::new(&consume_config(None), apply).unwrap();
    let report = operator.execute(&mut mocked_messages(1001)).unwrap();

    assert_eq!(payloads.load(Ordering::SeqCst), 1001);
    assert_eq!(report.batches, 2);
}

#[test]
fn test_operator_with_named_batch_function() {
    let sizes = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&sizes);
    let mut registry = FunctionRegistry::new();
    registry.register_batch("tests.record_sizes", move |batch: &[Message], args: &ApplyArgs| {
        assert_eq!(args.kwarg_str("label"), Some("integration"));
        seen.lock().unwrap().push(batch.len());
        Ok(())
    });

    let mut config = consume_config(Some(250));
    config.max_batch_size = 100;
    config.apply_function_batch = Some("tests.record_sizes".to_string());
    config
        .apply_function_kwargs
        .insert("label".to_string(), serde_json::json!("integration"));

    let mut operator = ConsumeOperator::from_config(&config, &registry).unwrap();
    let mut source = mocked_messages(1001);
    let report = operator.execute(&mut source).unwrap();

    assert_eq!(report.total_consumed, 250);
    assert_eq!(*sizes.lock().unwrap(), vec![100, 100, 50]);
    assert_eq!(source.requests(), &[100, 100, 50]);
}

#[test]
fn test_operator_settings_from_json() {
    let settings = sluice_core::Settings::from_json_str(
        r#"{
            "kafka": {"bootstrap_servers": ["localhost:9092"], "group_id": "test_group",
                      "properties": {"socket.timeout.ms": "10"}},
            "consume": {"topics": ["test"], "max_messages": 2000, "commit_cadence": "end_of_batch",
                        "poll_timeout_secs": 0.0001}
        }"#,
    )
    .unwrap();

    let mut operator = ConsumeOperator::new(&settings.consume, ApplyFunction::None).unwrap();
    let mut source = mocked_messages(1001);
    let report = operator.execute(&mut source).unwrap();

    assert_eq!(settings.consume.commit_cadence, CommitCadence::EndOfBatch);
    assert_eq!(report.total_consumed, 1001);
    assert_eq!(source.commits(), report.batches + 1);
}

/// Source that hands out one message per call and records timeouts
struct TrickleSource {
    left: usize,
    timeouts: Vec<Duration>,
}

impl MessageSource for TrickleSource {
    type Message = usize;

    fn consume(&mut self, max_count: usize, timeout: Duration) -> Result<Vec<usize>, SourceError> {
        self.timeouts.push(timeout);
        if max_count == 0 || self.left == 0 {
            return Ok(Vec::new());
        }
        self.left -= 1;
        Ok(vec![self.left])
    }

    fn name(&self) -> &'static str {
        "trickle_source"
    }
}

#[test]
fn test_short_batches_do_not_end_the_run() {
    let mut source = TrickleSource { left: 5, timeouts: Vec::new() };
    let mut operator = ConsumeOperator::new(&consume_config(None), ApplyFunction::None).unwrap();

    let report = operator.execute(&mut source).unwrap();

    assert_eq!(report.total_consumed, 5);
    assert_eq!(report.requests, 6);
    assert!(report.reached_end);
}

#[test]
fn test_poll_timeout_passed_through() {
    let mut source = TrickleSource { left: 3, timeouts: Vec::new() };
    let mut config = consume_config(None);
    config.poll_timeout_secs = 1.5;
    let mut operator = ConsumeOperator::new(&config, ApplyFunction::None).unwrap();

    operator.execute(&mut source).unwrap();

    assert_eq!(source.timeouts.len(), 4);
    assert!(source.timeouts.iter().all(|&t| t == Duration::from_millis(1500)));
}

#[test]
fn test_apply_not_called_after_budget_is_spent() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let apply = ApplyFunction::per_batch(move |_: &[usize]| {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let mut config = consume_config(Some(3));
    config.max_batch_size = 1;
    let mut source = TrickleSource { left: 10, timeouts: Vec::new() };
    let mut operator = ConsumeOperator::new(&config, apply).unwrap();

    let report = operator.execute(&mut source).unwrap();

    assert_eq!(report.total_consumed, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(source.left, 7);
    assert!(!report.reached_end);
}
