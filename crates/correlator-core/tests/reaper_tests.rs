mod common;

use common::{Harness, KEY, numbers, plain, sequenced};
use correlator_core::{
    CompletionReaper, CorrelatingHandler, HandlerConfig, HeaderCorrelation, MessageChannel,
    QueueChannel,
};
use futures::StreamExt;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::time::{sleep, timeout};

const TIMEOUT: Duration = Duration::from_millis(100);

#[tokio::test]
async fn test_timeout_discards_incomplete_group() {
    let harness = Harness::resequencer(HandlerConfig::default().with_timeout(TIMEOUT));
    let reaper = CompletionReaper::spawn(&harness.handler).unwrap();

    harness.send(sequenced("b", 2, 4));
    harness.send(sequenced("a", 1, 4));

    sleep(TIMEOUT / 2).await;
    assert!(harness.discard.is_empty());
    assert!(harness.handler.contains_group(&harness.key()));

    sleep(TIMEOUT * 2).await;
    let mut discarded = numbers(&harness.discard.drain());
    discarded.sort_unstable();
    assert_eq!(discarded, vec![1, 2]);
    assert!(harness.output.is_empty());
    assert_eq!(harness.handler.group_count(), 0);

    reaper.shutdown().await;
}

#[tokio::test]
async fn test_timeout_sends_partial_result() {
    let config = HandlerConfig::partial_on_timeout(TIMEOUT);
    let harness = Harness::resequencer(config);
    let reaper = CompletionReaper::spawn(&harness.handler).unwrap();

    harness.send(sequenced("d", 4, 4));
    harness.send(sequenced("b", 2, 4));

    sleep(TIMEOUT * 3).await;
    assert_eq!(numbers(&harness.output.drain()), vec![2, 4]);
    assert!(harness.discard.is_empty());

    reaper.shutdown().await;
}

#[tokio::test]
async fn test_completed_group_is_not_reaped() {
    let harness = Harness::resequencer(HandlerConfig::default().with_timeout(TIMEOUT));
    let reaper = CompletionReaper::spawn(&harness.handler).unwrap();

    harness.send(sequenced("b", 2, 2));
    harness.send(sequenced("a", 1, 2));
    assert_eq!(numbers(&harness.output.drain()), vec![1, 2]);

    sleep(TIMEOUT * 2).await;
    assert!(harness.output.is_empty());
    assert!(harness.discard.is_empty());

    reaper.shutdown().await;
}

#[tokio::test]
async fn test_recreated_group_gets_full_timeout() {
    let harness = Harness::resequencer(HandlerConfig::default().with_timeout(TIMEOUT));
    let reaper = CompletionReaper::spawn(&harness.handler).unwrap();

    // The first group completes quickly. A second group under the same
    // key is created shortly before the first deadline.
    harness.send(sequenced("a", 1, 1));
    sleep(TIMEOUT * 3 / 4).await;
    harness.send(sequenced("b", 2, 3));

    sleep(TIMEOUT / 2).await;
    assert!(harness.discard.is_empty());
    assert!(harness.handler.contains_group(&harness.key()));

    sleep(TIMEOUT).await;
    assert_eq!(numbers(&harness.discard.drain()), vec![2]);

    reaper.shutdown().await;
}

#[tokio::test]
async fn test_sweep_catches_groups_created_before_reaper() {
    let config = HandlerConfig::default()
        .with_timeout(TIMEOUT)
        .with_sweep_interval(TIMEOUT / 4);
    let harness = Harness::resequencer(config);

    harness.send(sequenced("b", 2, 2));
    let reaper = CompletionReaper::spawn(&harness.handler).unwrap();

    sleep(TIMEOUT * 2).await;
    assert_eq!(numbers(&harness.discard.drain()), vec![2]);
    assert_eq!(harness.handler.group_count(), 0);

    reaper.shutdown().await;
}

#[tokio::test]
async fn test_full_output_does_not_stall_the_runtime() {
    let output = Arc::new(QueueChannel::<String>::bounded(1));
    let handler = CorrelatingHandler::<String, String>::resequencer(HeaderCorrelation::new())
        .output_channel(output.clone())
        .config(HandlerConfig::partial_on_timeout(Duration::from_millis(20)))
        .build()
        .unwrap();
    let handler = Arc::new(handler);
    let reaper = CompletionReaper::spawn(&handler).unwrap();

    output.send(plain("filler", KEY), None).unwrap();
    handler.handle_message(sequenced("b", 2, 3)).unwrap();

    // The reaper waits on the full queue while this single-threaded
    // runtime keeps running the consumer.
    sleep(Duration::from_millis(100)).await;
    assert_eq!(
        output.receive().map(|message| message.into_payload()),
        Some("filler".to_string())
    );

    let released = timeout(Duration::from_secs(1), output.stream().next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(released.payload(), "b");
    assert_eq!(handler.group_count(), 0);

    reaper.shutdown().await;
}

#[test]
fn test_manual_expiry_without_reaper() {
    let harness = Harness::resequencer(HandlerConfig::default().with_timeout(TIMEOUT));
    harness.send(sequenced("b", 2, 2));

    assert_eq!(harness.handler.expire_groups(Instant::now()), 0);
    assert_eq!(harness.handler.expire_groups(Instant::now() + TIMEOUT), 1);
    assert_eq!(numbers(&harness.discard.drain()), vec![2]);
}

#[test]
fn test_spawn_outside_runtime_fails() {
    let harness = Harness::resequencer(HandlerConfig::default().with_timeout(TIMEOUT));
    assert!(CompletionReaper::spawn(&harness.handler).is_err());
}
