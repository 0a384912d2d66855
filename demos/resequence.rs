use correlator_core::{
    CompletionReaper, CorrelatingHandler, HandlerConfig, HeaderCorrelation, Message, QueueChannel,
};
use futures::StreamExt;
use std::{sync::Arc, time::Duration};
use tracing::info;
use tracing_subscriber::EnvFilter;

const CONFIG: &str = r#"
timeout: 200ms
send_timeout: 50ms
send_partial_result_on_timeout: true
release_partial_sequences: true
"#;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = HandlerConfig::from_yaml_str(CONFIG)?;
    let output = Arc::new(QueueChannel::<String>::unbounded());
    let handler = Arc::new(
        CorrelatingHandler::<String, String>::resequencer(HeaderCorrelation::new())
            .output_channel(output.clone())
            .config(config)
            .build()?,
    );
    let reaper = CompletionReaper::spawn(&handler)?;

    // Order "A" arrives complete but shuffled. Order "B" never
    // receives its first line, so it is flushed when it times out.
    let arrivals = [("A", 3), ("B", 2), ("A", 1), ("A", 4), ("B", 3), ("A", 2)];
    for (order, line) in arrivals {
        let message = Message::builder(format!("{order}: line {line}"))
            .correlation_id(order)
            .sequence(line, 4)
            .build();
        handler.handle_message(message)?;
    }

    let mut released = output.stream();
    let collect = async {
        while let Some(message) = released.next().await {
            info!(
                correlation_id = ?message.correlation_id(),
                sequence_number = ?message.sequence_number(),
                "{}",
                message.payload()
            );
        }
    };
    let _ = tokio::time::timeout(Duration::from_millis(500), collect).await;

    reaper.shutdown().await;
    Ok(())
}
