use correlator_core::{
    CorrelatingHandler, GroupProcessor, HandlerConfig, HeaderCorrelation, Message, QueueChannel,
    ReleaseStrategy,
};
use std::sync::Arc;

#[allow(dead_code)]
pub const KEY: &str = "ABC";

/// A message of the `ABC` group carrying sequence headers.
#[allow(dead_code)]
pub fn sequenced(payload: &str, number: u32, size: u32) -> Message<String> {
    Message::builder(payload.to_string())
        .correlation_id(KEY)
        .sequence(number, size)
        .build()
}

/// A message without sequence headers.
#[allow(dead_code)]
pub fn plain(payload: &str, key: &str) -> Message<String> {
    Message::builder(payload.to_string())
        .correlation_id(key)
        .build()
}

#[allow(dead_code)]
pub fn payloads(messages: &[Message<String>]) -> Vec<String> {
    messages
        .iter()
        .map(|message| message.payload().clone())
        .collect()
}

#[allow(dead_code)]
pub fn numbers(messages: &[Message<String>]) -> Vec<u32> {
    messages
        .iter()
        .filter_map(|message| message.sequence_number())
        .collect()
}

/// A handler wired to an output and a discard queue.
#[allow(dead_code)]
pub struct Harness {
    pub handler: Arc<CorrelatingHandler<String, String>>,
    pub output: Arc<QueueChannel<String>>,
    pub discard: Arc<QueueChannel<String>>,
}

impl Harness {
    #[allow(dead_code)]
    pub fn resequencer(config: HandlerConfig) -> Self {
        let output = Arc::new(QueueChannel::<String>::unbounded());
        let discard = Arc::new(QueueChannel::<String>::unbounded());
        let handler = CorrelatingHandler::<String, String>::resequencer(HeaderCorrelation::new())
            .output_channel(output.clone())
            .discard_channel(discard.clone())
            .config(config)
            .build()
            .unwrap();

        Self {
            handler: Arc::new(handler),
            output,
            discard,
        }
    }

    #[allow(dead_code)]
    pub fn with_strategies(
        release: impl ReleaseStrategy<String, String> + 'static,
        processor: impl GroupProcessor<String, String> + 'static,
        config: HandlerConfig,
    ) -> Self {
        let output = Arc::new(QueueChannel::<String>::unbounded());
        let discard = Arc::new(QueueChannel::<String>::unbounded());
        let handler =
            CorrelatingHandler::<String, String>::builder(HeaderCorrelation::new(), processor)
                .release_strategy(release)
                .output_channel(output.clone())
                .discard_channel(discard.clone())
                .config(config)
                .build()
                .unwrap();

        Self {
            handler: Arc::new(handler),
            output,
            discard,
        }
    }

    #[allow(dead_code)]
    pub fn send(&self, message: Message<String>) {
        self.handler.handle_message(message).unwrap();
    }

    #[allow(dead_code)]
    pub fn key(&self) -> String {
        KEY.to_string()
    }
}
