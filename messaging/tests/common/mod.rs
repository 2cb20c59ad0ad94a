#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use messaging::{
    ErrorCategory, FailedMessageProcessor, Message, MessageHandler, Partition, PartitionProcessor,
    PartitionRecord, ProcessorConfig, RequestContext, RpcError, Topic, TypeDictionary,
};
use parking_lot::Mutex;
use tokio::sync::watch;

pub const TOPIC: &str = "inbox-com.example.greeter";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Greeting {
    #[prost(string, tag = "1")]
    pub text: String,
}

impl prost::Name for Greeting {
    const NAME: &'static str = "Greeting";
    const PACKAGE: &'static str = "messaging.test";
}

pub fn greeting(text: &str) -> Greeting {
    Greeting {
        text: text.to_string(),
    }
}

pub fn partition() -> Partition {
    Partition::new(TOPIC, 0)
}

/// A record carrying a one-way greeting. The text selects how [`TestHandler`] behaves.
pub fn record(offset: i64, text: &str) -> PartitionRecord {
    let message = Message::one_way(
        Topic::new(TOPIC),
        "greeter-key",
        greeting(text),
        &RequestContext::new(),
    );
    record_of(offset, &message)
}

pub fn record_of(offset: i64, message: &Message) -> PartitionRecord {
    PartitionRecord::new(
        &partition(),
        offset,
        Some(message.metadata().partitioning_key().to_owned()),
        message.to_envelope().to_bytes(),
    )
}

/// Closed until opened. Handlers wait on it to simulate slow work.
pub struct Gate {
    tx: watch::Sender<bool>,
}

impl Gate {
    pub fn closed() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn open(&self) {
        self.tx.send_replace(true);
    }

    pub async fn pass(&self) {
        let mut rx = self.tx.subscribe();
        rx.wait_for(|open| *open).await.expect("gate dropped");
    }
}

/// Behaviour is driven by the greeting text:
/// `fail` fails permanently, `transient` fails recoverably on every attempt,
/// `transient-once` fails recoverably on the first attempt only, `panic` panics,
/// `block` waits on the gate. Anything else succeeds. Requests with a reply-to get a reply.
pub struct TestHandler {
    pub invocations: AtomicUsize,
    pub offsets: Mutex<Vec<i64>>,
    pub replies: Mutex<Vec<Message>>,
    attempts_per_offset: Mutex<HashMap<i64, u32>>,
    pub gate: Gate,
}

impl TestHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            invocations: AtomicUsize::new(0),
            offsets: Mutex::new(Vec::new()),
            replies: Mutex::new(Vec::new()),
            attempts_per_offset: Mutex::new(HashMap::new()),
            gate: Gate::closed(),
        })
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

fn transient() -> anyhow::Error {
    RpcError::new(ErrorCategory::BackendError, "UNAVAILABLE", "try again")
        .retriable(true)
        .into()
}

#[async_trait]
impl MessageHandler for TestHandler {
    async fn on_message(&self, message: &Message, context: &RequestContext) -> Result<()> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let offset = message.metadata().offset().expect("inbound message has an offset");
        self.offsets.lock().push(offset);
        let attempt = {
            let mut attempts = self.attempts_per_offset.lock();
            let attempt = attempts.entry(offset).or_insert(0);
            *attempt += 1;
            *attempt
        };

        let text = message
            .payload_as::<Greeting>()
            .expect("greeting payload")
            .text
            .clone();
        match text.as_str() {
            "fail" => return Err(anyhow!("permanent failure")),
            "transient" => return Err(transient()),
            "transient-once" if attempt == 1 => return Err(transient()),
            "panic" => panic!("handler blew up"),
            "block" => self.gate.pass().await,
            _ => {}
        }

        if message.metadata().reply_to().is_some() {
            let reply = Message::reply_to(message, greeting("pong"), context)?;
            self.replies.lock().push(reply);
        }
        Ok(())
    }
}

pub fn processor(
    handler: Arc<TestHandler>,
    failed_message_processor: Arc<dyn FailedMessageProcessor>,
    max_messages_in_flight: usize,
) -> PartitionProcessor {
    let mut dictionary = TypeDictionary::default();
    dictionary.register::<Greeting, _>(handler);

    PartitionProcessor::new(
        partition(),
        Arc::new(dictionary),
        failed_message_processor,
        ProcessorConfig {
            max_messages_in_flight,
        },
    )
}

/// Surface processor logs in test output, filtered by RUST_LOG.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    tokio::time::timeout(timeout, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .is_ok()
}
