use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_nats::jetstream;
use async_nats::jetstream::consumer::pull;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

// ============================================================================
// Message Channel Client - durable pub/sub over NATS JetStream
// ============================================================================
//
// Owns the bus connection and all subscribe/publish/unsubscribe operations.
// Each topic gets a durable pull consumer named from the process client id,
// so redelivery after a restart resumes from the last acknowledged message.
// The subscription registry is the only mutable shared state; it guards
// against a second durable subscription on the same topic from this process,
// which would double-deliver every message.
//
// Reconnection is not handled here: the connection-loss callback logs the
// reason and the deployment supervisor owns restart policy.
// ============================================================================

/// Async handler invoked once per delivered message.
pub type MessageHandler = Arc<dyn Fn(Bytes) -> BoxFuture<'static, ()> + Send + Sync>;

/// Reported result of a `subscribe` call.
#[derive(Debug, PartialEq)]
pub enum SubscribeOutcome {
    Subscribed,
    /// The topic already has an active subscription in this process; no
    /// second subscription was created.
    AlreadySubscribed,
}

/// Tracks one delivery task per subscribed topic.
///
/// Split out from the client so the duplicate-subscribe guard is testable
/// without a running bus.
struct SubscriptionRegistry {
    subs: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl SubscriptionRegistry {
    fn new() -> Self {
        Self {
            subs: Mutex::new(HashMap::new()),
        }
    }

    /// Returns false (and drops nothing) if the topic is already tracked.
    async fn insert_if_absent(&self, topic: &str, handle: JoinHandle<()>) -> bool {
        let mut subs = self.subs.lock().await;
        if subs.contains_key(topic) {
            handle.abort();
            return false;
        }
        subs.insert(topic.to_string(), handle);
        true
    }

    async fn contains(&self, topic: &str) -> bool {
        self.subs.lock().await.contains_key(topic)
    }

    async fn remove(&self, topic: &str) -> Option<JoinHandle<()>> {
        self.subs.lock().await.remove(topic)
    }

    async fn drain(&self) -> Vec<JoinHandle<()>> {
        let mut subs = self.subs.lock().await;
        subs.drain().map(|(_, handle)| handle).collect()
    }
}

pub struct NatsClient {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    client_id: String,
    registry: SubscriptionRegistry,
}

impl NatsClient {
    /// Connects to the bus and registers a connection-loss callback that
    /// logs the reason. Connect failure is fatal to the caller.
    pub async fn connect(url: &str, client_id: &str) -> Result<Self> {
        tracing::info!(url, client_id, "Connecting to NATS");

        let client = async_nats::ConnectOptions::new()
            .name(client_id)
            .event_callback(|event| async move {
                match event {
                    async_nats::Event::Disconnected => {
                        tracing::warn!("NATS connection lost");
                    }
                    async_nats::Event::ClientError(err) => {
                        tracing::error!(error = %err, "NATS client error");
                    }
                    other => {
                        tracing::debug!(event = %other, "NATS connection event");
                    }
                }
            })
            .connect(url)
            .await
            .context("failed to connect to NATS")?;

        let jetstream = jetstream::new(client.clone());

        Ok(Self {
            client,
            jetstream,
            client_id: client_id.to_string(),
            registry: SubscriptionRegistry::new(),
        })
    }

    /// Registers `handler` to run once per delivered message on `topic`,
    /// backed by a durable consumer. Messages are acked only after the
    /// handler returns, so an unacked message is redelivered after a crash.
    ///
    /// A second subscribe on an already-subscribed topic is a reported no-op.
    pub async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<SubscribeOutcome> {
        if self.registry.contains(topic).await {
            tracing::warn!(topic, "Already subscribed to topic, ignoring");
            return Ok(SubscribeOutcome::AlreadySubscribed);
        }

        let stream = self
            .jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: stream_name(topic),
                subjects: vec![topic.to_string()],
                storage: jetstream::stream::StorageType::File,
                ..Default::default()
            })
            .await
            .with_context(|| format!("failed to ensure stream for topic {topic}"))?;

        let durable = durable_name(&self.client_id, topic);
        let consumer = stream
            .get_or_create_consumer(
                &durable,
                pull::Config {
                    durable_name: Some(durable.clone()),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    ack_wait: Duration::from_secs(30),
                    ..Default::default()
                },
            )
            .await
            .with_context(|| format!("bus rejected subscription on {topic}"))?;

        let mut messages = consumer
            .messages()
            .await
            .context("failed to open message stream")?;

        let task_topic = topic.to_string();
        let handle = tokio::spawn(async move {
            while let Some(message) = messages.next().await {
                match message {
                    Ok(message) => {
                        handler(message.payload.clone()).await;
                        if let Err(err) = message.ack().await {
                            tracing::warn!(
                                topic = %task_topic,
                                error = %err,
                                "Failed to ack message"
                            );
                        }
                    }
                    Err(err) => {
                        tracing::error!(
                            topic = %task_topic,
                            error = %err,
                            "Message delivery error"
                        );
                    }
                }
            }
            tracing::info!(topic = %task_topic, "Subscription delivery loop ended");
        });

        if !self.registry.insert_if_absent(topic, handle).await {
            // Lost a race with a concurrent subscribe on the same topic.
            tracing::warn!(topic, "Already subscribed to topic, ignoring");
            return Ok(SubscribeOutcome::AlreadySubscribed);
        }

        tracing::info!(topic, durable, "Subscribed to topic");
        Ok(SubscribeOutcome::Subscribed)
    }

    /// Stops delivery for `topic`. Fails if no subscription is tracked.
    pub async fn unsubscribe(&self, topic: &str) -> Result<()> {
        match self.registry.remove(topic).await {
            Some(handle) => {
                handle.abort();
                tracing::info!(topic, "Unsubscribed from topic");
                Ok(())
            }
            None => bail!("not subscribed to topic: {topic}"),
        }
    }

    /// Publishes `payload` to `topic` and waits for the bus acknowledgment.
    /// No internal retry; retry policy belongs to the caller.
    pub async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        self.jetstream
            .publish(topic.to_string(), payload)
            .await
            .with_context(|| format!("failed to publish to {topic}"))?
            .await
            .with_context(|| format!("bus did not acknowledge publish to {topic}"))?;

        tracing::debug!(topic, "Published message");
        Ok(())
    }

    /// Stops all delivery tasks and drains the connection. Call once at
    /// shutdown.
    pub async fn close(&self) -> Result<()> {
        for handle in self.registry.drain().await {
            handle.abort();
        }
        self.client.drain().await.context("failed to drain NATS connection")?;
        tracing::info!("NATS connection closed");
        Ok(())
    }
}

/// JetStream stream names may not contain dots or wildcards.
fn stream_name(topic: &str) -> String {
    topic.replace(['.', '*', '>'], "_").to_uppercase()
}

fn durable_name(client_id: &str, topic: &str) -> String {
    format!("{}-{}", client_id, topic.replace(['.', '*', '>'], "_"))
}
