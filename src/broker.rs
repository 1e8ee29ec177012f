//! Message broker seam for the outbox relay
//!
//! The relay only needs fire-and-forget publish. [`NatsBroker`] publishes to a NATS
//! server and is what a deployed relay uses. [`MemoryBroker`] is an in-process
//! pub/sub built on a tokio broadcast channel, for tests and local runs.
use super::error::PublishError;
use async_trait::async_trait;
use tokio::sync::broadcast;

#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish `payload` to `topic`. No reply is expected.
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct MemoryBroker {
    tx: broadcast::Sender<BrokerMessage>,
}

impl MemoryBroker {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BrokerMessage> {
        self.tx.subscribe()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        let message = BrokerMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        };
        // a broadcast send only fails when nobody is listening
        self.tx
            .send(message)
            .map(|_| ())
            .map_err(|_| PublishError::Rejected {
                topic: topic.to_string(),
                reason: "no subscribers".to_string(),
            })
    }
}

/// Publishes to NATS, one subject per outbox topic.
#[derive(Clone)]
pub struct NatsBroker {
    client: async_nats::Client,
}

impl NatsBroker {
    pub async fn connect(url: &str) -> Result<Self, PublishError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| PublishError::Unreachable(format!("{url}: {e}")))?;
        tracing::info!(url, "connected to nats");
        Ok(Self { client })
    }
}

#[async_trait]
impl Broker for NatsBroker {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        self.client
            .publish(topic.to_string(), payload.to_vec().into())
            .await
            .map_err(|e| match e.kind() {
                async_nats::client::PublishErrorKind::MaxPayloadExceeded => {
                    PublishError::Rejected {
                        topic: topic.to_string(),
                        reason: e.to_string(),
                    }
                }
                _ => PublishError::Unreachable(e.to_string()),
            })?;
        // publish only buffers; the event counts as sent once the server has it
        self.client
            .flush()
            .await
            .map_err(|e| PublishError::Unreachable(e.to_string()))
    }
}

#[async_trait]
impl<B: Broker + ?Sized> Broker for std::sync::Arc<B> {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        (**self).publish(topic, payload).await
    }
}
