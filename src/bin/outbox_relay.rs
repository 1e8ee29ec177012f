//! Long running outbox relay.
//!
//! Opens the stock database, then drains pending outbox events to NATS until Ctrl-C.
//! Without `NATS_URL` it publishes to an in-process broker instead, and a subscriber
//! task logs every delivered message.
use anyhow::Context;
use std::sync::Arc;
use stock_outbox::broker::{Broker, BrokerMessage, MemoryBroker, NatsBroker};
use stock_outbox::config::Config;
use stock_outbox::logger::init_logger;
use stock_outbox::outbox::OutboxStore;
use stock_outbox::relay::RelayWorker;
use stock_outbox::store::Store;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    init_logger(&config.log_level);

    let store = Store::open(&config.db_path)
        .with_context(|| format!("failed to open stock database at {}", config.db_path))?;
    let outbox = OutboxStore::new(&store);
    tracing::info!(
        db_path = %config.db_path,
        pending = outbox.pending_count(),
        lease = ?config.relay.lease,
        "stock database opened"
    );

    let (broker, subscriber): (Arc<dyn Broker>, Option<JoinHandle<()>>) = match &config.nats_url
    {
        Some(url) => {
            let broker = NatsBroker::connect(url)
                .await
                .context("failed to connect to the message broker")?;
            (Arc::new(broker) as Arc<dyn Broker>, None)
        }
        None => {
            tracing::warn!("NATS_URL not set, publishing to an in-process broker");
            let broker = MemoryBroker::default();
            let subscriber = tokio::spawn(log_deliveries(broker.subscribe()));
            (Arc::new(broker) as Arc<dyn Broker>, Some(subscriber))
        }
    };

    let shutdown = CancellationToken::new();
    let worker = RelayWorker::new(outbox, broker, config.relay.clone());
    let relay = tokio::spawn(worker.run(shutdown.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested");
    shutdown.cancel();

    relay.await.context("relay task panicked")?;
    // the worker owned the last sender, so the subscriber sees Closed and exits
    if let Some(subscriber) = subscriber {
        subscriber.await.context("subscriber task panicked")?;
    }
    store.flush().await?;

    Ok(())
}

async fn log_deliveries(mut deliveries: broadcast::Receiver<BrokerMessage>) {
    loop {
        match deliveries.recv().await {
            Ok(message) => tracing::info!(
                topic = %message.topic,
                payload = %String::from_utf8_lossy(&message.payload),
                "delivered"
            ),
            Err(RecvError::Lagged(n)) => tracing::warn!("subscriber lagged {n} messages"),
            Err(RecvError::Closed) => break,
        }
    }
}
