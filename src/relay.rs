//! Outbox relay worker
//!
//! Drains pending outbox events to the broker. Each pass claims a batch, publishes
//! every event under its own timeout and records the outcomes. Delivery is
//! at-least-once: an event is only marked sent after the broker accepted it, and a
//! pass that dies before recording leaves its leases to expire.
//!
//! Failed publishes are retried forever. The backoff is worker state passed through
//! the loop, so several workers can run side by side without sharing counters.
use super::broker::Broker;
use super::config::RelayConfig;
use super::error::{PublishError, Result, StockError};
use super::outbox::{Delivery, OutboxEvent, OutboxStore};
use super::types::Id;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Capped exponential backoff, owned by one worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    floor: Duration,
    cap: Duration,
    current: Duration,
}

/// Summary of one relay pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayPass {
    pub claimed: usize,
    pub sent: usize,
    pub failed: usize,
    // claimed but never attempted because the lease ran out
    pub abandoned: usize,
    pub retry_after: Option<Duration>,
}

pub struct RelayWorker<B> {
    worker_id: String,
    outbox: OutboxStore,
    broker: B,
    config: RelayConfig,
}

impl Backoff {
    pub fn new(floor: Duration, cap: Duration) -> Self {
        let floor = floor.min(cap);
        Self {
            floor,
            cap,
            current: floor,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.floor;
    }

    /// Delay to wait before the next attempt; doubles the one after it.
    pub fn fail(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.cap);
        delay
    }
}

impl<B: Broker> RelayWorker<B> {
    pub fn new(outbox: OutboxStore, broker: B, config: RelayConfig) -> Self {
        Self {
            worker_id: format!("relay-{}", Id::new()),
            outbox,
            broker,
            config,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn new_backoff(&self) -> Backoff {
        Backoff::new(self.config.backoff_floor, self.config.backoff_cap)
    }

    /// Run until `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(worker_id = %self.worker_id, "outbox relay started");
        let mut backoff = self.new_backoff();

        loop {
            let outcome = self.run_once(&mut backoff).await;
            if let Err(e) = &outcome {
                tracing::error!(
                    worker_id = %self.worker_id,
                    retry_in = ?backoff.current(),
                    "outbox relay pass failed: {e}"
                );
            }
            let delay = next_delay(&outcome, self.config.idle_interval, &mut backoff);

            if shutdown.is_cancelled() {
                break;
            }
            if delay.is_zero() {
                continue;
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!(worker_id = %self.worker_id, "outbox relay stopped");
    }

    /// One claim, publish, record pass.
    pub async fn run_once(&self, backoff: &mut Backoff) -> Result<RelayPass> {
        let worker_id = self.worker_id.clone();
        let (limit, lease) = (self.config.batch_size, self.config.lease);
        // taken before the claim, so it never runs past the stamped expiry
        let lease_ends = tokio::time::Instant::now() + lease;
        let batch = self
            .storage(move |outbox| outbox.claim_batch(&worker_id, limit, lease))
            .await?;

        let mut pass = RelayPass {
            claimed: batch.len(),
            ..RelayPass::default()
        };
        if batch.is_empty() {
            return Ok(pass);
        }

        let mut outcomes = Vec::with_capacity(batch.len());
        for event in &batch {
            // past the lease another worker may already hold these events
            if tokio::time::Instant::now() >= lease_ends {
                pass.abandoned = batch.len() - outcomes.len();
                tracing::warn!(
                    worker_id = %self.worker_id,
                    abandoned = pass.abandoned,
                    "lease lapsed mid pass, leaving the rest of the batch to be reclaimed"
                );
                break;
            }
            match self.publish(event).await {
                Ok(()) => {
                    backoff.reset();
                    pass.sent += 1;
                    tracing::debug!(event_id = event.id, topic = %event.topic, "outbox event published");
                    outcomes.push((event.id, Delivery::Sent));
                }
                Err(e) => {
                    let delay = backoff.fail();
                    pass.failed += 1;
                    pass.retry_after = Some(delay);
                    tracing::warn!(
                        event_id = event.id,
                        topic = %event.topic,
                        attempt = event.attempt_count.saturating_add(1),
                        retry_in = ?delay,
                        "outbox publish failed: {e}"
                    );
                    outcomes.push((event.id, Delivery::Failed(e.to_string())));
                }
            }
        }

        let worker_id = self.worker_id.clone();
        self.storage(move |outbox| outbox.complete(&worker_id, &outcomes))
            .await?;

        Ok(pass)
    }

    async fn publish(&self, event: &OutboxEvent) -> Result<(), PublishError> {
        let timeout = self.config.publish_timeout;
        match tokio::time::timeout(
            timeout,
            self.broker.publish(&event.topic, event.payload.as_bytes()),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(PublishError::Timeout(timeout)),
        }
    }

    // sled calls block, so they run on the blocking pool under the transaction timeout
    async fn storage<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(OutboxStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let outbox = self.outbox.clone();
        let timeout = self.config.tx_timeout;
        match tokio::time::timeout(timeout, tokio::task::spawn_blocking(move || op(outbox))).await
        {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(StockError::TaskFailed(join.to_string())),
            Err(_) => Err(StockError::Timeout(timeout)),
        }
    }
}

// how long to sleep after a pass. any pass without failures resets the backoff,
// so an old storage error doesn't stretch the next retry.
fn next_delay(outcome: &Result<RelayPass>, idle: Duration, backoff: &mut Backoff) -> Duration {
    match outcome {
        Ok(pass) => {
            if pass.failed == 0 {
                backoff.reset();
            }
            if pass.claimed == 0 {
                idle
            } else {
                pass.retry_after.unwrap_or(Duration::ZERO)
            }
        }
        Err(_) => backoff.fail(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));

        let delays: Vec<u64> = (0..7).map(|_| backoff.fail().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);

        backoff.reset();
        assert_eq!(backoff.current(), Duration::from_secs(1));
    }

    #[test]
    fn backoff_floor_never_exceeds_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(60), Duration::from_secs(30));
        assert_eq!(backoff.fail(), Duration::from_secs(30));
        assert_eq!(backoff.fail(), Duration::from_secs(30));
    }

    #[test]
    fn separate_backoffs_do_not_interfere() {
        let mut a = Backoff::new(Duration::from_millis(10), Duration::from_millis(80));
        let b = Backoff::new(Duration::from_millis(10), Duration::from_millis(80));
        a.fail();
        a.fail();
        assert_eq!(a.current(), Duration::from_millis(40));
        assert_eq!(b.current(), Duration::from_millis(10));
    }

    #[test]
    fn clean_passes_reset_a_backoff_inflated_by_errors() {
        let idle = Duration::from_millis(500);
        let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(80));

        let storage_error = Err(StockError::Timeout(Duration::from_secs(5)));
        assert_eq!(next_delay(&storage_error, idle, &mut backoff), Duration::from_millis(10));
        assert_eq!(next_delay(&storage_error, idle, &mut backoff), Duration::from_millis(20));
        assert_eq!(backoff.current(), Duration::from_millis(40));

        // an empty pass sleeps the idle interval and forgets the earlier errors
        let empty = Ok(RelayPass::default());
        assert_eq!(next_delay(&empty, idle, &mut backoff), idle);
        assert_eq!(backoff.current(), Duration::from_millis(10));
    }

    #[test]
    fn failed_pass_sleeps_its_retry_delay() {
        let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(80));
        backoff.fail();
        let pass = Ok(RelayPass {
            claimed: 2,
            sent: 1,
            failed: 1,
            abandoned: 0,
            retry_after: Some(Duration::from_millis(10)),
        });

        assert_eq!(
            next_delay(&pass, Duration::from_secs(1), &mut backoff),
            Duration::from_millis(10)
        );
        // failures keep the backoff where the pass left it
        assert_eq!(backoff.current(), Duration::from_millis(20));
    }
}
