//! AMQP delivery loop: one run request per delivery, one delivery at a time

use crate::config::QueueSettings;
use crate::error::{Result, WorkerError};
use crate::executor::JobExecutor;
use crate::models::ModelRunRequest;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties};
use std::sync::Arc;
use std::time::Duration;

const CONSUMER_TAG: &str = "cortex-worker";

const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Capped exponential backoff between reconnect attempts, so a worker
/// rides out transient broker or store outages instead of dying
#[derive(Debug, Default)]
pub struct ReconnectBackoff {
    attempt: u32,
}

impl ReconnectBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call after a successful connection so the next failure starts over
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = RECONNECT_BASE_DELAY.saturating_mul(1u32 << self.attempt.min(6));
        self.attempt = self.attempt.saturating_add(1);
        delay.min(RECONNECT_MAX_DELAY)
    }
}

/// Consumes run requests from a durable queue and hands them to the
/// executor.
///
/// Prefetch is pinned at one so a worker never holds more than a single
/// in-flight run and the broker spreads load across workers fairly.
pub struct RunConsumer {
    channel: Channel,
    queue: String,
    executor: Arc<JobExecutor>,
}

impl RunConsumer {
    /// Connect to the broker and declare the work queue
    pub async fn connect(settings: &QueueSettings, executor: Arc<JobExecutor>) -> Result<Self> {
        let connection = Connection::connect(
            &settings.url,
            ConnectionProperties::default().with_connection_name(CONSUMER_TAG.into()),
        )
        .await
        .map_err(queue_error)?;

        let channel = connection.create_channel().await.map_err(queue_error)?;
        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(queue_error)?;
        channel
            .queue_declare(
                &settings.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(queue_error)?;

        tracing::info!(queue = %settings.queue, "connected to run queue");
        Ok(Self {
            channel,
            queue: settings.queue.clone(),
            executor,
        })
    }

    /// Consume deliveries until the channel closes or an infrastructure
    /// error occurs.
    ///
    /// Malformed payloads are acknowledged and dropped: redelivering them
    /// can never succeed. Executed requests are acknowledged whether the
    /// run succeeded or was marked failed; in both cases the terminal state
    /// is recorded and redelivery would be a no-op. On an infrastructure
    /// error the delivery is returned to the queue (nack with requeue) and
    /// the error goes to the caller, which reconnects after a backoff
    /// (`ReconnectBackoff`) and picks the delivery up again.
    pub async fn run(&self) -> Result<()> {
        let mut consumer = self
            .channel
            .basic_consume(
                &self.queue,
                CONSUMER_TAG,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(queue_error)?;

        while let Some(delivery) = consumer.next().await {
            let delivery = delivery.map_err(queue_error)?;

            let request = match ModelRunRequest::from_slice(&delivery.data) {
                Ok(request) => request,
                Err(e) => {
                    tracing::error!(error = %e, "dropping malformed run request payload");
                    delivery
                        .ack(BasicAckOptions::default())
                        .await
                        .map_err(queue_error)?;
                    continue;
                }
            };

            tracing::info!(run = %request.log_key(), "received run request");
            if let Err(e) = self.executor.execute(&request).await {
                tracing::error!(
                    run = %request.log_key(),
                    error = %e,
                    "infrastructure failure, returning delivery to the queue"
                );
                delivery
                    .nack(BasicNackOptions {
                        requeue: true,
                        ..BasicNackOptions::default()
                    })
                    .await
                    .map_err(queue_error)?;
                return Err(e);
            }
            delivery
                .ack(BasicAckOptions::default())
                .await
                .map_err(queue_error)?;
        }

        tracing::info!("run queue closed, consumer stopping");
        Ok(())
    }
}

fn queue_error(e: lapin::Error) -> WorkerError {
    WorkerError::Queue {
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_up_to_the_cap() {
        let mut backoff = ReconnectBackoff::new();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
        for _ in 0..10 {
            assert!(backoff.next_delay() <= RECONNECT_MAX_DELAY);
        }
        assert_eq!(backoff.next_delay(), RECONNECT_MAX_DELAY);
    }

    #[test]
    fn test_backoff_reset_starts_over() {
        let mut backoff = ReconnectBackoff::new();
        for _ in 0..5 {
            backoff.next_delay();
        }
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }
}
