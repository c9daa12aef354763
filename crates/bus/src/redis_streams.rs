//! Redis Streams backend.
//!
//! A topic is split into `partitions` streams named `{stream}:{p}`; a
//! message goes to partition `job_id % partitions`, so every message of one
//! job lands in one stream and keeps its publish order. Consumers read
//! through a consumer group (`XREADGROUP`) and acknowledge with `XACK`.
//! Entries a consumer read but never acknowledged stay in its pending list
//! and are returned again on the next read. Entries left pending by a
//! consumer that went away (a crashed process under another name) are
//! taken over with `XAUTOCLAIM` once they have been idle for
//! `claim_idle`.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{
    StreamAutoClaimReply, StreamId, StreamMaxlen, StreamReadOptions, StreamReadReply,
};
use redis::AsyncCommands;
use vidflow_core::types::JobId;

use crate::error::BusError;
use crate::messages::partition_for;
use crate::transport::{Delivery, Publisher, Subscriber};

/// Approximate number of entries kept per stream.
const DEFAULT_MAX_LEN: usize = 100_000;

/// Default number of entries read per poll.
const DEFAULT_BATCH_SIZE: usize = 16;

/// Default wait between polls when a read returns nothing.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Default idle time after which another consumer's pending entry is
/// taken over.
const DEFAULT_CLAIM_IDLE: Duration = Duration::from_secs(30);

/// Field holding the routing key.
const KEY_FIELD: &str = "key";

/// Field holding the JSON body.
const PAYLOAD_FIELD: &str = "payload";

/// Open a managed connection that reconnects on failure.
pub async fn connect(redis_url: &str) -> Result<ConnectionManager, BusError> {
    let client = redis::Client::open(redis_url)?;
    Ok(ConnectionManager::new(client).await?)
}

/// A partitioned stream topic.
#[derive(Debug, Clone)]
pub struct Topic {
    pub stream: String,
    pub partitions: u32,
}

impl Topic {
    pub fn new(stream: impl Into<String>, partitions: u32) -> Self {
        Self {
            stream: stream.into(),
            partitions: partitions.max(1),
        }
    }

    /// Stream key of partition `p`.
    pub fn partition_key(&self, p: u32) -> String {
        format!("{}:{p}", self.stream)
    }

    /// Stream key a job's messages are routed to.
    pub fn key_for(&self, job_id: JobId) -> String {
        self.partition_key(partition_for(job_id, self.partitions))
    }

    /// Every partition number of the topic.
    pub fn all_partitions(&self) -> Vec<u32> {
        (0..self.partitions).collect()
    }
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

/// Publishes to a partitioned topic with `XADD`.
#[derive(Clone)]
pub struct RedisStreamPublisher {
    conn: ConnectionManager,
    topic: Topic,
    max_len: usize,
}

impl RedisStreamPublisher {
    pub fn new(conn: ConnectionManager, topic: Topic) -> Self {
        Self {
            conn,
            topic,
            max_len: DEFAULT_MAX_LEN,
        }
    }
}

#[async_trait]
impl Publisher for RedisStreamPublisher {
    async fn publish(&self, key: JobId, payload: String) -> Result<(), BusError> {
        let stream = self.topic.key_for(key);
        let mut conn = self.conn.clone();
        let id: String = conn
            .xadd_maxlen(
                &stream,
                StreamMaxlen::Approx(self.max_len),
                "*",
                &[(KEY_FIELD, key.to_string()), (PAYLOAD_FIELD, payload)],
            )
            .await?;
        tracing::trace!(%stream, %id, job_id = %key, "Published to stream");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Subscriber
// ---------------------------------------------------------------------------

/// Consumer-group settings for a [`RedisStreamSubscriber`].
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    pub topic: Topic,
    /// Partitions this consumer reads. Defaults to all of them.
    pub partitions: Vec<u32>,
    pub group: String,
    pub consumer: String,
    pub batch_size: usize,
    pub poll_interval: Duration,
    /// How long an entry must sit unacknowledged with another consumer
    /// before this one claims it.
    pub claim_idle: Duration,
}

impl SubscriberConfig {
    pub fn new(topic: Topic, group: impl Into<String>, consumer: impl Into<String>) -> Self {
        Self {
            partitions: topic.all_partitions(),
            topic,
            group: group.into(),
            consumer: consumer.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            claim_idle: DEFAULT_CLAIM_IDLE,
        }
    }

    pub fn with_claim_idle(mut self, claim_idle: Duration) -> Self {
        self.claim_idle = claim_idle;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Restrict the consumer to a subset of partitions. Out-of-range
    /// partitions are dropped.
    pub fn with_partitions(mut self, partitions: Vec<u32>) -> Self {
        let max = self.topic.partitions;
        self.partitions = partitions.into_iter().filter(|p| *p < max).collect();
        self
    }
}

/// Reads a partitioned topic through a consumer group.
pub struct RedisStreamSubscriber {
    conn: ConnectionManager,
    config: SubscriberConfig,
    keys: Vec<String>,
}

impl RedisStreamSubscriber {
    /// Create the subscriber, creating its consumer group on every owned
    /// partition if it does not exist yet.
    pub async fn new(conn: ConnectionManager, config: SubscriberConfig) -> Result<Self, BusError> {
        let keys: Vec<String> = config
            .partitions
            .iter()
            .map(|p| config.topic.partition_key(*p))
            .collect();

        let mut subscriber = Self { conn, config, keys };
        subscriber.ensure_groups().await?;
        Ok(subscriber)
    }

    async fn ensure_groups(&mut self) -> Result<(), BusError> {
        for key in &self.keys {
            // Start from the beginning of the stream so commands published
            // before the first consumer came up are not skipped.
            let created: Result<(), redis::RedisError> = self
                .conn
                .xgroup_create_mkstream(key, &self.config.group, "0")
                .await;
            match created {
                Ok(()) => {
                    tracing::info!(stream = %key, group = %self.config.group, "Created consumer group");
                }
                Err(e) if e.code() == Some("BUSYGROUP") => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn read(&mut self, start_id: &str) -> Result<Vec<Delivery>, BusError> {
        if self.keys.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<&str> = vec![start_id; self.keys.len()];
        let options = StreamReadOptions::default()
            .group(&self.config.group, &self.config.consumer)
            .count(self.config.batch_size);

        let reply: Option<StreamReadReply> = self
            .conn
            .xread_options(&self.keys, &ids, &options)
            .await?;

        let mut deliveries = Vec::new();
        for stream in reply.map(|r| r.keys).unwrap_or_default() {
            for entry in stream.ids {
                deliveries.push(to_delivery(&stream.key, entry));
            }
        }
        Ok(deliveries)
    }

    /// Take over entries other consumers of the group left unacknowledged
    /// for at least `claim_idle`.
    async fn claim_abandoned(&mut self) -> Result<Vec<Delivery>, BusError> {
        let min_idle_ms = self.config.claim_idle.as_millis() as u64;
        let mut deliveries = Vec::new();

        for key in &self.keys {
            let reply: StreamAutoClaimReply = redis::cmd("XAUTOCLAIM")
                .arg(key)
                .arg(&self.config.group)
                .arg(&self.config.consumer)
                .arg(min_idle_ms)
                .arg("0-0")
                .arg("COUNT")
                .arg(self.config.batch_size)
                .query_async(&mut self.conn)
                .await?;

            if !reply.claimed.is_empty() {
                tracing::warn!(
                    stream = %key,
                    consumer = %self.config.consumer,
                    count = reply.claimed.len(),
                    "Claimed entries abandoned by another consumer",
                );
            }
            for entry in reply.claimed {
                deliveries.push(to_delivery(key, entry));
            }
        }
        Ok(deliveries)
    }
}

fn to_delivery(stream: &str, entry: StreamId) -> Delivery {
    let key: Option<String> = entry.get(KEY_FIELD);
    let payload: Option<String> = entry.get(PAYLOAD_FIELD);
    Delivery {
        stream: stream.to_string(),
        id: entry.id,
        key: key.unwrap_or_default(),
        payload: payload.unwrap_or_default(),
    }
}

#[async_trait]
impl Subscriber for RedisStreamSubscriber {
    async fn poll(&mut self) -> Result<Vec<Delivery>, BusError> {
        // "0" returns this consumer's own pending entries; ">" new ones.
        let pending = self.read("0").await?;
        if !pending.is_empty() {
            tracing::debug!(count = pending.len(), "Redelivering pending entries");
            return Ok(pending);
        }

        let claimed = self.claim_abandoned().await?;
        if !claimed.is_empty() {
            return Ok(claimed);
        }

        let fresh = self.read(">").await?;
        if fresh.is_empty() {
            tokio::time::sleep(self.config.poll_interval).await;
        }
        Ok(fresh)
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BusError> {
        let _: i64 = self
            .conn
            .xack(&delivery.stream, &self.config.group, &[&delivery.id])
            .await?;
        Ok(())
    }
}
