//! Cross-instance eviction over Redis pub/sub.
//!
//! The shared Redis tier is cleared once by the instance that handled the
//! mutation. In-process tiers live in every instance, so that instance also
//! publishes the plan and each peer replays it against its local tiers.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::CacheError;
use super::invalidator::CacheInvalidator;
use super::keys::{CacheKey, KeyPattern, Namespace};
use super::planner::EvictionPlan;

pub const DEFAULT_CHANNEL: &str = "newsdeck:cache:evict";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionMessage {
    pub message_id: Uuid,
    /// Instance that already applied the plan to every tier.
    pub origin: Uuid,
    pub keys: Vec<String>,
    pub patterns: Vec<String>,
    /// Namespaces whose fill generation peers must advance. Empty means
    /// every namespace.
    #[serde(default)]
    pub namespaces: Vec<Namespace>,
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,
}

impl EvictionMessage {
    pub fn from_plan(origin: Uuid, plan: &EvictionPlan) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            origin,
            keys: plan.keys().map(CacheKey::as_str).map(str::to_string).collect(),
            patterns: plan
                .patterns()
                .map(KeyPattern::as_str)
                .map(str::to_string)
                .collect(),
            namespaces: plan.namespaces().into_iter().collect(),
            issued_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Fans an executed plan out to peer instances.
#[async_trait]
pub trait EvictionBroadcaster: Send + Sync {
    /// Identity stamped on outgoing messages; matching messages are ignored
    /// on receipt.
    fn origin(&self) -> Uuid;

    async fn publish(&self, message: &EvictionMessage) -> Result<(), CacheError>;
}

#[derive(Clone)]
pub struct RedisBroadcaster {
    conn: ConnectionManager,
    channel: String,
    origin: Uuid,
}

impl RedisBroadcaster {
    pub fn new(conn: ConnectionManager, channel: impl Into<String>, origin: Uuid) -> Self {
        Self {
            conn,
            channel: channel.into(),
            origin,
        }
    }
}

#[async_trait]
impl EvictionBroadcaster for RedisBroadcaster {
    fn origin(&self) -> Uuid {
        self.origin
    }

    async fn publish(&self, message: &EvictionMessage) -> Result<(), CacheError> {
        let payload = serde_json::to_string(message)?;
        let mut conn = self.conn.clone();
        let receivers: usize = conn.publish(&self.channel, payload).await?;
        debug!(
            message_id = %message.message_id,
            channel = %self.channel,
            receivers,
            "Eviction plan broadcast"
        );
        Ok(())
    }
}

pub struct EvictionSubscriber {
    client: redis::Client,
    channel: String,
}

impl EvictionSubscriber {
    pub fn new(client: redis::Client, channel: impl Into<String>) -> Self {
        Self {
            client,
            channel: channel.into(),
        }
    }

    /// Subscribes and replays every foreign message against the local
    /// tiers of `invalidator` until the connection closes.
    pub async fn spawn(self, invalidator: Arc<CacheInvalidator>) -> Result<JoinHandle<()>, CacheError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&self.channel).await?;
        info!(channel = %self.channel, "Subscribed to eviction broadcasts");

        let channel = self.channel;
        Ok(tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload = match msg.get_payload::<String>() {
                    Ok(payload) => payload,
                    Err(err) => {
                        error!(error = %err, "Failed to read eviction broadcast payload");
                        continue;
                    }
                };
                let message: EvictionMessage = match serde_json::from_str(&payload) {
                    Ok(message) => message,
                    Err(err) => {
                        error!(error = %err, "Discarding malformed eviction broadcast");
                        continue;
                    }
                };
                invalidator.apply_remote(&message).await;
            }
            warn!(channel = %channel, "Eviction broadcast subscription ended");
        }))
    }
}
