//! Delivery gateway: throttled, time-bounded calls against the channel
//!
//! Every platform call takes one permit from the shared limiter and runs
//! under the request timeout. Permanent failures are handed to the
//! [`SubscriberLifecycle`]; transient ones are logged and returned so the
//! caller simply does not record the delivery.

use crate::channel::{Attachment, DeliveryChannel, OutboundMessage};
use crate::error::DeliveryError;
use crate::lifecycle::SubscriberLifecycle;
use crate::limiter::{RateLimiter, TokenBucket};
use futures::stream::{self, StreamExt};
use quake_model::{ImageMode, MessageHandle, Subscriber, SubscriberId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Gateway tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Sustained outbound calls per second
    pub rate_per_second: u32,
    /// Calls allowed back to back before throttling
    pub burst: u32,
    /// Per-call timeout, in seconds
    pub request_timeout_secs: u64,
    /// Concurrent deliveries per fan-out
    pub fan_out_concurrency: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            rate_per_second: 30,
            burst: 30,
            request_timeout_secs: 10,
            fan_out_concurrency: 16,
        }
    }
}

impl DeliveryConfig {
    /// Set sustained rate and burst
    #[must_use]
    pub fn with_rate(mut self, rate_per_second: u32, burst: u32) -> Self {
        self.rate_per_second = rate_per_second;
        self.burst = burst;
        self
    }

    /// Set per-call timeout
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Set fan-out concurrency
    #[must_use]
    pub fn with_fan_out_concurrency(mut self, concurrency: usize) -> Self {
        self.fan_out_concurrency = concurrency;
        self
    }

    /// Per-call timeout
    #[inline]
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Gateway counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    /// Messages created
    pub created: u64,
    /// Messages edited
    pub edited: u64,
    /// Edits the platform reported as unchanged
    pub not_modified: u64,
    /// Attachments sent
    pub attachments: u64,
    /// Transient failures
    pub transient_failures: u64,
    /// Permanent failures
    pub permanent_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    created: AtomicU64,
    edited: AtomicU64,
    not_modified: AtomicU64,
    attachments: AtomicU64,
    transient_failures: AtomicU64,
    permanent_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> DeliveryStats {
        DeliveryStats {
            created: self.created.load(Ordering::Relaxed),
            edited: self.edited.load(Ordering::Relaxed),
            not_modified: self.not_modified.load(Ordering::Relaxed),
            attachments: self.attachments.load(Ordering::Relaxed),
            transient_failures: self.transient_failures.load(Ordering::Relaxed),
            permanent_failures: self.permanent_failures.load(Ordering::Relaxed),
        }
    }
}

/// Outcome of a broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// Delivered messages
    pub sent: usize,
    /// Transient failures
    pub failed: usize,
    /// Recipients found permanently unreachable
    pub deactivated: usize,
}

/// Throttled front of a [`DeliveryChannel`]
pub struct DeliveryGateway {
    channel: Arc<dyn DeliveryChannel>,
    limiter: Arc<dyn RateLimiter>,
    lifecycle: Arc<SubscriberLifecycle>,
    config: DeliveryConfig,
    counters: Counters,
}

impl DeliveryGateway {
    /// Create gateway with a token bucket sized from `config`
    #[must_use]
    pub fn new(
        channel: Arc<dyn DeliveryChannel>,
        lifecycle: Arc<SubscriberLifecycle>,
        config: DeliveryConfig,
    ) -> Self {
        let limiter = Arc::new(TokenBucket::new(config.rate_per_second, config.burst));
        Self {
            channel,
            limiter,
            lifecycle,
            config,
            counters: Counters::default(),
        }
    }

    /// Replace the rate limiter
    #[must_use]
    pub fn with_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    /// Gateway configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Lifecycle handler receiving permanent failures
    #[inline]
    #[must_use]
    pub fn lifecycle(&self) -> &Arc<SubscriberLifecycle> {
        &self.lifecycle
    }

    /// Counter snapshot
    #[must_use]
    pub fn stats(&self) -> DeliveryStats {
        self.counters.snapshot()
    }

    /// Send a new alert: text first, then attachments
    ///
    /// The handle is returned as soon as the text is delivered; a failed
    /// attachment is logged but does not void it. A permanent failure on an
    /// attachment still deactivates the subscriber and skips the rest.
    pub async fn create(
        &self,
        subscriber: &Subscriber,
        message: &OutboundMessage,
    ) -> Result<MessageHandle, DeliveryError> {
        let chat = subscriber.chat_id;
        let handle = match self.call(self.channel.send_text(chat, &message.text)).await {
            Ok(handle) => handle,
            Err(e) => {
                self.on_failure(subscriber.id, "create", &e).await;
                return Err(e);
            }
        };
        Counters::bump(&self.counters.created);
        tracing::debug!(subscriber = %subscriber.id, %handle, "Message created");

        for attachment in &message.attachments {
            let sent = match attachment {
                Attachment::Location(point) => {
                    self.call(self.channel.send_location(chat, *point)).await
                }
                Attachment::Image(image) => match subscriber.image_mode {
                    ImageMode::Photo => self.call(self.channel.send_photo(chat, image)).await,
                    ImageMode::Document => {
                        self.call(self.channel.send_document(chat, image)).await
                    }
                },
            };
            match sent {
                Ok(()) => Counters::bump(&self.counters.attachments),
                Err(e) => {
                    self.on_failure(subscriber.id, "attachment", &e).await;
                    if e.is_permanent() {
                        break;
                    }
                }
            }
        }

        Ok(handle)
    }

    /// Replace the text of a delivered alert
    ///
    /// A "not modified" response counts as success.
    pub async fn edit(
        &self,
        subscriber: &Subscriber,
        handle: MessageHandle,
        text: &str,
    ) -> Result<(), DeliveryError> {
        match self.call(self.channel.edit_text(handle, text)).await {
            Ok(()) => {
                Counters::bump(&self.counters.edited);
                tracing::debug!(subscriber = %subscriber.id, %handle, "Message edited");
                Ok(())
            }
            Err(e) if e.is_benign() => {
                Counters::bump(&self.counters.not_modified);
                Ok(())
            }
            Err(e) => {
                self.on_failure(subscriber.id, "edit", &e).await;
                Err(e)
            }
        }
    }

    /// Send `text` to every subscriber in `recipients`
    ///
    /// Runs with bounded concurrency; the shared limiter keeps the combined
    /// rate under the platform limit.
    pub async fn broadcast(&self, recipients: Vec<Subscriber>, text: &str) -> BroadcastReport {
        let message = OutboundMessage::text(text);
        let concurrency = self.config.fan_out_concurrency.max(1);
        let message = &message;

        let results: Vec<_> = stream::iter(recipients)
            .map(|subscriber| async move { self.create(&subscriber, message).await })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut report = BroadcastReport::default();
        for result in results {
            match result {
                Ok(_) => report.sent += 1,
                Err(e) if e.is_permanent() => report.deactivated += 1,
                Err(_) => report.failed += 1,
            }
        }
        tracing::info!(
            sent = report.sent,
            failed = report.failed,
            deactivated = report.deactivated,
            "Broadcast finished"
        );
        report
    }

    async fn call<T>(
        &self,
        request: impl Future<Output = Result<T, DeliveryError>>,
    ) -> Result<T, DeliveryError> {
        self.limiter.acquire().await;
        let timeout = self.config.request_timeout();
        match tokio::time::timeout(timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(timeout)),
        }
    }

    async fn on_failure(&self, subscriber: SubscriberId, operation: &str, error: &DeliveryError) {
        if error.is_benign() {
            return;
        }
        if error.is_permanent() {
            Counters::bump(&self.counters.permanent_failures);
            tracing::warn!(subscriber = %subscriber, operation, %error, "Recipient unreachable");
            if let Err(e) = self.lifecycle.deactivate(subscriber, error).await {
                tracing::error!(subscriber = %subscriber, error = %e, "Deactivation failed");
            }
        } else {
            Counters::bump(&self.counters.transient_failures);
            tracing::warn!(subscriber = %subscriber, operation, %error, "Delivery failed");
        }
    }
}

impl fmt::Debug for DeliveryGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryGateway")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Image, MockDeliveryChannel};
    use async_trait::async_trait;
    use mockall::predicate::eq;
    use pretty_assertions::assert_eq;
    use quake_model::{ChatId, GeoPoint};
    use quake_subscribers::{CacheConfig, InMemoryStore, SubscriberCache, SubscriberStore};

    fn subscriber(id: i64) -> Subscriber {
        Subscriber::new(SubscriberId(id), ChatId(id), GeoPoint::new(43.24, 76.89))
    }

    fn gateway_over(
        channel: impl DeliveryChannel + 'static,
        subscribers: impl IntoIterator<Item = Subscriber>,
    ) -> (DeliveryGateway, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::with_subscribers(subscribers));
        let dyn_store: Arc<dyn SubscriberStore> = store.clone();
        let cache = SubscriberCache::new(dyn_store, &CacheConfig::default());
        let lifecycle = Arc::new(SubscriberLifecycle::new(cache));
        let gateway = DeliveryGateway::new(
            Arc::new(channel),
            lifecycle,
            DeliveryConfig::default().with_rate(1_000, 1_000),
        );
        (gateway, store)
    }

    #[tokio::test]
    async fn create_sends_text_then_attachments() {
        let mut channel = MockDeliveryChannel::new();
        let mut seq = mockall::Sequence::new();
        channel
            .expect_send_text()
            .with(eq(ChatId(1)), eq("alert"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|chat, _| Ok(MessageHandle::new(chat, 77)));
        channel
            .expect_send_location()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        channel
            .expect_send_document()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        channel.expect_send_photo().never();

        let mut recipient = subscriber(1);
        recipient.image_mode = ImageMode::Document;
        let (gateway, _) = gateway_over(channel, [recipient.clone()]);

        let message = OutboundMessage::text("alert")
            .with_attachment(Attachment::Location(GeoPoint::new(1.0, 2.0)))
            .with_attachment(Attachment::Image(Image {
                file_name: "map.png".into(),
                bytes: vec![1, 2, 3],
            }));
        let handle = gateway.create(&recipient, &message).await.unwrap();

        assert_eq!(handle, MessageHandle::new(ChatId(1), 77));
        let stats = gateway.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.attachments, 2);
    }

    #[tokio::test]
    async fn failed_attachment_keeps_handle() {
        let mut channel = MockDeliveryChannel::new();
        channel
            .expect_send_text()
            .returning(|chat, _| Ok(MessageHandle::new(chat, 5)));
        channel
            .expect_send_location()
            .returning(|_, _| Err(DeliveryError::Network("reset".into())));

        let recipient = subscriber(1);
        let (gateway, store) = gateway_over(channel, [recipient.clone()]);
        let message = OutboundMessage::text("alert")
            .with_attachment(Attachment::Location(GeoPoint::new(1.0, 2.0)));

        assert!(gateway.create(&recipient, &message).await.is_ok());
        assert_eq!(gateway.stats().transient_failures, 1);
        assert!(store.peek(SubscriberId(1)).unwrap().enabled);
    }

    #[tokio::test]
    async fn blocked_recipient_is_deactivated() {
        let mut channel = MockDeliveryChannel::new();
        channel
            .expect_send_text()
            .times(1)
            .returning(|_, _| Err(DeliveryError::Blocked));

        let recipient = subscriber(1);
        let (gateway, store) = gateway_over(channel, [recipient.clone()]);

        let err = gateway
            .create(&recipient, &OutboundMessage::text("alert"))
            .await
            .unwrap_err();
        assert!(err.is_permanent());
        assert!(!store.peek(SubscriberId(1)).unwrap().enabled);
        assert_eq!(gateway.lifecycle().deactivated(), 1);
        assert_eq!(gateway.stats().permanent_failures, 1);
    }

    #[tokio::test]
    async fn not_modified_edit_is_success() {
        let mut channel = MockDeliveryChannel::new();
        channel
            .expect_edit_text()
            .times(1)
            .returning(|_, _| Err(DeliveryError::NotModified));

        let recipient = subscriber(1);
        let (gateway, _) = gateway_over(channel, [recipient.clone()]);

        let handle = MessageHandle::new(ChatId(1), 9);
        assert!(gateway.edit(&recipient, handle, "same").await.is_ok());
        let stats = gateway.stats();
        assert_eq!(stats.not_modified, 1);
        assert_eq!(stats.edited, 0);
        assert_eq!(stats.transient_failures, 0);
    }

    struct StalledChannel;

    #[async_trait]
    impl DeliveryChannel for StalledChannel {
        async fn send_text(&self, _: ChatId, _: &str) -> Result<MessageHandle, DeliveryError> {
            std::future::pending().await
        }

        async fn edit_text(&self, _: MessageHandle, _: &str) -> Result<(), DeliveryError> {
            std::future::pending().await
        }

        async fn send_location(&self, _: ChatId, _: GeoPoint) -> Result<(), DeliveryError> {
            std::future::pending().await
        }

        async fn send_photo(&self, _: ChatId, _: &Image) -> Result<(), DeliveryError> {
            std::future::pending().await
        }

        async fn send_document(&self, _: ChatId, _: &Image) -> Result<(), DeliveryError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_call_times_out_as_transient() {
        let recipient = subscriber(1);
        let (gateway, store) = gateway_over(StalledChannel, [recipient.clone()]);

        let err = gateway
            .create(&recipient, &OutboundMessage::text("alert"))
            .await
            .unwrap_err();

        assert_eq!(err, DeliveryError::Timeout(Duration::from_secs(10)));
        assert!(err.is_transient());
        assert!(store.peek(SubscriberId(1)).unwrap().enabled);
    }

    #[tokio::test]
    async fn broadcast_tallies_outcomes() {
        let mut channel = MockDeliveryChannel::new();
        channel.expect_send_text().returning(|chat, _| match chat.0 {
            2 => Err(DeliveryError::Deactivated),
            3 => Err(DeliveryError::Network("reset".into())),
            _ => Ok(MessageHandle::new(chat, 1)),
        });

        let recipients: Vec<_> = (1..=4).map(subscriber).collect();
        let (gateway, store) = gateway_over(channel, recipients.clone());

        let report = gateway.broadcast(recipients, "maintenance tonight").await;

        assert_eq!(
            report,
            BroadcastReport {
                sent: 2,
                failed: 1,
                deactivated: 1,
            }
        );
        assert!(!store.peek(SubscriberId(2)).unwrap().enabled);
        assert!(store.peek(SubscriberId(3)).unwrap().enabled);
    }
}
