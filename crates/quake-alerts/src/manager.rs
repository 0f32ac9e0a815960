//! Message lifecycle manager
//!
//! Decides, per (entity, subscriber) pair, whether to create a message,
//! edit the one already sent, or do nothing.
//!
//! # Per-pair states
//!
//! ```text
//! NOT_NOTIFIED --create ok--> NOTIFIED --changed & eligible--> NOTIFIED (edited)
//!                                 |
//!                                 +--archive / eviction--> EVICTED
//! ```
//!
//! A subscriber who stops being eligible keeps the last message as it was;
//! nothing is retracted. All work for one entity runs under that entity's
//! lock, so the tracking record has a single writer.

use crate::error::{EngineError, EngineResult};
use crate::render::Renderer;
use futures::stream::{self, StreamExt};
use quake_delivery::{DeliveryError, DeliveryGateway};
use quake_model::{MessageHandle, Notifiable, Subscriber, SubscriberId};
use quake_subscribers::{SubscriberCache, SubscriberFilter};
use quake_tracking::{EntityLocks, TrackingCache, TrackingRecord, TrackingStats};
use std::fmt;
use std::sync::Arc;

/// What an evaluation did with the snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Entity was archived earlier; snapshot dropped
    Archived,
    /// Tracked and content unchanged; no network calls made
    Unchanged,
    /// Subscribers were evaluated
    FannedOut,
}

/// Outcome of one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationReport {
    /// What happened to the snapshot
    pub disposition: Disposition,
    /// Messages created
    pub created: usize,
    /// Messages edited
    pub edited: usize,
    /// Deliveries that failed (transient or permanent)
    pub failed: usize,
    /// Deliveries skipped because rendering failed
    pub render_failures: usize,
    /// Whether a tracking record exists after the evaluation
    pub tracked: bool,
}

impl EvaluationReport {
    fn new(disposition: Disposition, tracked: bool) -> Self {
        Self {
            disposition,
            created: 0,
            edited: 0,
            failed: 0,
            render_failures: 0,
            tracked,
        }
    }
}

enum Action {
    Create,
    Edit(MessageHandle),
}

enum Outcome {
    Created(SubscriberId, MessageHandle),
    Edited,
    Failed,
    RenderFailed,
}

/// Create-vs-edit orchestration for one entity kind
pub struct MessageLifecycleManager<N: Notifiable> {
    tracking: Arc<TrackingCache<N>>,
    locks: EntityLocks<N::Id>,
    subscribers: SubscriberCache,
    gateway: Arc<DeliveryGateway>,
    renderer: Arc<dyn Renderer>,
}

impl<N: Notifiable> MessageLifecycleManager<N> {
    /// Create manager
    #[must_use]
    pub fn new(
        tracking: Arc<TrackingCache<N>>,
        subscribers: SubscriberCache,
        gateway: Arc<DeliveryGateway>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        Self {
            tracking,
            locks: EntityLocks::new(),
            subscribers,
            gateway,
            renderer,
        }
    }

    /// Tracking cache for this kind
    #[inline]
    #[must_use]
    pub fn tracking(&self) -> &Arc<TrackingCache<N>> {
        &self.tracking
    }

    /// Tracking counters for this kind
    #[must_use]
    pub fn stats(&self) -> TrackingStats {
        self.tracking.stats()
    }

    /// Evaluate a fresh snapshot of an entity
    ///
    /// Untracked entities fan out to every eligible subscriber and start a
    /// record if any delivery succeeded. Tracked entities whose content
    /// changed get edits for eligible subscribers already notified and
    /// creates for newly eligible ones.
    ///
    /// # Errors
    ///
    /// Fails only when the subscriber list cannot be loaded; the fan-out is
    /// skipped and the record left untouched.
    pub async fn evaluate(&self, snapshot: N) -> EngineResult<EvaluationReport> {
        let id = snapshot.id();
        if self.tracking.is_archived(&id) {
            tracing::debug!(kind = %N::KIND, entity = %id, "Dropping update for archived entity");
            return Ok(EvaluationReport::new(Disposition::Archived, false));
        }

        let _guard = self.locks.lock(&id).await;
        // Archive may have won the lock race
        if self.tracking.is_archived(&id) {
            tracing::debug!(kind = %N::KIND, entity = %id, "Dropping update for archived entity");
            return Ok(EvaluationReport::new(Disposition::Archived, false));
        }

        let report = match self.tracking.get(&id) {
            Some(mut record) => {
                if !record.is_changed(&snapshot) {
                    record.replace_snapshot(snapshot);
                    self.tracking.put(record);
                    tracing::debug!(kind = %N::KIND, entity = %id, "Content unchanged");
                    return Ok(EvaluationReport::new(Disposition::Unchanged, true));
                }
                let FanOut(report, _) = self.fan_out(&snapshot, Some(&mut record)).await?;
                record.replace_snapshot(snapshot);
                self.tracking.put(record);
                report
            }
            None => {
                let FanOut(mut report, created) = self.fan_out(&snapshot, None).await?;
                if let Some(record) = TrackingRecord::from_deliveries(snapshot, created) {
                    self.tracking.put(record);
                    report.tracked = true;
                }
                report
            }
        };

        tracing::info!(
            kind = %N::KIND,
            entity = %id,
            created = report.created,
            edited = report.edited,
            failed = report.failed,
            tracked = report.tracked,
            "Entity evaluated"
        );
        Ok(report)
    }

    /// Archive an entity: evict its record and drop later updates
    ///
    /// Earthquakes also leave a summary in the subscriber store's history.
    /// Returns the evicted record, if the entity was tracked.
    pub async fn archive(&self, snapshot: N) -> Option<TrackingRecord<N>> {
        let id = snapshot.id();
        let _guard = self.locks.lock(&id).await;
        let removed = self.tracking.archive(&id);

        if let Some(summary) = snapshot.archive_summary() {
            if let Err(e) = self.subscribers.record_archived(summary).await {
                tracing::error!(kind = %N::KIND, entity = %id, error = %e, "Failed to record archived entity");
            }
        }
        tracing::info!(
            kind = %N::KIND,
            entity = %id,
            deliveries = removed.as_ref().map_or(0, TrackingRecord::delivery_count),
            "Entity archived"
        );
        removed
    }

    /// Evaluate every subscriber of this kind against `snapshot`
    ///
    /// With a record, delivered and still eligible subscribers are edited;
    /// otherwise only creates happen. Successful creates are registered on
    /// the record, or returned when there is none yet.
    async fn fan_out(
        &self,
        snapshot: &N,
        mut record: Option<&mut TrackingRecord<N>>,
    ) -> EngineResult<FanOut> {
        let candidates = self
            .subscribers
            .list(SubscriberFilter::Wants(N::KIND))
            .await
            .map_err(|e| {
                tracing::error!(kind = %N::KIND, entity = %snapshot.id(), error = %e, "Subscriber list unavailable, fan-out skipped");
                EngineError::from(e)
            })?;

        let work: Vec<(Subscriber, Action)> = candidates
            .into_iter()
            .filter(|subscriber| snapshot.eligible(subscriber))
            .map(|subscriber| {
                let action = match record.as_deref().and_then(|r| r.handle(subscriber.id)) {
                    Some(handle) => Action::Edit(handle),
                    None => Action::Create,
                };
                (subscriber, action)
            })
            .collect();

        let concurrency = self.gateway.config().fan_out_concurrency.max(1);
        let outcomes: Vec<Outcome> = stream::iter(work)
            .map(|(subscriber, action)| self.deliver(snapshot, subscriber, action))
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut report = EvaluationReport::new(Disposition::FannedOut, record.is_some());
        let mut created = Vec::new();
        for outcome in outcomes {
            match outcome {
                Outcome::Created(subscriber, handle) => {
                    report.created += 1;
                    match record.as_deref_mut() {
                        Some(record) => {
                            record.record_delivery(subscriber, handle);
                        }
                        None => created.push((subscriber, handle)),
                    }
                }
                Outcome::Edited => report.edited += 1,
                Outcome::Failed => report.failed += 1,
                Outcome::RenderFailed => report.render_failures += 1,
            }
        }
        Ok(FanOut(report, created))
    }

    async fn deliver(&self, snapshot: &N, subscriber: Subscriber, action: Action) -> Outcome {
        let message = match self.renderer.render(snapshot.view(), &subscriber) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(
                    kind = %N::KIND,
                    entity = %snapshot.id(),
                    subscriber = %subscriber.id,
                    error = %e,
                    "Render failed, delivery skipped"
                );
                return Outcome::RenderFailed;
            }
        };

        let result: Result<Outcome, DeliveryError> = match action {
            Action::Create => self
                .gateway
                .create(&subscriber, &message)
                .await
                .map(|handle| Outcome::Created(subscriber.id, handle)),
            Action::Edit(handle) => self
                .gateway
                .edit(&subscriber, handle, &message.text)
                .await
                .map(|()| Outcome::Edited),
        };
        result.unwrap_or(Outcome::Failed)
    }
}

struct FanOut(EvaluationReport, Vec<(SubscriberId, MessageHandle)>);

impl<N: Notifiable> fmt::Debug for MessageLifecycleManager<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageLifecycleManager")
            .field("kind", &N::KIND)
            .field("tracking", &self.tracking)
            .finish_non_exhaustive()
    }
}
