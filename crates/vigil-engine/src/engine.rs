//! The alert engine: ingestion, flush evaluation, and lifecycle wiring.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vigil_model::Alert;

use crate::config::RuleSet;
use crate::dispatch::{Dispatcher, NotificationLog, RetryPolicy, alert_set_hash};
use crate::error::Result;
use crate::ingest::{AlertEvent, IngestReport, validate_batch};
use crate::inhibit::InhibitionEngine;
use crate::notify::{NotificationStatus, RenderedNotification};
use crate::scheduler::{FlushContext, FlushReason, FlushSignal, NotificationScheduler};
use crate::silence::{Silence, SilenceSet};
use crate::store::{AlertStore, GroupKey};

/// Tunables for the engine itself, as opposed to per-route timings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long resolved alerts stay queryable before garbage collection.
    pub resolved_retention: Duration,
    /// How often the background sweep runs.
    pub sweep_interval: Duration,
    /// Whether resolution notices are sent at all.
    pub notify_on_resolve: bool,
    /// Backoff parameters for transient delivery failures.
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            resolved_retention: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(30),
            notify_on_resolve: true,
            retry: RetryPolicy::default(),
        }
    }
}

/// A snapshot of the engine's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Alerts that matched no route.
    pub routing_misses: u64,
    /// Notifications with at least one successful delivery.
    pub notifications_sent: u64,
    /// Notifier delivery failures, permanent or exhausted.
    pub notifications_failed: u64,
    /// Ingestion batches rejected by validation.
    pub batches_rejected: u64,
}

#[derive(Debug, Default)]
struct Counters {
    routing_misses: AtomicU64,
    notifications_sent: AtomicU64,
    notifications_failed: AtomicU64,
    batches_rejected: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> EngineStats {
        EngineStats {
            routing_misses: self.routing_misses.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            notifications_failed: self.notifications_failed.load(Ordering::Relaxed),
            batches_rejected: self.batches_rejected.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
struct EngineInner {
    config: EngineConfig,
    store: AlertStore,
    scheduler: NotificationScheduler,
    dispatcher: Dispatcher,
    log: NotificationLog,
    silences: SilenceSet,
    rules: RwLock<Arc<RuleSet>>,
    counters: Counters,
}

/// The alert routing and notification engine.
///
/// Owns the store, the per-group timers, and two background tasks: a flush
/// worker draining the scheduler's channel and a periodic sweep for expiry,
/// silence pruning, and garbage collection. Must be created inside a tokio
/// runtime.
#[derive(Debug)]
pub struct Engine {
    inner: Arc<EngineInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Creates an engine with default tunables.
    ///
    /// # Errors
    ///
    /// Returns an error if the rule set fails validation.
    pub fn new(rules: RuleSet) -> Result<Self> {
        Self::with_config(rules, EngineConfig::default())
    }

    /// Creates an engine with explicit tunables.
    ///
    /// # Errors
    ///
    /// Returns an error if the rule set fails validation.
    pub fn with_config(rules: RuleSet, config: EngineConfig) -> Result<Self> {
        rules.validate()?;

        let (scheduler, mut rx) = NotificationScheduler::new();
        let inner = Arc::new(EngineInner {
            store: AlertStore::new(config.resolved_retention),
            scheduler,
            dispatcher: Dispatcher::new(config.retry.clone()),
            log: NotificationLog::new(),
            silences: SilenceSet::new(),
            rules: RwLock::new(Arc::new(rules)),
            counters: Counters::default(),
            config,
        });

        let flush_inner = Arc::clone(&inner);
        let worker = tokio::spawn(async move {
            while let Some(signal) = rx.recv().await {
                flush_inner.handle_flush(&signal);
            }
        });

        let sweep_inner = Arc::clone(&inner);
        let sweep_interval = sweep_inner.config.sweep_interval;
        let sweeper = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                sweep_inner.sweep();
            }
        });

        info!("alert engine started");
        Ok(Self {
            inner,
            worker: Mutex::new(Some(worker)),
            sweeper: Mutex::new(Some(sweeper)),
        })
    }

    /// Ingests a batch of alert events.
    ///
    /// The batch applies atomically: any invalid event rejects the whole
    /// batch without touching the store. Safe to call from any thread;
    /// flush timers are spawned onto the runtime the engine was created in.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::InvalidBatch`] naming the first
    /// offending event.
    pub fn ingest(&self, events: &[AlertEvent]) -> Result<IngestReport> {
        if let Err(e) = validate_batch(events) {
            self.inner
                .counters
                .batches_rejected
                .fetch_add(1, Ordering::Relaxed);
            return Err(e);
        }

        let rules = Arc::clone(&self.inner.rules.read());
        let mut report = IngestReport::default();

        for event in events {
            let alert = event.clone().into_alert();
            if alert.is_firing() {
                report.fired += 1;
            } else {
                report.resolved += 1;
            }

            let fingerprint = alert.fingerprint();
            let labels = alert.labels().clone();
            let matches = rules.route.match_alert(&labels);

            self.inner.store.upsert(alert);
            report.accepted += 1;

            if matches.is_empty() {
                warn!(labels = %labels, "alert matched no route");
                self.inner
                    .counters
                    .routing_misses
                    .fetch_add(1, Ordering::Relaxed);
                report.routing_misses += 1;
                continue;
            }

            for route_match in &matches {
                let group = GroupKey::derive(&route_match.group_by, &labels);
                self.inner.store.assign_group(&group, fingerprint);
                self.inner.scheduler.group_changed(
                    &group,
                    &route_match.receiver,
                    &route_match.timings,
                    &rules,
                );
            }
        }

        debug!(
            accepted = report.accepted,
            fired = report.fired,
            resolved = report.resolved,
            "batch ingested"
        );
        Ok(report)
    }

    /// Replaces the rule set atomically.
    ///
    /// In-flight flushes keep the snapshot they started with; new flushes
    /// and new group changes see the new configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the new rule set fails validation; the old
    /// configuration stays installed.
    pub fn reload(&self, rules: RuleSet) -> Result<()> {
        rules.validate()?;
        *self.inner.rules.write() = Arc::new(rules);
        info!("rule set reloaded");
        Ok(())
    }

    /// Adds a silence, returning its id.
    pub fn add_silence(&self, silence: Silence) -> Uuid {
        self.inner.silences.add(silence)
    }

    /// Removes a silence by id. Returns true if it existed.
    pub fn remove_silence(&self, id: Uuid) -> bool {
        self.inner.silences.remove(id)
    }

    /// Returns every silence, active or not.
    #[must_use]
    pub fn list_silences(&self) -> Vec<Silence> {
        self.inner.silences.list()
    }

    /// Returns a snapshot of every currently firing alert.
    #[must_use]
    pub fn firing_alerts(&self) -> Vec<Alert> {
        self.inner.store.firing_snapshot()
    }

    /// Returns the engine counters.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        self.inner.counters.snapshot()
    }

    /// Runs one sweep immediately: expire stale firing alerts, prune
    /// silences, garbage collect resolved alerts.
    pub fn sweep(&self) {
        self.inner.sweep();
    }

    /// Stops the background tasks and cancels all pending timers.
    pub fn shutdown(&self) {
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }
        self.inner.scheduler.shutdown();
        info!("alert engine stopped");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl EngineInner {
    fn sweep(&self) {
        let now = Utc::now();
        let expired = self.store.expire_stale(now);
        if !expired.is_empty() {
            for group in self.store.groups_containing(&expired) {
                self.scheduler.touch(&group);
            }
        }
        self.silences.prune(now);
        self.store.gc(now);
    }

    fn handle_flush(self: &Arc<Self>, signal: &FlushSignal) {
        let Some(ctx) = self.scheduler.begin_flush(&signal.group, &signal.receiver) else {
            return;
        };

        let members = self.store.group_members(&signal.group);
        if members.is_empty() {
            self.retire_pair(&signal.group, &signal.receiver);
            return;
        }

        let now = Utc::now();
        if members.iter().all(|a| !a.is_firing()) {
            let already_notified = self
                .log
                .get(&signal.group, &signal.receiver)
                .is_some_and(|r| r.last_resolved_sent_at.is_some());
            if !ctx.sent_initial || !self.config.notify_on_resolve || already_notified {
                self.retire_pair(&signal.group, &signal.receiver);
                return;
            }
            self.spawn_send(signal, ctx, NotificationStatus::Resolved, members, 0);
            return;
        }

        // Silences and inhibition are applied here, at notification time, so
        // a lifted suppression needs no replay of stored alerts.
        let active = self.store.firing_snapshot();
        let inhibitor = InhibitionEngine::new(&ctx.rules.inhibit_rules);
        let mut payload = Vec::with_capacity(members.len());
        let mut suppressed = 0usize;
        for alert in members {
            if alert.is_firing()
                && (self.silences.is_silenced(alert.labels(), now)
                    || inhibitor.is_inhibited(&alert, &active))
            {
                suppressed += 1;
                continue;
            }
            payload.push(alert);
        }

        if !payload.iter().any(Alert::is_firing) {
            // Everything firing is suppressed right now. The suppression may
            // lift without any new event, so keep re-checking.
            debug!(group = %signal.group, suppressed, "group fully suppressed");
            self.scheduler
                .arm_recheck(&signal.group, &signal.receiver, ctx.timings.group_interval);
            return;
        }

        let hash = alert_set_hash(&payload);
        let record = self.log.get(&signal.group, &signal.receiver);
        let changed = record.as_ref().and_then(|r| r.last_sent_hash) != Some(hash);

        if !ctx.sent_initial || changed {
            self.spawn_send(signal, ctx, NotificationStatus::Firing, payload, hash);
            return;
        }

        // Unchanged group: only a due repeat goes out.
        let severity = payload
            .iter()
            .filter(|a| a.is_firing())
            .map(Alert::severity)
            .max()
            .unwrap_or_default();
        let repeat = ctx.timings.repeat_for(severity);
        let repeat_chrono =
            chrono::Duration::milliseconds(repeat.as_millis().min(i64::MAX as u128) as i64);

        match record.and_then(|r| r.last_sent_at) {
            None => self.spawn_send(signal, ctx, NotificationStatus::Firing, payload, hash),
            Some(last_sent) => {
                let elapsed = now.signed_duration_since(last_sent);
                if elapsed >= repeat_chrono {
                    self.spawn_send(signal, ctx, NotificationStatus::Firing, payload, hash);
                } else {
                    let remaining = (repeat_chrono - elapsed)
                        .to_std()
                        .unwrap_or(ctx.timings.group_interval);
                    self.scheduler
                        .arm_recheck(&signal.group, &signal.receiver, remaining);
                }
            }
        }
    }

    fn spawn_send(
        self: &Arc<Self>,
        signal: &FlushSignal,
        ctx: FlushContext,
        status: NotificationStatus,
        alerts: Vec<Alert>,
        hash: u64,
    ) {
        self.scheduler.begin_send(&signal.group, &signal.receiver);
        let inner = Arc::clone(self);
        let group = signal.group.clone();
        let receiver = signal.receiver.clone();

        tokio::spawn(async move {
            let Some(rcv) = ctx.rules.receiver(&receiver) else {
                // The receiver disappeared in a reload; nothing to deliver
                // to, and no reason to keep the pair around.
                warn!(%receiver, "receiver no longer configured, dropping group");
                inner.scheduler.finish_send(&group, &receiver, false, None);
                inner.retire_pair(&group, &receiver);
                return;
            };

            let notification = RenderedNotification::new(&group, &receiver, status, alerts);
            let report = inner.dispatcher.send(rcv, &notification).await;
            let delivered = report.any_delivered();
            let now = Utc::now();

            if delivered {
                inner
                    .counters
                    .notifications_sent
                    .fetch_add(1, Ordering::Relaxed);
                match status {
                    NotificationStatus::Firing => inner.log.record(&group, &receiver, hash, now),
                    NotificationStatus::Resolved => inner.log.record_resolved(&group, &receiver, now),
                }
            }
            if !report.failures.is_empty() {
                inner
                    .counters
                    .notifications_failed
                    .fetch_add(report.failures.len() as u64, Ordering::Relaxed);
            }

            let rearm = match (status, delivered) {
                // A failed delivery of either kind is retried at the update
                // interval; the notification log was not advanced, so the
                // next flush sends again.
                (_, false) => Some(ctx.timings.group_interval),
                (NotificationStatus::Resolved, true) => None,
                (NotificationStatus::Firing, true) => {
                    let severity = notification
                        .firing_alerts()
                        .iter()
                        .map(|a| a.severity())
                        .max()
                        .unwrap_or_default();
                    Some(ctx.timings.repeat_for(severity))
                }
            };
            let mark_initial = status == NotificationStatus::Firing && delivered;
            let dirty = inner
                .scheduler
                .finish_send(&group, &receiver, mark_initial, rearm);

            if dirty {
                inner
                    .scheduler
                    .signal(&group, &receiver, FlushReason::GroupInterval);
            } else if status == NotificationStatus::Resolved && delivered {
                inner.retire_pair(&group, &receiver);
            }
        });
    }

    /// Drops everything tracked for a `(group, receiver)` pair, clearing
    /// the store's group index once no receiver tracks the group anymore.
    fn retire_pair(&self, group: &GroupKey, receiver: &str) {
        self.scheduler.remove(group, receiver);
        self.log.forget(group, receiver);
        if !self.scheduler.has_group(group) {
            self.store.clear_group(group);
        }
    }
}
