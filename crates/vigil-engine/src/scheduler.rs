//! Per-group flush timers.
//!
//! The scheduler owns one timer per `(group, receiver)` pair and a channel
//! the engine's flush worker drains. Timers never evaluate anything
//! themselves; they only emit [`FlushSignal`]s, so all notification policy
//! lives in one place.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::config::{RouteTimings, RuleSet};
use crate::store::GroupKey;

/// Why a group is being flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// The initial wait after the group first materialized elapsed.
    GroupWait,
    /// The update interval after a change elapsed.
    GroupInterval,
    /// The repeat interval for an unchanged group elapsed.
    Repeat,
}

/// A request to evaluate one group for notification.
#[derive(Debug, Clone)]
pub struct FlushSignal {
    /// The group to evaluate.
    pub group: GroupKey,
    /// The receiver the group is routed to.
    pub receiver: String,
    /// What the timer was armed for.
    pub reason: FlushReason,
}

/// Snapshot handed to the flush worker when a flush begins.
#[derive(Debug)]
pub struct FlushContext {
    /// Timing parameters captured when the group last changed.
    pub timings: RouteTimings,
    /// Configuration snapshot captured when the group last changed.
    ///
    /// In-flight work keeps the snapshot it started with, so a reload never
    /// mixes two configurations within one flush.
    pub rules: Arc<RuleSet>,
    /// Whether an initial firing notification has gone out for this pair.
    pub sent_initial: bool,
}

#[derive(Debug)]
struct GroupEntry {
    timings: RouteTimings,
    rules: Arc<RuleSet>,
    timer: Option<JoinHandle<()>>,
    armed: Option<FlushReason>,
    in_flight: bool,
    dirty: bool,
    sent_initial: bool,
}

impl GroupEntry {
    fn abort_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.armed = None;
    }
}

/// Arms and tracks flush timers per `(group, receiver)` pair.
///
/// Timer tasks are spawned onto the runtime captured at construction, so
/// every other method may be called from any thread.
#[derive(Debug)]
pub struct NotificationScheduler {
    tx: mpsc::UnboundedSender<FlushSignal>,
    runtime: tokio::runtime::Handle,
    entries: Mutex<HashMap<(GroupKey, String), GroupEntry>>,
}

impl NotificationScheduler {
    /// Creates a scheduler and the channel its signals arrive on.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime; the scheduler captures the
    /// current runtime handle for its timer tasks.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FlushSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                runtime: tokio::runtime::Handle::current(),
                entries: Mutex::new(HashMap::new()),
            },
            rx,
        )
    }

    /// Records that a group's membership changed.
    ///
    /// A brand new pair arms the group wait timer. While a wait or update
    /// timer is already armed, further changes collapse into it. A pending
    /// repeat timer is replaced by an update timer so a change is never
    /// delayed by the repeat interval. Changes during an in-flight send are
    /// remembered and re-evaluated when the send finishes.
    pub fn group_changed(
        &self,
        group: &GroupKey,
        receiver: &str,
        timings: &RouteTimings,
        rules: &Arc<RuleSet>,
    ) {
        let key = (group.clone(), receiver.to_string());
        let mut entries = self.entries.lock();

        match entries.get_mut(&key) {
            None => {
                let mut entry = GroupEntry {
                    timings: timings.clone(),
                    rules: Arc::clone(rules),
                    timer: None,
                    armed: None,
                    in_flight: false,
                    dirty: false,
                    sent_initial: false,
                };
                let delay = timings.group_wait;
                self.arm(&mut entry, group, receiver, FlushReason::GroupWait, delay);
                entries.insert(key, entry);
            }
            Some(entry) => {
                entry.timings = timings.clone();
                entry.rules = Arc::clone(rules);
                if entry.in_flight {
                    entry.dirty = true;
                    return;
                }
                match entry.armed {
                    Some(FlushReason::GroupWait) | Some(FlushReason::GroupInterval) => {
                        // Burst collapse: the armed timer already covers
                        // this change.
                    }
                    Some(FlushReason::Repeat) | None => {
                        entry.abort_timer();
                        let delay = entry.timings.group_interval;
                        self.arm(entry, group, receiver, FlushReason::GroupInterval, delay);
                    }
                }
            }
        }
    }

    /// Starts handling a flush signal.
    ///
    /// Returns the context the flush should run against, or `None` if the
    /// pair is unknown or a send is already in flight. In the in-flight
    /// case the change is remembered for re-evaluation.
    #[must_use]
    pub fn begin_flush(&self, group: &GroupKey, receiver: &str) -> Option<FlushContext> {
        let key = (group.clone(), receiver.to_string());
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(&key)?;
        entry.abort_timer();
        if entry.in_flight {
            entry.dirty = true;
            return None;
        }
        Some(FlushContext {
            timings: entry.timings.clone(),
            rules: Arc::clone(&entry.rules),
            sent_initial: entry.sent_initial,
        })
    }

    /// Marks the pair as having a send in flight.
    pub fn begin_send(&self, group: &GroupKey, receiver: &str) {
        let key = (group.clone(), receiver.to_string());
        if let Some(entry) = self.entries.lock().get_mut(&key) {
            entry.in_flight = true;
        }
    }

    /// Completes a send.
    ///
    /// Returns true if the group changed while the send was in flight, in
    /// which case the caller re-signals instead of waiting out a timer.
    /// Otherwise, `rearm_repeat` arms the repeat timer.
    pub fn finish_send(
        &self,
        group: &GroupKey,
        receiver: &str,
        mark_initial: bool,
        rearm_repeat: Option<Duration>,
    ) -> bool {
        let key = (group.clone(), receiver.to_string());
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(&key) else {
            return false;
        };
        entry.in_flight = false;
        if mark_initial {
            entry.sent_initial = true;
        }
        let dirty = std::mem::take(&mut entry.dirty);
        if !dirty {
            if let Some(delay) = rearm_repeat {
                entry.abort_timer();
                self.arm(entry, group, receiver, FlushReason::Repeat, delay);
            }
        }
        dirty
    }

    /// Arms an update-reason timer, used to re-check a group that was
    /// evaluated but produced nothing to send.
    pub fn arm_recheck(&self, group: &GroupKey, receiver: &str, delay: Duration) {
        let key = (group.clone(), receiver.to_string());
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&key) {
            if entry.armed.is_none() && !entry.in_flight {
                self.arm(entry, group, receiver, FlushReason::GroupInterval, delay);
            }
        }
    }

    /// Emits a flush signal immediately, bypassing timers. Used to
    /// re-evaluate a group that changed while a send was in flight.
    pub fn signal(&self, group: &GroupKey, receiver: &str, reason: FlushReason) {
        let _ = self.tx.send(FlushSignal {
            group: group.clone(),
            receiver: receiver.to_string(),
            reason,
        });
    }

    /// Re-arms the update timer for every receiver tracking a group.
    ///
    /// Used when group members change outside ingestion, e.g. when the
    /// expiry sweep resolves a stale alert.
    pub fn touch(&self, group: &GroupKey) {
        let mut entries = self.entries.lock();
        for ((g, receiver), entry) in entries.iter_mut() {
            if g != group {
                continue;
            }
            if entry.in_flight {
                entry.dirty = true;
                continue;
            }
            match entry.armed {
                Some(FlushReason::GroupWait) | Some(FlushReason::GroupInterval) => {}
                Some(FlushReason::Repeat) | None => {
                    entry.abort_timer();
                    let delay = entry.timings.group_interval;
                    let receiver = receiver.clone();
                    self.arm(entry, group, &receiver, FlushReason::GroupInterval, delay);
                }
            }
        }
    }

    /// Drops the pair, cancelling any pending timer.
    pub fn remove(&self, group: &GroupKey, receiver: &str) {
        let key = (group.clone(), receiver.to_string());
        if let Some(mut entry) = self.entries.lock().remove(&key) {
            entry.abort_timer();
            trace!(group = %group, receiver, "scheduler entry removed");
        }
    }

    /// Returns true if the pair is tracked.
    #[must_use]
    pub fn has_entry(&self, group: &GroupKey, receiver: &str) -> bool {
        self.entries
            .lock()
            .contains_key(&(group.clone(), receiver.to_string()))
    }

    /// Returns true if any receiver entry exists for the group.
    #[must_use]
    pub fn has_group(&self, group: &GroupKey) -> bool {
        self.entries.lock().keys().any(|(g, _)| g == group)
    }

    /// Cancels every pending timer.
    pub fn shutdown(&self) {
        let mut entries = self.entries.lock();
        for entry in entries.values_mut() {
            entry.abort_timer();
        }
    }

    fn arm(
        &self,
        entry: &mut GroupEntry,
        group: &GroupKey,
        receiver: &str,
        reason: FlushReason,
        delay: Duration,
    ) {
        let signal = FlushSignal {
            group: group.clone(),
            receiver: receiver.to_string(),
            reason,
        };
        let tx = self.tx.clone();
        entry.armed = Some(reason);
        entry.timer = Some(self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(signal);
        }));
        trace!(group = %group, receiver, ?reason, delay_ms = delay.as_millis() as u64, "timer armed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::time::timeout;
    use vigil_model::LabelSet;

    use crate::config::{Receiver, Route};
    use crate::notify::LogNotifier;

    fn rules() -> Arc<RuleSet> {
        let route = Route::builder().receiver("ops").build();
        let receivers = vec![Receiver::new("ops").with_notifier(LogNotifier::default())];
        Arc::new(RuleSet::new(route, Vec::new(), receivers).unwrap())
    }

    fn timings(wait_ms: u64, interval_ms: u64) -> RouteTimings {
        RouteTimings {
            group_wait: Duration::from_millis(wait_ms),
            group_interval: Duration::from_millis(interval_ms),
            repeat_interval: Duration::from_secs(3600),
            repeat_overrides: HashMap::new(),
        }
    }

    fn key() -> GroupKey {
        let labels: LabelSet = [("alertname", "HighCPU")].into_iter().collect();
        GroupKey::derive(&["alertname".to_string()], &labels)
    }

    async fn expect_signal(
        rx: &mut mpsc::UnboundedReceiver<FlushSignal>,
        within: Duration,
    ) -> FlushSignal {
        timeout(within, rx.recv())
            .await
            .expect("timer should fire")
            .expect("channel open")
    }

    #[tokio::test]
    async fn new_group_fires_group_wait() {
        let (scheduler, mut rx) = NotificationScheduler::new();
        let key = key();

        scheduler.group_changed(&key, "ops", &timings(20, 50), &rules());

        let signal = expect_signal(&mut rx, Duration::from_millis(500)).await;
        assert_eq!(signal.reason, FlushReason::GroupWait);
        assert_eq!(signal.group, key);
        assert_eq!(signal.receiver, "ops");
    }

    #[tokio::test]
    async fn burst_collapses_into_one_signal() {
        let (scheduler, mut rx) = NotificationScheduler::new();
        let key = key();
        let t = timings(30, 50);
        let rules = rules();

        scheduler.group_changed(&key, "ops", &t, &rules);
        scheduler.group_changed(&key, "ops", &t, &rules);
        scheduler.group_changed(&key, "ops", &t, &rules);

        let _ = expect_signal(&mut rx, Duration::from_millis(500)).await;
        let second = timeout(Duration::from_millis(150), rx.recv()).await;
        assert!(second.is_err(), "only one signal per armed timer");
    }

    #[tokio::test]
    async fn change_after_flush_arms_group_interval() {
        let (scheduler, mut rx) = NotificationScheduler::new();
        let key = key();
        let t = timings(10, 30);
        let rules = rules();

        scheduler.group_changed(&key, "ops", &t, &rules);
        let _ = expect_signal(&mut rx, Duration::from_millis(500)).await;
        assert!(scheduler.begin_flush(&key, "ops").is_some());

        scheduler.group_changed(&key, "ops", &t, &rules);
        let signal = expect_signal(&mut rx, Duration::from_millis(500)).await;
        assert_eq!(signal.reason, FlushReason::GroupInterval);
    }

    #[tokio::test]
    async fn change_preempts_repeat_timer() {
        let (scheduler, mut rx) = NotificationScheduler::new();
        let key = key();
        let t = timings(10, 30);
        let rules = rules();

        scheduler.group_changed(&key, "ops", &t, &rules);
        let _ = expect_signal(&mut rx, Duration::from_millis(500)).await;
        assert!(scheduler.begin_flush(&key, "ops").is_some());

        // A repeat far in the future; the change must not wait for it.
        scheduler.begin_send(&key, "ops");
        let dirty = scheduler.finish_send(&key, "ops", true, Some(Duration::from_secs(3600)));
        assert!(!dirty);

        scheduler.group_changed(&key, "ops", &t, &rules);
        let signal = expect_signal(&mut rx, Duration::from_millis(500)).await;
        assert_eq!(signal.reason, FlushReason::GroupInterval);
    }

    #[tokio::test]
    async fn change_during_send_is_remembered() {
        let (scheduler, mut rx) = NotificationScheduler::new();
        let key = key();
        let t = timings(10, 20);
        let rules = rules();

        scheduler.group_changed(&key, "ops", &t, &rules);
        let _ = expect_signal(&mut rx, Duration::from_millis(500)).await;
        let ctx = scheduler.begin_flush(&key, "ops").unwrap();
        assert!(!ctx.sent_initial);

        scheduler.begin_send(&key, "ops");
        scheduler.group_changed(&key, "ops", &t, &rules);

        let dirty = scheduler.finish_send(&key, "ops", true, Some(Duration::from_secs(3600)));
        assert!(dirty, "change during send must be reported");
    }

    #[tokio::test]
    async fn flush_during_send_returns_none_and_marks_dirty() {
        let (scheduler, mut rx) = NotificationScheduler::new();
        let key = key();
        let t = timings(10, 20);
        let rules = rules();

        scheduler.group_changed(&key, "ops", &t, &rules);
        let _ = expect_signal(&mut rx, Duration::from_millis(500)).await;
        assert!(scheduler.begin_flush(&key, "ops").is_some());
        scheduler.begin_send(&key, "ops");

        assert!(scheduler.begin_flush(&key, "ops").is_none());
        assert!(scheduler.finish_send(&key, "ops", true, None));
    }

    #[tokio::test]
    async fn sent_initial_is_sticky() {
        let (scheduler, mut rx) = NotificationScheduler::new();
        let key = key();
        let t = timings(10, 20);
        let rules = rules();

        scheduler.group_changed(&key, "ops", &t, &rules);
        let _ = expect_signal(&mut rx, Duration::from_millis(500)).await;
        assert!(scheduler.begin_flush(&key, "ops").is_some());
        scheduler.begin_send(&key, "ops");
        scheduler.finish_send(&key, "ops", true, None);

        scheduler.group_changed(&key, "ops", &t, &rules);
        let _ = expect_signal(&mut rx, Duration::from_millis(500)).await;
        let ctx = scheduler.begin_flush(&key, "ops").unwrap();
        assert!(ctx.sent_initial);
    }

    #[tokio::test]
    async fn remove_cancels_pending_timer() {
        let (scheduler, mut rx) = NotificationScheduler::new();
        let key = key();

        scheduler.group_changed(&key, "ops", &timings(30, 50), &rules());
        scheduler.remove(&key, "ops");
        assert!(!scheduler.has_entry(&key, "ops"));

        let fired = timeout(Duration::from_millis(150), rx.recv()).await;
        assert!(fired.is_err(), "cancelled timer must not fire");
    }

    #[tokio::test]
    async fn receivers_are_independent() {
        let (scheduler, mut rx) = NotificationScheduler::new();
        let key = key();
        let rules = rules();

        scheduler.group_changed(&key, "ops", &timings(10, 50), &rules);
        scheduler.group_changed(&key, "pager", &timings(40, 50), &rules);

        let first = expect_signal(&mut rx, Duration::from_millis(500)).await;
        let second = expect_signal(&mut rx, Duration::from_millis(500)).await;
        assert_eq!(first.receiver, "ops");
        assert_eq!(second.receiver, "pager");
    }

    #[tokio::test]
    async fn arm_recheck_fires_once() {
        let (scheduler, mut rx) = NotificationScheduler::new();
        let key = key();
        let rules = rules();

        scheduler.group_changed(&key, "ops", &timings(10, 50), &rules);
        let _ = expect_signal(&mut rx, Duration::from_millis(500)).await;
        assert!(scheduler.begin_flush(&key, "ops").is_some());

        scheduler.arm_recheck(&key, "ops", Duration::from_millis(20));
        let signal = expect_signal(&mut rx, Duration::from_millis(500)).await;
        assert_eq!(signal.reason, FlushReason::GroupInterval);
    }
}
