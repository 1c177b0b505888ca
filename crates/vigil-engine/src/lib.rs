//! Alert routing, grouping, inhibition, and notification dispatch.
//!
//! The engine accepts batches of alert events, deduplicates them by label
//! fingerprint, routes them through a matcher tree to receivers, groups them
//! by label projection, and flushes each group to its receiver's notifiers
//! on group-wait / group-interval / repeat-interval timers. Silences and
//! inhibition rules suppress delivery without ever touching storage.
//!
//! # Example
//!
//! ```
//! use std::collections::HashMap;
//! use chrono::Utc;
//! use vigil_engine::{
//!     AlertEvent, AlertStatus, Engine, LogNotifier, Receiver, Route, RuleSet,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let route = Route::builder()
//!         .receiver("ops")
//!         .group_by(["alertname"])
//!         .build();
//!     let receivers = vec![Receiver::new("ops").with_notifier(LogNotifier::default())];
//!     let rules = RuleSet::new(route, Vec::new(), receivers)?;
//!
//!     let engine = Engine::new(rules)?;
//!     let report = engine.ingest(&[AlertEvent {
//!         labels: [("alertname", "HighCPU")].into_iter().collect(),
//!         annotations: HashMap::new(),
//!         starts_at: Utc::now(),
//!         ends_at: None,
//!         status: AlertStatus::Firing,
//!     }])?;
//!     assert_eq!(report.fired, 1);
//!
//!     engine.shutdown();
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod inhibit;
pub mod notify;
pub mod route;
pub mod scheduler;
pub mod silence;
pub mod store;

pub use config::{InhibitRule, Receiver, Route, RouteBuilder, RouteTimings, RuleSet};
pub use dispatch::{DeliveryReport, Dispatcher, NotificationLog, RetryPolicy};
pub use engine::{Engine, EngineConfig, EngineStats};
pub use error::{EngineError, Result};
pub use ingest::{AlertEvent, IngestReport};
pub use inhibit::InhibitionEngine;
pub use notify::{
    DeliveryOutcome, LogNotifier, NotificationStatus, Notifier, RenderedNotification,
    WebhookConfig, WebhookNotifier, WebhookPayload,
};
pub use route::RouteMatch;
pub use scheduler::{FlushReason, FlushSignal, NotificationScheduler};
pub use silence::{Silence, SilenceSet};
pub use store::{AlertStore, GroupKey};

pub use vigil_model::{Alert, AlertSeverity, AlertStatus, Fingerprint, LabelSet, Matcher};
