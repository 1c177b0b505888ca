//! Core alert data model for Vigil.
//!
//! `vigil-model` provides the leaf types shared by the Vigil alert routing
//! engine and by anything that produces or consumes alerts:
//!
//! - [`LabelSet`]: an ordered label mapping with a deterministic fingerprint
//! - [`Alert`]: a firing or resolved alert event keyed by its label set
//! - [`AlertSeverity`]: the severity ladder parsed from the `severity` label
//! - [`Matcher`]: label predicates (equality, regex, existence) used by
//!   routes, inhibition rules, and silences
//!
//! An alert's identity is its label set and nothing else: two reports with
//! the same labels are the same alert, regardless of annotations or
//! timestamps.
//!
//! # Example
//!
//! ```rust
//! use vigil_model::{Alert, LabelSet, Matcher};
//!
//! let labels = LabelSet::from_iter([("alertname", "HighCPU"), ("node", "node-1")]);
//! let alert = Alert::firing(labels, Default::default());
//!
//! let matcher = Matcher::equals("alertname", "HighCPU");
//! assert!(matcher.matches(alert.labels()));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod alert;
pub mod error;
pub mod labels;
pub mod matcher;

// Re-export main types at crate root
pub use alert::{Alert, AlertSeverity, AlertStatus};
pub use error::{ModelError, Result};
pub use labels::{Fingerprint, LabelSet};
pub use matcher::Matcher;
