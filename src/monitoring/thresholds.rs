// Threshold table shared by the alert evaluator, trend analyzer and recommendation engine

use crate::utils::error::{MonitorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

/// Declares the threshold struct with its defaults, and the name table used
/// for lookups and updates, from a single field list.
macro_rules! threshold_table {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $($(#[$field_meta:meta])* $field:ident = $default:expr),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        pub struct $name {
            $($(#[$field_meta])* pub $field: f64,)+
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    $($field: $default,)+
                }
            }
        }

        impl $name {
            /// Names of every threshold, in table order
            pub const NAMES: &'static [&'static str] = &[$(stringify!($field)),+];

            fn entries(&self) -> Vec<(&'static str, f64)> {
                vec![$((stringify!($field), self.$field)),+]
            }

            fn slot_mut(&mut self, name: &str) -> Option<&mut f64> {
                $(
                    if name == stringify!($field) {
                        return Some(&mut self.$field);
                    }
                )+
                None
            }
        }
    };
}

threshold_table! {
    /// Alert thresholds and recommendation targets.
    ///
    /// Alert thresholds describe a "bad" state, targets describe a "good" state.
    /// Every field is addressable by its name through [`Thresholds::to_map`] and
    /// [`Thresholds::with_updates`].
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct Thresholds {
        /// Accuracy distance (meters) above which a warning is raised
        accuracy_warning_m = 50.0,
        /// Accuracy distance (meters) above which a critical alert is raised
        accuracy_critical_m = 200.0,
        /// Confidence score below which a critical alert is raised
        confidence_critical = 0.60,
        /// Latency (milliseconds) above which a warning is raised
        latency_warning_ms = 2000.0,
        /// Latency (milliseconds) above which a critical alert is raised
        latency_critical_ms = 5000.0,
        /// Process CPU percentage above which a critical alert is raised
        cpu_critical_pct = 95.0,
        /// Process memory percentage above which a critical alert is raised
        memory_critical_pct = 95.0,
        /// Mean satisfaction below which a trend warning is raised
        satisfaction_warning = 0.80,
        /// Satisfaction below which a critical alert is raised
        satisfaction_critical = 0.70,
        /// Retry count above which a warning is raised
        retry_warning = 3.0,
        /// Target mean accuracy distance (meters)
        target_accuracy_m = 15.0,
        /// Target mean latency (milliseconds)
        target_latency_ms = 500.0,
        /// Target mean cache-hit ratio
        target_cache_hit_ratio = 0.80,
        /// Target user action success rate
        target_success_rate = 0.95,
        /// Target mean user satisfaction
        target_satisfaction = 0.85,
        /// Relative margin an aggregate must miss its target by before a recommendation is made
        recommendation_margin = 0.10,
    }
}

impl Thresholds {
    /// Look up a threshold by name
    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries()
            .into_iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
    }

    /// Flatten the table into a name → value map
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        self.entries()
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect()
    }

    /// Return a copy of this table with `updates` applied.
    ///
    /// All entries are validated first; an unknown name or a non-finite value
    /// rejects the whole update.
    pub fn with_updates(&self, updates: &BTreeMap<String, f64>) -> Result<Self> {
        let mut next = self.clone();
        for (name, value) in updates {
            if !value.is_finite() {
                return Err(MonitorError::invalid_input(format!(
                    "threshold {} must be finite, got {}",
                    name, value
                )));
            }
            match next.slot_mut(name) {
                Some(slot) => *slot = *value,
                None => {
                    return Err(MonitorError::invalid_input(format!(
                        "unknown threshold: {}",
                        name
                    )))
                }
            }
        }
        Ok(next)
    }

    /// Check every value is finite
    pub fn validate(&self) -> Result<()> {
        for (name, value) in self.to_map() {
            if !value.is_finite() {
                return Err(MonitorError::config(format!(
                    "threshold {} must be finite",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Process-wide threshold handle.
///
/// Readers clone an `Arc` under a short read lock; writers swap the whole table,
/// so an evaluation always sees one consistent version.
#[derive(Debug)]
pub struct SharedThresholds {
    current: RwLock<Arc<Thresholds>>,
}

impl SharedThresholds {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            current: RwLock::new(Arc::new(thresholds)),
        }
    }

    /// Current table
    pub fn load(&self) -> Arc<Thresholds> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Apply named updates atomically
    pub fn update(&self, updates: &BTreeMap<String, f64>) -> Result<()> {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let next = guard.with_updates(updates)?;
        *guard = Arc::new(next);
        info!(updated = updates.len(), "Thresholds updated");
        Ok(())
    }
}
