//! Tunables for the bridge.

use std::time::Duration;

/// How often single-zone holders are checked for cross-zone references
/// while gray roots are traced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SingleZoneCheck {
    /// Check every single-zone holder.
    Always,
    /// Check one holder out of every `n` visited. Deterministic, so a failing
    /// run reproduces.
    EveryNth(u32),
    /// Never check.
    Never,
}

impl Default for SingleZoneCheck {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            SingleZoneCheck::Always
        } else {
            SingleZoneCheck::Never
        }
    }
}

/// Configuration for a [`CollectorContext`](crate::context::CollectorContext).
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Wall-clock cap for one incremental deferred-finalization step.
    pub finalize_slice: Duration,

    /// Items released between clock reads during an incremental step. Groups
    /// receive this as their per-call limit.
    pub finalize_items_per_check: u32,

    /// Timeout hint handed to the scheduler when an incremental finalization
    /// step is requeued at idle priority.
    pub idle_dispatch_timeout: Duration,

    /// Cadence of the single-zone holder validation.
    pub single_zone_check: SingleZoneCheck,

    /// Whether the cycle collector should be offered zone-merged traversal.
    pub merge_zones: bool,

    /// Capacity reserved up front for each registry bucket.
    pub initial_holder_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            finalize_slice: Duration::from_millis(5),
            finalize_items_per_check: 100,
            idle_dispatch_timeout: Duration::from_millis(2500),
            single_zone_check: SingleZoneCheck::default(),
            merge_zones: false,
            initial_holder_capacity: 256,
        }
    }
}

impl BridgeConfig {
    pub fn with_single_zone_check(mut self, check: SingleZoneCheck) -> Self {
        self.single_zone_check = check;
        self
    }

    pub fn with_finalize_slice(mut self, slice: Duration, items_per_check: u32) -> Self {
        self.finalize_slice = slice;
        self.finalize_items_per_check = items_per_check.max(1);
        self
    }

    pub fn with_merge_zones(mut self, merge: bool) -> Self {
        self.merge_zones = merge;
        self
    }
}
