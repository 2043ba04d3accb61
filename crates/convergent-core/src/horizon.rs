//! Causal context tracking via Horizons.
//!
//! A Horizon records what operations a device had seen when it performed an
//! action. This enables informed-remove semantics: a remove only defeats
//! operations it had observed; operations concurrent with the remove
//! survive.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Opaque identifier for a device/replica. Stable for the lifetime of a
/// device's identity; used as the last-writer-wins tie-breaker.
pub type DeviceId = String;

/// Monotonically non-decreasing per-device sequence number.
pub type LogicalClock = u64;

/// A causal horizon: for each known device, the highest `LogicalClock`
/// the horizon's owner had ingested from that device.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Horizon(BTreeMap<DeviceId, LogicalClock>);

impl Horizon {
    pub fn new() -> Self {
        Self::default()
    }

    /// `F.horizon[E.author] >= E.clock`, i.e. "F was authored with knowledge
    /// of E". `clock` is the value from the horizon's perspective.
    pub fn get(&self, device: &str) -> LogicalClock {
        self.0.get(device).copied().unwrap_or(0)
    }

    pub fn has_seen(&self, device: &str, clock: LogicalClock) -> bool {
        self.get(device) >= clock
    }

    /// Record having observed `clock` from `device`. Never moves backwards.
    pub fn observe(&mut self, device: &str, clock: LogicalClock) {
        let entry = self.0.entry(device.to_string()).or_insert(0);
        if clock > *entry {
            *entry = clock;
        }
    }

    /// Pointwise max of two horizons.
    pub fn merge(&self, other: &Horizon) -> Horizon {
        let mut out = self.clone();
        for (device, clock) in &other.0 {
            out.observe(device, *clock);
        }
        out
    }

    pub fn merge_in_place(&mut self, other: &Horizon) {
        for (device, clock) in &other.0 {
            self.observe(device, *clock);
        }
    }

    /// Fold a batch of `(device, clock)` observations in one call — the
    /// shape a flow rebuilds its horizon from when it replays a log's
    /// envelopes on open.
    pub fn observe_all<'a>(&mut self, entries: impl IntoIterator<Item = (&'a str, LogicalClock)>) {
        for (device, clock) in entries {
            self.observe(device, clock);
        }
    }

    pub fn dominates(&self, other: &Horizon) -> bool {
        other.0.iter().all(|(d, c)| self.get(d) >= *c)
    }

    pub fn is_concurrent_with(&self, other: &Horizon) -> bool {
        !self.dominates(other) && !other.dominates(self)
    }

    pub fn devices(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, LogicalClock)> {
        self.0.iter().map(|(d, c)| (d.as_str(), *c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observe_never_goes_backwards() {
        let mut h = Horizon::new();
        h.observe("laptop", 10);
        h.observe("laptop", 4); // stale replay of an earlier envelope
        assert_eq!(h.get("laptop"), 10);
        h.observe("laptop", 15);
        assert_eq!(h.get("laptop"), 15);
    }

    #[test]
    fn dominates_requires_covering_every_entry() {
        let mut ahead = Horizon::new();
        ahead.observe("laptop", 10);
        ahead.observe("phone", 6);

        let mut behind = Horizon::new();
        behind.observe("laptop", 6);
        behind.observe("phone", 4);

        assert!(ahead.dominates(&behind));
        assert!(!behind.dominates(&ahead));
    }

    #[test]
    fn concurrent_when_each_is_ahead_on_a_different_device() {
        let mut laptop_view = Horizon::new();
        laptop_view.observe("laptop", 10);
        laptop_view.observe("phone", 3);

        let mut phone_view = Horizon::new();
        phone_view.observe("laptop", 6);
        phone_view.observe("phone", 7);

        assert!(laptop_view.is_concurrent_with(&phone_view));
    }

    #[test]
    fn merge_takes_pointwise_max() {
        let mut h1 = Horizon::new();
        h1.observe("laptop", 10);
        let mut h2 = Horizon::new();
        h2.observe("laptop", 6);
        h2.observe("phone", 12);

        let merged = h1.merge(&h2);
        assert_eq!(merged.get("laptop"), 10);
        assert_eq!(merged.get("phone"), 12);
    }

    #[test]
    fn merge_in_place_mutates_the_receiver_instead_of_cloning() {
        let mut h1 = Horizon::new();
        h1.observe("laptop", 10);
        let mut h2 = Horizon::new();
        h2.observe("laptop", 6);
        h2.observe("phone", 12);

        h1.merge_in_place(&h2);
        assert_eq!(h1.get("laptop"), 10);
        assert_eq!(h1.get("phone"), 12);
    }

    #[test]
    fn observe_all_folds_a_replayed_log_into_one_horizon() {
        let mut h = Horizon::new();
        h.observe_all([("laptop", 1u64), ("phone", 1), ("laptop", 2), ("phone", 3), ("laptop", 2)]);
        assert_eq!(h.get("laptop"), 2);
        assert_eq!(h.get("phone"), 3);
    }

    #[test]
    fn devices_and_iter_expose_every_known_device_once() {
        let mut h = Horizon::new();
        h.observe("laptop", 5);
        h.observe("phone", 2);

        let mut devices: Vec<&str> = h.devices().collect();
        devices.sort();
        assert_eq!(devices, vec!["laptop", "phone"]);

        let mut entries: Vec<(&str, LogicalClock)> = h.iter().collect();
        entries.sort();
        assert_eq!(entries, vec![("laptop", 5), ("phone", 2)]);
    }

    #[test]
    fn horizon_monotonicity_across_appends() {
        // current(log) must never shrink as envelopes accumulate.
        let mut current = Horizon::new();
        let steps = [("laptop", 1u64), ("phone", 1), ("laptop", 2), ("phone", 3), ("laptop", 2)];
        let mut prev_laptop = 0;
        let mut prev_phone = 0;
        for (device, clock) in steps {
            current.observe(device, clock);
            assert!(current.get("laptop") >= prev_laptop);
            assert!(current.get("phone") >= prev_phone);
            prev_laptop = current.get("laptop");
            prev_phone = current.get("phone");
        }
    }
}
