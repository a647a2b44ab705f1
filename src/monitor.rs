//! One-way monitors: (monitoring process, monitored [`Ref`]) -> monitor id.
//!
//! Unlike links, monitors carry no obligation on the monitored side — they
//! are removed either explicitly (`demonitor`) or when the runtime drains
//! them on the target's termination.

use dashmap::DashMap;
use smallvec::SmallVec;

use crate::ids::{MonitorRef, ProcessId, Tag};

struct MonitorRecord {
    by: ProcessId,
    target: ProcessId,
}

#[derive(Default)]
pub struct MonitorRegistry {
    monitors: DashMap<MonitorRef, MonitorRecord>,
    by_target: DashMap<ProcessId, SmallVec<[MonitorRef; 4]>>,
    by_owner: DashMap<ProcessId, SmallVec<[MonitorRef; 4]>>,
    next: std::sync::atomic::AtomicU64,
}

impl MonitorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, by: &str, target: &str) -> MonitorRef {
        let id = Tag(self.next.fetch_add(1, std::sync::atomic::Ordering::Relaxed));
        self.monitors.insert(
            id,
            MonitorRecord {
                by: by.to_string(),
                target: target.to_string(),
            },
        );
        self.by_target.entry(target.to_string()).or_default().push(id);
        self.by_owner.entry(by.to_string()).or_default().push(id);
        id
    }

    /// Idempotent: demonitoring twice, or an id that never notified, is
    /// harmless.
    pub fn remove(&self, monitor_ref: MonitorRef) {
        if let Some((_, record)) = self.monitors.remove(&monitor_ref) {
            if let Some(mut v) = self.by_target.get_mut(&record.target) {
                v.retain(|m| *m != monitor_ref);
            }
            if let Some(mut v) = self.by_owner.get_mut(&record.by) {
                v.retain(|m| *m != monitor_ref);
            }
        }
    }

    /// Drains every monitor watching `target`, returning `(monitor_ref,
    /// owner)` pairs to notify. Call exactly once, on `target`'s
    /// termination.
    pub fn drain_for_target(&self, target: &str) -> Vec<(MonitorRef, ProcessId)> {
        let Some((_, monitor_refs)) = self.by_target.remove(target) else {
            return Vec::new();
        };
        let mut out = Vec::with_capacity(monitor_refs.len());
        for monitor_ref in monitor_refs {
            if let Some((_, record)) = self.monitors.remove(&monitor_ref) {
                if let Some(mut v) = self.by_owner.get_mut(&record.by) {
                    v.retain(|m| *m != monitor_ref);
                }
                out.push((monitor_ref, record.by));
            }
        }
        out
    }

    /// Removes every monitor owned by `owner` without notifying anyone —
    /// used when `owner` itself terminates (step 7 of the termination
    /// sequence: no notification owed for monitors *it* created).
    pub fn remove_by_owner(&self, owner: &str) {
        if let Some((_, monitor_refs)) = self.by_owner.remove(owner) {
            for monitor_ref in monitor_refs {
                if let Some((_, record)) = self.monitors.remove(&monitor_ref) {
                    if let Some(mut v) = self.by_target.get_mut(&record.target) {
                        v.retain(|m| *m != monitor_ref);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demonitor_prevents_notification() {
        let monitors = MonitorRegistry::new();
        let m = monitors.create("owner", "target");
        monitors.remove(m);
        assert!(monitors.drain_for_target("target").is_empty());
    }

    #[test]
    fn drain_for_target_notifies_every_owner_once() {
        let monitors = MonitorRegistry::new();
        monitors.create("a", "target");
        monitors.create("b", "target");
        let notified = monitors.drain_for_target("target");
        assert_eq!(notified.len(), 2);
        assert!(monitors.drain_for_target("target").is_empty());
    }

    #[test]
    fn remove_by_owner_does_not_notify() {
        let monitors = MonitorRegistry::new();
        monitors.create("owner", "target");
        monitors.remove_by_owner("owner");
        assert!(monitors.drain_for_target("target").is_empty());
    }
}
