use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    High,
    Normal,
}

/// Events that start a worker pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Refetch lists; `force` skips the staleness check.
    Sync { force: bool },
    /// Stored settings changed; reproject every page.
    SettingsChanged,
    /// A page was restored from navigation and needs a fresh projection.
    PageRestored(String),
}

impl Trigger {
    pub fn priority(&self) -> Priority {
        match self {
            Trigger::Sync { force: true } | Trigger::PageRestored(_) => Priority::High,
            Trigger::Sync { force: false } | Trigger::SettingsChanged => Priority::Normal,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub high_priority: usize,
    pub normal_priority: usize,
}

/// Two-level trigger queue. A trigger already waiting is not queued twice.
#[derive(Debug, Default)]
pub struct TriggerQueue {
    high: Mutex<VecDeque<Trigger>>,
    normal: Mutex<VecDeque<Trigger>>,
    ready: Notify,
}

impl TriggerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, trigger: Trigger) {
        let priority = trigger.priority();
        let mut high = self.high.lock();
        let mut normal = self.normal.lock();
        if high.contains(&trigger) || normal.contains(&trigger) {
            return;
        }
        match priority {
            Priority::High => high.push_back(trigger),
            Priority::Normal => normal.push_back(trigger),
        }
        drop((high, normal));
        self.ready.notify_one();
    }

    pub fn drain_ordered(&self) -> Vec<Trigger> {
        let mut drained = Vec::new();
        let mut high = self.high.lock();
        let mut normal = self.normal.lock();
        drained.extend(high.drain(..));
        drained.extend(normal.drain(..));
        drained
    }

    /// Resolves once a trigger has been pushed since the last wakeup.
    pub async fn ready(&self) {
        self.ready.notified().await;
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            high_priority: self.high.lock().len(),
            normal_priority: self.normal.lock().len(),
        }
    }
}
