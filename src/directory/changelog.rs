use super::dn::Dn;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Add,
    Delete,
    Modify,
}

#[derive(Debug, Clone)]
pub struct ChangeLogEvent {
    pub revision: u64,
    pub kind: ChangeKind,
    pub dn: Dn,
    pub principal: String,
    pub timestamp: DateTime<Utc>,
}

/// Records successful write operations while enabled.
#[derive(Debug, Default)]
pub struct ChangeLog {
    enabled: AtomicBool,
    revision: AtomicU64,
    events: Mutex<Vec<ChangeLogEvent>>,
}

impl ChangeLog {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn record(&self, kind: ChangeKind, dn: &Dn, principal: &str) {
        if !self.is_enabled() {
            return;
        }

        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut events) = self.events.lock() {
            events.push(ChangeLogEvent {
                revision,
                kind,
                dn: dn.clone(),
                principal: principal.to_string(),
                timestamp: Utc::now(),
            });
        }
    }

    pub fn current_revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<ChangeLogEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}
