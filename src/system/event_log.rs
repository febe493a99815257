//! Append-only operational log, newest entry first, bounded to `LOG_CAPACITY`.

use crate::error::StorageError;
use crate::system::config::keys;
use crate::system::storage::SettingsStore;
use crate::types::LOG_CAPACITY;
use chrono::{DateTime, Utc};
use heapless::Deque;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogCategory {
    Transaction,
    Pouring,
    Settings,
    Cleaning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub category: LogCategory,
    pub message: String,
}

impl LogEntry {
    pub fn new(category: LogCategory, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            category,
            message: message.into(),
        }
    }
}

#[derive(Debug, Default)]
pub struct EventLog {
    entries: Deque<LogEntry, LOG_CAPACITY>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            entries: Deque::new(),
        }
    }

    /// Restores the log persisted under `systemLogs`. A corrupt value starts a fresh log.
    pub fn load(store: &dyn SettingsStore) -> Self {
        let mut log = Self::new();
        let Some(raw) = store.get(keys::SYSTEM_LOGS) else {
            return log;
        };

        match serde_json::from_str::<Vec<LogEntry>>(&raw) {
            Ok(saved) => {
                // Stored newest first; replay oldest first so ordering survives.
                for entry in saved.into_iter().take(LOG_CAPACITY).rev() {
                    log.push(entry);
                }
                info!("Restored {} log entries", log.len());
            }
            Err(e) => warn!("Discarding unreadable system log: {}", e),
        }
        log
    }

    pub fn persist(&self, store: &mut dyn SettingsStore) -> Result<(), StorageError> {
        let snapshot: Vec<&LogEntry> = self.entries.iter().collect();
        let json = serde_json::to_string(&snapshot)?;
        store.set(keys::SYSTEM_LOGS, &json)
    }

    pub fn append(&mut self, category: LogCategory, message: impl Into<String>) {
        let entry = LogEntry::new(category, message);
        info!("[{:?}] {}", entry.category, entry.message);
        self.push(entry);
    }

    fn push(&mut self, entry: LogEntry) {
        if self.entries.is_full() {
            self.entries.pop_back();
        }
        let _ = self.entries.push_front(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn latest(&self) -> Option<&LogEntry> {
        self.entries.front()
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn filtered(&self, category: Option<LogCategory>) -> Vec<&LogEntry> {
        self.entries
            .iter()
            .filter(|entry| category.map_or(true, |c| entry.category == c))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::storage::MemoryStore;

    #[test]
    fn test_newest_first() {
        let mut log = EventLog::new();
        log.append(LogCategory::Settings, "first");
        log.append(LogCategory::Cleaning, "second");

        let messages: Vec<&str> = log.entries().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["second", "first"]);
        assert_eq!(log.latest().map(|e| e.category), Some(LogCategory::Cleaning));
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let mut log = EventLog::new();
        for i in 0..(LOG_CAPACITY + 5) {
            log.append(LogCategory::Pouring, format!("pour {}", i));
        }
        assert_eq!(log.len(), LOG_CAPACITY);
        assert_eq!(log.latest().unwrap().message, format!("pour {}", LOG_CAPACITY + 4));
        assert_eq!(log.entries().last().unwrap().message, "pour 5");
    }

    #[test]
    fn test_filter_by_category() {
        let mut log = EventLog::new();
        log.append(LogCategory::Settings, "a");
        log.append(LogCategory::Cleaning, "b");
        log.append(LogCategory::Settings, "c");

        assert_eq!(log.filtered(None).len(), 3);
        let settings: Vec<&str> = log
            .filtered(Some(LogCategory::Settings))
            .iter()
            .map(|e| e.message.as_str())
            .collect();
        assert_eq!(settings, vec!["c", "a"]);
        assert!(log.filtered(Some(LogCategory::Error)).is_empty());
    }

    #[test]
    fn test_persist_and_reload_keeps_order() {
        let mut store = MemoryStore::new();
        let mut log = EventLog::new();
        log.append(LogCategory::Transaction, "older");
        log.append(LogCategory::Pouring, "newer");
        log.persist(&mut store).unwrap();

        let raw = store.get("systemLogs").unwrap();
        assert!(raw.contains("\"type\":\"pouring\""));

        let restored = EventLog::load(&store);
        let messages: Vec<&str> = restored.entries().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["newer", "older"]);
    }

    #[test]
    fn test_corrupt_log_starts_fresh() {
        let store = MemoryStore::with_values([("systemLogs", "{oops")]);
        assert!(EventLog::load(&store).is_empty());
    }
}
