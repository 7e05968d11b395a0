//! In-memory task log.
//!
//! Keeps encoded lines in a vector so tests can inspect exactly what a file
//! backend would have written, inject malformed lines, and simulate failures.

use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{LogRecord, StoreError, TaskLog};

/// Volatile log backend. Data is lost when the value is dropped.
#[derive(Debug, Default)]
pub struct MemoryLog {
    lines: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the stored lines.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    /// Append a raw line, bypassing encoding.
    pub fn push_raw(&self, line: impl Into<String>) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.into());
        }
    }

    /// Make every subsequent operation fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory log set to fail".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskLog for MemoryLog {
    async fn init(&self) -> Result<(), StoreError> {
        self.check()
    }

    async fn append(&self, record: &LogRecord) -> Result<(), StoreError> {
        self.check()?;
        let line = record.encode()?;
        let mut lines = self.lines.lock().map_err(|_| StoreError::LockPoisoned)?;
        lines.push(line);
        Ok(())
    }

    async fn read_lines(&self) -> Result<Vec<String>, StoreError> {
        self.check()?;
        let lines = self.lines.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(lines.clone())
    }

    async fn rewrite(&self, records: &[LogRecord]) -> Result<(), StoreError> {
        self.check()?;
        let encoded = records
            .iter()
            .map(LogRecord::encode)
            .collect::<Result<Vec<_>, _>>()?;
        let mut lines = self.lines.lock().map_err(|_| StoreError::LockPoisoned)?;
        *lines = encoded;
        Ok(())
    }
}
