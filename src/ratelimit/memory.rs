//! In-process counter backend.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use super::{CounterBackend, RateLimitError, RateLimitRule, WindowState};

#[derive(Debug, Default)]
struct Window {
    timestamps: VecDeque<u64>,
    expires_at: u64,
}

/// Sliding windows held in a mutex-guarded map. One lock per call makes
/// prune, admit and count atomic for every key.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    windows: Mutex<HashMap<String, Window>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn key_count(&self) -> usize {
        self.windows.lock().map(|w| w.len()).unwrap_or(0)
    }
}

#[async_trait]
impl CounterBackend for MemoryBackend {
    async fn hit(
        &self,
        key: &str,
        now_ms: u64,
        rule: RateLimitRule,
    ) -> Result<WindowState, RateLimitError> {
        let mut windows = self
            .windows
            .lock()
            .map_err(|_| RateLimitError::Backend("counter lock poisoned".into()))?;
        let window = windows.entry(key.to_string()).or_default();

        while let Some(&oldest) = window.timestamps.front() {
            if oldest + rule.window_ms <= now_ms {
                window.timestamps.pop_front();
            } else {
                break;
            }
        }

        let admitted = (window.timestamps.len() as u64) < rule.max_requests;
        if admitted {
            window.timestamps.push_back(now_ms);
        }
        window.expires_at = now_ms + rule.window_ms;

        Ok(WindowState {
            admitted,
            count: window.timestamps.len() as u64,
            oldest_ms: window.timestamps.front().copied(),
        })
    }

    async fn purge_expired(&self, now_ms: u64) -> Result<usize, RateLimitError> {
        let mut windows = self
            .windows
            .lock()
            .map_err(|_| RateLimitError::Backend("counter lock poisoned".into()))?;
        let before = windows.len();
        windows.retain(|_, w| w.expires_at > now_ms);
        Ok(before - windows.len())
    }
}
