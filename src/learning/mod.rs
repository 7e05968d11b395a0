//! Best-effort history of mission outcomes.
//!
//! The overseer writes a [`LearningRecord`] after a mission completes and
//! reads a [`PatternHint`] summary for the mission type before planning.
//! Callers treat every error from a [`PatternStore`] as non-fatal.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum LearningError {
    #[error("pattern store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pattern store serialization error: {0}")]
    Serialization(String),

    #[error("pattern store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningOutcome {
    Completed,
    Escalated,
}

/// One finished mission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningRecord {
    pub mission_type: String,
    /// Tools the plan used.
    pub agents_used: Vec<String>,
    pub outcome: LearningOutcome,
    pub quality_score: f64,
    pub attempts: u32,
    pub recorded_at: DateTime<Utc>,
}

/// Summary of past missions of one type, passed to the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternHint {
    pub mission_type: String,
    pub samples: usize,
    pub success_rate: f64,
    pub average_quality: f64,
    /// Tools seen in successful runs, most frequent first.
    pub preferred_tools: Vec<String>,
}

impl PatternHint {
    /// Summarize records of a single mission type. Returns `None` for an
    /// empty slice.
    pub fn summarize(mission_type: &str, records: &[LearningRecord]) -> Option<Self> {
        if records.is_empty() {
            return None;
        }

        let samples = records.len();
        let successes = records
            .iter()
            .filter(|r| r.outcome == LearningOutcome::Completed)
            .count();
        let average_quality =
            records.iter().map(|r| r.quality_score).sum::<f64>() / samples as f64;

        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for record in records
            .iter()
            .filter(|r| r.outcome == LearningOutcome::Completed)
        {
            for tool in &record.agents_used {
                *counts.entry(tool.as_str()).or_default() += 1;
            }
        }
        let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

        Some(Self {
            mission_type: mission_type.to_string(),
            samples,
            success_rate: successes as f64 / samples as f64,
            average_quality,
            preferred_tools: ranked.into_iter().map(|(t, _)| t.to_string()).collect(),
        })
    }
}

/// Historical-pattern store.
#[async_trait]
pub trait PatternStore: Send + Sync {
    async fn record(&self, record: LearningRecord) -> Result<(), LearningError>;

    /// Most recent records for a mission type, newest last.
    async fn history(
        &self,
        mission_type: &str,
        limit: usize,
    ) -> Result<Vec<LearningRecord>, LearningError>;
}

fn tail(mut records: Vec<LearningRecord>, limit: usize) -> Vec<LearningRecord> {
    if records.len() > limit {
        records.drain(..records.len() - limit);
    }
    records
}

/// Pattern store in a JSON Lines file.
pub struct JsonlPatternStore {
    path: PathBuf,
}

impl JsonlPatternStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PatternStore for JsonlPatternStore {
    async fn record(&self, record: LearningRecord) -> Result<(), LearningError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let mut line = serde_json::to_string(&record)
            .map_err(|e| LearningError::Serialization(e.to_string()))?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!(mission_type = %record.mission_type, "learning record appended");
        Ok(())
    }

    async fn history(
        &self,
        mission_type: &str,
        limit: usize,
    ) -> Result<Vec<LearningRecord>, LearningError> {
        let file = match fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut lines = BufReader::new(file).lines();
        let mut records = Vec::new();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<LearningRecord>(line) {
                Ok(record) if record.mission_type == mission_type => records.push(record),
                Ok(_) => {}
                Err(e) => warn!("skipping malformed learning record: {}", e),
            }
        }

        Ok(tail(records, limit))
    }
}

/// Volatile pattern store.
#[derive(Default)]
pub struct MemoryPatternStore {
    records: Mutex<Vec<LearningRecord>>,
}

impl MemoryPatternStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LearningRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PatternStore for MemoryPatternStore {
    async fn record(&self, record: LearningRecord) -> Result<(), LearningError> {
        self.records
            .lock()
            .map_err(|_| LearningError::Unavailable("lock poisoned".into()))?
            .push(record);
        Ok(())
    }

    async fn history(
        &self,
        mission_type: &str,
        limit: usize,
    ) -> Result<Vec<LearningRecord>, LearningError> {
        let records = self
            .records
            .lock()
            .map_err(|_| LearningError::Unavailable("lock poisoned".into()))?;
        let matching = records
            .iter()
            .filter(|r| r.mission_type == mission_type)
            .cloned()
            .collect();
        Ok(tail(matching, limit))
    }
}
