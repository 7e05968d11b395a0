//! JSON Lines task log on the local filesystem.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::{LogRecord, StoreError, TaskLog};

/// Append-only log file, one JSON record per line.
///
/// Each append opens the file, writes the line, flushes and `fsync`s the data
/// before returning.
#[derive(Debug, Clone)]
pub struct JsonlLog {
    path: PathBuf,
}

impl JsonlLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

#[async_trait]
impl TaskLog for JsonlLog {
    async fn init(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        Ok(())
    }

    async fn append(&self, record: &LogRecord) -> Result<(), StoreError> {
        let mut line = record.encode()?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn read_lines(&self) -> Result<Vec<String>, StoreError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect())
    }

    async fn rewrite(&self, records: &[LogRecord]) -> Result<(), StoreError> {
        let mut buf = String::new();
        for record in records {
            buf.push_str(&record.encode()?);
            buf.push('\n');
        }

        let tmp = self.temp_path();
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(buf.as_bytes()).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
