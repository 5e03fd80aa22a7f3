use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::Mutex};
use tracing::*;

/// Average consumption of a finalized session
#[derive(Clone, Debug, PartialEq)]
pub struct SessionResult {
    pub identifier: String,
    pub average_rate: f64,
}

impl SessionResult {
    pub fn new(identifier: &str, average_rate: f64) -> Self {
        Self {
            identifier: identifier.to_string(),
            average_rate,
        }
    }

    /// One CSV line, newline included
    pub fn to_record(&self) -> String {
        format!("{self}\n")
    }
}

impl std::fmt::Display for SessionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{:.4}", self.identifier, self.average_rate)
    }
}

/// Destination of finalized session results.
///
/// Implementations must tolerate concurrent callers and must not fail the
/// caller: persistence problems are reported through the log only.
#[async_trait::async_trait]
pub trait ResultSink: Send + Sync + std::fmt::Debug {
    async fn record(&self, result: &SessionResult);
}

/// Appends results to a CSV file, one `identifier,average` line per session
#[derive(Debug)]
pub struct CsvResultSink {
    pub path: PathBuf,
    lock: Mutex<()>,
}

impl CsvResultSink {
    #[instrument(level = "debug")]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    async fn append(&self, result: &SessionResult) -> Result<()> {
        let record = result.to_record();

        let _guard = self.lock.lock().await;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed opening results file {:?}", self.path))?;

        file.write_all(record.as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl ResultSink for CsvResultSink {
    #[instrument(level = "debug", skip(self))]
    async fn record(&self, result: &SessionResult) {
        match self.append(result).await {
            Ok(()) => trace!("Result persisted to {:?}", self.path),
            Err(error) => error!("Failed persisting result {result}: {error:?}"),
        }
    }
}

/// Keeps results in memory, useful when embedding the server
#[derive(Debug, Default)]
pub struct MemoryResultSink {
    results: Mutex<Vec<SessionResult>>,
}

impl MemoryResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn results(&self) -> Vec<SessionResult> {
        self.results.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl ResultSink for MemoryResultSink {
    async fn record(&self, result: &SessionResult) {
        self.results.lock().await.push(result.clone());
    }
}
