// Stepwright: Run journal
//
// Append-only JSONL record of finished runs, one RunSummary per line.

use crate::engine::session::RunSummary;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct RunJournal {
    path: PathBuf,
    writer: Arc<Mutex<()>>, // serializes appends
}

impl RunJournal {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            writer: Arc::new(Mutex::new(())),
        }
    }

    pub async fn append(&self, summary: &RunSummary) -> anyhow::Result<()> {
        let json = serde_json::to_string(summary)? + "\n";

        let _guard = self.writer.lock().await;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        file.write_all(json.as_bytes())?;

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every recorded run, oldest first. A missing journal is empty.
    pub fn read_entries(&self) -> anyhow::Result<Vec<RunSummary>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        let mut entries = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(line)?);
        }
        Ok(entries)
    }

    /// The last `n` runs, newest last.
    pub fn tail(&self, n: usize) -> anyhow::Result<Vec<RunSummary>> {
        let mut entries = self.read_entries()?;
        let skip = entries.len().saturating_sub(n);
        Ok(entries.split_off(skip))
    }
}
