//! File-backed collaborators: TOML pattern file and JSON-lines audit log

use super::{AuditStore, PatternRepository};
use crate::patterns::FraudPattern;
use crate::types::{AutomationAction, DetectionRecord};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// On-disk layout of a pattern file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternFile {
    /// Pattern definitions
    #[serde(default)]
    pub patterns: Vec<FraudPattern>,
}

/// Pattern repository re-reading a TOML file on every load
#[derive(Debug, Clone)]
pub struct TomlPatternRepository {
    path: PathBuf,
}

impl TomlPatternRepository {
    /// Repository over `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PatternRepository for TomlPatternRepository {
    async fn active_patterns(&self) -> Result<Vec<FraudPattern>> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            Error::PatternRepository(format!("failed to read {}: {}", self.path.display(), e))
        })?;
        let file: PatternFile = toml::from_str(&content).map_err(|e| {
            Error::PatternRepository(format!("failed to parse {}: {}", self.path.display(), e))
        })?;

        Ok(file.patterns.into_iter().filter(|p| p.active).collect())
    }
}

/// One line of the audit log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
pub enum AuditEntry {
    /// Detection record
    Detection(DetectionRecord),
    /// Mitigation action
    Action(AutomationAction),
}

/// Append-only JSON-lines audit log
#[derive(Debug)]
pub struct JsonlAuditStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlAuditStore {
    /// Audit log at `path`, created on first write
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| Error::Persistence(format!("open {}: {}", self.path.display(), e)))?;
        file.write_all(&line)
            .await
            .map_err(|e| Error::Persistence(format!("write {}: {}", self.path.display(), e)))?;
        file.flush()
            .await
            .map_err(|e| Error::Persistence(format!("flush {}: {}", self.path.display(), e)))?;
        Ok(())
    }
}

#[async_trait]
impl AuditStore for JsonlAuditStore {
    async fn append_detection(&self, record: &DetectionRecord) -> Result<()> {
        self.append(&AuditEntry::Detection(record.clone())).await
    }

    async fn append_action(&self, action: &AutomationAction) -> Result<()> {
        self.append(&AuditEntry::Action(action.clone())).await
    }
}
