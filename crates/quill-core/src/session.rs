//! Saved sessions on disk.
//!
//! Each session is one JSON file under the sessions directory. Names are
//! restricted to a safe character set so they can never escape it.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ai::types::ModelMessage;
use crate::paths;

#[derive(Debug, Serialize, Deserialize)]
pub struct SavedSession {
    pub name: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<ModelMessage>,
}

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub name: String,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
}

pub struct SessionStore {
    dir: PathBuf,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(paths::sessions_dir())
    }
}

impl SessionStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Save a session. Without a name, one is generated from the current
    /// local time. Returns the name used.
    pub fn save(
        &self,
        name: Option<&str>,
        model: &str,
        messages: &[ModelMessage],
    ) -> Result<String> {
        let name = match name {
            Some(name) => {
                validate_name(name)?;
                name.to_string()
            }
            None => Local::now().format("conversation-%Y%m%d-%H%M%S").to_string(),
        };

        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;

        let path = self.session_path(&name);
        let created_at = match self.load(&name) {
            Ok(existing) => existing.created_at,
            Err(_) => Utc::now(),
        };

        let session = SavedSession {
            name: name.clone(),
            model: model.to_string(),
            created_at,
            updated_at: Utc::now(),
            messages: messages.to_vec(),
        };
        let json = serde_json::to_string_pretty(&session)?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;

        info!(session = %name, messages = messages.len(), "session saved");
        Ok(name)
    }

    pub fn load(&self, name: &str) -> Result<SavedSession> {
        validate_name(name)?;
        let path = self.session_path(name);
        let content = std::fs::read_to_string(&path)
            .map_err(|_| anyhow!("no session named '{name}'"))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        let path = self.session_path(name);
        std::fs::remove_file(&path).map_err(|_| anyhow!("no session named '{name}'"))?;
        info!(session = name, "session deleted");
        Ok(())
    }

    /// All sessions, most recently updated first.
    pub fn list(&self) -> Result<Vec<SessionSummary>> {
        let mut summaries = Vec::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(summaries),
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            let Ok(session) = serde_json::from_str::<SavedSession>(&content) else {
                continue;
            };
            summaries.push(SessionSummary {
                name: session.name,
                updated_at: session.updated_at,
                message_count: session.messages.len(),
            });
        }

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    fn session_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("session name must not be empty");
    }
    let ok = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !ok || name.starts_with('.') {
        bail!("invalid session name '{name}': use letters, digits, '-' and '_'");
    }
    Ok(())
}
