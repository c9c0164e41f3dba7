//! Server-side thread storage.
//!
//! Each thread lives at `<base_dir>/<thread_id>.jsonl`. The store loads
//! threads back with malformed-line recovery and version checking, and
//! lists them with lightweight metadata for pickers/dashboards.

use std::path::{Path, PathBuf};

use chimera_domain::error::{Error, Result};
use chimera_domain::event::{event_type, Event};

use crate::reader::ThreadProtocolReader;
use crate::validate::validate_event_ordering;

/// Metadata for one stored thread.
#[derive(Debug, Clone)]
pub struct ThreadSummary {
    pub thread_id: String,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub event_count: usize,
    /// First user message, truncated to 100 chars.
    pub preview: String,
}

/// Directory of persisted thread logs.
pub struct ThreadStore {
    base_dir: PathBuf,
}

impl ThreadStore {
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir).map_err(Error::Io)?;
        Ok(Self { base_dir })
    }

    pub fn path_for(&self, thread_id: &str) -> PathBuf {
        self.base_dir.join(format!("{thread_id}.jsonl"))
    }

    pub fn exists(&self, thread_id: &str) -> bool {
        self.path_for(thread_id).exists()
    }

    /// Load a thread's events. Returns `None` when the thread has no log.
    /// The blueprint version is checked and ordering violations are logged
    /// (permissive: the thread still loads).
    pub fn load(&self, thread_id: &str) -> Result<Option<Vec<Event>>> {
        let path = self.path_for(thread_id);
        if !path.exists() {
            return Ok(None);
        }
        let reader = ThreadProtocolReader::new(&path)?;
        reader.read_blueprint()?;
        let events = reader.read_all()?;
        validate_event_ordering(&events).log(thread_id);
        Ok(Some(events))
    }

    /// List all stored threads, most recently updated first. Threads whose
    /// first line cannot be parsed are skipped with a warning.
    pub fn list(&self) -> Result<Vec<ThreadSummary>> {
        let mut summaries = Vec::new();

        for entry in std::fs::read_dir(&self.base_dir).map_err(Error::Io)? {
            let entry = entry.map_err(Error::Io)?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let Some(thread_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            let reader = match ThreadProtocolReader::new(&path) {
                Ok(r) => r,
                Err(_) => continue,
            };
            let events = match reader.read_all() {
                Ok(events) if !events.is_empty() => events,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(thread_id, error = %e, "skipping unreadable thread");
                    continue;
                }
            };

            let preview = events
                .iter()
                .find(|e| e.is(event_type::USER_MESSAGE))
                .and_then(|e| e.data_str("content"))
                .map(truncate_preview)
                .unwrap_or_else(|| "No messages yet".into());

            summaries.push(ThreadSummary {
                thread_id: thread_id.to_string(),
                created_at: events.first().and_then(|e| e.timestamp()).map(str::to_string),
                updated_at: events.last().and_then(|e| e.timestamp()).map(str::to_string),
                event_count: events.len(),
                preview,
            });
        }

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }
}

fn truncate_preview(content: &str) -> String {
    const MAX: usize = 100;
    if content.chars().count() <= MAX {
        content.to_string()
    } else {
        let truncated: String = content.chars().take(MAX).collect();
        format!("{truncated}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{EventWriter, JsonlWriter};
    use chimera_domain::blueprint::{AgentConfig, Blueprint, SpaceConfig};
    use uuid::Uuid;

    fn test_blueprint(thread_id: Uuid) -> Blueprint {
        Blueprint::new(
            thread_id,
            SpaceConfig::Default {
                agents: vec![AgentConfig::Inline {
                    id: "helper".into(),
                    name: "Helper".into(),
                    identifier: None,
                    description: String::new(),
                    base_prompt: "p".into(),
                    model_string: None,
                    widgets: vec![],
                    metadata: serde_json::Value::Null,
                }],
                widgets: vec![],
            },
        )
    }

    async fn seed_thread(store: &ThreadStore, content: &str) -> String {
        let thread_id = Uuid::new_v4();
        let writer = JsonlWriter::open(store.path_for(&thread_id.to_string())).unwrap();
        writer.write_blueprint(&test_blueprint(thread_id)).await.unwrap();
        writer.write_event(Event::user_turn_start()).await.unwrap();
        writer.write_event(Event::user_message(content)).await.unwrap();
        writer.write_event(Event::user_turn_end()).await.unwrap();
        thread_id.to_string()
    }

    #[tokio::test]
    async fn loads_stored_thread() {
        let dir = tempfile::tempdir().unwrap();
        let store = ThreadStore::new(dir.path()).unwrap();
        let thread_id = seed_thread(&store, "hello there").await;

        let events = store.load(&thread_id).unwrap().unwrap();
        assert_eq!(events.len(), 4);
        assert!(store.load("missing").unwrap().is_none());
    }

    #[tokio::test]
    async fn lists_threads_with_preview() {
        let dir = tempfile::tempdir().unwrap();
        let store = ThreadStore::new(dir.path()).unwrap();
        seed_thread(&store, &"x".repeat(150)).await;
        seed_thread(&store, "short").await;

        let summaries = store.list().unwrap();
        assert_eq!(summaries.len(), 2);
        let previews: Vec<_> = summaries.iter().map(|s| s.preview.as_str()).collect();
        assert!(previews.contains(&"short"));
        assert!(previews.iter().any(|p| p.ends_with("...") && p.len() == 103));
    }

    #[tokio::test]
    async fn list_skips_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ThreadStore::new(dir.path()).unwrap();
        std::fs::write(store.path_for("empty"), "").unwrap();
        assert!(store.list().unwrap().is_empty());
    }
}
