//! Line-oriented log reading.
//!
//! Readers must survive malformed lines (log, skip, continue) and surface
//! a version mismatch when line 1 was written by an incompatible engine.

use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chimera_domain::blueprint::{Blueprint, THREAD_PROTOCOL_VERSION};
use chimera_domain::error::{Error, Result};
use chimera_domain::event::{event_type, Event};
use chimera_domain::stream::Usage;

/// Reads events from a ThreadProtocol JSONL file.
pub struct ThreadProtocolReader {
    path: PathBuf,
}

impl ThreadProtocolReader {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(Error::Protocol(format!(
                "thread protocol file not found: {}",
                path.display()
            )));
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every event in order. Malformed lines are logged and skipped.
    pub fn read_all(&self) -> Result<Vec<Event>> {
        let raw = std::fs::read_to_string(&self.path).map_err(Error::Io)?;
        let mut events = Vec::new();
        for (line_no, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match Event::from_json_line(line) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        line = line_no + 1,
                        error = %e,
                        "skipping malformed log line"
                    );
                }
            }
        }
        Ok(events)
    }

    /// Parse the blueprint from line 1 and check the protocol version.
    pub fn read_blueprint(&self) -> Result<Blueprint> {
        let events = self.read_all()?;
        let first = events
            .first()
            .ok_or_else(|| Error::Protocol("log is empty".into()))?;
        let blueprint = Blueprint::from_event(first)?;
        if blueprint.thread_protocol_version != THREAD_PROTOCOL_VERSION {
            return Err(Error::VersionMismatch {
                expected: THREAD_PROTOCOL_VERSION.into(),
                found: blueprint.thread_protocol_version,
            });
        }
        Ok(blueprint)
    }

    /// All events after the blueprint line.
    pub fn read_history(&self) -> Result<Vec<Event>> {
        let mut events = self.read_all()?;
        if events
            .first()
            .is_some_and(|e| e.is(event_type::THREAD_BLUEPRINT))
        {
            events.remove(0);
        }
        Ok(events)
    }

    /// Events whose `type` is in `types`.
    pub fn read_filtered(&self, types: &[&str]) -> Result<Vec<Event>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|e| types.contains(&e.event_type()))
            .collect())
    }

    /// Number of user turns recorded in the log.
    pub fn count_turns(&self) -> Result<usize> {
        Ok(self.read_filtered(&[event_type::USER_TURN_START])?.len())
    }

    /// Sum of all `finish-step` usage records.
    pub fn usage_totals(&self) -> Result<Usage> {
        let mut totals = Usage::default();
        for event in self.read_filtered(&[event_type::FINISH_STEP])? {
            if let Some(usage) = event.usage() {
                totals.accumulate(&usage);
            }
        }
        Ok(totals)
    }

    /// Follow the file for new events, like `tail -f`. Starts at the
    /// current end of file and polls. Intended for observers; the iterator
    /// never terminates on its own.
    pub fn follow(&self, poll_interval: Duration) -> Result<FollowIter> {
        let mut file = std::fs::File::open(&self.path).map_err(Error::Io)?;
        file.seek(SeekFrom::End(0)).map_err(Error::Io)?;
        Ok(FollowIter {
            reader: BufReader::new(file),
            poll_interval,
        })
    }
}

/// Blocking tail-follow iterator returned by
/// [`ThreadProtocolReader::follow`].
pub struct FollowIter {
    reader: BufReader<std::fs::File>,
    poll_interval: Duration,
}

impl Iterator for FollowIter {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        loop {
            let mut line = String::new();
            match self.reader.read_line(&mut line) {
                Ok(0) => std::thread::sleep(self.poll_interval),
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match Event::from_json_line(trimmed) {
                        Ok(event) => return Some(event),
                        Err(_) => continue,
                    }
                }
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{EventWriter, JsonlWriter};
    use chimera_domain::blueprint::{AgentConfig, SpaceConfig};
    use uuid::Uuid;

    fn test_blueprint() -> Blueprint {
        Blueprint::new(
            Uuid::new_v4(),
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

    async fn write_sample(path: &Path) -> Blueprint {
        let blueprint = test_blueprint();
        let writer = JsonlWriter::open(path).unwrap();
        writer.write_blueprint(&blueprint).await.unwrap();
        writer.write_event(Event::user_turn_start()).await.unwrap();
        writer.write_event(Event::user_message("ping")).await.unwrap();
        writer.write_event(Event::user_turn_end()).await.unwrap();
        writer
            .write_event(Event::finish_step(Some(&Usage {
                input_tokens: 10,
                output_tokens: 4,
                total_tokens: 14,
                reasoning_tokens: None,
            })))
            .await
            .unwrap();
        writer
            .write_event(Event::finish_step(Some(&Usage {
                input_tokens: 2,
                output_tokens: 1,
                total_tokens: 3,
                reasoning_tokens: None,
            })))
            .await
            .unwrap();
        blueprint
    }

    #[tokio::test]
    async fn reads_blueprint_and_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.jsonl");
        let blueprint = write_sample(&path).await;

        let reader = ThreadProtocolReader::new(&path).unwrap();
        let parsed = reader.read_blueprint().unwrap();
        assert_eq!(parsed.thread_id, blueprint.thread_id);

        let history = reader.read_history().unwrap();
        assert_eq!(history.len(), 5);
        assert_eq!(history[0].event_type(), "data-user-turn-start");
    }

    #[tokio::test]
    async fn skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.jsonl");
        write_sample(&path).await;

        // Corrupt the file with a half-written line plus junk.
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{\"type\":\"text-complete\",\"id\":\"t\n");
        content.push_str("not json at all\n");
        content.push_str(&Event::text_complete("t2", "ok").to_json_line());
        content.push('\n');
        std::fs::write(&path, content).unwrap();

        let reader = ThreadProtocolReader::new(&path).unwrap();
        let events = reader.read_all().unwrap();
        assert_eq!(events.last().unwrap().str_field("content"), Some("ok"));
    }

    #[tokio::test]
    async fn version_mismatch_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.jsonl");
        let mut blueprint = test_blueprint();
        blueprint.thread_protocol_version = "0.0.1".into();

        let writer = JsonlWriter::open(&path).unwrap();
        writer.write_blueprint(&blueprint).await.unwrap();

        let reader = ThreadProtocolReader::new(&path).unwrap();
        match reader.read_blueprint() {
            Err(Error::VersionMismatch { expected, found }) => {
                assert_eq!(expected, THREAD_PROTOCOL_VERSION);
                assert_eq!(found, "0.0.1");
            }
            other => panic!("expected version mismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn counts_turns_and_sums_usage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.jsonl");
        write_sample(&path).await;

        let reader = ThreadProtocolReader::new(&path).unwrap();
        assert_eq!(reader.count_turns().unwrap(), 1);

        let totals = reader.usage_totals().unwrap();
        assert_eq!(totals.input_tokens, 12);
        assert_eq!(totals.output_tokens, 5);
        assert_eq!(totals.total_tokens, 17);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(ThreadProtocolReader::new("/nonexistent/thread.jsonl").is_err());
    }
}
