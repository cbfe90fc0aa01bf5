//! On-disk transcript artifact written at teardown and read back by the archive job.

use crate::error::PostCallError;
use crate::types::{ConversationTurn, Speaker};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TranscriptArtifact {
    pub items: Vec<TranscriptItem>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TranscriptItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub role: Speaker,
    pub content: Vec<String>,
    #[serde(default)]
    pub interrupted: bool,
}

impl TranscriptArtifact {
    pub fn from_turns(turns: &[ConversationTurn]) -> Self {
        Self {
            items: turns
                .iter()
                .map(|t| TranscriptItem {
                    id: format!("item_{}", Uuid::new_v4().simple()),
                    kind: "message".to_string(),
                    role: t.speaker,
                    content: vec![t.text.clone()],
                    interrupted: false,
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Well-known artifact location for a call room.
pub fn transcript_path(dir: &Path, room: &str) -> PathBuf {
    dir.join(format!("{room}.json"))
}

/// Overwrite the artifact for `room` with `turns`.  An empty turn list writes an empty
/// placeholder document.
pub async fn write_transcript(
    dir: &Path,
    room: &str,
    turns: &[ConversationTurn],
) -> Result<PathBuf, PostCallError> {
    let path = transcript_path(dir, room);
    let io_err = |source| PostCallError::TranscriptIo {
        path: path.display().to_string(),
        source,
    };
    tokio::fs::create_dir_all(dir).await.map_err(io_err)?;
    let body = serde_json::to_vec_pretty(&TranscriptArtifact::from_turns(turns))?;
    tokio::fs::write(&path, body).await.map_err(io_err)?;
    Ok(path)
}

/// `Ok(None)` when no artifact exists at `path`.
pub async fn read_transcript(path: &Path) -> Result<Option<TranscriptArtifact>, PostCallError> {
    match tokio::fs::read(path).await {
        Ok(body) => Ok(Some(serde_json::from_slice(&body)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(PostCallError::TranscriptIo {
            path: path.display().to_string(),
            source,
        }),
    }
}

/// Plain-text rendering with one `User:` or `Assistant:` line per message.
pub fn format_transcript(artifact: &TranscriptArtifact) -> String {
    artifact
        .items
        .iter()
        .filter(|item| item.kind == "message")
        .map(|item| {
            let who = match item.role {
                Speaker::User => "User",
                Speaker::Assistant => "Assistant",
            };
            format!("{who}: {}", item.content.join(" "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn artifact_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let turns = vec![
            ConversationTurn::new(Speaker::Assistant, "Namaskar, this is Veena."),
            ConversationTurn::new(Speaker::User, "Who is this?"),
        ];
        let path = write_transcript(dir.path(), "call-d1", &turns).await.unwrap();
        assert_eq!(path, dir.path().join("call-d1.json"));

        let artifact = read_transcript(&path).await.unwrap().unwrap();
        assert_eq!(artifact.items.len(), 2);
        assert_eq!(artifact.items[0].role, Speaker::Assistant);
        assert_eq!(artifact.items[1].content, vec!["Who is this?".to_string()]);
        assert_eq!(
            format_transcript(&artifact),
            "Assistant: Namaskar, this is Veena.\nUser: Who is this?"
        );
    }

    #[tokio::test]
    async fn empty_call_writes_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_transcript(dir.path(), "call-empty", &[]).await.unwrap();
        let artifact = read_transcript(&path).await.unwrap().unwrap();
        assert!(artifact.is_empty());
    }

    #[tokio::test]
    async fn missing_artifact_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let missing = transcript_path(dir.path(), "nope");
        assert!(read_transcript(&missing).await.unwrap().is_none());
    }

    #[test]
    fn artifact_uses_wire_field_names() {
        let artifact =
            TranscriptArtifact::from_turns(&[ConversationTurn::new(Speaker::User, "hello")]);
        let wire = serde_json::to_value(&artifact).unwrap();
        assert_eq!(wire["items"][0]["type"], "message");
        assert_eq!(wire["items"][0]["role"], "user");
        assert_eq!(wire["items"][0]["interrupted"], false);
    }
}
