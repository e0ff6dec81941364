use std::sync::{Mutex, PoisonError};

use serde::Serialize;

/// Display log collaborator. Append-only; the core never reads it back.
pub trait Transcript: Send + Sync {
    fn on_observation(&self, text: &str);
    fn on_user_message(&self, text: &str);
    fn on_assistant_message(&self, text: &str);
    fn on_system_message(&self, text: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Observation,
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub ordinal: u64,
    pub speaker: Speaker,
    pub text: String,
}

/// In-memory transcript for the console front end and tests.
#[derive(Debug, Default)]
pub struct TranscriptLog {
    entries: Mutex<Vec<TranscriptEntry>>,
}

impl TranscriptLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, speaker: Speaker, text: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let ordinal = entries.len() as u64 + 1;
        entries.push(TranscriptEntry {
            ordinal,
            speaker,
            text: text.to_string(),
        });
    }

    pub fn entries(&self) -> Vec<TranscriptEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Transcript for TranscriptLog {
    fn on_observation(&self, text: &str) {
        self.push(Speaker::Observation, text);
    }

    fn on_user_message(&self, text: &str) {
        self.push(Speaker::User, text);
    }

    fn on_assistant_message(&self, text: &str) {
        self.push(Speaker::Assistant, text);
    }

    fn on_system_message(&self, text: &str) {
        self.push(Speaker::System, text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_keep_arrival_order() {
        let log = TranscriptLog::new();
        log.on_observation("a desk");
        log.on_user_message("what is on the desk?");
        log.on_assistant_message("a laptop");

        let entries = log.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].speaker, Speaker::Observation);
        assert_eq!(entries[1].speaker, Speaker::User);
        assert_eq!(entries[2].speaker, Speaker::Assistant);
        assert_eq!(entries.iter().map(|e| e.ordinal).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn speaker_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Speaker::System).unwrap(), "\"system\"");
    }
}
