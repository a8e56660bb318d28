//! In-memory session state owned by one model instance
//!
//! Two small, capacity-bounded, most-recent-first lists:
//!
//! - [`PromptSessionState`]: a fingerprint sequence and the remote session it produced
//! - [`IncomingSessionState`]: a caller-supplied conversation key bound to a remote session
//!
//! States are immutable once created. Newer states supersede older ones through
//! the `merge_*` functions, which always put the newest state first and drop
//! duplicates. Concurrent invocations race last-write-wins; a stale entry only
//! causes a full-prompt fallback.

use crate::constants::sizes::sessions;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A previously observed conversation prefix and the remote session it produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptSessionState {
    pub session_id: String,
    pub serialized_prompt_messages: Vec<String>,
}

impl PromptSessionState {
    pub fn new(session_id: impl Into<String>, serialized_prompt_messages: Vec<String>) -> Self {
        Self {
            session_id: session_id.into(),
            serialized_prompt_messages,
        }
    }
}

/// A caller-declared conversation key bound to a remote session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingSessionState {
    pub incoming_session_key: String,
    pub session_id: String,
    pub prompt_message_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_prompt_message_signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_prompt_message_signature: Option<String>,
}

impl IncomingSessionState {
    /// Build a state from the fingerprints the turn was sent with
    pub fn from_fingerprints(
        incoming_session_key: impl Into<String>,
        session_id: impl Into<String>,
        fingerprints: &[String],
    ) -> Self {
        Self {
            incoming_session_key: incoming_session_key.into(),
            session_id: session_id.into(),
            prompt_message_count: fingerprints.len(),
            first_prompt_message_signature: fingerprints.first().cloned(),
            last_prompt_message_signature: fingerprints.last().cloned(),
        }
    }
}

/// Insert `state` at the front of `states`, dropping duplicates and trimming to `capacity`
///
/// Two prompt states are duplicates when they share the same fingerprint sequence
/// or the same session id.
pub fn merge_prompt_session_state(
    states: &[PromptSessionState],
    state: PromptSessionState,
    capacity: usize,
) -> Vec<PromptSessionState> {
    let mut merged = Vec::with_capacity(states.len() + 1);
    merged.push(state);
    for existing in states {
        let duplicate = merged.iter().any(|kept| {
            kept.session_id == existing.session_id
                || kept.serialized_prompt_messages == existing.serialized_prompt_messages
        });
        if !duplicate {
            merged.push(existing.clone());
        }
    }
    merged.truncate(capacity);
    merged
}

/// Insert `state` at the front of `states`, keeping one state per incoming key
pub fn merge_incoming_session_state(
    states: &[IncomingSessionState],
    state: IncomingSessionState,
    capacity: usize,
) -> Vec<IncomingSessionState> {
    let mut merged = Vec::with_capacity(states.len() + 1);
    merged.push(state);
    for existing in states {
        if !merged
            .iter()
            .any(|kept| kept.incoming_session_key == existing.incoming_session_key)
        {
            merged.push(existing.clone());
        }
    }
    merged.truncate(capacity);
    merged
}

/// Both session lists of one model instance
#[derive(Clone)]
pub struct SessionStateStore {
    prompt_states: Arc<RwLock<Vec<PromptSessionState>>>,
    incoming_states: Arc<RwLock<Vec<IncomingSessionState>>>,
    prompt_capacity: usize,
    incoming_capacity: usize,
}

impl SessionStateStore {
    pub fn new(prompt_capacity: usize, incoming_capacity: usize) -> Self {
        Self {
            prompt_states: Arc::new(RwLock::new(Vec::new())),
            incoming_states: Arc::new(RwLock::new(Vec::new())),
            prompt_capacity,
            incoming_capacity,
        }
    }

    /// Snapshot of the prompt states, most recent first
    pub async fn prompt_states(&self) -> Vec<PromptSessionState> {
        self.prompt_states.read().await.clone()
    }

    pub async fn remember_prompt_state(&self, state: PromptSessionState) {
        let mut states = self.prompt_states.write().await;
        tracing::debug!(
            "Remembering prompt session {} ({} fingerprints)",
            state.session_id,
            state.serialized_prompt_messages.len()
        );
        *states = merge_prompt_session_state(&states, state, self.prompt_capacity);
    }

    /// Look up an incoming state by key in memory only
    pub async fn incoming_state(&self, incoming_session_key: &str) -> Option<IncomingSessionState> {
        let states = self.incoming_states.read().await;
        states
            .iter()
            .find(|state| state.incoming_session_key == incoming_session_key)
            .cloned()
    }

    pub async fn remember_incoming_state(&self, state: IncomingSessionState) {
        let mut states = self.incoming_states.write().await;
        tracing::debug!(
            "Binding incoming session key '{}' to session {}",
            state.incoming_session_key,
            state.session_id
        );
        *states = merge_incoming_session_state(&states, state, self.incoming_capacity);
    }

    pub async fn prompt_state_count(&self) -> usize {
        self.prompt_states.read().await.len()
    }

    pub async fn incoming_state_count(&self) -> usize {
        self.incoming_states.read().await.len()
    }
}

impl Default for SessionStateStore {
    fn default() -> Self {
        Self::new(
            sessions::PROMPT_SESSION_CAPACITY,
            sessions::INCOMING_SESSION_CAPACITY,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt_state(session_id: &str, fingerprints: &[&str]) -> PromptSessionState {
        PromptSessionState::new(
            session_id,
            fingerprints.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn test_merge_places_newest_first() {
        let states = vec![prompt_state("s1", &["a"])];
        let merged = merge_prompt_session_state(&states, prompt_state("s2", &["a", "b"]), 8);
        assert_eq!(merged[0].session_id, "s2");
        assert_eq!(merged[1].session_id, "s1");
    }

    #[test]
    fn test_merge_drops_identical_fingerprints() {
        let states = vec![prompt_state("s1", &["a", "b"])];
        let merged = merge_prompt_session_state(&states, prompt_state("s2", &["a", "b"]), 8);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].session_id, "s2");
    }

    #[test]
    fn test_merge_drops_identical_session_id() {
        let states = vec![prompt_state("s1", &["a"])];
        let merged = merge_prompt_session_state(&states, prompt_state("s1", &["a", "b"]), 8);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].serialized_prompt_messages.len(), 2);
    }

    #[test]
    fn test_merge_evicts_oldest_beyond_capacity() {
        let mut states = Vec::new();
        for i in 0..5 {
            states = merge_prompt_session_state(
                &states,
                prompt_state(&format!("s{}", i), &[&format!("m{}", i)]),
                3,
            );
        }
        let ids: Vec<_> = states.iter().map(|s| s.session_id.as_str()).collect();
        assert_eq!(ids, vec!["s4", "s3", "s2"]);
    }

    #[test]
    fn test_merge_incoming_keeps_one_state_per_key() {
        let first = IncomingSessionState::from_fingerprints("chat-1", "s1", &["a".to_string()]);
        let second = IncomingSessionState::from_fingerprints(
            "chat-1",
            "s2",
            &["a".to_string(), "b".to_string()],
        );
        let other = IncomingSessionState::from_fingerprints("chat-2", "s3", &["x".to_string()]);

        let merged = merge_incoming_session_state(&[first, other], second, 8);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].session_id, "s2");
        assert_eq!(merged[0].prompt_message_count, 2);
        assert_eq!(merged[1].incoming_session_key, "chat-2");
    }

    #[test]
    fn test_incoming_state_records_first_and_last_signatures() {
        let state = IncomingSessionState::from_fingerprints(
            "k",
            "s",
            &["first".to_string(), "mid".to_string(), "last".to_string()],
        );
        assert_eq!(state.first_prompt_message_signature.as_deref(), Some("first"));
        assert_eq!(state.last_prompt_message_signature.as_deref(), Some("last"));
        assert_eq!(state.prompt_message_count, 3);
    }

    #[tokio::test]
    async fn test_store_remembers_and_looks_up() {
        let store = SessionStateStore::new(4, 4);
        store
            .remember_prompt_state(prompt_state("s1", &["hi"]))
            .await;
        store
            .remember_incoming_state(IncomingSessionState::from_fingerprints(
                "key",
                "s1",
                &["hi".to_string()],
            ))
            .await;

        assert_eq!(store.prompt_state_count().await, 1);
        assert_eq!(
            store.incoming_state("key").await.map(|s| s.session_id),
            Some("s1".to_string())
        );
        assert!(store.incoming_state("missing").await.is_none());
    }
}
