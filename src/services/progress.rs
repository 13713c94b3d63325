use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::core::attempt::{AttemptKey, Record};
use crate::host::FullscreenGate;
use crate::schemas::exam::QuestionStatus;
use crate::store::StateStore;

/// Completed questions of each attempt.
///
/// Persisted on every change. While storage is unavailable the set is still tracked
/// for the lifetime of this store, and a question once marked is never unmarked.
pub(crate) struct AttemptProgressStore {
    store: Arc<dyn StateStore>,
    session: Mutex<HashMap<AttemptKey, BTreeSet<String>>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QuestionAvailability {
    pub(crate) question_id: String,
    pub(crate) locally_completed: bool,
    pub(crate) server_completed: Option<bool>,
    pub(crate) can_solve: bool,
}

/// Only the server's completion flag disables solving; local completion (a passing
/// "Run", say) never does.
pub(crate) fn can_attempt(server: Option<QuestionStatus>) -> bool {
    !matches!(server, Some(QuestionStatus { is_completed: true }))
}

impl AttemptProgressStore {
    pub(crate) fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store, session: Mutex::new(HashMap::new()) }
    }

    fn session_ids(&self, key: &AttemptKey) -> BTreeSet<String> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    async fn persisted_ids(&self, key: &AttemptKey) -> BTreeSet<String> {
        match self.store.get(&key.storage_key(Record::CompletedQuestions)).await {
            Ok(Some(raw)) => match serde_json::from_str::<BTreeSet<String>>(&raw) {
                Ok(ids) => ids,
                Err(err) => {
                    tracing::warn!(attempt = %key, error = %err, "Ignoring corrupt progress record");
                    BTreeSet::new()
                }
            },
            Ok(None) => BTreeSet::new(),
            Err(err) => {
                tracing::warn!(attempt = %key, error = %err, "Progress storage unavailable");
                BTreeSet::new()
            }
        }
    }

    pub(crate) async fn load(&self, key: &AttemptKey) -> BTreeSet<String> {
        let mut ids = self.persisted_ids(key).await;
        ids.extend(self.session_ids(key));
        ids
    }

    pub(crate) async fn mark_completed(&self, key: &AttemptKey, question_id: &str) -> BTreeSet<String> {
        {
            let mut session = self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            session.entry(key.clone()).or_default().insert(question_id.to_string());
        }

        let ids = self.load(key).await;
        let payload = match serde_json::to_string(&ids) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!(attempt = %key, error = %err, "Failed to encode progress record");
                return ids;
            }
        };

        if let Err(err) = self.store.set(&key.storage_key(Record::CompletedQuestions), &payload).await {
            tracing::warn!(
                attempt = %key,
                question_id,
                error = %err,
                "Progress kept for this session only"
            );
        } else {
            tracing::debug!(attempt = %key, question_id, completed = ids.len(), "Question marked completed");
        }

        ids
    }

    pub(crate) async fn availability(
        &self,
        key: &AttemptKey,
        question_id: &str,
        server: Option<QuestionStatus>,
    ) -> QuestionAvailability {
        let locally_completed = self.load(key).await.contains(question_id);
        QuestionAvailability {
            question_id: question_id.to_string(),
            locally_completed,
            server_completed: server.map(|status| status.is_completed),
            can_solve: can_attempt(server),
        }
    }
}

/// Asks the host for fullscreen before a question view opens. Denial is not fatal.
pub(crate) async fn enter_question_view(gate: &dyn FullscreenGate, question_id: &str) -> bool {
    match gate.request_fullscreen().await {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(question_id, error = %err, "Fullscreen denied; continuing windowed");
            false
        }
    }
}
