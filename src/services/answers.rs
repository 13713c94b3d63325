use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use crate::core::attempt::{AttemptKey, Record};
use crate::schemas::submission::McqAnswer;
use crate::store::StateStore;

type AnswerMap = BTreeMap<String, String>;

/// In-progress MCQ selections, one map per attempt. Cleared after a successful submit.
///
/// Selections made by this process are also kept in memory, so a storage outage loses
/// nothing before submission.
pub(crate) struct McqAnswerStore {
    store: Arc<dyn StateStore>,
    session: Mutex<HashMap<AttemptKey, AnswerMap>>,
}

impl McqAnswerStore {
    pub(crate) fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store, session: Mutex::new(HashMap::new()) }
    }

    fn with_session<T>(&self, f: impl FnOnce(&mut HashMap<AttemptKey, AnswerMap>) -> T) -> T {
        let mut session = self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut session)
    }

    pub(crate) async fn load(&self, key: &AttemptKey) -> AnswerMap {
        let mut answers = self.persisted(key).await;
        if let Some(recent) = self.with_session(|session| session.get(key).cloned()) {
            answers.extend(recent);
        }
        answers
    }

    async fn persisted(&self, key: &AttemptKey) -> AnswerMap {
        match self.store.get(&key.storage_key(Record::McqAnswers)).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                tracing::warn!(attempt = %key, error = %err, "Ignoring corrupt answer record");
                BTreeMap::new()
            }),
            Ok(None) => BTreeMap::new(),
            Err(err) => {
                tracing::warn!(attempt = %key, error = %err, "Answer storage unavailable");
                BTreeMap::new()
            }
        }
    }

    /// Records a selection and returns the full map. A later selection for the same
    /// question replaces the earlier one.
    pub(crate) async fn record(
        &self,
        key: &AttemptKey,
        question_id: &str,
        selected_option: &str,
    ) -> AnswerMap {
        self.with_session(|session| {
            session
                .entry(key.clone())
                .or_default()
                .insert(question_id.to_string(), selected_option.to_string());
        });
        let answers = self.load(key).await;

        match serde_json::to_string(&answers) {
            Ok(payload) => {
                if let Err(err) = self.store.set(&key.storage_key(Record::McqAnswers), &payload).await {
                    tracing::warn!(attempt = %key, error = %err, "Failed to persist answer");
                }
            }
            Err(err) => tracing::error!(attempt = %key, error = %err, "Failed to encode answers"),
        }

        answers
    }

    pub(crate) async fn clear(&self, key: &AttemptKey) {
        self.with_session(|session| session.remove(key));
        if let Err(err) = self.store.remove(&key.storage_key(Record::McqAnswers)).await {
            tracing::warn!(attempt = %key, error = %err, "Failed to clear answer record");
        }
    }
}

/// Blank entries are dropped; the backend rejects them and they carry no selection.
pub(crate) fn to_wire(answers: &AnswerMap) -> Vec<McqAnswer> {
    answers
        .iter()
        .filter(|(question_id, selected_option)| {
            !question_id.trim().is_empty() && !selected_option.trim().is_empty()
        })
        .map(|(question_id, selected_option)| McqAnswer {
            question_id: question_id.clone(),
            selected_option: selected_option.clone(),
        })
        .collect()
}
