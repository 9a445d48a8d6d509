use mirror_storage::{ClientId, ConversationStore, SessionId};
use tracing::warn;

use super::turn::{self, Turn};

/// Outcome of hydrating a session's turn history from the store.
///
/// A load is never partially satisfied: `Forbidden` withholds the history
/// entirely. `Unavailable` is non-fatal: the in-memory history remains the
/// source of truth for the rest of the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryLoad {
    Turns(Vec<Turn>),
    NotFound,
    Forbidden,
    Unavailable(String),
}

/// Outcome of one persist; failures are data, not errors, because the
/// conversation continues in memory regardless.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    Failed(String),
}

/// Fetches a session's persisted turns, enforcing ownership.
pub async fn load_history(
    store: &dyn ConversationStore,
    session_id: &SessionId,
    client_id: &ClientId,
) -> HistoryLoad {
    match store.fetch(session_id).await {
        Ok(Some(document)) => {
            // Exact equality on the stored owner field, nothing weaker.
            if document.owner_id != *client_id {
                return HistoryLoad::Forbidden;
            }
            HistoryLoad::Turns(turn::from_stored(&document.turns))
        }
        Ok(None) => HistoryLoad::NotFound,
        Err(error) => HistoryLoad::Unavailable(error.to_string()),
    }
}

/// Writes the full current turn sequence after a completed exchange.
///
/// The system turn is excluded by construction; the store assigns the update
/// timestamp. At-least-once semantics: concurrent writers to one session
/// resolve last-write-wins.
pub async fn persist_history(
    store: &dyn ConversationStore,
    session_id: &SessionId,
    client_id: &ClientId,
    turns: &[Turn],
) -> SaveOutcome {
    let stored = turn::to_stored(turns);
    match store.upsert(session_id, client_id, &stored).await {
        Ok(_) => SaveOutcome::Saved,
        Err(error) => {
            warn!(
                %error,
                session_id = %session_id,
                "conversation persist failed; continuing in memory"
            );
            SaveOutcome::Failed(error.to_string())
        }
    }
}
