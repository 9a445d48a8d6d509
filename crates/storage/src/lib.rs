pub mod error;
pub mod ids;
pub mod sqlite;
pub mod types;

pub use error::{StorageError, StorageResult};
pub use ids::{ClientId, MIN_TOKEN_LEN, SessionId};
pub use sqlite::SqliteConversationStore;
pub use types::{SessionDocument, StoredRole, StoredTurn};

use async_trait::async_trait;

/// Key→document persistence boundary for conversation state.
///
/// The store is a session-id→document map: point reads, merge-upserts that
/// never clobber unrelated fields, deletes, and time-ordered queries filtered
/// by the owner field. It is the only resource shared across processes;
/// concurrent writers to one session resolve last-write-wins by the
/// store-assigned `last_updated` timestamp.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Fetches the document keyed by `session_id`, if present.
    async fn fetch(&self, session_id: &SessionId) -> StorageResult<Option<SessionDocument>>;

    /// Writes the full current turn sequence as a merge-upsert.
    ///
    /// `last_updated` is assigned by the store at every persist; `created_at`
    /// is set on first insert and preserved afterwards. Safe to call after
    /// every single exchange (at-least-once semantics).
    async fn upsert(
        &self,
        session_id: &SessionId,
        owner_id: &ClientId,
        turns: &[StoredTurn],
    ) -> StorageResult<SessionDocument>;

    /// Removes the document keyed by `session_id`. Returns whether a
    /// document existed; deleting an absent session is not an error.
    async fn delete(&self, session_id: &SessionId) -> StorageResult<bool>;

    /// Lists documents with `owner_id` equal to the given client, ordered by
    /// `last_updated` descending, bounded by `limit`.
    async fn list_by_owner(
        &self,
        owner_id: &ClientId,
        limit: u32,
    ) -> StorageResult<Vec<SessionDocument>>;
}
