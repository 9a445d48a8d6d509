use std::sync::Arc;

use mirror_storage::{ClientId, ConversationStore, SessionDocument, SessionId};
use tracing::{debug, warn};

use super::identity::{ContinuitySignals, SESSION_TOKEN_KEY};

/// Bounded page size for session listings.
pub const SESSION_PAGE_LIMIT: u32 = 10;

/// Preview length, in characters, taken from a session's last turn.
pub const PREVIEW_MAX_CHARS: usize = 50;

/// Listing row for one stored conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub preview: String,
    pub turn_count: u64,
    pub last_updated_unix_seconds: u64,
}

enum Ownership {
    Owned,
    Foreign,
    Absent,
    Unavailable,
}

/// Maps a client identifier to its active conversation session.
pub struct SessionRegistry {
    store: Arc<dyn ConversationStore>,
    signals: Arc<dyn ContinuitySignals>,
    cached: Option<SessionId>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn ConversationStore>, signals: Arc<dyn ContinuitySignals>) -> Self {
        Self {
            store,
            signals,
            cached: None,
        }
    }

    /// Resolves which session is active for this client.
    ///
    /// Priority order: address-carried session token, cached process state,
    /// most-recently-updated owned session, freshly minted session. Every
    /// candidate that resolves to a stored document must pass the ownership
    /// check before being adopted; a failing candidate is withheld entirely
    /// and resolution falls through to the next tier.
    pub async fn current_session(&mut self, client_id: &ClientId) -> SessionId {
        if let Some(raw) = self.signals.address_param(SESSION_TOKEN_KEY) {
            match SessionId::parse(&raw) {
                Ok(candidate) => match self.ownership(&candidate, client_id).await {
                    // An absent document is a session minted but never
                    // persisted; adopting it is safe because the first
                    // persist stamps this client as its owner.
                    Ownership::Owned | Ownership::Absent => {
                        self.adopt(candidate.clone());
                        return candidate;
                    }
                    Ownership::Foreign => {
                        warn!(
                            session_id = %candidate,
                            "address session token belongs to another client; withholding it"
                        );
                    }
                    Ownership::Unavailable => {}
                },
                Err(error) => {
                    debug!(%error, "ignoring malformed session token in address");
                }
            }
        }

        if let Some(candidate) = self.cached.clone() {
            match self.ownership(&candidate, client_id).await {
                Ownership::Owned | Ownership::Absent => return candidate,
                Ownership::Foreign | Ownership::Unavailable => {
                    self.cached = None;
                }
            }
        }

        match self.store.list_by_owner(client_id, 1).await {
            Ok(documents) => {
                if let Some(document) = documents.into_iter().next() {
                    let session_id = document.session_id;
                    self.adopt(session_id.clone());
                    return session_id;
                }
            }
            Err(error) => {
                warn!(%error, "session lookup unavailable; starting a fresh session");
            }
        }

        let fresh = SessionId::mint(client_id);
        self.adopt(fresh.clone());
        fresh
    }

    /// Lists this client's stored sessions, newest first, excluding the
    /// active one. Any store failure degrades to an empty listing.
    pub async fn list_sessions(
        &self,
        client_id: &ClientId,
        exclude: Option<&SessionId>,
    ) -> Vec<SessionSummary> {
        let documents = match self
            .store
            .list_by_owner(client_id, SESSION_PAGE_LIMIT + 1)
            .await
        {
            Ok(documents) => documents,
            Err(error) => {
                warn!(%error, "session listing unavailable");
                return Vec::new();
            }
        };

        documents
            .into_iter()
            .filter(|document| exclude != Some(&document.session_id))
            .take(SESSION_PAGE_LIMIT as usize)
            .map(summarize)
            .collect()
    }

    /// Mints a new session and makes it the active one.
    ///
    /// No existing record is touched; the caller drops its in-memory turn
    /// history so the next hydration reads (or initializes) the new session
    /// cleanly.
    pub fn start_new_session(&mut self, client_id: &ClientId) -> SessionId {
        let fresh = SessionId::mint(client_id);
        self.adopt(fresh.clone());
        fresh
    }

    /// Deletes one owned session document. Other sessions are never
    /// affected; foreign or unverifiable sessions are refused.
    pub async fn discard_session(
        &mut self,
        client_id: &ClientId,
        session_id: &SessionId,
    ) -> bool {
        match self.ownership(session_id, client_id).await {
            Ownership::Owned => match self.store.delete(session_id).await {
                Ok(removed) => {
                    if self.cached.as_ref() == Some(session_id) {
                        self.cached = None;
                    }
                    removed
                }
                Err(error) => {
                    warn!(%error, session_id = %session_id, "failed to discard session document");
                    false
                }
            },
            Ownership::Absent => {
                if self.cached.as_ref() == Some(session_id) {
                    self.cached = None;
                }
                false
            }
            Ownership::Foreign => {
                warn!(
                    session_id = %session_id,
                    "refusing to discard a session owned by another client"
                );
                false
            }
            Ownership::Unavailable => false,
        }
    }

    // Ownership is exact equality on the stored owner field. The structural
    // client prefix inside a session id is never consulted: prefix matching
    // admits false positives once enough sessions accumulate.
    async fn ownership(&self, session_id: &SessionId, client_id: &ClientId) -> Ownership {
        match self.store.fetch(session_id).await {
            Ok(Some(document)) if document.owner_id == *client_id => Ownership::Owned,
            Ok(Some(_)) => Ownership::Foreign,
            Ok(None) => Ownership::Absent,
            Err(error) => {
                warn!(%error, session_id = %session_id, "ownership check unavailable");
                Ownership::Unavailable
            }
        }
    }

    fn adopt(&mut self, session_id: SessionId) {
        if self.cached.as_ref() == Some(&session_id) {
            return;
        }

        self.signals
            .set_address_param(SESSION_TOKEN_KEY, session_id.as_str());
        self.signals
            .write_token(SESSION_TOKEN_KEY, session_id.as_str());
        self.cached = Some(session_id);
    }
}

fn summarize(document: SessionDocument) -> SessionSummary {
    let preview = document
        .turns
        .last()
        .map(|turn| truncate_preview(&turn.content, PREVIEW_MAX_CHARS))
        .unwrap_or_default();

    SessionSummary {
        session_id: document.session_id,
        preview,
        turn_count: document.message_count,
        last_updated_unix_seconds: document.last_updated_unix_seconds,
    }
}

fn truncate_preview(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }

    let mut preview: String = content.chars().take(max_chars).collect();
    preview.push('…');
    preview
}
