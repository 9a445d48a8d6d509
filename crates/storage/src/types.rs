use serde::{Deserialize, Serialize};

use super::ids::{ClientId, SessionId};

/// Storage-local speaker role.
///
/// The system turn is reconstructed from static configuration on every load,
/// so it is deliberately unrepresentable here: persisted history can only
/// ever contain user and assistant turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoredRole {
    User,
    Assistant,
}

/// One persisted message, insertion order significant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTurn {
    pub role: StoredRole,
    pub content: String,
}

impl StoredTurn {
    pub fn new(role: StoredRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// One session's document as held in the store: the full ordered turn
/// history plus ownership and bookkeeping fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDocument {
    pub session_id: SessionId,
    pub owner_id: ClientId,
    pub turns: Vec<StoredTurn>,
    pub message_count: u64,
    pub created_at_unix_seconds: u64,
    pub last_updated_unix_seconds: u64,
}
