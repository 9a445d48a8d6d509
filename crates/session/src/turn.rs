use mirror_llm::{ProviderMessage, Role as WireRole};
use mirror_storage::{StoredRole, StoredTurn};

/// Chat-level speaker role, intentionally decoupled from the storage and
/// provider-wire enums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in a conversation, insertion order significant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Maps in-memory history to its persisted shape.
///
/// System turns have no storage representation and silently drop out here;
/// everything else keeps its append order.
pub fn to_stored(turns: &[Turn]) -> Vec<StoredTurn> {
    turns
        .iter()
        .filter_map(|turn| {
            let role = match turn.role {
                Role::System => return None,
                Role::User => StoredRole::User,
                Role::Assistant => StoredRole::Assistant,
            };
            Some(StoredTurn::new(role, turn.content.clone()))
        })
        .collect()
}

pub fn from_stored(stored: &[StoredTurn]) -> Vec<Turn> {
    stored
        .iter()
        .map(|turn| {
            let role = match turn.role {
                StoredRole::User => Role::User,
                StoredRole::Assistant => Role::Assistant,
            };
            Turn::new(role, turn.content.clone())
        })
        .collect()
}

/// Assembles the outbound provider turn list: the configured system turn
/// first, then the full user/assistant history in append order.
pub fn outbound_messages(system_prompt: &str, turns: &[Turn]) -> Vec<ProviderMessage> {
    let mut messages = Vec::with_capacity(turns.len() + 1);
    messages.push(ProviderMessage::new(WireRole::System, system_prompt));

    for turn in turns {
        let role = match turn.role {
            Role::System => continue,
            Role::User => WireRole::User,
            Role::Assistant => WireRole::Assistant,
        };
        messages.push(ProviderMessage::new(role, turn.content.clone()));
    }

    messages
}
