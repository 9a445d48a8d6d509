//! Session identity and conversation continuity core: who a returning
//! client is, which conversation is theirs, and how one exchange flows from
//! user turn to persisted history.

pub mod adapter;
pub mod controller;
pub mod identity;
pub mod persona;
pub mod registry;
pub mod turn;

pub use adapter::{HistoryLoad, SaveOutcome, load_history, persist_history};
pub use controller::{
    ConversationController, ExchangeRejection, ExchangeState, ExchangeTransition, SubmitError,
    TurnOutcome,
};
pub use identity::{CLIENT_TOKEN_KEY, ContinuitySignals, IdentityResolver, SESSION_TOKEN_KEY};
pub use registry::{PREVIEW_MAX_CHARS, SESSION_PAGE_LIMIT, SessionRegistry, SessionSummary};
pub use turn::{Role, Turn};

#[cfg(test)]
mod support;
