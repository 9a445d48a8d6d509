use std::sync::Arc;

use futures::StreamExt;
use mirror_llm::{LlmProvider, ProviderMessage, ProviderStreamHandle, StreamEvent, StreamRequest};
use mirror_storage::{ClientId, ConversationStore, SessionId};
use snafu::Snafu;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::adapter::{self, HistoryLoad, SaveOutcome};
use super::persona;
use super::turn::{self, Turn};

/// Exchange lifecycle over one session.
///
/// `Halted` is terminal for the current exchange only: the next user turn
/// begins a new exchange normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExchangeState {
    #[default]
    Idle,
    AwaitingReply,
    Halted,
}

/// State transition input for the exchange lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeTransition {
    Begin,
    Complete,
    Halt,
}

/// Rejection reason for illegal exchange transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeRejection {
    ReplyInFlight,
    NoReplyInFlight,
}

impl ExchangeState {
    /// Applies one transition deterministically.
    ///
    /// No new exchange may begin while a reply is in flight; the
    /// presentation layer additionally disables input for the duration.
    pub fn apply(self, transition: ExchangeTransition) -> Result<Self, ExchangeRejection> {
        match transition {
            ExchangeTransition::Begin => match self {
                Self::Idle | Self::Halted => Ok(Self::AwaitingReply),
                Self::AwaitingReply => Err(ExchangeRejection::ReplyInFlight),
            },
            ExchangeTransition::Complete => match self {
                Self::AwaitingReply => Ok(Self::Idle),
                Self::Idle | Self::Halted => Err(ExchangeRejection::NoReplyInFlight),
            },
            ExchangeTransition::Halt => match self {
                Self::Idle | Self::Halted => Ok(Self::Halted),
                Self::AwaitingReply => Err(ExchangeRejection::ReplyInFlight),
            },
        }
    }
}

#[derive(Debug, Snafu)]
pub enum SubmitError {
    #[snafu(display("no completion provider is configured; history browsing remains available"))]
    ProviderUnconfigured,
    #[snafu(display("a reply is already being generated for this session"))]
    ReplyInFlight,
}

/// Result of one submitted user turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    /// Assistant reply text; `None` when the exchange was halted.
    pub reply: Option<String>,
    /// True when the stop directive intercepted the exchange.
    pub halted: bool,
    /// Persistence result; `None` when nothing was persisted.
    pub save: Option<SaveOutcome>,
}

/// Orchestrates turn submission for one session: append the user turn, run
/// the provider stream, append the reply, persist.
pub struct ConversationController {
    client_id: ClientId,
    session_id: SessionId,
    store: Arc<dyn ConversationStore>,
    provider: Option<Arc<dyn LlmProvider>>,
    model_id: String,
    temperature: f64,
    turns: Vec<Turn>,
    state: ExchangeState,
    fragment_sink: Option<mpsc::UnboundedSender<String>>,
    restored: bool,
}

impl ConversationController {
    /// Loads the session's persisted history, degrading to a fresh
    /// opening-message history whenever the store cannot satisfy the load.
    pub async fn hydrate(
        client_id: ClientId,
        session_id: SessionId,
        store: Arc<dyn ConversationStore>,
        provider: Option<Arc<dyn LlmProvider>>,
        model_id: impl Into<String>,
        temperature: f64,
    ) -> Self {
        let mut session_id = session_id;
        let mut restored = false;

        let turns = match adapter::load_history(store.as_ref(), &session_id, &client_id).await {
            HistoryLoad::Turns(turns) if !turns.is_empty() => {
                info!(session_id = %session_id, turn_count = turns.len(), "restored conversation history");
                restored = true;
                turns
            }
            HistoryLoad::Turns(_) | HistoryLoad::NotFound => seed_opening(),
            HistoryLoad::Forbidden => {
                // Never partially satisfied: withhold the foreign history and
                // start fresh under a new session identifier.
                warn!(session_id = %session_id, "stored session belongs to another client; starting fresh");
                session_id = SessionId::mint(&client_id);
                seed_opening()
            }
            HistoryLoad::Unavailable(reason) => {
                warn!(%reason, "history unavailable; continuing with an in-memory session");
                seed_opening()
            }
        };

        Self {
            client_id,
            session_id,
            store,
            provider,
            model_id: model_id.into(),
            temperature,
            turns,
            state: ExchangeState::Idle,
            fragment_sink: None,
            restored,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// True when hydration recovered a non-empty persisted history.
    pub fn restored_from_archive(&self) -> bool {
        self.restored
    }

    /// Registers a sink that receives reply fragments as they arrive, so the
    /// presentation layer can render partial state however it chooses.
    pub fn set_fragment_sink(&mut self, sink: mpsc::UnboundedSender<String>) {
        self.fragment_sink = Some(sink);
    }

    /// Drops the fragment sink, closing its channel so a consumer can
    /// observe that no further fragments will arrive.
    pub fn clear_fragment_sink(&mut self) {
        self.fragment_sink = None;
    }

    /// Drops the in-memory history and continues under a different session.
    pub fn reset_to(&mut self, session_id: SessionId) {
        self.session_id = session_id;
        self.turns = seed_opening();
        self.state = ExchangeState::Idle;
        self.restored = false;
    }

    /// Runs one exchange: user turn in, assistant turn (or halt) out.
    ///
    /// Turns are appended strictly in submission/arrival order, never
    /// reordered, deduplicated, or merged. Provider failures substitute the
    /// fixed fallback reply and are persisted like any completed exchange,
    /// so the failure itself survives a reload.
    pub async fn submit_turn(&mut self, content: &str) -> Result<TurnOutcome, SubmitError> {
        if content.starts_with(persona::STOP_DIRECTIVE) {
            // The stop directive never reaches the provider; the
            // acknowledgement is surfaced, not appended to history.
            self.state = self
                .state
                .apply(ExchangeTransition::Halt)
                .map_err(|_| ReplyInFlightSnafu.build())?;
            self.turns.push(Turn::user(content));
            info!(session_id = %self.session_id, "stop directive received; reply generation halted");
            return Ok(TurnOutcome {
                reply: None,
                halted: true,
                save: None,
            });
        }

        if self.provider.is_none() {
            return ProviderUnconfiguredSnafu.fail();
        }

        self.state = self
            .state
            .apply(ExchangeTransition::Begin)
            .map_err(|_| SubmitError::ReplyInFlight)?;
        self.turns.push(Turn::user(content));

        let outbound = turn::outbound_messages(&persona::system_prompt(), &self.turns);
        let reply = match self.stream_reply(outbound).await {
            Ok(reply) => reply,
            Err(reason) => {
                // The partial buffer is abandoned; the fixed fallback reply
                // takes its place and is persisted like any other turn.
                warn!(
                    session_id = %self.session_id,
                    %reason,
                    "completion provider failed; substituting fallback reply"
                );
                persona::FALLBACK_REPLY.to_string()
            }
        };

        self.turns.push(Turn::assistant(reply.clone()));
        if let Ok(next) = self.state.apply(ExchangeTransition::Complete) {
            self.state = next;
        }

        let save = adapter::persist_history(
            self.store.as_ref(),
            &self.session_id,
            &self.client_id,
            &self.turns,
        )
        .await;

        Ok(TurnOutcome {
            reply: Some(reply),
            halted: false,
            save: Some(save),
        })
    }

    // Accumulates the provider's fragment sequence into one reply buffer, in
    // arrival order. Empty fragments are skipped rather than appended.
    async fn stream_reply(&self, messages: Vec<ProviderMessage>) -> Result<String, String> {
        let Some(provider) = self.provider.as_ref() else {
            return Err("no completion provider configured".to_string());
        };

        let request = StreamRequest {
            model_id: self.model_id.clone(),
            messages,
            temperature: Some(self.temperature),
            max_tokens: None,
        };

        let ProviderStreamHandle { mut stream, worker } = provider
            .stream_chat(request)
            .map_err(|error| error.to_string())?;
        tokio::spawn(worker);

        let mut buffer = String::new();
        let mut completed = false;

        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::Delta(fragment) => {
                    if fragment.is_empty() {
                        continue;
                    }
                    if let Some(sink) = &self.fragment_sink {
                        let _ = sink.send(fragment.clone());
                    }
                    buffer.push_str(&fragment);
                }
                StreamEvent::Done => {
                    completed = true;
                    break;
                }
                StreamEvent::Error(message) => return Err(message),
            }
        }

        if completed {
            Ok(buffer)
        } else {
            Err("stream ended without completion".to_string())
        }
    }
}

fn seed_opening() -> Vec<Turn> {
    vec![Turn::assistant(persona::OPENING_MESSAGE)]
}
