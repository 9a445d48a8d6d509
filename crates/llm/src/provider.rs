use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use futures::future::BoxFuture;
use snafu::Snafu;
use tokio::sync::{mpsc, oneshot};

use super::rig_adapter::RigProviderAdapter;

/// Completion model used when settings carry none.
pub const DEFAULT_CHAT_MODEL: &str = "deepseek-chat";

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider_id: String,
    pub api_key: String,
    pub endpoint: String,
}

impl ProviderConfig {
    pub fn new(
        provider_id: impl Into<String>,
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            api_key: api_key.into(),
            endpoint: endpoint.into(),
        }
    }
}

/// Speaker role on the provider wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One outbound turn in provider wire shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderMessage {
    pub role: Role,
    pub content: String,
}

impl ProviderMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Everything one completion call needs: model, ordered turn list, sampling.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    pub model_id: String,
    pub messages: Vec<ProviderMessage>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
}

/// Provider stream payload in arrival order.
///
/// `Done` and `Error` are terminal; no payload follows either. A `Delta` may
/// legally carry an empty fragment, which consumers skip rather than append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Delta(String),
    Done,
    Error(String),
}

/// Single-consumer, non-restartable event sequence for one completion call.
///
/// Dropping the stream releases the cancel signal, which stops the worker;
/// this is the only cancellation path (abandoning the process has the same
/// effect).
pub struct ProviderEventStream {
    receiver: mpsc::UnboundedReceiver<StreamEvent>,
    _cancel: oneshot::Sender<()>,
}

impl Stream for ProviderEventStream {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

/// Driver future for one stream; the consumer spawns it on its runtime.
pub type ProviderWorker = BoxFuture<'static, ()>;

pub struct ProviderStreamHandle {
    pub stream: ProviderEventStream,
    pub worker: ProviderWorker,
}

impl std::fmt::Debug for ProviderStreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderStreamHandle").finish_non_exhaustive()
    }
}

/// Builds the event plumbing for one completion call: the sender handed to
/// the worker, the consumer-facing stream, and the cancel receiver the worker
/// selects on.
pub fn make_event_stream() -> (
    mpsc::UnboundedSender<StreamEvent>,
    ProviderEventStream,
    oneshot::Receiver<()>,
) {
    let (event_tx, receiver) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();

    (
        event_tx,
        ProviderEventStream {
            receiver,
            _cancel: cancel_tx,
        },
        cancel_rx,
    )
}

/// Hosted completion endpoint boundary.
pub trait LlmProvider: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn default_model(&self) -> &str;

    /// Opens one streaming completion call. The returned worker must be
    /// spawned by the caller; events then arrive on the stream in order,
    /// terminated by exactly one `Done` or `Error`.
    fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle>;
}

impl std::fmt::Debug for dyn LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmProvider")
            .field("id", &self.id())
            .field("name", &self.name())
            .finish()
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProviderError {
    #[snafu(display("provider '{provider_id}' requires an API key"))]
    MissingApiKey {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("unknown completion provider '{provider_id}'"))]
    UnknownProvider {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("failed to build provider client at {stage}: {message}"))]
    ClientBuild {
        stage: &'static str,
        message: String,
    },
    #[snafu(display("completion request failed at {stage}: {message}"))]
    CompletionsFailed {
        stage: &'static str,
        message: String,
    },
    #[snafu(display("stream request carries no user/assistant messages"))]
    EmptyMessageSet { stage: &'static str },
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Resolves a provider configuration to a concrete adapter.
pub fn create_provider(config: ProviderConfig) -> ProviderResult<Arc<dyn LlmProvider>> {
    match config.provider_id.as_str() {
        // Both speak the OpenAI-compatible wire protocol; only credentials
        // and endpoint differ.
        "openai" | "deepseek" => Ok(Arc::new(RigProviderAdapter::new(config)?)),
        other => UnknownProviderSnafu {
            stage: "create-provider",
            provider_id: other.to_string(),
        }
        .fail(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn event_stream_delivers_events_in_order() {
        let (event_tx, mut stream, _cancel_rx) = make_event_stream();

        event_tx.send(StreamEvent::Delta("你".to_string())).unwrap();
        event_tx.send(StreamEvent::Delta("好".to_string())).unwrap();
        event_tx.send(StreamEvent::Done).unwrap();
        drop(event_tx);

        let mut seen = Vec::new();
        while let Some(event) = stream.next().await {
            seen.push(event);
        }

        assert_eq!(
            seen,
            vec![
                StreamEvent::Delta("你".to_string()),
                StreamEvent::Delta("好".to_string()),
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn dropping_the_stream_fires_the_cancel_signal() {
        let (_event_tx, stream, mut cancel_rx) = make_event_stream();

        assert!(cancel_rx.try_recv().is_err());
        drop(stream);

        // A dropped sender resolves the receiver immediately.
        assert!(cancel_rx.await.is_err());
    }

    #[test]
    fn create_provider_rejects_unknown_ids() {
        let config = ProviderConfig::new("teapot", "key-material", "");
        let error = create_provider(config).unwrap_err();

        assert!(matches!(error, ProviderError::UnknownProvider { .. }));
    }

    #[test]
    fn create_provider_requires_an_api_key() {
        let config = ProviderConfig::new("deepseek", "", "https://api.deepseek.com");
        let error = create_provider(config).unwrap_err();

        assert!(matches!(error, ProviderError::MissingApiKey { .. }));
    }
}
