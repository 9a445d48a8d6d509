pub mod provider;
pub mod rig_adapter;

pub use provider::{
    DEFAULT_CHAT_MODEL, LlmProvider, ProviderConfig, ProviderError, ProviderEventStream,
    ProviderMessage, ProviderResult, ProviderStreamHandle, ProviderWorker, Role, StreamEvent,
    StreamRequest, create_provider, make_event_stream,
};
pub use rig_adapter::RigProviderAdapter;
