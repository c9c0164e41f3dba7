use chimera_domain::error::Result;
use chimera_domain::message::ModelMessage;
use chimera_domain::stream::{BoxStream, ModelEvent};
use chimera_domain::tool::ToolDefinition;

/// A provider-agnostic streaming request for one model response.
///
/// `messages` already contains the full conversation including the new
/// user prompt (the engine appends it before calling the model); adapters
/// only translate and send.
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    /// The agent's base prompt. The sole system prompt; ambient
    /// instructions ride inside the user message instead.
    pub system_prompt: String,
    /// Conversation history, oldest first.
    pub messages: Vec<ModelMessage>,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,
    /// Sampling temperature. `None` lets the provider choose.
    pub temperature: Option<f32>,
    /// Model identifier override. `None` uses the adapter's default.
    pub model: Option<String>,
}

/// The abstract model handle.
///
/// Implementations translate [`ModelRequest`] into a provider's wire
/// format and surface the response as a flat stream of
/// [`ModelEvent`]s. Cancellation works by dropping the stream.
#[async_trait::async_trait]
pub trait ModelClient: Send + Sync {
    /// Start a streaming completion.
    async fn run_stream(&self, req: ModelRequest) -> Result<BoxStream<'static, Result<ModelEvent>>>;

    /// The model identifier this client resolves to (for logging).
    fn model_id(&self) -> &str;
}
